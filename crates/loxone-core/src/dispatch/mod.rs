// ── Event dispatcher ──
//
// Decoded state updates are resolved against the current structure,
// reinterpreted by role, cached and fanned out to per-subscriber channels.
// Subscriptions live here rather than on a link, so they survive
// reconnects.

mod listener;

use std::sync::Arc;

use arc_swap::{ArcSwap, ArcSwapOption};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use loxone_api::{EventSink, EventTable, Identifier, StateUpdate, StateValue};
use tracing::{trace, warn};

pub use listener::Subscription;
use listener::Listener;

use crate::model::{StructureDocument, ValueKind};

/// A state value after role reinterpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchedValue {
    Number(f64),
    Bool(bool),
    Integer(i64),
    Text { text: String, icon: Identifier },
    Bytes(Bytes),
}

impl DispatchedValue {
    fn reinterpret(value: StateValue, kind: ValueKind) -> Self {
        match value {
            StateValue::Number(v) => match kind {
                ValueKind::Number => Self::Number(v),
                ValueKind::Bool => Self::Bool(v != 0.0),
                ValueKind::Integer if v.is_finite() => Self::Integer(truncate(v)),
                ValueKind::Integer => Self::Number(v),
            },
            StateValue::Text { text, icon } => Self::Text { text, icon },
            StateValue::Bytes(bytes) => Self::Bytes(bytes),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Integer(i) => Some(widen(*i)),
            Self::Text { .. } | Self::Bytes(_) => None,
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
fn truncate(v: f64) -> i64 {
    // Saturating float-to-int cast.
    v.trunc() as i64
}

#[allow(clippy::cast_precision_loss, clippy::as_conversions)]
fn widen(i: i64) -> f64 {
    i as f64
}

impl std::fmt::Display for DispatchedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(v) => write!(f, "{v}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Text { text, .. } => f.write_str(text),
            Self::Bytes(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// A state update with its owning control and role resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedUpdate {
    pub id: Identifier,
    /// `None` when the state is not listed in the current structure.
    pub control: Option<Identifier>,
    pub role: Option<String>,
    pub value: DispatchedValue,
    pub received_at: DateTime<Utc>,
}

pub struct Dispatcher {
    listeners: DashMap<Identifier, Vec<Listener>>,
    wildcard: ArcSwap<Vec<Listener>>,
    last_values: DashMap<Identifier, DispatchedValue>,
    structure: ArcSwapOption<StructureDocument>,
    capacity: usize,
    suppress_duplicates: bool,
}

impl Dispatcher {
    pub fn new(capacity: usize, suppress_duplicates: bool) -> Self {
        Self {
            listeners: DashMap::new(),
            wildcard: ArcSwap::from_pointee(Vec::new()),
            last_values: DashMap::new(),
            structure: ArcSwapOption::empty(),
            capacity,
            suppress_duplicates,
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Updates for one state identifier, in wire order.
    pub fn subscribe(&self, id: Identifier) -> Subscription {
        let (sender, subscription) = listener::channel(self.capacity);
        self.listeners.entry(id).or_default().push(sender);
        subscription
    }

    /// Every update, whatever its identifier.
    pub fn subscribe_all(&self) -> Subscription {
        let (sender, subscription) = listener::channel(self.capacity);
        self.wildcard.rcu(|current| {
            let mut next: Vec<_> = current.iter().filter(|l| !listener::is_closed(l)).cloned().collect();
            next.push(sender.clone());
            next
        });
        subscription
    }

    /// Number of live subscriptions for `id`.
    pub fn listener_count(&self, id: &Identifier) -> usize {
        self.listeners
            .get(id)
            .map_or(0, |senders| senders.iter().filter(|l| !listener::is_closed(l)).count())
    }

    // ── Structure ────────────────────────────────────────────────────

    pub fn set_structure(&self, structure: Arc<StructureDocument>) {
        self.structure.store(Some(structure));
    }

    pub fn structure(&self) -> Option<Arc<StructureDocument>> {
        self.structure.load_full()
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    pub fn last_value(&self, id: &Identifier) -> Option<DispatchedValue> {
        self.last_values.get(id).map(|v| v.clone())
    }

    pub fn dispatch(&self, update: StateUpdate) {
        let structure = self.structure.load();
        let resolved = structure
            .as_deref()
            .and_then(|doc| doc.resolve_role(&update.id));
        let kind = resolved.map_or(ValueKind::Number, |(control, role)| control.value_kind(role));
        let value = DispatchedValue::reinterpret(update.value, kind);

        if let Some(previous) = self.last_values.insert(update.id, value.clone()) {
            if self.suppress_duplicates && previous == value {
                trace!(id = %update.id, "duplicate value suppressed");
                return;
            }
        }

        let dispatched = Arc::new(DispatchedUpdate {
            id: update.id,
            control: resolved.map(|(control, _)| control.id),
            role: resolved.map(|(_, role)| role.to_owned()),
            value,
            received_at: update.received_at,
        });

        let mut emptied = false;
        if let Some(mut senders) = self.listeners.get_mut(&update.id) {
            senders.retain(|l| !listener::is_closed(l));
            for sender in senders.iter() {
                // Only fails when the subscription went away meanwhile.
                let _ = sender.send(Arc::clone(&dispatched));
            }
            emptied = senders.is_empty();
        }
        if emptied {
            self.listeners.remove_if(&update.id, |_, senders| senders.is_empty());
        }

        let wildcard = self.wildcard.load();
        if wildcard.iter().any(listener::is_closed) {
            self.wildcard.rcu(|current| {
                current
                    .iter()
                    .filter(|l| !listener::is_closed(l))
                    .cloned()
                    .collect::<Vec<_>>()
            });
        }
        for sender in wildcard.iter() {
            let _ = sender.send(Arc::clone(&dispatched));
        }
    }
}

impl EventSink for Dispatcher {
    fn on_event_table(&self, table: EventTable) {
        for record in &table {
            match record {
                Ok(update) => self.dispatch(update),
                Err(e) => {
                    warn!(error = %e, "truncated event table, remaining records skipped");
                    break;
                }
            }
        }
    }

    fn on_out_of_service(&self) {
        warn!("Miniserver is going out of service");
    }
}
