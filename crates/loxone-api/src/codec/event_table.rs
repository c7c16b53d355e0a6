// ── Event tables ──
//
// Binary state-change tables sent after `enablebinstatusupdate`.
// Records are decoded lazily in wire order; re-iterating the same
// table restarts from the first record.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};

use super::header::FrameKind;
use crate::error::CodecError;
use crate::identifier::{IDENTIFIER_LEN, Identifier};

/// Longest text accepted in a text event record.
pub const MAX_TEXT_EVENT_LEN: usize = 16 * 1024;

const VALUE_RECORD_LEN: usize = IDENTIFIER_LEN + 8;
const DAYTIMER_ENTRY_LEN: usize = 24;

/// Record layout of an event-table payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLayout {
    /// Identifier + f64.
    Values,
    /// Identifier + icon identifier + length-prefixed text.
    Text,
    /// Identifier + f64 default + i32 entry count + entries.
    Extended,
}

impl TableLayout {
    pub fn for_kind(kind: FrameKind) -> Option<Self> {
        match kind {
            FrameKind::EventTableValues => Some(Self::Values),
            FrameKind::EventTableText => Some(Self::Text),
            FrameKind::EventTableValuesExtended => Some(Self::Extended),
            _ => None,
        }
    }
}

/// Raw value carried by one record.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Number(f64),
    Text { text: String, icon: Identifier },
    /// Extended record body, everything after the identifier.
    Bytes(Bytes),
}

/// One decoded record tagged with its frame-receipt time.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub id: Identifier,
    pub value: StateValue,
    pub received_at: DateTime<Utc>,
}

/// A decoded-on-demand event table.
#[derive(Debug, Clone)]
pub struct EventTable {
    payload: Bytes,
    layout: TableLayout,
    received_at: DateTime<Utc>,
}

/// Wrap an event-table payload for lazy decoding.
pub fn decode_event_table(
    payload: Bytes,
    layout: TableLayout,
    received_at: DateTime<Utc>,
) -> EventTable {
    EventTable {
        payload,
        layout,
        received_at,
    }
}

impl EventTable {
    pub fn layout(&self) -> TableLayout {
        self.layout
    }

    /// Iterate the records from the start.
    pub fn iter(&self) -> EventIter {
        EventIter {
            payload: self.payload.clone(),
            offset: 0,
            layout: self.layout,
            received_at: self.received_at,
            failed: false,
        }
    }
}

impl IntoIterator for &EventTable {
    type Item = Result<StateUpdate, CodecError>;
    type IntoIter = EventIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the records of an [`EventTable`].
///
/// Yields a single `Err` on a truncated or invalid record, then stops.
#[derive(Debug, Clone)]
pub struct EventIter {
    payload: Bytes,
    offset: usize,
    layout: TableLayout,
    received_at: DateTime<Utc>,
    failed: bool,
}

impl Iterator for EventIter {
    type Item = Result<StateUpdate, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.payload.len() {
            return None;
        }
        let rest = self.payload.slice(self.offset..);
        let decoded = match self.layout {
            TableLayout::Values => decode_value_record(&rest),
            TableLayout::Text => decode_text_record(&rest),
            TableLayout::Extended => decode_extended_record(&rest),
        };
        match decoded {
            Ok((id, value, consumed)) => {
                self.offset += consumed;
                Some(Ok(StateUpdate {
                    id,
                    value,
                    received_at: self.received_at,
                }))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

fn read_f64(buf: &[u8], at: usize) -> Result<f64, CodecError> {
    buf.get(at..at + 8)
        .and_then(|s| s.try_into().ok())
        .map(f64::from_le_bytes)
        .ok_or_else(|| CodecError::malformed("truncated value field"))
}

fn read_u32(buf: &[u8], at: usize) -> Result<u32, CodecError> {
    buf.get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| CodecError::malformed("truncated length field"))
}

fn decode_value_record(buf: &Bytes) -> Result<(Identifier, StateValue, usize), CodecError> {
    if buf.len() < VALUE_RECORD_LEN {
        return Err(CodecError::malformed(format!(
            "value record needs {VALUE_RECORD_LEN} bytes, {} left",
            buf.len()
        )));
    }
    let id = Identifier::read(buf)?;
    let value = read_f64(buf, IDENTIFIER_LEN)?;
    Ok((id, StateValue::Number(value), VALUE_RECORD_LEN))
}

fn decode_text_record(buf: &Bytes) -> Result<(Identifier, StateValue, usize), CodecError> {
    let id = Identifier::read(buf)?;
    let icon = Identifier::read(buf.get(IDENTIFIER_LEN..).unwrap_or_default())?;
    let len_at = IDENTIFIER_LEN * 2;
    let text_len = usize::try_from(read_u32(buf, len_at)?).unwrap_or(usize::MAX);
    if text_len > MAX_TEXT_EVENT_LEN {
        return Err(CodecError::malformed(format!(
            "text event of {text_len} bytes exceeds limit"
        )));
    }
    let text_at = len_at + 4;
    let raw = buf
        .get(text_at..text_at + text_len)
        .ok_or_else(|| CodecError::malformed("truncated text event"))?;
    let text = String::from_utf8_lossy(raw).into_owned();
    let consumed = (text_at + text_len + 3) & !3;
    Ok((id, StateValue::Text { text, icon }, consumed.min(buf.len())))
}

fn decode_extended_record(buf: &Bytes) -> Result<(Identifier, StateValue, usize), CodecError> {
    let id = Identifier::read(buf)?;
    let count_at = IDENTIFIER_LEN + 8;
    let count = read_u32(buf, count_at)?;
    let entries = usize::try_from(count).unwrap_or(usize::MAX);
    let end = entries
        .checked_mul(DAYTIMER_ENTRY_LEN)
        .and_then(|n| n.checked_add(count_at + 4))
        .ok_or_else(|| CodecError::malformed("daytimer entry count overflow"))?;
    if buf.len() < end {
        return Err(CodecError::malformed(format!(
            "daytimer record needs {end} bytes, {} left",
            buf.len()
        )));
    }
    Ok((id, StateValue::Bytes(buf.slice(IDENTIFIER_LEN..end)), end))
}

/// Encode an EventTableValues payload.
pub fn encode_value_events(records: &[(Identifier, f64)]) -> Bytes {
    let mut out = BytesMut::with_capacity(records.len() * VALUE_RECORD_LEN);
    for (id, value) in records {
        out.put_slice(&id.to_wire());
        out.put_f64_le(*value);
    }
    out.freeze()
}

/// Encode an EventTableText payload (text padded to 4-byte boundaries).
pub fn encode_text_events(records: &[(Identifier, Identifier, &str)]) -> Bytes {
    let mut out = BytesMut::new();
    for (id, icon, text) in records {
        out.put_slice(&id.to_wire());
        out.put_slice(&icon.to_wire());
        out.put_u32_le(u32::try_from(text.len()).unwrap_or(u32::MAX));
        out.put_slice(text.as_bytes());
        let pad = (4 - text.len() % 4) % 4;
        out.put_bytes(0, pad);
    }
    out.freeze()
}
