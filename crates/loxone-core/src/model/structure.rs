// ── Structure document (LoxAPP3.json) ──
//
// Parsed once per download and shared as `Arc<StructureDocument>`. A new
// download replaces the previous document wholesale.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;

use loxone_api::Identifier;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::{debug, warn};

use super::control::{CategoryDescriptor, ControlDescriptor, ControlType, RoomDescriptor};
use crate::error::StructureError;

/// Non-fatal irregularity found while indexing a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureAnomaly {
    /// A state listed twice, by two controls or under two roles of one
    /// control. The entry later in the document wins.
    DuplicateState {
        state: Identifier,
        previous: (Identifier, String),
        replacement: (Identifier, String),
    },
    /// An identifier that could not be parsed and was skipped.
    InvalidIdentifier { context: String, raw: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Room,
    Category,
}

/// A control pointing at a room or category the document does not define.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub control: Identifier,
    pub kind: ReferenceKind,
    pub target: Identifier,
}

#[derive(Debug, Clone)]
pub struct StructureDocument {
    last_modified: String,
    controls: BTreeMap<Identifier, ControlDescriptor>,
    rooms: BTreeMap<Identifier, RoomDescriptor>,
    categories: BTreeMap<Identifier, CategoryDescriptor>,
    state_index: HashMap<Identifier, (Identifier, String)>,
    unresolved: Vec<UnresolvedReference>,
    anomalies: Vec<StructureAnomaly>,
}

// ── Raw document shape ──────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDocument {
    #[serde(default)]
    last_modified: String,
    #[serde(default)]
    rooms: BTreeMap<String, RawNamed>,
    #[serde(default)]
    cats: BTreeMap<String, RawNamed>,
    #[serde(default, deserialize_with = "in_document_order")]
    controls: Vec<(String, RawControl)>,
}

#[derive(Deserialize)]
struct RawNamed {
    #[serde(default)]
    uuid: Option<String>,
    #[serde(default)]
    name: String,
    /// A string for categories, a number for rooms.
    #[serde(rename = "type", default)]
    kind: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawControl {
    #[serde(default)]
    uuid_action: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    control_type: String,
    #[serde(default)]
    room: Option<String>,
    #[serde(default)]
    cat: Option<String>,
    #[serde(default, deserialize_with = "in_document_order")]
    states: Vec<(String, Value)>,
    #[serde(default)]
    details: Value,
    #[serde(default, deserialize_with = "in_document_order")]
    sub_controls: Vec<(String, RawControl)>,
}

/// Object entries in the order they appear in the body. Which of two
/// duplicate states wins depends on it.
fn in_document_order<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct Entries<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for Entries<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a JSON object")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(Entries(PhantomData))
}

// ── Loading ─────────────────────────────────────────────────────────

impl StructureDocument {
    /// Parse and index a `LoxAPP3.json` body.
    pub fn load(bytes: &[u8]) -> Result<Self, StructureError> {
        let raw: RawDocument = serde_json::from_slice(bytes).map_err(|e| StructureError {
            message: e.to_string(),
        })?;

        let mut doc = Self {
            last_modified: raw.last_modified,
            controls: BTreeMap::new(),
            rooms: BTreeMap::new(),
            categories: BTreeMap::new(),
            state_index: HashMap::new(),
            unresolved: Vec::new(),
            anomalies: Vec::new(),
        };

        for (key, room) in raw.rooms {
            if let Some(id) = doc.parse_id("room", room.uuid.as_deref().unwrap_or(&key)) {
                doc.rooms.insert(id, RoomDescriptor { id, name: room.name });
            }
        }
        for (key, cat) in raw.cats {
            if let Some(id) = doc.parse_id("category", cat.uuid.as_deref().unwrap_or(&key)) {
                doc.categories.insert(
                    id,
                    CategoryDescriptor {
                        id,
                        name: cat.name,
                        kind: cat.kind.as_str().map(str::to_owned),
                    },
                );
            }
        }
        for (key, control) in raw.controls {
            doc.insert_control(&key, control, None, None, None);
        }
        doc.check_references();

        debug!(
            controls = doc.controls.len(),
            rooms = doc.rooms.len(),
            categories = doc.categories.len(),
            states = doc.state_index.len(),
            anomalies = doc.anomalies.len(),
            "structure indexed"
        );
        Ok(doc)
    }

    fn insert_control(
        &mut self,
        key: &str,
        raw: RawControl,
        parent: Option<Identifier>,
        inherited_room: Option<Identifier>,
        inherited_cat: Option<Identifier>,
    ) {
        let Some(id) = self.parse_id("control", raw.uuid_action.as_deref().unwrap_or(key)) else {
            return;
        };
        let room = match raw.room.as_deref() {
            Some(r) => self.parse_id("room reference", r),
            None => inherited_room,
        };
        let category = match raw.cat.as_deref() {
            Some(c) => self.parse_id("category reference", c),
            None => inherited_cat,
        };

        let mut states = BTreeMap::new();
        for (role, value) in raw.states {
            let ids = self.parse_state_ids(&role, &value);
            for state in &ids {
                self.index_state(*state, id, &role);
            }
            states.insert(role, ids);
        }

        for (sub_key, sub) in raw.sub_controls {
            self.insert_control(&sub_key, sub, Some(id), room, category);
        }

        self.controls.insert(
            id,
            ControlDescriptor {
                id,
                control_type: ControlType::from_type_name(&raw.control_type),
                name: raw.name,
                room,
                category,
                states,
                details: raw.details,
                parent,
            },
        );
    }

    fn parse_state_ids(&mut self, role: &str, value: &Value) -> Vec<Identifier> {
        let raws: Vec<&str> = match value {
            Value::String(s) => vec![s.as_str()],
            Value::Array(items) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        raws.into_iter()
            .filter_map(|raw| self.parse_id(role, raw))
            .collect()
    }

    fn index_state(&mut self, state: Identifier, control: Identifier, role: &str) {
        let replacement = (control, role.to_owned());
        if let Some(previous) = self.state_index.insert(state, replacement.clone()) {
            warn!(
                %state,
                previous = %previous.0,
                previous_role = %previous.1,
                replacement = %control,
                replacement_role = role,
                "state listed twice"
            );
            self.anomalies.push(StructureAnomaly::DuplicateState {
                state,
                previous,
                replacement,
            });
        }
    }

    fn parse_id(&mut self, context: &str, raw: &str) -> Option<Identifier> {
        // Sub-control keys sometimes carry a `/suffix` after the identifier.
        let candidate = raw.split('/').next().unwrap_or(raw);
        match candidate.parse() {
            Ok(id) => Some(id),
            Err(_) => {
                self.anomalies.push(StructureAnomaly::InvalidIdentifier {
                    context: context.to_owned(),
                    raw: raw.to_owned(),
                });
                None
            }
        }
    }

    fn check_references(&mut self) {
        for control in self.controls.values() {
            if let Some(room) = control.room.filter(|r| !self.rooms.contains_key(r)) {
                self.unresolved.push(UnresolvedReference {
                    control: control.id,
                    kind: ReferenceKind::Room,
                    target: room,
                });
            }
            if let Some(cat) = control.category.filter(|c| !self.categories.contains_key(c)) {
                self.unresolved.push(UnresolvedReference {
                    control: control.id,
                    kind: ReferenceKind::Category,
                    target: cat,
                });
            }
        }
    }
}

// ── Lookups ─────────────────────────────────────────────────────────

impl StructureDocument {
    /// Version marker compared against `jdev/sps/LoxAPPversion3`.
    pub fn last_modified(&self) -> &str {
        &self.last_modified
    }

    /// Control owning the state `id`. `None` is a normal outcome.
    pub fn resolve_state(&self, id: &Identifier) -> Option<&ControlDescriptor> {
        self.resolve_role(id).map(|(control, _)| control)
    }

    /// Owning control and the role name the state is listed under.
    pub fn resolve_role(&self, id: &Identifier) -> Option<(&ControlDescriptor, &str)> {
        let (control, role) = self.state_index.get(id)?;
        self.controls.get(control).map(|c| (c, role.as_str()))
    }

    pub fn control(&self, id: &Identifier) -> Option<&ControlDescriptor> {
        self.controls.get(id)
    }

    pub fn room(&self, id: &Identifier) -> Option<&RoomDescriptor> {
        self.rooms.get(id)
    }

    pub fn category(&self, id: &Identifier) -> Option<&CategoryDescriptor> {
        self.categories.get(id)
    }

    pub fn room_of(&self, control: &Identifier) -> Option<&RoomDescriptor> {
        self.controls.get(control)?.room.and_then(|r| self.rooms.get(&r))
    }

    pub fn category_of(&self, control: &Identifier) -> Option<&CategoryDescriptor> {
        self.controls
            .get(control)?
            .category
            .and_then(|c| self.categories.get(&c))
    }

    /// All controls, sub-controls included, ordered by identifier.
    pub fn controls(&self) -> impl Iterator<Item = &ControlDescriptor> {
        self.controls.values()
    }

    /// Direct children of `parent`.
    pub fn sub_controls(&self, parent: &Identifier) -> impl Iterator<Item = &ControlDescriptor> {
        let parent = *parent;
        self.controls
            .values()
            .filter(move |c| c.parent == Some(parent))
    }

    /// Controls whose name contains `needle`, case-insensitively.
    pub fn find_by_name<'a>(&'a self, needle: &str) -> impl Iterator<Item = &'a ControlDescriptor> {
        let needle = needle.to_lowercase();
        self.controls
            .values()
            .filter(move |c| c.name.to_lowercase().contains(&needle))
    }

    pub fn rooms(&self) -> impl Iterator<Item = &RoomDescriptor> {
        self.rooms.values()
    }

    pub fn categories(&self) -> impl Iterator<Item = &CategoryDescriptor> {
        self.categories.values()
    }

    pub fn control_count(&self) -> usize {
        self.controls.len()
    }

    pub fn state_count(&self) -> usize {
        self.state_index.len()
    }

    pub fn unresolved(&self) -> &[UnresolvedReference] {
        &self.unresolved
    }

    pub fn anomalies(&self) -> &[StructureAnomaly] {
        &self.anomalies
    }
}
