// ── Structure model ──
//
// The Miniserver's configuration as described by `LoxAPP3.json`: controls,
// the rooms and categories they belong to, and the reverse index from
// state identifiers back to the control and role that own them.

pub mod control;
pub mod structure;

pub use control::{CategoryDescriptor, ControlDescriptor, ControlType, RoomDescriptor, ValueKind};
pub use structure::{ReferenceKind, StructureAnomaly, StructureDocument, UnresolvedReference};
