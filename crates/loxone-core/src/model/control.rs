// ── Control, room and category descriptors ──

use std::collections::BTreeMap;

use loxone_api::Identifier;
use serde::Serialize;
use strum::{EnumString, IntoStaticStr};

/// Block type of a control as named in the structure document.
///
/// The set is closed; anything the Miniserver reports that is not listed
/// here lands in `Unknown` with the raw name preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString, IntoStaticStr)]
pub enum ControlType {
    Switch,
    Pushbutton,
    Dimmer,
    #[strum(serialize = "EIBDimmer")]
    EibDimmer,
    LightController,
    LightControllerV2,
    ColorPickerV2,
    Jalousie,
    CentralJalousie,
    Gate,
    Window,
    #[strum(serialize = "IRoomController")]
    RoomController,
    #[strum(serialize = "IRoomControllerV2")]
    RoomControllerV2,
    Daytimer,
    Alarm,
    SmokeAlarm,
    IntercomV2,
    AudioZoneV2,
    Meter,
    PresenceDetector,
    InfoOnlyAnalog,
    InfoOnlyDigital,
    InfoOnlyText,
    TextState,
    UpDownDigital,
    ValueSelector,
    Slider,
    TimedSwitch,
    #[strum(default)]
    Unknown(String),
}

impl ControlType {
    /// Parse the document's `type` field; never fails.
    pub fn from_type_name(name: &str) -> Self {
        name.parse()
            .unwrap_or_else(|_| Self::Unknown(name.to_owned()))
    }

    /// The name as it appears in the structure document.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Unknown(name) => name,
            known => known.into(),
        }
    }
}

impl std::fmt::Display for ControlType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ControlType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// How a state's raw f64 is presented to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    Bool,
    Integer,
}

const BOOL_ROLES: &[&str] = &[
    "active",
    "isLocked",
    "isAutomatic",
    "isEnabled",
    "armed",
    "isAlarmActive",
    "jLocked",
    "locked",
    "presence",
];

const INTEGER_ROLES: &[&str] = &[
    "activeScene",
    "activeMoodsNum",
    "mode",
    "operatingMode",
    "overrideEntries",
    "level",
];

impl ValueKind {
    /// Role table lookup. Roles not listed are plain numbers.
    pub fn for_role(control_type: &ControlType, role: &str) -> Self {
        match (control_type, role) {
            (ControlType::Jalousie | ControlType::CentralJalousie, "up" | "down") => Self::Bool,
            (ControlType::Gate, "active") => Self::Integer,
            (ControlType::InfoOnlyDigital | ControlType::Pushbutton, "active") => Self::Bool,
            (_, role) if BOOL_ROLES.contains(&role) => Self::Bool,
            (_, role) if INTEGER_ROLES.contains(&role) => Self::Integer,
            _ => Self::Number,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlDescriptor {
    pub id: Identifier,
    pub control_type: ControlType,
    pub name: String,
    pub room: Option<Identifier>,
    pub category: Option<Identifier>,
    /// Role name → state identifiers, as listed under `states`.
    pub states: BTreeMap<String, Vec<Identifier>>,
    /// Raw `details` object, type-specific.
    pub details: serde_json::Value,
    /// Set for entries flattened out of a parent's `subControls`.
    pub parent: Option<Identifier>,
}

impl ControlDescriptor {
    /// Role under which `state` is listed, if any.
    pub fn role_of(&self, state: &Identifier) -> Option<&str> {
        self.states
            .iter()
            .find(|(_, ids)| ids.contains(state))
            .map(|(role, _)| role.as_str())
    }

    /// First state listed for `role`.
    pub fn state(&self, role: &str) -> Option<Identifier> {
        self.states.get(role).and_then(|ids| ids.first().copied())
    }

    pub fn value_kind(&self, role: &str) -> ValueKind {
        ValueKind::for_role(&self.control_type, role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomDescriptor {
    pub id: Identifier,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryDescriptor {
    pub id: Identifier,
    pub name: String,
    /// The document's `type`, e.g. "lights".
    pub kind: Option<String>,
}
