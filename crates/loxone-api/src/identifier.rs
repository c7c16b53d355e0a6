// ── Identifier ──
//
// 16-byte opaque key for controls, states and command targets.
// On the wire the first three fields are little-endian (GUID layout);
// the Miniserver renders them as `xxxxxxxx-xxxx-xxxx-xxxxxxxxxxxxxxxx`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::CodecError;

/// Size of an identifier on the wire.
pub const IDENTIFIER_LEN: usize = 16;

/// Canonical identifier for any Miniserver object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(Uuid);

impl Identifier {
    /// Build from the 16 wire bytes (mixed-endian GUID layout).
    pub fn from_wire(bytes: [u8; IDENTIFIER_LEN]) -> Self {
        Self(Uuid::from_bytes_le(bytes))
    }

    /// Read an identifier from the start of `buf`.
    pub fn read(buf: &[u8]) -> Result<Self, CodecError> {
        let bytes: [u8; IDENTIFIER_LEN] = buf
            .get(..IDENTIFIER_LEN)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| CodecError::malformed("truncated identifier"))?;
        Ok(Self::from_wire(bytes))
    }

    /// The 16 bytes as they appear on the wire.
    pub fn to_wire(&self) -> [u8; IDENTIFIER_LEN] {
        self.0.to_bytes_le()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for Identifier {
    fn from(u: Uuid) -> Self {
        Self(u)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (d1, d2, d3, d4) = self.0.as_fields();
        write!(f, "{d1:08x}-{d2:04x}-{d3:04x}-")?;
        for b in d4 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Error returned when a string is not 32 hex digits.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier '{0}'")]
pub struct ParseIdentifierError(pub String);

impl FromStr for Identifier {
    type Err = ParseIdentifierError;

    /// Accepts any hyphenation of 32 hex digits: the Miniserver's
    /// 8-4-4-16 form, the RFC 8-4-4-4-12 form, or bare hex.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let simple: String = s.trim().chars().filter(|c| *c != '-').collect();
        if simple.len() != 32 {
            return Err(ParseIdentifierError(s.to_owned()));
        }
        Uuid::try_parse(&simple)
            .map(Self)
            .map_err(|_| ParseIdentifierError(s.to_owned()))
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
