use bytes::{BufMut, BytesMut};

use crate::error::CodecError;

/// Length of every message header.
pub const HEADER_LEN: usize = 8;

/// First byte of every header.
const HEADER_MAGIC: u8 = 0x03;

/// Info-flag bit marking a header whose length is only an estimate;
/// the precise header follows once the payload has been produced.
const FLAG_ESTIMATED: u8 = 0x80;

/// Frame kind announced in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Text,
    BinaryFile,
    EventTableValues,
    EventTableText,
    /// Daytimer table: per-state variable-width schedule entries.
    EventTableValuesExtended,
    OutOfService,
    Keepalive,
    /// Well-formed header whose kind this client does not know (e.g. weather).
    Unknown(u8),
}

impl FrameKind {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => Self::Text,
            1 => Self::BinaryFile,
            2 => Self::EventTableValues,
            3 => Self::EventTableText,
            4 => Self::EventTableValuesExtended,
            5 => Self::OutOfService,
            6 => Self::Keepalive,
            other => Self::Unknown(other),
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            Self::Text => 0,
            Self::BinaryFile => 1,
            Self::EventTableValues => 2,
            Self::EventTableText => 3,
            Self::EventTableValuesExtended => 4,
            Self::OutOfService => 5,
            Self::Keepalive => 6,
            Self::Unknown(b) => b,
        }
    }

    /// Kinds that are never followed by a payload.
    pub fn is_header_only(self) -> bool {
        matches!(self, Self::OutOfService | Self::Keepalive)
    }
}

/// Parsed message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: FrameKind,
    pub estimated: bool,
    pub payload_len: u32,
}

impl Header {
    pub fn new(kind: FrameKind, payload_len: u32) -> Self {
        Self {
            kind,
            estimated: false,
            payload_len,
        }
    }

    /// Parse the first [`HEADER_LEN`] bytes of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        let Some(raw) = buf.get(..HEADER_LEN) else {
            return Err(CodecError::ShortRead {
                needed: HEADER_LEN,
                available: buf.len(),
            });
        };
        if raw[0] != HEADER_MAGIC {
            return Err(CodecError::malformed(format!(
                "header starts with 0x{:02x}, expected 0x{HEADER_MAGIC:02x}",
                raw[0]
            )));
        }
        let payload_len = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);
        Ok(Self {
            kind: FrameKind::from_byte(raw[1]),
            estimated: raw[2] & FLAG_ESTIMATED != 0,
            payload_len,
        })
    }

    pub fn write(&self, out: &mut BytesMut) {
        out.reserve(HEADER_LEN);
        out.put_u8(HEADER_MAGIC);
        out.put_u8(self.kind.as_byte());
        out.put_u8(if self.estimated { FLAG_ESTIMATED } else { 0 });
        out.put_u8(0);
        out.put_u32_le(self.payload_len);
    }

    /// Declared payload length, zero for header-only kinds.
    pub fn body_len(&self) -> usize {
        if self.kind.is_header_only() {
            0
        } else {
            usize::try_from(self.payload_len).unwrap_or(usize::MAX)
        }
    }
}

/// Offset of the next plausible header start after a bad byte.
pub(crate) fn resync_offset(buf: &[u8]) -> usize {
    buf.iter()
        .skip(1)
        .position(|b| *b == HEADER_MAGIC)
        .map_or(buf.len(), |p| p + 1)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_keepalive_header() {
        let h = Header::parse(&[0x03, 0x06, 0x00, 0x00, 0, 0, 0, 0]).unwrap();
        assert_eq!(h.kind, FrameKind::Keepalive);
        assert_eq!(h.body_len(), 0);
        assert!(!h.estimated);
    }

    #[test]
    fn parses_estimated_flag_and_length() {
        let h = Header::parse(&[0x03, 0x01, 0x80, 0x00, 0x10, 0x27, 0, 0]).unwrap();
        assert_eq!(h.kind, FrameKind::BinaryFile);
        assert!(h.estimated);
        assert_eq!(h.payload_len, 10_000);
    }

    #[test]
    fn unknown_kind_is_not_an_error() {
        let h = Header::parse(&[0x03, 0x07, 0x00, 0x00, 4, 0, 0, 0]).unwrap();
        assert_eq!(h.kind, FrameKind::Unknown(7));
    }

    #[test]
    fn bad_magic_is_malformed() {
        let err = Header::parse(&[0x04, 0x00, 0, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
    }

    #[test]
    fn short_header_is_short_read() {
        let err = Header::parse(&[0x03, 0x00]).unwrap_err();
        assert_eq!(
            err,
            CodecError::ShortRead {
                needed: HEADER_LEN,
                available: 2
            }
        );
    }

    #[test]
    fn write_then_parse() {
        let mut out = BytesMut::new();
        Header::new(FrameKind::EventTableText, 48).write(&mut out);
        assert_eq!(&out[..], &[0x03, 0x03, 0x00, 0x00, 48, 0, 0, 0]);
    }

    #[test]
    fn resync_finds_next_magic() {
        assert_eq!(resync_offset(&[0x00, 0x11, 0x03, 0x02]), 2);
        assert_eq!(resync_offset(&[0x00, 0x11]), 2);
    }
}
