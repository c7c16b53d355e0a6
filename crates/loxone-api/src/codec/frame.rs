// ── Frame decoding ──
//
// The Miniserver sends a header message followed by its payload. The
// decoder works on a continuous byte buffer so framing never depends
// on websocket message boundaries.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use super::header::{HEADER_LEN, Header, FrameKind, resync_offset};
use crate::error::{CodecError, Error};

/// Upper bound on a single payload; structure files run to a few MiB.
pub const MAX_PAYLOAD_LEN: usize = 64 * 1024 * 1024;

/// One discrete protocol message: header kind plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: FrameKind, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    pub fn keepalive() -> Self {
        Self::new(FrameKind::Keepalive, Bytes::new())
    }

    /// Payload as UTF-8, for Text frames.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Serialize header + payload.
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        self.encode_into(&mut out);
        out.freeze()
    }

    /// Serialize only the header, as the Miniserver sends it.
    pub fn encode_header(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_LEN);
        self.header().write(&mut out);
        out.freeze()
    }

    fn header(&self) -> Header {
        let len = if self.kind.is_header_only() {
            0
        } else {
            u32::try_from(self.payload.len()).unwrap_or(u32::MAX)
        };
        Header::new(self.kind, len)
    }

    fn encode_into(&self, out: &mut BytesMut) {
        self.header().write(out);
        if !self.kind.is_header_only() {
            out.extend_from_slice(&self.payload);
        }
    }
}

/// Decode exactly one frame from the start of `buf`.
///
/// Fails with [`CodecError::ShortRead`] when the buffer holds less than
/// the header plus its declared payload.
pub fn decode_frame(buf: &[u8]) -> Result<Frame, CodecError> {
    let header = Header::parse(buf)?;
    let needed = HEADER_LEN.saturating_add(header.body_len());
    let Some(body) = buf.get(HEADER_LEN..needed) else {
        return Err(CodecError::ShortRead {
            needed,
            available: buf.len(),
        });
    };
    Ok(Frame::new(header.kind, Bytes::copy_from_slice(body)))
}

/// Streaming decoder/encoder for the Miniserver's framing.
///
/// Estimated headers are skipped; the precise header that follows
/// carries the real length. A malformed header advances the buffer to
/// the next plausible header and surfaces [`CodecError::Malformed`] so the
/// caller can log and keep reading.
#[derive(Debug, Default)]
pub struct FrameCodec {
    pending: Option<Header>,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let header = match self.pending {
                Some(h) => h,
                None => {
                    if src.len() < HEADER_LEN {
                        return Ok(None);
                    }
                    let header = match Header::parse(src) {
                        Ok(h) => h,
                        Err(e) => {
                            let skip = resync_offset(src);
                            src.advance(skip);
                            return Err(e.into());
                        }
                    };
                    src.advance(HEADER_LEN);
                    if header.estimated {
                        trace!(kind = ?header.kind, "skipping estimated header");
                        continue;
                    }
                    if header.body_len() > MAX_PAYLOAD_LEN {
                        return Err(CodecError::malformed(format!(
                            "payload of {} bytes exceeds limit",
                            header.body_len()
                        ))
                        .into());
                    }
                    header
                }
            };

            let body_len = header.body_len();
            if src.len() < body_len {
                self.pending = Some(header);
                src.reserve(body_len - src.len());
                return Ok(None);
            }

            self.pending = None;
            let payload = src.split_to(body_len).freeze();
            return Ok(Some(Frame::new(header.kind, payload)));
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(dst);
        Ok(())
    }
}
