// ── Core error types ──
//
// User-facing errors from the session layer. Protocol errors from
// `loxone_api::Error` are mapped into one of these and are not exposed
// directly to consumers.

use loxone_api::{AuthError, CodecError, HandshakeError};
use thiserror::Error;

/// Failures of the connection lifecycle itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("Timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Gave up after {attempts} reconnect attempts: {last}")]
    Unrecoverable { attempts: u32, last: String },

    #[error("Connection attempt aborted by disconnect")]
    Aborted,
}

/// Failures of a single `jdev/sps/io` command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("No acknowledgment within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Not connected to the Miniserver")]
    NotConnected,

    #[error("Command cancelled because the link went away")]
    Cancelled,

    #[error("Command rejected with code {code}")]
    Rejected { code: u16 },

    #[error("Invalid command: {0}")]
    Invalid(String),
}

/// The structure document could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid structure document: {message}")]
pub struct StructureError {
    pub message: String,
}

#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Protocol ─────────────────────────────────────────────────────
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Miniserver answered {control} with code {code}")]
    Rejected { control: String, code: u16 },

    // ── Connection ───────────────────────────────────────────────────
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("TLS error: {message}")]
    Tls { message: String },

    // ── Operations ───────────────────────────────────────────────────
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error("Unexpected response: {message}")]
    Protocol { message: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    /// Errors that reconnecting cannot fix.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Handshake(_)
            | Self::Tls { .. }
            | Self::Config { .. }
            | Self::Structure(_)
            | Self::Auth(AuthError::InvalidCredentials { .. } | AuthError::ProtocolMismatch(_))
            | Self::Connection(ConnectionError::Unrecoverable { .. }) => true,
            Self::Auth(AuthError::RateLimited { .. } | AuthError::Expired)
            | Self::Rejected { .. }
            | Self::Codec(_)
            | Self::Connection(ConnectionError::Timeout { .. } | ConnectionError::Aborted)
            | Self::Transport { .. }
            | Self::Command(_)
            | Self::Protocol { .. } => false,
        }
    }
}

impl From<loxone_api::Error> for CoreError {
    fn from(err: loxone_api::Error) -> Self {
        use loxone_api::Error as Api;
        match err {
            Api::Codec(e) => Self::Codec(e),
            Api::Handshake(e) => Self::Handshake(e),
            Api::Auth(e) => Self::Auth(e),
            Api::Response { control, code } => Self::Rejected { control, code },
            Api::Timeout { timeout_ms } => {
                Self::Connection(ConnectionError::Timeout { timeout_ms })
            }
            Api::Cancelled => Self::Command(CommandError::Cancelled),
            Api::Tls(message) => Self::Tls { message },
            Api::InvalidUrl(e) => Self::Config {
                message: format!("invalid URL: {e}"),
            },
            Api::Deserialization { message, .. } => Self::Protocol { message },
            Api::WebSocketConnect(reason) => Self::Transport { reason },
            Api::WebSocketClosed { code, reason } => Self::Transport {
                reason: format!("websocket closed ({code}): {reason}"),
            },
            Api::LinkClosed => Self::Transport {
                reason: "link closed".into(),
            },
            Api::Transport(e) => Self::Transport {
                reason: e.to_string(),
            },
            Api::Io(e) => Self::Transport {
                reason: e.to_string(),
            },
        }
    }
}
