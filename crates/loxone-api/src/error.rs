use thiserror::Error;

/// Failures while framing or parsing the binary wire protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Not enough bytes buffered for the declared frame; buffer and retry.
    #[error("short read: need {needed} bytes, have {available}")]
    ShortRead { needed: usize, available: usize },

    /// Structurally invalid header or record.
    #[error("malformed frame: {reason}")]
    Malformed { reason: String },

    /// Outbound command rejected before it reached the socket.
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },
}

impl CodecError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_command(reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            reason: reason.into(),
        }
    }
}

/// Failures during the RSA key exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("Miniserver did not return a public key: {0}")]
    PublicKeyUnavailable(String),

    #[error("malformed public key: {0}")]
    MalformedPublicKey(String),

    #[error("key exchange rejected (code {code})")]
    Rejected { code: u16 },

    #[error("cryptographic failure: {0}")]
    Crypto(String),
}

/// Failures while acquiring, refreshing or using a token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// Wrong user or password. Terminal until reconfigured.
    #[error("invalid credentials for user '{user}'")]
    InvalidCredentials { user: String },

    /// Miniserver is temporarily refusing logins.
    #[error("authentication rate limited (code {code})")]
    RateLimited { code: u16 },

    /// Response did not match the expected authentication scheme.
    #[error("authentication protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// Refresh and re-authentication both failed.
    #[error("token expired and could not be renewed")]
    Expired,
}

impl AuthError {
    /// Map a non-200 response code from an auth endpoint.
    pub fn from_code(code: u16, user: &str) -> Self {
        match code {
            401 | 403 => Self::InvalidCredentials { user: user.to_owned() },
            429 => Self::RateLimited { code },
            other => Self::ProtocolMismatch(format!("unexpected response code {other}")),
        }
    }
}

/// Top-level error type for the `loxone-api` crate.
///
/// Covers every failure mode of the protocol layer: framing, handshake,
/// authentication, websocket transport and the HTTP discovery.
/// `loxone-core` maps these into session-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Protocol ────────────────────────────────────────────────────
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Miniserver answered a request with a non-200 code.
    #[error("request '{control}' failed with code {code}")]
    Response { control: String, code: u16 },

    // ── Transport ───────────────────────────────────────────────────
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The link's reader stopped; no further responses will arrive.
    #[error("link closed")]
    LinkClosed,

    /// Request abandoned because the link was shut down.
    #[error("request cancelled")]
    Cancelled,

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    // ── Data ────────────────────────────────────────────────────────
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this error indicates the token was rejected
    /// and a refresh might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        match self {
            Self::Auth(AuthError::Expired) => true,
            Self::Response { code, .. } => matches!(code, 401 | 403 | 477),
            _ => false,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. }
            | Self::WebSocketConnect(_)
            | Self::WebSocketClosed { .. }
            | Self::LinkClosed
            | Self::Auth(AuthError::RateLimited { .. } | AuthError::Expired) => true,
            _ => false,
        }
    }

    pub(crate) fn timeout(after: std::time::Duration) -> Self {
        Self::Timeout {
            timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}
