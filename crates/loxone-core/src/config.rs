// ── Runtime connection configuration ──
//
// These types describe *how* to connect to a Miniserver. They carry
// credentials and connection tuning but never touch disk: the CLI (via
// `loxone-config`) builds a `ControllerConfig` and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use loxone_api::transport::{TlsMode, TransportConfig, websocket_url};
use loxone_api::{Credentials, Identifier, Permission};
use url::Url;

use crate::error::CoreError;

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// webpki roots (strict).
    SystemDefaults,
    /// PEM bundle on disk.
    CustomCa(PathBuf),
    /// Skip verification. Default, since local Miniservers present
    /// certificates issued for their cloud DNS name, not their address.
    #[default]
    DangerAcceptInvalid,
}

impl From<&TlsVerification> for TlsMode {
    fn from(tls: &TlsVerification) -> Self {
        match tls {
            TlsVerification::SystemDefaults => Self::System,
            TlsVerification::CustomCa(path) => Self::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => Self::DangerAcceptInvalid,
        }
    }
}

/// Reconnect backoff tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Per-phase timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    /// Socket open and key exchange.
    pub handshake: Duration,
    /// `getkey2`/`getjwt`/`refreshjwt` exchanges.
    pub token: Duration,
    /// Download of `LoxAPP3.json`.
    pub structure: Duration,
    /// Acknowledgment of a `jdev/sps/io` command.
    pub command: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            token: Duration::from_secs(10),
            structure: Duration::from_secs(30),
            command: Duration::from_secs(5),
        }
    }
}

/// Configuration for connecting to a single Miniserver.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Host name or address, without scheme.
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub tls: TlsVerification,
    pub credentials: Credentials,
    pub permission: Permission,
    /// Identifies this client to the token service.
    pub client_uuid: Identifier,
    /// Free-form client description shown in the Miniserver's token list.
    pub client_info: String,
    pub reconnect: ReconnectConfig,
    /// Must stay below the Miniserver's 5 minute idle timeout.
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
    pub timeouts: Timeouts,
    /// Fraction of the token lifetime after which a refresh is attempted.
    pub token_refresh_fraction: f64,
    /// Bound of each subscriber queue.
    pub listener_queue_capacity: usize,
    /// Drop updates whose value equals the cached one.
    pub suppress_duplicates: bool,
}

impl ControllerConfig {
    /// Defaults for plain `ws://` on port 80.
    pub fn new(host: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            host: host.into(),
            port: 80,
            use_tls: false,
            tls: TlsVerification::default(),
            credentials,
            permission: Permission::default(),
            client_uuid: Identifier::from(uuid::Uuid::new_v4()),
            client_info: "loxone-rs".into(),
            reconnect: ReconnectConfig::default(),
            keepalive_interval: Duration::from_secs(60),
            keepalive_timeout: Duration::from_secs(10),
            timeouts: Timeouts::default(),
            token_refresh_fraction: 0.8,
            listener_queue_capacity: 64,
            suppress_duplicates: false,
        }
    }

    pub fn websocket_url(&self) -> Result<Url, CoreError> {
        Ok(websocket_url(&self.host, self.port, self.use_tls)?)
    }

    pub(crate) fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: TlsMode::from(&self.tls),
            timeout: self.timeouts.handshake,
        }
    }

    /// Reject settings the controller cannot work with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.host.trim().is_empty() {
            return Err(CoreError::Config {
                message: "host must not be empty".into(),
            });
        }
        if self.credentials.username.trim().is_empty() {
            return Err(CoreError::Config {
                message: "username must not be empty".into(),
            });
        }
        if !(self.token_refresh_fraction > 0.0 && self.token_refresh_fraction < 1.0) {
            return Err(CoreError::Config {
                message: format!(
                    "token_refresh_fraction must be in (0, 1), got {}",
                    self.token_refresh_fraction
                ),
            });
        }
        if self.listener_queue_capacity == 0 {
            return Err(CoreError::Config {
                message: "listener_queue_capacity must be at least 1".into(),
            });
        }
        if self.keepalive_interval.is_zero() {
            return Err(CoreError::Config {
                message: "keepalive_interval must be non-zero".into(),
            });
        }
        if self.keepalive_timeout.is_zero() || self.keepalive_timeout >= self.keepalive_interval {
            return Err(CoreError::Config {
                message: format!(
                    "keepalive_timeout ({:?}) must be non-zero and shorter than keepalive_interval ({:?})",
                    self.keepalive_timeout, self.keepalive_interval
                ),
            });
        }
        Ok(())
    }
}
