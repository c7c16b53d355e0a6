//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use loxone_api::AuthError;
use loxone_config::ConfigError;
use loxone_core::{CommandError, ConnectionError, CoreError};

/// Process exit codes.
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const REJECTED: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to Miniserver at {host}")]
    #[diagnostic(
        code(loxone::connection_failed),
        help(
            "Check that the Miniserver is reachable.\n\
             Try: loxone info --host {host}"
        )
    )]
    ConnectionFailed { host: String, reason: String },

    #[error("TLS setup failed: {message}")]
    #[diagnostic(
        code(loxone::tls_error),
        help(
            "Miniservers present certificates for their cloud DNS name.\n\
             Drop --strict-tls, or configure ca_cert in your profile."
        )
    )]
    TlsError { message: String },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed for user '{user}'")]
    #[diagnostic(
        code(loxone::auth_failed),
        help("Verify the user name and password.\nRun: loxone config init --username {user}")
    )]
    AuthFailed { user: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(loxone::no_credentials),
        help(
            "Configure credentials with: loxone config init\n\
             Or set LOXONE_USERNAME and LOXONE_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────

    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(loxone::not_found),
        help("Run: loxone {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    #[error("'{needle}' matches {count} controls")]
    #[diagnostic(
        code(loxone::ambiguous),
        help("Use the control identifier instead: {candidates}")
    )]
    Ambiguous {
        needle: String,
        count: usize,
        candidates: String,
    },

    // ── Miniserver ───────────────────────────────────────────────────

    #[error("Miniserver rejected the request (code {code})")]
    #[diagnostic(code(loxone::rejected))]
    Rejected { code: u16 },

    #[error("Protocol error: {message}")]
    #[diagnostic(code(loxone::protocol))]
    Protocol { message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(loxone::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(loxone::profile_not_found),
        help("Create one with: loxone config init {name} --host <HOST> --username <USER>")
    )]
    ProfileNotFound { name: String },

    #[error("No Miniserver configured")]
    #[diagnostic(
        code(loxone::no_config),
        help(
            "Pass --host and --username, or create a profile with: loxone config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(loxone::config))]
    Config(Box<ConfigError>),

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("Request timed out after {millis}ms")]
    #[diagnostic(
        code(loxone::timeout),
        help("Increase timeout with --timeout or check Miniserver responsiveness.")
    )]
    Timeout { millis: u64 },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not render output: {0}")]
    #[diagnostic(code(loxone::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::TlsError { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } => exit_code::AUTH,
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Rejected { .. } => exit_code::REJECTED,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Ambiguous { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => Self::NoCredentials { profile },
            ConfigError::UnknownProfile(name) => Self::ProfileNotFound { name },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl CliError {
    /// Translate a session error, naming `host` and `user` where it helps.
    pub fn from_core(err: CoreError, host: &str) -> Self {
        match err {
            CoreError::Auth(AuthError::InvalidCredentials { user }) => Self::AuthFailed { user },
            CoreError::Tls { message } => Self::TlsError { message },
            CoreError::Connection(ConnectionError::Timeout { timeout_ms })
            | CoreError::Command(CommandError::Timeout { timeout_ms }) => {
                Self::Timeout { millis: timeout_ms }
            }
            CoreError::Command(CommandError::Rejected { code })
            | CoreError::Rejected { code, .. } => Self::Rejected { code },
            CoreError::Command(CommandError::Invalid(reason)) => Self::Validation {
                field: "command".into(),
                reason,
            },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Protocol { message } => Self::Protocol { message },
            CoreError::Structure(e) => Self::Protocol {
                message: e.to_string(),
            },
            other => Self::ConnectionFailed {
                host: host.to_owned(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<CommandError> for CliError {
    fn from(err: CommandError) -> Self {
        Self::from_core(CoreError::Command(err), "(current)")
    }
}

impl From<loxone_api::Error> for CliError {
    fn from(err: loxone_api::Error) -> Self {
        Self::from_core(CoreError::from(err), "(discovery)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_credentials_exit_with_auth_code() {
        let err = CliError::from_core(
            CoreError::Auth(AuthError::InvalidCredentials {
                user: "admin".into(),
            }),
            "192.168.1.77",
        );
        assert!(matches!(err, CliError::AuthFailed { ref user } if user == "admin"));
        assert_eq!(err.exit_code(), exit_code::AUTH);
    }

    #[test]
    fn command_timeout_maps_to_timeout_code() {
        let err = CliError::from(CommandError::Timeout { timeout_ms: 5000 });
        assert_eq!(err.exit_code(), exit_code::TIMEOUT);
        assert_eq!(err.to_string(), "Request timed out after 5000ms");
    }

    #[test]
    fn unknown_profile_is_not_found() {
        let err = CliError::from(ConfigError::UnknownProfile("cabin".into()));
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);
    }
}
