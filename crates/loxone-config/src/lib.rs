//! Shared configuration for the Loxone CLI.
//!
//! TOML profiles, credential resolution (env + plaintext), and
//! translation to `loxone_core::ControllerConfig`. The CLI layers its
//! flag overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use loxone_core::{ControllerConfig, Credentials, Identifier, Permission, TlsVerification};

/// Prefix of environment overrides, e.g. `LOXONE_DEFAULT_PROFILE`.
pub const ENV_PREFIX: &str = "LOXONE_";

/// Password fallback when a profile names no variable of its own.
pub const PASSWORD_ENV: &str = "LOXONE_PASSWORD";

/// Username fallback when a profile carries none.
pub const USERNAME_ENV: &str = "LOXONE_USERNAME";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{0}' not found")]
    UnknownProfile(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct Config {
    /// Profile used when `--profile` is not given.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named Miniserver profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| ConfigError::UnknownProfile(name.into()))
    }
}

#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Seconds between keepalives.
    #[serde(default = "default_keepalive")]
    pub keepalive: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            keepalive: default_keepalive(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    10
}
fn default_keepalive() -> u64 {
    60
}

/// A named Miniserver profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Profile {
    /// Host name or address, without scheme.
    pub host: String,

    /// Defaults to 443 with TLS, else 80.
    pub port: Option<u16>,

    #[serde(default)]
    pub tls: bool,

    pub username: Option<String>,

    /// Plaintext password (prefer `password_env`).
    pub password: Option<String>,

    /// Environment variable holding the password.
    pub password_env: Option<String>,

    #[serde(default)]
    pub permission: Permission,

    /// Stable client identity for the token service.
    pub client_uuid: Option<String>,

    pub client_info: Option<String>,

    /// Path to a custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    /// Verify certificates against the system roots.
    #[serde(default)]
    pub strict_tls: bool,

    /// Override the default timeout.
    pub timeout: Option<u64>,

    /// Override the keepalive interval.
    pub keepalive: Option<u64>,

    #[serde(default)]
    pub suppress_duplicates: bool,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("rs", "loxone", "loxone").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("loxone");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Defaults, then the file at `path`, then `LOXONE_*` variables.
pub fn figment_for(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    Ok(figment_for(path).extract()?)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve username and password for `profile`.
///
/// Password order: the profile's `password_env`, then `LOXONE_PASSWORD`,
/// then the plaintext field.
pub fn resolve_credentials(profile: &Profile, profile_name: &str) -> Result<Credentials, ConfigError> {
    let username = profile
        .username
        .clone()
        .or_else(|| std::env::var(USERNAME_ENV).ok())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })?;

    let from_env = |name: &str| std::env::var(name).ok().map(SecretString::from);
    let password = profile
        .password_env
        .as_deref()
        .and_then(from_env)
        .or_else(|| from_env(PASSWORD_ENV))
        .or_else(|| profile.password.clone().map(SecretString::from))
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })?;

    Ok(Credentials { username, password })
}

/// Build a `ControllerConfig` from a profile and the global defaults.
pub fn profile_to_controller_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ControllerConfig, ConfigError> {
    let host = profile.host.trim();
    if host.is_empty() || host.contains("://") || host.contains('/') {
        return Err(ConfigError::Validation {
            field: "host".into(),
            reason: format!("expected a bare host name or address, got '{}'", profile.host),
        });
    }

    let credentials = resolve_credentials(profile, profile_name)?;
    let mut config = ControllerConfig::new(host, credentials);
    config.use_tls = profile.tls;
    config.port = profile.port.unwrap_or(if profile.tls { 443 } else { 80 });
    config.permission = profile.permission;
    config.suppress_duplicates = profile.suppress_duplicates;

    config.tls = if let Some(ref ca_path) = profile.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else if profile.strict_tls {
        TlsVerification::SystemDefaults
    } else {
        TlsVerification::DangerAcceptInvalid
    };

    if let Some(ref raw) = profile.client_uuid {
        config.client_uuid = raw.parse::<Identifier>().map_err(|e| ConfigError::Validation {
            field: "client_uuid".into(),
            reason: e.to_string(),
        })?;
    }
    if let Some(ref info) = profile.client_info {
        config.client_info.clone_from(info);
    }

    let timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout));
    config.timeouts.handshake = timeout;
    config.timeouts.token = timeout;
    config.timeouts.command = timeout;
    config.keepalive_interval = Duration::from_secs(profile.keepalive.unwrap_or(defaults.keepalive));
    // Short intervals get a proportionally short ack window.
    config.keepalive_timeout = config.keepalive_timeout.min(config.keepalive_interval / 2);

    config.validate().map_err(|e| ConfigError::Validation {
        field: "profile".into(),
        reason: e.to_string(),
    })?;
    Ok(config)
}
