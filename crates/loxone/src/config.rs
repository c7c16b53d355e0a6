//! CLI side of configuration: the active profile with flag overrides,
//! and its translation to `loxone_core::ControllerConfig`.
//!
//! Core never sees these types -- it receives a pre-built `ControllerConfig`.

use std::io::IsTerminal;

use loxone_config::{
    Config, ConfigError, Profile, config_path, profile_to_controller_config, resolve_credentials,
};
use loxone_core::ControllerConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// The active profile with `--host`, `--username` and friends applied.
///
/// Without a stored profile, the flags alone must name a host.
pub fn effective_profile(global: &GlobalOpts, config: &Config) -> Result<(String, Profile), CliError> {
    let name = active_profile_name(global, config);
    let mut profile = match config.profiles.get(&name) {
        Some(stored) => stored.clone(),
        None if global.host.is_some() => Profile::default(),
        None if global.profile.is_some() => return Err(CliError::ProfileNotFound { name }),
        None => {
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        }
    };

    if let Some(ref host) = global.host {
        profile.host.clone_from(host);
    }
    if global.port.is_some() {
        profile.port = global.port;
    }
    profile.tls |= global.tls;
    profile.strict_tls |= global.strict_tls;
    if global.username.is_some() {
        profile.username.clone_from(&global.username);
    }
    if global.password.is_some() {
        // A flag wins over every other source.
        profile.password.clone_from(&global.password);
        profile.password_env = None;
    }
    profile.timeout = Some(global.timeout);
    Ok((name, profile))
}

/// Build a `ControllerConfig` from the config file, profile, and CLI overrides.
///
/// Prompts for the password on a terminal when no source provides one.
pub fn build_controller_config(global: &GlobalOpts, config: &Config) -> Result<ControllerConfig, CliError> {
    let (name, mut profile) = effective_profile(global, config)?;

    match resolve_credentials(&profile, &name) {
        Err(ConfigError::NoCredentials { .. })
            if profile.username.is_some() && std::io::stdin().is_terminal() =>
        {
            let prompt = format!("Password for {}: ", profile.username.as_deref().unwrap_or_default());
            profile.password = Some(rpassword::prompt_password(prompt)?);
        }
        Err(e) => return Err(e.into()),
        Ok(_) => {}
    }

    Ok(profile_to_controller_config(&profile, &name, &config.defaults)?)
}
