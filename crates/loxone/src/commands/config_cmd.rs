//! `loxone config`: profile management, no session needed.

use std::io::IsTerminal;

use loxone_config::{Config, Profile, config_path, save_config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

fn profile_from_flags(global: &GlobalOpts, password_env: Option<String>) -> Result<Profile, CliError> {
    let host = global.host.clone().ok_or_else(|| CliError::Validation {
        field: "host".into(),
        reason: "pass --host to create a profile".into(),
    })?;

    let mut profile = Profile {
        host,
        port: global.port,
        tls: global.tls,
        username: global.username.clone(),
        password: global.password.clone(),
        password_env,
        strict_tls: global.strict_tls,
        ..Profile::default()
    };

    if profile.password.is_none()
        && profile.password_env.is_none()
        && profile.username.is_some()
        && std::io::stdin().is_terminal()
    {
        profile.password = Some(rpassword::prompt_password("Password: ")?);
    }
    Ok(profile)
}

fn profile_names(config: &Config) -> Vec<String> {
    let mut names: Vec<String> = config.profiles.keys().cloned().collect();
    names.sort();
    names
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts, mut config: Config) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config_path().display().to_string(), global.quiet);
        }
        ConfigCommand::Profiles => {
            let default = config.default_profile.clone().unwrap_or_default();
            let lines: Vec<String> = profile_names(&config)
                .into_iter()
                .map(|name| {
                    if name == default {
                        format!("{name} (default)")
                    } else {
                        name
                    }
                })
                .collect();
            output::print_output(&lines.join("\n"), global.quiet);
        }
        ConfigCommand::Init { name, password_env } => {
            let profile = profile_from_flags(global, password_env)?;
            if config.profiles.is_empty() {
                config.default_profile = Some(name.clone());
            }
            let replaced = config.profiles.insert(name.clone(), profile).is_some();
            save_config(&config)?;
            tracing::info!(profile = %name, replaced, "profile saved");
            output::print_output(
                &format!("Saved profile '{name}' to {}", config_path().display()),
                global.quiet,
            );
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["loxone"];
        argv.extend_from_slice(args);
        argv.extend_from_slice(&["config", "path"]);
        Cli::try_parse_from(argv).unwrap().global
    }

    #[test]
    fn init_requires_a_host() {
        let err = profile_from_flags(&global(&[]), None).unwrap_err();
        assert!(matches!(err, CliError::Validation { ref field, .. } if field == "host"));
    }

    #[test]
    fn init_keeps_password_env_instead_of_secret() {
        let profile = profile_from_flags(
            &global(&["--host", "192.168.1.77", "--username", "admin"]),
            Some("HOME_MS_PASSWORD".into()),
        )
        .unwrap();
        assert_eq!(profile.password_env.as_deref(), Some("HOME_MS_PASSWORD"));
        assert_eq!(profile.username.as_deref(), Some("admin"));
    }
}
