// Loading and saving profiles through real files.
#![allow(clippy::unwrap_used)]

use std::time::Duration;

use loxone_config::{Config, Profile, load_config_from, profile_to_controller_config, save_config_to};
use loxone_core::Permission;
use pretty_assertions::assert_eq;

const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
timeout = 15

[profiles.home]
host = "192.168.1.77"
username = "admin"
password = "secret"
permission = "app"
client_uuid = "0f1e2d3c-0000-0001-ffff000000000001"

[profiles.cabin]
host = "cabin.example.org"
tls = true
username = "viewer"
password = "pw"
keepalive = 30
"#;

#[test]
fn profiles_load_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, SAMPLE).unwrap();

    let config = load_config_from(&path).unwrap();
    assert_eq!(config.default_profile.as_deref(), Some("home"));
    assert_eq!(config.defaults.timeout, 15);
    assert_eq!(config.defaults.output, "table");

    let (name, home) = config.profile(None).unwrap();
    assert_eq!(name, "home");
    assert_eq!(home.permission, Permission::App);

    let controller = profile_to_controller_config(home, name, &config.defaults).unwrap();
    assert_eq!(controller.host, "192.168.1.77");
    assert_eq!(controller.port, 80);
    assert_eq!(controller.timeouts.command, Duration::from_secs(15));
    assert_eq!(
        controller.client_uuid.to_string(),
        "0f1e2d3c-0000-0001-ffff000000000001"
    );

    let (_, cabin) = config.profile(Some("cabin")).unwrap();
    let controller = profile_to_controller_config(cabin, "cabin", &config.defaults).unwrap();
    assert!(controller.use_tls);
    assert_eq!(controller.port, 443);
    assert_eq!(controller.keepalive_interval, Duration::from_secs(30));
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn saved_config_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::default();
    config.profiles.insert(
        "default".into(),
        Profile {
            host: "10.0.0.5".into(),
            username: Some("admin".into()),
            password_env: Some("MINISERVER_PW".into()),
            ..Profile::default()
        },
    );
    save_config_to(&config, &path).unwrap();

    assert_eq!(load_config_from(&path).unwrap(), config);
}

#[test]
fn malformed_toml_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[profiles.home\nhost = 1").unwrap();
    assert!(load_config_from(&path).is_err());
}
