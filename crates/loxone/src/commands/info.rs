//! `loxone info`: the unauthenticated `jdev/cfg/apiKey` discovery.

use std::time::Duration;

use loxone_api::transport::{TlsMode, TransportConfig, http_base_url};
use loxone_api::{MiniserverInfo, DiscoveryClient};
use loxone_config::{Config, Profile};

use crate::cli::GlobalOpts;
use crate::config::effective_profile;
use crate::error::CliError;
use crate::output;

fn transport_for(profile: &Profile) -> TransportConfig {
    let tls = if let Some(ref ca) = profile.ca_cert {
        TlsMode::CustomCa(ca.clone())
    } else if profile.strict_tls {
        TlsMode::System
    } else {
        TlsMode::DangerAcceptInvalid
    };
    TransportConfig {
        tls,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(10)),
    }
}

fn detail(info: &MiniserverInfo) -> String {
    let https = match info.https_status {
        Some(2) => "required",
        Some(1) => "available",
        _ => "unavailable",
    };
    output::detail_block(&[
        ("Serial", info.serial.clone()),
        ("Version", info.version.clone()),
        ("HTTPS", https.to_owned()),
        (
            "Local",
            info.local.map_or_else(|| "unknown".into(), |l| l.to_string()),
        ),
    ])
}

pub async fn handle(global: &GlobalOpts, config: &Config) -> Result<(), CliError> {
    let (_, profile) = effective_profile(global, config)?;
    let host = profile.host.trim();
    let port = profile.port.unwrap_or(if profile.tls { 443 } else { 80 });
    let base = http_base_url(host, port, profile.tls)?;
    tracing::debug!(%base, "querying Miniserver");

    let discovery = DiscoveryClient::new(base, &transport_for(&profile))?;
    let info = discovery
        .api_key()
        .await
        .map_err(|e| CliError::from_core(e.into(), host))?;

    let out = output::render_single(&global.output, &info, detail, |i| i.serial.clone())?;
    output::print_output(&out, global.quiet);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_https_is_spelled_out() {
        let info = MiniserverInfo {
            serial: "504F94A00000".into(),
            version: "14.5.12.7".into(),
            https_status: Some(2),
            local: Some(true),
        };
        let out = detail(&info);
        assert!(out.contains("  HTTPS  required"));
        assert!(out.contains("  Local  true"));
    }

    #[test]
    fn strict_flag_selects_system_roots() {
        let profile = Profile {
            strict_tls: true,
            ..Profile::default()
        };
        assert!(matches!(transport_for(&profile).tls, TlsMode::System));
    }
}
