// Unauthenticated HTTP discovery through `jdev/cfg/apiKey`.
//
// The Miniserver answers with the usual `LL` envelope whose value is a
// Python-literal-ish string (single quotes), so it is normalised before
// being handed to serde.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::response::parse_response;
use crate::transport::TransportConfig;

const API_KEY_PATH: &str = "jdev/cfg/apiKey";

/// Identity reported by an unauthenticated Miniserver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiniserverInfo {
    /// Serial number (the MAC address).
    pub serial: String,
    pub version: String,
    /// `httpsStatus`: 1 when HTTPS is available, 2 when it is required.
    pub https_status: Option<u8>,
    pub local: Option<bool>,
}

impl MiniserverInfo {
    pub fn supports_tls(&self) -> bool {
        matches!(self.https_status, Some(1 | 2))
    }
}

/// HTTP client for endpoints that work without a session.
pub struct DiscoveryClient {
    http: reqwest::Client,
    base_url: Url,
}

impl DiscoveryClient {
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url,
        })
    }

    /// Create a discovery client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// Fetch serial, firmware version and HTTPS capability.
    pub async fn api_key(&self) -> Result<MiniserverInfo, Error> {
        let url = self.base_url.join(API_KEY_PATH)?;
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;
        if !status.is_success() {
            return Err(Error::Response {
                control: API_KEY_PATH.into(),
                code: status.as_u16(),
            });
        }

        let response = parse_response(&body)?.into_result()?;
        parse_info(&response.value).ok_or_else(|| Error::Deserialization {
            message: "apiKey value lacks snr/version".into(),
            body,
        })
    }
}

fn parse_info(value: &Value) -> Option<MiniserverInfo> {
    let object = match value {
        Value::Object(_) => value.clone(),
        Value::String(s) => serde_json::from_str(&relax_quotes(s)).ok()?,
        _ => return None,
    };
    Some(MiniserverInfo {
        serial: object.get("snr")?.as_str()?.to_owned(),
        version: object.get("version")?.as_str()?.to_owned(),
        https_status: object
            .get("httpsStatus")
            .and_then(Value::as_u64)
            .and_then(|n| u8::try_from(n).ok()),
        local: object.get("local").and_then(|v| match v {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_u64().map(|n| n != 0),
            _ => None,
        }),
    })
}

/// Turn `{'snr': 'x', 'local': True}` into JSON.
fn relax_quotes(raw: &str) -> String {
    raw.replace('\'', "\"")
        .replace(": True", ": true")
        .replace(": False", ": false")
        .replace(":True", ":true")
        .replace(":False", ":false")
}
