// ── Text response envelope ──
//
// Every text reply is `{"LL": {"control": .., "value": .., "Code": ..}}`.
// Firmwares disagree on `Code` vs `code` and on string vs number.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Error;

/// Decoded `LL` envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct LlResponse {
    pub control: String,
    pub value: Value,
    pub code: u16,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "LL")]
    ll: RawLl,
}

#[derive(Deserialize)]
struct RawLl {
    #[serde(default)]
    control: String,
    #[serde(default)]
    value: Value,
    #[serde(rename = "Code", alias = "code", default)]
    code: Option<Value>,
}

/// Parse a text frame into its envelope.
pub fn parse_response(text: &str) -> Result<LlResponse, Error> {
    let envelope: Envelope = serde_json::from_str(text).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: text.chars().take(512).collect(),
    })?;
    let raw = envelope.ll;
    let code = match raw.code {
        None | Some(Value::Null) => 200,
        Some(v) => parse_code(&v).ok_or_else(|| Error::Deserialization {
            message: format!("unparseable response code {v}"),
            body: text.chars().take(512).collect(),
        })?,
    };
    Ok(LlResponse {
        control: raw.control,
        value: raw.value,
        code,
    })
}

fn parse_code(v: &Value) -> Option<u16> {
    match v {
        Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Canonical form of a control path for request/response matching.
///
/// Strips a leading `/` and the `j` of `jdev/`, which the controller may
/// or may not echo.
pub fn normalize_control(path: &str) -> &str {
    let path = path.trim_start_matches('/');
    path.strip_prefix('j')
        .filter(|rest| rest.starts_with("dev/"))
        .unwrap_or(path)
}

impl LlResponse {
    pub fn is_success(&self) -> bool {
        self.code == 200
    }

    /// Turn a non-200 code into [`Error::Response`].
    pub fn into_result(self) -> Result<Self, Error> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Response {
                control: self.control,
                code: self.code,
            })
        }
    }

    /// Value as a string, rendering numbers and booleans.
    pub fn value_string(&self) -> Option<String> {
        match &self.value {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Deserialize the value, accepting an object or a string holding JSON.
    pub fn value_as<T: DeserializeOwned>(&self) -> Result<T, Error> {
        let decoded = match &self.value {
            Value::String(s) => serde_json::from_str(s),
            other => T::deserialize(other),
        };
        decoded.map_err(|e| Error::Deserialization {
            message: format!("{}: {e}", self.control),
            body: self.value.to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_string_code() {
        let r = parse_response(r#"{"LL":{"control":"jdev/cfg/api","value":"ok","Code":"200"}}"#)
            .unwrap();
        assert_eq!(r.code, 200);
        assert_eq!(r.value_string().as_deref(), Some("ok"));
    }

    #[test]
    fn parses_lowercase_numeric_code() {
        let r = parse_response(r#"{"LL":{"control":"dev/sps/io/x/on","value":"1","code":401}}"#)
            .unwrap();
        assert_eq!(r.code, 401);
        assert!(matches!(r.into_result(), Err(Error::Response { code: 401, .. })));
    }

    #[test]
    fn missing_envelope_is_deserialization_error() {
        assert!(matches!(
            parse_response(r#"{"value":1}"#),
            Err(Error::Deserialization { .. })
        ));
    }

    #[test]
    fn value_as_accepts_embedded_json_string() {
        #[derive(Deserialize, PartialEq, Debug)]
        struct Key {
            key: String,
        }
        let obj = LlResponse {
            control: "c".into(),
            value: json!({"key": "ab"}),
            code: 200,
        };
        let embedded = LlResponse {
            control: "c".into(),
            value: json!("{\"key\":\"ab\"}"),
            code: 200,
        };
        assert_eq!(obj.value_as::<Key>().unwrap(), embedded.value_as::<Key>().unwrap());
    }

    #[test]
    fn control_normalization() {
        assert_eq!(normalize_control("jdev/sps/io/a/on"), "dev/sps/io/a/on");
        assert_eq!(normalize_control("/dev/sps/io/a/on"), "dev/sps/io/a/on");
        assert_eq!(normalize_control("keepalive"), "keepalive");
        assert_eq!(normalize_control("jump"), "jump");
    }
}
