// ── Authentication primitives ──
//
// Credential types, token grants and the command paths of the token
// endpoints. The exchange itself is driven by `loxone-core`.

use chrono::{DateTime, TimeZone, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::crypto::{HashAlg, decode_key, hash_password, hmac_hex};
use crate::error::AuthError;
use crate::response::LlResponse;

/// Unix timestamp of 2009-01-01T00:00:00Z, the controller's epoch.
pub const LOXONE_EPOCH_UNIX: i64 = 1_230_768_000;

/// User name and password for token acquisition.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// Token permission level requested from `getjwt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    /// Short-lived web token.
    #[default]
    Web,
    /// Long-lived app token.
    App,
}

impl Permission {
    pub fn code(self) -> u8 {
        match self {
            Self::Web => 2,
            Self::App => 4,
        }
    }
}

/// `getkey2` reply: one-time key, user salt and hash algorithm.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyInfo {
    pub key: String,
    pub salt: String,
    #[serde(rename = "hashAlg", default)]
    pub hash_alg: Option<String>,
}

impl KeyInfo {
    pub fn algorithm(&self) -> Result<HashAlg, AuthError> {
        self.hash_alg
            .as_deref()
            .map_or(Ok(HashAlg::Sha1), str::parse)
            .map_err(AuthError::ProtocolMismatch)
    }

    /// `lower_hex(HMAC(key, "{user}:{upper_hex(H(password:salt))}"))`.
    pub fn credential_hash(&self, credentials: &Credentials) -> Result<String, AuthError> {
        let alg = self.algorithm()?;
        let password = credentials.password.expose_secret().trim_end_matches(['\r', '\n']);
        let pw_hash = hash_password(alg, password, &self.salt);
        let message = format!("{}:{pw_hash}", credentials.username.trim());
        Ok(hmac_hex(alg, &decode_key(&self.key), message.as_bytes()))
    }
}

/// `lower_hex(HMAC(key, token))`, used by refresh and token login.
pub fn token_hash(alg: HashAlg, one_time_key: &str, token: &SecretString) -> String {
    hmac_hex(alg, &decode_key(one_time_key), token.expose_secret().as_bytes())
}

/// An issued token and its metadata.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub token: SecretString,
    pub key: Option<String>,
    pub valid_until: DateTime<Utc>,
    pub rights: u32,
    pub unsecure_password: bool,
    /// Hash algorithm negotiated at acquisition, reused for token hashes.
    pub hash_alg: HashAlg,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGrant {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    key: Option<String>,
    valid_until: i64,
    #[serde(default)]
    token_rights: u32,
    #[serde(default)]
    unsecure_pass: bool,
}

impl TokenGrant {
    /// Parse a `getjwt` reply.
    pub fn from_jwt_response(response: &LlResponse, hash_alg: HashAlg) -> Result<Self, AuthError> {
        let raw = parse_raw(response)?;
        let token = raw
            .token
            .ok_or_else(|| AuthError::ProtocolMismatch("token missing from response".into()))?;
        Ok(Self {
            token: SecretString::from(token),
            key: raw.key,
            valid_until: from_loxone_seconds(raw.valid_until),
            rights: raw.token_rights,
            unsecure_password: raw.unsecure_pass,
            hash_alg,
        })
    }

    /// Apply a `refreshjwt` reply. Some firmwares issue a new token.
    pub fn refreshed(&self, response: &LlResponse) -> Result<Self, AuthError> {
        let raw = parse_raw(response)?;
        Ok(Self {
            token: raw
                .token
                .map_or_else(|| self.token.clone(), SecretString::from),
            key: raw.key.or_else(|| self.key.clone()),
            valid_until: from_loxone_seconds(raw.valid_until),
            rights: raw.token_rights,
            unsecure_password: raw.unsecure_pass,
            hash_alg: self.hash_alg,
        })
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_until > now
    }
}

fn parse_raw(response: &LlResponse) -> Result<RawGrant, AuthError> {
    response
        .value_as::<RawGrant>()
        .map_err(|e| AuthError::ProtocolMismatch(e.to_string()))
}

/// Convert controller seconds (since 2009-01-01 UTC) to a timestamp.
pub fn from_loxone_seconds(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(LOXONE_EPOCH_UNIX.saturating_add(secs), 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

pub fn to_loxone_seconds(at: DateTime<Utc>) -> i64 {
    at.timestamp() - LOXONE_EPOCH_UNIX
}

// ── Command paths ────────────────────────────────────────────────────

pub mod commands {
    use crate::identifier::Identifier;

    use super::Permission;

    pub const GET_PUBLIC_KEY: &str = "jdev/sys/getPublicKey";
    pub const GET_KEY: &str = "jdev/sys/getkey";
    pub const STRUCTURE_FILE: &str = "data/LoxAPP3.json";
    pub const STRUCTURE_VERSION: &str = "jdev/sps/LoxAPPversion3";
    pub const ENABLE_STATUS_UPDATES: &str = "jdev/sps/enablebinstatusupdate";
    pub const KEEPALIVE: &str = "keepalive";

    pub fn key_exchange(payload: &str) -> String {
        format!("jdev/sys/keyexchange/{payload}")
    }

    pub fn get_key2(user: &str) -> String {
        format!("jdev/sys/getkey2/{}", escape(user))
    }

    pub fn get_jwt(
        hash: &str,
        user: &str,
        permission: Permission,
        client_uuid: &Identifier,
        info: &str,
    ) -> String {
        format!(
            "jdev/sys/getjwt/{hash}/{}/{}/{client_uuid}/{}",
            escape(user),
            permission.code(),
            escape(info)
        )
    }

    pub fn refresh_jwt(hash: &str, user: &str) -> String {
        format!("jdev/sys/refreshjwt/{hash}/{}", escape(user))
    }

    pub fn auth_with_token(hash: &str, user: &str) -> String {
        format!("authwithtoken/{hash}/{}", escape(user))
    }

    fn escape(segment: &str) -> String {
        url::form_urlencoded::byte_serialize(segment.as_bytes())
            .collect::<String>()
            .replace('+', "%20")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::identifier::Identifier;

    fn ok(value: serde_json::Value) -> LlResponse {
        LlResponse {
            control: "jdev/sys/getjwt".into(),
            value,
            code: 200,
        }
    }

    #[test]
    fn credential_hash_uses_announced_algorithm() {
        let info: KeyInfo = serde_json::from_value(json!({
            "key": "3431343234333434",
            "salt": "a1b2c3",
            "hashAlg": "SHA256"
        }))
        .unwrap();
        let creds = Credentials::new("admin", "secret\n");
        assert_eq!(
            info.credential_hash(&creds).unwrap(),
            "b1ffc55152251fde7ae4ddf2ffece00e14685c68e8ead52e181c6db354d3fcac"
        );
    }

    #[test]
    fn missing_hash_alg_defaults_to_sha1() {
        let info: KeyInfo =
            serde_json::from_value(json!({"key": "3431343234333434", "salt": "a1b2c3"})).unwrap();
        assert_eq!(
            info.credential_hash(&Credentials::new("admin", "secret")).unwrap(),
            "1f4e18cc562ba5f96376b53f753c8bbdc4212241"
        );
    }

    #[test]
    fn unknown_hash_alg_is_protocol_mismatch() {
        let info: KeyInfo =
            serde_json::from_value(json!({"key": "00", "salt": "s", "hashAlg": "MD5"})).unwrap();
        assert!(matches!(
            info.credential_hash(&Credentials::new("a", "b")),
            Err(AuthError::ProtocolMismatch(_))
        ));
    }

    #[test]
    fn token_hash_matches_known_vector() {
        let token = SecretString::from("jwt-token".to_owned());
        assert_eq!(
            token_hash(HashAlg::Sha256, "3431343234333434", &token),
            "2f718b70add4435ffcff24eeaf5b35d9f4f31a21f41b1452c5d98b3d354c4586"
        );
    }

    #[test]
    fn grant_converts_loxone_epoch() {
        let grant = TokenGrant::from_jwt_response(
            &ok(json!({
                "token": "abc",
                "key": "0011",
                "validUntil": 3600,
                "tokenRights": 1666,
                "unsecurePass": false
            })),
            HashAlg::Sha256,
        )
        .unwrap();
        assert_eq!(grant.valid_until.to_rfc3339(), "2009-01-01T01:00:00+00:00");
        assert_eq!(grant.rights, 1666);
        assert_eq!(to_loxone_seconds(grant.valid_until), 3600);
    }

    #[test]
    fn grant_without_token_is_rejected() {
        assert!(matches!(
            TokenGrant::from_jwt_response(&ok(json!({"validUntil": 1})), HashAlg::Sha1),
            Err(AuthError::ProtocolMismatch(_))
        ));
    }

    #[test]
    fn refresh_keeps_token_when_not_reissued() {
        let grant = TokenGrant::from_jwt_response(
            &ok(json!({"token": "first", "validUntil": 100})),
            HashAlg::Sha1,
        )
        .unwrap();
        let renewed = grant.refreshed(&ok(json!({"validUntil": 200}))).unwrap();
        assert_eq!(renewed.token.expose_secret(), "first");
        assert_eq!(to_loxone_seconds(renewed.valid_until), 200);

        let reissued = grant
            .refreshed(&ok(json!({"token": "second", "validUntil": 300})))
            .unwrap();
        assert_eq!(reissued.token.expose_secret(), "second");
    }

    #[test]
    fn jwt_path_escapes_info() {
        let uuid: Identifier = "0f1e2d3c-0001-a1b2-ffffd2222e3f44ee".parse().unwrap();
        assert_eq!(
            commands::get_jwt("h", "admin", Permission::App, &uuid, "loxone rs/1"),
            "jdev/sys/getjwt/h/admin/4/0f1e2d3c-0001-a1b2-ffffd2222e3f44ee/loxone%20rs%2F1"
        );
    }
}
