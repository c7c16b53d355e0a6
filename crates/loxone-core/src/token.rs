// ── Crypto/token manager ──
//
// Drives the key exchange and the token endpoints over any `Requester`.
// It holds no session state of its own: results come back as
// `SessionUpdate` values, and the only thing it touches in place is the
// salt counter of the cipher the controller lends it.

use std::future::Future;
use std::time::Duration;

use loxone_api::auth::{KeyInfo, commands, token_hash};
use loxone_api::crypto::parse_public_key;
use loxone_api::{
    AuthError, CommandCipher, Credentials, Error, HandshakeError, Identifier, Link, LlResponse,
    Permission, SessionKey, TokenGrant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::session::{RefreshSchedule, SessionUpdate};

/// One request/response exchange with the Miniserver.
pub trait Requester: Send + Sync {
    /// Send `wire` and wait for the reply whose echoed control matches
    /// `expected_control`.
    fn request_matching(
        &self,
        wire: &str,
        expected_control: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<LlResponse, Error>> + Send;

    fn request(
        &self,
        command: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<LlResponse, Error>> + Send {
        self.request_matching(command, command, timeout)
    }
}

impl Requester for Link {
    fn request_matching(
        &self,
        wire: &str,
        expected_control: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<LlResponse, Error>> + Send {
        Link::request_matching(self, wire, expected_control, timeout)
    }
}

/// Account and client identity used by the token endpoints.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub credentials: Credentials,
    pub permission: Permission,
    pub client_uuid: Identifier,
    pub client_info: String,
    pub handshake_timeout: Duration,
    pub token_timeout: Duration,
}

impl From<&ControllerConfig> for TokenSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            credentials: config.credentials.clone(),
            permission: config.permission,
            client_uuid: config.client_uuid,
            client_info: config.client_info.clone(),
            handshake_timeout: config.timeouts.handshake,
            token_timeout: config.timeouts.token,
        }
    }
}

pub struct TokenManager<'a, R> {
    requester: &'a R,
    settings: &'a TokenSettings,
}

impl<'a, R: Requester> TokenManager<'a, R> {
    pub fn new(requester: &'a R, settings: &'a TokenSettings) -> Self {
        Self { requester, settings }
    }

    fn user(&self) -> &str {
        self.settings.credentials.username.trim()
    }

    // ── Key exchange ─────────────────────────────────────────────────

    /// Fetch the public key, generate a session key and hand it over.
    pub async fn begin_key_exchange(&self) -> Result<SessionUpdate, Error> {
        let timeout = self.settings.handshake_timeout;
        let response = self
            .requester
            .request(commands::GET_PUBLIC_KEY, timeout)
            .await?;
        if !response.is_success() {
            return Err(HandshakeError::PublicKeyUnavailable(format!(
                "code {}",
                response.code
            ))
            .into());
        }
        let pem = response
            .value_string()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| HandshakeError::PublicKeyUnavailable("empty value".into()))?;
        let public_key = parse_public_key(&pem)?;

        let key = SessionKey::generate();
        let payload = key.exchange_payload(&public_key)?;
        let response = self
            .requester
            .request(&commands::key_exchange(&payload), timeout)
            .await?;
        if !response.is_success() {
            return Err(HandshakeError::Rejected {
                code: response.code,
            }
            .into());
        }

        debug!("session key established");
        Ok(SessionUpdate::KeyEstablished(CommandCipher::new(key)))
    }

    // ── Token acquisition ────────────────────────────────────────────

    /// Obtain a fresh token with the account password.
    pub async fn acquire_token(&self, cipher: &mut CommandCipher) -> Result<SessionUpdate, Error> {
        Ok(SessionUpdate::TokenIssued(self.request_token(cipher).await?))
    }

    async fn request_token(&self, cipher: &mut CommandCipher) -> Result<TokenGrant, Error> {
        let timeout = self.settings.token_timeout;
        let response = self
            .requester
            .request(&commands::get_key2(self.user()), timeout)
            .await?;
        self.check_auth(&response)?;
        let info: KeyInfo = response
            .value_as()
            .map_err(|e| AuthError::ProtocolMismatch(e.to_string()))?;
        let alg = info.algorithm()?;
        let hash = info.credential_hash(&self.settings.credentials)?;

        let plain = commands::get_jwt(
            &hash,
            self.user(),
            self.settings.permission,
            &self.settings.client_uuid,
            &self.settings.client_info,
        );
        let response = self.encrypted(cipher, &plain, timeout).await?;
        self.check_auth(&response)?;
        let grant = TokenGrant::from_jwt_response(&response, alg)?;

        info!(
            user = self.user(),
            rights = grant.rights,
            valid_until = %grant.valid_until,
            "token issued"
        );
        if grant.unsecure_password {
            warn!(user = self.user(), "Miniserver flags the account password as insecure");
        }
        Ok(grant)
    }

    // ── Refresh ──────────────────────────────────────────────────────

    /// Extend `grant`. One failure is retried at once; a second escalates
    /// to a fresh `acquire_token`, and if that fails too the session is
    /// considered expired.
    pub async fn refresh_token(
        &self,
        cipher: &mut CommandCipher,
        grant: &TokenGrant,
    ) -> Result<SessionUpdate, Error> {
        let first = match self.try_refresh(cipher, grant).await {
            Ok(refreshed) => return Ok(SessionUpdate::TokenRefreshed(refreshed)),
            Err(e) => e,
        };
        warn!(error = %first, "token refresh failed, retrying");

        let second = match self.try_refresh(cipher, grant).await {
            Ok(refreshed) => return Ok(SessionUpdate::TokenRefreshed(refreshed)),
            Err(e) => e,
        };
        warn!(error = %second, "token refresh failed twice, re-authenticating");

        match self.request_token(cipher).await {
            Ok(fresh) => Ok(SessionUpdate::TokenIssued(fresh)),
            Err(e) => {
                warn!(error = %e, "re-authentication failed");
                Err(AuthError::Expired.into())
            }
        }
    }

    async fn try_refresh(
        &self,
        cipher: &mut CommandCipher,
        grant: &TokenGrant,
    ) -> Result<TokenGrant, Error> {
        let hash = self.one_time_hash(grant).await?;
        let plain = commands::refresh_jwt(&hash, self.user());
        let response = self
            .encrypted(cipher, &plain, self.settings.token_timeout)
            .await?
            .into_result()?;
        let refreshed = grant.refreshed(&response)?;
        debug!(valid_until = %refreshed.valid_until, "token refreshed");
        Ok(refreshed)
    }

    // ── Token login ──────────────────────────────────────────────────

    /// Log in on a new link with a still-valid token.
    pub async fn authenticate_with_token(
        &self,
        cipher: &mut CommandCipher,
        grant: &TokenGrant,
    ) -> Result<SessionUpdate, Error> {
        let hash = self.one_time_hash(grant).await?;
        let plain = commands::auth_with_token(&hash, self.user());
        let response = self
            .encrypted(cipher, &plain, self.settings.token_timeout)
            .await?;
        self.check_auth(&response)?;
        let grant = grant.refreshed(&response)?;
        debug!(valid_until = %grant.valid_until, "authenticated with token");
        Ok(SessionUpdate::TokenRefreshed(grant))
    }

    // ── Helpers ──────────────────────────────────────────────────────

    async fn one_time_hash(&self, grant: &TokenGrant) -> Result<String, Error> {
        let response = self
            .requester
            .request(commands::GET_KEY, self.settings.token_timeout)
            .await?
            .into_result()?;
        let key = response
            .value_string()
            .ok_or_else(|| AuthError::ProtocolMismatch("getkey returned no key".into()))?;
        Ok(token_hash(grant.hash_alg, &key, &grant.token))
    }

    async fn encrypted(
        &self,
        cipher: &mut CommandCipher,
        plain: &str,
        timeout: Duration,
    ) -> Result<LlResponse, Error> {
        let wire = cipher.encrypt_command(plain);
        self.requester.request_matching(&wire, plain, timeout).await
    }

    fn check_auth(&self, response: &LlResponse) -> Result<(), AuthError> {
        if response.is_success() {
            Ok(())
        } else {
            Err(AuthError::from_code(response.code, self.user()))
        }
    }
}

// ── Scheduling ───────────────────────────────────────────────────────

/// Sleep until the proactive refresh point of `schedule`.
///
/// Returns `false` if `cancel` fired first.
pub async fn wait_for_refresh(
    schedule: Option<RefreshSchedule>,
    fraction: f64,
    cancel: &CancellationToken,
) -> bool {
    let due = schedule.map(|s| s.due_at(fraction));
    let sleep = async {
        match due {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = sleep => true,
    }
}

