// ── Session state ──
//
// The controller is the only owner of a `Session`. The token manager
// describes changes as `SessionUpdate` values; everyone else reads the
// published `SessionSnapshot` through a lease.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use loxone_api::{CommandCipher, TokenGrant};
use tokio::sync::watch;
use tokio::time::Instant;

/// Connection lifecycle as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Handshaking,
    Authenticating,
    StructureLoading,
    Live,
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Live)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Handshaking => f.write_str("handshaking"),
            Self::Authenticating => f.write_str("authenticating"),
            Self::StructureLoading => f.write_str("loading structure"),
            Self::Live => f.write_str("live"),
            Self::Reconnecting { attempt } => write!(f, "reconnecting (attempt {attempt})"),
        }
    }
}

/// A change to the cryptographic or token part of the session.
#[derive(Debug)]
pub enum SessionUpdate {
    KeyEstablished(CommandCipher),
    TokenIssued(TokenGrant),
    TokenRefreshed(TokenGrant),
    Cleared,
}

/// When a token was obtained and how long it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSchedule {
    pub issued_at: Instant,
    pub lifetime: Duration,
}

impl RefreshSchedule {
    /// Schedule for `grant`, issued now.
    pub fn for_grant(grant: &TokenGrant) -> Self {
        let lifetime = (grant.valid_until - Utc::now()).to_std().unwrap_or_default();
        Self {
            issued_at: Instant::now(),
            lifetime,
        }
    }

    /// `issued_at + fraction × lifetime`.
    pub fn due_at(&self, fraction: f64) -> Instant {
        self.issued_at + self.lifetime.mul_f64(fraction.clamp(0.0, 1.0))
    }
}

/// Read-only view of the session, published on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub key_established: bool,
    pub token_valid_until: Option<DateTime<Utc>>,
    pub token_rights: Option<u32>,
    pub refresh_schedule: Option<RefreshSchedule>,
    pub refresh_due: Option<Instant>,
}

impl SessionSnapshot {
    fn empty() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            key_established: false,
            token_valid_until: None,
            token_rights: None,
            refresh_schedule: None,
            refresh_due: None,
        }
    }
}

pub type SessionLease = Arc<SessionSnapshot>;

pub struct Session {
    cipher: Option<CommandCipher>,
    grant: Option<TokenGrant>,
    schedule: Option<RefreshSchedule>,
    state: ConnectionState,
    refresh_fraction: f64,
    state_tx: watch::Sender<ConnectionState>,
    published: Arc<ArcSwap<SessionSnapshot>>,
}

impl Session {
    pub(crate) fn new(
        refresh_fraction: f64,
        state_tx: watch::Sender<ConnectionState>,
        published: Arc<ArcSwap<SessionSnapshot>>,
    ) -> Self {
        published.store(Arc::new(SessionSnapshot::empty()));
        Self {
            cipher: None,
            grant: None,
            schedule: None,
            state: ConnectionState::Disconnected,
            refresh_fraction,
            state_tx,
            published,
        }
    }

    pub(crate) fn new_published() -> Arc<ArcSwap<SessionSnapshot>> {
        Arc::new(ArcSwap::from_pointee(SessionSnapshot::empty()))
    }

    pub fn apply(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::KeyEstablished(cipher) => self.cipher = Some(cipher),
            SessionUpdate::TokenIssued(grant) | SessionUpdate::TokenRefreshed(grant) => {
                self.schedule = Some(RefreshSchedule::for_grant(&grant));
                self.grant = Some(grant);
            }
            SessionUpdate::Cleared => {
                // Dropping the cipher zeroizes the key material.
                self.cipher = None;
                self.grant = None;
                self.schedule = None;
            }
        }
        self.publish();
    }

    /// Forget the key of a dead link but keep the token for reuse.
    pub(crate) fn drop_cipher(&mut self) {
        self.cipher = None;
        self.publish();
    }

    pub fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "connection state");
            self.state = state;
            self.state_tx.send_replace(state);
            self.publish();
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn cipher_mut(&mut self) -> Option<&mut CommandCipher> {
        self.cipher.as_mut()
    }

    pub fn grant(&self) -> Option<&TokenGrant> {
        self.grant.as_ref()
    }

    /// The held token, if it has not expired yet.
    pub fn valid_grant(&self, now: DateTime<Utc>) -> Option<TokenGrant> {
        self.grant.as_ref().filter(|g| g.is_valid_at(now)).cloned()
    }

    fn publish(&self) {
        self.published.store(Arc::new(SessionSnapshot {
            state: self.state,
            key_established: self.cipher.is_some(),
            token_valid_until: self.grant.as_ref().map(|g| g.valid_until),
            token_rights: self.grant.as_ref().map(|g| g.rights),
            refresh_schedule: self.schedule,
            refresh_due: self.schedule.map(|s| s.due_at(self.refresh_fraction)),
        }));
    }
}

#[cfg(test)]
mod tests {
    use loxone_api::{HashAlg, SessionKey};
    use secrecy::SecretString;

    use super::*;

    fn grant(lifetime_secs: i64) -> TokenGrant {
        TokenGrant {
            token: SecretString::from("jwt-token".to_owned()),
            key: None,
            valid_until: Utc::now() + chrono::Duration::seconds(lifetime_secs),
            rights: 4,
            unsecure_password: false,
            hash_alg: HashAlg::Sha256,
        }
    }

    fn session() -> (Session, watch::Receiver<ConnectionState>, Arc<ArcSwap<SessionSnapshot>>) {
        let (tx, rx) = watch::channel(ConnectionState::Disconnected);
        let published = Session::new_published();
        (Session::new(0.8, tx, Arc::clone(&published)), rx, published)
    }

    #[tokio::test(start_paused = true)]
    async fn updates_are_published() {
        let (mut session, rx, published) = session();
        session.apply(SessionUpdate::KeyEstablished(CommandCipher::new(SessionKey::generate())));
        session.apply(SessionUpdate::TokenIssued(grant(100)));
        session.set_state(ConnectionState::Live);

        let snapshot = published.load_full();
        assert!(snapshot.key_established);
        assert_eq!(snapshot.token_rights, Some(4));
        assert_eq!(snapshot.state, ConnectionState::Live);
        assert_eq!(*rx.borrow(), ConnectionState::Live);
        let due = snapshot.refresh_due.unwrap_or_else(Instant::now);
        let offset = due - Instant::now();
        assert!(offset > Duration::from_secs(78) && offset <= Duration::from_secs(80));
    }

    #[tokio::test]
    async fn cleared_drops_key_and_token() {
        let (mut session, _rx, published) = session();
        session.apply(SessionUpdate::KeyEstablished(CommandCipher::new(SessionKey::generate())));
        session.apply(SessionUpdate::TokenIssued(grant(100)));
        session.apply(SessionUpdate::Cleared);

        assert!(session.cipher_mut().is_none());
        assert!(session.grant().is_none());
        assert_eq!(*published.load_full(), SessionSnapshot::empty());
    }

    #[test]
    fn expired_grant_is_not_reused() {
        let (mut session, _rx, _published) = session();
        session.apply(SessionUpdate::TokenIssued(grant(-5)));
        assert!(session.valid_grant(Utc::now()).is_none());
    }

    #[test]
    fn schedule_due_at_fraction() {
        let issued_at = Instant::now();
        let schedule = RefreshSchedule {
            issued_at,
            lifetime: Duration::from_secs(100),
        };
        assert_eq!(schedule.due_at(0.8), issued_at + Duration::from_secs(80));
    }
}
