// ── Controller ──
//
// Full lifecycle management for one Miniserver: socket, key exchange,
// token, structure, status updates, keepalive, token refresh and
// reconnects. Consumers subscribe to state updates and send commands
// through it.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::Utc;
use loxone_api::auth::commands;
use loxone_api::{EventSink, Identifier, Link, LlResponse};
use rand::Rng;
use tokio::sync::{Mutex, Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::CommandSender;
use crate::config::{ControllerConfig, ReconnectConfig};
use crate::dispatch::{DispatchedUpdate, DispatchedValue, Dispatcher, Subscription};
use crate::error::{CommandError, ConnectionError, CoreError};
use crate::model::StructureDocument;
use crate::session::{ConnectionState, Session, SessionLease, SessionSnapshot, SessionUpdate};
use crate::token::{TokenManager, TokenSettings, wait_for_refresh};

/// Consecutive unanswered keepalives after which the link is dropped.
const MAX_KEEPALIVE_MISSES: u32 = 2;

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    token_settings: TokenSettings,
    dispatcher: Arc<Dispatcher>,
    connection_state: watch::Receiver<ConnectionState>,
    /// The session-transition lock: held for a whole connect sequence and
    /// for each token refresh.
    session: Mutex<Session>,
    published: Arc<ArcSwap<SessionSnapshot>>,
    link: Arc<ArcSwapOption<Link>>,
    commands: CommandSender,
    refresh_now: Arc<Notify>,
    cancel: CancellationToken,
    run_cancel: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    last_error: ArcSwapOption<CoreError>,
}

impl Controller {
    /// Create a controller. Does NOT connect; call
    /// [`connect()`](Self::connect).
    pub fn new(config: ControllerConfig) -> Self {
        let (state_tx, connection_state) = watch::channel(ConnectionState::Disconnected);
        let published = Session::new_published();
        let session = Session::new(config.token_refresh_fraction, state_tx, Arc::clone(&published));
        let link = Arc::new(ArcSwapOption::empty());
        let refresh_now = Arc::new(Notify::new());
        let commands = CommandSender::new(
            connection_state.clone(),
            Arc::clone(&link),
            Arc::clone(&refresh_now),
        );
        let cancel = CancellationToken::new();

        Self {
            inner: Arc::new(ControllerInner {
                token_settings: TokenSettings::from(&config),
                dispatcher: Arc::new(Dispatcher::new(
                    config.listener_queue_capacity,
                    config.suppress_duplicates,
                )),
                connection_state,
                session: Mutex::new(session),
                published,
                link,
                commands,
                refresh_now,
                run_cancel: Mutex::new(cancel.child_token()),
                cancel,
                task_handles: Mutex::new(Vec::new()),
                last_error: ArcSwapOption::empty(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────────

    /// Start the connection supervisor and wait until the session is
    /// Live, or until it fails with a terminal error. Transient failures
    /// are retried with backoff in the meantime.
    pub async fn connect(&self) -> Result<(), CoreError> {
        self.inner.config.validate()?;

        let ready = {
            let mut handles = self.inner.task_handles.lock().await;
            handles.retain(|h| !h.is_finished());
            if handles.is_empty() {
                let run = self.inner.cancel.child_token();
                *self.inner.run_cancel.lock().await = run.clone();
                self.inner.last_error.store(None);

                let (ready_tx, ready_rx) = oneshot::channel();
                let this = self.clone();
                handles.push(tokio::spawn(async move { this.supervise(run, ready_tx).await }));
                Some(ready_rx)
            } else {
                None
            }
        };

        match ready {
            Some(rx) => rx.await.unwrap_or(Err(ConnectionError::Aborted.into())),
            None => self.wait_live().await,
        }
    }

    /// Stop all background work and forget the session. Safe in any state.
    pub async fn disconnect(&self) {
        self.inner.run_cancel.lock().await.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        drop(handles);

        self.teardown_link().await;
        let mut session = self.inner.session.lock().await;
        session.apply(SessionUpdate::Cleared);
        session.set_state(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    async fn wait_live(&self) -> Result<(), CoreError> {
        let mut rx = self.inner.connection_state.clone();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_live() {
                return Ok(());
            }
            if state == ConnectionState::Disconnected {
                if let Some(err) = self.last_error() {
                    return Err(err);
                }
            }
            if rx.changed().await.is_err() {
                return Err(ConnectionError::Aborted.into());
            }
        }
    }

    // ── Subscriptions ────────────────────────────────────────────────

    /// Updates for one state identifier. Survives reconnects.
    pub fn subscribe(&self, id: Identifier) -> Subscription {
        self.inner.dispatcher.subscribe(id)
    }

    /// Every state update.
    pub fn subscribe_all(&self) -> Subscription {
        self.inner.dispatcher.subscribe_all()
    }

    /// Run `callback` for each update of `id` on a dedicated task.
    pub fn on_update<F>(&self, id: Identifier, callback: F) -> JoinHandle<()>
    where
        F: Fn(Arc<DispatchedUpdate>) + Send + 'static,
    {
        let mut subscription = self.subscribe(id);
        tokio::spawn(async move {
            while let Some(update) = subscription.recv().await {
                callback(update);
            }
        })
    }

    pub fn last_value(&self, id: &Identifier) -> Option<DispatchedValue> {
        self.inner.dispatcher.last_value(id)
    }

    // ── Commands ─────────────────────────────────────────────────────

    pub async fn send_command(
        &self,
        id: &Identifier,
        command: &str,
    ) -> Result<LlResponse, CommandError> {
        self.send_command_with_timeout(id, command, self.inner.config.timeouts.command)
            .await
    }

    pub async fn send_command_with_timeout(
        &self,
        id: &Identifier,
        command: &str,
        timeout: Duration,
    ) -> Result<LlResponse, CommandError> {
        self.inner.commands.send(id, command, timeout).await
    }

    // ── State accessors ──────────────────────────────────────────────

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.clone()
    }

    pub fn structure(&self) -> Option<Arc<StructureDocument>> {
        self.inner.dispatcher.structure()
    }

    pub fn session(&self) -> SessionLease {
        self.inner.published.load_full()
    }

    /// The terminal error that stopped the supervisor, if any.
    pub fn last_error(&self) -> Option<CoreError> {
        self.inner.last_error.load_full().map(|e| (*e).clone())
    }

    // ── Supervisor ───────────────────────────────────────────────────

    async fn supervise(self, run: CancellationToken, ready: oneshot::Sender<Result<(), CoreError>>) {
        let mut ready = Some(ready);
        let mut failures: u32 = 0;

        loop {
            let outcome = tokio::select! {
                biased;
                () = run.cancelled() => break,
                outcome = self.establish() => outcome,
            };

            match outcome {
                Ok(link) => {
                    failures = 0;
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Ok(()));
                    }
                    self.run_live(&link, &run).await;
                    self.teardown_link().await;
                    if run.is_cancelled() {
                        break;
                    }
                    warn!("link lost, reconnecting");
                    self.set_state(ConnectionState::Reconnecting { attempt: 1 }).await;
                }
                Err(err) => {
                    self.teardown_link().await;
                    if err.is_terminal() {
                        error!(error = %err, "connection failed permanently");
                        self.fail(err, &mut ready).await;
                        break;
                    }
                    failures += 1;
                    warn!(error = %err, failures, "connection attempt failed");

                    let reconnect = &self.inner.config.reconnect;
                    if reconnect.max_retries.is_some_and(|max| failures > max) {
                        let err = CoreError::from(ConnectionError::Unrecoverable {
                            attempts: failures - 1,
                            last: err.to_string(),
                        });
                        error!(error = %err, "reconnection limit reached, giving up");
                        self.fail(err, &mut ready).await;
                        break;
                    }

                    let delay = calculate_backoff(failures - 1, reconnect);
                    self.set_state(ConnectionState::Reconnecting { attempt: failures })
                        .await;
                    info!(
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        attempt = failures,
                        "waiting before reconnect"
                    );
                    tokio::select! {
                        biased;
                        () = run.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.teardown_link().await;
        debug!("supervisor exiting");
    }

    /// Open a link and walk it up to Live.
    async fn establish(&self) -> Result<Link, CoreError> {
        let config = &self.inner.config;
        let url = config.websocket_url()?;
        let sink: Arc<dyn EventSink> = self.inner.dispatcher.clone();
        let link = Link::open(&url, &config.transport(), sink).await?;
        self.inner.link.store(Some(Arc::new(link.clone())));
        info!(url = %url, "websocket open");

        let mut session = self.inner.session.lock().await;
        session.set_state(ConnectionState::Handshaking);
        let tokens = TokenManager::new(&link, &self.inner.token_settings);
        session.apply(tokens.begin_key_exchange().await?);
        session.set_state(ConnectionState::Authenticating);

        let reusable = session.valid_grant(Utc::now());
        let Some(cipher) = session.cipher_mut() else {
            return Err(CoreError::Protocol {
                message: "no session key after key exchange".into(),
            });
        };
        let update = match reusable {
            Some(grant) => match tokens.authenticate_with_token(cipher, &grant).await {
                Ok(update) => update,
                Err(e) => {
                    debug!(error = %e, "token login refused, falling back to password");
                    tokens.acquire_token(cipher).await?
                }
            },
            None => tokens.acquire_token(cipher).await?,
        };
        session.apply(update);

        session.set_state(ConnectionState::StructureLoading);
        self.load_structure(&link).await?;
        link.request(commands::ENABLE_STATUS_UPDATES, config.timeouts.command)
            .await?
            .into_result()?;
        session.set_state(ConnectionState::Live);
        info!("session live");
        Ok(link)
    }

    /// Download `LoxAPP3.json` unless the held copy is still current.
    async fn load_structure(&self, link: &Link) -> Result<(), CoreError> {
        let timeouts = &self.inner.config.timeouts;
        if let Some(current) = self.inner.dispatcher.structure() {
            match link.request(commands::STRUCTURE_VERSION, timeouts.command).await {
                Ok(resp)
                    if resp.is_success()
                        && resp.value_string().as_deref() == Some(current.last_modified()) =>
                {
                    debug!(version = current.last_modified(), "structure unchanged");
                    return Ok(());
                }
                Ok(resp) => debug!(version = ?resp.value_string(), "structure changed"),
                Err(e) => debug!(error = %e, "structure version check failed"),
            }
        }

        let bytes = link
            .request_file(commands::STRUCTURE_FILE, timeouts.structure)
            .await?;
        let doc = StructureDocument::load(&bytes)?;
        info!(
            controls = doc.control_count(),
            states = doc.state_count(),
            version = doc.last_modified(),
            "structure loaded"
        );
        if !doc.unresolved().is_empty() {
            warn!(count = doc.unresolved().len(), "structure has dangling references");
        }
        self.inner.dispatcher.set_structure(Arc::new(doc));
        Ok(())
    }

    /// Run keepalive and token refresh until the link dies or `run` is
    /// cancelled.
    async fn run_live(&self, link: &Link, run: &CancellationToken) {
        let live = run.child_token();
        let config = &self.inner.config;
        let keepalive = tokio::spawn(keepalive_task(
            link.clone(),
            config.keepalive_interval,
            config.keepalive_timeout,
            live.clone(),
        ));
        let refresh = tokio::spawn(self.clone().refresh_task(link.clone(), live.clone()));

        tokio::select! {
            biased;
            () = run.cancelled() => debug!("stopping live session"),
            () = link.closed() => warn!("link closed"),
        }
        live.cancel();
        let _ = keepalive.await;
        let _ = refresh.await;
    }

    async fn refresh_task(self, link: Link, cancel: CancellationToken) {
        let fraction = self.inner.config.token_refresh_fraction;
        loop {
            let schedule = self.inner.published.load().refresh_schedule;
            tokio::select! {
                biased;
                fired = wait_for_refresh(schedule, fraction, &cancel) => {
                    if !fired {
                        return;
                    }
                    debug!("proactive token refresh");
                }
                () = self.inner.refresh_now.notified() => debug!("reactive token refresh"),
            }

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                result = self.refresh_session(&link) => result,
            };
            if let Err(e) = result {
                warn!(error = %e, "token could not be renewed, dropping link");
                link.abort();
                return;
            }
        }
    }

    async fn refresh_session(&self, link: &Link) -> Result<(), CoreError> {
        let mut session = self.inner.session.lock().await;
        let Some(grant) = session.grant().cloned() else {
            return Ok(());
        };
        let Some(cipher) = session.cipher_mut() else {
            return Ok(());
        };
        let update = TokenManager::new(link, &self.inner.token_settings)
            .refresh_token(cipher, &grant)
            .await?;
        session.apply(update);
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────────

    async fn set_state(&self, state: ConnectionState) {
        self.inner.session.lock().await.set_state(state);
    }

    async fn teardown_link(&self) {
        if let Some(link) = self.inner.link.swap(None) {
            link.shutdown().await;
        }
        self.inner.session.lock().await.drop_cipher();
    }

    async fn fail(
        &self,
        err: CoreError,
        ready: &mut Option<oneshot::Sender<Result<(), CoreError>>>,
    ) {
        self.inner.last_error.store(Some(Arc::new(err.clone())));
        {
            let mut session = self.inner.session.lock().await;
            session.apply(SessionUpdate::Cleared);
            session.set_state(ConnectionState::Disconnected);
        }
        if let Some(tx) = ready.take() {
            let _ = tx.send(Err(err));
        }
    }
}

// ── Keepalive ────────────────────────────────────────────────────────

async fn keepalive_task(link: Link, every: Duration, wait: Duration, cancel: CancellationToken) {
    let mut acks = link.keepalive_acks();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut misses: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        acks.mark_unchanged();
        if let Err(e) = link.send_raw(commands::KEEPALIVE).await {
            warn!(error = %e, "keepalive write failed");
            link.abort();
            return;
        }

        let acked = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            acked = tokio::time::timeout(wait, acks.changed()) => acked,
        };
        match acked {
            Ok(Ok(())) => misses = 0,
            Ok(Err(_)) => return,
            Err(_) => {
                misses += 1;
                warn!(misses, "keepalive not acknowledged");
                if misses >= MAX_KEEPALIVE_MISSES {
                    warn!("keepalive lost, dropping link");
                    link.abort();
                    return;
                }
            }
        }
    }
}

// ── Backoff calculation ──────────────────────────────────────────────

/// `delay = min(initial * 2^attempt, max)` with ±25% random jitter.
fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = i32::try_from(attempt.min(30)).unwrap_or(30);
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);
    let capped = base.min(config.max_delay.as_secs_f64());
    let jitter = rand::thread_rng().gen_range(-0.25..=0.25);
    Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
}
