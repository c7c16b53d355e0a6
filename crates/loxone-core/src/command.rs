// ── Command sender ──
//
// Writes `jdev/sps/io/{id}/{cmd}` on the authenticated link and waits for
// the Miniserver's acknowledgment. It shares the link with the read path
// but never goes through it.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use loxone_api::codec::encode_command;
use loxone_api::{Error, Identifier, Link, LlResponse};
use tokio::sync::{Notify, watch};
use tracing::{debug, warn};

use crate::error::CommandError;
use crate::session::ConnectionState;

#[derive(Clone)]
pub struct CommandSender {
    state: watch::Receiver<ConnectionState>,
    link: Arc<ArcSwapOption<Link>>,
    refresh_now: Arc<Notify>,
}

impl CommandSender {
    pub(crate) fn new(
        state: watch::Receiver<ConnectionState>,
        link: Arc<ArcSwapOption<Link>>,
        refresh_now: Arc<Notify>,
    ) -> Self {
        Self {
            state,
            link,
            refresh_now,
        }
    }

    /// Send `command` to the control or state `target`.
    pub async fn send(
        &self,
        target: &Identifier,
        command: &str,
        timeout: Duration,
    ) -> Result<LlResponse, CommandError> {
        if !self.state.borrow().is_live() {
            return Err(CommandError::NotConnected);
        }
        let link = self.link.load_full().ok_or(CommandError::NotConnected)?;
        let path = encode_command(target, command).map_err(|e| CommandError::Invalid(e.to_string()))?;

        debug!(%target, command, "sending command");
        let response = link.request(&path, timeout).await.map_err(link_failure)?;

        response.into_result().map_err(|e| {
            if e.is_auth_expired() {
                warn!(error = %e, "command rejected for authorization, refreshing token");
                self.request_refresh();
            }
            match e {
                Error::Response { code, .. } => CommandError::Rejected { code },
                other => CommandError::Invalid(other.to_string()),
            }
        })
    }

    /// Wake a refresh task parked between refreshes. Nothing is stored
    /// when none is waiting: a refresh already in flight covers the
    /// rejection, and a link without a refresh task has no token to renew.
    fn request_refresh(&self) {
        self.refresh_now.notify_waiters();
    }
}

fn link_failure(err: Error) -> CommandError {
    match err {
        Error::Timeout { timeout_ms } => CommandError::Timeout { timeout_ms },
        lost if lost.is_transient() => CommandError::NotConnected,
        other => {
            debug!(error = %other, "command failed on the link");
            CommandError::Cancelled
        }
    }
}
