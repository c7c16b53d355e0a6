//! Websocket link to one Miniserver.
//!
//! A [`Link`] owns one socket. Writes are serialized behind a single
//! async mutex; a background reader task decodes frames, completes
//! pending requests, counts keepalive acknowledgements and hands event
//! tables to an [`EventSink`].
//!
//! Requests are registered in the correlator while the writer lock is
//! held, so correlator order always equals wire order. A text reply is
//! matched by its echoed `control` path and falls back to the oldest
//! pending text request; a binary file completes the oldest pending file
//! request.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::codec::{EventTable, Frame, FrameCodec, FrameKind, TableLayout, decode_event_table};
use crate::error::Error;
use crate::response::{LlResponse, normalize_control, parse_response};
use crate::transport::{TransportConfig, WsStream, connect_websocket};

// ── Event sink ───────────────────────────────────────────────────────

/// Receiver of unsolicited frames. Called on the reader task; must not block.
pub trait EventSink: Send + Sync + 'static {
    fn on_event_table(&self, table: EventTable);

    fn on_out_of_service(&self) {}
}

// ── Correlator ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyKind {
    Text,
    File,
}

#[derive(Debug)]
enum Reply {
    Text(LlResponse),
    File(Bytes),
}

struct Pending {
    id: u64,
    control: String,
    kind: ReplyKind,
    tx: oneshot::Sender<Result<Reply, Error>>,
}

#[derive(Default)]
struct Correlator {
    queue: VecDeque<Pending>,
}

impl Correlator {
    fn take_text(&mut self, control: &str) -> Option<Pending> {
        let wanted = normalize_control(control);
        let idx = self
            .queue
            .iter()
            .position(|p| normalize_control(&p.control) == wanted)
            .or_else(|| self.queue.iter().position(|p| p.kind == ReplyKind::Text))?;
        self.queue.remove(idx)
    }

    fn take_file(&mut self) -> Option<Pending> {
        let idx = self.queue.iter().position(|p| p.kind == ReplyKind::File)?;
        self.queue.remove(idx)
    }

    fn remove(&mut self, id: u64) {
        self.queue.retain(|p| p.id != id);
    }

    fn drain(&mut self) -> Vec<Pending> {
        self.queue.drain(..).collect()
    }
}

// ── Link ─────────────────────────────────────────────────────────────

type WsSink = SplitSink<WsStream, Message>;

struct LinkInner {
    writer: Mutex<WsSink>,
    pending: Mutex<Correlator>,
    next_id: AtomicU64,
    keepalive_tx: watch::Sender<u64>,
    dead: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to an open Miniserver link. Cheaply cloneable.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Connect to `url` and start the reader task.
    pub async fn open(
        url: &Url,
        transport: &TransportConfig,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, Error> {
        let stream = connect_websocket(url, transport).await?;
        Ok(Self::from_stream(stream, sink))
    }

    /// Wrap an already-open websocket.
    pub fn from_stream(stream: WsStream, sink: Arc<dyn EventSink>) -> Self {
        let (write, read) = stream.split();
        let (keepalive_tx, _) = watch::channel(0);
        let inner = Arc::new(LinkInner {
            writer: Mutex::new(write),
            pending: Mutex::new(Correlator::default()),
            next_id: AtomicU64::new(0),
            keepalive_tx,
            dead: CancellationToken::new(),
            reader: Mutex::new(None),
        });

        let task_inner = Arc::clone(&inner);
        let handle = tokio::spawn(async move {
            read_loop(read, &task_inner, sink.as_ref()).await;
            task_inner.dead.cancel();
            for pending in task_inner.pending.lock().await.drain() {
                let _ = pending.tx.send(Err(Error::Cancelled));
            }
            tracing::debug!("link reader exited");
        });
        if let Ok(mut slot) = inner.reader.try_lock() {
            *slot = Some(handle);
        }

        Self { inner }
    }

    /// Send a plain request and await its text reply.
    pub async fn request(&self, command: &str, timeout: Duration) -> Result<LlResponse, Error> {
        self.request_matching(command, command, timeout).await
    }

    /// Send `wire` and match the reply against `expected_control`.
    ///
    /// Used for encrypted commands, whose reply echoes the plaintext path.
    pub async fn request_matching(
        &self,
        wire: &str,
        expected_control: &str,
        timeout: Duration,
    ) -> Result<LlResponse, Error> {
        match self
            .exchange(wire, expected_control, ReplyKind::Text, timeout)
            .await?
        {
            Reply::Text(response) => Ok(response),
            Reply::File(_) => Err(Error::Deserialization {
                message: format!("expected a text reply to '{expected_control}'"),
                body: String::new(),
            }),
        }
    }

    /// Request a file (e.g. the structure document) and await its bytes.
    pub async fn request_file(&self, path: &str, timeout: Duration) -> Result<Bytes, Error> {
        match self.exchange(path, path, ReplyKind::File, timeout).await? {
            Reply::File(bytes) => Ok(bytes),
            Reply::Text(response) => Err(Error::Response {
                control: response.control,
                code: response.code,
            }),
        }
    }

    /// Write a text message without awaiting a reply.
    pub async fn send_raw(&self, text: &str) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::LinkClosed);
        }
        let mut writer = self.inner.writer.lock().await;
        self.write(&mut writer, text).await
    }

    /// Counter bumped on every Keepalive frame.
    pub fn keepalive_acks(&self) -> watch::Receiver<u64> {
        self.inner.keepalive_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.dead.is_cancelled()
    }

    /// Resolves once the link is dead.
    pub async fn closed(&self) {
        self.inner.dead.cancelled().await;
    }

    /// Mark the link dead without closing the socket gracefully.
    pub fn abort(&self) {
        self.inner.dead.cancel();
    }

    /// Close the socket, stop the reader and cancel pending requests.
    pub async fn shutdown(&self) {
        self.inner.dead.cancel();
        {
            let mut writer = self.inner.writer.lock().await;
            let _ = writer.close().await;
        }
        if let Some(handle) = self.inner.reader.lock().await.take() {
            let _ = handle.await;
        }
        for pending in self.inner.pending.lock().await.drain() {
            let _ = pending.tx.send(Err(Error::Cancelled));
        }
    }

    async fn exchange(
        &self,
        wire: &str,
        expected_control: &str,
        kind: ReplyKind,
        timeout: Duration,
    ) -> Result<Reply, Error> {
        if self.is_closed() {
            return Err(Error::LinkClosed);
        }
        let (tx, rx) = oneshot::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut writer = self.inner.writer.lock().await;
            self.inner.pending.lock().await.queue.push_back(Pending {
                id,
                control: expected_control.to_owned(),
                kind,
                tx,
            });
            if let Err(e) = self.write(&mut writer, wire).await {
                self.inner.pending.lock().await.remove(id);
                return Err(e);
            }
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                self.inner.pending.lock().await.remove(id);
                Err(Error::timeout(timeout))
            }
        }
    }

    async fn write(&self, writer: &mut WsSink, text: &str) -> Result<(), Error> {
        tracing::trace!(len = text.len(), "link write");
        writer.send(Message::text(text.to_owned())).await.map_err(|e| {
            self.inner.dead.cancel();
            Error::WebSocketClosed {
                code: 1006,
                reason: e.to_string(),
            }
        })
    }
}

// ── Reader ───────────────────────────────────────────────────────────

async fn read_loop(mut read: SplitStream<WsStream>, inner: &LinkInner, sink: &dyn EventSink) {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();

    loop {
        let message = tokio::select! {
            biased;
            () = inner.dead.cancelled() => return,
            message = read.next() => message,
        };
        match message {
            Some(Ok(Message::Binary(data))) => buf.extend_from_slice(&data),
            Some(Ok(Message::Text(text))) => buf.extend_from_slice(text.as_bytes()),
            Some(Ok(Message::Close(frame))) => {
                if let Some(ref cf) = frame {
                    tracing::info!(code = %cf.code, reason = %cf.reason, "link closed by Miniserver");
                } else {
                    tracing::info!("link closed by Miniserver");
                }
                return;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "link read failed");
                return;
            }
            None => {
                tracing::info!("link stream ended");
                return;
            }
        }

        loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => {
                    if !handle_frame(frame, inner, sink).await {
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => tracing::warn!(error = %e, "discarding malformed frame"),
            }
        }
    }
}

/// Returns `false` when the link must stop.
async fn handle_frame(frame: Frame, inner: &LinkInner, sink: &dyn EventSink) -> bool {
    match frame.kind {
        FrameKind::Text => {
            let Some(text) = frame.text() else {
                tracing::warn!("text frame is not UTF-8");
                return true;
            };
            match parse_response(text) {
                Ok(response) => {
                    let waiter = inner.pending.lock().await.take_text(&response.control);
                    if let Some(pending) = waiter {
                        let reply = if pending.kind == ReplyKind::File && !response.is_success() {
                            Err(Error::Response {
                                control: response.control,
                                code: response.code,
                            })
                        } else {
                            Ok(Reply::Text(response))
                        };
                        let _ = pending.tx.send(reply);
                    } else {
                        tracing::debug!(control = %response.control, "unsolicited text reply");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "unparseable text frame"),
            }
        }
        FrameKind::BinaryFile => {
            let waiter = inner.pending.lock().await.take_file();
            match waiter {
                Some(pending) => {
                    let _ = pending.tx.send(Ok(Reply::File(frame.payload)));
                }
                None => tracing::debug!(len = frame.payload.len(), "unsolicited file"),
            }
        }
        FrameKind::EventTableValues
        | FrameKind::EventTableText
        | FrameKind::EventTableValuesExtended => {
            if let Some(layout) = TableLayout::for_kind(frame.kind) {
                sink.on_event_table(decode_event_table(frame.payload, layout, Utc::now()));
            }
        }
        FrameKind::Keepalive => {
            inner.keepalive_tx.send_modify(|n| *n = n.wrapping_add(1));
        }
        FrameKind::OutOfService => {
            tracing::warn!("Miniserver is out of service");
            sink.on_out_of_service();
            return false;
        }
        FrameKind::Unknown(kind) => {
            tracing::debug!(kind, len = frame.payload.len(), "ignoring unknown frame kind");
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(id: u64, control: &str, kind: ReplyKind) -> (Pending, oneshot::Receiver<Result<Reply, Error>>) {
        let (tx, rx) = oneshot::channel();
        (
            Pending {
                id,
                control: control.into(),
                kind,
                tx,
            },
            rx,
        )
    }

    #[test]
    fn text_reply_prefers_matching_control() {
        let mut c = Correlator::default();
        c.queue.push_back(pending(1, "jdev/sys/getkey", ReplyKind::Text).0);
        c.queue.push_back(pending(2, "jdev/sps/io/a/on", ReplyKind::Text).0);

        assert_eq!(c.take_text("dev/sps/io/a/on").map(|p| p.id), Some(2));
        assert_eq!(c.take_text("something/else").map(|p| p.id), Some(1));
        assert!(c.take_text("x").is_none());
    }

    #[test]
    fn file_reply_skips_text_waiters() {
        let mut c = Correlator::default();
        c.queue.push_back(pending(1, "jdev/sps/io/a/on", ReplyKind::Text).0);
        c.queue.push_back(pending(2, "data/LoxAPP3.json", ReplyKind::File).0);

        assert_eq!(c.take_file().map(|p| p.id), Some(2));
        assert_eq!(c.queue.len(), 1);
    }

    #[test]
    fn fallback_never_hands_text_to_file_waiter() {
        let mut c = Correlator::default();
        c.queue.push_back(pending(1, "data/LoxAPP3.json", ReplyKind::File).0);
        assert!(c.take_text("jdev/sps/enablebinstatusupdate").is_none());
        assert_eq!(c.take_text("data/LoxAPP3.json").map(|p| p.id), Some(1));
    }

    #[test]
    fn remove_and_drain() {
        let mut c = Correlator::default();
        c.queue.push_back(pending(1, "a", ReplyKind::Text).0);
        c.queue.push_back(pending(2, "b", ReplyKind::Text).0);
        c.remove(1);
        assert_eq!(c.drain().len(), 1);
        assert!(c.queue.is_empty());
    }
}
