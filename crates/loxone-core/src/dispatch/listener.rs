// ── Listener channels ──
//
// One broadcast channel per subscription; the dispatcher holds the only
// sender. A full channel overwrites its oldest entry and the receiver
// learns how many it missed through `Lagged`, so pushing never blocks.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::FutureExt as _;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt as _};

use super::DispatchedUpdate;

/// Sending half kept by the dispatcher.
pub(crate) type Listener = broadcast::Sender<Arc<DispatchedUpdate>>;

/// A fresh listener. Capacity is rounded up to a power of two.
pub(crate) fn channel(capacity: usize) -> (Listener, Subscription) {
    let (tx, rx) = broadcast::channel(capacity.max(1));
    let subscription = Subscription {
        inner: BroadcastStream::new(rx),
        dropped: 0,
    };
    (tx, subscription)
}

/// The subscription behind `listener` has been dropped.
pub(crate) fn is_closed(listener: &Listener) -> bool {
    listener.receiver_count() == 0
}

/// Receiving end of a subscription.
///
/// Dropping it unsubscribes; the dispatcher prunes the sender on its next
/// dispatch.
pub struct Subscription {
    inner: BroadcastStream<Arc<DispatchedUpdate>>,
    dropped: u64,
}

impl Subscription {
    /// Next update, or `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Arc<DispatchedUpdate>> {
        self.next().await
    }

    /// Next queued update without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<DispatchedUpdate>> {
        self.next().now_or_never().flatten()
    }

    /// Updates discarded because this subscriber fell behind. Counted as
    /// the gap is observed, i.e. on the next receive after an overflow.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Stream for Subscription {
    type Item = Arc<DispatchedUpdate>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(update))) => return Poll::Ready(Some(update)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                    self.dropped += missed;
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("dropped", &self.dropped)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use tokio_test::{assert_pending, assert_ready, assert_ready_eq, task};

    use super::*;
    use crate::dispatch::DispatchedValue;

    fn update(value: f64) -> Arc<DispatchedUpdate> {
        Arc::new(DispatchedUpdate {
            id: "0f1e2d3c-0000-0002-ffff000000000002".parse().unwrap(),
            control: None,
            role: None,
            value: DispatchedValue::Number(value),
            received_at: Utc::now(),
        })
    }

    #[test]
    fn send_wakes_a_parked_receiver() {
        let (tx, sub) = channel(4);
        let mut sub = task::spawn(sub);

        assert_pending!(sub.poll_next());
        tx.send(update(1.0)).unwrap();
        assert!(sub.is_woken());

        let got = assert_ready!(sub.poll_next()).unwrap();
        assert_eq!(got.value, DispatchedValue::Number(1.0));
    }

    #[test]
    fn closed_sender_ends_the_stream_after_draining() {
        let (tx, sub) = channel(4);
        let mut sub = task::spawn(sub);

        tx.send(update(2.0)).unwrap();
        drop(tx);

        assert!(assert_ready!(sub.poll_next()).is_some());
        assert_ready_eq!(sub.poll_next(), None);
    }

    #[test]
    fn lag_is_counted_and_newest_kept() {
        let (tx, mut sub) = channel(2);
        for i in 0..5 {
            tx.send(update(f64::from(i))).unwrap();
        }

        let mut seen = Vec::new();
        while let Some(update) = sub.try_recv() {
            seen.push(update.value.as_f64().unwrap());
        }
        assert_eq!(seen, vec![3.0, 4.0]);
        assert_eq!(sub.dropped(), 3);
    }

    #[test]
    fn dropping_the_subscription_closes_the_listener() {
        let (tx, sub) = channel(2);
        assert!(!is_closed(&tx));
        drop(sub);
        assert!(is_closed(&tx));
    }
}
