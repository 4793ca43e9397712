//! Live fan-out hub for per-conversation WebSocket subscriptions.
//!
//! Each subscriber is registered under the `(user_id, peer_id)` pair it is
//! watching and owns a bounded send buffer. Publishing never blocks: a full
//! buffer evicts the subscriber (policy violation close), and a second
//! subscription for the same pair replaces the first (going away close).
//! Delivery is best effort; the durable copy of every message travels
//! through the queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::timeout;
use uuid::Uuid;

/// Capacity of each subscriber's send buffer.
const SEND_BUFFER_SIZE: usize = 16;

/// Upper bound for a single WebSocket write.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a subscriber's connection is being closed by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer subscription took over this conversation.
    Replaced,
    /// The subscriber stopped draining its send buffer.
    SlowConsumer,
}

impl CloseReason {
    /// WebSocket close code: 1001 (going away) or 1008 (policy violation).
    pub fn close_code(self) -> u16 {
        match self {
            Self::Replaced => 1001,
            Self::SlowConsumer => 1008,
        }
    }

    pub fn close_text(self) -> &'static str {
        match self {
            Self::Replaced => "new subscription established",
            Self::SlowConsumer => "connection too slow to receive messages",
        }
    }
}

/// The ordered conversation pair a subscriber is watching: the subscriber's
/// own user id first, then the peer whose messages it wants live.
type ConversationKey = (i64, i64);

struct Subscriber {
    id: Uuid,
    user_id: i64,
    peer_id: i64,
    frames: mpsc::Sender<String>,
    /// Taken by the first close attempt; later attempts are no-ops, so a
    /// slow-consumer eviction racing a replacement closes exactly once.
    close: StdMutex<Option<oneshot::Sender<CloseReason>>>,
}

impl Subscriber {
    fn close(&self, reason: CloseReason) {
        let sender = match self.close.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sender) = sender {
            let _ = sender.send(reason);
        }
    }
}

/// A registered subscription handed back by [`Hub::attach`].
///
/// Holds the receiving ends of the subscriber's buffer and close signal;
/// dropping it without [`Hub::detach`] leaves a dead map entry until the
/// next replacement, so connection drivers detach on exit.
pub struct Subscription {
    subscriber: Arc<Subscriber>,
    frames: mpsc::Receiver<String>,
    closed: oneshot::Receiver<CloseReason>,
}

impl Subscription {
    /// Next buffered frame, or `None` once the buffer is closed.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    /// Resolves when the hub closes this subscription.
    pub async fn closed(&mut self) -> Option<CloseReason> {
        (&mut self.closed).await.ok()
    }
}

pub struct Hub {
    buffer_size: usize,
    subscribers: RwLock<HashMap<ConversationKey, Arc<Subscriber>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            buffer_size: SEND_BUFFER_SIZE,
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscription for `(user_id, peer_id)`, replacing and
    /// closing any existing subscriber for the same pair.
    pub async fn attach(&self, user_id: i64, peer_id: i64) -> Subscription {
        let (frames_tx, frames_rx) = mpsc::channel(self.buffer_size);
        let (close_tx, close_rx) = oneshot::channel();

        let subscriber = Arc::new(Subscriber {
            id: Uuid::new_v4(),
            user_id,
            peer_id,
            frames: frames_tx,
            close: StdMutex::new(Some(close_tx)),
        });

        let previous = {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert((user_id, peer_id), subscriber.clone())
        };

        if let Some(previous) = previous {
            tracing::info!(
                user_id = user_id,
                peer_id = peer_id,
                "replacing existing subscription"
            );
            previous.close(CloseReason::Replaced);
        }

        tracing::info!(user_id = user_id, peer_id = peer_id, "user subscribed");

        Subscription {
            subscriber,
            frames: frames_rx,
            closed: close_rx,
        }
    }

    /// Remove the subscription's map entry.
    ///
    /// The entry is only removed when it still belongs to this subscription;
    /// a subscriber that was already replaced must not evict its successor.
    pub async fn detach(&self, subscription: &Subscription) {
        let subscriber = &subscription.subscriber;
        let key = (subscriber.user_id, subscriber.peer_id);

        let mut subscribers = self.subscribers.write().await;
        if let Some(current) = subscribers.get(&key) {
            if current.id == subscriber.id {
                subscribers.remove(&key);
                tracing::info!(user_id = subscriber.user_id, "user disconnected");
            }
        }
    }

    /// Push the live copy of a message from `sender_id` to `receiver_id`.
    ///
    /// The recipient subscribes under its own id paired with the peer it is
    /// talking to, so the lookup key is `(receiver_id, sender_id)`. Without
    /// a matching subscriber this is a no-op; the message is still durable
    /// via the queue. A full buffer evicts the subscriber and drops the
    /// frame.
    pub async fn publish_to_user(&self, sender_id: i64, receiver_id: i64, frame: String) {
        let subscribers = self.subscribers.read().await;
        let Some(subscriber) = subscribers.get(&(receiver_id, sender_id)) else {
            return;
        };

        match subscriber.frames.try_send(frame) {
            Ok(()) => {
                tracing::debug!(user_id = receiver_id, "message published to user");
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    user_id = receiver_id,
                    peer_id = sender_id,
                    "send buffer full, evicting slow subscriber"
                );
                subscriber.close(CloseReason::SlowConsumer);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // The connection driver already stopped; unregistration is
                // in flight.
            }
        }
    }

    /// Drive an upgraded WebSocket connection until it closes or the hub
    /// evicts it. Inbound frames are ignored apart from close detection.
    pub async fn run_connection(&self, socket: WebSocket, user_id: i64, peer_id: i64) {
        let mut subscription = self.attach(user_id, peer_id).await;
        let (mut ws_sender, mut ws_receiver) = socket.split();

        loop {
            tokio::select! {
                frame = subscription.frames.recv() => {
                    let Some(frame) = frame else { break };
                    match timeout(WRITE_TIMEOUT, ws_sender.send(WsMessage::Text(frame.into()))).await {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            tracing::warn!(user_id = user_id, error = %e, "failed to write message");
                            break;
                        }
                        Err(_) => {
                            tracing::warn!(user_id = user_id, "write timed out");
                            break;
                        }
                    }
                }
                reason = &mut subscription.closed => {
                    if let Ok(reason) = reason {
                        let frame = CloseFrame {
                            code: reason.close_code(),
                            reason: reason.close_text().into(),
                        };
                        let _ = ws_sender.send(WsMessage::Close(Some(frame))).await;
                    }
                    break;
                }
                inbound = ws_receiver.next() => {
                    match inbound {
                        Some(Ok(WsMessage::Close(_))) | None => {
                            tracing::info!(user_id = user_id, "connection closed");
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::debug!(user_id = user_id, error = %e, "websocket receive error");
                            break;
                        }
                        // Server-push only; client frames carry no meaning.
                        Some(Ok(_)) => {}
                    }
                }
            }
        }

        self.detach(&subscription).await;
    }

    /// Number of currently registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let hub = Hub::new();
        // User 2 subscribes to its conversation with user 1.
        let mut subscription = hub.attach(2, 1).await;

        hub.publish_to_user(1, 2, "hello".to_string()).await;

        assert_eq!(subscription.next_frame().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_is_noop() {
        let hub = Hub::new();
        let mut subscription = hub.attach(2, 1).await;

        // Wrong direction: user 2 sending to user 1 targets (1, 2).
        hub.publish_to_user(2, 1, "misdirected".to_string()).await;

        assert!(subscription.frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_attach_replaces_previous() {
        let hub = Hub::new();
        let mut first = hub.attach(2, 1).await;
        let _second = hub.attach(2, 1).await;

        let reason = first.closed().await;
        assert_eq!(reason, Some(CloseReason::Replaced));
        assert_eq!(reason.unwrap().close_code(), 1001);
        assert_eq!(hub.subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn test_detach_after_replacement_keeps_successor() {
        let hub = Hub::new();
        let first = hub.attach(2, 1).await;
        let mut second = hub.attach(2, 1).await;

        // The replaced subscriber's cleanup must not evict its successor.
        hub.detach(&first).await;
        assert_eq!(hub.subscriber_count().await, 1);

        hub.publish_to_user(1, 2, "still here".to_string()).await;
        assert_eq!(second.next_frame().await.as_deref(), Some("still here"));
    }

    #[tokio::test]
    async fn test_detach_removes_own_entry() {
        let hub = Hub::new();
        let subscription = hub.attach(2, 1).await;
        assert_eq!(hub.subscriber_count().await, 1);

        hub.detach(&subscription).await;
        assert_eq!(hub.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_evicted_on_overflow() {
        let hub = Hub::new();
        let mut subscription = hub.attach(2, 1).await;

        // Fill the buffer without draining it, then overflow it.
        for i in 0..SEND_BUFFER_SIZE {
            hub.publish_to_user(1, 2, format!("msg-{i}")).await;
        }
        hub.publish_to_user(1, 2, "overflow".to_string()).await;

        assert_eq!(subscription.closed().await, Some(CloseReason::SlowConsumer));

        // The buffered frames survive; the overflowing one was dropped.
        let mut received = 0;
        while subscription.frames.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SEND_BUFFER_SIZE);

        // Further publishes to the evicted-but-not-yet-detached entry must
        // not panic or close twice.
        hub.publish_to_user(1, 2, "late".to_string()).await;
    }

    #[tokio::test]
    async fn test_subscriptions_are_per_conversation() {
        let hub = Hub::new();
        let mut with_alice = hub.attach(3, 1).await;
        let mut with_bob = hub.attach(3, 2).await;

        hub.publish_to_user(1, 3, "from alice".to_string()).await;
        hub.publish_to_user(2, 3, "from bob".to_string()).await;

        assert_eq!(with_alice.next_frame().await.as_deref(), Some("from alice"));
        assert_eq!(with_bob.next_frame().await.as_deref(), Some("from bob"));
    }
}
