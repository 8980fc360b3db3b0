#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(
    unused,
    unreachable_pub,
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]

//! Notification bus for the seedbank server.
//!
//! Components publish typed [`Notification`]s addressed to a [`Topic`]; the
//! broker bridge subscribes once and forwards each envelope to the queue the
//! topic resolves to. Internally the bus uses `tokio::broadcast` with a bounded
//! replay ring; a subscriber that lags behind the broadcast channel resumes
//! from the ring instead of silently skipping ahead.

pub mod notification;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use tracing::warn;

pub use notification::{Notification, Topic, UploadAction};

/// Identifier assigned to each published notification.
pub type NotificationId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 256;

/// Envelope carrying a notification with its routing and sequencing metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    /// Monotonic identifier assigned by the bus.
    pub id: NotificationId,
    /// Publication time.
    pub timestamp: DateTime<Utc>,
    /// Destination of the notification.
    pub topic: Topic,
    /// Notification payload.
    pub notification: Notification,
}

struct Ring {
    next_id: NotificationId,
    entries: VecDeque<NotificationEnvelope>,
}

/// Shared publish/subscribe hub for outbound notifications.
#[derive(Clone)]
pub struct NotificationBus {
    sender: Sender<NotificationEnvelope>,
    ring: Arc<Mutex<Ring>>,
    replay_capacity: usize,
}

impl NotificationBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "notification bus capacity must be positive");
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            ring: Arc::new(Mutex::new(Ring {
                next_id: 1,
                entries: VecDeque::with_capacity(capacity),
            })),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a notification to `topic`, assigning it a sequential identifier.
    pub fn publish(&self, topic: Topic, notification: Notification) -> NotificationId {
        // Ids, ring order and broadcast order must agree for lag recovery.
        let mut ring = lock(&self.ring);
        let id = ring.next_id;
        ring.next_id += 1;
        let envelope = NotificationEnvelope {
            id,
            timestamp: Utc::now(),
            topic,
            notification,
        };
        if ring.entries.len() == self.replay_capacity {
            ring.entries.pop_front();
        }
        ring.entries.push_back(envelope.clone());
        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to notifications published from now on.
    #[must_use]
    pub fn subscribe(&self) -> NotificationStream {
        NotificationStream {
            backlog: VecDeque::new(),
            receiver: self.sender.subscribe(),
            ring: Arc::clone(&self.ring),
            last_seen: None,
        }
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(ring: &Mutex<Ring>) -> MutexGuard<'_, Ring> {
    ring.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered notifications of one subscriber.
pub struct NotificationStream {
    backlog: VecDeque<NotificationEnvelope>,
    receiver: Receiver<NotificationEnvelope>,
    ring: Arc<Mutex<Ring>>,
    last_seen: Option<NotificationId>,
}

impl NotificationStream {
    /// Receive the next notification.
    ///
    /// Returns `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<NotificationEnvelope> {
        loop {
            if let Some(envelope) = self.backlog.pop_front() {
                return Some(self.seen(envelope));
            }
            match self.receiver.recv().await {
                Ok(envelope) if self.is_replayed(&envelope) => {}
                Ok(envelope) => return Some(self.seen(envelope)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => self.recover(skipped),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next notification if one is already available.
    pub fn try_next(&mut self) -> Option<NotificationEnvelope> {
        loop {
            if let Some(envelope) = self.backlog.pop_front() {
                return Some(self.seen(envelope));
            }
            match self.receiver.try_recv() {
                Ok(envelope) if self.is_replayed(&envelope) => {}
                Ok(envelope) => return Some(self.seen(envelope)),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => self.recover(skipped),
                Err(_) => return None,
            }
        }
    }

    fn seen(&mut self, envelope: NotificationEnvelope) -> NotificationEnvelope {
        self.last_seen = Some(envelope.id);
        envelope
    }

    fn is_replayed(&self, envelope: &NotificationEnvelope) -> bool {
        self.last_seen.is_some_and(|last| envelope.id <= last)
    }

    fn recover(&mut self, skipped: u64) {
        let ring = lock(&self.ring);
        let after = self.last_seen.unwrap_or(0);
        let first_kept = ring.entries.front().map(|envelope| envelope.id);
        self.backlog
            .extend(ring.entries.iter().filter(|envelope| envelope.id > after).cloned());
        let lost = first_kept.map_or(0, |first| first.saturating_sub(after + 1));
        if self.last_seen.is_some() && lost > 0 {
            warn!(skipped, lost, "notification subscriber lagged past the replay ring");
        } else {
            warn!(skipped, "notification subscriber lagged; replaying buffered notifications");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;

    const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

    fn sample_upload(id: usize) -> Notification {
        Notification::Upload {
            upload_action: UploadAction::Finished,
            info_hash: format!("{id:040x}"),
            message: "Upload finished".to_string(),
        }
    }

    #[test]
    fn ids_are_sequential() {
        let bus = NotificationBus::with_capacity(16);
        let ids: Vec<_> = (0..5)
            .map(|i| bus.publish(Topic::Notify, sample_upload(i)))
            .collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn subscribers_only_see_later_notifications() {
        let bus = NotificationBus::with_capacity(16);
        let _ = bus.publish(Topic::Notify, sample_upload(0));
        let mut stream = bus.subscribe();
        assert!(stream.try_next().is_none());
        let id = bus.publish(Topic::Notify, sample_upload(1));
        assert_eq!(stream.try_next().map(|envelope| envelope.id), Some(id));
    }

    #[test]
    fn lagged_subscriber_resumes_from_the_replay_ring() {
        let bus = NotificationBus::with_capacity(4);
        let mut stream = bus.subscribe();
        let _ = bus.publish(Topic::Notify, sample_upload(0));
        assert_eq!(stream.try_next().map(|envelope| envelope.id), Some(1));

        for i in 1..7 {
            let _ = bus.publish(Topic::Stats, sample_upload(i));
        }
        let ids: Vec<_> = std::iter::from_fn(|| stream.try_next())
            .map(|envelope| envelope.id)
            .collect();
        assert_eq!(ids, vec![4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn lagged_subscriber_never_sees_duplicates() {
        let bus = NotificationBus::with_capacity(2);
        let mut stream = bus.subscribe();
        for i in 0..5 {
            let _ = bus.publish(Topic::Notify, sample_upload(i));
        }
        let first = stream.next().await.map(|envelope| envelope.id);
        let second = stream.next().await.map(|envelope| envelope.id);
        assert_eq!((first, second), (Some(4), Some(5)));
        assert!(stream.try_next().is_none());

        let _ = bus.publish(Topic::Notify, sample_upload(5));
        assert_eq!(stream.next().await.map(|envelope| envelope.id), Some(6));
    }

    #[test]
    fn try_next_returns_none_when_idle() {
        let bus = NotificationBus::new();
        let mut stream = bus.subscribe();
        assert!(stream.try_next().is_none());

        let _ = bus.publish(
            Topic::Reply("reply-queue".to_string()),
            Notification::PingResponse {
                correlation_id: "abc".to_string(),
            },
        );
        let envelope = stream.try_next();
        assert!(matches!(
            envelope.map(|item| item.topic),
            Some(Topic::Reply(queue)) if queue == "reply-queue"
        ));
    }

    #[tokio::test]
    async fn load_test_does_not_stall_publishers() {
        let bus = Arc::new(NotificationBus::with_capacity(512));
        let mut stream = bus.subscribe();

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for i in 0..500 {
                    let publish_bus = bus.clone();
                    timeout(PUBLISH_TIMEOUT, async move {
                        let _ = publish_bus.publish(Topic::Notify, sample_upload(i));
                    })
                    .await
                    .expect("publish timed out");
                }
            })
        };

        let consumer = task::spawn(async move {
            let mut ids = HashSet::new();
            while ids.len() < 500 {
                if let Some(envelope) = stream.next().await {
                    ids.insert(envelope.id);
                }
            }
            ids
        });

        publisher.await.expect("publisher task panicked");
        let ids = consumer.await.expect("consumer task panicked");
        assert_eq!(ids.len(), 500);
    }
}
