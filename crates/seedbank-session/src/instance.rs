//! One supervised worker and its queues.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::ipc::{QueueItem, SessionCommand, SessionReport};
use crate::launcher::{WorkerLink, WorkerProcess};
use crate::params::SessionRole;

/// Bounded wait of one outbound queue read.
pub const QUEUE_TIMEOUT: Duration = Duration::from_millis(500);

/// Outbound side of an instance, usable without holding the registry.
#[derive(Clone)]
pub struct ReportChannel {
    key: String,
    receiver: Arc<Mutex<mpsc::Receiver<QueueItem>>>,
    torrent_count: Arc<AtomicUsize>,
}

impl ReportChannel {
    /// Session key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait up to [`QUEUE_TIMEOUT`] for one report. `update` reports refresh
    /// the torrent count and are not returned.
    pub async fn check(&self) -> Option<SessionReport> {
        let mut receiver = self.receiver.lock().await;
        let item = match tokio::time::timeout(QUEUE_TIMEOUT, receiver.recv()).await {
            Ok(Some(item)) => item,
            Ok(None) | Err(_) => return None,
        };
        drop(receiver);
        match SessionReport::from_item(item) {
            Ok(SessionReport::Update(update)) => {
                self.torrent_count
                    .store(update.torrent_count, Ordering::Release);
                None
            }
            Ok(report) => Some(report),
            Err(err) => {
                warn!(key = %self.key, error = %err, "discarding unreadable report");
                None
            }
        }
    }
}

/// A supervised worker.
pub struct SessionInstance {
    key: String,
    role: SessionRole,
    inbound: mpsc::Sender<QueueItem>,
    reports: ReportChannel,
    process: Box<dyn WorkerProcess>,
    started: Instant,
    stop_requested: bool,
}

impl SessionInstance {
    /// Wrap a launched worker.
    #[must_use]
    pub fn new(key: impl Into<String>, role: SessionRole, link: WorkerLink) -> Self {
        let key = key.into();
        Self {
            reports: ReportChannel {
                key: key.clone(),
                receiver: Arc::new(Mutex::new(link.outbound)),
                torrent_count: Arc::new(AtomicUsize::new(0)),
            },
            key,
            role,
            inbound: link.inbound,
            process: link.process,
            started: Instant::now(),
            stop_requested: false,
        }
    }

    /// Session key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Worker role.
    #[must_use]
    pub const fn role(&self) -> SessionRole {
        self.role
    }

    /// Whether this is the server session.
    #[must_use]
    pub fn is_server(&self) -> bool {
        self.role == SessionRole::Server
    }

    /// Time since the instance was started.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.started.elapsed()
    }

    /// Torrent count from the latest `update` report.
    #[must_use]
    pub fn torrent_count(&self) -> usize {
        self.reports.torrent_count.load(Ordering::Acquire)
    }

    /// Whether the worker reported loaded torrents.
    #[must_use]
    pub fn has_active_torrents(&self) -> bool {
        self.torrent_count() > 0
    }

    /// Whether a stop was requested.
    #[must_use]
    pub const fn is_stopping(&self) -> bool {
        self.stop_requested
    }

    /// Queue a command without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::QueueFull`] or [`SessionError::QueueClosed`].
    pub fn send(&self, item: QueueItem) -> SessionResult<()> {
        self.inbound.try_send(item).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SessionError::QueueFull {
                key: self.key.clone(),
            },
            mpsc::error::TrySendError::Closed(_) => SessionError::QueueClosed {
                key: self.key.clone(),
            },
        })
    }

    /// Ask the worker to stop; sent at most once.
    pub fn request_stop(&mut self) {
        if self.stop_requested {
            return;
        }
        self.stop_requested = true;
        let sent = SessionCommand::Stop.to_item().and_then(|item| self.send(item));
        match sent {
            Ok(()) => info!(key = %self.key, "stop requested"),
            Err(err) => warn!(key = %self.key, error = %err, "stop request not delivered"),
        }
    }

    /// Outbound channel handle.
    #[must_use]
    pub fn reports(&self) -> ReportChannel {
        self.reports.clone()
    }

    /// One bounded read of the outbound queue.
    pub async fn check_queue(&self) -> Option<SessionReport> {
        self.reports.check().await
    }

    /// Whether the worker has not exited.
    pub fn is_alive(&mut self) -> bool {
        self.process.is_alive()
    }

    /// Wait for the worker to exit.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Process`] when waiting fails.
    pub async fn join(&mut self) -> SessionResult<()> {
        debug!(key = %self.key, "waiting for worker to exit");
        self.process.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{UpdateReport, kind};
    use async_trait::async_trait;

    struct Idle;

    #[async_trait]
    impl WorkerProcess for Idle {
        fn is_alive(&mut self) -> bool {
            true
        }

        async fn wait(&mut self) -> SessionResult<()> {
            Ok(())
        }
    }

    fn instance() -> (SessionInstance, mpsc::Receiver<QueueItem>, mpsc::Sender<QueueItem>) {
        let (inbound, inbound_rx) = mpsc::channel(1);
        let (outbound_tx, outbound) = mpsc::channel(8);
        let link = WorkerLink {
            inbound,
            outbound,
            process: Box::new(Idle),
        };
        (
            SessionInstance::new("upload_", SessionRole::Client, link),
            inbound_rx,
            outbound_tx,
        )
    }

    #[tokio::test]
    async fn updates_refresh_the_count_and_are_swallowed() {
        let (instance, _inbound, outbound) = instance();
        let update = SessionReport::Update(UpdateReport { torrent_count: 3 })
            .to_item()
            .expect("encode");
        outbound.send(update).await.expect("send");
        outbound
            .send(QueueItem::new(kind::WATCHER_EXITED, serde_json::Value::Bool(true)))
            .await
            .expect("send");

        assert_eq!(instance.check_queue().await, None);
        assert_eq!(instance.torrent_count(), 3);
        assert_eq!(
            instance.check_queue().await,
            Some(SessionReport::WatcherExited)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_read_times_out() {
        let (instance, _inbound, _outbound) = instance();
        let started = Instant::now();
        assert_eq!(instance.check_queue().await, None);
        assert!(started.elapsed() >= QUEUE_TIMEOUT);
    }

    #[tokio::test]
    async fn stop_is_sent_once_and_full_queue_is_reported() {
        let (mut instance, mut inbound, _outbound) = instance();
        instance.request_stop();
        instance.request_stop();
        assert!(instance.is_stopping());
        assert_eq!(inbound.recv().await.map(|item| item.kind), Some("stop".to_string()));
        assert!(inbound.try_recv().is_err());

        instance
            .send(QueueItem::new(kind::SLEEP, serde_json::json!(0.0)))
            .expect("first fits");
        let err = instance.send(QueueItem::new(kind::SLEEP, serde_json::json!(0.0)));
        assert!(matches!(err, Err(SessionError::QueueFull { .. })));
    }
}
