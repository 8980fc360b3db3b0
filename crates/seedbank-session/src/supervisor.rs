//! Registry of worker sessions.
//!
//! Structural mutations (create, stop-all, cleanup) take the registry lock
//! through a bounded `try_lock` retry and fail with
//! [`SessionError::LockTimeout`] instead of blocking.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use seedbank_config::SeedbankConfig;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::instance::{ReportChannel, SessionInstance};
use crate::ipc::{SessionCommand, SessionReport};
use crate::launcher::WorkerLauncher;
use crate::params::{SessionRequest, WorkerParams};

/// Minimum age before an idle client session is stopped.
pub const CLEANUP_MIN_AGE: Duration = Duration::from_secs(30);
/// Attempts made to take the registry lock.
pub const LOCK_ATTEMPTS: u32 = 10;
/// Delay between two lock attempts.
pub const LOCK_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A report surfaced from one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMessage {
    /// Session key.
    pub key: String,
    /// Report.
    pub report: SessionReport,
}

type Registry = BTreeMap<String, SessionInstance>;

/// Creates, messages, cleans up and joins worker sessions.
pub struct SessionSupervisor {
    config: Arc<SeedbankConfig>,
    launcher: Arc<dyn WorkerLauncher>,
    verbose: bool,
    sessions: Mutex<Registry>,
    stop_all: AtomicBool,
}

impl SessionSupervisor {
    /// Empty registry launching workers through `launcher`.
    #[must_use]
    pub fn new(
        config: Arc<SeedbankConfig>,
        launcher: Arc<dyn WorkerLauncher>,
        verbose: bool,
    ) -> Self {
        Self {
            config,
            launcher,
            verbose,
            sessions: Mutex::new(BTreeMap::new()),
            stop_all: AtomicBool::new(false),
        }
    }

    async fn acquire(&self, operation: &'static str) -> SessionResult<MutexGuard<'_, Registry>> {
        for attempt in 1..=LOCK_ATTEMPTS {
            if let Ok(guard) = self.sessions.try_lock() {
                return Ok(guard);
            }
            debug!(operation, attempt, "session registry busy");
            tokio::time::sleep(LOCK_RETRY_DELAY).await;
        }
        Err(SessionError::LockTimeout {
            operation,
            attempts: LOCK_ATTEMPTS,
        })
    }

    /// Start and register a worker under `key`.
    ///
    /// A registered worker that already exited is reaped first.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::DuplicateSession`] when `key` has a live
    /// worker, [`SessionError::LockTimeout`] when the registry stays busy and
    /// launch errors from the [`WorkerLauncher`].
    pub async fn create(&self, key: &str, request: SessionRequest) -> SessionResult<()> {
        let mut sessions = self.acquire("create").await?;
        if let Some(existing) = sessions.get_mut(key) {
            if existing.is_alive() {
                return Err(SessionError::DuplicateSession {
                    key: key.to_string(),
                });
            }
            info!(key, "reaping exited session before re-create");
            existing.join().await?;
            sessions.remove(key);
        }
        let params = WorkerParams::derive(key, request, &self.config, self.verbose);
        let link = self.launcher.launch(&params)?;
        info!(key, role = %request.role, "creating new session instance");
        sessions.insert(key.to_string(), SessionInstance::new(key, request.role, link));
        Ok(())
    }

    /// Queue a command for `key` without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownSession`] for an unknown key and queue
    /// errors when the command cannot be queued. Every failure is also logged.
    pub async fn send(&self, key: &str, command: &SessionCommand) -> SessionResult<()> {
        let item = command.to_item()?;
        let sessions = self.sessions.lock().await;
        let result = sessions.get(key).map_or_else(
            || {
                Err(SessionError::UnknownSession {
                    key: key.to_string(),
                })
            },
            |instance| instance.send(item),
        );
        if let Err(err) = &result {
            error!(key, kind = command.kind(), error = %err, "cannot send to session");
        }
        result
    }

    /// Request a stop of `key`, or of every session on the next tick.
    pub async fn stop(&self, key: Option<&str>) {
        let Some(key) = key else {
            info!("stop of all sessions armed");
            self.stop_all.store(true, Ordering::Release);
            return;
        };
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(key) {
            Some(instance) => instance.request_stop(),
            None => error!(key, "cannot stop a session that does not exist"),
        }
    }

    /// Periodic housekeeping: propagate a global stop and clean up.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::LockTimeout`] when the registry stays busy.
    pub async fn tick(&self) -> SessionResult<()> {
        if self.stop_all.load(Ordering::Acquire) {
            self.stop_every_session().await?;
        }
        self.cleanup().await
    }

    async fn stop_every_session(&self) -> SessionResult<()> {
        let mut sessions = self.acquire("stop_all").await?;
        for instance in sessions.values_mut() {
            instance.request_stop();
        }
        Ok(())
    }

    async fn cleanup(&self) -> SessionResult<()> {
        let mut sessions = self.acquire("cleanup").await?;
        let exited: Vec<String> = sessions
            .iter_mut()
            .filter_map(|(key, instance)| (!instance.is_alive()).then(|| key.clone()))
            .collect();
        for key in exited {
            if let Some(mut instance) = sessions.remove(&key) {
                info!(key = %key, "cleaning up stopped session");
                if let Err(err) = instance.join().await {
                    warn!(key = %key, error = %err, "joining stopped session failed");
                }
            }
        }
        for instance in sessions.values_mut() {
            if should_stop(instance) {
                info!(key = %instance.key(), "stopping session due to lack of active torrents");
                instance.request_stop();
            }
        }
        Ok(())
    }

    /// One bounded read per session; `update` reports are absorbed.
    pub async fn check_queues(&self) -> Vec<SessionMessage> {
        let channels: Vec<ReportChannel> = self
            .sessions
            .lock()
            .await
            .values()
            .map(SessionInstance::reports)
            .collect();
        let mut messages = Vec::new();
        for channel in channels {
            if let Some(report) = channel.check().await {
                if self.verbose {
                    info!(key = %channel.key(), kind = report.kind(), "got item from queue");
                }
                messages.push(SessionMessage {
                    key: channel.key().to_string(),
                    report,
                });
            }
        }
        messages
    }

    /// Whether `key` has a live worker.
    pub async fn is_alive(&self, key: &str) -> bool {
        self.sessions
            .lock()
            .await
            .get_mut(key)
            .is_some_and(SessionInstance::is_alive)
    }

    /// Whether `key` is registered, alive or not.
    pub async fn contains(&self, key: &str) -> bool {
        self.sessions.lock().await.contains_key(key)
    }

    /// Whether a stop was requested for `key`.
    pub async fn is_stopping(&self, key: &str) -> bool {
        self.sessions
            .lock()
            .await
            .get(key)
            .is_some_and(SessionInstance::is_stopping)
    }

    /// Latest torrent count reported by `key`.
    pub async fn torrent_count(&self, key: &str) -> Option<usize> {
        self.sessions
            .lock()
            .await
            .get(key)
            .map(SessionInstance::torrent_count)
    }

    /// Number of registered sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no session is registered.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    /// Wait for `key`, or every session, to exit.
    pub async fn join(&self, key: Option<&str>) {
        let mut sessions = self.sessions.lock().await;
        match key {
            Some(key) => match sessions.get_mut(key) {
                Some(instance) => {
                    if let Err(err) = instance.join().await {
                        warn!(key, error = %err, "join failed");
                    }
                }
                None => error!(key, "cannot join a session that does not exist"),
            },
            None => {
                for (key, instance) in sessions.iter_mut() {
                    if let Err(err) = instance.join().await {
                        warn!(key = %key, error = %err, "join failed");
                    }
                }
            }
        }
    }
}

fn should_stop(instance: &SessionInstance) -> bool {
    !instance.is_server()
        && !instance.is_stopping()
        && !instance.has_active_torrents()
        && instance.age() >= CLEANUP_MIN_AGE
}
