//! Per-worker torrent bookkeeping: expiry of idle torrents and finalization
//! of completed uploads.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use seedbank_torrent_core::{AddTorrent, ContentDescriptor, ContentHash, TransferEngine};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{SessionError, SessionResult};
use crate::ipc::{AddPeerParams, AddTorrentParams, QueueItem, SessionReport, TorrentFinishedReport};
use crate::tick::TickScheduler;

/// Scheduling parameters of the activity manager.
#[derive(Debug, Clone, Copy)]
pub struct ActivitySettings {
    /// Period of the expiry and completion scans.
    pub exec_interval: Duration,
    /// Period of the worker loop driving [`TorrentActivityManager::tick`].
    pub tick_interval: Duration,
    /// Idle time, in both directions, after which a torrent is dropped.
    pub inactive_timeout: Duration,
}

/// Tracks torrents added for upload and finalizes them once complete.
pub struct TorrentActivityManager {
    label: String,
    engine: Arc<dyn TransferEngine>,
    reports: mpsc::Sender<QueueItem>,
    scheduler: TickScheduler,
    inactive_timeout: Duration,
    tracked: BTreeMap<ContentHash, PathBuf>,
}

impl TorrentActivityManager {
    /// Build a manager scanning every `exec_interval`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidSchedule`] when the exec interval does
    /// not cover two worker ticks.
    pub fn new(
        label: impl Into<String>,
        engine: Arc<dyn TransferEngine>,
        reports: mpsc::Sender<QueueItem>,
        settings: ActivitySettings,
    ) -> SessionResult<Self> {
        Ok(Self {
            label: label.into(),
            engine,
            reports,
            scheduler: TickScheduler::new(settings.exec_interval, settings.tick_interval)?,
            inactive_timeout: settings.inactive_timeout,
            tracked: BTreeMap::new(),
        })
    }

    /// Advance the schedule; runs a scan when due.
    pub async fn tick(&mut self) -> bool {
        if !self.scheduler.tick() {
            return false;
        }
        self.run_scan().await;
        true
    }

    /// Expire idle torrents, then finalize completed ones. Failures are
    /// logged.
    ///
    /// A completed torrent stays tracked until its `torrent_finished` report
    /// is queued; a full report queue holds the scan back.
    pub async fn run_scan(&mut self) {
        if let Err(err) = self.expire_idle().await {
            error!(session = %self.label, error = %err, "expiry scan failed");
        }
        let hashes: Vec<ContentHash> = self.tracked.keys().cloned().collect();
        for content_hash in hashes {
            if let Err(err) = self.check_completion(&content_hash).await {
                info!(
                    session = %self.label,
                    content_hash = %content_hash,
                    error = %err,
                    "error checking upload"
                );
            }
        }
    }

    async fn expire_idle(&mut self) -> SessionResult<()> {
        let timeout = self.inactive_timeout.as_secs();
        let torrents = self
            .engine
            .torrents()
            .await
            .map_err(|err| SessionError::engine("torrents", err))?;
        for status in torrents {
            if status.seconds_since_download <= timeout || status.seconds_since_upload <= timeout {
                continue;
            }
            info!(
                session = %self.label,
                content_hash = %status.content_hash,
                name = %status.name,
                "removing inactive torrent"
            );
            if let Err(err) = self.engine.remove_torrent(&status.content_hash).await {
                warn!(content_hash = %status.content_hash, error = %err, "failed to remove inactive torrent");
                continue;
            }
            self.tracked.remove(&status.content_hash);
        }
        Ok(())
    }

    async fn check_completion(&mut self, content_hash: &ContentHash) -> SessionResult<()> {
        let status = self
            .engine
            .torrent(content_hash)
            .await
            .map_err(|err| SessionError::engine("torrent_status", err))?;
        let Some(status) = status else {
            self.tracked.remove(content_hash);
            return Err(SessionError::NotTracked {
                content_hash: content_hash.clone(),
            });
        };
        if !status.is_complete() || status.paused {
            return Ok(());
        }

        self.engine
            .pause_torrent(content_hash)
            .await
            .map_err(|err| SessionError::engine("pause_torrent", err))?;
        let storage_root = self
            .tracked
            .get(content_hash)
            .cloned()
            .unwrap_or(status.save_path);
        let report = SessionReport::TorrentFinished(TorrentFinishedReport {
            content_hash: content_hash.clone(),
            storage_root,
        });
        let item = report.to_item()?;
        self.reports
            .send(item)
            .await
            .map_err(|_| SessionError::QueueClosed {
                key: self.label.clone(),
            })?;
        self.tracked.remove(content_hash);
        self.engine
            .remove_torrent(content_hash)
            .await
            .map_err(|err| SessionError::engine("remove_torrent", err))?;
        info!(session = %self.label, content_hash = %content_hash, "upload complete");
        Ok(())
    }

    /// Start serving a descriptor and track it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Torrent`] when the descriptor is malformed or
    /// its hash differs from the requested one, and [`SessionError::Engine`]
    /// when the engine refuses the torrent.
    pub async fn add_torrent(&mut self, params: AddTorrentParams) -> SessionResult<()> {
        let AddTorrentParams {
            content_hash,
            descriptor,
            storage_root,
        } = params;
        if self.tracked.contains_key(&content_hash) {
            warn!(content_hash = %content_hash, "torrent already tracked");
            return Ok(());
        }
        let descriptor = ContentDescriptor::decode_expecting(&descriptor, &content_hash)
            .map_err(|err| SessionError::torrent("add_torrent", err))?;
        let name = descriptor.name().to_string();
        self.engine
            .add_torrent(AddTorrent {
                descriptor,
                save_path: storage_root.clone(),
            })
            .await
            .map_err(|err| SessionError::engine("add_torrent", err))?;
        info!(
            session = %self.label,
            content_hash = %content_hash,
            name = %name,
            "added torrent to session for upload"
        );
        self.tracked.insert(content_hash, storage_root);
        Ok(())
    }

    /// Point a tracked torrent at a peer.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NothingTracked`] with no tracked torrents,
    /// [`SessionError::MissingParameter`] without peer or hash,
    /// [`SessionError::NotTracked`] for an unknown hash and
    /// [`SessionError::Engine`] when the engine fails.
    pub async fn add_peer(&self, params: AddPeerParams) -> SessionResult<()> {
        if self.tracked.is_empty() {
            return Err(SessionError::NothingTracked);
        }
        let peer = params
            .peer
            .ok_or(SessionError::MissingParameter { field: "peer" })?;
        let content_hash = params
            .content_hash
            .ok_or(SessionError::MissingParameter {
                field: "content_hash",
            })?;
        if !self.tracked.contains_key(&content_hash) {
            return Err(SessionError::NotTracked { content_hash });
        }
        debug!(session = %self.label, content_hash = %content_hash, %peer, "adding peer");
        self.engine
            .connect_peer(&content_hash, peer)
            .await
            .map_err(|err| SessionError::engine("connect_peer", err))
    }

    /// Remove a torrent from the engine and from tracking.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Engine`] when the engine does not know it.
    pub async fn stop_torrent(&mut self, content_hash: &ContentHash) -> SessionResult<()> {
        self.tracked.remove(content_hash);
        self.engine
            .remove_torrent(content_hash)
            .await
            .map_err(|err| SessionError::engine("remove_torrent", err))
    }

    /// Number of tracked torrents.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Whether a torrent is tracked.
    #[must_use]
    pub fn is_tracked(&self, content_hash: &ContentHash) -> bool {
        self.tracked.contains_key(content_hash)
    }

    /// Storage root of a tracked torrent.
    #[must_use]
    pub fn storage_root(&self, content_hash: &ContentHash) -> Option<&Path> {
        self.tracked.get(content_hash).map(PathBuf::as_path)
    }
}
