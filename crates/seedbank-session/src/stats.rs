//! Periodic aggregate statistics of the server engine.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use seedbank_torrent_core::TransferEngine;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{SessionError, SessionResult};
use crate::ipc::{QueueItem, SessionReport};
use crate::tick::TickScheduler;

/// Period between two server statistics reports.
pub const SERVER_STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Emits a `server_stats` report on a tick schedule.
pub struct ServerStatsPublisher {
    engine: Arc<dyn TransferEngine>,
    reports: mpsc::Sender<QueueItem>,
    scheduler: TickScheduler,
}

impl ServerStatsPublisher {
    /// Build a publisher driven by a loop ticking every `tick_interval`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidSchedule`] when the tick interval is
    /// too coarse for [`SERVER_STATS_INTERVAL`].
    pub fn new(
        engine: Arc<dyn TransferEngine>,
        reports: mpsc::Sender<QueueItem>,
        tick_interval: Duration,
    ) -> SessionResult<Self> {
        Ok(Self {
            engine,
            reports,
            scheduler: TickScheduler::new(SERVER_STATS_INTERVAL, tick_interval)?,
        })
    }

    /// Advance the schedule; publishes when due.
    pub async fn tick(&mut self) -> bool {
        if !self.scheduler.tick() {
            return false;
        }
        if let Err(err) = self.publish().await {
            warn!(error = %err, "server stats publish failed");
        }
        true
    }

    /// Publish one report now.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Engine`] when the engine status is unavailable
    /// and [`SessionError::QueueFull`] when the report cannot be queued.
    pub async fn publish(&self) -> SessionResult<()> {
        let document = self.document().await?;
        let item = SessionReport::ServerStats(document).to_item()?;
        self.reports
            .try_send(item)
            .map_err(|_| SessionError::QueueFull {
                key: "server".to_string(),
            })
    }

    async fn document(&self) -> SessionResult<Value> {
        let status = self
            .engine
            .session_status()
            .await
            .map_err(|err| SessionError::engine("session_status", err))?;
        let peer_id = self
            .engine
            .peer_id()
            .await
            .map_err(|err| SessionError::engine("peer_id", err))?;
        let mut document = serde_json::to_value(&status)
            .map_err(|source| SessionError::InvalidPayload {
                kind: "server_stats".to_string(),
                source,
            })?;
        if let Value::Object(fields) = &mut document {
            fields.insert("timestamp".to_string(), Value::String(Utc::now().to_rfc3339()));
            fields.insert("peer_id".to_string(), Value::String(peer_id));
        }
        Ok(document)
    }
}
