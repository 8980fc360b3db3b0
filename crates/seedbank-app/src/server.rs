//! The seedbank server loop.

use std::future::Future;
use std::sync::Arc;

use seedbank_events::{Notification, Topic};
use seedbank_session::{SessionMessage, SessionReport, SessionRequest};
use tracing::{debug, error, info};

use crate::context::{AppContext, SERVER_SESSION_KEY, SESSION_TICK_INTERVAL};
use crate::error::{AppError, AppResult};

/// Drives the `server` session and routes worker reports.
pub struct SeedbankServer {
    context: Arc<AppContext>,
}

impl SeedbankServer {
    /// Server over `context`.
    #[must_use]
    pub const fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }

    /// Run until the `server` session exits or `shutdown` resolves.
    ///
    /// On shutdown every session is asked to stop and the loop keeps
    /// ticking until the `server` session has exited.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Session`] if the `server` session cannot be
    /// created. Loop failures are logged, never returned.
    pub async fn run<F>(&self, shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        let supervisor = self.context.supervisor();
        supervisor
            .create(SERVER_SESSION_KEY, SessionRequest::server(SESSION_TICK_INTERVAL))
            .await
            .map_err(|err| AppError::session("create_server_session", err))?;
        info!(seedbank_id = %self.context.config().main.seedbank_id, "seedbank server started");

        tokio::pin!(shutdown);
        while supervisor.is_alive(SERVER_SESSION_KEY).await {
            self.step().await;
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                () = tokio::time::sleep(SESSION_TICK_INTERVAL) => {}
            }
        }

        supervisor.stop(None).await;
        while supervisor.is_alive(SERVER_SESSION_KEY).await {
            self.step().await;
            tokio::time::sleep(SESSION_TICK_INTERVAL).await;
        }
        supervisor.join(None).await;
        info!("seedbank server stopped");
        Ok(())
    }

    /// Drain session reports, then run supervisor housekeeping.
    pub async fn step(&self) {
        for message in self.context.supervisor().check_queues().await {
            self.route(message).await;
        }
        if let Err(err) = self.context.supervisor().tick().await {
            error!(error = %err, "session housekeeping failed");
        }
    }

    async fn route(&self, message: SessionMessage) {
        let SessionMessage { key, report } = message;
        let notifications = self.context.notifications();
        match report {
            SessionReport::TorrentFinished(finished) => {
                info!(key = %key, content_hash = %finished.content_hash, "upload finished");
                self.context
                    .uploads()
                    .convert_to_torrent(&finished.content_hash)
                    .await;
            }
            SessionReport::ServerInit(init) => {
                info!(key = %key, peer_id = %init.peer_id, "server session initialised");
                notifications.publish(
                    Topic::Notify,
                    Notification::SeedbankInit {
                        seedbank_id: self.context.config().main.seedbank_id.clone(),
                        peer_id: init.peer_id,
                    },
                );
            }
            SessionReport::TorrentStats(stats) => {
                notifications.publish(Topic::Stats, Notification::TorrentStats { stats });
            }
            SessionReport::ServerStats(stats) => {
                notifications.publish(Topic::Stats, Notification::ServerStats { stats });
            }
            SessionReport::Error(report) => {
                error!(
                    key = %key,
                    category = %report.category,
                    message = %report.message,
                    "session reported an error"
                );
            }
            SessionReport::WatcherExited => info!(key = %key, "session watcher exited"),
            SessionReport::Update(update) => {
                debug!(key = %key, torrent_count = update.torrent_count, "session update");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seedbank_config::SeedbankConfig;
    use seedbank_data::{MemoryStore, UploadStore};
    use seedbank_events::{NotificationEnvelope, UploadAction};
    use seedbank_session::{LocalLauncher, TorrentFinishedReport, WorkerParams};
    use seedbank_torrent_core::{DescriptorBuilder, StubEngine, TransferEngine};
    use std::time::Duration;

    fn context(config: SeedbankConfig, launcher: LocalLauncher) -> (Arc<MemoryStore>, Arc<AppContext>) {
        let store = Arc::new(MemoryStore::new());
        let context = Arc::new(AppContext::new(
            Arc::new(config),
            Arc::new(launcher),
            store.clone(),
            false,
        ));
        (store, context)
    }

    #[tokio::test]
    async fn server_announces_itself_and_stops_on_shutdown() -> anyhow::Result<()> {
        let mut config = SeedbankConfig::default();
        config.main.seedbank_id = "bank-9".to_string();
        let (_store, context) = context(config, LocalLauncher::stub());
        let mut stream = context.notifications().subscribe();
        let mut watch = context.notifications().subscribe();
        let server = SeedbankServer::new(context.clone());

        let shutdown = async move {
            while let Some(envelope) = watch.next().await {
                if matches!(envelope.notification, Notification::SeedbankInit { .. }) {
                    return;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(10), server.run(shutdown)).await??;

        let envelope: NotificationEnvelope = stream.try_next().expect("seedbank_init");
        assert_eq!(envelope.topic, Topic::Notify);
        assert_eq!(
            envelope.notification,
            Notification::SeedbankInit {
                seedbank_id: "bank-9".to_string(),
                peer_id: seedbank_torrent_core::stub::DEFAULT_PEER_ID.to_string(),
            }
        );
        assert!(!context.supervisor().is_alive(SERVER_SESSION_KEY).await);
        Ok(())
    }

    #[tokio::test]
    async fn finished_uploads_are_promoted() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = SeedbankConfig::default();
        config.main.data_volume_root = dir.path().join("data");
        config.main.torrent_file_root = dir.path().join("torrents");
        config.main.torrent_manager_exec_interval = 1;
        let upload_engine = Arc::new(StubEngine::new());
        let shared = upload_engine.clone();
        let launcher = LocalLauncher::new(Arc::new(
            move |params: &WorkerParams| -> Arc<dyn TransferEngine> {
                if params.key == SERVER_SESSION_KEY {
                    Arc::new(StubEngine::new())
                } else {
                    shared.clone()
                }
            },
        ));
        let (store, context) = context(config, launcher);
        let server = SeedbankServer::new(context.clone());
        context
            .supervisor()
            .create(SERVER_SESSION_KEY, SessionRequest::server(SESSION_TICK_INTERVAL))
            .await?;

        let descriptor = DescriptorBuilder::new("upload.iso").length(2048).build()?;
        let hash = descriptor.hash().clone();
        context
            .uploads()
            .start(hash.as_str(), Some(descriptor.bytes()))
            .await?;
        let mut stream = context.notifications().subscribe();

        tokio::time::timeout(Duration::from_secs(20), async {
            while !upload_engine.set_progress(&hash, 1.0) {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            loop {
                server.step().await;
                if store
                    .get_upload(&hash)
                    .await
                    .is_ok_and(|record| record.is_some_and(|record| record.finished))
                {
                    return;
                }
            }
        })
        .await?;

        let finished = std::iter::from_fn(|| stream.try_next()).any(|envelope| {
            matches!(
                envelope.notification,
                Notification::Upload {
                    upload_action: UploadAction::Finished,
                    ..
                }
            )
        });
        assert!(finished);
        assert!(dir.path().join("torrents").join(format!("{hash}.torrent")).is_file());

        context.supervisor().stop(None).await;
        server.step().await;
        context.supervisor().join(None).await;
        Ok(())
    }

    #[tokio::test]
    async fn reports_are_routed_to_topics() {
        let (_store, context) = context(SeedbankConfig::default(), LocalLauncher::stub());
        let server = SeedbankServer::new(context.clone());
        let mut stream = context.notifications().subscribe();

        server
            .route(SessionMessage {
                key: SERVER_SESSION_KEY.to_string(),
                report: SessionReport::ServerStats(serde_json::json!({"num_torrents": 1})),
            })
            .await;
        server
            .route(SessionMessage {
                key: "upload_".to_string(),
                report: SessionReport::TorrentFinished(TorrentFinishedReport {
                    content_hash: seedbank_torrent_core::ContentHash::from_digest([4; 20]),
                    storage_root: std::path::PathBuf::from("/nowhere"),
                }),
            })
            .await;

        let envelope = stream.try_next().expect("stats");
        assert_eq!(envelope.topic, Topic::Stats);
        assert!(stream.try_next().is_none());
    }
}
