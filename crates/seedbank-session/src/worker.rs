//! Worker session: the main loop of one worker process.

use std::sync::Arc;
use std::time::Duration;

use seedbank_torrent_core::{EngineProfile, EngineSettings, EventMask, TransferEngine};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::activity::TorrentActivityManager;
use crate::error::{SessionError, SessionResult};
use crate::ipc::{
    ErrorReport, PublishStatsParams, QueueItem, ServerInitReport, SessionCommand, SessionReport,
    TorrentRef, UpdateReport, spawn_line_reader, spawn_line_writer,
};
use crate::params::{SessionRole, WorkerParams, STATS_PUBLISHER_RULE, stats_publisher_rule};
use crate::stats::ServerStatsPublisher;
use crate::watcher::{EventWatcher, WatcherMode, WatcherSettings};

/// Worker ticks between two `update` reports.
pub const UPDATE_INTERVAL: u32 = 10;
/// Pause applied between the two halves of a torrent bump.
pub const BUMP_PAUSE: Duration = Duration::from_millis(500);

/// Extensions loaded by the server engine after the store plugin.
const SERVER_EXTENSIONS: [&str; 3] = ["ut_metadata", "metadata_transfer", "smart_ban"];
/// Extension name of the record store plugin.
const STORE_EXTENSION: &str = "store_torrent_db";

/// Worker main loop bound to one engine and one pair of queues.
pub struct WorkerSession {
    params: WorkerParams,
    engine: Arc<dyn TransferEngine>,
    inbound: mpsc::Receiver<QueueItem>,
    outbound: mpsc::Sender<QueueItem>,
    verbose: bool,
    running: bool,
    watcher: Option<EventWatcher>,
    activity: Option<TorrentActivityManager>,
    stats: Option<ServerStatsPublisher>,
    update_countdown: u32,
    watcher_exit_reported: bool,
}

impl WorkerSession {
    /// Bind a session to its engine and queues.
    #[must_use]
    pub fn new(
        params: WorkerParams,
        engine: Arc<dyn TransferEngine>,
        inbound: mpsc::Receiver<QueueItem>,
        outbound: mpsc::Sender<QueueItem>,
    ) -> Self {
        let verbose = params.verbose;
        Self {
            params,
            engine,
            inbound,
            outbound,
            verbose,
            running: false,
            watcher: None,
            activity: None,
            stats: None,
            update_countdown: 0,
            watcher_exit_reported: false,
        }
    }

    /// Run until stopped. A fatal error is reported as an `error` item
    /// before it is returned.
    ///
    /// # Errors
    ///
    /// Returns the error that ended the loop.
    pub async fn run(mut self) -> SessionResult<()> {
        let span = info_span!("session", key = %self.params.key, role = %self.params.role);
        async move {
            let result = self.run_loop().await;
            if let Err(err) = &result {
                error!(error = %err, "worker session failed");
                self.report(SessionReport::Error(ErrorReport::from(err))).await;
            }
            if let Some(watcher) = self.watcher.as_mut() {
                watcher.stop();
                watcher.join().await;
            }
            info!("worker session exiting");
            result
        }
        .instrument(span)
        .await
    }

    async fn run_loop(&mut self) -> SessionResult<()> {
        self.running = true;
        let settings = EngineSettings {
            listen_interface: self.params.listen_interface,
            listen_port_min: self.params.listen_min,
            listen_port_max: self.params.listen_max,
            profile: match self.params.role {
                SessionRole::Server => EngineProfile::Server,
                SessionRole::Client => EngineProfile::Client,
            },
        };
        self.engine
            .start(&settings)
            .await
            .map_err(|err| SessionError::engine("start", err))?;

        self.watcher = Some(self.build_watcher()?);
        self.activity = self
            .params
            .activity_settings()
            .map(|settings| {
                TorrentActivityManager::new(
                    self.params.key.clone(),
                    Arc::clone(&self.engine),
                    self.outbound.clone(),
                    settings,
                )
            })
            .transpose()?;

        let peer_id = self
            .engine
            .peer_id()
            .await
            .map_err(|err| SessionError::engine("peer_id", err))?;
        info!(peer_id = %peer_id, "engine started");
        if self.params.role == SessionRole::Server {
            self.load_server_extensions().await?;
        } else {
            debug!(
                listen_min = self.params.listen_min,
                listen_max = self.params.listen_max,
                "client listen range"
            );
        }

        if let Some(watcher) = self.watcher.as_mut() {
            watcher.start()?;
        }
        if self.params.role == SessionRole::Server {
            self.report(SessionReport::ServerInit(ServerInitReport { peer_id }))
                .await;
        }

        let tick_interval = self.params.tick_interval();
        while self.running {
            self.tick().await;
            if self.running {
                tokio::time::sleep(tick_interval).await;
            }
        }
        Ok(())
    }

    fn build_watcher(&self) -> SessionResult<EventWatcher> {
        let mode = match self.params.role {
            SessionRole::Server => WatcherMode::Concurrent,
            SessionRole::Client => WatcherMode::Inline,
        };
        let mut settings = WatcherSettings::new(self.params.key.clone());
        settings.loop_limit = self.params.watcher_loop_limit;
        settings.poll_interval = self.params.tick_interval();
        settings.verbose = self.verbose;
        EventWatcher::new(
            mode,
            settings,
            Arc::clone(&self.engine),
            self.outbound.clone(),
            self.params.watcher_rules.clone(),
        )
    }

    async fn load_server_extensions(&self) -> SessionResult<()> {
        let plugin = self
            .params
            .store_plugin
            .as_ref()
            .ok_or(SessionError::MissingParameter {
                field: "store_plugin",
            })?;
        info!(
            store_root = %plugin.root.display(),
            namespace = %plugin.namespace,
            torrent_file_root = %plugin.torrent_file_root.display(),
            "adding store plugin"
        );
        let plugin_params =
            serde_json::to_value(plugin).map_err(|source| SessionError::Params { source })?;
        self.engine
            .add_extension(STORE_EXTENSION, plugin_params)
            .await
            .map_err(|err| SessionError::engine("add_extension", err))?;
        for name in SERVER_EXTENSIONS {
            self.engine
                .add_extension(name, Value::Null)
                .await
                .map_err(|err| SessionError::engine("add_extension", err))?;
        }
        Ok(())
    }

    /// One iteration of the worker loop.
    pub async fn tick(&mut self) {
        self.drain_inbound().await;
        self.check_watcher().await;
        if let Some(activity) = self.activity.as_mut() {
            activity.tick().await;
        }
        self.send_update().await;
        if let Some(stats) = self.stats.as_mut() {
            stats.tick().await;
        }
    }

    async fn drain_inbound(&mut self) {
        loop {
            match self.inbound.try_recv() {
                Ok(item) => self.handle(item).await,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!("inbound queue closed, stopping");
                    self.stop();
                    break;
                }
            }
        }
    }

    async fn check_watcher(&mut self) {
        let Some(watcher) = self.watcher.as_ref() else {
            return;
        };
        if watcher.mode() == WatcherMode::Inline {
            watcher.pump().await;
        }
        let fully_matched = watcher.is_fully_matched();
        let alive = watcher.is_alive();
        if fully_matched && !self.watcher_exit_reported {
            self.watcher_exit_reported = true;
            self.report(SessionReport::WatcherExited).await;
        }
        if !alive && self.params.stop_on_watcher_exit {
            info!("internal stop after event watcher exit");
            self.stop();
        }
    }

    async fn send_update(&mut self) {
        if self.update_countdown > 0 {
            self.update_countdown -= 1;
            return;
        }
        self.update_countdown = UPDATE_INTERVAL - 1;
        match self.engine.torrents().await {
            Ok(torrents) => {
                self.report(SessionReport::Update(UpdateReport {
                    torrent_count: torrents.len(),
                }))
                .await;
            }
            Err(err) => warn!(error = %err, "torrent count unavailable"),
        }
    }

    fn stop(&mut self) {
        if self.running {
            info!("stopping worker session");
        }
        self.running = false;
        self.stats = None;
    }

    async fn report(&self, report: SessionReport) {
        let kind = report.kind();
        match report.to_item() {
            Ok(item) => {
                if self.outbound.send(item).await.is_err() {
                    debug!(kind, "outbound queue closed");
                }
            }
            Err(err) => warn!(kind, error = %err, "unencodable report"),
        }
    }

    async fn handle(&mut self, item: QueueItem) {
        let kind = item.kind.clone();
        let result = match SessionCommand::from_item(item) {
            Ok(command) => self.handle_command(command).await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            error!(kind = %kind, error = %err, "error handling queue item");
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) -> SessionResult<()> {
        let kind = command.kind();
        match command {
            SessionCommand::Stop => {
                self.stop();
                Ok(())
            }
            SessionCommand::SetVerbose(verbose) => {
                self.verbose = verbose;
                info!(verbose, "verbose logging toggled");
                Ok(())
            }
            SessionCommand::Sleep(duration) => {
                debug!(seconds = duration.as_secs_f64(), "sleeping");
                tokio::time::sleep(duration).await;
                Ok(())
            }
            SessionCommand::AddTorrent(params) => self.activity_for(kind)?.add_torrent(params).await,
            SessionCommand::AddPeer(params) => self.activity_for(kind)?.add_peer(params).await,
            SessionCommand::BumpTorrent(target) => {
                self.require_role(SessionRole::Client, kind)?;
                self.bump_torrent(&target).await
            }
            SessionCommand::StopTorrent(target) => {
                self.activity_for(kind)?
                    .stop_torrent(&target.content_hash)
                    .await?;
                info!(content_hash = %target.content_hash, "removed torrent from session");
                Ok(())
            }
            SessionCommand::PublishStats(params) => {
                self.require_role(SessionRole::Server, kind)?;
                self.publish_stats(params).await
            }
        }
    }

    fn require_role(&self, role: SessionRole, kind: &'static str) -> SessionResult<()> {
        if self.params.role == role {
            return Ok(());
        }
        Err(SessionError::UnsupportedCommand { kind })
    }

    fn activity_for(&mut self, kind: &'static str) -> SessionResult<&mut TorrentActivityManager> {
        self.require_role(SessionRole::Client, kind)?;
        self.activity
            .as_mut()
            .ok_or(SessionError::UnsupportedCommand { kind })
    }

    async fn bump_torrent(&self, target: &TorrentRef) -> SessionResult<()> {
        let content_hash = &target.content_hash;
        info!(content_hash = %content_hash, "pausing torrent");
        self.engine
            .pause_torrent(content_hash)
            .await
            .map_err(|err| SessionError::engine("pause_torrent", err))?;
        tokio::time::sleep(BUMP_PAUSE).await;
        info!(content_hash = %content_hash, "resuming torrent");
        self.engine
            .resume_torrent(content_hash)
            .await
            .map_err(|err| SessionError::engine("resume_torrent", err))
    }

    async fn publish_stats(&mut self, params: PublishStatsParams) -> SessionResult<()> {
        let Some(watcher) = self.watcher.as_ref() else {
            warn!("cannot handle publish_stats without a watcher");
            return Ok(());
        };
        if params.enable {
            if !watcher.has(STATS_PUBLISHER_RULE) {
                watcher.add(stats_publisher_rule())?;
                self.engine
                    .set_event_mask(EventMask::Stats)
                    .await
                    .map_err(|err| SessionError::engine("set_event_mask", err))?;
            }
            if self.stats.is_none() {
                self.stats = Some(ServerStatsPublisher::new(
                    Arc::clone(&self.engine),
                    self.outbound.clone(),
                    self.params.tick_interval(),
                )?);
            }
            info!("statistics publishing enabled");
        } else {
            self.engine
                .set_event_mask(EventMask::Default)
                .await
                .map_err(|err| SessionError::engine("set_event_mask", err))?;
            watcher.remove(STATS_PUBLISHER_RULE);
            self.stats = None;
            info!("statistics publishing disabled");
        }
        Ok(())
    }

    /// Whether the stats publisher is active.
    #[must_use]
    pub const fn publishes_stats(&self) -> bool {
        self.stats.is_some()
    }
}

/// Run a worker over the process's stdin and stdout.
///
/// # Errors
///
/// Returns the worker's fatal error after it was reported on stdout.
pub async fn run_worker_process(
    params: WorkerParams,
    engine: Arc<dyn TransferEngine>,
) -> SessionResult<()> {
    let inbound = spawn_line_reader(tokio::io::stdin(), "worker-inbound");
    let (outbound, writer) = spawn_line_writer(tokio::io::stdout(), "worker-outbound");
    let result = WorkerSession::new(params, engine, inbound, outbound).run().await;
    if let Err(err) = writer.await {
        warn!(error = %err, "worker outbound writer failed");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{AddTorrentParams, kind};
    use crate::params::SessionRequest;
    use seedbank_config::SeedbankConfig;
    use seedbank_torrent_core::{DescriptorBuilder, StubEngine};
    use std::path::PathBuf;

    struct Harness {
        engine: Arc<StubEngine>,
        inbound: mpsc::Sender<QueueItem>,
        outbound: mpsc::Receiver<QueueItem>,
        task: tokio::task::JoinHandle<SessionResult<()>>,
    }

    fn spawn_session(params: WorkerParams) -> Harness {
        let engine = Arc::new(StubEngine::new());
        let (inbound_tx, inbound_rx) = mpsc::channel(32);
        let (outbound_tx, outbound_rx) = mpsc::channel(256);
        let session = WorkerSession::new(
            params,
            Arc::clone(&engine) as Arc<dyn TransferEngine>,
            inbound_rx,
            outbound_tx,
        );
        Harness {
            engine,
            inbound: inbound_tx,
            outbound: outbound_rx,
            task: tokio::spawn(session.run()),
        }
    }

    fn params(request: SessionRequest) -> WorkerParams {
        let mut config = SeedbankConfig::default();
        config.main.torrent_manager_exec_interval = 1;
        let mut params = WorkerParams::derive("test", request, &config, false);
        params.tick_interval_ms = 10;
        params.torrent_manager_exec_interval_secs = Some(1);
        params
    }

    async fn next_of_kind(rx: &mut mpsc::Receiver<QueueItem>, wanted: &str) -> QueueItem {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let item = rx.recv().await.expect("outbound open");
                if item.kind == wanted {
                    return item;
                }
            }
        })
        .await
        .expect("report in time")
    }

    async fn send(harness: &Harness, command: SessionCommand) {
        harness
            .inbound
            .send(command.to_item().expect("encode"))
            .await
            .expect("inbound open");
    }

    #[tokio::test]
    async fn server_reports_init_then_stops_on_request() {
        let mut harness = spawn_session(params(SessionRequest::server(Duration::from_millis(10))));
        let init = next_of_kind(&mut harness.outbound, kind::SERVER_INIT).await;
        assert_eq!(init.value["peer_id"], seedbank_torrent_core::stub::DEFAULT_PEER_ID);
        next_of_kind(&mut harness.outbound, kind::UPDATE).await;
        assert_eq!(
            harness.engine.extensions(),
            vec!["store_torrent_db", "ut_metadata", "metadata_transfer", "smart_ban"]
        );

        send(&harness, SessionCommand::Stop).await;
        let result = harness.task.await.expect("join");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn server_without_store_plugin_reports_a_fatal_error() {
        let mut params = params(SessionRequest::server(Duration::from_millis(10)));
        params.store_plugin = None;
        let mut harness = spawn_session(params);
        let item = next_of_kind(&mut harness.outbound, kind::ERROR).await;
        assert_eq!(item.value["category"], "configuration");
        assert!(harness.task.await.expect("join").is_err());
    }

    #[tokio::test]
    async fn client_finishes_an_upload() {
        let mut harness = spawn_session(params(SessionRequest::client(Duration::from_millis(10))));
        let descriptor = DescriptorBuilder::new("upload.bin")
            .length(4096)
            .build()
            .expect("descriptor");
        let content_hash = descriptor.hash().clone();
        send(
            &harness,
            SessionCommand::AddTorrent(AddTorrentParams {
                content_hash: content_hash.clone(),
                descriptor: descriptor.bytes().to_vec(),
                storage_root: PathBuf::from("/data/upload"),
            }),
        )
        .await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while !harness.engine.contains(&content_hash) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("torrent added");
        harness.engine.set_progress(&content_hash, 1.0);

        let item = next_of_kind(&mut harness.outbound, kind::TORRENT_FINISHED).await;
        assert_eq!(item.value["content_hash"], content_hash.as_str());
        assert_eq!(item.value["storage_root"], "/data/upload");

        drop(harness.inbound);
        assert!(harness.task.await.expect("join").is_ok());
    }

    #[tokio::test]
    async fn publish_stats_is_rejected_by_clients_but_not_fatal() {
        let mut harness = spawn_session(params(SessionRequest::client(Duration::from_millis(10))));
        send(
            &harness,
            SessionCommand::PublishStats(PublishStatsParams { enable: true }),
        )
        .await;
        next_of_kind(&mut harness.outbound, kind::UPDATE).await;
        assert_eq!(harness.engine.event_mask(), EventMask::Default);
        send(&harness, SessionCommand::Stop).await;
        assert!(harness.task.await.expect("join").is_ok());
    }

    #[tokio::test]
    async fn servers_ignore_upload_commands() {
        let mut harness = spawn_session(params(SessionRequest::server(Duration::from_millis(10))));
        let descriptor = DescriptorBuilder::new("stray.bin")
            .length(512)
            .build()
            .expect("descriptor");
        let content_hash = descriptor.hash().clone();
        send(
            &harness,
            SessionCommand::AddTorrent(AddTorrentParams {
                content_hash: content_hash.clone(),
                descriptor: descriptor.bytes().to_vec(),
                storage_root: PathBuf::from("/data/stray"),
            }),
        )
        .await;
        next_of_kind(&mut harness.outbound, kind::UPDATE).await;
        next_of_kind(&mut harness.outbound, kind::UPDATE).await;
        assert!(!harness.engine.contains(&content_hash));
        send(&harness, SessionCommand::Stop).await;
        assert!(harness.task.await.expect("join").is_ok());
    }

    #[tokio::test]
    async fn server_toggles_statistics() {
        let harness = spawn_session(params(SessionRequest::server(Duration::from_millis(10))));
        send(
            &harness,
            SessionCommand::PublishStats(PublishStatsParams { enable: true }),
        )
        .await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while harness.engine.event_mask() != EventMask::Stats {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("stats mask");

        send(
            &harness,
            SessionCommand::PublishStats(PublishStatsParams { enable: false }),
        )
        .await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while harness.engine.event_mask() != EventMask::Default {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("default mask");
        send(&harness, SessionCommand::Stop).await;
        assert!(harness.task.await.expect("join").is_ok());
    }

    #[tokio::test]
    async fn empty_watcher_reports_exit_once() {
        let mut params = params(SessionRequest::client(Duration::from_millis(10)));
        params.watcher_rules.clear();
        let mut harness = spawn_session(params);
        next_of_kind(&mut harness.outbound, kind::WATCHER_EXITED).await;
        for _ in 0..2 {
            next_of_kind(&mut harness.outbound, kind::UPDATE).await;
        }
        send(&harness, SessionCommand::Stop).await;
        assert!(harness.task.await.expect("join").is_ok());
        while let Ok(item) = harness.outbound.try_recv() {
            assert_ne!(item.kind, kind::WATCHER_EXITED);
        }
    }
}
