//! Upload lifecycle: ingest, promotion and removal of client uploads.
//!
//! # Design
//! - Uploads are served by a single `client` session created on demand; the
//!   supervisor stops it again once it has been idle past the grace period.
//! - Descriptor and data share one directory per content hash below the data
//!   volume root.
//! - Session commands are fire-and-forget; the supervisor logs send failures.
//! - Completion arrives asynchronously as a `torrent_finished` report routed
//!   to [`UploadManager::convert_to_torrent`].

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use seedbank_data::{SeedStore, UploadRecord, UploadStore};
use seedbank_events::{Notification, NotificationBus, Topic, UploadAction};
use seedbank_session::{AddTorrentParams, SessionCommand, SessionRequest, SessionSupervisor};
use seedbank_torrent_core::{ContentDescriptor, ContentHash};
use tokio::fs;
use tracing::{debug, error, info, warn};

use crate::context::SESSION_TICK_INTERVAL;
use crate::error::{AppError, AppResult};
use crate::promote::SeedPromoter;

/// Key of the session serving client uploads.
pub const UPLOAD_SESSION_KEY: &str = "upload_";

/// Drives uploads from the first `start` to promotion or deletion.
pub struct UploadManager {
    supervisor: Arc<SessionSupervisor>,
    uploads: Arc<dyn UploadStore>,
    seeds: Arc<dyn SeedStore>,
    promoter: Arc<dyn SeedPromoter>,
    notifications: NotificationBus,
    data_volume_root: PathBuf,
}

impl UploadManager {
    /// Manager storing upload data below `data_volume_root`.
    #[must_use]
    pub fn new(
        supervisor: Arc<SessionSupervisor>,
        uploads: Arc<dyn UploadStore>,
        seeds: Arc<dyn SeedStore>,
        promoter: Arc<dyn SeedPromoter>,
        notifications: NotificationBus,
        data_volume_root: PathBuf,
    ) -> Self {
        Self {
            supervisor,
            uploads,
            seeds,
            promoter,
            notifications,
            data_volume_root,
        }
    }

    /// Begin or resume serving the upload of `info_hash`.
    ///
    /// Content that is already seeded only produces a `seeded` notification.
    /// A new upload requires `descriptor`, which must hash to `info_hash`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidRequest`] for an empty hash or a missing
    /// descriptor, [`AppError::Torrent`] for a malformed hash or a descriptor
    /// that does not match it, and store, filesystem or session errors.
    pub async fn start(&self, info_hash: &str, descriptor: Option<&[u8]>) -> AppResult<()> {
        if info_hash.trim().is_empty() {
            return Err(AppError::invalid("info_hash", "empty"));
        }
        let content_hash =
            ContentHash::parse(info_hash).map_err(|err| AppError::torrent("parse_hash", err))?;

        if self
            .seeds
            .get_seeded(&content_hash)
            .await
            .map_err(|err| AppError::data("get_seeded", err))?
            .is_some()
        {
            info!(content_hash = %content_hash, "upload requested for seeded content");
            self.notify(UploadAction::Seeded, &content_hash, "Torrent already seeded");
            return Ok(());
        }

        self.ensure_upload_session().await?;

        let existing = self
            .uploads
            .get_upload(&content_hash)
            .await
            .map_err(|err| AppError::data("get_upload", err))?;
        let (record, bytes) = match existing {
            Some(mut record) => {
                record.touch();
                let path = record.descriptor_path();
                let bytes = fs::read(&path)
                    .await
                    .map_err(|err| AppError::io("read_descriptor", &path, err))?;
                info!(content_hash = %content_hash, "restarting existing upload");
                (record, bytes)
            }
            None => self.stage_new_upload(&content_hash, descriptor).await?,
        };

        self.uploads
            .save_upload(&record)
            .await
            .map_err(|err| AppError::data("save_upload", err))?;
        self.dispatch(SessionCommand::AddTorrent(AddTorrentParams {
            content_hash: record.content_hash.clone(),
            descriptor: bytes,
            storage_root: record.storage_root.clone(),
        }))
        .await;
        Ok(())
    }

    async fn stage_new_upload(
        &self,
        content_hash: &ContentHash,
        descriptor: Option<&[u8]>,
    ) -> AppResult<(UploadRecord, Vec<u8>)> {
        let bytes = descriptor
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| AppError::invalid("torrent_file", "missing"))?;
        let descriptor = ContentDescriptor::decode_expecting(bytes, content_hash)
            .map_err(|err| AppError::torrent("verify_descriptor", err))?;

        let storage_root = UploadRecord::storage_root_for(&self.data_volume_root, content_hash);
        fs::create_dir_all(&storage_root)
            .await
            .map_err(|err| AppError::io("create_storage_root", &storage_root, err))?;
        let record = UploadRecord::new(content_hash.clone(), descriptor.total_size(), storage_root);
        let path = record.descriptor_path();
        fs::write(&path, descriptor.bytes())
            .await
            .map_err(|err| AppError::io("write_descriptor", &path, err))?;
        info!(
            content_hash = %content_hash,
            name = %descriptor.name(),
            size = descriptor.total_size(),
            "new upload staged"
        );
        Ok((record, descriptor.bytes().to_vec()))
    }

    async fn ensure_upload_session(&self) -> AppResult<()> {
        if self.supervisor.is_alive(UPLOAD_SESSION_KEY).await {
            return Ok(());
        }
        self.supervisor
            .create(UPLOAD_SESSION_KEY, SessionRequest::client(SESSION_TICK_INTERVAL))
            .await
            .map_err(|err| AppError::session("create_upload_session", err))
    }

    /// Promote the finished upload of `content_hash` to a seeded item.
    ///
    /// Failures are logged; nothing is returned to the caller.
    pub async fn convert_to_torrent(&self, content_hash: &ContentHash) {
        if let Err(err) = self.try_convert(content_hash).await {
            error!(content_hash = %content_hash, error = %err, "failed to convert upload to torrent");
        }
    }

    async fn try_convert(&self, content_hash: &ContentHash) -> AppResult<()> {
        let Some(mut record) = self
            .uploads
            .get_upload(content_hash)
            .await
            .map_err(|err| AppError::data("get_upload", err))?
        else {
            warn!(content_hash = %content_hash, "no upload record for finished torrent");
            return Ok(());
        };

        self.promoter.promote(&record).await?;
        record.finished = true;
        record.touch();
        self.uploads
            .save_upload(&record)
            .await
            .map_err(|err| AppError::data("save_upload", err))?;
        self.notify(UploadAction::Finished, content_hash, "Upload finished");
        Ok(())
    }

    /// Remove the upload of `content_hash`, its data and any seeded item.
    ///
    /// # Errors
    ///
    /// Returns store or filesystem errors; an unknown hash is only logged.
    pub async fn delete(&self, content_hash: &ContentHash) -> AppResult<()> {
        let Some(record) = self
            .uploads
            .get_upload(content_hash)
            .await
            .map_err(|err| AppError::data("get_upload", err))?
        else {
            warn!(content_hash = %content_hash, "cannot delete unknown upload");
            return Ok(());
        };

        if !record.finished {
            self.stop(content_hash);
        }

        if let Some(item) = self
            .seeds
            .get_seeded(content_hash)
            .await
            .map_err(|err| AppError::data("get_seeded", err))?
        {
            remove_file_if_present(&item.descriptor_path).await?;
            self.seeds
                .delete_seeded(content_hash)
                .await
                .map_err(|err| AppError::data("delete_seeded", err))?;
            info!(content_hash = %content_hash, "seeded item deleted");
        }

        remove_file_if_present(&record.descriptor_path()).await?;
        match fs::remove_dir_all(&record.storage_root).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(AppError::io("remove_data", &record.storage_root, err)),
        }
        prune_empty_parents(&record.storage_root, &self.data_volume_root).await;

        self.uploads
            .delete_upload(content_hash)
            .await
            .map_err(|err| AppError::data("delete_upload", err))?;
        self.notify(UploadAction::Deleted, content_hash, "Upload and data deleted");
        Ok(())
    }

    /// Stop an in-flight upload. Currently a no-op.
    pub fn stop(&self, content_hash: &ContentHash) {
        debug!(content_hash = %content_hash, "upload stop requested");
    }

    /// Cancel an in-flight upload. Currently a no-op.
    pub fn cancel(&self, content_hash: &ContentHash) {
        debug!(content_hash = %content_hash, "upload cancel requested");
    }

    /// Report upload status. Currently a no-op.
    pub fn status(&self, content_hash: &ContentHash) {
        debug!(content_hash = %content_hash, "upload status requested");
    }

    async fn dispatch(&self, command: SessionCommand) {
        if self.supervisor.send(UPLOAD_SESSION_KEY, &command).await.is_err() {
            debug!(kind = command.kind(), "upload command dropped");
        }
    }

    fn notify(&self, action: UploadAction, content_hash: &ContentHash, message: &str) {
        self.notifications.publish(
            Topic::Notify,
            Notification::Upload {
                upload_action: action,
                info_hash: content_hash.to_string(),
                message: message.to_string(),
            },
        );
    }
}

async fn remove_file_if_present(path: &Path) -> AppResult<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::io("remove_file", path, err)),
    }
}

/// Remove empty directories above `path`, stopping at `root` (kept).
async fn prune_empty_parents(path: &Path, root: &Path) {
    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        if fs::remove_dir(dir).await.is_err() {
            break;
        }
        debug!(path = %dir.display(), "removed empty directory");
        current = dir.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AppContext;
    use seedbank_config::SeedbankConfig;
    use seedbank_data::{MemoryStore, SeededItem};
    use seedbank_events::NotificationEnvelope;
    use seedbank_session::ipc::kind;
    use seedbank_session::{
        LocalLauncher, SessionResult, WorkerLauncher, WorkerLink, WorkerParams,
    };
    use seedbank_torrent_core::{DescriptorBuilder, StubEngine, TransferEngine};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    /// Local launcher that records the type of every command sent to a worker.
    struct RecordingLauncher {
        inner: LocalLauncher,
        commands: Arc<Mutex<Vec<String>>>,
    }

    impl WorkerLauncher for RecordingLauncher {
        fn launch(&self, params: &WorkerParams) -> SessionResult<WorkerLink> {
            let mut link = self.inner.launch(params)?;
            let (tx, mut rx) = mpsc::channel(64);
            let forward = std::mem::replace(&mut link.inbound, tx);
            let commands = Arc::clone(&self.commands);
            tokio::spawn(async move {
                while let Some(item) = rx.recv().await {
                    commands.lock().expect("commands").push(item.kind.clone());
                    if forward.send(item).await.is_err() {
                        break;
                    }
                }
            });
            Ok(link)
        }
    }

    struct Fixture {
        _dir: TempDir,
        data_root: PathBuf,
        store: Arc<MemoryStore>,
        engine: Arc<StubEngine>,
        commands: Arc<Mutex<Vec<String>>>,
        context: AppContext,
    }

    impl Fixture {
        fn new() -> anyhow::Result<Self> {
            let dir = tempfile::tempdir()?;
            let mut config = SeedbankConfig::default();
            config.main.data_volume_root = dir.path().join("data");
            config.main.torrent_file_root = dir.path().join("torrents");
            let data_root = config.main.data_volume_root.clone();
            let engine = Arc::new(StubEngine::new());
            let shared = engine.clone();
            let commands = Arc::new(Mutex::new(Vec::new()));
            let launcher = RecordingLauncher {
                inner: LocalLauncher::new(Arc::new(
                    move |_: &WorkerParams| -> Arc<dyn TransferEngine> { shared.clone() },
                )),
                commands: Arc::clone(&commands),
            };
            let store = Arc::new(MemoryStore::new());
            let context = AppContext::new(
                Arc::new(config),
                Arc::new(launcher),
                store.clone(),
                false,
            );
            Ok(Self {
                _dir: dir,
                data_root,
                store,
                engine,
                commands,
                context,
            })
        }

        fn sent(&self, wanted: &str) -> usize {
            self.commands
                .lock()
                .expect("commands")
                .iter()
                .filter(|kind| kind.as_str() == wanted)
                .count()
        }

        async fn shutdown(&self) {
            let supervisor = self.context.supervisor();
            supervisor.stop(None).await;
            let _ = supervisor.tick().await;
            supervisor.join(None).await;
        }
    }

    fn drain(stream: &mut seedbank_events::NotificationStream) -> Vec<NotificationEnvelope> {
        std::iter::from_fn(|| stream.try_next()).collect()
    }

    async fn wait_until_served(engine: &StubEngine, hash: &ContentHash) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !engine.contains(hash) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("torrent reaches the upload session");
    }

    #[tokio::test]
    async fn start_stages_new_upload_and_serves_it() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let descriptor = DescriptorBuilder::new("movie.mkv").length(4096).build()?;
        let hash = descriptor.hash().clone();
        let mut stream = fixture.context.notifications().subscribe();

        fixture
            .context
            .uploads()
            .start(hash.as_str(), Some(descriptor.bytes()))
            .await?;

        assert_eq!(fixture.store.upload_count(), 1);
        let record = fixture.store.get_upload(&hash).await?.expect("record saved");
        assert_eq!(record.size, 4096);
        assert!(!record.finished);
        assert_eq!(
            record.storage_root,
            UploadRecord::storage_root_for(&fixture.data_root, &hash)
        );
        assert_eq!(fs::read(record.descriptor_path()).await?, descriptor.bytes());
        assert!(fixture.context.supervisor().is_alive(UPLOAD_SESSION_KEY).await);

        wait_until_served(&fixture.engine, &hash).await;
        assert_eq!(fixture.sent(kind::ADD_TORRENT), 1);
        assert!(!drain(&mut stream).iter().any(|envelope| matches!(
            envelope.notification,
            Notification::Upload {
                upload_action: UploadAction::Seeded,
                ..
            }
        )));
        fixture.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn start_on_seeded_content_only_notifies() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let hash = ContentHash::from_digest([7; 20]);
        fixture
            .store
            .save_seeded(&SeededItem {
                content_hash: hash.clone(),
                name: "seeded".to_string(),
                size: 1,
                data_root: fixture.data_root.clone(),
                descriptor_path: fixture.data_root.join("seeded.torrent"),
                added_at: chrono::Utc::now(),
            })
            .await?;
        let mut stream = fixture.context.notifications().subscribe();

        fixture.context.uploads().start(hash.as_str(), None).await?;

        let notifications = drain(&mut stream);
        assert_eq!(notifications.len(), 1);
        assert_eq!(
            notifications[0].notification,
            Notification::Upload {
                upload_action: UploadAction::Seeded,
                info_hash: hash.to_string(),
                message: "Torrent already seeded".to_string(),
            }
        );
        assert_eq!(fixture.store.upload_count(), 0);
        assert!(fixture.context.supervisor().is_empty().await);
        assert_eq!(fixture.sent(kind::ADD_TORRENT), 0);
        Ok(())
    }

    #[tokio::test]
    async fn start_rejects_empty_hash_and_missing_descriptor() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let uploads = fixture.context.uploads();

        let err = uploads.start("  ", None).await;
        assert!(matches!(
            err,
            Err(AppError::InvalidRequest { field: "info_hash", .. })
        ));

        let hash = ContentHash::from_digest([3; 20]);
        let err = uploads.start(hash.as_str(), None).await;
        assert!(matches!(
            err,
            Err(AppError::InvalidRequest { field: "torrent_file", .. })
        ));
        assert_eq!(fixture.store.upload_count(), 0);
        fixture.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn start_rejects_descriptor_for_other_content() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let descriptor = DescriptorBuilder::new("a.bin").length(10).build()?;
        let other = ContentHash::from_digest([0x42; 20]);

        let err = fixture
            .context
            .uploads()
            .start(other.as_str(), Some(descriptor.bytes()))
            .await;
        assert!(matches!(err, Err(AppError::Torrent { .. })));
        assert_eq!(fixture.store.upload_count(), 0);
        fixture.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn restarting_an_upload_reuses_the_record() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let descriptor = DescriptorBuilder::new("again.bin").length(32).build()?;
        let hash = descriptor.hash().clone();
        let uploads = fixture.context.uploads();

        uploads.start(hash.as_str(), Some(descriptor.bytes())).await?;
        let first = fixture.store.get_upload(&hash).await?.expect("record");
        uploads.start(hash.as_str(), None).await?;
        let second = fixture.store.get_upload(&hash).await?.expect("record");

        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(fixture.store.upload_count(), 1);
        wait_until_served(&fixture.engine, &hash).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while fixture.sent(kind::ADD_TORRENT) < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("add_torrent resent");
        fixture.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn convert_to_torrent_with_unknown_hash_does_nothing() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let mut stream = fixture.context.notifications().subscribe();

        fixture
            .context
            .uploads()
            .convert_to_torrent(&ContentHash::from_digest([1; 20]))
            .await;

        assert!(drain(&mut stream).is_empty());
        assert_eq!(fixture.store.seeded_count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn convert_to_torrent_promotes_and_notifies() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let descriptor = DescriptorBuilder::new("done.bin").length(128).build()?;
        let hash = descriptor.hash().clone();
        let uploads = fixture.context.uploads();
        uploads.start(hash.as_str(), Some(descriptor.bytes())).await?;
        let mut stream = fixture.context.notifications().subscribe();

        uploads.convert_to_torrent(&hash).await;

        let record = fixture.store.get_upload(&hash).await?.expect("record");
        assert!(record.finished);
        let item = fixture.store.get_seeded(&hash).await?.expect("seeded");
        assert_eq!(item.name, "done.bin");
        let notifications = drain(&mut stream);
        assert_eq!(notifications.len(), 1);
        assert!(matches!(
            notifications[0].notification,
            Notification::Upload {
                upload_action: UploadAction::Finished,
                ..
            }
        ));
        fixture.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn delete_removes_data_records_and_empty_parents() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let descriptor = DescriptorBuilder::new("bye.bin").length(16).build()?;
        let hash = descriptor.hash().clone();
        let uploads = fixture.context.uploads();
        uploads.start(hash.as_str(), Some(descriptor.bytes())).await?;
        uploads.convert_to_torrent(&hash).await;
        let item = fixture.store.get_seeded(&hash).await?.expect("seeded");
        let record = fixture.store.get_upload(&hash).await?.expect("record");
        fs::write(record.storage_root.join("bye.bin"), b"payload").await?;
        let mut stream = fixture.context.notifications().subscribe();

        uploads.delete(&hash).await?;

        assert!(!record.storage_root.exists());
        assert!(!item.descriptor_path.exists());
        assert!(fixture.data_root.is_dir());
        assert_eq!(std::fs::read_dir(&fixture.data_root)?.count(), 0);
        assert_eq!(fixture.store.upload_count(), 0);
        assert_eq!(fixture.store.seeded_count(), 0);
        let notifications = drain(&mut stream);
        assert!(matches!(
            notifications.last().map(|envelope| &envelope.notification),
            Some(Notification::Upload {
                upload_action: UploadAction::Deleted,
                ..
            })
        ));
        fixture.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn delete_of_unknown_upload_is_a_no_op() -> anyhow::Result<()> {
        let fixture = Fixture::new()?;
        let mut stream = fixture.context.notifications().subscribe();
        fixture
            .context
            .uploads()
            .delete(&ContentHash::from_digest([5; 20]))
            .await?;
        assert!(drain(&mut stream).is_empty());
        Ok(())
    }
}
