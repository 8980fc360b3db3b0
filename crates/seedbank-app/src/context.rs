//! Shared application state handed to the server loop and control handler.

use std::sync::Arc;
use std::time::Duration;

use seedbank_config::SeedbankConfig;
use seedbank_data::{SeedStore, UploadStore};
use seedbank_events::NotificationBus;
use seedbank_session::{SessionSupervisor, WorkerLauncher};

use crate::promote::{SeedPromoter, StorePromoter};
use crate::upload::UploadManager;

/// Key of the long-lived seeding session.
pub const SERVER_SESSION_KEY: &str = "server";
/// Tick interval of the server loop and of every worker it starts.
pub const SESSION_TICK_INTERVAL: Duration = Duration::from_millis(500);

/// Configuration, bus, supervisor and upload workflow of one server.
pub struct AppContext {
    config: Arc<SeedbankConfig>,
    notifications: NotificationBus,
    supervisor: Arc<SessionSupervisor>,
    uploads: UploadManager,
}

impl AppContext {
    /// Wire a context over `store`, promoting uploads through a
    /// [`StorePromoter`].
    #[must_use]
    pub fn new<S>(
        config: Arc<SeedbankConfig>,
        launcher: Arc<dyn WorkerLauncher>,
        store: Arc<S>,
        verbose: bool,
    ) -> Self
    where
        S: UploadStore + SeedStore + 'static,
    {
        let seeds: Arc<dyn SeedStore> = store.clone();
        let promoter: Arc<dyn SeedPromoter> = Arc::new(StorePromoter::new(
            seeds.clone(),
            config.main.torrent_file_root.clone(),
        ));
        Self::with_promoter(config, launcher, store, seeds, promoter, verbose)
    }

    /// Wire a context with an explicit promoter.
    #[must_use]
    pub fn with_promoter(
        config: Arc<SeedbankConfig>,
        launcher: Arc<dyn WorkerLauncher>,
        uploads: Arc<dyn UploadStore>,
        seeds: Arc<dyn SeedStore>,
        promoter: Arc<dyn SeedPromoter>,
        verbose: bool,
    ) -> Self {
        let notifications = NotificationBus::new();
        let supervisor = Arc::new(SessionSupervisor::new(config.clone(), launcher, verbose));
        let uploads = UploadManager::new(
            supervisor.clone(),
            uploads,
            seeds,
            promoter,
            notifications.clone(),
            config.main.data_volume_root.clone(),
        );
        Self {
            config,
            notifications,
            supervisor,
            uploads,
        }
    }

    /// Loaded configuration.
    #[must_use]
    pub fn config(&self) -> &SeedbankConfig {
        &self.config
    }

    /// Outbound notification bus.
    #[must_use]
    pub const fn notifications(&self) -> &NotificationBus {
        &self.notifications
    }

    /// Session registry.
    #[must_use]
    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    /// Upload lifecycle workflow.
    #[must_use]
    pub const fn uploads(&self) -> &UploadManager {
        &self.uploads
    }
}
