use std::sync::Arc;
use std::time::Duration;

use seedbank_config::SeedbankConfig;
use seedbank_session::{
    ProcessLauncher, SessionReport, SessionRequest, SessionSupervisor, WorkerLauncher,
};

const TICK: Duration = Duration::from_millis(100);

fn supervisor(dir: &tempfile::TempDir) -> SessionSupervisor {
    let mut config = SeedbankConfig::default();
    config.main.data_volume_root = dir.path().join("data");
    config.main.torrent_file_root = dir.path().join("torrents");
    config.store.root = dir.path().join("store");
    let launcher: Arc<dyn WorkerLauncher> = Arc::new(ProcessLauncher::new(
        env!("CARGO_BIN_EXE_seedbank"),
        vec!["worker".to_string()],
    ));
    SessionSupervisor::new(Arc::new(config), launcher, false)
}

#[tokio::test]
async fn server_worker_process_announces_and_stops() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let supervisor = supervisor(&dir);
    supervisor
        .create("server", SessionRequest::server(TICK))
        .await?;

    let message = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            if let Some(message) = supervisor.check_queues().await.into_iter().next() {
                return message;
            }
        }
    })
    .await?;
    assert_eq!(message.key, "server");
    let SessionReport::ServerInit(init) = message.report else {
        panic!("expected server_init, got {:?}", message.report);
    };
    assert!(!init.peer_id.is_empty());

    supervisor.stop(None).await;
    supervisor.tick().await?;
    tokio::time::timeout(Duration::from_secs(20), supervisor.join(None)).await?;
    assert!(!supervisor.is_alive("server").await);
    Ok(())
}

#[tokio::test]
async fn client_worker_process_exits_on_stop() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let supervisor = supervisor(&dir);
    supervisor
        .create("upload_", SessionRequest::client(TICK))
        .await?;
    assert!(supervisor.is_alive("upload_").await);

    supervisor.stop(Some("upload_")).await;
    tokio::time::timeout(Duration::from_secs(20), async {
        while supervisor.is_alive("upload_").await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await?;
    supervisor.tick().await?;
    assert!(supervisor.is_empty().await);
    Ok(())
}
