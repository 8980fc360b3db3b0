//! Process bootstrap for the server and worker commands.

use std::path::PathBuf;
use std::sync::Arc;

use seedbank_config::{ConfigLoader, SeedbankConfig};
use seedbank_data::JsonFileStore;
use seedbank_session::{ProcessLauncher, WorkerParams, run_worker_process};
use seedbank_telemetry::{LogFormat, LoggingConfig, build_sha, init_logging};
use tracing::{info, warn};

use crate::broker::{LineSink, NotificationForwarder, spawn_control_consumer};
use crate::context::AppContext;
use crate::control::ControlHandler;
use crate::error::{AppError, AppResult};
use crate::server::SeedbankServer;

/// Options of the `server` command.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Explicit configuration file; the search paths apply when absent.
    pub config: Option<PathBuf>,
    /// Debug logging and per-report diagnostics.
    pub verbose: bool,
    /// Shut down once the control input reaches EOF.
    pub exit_on_control_eof: bool,
}

/// Load configuration, wire the application context and run the server
/// until ctrl-c or SIGTERM, or until the control input closes when
/// [`ServerOptions::exit_on_control_eof`] is set.
///
/// # Errors
///
/// Returns an error if configuration, logging or the server session cannot
/// be set up.
pub async fn run_server(options: ServerOptions) -> AppResult<()> {
    let config = ConfigLoader::new()
        .with_process_env()
        .load(options.config.as_deref())
        .map_err(|err| AppError::config("load", err))?;
    init_server_logging(&config, options.verbose)?;
    info!(build_sha = build_sha(), "seedbank bootstrap starting");

    let config = Arc::new(config);
    let launcher = ProcessLauncher::current_exe()
        .map_err(|err| AppError::session("process_launcher", err))?;
    let store = Arc::new(JsonFileStore::new(config.store.root.clone()));
    let context = Arc::new(AppContext::new(
        config.clone(),
        Arc::new(launcher),
        store,
        options.verbose,
    ));

    let forwarder = NotificationForwarder::spawn(
        context.notifications(),
        config.broker.clone(),
        Arc::new(LineSink::stdout()),
    );
    let handler = Arc::new(ControlHandler::new(context.clone()));
    let control = spawn_control_consumer(tokio::io::stdin(), handler);

    let shutdown = shutdown_trigger(termination_signal(), control, options.exit_on_control_eof);
    let result = SeedbankServer::new(context).run(shutdown).await;
    forwarder.finish().await;
    result
}

/// Resolve on `signal`, or on the end of `control` when `exit_on_eof` is set.
/// Otherwise the end of the control input is only logged.
async fn shutdown_trigger<S, C>(signal: S, control: C, exit_on_eof: bool)
where
    S: Future<Output = ()>,
    C: Future,
{
    tokio::pin!(signal);
    tokio::select! {
        () = &mut signal => return,
        _ = control => {}
    }
    if exit_on_eof {
        info!("control input closed; shutting down");
        return;
    }
    info!("control input closed; waiting for a termination signal");
    signal.await;
}

async fn termination_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("ctrl-c received"),
        () = terminate => info!("SIGTERM received"),
    }
}

fn init_server_logging(config: &SeedbankConfig, verbose: bool) -> AppResult<()> {
    let format = match config.main.log_format.as_deref() {
        Some(raw) => raw
            .parse::<LogFormat>()
            .map_err(|err| AppError::telemetry("log_format", err))?,
        None => LogFormat::infer(),
    };
    init_logging(&LoggingConfig {
        level: &config.main.log_level,
        format,
        build_sha: build_sha(),
        verbose,
    })
    .map_err(|err| AppError::telemetry("init_logging", err))
}

/// Run one worker process from its serialised parameters.
///
/// # Errors
///
/// Returns an error if the parameters are malformed, logging cannot be
/// installed, or the worker failed fatally.
pub async fn run_worker(params: &str) -> AppResult<()> {
    let params =
        WorkerParams::from_json(params).map_err(|err| AppError::session("worker_params", err))?;
    init_logging(&LoggingConfig {
        verbose: params.verbose,
        ..LoggingConfig::default()
    })
    .map_err(|err| AppError::telemetry("init_logging", err))?;
    run_worker_process(params, seedbank_torrent_core::create_engine())
        .await
        .map_err(|err| AppError::session("run_worker", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test(start_paused = true)]
    async fn control_eof_alone_keeps_the_server_running() {
        let trigger = shutdown_trigger(std::future::pending::<()>(), async {}, false);
        let waited = tokio::time::timeout(Duration::from_secs(3600), trigger).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn signal_after_control_eof_shuts_down() {
        let (tx, rx) = oneshot::channel::<()>();
        let signal = async move {
            let _ = rx.await;
        };
        let trigger = tokio::spawn(shutdown_trigger(signal, async {}, false));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!trigger.is_finished());
        tx.send(()).expect("signal");
        tokio::time::timeout(Duration::from_secs(1), trigger)
            .await
            .expect("shutdown")
            .expect("join");
    }

    #[tokio::test(start_paused = true)]
    async fn control_eof_shuts_down_when_requested() {
        let trigger = shutdown_trigger(std::future::pending::<()>(), async {}, true);
        tokio::time::timeout(Duration::from_secs(1), trigger)
            .await
            .expect("shutdown on eof");
    }

    #[tokio::test(start_paused = true)]
    async fn signal_wins_while_control_is_open() {
        let trigger = shutdown_trigger(async {}, std::future::pending::<()>(), false);
        tokio::time::timeout(Duration::from_secs(1), trigger)
            .await
            .expect("shutdown on signal");
    }
}
