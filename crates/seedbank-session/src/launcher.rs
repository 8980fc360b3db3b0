//! Launching worker sessions.
//!
//! [`ProcessLauncher`] re-executes the current binary in worker mode and
//! bridges its stdio to queue channels. [`LocalLauncher`] runs the worker
//! loop on a task of the current runtime and is used by tests and embedded
//! deployments.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use seedbank_torrent_core::{StubEngine, TransferEngine};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{SessionError, SessionResult};
use crate::ipc::{QUEUE_CAPACITY, QueueItem, spawn_line_reader, spawn_line_writer};
use crate::params::WorkerParams;
use crate::worker::WorkerSession;

/// Handle on a running worker.
#[async_trait]
pub trait WorkerProcess: Send {
    /// Whether the worker has not exited yet.
    fn is_alive(&mut self) -> bool;

    /// Wait for the worker to exit.
    async fn wait(&mut self) -> SessionResult<()>;

    /// OS process id, when the worker is a process.
    fn id(&self) -> Option<u32> {
        None
    }
}

/// Channels and handle of a freshly launched worker.
pub struct WorkerLink {
    /// Commands to the worker.
    pub inbound: mpsc::Sender<QueueItem>,
    /// Reports from the worker.
    pub outbound: mpsc::Receiver<QueueItem>,
    /// Worker handle.
    pub process: Box<dyn WorkerProcess>,
}

/// Starts workers.
pub trait WorkerLauncher: Send + Sync {
    /// Start a worker for `params`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Process`] or [`SessionError::Params`] when the
    /// worker cannot be started.
    fn launch(&self, params: &WorkerParams) -> SessionResult<WorkerLink>;
}

/// Launches workers as child processes.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    /// Run `program args... --params <json>` for each worker.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Re-execute the running binary with its `worker` subcommand.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Process`] if the executable path is unknown.
    pub fn current_exe() -> SessionResult<Self> {
        let program = std::env::current_exe().map_err(|source| SessionError::Process {
            operation: "current_exe",
            source,
        })?;
        Ok(Self::new(program, vec!["worker".to_string()]))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, params: &WorkerParams) -> SessionResult<WorkerLink> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg("--params")
            .arg(params.to_json()?)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| SessionError::Process {
                operation: "spawn",
                source,
            })?;
        let missing_pipe = |operation| SessionError::Process {
            operation,
            source: std::io::Error::other("worker pipe unavailable"),
        };
        let stdin = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let (inbound, writer) = spawn_line_writer(stdin, "session-inbound");
        let outbound = spawn_line_reader(stdout, "session-outbound");
        debug!(key = %params.key, pid = ?child.id(), "worker process spawned");
        Ok(WorkerLink {
            inbound,
            outbound,
            process: Box::new(ChildProcess { child, writer }),
        })
    }
}

struct ChildProcess {
    child: Child,
    writer: JoinHandle<()>,
}

#[async_trait]
impl WorkerProcess for ChildProcess {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn wait(&mut self) -> SessionResult<()> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|source| SessionError::Process {
                operation: "wait",
                source,
            })?;
        self.writer.abort();
        if !status.success() {
            warn!(%status, "worker process exited with failure");
        }
        Ok(())
    }

    fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Builds the engine of an in-process worker.
pub type EngineFactory = Arc<dyn Fn(&WorkerParams) -> Arc<dyn TransferEngine> + Send + Sync>;

/// Runs workers as tasks of the current runtime.
#[derive(Clone)]
pub struct LocalLauncher {
    factory: EngineFactory,
}

impl LocalLauncher {
    /// Launcher building engines through `factory`.
    #[must_use]
    pub fn new(factory: EngineFactory) -> Self {
        Self { factory }
    }

    /// Launcher giving each worker a fresh in-memory engine.
    #[must_use]
    pub fn stub() -> Self {
        Self::new(Arc::new(|_: &WorkerParams| -> Arc<dyn TransferEngine> {
            Arc::new(StubEngine::new())
        }))
    }
}

impl WorkerLauncher for LocalLauncher {
    fn launch(&self, params: &WorkerParams) -> SessionResult<WorkerLink> {
        let (inbound, inbound_rx) = mpsc::channel(QUEUE_CAPACITY);
        let (outbound_tx, outbound) = mpsc::channel(QUEUE_CAPACITY);
        let engine = (self.factory)(params);
        let session = WorkerSession::new(params.clone(), engine, inbound_rx, outbound_tx);
        let task = tokio::spawn(session.run());
        Ok(WorkerLink {
            inbound,
            outbound,
            process: Box::new(LocalProcess { task: Some(task) }),
        })
    }
}

struct LocalProcess {
    task: Option<JoinHandle<SessionResult<()>>>,
}

#[async_trait]
impl WorkerProcess for LocalProcess {
    fn is_alive(&mut self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    async fn wait(&mut self) -> SessionResult<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "local worker exited with error"),
            Err(err) => warn!(error = %err, "local worker task failed"),
        }
        Ok(())
    }
}
