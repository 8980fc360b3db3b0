#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(
    unused,
    unreachable_pub,
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

//! Worker sessions and their supervisor.
//!
//! Each session is a worker (normally a child process) owning one transfer
//! engine. The supervisor talks to it over two bounded queues of
//! [`QueueItem`]s. Inside the worker, an [`EventWatcher`] applies match
//! rules to engine events and a [`TorrentActivityManager`] expires idle
//! torrents and reports finished uploads, both paced by [`TickScheduler`]s.
//!
//! Layout:
//! - `ipc.rs`: queue items, typed commands and reports, JSON-lines bridges
//! - `tick.rs`, `rule.rs`, `watcher.rs`: scheduling and event matching
//! - `activity.rs`, `stats.rs`, `worker.rs`: the worker side
//! - `params.rs`, `launcher.rs`, `instance.rs`, `supervisor.rs`: the
//!   supervisor side

pub mod activity;
pub mod error;
pub mod instance;
pub mod ipc;
pub mod launcher;
pub mod params;
pub mod rule;
pub mod stats;
pub mod supervisor;
pub mod tick;
pub mod watcher;
pub mod worker;

pub use activity::{ActivitySettings, TorrentActivityManager};
pub use error::{SessionError, SessionResult};
pub use instance::{ReportChannel, SessionInstance};
pub use ipc::{
    AddPeerParams, AddTorrentParams, ErrorReport, PublishStatsParams, QueueItem,
    ServerInitReport, SessionCommand, SessionReport, TorrentFinishedReport, TorrentRef,
    UpdateReport,
};
pub use launcher::{
    EngineFactory, LocalLauncher, ProcessLauncher, WorkerLauncher, WorkerLink, WorkerProcess,
};
pub use params::{SessionRequest, SessionRole, StorePluginParams, WorkerParams};
pub use rule::{MatchRule, RuleEffect, RuleKind, RuleSpec};
pub use stats::ServerStatsPublisher;
pub use supervisor::{SessionMessage, SessionSupervisor};
pub use tick::TickScheduler;
pub use watcher::{EventWatcher, RuleSet, WatcherMode, WatcherSettings, WatcherState};
pub use worker::{WorkerSession, run_worker_process};
