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

//! Seedbank server wiring.
//!
//! Layout: `bootstrap.rs` (config, logging and process wiring), `context.rs`
//! (shared application state), `server.rs` (the server loop), `upload.rs` and
//! `promote.rs` (upload lifecycle), `control.rs` and `broker.rs` (broker
//! control documents and outbound publishing), `cli.rs` (argument parsing).

pub mod bootstrap;
pub mod broker;
pub(crate) mod cli;
pub mod context;
pub mod control;
pub mod error;
pub mod promote;
pub mod server;
pub mod upload;

pub use bootstrap::{ServerOptions, run_server, run_worker};
pub use cli::run;
pub use context::{AppContext, SERVER_SESSION_KEY, SESSION_TICK_INTERVAL};
pub use control::ControlHandler;
pub use error::{AppError, AppResult};
pub use server::SeedbankServer;
pub use upload::{UPLOAD_SESSION_KEY, UploadManager};
