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

//! Engine-agnostic torrent interfaces and DTOs.
//!
//! Layout: `hash.rs` (content hashes), `descriptor.rs` (descriptor decoding),
//! `model.rs` (engine DTOs), `engine.rs` (the transfer engine capability) and
//! `stub.rs` (the in-memory engine).

pub mod descriptor;
pub mod engine;
pub mod error;
pub mod hash;
pub mod model;
pub mod stub;

use std::sync::Arc;

pub use descriptor::{ContentDescriptor, DescriptorBuilder, DescriptorFile};
pub use engine::TransferEngine;
pub use error::{TorrentError, TorrentResult};
pub use hash::ContentHash;
pub use model::{
    AddTorrent, EngineEvent, EngineProfile, EngineSettings, EventMask, SessionStatus,
    TorrentStatus, event_kind,
};
pub use stub::StubEngine;

/// Construct the engine used by worker processes.
///
/// Deployments that link a native engine provide their own
/// [`TransferEngine`]; the in-memory engine is the default.
#[must_use]
pub fn create_engine() -> Arc<dyn TransferEngine> {
    Arc::new(StubEngine::new())
}
