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

//! File-backed configuration for the seedbank server.
//!
//! Layout: `model.rs` (typed sections), `defaults.rs` (default values and
//! search paths), `loader.rs` (YAML loading and environment overrides),
//! `validate.rs` (cross-field validation), `error.rs` (error types).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use model::{BrokerConfig, MainConfig, SeedbankConfig, StoreConfig, UploadConfig};
