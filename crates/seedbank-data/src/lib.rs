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

//! Persistence for upload records and seeded items.
//!
//! Both record kinds are keyed by content hash. `JsonFileStore` keeps one JSON
//! document per record under a root directory; `MemoryStore` backs tests.

pub mod error;
pub mod json;
pub mod memory;
pub mod model;
pub mod store;

pub use error::{DataError, Result};
pub use json::JsonFileStore;
pub use memory::MemoryStore;
pub use model::{SeededItem, UploadRecord};
pub use store::{SeedStore, UploadStore};
