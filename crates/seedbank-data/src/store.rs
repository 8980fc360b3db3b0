//! Record store capabilities.

use async_trait::async_trait;
use seedbank_torrent_core::ContentHash;

use crate::error::Result;
use crate::model::{SeededItem, UploadRecord};

/// Keyed persistence for upload records.
#[async_trait]
pub trait UploadStore: Send + Sync {
    /// Fetch the record for `content_hash`.
    async fn get_upload(&self, content_hash: &ContentHash) -> Result<Option<UploadRecord>>;
    /// Insert or replace a record.
    async fn save_upload(&self, record: &UploadRecord) -> Result<()>;
    /// Remove a record; returns whether one existed.
    async fn delete_upload(&self, content_hash: &ContentHash) -> Result<bool>;
}

/// Keyed persistence for seeded items.
#[async_trait]
pub trait SeedStore: Send + Sync {
    /// Fetch the item for `content_hash`.
    async fn get_seeded(&self, content_hash: &ContentHash) -> Result<Option<SeededItem>>;
    /// Insert or replace an item.
    async fn save_seeded(&self, item: &SeededItem) -> Result<()>;
    /// Remove an item; returns whether one existed.
    async fn delete_seeded(&self, content_hash: &ContentHash) -> Result<bool>;
}
