//! In-memory record store.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use seedbank_torrent_core::ContentHash;

use crate::error::Result;
use crate::model::{SeededItem, UploadRecord};
use crate::store::{SeedStore, UploadStore};

/// Volatile store used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    uploads: Mutex<HashMap<ContentHash, UploadRecord>>,
    seeded: Mutex<HashMap<ContentHash, SeededItem>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of upload records.
    #[must_use]
    pub fn upload_count(&self) -> usize {
        lock(&self.uploads).len()
    }

    /// Number of seeded items.
    #[must_use]
    pub fn seeded_count(&self) -> usize {
        lock(&self.seeded).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl UploadStore for MemoryStore {
    async fn get_upload(&self, content_hash: &ContentHash) -> Result<Option<UploadRecord>> {
        Ok(lock(&self.uploads).get(content_hash).cloned())
    }

    async fn save_upload(&self, record: &UploadRecord) -> Result<()> {
        lock(&self.uploads).insert(record.content_hash.clone(), record.clone());
        Ok(())
    }

    async fn delete_upload(&self, content_hash: &ContentHash) -> Result<bool> {
        Ok(lock(&self.uploads).remove(content_hash).is_some())
    }
}

#[async_trait]
impl SeedStore for MemoryStore {
    async fn get_seeded(&self, content_hash: &ContentHash) -> Result<Option<SeededItem>> {
        Ok(lock(&self.seeded).get(content_hash).cloned())
    }

    async fn save_seeded(&self, item: &SeededItem) -> Result<()> {
        lock(&self.seeded).insert(item.content_hash.clone(), item.clone());
        Ok(())
    }

    async fn delete_seeded(&self, content_hash: &ContentHash) -> Result<bool> {
        Ok(lock(&self.seeded).remove(content_hash).is_some())
    }
}
