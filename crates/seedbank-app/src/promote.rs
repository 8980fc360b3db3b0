//! Promotion of finished uploads to permanently seeded items.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use seedbank_data::model::descriptor_file_name;
use seedbank_data::{SeedStore, SeededItem, UploadRecord};
use seedbank_torrent_core::ContentDescriptor;
use tokio::fs;
use tracing::info;

use crate::error::{AppError, AppResult};

/// Turns a finished upload into a seeded item.
#[async_trait]
pub trait SeedPromoter: Send + Sync {
    /// Promote `record`, returning the stored item.
    ///
    /// # Errors
    ///
    /// Returns an error when the item already exists, the descriptor cannot
    /// be read or verified, or persistence fails.
    async fn promote(&self, record: &UploadRecord) -> AppResult<SeededItem>;
}

/// Promoter that copies the descriptor under the torrent file root, where the
/// server engine's store extension picks it up, and records the item.
pub struct StorePromoter {
    seeds: Arc<dyn SeedStore>,
    torrent_file_root: PathBuf,
}

impl StorePromoter {
    /// Promoter writing descriptors below `torrent_file_root`.
    #[must_use]
    pub fn new(seeds: Arc<dyn SeedStore>, torrent_file_root: impl Into<PathBuf>) -> Self {
        Self {
            seeds,
            torrent_file_root: torrent_file_root.into(),
        }
    }
}

#[async_trait]
impl SeedPromoter for StorePromoter {
    async fn promote(&self, record: &UploadRecord) -> AppResult<SeededItem> {
        let content_hash = &record.content_hash;
        if self
            .seeds
            .get_seeded(content_hash)
            .await
            .map_err(|err| AppError::data("get_seeded", err))?
            .is_some()
        {
            return Err(AppError::AlreadySeeded {
                content_hash: content_hash.to_string(),
            });
        }

        let source = record.descriptor_path();
        let bytes = fs::read(&source)
            .await
            .map_err(|err| AppError::io("read_descriptor", &source, err))?;
        let descriptor = ContentDescriptor::decode_expecting(&bytes, content_hash)
            .map_err(|err| AppError::torrent("verify_descriptor", err))?;

        fs::create_dir_all(&self.torrent_file_root)
            .await
            .map_err(|err| AppError::io("create_torrent_root", &self.torrent_file_root, err))?;
        let target = self.torrent_file_root.join(descriptor_file_name(content_hash));
        fs::write(&target, descriptor.bytes())
            .await
            .map_err(|err| AppError::io("write_descriptor", &target, err))?;

        let item = SeededItem {
            content_hash: content_hash.clone(),
            name: descriptor.name().to_string(),
            size: descriptor.total_size(),
            data_root: record.storage_root.clone(),
            descriptor_path: target,
            added_at: Utc::now(),
        };
        self.seeds
            .save_seeded(&item)
            .await
            .map_err(|err| AppError::data("save_seeded", err))?;
        info!(content_hash = %content_hash, name = %item.name, "upload promoted to seeded item");
        Ok(item)
    }
}
