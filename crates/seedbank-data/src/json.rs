//! Directory-backed store holding one JSON document per record.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use seedbank_torrent_core::ContentHash;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tracing::debug;

use crate::error::{DataError, Result};
use crate::model::{SeededItem, UploadRecord};
use crate::store::{SeedStore, UploadStore};

const UPLOADS_DIR: &str = "uploads";
const SEEDED_DIR: &str = "seeded";

/// Record store writing `<root>/{uploads,seeded}/<hash>.json`.
///
/// Writes go to a temporary sibling and are renamed into place so a crash
/// never leaves a truncated record.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Store rooted at `root`; directories are created on first write.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn record_path(&self, kind: &str, content_hash: &ContentHash) -> PathBuf {
        self.root.join(kind).join(format!("{content_hash}.json"))
    }

    async fn read<T: DeserializeOwned + Send>(&self, path: &Path) -> Result<Option<T>> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(DataError::io("read_record", path, err)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| DataError::codec("decode_record", path, source))
    }

    async fn write<T: Serialize + Sync>(&self, path: &Path, record: &T) -> Result<()> {
        let body = serde_json::to_vec_pretty(record)
            .map_err(|source| DataError::codec("encode_record", path, source))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| DataError::io("create_record_dir", parent, err))?;
        }
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, body)
            .await
            .map_err(|err| DataError::io("write_record", &staging, err))?;
        fs::rename(&staging, path)
            .await
            .map_err(|err| DataError::io("commit_record", path, err))?;
        debug!(path = %path.display(), "record saved");
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(DataError::io("delete_record", path, err)),
        }
    }
}

#[async_trait]
impl UploadStore for JsonFileStore {
    async fn get_upload(&self, content_hash: &ContentHash) -> Result<Option<UploadRecord>> {
        self.read(&self.record_path(UPLOADS_DIR, content_hash)).await
    }

    async fn save_upload(&self, record: &UploadRecord) -> Result<()> {
        self.write(&self.record_path(UPLOADS_DIR, &record.content_hash), record)
            .await
    }

    async fn delete_upload(&self, content_hash: &ContentHash) -> Result<bool> {
        self.remove(&self.record_path(UPLOADS_DIR, content_hash)).await
    }
}

#[async_trait]
impl SeedStore for JsonFileStore {
    async fn get_seeded(&self, content_hash: &ContentHash) -> Result<Option<SeededItem>> {
        self.read(&self.record_path(SEEDED_DIR, content_hash)).await
    }

    async fn save_seeded(&self, item: &SeededItem) -> Result<()> {
        self.write(&self.record_path(SEEDED_DIR, &item.content_hash), item)
            .await
    }

    async fn delete_seeded(&self, content_hash: &ContentHash) -> Result<bool> {
        self.remove(&self.record_path(SEEDED_DIR, content_hash)).await
    }
}
