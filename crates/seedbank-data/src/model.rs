//! Persistent record types.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use seedbank_torrent_core::ContentHash;

/// Extension of descriptor files on disk.
pub const DESCRIPTOR_EXTENSION: &str = "torrent";

/// Descriptor file name for a content hash.
#[must_use]
pub fn descriptor_file_name(content_hash: &ContentHash) -> String {
    format!("{content_hash}.{DESCRIPTOR_EXTENSION}")
}

/// Persistent state of one client-side upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Content hash of the upload.
    pub content_hash: ContentHash,
    /// Total content size in bytes.
    pub size: u64,
    /// Directory holding both the descriptor and the uploaded data.
    pub storage_root: PathBuf,
    /// Whether the upload completed and was promoted.
    pub finished: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last time the upload was (re)started or changed.
    pub updated_at: DateTime<Utc>,
}

impl UploadRecord {
    /// New unfinished record created now.
    #[must_use]
    pub fn new(content_hash: ContentHash, size: u64, storage_root: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            content_hash,
            size,
            storage_root,
            finished: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Storage directory for `content_hash` under `data_volume_root`.
    ///
    /// Records are sharded by the first two byte pairs of the hash so a single
    /// directory never holds every upload.
    #[must_use]
    pub fn storage_root_for(data_volume_root: &Path, content_hash: &ContentHash) -> PathBuf {
        let hex = content_hash.as_str();
        data_volume_root
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(hex)
    }

    /// Path of the descriptor stored alongside the data.
    #[must_use]
    pub fn descriptor_path(&self) -> PathBuf {
        self.storage_root
            .join(descriptor_file_name(&self.content_hash))
    }

    /// Refresh the update timestamp.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Content permanently served by the seedbank server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeededItem {
    /// Content hash of the item.
    pub content_hash: ContentHash,
    /// Content name from the descriptor.
    pub name: String,
    /// Total content size in bytes.
    pub size: u64,
    /// Directory the content data lives under.
    pub data_root: PathBuf,
    /// Path of the descriptor copy under the torrent file root.
    pub descriptor_path: PathBuf,
    /// Time the item was promoted.
    pub added_at: DateTime<Utc>,
}
