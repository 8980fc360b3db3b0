//! DTOs exchanged with transfer engines.

use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::descriptor::ContentDescriptor;
use crate::hash::ContentHash;

/// Event kind discriminants emitted by engines.
pub mod event_kind {
    /// The engine bound its listen socket.
    pub const LISTEN_SUCCEEDED: &str = "listen_succeeded_alert";
    /// The engine failed to bind its listen socket.
    pub const LISTEN_FAILED: &str = "listen_failed_alert";
    /// A torrent finished downloading.
    pub const TORRENT_FINISHED: &str = "torrent_finished_alert";
    /// A torrent was added.
    pub const TORRENT_ADDED: &str = "torrent_added_alert";
    /// A torrent was removed.
    pub const TORRENT_REMOVED: &str = "torrent_removed_alert";
    /// A torrent was paused.
    pub const TORRENT_PAUSED: &str = "torrent_paused_alert";
    /// A torrent was resumed.
    pub const TORRENT_RESUMED: &str = "torrent_resumed_alert";
    /// A remote peer opened a connection.
    pub const INCOMING_CONNECTION: &str = "incoming_connection_alert";
    /// A peer connected to a torrent.
    pub const PEER_CONNECT: &str = "peer_connect_alert";
    /// A peer disconnected.
    pub const PEER_DISCONNECTED: &str = "peer_disconnected_alert";
    /// A file operation failed.
    pub const FILE_ERROR: &str = "file_error_alert";
    /// A torrent entered an error state.
    pub const TORRENT_ERROR: &str = "torrent_error_alert";
    /// A tracker request failed.
    pub const TRACKER_ERROR: &str = "tracker_error_alert";
    /// Periodic per-torrent transfer statistics.
    pub const STATS: &str = "stats_alert";
    /// Diagnostics from the torrent store extension.
    pub const STORE_PLUGIN: &str = "store_plugin_alert";
}

/// Tuning profile applied when the engine starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineProfile {
    /// Many torrents, many peers, seeding oriented.
    Server,
    /// Few torrents, minimal memory.
    Client,
}

/// Settings applied to an engine at start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Interface to bind.
    pub listen_interface: IpAddr,
    /// Lowest port of the listen range.
    pub listen_port_min: u16,
    /// Highest port of the listen range.
    pub listen_port_max: u16,
    /// Tuning profile.
    pub profile: EngineProfile,
}

/// Which engine events are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventMask {
    /// Errors, status and peer events.
    #[default]
    Default,
    /// Everything in `Default` plus periodic statistics.
    Stats,
}

/// Request to admit a torrent into an engine.
#[derive(Debug, Clone)]
pub struct AddTorrent {
    /// Decoded descriptor.
    pub descriptor: ContentDescriptor,
    /// Directory the content is stored under.
    pub save_path: PathBuf,
}

/// Point-in-time status of one torrent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TorrentStatus {
    /// Content hash.
    pub content_hash: ContentHash,
    /// Content name.
    pub name: String,
    /// Storage directory.
    pub save_path: PathBuf,
    /// Completion fraction in `0.0..=1.0`.
    pub progress: f64,
    /// Whether the torrent is paused.
    pub paused: bool,
    /// Seconds since payload was last downloaded.
    pub seconds_since_download: u64,
    /// Seconds since payload was last uploaded.
    pub seconds_since_upload: u64,
    /// Connected peers.
    pub num_peers: u32,
}

impl TorrentStatus {
    /// Whether every piece has been received.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }
}

/// Aggregate engine counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Torrents loaded in the engine.
    pub num_torrents: usize,
    /// Connected peers across all torrents.
    pub num_peers: u32,
    /// Peers currently unchoked.
    pub num_unchoked: u32,
    /// Upload slots available.
    pub allowed_upload_slots: u32,
    /// Current upload rate in bytes per second.
    pub upload_rate: u64,
    /// Current download rate in bytes per second.
    pub download_rate: u64,
    /// Bytes uploaded since start.
    pub total_upload: u64,
    /// Bytes downloaded since start.
    pub total_download: u64,
    /// Payload upload rate in bytes per second.
    pub payload_upload_rate: u64,
    /// Payload download rate in bytes per second.
    pub payload_download_rate: u64,
    /// Payload bytes uploaded since start.
    pub total_payload_upload: u64,
    /// Payload bytes downloaded since start.
    pub total_payload_download: u64,
}

/// Asynchronous notification drained from an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Discriminant, see [`event_kind`].
    pub kind: String,
    /// Human readable description supplied by the engine.
    pub message: String,
    /// Torrent the event concerns, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<ContentHash>,
    /// Free-form named fields.
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl EngineEvent {
    /// Construct an event with no fields.
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            content_hash: None,
            fields: Map::new(),
        }
    }

    /// Attach the torrent the event concerns.
    #[must_use]
    pub fn with_hash(mut self, content_hash: ContentHash) -> Self {
        self.content_hash = Some(content_hash);
        self
    }

    /// Attach a named field.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Named field, if present.
    #[must_use]
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Named string field, if present.
    #[must_use]
    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}
