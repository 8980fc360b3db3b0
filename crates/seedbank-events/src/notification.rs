//! Outbound notification payloads and their destinations.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Logical destination for a notification.
///
/// Queue names are resolved by the broker bridge from configuration so the
/// bus stays independent of deployment naming.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "queue", rename_all = "snake_case")]
pub enum Topic {
    /// The upstream notification queue (seedbank init, upload lifecycle).
    Notify,
    /// The statistics queue.
    Stats,
    /// A caller-supplied reply queue.
    Reply(String),
}

/// Upload lifecycle outcome reported upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadAction {
    /// The content is already a permanently seeded item.
    Seeded,
    /// The upload completed and was promoted to a seeded item.
    Finished,
    /// The upload, its data and any seeded item were removed.
    Deleted,
}

impl UploadAction {
    /// Wire representation of the action.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seeded => "seeded",
            Self::Finished => "finished",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for UploadAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notifications emitted by the seedbank server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Notification {
    /// The server worker is listening and reported its peer identifier.
    SeedbankInit {
        /// Configured seedbank identifier.
        seedbank_id: String,
        /// Peer identifier of the server engine.
        peer_id: String,
    },
    /// Upload lifecycle update.
    Upload {
        /// Outcome being reported.
        upload_action: UploadAction,
        /// Content hash of the upload.
        info_hash: String,
        /// Human readable description.
        message: String,
    },
    /// Reply to a ping request.
    PingResponse {
        /// Correlation identifier copied from the request.
        correlation_id: String,
    },
    /// Per-torrent statistics forwarded from the server worker.
    TorrentStats {
        /// Statistics document.
        stats: Value,
    },
    /// Aggregate engine statistics forwarded from the server worker.
    ServerStats {
        /// Statistics document.
        stats: Value,
    },
}

impl Notification {
    /// Render the document delivered to the broker.
    ///
    /// Statistics are delivered as their raw document; every other
    /// notification carries an `action` discriminant.
    ///
    /// # Errors
    ///
    /// Returns an error if the notification cannot be serialised.
    pub fn document(&self) -> serde_json::Result<Value> {
        match self {
            Self::TorrentStats { stats } | Self::ServerStats { stats } => Ok(stats.clone()),
            other => serde_json::to_value(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn upload_notification_document_matches_wire_shape() -> serde_json::Result<()> {
        let notification = Notification::Upload {
            upload_action: UploadAction::Deleted,
            info_hash: "ab".repeat(20),
            message: "Upload and data deleted".to_string(),
        };
        assert_eq!(
            notification.document()?,
            json!({
                "action": "upload",
                "upload_action": "deleted",
                "info_hash": "ab".repeat(20),
                "message": "Upload and data deleted",
            })
        );
        Ok(())
    }

    #[test]
    fn stats_notifications_deliver_raw_documents() -> serde_json::Result<()> {
        let stats = json!({"num_torrents": 3, "peer_id": "abc"});
        let notification = Notification::ServerStats {
            stats: stats.clone(),
        };
        assert_eq!(notification.document()?, stats);
        Ok(())
    }

    #[test]
    fn init_notification_carries_identifiers() -> serde_json::Result<()> {
        let notification = Notification::SeedbankInit {
            seedbank_id: "bank-1".to_string(),
            peer_id: "-LT0F00-".to_string(),
        };
        let document = notification.document()?;
        assert_eq!(document["action"], "seedbank_init");
        assert_eq!(document["seedbank_id"], "bank-1");
        Ok(())
    }
}
