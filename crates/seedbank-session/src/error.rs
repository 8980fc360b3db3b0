//! # Design
//!
//! - Centralize session, watcher and supervisor failures in one enum.
//! - Keep error messages constant; store operational context in fields.
//! - Map every variant onto a coarse category reported to the supervisor.

use std::error::Error;
use std::io;

use seedbank_torrent_core::{ContentHash, TorrentError};
use thiserror::Error;

/// Errors raised by session components.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The action period does not fit at least two tick periods.
    #[error("invalid tick schedule")]
    InvalidSchedule {
        /// Action period in milliseconds.
        action_ms: u128,
        /// Tick period in milliseconds.
        tick_ms: u128,
    },
    /// A required parameter was missing.
    #[error("required parameter missing")]
    MissingParameter {
        /// Parameter name.
        field: &'static str,
    },
    /// A session with this key is already running.
    #[error("session already exists")]
    DuplicateSession {
        /// Session key.
        key: String,
    },
    /// No session is registered under this key.
    #[error("unknown session")]
    UnknownSession {
        /// Session key.
        key: String,
    },
    /// The registry lock could not be acquired in time.
    #[error("session registry lock unavailable")]
    LockTimeout {
        /// Operation that needed the lock.
        operation: &'static str,
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// A rule with this name is already registered.
    #[error("duplicate match rule")]
    DuplicateRule {
        /// Rule name.
        name: String,
    },
    /// The watcher was stopped and cannot run again.
    #[error("event watcher stopped")]
    WatcherStopped {
        /// Watcher label.
        label: String,
    },
    /// No torrents are tracked yet.
    #[error("no tracked torrents")]
    NothingTracked,
    /// The torrent is not tracked by this session.
    #[error("torrent not tracked")]
    NotTracked {
        /// Content hash.
        content_hash: ContentHash,
    },
    /// A queue item named an unknown type.
    #[error("unknown queue item type")]
    UnknownItem {
        /// Item type.
        kind: String,
    },
    /// A queue item value did not match its type.
    #[error("invalid queue item payload")]
    InvalidPayload {
        /// Item type.
        kind: String,
        /// Source decoding error.
        source: serde_json::Error,
    },
    /// The command is not handled by this session role.
    #[error("command not supported by session role")]
    UnsupportedCommand {
        /// Item type.
        kind: &'static str,
    },
    /// The worker's inbound channel is full.
    #[error("session queue full")]
    QueueFull {
        /// Session key.
        key: String,
    },
    /// The worker's channel is closed.
    #[error("session queue closed")]
    QueueClosed {
        /// Session key.
        key: String,
    },
    /// Descriptor or hash validation failed.
    #[error("torrent validation failed")]
    Torrent {
        /// Operation identifier.
        operation: &'static str,
        /// Source torrent error.
        source: TorrentError,
    },
    /// The transfer engine reported a failure.
    #[error("transfer engine operation failed")]
    Engine {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying engine failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Launching or waiting on a worker process failed.
    #[error("worker process operation failed")]
    Process {
        /// Operation identifier.
        operation: &'static str,
        /// Source IO error.
        source: io::Error,
    },
    /// Worker parameters could not be encoded or decoded.
    #[error("worker parameters invalid")]
    Params {
        /// Source serde error.
        source: serde_json::Error,
    },
}

/// Convenience alias for session results.
pub type SessionResult<T> = Result<T, SessionError>;

impl SessionError {
    pub(crate) fn engine(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Engine {
            operation,
            source: source.into(),
        }
    }

    pub(crate) const fn torrent(operation: &'static str, source: TorrentError) -> Self {
        Self::Torrent { operation, source }
    }

    /// Coarse category reported in outbound `error` items.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::InvalidSchedule { .. }
            | Self::MissingParameter { .. }
            | Self::DuplicateSession { .. }
            | Self::Params { .. } => "configuration",
            Self::UnknownSession { .. } | Self::NotTracked { .. } | Self::NothingTracked => {
                "lookup"
            }
            Self::DuplicateRule { .. }
            | Self::UnknownItem { .. }
            | Self::InvalidPayload { .. }
            | Self::UnsupportedCommand { .. }
            | Self::Torrent { .. } => "validation",
            Self::QueueFull { .. } | Self::QueueClosed { .. } | Self::LockTimeout { .. } => {
                "transient_io"
            }
            Self::Engine { .. } | Self::Process { .. } => "engine",
            Self::WatcherStopped { .. } => "session",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_the_error_taxonomy() {
        let cases = [
            (
                SessionError::InvalidSchedule {
                    action_ms: 1,
                    tick_ms: 1,
                },
                "configuration",
                "invalid tick schedule",
            ),
            (
                SessionError::UnknownSession {
                    key: "x".to_string(),
                },
                "lookup",
                "unknown session",
            ),
            (
                SessionError::DuplicateRule {
                    name: "r".to_string(),
                },
                "validation",
                "duplicate match rule",
            ),
            (
                SessionError::LockTimeout {
                    operation: "create",
                    attempts: 10,
                },
                "transient_io",
                "session registry lock unavailable",
            ),
            (
                SessionError::engine("start", anyhow::anyhow!("bind failed")),
                "engine",
                "transfer engine operation failed",
            ),
        ];
        for (err, category, message) in cases {
            assert_eq!(err.category(), category);
            assert_eq!(err.to_string(), message);
        }
    }

    #[test]
    fn engine_errors_keep_their_source() {
        let err = SessionError::engine("add_torrent", anyhow::anyhow!("duplicate"));
        let source = std::error::Error::source(&err).map(ToString::to_string);
        assert_eq!(source.as_deref(), Some("duplicate"));
    }
}
