//! Error types for torrent core services.

use std::error::Error;

use thiserror::Error;

use crate::hash::ContentHash;

/// Primary error type for torrent operations.
#[derive(Debug, Error)]
pub enum TorrentError {
    /// A content hash was not 40 hexadecimal characters.
    #[error("invalid content hash")]
    InvalidContentHash {
        /// Rejected input.
        value: String,
    },
    /// The descriptor was not valid bencode.
    #[error("failed to decode descriptor")]
    Decode {
        /// Underlying decoder failure.
        #[source]
        source: serde_bencode::Error,
    },
    /// The descriptor decoded but lacked required structure.
    #[error("malformed descriptor")]
    MalformedDescriptor {
        /// Machine-readable reason.
        reason: &'static str,
    },
    /// The descriptor hashes to a different content hash than expected.
    #[error("content hash mismatch")]
    HashMismatch {
        /// Hash the caller asked for.
        expected: ContentHash,
        /// Hash computed from the descriptor.
        actual: ContentHash,
    },
    /// Operation is not supported by the underlying engine.
    #[error("torrent operation not supported")]
    Unsupported {
        /// Operation identifier.
        operation: &'static str,
    },
    /// Operation failed in the underlying engine.
    #[error("torrent operation failed")]
    OperationFailed {
        /// Operation identifier.
        operation: &'static str,
        /// Content hash when available.
        content_hash: Option<ContentHash>,
        /// Underlying failure.
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// Torrent was not found.
    #[error("torrent not found")]
    NotFound {
        /// Missing content hash.
        content_hash: ContentHash,
    },
}

/// Convenience alias for torrent operation results.
pub type TorrentResult<T> = Result<T, TorrentError>;
