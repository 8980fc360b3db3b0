//! # Design
//!
//! - Centralize application-level errors for bootstrap and the upload workflow.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Preserve source errors without re-logging at call sites.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration operations failed.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: seedbank_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: seedbank_telemetry::TelemetryError,
    },
    /// Session supervision failed.
    #[error("session operation failed")]
    Session {
        /// Operation identifier.
        operation: &'static str,
        /// Source session error.
        source: seedbank_session::SessionError,
    },
    /// Record persistence failed.
    #[error("record persistence failed")]
    Data {
        /// Operation identifier.
        operation: &'static str,
        /// Source data error.
        source: seedbank_data::DataError,
    },
    /// Descriptor or content hash handling failed.
    #[error("torrent operation failed")]
    Torrent {
        /// Operation identifier.
        operation: &'static str,
        /// Source torrent error.
        source: seedbank_torrent_core::TorrentError,
    },
    /// IO operations failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Optional path involved in the failure.
        path: Option<PathBuf>,
        /// Source IO error.
        source: io::Error,
    },
    /// A broker document could not be encoded or decoded.
    #[error("broker document codec failed")]
    Codec {
        /// Operation identifier.
        operation: &'static str,
        /// Source serde error.
        source: serde_json::Error,
    },
    /// A request carried a missing or malformed field.
    #[error("invalid request")]
    InvalidRequest {
        /// Field name that failed validation.
        field: &'static str,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
    /// The content is already a seeded item.
    #[error("content already seeded")]
    AlreadySeeded {
        /// Content hash of the item.
        content_hash: String,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: seedbank_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: seedbank_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn session(
        operation: &'static str,
        source: seedbank_session::SessionError,
    ) -> Self {
        Self::Session { operation, source }
    }

    pub(crate) const fn data(operation: &'static str, source: seedbank_data::DataError) -> Self {
        Self::Data { operation, source }
    }

    pub(crate) const fn torrent(
        operation: &'static str,
        source: seedbank_torrent_core::TorrentError,
    ) -> Self {
        Self::Torrent { operation, source }
    }

    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: Some(path.into()),
            source,
        }
    }

    pub(crate) const fn codec(operation: &'static str, source: serde_json::Error) -> Self {
        Self::Codec { operation, source }
    }

    pub(crate) const fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self::InvalidRequest { field, reason }
    }
}
