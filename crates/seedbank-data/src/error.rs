//! Error types for the persistence layer.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::PathBuf;

/// Result alias for persistence operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised by record stores.
#[derive(Debug)]
pub enum DataError {
    /// Reading or writing a record file failed.
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// File involved in the failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// A record could not be encoded or decoded.
    Codec {
        /// Operation identifier.
        operation: &'static str,
        /// File involved in the failure.
        path: PathBuf,
        /// Underlying serde error.
        source: serde_json::Error,
    },
}

impl DataError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn codec(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: serde_json::Error,
    ) -> Self {
        Self::Codec {
            operation,
            path: path.into(),
            source,
        }
    }
}

impl Display for DataError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { .. } => formatter.write_str("record store io failed"),
            Self::Codec { .. } => formatter.write_str("record encoding failed"),
        }
    }
}

impl Error for DataError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Codec { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_error_display_and_source() {
        let io = DataError::io("read", "/tmp/x.json", io::Error::other("disk"));
        assert_eq!(io.to_string(), "record store io failed");
        assert!(io.source().is_some());

        let Err(json) = serde_json::from_str::<serde_json::Value>("{") else {
            panic!("expected invalid json");
        };
        let codec = DataError::codec("decode", "/tmp/x.json", json);
        assert_eq!(codec.to_string(), "record encoding failed");
        assert!(codec.source().is_some());
    }
}
