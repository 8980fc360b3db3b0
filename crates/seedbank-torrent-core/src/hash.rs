//! Content hash identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{TorrentError, TorrentResult};

/// Number of hexadecimal characters in a content hash.
const HASH_HEX_LEN: usize = 40;

/// SHA-1 digest of a descriptor's info section, rendered as 40 lowercase hex
/// characters. Primary key for uploads and seeded items.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Parse and normalise a hex content hash.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::InvalidContentHash`] unless the input is exactly
    /// 40 hexadecimal characters.
    pub fn parse(value: impl AsRef<str>) -> TorrentResult<Self> {
        let raw = value.as_ref().trim();
        if raw.len() != HASH_HEX_LEN || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TorrentError::InvalidContentHash {
                value: raw.to_string(),
            });
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    /// Build a hash from a raw SHA-1 digest.
    #[must_use]
    pub fn from_digest(digest: [u8; 20]) -> Self {
        Self(hex::encode(digest))
    }

    /// Hex representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentHash {
    type Err = TorrentError;

    fn from_str(value: &str) -> TorrentResult<Self> {
        Self::parse(value)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = TorrentError;

    fn try_from(value: String) -> TorrentResult<Self> {
        Self::parse(value)
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.0
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
