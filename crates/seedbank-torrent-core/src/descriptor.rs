//! Content descriptor decoding.
//!
//! A descriptor is a bencoded dictionary whose `info` section names the
//! content, its pieces and either a single `length` or a `files` list. The
//! content hash is the SHA-1 of the re-encoded `info` section.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use serde_bencode::value::Value;
use sha1::{Digest, Sha1};

use crate::error::{TorrentError, TorrentResult};
use crate::hash::ContentHash;

/// Piece length used by [`DescriptorBuilder`] unless overridden.
const DEFAULT_PIECE_LENGTH: u64 = 256 * 1024;
/// Size of a single SHA-1 piece digest.
const PIECE_DIGEST_LEN: u64 = 20;

/// One file described by a descriptor, relative to the storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorFile {
    /// Path relative to the storage root, including the content name.
    pub path: PathBuf,
    /// File length in bytes.
    pub length: u64,
}

/// Decoded content descriptor together with its raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDescriptor {
    bytes: Vec<u8>,
    hash: ContentHash,
    name: String,
    total_size: u64,
    files: Vec<DescriptorFile>,
}

impl ContentDescriptor {
    /// Decode a descriptor and compute its content hash.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::Decode`] when the bytes are not bencode and
    /// [`TorrentError::MalformedDescriptor`] when the `info` section is missing
    /// or incomplete.
    pub fn decode(bytes: &[u8]) -> TorrentResult<Self> {
        if bytes.is_empty() {
            return Err(TorrentError::MalformedDescriptor { reason: "empty" });
        }
        let root: Value =
            serde_bencode::from_bytes(bytes).map_err(|source| TorrentError::Decode { source })?;
        let Value::Dict(root) = root else {
            return Err(TorrentError::MalformedDescriptor {
                reason: "root_not_dictionary",
            });
        };
        let info_value = root
            .get(b"info".as_slice())
            .ok_or(TorrentError::MalformedDescriptor {
                reason: "missing_info",
            })?;
        let Value::Dict(info) = info_value else {
            return Err(TorrentError::MalformedDescriptor {
                reason: "info_not_dictionary",
            });
        };
        if !matches!(info.get(b"pieces".as_slice()), Some(Value::Bytes(_))) {
            return Err(TorrentError::MalformedDescriptor {
                reason: "missing_pieces",
            });
        }

        let name = match info.get(b"name".as_slice()) {
            Some(Value::Bytes(raw)) => String::from_utf8_lossy(raw).into_owned(),
            _ => {
                return Err(TorrentError::MalformedDescriptor {
                    reason: "missing_name",
                });
            }
        };
        let files = collect_files(&name, info)?;
        let total_size = files.iter().map(|file| file.length).sum();

        let encoded = serde_bencode::to_bytes(info_value)
            .map_err(|source| TorrentError::Decode { source })?;
        let mut digest = [0_u8; 20];
        digest.copy_from_slice(&Sha1::digest(&encoded));

        Ok(Self {
            bytes: bytes.to_vec(),
            hash: ContentHash::from_digest(digest),
            name,
            total_size,
            files,
        })
    }

    /// Decode a descriptor and require it to hash to `expected`.
    ///
    /// # Errors
    ///
    /// Returns any decoding error, or [`TorrentError::HashMismatch`].
    pub fn decode_expecting(bytes: &[u8], expected: &ContentHash) -> TorrentResult<Self> {
        let descriptor = Self::decode(bytes)?;
        descriptor.verify(expected)?;
        Ok(descriptor)
    }

    /// Require the descriptor to hash to `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::HashMismatch`] when the hashes differ.
    pub fn verify(&self, expected: &ContentHash) -> TorrentResult<()> {
        if &self.hash == expected {
            Ok(())
        } else {
            Err(TorrentError::HashMismatch {
                expected: expected.clone(),
                actual: self.hash.clone(),
            })
        }
    }

    /// Raw descriptor bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Content hash of the `info` section.
    #[must_use]
    pub const fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// Content name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total content size in bytes.
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Files relative to the storage root.
    #[must_use]
    pub fn files(&self) -> &[DescriptorFile] {
        &self.files
    }
}

fn collect_files(name: &str, info: &HashMap<Vec<u8>, Value>) -> TorrentResult<Vec<DescriptorFile>> {
    if let Some(Value::Int(length)) = info.get(b"length".as_slice()) {
        return Ok(vec![DescriptorFile {
            path: safe_path(Path::new(name))?,
            length: non_negative(*length)?,
        }]);
    }

    let Some(Value::List(entries)) = info.get(b"files".as_slice()) else {
        return Err(TorrentError::MalformedDescriptor {
            reason: "missing_length",
        });
    };

    let mut files = Vec::with_capacity(entries.len());
    for entry in entries {
        let Value::Dict(entry) = entry else {
            return Err(TorrentError::MalformedDescriptor {
                reason: "file_not_dictionary",
            });
        };
        let Some(Value::Int(length)) = entry.get(b"length".as_slice()) else {
            return Err(TorrentError::MalformedDescriptor {
                reason: "file_missing_length",
            });
        };
        let Some(Value::List(parts)) = entry.get(b"path".as_slice()) else {
            return Err(TorrentError::MalformedDescriptor {
                reason: "file_missing_path",
            });
        };
        let mut path = PathBuf::from(name);
        for part in parts {
            let Value::Bytes(part) = part else {
                return Err(TorrentError::MalformedDescriptor {
                    reason: "file_path_not_string",
                });
            };
            path.push(String::from_utf8_lossy(part).as_ref());
        }
        files.push(DescriptorFile {
            path: safe_path(&path)?,
            length: non_negative(*length)?,
        });
    }
    Ok(files)
}

fn safe_path(path: &Path) -> TorrentResult<PathBuf> {
    let mut components = path.components().peekable();
    if components.peek().is_none() {
        return Err(TorrentError::MalformedDescriptor {
            reason: "empty_path",
        });
    }
    if components.all(|component| matches!(component, Component::Normal(_))) {
        Ok(path.to_path_buf())
    } else {
        Err(TorrentError::MalformedDescriptor {
            reason: "unsafe_path",
        })
    }
}

fn non_negative(length: i64) -> TorrentResult<u64> {
    u64::try_from(length).map_err(|_| TorrentError::MalformedDescriptor {
        reason: "negative_length",
    })
}

/// Assemble minimal, valid descriptors.
///
/// Piece digests are zero-filled; the result is suitable for seeding existing
/// data whose pieces are rechecked by the engine.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    name: String,
    piece_length: u64,
    files: Vec<(Vec<String>, u64)>,
    single_length: Option<u64>,
    announce: Option<String>,
}

impl DescriptorBuilder {
    /// Start a descriptor for content called `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            piece_length: DEFAULT_PIECE_LENGTH,
            files: Vec::new(),
            single_length: None,
            announce: None,
        }
    }

    /// Describe single-file content of `length` bytes.
    #[must_use]
    pub fn length(mut self, length: u64) -> Self {
        self.single_length = Some(length);
        self
    }

    /// Add a file (path relative to the content name) to multi-file content.
    #[must_use]
    pub fn file(mut self, path: &str, length: u64) -> Self {
        let parts = path.split('/').map(str::to_string).collect();
        self.files.push((parts, length));
        self
    }

    /// Override the piece length.
    #[must_use]
    pub fn piece_length(mut self, piece_length: u64) -> Self {
        self.piece_length = piece_length;
        self
    }

    /// Set the tracker announce URL.
    #[must_use]
    pub fn announce(mut self, url: impl Into<String>) -> Self {
        self.announce = Some(url.into());
        self
    }

    /// Encode the descriptor and decode it back into a [`ContentDescriptor`].
    ///
    /// # Errors
    ///
    /// Returns an error when lengths exceed the bencode integer range or the
    /// resulting descriptor fails validation.
    pub fn build(self) -> TorrentResult<ContentDescriptor> {
        let total: u64 = self.single_length.unwrap_or(0)
            + self.files.iter().map(|(_, length)| *length).sum::<u64>();
        let piece_length = self.piece_length.max(1);
        let piece_count = total.div_ceil(piece_length).max(1);
        let pieces_len = usize::try_from(piece_count * PIECE_DIGEST_LEN).map_err(|_| {
            TorrentError::MalformedDescriptor {
                reason: "content_too_large",
            }
        })?;

        let mut info = HashMap::new();
        info.insert(b"name".to_vec(), Value::Bytes(self.name.into_bytes()));
        info.insert(b"piece length".to_vec(), Value::Int(to_int(piece_length)?));
        info.insert(b"pieces".to_vec(), Value::Bytes(vec![0; pieces_len]));
        if let Some(length) = self.single_length {
            info.insert(b"length".to_vec(), Value::Int(to_int(length)?));
        } else {
            let mut files = Vec::with_capacity(self.files.len());
            for (parts, length) in self.files {
                let mut entry = HashMap::new();
                entry.insert(b"length".to_vec(), Value::Int(to_int(length)?));
                entry.insert(
                    b"path".to_vec(),
                    Value::List(
                        parts
                            .into_iter()
                            .map(|part| Value::Bytes(part.into_bytes()))
                            .collect(),
                    ),
                );
                files.push(Value::Dict(entry));
            }
            info.insert(b"files".to_vec(), Value::List(files));
        }

        let mut root = HashMap::new();
        if let Some(announce) = self.announce {
            root.insert(b"announce".to_vec(), Value::Bytes(announce.into_bytes()));
        }
        root.insert(b"info".to_vec(), Value::Dict(info));

        let bytes = serde_bencode::to_bytes(&Value::Dict(root))
            .map_err(|source| TorrentError::Decode { source })?;
        ContentDescriptor::decode(&bytes)
    }
}

fn to_int(value: u64) -> TorrentResult<i64> {
    i64::try_from(value).map_err(|_| TorrentError::MalformedDescriptor {
        reason: "length_out_of_range",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_file_descriptor_reports_size_and_path() -> TorrentResult<()> {
        let descriptor = DescriptorBuilder::new("archive.iso").length(1_000).build()?;
        assert_eq!(descriptor.name(), "archive.iso");
        assert_eq!(descriptor.total_size(), 1_000);
        assert_eq!(descriptor.files().len(), 1);
        assert_eq!(descriptor.files()[0].path, PathBuf::from("archive.iso"));
        Ok(())
    }

    #[test]
    fn multi_file_size_is_the_sum_of_files() -> TorrentResult<()> {
        let descriptor = DescriptorBuilder::new("dataset")
            .file("a.txt", 10)
            .file("nested/b.bin", 32)
            .build()?;
        assert_eq!(descriptor.total_size(), 42);
        let paths: Vec<_> = descriptor.files().iter().map(|f| f.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("dataset/a.txt"),
                PathBuf::from("dataset/nested/b.bin")
            ]
        );
        Ok(())
    }

    #[test]
    fn hash_is_stable_and_ignores_outer_keys() -> TorrentResult<()> {
        let plain = DescriptorBuilder::new("same").length(5).build()?;
        let announced = DescriptorBuilder::new("same")
            .length(5)
            .announce("http://tracker.invalid/announce")
            .build()?;
        assert_eq!(plain.hash(), announced.hash());
        assert_ne!(plain.bytes(), announced.bytes());

        let other = DescriptorBuilder::new("different").length(5).build()?;
        assert_ne!(plain.hash(), other.hash());
        Ok(())
    }

    #[test]
    fn decode_expecting_detects_mismatch() -> TorrentResult<()> {
        let descriptor = DescriptorBuilder::new("x").length(1).build()?;
        let wrong = ContentHash::from_digest([7; 20]);
        assert!(matches!(
            ContentDescriptor::decode_expecting(descriptor.bytes(), &wrong),
            Err(TorrentError::HashMismatch { .. })
        ));
        let same = ContentDescriptor::decode_expecting(descriptor.bytes(), descriptor.hash())?;
        assert_eq!(same.hash(), descriptor.hash());
        Ok(())
    }

    #[test]
    fn decode_rejects_garbage_and_missing_sections() {
        assert!(matches!(
            ContentDescriptor::decode(b""),
            Err(TorrentError::MalformedDescriptor { reason: "empty" })
        ));
        assert!(matches!(
            ContentDescriptor::decode(b"not bencode"),
            Err(TorrentError::Decode { .. })
        ));
        assert!(matches!(
            ContentDescriptor::decode(b"d4:spami1ee"),
            Err(TorrentError::MalformedDescriptor {
                reason: "missing_info"
            })
        ));
        assert!(matches!(
            ContentDescriptor::decode(b"d4:infod4:name1:xee"),
            Err(TorrentError::MalformedDescriptor {
                reason: "missing_pieces"
            })
        ));
    }

    #[test]
    fn decode_rejects_parent_directory_components() -> TorrentResult<()> {
        let result = DescriptorBuilder::new("content").file("../escape", 1).build();
        assert!(matches!(
            result,
            Err(TorrentError::MalformedDescriptor {
                reason: "unsafe_path"
            })
        ));
        Ok(())
    }
}
