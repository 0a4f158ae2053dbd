//! ieim_store
//!
//! Content-addressed raw object store (`raw_store/<kind>/<sha256><ext>`)
//! plus a shared atomic-write helper used by every other stage to persist
//! a JSON artifact exactly once: a hash-then-write-once pattern exposed
//! as a public `put`/`get` interface with an explicit immutability check.

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use ieim_common::{canonical_json_bytes, sha256_bytes, CanonError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("canonicalization failed: {0}")]
    Canon(#[from] CanonError),
    #[error("invalid kind '{0}': must not contain path separators")]
    InvalidKind(String),
    #[error("invalid extension '{0}': must be empty or start with '.'")]
    InvalidExtension(String),
    #[error("immutability violation at {path}: existing sha256 {existing} != incoming {incoming}")]
    ImmutabilityViolation {
        path: PathBuf,
        existing: String,
        incoming: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutResult {
    pub uri: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// A filesystem-backed content-addressed store rooted at `raw_store/`
/// under the given pack root.
pub struct RawStore {
    root: PathBuf,
}

impl RawStore {
    pub fn new(pack_root: impl Into<PathBuf>) -> Self {
        Self {
            root: pack_root.into().join("raw_store"),
        }
    }

    fn validate_kind(kind: &str) -> Result<(), StoreError> {
        if kind.is_empty() || kind.contains('/') || kind.contains('\\') {
            return Err(StoreError::InvalidKind(kind.to_string()));
        }
        Ok(())
    }

    fn validate_ext(ext: &str) -> Result<(), StoreError> {
        if !ext.is_empty() && !ext.starts_with('.') {
            return Err(StoreError::InvalidExtension(ext.to_string()));
        }
        Ok(())
    }

    /// `put(kind, bytes, ext?) -> {uri, sha256, size}`. Hashes first; if
    /// the target path already exists, reads it back and compares: a
    /// mismatch fails closed with `ImmutabilityViolation`, a match
    /// returns the existing reference unchanged. Otherwise writes to a
    /// `.tmp` sibling and atomically renames it into place.
    pub fn put(&self, kind: &str, bytes: &[u8], ext: &str) -> Result<PutResult, StoreError> {
        Self::validate_kind(kind)?;
        Self::validate_ext(ext)?;

        let sha_prefixed = sha256_bytes(bytes);
        let hex = sha_prefixed.trim_start_matches("sha256:");
        let rel = format!("{kind}/{hex}{ext}");
        let path = self.root.join(kind).join(format!("{hex}{ext}"));

        if path.exists() {
            let existing = std::fs::read(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            let existing_sha = sha256_bytes(&existing);
            if existing_sha != sha_prefixed {
                return Err(StoreError::ImmutabilityViolation {
                    path,
                    existing: existing_sha,
                    incoming: sha_prefixed,
                });
            }
            return Ok(PutResult {
                uri: rel,
                sha256: sha_prefixed,
                size_bytes: existing.len() as u64,
            });
        }

        let parent = path.parent().expect("path has a parent under raw_store root");
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
        let mut tmp_name = path.file_name().expect("path has a filename").to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = parent.join(tmp_name);
        std::fs::write(&tmp_path, bytes).map_err(|source| StoreError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(PutResult {
            uri: rel,
            sha256: sha_prefixed,
            size_bytes: bytes.len() as u64,
        })
    }

    pub fn get(&self, uri: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.root.join(uri);
        std::fs::read(&path).map_err(|source| StoreError::Io { path, source })
    }
}

/// Writes a serializable JSON artifact to `path` exactly once: if the
/// file exists, compares canonical bytes and fails closed on mismatch
/// (replay-safe on an exact match); otherwise writes via `.tmp` +
/// atomic rename. Returns the artifact's sha256. Used by every stage
/// that persists a single JSON document at a deterministic path (as
/// opposed to the content-addressed `raw_store/` layout above).
pub fn write_json_artifact_once<T: Serialize>(path: &Path, value: &T) -> Result<String, StoreError> {
    let bytes = canonical_json_bytes(value)?;
    let incoming_sha = sha256_bytes(&bytes);

    if path.exists() {
        let existing = std::fs::read(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let existing_sha = sha256_bytes(&existing);
        if existing_sha != incoming_sha {
            return Err(StoreError::ImmutabilityViolation {
                path: path.to_path_buf(),
                existing: existing_sha,
                incoming: incoming_sha,
            });
        }
        return Ok(existing_sha);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, &bytes).map_err(|source| StoreError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(incoming_sha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_is_idempotent_on_identical_bytes() {
        let dir = tempdir().unwrap();
        let store = RawStore::new(dir.path());
        let a = store.put("mime", b"hello", ".eml").unwrap();
        let b = store.put("mime", b"hello", ".eml").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn put_rejects_mismatched_bytes_at_same_path() {
        // Force a collision by writing directly under the hash of "hello"
        // then attempting to put different bytes that happen to target
        // the same path is not reachable via the public API (paths are
        // content-addressed), so instead we assert the read-back compare
        // logic by corrupting the stored file out of band.
        let dir = tempdir().unwrap();
        let store = RawStore::new(dir.path());
        let first = store.put("mime", b"hello", ".eml").unwrap();
        let full_path = dir.path().join("raw_store").join(&first.uri);
        std::fs::write(&full_path, b"corrupted").unwrap();
        let err = store.put("mime", b"hello", ".eml").unwrap_err();
        assert!(matches!(err, StoreError::ImmutabilityViolation { .. }));
    }

    #[test]
    fn invalid_kind_is_rejected() {
        let dir = tempdir().unwrap();
        let store = RawStore::new(dir.path());
        let err = store.put("a/b", b"x", "").unwrap_err();
        assert!(matches!(err, StoreError::InvalidKind(_)));
    }

    #[test]
    fn write_json_artifact_once_is_replay_safe() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("normalized").join("m1.json");
        let sha1 = write_json_artifact_once(&path, &serde_json::json!({"a": 1})).unwrap();
        let sha2 = write_json_artifact_once(&path, &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(sha1, sha2);
    }
}
