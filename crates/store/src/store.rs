//! The cache store interface shared by every backend.

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;

/// Prefix for integrity strings produced by this crate.
const INTEGRITY_PREFIX: &str = "sha256-";

/// Caller-owned metadata recorded alongside an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Compatibility identity of the stored artifact.
    pub id: String,
}

impl EntryMetadata {
    /// Metadata carrying the given identity.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// A resolved cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// The cache key
    pub key: String,
    /// Location of the stored blob
    pub path: PathBuf,
    /// Integrity string (`sha256-<hex>`)
    pub integrity: String,
    /// Stored size in bytes
    pub size: u64,
    /// When the entry was written
    pub time: DateTime<Utc>,
    /// Caller metadata
    pub metadata: EntryMetadata,
}

/// Options for [`CacheStore::put`].
#[derive(Debug, Clone)]
pub struct PutOptions {
    /// Expected size of the data; a mismatch rejects the write.
    pub size: Option<u64>,
    /// Metadata recorded with the entry.
    pub metadata: EntryMetadata,
}

impl PutOptions {
    /// Options with metadata and no size expectation.
    #[must_use]
    pub fn new(metadata: EntryMetadata) -> Self {
        Self {
            size: None,
            metadata,
        }
    }

    /// Require the written data to be exactly `size` bytes.
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

/// Counters reported by [`CacheStore::verify`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyStats {
    /// Entries whose content was present and intact.
    pub verified: usize,
    /// Unreferenced blobs that were deleted.
    pub reclaimed: usize,
    /// Entries dropped because their content was corrupt.
    pub bad_content: usize,
    /// Entries dropped because their content was missing or their record unreadable.
    pub missing_content: usize,
    /// Total bytes held by verified entries.
    pub kept_bytes: u64,
}

/// Key/value store with integrity verification.
///
/// Writes to the same key are last-writer-wins; implementations do not lock.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Look up an entry's record. Fails with [`Error::NotFound`] when absent.
    async fn info(&self, key: &str) -> Result<CacheEntry>;

    /// Read an entry's content, verifying it against the recorded integrity.
    async fn read(&self, key: &str) -> Result<Vec<u8>>;

    /// Store `data` under `key`, replacing any previous entry.
    async fn put(&self, key: &str, data: Vec<u8>, options: PutOptions) -> Result<CacheEntry>;

    /// Remove the entry for `key`. Removing an absent key succeeds.
    async fn remove(&self, key: &str) -> Result<()>;

    /// Run an integrity and garbage-collection pass over the whole store.
    async fn verify(&self) -> Result<VerifyStats>;

    /// Create and release a scoped temporary directory inside the store.
    async fn reserve_temp(&self) -> Result<()>;
}

/// Compute the integrity string for `data`.
#[must_use]
pub fn integrity_of(data: &[u8]) -> String {
    format!("{INTEGRITY_PREFIX}{}", hex::encode(Sha256::digest(data)))
}

/// Extract the hex digest from an integrity string.
pub fn integrity_hex(integrity: &str) -> Result<&str> {
    let hex = integrity
        .strip_prefix(INTEGRITY_PREFIX)
        .ok_or_else(|| Error::serialization(format!("Unsupported integrity '{integrity}'")))?;
    if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::serialization(format!(
            "Malformed integrity '{integrity}'"
        )));
    }
    Ok(hex)
}

/// Reject `data` when its length differs from the expected size.
pub(crate) fn check_size(key: &str, data: &[u8], expected: Option<u64>) -> Result<()> {
    match expected {
        Some(size) if size != data.len() as u64 => Err(Error::integrity(
            key,
            format!("{size} bytes"),
            format!("{} bytes", data.len()),
        )),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_roundtrip() {
        let integrity = integrity_of(b"hello");
        assert!(integrity.starts_with("sha256-"));
        let hex = integrity_hex(&integrity).unwrap();
        assert_eq!(
            hex,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn integrity_hex_rejects_foreign_algorithms() {
        assert!(integrity_hex("sha512-abcdef").is_err());
        assert!(integrity_hex("sha256-xyz").is_err());
    }

    #[test]
    fn check_size_mismatch_is_integrity_error() {
        let err = check_size("k", b"abc", Some(4)).unwrap_err();
        assert_eq!(err.code(), "EINTEGRITY");
        assert!(check_size("k", b"abc", Some(3)).is_ok());
        assert!(check_size("k", b"abc", None).is_ok());
    }

    #[test]
    fn put_options_builder() {
        let opts = PutOptions::new(EntryMetadata::new("1.0linuxx86_64")).with_size(12);
        assert_eq!(opts.size, Some(12));
        assert_eq!(opts.metadata.id, "1.0linuxx86_64");
    }
}
