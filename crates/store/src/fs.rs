//! Filesystem-backed cache store.
//!
//! ## Directory Structure
//!
//! ```text
//! <root>/
//!   index/
//!     <sha256(key)>.json          entry record
//!   content/sha256/
//!     ab/cd/abcdef123456...       blob, addressed by its own hash
//!   tmp/                          scratch space for atomic writes
//! ```
//!
//! Blobs are written to `tmp/` first and renamed into place, so readers never
//! observe a partial blob. Index records are replaced the same way.
//!
//! A blob is renamed into place before its index record is written, so
//! [`FsCacheStore::verify_blocking`] leaves files younger than the GC grace
//! period alone; they may belong to a `put` still in progress.

use crate::root::default_cache_root;
use crate::store::{
    CacheEntry, CacheStore, EntryMetadata, PutOptions, VerifyStats, check_size, integrity_hex,
    integrity_of,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// On-disk index record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexRecord {
    key: String,
    integrity: String,
    size: u64,
    time: DateTime<Utc>,
    metadata: EntryMetadata,
}

/// Unreferenced blobs and temp files younger than this survive `verify`.
pub const DEFAULT_GC_GRACE: Duration = Duration::from_secs(10 * 60);

/// Cache store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    root: PathBuf,
    gc_grace: Duration,
}

impl FsCacheStore {
    /// Create a store at the given root directory
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            gc_grace: DEFAULT_GC_GRACE,
        }
    }

    /// Set how old an unreferenced file must be before `verify` reclaims it.
    #[must_use]
    pub fn with_gc_grace(mut self, grace: Duration) -> Self {
        self.gc_grace = grace;
        self
    }

    /// Open the store at the default per-user cache location.
    pub fn open_default() -> Result<Self> {
        default_cache_root().map(Self::new)
    }

    /// The store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    fn content_dir(&self) -> PathBuf {
        self.root.join("content").join("sha256")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn index_path(&self, key: &str) -> PathBuf {
        let hashed = hex::encode(Sha256::digest(key.as_bytes()));
        self.index_dir().join(format!("{hashed}.json"))
    }

    /// Two-level fan-out: `content/sha256/{hex[0:2]}/{hex[2:4]}/{hex}`
    fn content_path(&self, hex: &str) -> PathBuf {
        self.content_dir()
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(hex)
    }

    /// Modified within the GC grace period. Unreadable times count as recent.
    fn is_recent(&self, path: &Path) -> bool {
        fs::symlink_metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_none_or(|age| age < self.gc_grace)
    }

    fn ensure_dir(path: &Path) -> Result<()> {
        fs::create_dir_all(path).map_err(|e| Error::io(e, path, "create_dir_all"))
    }

    /// Write `data` to `dest` through a temp file in the store's tmp dir.
    fn write_atomic(&self, dest: &Path, data: &[u8]) -> Result<()> {
        let tmp_dir = self.tmp_dir();
        Self::ensure_dir(&tmp_dir)?;
        if let Some(parent) = dest.parent() {
            Self::ensure_dir(parent)?;
        }

        let mut tmp = tempfile::NamedTempFile::new_in(&tmp_dir)
            .map_err(|e| Error::io(e, &tmp_dir, "create_temp"))?;
        tmp.write_all(data)
            .map_err(|e| Error::io(e, tmp.path(), "write"))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Error::io(e, tmp.path(), "sync"))?;
        tmp.persist(dest)
            .map_err(|e| Error::io(e.error, dest, "rename"))?;
        Ok(())
    }

    fn load_record(&self, key: &str) -> Result<IndexRecord> {
        let path = self.index_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(key));
            }
            Err(e) => return Err(Error::io(e, &path, "read")),
        };
        let record: IndexRecord = serde_json::from_slice(&bytes).map_err(|e| {
            Error::serialization(format!("Corrupt index record {}: {e}", path.display()))
        })?;
        if record.key != key {
            // sha256 collision or a hand-edited record; either way not ours
            return Err(Error::not_found(key));
        }
        Ok(record)
    }

    fn entry_from_record(&self, record: IndexRecord) -> Result<CacheEntry> {
        let path = self.content_path(integrity_hex(&record.integrity)?);
        Ok(CacheEntry {
            key: record.key,
            path,
            integrity: record.integrity,
            size: record.size,
            time: record.time,
            metadata: record.metadata,
        })
    }

    /// Blocking implementation of [`CacheStore::info`].
    pub fn info_blocking(&self, key: &str) -> Result<CacheEntry> {
        let record = self.load_record(key)?;
        let entry = self.entry_from_record(record)?;
        if !entry.path.is_file() {
            trace!(key, path = %entry.path.display(), "Index record without content");
            return Err(Error::not_found(key));
        }
        Ok(entry)
    }

    /// Blocking implementation of [`CacheStore::read`].
    pub fn read_blocking(&self, key: &str) -> Result<Vec<u8>> {
        let entry = self.info_blocking(key)?;
        let data = fs::read(&entry.path).map_err(|e| Error::io(e, &entry.path, "read"))?;
        let actual = integrity_of(&data);
        if actual != entry.integrity {
            return Err(Error::integrity(key, entry.integrity, actual));
        }
        check_size(key, &data, Some(entry.size))?;
        Ok(data)
    }

    /// Blocking implementation of [`CacheStore::put`].
    pub fn put_blocking(&self, key: &str, data: &[u8], options: PutOptions) -> Result<CacheEntry> {
        check_size(key, data, options.size)?;

        let integrity = integrity_of(data);
        let content_path = self.content_path(integrity_hex(&integrity)?);
        if content_path.is_file() && touch(&content_path) {
            trace!(key, "Content already present, skipping blob write");
        } else {
            self.write_atomic(&content_path, data)?;
        }

        let record = IndexRecord {
            key: key.to_string(),
            integrity,
            size: data.len() as u64,
            time: Utc::now(),
            metadata: options.metadata,
        };
        let json = serde_json::to_vec_pretty(&record)
            .map_err(|e| Error::serialization(format!("Failed to serialize record: {e}")))?;
        self.write_atomic(&self.index_path(key), &json)?;

        debug!(key, size = record.size, "Stored cache entry");
        self.entry_from_record(record)
    }

    /// Blocking implementation of [`CacheStore::remove`].
    ///
    /// Only the index record is removed; orphaned content is reclaimed by
    /// [`Self::verify_blocking`].
    pub fn remove_blocking(&self, key: &str) -> Result<()> {
        let path = self.index_path(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key, "Removed cache entry");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(e, &path, "remove_file")),
        }
    }

    /// Blocking implementation of [`CacheStore::verify`].
    pub fn verify_blocking(&self) -> Result<VerifyStats> {
        let mut stats = VerifyStats::default();
        let mut referenced = HashSet::new();

        let index_dir = self.index_dir();
        if index_dir.is_dir() {
            let entries =
                fs::read_dir(&index_dir).map_err(|e| Error::io(e, &index_dir, "read_dir"))?;
            for entry in entries {
                let entry = entry.map_err(|e| Error::io(e, &index_dir, "read_dir_entry"))?;
                let path = entry.path();
                if path.extension().is_none_or(|ext| ext != "json") {
                    continue;
                }
                match self.verify_record(&path) {
                    RecordStatus::Intact { hex, size } => {
                        stats.verified += 1;
                        stats.kept_bytes += size;
                        referenced.insert(hex);
                    }
                    RecordStatus::BadContent(blob) => {
                        stats.bad_content += 1;
                        remove_quietly(&blob);
                        remove_quietly(&path);
                    }
                    RecordStatus::Missing => {
                        stats.missing_content += 1;
                        remove_quietly(&path);
                    }
                }
            }
        }

        let content_dir = self.content_dir();
        if content_dir.is_dir() {
            for entry in WalkDir::new(&content_dir).min_depth(1) {
                let entry = entry.map_err(|e| {
                    Error::io(
                        e.into_io_error()
                            .unwrap_or_else(|| std::io::Error::other("walkdir loop")),
                        &content_dir,
                        "walk",
                    )
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if referenced.contains(name.as_ref()) {
                    continue;
                }
                if self.is_recent(entry.path()) {
                    trace!(path = %entry.path().display(), "Keeping recent unreferenced blob");
                } else {
                    trace!(path = %entry.path().display(), "Reclaiming unreferenced blob");
                    remove_quietly(entry.path());
                    stats.reclaimed += 1;
                }
            }
        }

        let tmp_dir = self.tmp_dir();
        if let Ok(entries) = fs::read_dir(&tmp_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if self.is_recent(&path) {
                    continue;
                }
                let removed = if path.is_dir() {
                    fs::remove_dir_all(&path)
                } else {
                    fs::remove_file(&path)
                };
                if let Err(e) = removed
                    && e.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %path.display(), "Failed to remove temp file: {e}");
                }
            }
        }

        debug!(?stats, root = %self.root.display(), "Verified cache store");
        Ok(stats)
    }

    fn verify_record(&self, record_path: &Path) -> RecordStatus {
        let Ok(bytes) = fs::read(record_path) else {
            return RecordStatus::Missing;
        };
        let Ok(record) = serde_json::from_slice::<IndexRecord>(&bytes) else {
            warn!(path = %record_path.display(), "Dropping unreadable index record");
            return RecordStatus::Missing;
        };
        let Ok(hex) = integrity_hex(&record.integrity) else {
            return RecordStatus::Missing;
        };
        let blob = self.content_path(hex);
        let Ok(data) = fs::read(&blob) else {
            return RecordStatus::Missing;
        };
        if integrity_of(&data) != record.integrity || data.len() as u64 != record.size {
            warn!(key = %record.key, "Dropping cache entry with corrupt content");
            return RecordStatus::BadContent(blob);
        }
        RecordStatus::Intact {
            hex: hex.to_string(),
            size: record.size,
        }
    }

    /// Blocking implementation of [`CacheStore::reserve_temp`].
    pub fn reserve_temp_blocking(&self) -> Result<()> {
        let tmp_dir = self.tmp_dir();
        Self::ensure_dir(&tmp_dir)?;
        let scoped =
            tempfile::TempDir::new_in(&tmp_dir).map_err(|e| Error::io(e, &tmp_dir, "tempdir"))?;
        trace!(path = %scoped.path().display(), "Reserved temp scope");
        scoped
            .close()
            .map_err(|e| Error::io(e, &tmp_dir, "remove_tempdir"))
    }
}

enum RecordStatus {
    Intact { hex: String, size: u64 },
    BadContent(PathBuf),
    Missing,
}

/// Bump the mtime so a concurrent `verify` treats the blob as fresh.
fn touch(path: &Path) -> bool {
    fs::File::options()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(SystemTime::now()))
        .is_ok()
}

fn remove_quietly(path: &Path) {
    if let Err(e) = fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), "Failed to remove during verify: {e}");
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::background(e.to_string()))?
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn info(&self, key: &str) -> Result<CacheEntry> {
        let this = self.clone();
        let key = key.to_string();
        run_blocking(move || this.info_blocking(&key)).await
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let this = self.clone();
        let key = key.to_string();
        run_blocking(move || this.read_blocking(&key)).await
    }

    async fn put(&self, key: &str, data: Vec<u8>, options: PutOptions) -> Result<CacheEntry> {
        let this = self.clone();
        let key = key.to_string();
        run_blocking(move || this.put_blocking(&key, &data, options)).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let this = self.clone();
        let key = key.to_string();
        run_blocking(move || this.remove_blocking(&key)).await
    }

    async fn verify(&self) -> Result<VerifyStats> {
        let this = self.clone();
        run_blocking(move || this.verify_blocking()).await
    }

    async fn reserve_temp(&self) -> Result<()> {
        let this = self.clone();
        run_blocking(move || this.reserve_temp_blocking()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn meta(id: &str) -> PutOptions {
        PutOptions::new(EntryMetadata::new(id))
    }

    #[test]
    fn content_path_uses_two_level_fanout() {
        let store = FsCacheStore::new("/tmp/store");
        let hex = "abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789";
        assert_eq!(
            store.content_path(hex),
            PathBuf::from("/tmp/store/content/sha256/ab/cd").join(hex)
        );
    }

    #[test]
    fn info_missing_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FsCacheStore::new(tmp.path());
        let err = store.info_blocking("nope").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn put_then_info_and_read() {
        let tmp = TempDir::new().unwrap();
        let store = FsCacheStore::new(tmp.path());

        let entry = store.put_blocking("bin", b"payload", meta("v1")).unwrap();
        assert_eq!(entry.size, 7);
        assert!(entry.path.starts_with(tmp.path().join("content")));

        let info = store.info_blocking("bin").unwrap();
        assert_eq!(info.metadata.id, "v1");
        assert_eq!(info.integrity, entry.integrity);
        assert_eq!(store.read_blocking("bin").unwrap(), b"payload");
    }

    #[test]
    fn put_rejects_size_mismatch() {
        let tmp = TempDir::new().unwrap();
        let store = FsCacheStore::new(tmp.path());
        let err = store
            .put_blocking("bin", b"abc", meta("v1").with_size(10))
            .unwrap_err();
        assert_eq!(err.code(), "EINTEGRITY");
        assert!(store.info_blocking("bin").unwrap_err().is_not_found());
    }

    #[test]
    fn read_detects_corruption() {
        let tmp = TempDir::new().unwrap();
        let store = FsCacheStore::new(tmp.path());
        let entry = store.put_blocking("bin", b"original", meta("v1")).unwrap();
        fs::write(&entry.path, b"tampered").unwrap();

        let err = store.read_blocking("bin").unwrap_err();
        assert!(matches!(err, Error::Integrity { .. }));
    }

    #[test]
    fn remove_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = FsCacheStore::new(tmp.path());
        store.put_blocking("bin", b"x", meta("v1")).unwrap();
        store.remove_blocking("bin").unwrap();
        store.remove_blocking("bin").unwrap();
        assert!(store.info_blocking("bin").unwrap_err().is_not_found());
    }

    #[test]
    fn reserve_temp_leaves_nothing_behind() {
        let tmp = TempDir::new().unwrap();
        let store = FsCacheStore::new(tmp.path());
        store.reserve_temp_blocking().unwrap();
        let leftovers = fs::read_dir(tmp.path().join("tmp")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn reserve_temp_fails_when_root_is_a_file() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("not-a-dir");
        fs::write(&root, b"file").unwrap();
        let store = FsCacheStore::new(&root);
        assert!(store.reserve_temp_blocking().is_err());
    }
}
