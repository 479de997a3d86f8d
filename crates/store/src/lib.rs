//! Content-addressed binary cache store for bincache
//!
//! This crate provides the storage side of the binary cache:
//! - The [`CacheStore`] trait the install orchestrator is written against
//! - [`FsCacheStore`], a filesystem store with integrity verification
//! - [`MemoryCacheStore`], an in-process store for tests and embedding
//! - Default cache root resolution
//!
//! # Consistency
//!
//! Every write is atomic per key, but concurrent writers to one key are not
//! coordinated: the last completed `put` wins. Callers that need the stored
//! artifact to be valid must re-validate it after reading.

mod error;
mod fs;
mod memory;
mod root;
mod store;

// Re-export error types at crate root
pub use error::{Error, Result};

pub use fs::{DEFAULT_GC_GRACE, FsCacheStore};
pub use memory::MemoryCacheStore;
pub use root::{CACHE_DIR_ENV, default_cache_root};
pub use store::{
    CacheEntry, CacheStore, EntryMetadata, PutOptions, VerifyStats, integrity_hex, integrity_of,
};
