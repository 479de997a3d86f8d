//! In-memory cache store, for tests and embedders that manage persistence themselves.

use crate::store::{
    CacheEntry, CacheStore, PutOptions, VerifyStats, check_size, integrity_of,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct Slot {
    entry: CacheEntry,
    data: Vec<u8>,
}

/// A [`CacheStore`] kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    slots: Mutex<HashMap<String, Slot>>,
}

impl MemoryCacheStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    /// Overwrite an entry's content without updating its integrity.
    ///
    /// Returns `false` if the key is absent.
    pub async fn corrupt(&self, key: &str, data: Vec<u8>) -> bool {
        let mut slots = self.slots.lock().await;
        match slots.get_mut(key) {
            Some(slot) => {
                slot.data = data;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn info(&self, key: &str) -> Result<CacheEntry> {
        self.slots
            .lock()
            .await
            .get(key)
            .map(|slot| slot.entry.clone())
            .ok_or_else(|| Error::not_found(key))
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        let slots = self.slots.lock().await;
        let slot = slots.get(key).ok_or_else(|| Error::not_found(key))?;
        let actual = integrity_of(&slot.data);
        if actual != slot.entry.integrity {
            return Err(Error::integrity(key, slot.entry.integrity.clone(), actual));
        }
        Ok(slot.data.clone())
    }

    async fn put(&self, key: &str, data: Vec<u8>, options: PutOptions) -> Result<CacheEntry> {
        check_size(key, &data, options.size)?;
        let integrity = integrity_of(&data);
        let entry = CacheEntry {
            key: key.to_string(),
            path: PathBuf::from("memory").join(&integrity),
            integrity,
            size: data.len() as u64,
            time: Utc::now(),
            metadata: options.metadata,
        };
        self.slots.lock().await.insert(
            key.to_string(),
            Slot {
                entry: entry.clone(),
                data,
            },
        );
        Ok(entry)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.slots.lock().await.remove(key);
        Ok(())
    }

    async fn verify(&self) -> Result<VerifyStats> {
        let mut slots = self.slots.lock().await;
        let mut stats = VerifyStats::default();
        slots.retain(|_, slot| {
            if integrity_of(&slot.data) == slot.entry.integrity {
                stats.verified += 1;
                stats.kept_bytes += slot.entry.size;
                true
            } else {
                stats.bad_content += 1;
                false
            }
        });
        Ok(stats)
    }

    async fn reserve_temp(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EntryMetadata;

    #[tokio::test]
    async fn put_read_remove() {
        let store = MemoryCacheStore::new();
        store
            .put("k", b"data".to_vec(), PutOptions::new(EntryMetadata::new("id")))
            .await
            .unwrap();
        assert_eq!(store.info("k").await.unwrap().metadata.id, "id");
        assert_eq!(store.read("k").await.unwrap(), b"data");

        store.remove("k").await.unwrap();
        assert!(store.info("k").await.unwrap_err().is_not_found());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn verify_drops_corrupt_entries() {
        let store = MemoryCacheStore::new();
        store
            .put("k", b"data".to_vec(), PutOptions::new(EntryMetadata::new("id")))
            .await
            .unwrap();
        assert!(store.corrupt("k", b"evil".to_vec()).await);
        assert!(store.read("k").await.is_err());

        let stats = store.verify().await.unwrap();
        assert_eq!(stats.bad_content, 1);
        assert_eq!(store.len().await, 0);
    }
}
