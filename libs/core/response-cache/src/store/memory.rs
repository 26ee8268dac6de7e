use super::CacheStore;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Process-local cache, used in tests and single-instance setups.
///
/// The generation only changes while the entry map is locked, so a
/// conditional put and an invalidation never interleave.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    generation: AtomicU64,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> CacheResult<MutexGuard<'_, HashMap<String, CacheEntry>>> {
        self.entries
            .lock()
            .map_err(|_| CacheError::Store("memory cache lock poisoned".into()))
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let mut entries = self.lock()?;
        let now = Utc::now().timestamp_millis();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                Ok(None)
            }
            entry => Ok(entry.cloned()),
        }
    }

    async fn put(&self, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        self.lock()?.insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn generation(&self) -> CacheResult<u64> {
        Ok(self.generation.load(Ordering::SeqCst))
    }

    async fn put_if_generation(
        &self,
        key: &str,
        entry: &CacheEntry,
        generation: u64,
    ) -> CacheResult<bool> {
        let mut entries = self.lock()?;
        if self.generation.load(Ordering::SeqCst) != generation {
            return Ok(false);
        }
        entries.insert(key.to_string(), entry.clone());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut entries = self.lock()?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(entries.remove(key).is_some())
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let mut entries = self.lock()?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
