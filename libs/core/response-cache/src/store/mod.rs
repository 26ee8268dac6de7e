//! Cache backends.

mod memory;
mod redis_store;

pub use memory::MemoryCacheStore;
pub use redis_store::{RedisCacheStore, DEFAULT_KEY_PREFIX};

use crate::entry::CacheEntry;
use crate::error::CacheResult;
use async_trait::async_trait;

/// Key-value storage for cached responses.
///
/// Every `delete` and `delete_prefix` advances a generation counter before
/// removing anything. A reader that took the generation before loading its
/// body stores it with `put_if_generation`, so a body loaded before an
/// invalidation is never written back after it.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry. Expired entries read as absent.
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Store an entry for `entry.expire_secs`.
    async fn put(&self, key: &str, entry: &CacheEntry) -> CacheResult<()>;

    /// Current invalidation generation.
    async fn generation(&self) -> CacheResult<u64>;

    /// Store an entry only while the generation still equals `generation`.
    /// Returns whether it was stored.
    async fn put_if_generation(
        &self,
        key: &str,
        entry: &CacheEntry,
        generation: u64,
    ) -> CacheResult<bool>;

    /// Remove one key. Returns whether it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every key starting with `prefix`. Returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}
