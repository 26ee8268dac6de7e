//! Redis-backed HTTP response cache.
//!
//! GET responses are cached lazily under their request path (Redis keys are
//! prefixed with `master_backend:` and live for an hour). Mutations delete the
//! affected keys before they return, so a read that follows a create, update
//! or delete never sees the old body.

mod cache;
mod entry;
mod error;
mod middleware;
pub mod store;

pub use cache::{invalidation_prefix, ResponseCache};
pub use entry::{cache_key, CacheEntry, DEFAULT_EXPIRE_SECS};
pub use error::{CacheError, CacheResult};
pub use middleware::{cache_get_requests, invalidate_on_mutation, CACHE_STATUS_HEADER};
pub use store::{CacheStore, MemoryCacheStore, RedisCacheStore, DEFAULT_KEY_PREFIX};
