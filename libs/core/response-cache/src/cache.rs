//! Read-through caching and synchronous invalidation.

use crate::entry::{normalize_path, CacheEntry, DEFAULT_EXPIRE_SECS};
use crate::error::{CacheError, CacheResult};
use crate::store::CacheStore;
use axum::http::Method;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// Response cache over a [`CacheStore`].
///
/// Reads populate entries lazily. Writes go through
/// [`ResponseCache::mutate_and_invalidate`] (or the
/// [`invalidate_on_mutation`](crate::invalidate_on_mutation) layer), which
/// deletes the affected keys before returning to the caller.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    expire_secs: u64,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            expire_secs: DEFAULT_EXPIRE_SECS,
        }
    }

    pub fn with_expire_secs(mut self, expire_secs: u64) -> Self {
        self.expire_secs = expire_secs;
        self
    }

    pub fn expire_secs(&self) -> u64 {
        self.expire_secs
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        self.store.get(key).await
    }

    pub async fn put(&self, key: &str, body: impl Into<String>, content_type: &str) -> CacheResult<()> {
        let entry = CacheEntry::new(body, content_type, self.expire_secs);
        self.store.put(key, &entry).await
    }

    /// Generation to pass to [`put_if_generation`](Self::put_if_generation).
    /// Read it before loading the body.
    pub async fn generation(&self) -> CacheResult<u64> {
        self.store.generation().await
    }

    /// Cache a body unless an invalidation ran since `generation` was read.
    pub async fn put_if_generation(
        &self,
        key: &str,
        body: impl Into<String>,
        content_type: &str,
        generation: u64,
    ) -> CacheResult<bool> {
        let entry = CacheEntry::new(body, content_type, self.expire_secs);
        self.store.put_if_generation(key, &entry, generation).await
    }

    /// Return the cached body for `key`, or run `loader` and cache its output.
    ///
    /// The output is not cached when an invalidation ran while the loader was
    /// running. A cache that cannot be read or written degrades to calling the
    /// loader.
    pub async fn read_through<F, Fut, E>(
        &self,
        key: &str,
        content_type: &str,
        loader: F,
    ) -> CacheResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: Display,
    {
        match self.store.get(key).await {
            Ok(Some(entry)) => {
                debug!(key = %key, "Cache hit");
                return Ok(entry.body);
            }
            Ok(None) => debug!(key = %key, "Cache miss"),
            Err(e) => warn!(key = %key, error = %e, "Cache read failed, loading from source"),
        }

        let generation = match self.generation().await {
            Ok(generation) => Some(generation),
            Err(e) => {
                warn!(key = %key, error = %e, "Cache generation unavailable, not caching");
                None
            }
        };

        let body = loader().await.map_err(|e| CacheError::Load(e.to_string()))?;

        if let Some(generation) = generation {
            if let Err(e) = self
                .put_if_generation(key, body.clone(), content_type, generation)
                .await
            {
                warn!(key = %key, error = %e, "Failed to populate cache");
            }
        }
        Ok(body)
    }

    /// [`read_through`](Self::read_through) for JSON values.
    pub async fn read_through_json<T, F, Fut, E>(&self, key: &str, loader: F) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let body = self
            .read_through(key, JSON_CONTENT_TYPE, move || async move {
                let value = loader().await.map_err(|e| e.to_string())?;
                serde_json::to_string(&value).map_err(|e| e.to_string())
            })
            .await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Delete one key.
    pub async fn invalidate(&self, key: &str) -> CacheResult<bool> {
        self.store.delete(key).await
    }

    /// Delete every key under `prefix`: the path itself, its query variants
    /// and its sub-resources.
    pub async fn invalidate_prefix(&self, prefix: &str) -> CacheResult<u64> {
        self.store.delete_prefix(normalize_path(prefix)).await
    }

    /// Run `mutation`; when it succeeds, invalidate every prefix in `prefixes`
    /// before returning its output.
    ///
    /// A failed mutation leaves the cache untouched. A failed invalidation
    /// is returned as an error even though the mutation itself went through.
    pub async fn mutate_and_invalidate<T, E, F, Fut>(
        &self,
        prefixes: &[&str],
        mutation: F,
    ) -> CacheResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let output = mutation()
            .await
            .map_err(|e| CacheError::Mutation(e.to_string()))?;

        for prefix in prefixes {
            let removed = self.invalidate_prefix(prefix).await?;
            debug!(prefix = %prefix, removed, "Invalidated after mutation");
        }
        Ok(output)
    }
}

/// Prefix whose cached entries a mutating request makes stale.
///
/// `POST /api/news` invalidates `/api/news`; `PUT /api/news/4` invalidates
/// the collection `/api/news` and therefore the item too. Returns `None` for
/// methods that do not mutate.
pub fn invalidation_prefix(method: &Method, path: &str) -> Option<String> {
    let path = normalize_path(path);
    match *method {
        Method::POST => Some(path.to_string()),
        Method::PUT | Method::PATCH | Method::DELETE => {
            let parent = match path.rfind('/') {
                Some(0) | None => "/",
                Some(idx) => &path[..idx],
            };
            Some(parent.to_string())
        }
        _ => None,
    }
}
