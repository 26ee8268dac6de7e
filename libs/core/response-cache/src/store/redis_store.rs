//! Redis cache backend.
//!
//! Each entry is a hash `{prefix}{key}` with fields `body`, `type`, `touched`
//! and `expire`, and a key TTL of `expire` seconds. The invalidation
//! generation is a counter at `{prefix}generation`; cache keys are request
//! paths and always start with `/`, so it never collides with an entry.

use super::CacheStore;
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::collections::HashMap;
use tracing::debug;

/// Default prefix of cache keys.
pub const DEFAULT_KEY_PREFIX: &str = "master_backend:";

const SCAN_COUNT: usize = 200;

const GENERATION_KEY: &str = "generation";

/// KEYS: entry, generation. ARGV: expected generation, body, type, touched, expire.
const PUT_IF_GENERATION_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[2]) or '0'
if current ~= ARGV[1] then
  return 0
end
redis.call('HSET', KEYS[1], 'body', ARGV[2], 'type', ARGV[3], 'touched', ARGV[4], 'expire', ARGV[5])
redis.call('EXPIRE', KEYS[1], ARGV[5])
return 1
"#;

/// Cache entries stored as Redis hashes.
#[derive(Clone)]
pub struct RedisCacheStore {
    redis: ConnectionManager,
    prefix: String,
    put_if_generation: Script,
}

impl RedisCacheStore {
    pub fn new(redis: ConnectionManager) -> Self {
        tracing::info!(prefix = DEFAULT_KEY_PREFIX, "Redis response cache initialized");
        Self {
            redis,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            put_if_generation: Script::new(PUT_IF_GENERATION_SCRIPT),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn generation_key(&self) -> String {
        format!("{}{}", self.prefix, GENERATION_KEY)
    }
}

fn entry_from_hash(mut fields: HashMap<String, String>) -> CacheResult<CacheEntry> {
    let mut take = |field: &str| {
        fields
            .remove(field)
            .ok_or_else(|| CacheError::Serialization(format!("cache entry is missing '{}'", field)))
    };
    let body = take("body")?;
    let content_type = take("type")?;
    let touched = take("touched")?;
    let expire = take("expire")?;

    Ok(CacheEntry {
        body,
        content_type,
        touched: touched
            .parse()
            .map_err(|_| CacheError::Serialization(format!("invalid touched: {}", touched)))?,
        expire_secs: expire
            .parse()
            .map_err(|_| CacheError::Serialization(format!("invalid expire: {}", expire)))?,
    })
}

/// Escape glob metacharacters for `SCAN MATCH`.
fn escape_glob(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let mut conn = self.redis.clone();
        let fields: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        if fields.is_empty() {
            return Ok(None);
        }
        entry_from_hash(fields).map(Some)
    }

    async fn put(&self, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        let mut conn = self.redis.clone();
        let key = self.key(key);

        redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&key)
            .arg("body")
            .arg(&entry.body)
            .arg("type")
            .arg(&entry.content_type)
            .arg("touched")
            .arg(entry.touched)
            .arg("expire")
            .arg(entry.expire_secs)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(entry.expire_secs)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        debug!(key = %key, "Cached response");
        Ok(())
    }

    async fn generation(&self) -> CacheResult<u64> {
        let mut conn = self.redis.clone();
        let generation: Option<u64> = redis::cmd("GET")
            .arg(self.generation_key())
            .query_async(&mut conn)
            .await?;
        Ok(generation.unwrap_or(0))
    }

    async fn put_if_generation(
        &self,
        key: &str,
        entry: &CacheEntry,
        generation: u64,
    ) -> CacheResult<bool> {
        let mut conn = self.redis.clone();
        let key = self.key(key);

        let stored: i64 = self
            .put_if_generation
            .key(&key)
            .key(self.generation_key())
            .arg(generation)
            .arg(&entry.body)
            .arg(&entry.content_type)
            .arg(entry.touched)
            .arg(entry.expire_secs)
            .invoke_async(&mut conn)
            .await?;

        if stored == 1 {
            debug!(key = %key, "Cached response");
        } else {
            debug!(key = %key, generation, "Skipped caching a response loaded before invalidation");
        }
        Ok(stored == 1)
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.redis.clone();
        let (_, removed): (u64, i64) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(self.generation_key())
            .cmd("DEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await?;
        Ok(removed > 0)
    }

    async fn delete_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let mut conn = self.redis.clone();
        let pattern = format!("{}*", escape_glob(&self.key(prefix)));

        // Bump first: a conditional put that lands after this is refused, one
        // that landed before is removed by the scan below.
        let _: u64 = redis::cmd("INCR")
            .arg(self.generation_key())
            .query_async(&mut conn)
            .await?;

        let mut removed = 0u64;
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let count: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += count;
            }
            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(prefix = %prefix, removed, "Invalidated cached responses");
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
