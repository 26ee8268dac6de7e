//! Cached responses and their keys.

use axum::http::Uri;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Default entry lifetime (one hour).
pub const DEFAULT_EXPIRE_SECS: u64 = 60 * 60;

/// A cached response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub body: String,
    pub content_type: String,
    /// When the entry was written, in ms since the epoch.
    pub touched: i64,
    pub expire_secs: u64,
}

impl CacheEntry {
    pub fn new(body: impl Into<String>, content_type: impl Into<String>, expire_secs: u64) -> Self {
        Self {
            body: body.into(),
            content_type: content_type.into(),
            touched: Utc::now().timestamp_millis(),
            expire_secs,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        let ttl_ms = i64::try_from(self.expire_secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        now_ms >= self.touched.saturating_add(ttl_ms)
    }
}

/// Cache key of a request: its path (without trailing slash) plus the query.
///
/// `/api/news/` and `/api/news` share a key; `/api/news?page=2` has its own.
pub fn cache_key(uri: &Uri) -> String {
    let path = normalize_path(uri.path());
    match uri.query() {
        Some(query) if !query.is_empty() => format!("{}?{}", path, query),
        _ => path.to_string(),
    }
}

pub(crate) fn normalize_path(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}
