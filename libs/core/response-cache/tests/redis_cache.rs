//! `RedisCacheStore` against a real Redis container.

use redis::AsyncCommands;
use response_cache::{CacheStore, RedisCacheStore, ResponseCache, DEFAULT_KEY_PREFIX};
use std::collections::HashMap;
use std::sync::Arc;
use test_utils::{TestNamespace, TestRedis};

#[tokio::test]
async fn entries_are_hashes_with_ttl_under_default_prefix() {
    let redis = TestRedis::new().await;
    let cache = ResponseCache::new(Arc::new(RedisCacheStore::new(redis.connection_manager().await)));

    cache
        .put("/api/news", r#"{"news":[]}"#, "application/json; charset=utf-8")
        .await
        .unwrap();

    let mut conn = redis.connection();
    let key = format!("{}/api/news", DEFAULT_KEY_PREFIX);
    let fields: HashMap<String, String> = conn.hgetall(&key).await.unwrap();
    assert_eq!(fields["body"], r#"{"news":[]}"#);
    assert_eq!(fields["type"], "application/json; charset=utf-8");
    assert_eq!(fields["expire"], "3600");
    assert!(fields["touched"].parse::<i64>().unwrap() > 0);

    let ttl: i64 = conn.ttl(&key).await.unwrap();
    assert!(ttl > 3590 && ttl <= 3600, "ttl = {}", ttl);

    let entry = cache.get("/api/news").await.unwrap().unwrap();
    assert_eq!(entry.body, r#"{"news":[]}"#);
}

#[tokio::test]
async fn prefix_invalidation_removes_collection_and_items_only() {
    let redis = TestRedis::new().await;
    let builder = TestNamespace::from_test_name("prefix_invalidation");
    let store = RedisCacheStore::new(redis.connection_manager().await)
        .with_prefix(builder.key_prefix("cache:"));
    let cache = ResponseCache::new(Arc::new(store.clone()));

    for key in ["/api/news", "/api/news?page=2", "/api/news/4", "/api/profile"] {
        cache.put(key, "x", "text/plain").await.unwrap();
    }

    cache
        .mutate_and_invalidate(&["/api/news"], || async { Ok::<_, String>(()) })
        .await
        .unwrap();

    assert!(store.get("/api/news").await.unwrap().is_none());
    assert!(store.get("/api/news?page=2").await.unwrap().is_none());
    assert!(store.get("/api/news/4").await.unwrap().is_none());
    assert!(store.get("/api/profile").await.unwrap().is_some());

    let prefix = builder.key_prefix("cache:");
    let remaining = redis.keys(&format!("{}*", prefix)).await;
    assert_eq!(
        remaining,
        vec![format!("{}/api/profile", prefix), format!("{}generation", prefix)]
    );
}

#[tokio::test]
async fn put_after_invalidation_is_refused() {
    let redis = TestRedis::new().await;
    let builder = TestNamespace::from_test_name("generation_guard");
    let store = RedisCacheStore::new(redis.connection_manager().await)
        .with_prefix(builder.key_prefix("cache:"));
    let entry = response_cache::CacheEntry::new("old", "text/plain", 60);

    let before = store.generation().await.unwrap();
    assert_eq!(before, 0);
    store.delete_prefix("/api/news").await.unwrap();

    assert!(!store.put_if_generation("/api/news", &entry, before).await.unwrap());
    assert!(store.get("/api/news").await.unwrap().is_none());

    let current = store.generation().await.unwrap();
    assert_eq!(current, 1);
    assert!(store.put_if_generation("/api/news", &entry, current).await.unwrap());
    assert_eq!(store.get("/api/news").await.unwrap().unwrap().body, "old");

    let mut conn = redis.connection();
    let ttl: i64 = conn
        .ttl(format!("{}/api/news", builder.key_prefix("cache:")))
        .await
        .unwrap();
    assert!(ttl > 50 && ttl <= 60, "ttl = {}", ttl);

    assert!(store.delete("/api/news").await.unwrap());
    assert_eq!(store.generation().await.unwrap(), 2);
}

#[tokio::test]
async fn glob_characters_in_prefix_are_literal() {
    let redis = TestRedis::new().await;
    let builder = TestNamespace::from_test_name("glob_literal");
    let store = RedisCacheStore::new(redis.connection_manager().await)
        .with_prefix(builder.key_prefix("cache:"));

    let entry = response_cache::CacheEntry::new("x", "text/plain", 60);
    store.put("/search?q=a*", &entry).await.unwrap();
    store.put("/search?q=ab", &entry).await.unwrap();

    assert_eq!(store.delete_prefix("/search?q=a*").await.unwrap(), 1);
    assert!(store.get("/search?q=ab").await.unwrap().is_some());
}
