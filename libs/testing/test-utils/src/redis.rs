//! Throwaway Redis for the job store and response cache integration tests.

use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::Client;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::redis::{Redis, REDIS_PORT};

const IMAGE_TAG: &str = "8-alpine";

/// A Redis container plus a client pointed at it.
///
/// The container is removed when the value is dropped, so keep it alive for
/// the whole test.
///
/// ```no_run
/// use test_utils::TestRedis;
///
/// # async fn example() {
/// let redis = TestRedis::new().await;
/// let manager = redis.connection_manager().await;
/// assert!(redis.keys("jobs:*").await.is_empty());
/// # }
/// ```
pub struct TestRedis {
    _container: ContainerAsync<Redis>,
    client: Client,
    connection: MultiplexedConnection,
}

impl TestRedis {
    pub async fn new() -> Self {
        let container = Redis::default()
            .with_tag(IMAGE_TAG)
            .start()
            .await
            .expect("Redis container should start");
        let port = container
            .get_host_port_ipv4(REDIS_PORT)
            .await
            .expect("Redis port should be mapped");

        let client = Client::open(format!("redis://127.0.0.1:{}", port))
            .expect("Redis URL should be valid");
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .expect("Redis should accept connections");

        tracing::debug!(port, tag = IMAGE_TAG, "Test Redis started");

        Self {
            _container: container,
            client,
            connection,
        }
    }

    /// Raw connection for assertions on keys the code under test wrote.
    pub fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    /// The reconnecting manager the stores are built on.
    pub async fn connection_manager(&self) -> ConnectionManager {
        ConnectionManager::new(self.client.clone())
            .await
            .expect("connection manager should connect")
    }

    /// Keys matching a glob `pattern`, sorted.
    pub async fn keys(&self, pattern: &str) -> Vec<String> {
        let mut conn = self.connection();
        let mut keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut conn)
            .await
            .expect("KEYS should succeed");
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::AsyncCommands;

    #[tokio::test]
    async fn test_manager_and_raw_connection_see_same_data() {
        let redis = TestRedis::new().await;
        let mut manager = redis.connection_manager().await;

        manager.hset::<_, _, _, ()>("jobs:q:job:1", "state", "waiting").await.unwrap();

        let mut conn = redis.connection();
        let state: String = conn.hget("jobs:q:job:1", "state").await.unwrap();
        assert_eq!(state, "waiting");
    }

    #[tokio::test]
    async fn test_keys_filters_and_sorts() {
        let redis = TestRedis::new().await;
        let mut conn = redis.connection();

        conn.set::<_, _, ()>("master_backend:/api/news/2", "b").await.unwrap();
        conn.set::<_, _, ()>("master_backend:/api/news", "a").await.unwrap();
        conn.set::<_, _, ()>("jobs:queues", "x").await.unwrap();

        assert_eq!(
            redis.keys("master_backend:*").await,
            vec!["master_backend:/api/news", "master_backend:/api/news/2"]
        );
    }

    #[tokio::test]
    async fn test_lua_scripts_run_atomically() {
        let redis = TestRedis::new().await;
        let mut conn = redis.connection();

        let script = redis::Script::new("return redis.call('INCR', KEYS[1])");
        let first: i64 = script.key("jobs:q:id").invoke_async(&mut conn).await.unwrap();
        let second: i64 = script.key("jobs:q:id").invoke_async(&mut conn).await.unwrap();
        assert_eq!((first, second), (1, 2));
    }
}
