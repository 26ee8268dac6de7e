//! Test helpers shared by the workspace crates.
//!
//! Enable the `redis` feature for [`TestRedis`]:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! Tests that share one Redis take their key prefixes and queue names from a
//! [`TestNamespace`] so their keys never collide.

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Deterministic names scoped to one test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestNamespace {
    seed: u64,
}

impl TestNamespace {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Namespace derived from the test's name.
    ///
    /// ```
    /// use test_utils::TestNamespace;
    ///
    /// let a = TestNamespace::from_test_name("test_claim_is_exclusive");
    /// assert_eq!(a, TestNamespace::from_test_name("test_claim_is_exclusive"));
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// ```
    /// use test_utils::TestNamespace;
    ///
    /// assert_eq!(TestNamespace::new(7).key_prefix("jobs"), "test-7:jobs");
    /// ```
    pub fn key_prefix(&self, scope: &str) -> String {
        format!("test-{}:{}", self.seed, scope)
    }

    pub fn queue(&self, name: &str) -> String {
        format!("{}-{}", name, self.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_tests_get_distinct_names() {
        let a = TestNamespace::from_test_name("retry_path");
        let b = TestNamespace::from_test_name("retention_sweep");

        assert_ne!(a.key_prefix("jobs"), b.key_prefix("jobs"));
        assert_ne!(a.queue("email-queue"), b.queue("email-queue"));
    }

    #[test]
    fn test_queue_name_keeps_base() {
        assert_eq!(TestNamespace::new(3).queue("email-queue"), "email-queue-3");
    }
}
