//! Cache error types

use thiserror::Error;

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Error, Debug)]
pub enum CacheError {
    /// The cache backend rejected or could not serve the command.
    #[error("Cache store error: {0}")]
    Store(String),

    /// A cached entry or a loaded value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The wrapped mutation failed; nothing was invalidated.
    #[error("Mutation failed: {0}")]
    Mutation(String),

    /// The read-through loader failed; nothing was cached.
    #[error("Load failed: {0}")]
    Load(String),
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}
