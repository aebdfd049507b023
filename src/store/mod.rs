//! Expiring key-value store contract and adapters.
//!
//! The guard keeps all of its per-caller state in a store whose entries
//! vanish on their own after a time-to-live. Absence of a key after its ttl
//! has elapsed is equivalent to deletion, so no background sweeper is needed
//! on the guard side.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::ratelimit::RateLimitRecord;

/// Trait for expiring key-value store implementations.
///
/// Implementations must be shareable across tasks. Every operation is a
/// single bounded unit of work; callers wrap them in their own timeout.
#[async_trait]
pub trait ExpiringStore: Send + Sync {
    /// Get the record stored under `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError>;

    /// Store `record` under `key`, replacing any previous entry and
    /// re-arming the expiration to `ttl` from now.
    async fn set(
        &self,
        key: &str,
        record: &RateLimitRecord,
        ttl: Duration,
    ) -> Result<(), StoreError>;

    /// Remove the entry under `key`, if any.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Store operation errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// A stored value could not be encoded or decoded.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The store rejected or failed the operation.
    #[error("Operation failed: {0}")]
    Operation(String),

    /// The operation did not complete within the configured bound.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}
