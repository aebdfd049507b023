//! Redis-backed expiring store.
//!
//! Records are serialized as JSON strings and expired by Redis itself via
//! `SET ... EX`. A single connection manager is shared across calls and
//! reconnects on its own.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tracing::info;

use super::{ExpiringStore, StoreError};
use crate::ratelimit::RateLimitRecord;

/// Default bound on connection establishment.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// An expiring store backed by a Redis server.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_timeout(url, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect with an explicit bound on connection establishment.
    pub async fn connect_with_timeout(
        url: &str,
        connect_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;

        let conn = tokio::time::timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(connect_timeout))?
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        info!(url = %url, "Connected to Redis store");

        Ok(Self { conn })
    }
}

#[async_trait]
impl ExpiringStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;

        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        record: &RateLimitRecord,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let json =
            serde_json::to_string(record).map_err(|e| StoreError::Serialization(e.to_string()))?;

        // Redis rejects a zero expiry, so round sub-second ttls up.
        let ttl_secs = ttl.as_secs().max(1);

        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, json, ttl_secs)
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| StoreError::Operation(e.to_string()))?;
        Ok(())
    }
}
