//! Core rate limiting engine.
//!
//! The engine evaluates one call at a time against the record held in the
//! expiring store: count calls inside a fixed window, and once the budget is
//! exceeded latch the caller into a cooldown that must run its course before
//! counting resumes. Exceeding the limit is a deterministic penalty, not a
//! sliding re-evaluation: further calls during cooldown only restart the
//! wait check, never the counter.
//!
//! The read-modify-write against the store is serialized per store key with
//! an in-process lock, which protects a single process against its own
//! lost-update race. Separate processes sharing one store still race and may
//! admit slightly more than the budget under load; the store itself offers
//! no compare-and-swap, and the over-admission is tolerated.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::policy::Policy;
use super::record::RateLimitRecord;
use crate::error::Result;
use crate::store::{ExpiringStore, StoreError};

/// Store key prefix used when none is configured.
const DEFAULT_NAMESPACE: &str = "ratecurb";
/// Bound on individual store operations when none is configured.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// The outcome of a rate limit decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The call may proceed.
    Allow,
    /// The call is denied; the caller must wait this long.
    Deny {
        /// Time left until the caller is allowed again.
        wait_remaining: Duration,
    },
}

impl Decision {
    /// Whether the call was allowed.
    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// The rate limiting engine.
///
/// Holds an explicitly injected store handle, so each engine instance has a
/// swappable backing store rather than reaching into shared global state.
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct RateLimitEngine {
    store: Arc<dyn ExpiringStore>,
    namespace: String,
    store_timeout: Duration,
    // TODO: lock entries are never reclaimed, so the table grows with the
    // number of distinct store keys seen by this process.
    key_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RateLimitEngine {
    /// Create an engine over the given store.
    pub fn new(store: Arc<dyn ExpiringStore>) -> Self {
        Self {
            store,
            namespace: DEFAULT_NAMESPACE.to_string(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            key_locks: DashMap::new(),
        }
    }

    /// Use a different store key prefix.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Bound individual store operations to `timeout`.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Decide whether a call under `caller_key` may proceed, evaluated at
    /// the current wall clock.
    pub async fn decide(
        &self,
        operation: &str,
        caller_key: Option<&str>,
        policy: &Policy,
    ) -> Result<Decision> {
        self.decide_at(operation, caller_key, policy, SystemTime::now())
            .await
    }

    /// Decide with an explicit clock.
    ///
    /// Hosts that manage their own notion of time can supply `now` directly;
    /// [`decide`](Self::decide) delegates here.
    pub async fn decide_at(
        &self,
        operation: &str,
        caller_key: Option<&str>,
        policy: &Policy,
        now: SystemTime,
    ) -> Result<Decision> {
        // No identity, nothing to limit.
        let Some(caller_key) = caller_key else {
            trace!(operation, "No caller key; allowing unconditionally");
            return Ok(Decision::Allow);
        };

        let store_key = self.store_key(operation, caller_key);
        let lock = self
            .key_locks
            .entry(store_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _serialized = lock.lock().await;

        let now = unix_seconds(now);

        trace!(key = %store_key, "Checking rate limit");

        let Some(mut record) = self.store_get(&store_key).await? else {
            // First call of a fresh window.
            let fresh = RateLimitRecord::fresh(now);
            self.store_set(&store_key, &fresh, policy.time_limit())
                .await?;
            return Ok(Decision::Allow);
        };

        if record.in_cooldown() {
            if record.cooldown_elapsed(now, policy.wait_time()) {
                // The next call re-creates the record and starts a fresh
                // window; this one is not counted.
                debug!(key = %store_key, "Cooldown elapsed; clearing record");
                self.store_delete(&store_key).await?;
                return Ok(Decision::Allow);
            }

            let wait_remaining = record.wait_remaining(now, policy.wait_time());
            trace!(key = %store_key, wait_remaining_secs = wait_remaining.as_secs(), "Still in cooldown");
            return Ok(Decision::Deny { wait_remaining });
        }

        if record.within_window(now, policy.time_limit()) {
            record.count = record.count.saturating_add(1);

            if record.count > policy.max_calls() {
                record.cooldown_started_at = Some(now);
                self.store_set(&store_key, &record, policy.wait_time())
                    .await?;
                debug!(
                    key = %store_key,
                    count = record.count,
                    max_calls = policy.max_calls(),
                    "Call budget exceeded; cooldown started"
                );
                return Ok(Decision::Deny {
                    wait_remaining: policy.wait_time(),
                });
            }

            self.store_set(&store_key, &record, policy.wait_time())
                .await?;
            return Ok(Decision::Allow);
        }

        // Window expired without the budget ever being exceeded.
        let fresh = RateLimitRecord::fresh(now);
        self.store_set(&store_key, &fresh, policy.time_limit())
            .await?;
        Ok(Decision::Allow)
    }

    fn store_key(&self, operation: &str, caller_key: &str) -> String {
        format!("{}:{}:{}", self.namespace, operation, caller_key)
    }

    async fn store_get(&self, key: &str) -> Result<Option<RateLimitRecord>> {
        match tokio::time::timeout(self.store_timeout, self.store.get(key)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout(self.store_timeout).into()),
        }
    }

    async fn store_set(
        &self,
        key: &str,
        record: &RateLimitRecord,
        ttl: Duration,
    ) -> Result<()> {
        match tokio::time::timeout(self.store_timeout, self.store.set(key, record, ttl)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout(self.store_timeout).into()),
        }
    }

    async fn store_delete(&self, key: &str) -> Result<()> {
        match tokio::time::timeout(self.store_timeout, self.store.delete(key)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StoreError::Timeout(self.store_timeout).into()),
        }
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
