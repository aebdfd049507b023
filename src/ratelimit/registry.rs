//! Guard registration and the full per-call guard path.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, SystemTime};

use tracing::{debug, trace};

use super::context::CallContext;
use super::engine::{Decision, RateLimitEngine};
use super::policy::{DenyAction, Policy};
use crate::error::{RatecurbError, Result};

/// What the host should do with a guarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Invoke the guarded operation.
    Proceed,
    /// Do not invoke it; render a response from the attached action.
    Block(Blocked),
}

impl GuardVerdict {
    /// Whether the call may proceed.
    pub fn is_proceed(&self) -> bool {
        matches!(self, GuardVerdict::Proceed)
    }
}

/// Details of a blocked call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blocked {
    /// Time left until the caller is allowed again.
    pub wait_remaining: Duration,
    /// The policy's deny descriptor, for the host to render.
    pub action: DenyAction,
}

/// Associates named operations with policies and runs the guard path for
/// each call: skip check, key resolution, then the engine's decision.
///
/// Operations are registered up front, before any calls are guarded;
/// the registry is immutable afterwards and shareable behind an `Arc`.
pub struct GuardRegistry {
    engine: RateLimitEngine,
    policies: HashMap<String, Policy>,
}

impl fmt::Debug for GuardRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardRegistry")
            .field("operations", &self.policies.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl GuardRegistry {
    /// Create an empty registry over the given engine.
    pub fn new(engine: RateLimitEngine) -> Self {
        Self {
            engine,
            policies: HashMap::new(),
        }
    }

    /// Register a policy for a named operation.
    ///
    /// Registering the same operation twice is a configuration error.
    pub fn register(&mut self, operation: impl Into<String>, policy: Policy) -> Result<()> {
        let operation = operation.into();
        if self.policies.contains_key(&operation) {
            return Err(RatecurbError::Config(format!(
                "operation '{}' is already guarded",
                operation
            )));
        }

        debug!(
            operation = %operation,
            max_calls = policy.max_calls(),
            time_limit_secs = policy.time_limit().as_secs(),
            wait_time_secs = policy.wait_time().as_secs(),
            "Registered guard"
        );
        self.policies.insert(operation, policy);
        Ok(())
    }

    /// The policy registered for `operation`, if any.
    pub fn policy(&self, operation: &str) -> Option<&Policy> {
        self.policies.get(operation)
    }

    /// Names of all guarded operations.
    pub fn operations(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }

    /// The underlying engine, for hosts that drive decisions directly.
    pub fn engine(&self) -> &RateLimitEngine {
        &self.engine
    }

    /// Run the guard path for a call to `operation`, evaluated at the
    /// current wall clock.
    pub async fn guard(&self, operation: &str, ctx: &CallContext) -> Result<GuardVerdict> {
        self.guard_at(operation, ctx, SystemTime::now()).await
    }

    /// Run the guard path with an explicit clock.
    pub async fn guard_at(
        &self,
        operation: &str,
        ctx: &CallContext,
        now: SystemTime,
    ) -> Result<GuardVerdict> {
        let policy = self.policies.get(operation).ok_or_else(|| {
            RatecurbError::Config(format!("no guard registered for operation '{}'", operation))
        })?;

        if policy.should_skip(ctx) {
            trace!(operation, "Skip predicate matched; bypassing guard");
            return Ok(GuardVerdict::Proceed);
        }

        let caller_key = policy.key_source().resolve(ctx);
        let decision = self
            .engine
            .decide_at(operation, caller_key.as_deref(), policy, now)
            .await?;

        match decision {
            Decision::Allow => Ok(GuardVerdict::Proceed),
            Decision::Deny { wait_remaining } => Ok(GuardVerdict::Block(Blocked {
                wait_remaining,
                action: policy.on_deny().clone(),
            })),
        }
    }
}
