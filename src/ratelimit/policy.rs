//! Guard policies: call budgets, caller identification, skip rules, and
//! the deny descriptor handed back to the host.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::context::CallContext;
use crate::error::{RatecurbError, Result};

/// Response status used when a policy does not specify one.
const DEFAULT_DENY_STATUS: u16 = 503;

/// A predicate over the call context.
pub type ContextPredicate = Arc<dyn Fn(&CallContext) -> bool + Send + Sync>;

/// A caller-key derivation function.
pub type KeyFn = Arc<dyn Fn(&CallContext) -> Option<String> + Send + Sync>;

/// How the caller key for a guarded call is obtained.
#[derive(Clone)]
pub enum KeySource {
    /// Use the context's built-in client-address strategy.
    HostDefault,
    /// Every call shares one fixed key.
    Static(String),
    /// Ask a host-supplied function; `None` means the caller cannot be
    /// identified and the call is not limited.
    Derived(KeyFn),
}

impl KeySource {
    /// Create a derived key source from a closure.
    pub fn derived<F>(f: F) -> Self
    where
        F: Fn(&CallContext) -> Option<String> + Send + Sync + 'static,
    {
        Self::Derived(Arc::new(f))
    }

    /// Resolve the caller key for this call.
    pub fn resolve(&self, ctx: &CallContext) -> Option<String> {
        match self {
            KeySource::HostDefault => ctx.client_key(),
            KeySource::Static(key) => Some(key.clone()),
            KeySource::Derived(f) => f(ctx),
        }
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::HostDefault => f.write_str("HostDefault"),
            KeySource::Static(key) => f.debug_tuple("Static").field(key).finish(),
            KeySource::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

/// Preferred rendering format for a deny response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Html,
    Json,
    Xml,
}

/// What the host should do when a call is denied.
///
/// Purely descriptive: the engine never renders a response, it only hands
/// this back alongside the remaining wait time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DenyAction {
    /// Message to present, or `None` for the stock message.
    pub message: Option<String>,
    /// Response status to set.
    pub status: u16,
    /// Preferred response format.
    pub format: ResponseFormat,
}

impl Default for DenyAction {
    fn default() -> Self {
        Self {
            message: None,
            status: DEFAULT_DENY_STATUS,
            format: ResponseFormat::default(),
        }
    }
}

impl DenyAction {
    /// The message to present for a deny with `wait_remaining` left.
    pub fn message_for(&self, wait_remaining: Duration) -> String {
        match &self.message {
            Some(message) => message.clone(),
            None => format!(
                "Too many requests within the allowed time. \
                 Please wait {} seconds before submitting your request again.",
                wait_remaining.as_secs()
            ),
        }
    }
}

/// Immutable configuration for one guarded operation.
///
/// Built through [`Policy::builder`], which validates the call budget and
/// rejects contradictory skip rules up front; a policy that constructed
/// successfully never produces configuration errors at decision time.
#[derive(Clone)]
pub struct Policy {
    max_calls: u32,
    time_limit: Duration,
    wait_time: Duration,
    key_source: KeySource,
    skip: Option<ContextPredicate>,
    on_deny: DenyAction,
}

impl Policy {
    /// Start building a policy from its required parameters: `max_calls`
    /// per `time_limit`, with a `wait_time` cooldown once exceeded.
    pub fn builder(max_calls: u32, time_limit: Duration, wait_time: Duration) -> PolicyBuilder {
        PolicyBuilder {
            max_calls,
            time_limit,
            wait_time,
            key_source: KeySource::HostDefault,
            skip_if: None,
            skip_unless: None,
            on_deny: DenyAction::default(),
        }
    }

    /// Calls allowed per window.
    pub fn max_calls(&self) -> u32 {
        self.max_calls
    }

    /// Window length.
    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Cooldown length once the budget is exceeded.
    pub fn wait_time(&self) -> Duration {
        self.wait_time
    }

    /// How the caller key is obtained.
    pub fn key_source(&self) -> &KeySource {
        &self.key_source
    }

    /// The deny descriptor for the host.
    pub fn on_deny(&self) -> &DenyAction {
        &self.on_deny
    }

    /// Whether this call bypasses limiting entirely.
    pub fn should_skip(&self, ctx: &CallContext) -> bool {
        match &self.skip {
            Some(predicate) => predicate(ctx),
            None => false,
        }
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("max_calls", &self.max_calls)
            .field("time_limit", &self.time_limit)
            .field("wait_time", &self.wait_time)
            .field("key_source", &self.key_source)
            .field("skip", &self.skip.is_some())
            .field("on_deny", &self.on_deny)
            .finish()
    }
}

/// Builder for [`Policy`].
pub struct PolicyBuilder {
    max_calls: u32,
    time_limit: Duration,
    wait_time: Duration,
    key_source: KeySource,
    skip_if: Option<ContextPredicate>,
    skip_unless: Option<ContextPredicate>,
    on_deny: DenyAction,
}

impl PolicyBuilder {
    /// Use a fixed caller key for every call.
    pub fn static_key(mut self, key: impl Into<String>) -> Self {
        self.key_source = KeySource::Static(key.into());
        self
    }

    /// Derive the caller key from the call context.
    pub fn derive_key<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext) -> Option<String> + Send + Sync + 'static,
    {
        self.key_source = KeySource::derived(f);
        self
    }

    /// Replace the key source wholesale.
    pub fn key_source(mut self, source: KeySource) -> Self {
        self.key_source = source;
        self
    }

    /// Bypass limiting when the predicate holds.
    ///
    /// Mutually exclusive with [`skip_unless`](Self::skip_unless).
    pub fn skip_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext) -> bool + Send + Sync + 'static,
    {
        self.skip_if = Some(Arc::new(f));
        self
    }

    /// Bypass limiting when the predicate does not hold.
    ///
    /// Mutually exclusive with [`skip_if`](Self::skip_if).
    pub fn skip_unless<F>(mut self, f: F) -> Self
    where
        F: Fn(&CallContext) -> bool + Send + Sync + 'static,
    {
        self.skip_unless = Some(Arc::new(f));
        self
    }

    /// Set the deny message.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.on_deny.message = Some(message.into());
        self
    }

    /// Set the deny response status.
    pub fn status(mut self, status: u16) -> Self {
        self.on_deny.status = status;
        self
    }

    /// Set the preferred deny response format.
    pub fn format(mut self, format: ResponseFormat) -> Self {
        self.on_deny.format = format;
        self
    }

    /// Replace the deny descriptor wholesale.
    pub fn on_deny(mut self, action: DenyAction) -> Self {
        self.on_deny = action;
        self
    }

    /// Validate and produce the policy.
    pub fn build(self) -> Result<Policy> {
        if self.max_calls == 0 {
            return Err(RatecurbError::Config(
                "max_calls must be at least 1".to_string(),
            ));
        }
        if self.time_limit.is_zero() {
            return Err(RatecurbError::Config(
                "time_limit must be greater than zero".to_string(),
            ));
        }

        // The two polarities collapse into one skip predicate; supplying
        // both is contradictory.
        let skip = match (self.skip_if, self.skip_unless) {
            (Some(_), Some(_)) => {
                return Err(RatecurbError::Config(
                    "skip_if and skip_unless are mutually exclusive".to_string(),
                ));
            }
            (Some(predicate), None) => Some(predicate),
            (None, Some(predicate)) => {
                let inverted: ContextPredicate = Arc::new(move |ctx| !predicate(ctx));
                Some(inverted)
            }
            (None, None) => None,
        };

        Ok(Policy {
            max_calls: self.max_calls,
            time_limit: self.time_limit,
            wait_time: self.wait_time,
            key_source: self.key_source,
            skip,
            on_deny: self.on_deny,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_builder() -> PolicyBuilder {
        Policy::builder(2, Duration::from_secs(30), Duration::from_secs(60))
    }

    #[test]
    fn test_build_with_defaults() {
        let policy = base_builder().build().unwrap();

        assert_eq!(policy.max_calls(), 2);
        assert_eq!(policy.time_limit(), Duration::from_secs(30));
        assert_eq!(policy.wait_time(), Duration::from_secs(60));
        assert_eq!(policy.on_deny().status, 503);
        assert_eq!(policy.on_deny().format, ResponseFormat::Html);
        assert!(matches!(policy.key_source(), KeySource::HostDefault));
    }

    #[test]
    fn test_zero_max_calls_rejected() {
        let err = Policy::builder(0, Duration::from_secs(30), Duration::from_secs(60))
            .build()
            .unwrap_err();
        assert!(matches!(err, RatecurbError::Config(_)));
    }

    #[test]
    fn test_zero_time_limit_rejected() {
        let err = Policy::builder(2, Duration::ZERO, Duration::from_secs(60))
            .build()
            .unwrap_err();
        assert!(matches!(err, RatecurbError::Config(_)));
    }

    #[test]
    fn test_zero_wait_time_allowed() {
        let policy = Policy::builder(2, Duration::from_secs(30), Duration::ZERO)
            .build()
            .unwrap();
        assert_eq!(policy.wait_time(), Duration::ZERO);
    }

    #[test]
    fn test_both_skip_polarities_rejected() {
        let err = base_builder()
            .skip_if(|_| true)
            .skip_unless(|_| true)
            .build()
            .unwrap_err();
        assert!(matches!(err, RatecurbError::Config(_)));
    }

    #[test]
    fn test_skip_if_semantics() {
        let policy = base_builder()
            .skip_if(|ctx| ctx.value("admin").is_some())
            .build()
            .unwrap();

        assert!(policy.should_skip(&CallContext::new().with_value("admin", "1")));
        assert!(!policy.should_skip(&CallContext::new()));
    }

    #[test]
    fn test_skip_unless_semantics() {
        let policy = base_builder()
            .skip_unless(|ctx| ctx.value("enforce").is_some())
            .build()
            .unwrap();

        assert!(policy.should_skip(&CallContext::new()));
        assert!(!policy.should_skip(&CallContext::new().with_value("enforce", "1")));
    }

    #[test]
    fn test_no_skip_rule_never_skips() {
        let policy = base_builder().build().unwrap();
        assert!(!policy.should_skip(&CallContext::new()));
    }

    #[test]
    fn test_static_key_resolution() {
        let policy = base_builder().static_key("global").build().unwrap();
        assert_eq!(
            policy.key_source().resolve(&CallContext::new()),
            Some("global".to_string())
        );
    }

    #[test]
    fn test_derived_key_resolution() {
        let policy = base_builder()
            .derive_key(|ctx| ctx.value("session").map(str::to_string))
            .build()
            .unwrap();

        let ctx = CallContext::new().with_value("session", "s-1");
        assert_eq!(
            policy.key_source().resolve(&ctx),
            Some("s-1".to_string())
        );
        assert_eq!(policy.key_source().resolve(&CallContext::new()), None);
    }

    #[test]
    fn test_default_deny_message_includes_wait() {
        let action = DenyAction::default();
        let message = action.message_for(Duration::from_secs(60));
        assert!(message.contains("60 seconds"));
    }

    #[test]
    fn test_custom_deny_message_used_verbatim() {
        let policy = base_builder()
            .message("Slow down.")
            .status(429)
            .format(ResponseFormat::Json)
            .build()
            .unwrap();

        assert_eq!(
            policy.on_deny().message_for(Duration::from_secs(10)),
            "Slow down."
        );
        assert_eq!(policy.on_deny().status, 429);
        assert_eq!(policy.on_deny().format, ResponseFormat::Json);
    }
}
