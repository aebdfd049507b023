//! Declarative guard configuration.
//!
//! Guards can be defined in a YAML file instead of code, one entry per
//! operation:
//!
//! ```yaml
//! namespace: myapp
//! guards:
//!   invite:
//!     max_calls: 2
//!     time_limit_secs: 30
//!     wait_time_secs: 60
//!     status: 429
//!     format: json
//! ```
//!
//! Entries are validated when the configuration is applied; an invalid
//! guard aborts loading rather than surfacing later at decision time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{RatecurbError, Result};
use crate::ratelimit::{GuardRegistry, Policy, RateLimitEngine, ResponseFormat};
use crate::store::ExpiringStore;

/// A set of declaratively configured guards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardsConfig {
    /// Store key prefix shared by all guards.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Bound on individual store operations, in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    /// Map of operation name to guard definition.
    #[serde(default)]
    pub guards: HashMap<String, GuardConfig>,
}

impl Default for GuardsConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            store_timeout_ms: default_store_timeout_ms(),
            guards: HashMap::new(),
        }
    }
}

fn default_namespace() -> String {
    "ratecurb".to_string()
}

fn default_store_timeout_ms() -> u64 {
    5000
}

/// Declarative definition of a single guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Calls allowed per window.
    pub max_calls: u32,

    /// Window length in seconds.
    pub time_limit_secs: u64,

    /// Cooldown length in seconds.
    pub wait_time_secs: u64,

    /// Fixed caller key; when absent the default client-address strategy
    /// applies.
    #[serde(default)]
    pub key: Option<String>,

    /// Response status for denied calls.
    #[serde(default = "default_status")]
    pub status: u16,

    /// Message for denied calls, or the stock message when absent.
    #[serde(default)]
    pub message: Option<String>,

    /// Preferred response format for denied calls.
    #[serde(default)]
    pub format: ResponseFormat,
}

fn default_status() -> u16 {
    503
}

impl GuardConfig {
    /// Build the validated policy this definition describes.
    pub fn to_policy(&self) -> Result<Policy> {
        let mut builder = Policy::builder(
            self.max_calls,
            Duration::from_secs(self.time_limit_secs),
            Duration::from_secs(self.wait_time_secs),
        )
        .status(self.status)
        .format(self.format);

        if let Some(key) = &self.key {
            builder = builder.static_key(key.clone());
        }
        if let Some(message) = &self.message {
            builder = builder.message(message.clone());
        }

        builder.build()
    }
}

impl GuardsConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading guard configuration");

        let contents = std::fs::read_to_string(path)
            .map_err(|e| RatecurbError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RatecurbError::Config(format!("Failed to parse guard config: {}", e)))
    }

    /// Build a ready registry over `store` with every configured guard
    /// registered.
    pub fn apply(&self, store: Arc<dyn ExpiringStore>) -> Result<GuardRegistry> {
        let engine = RateLimitEngine::new(store)
            .with_namespace(self.namespace.clone())
            .with_store_timeout(Duration::from_millis(self.store_timeout_ms));

        let mut registry = GuardRegistry::new(engine);
        for (operation, guard) in &self.guards {
            let policy = guard.to_policy().map_err(|e| {
                RatecurbError::Config(format!("Invalid guard '{}': {}", operation, e))
            })?;
            registry.register(operation.clone(), policy)?;
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_parse_simple_config() {
        let yaml = r#"
guards:
  invite:
    max_calls: 2
    time_limit_secs: 30
    wait_time_secs: 60
"#;
        let config = GuardsConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.namespace, "ratecurb");
        assert_eq!(config.store_timeout_ms, 5000);
        let guard = &config.guards["invite"];
        assert_eq!(guard.max_calls, 2);
        assert_eq!(guard.status, 503);
        assert_eq!(guard.format, ResponseFormat::Html);
        assert_eq!(guard.key, None);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
namespace: myapp
store_timeout_ms: 250
guards:
  validate:
    max_calls: 10
    time_limit_secs: 60
    wait_time_secs: 60
    key: global
    status: 429
    message: Too many attempts to validate your invitation code.
    format: json
"#;
        let config = GuardsConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.namespace, "myapp");
        assert_eq!(config.store_timeout_ms, 250);
        let guard = &config.guards["validate"];
        assert_eq!(guard.key.as_deref(), Some("global"));
        assert_eq!(guard.status, 429);
        assert_eq!(guard.format, ResponseFormat::Json);
    }

    #[test]
    fn test_malformed_yaml_is_config_error() {
        let err = GuardsConfig::from_yaml("guards: [not, a, map]").unwrap_err();
        assert!(matches!(err, RatecurbError::Config(_)));
    }

    #[test]
    fn test_apply_builds_registry() {
        let yaml = r#"
guards:
  invite:
    max_calls: 2
    time_limit_secs: 30
    wait_time_secs: 60
  validate:
    max_calls: 10
    time_limit_secs: 60
    wait_time_secs: 120
"#;
        let config = GuardsConfig::from_yaml(yaml).unwrap();
        let registry = config.apply(Arc::new(MemoryStore::new())).unwrap();

        assert!(registry.policy("invite").is_some());
        assert!(registry.policy("validate").is_some());
        assert_eq!(
            registry.policy("validate").unwrap().wait_time(),
            Duration::from_secs(120)
        );
    }

    #[test]
    fn test_apply_rejects_invalid_guard() {
        let yaml = r#"
guards:
  invite:
    max_calls: 0
    time_limit_secs: 30
    wait_time_secs: 60
"#;
        let config = GuardsConfig::from_yaml(yaml).unwrap();
        let err = config.apply(Arc::new(MemoryStore::new())).unwrap_err();
        assert!(matches!(err, RatecurbError::Config(_)));
    }

    #[test]
    fn test_static_key_applies_to_policy() {
        let guard = GuardConfig {
            max_calls: 1,
            time_limit_secs: 10,
            wait_time_secs: 10,
            key: Some("shared".to_string()),
            status: 503,
            message: None,
            format: ResponseFormat::Html,
        };

        let policy = guard.to_policy().unwrap();
        let key = policy
            .key_source()
            .resolve(&crate::ratelimit::CallContext::new());
        assert_eq!(key, Some("shared".to_string()));
    }
}
