//! Transport-agnostic call context and default caller identification.
//!
//! The engine never inspects request data itself. The host builds a
//! [`CallContext`] from whatever transport it fronts and the guard derives
//! an opaque caller key from it.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::warn;

/// Per-call information supplied by the host.
///
/// `values` carries arbitrary host attributes (session id, account id,
/// API key) for derived keys and skip predicates; the built-in key
/// strategy only looks at the address fields.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    forwarded_for: Option<String>,
    remote_addr: Option<IpAddr>,
    values: HashMap<String, String>,
}

impl CallContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the forwarded-for header value as received from the transport.
    pub fn with_forwarded_for(mut self, value: impl Into<String>) -> Self {
        self.forwarded_for = Some(value.into());
        self
    }

    /// Set the peer address of the connection.
    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Attach a named host attribute.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// The forwarded-for header value, if any.
    pub fn forwarded_for(&self) -> Option<&str> {
        self.forwarded_for.as_deref()
    }

    /// The peer address, if any.
    pub fn remote_addr(&self) -> Option<IpAddr> {
        self.remote_addr
    }

    /// Look up a host attribute.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Derive the default caller key: the first forwarded-for entry when
    /// present, otherwise the peer address.
    ///
    /// Loopback and unspecified addresses yield `None` since they identify
    /// the host itself rather than a caller; such calls are not limited.
    pub fn client_key(&self) -> Option<String> {
        if let Some(forwarded) = &self.forwarded_for {
            let first = forwarded.split(',').next().unwrap_or("").trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }

        let addr = self.remote_addr?;
        if addr.is_loopback() || addr.is_unspecified() {
            warn!(addr = %addr, "Caller address is local; skipping rate limiting");
            return None;
        }

        Some(addr.to_string())
    }
}
