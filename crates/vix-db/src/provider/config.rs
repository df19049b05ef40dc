//! Endpoint configuration, connect options and capability flags.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConnectError;

// ============================================================================
// Constants
// ============================================================================

/// Default connect timeout, matching `connections.connectTimeoutSecs`.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Namespace used by the memory provider when none is configured.
pub const DEFAULT_NAMESPACE: &str = "default";

// ============================================================================
// EndpointConfig
// ============================================================================

/// Provider-specific, non-secret endpoint fields (host, port, path, url, ...).
///
/// Values are kept as JSON so profile files stay readable:
/// `{"host": "localhost", "port": 6333, "useTls": false}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointConfig(BTreeMap<String, serde_json::Value>);

impl EndpointConfig {
    /// Create an empty endpoint configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, returning `self` for chaining.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set a field in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Get a raw field.
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// Get a non-empty string field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .and_then(|v| v.as_str())
            .filter(|s| !s.trim().is_empty())
    }

    /// Get an integer field, accepting numeric strings.
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        match self.0.get(key)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get a boolean field, accepting "true"/"false" strings.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            serde_json::Value::Bool(b) => Some(*b),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Get a path field.
    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get_str(key).map(PathBuf::from)
    }

    /// Get a required string field.
    pub fn require_str(&self, key: &str) -> Result<&str, ConnectError> {
        self.get_str(key)
            .ok_or_else(|| ConnectError::malformed(format!("missing required field '{}'", key)))
    }

    /// Iterate over all fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }

    /// Whether no field is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// One-line summary for listings, e.g. `host=localhost port=6333`.
    pub fn summary(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{}={}", k, s),
                other => format!("{}={}", k, other),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Parse `key=value` pairs as given on the command line.
    ///
    /// Integers and booleans are stored with their JSON type.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<Self, ConnectError> {
        let mut config = Self::new();
        for pair in pairs {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConnectError::malformed(format!("expected key=value, got '{}'", pair))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(ConnectError::malformed(format!("empty key in '{}'", pair)));
            }
            let value = value.trim();
            let json = if let Ok(n) = value.parse::<u64>() {
                serde_json::Value::from(n)
            } else if let Ok(b) = value.parse::<bool>() {
                serde_json::Value::from(b)
            } else {
                serde_json::Value::from(value)
            };
            config.set(key, json);
        }
        Ok(config)
    }
}

// ============================================================================
// ConnectOptions
// ============================================================================

/// Per-connect options supplied by the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Timeout for the initial handshake and every subsequent request.
    pub timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl ConnectOptions {
    /// Set the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Timeout in milliseconds, as reported by [`ConnectError::Timeout`].
    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis().min(u128::from(u64::MAX)) as u64
    }
}

// ============================================================================
// ProviderCapabilities
// ============================================================================

/// What a provider supports beyond listing and paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCapabilities {
    /// `WriteMode::InsertOnly` is honored.
    pub insert_only_writes: bool,
    /// Collections can be created through the session.
    pub create_collection: bool,
    /// Items and collections can be deleted.
    pub delete: bool,
    /// Collections are grouped under namespaces.
    pub namespaces: bool,
    /// Data survives the process.
    pub persistent: bool,
}
