//! Configuration types for Vix.
//!
//! [`AppConfig`] is read from `~/.vix/config.yaml`. Every section is optional;
//! missing fields take the defaults below.
//!
//! ```yaml
//! connections:
//!   maxConnections: 10
//!   connectTimeoutSecs: 15
//! workers:
//!   threads: 4
//! migration:
//!   batchSize: 100
//!   includeVectors: true
//!   writeMode: upsert
//!   createMissingTarget: true
//! vault:
//!   namespace: vix
//!   backend: auto
//! profilesPath: /home/me/.vix/profiles.json
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use vix_db::WriteMode;

use crate::constants::{
    CONFIG_FILENAME, DEFAULT_BATCH_SIZE, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_VAULT_NAMESPACE, DEFAULT_WORKER_THREADS, MAX_BATCH_SIZE, PROFILES_FILENAME,
    VIX_HOME_DIR,
};
use crate::errors::VixError;

// ============================================================================
// AppConfig
// ============================================================================

/// User-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Connection manager limits.
    #[serde(default)]
    pub connections: ConnectionsConfig,

    /// Worker pool sizing.
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Migration defaults.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Credential vault settings.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Override for the profile store file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles_path: Option<PathBuf>,
}

impl AppConfig {
    /// Load the configuration from the default location (`~/.vix/config.yaml`).
    ///
    /// If the file does not exist, returns the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`VixError::InvalidConfigFile`] if the file exists but cannot be parsed.
    pub fn load_default() -> Result<Self, VixError> {
        match Self::default_path() {
            Some(path) => Self::from_path(&path),
            None => {
                tracing::debug!("Could not determine home directory, using default config");
                Ok(Self::default())
            }
        }
    }

    /// Load the configuration from a specific path.
    ///
    /// If the file does not exist, returns the defaults.
    ///
    /// # Errors
    ///
    /// Returns [`VixError::InvalidConfigFile`] if the file exists but cannot be parsed.
    /// Returns [`VixError::InvalidConfiguration`] if validation fails.
    pub fn from_path(path: &Path) -> Result<Self, VixError> {
        if !path.exists() {
            tracing::debug!("Config not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            VixError::InvalidConfigFile(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            VixError::InvalidConfigFile(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        for warning in config.validate()? {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok(config)
    }

    /// Get the default Vix home directory (`~/.vix`).
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(VIX_HOME_DIR))
    }

    /// Get the default config file path (`~/.vix/config.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        Self::default_dir().map(|d| d.join(CONFIG_FILENAME))
    }

    /// Resolve the profile store path: explicit override, else `~/.vix/profiles.json`.
    pub fn resolve_profiles_path(&self) -> Option<PathBuf> {
        self.profiles_path
            .clone()
            .or_else(|| Self::default_dir().map(|d| d.join(PROFILES_FILENAME)))
    }

    /// Validate the configuration.
    ///
    /// Critical problems are returned as [`VixError::InvalidConfiguration`];
    /// questionable values are returned as warnings for the caller to log.
    pub fn validate(&self) -> Result<Vec<String>, VixError> {
        let mut warnings = Vec::new();
        warnings.extend(self.connections.validate()?);
        warnings.extend(self.workers.validate()?);
        warnings.extend(self.migration.validate()?);
        warnings.extend(self.vault.validate()?);
        Ok(warnings)
    }
}

// ============================================================================
// ConnectionsConfig
// ============================================================================

/// Connection manager limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionsConfig {
    /// Hard cap on simultaneously open instances.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Timeout for connect and each backend request, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ConnectionsConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    fn validate(&self) -> Result<Vec<String>, VixError> {
        let mut warnings = Vec::new();
        if self.max_connections == 0 {
            return Err(VixError::InvalidConfiguration {
                message: "connections.maxConnections cannot be 0".to_string(),
                hint: "Set maxConnections to at least 1 (default: 10)".to_string(),
            });
        }
        if self.connect_timeout_secs == 0 {
            return Err(VixError::InvalidConfiguration {
                message: "connections.connectTimeoutSecs cannot be 0".to_string(),
                hint: "Set connectTimeoutSecs to at least 1 (default: 15)".to_string(),
            });
        }
        if self.max_connections > 50 {
            warnings.push(format!(
                "connections.maxConnections={} is very large; each open connection holds backend resources",
                self.max_connections
            ));
        }
        if self.connect_timeout_secs > 300 {
            warnings.push(format!(
                "connections.connectTimeoutSecs={} is very long; closing a stuck connection may take that long",
                self.connect_timeout_secs
            ));
        }
        Ok(warnings)
    }
}

// ============================================================================
// WorkersConfig
// ============================================================================

/// Worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkersConfig {
    /// Number of worker threads.
    #[serde(default = "default_worker_threads")]
    pub threads: usize,
}

fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_WORKER_THREADS,
        }
    }
}

impl WorkersConfig {
    fn validate(&self) -> Result<Vec<String>, VixError> {
        if self.threads == 0 {
            return Err(VixError::InvalidConfiguration {
                message: "workers.threads cannot be 0".to_string(),
                hint: "Set threads to at least 1 (default: 4)".to_string(),
            });
        }
        let mut warnings = Vec::new();
        if self.threads == 1 {
            warnings.push(
                "workers.threads=1: a running migration blocks connects and refreshes".to_string(),
            );
        }
        Ok(warnings)
    }
}

// ============================================================================
// MigrationConfig
// ============================================================================

/// Defaults applied to migrations that do not override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationConfig {
    /// Items per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Whether vectors are copied.
    #[serde(default = "default_true")]
    pub include_vectors: bool,

    /// Duplicate-id policy.
    #[serde(default)]
    pub write_mode: WriteMode,

    /// Create the target collection when it does not exist.
    #[serde(default = "default_true")]
    pub create_missing_target: bool,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_true() -> bool {
    true
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            include_vectors: true,
            write_mode: WriteMode::Upsert,
            create_missing_target: true,
        }
    }
}

impl MigrationConfig {
    fn validate(&self) -> Result<Vec<String>, VixError> {
        if self.batch_size == 0 {
            return Err(VixError::InvalidConfiguration {
                message: "migration.batchSize cannot be 0".to_string(),
                hint: "Set batchSize to at least 1 (recommended: 100-1000)".to_string(),
            });
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(VixError::InvalidConfiguration {
                message: format!("migration.batchSize={} is too large", self.batch_size),
                hint: format!("Set batchSize to at most {}", MAX_BATCH_SIZE),
            });
        }
        let mut warnings = Vec::new();
        if !self.include_vectors {
            warnings.push(
                "migration.includeVectors=false: targets that require vectors will reject every item"
                    .to_string(),
            );
        }
        Ok(warnings)
    }
}

// ============================================================================
// VaultConfig
// ============================================================================

/// Which credential backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultBackend {
    /// OS keychain when available, in-process memory otherwise.
    #[default]
    Auto,
    /// OS keychain only; fail when it is unavailable.
    Native,
    /// In-process memory only.
    Memory,
}

impl std::fmt::Display for VaultBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultBackend::Auto => write!(f, "auto"),
            VaultBackend::Native => write!(f, "native"),
            VaultBackend::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for VaultBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(VaultBackend::Auto),
            "native" | "keyring" | "keychain" => Ok(VaultBackend::Native),
            "memory" => Ok(VaultBackend::Memory),
            _ => Err(format!(
                "Unknown vault backend: '{}'. Use 'auto', 'native', or 'memory'.",
                s
            )),
        }
    }
}

/// Credential vault settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultConfig {
    /// Key namespace; also the keyring service name.
    #[serde(default = "default_vault_namespace")]
    pub namespace: String,

    /// Backend selection.
    #[serde(default)]
    pub backend: VaultBackend,
}

fn default_vault_namespace() -> String {
    DEFAULT_VAULT_NAMESPACE.to_string()
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_VAULT_NAMESPACE.to_string(),
            backend: VaultBackend::Auto,
        }
    }
}

impl VaultConfig {
    fn validate(&self) -> Result<Vec<String>, VixError> {
        if self.namespace.trim().is_empty() || self.namespace.contains(':') {
            return Err(VixError::InvalidConfiguration {
                message: format!("vault.namespace '{}' is invalid", self.namespace),
                hint: "Use a non-empty namespace without ':' (default: vix)".to_string(),
            });
        }
        let mut warnings = Vec::new();
        if self.backend == VaultBackend::Memory {
            warnings.push(
                "vault.backend=memory: credentials are forgotten when the process exits"
                    .to_string(),
            );
        }
        Ok(warnings)
    }
}
