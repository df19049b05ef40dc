//! Error types for vix-core.

use std::path::PathBuf;

use thiserror::Error;
use vix_db::{ConnectError, QueryError, WriteError};

use crate::connection::ConnectionState;

/// Result alias used across vix-core.
pub type VixResult<T> = Result<T, VixError>;

// ============================================================================
// VaultError
// ============================================================================

/// Errors raised by the credential vault.
///
/// Messages name the key only, never the secret.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// No usable backend (native store missing and fallback disabled).
    #[error("Credential store unavailable: {reason}")]
    Unavailable { reason: String },

    /// The OS refused access to the entry.
    #[error("Access to credential `{key}` was denied")]
    PermissionDenied { key: String },

    /// The stored entry could not be decoded.
    #[error("Credential `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },

    /// Any other backend failure.
    #[error("Credential store error: {message}")]
    Backend { message: String },
}

impl VaultError {
    /// Stable category name.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Unavailable { .. } => "vault-unavailable",
            Self::PermissionDenied { .. } => "vault-denied",
            Self::Corrupt { .. } => "vault-corrupt",
            Self::Backend { .. } => "vault",
        }
    }
}

// ============================================================================
// VixError
// ============================================================================

/// Domain-specific errors for Vix operations.
#[derive(Error, Debug)]
pub enum VixError {
    /// The connection cap was reached.
    #[error("Connection limit reached ({limit} open). Close a connection first.")]
    ResourceExhausted { limit: usize },

    /// No instance with this id is open.
    #[error("Connection `{id}` not found")]
    ConnectionNotFound { id: String },

    /// No profile with this id or name exists.
    #[error("Profile `{0}` not found")]
    ProfileNotFound(String),

    /// No migration job with this id is tracked.
    #[error("Migration `{0}` not found")]
    MigrationNotFound(String),

    /// The requested state change is not allowed.
    #[error("Connection `{id}` cannot go from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: ConnectionState,
        to: ConnectionState,
    },

    /// The operation needs a connected instance.
    #[error("Connection `{id}` is not connected (state: {state})")]
    NotConnected { id: String, state: ConnectionState },

    /// Invalid argument provided to an operation.
    #[error("{0}")]
    InvalidArgument(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {message}. {hint}")]
    InvalidConfiguration {
        /// Description of the invalid configuration.
        message: String,
        /// Actionable hint on how to fix it.
        hint: String,
    },

    /// The configuration file could not be read or parsed.
    #[error("Config invalid: {0}")]
    InvalidConfigFile(String),

    /// The profile store file could not be read or written.
    #[error("Profile store I/O error at `{path}`: {message}")]
    ProfileStoreIo { path: PathBuf, message: String },

    /// The profile store file could not be parsed.
    #[error("Profile store parse error at `{path}`: {message}")]
    ProfileStoreParse { path: PathBuf, message: String },

    /// A collection backup file could not be read or written.
    #[error("Backup I/O error at `{path}`: {message}")]
    BackupIo { path: PathBuf, message: String },

    /// A backup file is malformed or written by a newer format.
    #[error("Invalid backup `{path}`: {message}")]
    InvalidBackup { path: PathBuf, message: String },

    /// A restore would replace a collection without being allowed to.
    #[error("Collection `{name}` already exists")]
    CollectionExists { name: String },

    /// A worker task panicked or was dropped before completing.
    #[error("Task `{task}` failed: {reason}")]
    TaskFailed { task: String, reason: String },

    /// Lock poisoning and other internal failures.
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VixError {
    /// Create a connection-not-found error.
    pub fn connection_not_found(id: impl std::fmt::Display) -> Self {
        Self::ConnectionNotFound { id: id.to_string() }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a task failure.
    pub fn task_failed(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TaskFailed {
            task: task.into(),
            reason: reason.into(),
        }
    }

    /// Stable category name shown next to the message.
    pub fn category(&self) -> &'static str {
        match self {
            Self::ResourceExhausted { .. } => "resource-exhausted",
            Self::ConnectionNotFound { .. }
            | Self::ProfileNotFound(_)
            | Self::MigrationNotFound(_) => "not-found",
            Self::InvalidTransition { .. } => "invalid-transition",
            Self::NotConnected { .. } => "not-connected",
            Self::InvalidArgument(_) => "invalid-argument",
            Self::InvalidConfiguration { .. } | Self::InvalidConfigFile(_) => "config",
            Self::ProfileStoreIo { .. } | Self::ProfileStoreParse { .. } => "profile-store",
            Self::BackupIo { .. } | Self::InvalidBackup { .. } => "backup",
            Self::CollectionExists { .. } => "conflict",
            Self::TaskFailed { .. } => "task",
            Self::Internal(_) => "internal",
            Self::Connect(e) => e.category(),
            Self::Query(e) => e.category(),
            Self::Write(e) => e.category(),
            Self::Vault(e) => e.category(),
            Self::Io(_) => "io",
            Self::Json(_) | Self::Yaml(_) => "parse",
            Self::Other(_) => "other",
        }
    }

    /// Whether the underlying session is no longer usable.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::Query(e) => e.is_connection_lost(),
            Self::Write(e) => e.is_connection_lost(),
            _ => false,
        }
    }
}

/// Map a poisoned lock into [`VixError::Internal`].
pub(crate) fn lock_poisoned<E: std::fmt::Display>(e: E) -> VixError {
    VixError::internal(format!("Failed to acquire lock: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            VixError::ResourceExhausted { limit: 10 }.category(),
            "resource-exhausted"
        );
        assert_eq!(
            VixError::from(ConnectError::auth("nope")).category(),
            "auth"
        );
        assert_eq!(
            VixError::from(VaultError::PermissionDenied { key: "k".into() }).category(),
            "vault-denied"
        );
    }

    #[test]
    fn test_backup_errors_name_the_file() {
        let err = VixError::InvalidBackup {
            path: PathBuf::from("/tmp/docs.jsonl"),
            message: "missing header".into(),
        };
        assert_eq!(err.category(), "backup");
        assert!(err.to_string().contains("/tmp/docs.jsonl"));
        assert_eq!(
            VixError::CollectionExists { name: "docs".into() }.category(),
            "conflict"
        );
    }

    #[test]
    fn test_connection_lost_is_detected_through_wrappers() {
        let err = VixError::from(QueryError::connection_lost("reset"));
        assert!(err.is_connection_lost());
        assert!(!VixError::InvalidArgument("x".into()).is_connection_lost());
    }

    #[test]
    fn test_messages_name_keys_only() {
        let err = VaultError::Corrupt {
            key: "vix:profile:1".into(),
            reason: "bad json".into(),
        };
        assert_eq!(err.to_string(), "Credential `vix:profile:1` is corrupt: bad json");
    }
}
