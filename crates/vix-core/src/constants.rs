//! Common constants used throughout vix-core.
//!
//! This module centralizes paths, file names, and default limits to avoid
//! duplication across the configuration, profile store and engine.

// ============================================================================
// Directory and File Names
// ============================================================================

/// The name of the Vix home directory.
///
/// Located at `~/.vix/` on Unix-like systems.
pub const VIX_HOME_DIR: &str = ".vix";

/// Configuration file inside the Vix home directory.
pub const CONFIG_FILENAME: &str = "config.yaml";

/// Profile store file inside the Vix home directory.
pub const PROFILES_FILENAME: &str = "profiles.json";

/// Schema version written to the profile store file.
pub const PROFILE_STORE_VERSION: u32 = 1;

// ============================================================================
// Connection Limits
// ============================================================================

/// Maximum number of simultaneously open connection instances.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

// ============================================================================
// Worker Pool
// ============================================================================

/// Number of worker threads.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Thread name prefix for pool workers.
pub const WORKER_THREAD_PREFIX: &str = "vix-worker";

// ============================================================================
// Migration
// ============================================================================

/// Items per migration batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Upper bound on the migration batch size.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Number of per-item failures kept on a job for display.
pub const MAX_RECORDED_FAILURES: usize = 50;

// ============================================================================
// Backups
// ============================================================================

/// Format version written to the header line of a backup file.
pub const BACKUP_FORMAT_VERSION: u32 = 1;

/// Extension of backup files (JSON Lines).
pub const BACKUP_FILE_EXTENSION: &str = "jsonl";

// ============================================================================
// Credential Vault
// ============================================================================

/// Default vault namespace; also the keyring service name.
pub const DEFAULT_VAULT_NAMESPACE: &str = "vix";

/// Keyring entry read to check whether the native store is usable.
pub const VAULT_CHECK_KEY: &str = "__vix_check__";

// ============================================================================
// Display
// ============================================================================

/// Separator used in breadcrumbs (`Connection > collection`).
pub const BREADCRUMB_SEPARATOR: &str = " > ";
