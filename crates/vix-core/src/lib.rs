//! # vix-core
//!
//! **Vix** – multi-connection orchestration for vector databases.
//!
//! This crate holds several live backend sessions open at once, tracks which
//! connection and collection are active, persists reusable connection profiles
//! with their secrets in the OS credential store, and copies collections
//! between backends with cancellable, batched migration jobs. Backend access
//! goes through the adapters in `vix-db`.
//!
//! ## Main Types
//!
//! - [`VixEngine`] – composition root that owns every service
//! - [`ConnectionManager`] – live instances, their state machine and selection
//! - [`MigrationEngine`] – batched collection copies between instances
//! - [`BackupService`] – collection backups to JSON Lines files and restores
//! - [`ConnectionProfileStore`] – durable connection profiles
//! - [`CredentialVault`] – secret storage
//! - [`EventBus`] – typed publish/subscribe
//! - [`VixError`] – domain-specific error type
//!
//! ## Example
//!
//! ```ignore
//! use vix_core::{MigrationRequest, VixEngine};
//!
//! let engine = VixEngine::with_defaults()?;
//! let source = engine.open_profile("local-chroma")?;
//! let target = engine.open_profile("prod-qdrant")?;
//!
//! let handle = engine
//!     .migrations()
//!     .start_migration(MigrationRequest::new(source, "docs", target, "docs"))?;
//! let summary = handle.wait()?;
//! println!("{} copied, {} failed", summary.items_copied, summary.items_failed);
//!
//! engine.shutdown();
//! ```

// Modules
pub mod backup;
pub mod config;
pub mod connection;
pub mod constants;
pub mod engine;
pub mod errors;
pub mod events;
pub mod manager;
pub mod migration;
pub mod profiles;
pub mod vault;
pub mod worker;

// Re-exports for convenience
pub use backup::{
    list_backups, read_header, BackupEntry, BackupHeader, BackupRequest, BackupService,
    BackupSummary, RestoreRequest, RestoreSummary,
};
pub use config::{
    AppConfig, ConnectionsConfig, MigrationConfig, VaultBackend, VaultConfig, WorkersConfig,
};
pub use connection::{
    ConnectionId, ConnectionInstance, ConnectionSource, ConnectionState, InstanceError,
};
pub use constants::{
    CONFIG_FILENAME, DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONNECTIONS, PROFILES_FILENAME, VIX_HOME_DIR,
};
pub use engine::{RestoreReport, VixEngine};
pub use errors::{VaultError, VixError, VixResult};
pub use events::{DeliveryReport, Event, EventBus, ProfileChange, SubscriptionId, Topic};
pub use manager::{ActiveTarget, ConnectionManager, ManagedSession};
pub use migration::{
    JobId, MigrationEngine, MigrationHandle, MigrationJob, MigrationRequest, MigrationState,
    MigrationSummary,
};
pub use profiles::{
    ConnectionProfile, ConnectionProfileStore, CredentialUpdate, ImportReport, NewProfile,
    ProfileId, ProfileUpdate, SessionEntry,
};
pub use vault::{CredentialKey, CredentialVault, VaultMode};
pub use worker::{TaskHandle, WorkerPool};

// Adapter-layer types that appear in this crate's public API
pub use vix_db::{
    CollectionDescriptor, Credential, DistanceMetric, EndpointConfig, ProviderKind,
    ProviderRegistry, Record, WriteMode,
};
