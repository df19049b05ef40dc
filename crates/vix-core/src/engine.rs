//! Vix Engine – the composition root.
//!
//! [`VixEngine`] builds the event bus, worker pool, credential vault, profile
//! store, connection manager and migration engine once, wires them together
//! and hands out handles. There are no global singletons; a process that
//! needs two independent sets of connections builds two engines.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use vix_db::ProviderRegistry;

use crate::backup::BackupService;
use crate::config::AppConfig;
use crate::connection::{ConnectionId, ConnectionSource};
use crate::errors::VixResult;
use crate::events::EventBus;
use crate::manager::ConnectionManager;
use crate::migration::{MigrationEngine, MigrationState};
use crate::profiles::{ConnectionProfileStore, ProfileId, SessionEntry};
use crate::vault::CredentialVault;
use crate::worker::WorkerPool;

// ============================================================================
// VixEngine
// ============================================================================

/// Owns every Vix service.
///
/// # Example
///
/// ```ignore
/// use vix_core::{AppConfig, VixEngine};
///
/// let engine = VixEngine::from_config(AppConfig::load_default()?)?;
/// let id = engine.open_profile("Prod Qdrant")?;
/// for c in engine.manager().get(&id)?.known_collections {
///     println!("{}", c.name);
/// }
/// engine.shutdown();
/// ```
#[derive(Debug)]
pub struct VixEngine {
    config: AppConfig,
    events: EventBus,
    workers: WorkerPool,
    vault: CredentialVault,
    profiles: Arc<ConnectionProfileStore>,
    manager: ConnectionManager,
    migrations: MigrationEngine,
    backups: BackupService,
}

/// Outcome of [`VixEngine::restore_session`].
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    /// Instances recreated and connected.
    pub connected: Vec<ConnectionId>,
    /// Instances recreated whose connect failed; they are left in `Error`.
    pub failed: Vec<ConnectionId>,
    /// Saved entries whose profile no longer exists.
    pub skipped: Vec<ProfileId>,
}

impl VixEngine {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Build an engine from configuration with the built-in providers.
    ///
    /// The profile store lives at [`AppConfig::resolve_profiles_path`]; the
    /// vault backend follows `config.vault`.
    pub fn from_config(config: AppConfig) -> VixResult<Self> {
        let vault = CredentialVault::open(&config.vault)?;
        let profiles_path = config.resolve_profiles_path();
        Self::with_components(
            config,
            ProviderRegistry::builtin(),
            vault,
            profiles_path.as_deref(),
        )
    }

    /// Build an engine from `~/.vix/config.yaml`.
    pub fn with_defaults() -> VixResult<Self> {
        Self::from_config(AppConfig::load_default()?)
    }

    /// Build an engine from explicit parts.
    ///
    /// With `profiles_path` set to `None` the profile store is kept in memory.
    pub fn with_components(
        config: AppConfig,
        registry: ProviderRegistry,
        vault: CredentialVault,
        profiles_path: Option<&Path>,
    ) -> VixResult<Self> {
        for warning in config.validate()? {
            warn!("Config warning: {}", warning);
        }

        let events = EventBus::new();
        let workers = WorkerPool::new(config.workers.threads)?.with_events(events.clone());

        let profiles = match profiles_path {
            Some(path) => ConnectionProfileStore::open(path, vault.clone())?,
            None => ConnectionProfileStore::in_memory(vault.clone()),
        };
        let profiles = Arc::new(profiles.with_events(events.clone()));

        let manager = ConnectionManager::new(
            registry,
            Arc::clone(&profiles),
            workers.clone(),
            events.clone(),
            &config.connections,
        );
        let migrations = MigrationEngine::new(
            manager.clone(),
            workers.clone(),
            events.clone(),
            config.migration.clone(),
        );
        let backups = BackupService::new(
            manager.clone(),
            workers.clone(),
            config.migration.clone(),
        );

        debug!(
            "Engine ready: {} workers, vault {}, up to {} connections",
            workers.threads(),
            vault.mode(),
            config.connections.max_connections
        );

        Ok(Self {
            config,
            events,
            workers,
            vault,
            profiles,
            manager,
            migrations,
            backups,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn workers(&self) -> &WorkerPool {
        &self.workers
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    pub fn profiles(&self) -> &ConnectionProfileStore {
        &self.profiles
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn migrations(&self) -> &MigrationEngine {
        &self.migrations
    }

    pub fn backups(&self) -> &BackupService {
        &self.backups
    }

    // -------------------------------------------------------------------------
    // Convenience
    // -------------------------------------------------------------------------

    /// Create an instance from a profile (by id or name) and connect it.
    ///
    /// A failed connect is returned as an error; the instance stays open in
    /// the `Error` state so it can be retried.
    pub fn open_profile(&self, id_or_name: &str) -> VixResult<ConnectionId> {
        let profile = self.profiles.find(id_or_name)?;
        let id = self
            .manager
            .create_connection(ConnectionSource::Profile(profile.id))?;
        self.manager.connect(&id)?.wait()?;
        Ok(id)
    }

    // -------------------------------------------------------------------------
    // Session
    // -------------------------------------------------------------------------

    /// Record the open profile-backed instances and their selections.
    ///
    /// Ad-hoc instances are not recorded.
    pub fn save_session(&self) -> VixResult<usize> {
        let entries: Vec<SessionEntry> = self
            .manager
            .list()?
            .into_iter()
            .filter_map(|instance| {
                instance.profile_id.map(|profile_id| SessionEntry {
                    profile_id,
                    active_collection: instance.active_collection,
                    is_active: instance.is_active,
                })
            })
            .collect();
        let count = entries.len();
        self.profiles.set_last_active(entries)?;
        debug!("Saved session with {} connections", count);
        Ok(count)
    }

    /// Reopen the instances recorded by [`save_session`](Self::save_session).
    pub fn restore_session(&self) -> VixResult<RestoreReport> {
        let mut report = RestoreReport::default();
        for entry in self.profiles.last_active()? {
            if self.profiles.get(&entry.profile_id).is_err() {
                report.skipped.push(entry.profile_id);
                continue;
            }
            let id = self
                .manager
                .create_connection(ConnectionSource::Profile(entry.profile_id.clone()))?;

            match self.manager.connect(&id)?.wait() {
                Ok(()) => report.connected.push(id.clone()),
                Err(e) => {
                    warn!("Could not reconnect profile {}: {}", entry.profile_id, e);
                    report.failed.push(id.clone());
                }
            }

            if let Some(collection) = entry.active_collection.as_deref() {
                self.manager.set_active_collection(&id, Some(collection))?;
            }
            if entry.is_active {
                self.manager.set_active_connection(&id)?;
            }
        }

        info!(
            "Restored session: {} connected, {} failed, {} skipped",
            report.connected.len(),
            report.failed.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    /// Cancel running migrations and close every connection.
    ///
    /// Never fails; individual problems are logged.
    pub fn shutdown(&self) -> usize {
        match self.migrations.jobs() {
            Ok(jobs) => {
                for job in jobs {
                    if matches!(job.state, MigrationState::Pending | MigrationState::Running) {
                        if let Err(e) = self.migrations.cancel_migration(&job.id) {
                            warn!("Could not cancel migration {}: {}", job.id, e);
                        }
                    }
                }
            }
            Err(e) => warn!("Could not list migrations during shutdown: {}", e),
        }
        self.manager.shutdown()
    }
}
