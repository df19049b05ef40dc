//! Connection profile store.
//!
//! Profiles are the durable, non-secret half of a connection: provider,
//! endpoint fields and a reference into the [`CredentialVault`]. They are
//! kept in one JSON file:
//!
//! ```json
//! {
//!   "version": 1,
//!   "profiles": [
//!     {
//!       "id": "7c0f…",
//!       "name": "Prod Qdrant",
//!       "provider": "qdrant",
//!       "endpoint": { "host": "qdrant.internal", "port": 6333 },
//!       "credentialRef": "vix:profile:7c0f…",
//!       "createdAt": "2026-01-01T00:00:00Z",
//!       "updatedAt": "2026-01-01T00:00:00Z"
//!     }
//!   ],
//!   "lastActive": [ { "profileId": "7c0f…", "activeCollection": "docs", "isActive": true } ]
//! }
//! ```
//!
//! Every mutation is applied to a copy, written through a temp file and
//! renamed into place, and only then made visible.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, info, warn};
use uuid::Uuid;

use vix_db::{Credential, EndpointConfig, ProviderKind};

use crate::constants::PROFILE_STORE_VERSION;
use crate::errors::{lock_poisoned, VixError, VixResult};
use crate::events::{Event, EventBus, ProfileChange};
use crate::vault::{CredentialKey, CredentialVault};

// ============================================================================
// ProfileId
// ============================================================================

/// Opaque profile identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    /// Generate a fresh id.
    pub fn generate() -> Self {
        ProfileId(Uuid::new_v4().to_string())
    }

    /// Get the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProfileId {
    fn from(s: &str) -> Self {
        ProfileId(s.to_string())
    }
}

// ============================================================================
// ConnectionProfile
// ============================================================================

/// Durable connection configuration. Holds no secrets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProfile {
    pub id: ProfileId,
    pub name: String,
    pub provider: ProviderKind,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<CredentialKey>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields of a new profile.
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub name: String,
    pub provider: ProviderKind,
    pub endpoint: EndpointConfig,
    pub credential: Option<Credential>,
}

impl NewProfile {
    pub fn new(name: impl Into<String>, provider: ProviderKind, endpoint: EndpointConfig) -> Self {
        Self {
            name: name.into(),
            provider,
            endpoint,
            credential: None,
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }
}

/// What to do with a profile's stored credential on update.
#[derive(Debug, Clone, Default)]
pub enum CredentialUpdate {
    #[default]
    Keep,
    Replace(Credential),
    Remove,
}

/// Partial update of a profile. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub provider: Option<ProviderKind>,
    pub endpoint: Option<EndpointConfig>,
    pub credential: CredentialUpdate,
}

/// Saved session state for one profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub profile_id: ProfileId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_collection: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

/// Result of [`ConnectionProfileStore::import_json`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// Ids of the imported profiles, in file order.
    pub imported: Vec<ProfileId>,
    /// Profiles that were given a new id because theirs was taken.
    pub reassigned_ids: usize,
    /// Profiles that were renamed because their name was taken.
    pub renamed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileFile {
    version: u32,
    #[serde(default)]
    profiles: Vec<ConnectionProfile>,
    #[serde(default)]
    last_active: Vec<SessionEntry>,
}

impl Default for ProfileFile {
    fn default() -> Self {
        Self {
            version: PROFILE_STORE_VERSION,
            profiles: Vec::new(),
            last_active: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileExport {
    version: u32,
    profiles: Vec<ConnectionProfile>,
}

// ============================================================================
// ConnectionProfileStore
// ============================================================================

/// CRUD over connection profiles, backed by a JSON file and the vault.
pub struct ConnectionProfileStore {
    path: Option<PathBuf>,
    state: RwLock<ProfileFile>,
    vault: CredentialVault,
    events: Option<EventBus>,
}

impl fmt::Debug for ConnectionProfileStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfileStore")
            .field("path", &self.path)
            .field("vault", &self.vault)
            .finish()
    }
}

impl ConnectionProfileStore {
    /// Open the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>, vault: CredentialVault) -> VixResult<Self> {
        let path = path.into();
        let state = read_file(&path)?;
        debug!(
            "Loaded {} profiles from {}",
            state.profiles.len(),
            path.display()
        );
        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
            vault,
            events: None,
        })
    }

    /// A store that is never written to disk.
    pub fn in_memory(vault: CredentialVault) -> Self {
        Self {
            path: None,
            state: RwLock::new(ProfileFile::default()),
            vault,
            events: None,
        }
    }

    /// Publish `profiles.changed` on `events`.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The vault holding this store's credentials.
    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// All profiles, ordered by name.
    pub fn list(&self) -> VixResult<Vec<ConnectionProfile>> {
        let state = self.state.read().map_err(lock_poisoned)?;
        let mut profiles = state.profiles.clone();
        profiles.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        Ok(profiles)
    }

    /// Profile by id.
    pub fn get(&self, id: &ProfileId) -> VixResult<ConnectionProfile> {
        let state = self.state.read().map_err(lock_poisoned)?;
        state
            .profiles
            .iter()
            .find(|p| &p.id == id)
            .cloned()
            .ok_or_else(|| VixError::ProfileNotFound(id.to_string()))
    }

    /// Profile by id, exact name, or unique id prefix.
    pub fn find(&self, id_or_name: &str) -> VixResult<ConnectionProfile> {
        let state = self.state.read().map_err(lock_poisoned)?;
        if let Some(p) = state
            .profiles
            .iter()
            .find(|p| p.id.as_str() == id_or_name || p.name == id_or_name)
        {
            return Ok(p.clone());
        }

        let mut by_prefix = state
            .profiles
            .iter()
            .filter(|p| p.id.as_str().starts_with(id_or_name));
        match (by_prefix.next(), by_prefix.next()) {
            (Some(p), None) if !id_or_name.is_empty() => Ok(p.clone()),
            _ => Err(VixError::ProfileNotFound(id_or_name.to_string())),
        }
    }

    /// Number of profiles.
    pub fn len(&self) -> VixResult<usize> {
        Ok(self.state.read().map_err(lock_poisoned)?.profiles.len())
    }

    /// Whether the store has no profiles.
    pub fn is_empty(&self) -> VixResult<bool> {
        Ok(self.len()? == 0)
    }

    /// The stored credential of a profile, if it has one.
    pub fn credential(&self, id: &ProfileId) -> VixResult<Option<Credential>> {
        let profile = self.get(id)?;
        match &profile.credential_ref {
            Some(key) => Ok(self.vault.retrieve(key)?),
            None => Ok(None),
        }
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    /// Create a profile, storing its credential in the vault.
    pub fn create(&self, new: NewProfile) -> VixResult<ConnectionProfile> {
        let name = validate_name(&new.name)?;
        let now = Utc::now();
        let id = ProfileId::generate();

        let credential_ref = match &new.credential {
            Some(credential) if !credential.is_empty() => {
                let key = self.vault.profile_key(&id);
                self.vault.store(&key, credential)?;
                Some(key)
            }
            _ => None,
        };

        let profile = ConnectionProfile {
            id,
            name,
            provider: new.provider,
            endpoint: new.endpoint,
            credential_ref,
            created_at: now,
            updated_at: now,
        };

        let result = self.mutate(|state| {
            ensure_unique_name(state, &profile.name, None)?;
            state.profiles.push(profile.clone());
            Ok(())
        });
        if let Err(e) = result {
            if let Some(key) = &profile.credential_ref {
                if let Err(cleanup) = self.vault.delete(key) {
                    warn!("Could not remove orphaned credential {}: {}", key, cleanup);
                }
            }
            return Err(e);
        }

        info!("Created profile '{}' ({})", profile.name, profile.provider);
        self.publish(Some(&profile.id), ProfileChange::Created);
        Ok(profile)
    }

    /// Apply a partial update.
    ///
    /// The name is checked before the vault is touched. A replaced secret is
    /// put back if the profile file cannot be updated; a removed secret is
    /// only deleted once the profile no longer references it.
    pub fn update(&self, id: &ProfileId, update: ProfileUpdate) -> VixResult<ConnectionProfile> {
        let existing = self.get(id)?;
        let name = match &update.name {
            Some(name) => Some(validate_name(name)?),
            None => None,
        };
        if let Some(name) = &name {
            let state = self.state.read().map_err(lock_poisoned)?;
            ensure_unique_name(&state, name, Some(id))?;
        }

        // (key, secret it held before) for rollback; key to delete on success
        let mut replaced: Option<(CredentialKey, Option<Credential>)> = None;
        let mut removed: Option<CredentialKey> = None;
        let credential_ref = match update.credential {
            CredentialUpdate::Keep => existing.credential_ref.clone(),
            CredentialUpdate::Replace(credential) if !credential.is_empty() => {
                let key = existing
                    .credential_ref
                    .clone()
                    .unwrap_or_else(|| self.vault.profile_key(id));
                let previous = match &existing.credential_ref {
                    Some(key) => self.vault.retrieve(key)?,
                    None => None,
                };
                self.vault.store(&key, &credential)?;
                replaced = Some((key.clone(), previous));
                Some(key)
            }
            CredentialUpdate::Replace(_) | CredentialUpdate::Remove => {
                removed = existing.credential_ref.clone();
                None
            }
        };

        let result = self.mutate(|state| {
            if let Some(name) = &name {
                ensure_unique_name(state, name, Some(id))?;
            }
            let profile = find_mut(state, id)?;
            if let Some(name) = name {
                profile.name = name;
            }
            if let Some(provider) = update.provider {
                profile.provider = provider;
            }
            if let Some(endpoint) = update.endpoint {
                profile.endpoint = endpoint;
            }
            profile.credential_ref = credential_ref;
            profile.updated_at = Utc::now();
            Ok(profile.clone())
        });

        let updated = match result {
            Ok(updated) => updated,
            Err(e) => {
                if let Some((key, previous)) = replaced {
                    let restored = match previous {
                        Some(old) => self.vault.store(&key, &old),
                        None => self.vault.delete(&key).map(|_| ()),
                    };
                    if let Err(rollback) = restored {
                        warn!("Could not restore credential {}: {}", key, rollback);
                    }
                }
                return Err(e);
            }
        };
        if let Some(key) = removed {
            if let Err(e) = self.vault.delete(&key) {
                warn!("Could not remove credential {}: {}", key, e);
            }
        }

        debug!("Updated profile '{}'", updated.name);
        self.publish(Some(id), ProfileChange::Updated);
        Ok(updated)
    }

    /// Rename a profile.
    pub fn rename(&self, id: &ProfileId, new_name: &str) -> VixResult<ConnectionProfile> {
        self.update(
            id,
            ProfileUpdate {
                name: Some(new_name.to_string()),
                ..ProfileUpdate::default()
            },
        )
    }

    /// Copy a profile under a new id and name, including its credential.
    pub fn duplicate(&self, id: &ProfileId, new_name: Option<&str>) -> VixResult<ConnectionProfile> {
        let source = self.get(id)?;
        let credential = match &source.credential_ref {
            Some(key) => self.vault.retrieve(key)?,
            None => None,
        };

        let name = match new_name {
            Some(name) => name.to_string(),
            None => {
                let state = self.state.read().map_err(lock_poisoned)?;
                copy_name(&state, &source.name)
            }
        };

        let mut new = NewProfile::new(name, source.provider, source.endpoint.clone());
        new.credential = credential;
        self.create(new)
    }

    /// Delete a profile and its stored credential.
    ///
    /// The vault entry is removed first; if that fails the profile is kept.
    pub fn delete(&self, id: &ProfileId) -> VixResult<ConnectionProfile> {
        let profile = self.get(id)?;
        if let Some(key) = &profile.credential_ref {
            self.vault.delete(key)?;
        }

        self.mutate(|state| {
            state.profiles.retain(|p| &p.id != id);
            state.last_active.retain(|e| &e.profile_id != id);
            Ok(())
        })?;

        info!("Deleted profile '{}'", profile.name);
        self.publish(Some(id), ProfileChange::Deleted);
        Ok(profile)
    }

    // ------------------------------------------------------------------------
    // Import / export
    // ------------------------------------------------------------------------

    /// Serialize profiles without credential references.
    ///
    /// Exports everything when `ids` is empty.
    pub fn export_json(&self, ids: &[ProfileId]) -> VixResult<String> {
        let profiles = self
            .list()?
            .into_iter()
            .filter(|p| ids.is_empty() || ids.contains(&p.id))
            .map(|mut p| {
                p.credential_ref = None;
                p
            })
            .collect();
        let export = ProfileExport {
            version: PROFILE_STORE_VERSION,
            profiles,
        };
        Ok(serde_json::to_string_pretty(&export)?)
    }

    /// Import profiles produced by [`export_json`](Self::export_json).
    ///
    /// Conflicting ids are regenerated and conflicting names get a suffix.
    /// Imported profiles never carry credentials.
    pub fn import_json(&self, json: &str) -> VixResult<ImportReport> {
        let export: ProfileExport = serde_json::from_str(json)?;
        if export.version > PROFILE_STORE_VERSION {
            warn!(
                "Importing profiles written by a newer version (v{})",
                export.version
            );
        }

        let report = self.mutate(|state| {
            let mut report = ImportReport::default();
            for mut profile in export.profiles {
                validate_name(&profile.name)?;
                profile.credential_ref = None;
                if state.profiles.iter().any(|p| p.id == profile.id) {
                    profile.id = ProfileId::generate();
                    report.reassigned_ids += 1;
                }
                if state.profiles.iter().any(|p| p.name == profile.name) {
                    profile.name = copy_name(state, &profile.name);
                    report.renamed += 1;
                }
                profile.updated_at = Utc::now();
                report.imported.push(profile.id.clone());
                state.profiles.push(profile);
            }
            Ok(report)
        })?;

        info!("Imported {} profiles", report.imported.len());
        self.publish(None, ProfileChange::Imported);
        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Session record
    // ------------------------------------------------------------------------

    /// The saved session, in the order it was recorded.
    pub fn last_active(&self) -> VixResult<Vec<SessionEntry>> {
        Ok(self.state.read().map_err(lock_poisoned)?.last_active.clone())
    }

    /// Replace the saved session. Entries for unknown profiles are dropped.
    pub fn set_last_active(&self, entries: Vec<SessionEntry>) -> VixResult<()> {
        self.mutate(|state| {
            let known: HashSet<&ProfileId> = state.profiles.iter().map(|p| &p.id).collect();
            let entries = entries
                .into_iter()
                .filter(|e| known.contains(&e.profile_id))
                .collect();
            state.last_active = entries;
            Ok(())
        })
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Run `f` on a copy of the state, persist it, then swap it in.
    fn mutate<T>(&self, f: impl FnOnce(&mut ProfileFile) -> VixResult<T>) -> VixResult<T> {
        let mut state = self.state.write().map_err(lock_poisoned)?;
        let mut next = state.clone();
        let value = f(&mut next)?;
        if let Some(path) = &self.path {
            write_file(path, &next)?;
        }
        *state = next;
        Ok(value)
    }

    fn publish(&self, id: Option<&ProfileId>, change: ProfileChange) {
        if let Some(events) = &self.events {
            events.publish(Event::ProfilesChanged {
                profile_id: id.map(|id| id.to_string()),
                change,
            });
        }
    }
}

fn validate_name(name: &str) -> VixResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(VixError::InvalidArgument(
            "Profile name cannot be empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

fn ensure_unique_name(state: &ProfileFile, name: &str, except: Option<&ProfileId>) -> VixResult<()> {
    let taken = state
        .profiles
        .iter()
        .any(|p| p.name == name && Some(&p.id) != except);
    if taken {
        return Err(VixError::InvalidArgument(format!(
            "A profile named '{}' already exists",
            name
        )));
    }
    Ok(())
}

fn find_mut<'a>(state: &'a mut ProfileFile, id: &ProfileId) -> VixResult<&'a mut ConnectionProfile> {
    state
        .profiles
        .iter_mut()
        .find(|p| &p.id == id)
        .ok_or_else(|| VixError::ProfileNotFound(id.to_string()))
}

/// `name (copy)`, `name (copy 2)`, ... whichever is free first.
fn copy_name(state: &ProfileFile, name: &str) -> String {
    let taken = |candidate: &str| state.profiles.iter().any(|p| p.name == candidate);
    let first = format!("{} (copy)", name);
    if !taken(&first) {
        return first;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{} (copy {})", name, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

fn read_file(path: &Path) -> VixResult<ProfileFile> {
    if !path.exists() {
        return Ok(ProfileFile::default());
    }
    let content = fs::read_to_string(path).map_err(|e| VixError::ProfileStoreIo {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let file: ProfileFile =
        serde_json::from_str(&content).map_err(|e| VixError::ProfileStoreParse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
    if file.version > PROFILE_STORE_VERSION {
        warn!(
            "Profile store {} was written by a newer version (v{})",
            path.display(),
            file.version
        );
    }
    Ok(file)
}

fn write_file(path: &Path, file: &ProfileFile) -> VixResult<()> {
    let io_err = |e: std::io::Error| VixError::ProfileStoreIo {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let json = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}
