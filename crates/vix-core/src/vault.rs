//! Credential vault.
//!
//! Secrets live outside the profile store, one entry per key. The primary
//! backend is the OS secret store (macOS Keychain, Windows Credential Manager,
//! Linux keyutils) reached through `keyring`; when that store cannot be used
//! and the configuration allows it, an in-process map takes over and
//! [`CredentialVault::is_persistent`] reports `false`.
//!
//! Keys have the form `<namespace>:profile:<profileId>`. Values are the
//! credential serialized as one JSON document, so an entry is either fully
//! written or absent.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use zeroize::Zeroizing;

use vix_db::Credential;

use crate::config::{VaultBackend, VaultConfig};
use crate::constants::{DEFAULT_VAULT_NAMESPACE, VAULT_CHECK_KEY};
use crate::errors::VaultError;
use crate::profiles::ProfileId;

// ============================================================================
// CredentialKey
// ============================================================================

/// Vault key of one credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialKey(String);

impl CredentialKey {
    /// Key of the credential owned by a profile.
    pub fn for_profile(namespace: &str, profile_id: &ProfileId) -> Self {
        CredentialKey(format!("{}:profile:{}", namespace, profile_id))
    }

    /// Get the key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Secret stores
// ============================================================================

/// Where the vault keeps its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VaultMode {
    /// OS secret store.
    Native,
    /// Process memory; lost on exit.
    Memory,
}

impl fmt::Display for VaultMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultMode::Native => write!(f, "native"),
            VaultMode::Memory => write!(f, "memory"),
        }
    }
}

trait SecretStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Zeroizing<String>>, VaultError>;
    fn set(&self, key: &str, value: &str) -> Result<(), VaultError>;
    /// Returns whether an entry was removed.
    fn delete(&self, key: &str) -> Result<bool, VaultError>;
}

struct KeyringStore {
    service: String,
}

impl KeyringStore {
    fn entry(&self, key: &str) -> Result<keyring::Entry, VaultError> {
        keyring::Entry::new(&self.service, key).map_err(|e| map_keyring_error(key, e))
    }

    /// Whether the OS store answers at all.
    fn check_access(&self) -> Result<(), VaultError> {
        match self.entry(VAULT_CHECK_KEY)?.get_password() {
            Ok(_) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(map_keyring_error(VAULT_CHECK_KEY, e)),
        }
    }
}

impl SecretStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<Zeroizing<String>>, VaultError> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(Zeroizing::new(secret))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(map_keyring_error(key, e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VaultError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| map_keyring_error(key, e))
    }

    fn delete(&self, key: &str) -> Result<bool, VaultError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(map_keyring_error(key, e)),
        }
    }
}

fn map_keyring_error(key: &str, err: keyring::Error) -> VaultError {
    match err {
        keyring::Error::NoStorageAccess(_) => VaultError::PermissionDenied {
            key: key.to_string(),
        },
        keyring::Error::PlatformFailure(e) => VaultError::Unavailable {
            reason: e.to_string(),
        },
        keyring::Error::BadEncoding(_) => VaultError::Corrupt {
            key: key.to_string(),
            reason: "entry is not valid UTF-8".to_string(),
        },
        other => VaultError::Backend {
            message: other.to_string(),
        },
    }
}

#[derive(Default)]
struct MemoryStore {
    entries: Mutex<HashMap<String, Zeroizing<String>>>,
}

impl MemoryStore {
    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, Zeroizing<String>>>, VaultError> {
        self.entries.lock().map_err(|e| VaultError::Backend {
            message: format!("Failed to acquire lock: {}", e),
        })
    }
}

impl SecretStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Zeroizing<String>>, VaultError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), VaultError> {
        self.lock()?
            .insert(key.to_string(), Zeroizing::new(value.to_string()));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, VaultError> {
        Ok(self.lock()?.remove(key).is_some())
    }
}

// ============================================================================
// CredentialVault
// ============================================================================

/// Thread-safe credential store. Cloning yields another handle to the same
/// entries.
#[derive(Clone)]
pub struct CredentialVault {
    store: Arc<dyn SecretStore>,
    mode: VaultMode,
    namespace: String,
}

impl fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVault")
            .field("mode", &self.mode)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl CredentialVault {
    /// Open the vault selected by `config`.
    ///
    /// With [`VaultBackend::Auto`] an unusable OS store falls back to memory
    /// with a warning. With [`VaultBackend::Native`] it is an error.
    pub fn open(config: &VaultConfig) -> Result<Self, VaultError> {
        match config.backend {
            VaultBackend::Memory => Ok(Self::in_memory(&config.namespace)),
            VaultBackend::Native => {
                let store = KeyringStore {
                    service: config.namespace.clone(),
                };
                store.check_access()?;
                debug!("Credential vault using the OS secret store");
                Ok(Self::native(store, &config.namespace))
            }
            VaultBackend::Auto => {
                let store = KeyringStore {
                    service: config.namespace.clone(),
                };
                match store.check_access() {
                    Ok(()) => {
                        debug!("Credential vault using the OS secret store");
                        Ok(Self::native(store, &config.namespace))
                    }
                    Err(e) => {
                        warn!(
                            "OS secret store unusable ({}); credentials will not survive this process",
                            e
                        );
                        Ok(Self::in_memory(&config.namespace))
                    }
                }
            }
        }
    }

    fn native(store: KeyringStore, namespace: &str) -> Self {
        Self {
            store: Arc::new(store),
            mode: VaultMode::Native,
            namespace: namespace.to_string(),
        }
    }

    /// An empty in-process vault.
    pub fn in_memory(namespace: &str) -> Self {
        Self {
            store: Arc::new(MemoryStore::default()),
            mode: VaultMode::Memory,
            namespace: namespace.to_string(),
        }
    }

    /// Which backend is in use.
    pub fn mode(&self) -> VaultMode {
        self.mode
    }

    /// Whether stored credentials survive the process.
    pub fn is_persistent(&self) -> bool {
        self.mode == VaultMode::Native
    }

    /// Key namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Key for a profile's credential in this vault's namespace.
    pub fn profile_key(&self, profile_id: &ProfileId) -> CredentialKey {
        CredentialKey::for_profile(&self.namespace, profile_id)
    }

    /// Store (or replace) a credential.
    pub fn store(&self, key: &CredentialKey, credential: &Credential) -> Result<(), VaultError> {
        let encoded = Zeroizing::new(serde_json::to_string(credential).map_err(|e| {
            VaultError::Backend {
                message: format!("Failed to encode credential `{}`: {}", key, e),
            }
        })?);
        self.store.set(key.as_str(), &encoded)?;
        debug!("Stored credential `{}`", key);
        Ok(())
    }

    /// Read a credential. `Ok(None)` when no entry exists.
    pub fn retrieve(&self, key: &CredentialKey) -> Result<Option<Credential>, VaultError> {
        let Some(encoded) = self.store.get(key.as_str())? else {
            return Ok(None);
        };
        serde_json::from_str::<Credential>(&encoded)
            .map(Some)
            .map_err(|e| VaultError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    /// Delete a credential. Deleting a missing entry is not an error.
    pub fn delete(&self, key: &CredentialKey) -> Result<bool, VaultError> {
        let removed = self.store.delete(key.as_str())?;
        if removed {
            debug!("Deleted credential `{}`", key);
        }
        Ok(removed)
    }

    /// Whether an entry exists.
    pub fn exists(&self, key: &CredentialKey) -> Result<bool, VaultError> {
        Ok(self.store.get(key.as_str())?.is_some())
    }
}

impl Default for CredentialVault {
    fn default() -> Self {
        Self::in_memory(DEFAULT_VAULT_NAMESPACE)
    }
}
