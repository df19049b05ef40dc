//! Connection instances and their state machine.
//!
//! A [`ConnectionInstance`] is a snapshot of one live backend session managed
//! by the [`ConnectionManager`](crate::manager::ConnectionManager). Only the
//! manager mutates instances; callers receive clones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use vix_db::{CollectionDescriptor, Credential, EndpointConfig, ProviderKind};

use crate::constants::BREADCRUMB_SEPARATOR;
use crate::profiles::ProfileId;

// ============================================================================
// ConnectionId
// ============================================================================

/// Process-unique identifier of a connection instance.
///
/// Generated from a random UUID at creation and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh id.
    pub fn generate() -> Self {
        ConnectionId(Uuid::new_v4().to_string())
    }

    /// Get the id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for compact display.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        ConnectionId(s.to_string())
    }
}

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a connection instance.
///
/// ```text
/// Disconnected ──connect──▶ Connecting ──ok──▶ Connected
///      ▲                        │                  │
///      │                      fail               lost
///      │                        ▼                  ▼
///      └──────disconnect────── Error ◀─────────────┘
///                               │
///                               └──retry──▶ Connecting
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session.
    #[default]
    Disconnected,
    /// Adapter `connect` in flight.
    Connecting,
    /// Session open.
    Connected,
    /// Last connect or operation failed; `last_error` says why.
    Error,
}

impl ConnectionState {
    /// Get the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Error => "error",
        }
    }

    /// Whether the state machine allows going from `self` to `to`.
    pub fn can_transition_to(self, to: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, to),
            (Disconnected, Connecting)
                | (Error, Connecting)
                | (Connecting, Connected)
                | (Connecting, Error)
                | (Connected, Error)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
                | (Error, Disconnected)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// InstanceError
// ============================================================================

/// User-facing error recorded on an instance in the `Error` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceError {
    /// Stable category (`auth`, `network`, `timeout`, ...).
    pub category: String,
    /// Human-readable message.
    pub message: String,
}

impl InstanceError {
    /// Create an instance error.
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }
}

impl From<&crate::errors::VixError> for InstanceError {
    fn from(err: &crate::errors::VixError) -> Self {
        Self::new(err.category(), err.to_string())
    }
}

impl fmt::Display for InstanceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

// ============================================================================
// ConnectionSource
// ============================================================================

/// Where a new instance gets its configuration from.
#[derive(Debug, Clone)]
pub enum ConnectionSource {
    /// A saved profile; the credential is read from the vault at connect time.
    Profile(ProfileId),
    /// A one-off configuration that is never persisted.
    AdHoc {
        name: String,
        provider: ProviderKind,
        endpoint: EndpointConfig,
        credential: Option<Credential>,
    },
}

impl ConnectionSource {
    /// Ad-hoc source without a credential.
    pub fn ad_hoc(name: impl Into<String>, provider: ProviderKind, endpoint: EndpointConfig) -> Self {
        ConnectionSource::AdHoc {
            name: name.into(),
            provider,
            endpoint,
            credential: None,
        }
    }

    /// Attach a credential to an ad-hoc source. No effect on profile sources.
    pub fn with_credential(self, credential: Credential) -> Self {
        match self {
            ConnectionSource::AdHoc {
                name,
                provider,
                endpoint,
                ..
            } => ConnectionSource::AdHoc {
                name,
                provider,
                endpoint,
                credential: Some(credential),
            },
            other => other,
        }
    }
}

// ============================================================================
// ConnectionInstance
// ============================================================================

/// Snapshot of one managed connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInstance {
    pub id: ConnectionId,
    pub profile_id: Option<ProfileId>,
    pub display_name: String,
    pub provider: ProviderKind,
    pub state: ConnectionState,
    pub active_collection: Option<String>,
    /// The active collection is not in `known_collections`.
    pub stale_selection: bool,
    pub known_collections: Vec<CollectionDescriptor>,
    pub last_error: Option<InstanceError>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl ConnectionInstance {
    pub(crate) fn new(
        display_name: impl Into<String>,
        provider: ProviderKind,
        profile_id: Option<ProfileId>,
    ) -> Self {
        Self {
            id: ConnectionId::generate(),
            profile_id,
            display_name: display_name.into(),
            provider,
            state: ConnectionState::Disconnected,
            active_collection: None,
            stale_selection: false,
            known_collections: Vec::new(),
            last_error: None,
            is_active: false,
            created_at: Utc::now(),
        }
    }

    /// Whether `name` is among the known collections.
    pub fn knows_collection(&self, name: &str) -> bool {
        self.known_collections.iter().any(|c| c.name == name)
    }

    /// Recompute `stale_selection` from the current collections.
    pub(crate) fn recompute_stale(&mut self) {
        self.stale_selection = match &self.active_collection {
            Some(name) => !self.knows_collection(name),
            None => false,
        };
    }

    /// `Connection > collection`, or just the connection name.
    pub fn breadcrumb(&self) -> String {
        match &self.active_collection {
            Some(collection) => format!(
                "{}{}{}",
                self.display_name, BREADCRUMB_SEPARATOR, collection
            ),
            None => self.display_name.clone(),
        }
    }

    /// Names of the known collections, in listing order.
    pub fn collection_names(&self) -> Vec<String> {
        self.known_collections
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ConnectionState; 4] = [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Error,
    ];

    #[test]
    fn test_transition_table() {
        use ConnectionState::*;
        let allowed: Vec<(ConnectionState, ConnectionState)> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        assert_eq!(
            allowed,
            vec![
                (Disconnected, Connecting),
                (Connecting, Disconnected),
                (Connecting, Connected),
                (Connecting, Error),
                (Connected, Disconnected),
                (Connected, Error),
                (Error, Disconnected),
                (Error, Connecting),
            ]
        );
    }

    #[test]
    fn test_never_skips_connecting() {
        assert!(!ConnectionState::Disconnected.can_transition_to(ConnectionState::Connected));
        assert!(!ConnectionState::Error.can_transition_to(ConnectionState::Connected));
    }

    #[test]
    fn test_ids_are_unique() {
        let ids: std::collections::HashSet<ConnectionId> =
            (0..1000).map(|_| ConnectionId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_stale_and_breadcrumb() {
        let mut instance = ConnectionInstance::new("Prod", ProviderKind::Memory, None);
        assert_eq!(instance.breadcrumb(), "Prod");

        instance.active_collection = Some("docs".into());
        instance.recompute_stale();
        assert!(instance.stale_selection);
        assert_eq!(instance.breadcrumb(), "Prod > docs");

        instance.known_collections = vec![CollectionDescriptor::new("docs")];
        instance.recompute_stale();
        assert!(!instance.stale_selection);
    }
}
