//! Connection manager.
//!
//! Owns every live [`ConnectionInstance`], the active connection pointer and
//! the provider sessions behind them.
//!
//! ## Locking
//!
//! - One manager lock guards the instance map and the active pointer. It is
//!   held for state transitions only, never across backend I/O.
//! - Each instance has an operation lock held for a whole connect, refresh,
//!   disconnect or close, so operations on one instance run in order while
//!   different instances interleave freely.
//! - Events are published after the manager lock is released.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use tracing::{debug, error, info, warn};

use vix_db::{
    BatchOutcome, CollectionDescriptor, ConnectOptions, Credential, Cursor, DistanceMetric,
    EndpointConfig, Page, ProviderCapabilities, ProviderKind, ProviderRegistry, ProviderSession,
    Record, WriteMode,
};

use crate::config::ConnectionsConfig;
use crate::connection::{
    ConnectionId, ConnectionInstance, ConnectionSource, ConnectionState, InstanceError,
};
use crate::errors::{lock_poisoned, VixError, VixResult};
use crate::events::{Event, EventBus};
use crate::profiles::{ConnectionProfileStore, ProfileId};
use crate::worker::{TaskHandle, WorkerPool};

// ============================================================================
// Internal state
// ============================================================================

#[derive(Clone)]
enum Origin {
    Profile(ProfileId),
    AdHoc {
        endpoint: EndpointConfig,
        credential: Option<Credential>,
    },
}

struct Entry {
    instance: ConnectionInstance,
    origin: Origin,
    session: Option<Arc<dyn ProviderSession>>,
    capabilities: ProviderCapabilities,
    op_lock: Arc<Mutex<()>>,
}

#[derive(Default)]
struct ManagerState {
    entries: HashMap<ConnectionId, Entry>,
    /// Creation order.
    order: Vec<ConnectionId>,
    active: Option<ConnectionId>,
}

impl ManagerState {
    fn entry(&self, id: &ConnectionId) -> VixResult<&Entry> {
        self.entries
            .get(id)
            .ok_or_else(|| VixError::connection_not_found(id))
    }

    fn entry_mut(&mut self, id: &ConnectionId) -> VixResult<&mut Entry> {
        self.entries
            .get_mut(id)
            .ok_or_else(|| VixError::connection_not_found(id))
    }
}

struct Inner {
    registry: ProviderRegistry,
    profiles: Arc<ConnectionProfileStore>,
    workers: WorkerPool,
    events: EventBus,
    max_connections: usize,
    connect_options: ConnectOptions,
    state: RwLock<ManagerState>,
}

// ============================================================================
// ConnectionManager
// ============================================================================

/// Manages live connection instances. Cloning yields another handle to the
/// same manager.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("max_connections", &self.inner.max_connections)
            .field("connections", &self.connection_count())
            .finish()
    }
}

/// The active connection and collection, as resolved for an unscoped operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTarget {
    pub connection: ConnectionId,
    pub collection: String,
    /// The collection was not in the last listing.
    pub stale: bool,
}

impl ConnectionManager {
    /// Create a manager.
    pub fn new(
        registry: ProviderRegistry,
        profiles: Arc<ConnectionProfileStore>,
        workers: WorkerPool,
        events: EventBus,
        config: &ConnectionsConfig,
    ) -> Self {
        let connect_options = ConnectOptions::default().with_timeout(config.connect_timeout());
        Self {
            inner: Arc::new(Inner {
                registry,
                profiles,
                workers,
                events,
                max_connections: config.max_connections,
                connect_options,
                state: RwLock::new(ManagerState::default()),
            }),
        }
    }

    /// Bus the manager publishes on.
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Maximum number of open instances.
    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Add a `Disconnected` instance.
    ///
    /// # Errors
    ///
    /// [`VixError::ResourceExhausted`] when the connection cap is reached; no
    /// instance is added in that case.
    pub fn create_connection(&self, source: ConnectionSource) -> VixResult<ConnectionId> {
        let (instance, origin) = match source {
            ConnectionSource::Profile(profile_id) => {
                let profile = self.inner.profiles.get(&profile_id)?;
                (
                    ConnectionInstance::new(profile.name, profile.provider, Some(profile_id.clone())),
                    Origin::Profile(profile_id),
                )
            }
            ConnectionSource::AdHoc {
                name,
                provider,
                endpoint,
                credential,
            } => {
                let name = name.trim();
                if name.is_empty() {
                    return Err(VixError::InvalidArgument(
                        "Connection name cannot be empty".to_string(),
                    ));
                }
                (
                    ConnectionInstance::new(name, provider, None),
                    Origin::AdHoc {
                        endpoint,
                        credential,
                    },
                )
            }
        };

        let id = instance.id.clone();
        let event = Event::ConnectionOpened {
            id: id.clone(),
            name: instance.display_name.clone(),
            provider: instance.provider,
        };

        {
            let mut state = self.inner.write()?;
            if state.entries.len() >= self.inner.max_connections {
                warn!(
                    "Connection limit reached ({}), refusing '{}'",
                    self.inner.max_connections, instance.display_name
                );
                return Err(VixError::ResourceExhausted {
                    limit: self.inner.max_connections,
                });
            }
            state.order.push(id.clone());
            state.entries.insert(
                id.clone(),
                Entry {
                    instance,
                    origin,
                    session: None,
                    capabilities: ProviderCapabilities::default(),
                    op_lock: Arc::new(Mutex::new(())),
                },
            );
        }

        debug!("Created connection {}", id);
        self.inner.events.publish(event);
        Ok(id)
    }

    /// Open the backend session on a worker.
    ///
    /// The instance goes `Connecting`, then `Connected` (followed by a
    /// collection refresh) or `Error`.
    pub fn connect(&self, id: &ConnectionId) -> VixResult<TaskHandle<()>> {
        self.inner.read()?.entry(id)?;
        let inner = Arc::clone(&self.inner);
        let task_id = id.clone();
        Ok(self
            .inner
            .workers
            .submit(format!("connect {}", id.short()), move || {
                inner.connect_now(&task_id)
            }))
    }

    /// Replace the instance's collection list on a worker.
    ///
    /// Never changes the active collection; recomputes the stale flag. A
    /// failed listing moves the instance to `Error`.
    pub fn refresh_collections(
        &self,
        id: &ConnectionId,
    ) -> VixResult<TaskHandle<Vec<CollectionDescriptor>>> {
        self.inner.read()?.entry(id)?;
        let inner = Arc::clone(&self.inner);
        let task_id = id.clone();
        Ok(self
            .inner
            .workers
            .submit(format!("refresh {}", id.short()), move || {
                let op = inner.op_lock(&task_id)?;
                let _guard = op.lock().map_err(lock_poisoned)?;
                inner.refresh_locked(&task_id)
            }))
    }

    /// Release the session and go `Disconnected`, keeping the instance.
    pub fn disconnect(&self, id: &ConnectionId) -> VixResult<TaskHandle<()>> {
        self.inner.read()?.entry(id)?;
        let inner = Arc::clone(&self.inner);
        let task_id = id.clone();
        Ok(self
            .inner
            .workers
            .submit(format!("disconnect {}", id.short()), move || {
                inner.disconnect_now(&task_id)
            }))
    }

    /// Close the session and remove the instance.
    ///
    /// If it was the active connection, no connection is active afterwards.
    pub fn close_connection(&self, id: &ConnectionId) -> VixResult<TaskHandle<()>> {
        self.inner.read()?.entry(id)?;
        let inner = Arc::clone(&self.inner);
        let task_id = id.clone();
        Ok(self
            .inner
            .workers
            .submit(format!("close {}", id.short()), move || {
                inner.close_now(&task_id)
            }))
    }

    /// Close every instance. Failures are logged and skipped.
    ///
    /// Runs on the calling thread so it completes even when the worker pool
    /// is saturated. Returns the number of instances closed.
    pub fn shutdown(&self) -> usize {
        let ids = match self.inner.read() {
            Ok(state) => state.order.clone(),
            Err(e) => {
                error!("Shutdown could not read connections: {}", e);
                return 0;
            }
        };

        let mut closed = 0;
        for id in ids {
            match self.inner.close_now(&id) {
                Ok(()) => closed += 1,
                Err(e) => error!("Failed to close connection {}: {}", id, e),
            }
        }
        if closed > 0 {
            info!("Closed {} connections", closed);
        }
        closed
    }

    // ------------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------------

    /// Make `id` the active connection. Returns `false` if it already was.
    pub fn set_active_connection(&self, id: &ConnectionId) -> VixResult<bool> {
        let event = {
            let mut state = self.inner.write()?;
            state.entry(id)?;
            if state.active.as_ref() == Some(id) {
                return Ok(false);
            }
            let previous = state.active.replace(id.clone());
            if let Some(prev) = &previous {
                if let Some(entry) = state.entries.get_mut(prev) {
                    entry.instance.is_active = false;
                }
            }
            state.entry_mut(id)?.instance.is_active = true;
            Event::ActiveConnectionChanged {
                previous,
                current: Some(id.clone()),
            }
        };
        self.inner.events.publish(event);
        Ok(true)
    }

    /// Make no connection active. Returns `false` if none was.
    pub fn clear_active_connection(&self) -> VixResult<bool> {
        let event = {
            let mut state = self.inner.write()?;
            let Some(previous) = state.active.take() else {
                return Ok(false);
            };
            if let Some(entry) = state.entries.get_mut(&previous) {
                entry.instance.is_active = false;
            }
            Event::ActiveConnectionChanged {
                previous: Some(previous),
                current: None,
            }
        };
        self.inner.events.publish(event);
        Ok(true)
    }

    /// Select a collection on an instance. Returns `false` if nothing changed.
    ///
    /// A name missing from the last listing is still selected and flagged
    /// stale.
    pub fn set_active_collection(
        &self,
        id: &ConnectionId,
        collection: Option<&str>,
    ) -> VixResult<bool> {
        let event = {
            let mut state = self.inner.write()?;
            let instance = &mut state.entry_mut(id)?.instance;
            if instance.active_collection.as_deref() == collection {
                return Ok(false);
            }
            instance.active_collection = collection.map(str::to_string);
            instance.recompute_stale();
            if instance.stale_selection {
                warn!(
                    "Collection '{}' is not known on '{}'",
                    collection.unwrap_or_default(),
                    instance.display_name
                );
            }
            Event::ActiveCollectionChanged {
                id: id.clone(),
                collection: instance.active_collection.clone(),
                stale: instance.stale_selection,
            }
        };
        self.inner.events.publish(event);
        Ok(true)
    }

    /// Change an instance's display name. Returns `false` if unchanged.
    pub fn rename_connection(&self, id: &ConnectionId, name: &str) -> VixResult<bool> {
        let name = name.trim();
        if name.is_empty() {
            return Err(VixError::InvalidArgument(
                "Connection name cannot be empty".to_string(),
            ));
        }
        {
            let mut state = self.inner.write()?;
            let instance = &mut state.entry_mut(id)?.instance;
            if instance.display_name == name {
                return Ok(false);
            }
            instance.display_name = name.to_string();
        }
        self.inner.events.publish(Event::ConnectionRenamed {
            id: id.clone(),
            name: name.to_string(),
        });
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Snapshot of one instance.
    pub fn get(&self, id: &ConnectionId) -> VixResult<ConnectionInstance> {
        Ok(self.inner.read()?.entry(id)?.instance.clone())
    }

    /// Snapshots of every instance, in creation order.
    pub fn list(&self) -> VixResult<Vec<ConnectionInstance>> {
        let state = self.inner.read()?;
        Ok(state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id))
            .map(|e| e.instance.clone())
            .collect())
    }

    /// The active instance, if any.
    pub fn active_connection(&self) -> VixResult<Option<ConnectionInstance>> {
        let state = self.inner.read()?;
        Ok(state
            .active
            .as_ref()
            .and_then(|id| state.entries.get(id))
            .map(|e| e.instance.clone()))
    }

    /// Id of the active instance, if any.
    pub fn active_connection_id(&self) -> VixResult<Option<ConnectionId>> {
        Ok(self.inner.read()?.active.clone())
    }

    /// Current state of an instance.
    pub fn state_of(&self, id: &ConnectionId) -> VixResult<ConnectionState> {
        self.inner.state_of(id)
    }

    /// Number of open instances.
    pub fn connection_count(&self) -> usize {
        self.inner.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    /// Capabilities of the provider behind a connected instance.
    pub fn capabilities(&self, id: &ConnectionId) -> VixResult<ProviderCapabilities> {
        Ok(self.inner.read()?.entry(id)?.capabilities)
    }

    /// The active connection and its selected collection.
    ///
    /// `None` when no connection is active or it has no selection. A stale
    /// selection is returned with a warning.
    pub fn resolve_active_collection(&self) -> VixResult<Option<ActiveTarget>> {
        let state = self.inner.read()?;
        let Some(id) = &state.active else {
            return Ok(None);
        };
        let instance = &state.entry(id)?.instance;
        let Some(collection) = &instance.active_collection else {
            return Ok(None);
        };
        if instance.stale_selection {
            warn!(
                "Active collection '{}' was not found in the last listing of '{}'",
                collection, instance.display_name
            );
        }
        Ok(Some(ActiveTarget {
            connection: id.clone(),
            collection: collection.clone(),
            stale: instance.stale_selection,
        }))
    }

    /// Session handle for a `Connected` instance.
    ///
    /// Connection-lost errors seen through the handle move the instance to
    /// `Error`.
    pub fn session(&self, id: &ConnectionId) -> VixResult<ManagedSession> {
        let state = self.inner.read()?;
        let entry = state.entry(id)?;
        let session = match (&entry.session, entry.instance.state) {
            (Some(session), ConnectionState::Connected) => Arc::clone(session),
            (_, state) => {
                return Err(VixError::NotConnected {
                    id: id.to_string(),
                    state,
                })
            }
        };
        Ok(ManagedSession {
            id: id.clone(),
            provider: entry.instance.provider,
            capabilities: entry.capabilities,
            session,
            manager: Arc::downgrade(&self.inner),
        })
    }
}

// ============================================================================
// Operations
// ============================================================================

impl Inner {
    fn read(&self) -> VixResult<RwLockReadGuard<'_, ManagerState>> {
        self.state.read().map_err(lock_poisoned)
    }

    fn write(&self) -> VixResult<RwLockWriteGuard<'_, ManagerState>> {
        self.state.write().map_err(lock_poisoned)
    }

    fn op_lock(&self, id: &ConnectionId) -> VixResult<Arc<Mutex<()>>> {
        Ok(Arc::clone(&self.read()?.entry(id)?.op_lock))
    }

    fn state_of(&self, id: &ConnectionId) -> VixResult<ConnectionState> {
        Ok(self.read()?.entry(id)?.instance.state)
    }

    /// Move an instance to `to`, rejecting transitions the state machine does
    /// not allow.
    fn transition(
        &self,
        id: &ConnectionId,
        to: ConnectionState,
        error: Option<InstanceError>,
    ) -> VixResult<()> {
        self.transition_if(id, to, error, |_| true).map(|_| ())
    }

    /// Like [`transition`](Self::transition), but only when `precondition`
    /// holds for the entry. The check and the move share one write lock.
    /// Returns whether the instance moved.
    fn transition_if<P>(
        &self,
        id: &ConnectionId,
        to: ConnectionState,
        error: Option<InstanceError>,
        precondition: P,
    ) -> VixResult<bool>
    where
        P: FnOnce(&Entry) -> bool,
    {
        let event = {
            let mut state = self.write()?;
            let entry = state.entry_mut(id)?;
            if !precondition(entry) {
                return Ok(false);
            }
            let instance = &mut entry.instance;
            let from = instance.state;
            if !from.can_transition_to(to) {
                return Err(VixError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    to,
                });
            }
            instance.state = to;
            instance.last_error = match to {
                ConnectionState::Error => error.clone(),
                _ => None,
            };
            match &error {
                Some(err) => warn!("{}: {} -> {} {}", instance.display_name, from, to, err),
                None => info!("{}: {} -> {}", instance.display_name, from, to),
            }
            Event::ConnectionStateChanged {
                id: id.clone(),
                from,
                to,
                error,
            }
        };
        self.events.publish(event);
        Ok(true)
    }

    /// Record `err` and move to `Error`, if the state machine allows it.
    fn fail(&self, id: &ConnectionId, err: &VixError) {
        let state = match self.state_of(id) {
            Ok(state) => state,
            Err(_) => return,
        };
        if state.can_transition_to(ConnectionState::Error) {
            if let Err(e) = self.transition(id, ConnectionState::Error, Some(err.into())) {
                debug!("Could not record failure on {}: {}", id, e);
            }
        }
    }

    fn connect_now(&self, id: &ConnectionId) -> VixResult<()> {
        let op = self.op_lock(id)?;
        let _guard = op.lock().map_err(lock_poisoned)?;

        // A rejected connect must leave a live session untouched.
        let (provider, origin, stale_session) = {
            let mut state = self.write()?;
            let entry = state.entry_mut(id)?;
            let from = entry.instance.state;
            if !from.can_transition_to(ConnectionState::Connecting) {
                return Err(VixError::InvalidTransition {
                    id: id.to_string(),
                    from,
                    to: ConnectionState::Connecting,
                });
            }
            (entry.instance.provider, entry.origin.clone(), entry.session.take())
        };
        if let Some(session) = stale_session {
            session.close();
        }

        self.transition(id, ConnectionState::Connecting, None)?;

        let session = match self.open_session(provider, origin) {
            Ok(opened) => opened,
            Err(e) => {
                self.fail(id, &e);
                return Err(e);
            }
        };
        let (session, capabilities) = session;

        {
            let mut state = self.write()?;
            let entry = state.entry_mut(id)?;
            entry.session = Some(session);
            entry.capabilities = capabilities;
        }
        self.transition(id, ConnectionState::Connected, None)?;

        self.refresh_locked(id).map(|_| ())
    }

    fn open_session(
        &self,
        provider: ProviderKind,
        origin: Origin,
    ) -> VixResult<(Arc<dyn ProviderSession>, ProviderCapabilities)> {
        let (endpoint, credential) = match origin {
            Origin::Profile(profile_id) => {
                let profile = self.profiles.get(&profile_id)?;
                let credential = self.profiles.credential(&profile_id)?;
                (profile.endpoint, credential)
            }
            Origin::AdHoc {
                endpoint,
                credential,
            } => (endpoint, credential),
        };

        let adapter = self.registry.adapter(provider)?;
        adapter.validate_endpoint(&endpoint)?;
        debug!("Connecting to {} ({})", provider, endpoint.summary());
        let session = adapter.connect(&endpoint, credential.as_ref(), &self.connect_options)?;
        Ok((Arc::from(session), adapter.capabilities()))
    }

    /// Refresh while holding the instance's operation lock.
    fn refresh_locked(&self, id: &ConnectionId) -> VixResult<Vec<CollectionDescriptor>> {
        let session = {
            let state = self.read()?;
            let entry = state.entry(id)?;
            match (&entry.session, entry.instance.state) {
                (Some(session), ConnectionState::Connected) => Arc::clone(session),
                (_, state) => {
                    return Err(VixError::NotConnected {
                        id: id.to_string(),
                        state,
                    })
                }
            }
        };

        let collections = match session.list_collections() {
            Ok(collections) => collections,
            Err(e) => {
                let err = VixError::from(e);
                self.fail(id, &err);
                return Err(err);
            }
        };

        let event = {
            let mut state = self.write()?;
            let instance = &mut state.entry_mut(id)?.instance;
            instance.known_collections = collections.clone();
            instance.recompute_stale();
            debug!(
                "{} has {} collections",
                instance.display_name,
                collections.len()
            );
            Event::CollectionsUpdated {
                id: id.clone(),
                collections: instance.collection_names(),
            }
        };
        self.events.publish(event);
        Ok(collections)
    }

    fn disconnect_now(&self, id: &ConnectionId) -> VixResult<()> {
        let op = self.op_lock(id)?;
        let _guard = op.lock().map_err(lock_poisoned)?;

        let (state, session) = {
            let mut manager = self.write()?;
            let entry = manager.entry_mut(id)?;
            (entry.instance.state, entry.session.take())
        };
        if let Some(session) = session {
            session.close();
        }
        if state == ConnectionState::Disconnected {
            return Ok(());
        }
        self.transition(id, ConnectionState::Disconnected, None)
    }

    fn close_now(&self, id: &ConnectionId) -> VixResult<()> {
        let op = self.op_lock(id)?;
        let _guard = op.lock().map_err(lock_poisoned)?;

        let session = self.write()?.entry_mut(id)?.session.take();
        if let Some(session) = session {
            session.close();
        }

        let mut events = Vec::new();
        {
            let mut state = self.write()?;
            let entry = state
                .entries
                .remove(id)
                .ok_or_else(|| VixError::connection_not_found(id))?;
            state.order.retain(|other| other != id);

            let from = entry.instance.state;
            if from != ConnectionState::Disconnected {
                events.push(Event::ConnectionStateChanged {
                    id: id.clone(),
                    from,
                    to: ConnectionState::Disconnected,
                    error: None,
                });
            }
            if state.active.as_ref() == Some(id) {
                state.active = None;
                events.push(Event::ActiveConnectionChanged {
                    previous: Some(id.clone()),
                    current: None,
                });
            }
            events.push(Event::ConnectionClosed { id: id.clone() });
            info!("Closed connection '{}'", entry.instance.display_name);
        }

        for event in events {
            self.events.publish(event);
        }
        Ok(())
    }

    /// A session reported that it is no longer usable.
    ///
    /// Only the session currently installed on a `Connected` instance can
    /// move it to `Error`; a handle to a session that has since been replaced
    /// by a reconnect or taken by a close is ignored. Check and move happen
    /// under one manager write lock, so no operation lock is needed.
    fn mark_lost(&self, id: &ConnectionId, session: &Arc<dyn ProviderSession>, err: &VixError) {
        let current = |entry: &Entry| {
            entry.instance.state == ConnectionState::Connected
                && entry
                    .session
                    .as_ref()
                    .is_some_and(|installed| Arc::ptr_eq(installed, session))
        };
        match self.transition_if(id, ConnectionState::Error, Some(err.into()), current) {
            Ok(true) => {}
            Ok(false) => debug!("Ignoring loss reported by a stale session of {}", id),
            Err(e) => debug!("Could not record lost connection on {}: {}", id, e),
        }
    }
}

// ============================================================================
// ManagedSession
// ============================================================================

/// Session handle that reports lost connections back to the manager.
#[derive(Clone)]
pub struct ManagedSession {
    id: ConnectionId,
    provider: ProviderKind,
    capabilities: ProviderCapabilities,
    session: Arc<dyn ProviderSession>,
    manager: Weak<Inner>,
}

impl fmt::Debug for ManagedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedSession")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .finish()
    }
}

impl ManagedSession {
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    /// Current state of the owning instance; `Disconnected` once it is closed.
    pub fn state(&self) -> ConnectionState {
        self.manager
            .upgrade()
            .and_then(|inner| inner.state_of(&self.id).ok())
            .unwrap_or(ConnectionState::Disconnected)
    }

    fn observe<T, E: Into<VixError>>(&self, result: Result<T, E>) -> VixResult<T> {
        result.map_err(|e| {
            let err: VixError = e.into();
            if err.is_connection_lost() {
                if let Some(inner) = self.manager.upgrade() {
                    inner.mark_lost(&self.id, &self.session, &err);
                }
            }
            err
        })
    }

    pub fn list_collections(&self) -> VixResult<Vec<CollectionDescriptor>> {
        self.observe(self.session.list_collections())
    }

    pub fn describe_collection(&self, name: &str) -> VixResult<CollectionDescriptor> {
        self.observe(self.session.describe_collection(name))
    }

    pub fn read_page(
        &self,
        collection: &str,
        cursor: Option<&Cursor>,
        page_size: usize,
        include_vectors: bool,
    ) -> VixResult<Page> {
        self.observe(
            self.session
                .read_page(collection, cursor, page_size, include_vectors),
        )
    }

    pub fn write_batch(
        &self,
        collection: &str,
        records: &[Record],
        mode: WriteMode,
    ) -> VixResult<BatchOutcome> {
        self.observe(self.session.write_batch(collection, records, mode))
    }

    pub fn create_collection(
        &self,
        name: &str,
        dimension: Option<usize>,
        metric: DistanceMetric,
    ) -> VixResult<CollectionDescriptor> {
        self.observe(self.session.create_collection(name, dimension, metric))
    }

    pub fn delete_items(&self, collection: &str, ids: &[String]) -> VixResult<usize> {
        self.observe(self.session.delete_items(collection, ids))
    }

    pub fn delete_collection(&self, name: &str) -> VixResult<()> {
        self.observe(self.session.delete_collection(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Topic;
    use crate::profiles::NewProfile;
    use crate::vault::CredentialVault;

    fn manager_with(max: usize) -> ConnectionManager {
        let events = EventBus::new();
        let profiles = Arc::new(ConnectionProfileStore::in_memory(CredentialVault::default()));
        let workers = WorkerPool::new(2).unwrap().with_events(events.clone());
        ConnectionManager::new(
            ProviderRegistry::builtin(),
            profiles,
            workers,
            events,
            &ConnectionsConfig {
                max_connections: max,
                ..ConnectionsConfig::default()
            },
        )
    }

    fn memory(name: &str, namespace: &str) -> ConnectionSource {
        ConnectionSource::ad_hoc(
            name,
            ProviderKind::Memory,
            EndpointConfig::new().with("namespace", namespace),
        )
    }

    #[test]
    fn test_connect_lifecycle_and_events() {
        let manager = manager_with(10);
        let (_, rx) = manager.events().subscribe_channel(&[
            Topic::ConnectionStateChanged,
            Topic::CollectionsUpdated,
        ]);

        let id = manager.create_connection(memory("A", "lifecycle")).unwrap();
        assert_eq!(manager.state_of(&id).unwrap(), ConnectionState::Disconnected);

        manager.connect(&id).unwrap().wait().unwrap();
        assert_eq!(manager.state_of(&id).unwrap(), ConnectionState::Connected);

        let events: Vec<Event> = rx.try_iter().collect();
        assert!(matches!(
            events[0],
            Event::ConnectionStateChanged {
                from: ConnectionState::Disconnected,
                to: ConnectionState::Connecting,
                ..
            }
        ));
        assert!(matches!(
            events[1],
            Event::ConnectionStateChanged {
                from: ConnectionState::Connecting,
                to: ConnectionState::Connected,
                ..
            }
        ));
        assert!(matches!(events[2], Event::CollectionsUpdated { .. }));
    }

    #[test]
    fn test_connect_twice_is_rejected() {
        let manager = manager_with(10);
        let id = manager.create_connection(memory("A", "twice")).unwrap();
        manager.connect(&id).unwrap().wait().unwrap();

        let err = manager.connect(&id).unwrap().wait().unwrap_err();
        assert!(matches!(err, VixError::InvalidTransition { .. }));
        assert_eq!(manager.state_of(&id).unwrap(), ConnectionState::Connected);

        let session = manager.session(&id).unwrap();
        assert!(session.list_collections().is_ok());
        assert!(manager.refresh_collections(&id).unwrap().wait().is_ok());
    }

    #[test]
    fn test_connect_failure_lands_in_error() {
        let manager = manager_with(10);
        let id = manager
            .create_connection(ConnectionSource::ad_hoc(
                "Broken",
                ProviderKind::Local,
                EndpointConfig::new(),
            ))
            .unwrap();

        assert!(manager.connect(&id).unwrap().wait().is_err());
        let instance = manager.get(&id).unwrap();
        assert_eq!(instance.state, ConnectionState::Error);
        assert_eq!(instance.last_error.unwrap().category, "endpoint");
    }

    #[test]
    fn test_cap_is_enforced() {
        let manager = manager_with(2);
        manager.create_connection(memory("A", "cap")).unwrap();
        manager.create_connection(memory("B", "cap")).unwrap();

        let err = manager.create_connection(memory("C", "cap")).unwrap_err();
        assert!(matches!(err, VixError::ResourceExhausted { limit: 2 }));
        assert_eq!(manager.connection_count(), 2);
    }

    #[test]
    fn test_single_active_connection() {
        let manager = manager_with(10);
        let a = manager.create_connection(memory("A", "active")).unwrap();
        let b = manager.create_connection(memory("B", "active")).unwrap();
        let (_, rx) = manager
            .events()
            .subscribe_channel(&[Topic::ActiveConnectionChanged]);

        assert!(manager.set_active_connection(&a).unwrap());
        assert!(!manager.set_active_connection(&a).unwrap());
        assert!(manager.set_active_connection(&b).unwrap());

        let active: Vec<bool> = manager.list().unwrap().iter().map(|i| i.is_active).collect();
        assert_eq!(active, vec![false, true]);

        let events: Vec<Event> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            Event::ActiveConnectionChanged {
                previous: Some(a.clone()),
                current: Some(b.clone()),
            }
        );

        assert!(manager.clear_active_connection().unwrap());
        assert!(!manager.clear_active_connection().unwrap());
        assert!(manager.active_connection().unwrap().is_none());
    }

    #[test]
    fn test_unknown_collection_is_kept_as_stale() {
        let manager = manager_with(10);
        let id = manager.create_connection(memory("A", "stale")).unwrap();
        manager.connect(&id).unwrap().wait().unwrap();
        manager.set_active_connection(&id).unwrap();

        assert!(manager.set_active_collection(&id, Some("ghost")).unwrap());
        assert!(!manager.set_active_collection(&id, Some("ghost")).unwrap());

        let instance = manager.get(&id).unwrap();
        assert_eq!(instance.active_collection.as_deref(), Some("ghost"));
        assert!(instance.stale_selection);

        let target = manager.resolve_active_collection().unwrap().unwrap();
        assert!(target.stale);
        assert_eq!(target.collection, "ghost");

        // Creating it and refreshing clears the flag but keeps the selection.
        let session = manager.session(&id).unwrap();
        session
            .create_collection("ghost", None, DistanceMetric::Cosine)
            .unwrap();
        manager.refresh_collections(&id).unwrap().wait().unwrap();
        let instance = manager.get(&id).unwrap();
        assert_eq!(instance.active_collection.as_deref(), Some("ghost"));
        assert!(!instance.stale_selection);
    }

    #[test]
    fn test_close_active_clears_pointer() {
        let manager = manager_with(10);
        let a = manager.create_connection(memory("A", "close")).unwrap();
        let b = manager.create_connection(memory("B", "close")).unwrap();
        manager.connect(&a).unwrap().wait().unwrap();
        manager.set_active_connection(&a).unwrap();

        manager.close_connection(&a).unwrap().wait().unwrap();
        assert!(manager.active_connection_id().unwrap().is_none());
        assert!(matches!(
            manager.get(&a),
            Err(VixError::ConnectionNotFound { .. })
        ));
        assert_eq!(manager.list().unwrap()[0].id, b);
    }

    #[test]
    fn test_disconnect_keeps_instance_and_allows_reconnect() {
        let manager = manager_with(10);
        let id = manager.create_connection(memory("A", "reconnect")).unwrap();
        manager.connect(&id).unwrap().wait().unwrap();

        manager.disconnect(&id).unwrap().wait().unwrap();
        assert_eq!(manager.state_of(&id).unwrap(), ConnectionState::Disconnected);
        assert!(matches!(
            manager.session(&id),
            Err(VixError::NotConnected { .. })
        ));

        manager.connect(&id).unwrap().wait().unwrap();
        assert_eq!(manager.state_of(&id).unwrap(), ConnectionState::Connected);
    }

    #[test]
    fn test_profile_source_uses_profile_name() {
        let manager = manager_with(10);
        let profile = manager
            .inner
            .profiles
            .create(NewProfile::new(
                "Saved",
                ProviderKind::Memory,
                EndpointConfig::new().with("namespace", "profile-src"),
            ))
            .unwrap();

        let id = manager
            .create_connection(ConnectionSource::Profile(profile.id.clone()))
            .unwrap();
        let instance = manager.get(&id).unwrap();
        assert_eq!(instance.display_name, "Saved");
        assert_eq!(instance.profile_id, Some(profile.id));
        manager.connect(&id).unwrap().wait().unwrap();
    }

    #[test]
    fn test_rename_and_shutdown() {
        let manager = manager_with(10);
        let id = manager.create_connection(memory("A", "shutdown")).unwrap();
        manager.create_connection(memory("B", "shutdown")).unwrap();
        manager.connect(&id).unwrap().wait().unwrap();

        assert!(manager.rename_connection(&id, "Renamed").unwrap());
        assert_eq!(manager.get(&id).unwrap().breadcrumb(), "Renamed");

        assert_eq!(manager.shutdown(), 2);
        assert_eq!(manager.connection_count(), 0);
    }
}
