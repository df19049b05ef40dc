//! Shared test utilities for vix-core integration tests.
//!
//! [`FakeAdapter`] is a scriptable in-process provider. Each endpoint
//! `namespace` gets its own [`FakeStore`], which counts calls and can inject
//! per-item write failures, connection loss and connect errors.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use vix_core::{AppConfig, CredentialVault, VixEngine};
use vix_db::{
    BatchOutcome, CollectionDescriptor, ConnectError, ConnectOptions, Credential, Cursor,
    DistanceMetric, EndpointConfig, ItemFailure, Page, ProviderAdapter, ProviderCapabilities,
    ProviderKind, ProviderRegistry, ProviderSession, QueryError, Record, WriteError, WriteMode,
};

// ============================================================================
// FakeStore
// ============================================================================

#[derive(Default)]
pub struct FakeStore {
    collections: Mutex<BTreeMap<String, (CollectionDescriptor, Vec<Record>)>>,
    pub connects: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub read_sizes: Mutex<Vec<usize>>,
    pub write_calls: AtomicUsize,
    pub closes: AtomicUsize,
    /// Ids rejected by `write_batch` as per-item failures.
    pub reject_ids: Mutex<HashSet<String>>,
    /// 1-based `read_page` call that reports a lost connection.
    pub lose_connection_on_read: Mutex<Option<usize>>,
    /// Error returned by the next connects.
    pub connect_error: Mutex<Option<ConnectError>>,
    pub fail_listing: AtomicBool,
    /// API key passed to the last connect.
    pub last_api_key: Mutex<Option<String>>,
}

impl FakeStore {
    /// Add a collection of `count` items with 3-dimensional vectors.
    pub fn seed(&self, name: &str, count: usize) {
        let items = (0..count)
            .map(|i| {
                Record::new(format!("item-{:04}", i))
                    .with_vector(vec![i as f32, 1.0, 0.5])
                    .with_document(format!("doc {}", i))
            })
            .collect();
        let descriptor = CollectionDescriptor::new(name).with_dimension(3);
        self.collections
            .lock()
            .unwrap()
            .insert(name.to_string(), (descriptor, items));
    }

    pub fn add_empty(&self, name: &str, dimension: Option<usize>) {
        let mut descriptor = CollectionDescriptor::new(name);
        descriptor.dimension = dimension;
        self.collections
            .lock()
            .unwrap()
            .insert(name.to_string(), (descriptor, Vec::new()));
    }

    pub fn ids(&self, name: &str) -> Vec<String> {
        self.collections
            .lock()
            .unwrap()
            .get(name)
            .map(|(_, items)| items.iter().map(|r| r.id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.ids(name).len()
    }

    pub fn reads(&self) -> Vec<usize> {
        self.read_sizes.lock().unwrap().clone()
    }

    pub fn reject(&self, ids: &[&str]) {
        let mut reject = self.reject_ids.lock().unwrap();
        reject.extend(ids.iter().map(|s| s.to_string()));
    }
}

// ============================================================================
// FakeAdapter
// ============================================================================

pub struct FakeAdapter {
    kind: ProviderKind,
    capabilities: ProviderCapabilities,
    stores: Mutex<HashMap<String, Arc<FakeStore>>>,
}

impl FakeAdapter {
    /// A fake registered under the `memory` kind with every capability.
    pub fn new() -> Self {
        Self {
            kind: ProviderKind::Memory,
            capabilities: ProviderCapabilities {
                insert_only_writes: true,
                create_collection: true,
                delete: true,
                namespaces: true,
                persistent: false,
            },
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: ProviderCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// The store behind `namespace`, created on first use.
    pub fn store(&self, namespace: &str) -> Arc<FakeStore> {
        let mut stores = self.stores.lock().unwrap();
        Arc::clone(stores.entry(namespace.to_string()).or_default())
    }
}

impl ProviderAdapter for FakeAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn capabilities(&self) -> ProviderCapabilities {
        self.capabilities
    }

    fn validate_endpoint(&self, endpoint: &EndpointConfig) -> Result<(), ConnectError> {
        endpoint.require_str("namespace").map(|_| ())
    }

    fn connect(
        &self,
        endpoint: &EndpointConfig,
        credential: Option<&Credential>,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn ProviderSession>, ConnectError> {
        let store = self.store(endpoint.require_str("namespace")?);
        store.connects.fetch_add(1, Ordering::SeqCst);
        *store.last_api_key.lock().unwrap() = credential.and_then(|c| c.api_key.clone());
        if let Some(err) = store.connect_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(Box::new(FakeSession {
            kind: self.kind,
            store,
            reads: AtomicUsize::new(0),
        }))
    }
}

struct FakeSession {
    kind: ProviderKind,
    store: Arc<FakeStore>,
    reads: AtomicUsize,
}

impl ProviderSession for FakeSession {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn list_collections(&self) -> Result<Vec<CollectionDescriptor>, QueryError> {
        self.store.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.store.fail_listing.load(Ordering::SeqCst) {
            return Err(QueryError::connection_lost("listing failed"));
        }
        let collections = self.store.collections.lock().unwrap();
        Ok(collections
            .values()
            .map(|(d, items)| d.clone().with_count(items.len() as u64))
            .collect())
    }

    fn describe_collection(&self, name: &str) -> Result<CollectionDescriptor, QueryError> {
        let collections = self.store.collections.lock().unwrap();
        collections
            .get(name)
            .map(|(d, items)| d.clone().with_count(items.len() as u64))
            .ok_or_else(|| QueryError::not_found(name))
    }

    fn read_page(
        &self,
        collection: &str,
        cursor: Option<&Cursor>,
        page_size: usize,
        include_vectors: bool,
    ) -> Result<Page, QueryError> {
        let call = self.reads.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.store.lose_connection_on_read.lock().unwrap() == Some(call) {
            return Err(QueryError::connection_lost("peer reset"));
        }

        let collections = self.store.collections.lock().unwrap();
        let (_, items) = collections
            .get(collection)
            .ok_or_else(|| QueryError::not_found(collection))?;
        let offset = cursor.and_then(Cursor::as_offset).unwrap_or(0);
        let page: Vec<Record> = items
            .iter()
            .skip(offset)
            .take(page_size)
            .map(|r| if include_vectors { r.clone() } else { r.without_vector() })
            .collect();
        self.store.read_sizes.lock().unwrap().push(page.len());
        Ok(Page::from_offset(page, offset, items.len()))
    }

    fn write_batch(
        &self,
        collection: &str,
        records: &[Record],
        mode: WriteMode,
    ) -> Result<BatchOutcome, WriteError> {
        self.store.write_calls.fetch_add(1, Ordering::SeqCst);
        let reject = self.store.reject_ids.lock().unwrap().clone();
        let mut collections = self.store.collections.lock().unwrap();
        let (_, items) = collections
            .get_mut(collection)
            .ok_or_else(|| WriteError::not_found(collection))?;

        let mut outcome = BatchOutcome::default();
        for record in records {
            if reject.contains(&record.id) {
                outcome
                    .failures
                    .push(ItemFailure::new(&record.id, "rejected by fake"));
                continue;
            }
            match items.iter().position(|r| r.id == record.id) {
                Some(_) if mode == WriteMode::InsertOnly => outcome
                    .failures
                    .push(ItemFailure::new(&record.id, "id already exists")),
                Some(pos) => {
                    items[pos] = record.clone();
                    outcome.written += 1;
                }
                None => {
                    items.push(record.clone());
                    outcome.written += 1;
                }
            }
        }
        Ok(outcome)
    }

    fn create_collection(
        &self,
        name: &str,
        dimension: Option<usize>,
        metric: DistanceMetric,
    ) -> Result<CollectionDescriptor, WriteError> {
        let mut descriptor = CollectionDescriptor::new(name).with_metric(metric);
        descriptor.dimension = dimension;
        self.store
            .collections
            .lock()
            .unwrap()
            .insert(name.to_string(), (descriptor.clone(), Vec::new()));
        Ok(descriptor)
    }

    fn delete_collection(&self, name: &str) -> Result<(), WriteError> {
        self.store
            .collections
            .lock()
            .unwrap()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| WriteError::not_found(name))
    }

    fn close(&self) {
        self.store.closes.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Engine helpers
// ============================================================================

/// An engine whose `memory` provider is `fake`, with in-memory profiles and vault.
pub fn engine_with(fake: Arc<FakeAdapter>, config: AppConfig) -> VixEngine {
    VixEngine::with_components(
        config,
        ProviderRegistry::builtin().with_adapter(fake),
        CredentialVault::in_memory("test"),
        None,
    )
    .unwrap()
}

/// Endpoint selecting a fake store.
pub fn fake_endpoint(namespace: &str) -> EndpointConfig {
    EndpointConfig::new().with("namespace", namespace)
}
