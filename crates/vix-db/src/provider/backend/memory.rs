//! Ephemeral in-process provider.
//!
//! Collections live in memory and are shared by every session that connects to
//! the same namespace through the same adapter. Useful for scratch work and
//! as a migration target in tests.

use crate::error::{ConnectError, QueryError, WriteError};
use crate::provider::config::{
    ConnectOptions, EndpointConfig, ProviderCapabilities, DEFAULT_NAMESPACE,
};
use crate::provider::traits::{ProviderAdapter, ProviderSession};
use crate::provider::types::{
    BatchOutcome, CollectionDescriptor, Credential, Cursor, DistanceMetric, ItemFailure, Page,
    ProviderKind, Record, WriteMode,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, trace};

// ============================================================================
// StoredCollection
// ============================================================================

/// Id-ordered item store shared by the memory and local providers.
#[derive(Debug, Clone, Default)]
pub(crate) struct StoredCollection {
    pub dimension: Option<usize>,
    pub metric: DistanceMetric,
    pub items: BTreeMap<String, Record>,
}

impl StoredCollection {
    pub fn new(dimension: Option<usize>, metric: DistanceMetric) -> Self {
        Self {
            dimension,
            metric,
            items: BTreeMap::new(),
        }
    }

    pub fn descriptor(&self, name: &str) -> CollectionDescriptor {
        let mut descriptor = CollectionDescriptor::new(name)
            .with_count(self.items.len() as u64)
            .with_metric(self.metric);
        descriptor.dimension = self.dimension;
        descriptor
    }

    /// Offset-paginated read in id order.
    pub fn page(
        &self,
        cursor: Option<&Cursor>,
        page_size: usize,
        include_vectors: bool,
    ) -> Result<Page, QueryError> {
        let offset = match cursor {
            None => 0,
            Some(c) => c
                .as_offset()
                .ok_or_else(|| QueryError::backend(format!("invalid cursor '{}'", c)))?,
        };
        let items: Vec<Record> = self
            .items
            .values()
            .skip(offset)
            .take(page_size.max(1))
            .map(|r| {
                if include_vectors {
                    r.clone()
                } else {
                    r.without_vector()
                }
            })
            .collect();
        Ok(Page::from_offset(items, offset, self.items.len()))
    }

    /// Apply a batch, collecting per-item rejections.
    pub fn apply(&mut self, records: &[Record], mode: WriteMode) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for record in records {
            if record.id.trim().is_empty() {
                outcome
                    .failures
                    .push(ItemFailure::new(&record.id, "empty id"));
                continue;
            }

            if let Some(vector) = &record.vector {
                match self.dimension {
                    Some(dim) if dim != vector.len() => {
                        outcome.failures.push(ItemFailure::new(
                            &record.id,
                            format!("dimension mismatch: expected {}, got {}", dim, vector.len()),
                        ));
                        continue;
                    }
                    None => self.dimension = Some(vector.len()),
                    _ => {}
                }
            }

            if mode == WriteMode::InsertOnly && self.items.contains_key(&record.id) {
                outcome
                    .failures
                    .push(ItemFailure::new(&record.id, "id already exists"));
                continue;
            }

            self.items.insert(record.id.clone(), record.clone());
            outcome.written += 1;
        }

        outcome
    }

    pub fn remove(&mut self, ids: &[String]) -> usize {
        ids.iter()
            .filter(|id| self.items.remove(id.as_str()).is_some())
            .count()
    }
}

type Namespace = Arc<RwLock<BTreeMap<String, StoredCollection>>>;

fn lock_error<E: std::fmt::Display>(e: E) -> QueryError {
    QueryError::backend(format!("Failed to acquire lock: {}", e))
}

// ============================================================================
// MemoryAdapter
// ============================================================================

/// Adapter for the `memory` provider.
///
/// Each adapter instance owns its own set of namespaces.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    namespaces: Mutex<HashMap<String, Namespace>>,
}

impl MemoryAdapter {
    /// Create an adapter with no namespaces.
    pub fn new() -> Self {
        Self::default()
    }

    fn namespace(&self, name: &str) -> Result<Namespace, ConnectError> {
        let mut namespaces = self
            .namespaces
            .lock()
            .map_err(|e| ConnectError::unavailable("memory", format!("lock poisoned: {}", e)))?;
        Ok(namespaces
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(BTreeMap::new())))
            .clone())
    }
}

impl ProviderAdapter for MemoryAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Memory
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            insert_only_writes: true,
            create_collection: true,
            delete: true,
            namespaces: true,
            persistent: false,
        }
    }

    fn validate_endpoint(&self, endpoint: &EndpointConfig) -> Result<(), ConnectError> {
        if let Some(value) = endpoint.get("namespace") {
            if !value.is_string() {
                return Err(ConnectError::malformed("'namespace' must be a string"));
            }
        }
        Ok(())
    }

    fn connect(
        &self,
        endpoint: &EndpointConfig,
        _credential: Option<&Credential>,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn ProviderSession>, ConnectError> {
        self.validate_endpoint(endpoint)?;
        let name = endpoint.get_str("namespace").unwrap_or(DEFAULT_NAMESPACE);
        debug!("Opening memory session on namespace '{}'", name);

        Ok(Box::new(MemorySession {
            namespace: self.namespace(name)?,
            closed: AtomicBool::new(false),
        }))
    }
}

// ============================================================================
// MemorySession
// ============================================================================

struct MemorySession {
    namespace: Namespace,
    closed: AtomicBool,
}

impl MemorySession {
    fn ensure_open(&self) -> Result<(), QueryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueryError::connection_lost("session closed"));
        }
        Ok(())
    }
}

impl ProviderSession for MemorySession {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Memory
    }

    fn list_collections(&self) -> Result<Vec<CollectionDescriptor>, QueryError> {
        self.ensure_open()?;
        let collections = self.namespace.read().map_err(lock_error)?;
        Ok(collections
            .iter()
            .map(|(name, c)| c.descriptor(name))
            .collect())
    }

    fn describe_collection(&self, name: &str) -> Result<CollectionDescriptor, QueryError> {
        self.ensure_open()?;
        let collections = self.namespace.read().map_err(lock_error)?;
        collections
            .get(name)
            .map(|c| c.descriptor(name))
            .ok_or_else(|| QueryError::not_found(name))
    }

    fn read_page(
        &self,
        collection: &str,
        cursor: Option<&Cursor>,
        page_size: usize,
        include_vectors: bool,
    ) -> Result<Page, QueryError> {
        self.ensure_open()?;
        trace!("memory read_page {} cursor={:?}", collection, cursor);
        let collections = self.namespace.read().map_err(lock_error)?;
        collections
            .get(collection)
            .ok_or_else(|| QueryError::not_found(collection))?
            .page(cursor, page_size, include_vectors)
    }

    fn write_batch(
        &self,
        collection: &str,
        records: &[Record],
        mode: WriteMode,
    ) -> Result<BatchOutcome, WriteError> {
        self.ensure_open()?;
        let mut collections = self.namespace.write().map_err(lock_error)?;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| WriteError::not_found(collection))?;
        Ok(target.apply(records, mode))
    }

    fn create_collection(
        &self,
        name: &str,
        dimension: Option<usize>,
        metric: DistanceMetric,
    ) -> Result<CollectionDescriptor, WriteError> {
        self.ensure_open()?;
        if name.trim().is_empty() {
            return Err(WriteError::rejected("collection name must not be empty"));
        }
        let mut collections = self.namespace.write().map_err(lock_error)?;
        if collections.contains_key(name) {
            return Err(WriteError::rejected(format!(
                "collection '{}' already exists",
                name
            )));
        }
        let created = StoredCollection::new(dimension, metric);
        let descriptor = created.descriptor(name);
        collections.insert(name.to_string(), created);
        debug!("Created memory collection '{}'", name);
        Ok(descriptor)
    }

    fn delete_items(&self, collection: &str, ids: &[String]) -> Result<usize, WriteError> {
        self.ensure_open()?;
        let mut collections = self.namespace.write().map_err(lock_error)?;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| WriteError::not_found(collection))?;
        Ok(target.remove(ids))
    }

    fn delete_collection(&self, name: &str) -> Result<(), WriteError> {
        self.ensure_open()?;
        let mut collections = self.namespace.write().map_err(lock_error)?;
        collections
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| WriteError::not_found(name))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn session(adapter: &MemoryAdapter, namespace: &str) -> Box<dyn ProviderSession> {
        let endpoint = EndpointConfig::new().with("namespace", namespace);
        adapter
            .connect(&endpoint, None, &ConnectOptions::default())
            .expect("memory connect never fails")
    }

    fn records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(format!("id-{:04}", i)).with_vector(vec![i as f32, 1.0]))
            .collect()
    }

    #[test]
    fn test_sessions_share_namespace() {
        let adapter = MemoryAdapter::new();
        let a = session(&adapter, "shared");
        let b = session(&adapter, "shared");
        let other = session(&adapter, "other");

        a.create_collection("docs", Some(2), DistanceMetric::Cosine)
            .unwrap();
        a.write_batch("docs", &records(3), WriteMode::Upsert).unwrap();

        assert_eq!(b.describe_collection("docs").unwrap().item_count, Some(3));
        assert!(other.list_collections().unwrap().is_empty());
    }

    #[test]
    fn test_paging_covers_every_item_once() {
        let adapter = MemoryAdapter::new();
        let s = session(&adapter, "paging");
        s.create_collection("c", None, DistanceMetric::Dot).unwrap();
        s.write_batch("c", &records(250), WriteMode::Upsert).unwrap();

        let mut cursor = None;
        let mut sizes = Vec::new();
        loop {
            let page = s.read_page("c", cursor.as_ref(), 100, false).unwrap();
            assert!(page.items.iter().all(|r| r.vector.is_none()));
            sizes.push(page.items.len());
            if page.end_of_data {
                break;
            }
            cursor = page.next_cursor;
        }
        assert_eq!(sizes, vec![100, 100, 50]);
    }

    #[test]
    fn test_insert_only_reports_existing_ids() {
        let adapter = MemoryAdapter::new();
        let s = session(&adapter, "dups");
        s.create_collection("c", Some(2), DistanceMetric::Cosine)
            .unwrap();
        s.write_batch("c", &records(2), WriteMode::Upsert).unwrap();

        let outcome = s
            .write_batch("c", &records(4), WriteMode::InsertOnly)
            .unwrap();
        assert_eq!(outcome.written, 2);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failures[0].id, "id-0000");
    }

    #[test]
    fn test_dimension_mismatch_is_item_failure() {
        let adapter = MemoryAdapter::new();
        let s = session(&adapter, "dims");
        s.create_collection("c", Some(3), DistanceMetric::Cosine)
            .unwrap();
        let outcome = s.write_batch("c", &records(2), WriteMode::Upsert).unwrap();
        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.failures.len(), 2);
    }

    #[test]
    fn test_closed_session_reports_connection_lost() {
        let adapter = MemoryAdapter::new();
        let s = session(&adapter, "closing");
        s.close();
        s.close();
        assert!(s.list_collections().unwrap_err().is_connection_lost());
        assert!(s
            .write_batch("c", &records(1), WriteMode::Upsert)
            .unwrap_err()
            .is_connection_lost());
    }

    #[test]
    fn test_missing_collection() {
        let adapter = MemoryAdapter::new();
        let s = session(&adapter, "missing");
        assert_eq!(
            s.read_page("nope", None, 10, true).unwrap_err(),
            QueryError::not_found("nope")
        );
        assert_eq!(
            s.write_batch("nope", &records(1), WriteMode::Upsert)
                .unwrap_err(),
            WriteError::not_found("nope")
        );
    }
}
