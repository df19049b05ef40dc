//! Local persistent provider.
//!
//! A store is a directory; each collection is a subdirectory holding
//! `collection.meta.json` and `records.jsonl`:
//!
//! ```text
//! <path>/
//!   docs/
//!     collection.meta.json
//!     records.jsonl
//! ```
//!
//! Collections are loaded into memory when first seen and written back in full
//! after every mutating call.

use super::memory::StoredCollection;
use crate::error::{ConnectError, QueryError, WriteError};
use crate::provider::config::{ConnectOptions, EndpointConfig, ProviderCapabilities};
use crate::provider::traits::{ProviderAdapter, ProviderSession};
use crate::provider::types::{
    BatchOutcome, CollectionDescriptor, Credential, Cursor, DistanceMetric, Page, ProviderKind,
    Record, WriteMode,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::{debug, trace, warn};

/// Filename for collection metadata.
pub const COLLECTION_META_FILENAME: &str = "collection.meta.json";

/// Filename for the JSONL data file.
pub const RECORDS_FILENAME: &str = "records.jsonl";

// ============================================================================
// CollectionMeta
// ============================================================================

/// Metadata stored next to a collection's records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionMeta {
    /// Collection name.
    pub name: String,

    /// Vector dimension, fixed by the first vector written.
    #[serde(default)]
    pub dimension: Option<usize>,

    /// Distance metric.
    #[serde(default)]
    pub metric: DistanceMetric,

    /// Number of records (approximate, may be stale).
    #[serde(default)]
    pub count: usize,

    /// Schema version for future migrations.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Creation timestamp (ISO 8601).
    #[serde(default)]
    pub created_at: Option<String>,

    /// Last update timestamp (ISO 8601).
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn default_schema_version() -> u32 {
    1
}

impl CollectionMeta {
    /// Create new metadata.
    pub fn new(name: impl Into<String>, dimension: Option<usize>, metric: DistanceMetric) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            name: name.into(),
            dimension,
            metric,
            count: 0,
            schema_version: 1,
            created_at: Some(now.clone()),
            updated_at: Some(now),
        }
    }

    /// Update the count and timestamp.
    pub fn update_count(&mut self, count: usize) {
        self.count = count;
        self.updated_at = Some(chrono::Utc::now().to_rfc3339());
    }
}

/// Read collection metadata from a collection directory.
pub fn read_collection_meta(dir: &Path) -> Result<CollectionMeta, QueryError> {
    let meta_path = dir.join(COLLECTION_META_FILENAME);
    let content = fs::read_to_string(&meta_path)
        .map_err(|e| QueryError::backend(format!("Failed to read {:?}: {}", meta_path, e)))?;
    serde_json::from_str(&content)
        .map_err(|e| QueryError::backend(format!("Invalid metadata {:?}: {}", meta_path, e)))
}

/// Write collection metadata into a collection directory.
pub fn write_collection_meta(dir: &Path, meta: &CollectionMeta) -> Result<(), WriteError> {
    let meta_path = dir.join(COLLECTION_META_FILENAME);
    let content = serde_json::to_string_pretty(meta)
        .map_err(|e| WriteError::backend(format!("Failed to serialize metadata: {}", e)))?;
    fs::write(&meta_path, content)
        .map_err(|e| WriteError::backend(format!("Failed to write {:?}: {}", meta_path, e)))
}

fn valid_collection_name(name: &str) -> bool {
    !name.trim().is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name != ".."
}

// ============================================================================
// LocalAdapter
// ============================================================================

/// Adapter for the `local` provider. Endpoint field: `path`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalAdapter;

impl ProviderAdapter for LocalAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            insert_only_writes: true,
            create_collection: true,
            delete: true,
            namespaces: false,
            persistent: true,
        }
    }

    fn validate_endpoint(&self, endpoint: &EndpointConfig) -> Result<(), ConnectError> {
        let path = endpoint.require_str("path")?;
        let path = Path::new(path);
        if path.exists() && !path.is_dir() {
            return Err(ConnectError::malformed(format!(
                "'{}' exists and is not a directory",
                path.display()
            )));
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
        let root = endpoint
            .get_path("path")
            .ok_or_else(|| ConnectError::malformed("missing required field 'path'"))?;

        debug!("Opening local store at {:?}", root);
        fs::create_dir_all(&root).map_err(|e| {
            ConnectError::network(format!("cannot open '{}': {}", root.display(), e))
        })?;

        let session = LocalSession {
            root,
            collections: RwLock::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        };
        session
            .scan()
            .map_err(|e| ConnectError::network(e.to_string()))?;
        Ok(Box::new(session))
    }
}

// ============================================================================
// LocalSession
// ============================================================================

struct LocalCollection {
    meta: CollectionMeta,
    data: StoredCollection,
}

struct LocalSession {
    root: PathBuf,
    collections: RwLock<BTreeMap<String, LocalCollection>>,
    closed: AtomicBool,
}

impl LocalSession {
    fn ensure_open(&self) -> Result<(), QueryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueryError::connection_lost("session closed"));
        }
        if !self.root.is_dir() {
            return Err(QueryError::connection_lost(format!(
                "store directory '{}' is gone",
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Pick up collection directories not loaded yet and drop removed ones.
    fn scan(&self) -> Result<(), QueryError> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            QueryError::connection_lost(format!("cannot read '{}': {}", self.root.display(), e))
        })?;

        let mut collections = self
            .collections
            .write()
            .map_err(|e| QueryError::backend(format!("Failed to acquire write lock: {}", e)))?;

        let mut seen = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            if !dir.join(COLLECTION_META_FILENAME).is_file() {
                continue;
            }
            let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(String::from) else {
                continue;
            };
            seen.push(name.clone());
            if collections.contains_key(&name) {
                continue;
            }
            match load_collection(&dir) {
                Ok(loaded) => {
                    collections.insert(name, loaded);
                }
                Err(e) => warn!("Skipping unreadable collection {:?}: {}", dir, e),
            }
        }
        collections.retain(|name, _| seen.contains(name));
        Ok(())
    }

    fn save(&self, name: &str, collection: &mut LocalCollection) -> Result<(), WriteError> {
        let dir = self.root.join(name);
        let data_path = dir.join(RECORDS_FILENAME);
        debug!("Saving records to {:?}", data_path);

        let io_err = |e: std::io::Error| WriteError::backend(format!("{:?}: {}", data_path, e));
        let mut file = File::create(&data_path).map_err(io_err)?;
        for record in collection.data.items.values() {
            let line = serde_json::to_string(record)
                .map_err(|e| WriteError::backend(format!("Failed to serialize record: {}", e)))?;
            writeln!(file, "{}", line).map_err(io_err)?;
        }

        collection.meta.dimension = collection.data.dimension;
        collection.meta.update_count(collection.data.items.len());
        write_collection_meta(&dir, &collection.meta)?;

        debug!("Saved {} records", collection.data.items.len());
        Ok(())
    }
}

fn load_collection(dir: &Path) -> Result<LocalCollection, QueryError> {
    let meta = read_collection_meta(dir)?;
    let mut data = StoredCollection::new(meta.dimension, meta.metric);

    let data_path = dir.join(RECORDS_FILENAME);
    if data_path.exists() {
        debug!("Loading records from {:?}", data_path);
        let file = File::open(&data_path)
            .map_err(|e| QueryError::backend(format!("{:?}: {}", data_path, e)))?;
        let reader = BufReader::new(file);

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| QueryError::backend(format!("{:?}: {}", data_path, e)))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(&line) {
                Ok(record) => {
                    data.items.insert(record.id.clone(), record);
                }
                Err(e) => {
                    debug!("Skipping invalid line {}: {}", line_num + 1, e);
                }
            }
        }
        debug!("Loaded {} records", data.items.len());
    }

    Ok(LocalCollection { meta, data })
}

impl ProviderSession for LocalSession {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn list_collections(&self) -> Result<Vec<CollectionDescriptor>, QueryError> {
        self.ensure_open()?;
        self.scan()?;
        let collections = self
            .collections
            .read()
            .map_err(|e| QueryError::backend(format!("Failed to acquire read lock: {}", e)))?;
        Ok(collections
            .iter()
            .map(|(name, c)| c.data.descriptor(name))
            .collect())
    }

    fn describe_collection(&self, name: &str) -> Result<CollectionDescriptor, QueryError> {
        self.ensure_open()?;
        self.scan()?;
        let collections = self
            .collections
            .read()
            .map_err(|e| QueryError::backend(format!("Failed to acquire read lock: {}", e)))?;
        collections
            .get(name)
            .map(|c| c.data.descriptor(name))
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
        trace!("local read_page {} cursor={:?}", collection, cursor);
        if cursor.is_none() {
            self.scan()?;
        }
        let collections = self
            .collections
            .read()
            .map_err(|e| QueryError::backend(format!("Failed to acquire read lock: {}", e)))?;
        collections
            .get(collection)
            .ok_or_else(|| QueryError::not_found(collection))?
            .data
            .page(cursor, page_size, include_vectors)
    }

    fn write_batch(
        &self,
        collection: &str,
        records: &[Record],
        mode: WriteMode,
    ) -> Result<BatchOutcome, WriteError> {
        self.ensure_open()?;
        debug!("Writing {} records to '{}'", records.len(), collection);
        let mut collections = self
            .collections
            .write()
            .map_err(|e| WriteError::backend(format!("Failed to acquire write lock: {}", e)))?;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| WriteError::not_found(collection))?;

        let outcome = target.data.apply(records, mode);
        if outcome.written > 0 {
            self.save(collection, target)?;
        }
        Ok(outcome)
    }

    fn create_collection(
        &self,
        name: &str,
        dimension: Option<usize>,
        metric: DistanceMetric,
    ) -> Result<CollectionDescriptor, WriteError> {
        self.ensure_open()?;
        if !valid_collection_name(name) {
            return Err(WriteError::rejected(format!(
                "invalid collection name '{}'",
                name
            )));
        }

        let dir = self.root.join(name);
        if dir.join(COLLECTION_META_FILENAME).exists() {
            return Err(WriteError::rejected(format!(
                "collection '{}' already exists",
                name
            )));
        }

        fs::create_dir_all(&dir)
            .map_err(|e| WriteError::backend(format!("Failed to create {:?}: {}", dir, e)))?;
        let meta = CollectionMeta::new(name, dimension, metric);
        write_collection_meta(&dir, &meta)?;

        let created = LocalCollection {
            meta,
            data: StoredCollection::new(dimension, metric),
        };
        let descriptor = created.data.descriptor(name);
        self.collections
            .write()
            .map_err(|e| WriteError::backend(format!("Failed to acquire write lock: {}", e)))?
            .insert(name.to_string(), created);

        debug!("Created local collection '{}' at {:?}", name, dir);
        Ok(descriptor)
    }

    fn delete_items(&self, collection: &str, ids: &[String]) -> Result<usize, WriteError> {
        self.ensure_open()?;
        let mut collections = self
            .collections
            .write()
            .map_err(|e| WriteError::backend(format!("Failed to acquire write lock: {}", e)))?;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| WriteError::not_found(collection))?;

        let removed = target.data.remove(ids);
        if removed > 0 {
            self.save(collection, target)?;
        }
        Ok(removed)
    }

    fn delete_collection(&self, name: &str) -> Result<(), WriteError> {
        self.ensure_open()?;
        let mut collections = self
            .collections
            .write()
            .map_err(|e| WriteError::backend(format!("Failed to acquire write lock: {}", e)))?;
        if collections.remove(name).is_none() {
            return Err(WriteError::not_found(name));
        }
        let dir = self.root.join(name);
        fs::remove_dir_all(&dir)
            .map_err(|e| WriteError::backend(format!("Failed to remove {:?}: {}", dir, e)))?;
        debug!("Deleted local collection '{}'", name);
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closed local store at {:?}", self.root);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn connect(path: &Path) -> Box<dyn ProviderSession> {
        let endpoint = EndpointConfig::new().with("path", path.to_string_lossy().to_string());
        LocalAdapter
            .connect(&endpoint, None, &ConnectOptions::default())
            .expect("local connect")
    }

    #[test]
    fn test_missing_path_is_malformed() {
        let err = LocalAdapter
            .validate_endpoint(&EndpointConfig::new())
            .unwrap_err();
        assert_eq!(err.category(), "endpoint");
    }

    #[test]
    fn test_records_persist_across_sessions() {
        let temp = TempDir::new().unwrap();
        let first = connect(temp.path());
        first
            .create_collection("docs", Some(2), DistanceMetric::L2)
            .unwrap();
        let batch = vec![
            Record::new("a")
                .with_vector(vec![0.1, 0.2])
                .with_document("alpha"),
            Record::new("b")
                .with_vector(vec![0.3, 0.4])
                .with_field("lang", serde_json::json!("en")),
        ];
        let outcome = first.write_batch("docs", &batch, WriteMode::Upsert).unwrap();
        assert_eq!(outcome.written, 2);
        first.close();

        let second = connect(temp.path());
        let descriptor = second.describe_collection("docs").unwrap();
        assert_eq!(descriptor.item_count, Some(2));
        assert_eq!(descriptor.dimension, Some(2));
        assert_eq!(descriptor.metric, DistanceMetric::L2);

        let page = second.read_page("docs", None, 10, true).unwrap();
        assert!(page.end_of_data);
        assert_eq!(page.items, batch);
    }

    #[test]
    fn test_invalid_lines_are_skipped() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("broken");
        fs::create_dir_all(&dir).unwrap();
        write_collection_meta(&dir, &CollectionMeta::new("broken", None, DistanceMetric::Cosine))
            .unwrap();
        fs::write(
            dir.join(RECORDS_FILENAME),
            "{\"id\":\"ok\"}\nnot json\n\n{\"id\":\"ok2\"}\n",
        )
        .unwrap();

        let session = connect(temp.path());
        assert_eq!(
            session.describe_collection("broken").unwrap().item_count,
            Some(2)
        );
    }

    #[test]
    fn test_new_collection_directories_are_discovered() {
        let temp = TempDir::new().unwrap();
        let watcher = connect(temp.path());
        assert!(watcher.list_collections().unwrap().is_empty());

        let writer = connect(temp.path());
        writer
            .create_collection("late", None, DistanceMetric::Cosine)
            .unwrap();

        let names: Vec<String> = watcher
            .list_collections()
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["late".to_string()]);
    }

    #[test]
    fn test_delete_collection_removes_directory() {
        let temp = TempDir::new().unwrap();
        let session = connect(temp.path());
        session
            .create_collection("gone", None, DistanceMetric::Cosine)
            .unwrap();
        session.delete_collection("gone").unwrap();
        assert!(!temp.path().join("gone").exists());
        assert_eq!(
            session.delete_collection("gone").unwrap_err(),
            WriteError::not_found("gone")
        );
    }

    #[test]
    fn test_rejects_path_like_names() {
        let temp = TempDir::new().unwrap();
        let session = connect(temp.path());
        assert!(session
            .create_collection("../escape", None, DistanceMetric::Cosine)
            .is_err());
    }

    #[test]
    fn test_removed_store_reports_connection_lost() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("store");
        let session = connect(&root);
        fs::remove_dir_all(&root).unwrap();
        assert!(session.list_collections().unwrap_err().is_connection_lost());
    }
}
