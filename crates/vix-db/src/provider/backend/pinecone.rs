//! Pinecone provider over the REST API.
//!
//! Collections map to indexes. Control-plane calls go to `controlUrl`
//! (default `https://api.pinecone.io`); data-plane calls go to the host the
//! control plane reports for each index.
//!
//! Endpoint fields: `namespace` (optional), `controlUrl`, `cloud` and `region`
//! (used when creating serverless indexes). Credential: `api_key` (required).

use super::http::{encode_segment, JsonClient};
use crate::error::{ConnectError, QueryError, WriteError};
use crate::provider::config::{ConnectOptions, EndpointConfig, ProviderCapabilities};
use crate::provider::traits::{ProviderAdapter, ProviderSession};
use crate::provider::types::{
    BatchOutcome, CollectionDescriptor, Credential, Cursor, DistanceMetric, ItemFailure, Page,
    ProviderKind, Record, WriteMode,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::debug;

/// Default control-plane URL.
pub const DEFAULT_CONTROL_URL: &str = "https://api.pinecone.io";

/// REST API version header value.
pub const API_VERSION: &str = "2024-07";

const DOCUMENT_FIELD: &str = "document";

/// Adapter for the `pinecone` provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct PineconeAdapter;

impl ProviderAdapter for PineconeAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Pinecone
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            insert_only_writes: false,
            create_collection: true,
            delete: true,
            namespaces: true,
            persistent: true,
        }
    }

    fn validate_endpoint(&self, endpoint: &EndpointConfig) -> Result<(), ConnectError> {
        if let Some(url) = endpoint.get_str("controlUrl") {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(ConnectError::malformed(format!(
                    "controlUrl '{}' must start with https://",
                    url
                )));
            }
        }
        Ok(())
    }

    fn connect(
        &self,
        endpoint: &EndpointConfig,
        credential: Option<&Credential>,
        options: &ConnectOptions,
    ) -> Result<Box<dyn ProviderSession>, ConnectError> {
        self.validate_endpoint(endpoint)?;
        let api_key = credential
            .and_then(|c| c.api_key.as_ref())
            .ok_or_else(|| ConnectError::auth("Pinecone requires an API key"))?;

        let control_url = endpoint
            .get_str("controlUrl")
            .unwrap_or(DEFAULT_CONTROL_URL);
        let headers = [
            ("api-key", api_key.clone()),
            ("x-pinecone-api-version", API_VERSION.to_string()),
        ];
        let control = JsonClient::new(control_url, &headers, options.timeout)?;

        debug!("Connecting to Pinecone control plane at {}", control_url);
        control
            .get("/indexes")
            .map_err(|e| e.into_connect(options.timeout))?;

        Ok(Box::new(PineconeSession {
            control,
            namespace: endpoint.get_str("namespace").unwrap_or_default().to_string(),
            cloud: endpoint.get_str("cloud").unwrap_or("aws").to_string(),
            region: endpoint.get_str("region").unwrap_or("us-east-1").to_string(),
            hosts: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

struct PineconeSession {
    control: JsonClient,
    namespace: String,
    cloud: String,
    region: String,
    hosts: Mutex<HashMap<String, JsonClient>>,
    closed: AtomicBool,
}

impl PineconeSession {
    fn ensure_open(&self) -> Result<(), QueryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueryError::connection_lost("session closed"));
        }
        Ok(())
    }

    fn index_path(name: &str) -> String {
        format!("/indexes/{}", encode_segment(name))
    }

    /// Data-plane client for an index, resolved once and cached.
    fn data_plane(&self, index: &str) -> Result<JsonClient, QueryError> {
        {
            let hosts = self
                .hosts
                .lock()
                .map_err(|e| QueryError::backend(format!("Failed to acquire lock: {}", e)))?;
            if let Some(client) = hosts.get(index) {
                return Ok(client.clone());
            }
        }

        let body = self
            .control
            .get(&Self::index_path(index))
            .map_err(|e| e.into_query(index))?;
        let host = body["host"]
            .as_str()
            .ok_or_else(|| QueryError::backend(format!("index '{}' reports no host", index)))?;
        let url = if host.starts_with("http") {
            host.to_string()
        } else {
            format!("https://{}", host)
        };

        let client = self.control.rebase(&url);
        self.hosts
            .lock()
            .map_err(|e| QueryError::backend(format!("Failed to acquire lock: {}", e)))?
            .insert(index.to_string(), client.clone());
        Ok(client)
    }

    fn stats(&self, index: &str) -> Result<Option<u64>, QueryError> {
        let client = self.data_plane(index)?;
        let body = client
            .post("/describe_index_stats", &json!({}))
            .map_err(|e| e.into_query(index))?;
        let count = if self.namespace.is_empty() {
            body["totalVectorCount"].as_u64()
        } else {
            body["namespaces"][self.namespace.as_str()]["vectorCount"]
                .as_u64()
                .or(Some(0))
        };
        Ok(count)
    }
}

impl ProviderSession for PineconeSession {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Pinecone
    }

    fn list_collections(&self) -> Result<Vec<CollectionDescriptor>, QueryError> {
        self.ensure_open()?;
        let body = self
            .control
            .get("/indexes")
            .map_err(|e| e.into_query(""))?;
        let mut descriptors: Vec<CollectionDescriptor> = body["indexes"]
            .as_array()
            .map(|list| list.iter().filter_map(parse_index).collect())
            .unwrap_or_default();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(descriptors)
    }

    fn describe_collection(&self, name: &str) -> Result<CollectionDescriptor, QueryError> {
        self.ensure_open()?;
        let body = self
            .control
            .get(&Self::index_path(name))
            .map_err(|e| e.into_query(name))?;
        let mut descriptor = parse_index(&body).ok_or_else(|| QueryError::not_found(name))?;
        descriptor.item_count = self.stats(name)?;
        Ok(descriptor)
    }

    fn read_page(
        &self,
        collection: &str,
        cursor: Option<&Cursor>,
        page_size: usize,
        include_vectors: bool,
    ) -> Result<Page, QueryError> {
        self.ensure_open()?;
        let client = self.data_plane(collection)?;

        let mut query = vec![
            ("namespace", self.namespace.clone()),
            ("limit", page_size.clamp(1, 100).to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("paginationToken", cursor.as_str().to_string()));
        }
        let listing = client
            .get_query("/vectors/list", &query)
            .map_err(|e| e.into_query(collection))?;

        let ids: Vec<String> = listing["vectors"]
            .as_array()
            .map(|v| {
                v.iter()
                    .filter_map(|e| e["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let mut items = Vec::with_capacity(ids.len());
        if !ids.is_empty() {
            let mut fetch_query: Vec<(&str, String)> =
                ids.iter().map(|id| ("ids", id.clone())).collect();
            fetch_query.push(("namespace", self.namespace.clone()));
            let fetched = client
                .get_query("/vectors/fetch", &fetch_query)
                .map_err(|e| e.into_query(collection))?;

            // Keep listing order; fetch returns an unordered map.
            for id in &ids {
                if let Some(vector) = fetched["vectors"].get(id.as_str()) {
                    let mut record = vector_to_record(id, vector);
                    if !include_vectors {
                        record.vector = None;
                    }
                    items.push(record);
                }
            }
        }

        match listing["pagination"]["next"].as_str() {
            Some(token) if !token.is_empty() => Ok(Page::more(items, Cursor::new(token))),
            _ => Ok(Page::last(items)),
        }
    }

    fn write_batch(
        &self,
        collection: &str,
        records: &[Record],
        mode: WriteMode,
    ) -> Result<BatchOutcome, WriteError> {
        self.ensure_open()?;
        if mode == WriteMode::InsertOnly {
            return Err(WriteError::Unsupported {
                operation: "insert-only write",
            });
        }
        let client = self.data_plane(collection)?;

        let mut outcome = BatchOutcome::default();
        let mut vectors = Vec::with_capacity(records.len());
        for record in records {
            match record_to_vector(record) {
                Ok(v) => vectors.push(v),
                Err(reason) => outcome.failures.push(ItemFailure::new(&record.id, reason)),
            }
        }
        if vectors.is_empty() {
            return Ok(outcome);
        }

        let body = client
            .post(
                "/vectors/upsert",
                &json!({ "vectors": vectors, "namespace": self.namespace }),
            )
            .map_err(|e| e.into_write(collection))?;
        outcome.written = body["upsertedCount"]
            .as_u64()
            .map(|n| n as usize)
            .unwrap_or(vectors.len());
        Ok(outcome)
    }

    fn create_collection(
        &self,
        name: &str,
        dimension: Option<usize>,
        metric: DistanceMetric,
    ) -> Result<CollectionDescriptor, WriteError> {
        self.ensure_open()?;
        let dimension = dimension
            .ok_or_else(|| WriteError::rejected("Pinecone indexes need a vector dimension"))?;
        let metric_name = match metric {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dotproduct",
            DistanceMetric::L2 => "euclidean",
            DistanceMetric::Manhattan => {
                return Err(WriteError::rejected(
                    "Pinecone does not support the manhattan metric",
                ))
            }
        };
        self.control
            .post(
                "/indexes",
                &json!({
                    "name": name,
                    "dimension": dimension,
                    "metric": metric_name,
                    "spec": { "serverless": { "cloud": self.cloud, "region": self.region } },
                }),
            )
            .map_err(|e| e.into_write(name))?;
        debug!("Created Pinecone index '{}'", name);
        Ok(CollectionDescriptor::new(name)
            .with_count(0)
            .with_dimension(dimension)
            .with_metric(metric))
    }

    fn delete_items(&self, collection: &str, ids: &[String]) -> Result<usize, WriteError> {
        self.ensure_open()?;
        let client = self.data_plane(collection)?;
        client
            .post(
                "/vectors/delete",
                &json!({ "ids": ids, "namespace": self.namespace }),
            )
            .map_err(|e| e.into_write(collection))?;
        Ok(ids.len())
    }

    fn delete_collection(&self, name: &str) -> Result<(), WriteError> {
        self.ensure_open()?;
        self.control
            .delete(&Self::index_path(name))
            .map_err(|e| e.into_write(name))?;
        if let Ok(mut hosts) = self.hosts.lock() {
            hosts.remove(name);
        }
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            if let Ok(mut hosts) = self.hosts.lock() {
                hosts.clear();
            }
            debug!("Closed Pinecone session");
        }
    }
}

// ============================================================================
// Wire conversion
// ============================================================================

fn parse_index(index: &Value) -> Option<CollectionDescriptor> {
    let name = index["name"].as_str()?;
    let mut descriptor = CollectionDescriptor::new(name);
    descriptor.dimension = index["dimension"].as_u64().map(|d| d as usize);
    if let Some(metric) = index["metric"].as_str() {
        descriptor.metric = DistanceMetric::parse_lenient(metric);
    }
    Some(descriptor)
}

fn record_to_vector(record: &Record) -> Result<Value, String> {
    let values = record
        .vector
        .as_ref()
        .ok_or_else(|| "Pinecone vectors need values".to_string())?;
    let mut metadata = serde_json::Map::new();
    for (key, value) in &record.metadata {
        match value {
            Value::Null => {}
            Value::Object(_) => {
                return Err(format!("metadata field '{}' must not be an object", key));
            }
            other => {
                metadata.insert(key.clone(), other.clone());
            }
        }
    }
    if let Some(document) = &record.document {
        metadata.insert(DOCUMENT_FIELD.to_string(), Value::from(document.as_str()));
    }

    let mut vector = json!({ "id": record.id, "values": values });
    if !metadata.is_empty() {
        vector["metadata"] = Value::Object(metadata);
    }
    Ok(vector)
}

fn vector_to_record(id: &str, vector: &Value) -> Record {
    let mut record = Record::new(id);
    record.vector = vector["values"].as_array().map(|values| {
        values
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect()
    });
    if let Some(metadata) = vector["metadata"].as_object() {
        let mut metadata = metadata.clone();
        if let Some(Value::String(document)) = metadata.remove(DOCUMENT_FIELD) {
            record.document = Some(document);
        }
        record.metadata = metadata;
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_without_api_key_is_auth_error() {
        match PineconeAdapter.connect(&EndpointConfig::new(), None, &ConnectOptions::default()) {
            Err(err) => assert_eq!(err.category(), "auth"),
            Ok(_) => panic!("connect without a key must fail"),
        }
    }

    #[test]
    fn test_parse_index() {
        let index = json!({ "name": "docs", "dimension": 1536, "metric": "dotproduct", "host": "h" });
        let descriptor = parse_index(&index).unwrap();
        assert_eq!(descriptor.name, "docs");
        assert_eq!(descriptor.dimension, Some(1536));
        assert_eq!(descriptor.metric, DistanceMetric::Dot);
        assert!(parse_index(&json!({})).is_none());
    }

    #[test]
    fn test_vector_conversion() {
        let record = Record::new("a")
            .with_vector(vec![0.5, 0.25])
            .with_document("text")
            .with_field("year", json!(2024));
        let wire = record_to_vector(&record).unwrap();
        assert_eq!(wire["metadata"]["document"], json!("text"));
        assert_eq!(vector_to_record("a", &wire), record);
    }

    #[test]
    fn test_nested_metadata_is_rejected() {
        let record = Record::new("a")
            .with_vector(vec![1.0])
            .with_field("nested", json!({ "x": 1 }));
        assert!(record_to_vector(&record).is_err());
        assert!(record_to_vector(&Record::new("b")).is_err());
    }

    #[test]
    fn test_invalid_control_url() {
        let endpoint = EndpointConfig::new().with("controlUrl", "api.pinecone.io");
        assert!(PineconeAdapter.validate_endpoint(&endpoint).is_err());
    }
}
