//! Qdrant provider over the REST API.
//!
//! Endpoint fields: `url`, or `host` + `port` (default 6333) + `useTls`.
//! Credential: optional `api_key`, sent as the `api-key` header.
//!
//! Pagination uses the scroll API; the cursor is the JSON-encoded
//! `next_page_offset`. The record document is stored in the payload under
//! `document`, every other payload field is metadata.

use super::http::{base_url, encode_segment, JsonClient};
use crate::error::{ConnectError, QueryError, WriteError};
use crate::provider::config::{ConnectOptions, EndpointConfig, ProviderCapabilities};
use crate::provider::traits::{ProviderAdapter, ProviderSession};
use crate::provider::types::{
    BatchOutcome, CollectionDescriptor, Credential, Cursor, DistanceMetric, ItemFailure, Page,
    ProviderKind, Record, WriteMode,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Default Qdrant REST port.
pub const DEFAULT_PORT: u64 = 6333;

const DOCUMENT_FIELD: &str = "document";

/// Adapter for the `qdrant` provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct QdrantAdapter;

impl ProviderAdapter for QdrantAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Qdrant
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            insert_only_writes: false,
            create_collection: true,
            delete: true,
            namespaces: false,
            persistent: true,
        }
    }

    fn validate_endpoint(&self, endpoint: &EndpointConfig) -> Result<(), ConnectError> {
        base_url(endpoint, DEFAULT_PORT).map(|_| ())
    }

    fn connect(
        &self,
        endpoint: &EndpointConfig,
        credential: Option<&Credential>,
        options: &ConnectOptions,
    ) -> Result<Box<dyn ProviderSession>, ConnectError> {
        let url = base_url(endpoint, DEFAULT_PORT)?;
        let mut headers = Vec::new();
        if let Some(key) = credential.and_then(|c| c.api_key.as_ref()) {
            headers.push(("api-key", key.clone()));
        }

        let client = JsonClient::new(&url, &headers, options.timeout)?;
        debug!("Connecting to Qdrant at {}", url);
        client
            .get("/collections")
            .map_err(|e| e.into_connect(options.timeout))?;

        Ok(Box::new(QdrantSession {
            client,
            closed: AtomicBool::new(false),
        }))
    }
}

struct QdrantSession {
    client: JsonClient,
    closed: AtomicBool,
}

impl QdrantSession {
    fn ensure_open(&self) -> Result<(), QueryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueryError::connection_lost("session closed"));
        }
        Ok(())
    }

    fn collection_path(name: &str) -> String {
        format!("/collections/{}", encode_segment(name))
    }
}

impl ProviderSession for QdrantSession {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Qdrant
    }

    fn list_collections(&self) -> Result<Vec<CollectionDescriptor>, QueryError> {
        self.ensure_open()?;
        let body = self
            .client
            .get("/collections")
            .map_err(|e| e.into_query(""))?;
        let names: Vec<String> = body["result"]["collections"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(|c| c["name"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let mut descriptors = Vec::with_capacity(names.len());
        for name in names {
            match self.describe_collection(&name) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) if e.is_connection_lost() => return Err(e),
                Err(e) => {
                    warn!("Could not describe Qdrant collection '{}': {}", name, e);
                    descriptors.push(CollectionDescriptor::new(name));
                }
            }
        }
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(descriptors)
    }

    fn describe_collection(&self, name: &str) -> Result<CollectionDescriptor, QueryError> {
        self.ensure_open()?;
        let body = self
            .client
            .get(&Self::collection_path(name))
            .map_err(|e| e.into_query(name))?;
        Ok(parse_collection_info(name, &body["result"]))
    }

    fn read_page(
        &self,
        collection: &str,
        cursor: Option<&Cursor>,
        page_size: usize,
        include_vectors: bool,
    ) -> Result<Page, QueryError> {
        self.ensure_open()?;
        let mut request = json!({
            "limit": page_size.max(1),
            "with_payload": true,
            "with_vector": include_vectors,
        });
        if let Some(cursor) = cursor {
            let offset: Value = serde_json::from_str(cursor.as_str())
                .map_err(|_| QueryError::backend(format!("invalid cursor '{}'", cursor)))?;
            request["offset"] = offset;
        }

        let body = self
            .client
            .post(
                &format!("{}/points/scroll", Self::collection_path(collection)),
                &request,
            )
            .map_err(|e| e.into_query(collection))?;

        let items: Vec<Record> = body["result"]["points"]
            .as_array()
            .map(|points| points.iter().filter_map(point_to_record).collect())
            .unwrap_or_default();

        match &body["result"]["next_page_offset"] {
            Value::Null => Ok(Page::last(items)),
            next => Ok(Page::more(items, Cursor::new(next.to_string()))),
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

        let mut outcome = BatchOutcome::default();
        let mut points = Vec::with_capacity(records.len());
        for record in records {
            match record_to_point(record) {
                Ok(point) => points.push(point),
                Err(reason) => outcome.failures.push(ItemFailure::new(&record.id, reason)),
            }
        }
        if points.is_empty() {
            return Ok(outcome);
        }

        let count = points.len();
        self.client
            .put(
                &format!("{}/points?wait=true", Self::collection_path(collection)),
                &json!({ "points": points }),
            )
            .map_err(|e| e.into_write(collection))?;
        outcome.written = count;
        Ok(outcome)
    }

    fn create_collection(
        &self,
        name: &str,
        dimension: Option<usize>,
        metric: DistanceMetric,
    ) -> Result<CollectionDescriptor, WriteError> {
        self.ensure_open()?;
        let size = dimension
            .ok_or_else(|| WriteError::rejected("Qdrant collections need a vector dimension"))?;
        self.client
            .put(
                &Self::collection_path(name),
                &json!({ "vectors": { "size": size, "distance": distance_name(metric) } }),
            )
            .map_err(|e| e.into_write(name))?;
        debug!("Created Qdrant collection '{}'", name);
        Ok(CollectionDescriptor::new(name)
            .with_count(0)
            .with_dimension(size)
            .with_metric(metric))
    }

    fn delete_items(&self, collection: &str, ids: &[String]) -> Result<usize, WriteError> {
        self.ensure_open()?;
        let points: Vec<Value> = ids.iter().map(|id| point_id(id)).collect();
        self.client
            .post(
                &format!("{}/points/delete?wait=true", Self::collection_path(collection)),
                &json!({ "points": points }),
            )
            .map_err(|e| e.into_write(collection))?;
        // Qdrant does not report how many of the ids existed.
        Ok(ids.len())
    }

    fn delete_collection(&self, name: &str) -> Result<(), WriteError> {
        self.ensure_open()?;
        self.client
            .delete(&Self::collection_path(name))
            .map_err(|e| e.into_write(name))?;
        Ok(())
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!("Closed Qdrant session to {}", self.client.base_url());
        }
    }
}

// ============================================================================
// Wire conversion
// ============================================================================

fn parse_collection_info(name: &str, result: &Value) -> CollectionDescriptor {
    let mut descriptor = CollectionDescriptor::new(name);
    if let Some(count) = result["points_count"].as_u64() {
        descriptor.item_count = Some(count);
    }

    // Unnamed vectors: {"size", "distance"}; named vectors: {"<name>": {...}}.
    let vectors = &result["config"]["params"]["vectors"];
    let params = if vectors.get("size").is_some() {
        Some(vectors)
    } else {
        vectors.as_object().and_then(|m| m.values().next())
    };
    if let Some(params) = params {
        descriptor.dimension = params["size"].as_u64().map(|s| s as usize);
        if let Some(distance) = params["distance"].as_str() {
            descriptor.metric = DistanceMetric::parse_lenient(distance);
        }
    }
    descriptor
}

fn distance_name(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::Cosine => "Cosine",
        DistanceMetric::Dot => "Dot",
        DistanceMetric::L2 => "Euclid",
        DistanceMetric::Manhattan => "Manhattan",
    }
}

/// Qdrant ids are unsigned integers or UUID strings.
fn point_id(id: &str) -> Value {
    match id.parse::<u64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(id),
    }
}

fn is_uuid_like(id: &str) -> bool {
    let parts: Vec<&str> = id.split('-').collect();
    let lengths = [8, 4, 4, 4, 12];
    parts.len() == lengths.len()
        && parts
            .iter()
            .zip(lengths)
            .all(|(p, n)| p.len() == n && p.chars().all(|c| c.is_ascii_hexdigit()))
}

fn record_to_point(record: &Record) -> Result<Value, String> {
    let id = point_id(&record.id);
    if id.is_string() && !is_uuid_like(&record.id) {
        return Err("Qdrant ids must be unsigned integers or UUIDs".to_string());
    }
    let vector = record
        .vector
        .as_ref()
        .ok_or_else(|| "Qdrant points need a vector".to_string())?;

    let mut payload = record.metadata.clone();
    if let Some(document) = &record.document {
        payload.insert(DOCUMENT_FIELD.to_string(), Value::from(document.as_str()));
    }
    Ok(json!({ "id": id, "vector": vector, "payload": payload }))
}

fn point_to_record(point: &Value) -> Option<Record> {
    let id = match &point["id"] {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return None,
    };
    let mut record = Record::new(id);

    if let Some(payload) = point["payload"].as_object() {
        let mut metadata = payload.clone();
        if let Some(Value::String(document)) = metadata.remove(DOCUMENT_FIELD) {
            record.document = Some(document);
        }
        record.metadata = metadata;
    }

    record.vector = match &point["vector"] {
        Value::Array(values) => Some(
            values
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect(),
        ),
        Value::Object(named) => named.values().next().and_then(|v| {
            v.as_array()
                .map(|a| a.iter().filter_map(|x| x.as_f64().map(|f| f as f32)).collect())
        }),
        _ => None,
    };
    Some(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_info_unnamed_vectors() {
        let result = json!({
            "points_count": 42,
            "config": { "params": { "vectors": { "size": 384, "distance": "Euclid" } } }
        });
        let descriptor = parse_collection_info("docs", &result);
        assert_eq!(descriptor.item_count, Some(42));
        assert_eq!(descriptor.dimension, Some(384));
        assert_eq!(descriptor.metric, DistanceMetric::L2);
    }

    #[test]
    fn test_collection_info_named_vectors() {
        let result = json!({
            "config": { "params": { "vectors": { "text": { "size": 8, "distance": "Dot" } } } }
        });
        let descriptor = parse_collection_info("docs", &result);
        assert_eq!(descriptor.item_count, None);
        assert_eq!(descriptor.dimension, Some(8));
        assert_eq!(descriptor.metric, DistanceMetric::Dot);
    }

    #[test]
    fn test_point_round_trip_keeps_document_separate() {
        let record = Record::new("7")
            .with_vector(vec![1.0, 2.0])
            .with_document("hello")
            .with_field("lang", json!("en"));
        let point = record_to_point(&record).unwrap();
        assert_eq!(point["id"], json!(7));
        assert_eq!(point["payload"]["document"], json!("hello"));

        let back = point_to_record(&point).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_invalid_ids_are_item_failures() {
        let bad = Record::new("doc-1").with_vector(vec![1.0]);
        assert!(record_to_point(&bad).is_err());

        let uuid = Record::new("550e8400-e29b-41d4-a716-446655440000").with_vector(vec![1.0]);
        assert!(record_to_point(&uuid).is_ok());

        let no_vector = Record::new("1");
        assert!(record_to_point(&no_vector).is_err());
    }

    #[test]
    fn test_connect_refused_is_network_error() {
        // Port 9 (discard) on loopback is closed in test environments.
        let endpoint = EndpointConfig::new().with("url", "http://127.0.0.1:9");
        let options = ConnectOptions::default().with_timeout(std::time::Duration::from_secs(2));
        match QdrantAdapter.connect(&endpoint, None, &options) {
            Err(err) => assert!(matches!(err.category(), "network" | "timeout")),
            Ok(_) => panic!("nothing should be listening on port 9"),
        }
    }
}
