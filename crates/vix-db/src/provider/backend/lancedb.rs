//! LanceDB provider.
//!
//! A store is a LanceDB directory; collections are tables. Tables created here
//! use the columns `id` (utf8), `vector` (fixed-size list of f32), `document`
//! (utf8) and `metadata` (JSON text). Tables written by other tools are read
//! best-effort: integer ids are stringified and a `text` column stands in for
//! `document`.
//!
//! Endpoint field: `path`.

use crate::error::{ConnectError, QueryError, WriteError};
use crate::provider::config::{ConnectOptions, EndpointConfig, ProviderCapabilities};
use crate::provider::traits::{ProviderAdapter, ProviderSession};
use crate::provider::types::{
    BatchOutcome, CollectionDescriptor, Credential, Cursor, DistanceMetric, ItemFailure, Page,
    ProviderKind, Record, WriteMode,
};
use arrow_array::{
    Array, ArrayRef, FixedSizeListArray, Float32Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, Table};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, trace};

/// Adapter for the `lancedb` provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct LanceDbAdapter;

impl ProviderAdapter for LanceDbAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LanceDb
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            insert_only_writes: true,
            create_collection: true,
            delete: false,
            namespaces: false,
            persistent: true,
        }
    }

    fn validate_endpoint(&self, endpoint: &EndpointConfig) -> Result<(), ConnectError> {
        endpoint.require_str("path").map(|_| ())
    }

    fn connect(
        &self,
        endpoint: &EndpointConfig,
        _credential: Option<&Credential>,
        _options: &ConnectOptions,
    ) -> Result<Box<dyn ProviderSession>, ConnectError> {
        let path = endpoint.require_str("path")?.to_string();
        debug!("Opening LanceDB store at {}", path);

        let runtime = Runtime::new()
            .map_err(|e| ConnectError::unavailable("lancedb", format!("no runtime: {}", e)))?;

        let connection = runtime
            .block_on(async { connect(&path).execute().await })
            .map_err(|e| ConnectError::network(format!("Failed to connect: {}", e)))?;

        Ok(Box::new(LanceDbSession {
            runtime,
            connection,
            closed: AtomicBool::new(false),
        }))
    }
}

struct LanceDbSession {
    runtime: Runtime,
    connection: Connection,
    closed: AtomicBool,
}

fn escape_sql_string(s: &str) -> String {
    s.replace('\'', "''")
}

fn id_filter(ids: &[&str]) -> String {
    let list = ids
        .iter()
        .map(|id| format!("'{}'", escape_sql_string(id)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("id IN ({})", list)
}

impl LanceDbSession {
    fn ensure_open(&self) -> Result<(), QueryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueryError::connection_lost("session closed"));
        }
        Ok(())
    }

    fn table_names(&self) -> Result<Vec<String>, QueryError> {
        self.runtime
            .block_on(async { self.connection.table_names().execute().await })
            .map_err(|e| QueryError::connection_lost(format!("Failed to list tables: {}", e)))
    }

    fn open_table(&self, name: &str) -> Result<Table, QueryError> {
        if !self.table_names()?.iter().any(|t| t == name) {
            return Err(QueryError::not_found(name));
        }
        self.runtime
            .block_on(async { self.connection.open_table(name).execute().await })
            .map_err(|e| QueryError::backend(format!("Failed to open table: {}", e)))
    }

    fn schema_of(&self, table: &Table) -> Result<SchemaRef, QueryError> {
        self.runtime
            .block_on(async { table.schema().await })
            .map_err(|e| QueryError::backend(format!("Failed to read schema: {}", e)))
    }

    fn existing_ids(&self, table: &Table, ids: &[&str]) -> Result<HashSet<String>, QueryError> {
        let filter = id_filter(ids);
        let batches: Vec<RecordBatch> = self.runtime.block_on(async {
            let stream = table
                .query()
                .only_if(filter)
                .execute()
                .await
                .map_err(|e| QueryError::backend(format!("Query failed: {}", e)))?;
            stream
                .try_collect()
                .await
                .map_err(|e| QueryError::backend(format!("Failed to collect results: {}", e)))
        })?;
        Ok(batches
            .iter()
            .flat_map(|b| records_from_batch(b, false))
            .map(|r| r.id)
            .collect())
    }
}

fn vector_dimension(schema: &Schema) -> Option<usize> {
    match schema.field_with_name("vector").ok()?.data_type() {
        DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
        _ => None,
    }
}

fn table_schema(dimension: usize) -> Schema {
    Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimension as i32,
            ),
            true,
        ),
        Field::new("document", DataType::Utf8, true),
        Field::new("metadata", DataType::Utf8, true),
    ])
}

/// Convert records to a batch, splitting off items that cannot be stored.
fn records_to_batch(
    records: &[&Record],
    dimension: usize,
) -> Result<RecordBatch, WriteError> {
    let schema = table_schema(dimension);

    let ids: ArrayRef = Arc::new(StringArray::from(
        records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
    ));

    let mut flat = Vec::with_capacity(records.len() * dimension);
    for record in records {
        match &record.vector {
            Some(v) => flat.extend_from_slice(v),
            None => flat.extend(std::iter::repeat(0.0).take(dimension)),
        }
    }
    let nulls: Vec<bool> = records.iter().map(|r| r.vector.is_some()).collect();
    let item_field = Arc::new(Field::new("item", DataType::Float32, true));
    let vectors: ArrayRef = Arc::new(
        FixedSizeListArray::try_new(
            item_field,
            dimension as i32,
            Arc::new(Float32Array::from(flat)),
            Some(nulls.into()),
        )
        .map_err(|e| WriteError::backend(format!("Failed to create vector array: {}", e)))?,
    );

    let documents: ArrayRef = Arc::new(StringArray::from(
        records
            .iter()
            .map(|r| r.document.as_deref())
            .collect::<Vec<_>>(),
    ));
    let metadata: ArrayRef = Arc::new(StringArray::from(
        records
            .iter()
            .map(|r| serde_json::to_string(&r.metadata).ok())
            .collect::<Vec<_>>(),
    ));

    RecordBatch::try_new(Arc::new(schema), vec![ids, vectors, documents, metadata])
        .map_err(|e| WriteError::backend(format!("Failed to create batch: {}", e)))
}

fn records_from_batch(batch: &RecordBatch, include_vectors: bool) -> Vec<Record> {
    let string_col = |name: &str| {
        batch
            .column_by_name(name)
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
    };
    let int_ids = batch
        .column_by_name("id")
        .and_then(|c| c.as_any().downcast_ref::<Int64Array>());
    let str_ids = string_col("id");
    let documents = string_col("document").or_else(|| string_col("text"));
    let metadata = string_col("metadata");
    let vectors = batch
        .column_by_name("vector")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>());

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let id = match (str_ids, int_ids) {
            (Some(ids), _) => ids.value(i).to_string(),
            (None, Some(ids)) => ids.value(i).to_string(),
            _ => i.to_string(),
        };
        let mut record = Record::new(id);

        if let Some(docs) = documents {
            if docs.is_valid(i) {
                record.document = Some(docs.value(i).to_string());
            }
        }
        if let Some(meta) = metadata {
            if meta.is_valid(i) {
                if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(meta.value(i)) {
                    record.metadata = map;
                }
            }
        }
        if include_vectors {
            if let Some(list) = vectors {
                if list.is_valid(i) {
                    let values = list.value(i);
                    if let Some(floats) = values.as_any().downcast_ref::<Float32Array>() {
                        record.vector = Some(floats.values().to_vec());
                    }
                }
            }
        }
        out.push(record);
    }
    out
}

impl ProviderSession for LanceDbSession {
    fn kind(&self) -> ProviderKind {
        ProviderKind::LanceDb
    }

    fn list_collections(&self) -> Result<Vec<CollectionDescriptor>, QueryError> {
        self.ensure_open()?;
        let mut names = self.table_names()?;
        names.sort();
        names
            .iter()
            .map(|name| self.describe_collection(name))
            .collect()
    }

    fn describe_collection(&self, name: &str) -> Result<CollectionDescriptor, QueryError> {
        self.ensure_open()?;
        let table = self.open_table(name)?;
        let schema = self.schema_of(&table)?;
        let count = self
            .runtime
            .block_on(async { table.count_rows(None).await })
            .map_err(|e| QueryError::backend(format!("Count failed: {}", e)))?;

        let mut descriptor = CollectionDescriptor::new(name).with_count(count as u64);
        descriptor.dimension = vector_dimension(&schema);
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
        let offset = match cursor {
            None => 0,
            Some(c) => c
                .as_offset()
                .ok_or_else(|| QueryError::backend(format!("invalid cursor '{}'", c)))?,
        };
        trace!("lancedb read_page {} offset={}", collection, offset);

        let table = self.open_table(collection)?;
        let total = self
            .runtime
            .block_on(async { table.count_rows(None).await })
            .map_err(|e| QueryError::backend(format!("Count failed: {}", e)))?;

        let batches: Vec<RecordBatch> = self.runtime.block_on(async {
            let stream = table
                .query()
                .limit(page_size.max(1))
                .offset(offset)
                .execute()
                .await
                .map_err(|e| QueryError::backend(format!("Query failed: {}", e)))?;
            stream
                .try_collect()
                .await
                .map_err(|e| QueryError::backend(format!("Failed to collect results: {}", e)))
        })?;

        let items: Vec<Record> = batches
            .iter()
            .flat_map(|b| records_from_batch(b, include_vectors))
            .collect();
        Ok(Page::from_offset(items, offset, total))
    }

    fn write_batch(
        &self,
        collection: &str,
        records: &[Record],
        mode: WriteMode,
    ) -> Result<BatchOutcome, WriteError> {
        self.ensure_open()?;
        let table = self.open_table(collection)?;
        let schema = self.schema_of(&table)?;
        let dimension = vector_dimension(&schema).ok_or_else(|| {
            WriteError::rejected(format!("table '{}' has no fixed-size vector column", collection))
        })?;

        let mut outcome = BatchOutcome::default();
        let mut accepted: Vec<&Record> = Vec::with_capacity(records.len());
        for record in records {
            match &record.vector {
                Some(v) if v.len() != dimension => outcome.failures.push(ItemFailure::new(
                    &record.id,
                    format!("dimension mismatch: expected {}, got {}", dimension, v.len()),
                )),
                _ => accepted.push(record),
            }
        }

        if mode == WriteMode::InsertOnly && !accepted.is_empty() {
            let ids: Vec<&str> = accepted.iter().map(|r| r.id.as_str()).collect();
            let existing = self.existing_ids(&table, &ids)?;
            accepted.retain(|r| {
                if existing.contains(&r.id) {
                    outcome
                        .failures
                        .push(ItemFailure::new(&r.id, "id already exists"));
                    false
                } else {
                    true
                }
            });
        }
        if accepted.is_empty() {
            return Ok(outcome);
        }

        let batch = records_to_batch(&accepted, dimension)?;
        let ids: Vec<&str> = accepted.iter().map(|r| r.id.as_str()).collect();
        let delete_filter = id_filter(&ids);
        debug!("Writing {} rows to '{}'", accepted.len(), collection);

        self.runtime.block_on(async {
            if mode == WriteMode::Upsert {
                if let Err(e) = table.delete(&delete_filter).await {
                    debug!("Delete before upsert returned error (may be ok): {}", e);
                }
            }
            let schema = batch.schema();
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            table
                .add(Box::new(batches))
                .execute()
                .await
                .map_err(|e| WriteError::backend(format!("Insert failed: {}", e)))
        })?;

        outcome.written = accepted.len();
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
            .ok_or_else(|| WriteError::rejected("LanceDB tables need a vector dimension"))?;
        if self.table_names()?.iter().any(|t| t == name) {
            return Err(WriteError::rejected(format!("table '{}' already exists", name)));
        }

        let schema = Arc::new(table_schema(dimension));
        self.runtime
            .block_on(async {
                self.connection
                    .create_empty_table(name, schema)
                    .execute()
                    .await
            })
            .map_err(|e| WriteError::backend(format!("Failed to create table: {}", e)))?;
        debug!("Created LanceDB table '{}'", name);

        Ok(CollectionDescriptor::new(name)
            .with_count(0)
            .with_dimension(dimension)
            .with_metric(metric))
    }

    fn delete_items(&self, collection: &str, ids: &[String]) -> Result<usize, WriteError> {
        self.ensure_open()?;
        if ids.is_empty() {
            return Ok(0);
        }
        let table = self.open_table(collection)?;
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let existing = self.existing_ids(&table, &refs)?;
        let filter = id_filter(&refs);
        self.runtime
            .block_on(async { table.delete(&filter).await })
            .map_err(|e| WriteError::backend(format!("Delete failed: {}", e)))?;
        Ok(existing.len())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
