//! Data types exchanged across the provider boundary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ============================================================================
// ProviderKind
// ============================================================================

/// The closed set of backend kinds Vix knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Ephemeral in-process store, shared per namespace.
    Memory,
    /// Directory of collections on local disk (Chroma-style persistent store).
    Local,
    /// Qdrant REST API.
    Qdrant,
    /// Pinecone control/data plane REST API.
    Pinecone,
    /// LanceDB embedded tables.
    LanceDb,
}

impl ProviderKind {
    /// All provider kinds, in display order.
    pub const ALL: [ProviderKind; 5] = [
        ProviderKind::Memory,
        ProviderKind::Local,
        ProviderKind::Qdrant,
        ProviderKind::Pinecone,
        ProviderKind::LanceDb,
    ];

    /// Get the provider name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Memory => "memory",
            ProviderKind::Local => "local",
            ProviderKind::Qdrant => "qdrant",
            ProviderKind::Pinecone => "pinecone",
            ProviderKind::LanceDb => "lancedb",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "ephemeral" => Ok(Self::Memory),
            "local" | "chroma" | "chromadb" => Ok(Self::Local),
            "qdrant" => Ok(Self::Qdrant),
            "pinecone" => Ok(Self::Pinecone),
            "lancedb" | "lance" => Ok(Self::LanceDb),
            _ => Err(format!(
                "Unknown provider: '{}'. Use one of: memory, local, qdrant, pinecone, lancedb.",
                s
            )),
        }
    }
}

// ============================================================================
// DistanceMetric
// ============================================================================

/// Distance metric declared by a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Cosine similarity (default).
    #[default]
    Cosine,
    /// Dot product.
    Dot,
    /// Euclidean (L2) distance.
    L2,
    /// Manhattan (L1) distance.
    Manhattan,
}

impl DistanceMetric {
    /// Get the metric name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Dot => "dot",
            DistanceMetric::L2 => "l2",
            DistanceMetric::Manhattan => "manhattan",
        }
    }

    /// Parse the spellings used by the supported backends.
    ///
    /// Unknown names fall back to cosine, which every backend supports.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "dot" | "dotproduct" | "ip" => DistanceMetric::Dot,
            "l2" | "euclid" | "euclidean" => DistanceMetric::L2,
            "manhattan" | "l1" => DistanceMetric::Manhattan,
            _ => DistanceMetric::Cosine,
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Credential
// ============================================================================

/// Secret bundle handed to [`ProviderAdapter::connect`](super::ProviderAdapter::connect).
///
/// Owned by the credential vault; zeroized on drop and never printed.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// API key (Qdrant Cloud, Pinecone).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Username for basic authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password for basic authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Credential {
    /// Create a credential holding only an API key.
    pub fn api_key(key: impl Into<String>) -> Self {
        Self {
            api_key: Some(key.into()),
            username: None,
            password: None,
            token: None,
        }
    }

    /// Create a username/password credential.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            api_key: None,
            username: Some(username.into()),
            password: Some(password.into()),
            token: None,
        }
    }

    /// Create a bearer-token credential.
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            api_key: None,
            username: None,
            password: None,
            token: Some(token.into()),
        }
    }

    /// Whether no secret field is set.
    pub fn is_empty(&self) -> bool {
        self.api_key.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.token.is_none()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Credential")
            .field("api_key", &mask(&self.api_key))
            .field("username", &self.username)
            .field("password", &mask(&self.password))
            .field("token", &mask(&self.token))
            .finish()
    }
}

// ============================================================================
// CollectionDescriptor
// ============================================================================

/// Read-only snapshot of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionDescriptor {
    /// Collection (index, table) name.
    pub name: String,

    /// Number of items, best-effort and possibly stale.
    #[serde(default)]
    pub item_count: Option<u64>,

    /// Vector dimension, when the backend declares one.
    #[serde(default)]
    pub dimension: Option<usize>,

    /// Distance metric.
    #[serde(default)]
    pub metric: DistanceMetric,
}

impl CollectionDescriptor {
    /// Create a descriptor with only a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            item_count: None,
            dimension: None,
            metric: DistanceMetric::Cosine,
        }
    }

    /// Set the item count.
    pub fn with_count(mut self, count: u64) -> Self {
        self.item_count = Some(count);
        self
    }

    /// Set the vector dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    /// Set the distance metric.
    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }
}

// ============================================================================
// Record
// ============================================================================

/// One item read from or written to a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Backend item id, stringified.
    pub id: String,

    /// Embedding vector; `None` when reads skip vectors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f32>>,

    /// Source document text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,

    /// JSON metadata object.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    /// Create a record with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vector: None,
            document: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Set the vector.
    pub fn with_vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    /// Set the document text.
    pub fn with_document(mut self, document: impl Into<String>) -> Self {
        self.document = Some(document.into());
        self
    }

    /// Insert a metadata field.
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Copy of this record without its vector.
    pub fn without_vector(&self) -> Self {
        Self {
            vector: None,
            ..self.clone()
        }
    }
}

// ============================================================================
// Pagination
// ============================================================================

/// Opaque, backend-defined pagination token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wrap a backend token.
    pub fn new(token: impl Into<String>) -> Self {
        Cursor(token.into())
    }

    /// Cursor for offset-paginated backends.
    pub fn from_offset(offset: usize) -> Self {
        Cursor(offset.to_string())
    }

    /// Decode an offset cursor produced by [`Cursor::from_offset`].
    pub fn as_offset(&self) -> Option<usize> {
        self.0.parse().ok()
    }

    /// Get the raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One page of items returned by `read_page`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Items on this page.
    pub items: Vec<Record>,

    /// Cursor for the following page, `None` at the end.
    pub next_cursor: Option<Cursor>,

    /// Whether this is the last page.
    pub end_of_data: bool,
}

impl Page {
    /// The final page.
    pub fn last(items: Vec<Record>) -> Self {
        Self {
            items,
            next_cursor: None,
            end_of_data: true,
        }
    }

    /// A page followed by more data.
    pub fn more(items: Vec<Record>, next: Cursor) -> Self {
        Self {
            items,
            next_cursor: Some(next),
            end_of_data: false,
        }
    }

    /// Build a page for offset-paginated backends.
    pub fn from_offset(items: Vec<Record>, offset: usize, total: usize) -> Self {
        let next = offset + items.len();
        if items.is_empty() || next >= total {
            Self::last(items)
        } else {
            Self::more(items, Cursor::from_offset(next))
        }
    }
}

// ============================================================================
// Writes
// ============================================================================

/// How a write treats ids that already exist in the target collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteMode {
    /// Replace existing items (default).
    #[default]
    Upsert,
    /// Reject existing ids as per-item failures.
    InsertOnly,
}

impl WriteMode {
    /// Get the mode name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Upsert => "upsert",
            WriteMode::InsertOnly => "insert-only",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "upsert" => Ok(Self::Upsert),
            "insert-only" | "insert_only" | "insert" => Ok(Self::InsertOnly),
            _ => Err(format!(
                "Unknown write mode: '{}'. Use 'upsert' or 'insert-only'.",
                s
            )),
        }
    }
}

/// A single item the backend refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    /// Id of the rejected item.
    pub id: String,
    /// Backend reason.
    pub reason: String,
}

impl ItemFailure {
    /// Create an item failure.
    pub fn new(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// Per-item result of a `write_batch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Number of items the backend accepted.
    pub written: usize,
    /// Items the backend rejected.
    pub failures: Vec<ItemFailure>,
}

impl BatchOutcome {
    /// Every item of the batch succeeded.
    pub fn all_written(count: usize) -> Self {
        Self {
            written: count,
            failures: Vec::new(),
        }
    }

    /// Total items accounted for.
    pub fn total(&self) -> usize {
        self.written + self.failures.len()
    }

    /// Whether some items failed.
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("qdrant".parse::<ProviderKind>(), Ok(ProviderKind::Qdrant));
        assert_eq!("ChromaDB".parse::<ProviderKind>(), Ok(ProviderKind::Local));
        assert!("redis".parse::<ProviderKind>().is_err());
        assert_eq!(ProviderKind::LanceDb.to_string(), "lancedb");
    }

    #[test]
    fn test_metric_lenient_parse() {
        assert_eq!(DistanceMetric::parse_lenient("Euclid"), DistanceMetric::L2);
        assert_eq!(DistanceMetric::parse_lenient("dotproduct"), DistanceMetric::Dot);
        assert_eq!(DistanceMetric::parse_lenient("weird"), DistanceMetric::Cosine);
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let cred = Credential::basic("admin", "hunter2");
        let printed = format!("{:?}", cred);
        assert!(printed.contains("admin"));
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("***"));
    }

    #[test]
    fn test_offset_page_boundaries() {
        let items: Vec<Record> = (0..50).map(|i| Record::new(i.to_string())).collect();
        let page = Page::from_offset(items, 200, 250);
        assert!(page.end_of_data);
        assert!(page.next_cursor.is_none());

        let items: Vec<Record> = (0..100).map(|i| Record::new(i.to_string())).collect();
        let page = Page::from_offset(items, 0, 250);
        assert!(!page.end_of_data);
        assert_eq!(page.next_cursor.and_then(|c| c.as_offset()), Some(100));
    }

    #[test]
    fn test_write_mode_parse() {
        assert_eq!("insert-only".parse::<WriteMode>(), Ok(WriteMode::InsertOnly));
        assert_eq!(WriteMode::default(), WriteMode::Upsert);
    }
}
