//! The provider adapter contract.
//!
//! An adapter is a stateless factory for one [`ProviderKind`]; a session is one
//! live backend connection. Both are synchronous and `Send + Sync` so the
//! connection manager can drive them from worker threads.

use super::config::{ConnectOptions, EndpointConfig, ProviderCapabilities};
use super::types::{
    BatchOutcome, CollectionDescriptor, Credential, Cursor, DistanceMetric, Page, ProviderKind,
    Record, WriteMode,
};
use crate::error::{ConnectError, QueryError, WriteError};

// ============================================================================
// ProviderAdapter
// ============================================================================

/// Factory for sessions of one provider kind.
pub trait ProviderAdapter: Send + Sync {
    /// The provider this adapter talks to.
    fn kind(&self) -> ProviderKind;

    /// What sessions of this provider support.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Check an endpoint configuration without touching the network.
    fn validate_endpoint(&self, endpoint: &EndpointConfig) -> Result<(), ConnectError>;

    /// Open a session.
    ///
    /// Implementations must return within `options.timeout`, reporting
    /// [`ConnectError::Timeout`] otherwise.
    fn connect(
        &self,
        endpoint: &EndpointConfig,
        credential: Option<&Credential>,
        options: &ConnectOptions,
    ) -> Result<Box<dyn ProviderSession>, ConnectError>;
}

// ============================================================================
// ProviderSession
// ============================================================================

/// One live backend session.
pub trait ProviderSession: Send + Sync {
    /// The provider this session belongs to.
    fn kind(&self) -> ProviderKind;

    /// List every collection visible to this session.
    fn list_collections(&self) -> Result<Vec<CollectionDescriptor>, QueryError>;

    /// Describe one collection.
    fn describe_collection(&self, name: &str) -> Result<CollectionDescriptor, QueryError>;

    /// Read one page of items.
    ///
    /// `cursor` is `None` for the first page and otherwise the `next_cursor`
    /// of the previous page.
    fn read_page(
        &self,
        collection: &str,
        cursor: Option<&Cursor>,
        page_size: usize,
        include_vectors: bool,
    ) -> Result<Page, QueryError>;

    /// Write a batch of items.
    ///
    /// Items the backend refuses are reported in [`BatchOutcome::failures`];
    /// an `Err` means the batch as a whole could not be processed.
    fn write_batch(
        &self,
        collection: &str,
        records: &[Record],
        mode: WriteMode,
    ) -> Result<BatchOutcome, WriteError>;

    /// Create an empty collection.
    fn create_collection(
        &self,
        name: &str,
        dimension: Option<usize>,
        metric: DistanceMetric,
    ) -> Result<CollectionDescriptor, WriteError> {
        let _ = (name, dimension, metric);
        Err(WriteError::Unsupported {
            operation: "create_collection",
        })
    }

    /// Delete items by id, returning how many existed.
    fn delete_items(&self, collection: &str, ids: &[String]) -> Result<usize, WriteError> {
        let _ = (collection, ids);
        Err(WriteError::Unsupported {
            operation: "delete_items",
        })
    }

    /// Delete a whole collection.
    fn delete_collection(&self, name: &str) -> Result<(), WriteError> {
        let _ = name;
        Err(WriteError::Unsupported {
            operation: "delete_collection",
        })
    }

    /// Release backend resources. Calling it twice is a no-op.
    fn close(&self);
}
