//! Provider adapters.
//!
//! ## Available Providers
//!
//! - `memory`: ephemeral in-process store, shared per namespace
//! - `local`: directory of collections stored as JSONL
//! - `qdrant` (feature `http`): Qdrant REST API
//! - `pinecone` (feature `http`): Pinecone REST API
//! - `lancedb` (feature `lancedb`): LanceDB embedded tables

pub mod backend;
pub mod config;
pub mod traits;
pub mod types;

pub use config::{ConnectOptions, EndpointConfig, ProviderCapabilities, DEFAULT_CONNECT_TIMEOUT};
pub use traits::{ProviderAdapter, ProviderSession};
pub use types::{
    BatchOutcome, CollectionDescriptor, Credential, Cursor, DistanceMetric, ItemFailure, Page,
    ProviderKind, Record, WriteMode,
};

use crate::error::ConnectError;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// ProviderRegistry
// ============================================================================

/// Static table from [`ProviderKind`] to adapter.
///
/// Tests swap in scripted adapters with [`ProviderRegistry::with_adapter`].
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: BTreeMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// An empty registry.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding every provider compiled into this build.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        for kind in available_providers() {
            if let Some(adapter) = builtin_adapter(kind) {
                registry.adapters.insert(kind, adapter);
            }
        }
        registry
    }

    /// Register (or replace) the adapter for its kind.
    pub fn with_adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        let kind = adapter.kind();
        debug!("Registering adapter for provider '{}'", kind);
        self.adapters.insert(kind, adapter);
        self
    }

    /// Look up the adapter for a provider.
    pub fn adapter(&self, kind: ProviderKind) -> Result<Arc<dyn ProviderAdapter>, ConnectError> {
        self.adapters.get(&kind).cloned().ok_or_else(|| {
            ConnectError::unavailable(kind.as_str(), "provider is not enabled in this build")
        })
    }

    /// Registered provider kinds, in display order.
    pub fn kinds(&self) -> Vec<ProviderKind> {
        self.adapters.keys().copied().collect()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

fn builtin_adapter(kind: ProviderKind) -> Option<Arc<dyn ProviderAdapter>> {
    match kind {
        ProviderKind::Memory => Some(Arc::new(backend::MemoryAdapter::new())),
        ProviderKind::Local => Some(Arc::new(backend::LocalAdapter)),

        #[cfg(feature = "http")]
        ProviderKind::Qdrant => Some(Arc::new(backend::QdrantAdapter)),

        #[cfg(feature = "http")]
        ProviderKind::Pinecone => Some(Arc::new(backend::PineconeAdapter)),

        #[cfg(feature = "lancedb")]
        ProviderKind::LanceDb => Some(Arc::new(backend::LanceDbAdapter)),

        #[allow(unreachable_patterns)]
        _ => None,
    }
}

/// Provider kinds compiled into this build.
#[allow(clippy::vec_init_then_push)]
pub fn available_providers() -> Vec<ProviderKind> {
    let mut providers = Vec::new();

    providers.push(ProviderKind::Memory);
    providers.push(ProviderKind::Local);

    #[cfg(feature = "http")]
    {
        providers.push(ProviderKind::Qdrant);
        providers.push(ProviderKind::Pinecone);
    }

    #[cfg(feature = "lancedb")]
    providers.push(ProviderKind::LanceDb);

    providers
}

// ============================================================================
// Tests
// ============================================================================
