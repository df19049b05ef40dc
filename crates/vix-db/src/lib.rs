//! # vix-db
//!
//! Infrastructure layer for Vix - provider adapters for vector databases.
//!
//! This crate isolates everything that talks to a backend from the
//! orchestration logic in `vix-core`:
//!
//! - Backends can be added without touching connection or migration logic
//! - Heavy client dependencies stay behind cargo features
//! - Orchestration can be tested against in-process adapters
//!
//! ## Architecture
//!
//! ```text
//! vix-cli → vix-core → (ProviderAdapter / ProviderSession)
//!              ↑
//!           vix-db (memory, local, qdrant, pinecone, lancedb)
//! ```
//!
//! ## Features
//!
//! - `http` (default): Qdrant and Pinecone over REST
//! - `lancedb`: LanceDB embedded tables
//!
//! ## Usage
//!
//! ```ignore
//! use vix_db::{ConnectOptions, EndpointConfig, ProviderKind, ProviderRegistry};
//!
//! let registry = ProviderRegistry::builtin();
//! let adapter = registry.adapter(ProviderKind::Local)?;
//! let endpoint = EndpointConfig::new().with("path", "/data/chroma");
//! let session = adapter.connect(&endpoint, None, &ConnectOptions::default())?;
//!
//! for collection in session.list_collections()? {
//!     println!("{} ({:?} items)", collection.name, collection.item_count);
//! }
//! ```

pub mod error;
pub mod provider;

pub use error::{ConnectError, QueryError, WriteError};
pub use provider::{
    available_providers, BatchOutcome, CollectionDescriptor, ConnectOptions, Credential, Cursor,
    DistanceMetric, EndpointConfig, ItemFailure, Page, ProviderAdapter, ProviderCapabilities,
    ProviderKind, ProviderRegistry, ProviderSession, Record, WriteMode, DEFAULT_CONNECT_TIMEOUT,
};
