//! Built-in provider implementations.

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "lancedb")]
mod lancedb;

mod local;
mod memory;

#[cfg(feature = "http")]
mod pinecone;

#[cfg(feature = "http")]
mod qdrant;

#[cfg(feature = "lancedb")]
pub use self::lancedb::LanceDbAdapter;

pub use local::{
    read_collection_meta, write_collection_meta, CollectionMeta, LocalAdapter,
    COLLECTION_META_FILENAME, RECORDS_FILENAME,
};
pub use memory::MemoryAdapter;

#[cfg(feature = "http")]
pub use pinecone::PineconeAdapter;

#[cfg(feature = "http")]
pub use qdrant::QdrantAdapter;
