//! Content-addressed, deduplicating chunk storage: hashing, chunking, the
//! on-disk chunk store, and its deterministic-AEAD encryption wrapper.

pub mod chunk_store;
pub mod chunker;
pub mod content_store;
pub mod data_blob;
pub mod encrypted_store;
pub mod error;
pub mod file_formats;
pub mod hasher;

pub use chunk_store::ChunkStore;
pub use chunker::{cdc_chunk_reader, fixed_chunk_reader, Chunk, Chunker};
pub use content_store::ContentStore;
pub use data_blob::DataBlob;
pub use encrypted_store::EncryptedChunkStore;
pub use error::ContentStoreError;
pub use hasher::{hash_bytes, hash_file, hash_reader, IncrementalHasher};
