use std::collections::HashSet;

use strongbox_api_types::{Digest, GarbageCollectionStatus};

use crate::error::ContentStoreError;

/// Narrow behaviour shared by [`crate::ChunkStore`] and
/// [`crate::EncryptedChunkStore`], so pipeline code can be written once
/// against either. Encryption is composition (a wrapper around a base
/// store), not a second implementation stacked via inheritance.
pub trait ContentStore: Send + Sync {
    fn put(&self, bytes: &[u8]) -> Result<Digest, ContentStoreError>;
    fn get(&self, digest: &Digest) -> Result<Vec<u8>, ContentStoreError>;
    fn exists(&self, digest: &Digest) -> Result<bool, ContentStoreError>;
    fn count(&self) -> Result<usize, ContentStoreError>;
    fn total_bytes(&self) -> Result<u64, ContentStoreError>;
    fn gc(&self, live_set: &HashSet<Digest>) -> Result<GarbageCollectionStatus, ContentStoreError>;
    fn close(&self);
}

impl ContentStore for crate::chunk_store::ChunkStore {
    fn put(&self, bytes: &[u8]) -> Result<Digest, ContentStoreError> {
        crate::chunk_store::ChunkStore::put(self, bytes)
    }
    fn get(&self, digest: &Digest) -> Result<Vec<u8>, ContentStoreError> {
        crate::chunk_store::ChunkStore::get(self, digest)
    }
    fn exists(&self, digest: &Digest) -> Result<bool, ContentStoreError> {
        crate::chunk_store::ChunkStore::exists(self, digest)
    }
    fn count(&self) -> Result<usize, ContentStoreError> {
        crate::chunk_store::ChunkStore::count(self)
    }
    fn total_bytes(&self) -> Result<u64, ContentStoreError> {
        crate::chunk_store::ChunkStore::total_bytes(self)
    }
    fn gc(&self, live_set: &HashSet<Digest>) -> Result<GarbageCollectionStatus, ContentStoreError> {
        crate::chunk_store::ChunkStore::gc(self, live_set)
    }
    fn close(&self) {
        crate::chunk_store::ChunkStore::close(self)
    }
}

impl ContentStore for crate::encrypted_store::EncryptedChunkStore {
    fn put(&self, bytes: &[u8]) -> Result<Digest, ContentStoreError> {
        crate::encrypted_store::EncryptedChunkStore::put(self, bytes)
    }
    fn get(&self, digest: &Digest) -> Result<Vec<u8>, ContentStoreError> {
        crate::encrypted_store::EncryptedChunkStore::get(self, digest)
    }
    fn exists(&self, digest: &Digest) -> Result<bool, ContentStoreError> {
        crate::encrypted_store::EncryptedChunkStore::exists(self, digest)
    }
    fn count(&self) -> Result<usize, ContentStoreError> {
        crate::encrypted_store::EncryptedChunkStore::count(self)
    }
    fn total_bytes(&self) -> Result<u64, ContentStoreError> {
        crate::encrypted_store::EncryptedChunkStore::total_bytes(self)
    }
    fn gc(&self, live_set: &HashSet<Digest>) -> Result<GarbageCollectionStatus, ContentStoreError> {
        crate::encrypted_store::EncryptedChunkStore::gc(self, live_set)
    }
    fn close(&self) {
        crate::encrypted_store::EncryptedChunkStore::close(self)
    }
}
