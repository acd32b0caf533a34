use std::collections::HashSet;
use std::sync::Arc;

use strongbox_api_types::{Digest, GarbageCollectionStatus};
use strongbox_config::KeyProvider;
use strongbox_tools::CryptConfig;

use crate::chunk_store::ChunkStore;
use crate::error::ContentStoreError;

/// Wraps a [`ChunkStore`] with deterministic authenticated encryption.
///
/// `put` encrypts the plaintext with a nonce derived from the plaintext
/// itself (see [`CryptConfig::dedup_nonce`]) before delegating to the inner
/// store, so identical plaintexts always produce identical ciphertext and
/// therefore the same inner digest — deduplication is preserved even though
/// every chunk on disk is encrypted. The externally visible digest is the
/// inner store's digest of the *ciphertext*, not a digest of the plaintext.
pub struct EncryptedChunkStore {
    inner: ChunkStore,
    crypt: CryptConfig,
}

impl EncryptedChunkStore {
    pub fn new(inner: ChunkStore, key_provider: &dyn KeyProvider) -> Result<Self, ContentStoreError> {
        let key = key_provider
            .get_master_key()
            .map_err(|err| ContentStoreError::InvalidInput(err.to_string()))?;
        let crypt = CryptConfig::new(key).map_err(|err| ContentStoreError::InvalidInput(err.to_string()))?;
        Ok(Self { inner, crypt })
    }

    pub fn put(&self, plaintext: &[u8]) -> Result<Digest, ContentStoreError> {
        if plaintext.is_empty() {
            return Err(ContentStoreError::InvalidInput("chunk bytes must be non-empty".into()));
        }
        let ciphertext = self
            .crypt
            .encrypt_deterministic(plaintext)
            .map_err(|err| ContentStoreError::InvalidInput(err.to_string()))?;
        self.inner.put(&ciphertext)
    }

    /// Fetches the ciphertext (integrity-checked by the inner store's
    /// rehash), decrypts it, and cross-checks the AEAD tag.
    pub fn get(&self, digest: &Digest) -> Result<Vec<u8>, ContentStoreError> {
        let ciphertext = self.inner.get(digest)?;
        self.crypt
            .decrypt_deterministic(&ciphertext)
            .map_err(|err| ContentStoreError::IntegrityFailed {
                digest: digest.to_hex(),
                detail: err.to_string(),
            })
    }

    pub fn exists(&self, digest: &Digest) -> Result<bool, ContentStoreError> {
        self.inner.exists(digest)
    }

    pub fn count(&self) -> Result<usize, ContentStoreError> {
        self.inner.count()
    }

    pub fn total_bytes(&self) -> Result<u64, ContentStoreError> {
        self.inner.total_bytes()
    }

    pub fn gc(&self, live_set: &HashSet<Digest>) -> Result<GarbageCollectionStatus, ContentStoreError> {
        self.inner.gc(live_set)
    }

    pub fn close(&self) {
        self.inner.close()
    }
}

/// Convenience constructor taking the provider by `Arc` for callers that
/// already share it across multiple stores/pipelines.
pub fn open_encrypted(inner: ChunkStore, key_provider: Arc<dyn KeyProvider>) -> Result<EncryptedChunkStore, ContentStoreError> {
    EncryptedChunkStore::new(inner, key_provider.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strongbox_api_types::DatastoreFSyncLevel;
    use strongbox_config::StaticKeyProvider;

    fn test_inner(name: &str) -> ChunkStore {
        let mut path = std::env::temp_dir();
        path.push(format!("strongbox-enc-test-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&path);
        ChunkStore::create(&path, DatastoreFSyncLevel::None, false).unwrap()
    }

    #[test]
    fn identical_plaintext_dedups_under_encryption() {
        let inner = test_inner("dedup");
        let key_provider = StaticKeyProvider::new([3u8; 32]);
        let store = EncryptedChunkStore::new(inner, &key_provider).unwrap();

        let d1 = store.put(b"same secret bytes").unwrap();
        let d2 = store.put(b"same secret bytes").unwrap();
        assert_eq!(d1, d2);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn roundtrips_through_encryption() {
        let inner = test_inner("roundtrip");
        let key_provider = StaticKeyProvider::new([9u8; 32]);
        let store = EncryptedChunkStore::new(inner, &key_provider).unwrap();

        let digest = store.put(b"plaintext chunk").unwrap();
        let recovered = store.get(&digest).unwrap();
        assert_eq!(recovered, b"plaintext chunk");
    }
}
