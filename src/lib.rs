//! Top-level facade wiring a content store, a metadata store, and the
//! backup/restore pipelines into one handle opened from a
//! [`StrongboxConfig`].
//!
//! Nothing below this crate depends on it; `Strongbox` only assembles
//! already-independent pieces (`strongbox-datastore`, `strongbox-metadata`,
//! `strongbox-pipeline`) the way a caller otherwise would by hand.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};

use strongbox_config::{KeyProvider, MonotonicClock, StrongboxConfig};
use strongbox_datastore::{ChunkStore, ContentStore};
use strongbox_metadata::MetadataStore;
use strongbox_pipeline::{BackupOptions, BackupPipeline, PipelineResult, RestoreOptions, RestorePipeline};
use strongbox_tools::CryptConfig;

pub use strongbox_api_types as api_types;
pub use strongbox_config as config;
pub use strongbox_datastore as datastore;
pub use strongbox_metadata as metadata;
pub use strongbox_pipeline as pipeline;
pub use strongbox_protocol as protocol;

fn metadata_db_path(base: &Path) -> PathBuf {
    base.join("metadata.db")
}

fn content_store_path(base: &Path) -> PathBuf {
    base.join("chunks")
}

/// An opened datastore: a content store, a metadata store, and the config
/// that produced them, ready to run backups and restores against.
pub struct Strongbox {
    config: StrongboxConfig,
    content_store: Arc<dyn ContentStore>,
    metadata: Arc<MetadataStore>,
}

impl Strongbox {
    /// Creates a fresh datastore rooted at `base`, with no encryption.
    pub fn create(base: &Path, config: StrongboxConfig) -> Result<Self> {
        config.validate().context("invalid strongbox configuration")?;
        std::fs::create_dir_all(base)?;

        let chunk_store = ChunkStore::create(
            content_store_path(base),
            strongbox_api_types::DatastoreFSyncLevel::File,
            config.compression != strongbox_config::CompressionMode::None,
        )?;
        let metadata = MetadataStore::open(metadata_db_path(base), Arc::new(MonotonicClock::default()), None)?;

        Ok(Self {
            config,
            content_store: Arc::new(chunk_store),
            metadata: Arc::new(metadata),
        })
    }

    /// Creates a fresh datastore with AEAD encryption over both the content
    /// store and the metadata store's path index, keyed by `key_provider`.
    pub fn create_encrypted(base: &Path, config: StrongboxConfig, key_provider: &dyn KeyProvider) -> Result<Self> {
        config.validate().context("invalid strongbox configuration")?;
        std::fs::create_dir_all(base)?;

        let inner = ChunkStore::create(
            content_store_path(base),
            strongbox_api_types::DatastoreFSyncLevel::File,
            config.compression != strongbox_config::CompressionMode::None,
        )?;
        let content_store =
            strongbox_datastore::EncryptedChunkStore::new(inner, key_provider).map_err(anyhow::Error::from)?;

        let master_key = key_provider.get_master_key()?;
        let crypt = CryptConfig::new(master_key)?;
        let metadata = MetadataStore::open(
            metadata_db_path(base),
            Arc::new(MonotonicClock::default()),
            Some(crypt),
        )?;

        Ok(Self {
            config,
            content_store: Arc::new(content_store),
            metadata: Arc::new(metadata),
        })
    }

    pub fn config(&self) -> &StrongboxConfig {
        &self.config
    }

    pub fn stats(&self) -> Result<strongbox_api_types::DatastoreStats> {
        Ok(self.metadata.stats()?)
    }

    /// Garbage-collects chunks with no live references, using the metadata
    /// store's refcounts as the reachability source of truth.
    pub fn gc(&self) -> Result<strongbox_api_types::GarbageCollectionStatus> {
        let live = self.metadata.live_chunk_digests()?;
        Ok(self.content_store.gc(&live)?)
    }

    fn default_backup_options(&self) -> BackupOptions {
        BackupOptions {
            chunking_algorithm: self.config.chunking_algorithm,
            chunk_size: self.config.chunk_size as usize,
            cdc_min: self.config.cdc_min as usize,
            cdc_avg: self.config.cdc_avg as usize,
            cdc_max: self.config.cdc_max as usize,
        }
    }

    pub fn backup(&self, source: &Path, name: &str, description: &str) -> Result<PipelineResult> {
        let pipeline = BackupPipeline::new(self.content_store.clone(), self.metadata.clone(), self.config.crypt_mode());
        Ok(pipeline.backup_local(source, name, description, &self.default_backup_options())?)
    }

    pub fn restore(&self, snapshot_id: uuid::Uuid, destination: &Path, options: &RestoreOptions) -> Result<PipelineResult> {
        let pipeline = RestorePipeline::new(self.content_store.clone(), self.metadata.clone());
        Ok(pipeline.restore_local(snapshot_id, destination, options)?)
    }

    pub fn list_snapshots(&self) -> Result<Vec<strongbox_api_types::Snapshot>> {
        Ok(self.metadata.list_snapshots()?)
    }

    pub fn search(&self, query: &str) -> Result<Vec<strongbox_api_types::FileRecord>> {
        Ok(self.metadata.search_files(query)?)
    }

    pub fn close(&self) {
        self.content_store.close();
        self.metadata.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_backup_restore_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Strongbox::create(dir.path().join("store").as_path(), StrongboxConfig::default()).unwrap();

        let source = dir.path().join("source");
        std::fs::create_dir_all(&source).unwrap();
        std::fs::write(source.join("a.txt"), b"strongbox roundtrip").unwrap();

        let result = store.backup(&source, "s1", "").unwrap();
        assert!(result.success);

        let snapshots = store.list_snapshots().unwrap();
        assert_eq!(snapshots.len(), 1);

        let destination = dir.path().join("restored");
        let restore = store
            .restore(snapshots[0].id, &destination, &RestoreOptions::default())
            .unwrap();
        assert!(restore.success);
        assert_eq!(
            std::fs::read(destination.join("a.txt")).unwrap(),
            b"strongbox roundtrip"
        );
    }
}
