use std::path::Path;
use std::sync::Arc;

use uuid::Uuid;

use strongbox_api_types::{ErrorKind, FileRecord, HumanByte};
use strongbox_datastore::{hash_bytes, ContentStore, ContentStoreError};
use strongbox_metadata::MetadataStore;

use crate::error::PipelineError;
use crate::options::{OnIntegrityError, RestoreOptions};
use crate::result::PipelineResult;

/// Reassembles a snapshot's files from the content store onto disk.
///
/// Each chunk is verified by `ContentStore::get` (rehash against its
/// digest) as it is fetched; `RestoreOptions.verify_whole_file` adds a
/// second check across the assembled bytes against `FileRecord.file_digest`,
/// catching a chunk list that was reordered or truncated without any single
/// chunk being corrupt.
pub struct RestorePipeline {
    content_store: Arc<dyn ContentStore>,
    metadata: Arc<MetadataStore>,
}

impl RestorePipeline {
    pub fn new(content_store: Arc<dyn ContentStore>, metadata: Arc<MetadataStore>) -> Self {
        Self { content_store, metadata }
    }

    pub fn restore_local(
        &self,
        snapshot_id: Uuid,
        destination: &Path,
        options: &RestoreOptions,
    ) -> Result<PipelineResult, PipelineError> {
        let files = self.metadata.list_files(snapshot_id)?;
        let mut result = PipelineResult::new();

        for file in files {
            let path = file.path.clone();
            match self.restore_one_file(&file, destination, options) {
                Ok(Some(size)) => {
                    result.files_processed += 1;
                    result.bytes += size;
                }
                Ok(None) => {
                    // target already existed and overwrite_existing is false: skipped, not an error
                }
                Err(err) => {
                    log::warn!("restore of {path} failed: {err}");
                    let abort = options.on_integrity_error == OnIntegrityError::Abort
                        && err.kind() == ErrorKind::IntegrityFailed;
                    result.record_error(path, err.kind(), err.to_string());
                    if abort {
                        break;
                    }
                }
            }
        }

        log::info!(
            "restore of snapshot {snapshot_id} done: {} files, {} ({} failed)",
            result.files_processed,
            HumanByte::from(result.bytes),
            result.errors.len(),
        );
        Ok(result)
    }

    /// Returns `Ok(None)` when the file was skipped because it already
    /// exists and `overwrite_existing` is `false`.
    fn restore_one_file(
        &self,
        file: &FileRecord,
        destination: &Path,
        options: &RestoreOptions,
    ) -> Result<Option<u64>, PipelineError> {
        let target = destination.join(&file.path);
        if target.exists() && !options.overwrite_existing {
            return Ok(None);
        }

        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|err| PipelineError::Other(err.into()))?;
        }

        let mut buffer = Vec::with_capacity(file.size as usize);
        for digest in &file.chunk_list {
            let bytes = self.content_store.get(digest)?;
            buffer.extend_from_slice(&bytes);
        }

        if options.verify_whole_file {
            let actual = hash_bytes(&buffer);
            if actual != file.file_digest {
                return Err(PipelineError::ContentStore(ContentStoreError::IntegrityFailed {
                    digest: file.file_digest.to_hex(),
                    detail: format!("assembled file hashes to {actual}, expected {}", file.file_digest),
                }));
            }
        }

        std::fs::write(&target, &buffer).map_err(|err| PipelineError::Other(err.into()))?;
        Ok(Some(buffer.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::BackupPipeline;
    use crate::options::BackupOptions;
    use std::fs;
    use strongbox_api_types::{ChunkingAlgorithm, CryptMode, DatastoreFSyncLevel};
    use strongbox_config::MonotonicClock;
    use strongbox_datastore::ChunkStore;

    fn fixture() -> (tempfile::TempDir, Arc<dyn ContentStore>, Arc<MetadataStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::create(dir.path().join("store"), DatastoreFSyncLevel::None, false).unwrap();
        let metadata = MetadataStore::open_in_memory(Arc::new(MonotonicClock::default()), None).unwrap();
        (dir, Arc::new(store), Arc::new(metadata))
    }

    #[test]
    fn restores_a_backed_up_file_byte_for_byte() {
        let (dir, content_store, metadata) = fixture();
        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("notes.txt"), b"hello from strongbox").unwrap();

        let backup = BackupPipeline::new(content_store.clone(), metadata.clone(), CryptMode::None);
        let options = BackupOptions {
            chunking_algorithm: ChunkingAlgorithm::Fixed,
            chunk_size: 4096,
            ..Default::default()
        };
        backup.backup_local(&source, "s1", "", &options).unwrap();
        let snapshot = metadata.list_snapshots().unwrap().remove(0);

        let restore = RestorePipeline::new(content_store.clone(), metadata.clone());
        let destination = dir.path().join("restored");
        let result = restore
            .restore_local(snapshot.id, &destination, &RestoreOptions::default())
            .unwrap();

        assert!(result.success);
        assert_eq!(result.files_processed, 1);
        let restored = fs::read(destination.join("notes.txt")).unwrap();
        assert_eq!(restored, b"hello from strongbox");
    }

    #[test]
    fn existing_file_is_skipped_without_overwrite() {
        let (dir, content_store, metadata) = fixture();
        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), b"original").unwrap();

        let backup = BackupPipeline::new(content_store.clone(), metadata.clone(), CryptMode::None);
        backup
            .backup_local(&source, "s1", "", &BackupOptions::default())
            .unwrap();
        let snapshot = metadata.list_snapshots().unwrap().remove(0);

        let destination = dir.path().join("restored");
        fs::create_dir_all(&destination).unwrap();
        fs::write(destination.join("a.txt"), b"already here").unwrap();

        let restore = RestorePipeline::new(content_store, metadata);
        let result = restore
            .restore_local(snapshot.id, &destination, &RestoreOptions::default())
            .unwrap();

        assert!(result.success);
        assert_eq!(result.files_processed, 0);
        assert_eq!(fs::read(destination.join("a.txt")).unwrap(), b"already here");
    }
}
