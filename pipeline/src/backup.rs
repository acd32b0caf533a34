use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

use strongbox_api_types::{ChunkingAlgorithm, CryptMode, ErrorKind, FileRecord, HumanByte};
use strongbox_datastore::{cdc_chunk_reader, fixed_chunk_reader, ContentStore, ContentStoreError, IncrementalHasher};
use strongbox_metadata::MetadataStore;
use strongbox_protocol::connection::FrameTransport;
use strongbox_protocol::{
    ChunkAckPayload, ChunkDataPayload, Connection, FileTransferRequestPayload, FileTransferResponsePayload,
    HandshakePayload, HandshakeResponsePayload, MessageType, TransferCompletePayload, ACK_REQUIRED, PROTOCOL_VERSION,
    RESPONSE,
};
use strongbox_tools::ParallelHandler;

use crate::error::PipelineError;
use crate::options::BackupOptions;
use crate::result::PipelineResult;
use crate::walker::walk_regular_files;

fn file_modified_at_ms(path: &Path) -> u64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Number of CPU-bound chunking/hashing workers to run a local backup with.
fn worker_count() -> usize {
    std::thread::available_parallelism().map(std::num::NonZeroUsize::get).unwrap_or(1)
}

/// Chunks, hashes, and persists one file. Free function (not a method) so it
/// can be cloned into a [`ParallelHandler`] worker closure without capturing
/// `&self` across a thread boundary.
fn backup_one_file(
    content_store: &Arc<dyn ContentStore>,
    metadata: &Arc<MetadataStore>,
    encryption_mode: CryptMode,
    snapshot_id: Uuid,
    full_path: &Path,
    relative: &Path,
    options: &BackupOptions,
) -> Result<u64, PipelineError> {
    let file = std::fs::File::open(full_path).map_err(|err| PipelineError::Other(err.into()))?;
    let modified_at = file_modified_at_ms(full_path);

    let chunks = match options.chunking_algorithm {
        ChunkingAlgorithm::Fixed => fixed_chunk_reader(file, options.chunk_size).map_err(PipelineError::Other)?,
        ChunkingAlgorithm::Cdc => {
            cdc_chunk_reader(file, options.cdc_min, options.cdc_avg, options.cdc_max).map_err(PipelineError::Other)?
        }
    };

    let mut hasher = IncrementalHasher::new();
    let mut chunk_list = Vec::with_capacity(chunks.len());
    let mut size = 0u64;

    for chunk in &chunks {
        content_store.put(&chunk.bytes)?;
        metadata.upsert_chunk(chunk.digest, chunk.size())?;
        hasher.update(&chunk.bytes);
        chunk_list.push(chunk.digest);
        size += chunk.bytes.len() as u64;
    }

    let record = FileRecord {
        id: Uuid::new_v4(),
        snapshot_id,
        path: relative.to_string_lossy().into_owned(),
        size,
        modified_at,
        file_digest: hasher.finalize(),
        chunk_list,
        encryption_mode,
    };
    metadata.insert_file(&record)?;

    Ok(size)
}

fn backup_one_file_with_retry(
    content_store: &Arc<dyn ContentStore>,
    metadata: &Arc<MetadataStore>,
    encryption_mode: CryptMode,
    snapshot_id: Uuid,
    full_path: &Path,
    relative: &Path,
    options: &BackupOptions,
) -> Result<u64, PipelineError> {
    match backup_one_file(content_store, metadata, encryption_mode, snapshot_id, full_path, relative, options) {
        Ok(size) => Ok(size),
        Err(err) if err.kind() == ErrorKind::IoFailed => {
            log::warn!("retrying {relative:?} once after IoFailed");
            backup_one_file(content_store, metadata, encryption_mode, snapshot_id, full_path, relative, options)
        }
        Err(err) => Err(err),
    }
}

/// Converts a source directory into a finalized [`strongbox_api_types::Snapshot`].
///
/// Per file: `ContentStore.put` always precedes `MetadataStore.upsert_chunk`
/// (a crash between the two leaves at most an unreferenced chunk, never a
/// metadata row pointing at nothing). A file that still fails after one
/// retry is recorded in the result and skipped; the snapshot is finalized
/// with whatever files succeeded, so partial progress stays observable
/// instead of discarding an otherwise-good backup over one bad file.
///
/// `backup_local` fans the CPU-bound chunking/hashing step for each file out
/// across a [`ParallelHandler`] pool sized to the CPU count; the pool's
/// bounded channel provides the backpressure so the directory walk can't
/// outrun the workers.
pub struct BackupPipeline {
    content_store: Arc<dyn ContentStore>,
    metadata: Arc<MetadataStore>,
    encryption_mode: CryptMode,
}

impl BackupPipeline {
    pub fn new(content_store: Arc<dyn ContentStore>, metadata: Arc<MetadataStore>, encryption_mode: CryptMode) -> Self {
        Self {
            content_store,
            metadata,
            encryption_mode,
        }
    }

    pub fn backup_local(
        &self,
        source: &Path,
        name: &str,
        description: &str,
        options: &BackupOptions,
    ) -> Result<PipelineResult, PipelineError> {
        let snapshot = self.metadata.create_snapshot(name, description)?;

        let files = match walk_regular_files(source) {
            Ok(files) => files,
            Err(err) => {
                self.metadata.abort_snapshot(snapshot.id)?;
                return Err(PipelineError::Other(err));
            }
        };

        let outcomes: Arc<Mutex<Vec<(PathBuf, Result<u64, PipelineError>)>>> =
            Arc::new(Mutex::new(Vec::with_capacity(files.len())));

        let content_store = self.content_store.clone();
        let metadata = self.metadata.clone();
        let encryption_mode = self.encryption_mode;
        let snapshot_id = snapshot.id;
        let options = options.clone();
        let source = source.to_path_buf();
        let outcomes_for_worker = Arc::clone(&outcomes);

        let pool = ParallelHandler::new("backup chunker", worker_count(), move |relative: PathBuf| {
            let full_path = source.join(&relative);
            let outcome =
                backup_one_file_with_retry(&content_store, &metadata, encryption_mode, snapshot_id, &full_path, &relative, &options);
            outcomes_for_worker.lock().unwrap().push((relative, outcome));
            Ok(())
        });

        for relative in files {
            pool.send(relative)?;
        }
        pool.complete()?;

        let mut result = PipelineResult::new();
        for (relative, outcome) in Arc::try_unwrap(outcomes).expect("pool joined, no outstanding senders").into_inner().unwrap() {
            match outcome {
                Ok(size) => {
                    result.files_processed += 1;
                    result.bytes += size;
                }
                Err(err) => {
                    log::warn!("backup of {relative:?} failed: {err}");
                    result.record_error(relative.display().to_string(), err.kind(), err.to_string());
                }
            }
        }

        self.metadata.finalize_snapshot(snapshot.id)?;
        log::info!(
            "backup '{name}' done: {} files, {} ({} failed)",
            result.files_processed,
            HumanByte::from(result.bytes),
            result.errors.len(),
        );
        Ok(result)
    }

    /// Remote-mode backup: the server side runs [`Self::receive_session`]'s
    /// algorithm against its own stores; this side only walks, chunks, and
    /// streams. No `ContentStore`/`MetadataStore` calls happen locally. Chunk
    /// delivery is inherently sequential here (each `CHUNK_DATA` frame is
    /// acked before the next is sent), so there is no worker pool to wire up
    /// on this side the way `backup_local` has one.
    pub async fn backup_remote<S: FrameTransport>(
        &self,
        connection: &mut Connection<S>,
        source: &Path,
        client_id: &str,
        options: &BackupOptions,
    ) -> Result<PipelineResult, PipelineError> {
        let handshake = HandshakePayload {
            protocol_version: PROTOCOL_VERSION,
            client_id: client_id.to_string(),
            capabilities: 0,
        };
        connection
            .send(MessageType::Handshake, 0, &handshake.encode())
            .await
            .map_err(PipelineError::Protocol)?;
        let (header, payload) = connection.recv().await.map_err(PipelineError::Protocol)?;
        if header.message_type != MessageType::HandshakeResponse as u8 {
            return Err(PipelineError::Other(anyhow::anyhow!(
                "expected HANDSHAKE_RESPONSE, got {:#04x}",
                header.message_type
            )));
        }
        let response = HandshakeResponsePayload::decode(&payload).map_err(PipelineError::Protocol)?;
        if response.protocol_version != PROTOCOL_VERSION {
            return Err(PipelineError::Other(anyhow::anyhow!(
                "server speaks protocol version {}, we speak {}",
                response.protocol_version,
                PROTOCOL_VERSION
            )));
        }

        let files = walk_regular_files(source).map_err(PipelineError::Other)?;
        let mut result = PipelineResult::new();

        for relative in files {
            let full_path = source.join(&relative);
            match self
                .backup_one_file_remote(connection, &full_path, &relative, options, response.max_chunk_size)
                .await
            {
                Ok(size) => {
                    result.files_processed += 1;
                    result.bytes += size;
                }
                Err(err) => {
                    log::warn!("remote backup of {relative:?} failed: {err}");
                    result.record_error(relative.display().to_string(), err.kind(), err.to_string());
                }
            }
        }

        Ok(result)
    }

    async fn backup_one_file_remote<S: FrameTransport>(
        &self,
        connection: &mut Connection<S>,
        full_path: &Path,
        relative: &Path,
        options: &BackupOptions,
        max_chunk_size: u32,
    ) -> Result<u64, PipelineError> {
        let file = std::fs::File::open(full_path).map_err(|err| PipelineError::Other(err.into()))?;
        let metadata = file.metadata().map_err(|err| PipelineError::Other(err.into()))?;
        let modified_at = file_modified_at_ms(full_path);

        let chunks = match options.chunking_algorithm {
            ChunkingAlgorithm::Fixed => fixed_chunk_reader(file, options.chunk_size).map_err(PipelineError::Other)?,
            ChunkingAlgorithm::Cdc => {
                cdc_chunk_reader(file, options.cdc_min, options.cdc_avg, options.cdc_max).map_err(PipelineError::Other)?
            }
        };

        let mut hasher = IncrementalHasher::new();
        for chunk in &chunks {
            if chunk.bytes.len() as u32 > max_chunk_size {
                return Err(PipelineError::Other(anyhow::anyhow!(
                    "chunk of {} bytes exceeds peer's max_chunk_size {max_chunk_size}",
                    chunk.bytes.len()
                )));
            }
            hasher.update(&chunk.bytes);
        }
        let file_digest = hasher.finalize();
        let path = relative.to_string_lossy().into_owned();

        let request = FileTransferRequestPayload {
            path: path.clone(),
            size: metadata.len(),
            mtime: modified_at,
            file_digest: file_digest.to_hex(),
            chunk_size: options.chunk_size as u32,
            compression: "zstd".to_string(),
        };
        connection
            .send(MessageType::FileTransferRequest, ACK_REQUIRED, &request.encode())
            .await
            .map_err(PipelineError::Protocol)?;

        let (header, payload) = connection.recv().await.map_err(PipelineError::Protocol)?;
        if header.message_type != MessageType::FileTransferResponse as u8 {
            return Err(PipelineError::Other(anyhow::anyhow!(
                "expected FILE_TRANSFER_RESPONSE, got {:#04x}",
                header.message_type
            )));
        }
        let response = FileTransferResponsePayload::decode(&payload).map_err(PipelineError::Protocol)?;
        if !response.accepted {
            return Err(PipelineError::Other(anyhow::anyhow!(
                "peer rejected transfer of {path}: {}",
                response.reason
            )));
        }

        let mut offset = 0u64;
        let total_size = metadata.len();
        for chunk in &chunks {
            let payload = ChunkDataPayload {
                path: path.clone(),
                chunk_offset: offset,
                chunk_size: chunk.bytes.len() as u32,
                total_size,
                chunk_digest: chunk.digest.to_hex(),
                data: chunk.bytes.clone(),
            };
            connection.send_chunk_with_retry(&payload).await.map_err(PipelineError::Protocol)?;
            offset += chunk.bytes.len() as u64;
        }

        let complete = TransferCompletePayload {
            path,
            total_transferred: offset,
            total_size,
            final_digest: file_digest.to_hex(),
            ok: true,
            error: String::new(),
        };
        connection
            .send(MessageType::TransferComplete, 0, &complete.encode())
            .await
            .map_err(PipelineError::Protocol)?;

        Ok(offset)
    }

    /// Server-side counterpart to `backup_remote`/`backup_one_file_remote`:
    /// drives one client session to completion over an already-accepted
    /// `connection`, applying every streamed file to this pipeline's own
    /// `ContentStore`/`MetadataStore` the same way `backup_local` does.
    /// Returns once the peer closes the connection after its last file.
    pub async fn receive_session<S: FrameTransport>(
        &self,
        connection: &mut Connection<S>,
        server_id: &str,
        snapshot_name: &str,
        description: &str,
        max_chunk_size: u32,
    ) -> Result<PipelineResult, PipelineError> {
        let (header, payload) = connection.recv().await.map_err(PipelineError::Protocol)?;
        if header.message_type != MessageType::Handshake as u8 {
            return Err(PipelineError::Other(anyhow::anyhow!(
                "expected HANDSHAKE, got {:#04x}",
                header.message_type
            )));
        }
        let handshake = HandshakePayload::decode(&payload).map_err(PipelineError::Protocol)?;
        if handshake.protocol_version != PROTOCOL_VERSION {
            return Err(PipelineError::Other(anyhow::anyhow!(
                "client speaks protocol version {}, we speak {}",
                handshake.protocol_version,
                PROTOCOL_VERSION
            )));
        }

        let handshake_response = HandshakeResponsePayload {
            protocol_version: PROTOCOL_VERSION,
            server_id: server_id.to_string(),
            capabilities: 0,
            max_chunk_size,
        };
        connection
            .send(MessageType::HandshakeResponse, RESPONSE, &handshake_response.encode())
            .await
            .map_err(PipelineError::Protocol)?;

        let snapshot = self.metadata.create_snapshot(snapshot_name, description)?;
        let mut result = PipelineResult::new();

        loop {
            let (header, payload) = match connection.recv().await {
                Ok(frame) => frame,
                Err(strongbox_protocol::ProtocolError::Io(ref io_err))
                    if io_err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(err) => {
                    self.metadata.abort_snapshot(snapshot.id)?;
                    return Err(PipelineError::Protocol(err));
                }
            };

            if header.message_type != MessageType::FileTransferRequest as u8 {
                self.metadata.abort_snapshot(snapshot.id)?;
                return Err(PipelineError::Other(anyhow::anyhow!(
                    "expected FILE_TRANSFER_REQUEST, got {:#04x}",
                    header.message_type
                )));
            }
            let request = FileTransferRequestPayload::decode(&payload).map_err(PipelineError::Protocol)?;

            match self.receive_one_file(connection, snapshot.id, &request).await {
                Ok(size) => {
                    result.files_processed += 1;
                    result.bytes += size;
                }
                Err(err) => {
                    log::warn!("receiving {} failed: {err}", request.path);
                    result.record_error(request.path.clone(), err.kind(), err.to_string());
                }
            }
        }

        self.metadata.finalize_snapshot(snapshot.id)?;
        log::info!(
            "received session '{snapshot_name}' done: {} files, {} ({} failed)",
            result.files_processed,
            HumanByte::from(result.bytes),
            result.errors.len(),
        );
        Ok(result)
    }

    async fn receive_one_file<S: FrameTransport>(
        &self,
        connection: &mut Connection<S>,
        snapshot_id: Uuid,
        request: &FileTransferRequestPayload,
    ) -> Result<u64, PipelineError> {
        let accept = FileTransferResponsePayload {
            accepted: true,
            reason: String::new(),
            resume_offset: 0,
            preferred_chunk_size: request.chunk_size,
        };
        connection
            .send(MessageType::FileTransferResponse, RESPONSE, &accept.encode())
            .await
            .map_err(PipelineError::Protocol)?;

        let mut hasher = IncrementalHasher::new();
        let mut chunk_list = Vec::new();
        let mut received = 0u64;

        loop {
            let (header, payload) = connection.recv().await.map_err(PipelineError::Protocol)?;
            match MessageType::from_u8(header.message_type) {
                Some(MessageType::ChunkData) => {
                    let chunk = ChunkDataPayload::decode(&payload).map_err(PipelineError::Protocol)?;
                    let digest = self.content_store.put(&chunk.data)?;
                    let checksum_valid = digest.to_hex() == chunk.chunk_digest;

                    let ack = ChunkAckPayload {
                        path: chunk.path.clone(),
                        chunk_offset: chunk.chunk_offset,
                        chunk_size: chunk.chunk_size,
                        checksum_valid,
                        error: if checksum_valid {
                            String::new()
                        } else {
                            "digest mismatch".to_string()
                        },
                    };
                    connection
                        .send(MessageType::ChunkAck, RESPONSE, &ack.encode())
                        .await
                        .map_err(PipelineError::Protocol)?;

                    if !checksum_valid {
                        // the sender's `send_chunk_with_retry` resends this same chunk
                        continue;
                    }
                    self.metadata.upsert_chunk(digest, chunk.data.len() as u64)?;
                    hasher.update(&chunk.data);
                    chunk_list.push(digest);
                    received += chunk.data.len() as u64;
                }
                Some(MessageType::TransferComplete) => {
                    let complete = TransferCompletePayload::decode(&payload).map_err(PipelineError::Protocol)?;
                    let file_digest = hasher.finalize();
                    if complete.final_digest != file_digest.to_hex() {
                        return Err(PipelineError::ContentStore(ContentStoreError::IntegrityFailed {
                            digest: complete.final_digest.clone(),
                            detail: format!(
                                "assembled file hashes to {file_digest}, client reported {}",
                                complete.final_digest
                            ),
                        }));
                    }

                    let record = FileRecord {
                        id: Uuid::new_v4(),
                        snapshot_id,
                        path: request.path.clone(),
                        size: received,
                        modified_at: request.mtime,
                        file_digest,
                        chunk_list,
                        encryption_mode: self.encryption_mode,
                    };
                    self.metadata.insert_file(&record)?;
                    return Ok(received);
                }
                _ => {
                    return Err(PipelineError::Other(anyhow::anyhow!(
                        "expected CHUNK_DATA or TRANSFER_COMPLETE, got {:#04x}",
                        header.message_type
                    )));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::BackupOptions;
    use std::fs;
    use strongbox_api_types::DatastoreFSyncLevel;
    use strongbox_config::MonotonicClock;
    use strongbox_datastore::ChunkStore;

    fn fixture() -> (tempfile::TempDir, Arc<dyn ContentStore>, Arc<MetadataStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::create(dir.path().join("store"), DatastoreFSyncLevel::None, false).unwrap();
        let metadata = MetadataStore::open_in_memory(Arc::new(MonotonicClock::default()), None).unwrap();
        (dir, Arc::new(store), Arc::new(metadata))
    }

    #[test]
    fn backs_up_two_files_and_finalizes_snapshot() {
        let (dir, content_store, metadata) = fixture();
        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), b"hello").unwrap();
        fs::write(source.join("b.bin"), vec![0u8; 1024 * 1024]).unwrap();

        let pipeline = BackupPipeline::new(content_store.clone(), metadata.clone(), CryptMode::None);
        let options = BackupOptions {
            chunking_algorithm: ChunkingAlgorithm::Fixed,
            chunk_size: 4 * 1024 * 1024,
            ..Default::default()
        };

        let result = pipeline.backup_local(&source, "s1", "", &options).unwrap();
        assert!(result.success);
        assert_eq!(result.files_processed, 2);
        assert_eq!(result.bytes, 5 + 1024 * 1024);

        let snapshots = metadata.list_snapshots().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].total_files, 2);
        assert_eq!(content_store.count().unwrap(), 2);
    }

    #[test]
    fn backing_up_the_same_file_twice_dedups() {
        let (dir, content_store, metadata) = fixture();
        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("same.bin"), vec![7u8; 1024 * 1024]).unwrap();

        let pipeline = BackupPipeline::new(content_store.clone(), metadata.clone(), CryptMode::None);
        let options = BackupOptions {
            chunking_algorithm: ChunkingAlgorithm::Fixed,
            chunk_size: 4 * 1024 * 1024,
            ..Default::default()
        };

        pipeline.backup_local(&source, "first", "", &options).unwrap();
        pipeline.backup_local(&source, "second", "", &options).unwrap();

        assert_eq!(content_store.count().unwrap(), 1);

        let snapshots = metadata.list_snapshots().unwrap();
        let files = metadata.list_files(snapshots[0].id).unwrap();
        let chunk = metadata.get_chunk(files[0].chunk_list[0]).unwrap().unwrap();
        assert_eq!(chunk.ref_count, 2);

        metadata.delete_snapshot(snapshots[0].id).unwrap();
        let chunk = metadata.get_chunk(files[0].chunk_list[0]).unwrap().unwrap();
        assert_eq!(chunk.ref_count, 1);
    }

    #[test]
    fn many_files_survive_the_worker_pool() {
        let (dir, content_store, metadata) = fixture();
        let source = dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        for i in 0..40 {
            fs::write(source.join(format!("f{i}.txt")), format!("contents of file {i}")).unwrap();
        }

        let pipeline = BackupPipeline::new(content_store.clone(), metadata.clone(), CryptMode::None);
        let result = pipeline.backup_local(&source, "many", "", &BackupOptions::default()).unwrap();

        assert!(result.success);
        assert_eq!(result.files_processed, 40);
        let snapshots = metadata.list_snapshots().unwrap();
        assert_eq!(metadata.list_files(snapshots[0].id).unwrap().len(), 40);
    }

    #[tokio::test]
    async fn remote_backup_is_received_and_persisted_server_side() {
        let (client_dir, client_store, client_metadata) = fixture();
        let (_server_dir, server_store, server_metadata) = fixture();

        let source = client_dir.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("remote.txt"), b"hello over the wire").unwrap();
        fs::write(source.join("other.bin"), vec![9u8; 200_000]).unwrap();

        let (client_stream, server_stream) = tokio::io::duplex(256 * 1024);
        let mut client_conn = Connection::new(client_stream);
        let mut server_conn = Connection::new(server_stream);

        let server_pipeline = BackupPipeline::new(server_store.clone(), server_metadata.clone(), CryptMode::None);
        let server_task = tokio::spawn(async move {
            server_pipeline
                .receive_session(&mut server_conn, "server-1", "remote-snap", "", 4 * 1024 * 1024)
                .await
        });

        let client_pipeline = BackupPipeline::new(client_store.clone(), client_metadata.clone(), CryptMode::None);
        let options = BackupOptions {
            chunking_algorithm: ChunkingAlgorithm::Fixed,
            chunk_size: 64 * 1024,
            ..Default::default()
        };
        let client_result = client_pipeline
            .backup_remote(&mut client_conn, &source, "client-1", &options)
            .await
            .unwrap();
        drop(client_conn);

        let server_result = server_task.await.unwrap().unwrap();

        assert_eq!(client_result.files_processed, 2);
        assert_eq!(server_result.files_processed, 2);
        assert_eq!(server_result.bytes, client_result.bytes);

        // client-side stores are never touched in remote mode
        assert_eq!(client_store.count().unwrap(), 0);

        let snapshots = server_metadata.list_snapshots().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].name, "remote-snap");
        assert_eq!(snapshots[0].total_files, 2);
        assert!(server_store.count().unwrap() > 0);
    }
}
