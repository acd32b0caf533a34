use serde::{Deserialize, Serialize};

/// How aggressively the chunk store fsyncs new chunk files.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatastoreFSyncLevel {
    /// Rely on the OS page cache, no explicit fsync.
    #[default]
    None,
    /// fsync the chunk file (and its parent directory) after each write.
    File,
}

/// Chunking strategy selectable at backup time.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkingAlgorithm {
    /// Fixed-size chunks, trailing chunk may be shorter.
    Fixed,
    /// Content-defined chunking (buzhash rolling-hash boundaries).
    Cdc,
}

impl Default for ChunkingAlgorithm {
    fn default() -> Self {
        ChunkingAlgorithm::Cdc
    }
}

/// Result of a `ContentStore::gc` pass.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct GarbageCollectionStatus {
    /// Number of chunks present before the sweep.
    pub disk_chunks: usize,
    /// Bytes present before the sweep.
    pub disk_bytes: u64,
    /// Number of chunks removed.
    pub removed_chunks: usize,
    /// Bytes removed.
    pub removed_bytes: u64,
}
