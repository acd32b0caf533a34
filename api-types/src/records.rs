use serde::{Deserialize, Serialize};

use crate::{CryptMode, Digest};

/// Metadata about a single chunk, keyed by its content digest.
///
/// `ref_count` counts the files (across all snapshots) currently
/// referencing this chunk; a chunk with `ref_count == 0` is retained but
/// becomes eligible for the next GC sweep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub digest: Digest,
    pub size: u32,
    pub first_seen_at: u64,
    pub ref_count: u64,
    pub last_accessed_at: u64,
}

/// One file within a snapshot: its path, its content digest, and the
/// ordered list of chunk digests whose concatenation reproduces its bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: uuid::Uuid,
    pub snapshot_id: uuid::Uuid,
    pub path: String,
    pub size: u64,
    pub modified_at: u64,
    pub file_digest: Digest,
    pub chunk_list: Vec<Digest>,
    /// Whether `path` is stored in plaintext or AEAD ciphertext in the
    /// metadata store. Lets legacy plaintext rows coexist during a
    /// migration to an encrypted store.
    #[serde(default)]
    pub encryption_mode: CryptMode,
}

/// A named, point-in-time collection of files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: uuid::Uuid,
    pub name: String,
    pub description: String,
    pub created_at: u64,
    pub total_files: u64,
    pub total_bytes: u64,
}

/// Aggregate totals returned by `MetadataStore::stats`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatastoreStats {
    pub snapshot_count: u64,
    pub file_count: u64,
    pub chunk_count: u64,
    pub total_bytes: u64,
}
