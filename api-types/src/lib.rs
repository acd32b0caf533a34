//! Plain-data types shared by every strongbox crate: the content digest,
//! crypto/chunking mode enums, and small display helpers. No I/O, no logic
//! beyond parsing/formatting.

mod crypto;
mod datastore;
mod digest;
mod error;
mod human_byte;
mod records;

pub use crypto::{CryptMode, Fingerprint, Kdf};
pub use datastore::{ChunkingAlgorithm, DatastoreFSyncLevel, GarbageCollectionStatus};
pub use digest::Digest;
pub use error::ErrorKind;
pub use human_byte::HumanByte;
pub use records::{ChunkMetadata, DatastoreStats, FileRecord, Snapshot};
