use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Error};

use strongbox_api_types::{DatastoreFSyncLevel, Digest, GarbageCollectionStatus};
use strongbox_tools::ProcessLocker;

use crate::data_blob::DataBlob;
use crate::error::ContentStoreError;
use crate::hasher::hash_bytes;

const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

fn digest_to_rel_path(digest: &Digest) -> PathBuf {
    let hex = digest.to_hex();
    let mut path = PathBuf::new();
    path.push(&hex[0..2]);
    path.push(&hex[2..]);
    path
}

/// Content-addressed, deduplicating, filesystem-backed chunk store.
///
/// Lays out chunks under `<base>/chunks/<d0d1>/<remaining 62 hex chars>`
/// (fan-out on the digest's first byte) and maintains `<base>/index.txt` as
/// an append-only `"<hex>\t<decoded size>"` log that is the fast-path source
/// of truth for membership; on open, if the index is missing or unreadable
/// the tree itself is rescanned to rebuild it.
pub struct ChunkStore {
    base: PathBuf,
    chunks_dir: PathBuf,
    sync_level: DatastoreFSyncLevel,
    compress: bool,
    locker: Arc<Mutex<ProcessLocker>>,
    index: Mutex<HashMap<Digest, u64>>,
    closed: AtomicBool,
}

impl ChunkStore {
    fn chunks_dir(base: &Path) -> PathBuf {
        base.join("chunks")
    }

    fn index_path(base: &Path) -> PathBuf {
        base.join("index.txt")
    }

    fn lock_path(base: &Path) -> PathBuf {
        base.join(".lock")
    }

    /// Creates the directory layout (256 fan-out subdirectories, lock file,
    /// empty index) and opens it.
    pub fn create<P: Into<PathBuf>>(
        base: P,
        sync_level: DatastoreFSyncLevel,
        compress: bool,
    ) -> Result<Self, Error> {
        let base: PathBuf = base.into();
        std::fs::create_dir_all(&base)?;

        let chunks_dir = Self::chunks_dir(&base);
        std::fs::create_dir_all(&chunks_dir)?;

        for hi in 0..=0xffu32 {
            let subdir = chunks_dir.join(format!("{hi:02x}"));
            std::fs::create_dir_all(&subdir)?;
        }

        let index_path = Self::index_path(&base);
        if !index_path.exists() {
            std::fs::File::create(&index_path)?;
        }

        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(Self::lock_path(&base))?;

        Self::open(base, sync_level, compress)
    }

    /// Opens an existing store, loading (or rebuilding) its index.
    pub fn open<P: Into<PathBuf>>(
        base: P,
        sync_level: DatastoreFSyncLevel,
        compress: bool,
    ) -> Result<Self, Error> {
        let base: PathBuf = base.into();
        let chunks_dir = Self::chunks_dir(&base);

        if std::fs::metadata(&chunks_dir).is_err() {
            bail!("unable to open chunk store at {base:?}: no chunks directory");
        }

        let locker = ProcessLocker::new(Self::lock_path(&base))?;

        let index = match Self::load_index(&Self::index_path(&base)) {
            Ok(index) => index,
            Err(_) => Self::rebuild_index(&chunks_dir)?,
        };

        Ok(Self {
            base,
            chunks_dir,
            sync_level,
            compress,
            locker,
            index: Mutex::new(index),
            closed: AtomicBool::new(false),
        })
    }

    fn load_index(path: &Path) -> Result<HashMap<Digest, u64>, Error> {
        let content = std::fs::read_to_string(path)?;
        let mut map = HashMap::new();
        for line in content.lines() {
            let Some((hex, size)) = line.split_once('\t') else {
                continue;
            };
            let digest: Digest = hex.parse()?;
            let size: u64 = size.parse()?;
            map.insert(digest, size);
        }
        Ok(map)
    }

    fn rebuild_index(chunks_dir: &Path) -> Result<HashMap<Digest, u64>, Error> {
        let mut map = HashMap::new();
        for hi in std::fs::read_dir(chunks_dir)? {
            let hi = hi?;
            if !hi.file_type()?.is_dir() {
                continue;
            }
            for entry in std::fs::read_dir(hi.path())? {
                let entry = entry?;
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                let Ok(hex) = format!("{}{}", hi.file_name().to_string_lossy(), name).parse::<Digest>()
                else {
                    continue;
                };
                if let Ok(raw) = std::fs::read(entry.path()) {
                    if let Ok(decoded) = DataBlob::decode(&raw) {
                        map.insert(hex, decoded.len() as u64);
                    }
                }
            }
        }
        Ok(map)
    }

    fn append_index_entry(&self, digest: &Digest, size: u64) -> Result<(), Error> {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(Self::index_path(&self.base))?;
        writeln!(file, "{}\t{}", digest.to_hex(), size)?;
        if self.sync_level == DatastoreFSyncLevel::File {
            file.sync_all()?;
        }
        Ok(())
    }

    fn chunk_path(&self, digest: &Digest) -> PathBuf {
        self.chunks_dir.join(digest_to_rel_path(digest))
    }

    fn ensure_open(&self) -> Result<(), ContentStoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ContentStoreError::Closed);
        }
        Ok(())
    }

    /// Stores `bytes`, returning its digest. Idempotent: a second `put` of
    /// the same bytes is a no-op besides returning the same digest.
    pub fn put(&self, bytes: &[u8]) -> Result<Digest, ContentStoreError> {
        self.ensure_open()?;

        if bytes.is_empty() {
            return Err(ContentStoreError::InvalidInput("chunk bytes must be non-empty".into()));
        }
        if bytes.len() > MAX_CHUNK_SIZE {
            return Err(ContentStoreError::InvalidInput(format!(
                "chunk of {} bytes exceeds MAX_CHUNK_SIZE {MAX_CHUNK_SIZE}",
                bytes.len()
            )));
        }

        let digest = hash_bytes(bytes);

        {
            let index = self.index.lock().unwrap();
            if index.contains_key(&digest) {
                return Ok(digest);
            }
        }

        let path = self.chunk_path(&digest);
        let dir = path.parent().expect("chunk path always has a parent");

        let blob = DataBlob::encode(bytes, self.compress)
            .map_err(|err| ContentStoreError::InvalidInput(err.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(blob.raw_data())?;
        if self.sync_level == DatastoreFSyncLevel::File {
            tmp.as_file().sync_all()?;
        }

        // Double-checked: if a concurrent writer already landed this digest,
        // persist() into the winner's place is still safe (same bytes), but
        // we skip redundant work by checking again right before the rename.
        let mut index = self.index.lock().unwrap();
        if index.contains_key(&digest) {
            return Ok(digest);
        }

        match tmp.persist(&path) {
            Ok(_) => {}
            Err(err) if path.exists() => {
                // lost the race to another process/thread; that's fine.
                drop(err);
            }
            Err(err) => return Err(ContentStoreError::IoFailed(err.error)),
        }

        if self.sync_level == DatastoreFSyncLevel::File {
            let dir_handle = std::fs::File::open(dir)?;
            dir_handle.sync_all()?;
        }

        index.insert(digest, bytes.len() as u64);
        drop(index);

        self.append_index_entry(&digest, bytes.len() as u64)
            .map_err(|err| ContentStoreError::IoFailed(std::io::Error::new(std::io::ErrorKind::Other, err)))?;

        Ok(digest)
    }

    /// Retrieves the bytes stored under `digest`, rehashing them first.
    /// Any mismatch is `IntegrityFailed`, never silently recovered.
    pub fn get(&self, digest: &Digest) -> Result<Vec<u8>, ContentStoreError> {
        self.ensure_open()?;

        if !self.index.lock().unwrap().contains_key(digest) {
            return Err(ContentStoreError::NotFound(digest.to_hex()));
        }

        let path = self.chunk_path(digest);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ContentStoreError::NotFound(digest.to_hex()));
            }
            Err(err) => return Err(ContentStoreError::IoFailed(err)),
        };

        let decoded = DataBlob::decode(&raw).map_err(|err| ContentStoreError::IntegrityFailed {
            digest: digest.to_hex(),
            detail: err.to_string(),
        })?;

        let actual = hash_bytes(&decoded);
        if &actual != digest {
            return Err(ContentStoreError::IntegrityFailed {
                digest: digest.to_hex(),
                detail: format!("rehash produced {actual}, expected {digest}"),
            });
        }

        Ok(decoded)
    }

    pub fn exists(&self, digest: &Digest) -> Result<bool, ContentStoreError> {
        self.ensure_open()?;
        Ok(self.index.lock().unwrap().contains_key(digest))
    }

    pub fn count(&self) -> Result<usize, ContentStoreError> {
        self.ensure_open()?;
        Ok(self.index.lock().unwrap().len())
    }

    pub fn total_bytes(&self) -> Result<u64, ContentStoreError> {
        self.ensure_open()?;
        Ok(self.index.lock().unwrap().values().sum())
    }

    /// Removes every stored chunk whose digest is absent from `live_set`.
    ///
    /// Takes an exclusive process lock for the duration of the sweep so a
    /// concurrent `gc` in another process can't race this one; concurrent
    /// `put`s from this same store are serialized through `self.index`'s
    /// mutex as usual and are safe as long as `live_set` is a snapshot of
    /// a reachable superset (see module docs on the caller's obligation).
    pub fn gc(&self, live_set: &HashSet<Digest>) -> Result<GarbageCollectionStatus, ContentStoreError> {
        self.ensure_open()?;

        let _guard = ProcessLocker::try_exclusive_lock(self.locker.clone())
            .map_err(|err| ContentStoreError::IoFailed(std::io::Error::new(std::io::ErrorKind::WouldBlock, err)))?;

        let mut index = self.index.lock().unwrap();

        let disk_chunks = index.len();
        let disk_bytes = index.values().sum();

        let mut removed_chunks = 0usize;
        let mut removed_bytes = 0u64;

        let stale: Vec<Digest> = index.keys().filter(|d| !live_set.contains(d)).copied().collect();

        for digest in stale {
            let size = index.remove(&digest).unwrap_or(0);
            let path = self.chunk_path(&digest);
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    removed_chunks += 1;
                    removed_bytes += size;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(ContentStoreError::IoFailed(err)),
            }
        }

        if removed_chunks > 0 {
            self.rewrite_index(&index)
                .map_err(|err| ContentStoreError::IoFailed(std::io::Error::new(std::io::ErrorKind::Other, err)))?;
        }

        Ok(GarbageCollectionStatus {
            disk_chunks,
            disk_bytes,
            removed_chunks,
            removed_bytes,
        })
    }

    fn rewrite_index(&self, index: &HashMap<Digest, u64>) -> Result<(), Error> {
        let path = Self::index_path(&self.base);
        let tmp_dir = path.parent().context("index path has no parent")?;
        let mut tmp = tempfile::NamedTempFile::new_in(tmp_dir)?;
        for (digest, size) in index.iter() {
            writeln!(tmp, "{}\t{}", digest.to_hex(), size)?;
        }
        if self.sync_level == DatastoreFSyncLevel::File {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(&path)?;
        Ok(())
    }

    /// Flushes and releases handles. Every subsequent operation fails `Closed`.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn base_path(&self) -> &Path {
        &self.base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store(name: &str) -> ChunkStore {
        let mut path = std::env::temp_dir();
        path.push(format!("strongbox-test-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&path);
        ChunkStore::create(&path, DatastoreFSyncLevel::None, false).unwrap()
    }

    #[test]
    fn put_get_roundtrip() {
        let store = test_store("roundtrip");
        let digest = store.put(b"hello chunk store").unwrap();
        let data = store.get(&digest).unwrap();
        assert_eq!(data, b"hello chunk store");
    }

    #[test]
    fn put_is_idempotent() {
        let store = test_store("idempotent");
        let d1 = store.put(b"same bytes").unwrap();
        let d2 = store.put(b"same bytes").unwrap();
        assert_eq!(d1, d2);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn get_missing_is_not_found() {
        let store = test_store("missing");
        let bogus = hash_bytes(b"never stored");
        assert!(matches!(store.get(&bogus), Err(ContentStoreError::NotFound(_))));
    }

    #[test]
    fn empty_put_is_invalid_input() {
        let store = test_store("empty");
        assert!(matches!(store.put(b""), Err(ContentStoreError::InvalidInput(_))));
    }

    #[test]
    fn gc_removes_only_dead_chunks() {
        let store = test_store("gc");
        let live = store.put(b"keep me").unwrap();
        let dead = store.put(b"remove me").unwrap();

        let mut live_set = HashSet::new();
        live_set.insert(live);

        let status = store.gc(&live_set).unwrap();
        assert_eq!(status.removed_chunks, 1);
        assert!(store.exists(&live).unwrap());
        assert!(!store.exists(&dead).unwrap());
    }

    #[test]
    fn closed_store_rejects_operations() {
        let store = test_store("closed");
        store.close();
        assert!(matches!(store.put(b"x"), Err(ContentStoreError::Closed)));
    }
}
