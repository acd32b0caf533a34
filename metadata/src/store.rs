use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use strongbox_api_types::{ChunkMetadata, CryptMode, DatastoreStats, Digest, FileRecord, Snapshot};
use strongbox_config::Clock;
use strongbox_tools::CryptConfig;

use crate::error::MetadataError;
use crate::schema::SCHEMA;
use crate::tokenize::tokenize_path;

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Durable, transactional store for snapshots, files, and chunk refcounts,
/// backed by a single SQLite connection serialized behind a mutex (matching
/// spec's "single-writer, multi-reader" contract without needing a
/// connection pool this crate has no use for).
pub struct MetadataStore {
    conn: Mutex<Connection>,
    clock: Arc<dyn Clock>,
    crypt: Option<CryptConfig>,
    closed: AtomicBool,
}

impl MetadataStore {
    pub fn open<P: AsRef<Path>>(
        path: P,
        clock: Arc<dyn Clock>,
        crypt: Option<CryptConfig>,
    ) -> Result<Self, MetadataError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
            crypt,
            closed: AtomicBool::new(false),
        })
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>, crypt: Option<CryptConfig>) -> Result<Self, MetadataError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            clock,
            crypt,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), MetadataError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MetadataError::Closed);
        }
        Ok(())
    }

    /// Runs `f` inside a SQLite transaction, committing on `Ok` and rolling
    /// back on `Err`. This is the store's `begin`/`commit`/`rollback`
    /// contract expressed as rusqlite's closure-scoped idiom rather than a
    /// freestanding handle, since a `rusqlite::Transaction` borrows its
    /// connection and can't outlive a method call without unsafe aliasing.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction) -> Result<T, MetadataError>,
    ) -> Result<T, MetadataError> {
        self.ensure_open()?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    // ---- snapshots ----------------------------------------------------

    /// Inserts a new, not-yet-finalized snapshot row. Invisible to
    /// `get_snapshot`/`list_snapshots` until [`Self::finalize_snapshot`].
    pub fn create_snapshot(&self, name: &str, description: &str) -> Result<Snapshot, MetadataError> {
        self.ensure_open()?;
        let id = Uuid::new_v4();
        let created_at = self.now();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO snapshots (id, name, description, created_at, total_files, total_bytes, finalized)
             VALUES (?1, ?2, ?3, ?4, 0, 0, 0)",
            params![id.to_string(), name, description, created_at as i64],
        )
        .map_err(|err| {
            if is_unique_violation(&err) {
                MetadataError::Conflict(format!("snapshot '{name}' already exists"))
            } else {
                err.into()
            }
        })?;

        Ok(Snapshot {
            id,
            name: name.to_string(),
            description: description.to_string(),
            created_at,
            total_files: 0,
            total_bytes: 0,
        })
    }

    /// Recomputes totals from the `files` table and marks the snapshot visible.
    pub fn finalize_snapshot(&self, id: Uuid) -> Result<Snapshot, MetadataError> {
        self.ensure_open()?;
        let conn = self.conn.lock().unwrap();

        let (total_files, total_bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(size), 0) FROM files WHERE snapshot_id = ?1",
            params![id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let updated = conn.execute(
            "UPDATE snapshots SET finalized = 1, total_files = ?2, total_bytes = ?3 WHERE id = ?1",
            params![id.to_string(), total_files, total_bytes],
        )?;
        if updated == 0 {
            return Err(MetadataError::NotFound(format!("snapshot {id} not found")));
        }

        drop(conn);
        self.get_snapshot_any(id)?
            .ok_or_else(|| MetadataError::NotFound(format!("snapshot {id} not found")))
    }

    /// Deletes a not-yet-finalized snapshot and its files, decrementing any
    /// chunk refcounts those files had already acquired. Used by the backup
    /// pipeline to unwind a failed backup.
    pub fn abort_snapshot(&self, id: Uuid) -> Result<(), MetadataError> {
        self.delete_snapshot_rows(id)
    }

    pub fn get_snapshot(&self, id: Uuid) -> Result<Option<Snapshot>, MetadataError> {
        self.ensure_open()?;
        let conn = self.conn.lock().unwrap();
        Self::query_snapshot(&conn, id, true)
    }

    fn get_snapshot_any(&self, id: Uuid) -> Result<Option<Snapshot>, MetadataError> {
        let conn = self.conn.lock().unwrap();
        Self::query_snapshot(&conn, id, false)
    }

    fn query_snapshot(conn: &Connection, id: Uuid, only_finalized: bool) -> Result<Option<Snapshot>, MetadataError> {
        let sql = if only_finalized {
            "SELECT id, name, description, created_at, total_files, total_bytes FROM snapshots WHERE id = ?1 AND finalized = 1"
        } else {
            "SELECT id, name, description, created_at, total_files, total_bytes FROM snapshots WHERE id = ?1"
        };
        conn.query_row(sql, params![id.to_string()], row_to_snapshot)
            .optional()
            .map_err(Into::into)
    }

    pub fn list_snapshots(&self) -> Result<Vec<Snapshot>, MetadataError> {
        self.ensure_open()?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, description, created_at, total_files, total_bytes
             FROM snapshots WHERE finalized = 1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], row_to_snapshot)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Cascades to the snapshot's files (and their chunk refcounts).
    pub fn delete_snapshot(&self, id: Uuid) -> Result<(), MetadataError> {
        self.delete_snapshot_rows(id)
    }

    fn delete_snapshot_rows(&self, id: Uuid) -> Result<(), MetadataError> {
        self.ensure_open()?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let file_ids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT id FROM files WHERE snapshot_id = ?1")?;
            let rows = stmt.query_map(params![id.to_string()], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        for file_id in &file_ids {
            decrement_chunks_for_file(&tx, file_id)?;
            tx.execute("DELETE FROM file_keywords WHERE file_id = ?1", params![file_id])?;
            tx.execute("DELETE FROM files WHERE id = ?1", params![file_id])?;
        }

        tx.execute("DELETE FROM snapshots WHERE id = ?1", params![id.to_string()])?;
        tx.commit()?;
        Ok(())
    }

    // ---- files ----------------------------------------------------------

    pub fn insert_file(&self, record: &FileRecord) -> Result<(), MetadataError> {
        self.ensure_open()?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        self.insert_file_tx(&tx, record)?;
        tx.commit()?;
        Ok(())
    }

    pub fn insert_files(&self, batch: &[FileRecord]) -> Result<(), MetadataError> {
        self.ensure_open()?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for record in batch {
            self.insert_file_tx(&tx, record)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn insert_file_tx(&self, tx: &rusqlite::Transaction, record: &FileRecord) -> Result<(), MetadataError> {
        let exists: bool = tx.query_row(
            "SELECT 1 FROM snapshots WHERE id = ?1",
            params![record.snapshot_id.to_string()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
        if !exists {
            return Err(MetadataError::InvalidInput(format!(
                "file references unknown snapshot {}",
                record.snapshot_id
            )));
        }

        let path_bytes = self.encode_path(&record.path)?;
        let encryption_mode = if self.crypt.is_some() {
            CryptMode::Encrypt
        } else {
            CryptMode::None
        };
        let chunk_list = serde_json::to_string(&record.chunk_list.iter().map(|d| d.to_hex()).collect::<Vec<_>>())
            .map_err(|err| MetadataError::InvalidInput(err.to_string()))?;

        tx.execute(
            "INSERT INTO files (id, snapshot_id, path, encryption_mode, size, modified_at, file_digest, chunk_list)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id.to_string(),
                record.snapshot_id.to_string(),
                path_bytes,
                format!("{encryption_mode:?}"),
                record.size as i64,
                record.modified_at as i64,
                record.file_digest.to_hex(),
                chunk_list,
            ],
        )?;

        for token in tokenize_path(&record.path) {
            let stored = self.encode_token(&token);
            tx.execute(
                "INSERT INTO file_keywords (file_id, token) VALUES (?1, ?2)",
                params![record.id.to_string(), stored],
            )?;
        }

        Ok(())
    }

    pub fn get_file(&self, id: Uuid) -> Result<Option<FileRecord>, MetadataError> {
        self.ensure_open()?;
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT id, snapshot_id, path, encryption_mode, size, modified_at, file_digest, chunk_list
             FROM files WHERE id = ?1",
            params![id.to_string()],
            |row| self.row_to_file(row),
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_files(&self, snapshot_id: Uuid) -> Result<Vec<FileRecord>, MetadataError> {
        self.ensure_open()?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, snapshot_id, path, encryption_mode, size, modified_at, file_digest, chunk_list
             FROM files WHERE snapshot_id = ?1",
        )?;
        let rows = stmt.query_map(params![snapshot_id.to_string()], |row| self.row_to_file(row))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Replaces an existing file's path/size/digest/chunk_list in place.
    pub fn update_file(&self, record: &FileRecord) -> Result<(), MetadataError> {
        self.ensure_open()?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM file_keywords WHERE file_id = ?1", params![record.id.to_string()])?;

        let path_bytes = self.encode_path(&record.path)?;
        let chunk_list = serde_json::to_string(&record.chunk_list.iter().map(|d| d.to_hex()).collect::<Vec<_>>())
            .map_err(|err| MetadataError::InvalidInput(err.to_string()))?;

        let updated = tx.execute(
            "UPDATE files SET path = ?2, size = ?3, modified_at = ?4, file_digest = ?5, chunk_list = ?6 WHERE id = ?1",
            params![
                record.id.to_string(),
                path_bytes,
                record.size as i64,
                record.modified_at as i64,
                record.file_digest.to_hex(),
                chunk_list,
            ],
        )?;
        if updated == 0 {
            return Err(MetadataError::NotFound(format!("file {} not found", record.id)));
        }

        for token in tokenize_path(&record.path) {
            let stored = self.encode_token(&token);
            tx.execute(
                "INSERT INTO file_keywords (file_id, token) VALUES (?1, ?2)",
                params![record.id.to_string(), stored],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn delete_file(&self, id: Uuid) -> Result<(), MetadataError> {
        self.ensure_open()?;
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let id_str = id.to_string();
        let found = decrement_chunks_for_file(&tx, &id_str)?;
        if !found {
            return Err(MetadataError::NotFound(format!("file {id} not found")));
        }
        tx.execute("DELETE FROM file_keywords WHERE file_id = ?1", params![id_str])?;
        tx.execute("DELETE FROM files WHERE id = ?1", params![id_str])?;

        tx.commit()?;
        Ok(())
    }

    // ---- chunks -----------------------------------------------------------

    /// Increments `ref_count` for an existing chunk row, or inserts a new
    /// one with `ref_count = 1`.
    pub fn upsert_chunk(&self, digest: Digest, size: u32) -> Result<ChunkMetadata, MetadataError> {
        self.ensure_open()?;
        let now = self.now();
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO chunks (digest, size, first_seen_at, ref_count, last_accessed_at)
             VALUES (?1, ?2, ?3, 1, ?3)
             ON CONFLICT(digest) DO UPDATE SET
                ref_count = ref_count + 1,
                last_accessed_at = ?3",
            params![digest.to_hex(), size as i64, now as i64],
        )?;

        query_chunk(&conn, &digest)?.ok_or_else(|| MetadataError::NotFound(digest.to_hex()))
    }

    /// Decrements `ref_count`, saturating at zero. The row is retained even
    /// at zero; GC is what removes the underlying chunk bytes.
    pub fn decrement_chunk(&self, digest: Digest) -> Result<(), MetadataError> {
        self.ensure_open()?;
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE chunks SET ref_count = MAX(ref_count - 1, 0) WHERE digest = ?1",
            params![digest.to_hex()],
        )?;
        if updated == 0 {
            return Err(MetadataError::NotFound(digest.to_hex()));
        }
        Ok(())
    }

    pub fn record_access(&self, digest: Digest) -> Result<(), MetadataError> {
        self.ensure_open()?;
        let now = self.now();
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE chunks SET last_accessed_at = ?2 WHERE digest = ?1",
            params![digest.to_hex(), now as i64],
        )?;
        if updated == 0 {
            return Err(MetadataError::NotFound(digest.to_hex()));
        }
        Ok(())
    }

    pub fn get_chunk(&self, digest: Digest) -> Result<Option<ChunkMetadata>, MetadataError> {
        self.ensure_open()?;
        let conn = self.conn.lock().unwrap();
        query_chunk(&conn, &digest)
    }

    /// Fails with `Conflict` if the chunk still has live references.
    pub fn delete_chunk(&self, digest: Digest) -> Result<(), MetadataError> {
        self.ensure_open()?;
        let conn = self.conn.lock().unwrap();
        let ref_count: Option<i64> = conn
            .query_row("SELECT ref_count FROM chunks WHERE digest = ?1", params![digest.to_hex()], |row| row.get(0))
            .optional()?;
        match ref_count {
            None => Err(MetadataError::NotFound(digest.to_hex())),
            Some(n) if n > 0 => Err(MetadataError::Conflict(format!(
                "chunk {digest} still has {n} live references"
            ))),
            Some(_) => {
                conn.execute("DELETE FROM chunks WHERE digest = ?1", params![digest.to_hex()])?;
                Ok(())
            }
        }
    }

    /// Snapshot of every chunk digest with `ref_count > 0`, suitable as the
    /// `live_set` argument to `ContentStore::gc`. Captured under the same
    /// connection mutex every writer serializes through, so it's consistent
    /// with any write that has already committed.
    pub fn live_chunk_digests(&self) -> Result<HashSet<Digest>, MetadataError> {
        self.ensure_open()?;
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT digest FROM chunks WHERE ref_count > 0")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut set = HashSet::new();
        for hex in rows {
            let hex = hex?;
            let digest: Digest = hex.parse().map_err(|err: anyhow::Error| MetadataError::InvalidInput(err.to_string()))?;
            set.insert(digest);
        }
        Ok(set)
    }

    // ---- search & stats -----------------------------------------------------

    /// Tokenises `query` identically to how paths were tokenised at insert
    /// time and returns every file matching at least one token.
    pub fn search_files(&self, query: &str) -> Result<Vec<FileRecord>, MetadataError> {
        self.ensure_open()?;
        let tokens = tokenize_path(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().unwrap();
        let encoded: Vec<String> = tokens.iter().map(|t| self.encode_token(t)).collect();
        let placeholders = encoded.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "SELECT DISTINCT f.id, f.snapshot_id, f.path, f.encryption_mode, f.size, f.modified_at, f.file_digest, f.chunk_list
             FROM files f JOIN file_keywords k ON k.file_id = f.id
             WHERE k.token IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> = encoded.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(params.as_slice(), |row| self.row_to_file(row))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn stats(&self) -> Result<DatastoreStats, MetadataError> {
        self.ensure_open()?;
        let conn = self.conn.lock().unwrap();
        let snapshot_count: i64 = conn.query_row("SELECT COUNT(*) FROM snapshots WHERE finalized = 1", [], |r| r.get(0))?;
        let file_count: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        let chunk_count: i64 = conn.query_row("SELECT COUNT(*) FROM chunks", [], |r| r.get(0))?;
        let total_bytes: i64 = conn.query_row("SELECT COALESCE(SUM(total_bytes), 0) FROM snapshots WHERE finalized = 1", [], |r| r.get(0))?;
        Ok(DatastoreStats {
            snapshot_count: snapshot_count as u64,
            file_count: file_count as u64,
            chunk_count: chunk_count as u64,
            total_bytes: total_bytes as u64,
        })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    // ---- path/token encoding --------------------------------------------

    fn encode_path(&self, path: &str) -> Result<Vec<u8>, MetadataError> {
        match &self.crypt {
            Some(crypt) => crypt
                .encrypt_random(path.as_bytes())
                .map_err(|err| MetadataError::InvalidInput(err.to_string())),
            None => Ok(path.as_bytes().to_vec()),
        }
    }

    fn decode_path(&self, raw: &[u8]) -> Result<String, MetadataError> {
        match &self.crypt {
            Some(crypt) => {
                let plain = crypt
                    .decrypt_random(raw)
                    .map_err(|err| MetadataError::InvalidInput(err.to_string()))?;
                String::from_utf8(plain).map_err(|err| MetadataError::InvalidInput(err.to_string()))
            }
            None => String::from_utf8(raw.to_vec()).map_err(|err| MetadataError::InvalidInput(err.to_string())),
        }
    }

    /// Blind-index token for `token`: a keyed digest when encryption is
    /// enabled (so the stored keyword doesn't leak the plaintext path),
    /// the bare lowercase token otherwise.
    fn encode_token(&self, token: &str) -> String {
        match &self.crypt {
            Some(crypt) => hex::encode(crypt.compute_digest(token.as_bytes())),
            None => token.to_string(),
        }
    }

    fn row_to_file(&self, row: &rusqlite::Row) -> rusqlite::Result<FileRecord> {
        let id: String = row.get(0)?;
        let snapshot_id: String = row.get(1)?;
        let path_raw: Vec<u8> = row.get(2)?;
        let _encryption_mode: String = row.get(3)?;
        let size: i64 = row.get(4)?;
        let modified_at: i64 = row.get(5)?;
        let file_digest: String = row.get(6)?;
        let chunk_list: String = row.get(7)?;

        let path = self.decode_path(&path_raw).unwrap_or_default();
        let chunk_hexes: Vec<String> = serde_json::from_str(&chunk_list).unwrap_or_default();
        let chunk_list = chunk_hexes
            .into_iter()
            .filter_map(|h| h.parse::<Digest>().ok())
            .collect();

        Ok(FileRecord {
            id: id.parse().unwrap_or_default(),
            snapshot_id: snapshot_id.parse().unwrap_or_default(),
            path,
            size: size as u64,
            modified_at: modified_at as u64,
            file_digest: file_digest.parse().unwrap_or(Digest::new([0u8; 32])),
            chunk_list,
            encryption_mode: if self.crypt.is_some() { CryptMode::Encrypt } else { CryptMode::None },
        })
    }
}

fn row_to_snapshot(row: &rusqlite::Row) -> rusqlite::Result<Snapshot> {
    let id: String = row.get(0)?;
    let name: String = row.get(1)?;
    let description: String = row.get(2)?;
    let created_at: i64 = row.get(3)?;
    let total_files: i64 = row.get(4)?;
    let total_bytes: i64 = row.get(5)?;

    Ok(Snapshot {
        id: id.parse().unwrap_or_default(),
        name,
        description,
        created_at: created_at as u64,
        total_files: total_files as u64,
        total_bytes: total_bytes as u64,
    })
}

fn query_chunk(conn: &Connection, digest: &Digest) -> Result<Option<ChunkMetadata>, MetadataError> {
    conn.query_row(
        "SELECT digest, size, first_seen_at, ref_count, last_accessed_at FROM chunks WHERE digest = ?1",
        params![digest.to_hex()],
        |row| {
            let digest_hex: String = row.get(0)?;
            let size: i64 = row.get(1)?;
            let first_seen_at: i64 = row.get(2)?;
            let ref_count: i64 = row.get(3)?;
            let last_accessed_at: i64 = row.get(4)?;
            Ok(ChunkMetadata {
                digest: digest_hex.parse().unwrap_or(Digest::new([0u8; 32])),
                size: size as u32,
                first_seen_at: first_seen_at as u64,
                ref_count: ref_count as u64,
                last_accessed_at: last_accessed_at as u64,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

/// Decrements `ref_count` for every chunk listed in `file_id`'s chunk_list.
/// Returns whether the file row existed.
fn decrement_chunks_for_file(tx: &rusqlite::Transaction, file_id: &str) -> Result<bool, MetadataError> {
    let chunk_list: Option<String> = tx
        .query_row("SELECT chunk_list FROM files WHERE id = ?1", params![file_id], |row| row.get(0))
        .optional()?;

    let Some(chunk_list) = chunk_list else {
        return Ok(false);
    };

    let hexes: Vec<String> = serde_json::from_str(&chunk_list).unwrap_or_default();
    for hex in hexes {
        tx.execute(
            "UPDATE chunks SET ref_count = MAX(ref_count - 1, 0) WHERE digest = ?1",
            params![hex],
        )?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strongbox_config::MonotonicClock;

    fn store() -> MetadataStore {
        MetadataStore::open_in_memory(Arc::new(MonotonicClock::default()), None).unwrap()
    }

    fn sample_file(snapshot_id: Uuid, path: &str) -> FileRecord {
        FileRecord {
            id: Uuid::new_v4(),
            snapshot_id,
            path: path.to_string(),
            size: 128,
            modified_at: 0,
            file_digest: Digest::new([3u8; 32]),
            chunk_list: vec![Digest::new([1u8; 32]), Digest::new([2u8; 32])],
            encryption_mode: CryptMode::None,
        }
    }

    #[test]
    fn draft_snapshot_is_invisible_until_finalized() {
        let store = store();
        let draft = store.create_snapshot("daily", "nightly run").unwrap();

        assert!(store.get_snapshot(draft.id).unwrap().is_none());
        assert!(store.list_snapshots().unwrap().is_empty());

        let file = sample_file(draft.id, "/etc/hosts");
        store.insert_file(&file).unwrap();
        store.upsert_chunk(Digest::new([1u8; 32]), 64).unwrap();
        store.upsert_chunk(Digest::new([2u8; 32]), 64).unwrap();

        let finalized = store.finalize_snapshot(draft.id).unwrap();
        assert_eq!(finalized.total_files, 1);
        assert_eq!(finalized.total_bytes, 128);
        assert!(store.get_snapshot(draft.id).unwrap().is_some());
        assert_eq!(store.list_snapshots().unwrap().len(), 1);
    }

    #[test]
    fn aborting_a_draft_decrements_its_chunks() {
        let store = store();
        let draft = store.create_snapshot("aborted", "").unwrap();

        let meta = store.upsert_chunk(Digest::new([1u8; 32]), 64).unwrap();
        assert_eq!(meta.ref_count, 1);

        let file = sample_file(draft.id, "/tmp/a");
        store.insert_file(&file).unwrap();
        store.abort_snapshot(draft.id).unwrap();

        let meta = store.get_chunk(Digest::new([1u8; 32])).unwrap().unwrap();
        assert_eq!(meta.ref_count, 0);
        assert!(store.get_file(file.id).unwrap().is_none());
    }

    #[test]
    fn duplicate_snapshot_name_conflicts() {
        let store = store();
        store.create_snapshot("daily", "").unwrap();
        let err = store.create_snapshot("daily", "").unwrap_err();
        assert_eq!(err.kind(), strongbox_api_types::ErrorKind::Conflict);
    }

    #[test]
    fn upsert_chunk_increments_ref_count_on_duplicate() {
        let store = store();
        let digest = Digest::new([5u8; 32]);
        store.upsert_chunk(digest, 32).unwrap();
        let meta = store.upsert_chunk(digest, 32).unwrap();
        assert_eq!(meta.ref_count, 2);
    }

    #[test]
    fn delete_chunk_fails_while_referenced() {
        let store = store();
        let digest = Digest::new([6u8; 32]);
        store.upsert_chunk(digest, 32).unwrap();
        let err = store.delete_chunk(digest).unwrap_err();
        assert_eq!(err.kind(), strongbox_api_types::ErrorKind::Conflict);

        store.decrement_chunk(digest).unwrap();
        store.delete_chunk(digest).unwrap();
        assert!(store.get_chunk(digest).unwrap().is_none());
    }

    #[test]
    fn search_matches_any_token() {
        let store = store();
        let draft = store.create_snapshot("search", "").unwrap();
        let a = sample_file(draft.id, "/var/log/app-server_1.log");
        let b = sample_file(draft.id, "/var/log/other.log");
        store.insert_file(&a).unwrap();
        store.insert_file(&b).unwrap();

        let hits = store.search_files("server").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a.id);

        let hits = store.search_files("log").unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn live_chunk_digests_excludes_zero_refcount() {
        let store = store();
        let a = Digest::new([7u8; 32]);
        let b = Digest::new([8u8; 32]);
        store.upsert_chunk(a, 16).unwrap();
        store.upsert_chunk(b, 16).unwrap();
        store.decrement_chunk(b).unwrap();

        let live = store.live_chunk_digests().unwrap();
        assert!(live.contains(&a));
        assert!(!live.contains(&b));
    }

    #[test]
    fn stats_reports_finalized_totals() {
        let store = store();
        let draft = store.create_snapshot("stats", "").unwrap();
        let file = sample_file(draft.id, "/a/b");
        store.insert_file(&file).unwrap();
        store.upsert_chunk(Digest::new([1u8; 32]), 64).unwrap();
        store.upsert_chunk(Digest::new([2u8; 32]), 64).unwrap();
        store.finalize_snapshot(draft.id).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.snapshot_count, 1);
        assert_eq!(stats.file_count, 1);
        assert_eq!(stats.chunk_count, 2);
        assert_eq!(stats.total_bytes, 128);
    }

    #[test]
    fn encrypted_store_hides_the_path_but_still_finds_it_by_token() {
        let crypt = CryptConfig::new([9u8; 32]).unwrap();
        let store = MetadataStore::open_in_memory(Arc::new(MonotonicClock::default()), Some(crypt)).unwrap();

        let draft = store.create_snapshot("encrypted", "").unwrap();
        let file = sample_file(draft.id, "/home/alice/secret-plans.txt");
        store.insert_file(&file).unwrap();

        let raw_path: Vec<u8> = store
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT path FROM files WHERE id = ?1", params![file.id.to_string()], |row| row.get(0))
            .unwrap();
        assert!(!String::from_utf8_lossy(&raw_path).contains("secret-plans"));

        let raw_token: String = store
            .conn
            .lock()
            .unwrap()
            .query_row(
                "SELECT token FROM file_keywords WHERE file_id = ?1 LIMIT 1",
                params![file.id.to_string()],
                |row| row.get(0),
            )
            .unwrap();
        assert_ne!(raw_token, "alice");

        let hits = store.search_files("secret-plans").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, file.id);
        assert_eq!(hits[0].path, file.path);
    }
}
