pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS snapshots (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL UNIQUE,
    description  TEXT NOT NULL,
    created_at   INTEGER NOT NULL,
    total_files  INTEGER NOT NULL DEFAULT 0,
    total_bytes  INTEGER NOT NULL DEFAULT 0,
    finalized    INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS files (
    id               TEXT PRIMARY KEY,
    snapshot_id      TEXT NOT NULL REFERENCES snapshots(id),
    path             BLOB NOT NULL,
    encryption_mode  TEXT NOT NULL,
    size             INTEGER NOT NULL,
    modified_at      INTEGER NOT NULL,
    file_digest      TEXT NOT NULL,
    chunk_list       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_snapshot ON files(snapshot_id);

CREATE TABLE IF NOT EXISTS chunks (
    digest           TEXT PRIMARY KEY,
    size             INTEGER NOT NULL,
    first_seen_at    INTEGER NOT NULL,
    ref_count        INTEGER NOT NULL,
    last_accessed_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS file_keywords (
    file_id  TEXT NOT NULL REFERENCES files(id),
    token    TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_file_keywords_token ON file_keywords(token);
"#;
