use serde::{Deserialize, Serialize};

/// Error taxonomy shared across the core crates (spec: error handling design).
///
/// Each crate defines its own `thiserror` error type for the failures it can
/// detect; this tag is what gets attached to user-visible results (e.g. the
/// per-file errors in [`crate::BackupResult`]) so callers can branch on
/// *kind* without depending on every crate's concrete error type.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Malformed input: empty/oversized buffer, bad digest hex, path too long.
    InvalidInput,
    /// Requested chunk/snapshot/file does not exist.
    NotFound,
    /// Re-hash, AEAD tag, or wire checksum mismatch. Never silently retried.
    IntegrityFailed,
    /// Duplicate snapshot name, concurrent restore already in progress.
    Conflict,
    /// Disk or network I/O failure.
    IoFailed,
    /// Operation attempted after `close()`.
    Closed,
    /// Malformed wire frame (bad magic/version/type, truncated payload).
    ProtocolError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::NotFound => "not-found",
            ErrorKind::IntegrityFailed => "integrity-failed",
            ErrorKind::Conflict => "conflict",
            ErrorKind::IoFailed => "io-failed",
            ErrorKind::Closed => "closed",
            ErrorKind::ProtocolError => "protocol-error",
        };
        f.write_str(s)
    }
}
