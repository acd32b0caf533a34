use strongbox_api_types::ChunkingAlgorithm;

/// Knobs for a single `BackupPipeline` run, distinct from `StrongboxConfig`
/// because a caller may want different chunking per run against one
/// long-lived store (e.g. a one-off FIXED backup of an already-CDC store).
#[derive(Clone, Debug)]
pub struct BackupOptions {
    pub chunking_algorithm: ChunkingAlgorithm,
    pub chunk_size: usize,
    pub cdc_min: usize,
    pub cdc_avg: usize,
    pub cdc_max: usize,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            chunking_algorithm: ChunkingAlgorithm::Cdc,
            chunk_size: 1024 * 1024,
            cdc_min: 512 * 1024,
            cdc_avg: 1024 * 1024,
            cdc_max: 4 * 1024 * 1024,
        }
    }
}

/// What to do when a restored file's whole-file digest doesn't match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnIntegrityError {
    /// Stop restoring further files and return what's been done so far.
    Abort,
    /// Record the failure for this file and continue with the rest.
    SkipFile,
}

impl Default for OnIntegrityError {
    fn default() -> Self {
        OnIntegrityError::SkipFile
    }
}

#[derive(Clone, Debug)]
pub struct RestoreOptions {
    pub overwrite_existing: bool,
    pub on_integrity_error: OnIntegrityError,
    pub preserve_attributes: bool,
    /// Re-hash the assembled file and compare it to `file_digest`. The
    /// per-chunk digest is always verified by `ContentStore::get`; this is
    /// the additional whole-file check spec'd alongside it.
    pub verify_whole_file: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            overwrite_existing: false,
            on_integrity_error: OnIntegrityError::SkipFile,
            preserve_attributes: false,
            verify_whole_file: true,
        }
    }
}
