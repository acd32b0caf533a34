use strongbox_api_types::ErrorKind;

/// Failures detected by [`crate::ChunkStore`] / [`crate::EncryptedChunkStore`].
#[derive(Debug, thiserror::Error)]
pub enum ContentStoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("chunk {0} not found")]
    NotFound(String),
    #[error("integrity check failed for chunk {digest}: {detail}")]
    IntegrityFailed { digest: String, detail: String },
    #[error("i/o error: {0}")]
    IoFailed(#[from] std::io::Error),
    #[error("store is closed")]
    Closed,
}

impl ContentStoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ContentStoreError::InvalidInput(_) => ErrorKind::InvalidInput,
            ContentStoreError::NotFound(_) => ErrorKind::NotFound,
            ContentStoreError::IntegrityFailed { .. } => ErrorKind::IntegrityFailed,
            ContentStoreError::IoFailed(_) => ErrorKind::IoFailed,
            ContentStoreError::Closed => ErrorKind::Closed,
        }
    }
}
