use strongbox_api_types::ErrorKind;

/// Failures detected by [`crate::MetadataStore`].
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    IoFailed(#[from] rusqlite::Error),
    #[error("store is closed")]
    Closed,
}

impl MetadataError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetadataError::InvalidInput(_) => ErrorKind::InvalidInput,
            MetadataError::NotFound(_) => ErrorKind::NotFound,
            MetadataError::Conflict(_) => ErrorKind::Conflict,
            MetadataError::IoFailed(_) => ErrorKind::IoFailed,
            MetadataError::Closed => ErrorKind::Closed,
        }
    }
}
