use strongbox_api_types::ErrorKind;

/// A failure severe enough to abort the whole pipeline run rather than being
/// recorded against a single file (snapshot creation, directory walk, I/O
/// that can't be attributed to one file).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("metadata store error: {0}")]
    Metadata(#[from] strongbox_metadata::MetadataError),
    #[error("content store error: {0}")]
    ContentStore(#[from] strongbox_datastore::ContentStoreError),
    #[error("protocol error: {0}")]
    Protocol(#[from] strongbox_protocol::ProtocolError),
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Metadata(err) => err.kind(),
            PipelineError::ContentStore(err) => err.kind(),
            PipelineError::Protocol(err) => err.kind(),
            PipelineError::Other(_) => ErrorKind::IoFailed,
        }
    }
}
