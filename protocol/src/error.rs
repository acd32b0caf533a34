use strongbox_api_types::ErrorKind;

/// Failures raised while framing, encoding, or driving a transfer connection.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("bad frame: {0}")]
    InvalidFrame(String),
    #[error("unexpected message {actual:#04x}, expected one of {expected}")]
    UnexpectedMessage { actual: u8, expected: &'static str },
    #[error("peer sent version {0}, we speak {1}")]
    VersionMismatch(u16, u16),
    #[error("chunk checksum mismatch at offset {0}")]
    ChecksumMismatch(u64),
    #[error("transfer timed out")]
    Timeout,
    #[error("peer reported error {code}: {message}")]
    PeerError { code: u32, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::InvalidFrame(_) => ErrorKind::ProtocolError,
            ProtocolError::UnexpectedMessage { .. } => ErrorKind::ProtocolError,
            ProtocolError::VersionMismatch(_, _) => ErrorKind::ProtocolError,
            ProtocolError::ChecksumMismatch(_) => ErrorKind::IntegrityFailed,
            ProtocolError::Timeout => ErrorKind::IoFailed,
            ProtocolError::PeerError { .. } => ErrorKind::ProtocolError,
            ProtocolError::Io(_) => ErrorKind::IoFailed,
        }
    }
}
