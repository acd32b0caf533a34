//! Length-prefixed binary framing for backup transfers, usable over any
//! ordered reliable stream (`tokio::net::TcpStream` today, a QUIC stream
//! tomorrow).

pub mod connection;
pub mod error;
pub mod frame;
pub mod message;

pub use connection::{Connection, ConnectionState, FrameTransport, MAX_RECONNECTION_ATTEMPTS};
pub use error::ProtocolError;
pub use frame::{FrameHeader, ACK_REQUIRED, COMPRESSED, ENCRYPTED, HEADER_LEN, MAGIC, MAX_PAYLOAD_LEN, PROTOCOL_VERSION, RESPONSE};
pub use message::{
    ChunkAckPayload, ChunkDataPayload, ErrorCode, ErrorPayload, FileTransferRequestPayload,
    FileTransferResponsePayload, HandshakePayload, HandshakeResponsePayload, MessageType, TimestampPayload,
    TransferCompletePayload,
};
