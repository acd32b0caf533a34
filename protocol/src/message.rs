use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

macro_rules! message_types {
    ($($name:ident = $val:expr,)*) => {
        /// One-byte message type discriminant.
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        #[repr(u8)]
        pub enum MessageType {
            $($name = $val,)*
        }

        impl MessageType {
            pub fn from_u8(v: u8) -> Option<Self> {
                match v {
                    $($val => Some(MessageType::$name),)*
                    _ => None,
                }
            }
        }
    };
}

message_types! {
    Handshake = 0x01,
    HandshakeResponse = 0x02,
    FileTransferRequest = 0x10,
    FileTransferResponse = 0x11,
    ChunkData = 0x20,
    ChunkAck = 0x21,
    TransferComplete = 0x30,
    Pong = 0xFD,
    Ping = 0xFE,
    Error = 0xFF,
}

/// Error codes carried by an [`ErrorPayload`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    ProtocolVersionMismatch = 1,
    InvalidMessage = 2,
    FileNotFound = 3,
    AccessDenied = 4,
    ChecksumMismatch = 5,
    TransferTimeout = 6,
    InsufficientSpace = 7,
    InternalError = 8,
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn get_string(buf: &mut impl Buf) -> Result<String, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::InvalidFrame("truncated string length".into()));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::InvalidFrame("truncated string body".into()));
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|err| ProtocolError::InvalidFrame(err.to_string()))
}

fn get_hex64(buf: &mut impl Buf) -> Result<String, ProtocolError> {
    get_string(buf)
}

fn require(buf: &impl Buf, n: usize, what: &str) -> Result<(), ProtocolError> {
    if buf.remaining() < n {
        return Err(ProtocolError::InvalidFrame(format!("truncated {what}")));
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakePayload {
    pub protocol_version: u16,
    pub client_id: String,
    pub capabilities: u32,
}

impl HandshakePayload {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u16(self.protocol_version);
        put_string(&mut buf, &self.client_id);
        buf.put_u32(self.capabilities);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        require(&buf, 2, "handshake")?;
        let protocol_version = buf.get_u16();
        let client_id = get_string(&mut buf)?;
        require(&buf, 4, "handshake capabilities")?;
        let capabilities = buf.get_u32();
        Ok(Self {
            protocol_version,
            client_id,
            capabilities,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandshakeResponsePayload {
    pub protocol_version: u16,
    pub server_id: String,
    pub capabilities: u32,
    pub max_chunk_size: u32,
}

impl HandshakeResponsePayload {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u16(self.protocol_version);
        put_string(&mut buf, &self.server_id);
        buf.put_u32(self.capabilities);
        buf.put_u32(self.max_chunk_size);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        require(&buf, 2, "handshake response")?;
        let protocol_version = buf.get_u16();
        let server_id = get_string(&mut buf)?;
        require(&buf, 8, "handshake response capabilities")?;
        let capabilities = buf.get_u32();
        let max_chunk_size = buf.get_u32();
        Ok(Self {
            protocol_version,
            server_id,
            capabilities,
            max_chunk_size,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileTransferRequestPayload {
    pub path: String,
    pub size: u64,
    pub mtime: u64,
    pub file_digest: String,
    pub chunk_size: u32,
    pub compression: String,
}

impl FileTransferRequestPayload {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.path);
        buf.put_u64(self.size);
        buf.put_u64(self.mtime);
        put_string(&mut buf, &self.file_digest);
        buf.put_u32(self.chunk_size);
        put_string(&mut buf, &self.compression);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        let path = get_string(&mut buf)?;
        require(&buf, 16, "file transfer request")?;
        let size = buf.get_u64();
        let mtime = buf.get_u64();
        let file_digest = get_hex64(&mut buf)?;
        require(&buf, 4, "file transfer request chunk_size")?;
        let chunk_size = buf.get_u32();
        let compression = get_string(&mut buf)?;
        Ok(Self {
            path,
            size,
            mtime,
            file_digest,
            chunk_size,
            compression,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileTransferResponsePayload {
    pub accepted: bool,
    pub reason: String,
    pub resume_offset: u64,
    pub preferred_chunk_size: u32,
}

impl FileTransferResponsePayload {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(self.accepted as u8);
        put_string(&mut buf, &self.reason);
        buf.put_u64(self.resume_offset);
        buf.put_u32(self.preferred_chunk_size);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        require(&buf, 1, "file transfer response")?;
        let accepted = buf.get_u8() != 0;
        let reason = get_string(&mut buf)?;
        require(&buf, 12, "file transfer response offset")?;
        let resume_offset = buf.get_u64();
        let preferred_chunk_size = buf.get_u32();
        Ok(Self {
            accepted,
            reason,
            resume_offset,
            preferred_chunk_size,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkDataPayload {
    pub path: String,
    pub chunk_offset: u64,
    pub chunk_size: u32,
    pub total_size: u64,
    pub chunk_digest: String,
    pub data: Vec<u8>,
}

impl ChunkDataPayload {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.path);
        buf.put_u64(self.chunk_offset);
        buf.put_u32(self.chunk_size);
        buf.put_u64(self.total_size);
        put_string(&mut buf, &self.chunk_digest);
        buf.put_slice(&self.data);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        let path = get_string(&mut buf)?;
        require(&buf, 20, "chunk data")?;
        let chunk_offset = buf.get_u64();
        let chunk_size = buf.get_u32();
        let total_size = buf.get_u64();
        let chunk_digest = get_hex64(&mut buf)?;
        if chunk_offset.checked_add(chunk_size as u64).map_or(true, |end| end > total_size) {
            return Err(ProtocolError::InvalidFrame(
                "chunk_offset + chunk_size exceeds total_size".into(),
            ));
        }
        let data = buf.chunk().to_vec();
        Ok(Self {
            path,
            chunk_offset,
            chunk_size,
            total_size,
            chunk_digest,
            data,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkAckPayload {
    pub path: String,
    pub chunk_offset: u64,
    pub chunk_size: u32,
    pub checksum_valid: bool,
    pub error: String,
}

impl ChunkAckPayload {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.path);
        buf.put_u64(self.chunk_offset);
        buf.put_u32(self.chunk_size);
        buf.put_u8(self.checksum_valid as u8);
        put_string(&mut buf, &self.error);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        let path = get_string(&mut buf)?;
        require(&buf, 13, "chunk ack")?;
        let chunk_offset = buf.get_u64();
        let chunk_size = buf.get_u32();
        let checksum_valid = buf.get_u8() != 0;
        let error = get_string(&mut buf)?;
        Ok(Self {
            path,
            chunk_offset,
            chunk_size,
            checksum_valid,
            error,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferCompletePayload {
    pub path: String,
    pub total_transferred: u64,
    pub total_size: u64,
    pub final_digest: String,
    pub ok: bool,
    pub error: String,
}

impl TransferCompletePayload {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        put_string(&mut buf, &self.path);
        buf.put_u64(self.total_transferred);
        buf.put_u64(self.total_size);
        put_string(&mut buf, &self.final_digest);
        buf.put_u8(self.ok as u8);
        put_string(&mut buf, &self.error);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        let path = get_string(&mut buf)?;
        require(&buf, 16, "transfer complete")?;
        let total_transferred = buf.get_u64();
        let total_size = buf.get_u64();
        let final_digest = get_hex64(&mut buf)?;
        require(&buf, 1, "transfer complete ok flag")?;
        let ok = buf.get_u8() != 0;
        let error = get_string(&mut buf)?;
        Ok(Self {
            path,
            total_transferred,
            total_size,
            final_digest,
            ok,
            error,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorPayload {
    pub code: u32,
    pub message: String,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as u32,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32(self.code);
        put_string(&mut buf, &self.message);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        require(&buf, 4, "error payload")?;
        let code = buf.get_u32();
        let message = get_string(&mut buf)?;
        Ok(Self { code, message })
    }
}

/// PING/PONG carry a single millisecond timestamp for RTT measurement.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimestampPayload {
    pub timestamp_ms: u64,
}

impl TimestampPayload {
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u64(self.timestamp_ms);
        buf
    }

    pub fn decode(mut buf: &[u8]) -> Result<Self, ProtocolError> {
        require(&buf, 8, "timestamp payload")?;
        Ok(Self {
            timestamp_ms: buf.get_u64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_roundtrips() {
        let payload = HandshakePayload {
            protocol_version: 1,
            client_id: "node-a".into(),
            capabilities: 0b0101,
        };
        let encoded = payload.encode();
        let decoded = HandshakePayload::decode(&encoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn chunk_data_rejects_offset_overflow() {
        let mut buf = BytesMut::new();
        put_string(&mut buf, "/a");
        buf.put_u64(100); // chunk_offset
        buf.put_u32(50); // chunk_size
        buf.put_u64(120); // total_size, smaller than offset + size
        put_string(&mut buf, &"a".repeat(64));
        assert!(ChunkDataPayload::decode(&buf).is_err());
    }

    #[test]
    fn message_type_round_trips_through_u8() {
        assert_eq!(MessageType::from_u8(0x20), Some(MessageType::ChunkData));
        assert_eq!(MessageType::from_u8(0x99), None);
    }

    #[test]
    fn error_payload_roundtrips() {
        let payload = ErrorPayload::new(ErrorCode::ChecksumMismatch, "bad chunk");
        let encoded = payload.encode();
        let decoded = ErrorPayload::decode(&encoded).unwrap();
        assert_eq!(decoded.code, ErrorCode::ChecksumMismatch as u32);
        assert_eq!(decoded.message, "bad chunk");
    }
}
