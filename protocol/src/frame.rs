use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::ProtocolError;

pub const MAGIC: u32 = 0x4A53_544E; // "JSTN"
pub const PROTOCOL_VERSION: u16 = 1;
pub const HEADER_LEN: usize = 16;
pub const MAX_PAYLOAD_LEN: u32 = 1 << 30;

pub const COMPRESSED: u8 = 0x1;
pub const ENCRYPTED: u8 = 0x2;
pub const ACK_REQUIRED: u8 = 0x4;
pub const RESPONSE: u8 = 0x8;

/// Fixed 16-byte, big-endian frame header preceding every message's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub message_type: u8,
    pub flags: u8,
    pub payload_len: u32,
    pub message_id: u32,
}

impl FrameHeader {
    pub fn new(message_type: u8, flags: u8, payload_len: u32, message_id: u32) -> Self {
        Self {
            message_type,
            flags,
            payload_len,
            message_id,
        }
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(MAGIC);
        buf.put_u16(PROTOCOL_VERSION);
        buf.put_u8(self.message_type);
        buf.put_u8(self.flags);
        buf.put_u32(self.payload_len);
        buf.put_u32(self.message_id);
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        if buf.remaining() < HEADER_LEN {
            return Err(ProtocolError::InvalidFrame("short header".into()));
        }
        let magic = buf.get_u32();
        if magic != MAGIC {
            return Err(ProtocolError::InvalidFrame(format!("bad magic {magic:#010x}")));
        }
        let version = buf.get_u16();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch(version, PROTOCOL_VERSION));
        }
        let message_type = buf.get_u8();
        let flags = buf.get_u8();
        let payload_len = buf.get_u32();
        if payload_len > MAX_PAYLOAD_LEN {
            return Err(ProtocolError::InvalidFrame(format!(
                "payload_len {payload_len} exceeds {MAX_PAYLOAD_LEN}"
            )));
        }
        let message_id = buf.get_u32();
        Ok(Self {
            message_type,
            flags,
            payload_len,
            message_id,
        })
    }
}

/// Reads one frame header plus its payload from `stream`.
pub async fn read_frame<S: tokio::io::AsyncRead + Unpin>(
    stream: &mut S,
) -> Result<(FrameHeader, Vec<u8>), ProtocolError> {
    let mut header_buf = [0u8; HEADER_LEN];
    stream.read_exact(&mut header_buf).await?;
    let header = FrameHeader::decode(&mut &header_buf[..])?;

    let mut payload = vec![0u8; header.payload_len as usize];
    stream.read_exact(&mut payload).await?;
    Ok((header, payload))
}

/// Writes a frame header plus payload to `stream`.
pub async fn write_frame<S: tokio::io::AsyncWrite + Unpin>(
    stream: &mut S,
    header: &FrameHeader,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    header.encode(&mut buf);
    buf.extend_from_slice(payload);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips() {
        let header = FrameHeader::new(0x20, ACK_REQUIRED, 42, 7);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_LEN);

        let decoded = FrameHeader::decode(&mut buf).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.has_flag(ACK_REQUIRED));
        assert!(!decoded.has_flag(COMPRESSED));
    }

    #[test]
    fn rejects_bad_magic() {
        let mut buf = BytesMut::new();
        buf.put_u32(0xDEAD_BEEF);
        buf.put_bytes(0, HEADER_LEN - 4);
        assert!(FrameHeader::decode(&mut buf).is_err());
    }

    #[test]
    fn rejects_oversized_payload() {
        let header = FrameHeader::new(0x20, 0, MAX_PAYLOAD_LEN + 1, 1);
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert!(FrameHeader::decode(&mut buf).is_err());
    }
}
