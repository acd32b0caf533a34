use anyhow::{bail, Error};

use crate::file_formats::{COMPRESSED_BLOB_MAGIC_1_0, UNCOMPRESSED_BLOB_MAGIC_1_0};

const HEADER_LEN: usize = 8 + 4;

/// A framed on-disk chunk: `MAGIC || CRC32 || (possibly zstd-compressed) data`.
///
/// The CRC lets readers detect filesystem-level corruption cheaply, before
/// paying for a full rehash against the content digest.
pub struct DataBlob {
    raw: Vec<u8>,
}

impl DataBlob {
    /// Frames `data`, optionally zstd-compressing it first. Compression is
    /// skipped if it doesn't actually shrink the payload.
    pub fn encode(data: &[u8], compress: bool) -> Result<Self, Error> {
        let (magic, payload) = if compress {
            let compressed = zstd::stream::encode_all(data, 0)?;
            if compressed.len() < data.len() {
                (COMPRESSED_BLOB_MAGIC_1_0, compressed)
            } else {
                (UNCOMPRESSED_BLOB_MAGIC_1_0, data.to_vec())
            }
        } else {
            (UNCOMPRESSED_BLOB_MAGIC_1_0, data.to_vec())
        };

        let crc = crc32fast::hash(&payload);

        let mut raw = Vec::with_capacity(HEADER_LEN + payload.len());
        raw.extend_from_slice(&magic);
        raw.extend_from_slice(&crc.to_be_bytes());
        raw.extend_from_slice(&payload);

        Ok(Self { raw })
    }

    pub fn raw_data(&self) -> &[u8] {
        &self.raw
    }

    pub fn into_raw_data(self) -> Vec<u8> {
        self.raw
    }

    /// Parses a previously-encoded blob, verifying its CRC and decompressing
    /// if it carries the compressed magic.
    pub fn decode(raw: &[u8]) -> Result<Vec<u8>, Error> {
        if raw.len() < HEADER_LEN {
            bail!("chunk blob too short ({} bytes)", raw.len());
        }

        let magic: [u8; 8] = raw[0..8].try_into().unwrap();
        let stored_crc = u32::from_be_bytes(raw[8..12].try_into().unwrap());
        let payload = &raw[HEADER_LEN..];

        let crc = crc32fast::hash(payload);
        if crc != stored_crc {
            bail!("chunk blob CRC mismatch: stored {stored_crc:08x}, computed {crc:08x}");
        }

        if magic == UNCOMPRESSED_BLOB_MAGIC_1_0 {
            Ok(payload.to_vec())
        } else if magic == COMPRESSED_BLOB_MAGIC_1_0 {
            Ok(zstd::stream::decode_all(payload)?)
        } else {
            bail!("unknown chunk blob magic {magic:02x?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_uncompressed() {
        let blob = DataBlob::encode(b"hello strongbox", false).unwrap();
        let decoded = DataBlob::decode(blob.raw_data()).unwrap();
        assert_eq!(decoded, b"hello strongbox");
    }

    #[test]
    fn roundtrips_compressed() {
        let data = vec![0x41u8; 64 * 1024];
        let blob = DataBlob::encode(&data, true).unwrap();
        assert!(blob.raw_data().len() < data.len());
        let decoded = DataBlob::decode(blob.raw_data()).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn rejects_tampered_crc() {
        let blob = DataBlob::encode(b"integrity matters", false).unwrap();
        let mut raw = blob.into_raw_data();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        assert!(DataBlob::decode(&raw).is_err());
    }
}
