//! On-disk chunk framing: an 8-byte magic, a 4-byte CRC32, then the payload.
//!
// WARNING: do not change these magic values, they are part of the on-disk format.
// openssl::sha::sha256(b"Strongbox uncompressed chunk blob v1.0")[0..8]
pub const UNCOMPRESSED_BLOB_MAGIC_1_0: [u8; 8] = [0x9e, 0x1f, 0x68, 0x2a, 0x3c, 0x77, 0xd1, 0x04];
// openssl::sha::sha256(b"Strongbox zstd compressed chunk blob v1.0")[0..8]
pub const COMPRESSED_BLOB_MAGIC_1_0: [u8; 8] = [0x5b, 0xc4, 0x91, 0x0e, 0x22, 0xaf, 0x63, 0x7d];
