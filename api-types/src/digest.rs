use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

/// 256-bit content digest, canonical lowercase 64-hex-character form.
///
/// Used as the address of every chunk, the `file_digest` of every
/// [`FileRecord`](crate::FileRecord), and the key of every
/// [`ChunkMetadata`](crate::ChunkMetadata) row. Equality and ordering are
/// defined on the underlying bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Digest(#[serde(with = "hex::serde")] [u8; 32]);

impl Digest {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn into_bytes(self) -> [u8; 32] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl From<[u8; 32]> for Digest {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if s.len() != 64 {
            bail!("invalid digest: expected 64 hex characters, got {}", s.len());
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|err| anyhow::format_err!("invalid digest hex '{s}': {err}"))?;
        Ok(Self(bytes))
    }
}

#[test]
fn digest_roundtrips_through_hex() {
    let raw = [0x42u8; 32];
    let digest = Digest::new(raw);
    let hex = digest.to_hex();
    assert_eq!(hex.len(), 64);
    let parsed: Digest = hex.parse().unwrap();
    assert_eq!(parsed, digest);
}

#[test]
fn digest_rejects_short_hex() {
    assert!("abcd".parse::<Digest>().is_err());
}
