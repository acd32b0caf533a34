use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether chunk/path data is encrypted, only signed, or neither.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CryptMode {
    /// Don't encrypt.
    None,
    /// Authenticated encryption (AES-256-GCM).
    Encrypt,
}

impl Default for CryptMode {
    fn default() -> Self {
        CryptMode::None
    }
}

/// Key derivation function used to protect a raw encryption key with a passphrase.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Kdf {
    None,
    Scrypt,
    PBKDF2,
}

/// 32-byte key fingerprint (SHA-256 of the raw master key).
///
/// Display form shows only the first 8 bytes, colon separated, as a short
/// key id for logging/prompts; full bytes round-trip through (de)serialize.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(#[serde(with = "hex::serde")] [u8; 32]);

impl Fingerprint {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0[0..8].iter().map(|b| format!("{b:02x}")).collect();
        write!(f, "{}", parts.join(":"))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl std::str::FromStr for Fingerprint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned: String = s.chars().filter(|c| *c != ':').collect();
        if cleaned.len() != 64 {
            anyhow::bail!("invalid fingerprint: expected 32 bytes of hex");
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&cleaned, &mut bytes)
            .map_err(|err| anyhow::format_err!("invalid fingerprint hex: {err}"))?;
        Ok(Self(bytes))
    }
}
