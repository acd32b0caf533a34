use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, format_err, Context, Error};
use serde::{Deserialize, Serialize};

use strongbox_api_types::{Fingerprint, Kdf};
use strongbox_tools::CryptConfig;

fn epoch_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Key derivation parameters for protecting a raw master key with a passphrase.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub enum KeyDerivationConfig {
    Scrypt {
        n: u64,
        r: u64,
        p: u64,
        #[serde(with = "hex::serde")]
        salt: Vec<u8>,
    },
    Pbkdf2 {
        iter: usize,
        #[serde(with = "hex::serde")]
        salt: Vec<u8>,
    },
}

impl KeyDerivationConfig {
    pub fn derive_key(&self, passphrase: &[u8]) -> Result<[u8; 32], Error> {
        let mut key = [0u8; 32];

        match self {
            KeyDerivationConfig::Scrypt { n, r, p, salt } => {
                // estimated scrypt memory usage is 128*r*n*p
                openssl::pkcs5::scrypt(passphrase, salt, *n, *r, *p, 1025 * 1024 * 1024, &mut key)?;
                Ok(key)
            }
            KeyDerivationConfig::Pbkdf2 { iter, salt } => {
                openssl::pkcs5::pbkdf2_hmac(
                    passphrase,
                    salt,
                    *iter,
                    openssl::hash::MessageDigest::sha256(),
                    &mut key,
                )?;
                Ok(key)
            }
        }
    }
}

/// On-disk key material: a 256-bit master key, optionally wrapped with a
/// passphrase-derived key via AES-256-GCM.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct KeyConfig {
    pub kdf: Option<KeyDerivationConfig>,
    pub created: i64,
    pub modified: i64,
    #[serde(with = "hex::serde")]
    pub data: Vec<u8>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fingerprint: Option<Fingerprint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl KeyConfig {
    /// Generates a new random master key, wrapped with `passphrase`.
    pub fn new(passphrase: &[u8], kdf: Kdf) -> Result<([u8; 32], Self), Error> {
        let mut key = [0u8; 32];
        openssl::rand::rand_bytes(&mut key)?;
        let key_config = Self::with_key(&key, passphrase, kdf)?;
        Ok((key, key_config))
    }

    /// Stores `raw_key` unprotected (no passphrase, no KDF).
    pub fn without_password(raw_key: [u8; 32]) -> Result<Self, Error> {
        let crypt_config = CryptConfig::new(raw_key)?;
        let fingerprint = Some(crypt_config.fingerprint());

        let created = epoch_now();
        Ok(Self {
            kdf: None,
            created,
            modified: created,
            data: raw_key.to_vec(),
            fingerprint,
            hint: None,
        })
    }

    /// Wraps `raw_key` with a key derived from `passphrase` via `kdf`.
    pub fn with_key(raw_key: &[u8; 32], passphrase: &[u8], kdf: Kdf) -> Result<Self, Error> {
        let mut salt = [0u8; 32];
        openssl::rand::rand_bytes(&mut salt)?;

        let kdf = match kdf {
            Kdf::Scrypt => KeyDerivationConfig::Scrypt {
                n: 65536,
                r: 8,
                p: 1,
                salt: salt.to_vec(),
            },
            Kdf::PBKDF2 => KeyDerivationConfig::Pbkdf2 {
                iter: 65535,
                salt: salt.to_vec(),
            },
            Kdf::None => bail!("no key derivation function specified"),
        };

        let derived_key = kdf.derive_key(passphrase)?;

        let cipher = openssl::symm::Cipher::aes_256_gcm();
        let mut iv = [0u8; 16];
        openssl::rand::rand_bytes(&mut iv)?;
        let mut tag = [0u8; 16];

        let encrypted_key =
            openssl::symm::encrypt_aead(cipher, &derived_key, Some(&iv), b"", raw_key, &mut tag)?;

        let mut enc_data = Vec::with_capacity(16 + 16 + encrypted_key.len());
        enc_data.extend_from_slice(&iv);
        enc_data.extend_from_slice(&tag);
        enc_data.extend_from_slice(&encrypted_key);

        let created = epoch_now();
        let crypt_config = CryptConfig::new(*raw_key)?;
        let fingerprint = Some(crypt_config.fingerprint());

        Ok(Self {
            kdf: Some(kdf),
            created,
            modified: created,
            data: enc_data,
            fingerprint,
            hint: None,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<KeyConfig, Error> {
        let data = std::fs::read(path)?;
        let key_config: KeyConfig = serde_json::from_slice(&data)?;
        Ok(key_config)
    }

    /// Recovers the raw master key, verifying its fingerprint if one is stored.
    pub fn decrypt(
        &self,
        passphrase: &dyn Fn() -> Result<Vec<u8>, Error>,
    ) -> Result<([u8; 32], i64, Fingerprint), Error> {
        let raw_data = &self.data;

        let key = if let Some(ref kdf) = self.kdf {
            let passphrase = passphrase()?;
            if passphrase.len() < 5 {
                bail!("passphrase is too short");
            }

            let derived_key = kdf.derive_key(&passphrase)?;

            if raw_data.len() < 32 {
                bail!("unable to decrypt key - short data");
            }
            let iv = &raw_data[0..16];
            let tag = &raw_data[16..32];
            let enc_data = &raw_data[32..];

            let cipher = openssl::symm::Cipher::aes_256_gcm();
            openssl::symm::decrypt_aead(cipher, &derived_key, Some(iv), b"", enc_data, tag).map_err(
                |err| match self.hint {
                    Some(ref hint) => format_err!("unable to decrypt key (hint: {hint})"),
                    None => format_err!("unable to decrypt key (wrong passphrase?) - {err}"),
                },
            )?
        } else {
            raw_data.clone()
        };

        if key.len() != 32 {
            bail!("decrypted key has unexpected length {} != 32", key.len());
        }
        let mut result = [0u8; 32];
        result.copy_from_slice(&key);

        let crypt_config = CryptConfig::new(result)?;
        let fingerprint = crypt_config.fingerprint();
        if let Some(ref stored) = self.fingerprint {
            if stored.bytes() != fingerprint.bytes() {
                bail!("key config contains wrong fingerprint {stored}, key has fingerprint {fingerprint}");
            }
        }

        Ok((result, self.created, fingerprint))
    }

    /// Writes the key file with `0600` permissions.
    pub fn store<P: AsRef<Path>>(&self, path: P, replace: bool) -> Result<(), Error> {
        let path: &Path = path.as_ref();
        let data = serde_json::to_string(self)?;

        (|| -> Result<(), Error> {
            use std::os::unix::fs::OpenOptionsExt;

            let mut open_opts = std::fs::OpenOptions::new();
            open_opts.write(true).mode(0o600);
            if replace {
                open_opts.create(true).truncate(true);
            } else {
                open_opts.create_new(true);
            }
            let mut file = open_opts.open(path)?;
            file.write_all(data.as_bytes())?;
            Ok(())
        })()
        .with_context(|| format!("unable to store key file {path:?}"))
    }
}

/// Loads and decrypts a key file in one step.
pub fn load_and_decrypt_key(
    path: &Path,
    passphrase: &dyn Fn() -> Result<Vec<u8>, Error>,
) -> Result<([u8; 32], i64, Fingerprint), Error> {
    KeyConfig::load(path)?
        .decrypt(passphrase)
        .with_context(|| format!("failed to load decryption key from {path:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_without_password() {
        let key = [5u8; 32];
        let config = KeyConfig::without_password(key).unwrap();
        let (decrypted, _created, _fp) = config.decrypt(&|| Ok(Vec::new())).unwrap();
        assert_eq!(decrypted, key);
    }

    #[test]
    fn roundtrip_with_passphrase() {
        let (key, config) = KeyConfig::new(b"correct horse battery staple", Kdf::Scrypt).unwrap();
        let (decrypted, _created, _fp) =
            config.decrypt(&|| Ok(b"correct horse battery staple".to_vec())).unwrap();
        assert_eq!(decrypted, key);
    }

    #[test]
    fn wrong_passphrase_fails() {
        let (_key, config) = KeyConfig::new(b"right passphrase", Kdf::PBKDF2).unwrap();
        let result = config.decrypt(&|| Ok(b"wrong passphrase".to_vec()));
        assert!(result.is_err());
    }

    #[test]
    fn tampered_fingerprint_is_rejected() {
        let mut config = KeyConfig::without_password([1u8; 32]).unwrap();
        config.fingerprint = Some(Fingerprint::new([0u8; 32]));
        assert!(config.decrypt(&|| Ok(Vec::new())).is_err());
    }
}
