use anyhow::Error;
use openssl::hash::MessageDigest;
use openssl::pkcs5::pbkdf2_hmac;
use openssl::symm::{Cipher, Crypter, Mode};

use strongbox_api_types::Fingerprint;

const FINGERPRINT_INPUT: [u8; 1] = [1u8];
const DEDUP_NONCE_INPUT: &[u8] = b"_dedup_nonce";

/// Holds a raw 256-bit master key plus the key material derived from it.
///
/// The `id_key` (derived once via `pbkdf2_hmac`) namespaces every digest and
/// nonce computed from it, so two datastores encrypted with different master
/// keys never collide even over identical plaintext.
pub struct CryptConfig {
    cipher: Cipher,
    id_key: [u8; 32],
    id_pkey: openssl::pkey::PKey<openssl::pkey::Private>,
    enc_key: [u8; 32],
}

impl CryptConfig {
    /// Derives `id_key` from `enc_key` via `pbkdf2_hmac`.
    pub fn new(enc_key: [u8; 32]) -> Result<Self, Error> {
        let mut id_key = [0u8; 32];

        pbkdf2_hmac(&enc_key, b"_id_key", 10, MessageDigest::sha256(), &mut id_key)?;

        let id_pkey = openssl::pkey::PKey::hmac(&id_key)?;

        Ok(Self {
            id_key,
            id_pkey,
            enc_key,
            cipher: Cipher::aes_256_gcm(),
        })
    }

    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    pub fn enc_key(&self) -> &[u8; 32] {
        &self.enc_key
    }

    /// SHA-256 over `data` followed by the secret `id_key`, namespacing the
    /// digest to this key (the key is hashed last to avoid length-extension
    /// shenanigans letting an attacker extend a known-digest payload).
    pub fn compute_digest(&self, data: &[u8]) -> [u8; 32] {
        let mut hasher = openssl::sha::Sha256::new();
        hasher.update(data);
        hasher.update(&self.id_key);
        hasher.finish()
    }

    pub fn data_signer(&self) -> Result<openssl::sign::Signer, Error> {
        Ok(openssl::sign::Signer::new(MessageDigest::sha256(), &self.id_pkey)?)
    }

    /// HMAC-SHA256 tag over `data`, keyed on `id_key`.
    pub fn compute_auth_tag(&self, data: &[u8]) -> Result<[u8; 32], Error> {
        let mut signer = self.data_signer()?;
        signer.update(data)?;
        let mut tag = [0u8; 32];
        signer.sign(&mut tag)?;
        Ok(tag)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(self.compute_digest(&FINGERPRINT_INPUT))
    }

    /// Deterministic 16-byte AEAD nonce for `plaintext`.
    ///
    /// Unlike a random IV, this makes `encrypt` a pure function of
    /// (key, plaintext): identical plaintext always yields identical
    /// ciphertext, which is what lets the chunk store dedup encrypted
    /// chunks the same way it dedups plaintext ones.
    pub fn dedup_nonce(&self, plaintext: &[u8]) -> [u8; 16] {
        let mut hasher = openssl::sha::Sha256::new();
        hasher.update(DEDUP_NONCE_INPUT);
        hasher.update(&self.id_key);
        hasher.update(plaintext);
        let digest = hasher.finish();
        let mut nonce = [0u8; 16];
        nonce.copy_from_slice(&digest[0..16]);
        nonce
    }

    pub fn data_crypter(&self, iv: &[u8; 16], mode: Mode) -> Result<Crypter, Error> {
        let mut crypter = Crypter::new(self.cipher, mode, &self.enc_key, Some(iv))?;
        crypter.aad_update(b"")?;
        Ok(crypter)
    }

    /// AES-256-GCM encrypt with the deterministic dedup nonce, returning
    /// `nonce || tag || ciphertext`.
    pub fn encrypt_deterministic(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let nonce = self.dedup_nonce(plaintext);
        let mut tag = [0u8; 16];
        let ciphertext = openssl::symm::encrypt_aead(
            self.cipher,
            &self.enc_key,
            Some(&nonce),
            b"",
            plaintext,
            &mut tag,
        )?;

        let mut out = Vec::with_capacity(16 + 16 + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&tag);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// AES-256-GCM encrypt with a random per-call nonce, returning
    /// `nonce || tag || ciphertext`.
    ///
    /// Unlike [`Self::encrypt_deterministic`], two calls on the same
    /// plaintext produce different ciphertext. Used for fields (like a
    /// file's path) that don't need to preserve dedup under encryption.
    pub fn encrypt_random(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut nonce = [0u8; 16];
        openssl::rand::rand_bytes(&mut nonce)?;
        let mut tag = [0u8; 16];
        let ciphertext = openssl::symm::encrypt_aead(
            self.cipher,
            &self.enc_key,
            Some(&nonce),
            b"",
            plaintext,
            &mut tag,
        )?;

        let mut out = Vec::with_capacity(16 + 16 + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&tag);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Inverse of [`Self::encrypt_random`]; shares its wire layout with
    /// [`Self::decrypt_deterministic`].
    pub fn decrypt_random(&self, blob: &[u8]) -> Result<Vec<u8>, Error> {
        self.decrypt_deterministic(blob)
    }

    /// Inverse of [`Self::encrypt_deterministic`].
    pub fn decrypt_deterministic(&self, blob: &[u8]) -> Result<Vec<u8>, Error> {
        if blob.len() < 32 {
            anyhow::bail!("encrypted blob too short ({} bytes)", blob.len());
        }
        let nonce = &blob[0..16];
        let tag = &blob[16..32];
        let ciphertext = &blob[32..];

        let plaintext =
            openssl::symm::decrypt_aead(self.cipher, &self.enc_key, Some(nonce), b"", ciphertext, tag)?;
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_plaintext_yields_same_ciphertext() {
        let config = CryptConfig::new([7u8; 32]).unwrap();
        let a = config.encrypt_deterministic(b"hello world").unwrap();
        let b = config.encrypt_deterministic(b"hello world").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn roundtrips() {
        let config = CryptConfig::new([9u8; 32]).unwrap();
        let blob = config.encrypt_deterministic(b"some plaintext chunk").unwrap();
        let plain = config.decrypt_deterministic(&blob).unwrap();
        assert_eq!(plain, b"some plaintext chunk");
    }

    #[test]
    fn different_keys_different_fingerprint() {
        let a = CryptConfig::new([1u8; 32]).unwrap();
        let b = CryptConfig::new([2u8; 32]).unwrap();
        assert_ne!(a.fingerprint().bytes(), b.fingerprint().bytes());
    }
}
