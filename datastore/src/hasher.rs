use std::io::Read;
use std::path::Path;

use anyhow::Error;
use strongbox_api_types::Digest;

/// Chunk size used when streaming a reader/file through SHA-256.
const READ_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Digest of `buf`. Pure and deterministic.
pub fn hash_bytes(buf: &[u8]) -> Digest {
    Digest::new(openssl::sha::sha256(buf))
}

/// Streams `r` through SHA-256 in bounded-memory chunks.
pub fn hash_reader<R: Read>(mut r: R) -> Result<Digest, Error> {
    let mut hasher = openssl::sha::Sha256::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(Digest::new(hasher.finish()))
}

/// Convenience over [`hash_reader`] for a path on disk.
pub fn hash_file<P: AsRef<Path>>(path: P) -> Result<Digest, Error> {
    let file = std::fs::File::open(path)?;
    hash_reader(file)
}

/// Incremental hasher for callers that assemble a digest across several
/// `update` calls before needing the result (e.g. the pipeline's
/// whole-file digest computed alongside per-chunk hashing).
pub struct IncrementalHasher {
    inner: openssl::sha::Sha256,
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            inner: openssl::sha::Sha256::new(),
        }
    }

    pub fn update(&mut self, buf: &[u8]) {
        self.inner.update(buf);
    }

    pub fn finalize(self) -> Digest {
        Digest::new(self.inner.finish())
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_bytes_is_deterministic() {
        assert_eq!(hash_bytes(b"strongbox"), hash_bytes(b"strongbox"));
        assert_ne!(hash_bytes(b"strongbox"), hash_bytes(b"strongbox2"));
    }

    #[test]
    fn incremental_matches_hash_bytes() {
        let mut inc = IncrementalHasher::new();
        inc.update(b"str");
        inc.update(b"ongbox");
        assert_eq!(inc.finalize(), hash_bytes(b"strongbox"));
    }

    #[test]
    fn hash_reader_matches_hash_bytes() {
        let data = vec![0x42u8; (READ_BUFFER_SIZE * 2) + 13];
        let digest = hash_reader(&data[..]).unwrap();
        assert_eq!(digest, hash_bytes(&data));
    }
}
