/// External collaborators the core consumes but never constructs itself.
///
/// Every implementation here is a default, swappable one; nothing in
/// `strongbox-datastore`/`strongbox-metadata`/`strongbox-pipeline` depends
/// on these concrete types, only on the traits below.
use anyhow::Error;

/// Supplies the master key used to derive per-chunk encryption keys.
///
/// `get_master_key` is a scoped acquisition over a method call rather than
/// a field so an implementation can refresh the key (e.g. re-prompt, pull
/// from an agent) without the caller needing to know.
pub trait KeyProvider: Send + Sync {
    fn get_master_key(&self) -> Result<[u8; 32], Error>;
}

/// A `KeyProvider` over a key that's already resident in memory.
pub struct StaticKeyProvider {
    key: [u8; 32],
}

impl StaticKeyProvider {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }
}

impl KeyProvider for StaticKeyProvider {
    fn get_master_key(&self) -> Result<[u8; 32], Error> {
        Ok(self.key)
    }
}

/// Monotonic clock for timeouts and access timestamps.
///
/// Abstracted so the transfer protocol's retry/backoff and the metadata
/// store's access-time bookkeeping can be driven by a fake clock in tests.
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary but fixed epoch. Not wall-clock time.
    fn now_ms(&self) -> u64;
}

/// `Clock` backed by `std::time::Instant`.
pub struct MonotonicClock {
    start: std::time::Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// Cryptographic RNG used for AEAD nonces and key generation.
pub trait RandomSource: Send + Sync {
    fn fill(&self, buf: &mut [u8]) -> Result<(), Error>;

    fn bytes(&self, len: usize) -> Result<Vec<u8>, Error> {
        let mut buf = vec![0u8; len];
        self.fill(&mut buf)?;
        Ok(buf)
    }
}

/// `RandomSource` backed by OpenSSL's CSPRNG.
#[derive(Default)]
pub struct OpenSslRandomSource;

impl RandomSource for OpenSslRandomSource {
    fn fill(&self, buf: &mut [u8]) -> Result<(), Error> {
        openssl::rand::rand_bytes(buf)?;
        Ok(())
    }
}
