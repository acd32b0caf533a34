use serde::{Deserialize, Serialize};

use strongbox_api_types::{ChunkingAlgorithm, CryptMode};

/// Compression algorithm applied to a chunk before it reaches the content store.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompressionMode {
    None,
    Zstd,
}

impl Default for CompressionMode {
    fn default() -> Self {
        CompressionMode::Zstd
    }
}

/// Transport used by the transfer protocol. `Quic` is accepted by config
/// parsing but not yet backed by a `FrameTransport` impl.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Tcp,
    Quic,
}

impl Default for TransportKind {
    fn default() -> Self {
        TransportKind::Tcp
    }
}

/// Every tunable named in the configuration surface, loadable from TOML or
/// built programmatically with `Default`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct StrongboxConfig {
    pub chunking_algorithm: ChunkingAlgorithm,
    /// Target size for `ChunkingAlgorithm::Fixed`, in `[1 KiB, 64 MiB]`.
    pub chunk_size: u32,
    pub cdc_min: u32,
    pub cdc_avg: u32,
    pub cdc_max: u32,

    pub encryption_enabled: bool,
    pub compression: CompressionMode,

    /// Hard upper bound for a single wire-protocol chunk payload.
    pub max_chunk_size: u32,

    pub transport: TransportKind,
    pub default_send_buffer: u32,
    pub default_recv_buffer: u32,

    pub max_reconnection_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,

    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for StrongboxConfig {
    fn default() -> Self {
        Self {
            chunking_algorithm: ChunkingAlgorithm::Cdc,
            chunk_size: 1024 * 1024,
            cdc_min: 512 * 1024,
            cdc_avg: 1024 * 1024,
            cdc_max: 4 * 1024 * 1024,

            encryption_enabled: false,
            compression: CompressionMode::Zstd,

            max_chunk_size: 1024 * 1024,

            transport: TransportKind::Tcp,
            default_send_buffer: 1024 * 1024,
            default_recv_buffer: 1024 * 1024,

            max_reconnection_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,

            ping_interval_ms: 30_000,
            ping_timeout_ms: 10_000,
            read_timeout_ms: 60_000,
            connect_timeout_ms: 10_000,
        }
    }
}

impl StrongboxConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, anyhow::Error> {
        Ok(toml::from_str(s)?)
    }

    pub fn crypt_mode(&self) -> CryptMode {
        if self.encryption_enabled {
            CryptMode::Encrypt
        } else {
            CryptMode::None
        }
    }

    /// Validates the ranges spec'd for each key; called once at load time.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(1024..=64 * 1024 * 1024).contains(&self.chunk_size) {
            anyhow::bail!("chunk_size out of range [1 KiB, 64 MiB]: {}", self.chunk_size);
        }
        if self.max_chunk_size > 1024 * 1024 {
            anyhow::bail!("max_chunk_size must be <= 1 MiB: {}", self.max_chunk_size);
        }
        if !(self.cdc_min < self.cdc_avg && self.cdc_avg < self.cdc_max) {
            anyhow::bail!(
                "cdc_min < cdc_avg < cdc_max required, got {} < {} < {}",
                self.cdc_min,
                self.cdc_avg,
                self.cdc_max
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        StrongboxConfig::default().validate().unwrap();
    }

    #[test]
    fn parses_partial_toml_over_defaults() {
        let config = StrongboxConfig::from_toml_str(
            r#"
            chunking-algorithm = "fixed"
            chunk-size = 2097152
            "#,
        )
        .unwrap();
        assert_eq!(config.chunking_algorithm, ChunkingAlgorithm::Fixed);
        assert_eq!(config.chunk_size, 2_097_152);
        // untouched keys keep their defaults
        assert_eq!(config.max_backoff_ms, 30_000);
    }

    #[test]
    fn rejects_inverted_cdc_bounds() {
        let mut config = StrongboxConfig::default();
        config.cdc_min = config.cdc_max;
        assert!(config.validate().is_err());
    }
}
