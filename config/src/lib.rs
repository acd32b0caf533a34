//! External collaborator traits (`KeyProvider`, `Clock`, `RandomSource`) and
//! the configuration surface: `StrongboxConfig` plus passphrase-protected
//! master key storage (`KeyConfig`).

mod collaborators;
pub mod key_config;
mod strongbox_config;

pub use collaborators::{Clock, KeyProvider, MonotonicClock, OpenSslRandomSource, RandomSource, StaticKeyProvider};
pub use key_config::{load_and_decrypt_key, KeyConfig, KeyDerivationConfig};
pub use strongbox_config::{CompressionMode, StrongboxConfig, TransportKind};
