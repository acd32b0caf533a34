//! Crypto and locking primitives shared by the datastore, metadata, and
//! pipeline crates. Must not depend on any of them.

pub mod crypt_config;
pub mod parallel_handler;
pub mod process_locker;

pub use crypt_config::CryptConfig;
pub use parallel_handler::{ParallelHandler, SendHandle};
pub use process_locker::ProcessLocker;
