//! Key management
//!
//! P-256 signing keys with fixed-length encodings and the on-disk key store
//! used by the node (miner key) and the CLI.

pub mod key;
pub mod keystore;

pub use key::{Key, PublicKey, PRIVATE_KEY_LEN, PUBLIC_KEY_LEN};
pub use keystore::KeyStore;
