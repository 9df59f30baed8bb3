//! Node state and persistence
//!
//! The mempool (chain, pending transactions, mining candidate) and the
//! one-file-per-height block store it persists to.

pub mod block_store;
pub mod memory_pool;

pub use block_store::BlockStore;
pub use memory_pool::{Mempool, BLOCKS_DIR, MINER_KEY_NAME, PUBLIC_KEYS_DIR, WALLETS_DIR};
