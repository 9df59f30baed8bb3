//! # utxo-chain
//!
//! A small proof-of-work ledger in the UTXO model: nodes mine blocks, relay
//! transactions and converge on the longest valid chain; wallets hold P-256
//! keys locally and talk to a node to build payments and read their history.
//!
//! ## Layout
//! - `core/`: hashes, the binary codec, transactions, blocks, the Merkle tree,
//!   proof of work and the chain that validates all of it
//! - `storage/`: the mempool (chain, pending set, mining candidate) and the
//!   one-file-per-height block store
//! - `wallet/`: signing keys and the on-disk key store
//! - `network/`: JSON packages over TCP, block sync, broadcast fan-out and
//!   the bounded task pool
//! - `config/`: node settings and their layering
//! - `cli/`: argument parsing for `main.rs`
//! - `utils/`: `ring` based hashing and signature helpers
//!
//! ## Where to start
//! 1. `core/blockchain.rs` for the validation rules
//! 2. `storage/memory_pool.rs` for mining and chain switching
//! 3. `network/server.rs` and `network/sync.rs` for how nodes agree

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod network;
pub mod storage;
pub mod utils;
pub mod wallet;

#[cfg(test)]
pub mod testnet;

pub use cli::{Command, Opt};
pub use config::{ConfigOverrides, NodeConfig};
pub use core::{
    Block, BlockHeader, Chain, Encodable, Hash, MerkleTree, Payload, ProofOfWork, Transaction,
    TxIn, TxOut, DEFAULT_HASH, MINER_REWARD,
};
pub use error::{BlockchainError, Result};
pub use network::{
    broadcast_transaction, construct_transaction, request_header, request_records, Node, Peers,
    Server, TaskPool,
};
pub use storage::{BlockStore, Mempool, BLOCKS_DIR, PUBLIC_KEYS_DIR, WALLETS_DIR};
pub use wallet::{Key, KeyStore, PublicKey};
