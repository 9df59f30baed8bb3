//! Consensus and ledger core
//!
//! Binary primitives and their codec, the Merkle tree, proof of work and the
//! chain that validates blocks and tracks unspent outputs.

pub mod block;
pub mod blockchain;
pub mod codec;
pub mod hash;
pub mod inspect;
pub mod merkle;
pub mod monetary;
pub mod proof_of_work;
pub mod transaction;

pub use block::{Block, BlockHeader, GENESIS_NONCE, GENESIS_TIMESTAMP};
pub use blockchain::{Chain, TxLocation};
pub use codec::{
    DecodeError, Encodable, Payload, TAG_BLOCK, TAG_HEADER, TAG_INPUT, TAG_OUTPUT,
    TAG_TRANSACTION,
};
pub use hash::{Hash, DEFAULT_HASH};
pub use merkle::MerkleTree;
pub use monetary::{coinbase_value, MINER_REWARD};
pub use proof_of_work::{meets_difficulty, ProofOfWork};
pub use transaction::{Signature, Transaction, TxIn, TxOut};
