use crate::core::codec::{write_list, write_u32, write_u64, DecodeError, Encodable, Reader};
use crate::core::{
    coinbase_value, Hash, MerkleTree, Transaction, DEFAULT_HASH, TAG_BLOCK, TAG_HEADER,
};
use crate::error::{BlockchainError, Result};
use crate::utils::current_timestamp;
use crate::wallet::PublicKey;
use serde::Serialize;

/// 2002-11-11T18:12:00Z
pub const GENESIS_TIMESTAMP: u64 = 1_037_038_320;
pub const GENESIS_NONCE: u32 = 0xdead_beef;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockHeader {
    pub timestamp: u64,
    pub nonce: u32,
    pub prev_hash: Hash,
    pub merkle_root: Hash,
}

impl BlockHeader {
    pub fn randomize_nonce(&mut self) {
        self.nonce = rand::random::<u32>();
    }
}

impl Encodable for BlockHeader {
    const TAG: u32 = TAG_HEADER;

    fn encode_to(&self, out: &mut Vec<u8>) {
        write_u64(out, self.timestamp);
        write_u32(out, self.nonce);
        out.extend_from_slice(self.prev_hash.as_bytes());
        out.extend_from_slice(self.merkle_root.as_bytes());
    }

    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<BlockHeader, DecodeError> {
        Ok(BlockHeader {
            timestamp: reader.read_u64()?,
            nonce: reader.read_u32()?,
            prev_hash: reader.read_hash()?,
            merkle_root: reader.read_hash()?,
        })
    }
}

/// A header plus its transactions; `transactions[0]` is the coinbase except in genesis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn genesis() -> Block {
        Block {
            header: BlockHeader {
                timestamp: GENESIS_TIMESTAMP,
                nonce: GENESIS_NONCE,
                prev_hash: DEFAULT_HASH,
                merkle_root: DEFAULT_HASH,
            },
            transactions: vec![],
        }
    }

    /// Block over `transactions` with a fresh Merkle root and nonce zero.
    pub fn new(prev_hash: Hash, timestamp: u64, transactions: Vec<Transaction>) -> Block {
        let merkle_root = Block::merkle_root_of(&transactions);
        Block {
            header: BlockHeader {
                timestamp,
                nonce: 0,
                prev_hash,
                merkle_root,
            },
            transactions,
        }
    }

    /// Candidate for `height`: a coinbase paying `MINER_REWARD + fees` to `miner`
    /// followed by `transactions`, stamped with the current time.
    pub fn candidate(
        prev_hash: Hash,
        height: u32,
        miner: &PublicKey,
        fees: u64,
        transactions: Vec<Transaction>,
    ) -> Result<Block> {
        let reward = coinbase_value(fees)
            .ok_or_else(|| BlockchainError::InvalidBlock("Coinbase value overflows".to_string()))?;
        let mut all = Vec::with_capacity(transactions.len() + 1);
        all.push(Transaction::coinbase(height, miner.clone(), reward));
        all.extend(transactions);
        Ok(Block::new(prev_hash, current_timestamp()?, all))
    }

    pub fn merkle_root_of(transactions: &[Transaction]) -> Hash {
        let leaves: Vec<Hash> = transactions.iter().map(Encodable::hash).collect();
        MerkleTree::build(&leaves).root()
    }

    pub fn has_valid_merkle_root(&self) -> bool {
        Block::merkle_root_of(&self.transactions) == self.header.merkle_root
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    pub fn randomize_nonce(&mut self) {
        self.header.randomize_nonce();
    }
}

impl Encodable for Block {
    const TAG: u32 = TAG_BLOCK;

    fn encode_to(&self, out: &mut Vec<u8>) {
        self.header.encode_to(out);
        write_list(out, &self.transactions);
    }

    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<Block, DecodeError> {
        let header = BlockHeader::decode_from(reader)?;
        let transactions = reader.read_list()?;
        Ok(Block {
            header,
            transactions,
        })
    }

    /// A block is identified by its header.
    fn hash(&self) -> Hash {
        self.header.hash()
    }
}
