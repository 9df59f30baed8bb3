//! Test utilities for ledger and node testing

use crate::core::{Block, Chain, ProofOfWork, Transaction};
use crate::storage::Mempool;
use crate::wallet::{Key, PublicKey};
use std::time::Duration;
use tempfile::TempDir;

/// Build the next block on `chain` paying the miner reward plus fees, and
/// search nonces until it meets the chain's difficulty.
pub fn mine_next(chain: &Chain, miner: &PublicKey, transactions: Vec<Transaction>) -> Block {
    let fees = chain.validate_transactions(&transactions).unwrap();
    let mut block = Block::candidate(
        chain.tip_hash(),
        chain.len() as u32,
        miner,
        fees,
        transactions,
    )
    .unwrap();
    let pow = ProofOfWork::new(chain.difficulty());
    while !pow.validate(&block.header) {
        block.randomize_nonce();
    }
    block
}

/// A signed payment from `from` built against the confirmed outputs of `chain`.
pub fn pay(chain: &Chain, from: &Key, to: &PublicKey, amount: u64, fee: u64) -> Transaction {
    let mut tx = chain
        .construct_transaction(&from.public(), to, amount, fee)
        .unwrap();
    tx.sign(from).unwrap();
    tx
}

/// A mempool in a temporary directory with a known miner key and no mining delay.
pub fn temp_mempool(difficulty: u32) -> (Mempool, Key, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let miner = Key::generate().unwrap();
    let mempool =
        Mempool::with_miner(dir.path(), difficulty, Duration::ZERO, miner.public()).unwrap();
    (mempool, miner, dir)
}

/// Mine and commit the current candidate.
pub fn commit_candidate(mempool: &Mempool) {
    mempool.mine().unwrap();
    mempool.append_block(None).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mine_next_meets_difficulty() {
        let miner = Key::generate().unwrap().public();
        let mut chain = Chain::new(6);
        let block = mine_next(&chain, &miner, vec![]);
        chain.append_block(block).unwrap();
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_temp_mempool_starts_at_genesis() {
        let (mempool, miner, _dir) = temp_mempool(0);
        assert_eq!(mempool.latest_info().unwrap().0, 0);
        assert_eq!(mempool.balance(&miner.public()).unwrap(), 0);
    }
}
