// The mempool owns the node's authoritative chain together with the pending
// transactions and the candidate block built from them. All three sit behind
// one RwLock: mutations take it exclusively for their whole duration, readers
// and each single mining attempt take it shared.

use crate::core::{Block, Chain, Encodable, Hash, ProofOfWork, Transaction, TxIn};
use crate::error::{BlockchainError, Result};
use crate::storage::BlockStore;
use crate::wallet::{KeyStore, PublicKey};
use log::{debug, error, info};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;

pub const BLOCKS_DIR: &str = "blocks";
pub const WALLETS_DIR: &str = "wallets";
pub const PUBLIC_KEYS_DIR: &str = "pubkeys";
pub const MINER_KEY_NAME: &str = "miner";

struct PoolState {
    chain: Chain,
    // ordered by hash so the candidate is deterministic
    pending: BTreeMap<Hash, Transaction>,
    candidate: Block,
}

pub struct Mempool {
    state: RwLock<PoolState>,
    miner_key: PublicKey,
    store: BlockStore,
    mine_interval: Duration,
}

impl Mempool {
    /// Open the node state under `dir`: load or create `wallets/miner.key`,
    /// then replay `blocks/`.
    pub fn open(dir: &Path, difficulty: u32, mine_interval: Duration) -> Result<Mempool> {
        let keys = KeyStore::open(&dir.join(WALLETS_DIR), &dir.join(PUBLIC_KEYS_DIR))?;
        let miner = keys.load_or_create(MINER_KEY_NAME)?;
        Mempool::with_miner(dir, difficulty, mine_interval, miner.public())
    }

    pub fn with_miner(
        dir: &Path,
        difficulty: u32,
        mine_interval: Duration,
        miner_key: PublicKey,
    ) -> Result<Mempool> {
        let store = BlockStore::open(&dir.join(BLOCKS_DIR))?;
        let mut chain = Chain::new(difficulty);
        store.replay(&mut chain)?;

        let candidate =
            Block::candidate(chain.tip_hash(), next_height(&chain)?, &miner_key, 0, vec![])?;
        info!(
            "Mempool ready at height {} from {}, mining to {}",
            chain.height(),
            store.dir().display(),
            miner_key.fingerprint()
        );
        Ok(Mempool {
            state: RwLock::new(PoolState {
                chain,
                pending: BTreeMap::new(),
                candidate,
            }),
            miner_key,
            store,
            mine_interval,
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, PoolState>> {
        self.state
            .read()
            .map_err(|_| BlockchainError::Invariant("Mempool lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, PoolState>> {
        self.state
            .write()
            .map_err(|_| BlockchainError::Invariant("Mempool lock poisoned".to_string()))
    }

    pub fn miner_key(&self) -> &PublicKey {
        &self.miner_key
    }

    /// Unsigned payment built from the sender's confirmed unspent outputs.
    pub fn construct_transaction(
        &self,
        sender: &PublicKey,
        receiver: &PublicKey,
        amount: u64,
        fee: u64,
    ) -> Result<Transaction> {
        self.read()?
            .chain
            .construct_transaction(sender, receiver, amount, fee)
    }

    /// Admit `tx` if it is valid together with everything already pending.
    pub fn add_transaction(&self, tx: Transaction) -> Result<()> {
        let tx_hash = tx.hash();
        let mut state = self.write()?;
        if state.pending.contains_key(&tx_hash) {
            return Err(BlockchainError::Transaction(format!(
                "Transaction {tx_hash} is already pending"
            )));
        }

        let mut all: Vec<Transaction> = state.pending.values().cloned().collect();
        all.push(tx.clone());
        state.chain.validate_transactions(&all)?;

        state.pending.insert(tx_hash, tx);
        self.rebuild_candidate(&mut state)?;
        info!("Accepted transaction {tx_hash}, {} pending", state.pending.len());
        Ok(())
    }

    /// Block until the candidate satisfies the difficulty target. Every attempt
    /// re-validates the candidate under the shared lock; a candidate that fails
    /// there is a fatal inconsistency.
    pub fn mine(&self) -> Result<Hash> {
        loop {
            let (header, pow) = {
                let state = self.read()?;
                state
                    .chain
                    .validate_block(&state.candidate, false)
                    .map_err(|e| {
                        BlockchainError::Invariant(format!("Mining candidate became invalid: {e}"))
                    })?;
                (
                    state.candidate.header.clone(),
                    ProofOfWork::new(state.chain.difficulty()),
                )
            };

            if let Some(nonce) = pow.attempt(&header) {
                let mut state = self.write()?;
                // the candidate may have been rebuilt while the lock was released
                if state.candidate.header == header {
                    state.candidate.header.nonce = nonce;
                    let hash = state.candidate.hash();
                    debug!("Found nonce {nonce} for candidate {hash}");
                    return Ok(hash);
                }
                continue;
            }

            if !self.mine_interval.is_zero() {
                thread::sleep(self.mine_interval);
            }
        }
    }

    /// Append `block`, or the current candidate when `None`, rebuild the
    /// candidate from what is still pending and persist the block. Once the
    /// chain accepts the block it stays committed; a failed write is logged.
    pub fn append_block(&self, block: Option<Block>) -> Result<Arc<Block>> {
        let mut state = self.write()?;
        let block = match block {
            Some(block) => block,
            None => state.candidate.clone(),
        };
        state.chain.append_block(block)?;

        let height = state.chain.height();
        let tip = state.chain.tip().clone();
        info!("Appended block {} at height {height}", tip.hash());
        self.rebuild_candidate(&mut state)?;
        self.persist(height, &tip);
        Ok(tip)
    }

    /// Replace the chain tail with `blocks`, which start at height `from`, when
    /// the result is strictly longer than the current chain. The live chain is
    /// untouched unless the switch succeeds.
    pub fn switch_chain(&self, blocks: Vec<Block>, from: usize) -> Result<()> {
        let mut state = self.write()?;
        let current = state.chain.len();
        let proposed = blocks.len() + from;
        if proposed <= current {
            return Err(BlockchainError::StaleChain { proposed, current });
        }
        if from == 0 || from > current {
            return Err(BlockchainError::InvalidBlock(format!(
                "Cannot switch chain at height {from} with local height {}",
                state.chain.height()
            )));
        }

        let mut chain = state.chain.clone();
        chain.rollback_to(from - 1)?;
        for (offset, block) in blocks.into_iter().enumerate() {
            if let Err(e) = chain.append_block(block) {
                if e.is_fatal() {
                    return Err(e);
                }
                info!("Alternative chain rejected at height {}: {e}", from + offset);
                break;
            }
        }
        if chain.len() <= current {
            return Err(BlockchainError::StaleChain {
                proposed: chain.len(),
                current,
            });
        }

        info!(
            "Switched to chain of height {} diverging at height {from}",
            chain.height()
        );
        state.chain = chain;
        self.rebuild_candidate(&mut state)?;
        for height in from..state.chain.len() {
            if let Some(block) = state.chain.block(height) {
                self.persist(height, block);
            }
        }
        Ok(())
    }

    // the in-memory chain is authoritative; a missing file only shortens the
    // next replay
    fn persist(&self, height: usize, block: &Block) {
        if let Err(e) = self.store.save(height, block) {
            error!(
                "Failed to write block {height} to {}: {e}",
                self.store.dir().display()
            );
        }
    }

    /// Greedily keep pending transactions, in hash order, that stay valid
    /// together; drop the rest and rebuild the candidate on the current tip.
    fn rebuild_candidate(&self, state: &mut PoolState) -> Result<()> {
        let PoolState {
            chain,
            pending,
            candidate,
        } = state;

        let mut kept: Vec<Transaction> = Vec::with_capacity(pending.len());
        let mut fees = 0;
        pending.retain(|tx_hash, tx| {
            kept.push(tx.clone());
            match chain.validate_transactions(&kept) {
                Ok(total) => {
                    fees = total;
                    true
                }
                Err(e) => {
                    debug!("Dropping pending transaction {tx_hash}: {e}");
                    kept.pop();
                    false
                }
            }
        });

        let height = next_height(chain)?;
        *candidate = Block::candidate(chain.tip_hash(), height, &self.miner_key, fees, kept)?;
        Ok(())
    }

    pub fn get_block(&self, height: usize) -> Result<Option<Arc<Block>>> {
        Ok(self.read()?.chain.block(height).cloned())
    }

    pub fn get_block_hash(&self, height: usize) -> Result<Option<Hash>> {
        Ok(self.read()?.chain.block_hash(height))
    }

    /// Tip height and tip block.
    pub fn latest_info(&self) -> Result<(usize, Arc<Block>)> {
        let state = self.read()?;
        Ok((state.chain.height(), state.chain.tip().clone()))
    }

    /// Value of the confirmed output `input` points at.
    pub fn tx_output_value(&self, input: &TxIn) -> Result<Option<u64>> {
        Ok(self.read()?.chain.output(input).map(|output| output.value))
    }

    pub fn balance(&self, owner: &PublicKey) -> Result<u64> {
        Ok(self.read()?.chain.balance_of(owner))
    }

    pub fn pending_count(&self) -> Result<usize> {
        Ok(self.read()?.pending.len())
    }

    pub fn candidate(&self) -> Result<Block> {
        Ok(self.read()?.candidate.clone())
    }
}

fn next_height(chain: &Chain) -> Result<u32> {
    u32::try_from(chain.len())
        .map_err(|_| BlockchainError::Invariant("Chain height exceeds u32".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::test_utils::{commit_candidate, temp_mempool};
    use crate::wallet::Key;
    use std::fs;
    use tempfile::tempdir;

    fn signed(mempool: &Mempool, from: &Key, to: &PublicKey, amount: u64, fee: u64) -> Transaction {
        let mut tx = mempool
            .construct_transaction(&from.public(), to, amount, fee)
            .unwrap();
        tx.sign(from).unwrap();
        tx
    }

    #[test]
    fn test_open_creates_miner_key_and_replays() {
        let dir = tempdir().unwrap();
        let miner = {
            let mempool = Mempool::open(dir.path(), 0, Duration::ZERO).unwrap();
            commit_candidate(&mempool);
            commit_candidate(&mempool);
            mempool.miner_key().clone()
        };
        assert!(dir.path().join("wallets").join("miner.key").exists());
        assert!(dir.path().join("blocks").join("Block2.dat").exists());

        let reopened = Mempool::open(dir.path(), 0, Duration::ZERO).unwrap();
        assert_eq!(reopened.miner_key(), &miner);
        assert_eq!(reopened.latest_info().unwrap().0, 2);
        assert_eq!(reopened.balance(&miner).unwrap(), 2048);
    }

    #[test]
    fn test_add_transaction_updates_candidate() {
        let (mempool, miner, _dir) = temp_mempool(0);
        commit_candidate(&mempool);
        let bob = Key::generate().unwrap().public();

        let tx = signed(&mempool, &miner, &bob, 100, 5);
        mempool.add_transaction(tx.clone()).unwrap();
        assert!(mempool.add_transaction(tx.clone()).is_err());

        let candidate = mempool.candidate().unwrap();
        assert_eq!(candidate.transactions.len(), 2);
        assert_eq!(candidate.transactions[0].outputs[0].value, 1029);
        assert_eq!(candidate.transactions[1], tx);
        assert_eq!(mempool.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_conflicting_transaction_rejected() {
        let (mempool, miner, _dir) = temp_mempool(0);
        commit_candidate(&mempool);
        let bob = Key::generate().unwrap().public();
        let carol = Key::generate().unwrap().public();

        mempool
            .add_transaction(signed(&mempool, &miner, &bob, 10, 0))
            .unwrap();
        let conflict = signed(&mempool, &miner, &carol, 20, 0);
        assert!(matches!(
            mempool.add_transaction(conflict),
            Err(BlockchainError::DoubleSpend { .. })
        ));
        assert_eq!(mempool.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_append_prunes_pending() {
        let (mempool, miner, _dir) = temp_mempool(0);
        commit_candidate(&mempool);
        let bob = Key::generate().unwrap().public();
        mempool
            .add_transaction(signed(&mempool, &miner, &bob, 10, 1))
            .unwrap();

        commit_candidate(&mempool);
        assert_eq!(mempool.pending_count().unwrap(), 0);
        assert_eq!(mempool.balance(&bob).unwrap(), 10);
        assert_eq!(mempool.candidate().unwrap().transactions.len(), 1);
    }

    #[test]
    fn test_append_rejects_invalid_block() {
        let (mempool, _miner, _dir) = temp_mempool(0);
        let stray = Block::new(Hash([3u8; 32]), 0, vec![]);
        assert!(mempool.append_block(Some(stray)).is_err());
        assert_eq!(mempool.latest_info().unwrap().0, 0);
    }

    #[test]
    fn test_mine_meets_difficulty() {
        let (mempool, _miner, _dir) = temp_mempool(8);
        let hash = mempool.mine().unwrap();
        assert!(hash.leading_zero_bits() >= 8);
        let tip = mempool.append_block(None).unwrap();
        assert_eq!(tip.hash(), hash);
    }

    #[test]
    fn test_tx_output_value() {
        let (mempool, miner, _dir) = temp_mempool(0);
        commit_candidate(&mempool);
        let (_, tip) = mempool.latest_info().unwrap();
        let coinbase = TxIn::new(tip.transactions[0].hash(), 0);
        assert_eq!(mempool.tx_output_value(&coinbase).unwrap(), Some(1024));
        assert_eq!(
            mempool
                .tx_output_value(&TxIn::new(tip.transactions[0].hash(), 1))
                .unwrap(),
            None
        );
        assert_eq!(mempool.balance(&miner.public()).unwrap(), 1024);
    }

    #[test]
    fn test_switch_chain_to_longer_fork() {
        let (local, _, _dir_a) = temp_mempool(0);
        let (remote, _, _dir_b) = temp_mempool(0);
        for _ in 0..2 {
            commit_candidate(&local);
        }
        for _ in 0..4 {
            commit_candidate(&remote);
        }

        let fork: Vec<Block> = (1..=4)
            .map(|h| remote.get_block(h).unwrap().unwrap().as_ref().clone())
            .collect();
        local.switch_chain(fork, 1).unwrap();
        let remote_tip = remote.get_block_hash(4).unwrap().unwrap();
        assert_eq!(local.latest_info().unwrap().1.hash(), remote_tip);
        assert_eq!(local.candidate().unwrap().header.prev_hash, remote_tip);
    }

    #[test]
    fn test_switch_chain_rejects_shorter_and_keeps_state() {
        let (local, _, _dir_a) = temp_mempool(0);
        let (remote, _, _dir_b) = temp_mempool(0);
        for _ in 0..3 {
            commit_candidate(&local);
        }
        for _ in 0..3 {
            commit_candidate(&remote);
        }
        let before: Vec<Vec<u8>> = (0..=3)
            .map(|h| local.get_block(h).unwrap().unwrap().encode())
            .collect();

        let fork: Vec<Block> = (1..=3)
            .map(|h| remote.get_block(h).unwrap().unwrap().as_ref().clone())
            .collect();
        assert!(matches!(
            local.switch_chain(fork.clone(), 1),
            Err(BlockchainError::StaleChain { proposed: 4, current: 4 })
        ));

        // long enough on paper but invalid past the first block
        let mut broken = fork;
        broken.push(broken[2].clone());
        assert!(local.switch_chain(broken, 1).is_err());

        let after: Vec<Vec<u8>> = (0..=3)
            .map(|h| local.get_block(h).unwrap().unwrap().encode())
            .collect();
        assert_eq!(before, after);
        assert_eq!(local.get_block(4).unwrap(), None);
    }

    fn height(mempool: &Mempool) -> usize {
        mempool.latest_info().unwrap().0
    }

    fn break_block_dir(dir: &Path) {
        let blocks = dir.join(BLOCKS_DIR);
        fs::remove_dir_all(&blocks).unwrap();
        fs::write(&blocks, b"not a directory").unwrap();
    }

    #[test]
    fn test_failed_block_write_keeps_block_and_mining() {
        let (mempool, _miner, dir) = temp_mempool(0);
        commit_candidate(&mempool);
        break_block_dir(dir.path());

        mempool.mine().unwrap();
        let tip = mempool.append_block(None).unwrap();
        assert_eq!(height(&mempool), 2);
        assert_eq!(mempool.candidate().unwrap().header.prev_hash, tip.hash());

        mempool.mine().unwrap();
        mempool.append_block(None).unwrap();
        assert_eq!(height(&mempool), 3);
    }

    #[test]
    fn test_failed_block_write_during_switch_keeps_new_chain() {
        let (local, _, dir) = temp_mempool(0);
        let (remote, _, _dir_b) = temp_mempool(0);
        commit_candidate(&local);
        for _ in 0..3 {
            commit_candidate(&remote);
        }
        break_block_dir(dir.path());

        let fork: Vec<Block> = (1..=3)
            .map(|h| remote.get_block(h).unwrap().unwrap().as_ref().clone())
            .collect();
        local.switch_chain(fork, 1).unwrap();
        assert_eq!(local.get_block_hash(3).unwrap(), remote.get_block_hash(3).unwrap());

        local.mine().unwrap();
        local.append_block(None).unwrap();
        assert_eq!(height(&local), 4);
    }

    #[test]
    fn test_mined_candidate_stale_after_switch() {
        let (local, _, _dir_a) = temp_mempool(8);
        let (remote, _, _dir_b) = temp_mempool(8);
        commit_candidate(&local);
        for _ in 0..3 {
            commit_candidate(&remote);
        }

        local.mine().unwrap();
        let mined = local.candidate().unwrap();
        let fork: Vec<Block> = (1..=3)
            .map(|h| remote.get_block(h).unwrap().unwrap().as_ref().clone())
            .collect();
        local.switch_chain(fork, 1).unwrap();
        let tip = local.latest_info().unwrap().1.hash();

        let err = local.append_block(Some(mined)).unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(local.latest_info().unwrap().1.hash(), tip);

        // the rebuilt candidate has not been mined yet
        let rebuilt = local.candidate().unwrap();
        if !ProofOfWork::new(8).validate(&rebuilt.header) {
            let err = local.append_block(None).unwrap_err();
            assert!(!err.is_fatal());
            assert_eq!(local.latest_info().unwrap().1.hash(), tip);
        }

        commit_candidate(&local);
        assert_eq!(height(&local), 4);
        assert_eq!(local.get_block_hash(3).unwrap(), Some(tip));
    }

    #[test]
    fn test_mined_candidate_stale_after_new_transaction() {
        let (mempool, miner, _dir) = temp_mempool(8);
        commit_candidate(&mempool);
        let bob = Key::generate().unwrap().public();

        mempool.mine().unwrap();
        let mined = mempool.candidate().unwrap();
        mempool
            .add_transaction(signed(&mempool, &miner, &bob, 10, 1))
            .unwrap();
        let rebuilt = mempool.candidate().unwrap();
        assert_ne!(rebuilt.header, mined.header);

        if !ProofOfWork::new(8).validate(&rebuilt.header) {
            let err = mempool.append_block(None).unwrap_err();
            assert!(!err.is_fatal());
            assert_eq!(height(&mempool), 1);
        }

        commit_candidate(&mempool);
        assert_eq!(height(&mempool), 2);
        assert_eq!(mempool.balance(&bob).unwrap(), 10);
    }
}
