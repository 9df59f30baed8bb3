// The ledger: one linear sequence of blocks starting at genesis, the lifetime
// index of every confirmed transaction and a spent/unspent flag per output.
// Blocks are shared through Arc so a clone of the whole chain is cheap enough
// to attempt a reorg on the side and swap it in only when it succeeds.

use crate::core::{
    Block, Encodable, Hash, ProofOfWork, Transaction, TxIn, TxOut, DEFAULT_HASH,
};
use crate::error::{BlockchainError, Result};
use crate::wallet::PublicKey;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Where a confirmed transaction lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxLocation {
    pub height: usize,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct Chain {
    blocks: Vec<Arc<Block>>,
    pow: ProofOfWork,
    tx_index: HashMap<Hash, TxLocation>,
    // one flag per output, true while unspent
    utxo: HashMap<Hash, Vec<bool>>,
}

#[allow(clippy::len_without_is_empty)]
impl Chain {
    /// A chain holding only the genesis block.
    pub fn new(difficulty: u32) -> Chain {
        Chain {
            blocks: vec![Arc::new(Block::genesis())],
            pow: ProofOfWork::new(difficulty),
            tx_index: HashMap::new(),
            utxo: HashMap::new(),
        }
    }

    pub fn difficulty(&self) -> u32 {
        self.pow.difficulty()
    }

    /// Height of the tip; genesis is height 0.
    pub fn height(&self) -> usize {
        self.blocks.len() - 1
    }

    /// Number of blocks including genesis.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn tip(&self) -> &Arc<Block> {
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn tip_hash(&self) -> Hash {
        self.tip().hash()
    }

    pub fn block(&self, height: usize) -> Option<&Arc<Block>> {
        self.blocks.get(height)
    }

    pub fn block_hash(&self, height: usize) -> Option<Hash> {
        self.block(height).map(|block| block.hash())
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Arc<Block>> {
        self.blocks.iter()
    }

    pub fn location(&self, tx_hash: &Hash) -> Option<TxLocation> {
        self.tx_index.get(tx_hash).copied()
    }

    pub fn transaction(&self, tx_hash: &Hash) -> Option<&Transaction> {
        let location = self.tx_index.get(tx_hash)?;
        self.blocks
            .get(location.height)?
            .transactions
            .get(location.index)
    }

    /// The confirmed output an input points at, spent or not.
    pub fn output(&self, input: &TxIn) -> Option<&TxOut> {
        self.transaction(&input.source_tx)?
            .outputs
            .get(input.output_index as usize)
    }

    pub fn is_unspent(&self, input: &TxIn) -> bool {
        self.utxo
            .get(&input.source_tx)
            .and_then(|flags| flags.get(input.output_index as usize))
            .copied()
            .unwrap_or(false)
    }

    /// Unspent outputs locked to `owner`, oldest first.
    pub fn unspent_outputs_of(&self, owner: &PublicKey) -> Vec<(TxIn, u64)> {
        let mut found = Vec::new();
        for block in &self.blocks {
            for tx in &block.transactions {
                let tx_hash = tx.hash();
                for index in tx.outputs_owned_by(owner) {
                    let input = TxIn::new(tx_hash, index as u32);
                    if self.is_unspent(&input) {
                        found.push((input, tx.outputs[index].value));
                    }
                }
            }
        }
        found
    }

    pub fn balance_of(&self, owner: &PublicKey) -> u64 {
        self.unspent_outputs_of(owner)
            .iter()
            .fold(0u64, |acc, (_, value)| acc.saturating_add(*value))
    }

    pub fn unspent_count(&self) -> usize {
        self.utxo
            .values()
            .map(|flags| flags.iter().filter(|unspent| **unspent).count())
            .sum()
    }

    /// Check a set of non-coinbase transactions against the current UTXO set
    /// and return the fees they leave for the miner.
    ///
    /// Each input must point at an existing unspent output that no other input
    /// in the set claims, its signature must verify under that output's owner,
    /// no transaction may already be confirmed and inputs must cover outputs.
    pub fn validate_transactions(&self, txs: &[Transaction]) -> Result<u64> {
        let mut fees = 0u64;
        let mut claimed: HashSet<&TxIn> = HashSet::new();
        let mut seen: HashSet<Hash> = HashSet::new();

        for tx in txs {
            let tx_hash = tx.hash();
            if tx.inputs.is_empty() {
                return Err(BlockchainError::Transaction(format!(
                    "Transaction {tx_hash} has no inputs"
                )));
            }
            if tx.is_coinbase() {
                return Err(BlockchainError::Transaction(format!(
                    "Transaction {tx_hash} has coinbase shape outside the first position"
                )));
            }
            if self.tx_index.contains_key(&tx_hash) || !seen.insert(tx_hash) {
                return Err(BlockchainError::Transaction(format!(
                    "Transaction {tx_hash} is already confirmed"
                )));
            }
            if tx.signatures.len() != tx.inputs.len() {
                return Err(BlockchainError::Transaction(format!(
                    "Transaction {tx_hash} has {} signatures for {} inputs",
                    tx.signatures.len(),
                    tx.inputs.len()
                )));
            }

            let mut input_total = 0u64;
            for (index, input) in tx.inputs.iter().enumerate() {
                let output = self.output(input).ok_or_else(|| {
                    BlockchainError::Transaction(format!(
                        "Input {index} of {tx_hash} references unknown output {}:{}",
                        input.source_tx, input.output_index
                    ))
                })?;
                if !self.is_unspent(input) {
                    return Err(BlockchainError::Transaction(format!(
                        "Input {index} of {tx_hash} spends already spent output {}:{}",
                        input.source_tx, input.output_index
                    )));
                }
                if !claimed.insert(input) {
                    return Err(BlockchainError::DoubleSpend {
                        source_tx: input.source_tx.to_hex(),
                        output_index: input.output_index,
                    });
                }
                if !tx.verify_input(index, &output.owner) {
                    return Err(BlockchainError::Transaction(format!(
                        "Invalid signature for input {index} of {tx_hash}"
                    )));
                }
                input_total = input_total.checked_add(output.value).ok_or_else(|| {
                    BlockchainError::Transaction(format!("Input total of {tx_hash} overflows"))
                })?;
            }

            let output_total = tx.total_output().ok_or_else(|| {
                BlockchainError::Transaction(format!("Output total of {tx_hash} overflows"))
            })?;
            if input_total < output_total {
                return Err(BlockchainError::Transaction(format!(
                    "Transaction {tx_hash} spends {output_total} but only has {input_total}"
                )));
            }
            fees = fees
                .checked_add(input_total - output_total)
                .ok_or_else(|| BlockchainError::Transaction("Fee total overflows".to_string()))?;
        }
        Ok(fees)
    }

    /// Check `block` as the next block on this chain and return the fees it collects.
    ///
    /// The coinbase value is not compared with the fees; callers that build
    /// candidates size it from the returned total.
    pub fn validate_block(&self, block: &Block, check_difficulty: bool) -> Result<u64> {
        let height = self.blocks.len();
        if block.header.prev_hash != self.tip_hash() {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block at height {height} does not extend tip {}",
                self.tip_hash()
            )));
        }
        if block.transactions.is_empty() {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block at height {height} has no coinbase"
            )));
        }
        if !block.has_valid_merkle_root() {
            return Err(BlockchainError::InvalidBlock(format!(
                "Merkle root mismatch at height {height}"
            )));
        }
        if check_difficulty && !self.pow.validate(&block.header) {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block hash {} does not meet difficulty {}",
                block.hash(),
                self.difficulty()
            )));
        }

        let fees = self.validate_transactions(&block.transactions[1..])?;

        let coinbase = &block.transactions[0];
        let expected_index = u32::try_from(height)
            .map_err(|_| BlockchainError::InvalidBlock(format!("Height {height} out of range")))?;
        let well_formed = coinbase.inputs.len() == 1
            && coinbase.inputs[0].source_tx == DEFAULT_HASH
            && coinbase.inputs[0].output_index == expected_index;
        if !well_formed {
            return Err(BlockchainError::InvalidBlock(format!(
                "Malformed coinbase at height {height}"
            )));
        }
        Ok(fees)
    }

    /// Validate (including difficulty) and append the next block.
    pub fn append_block(&mut self, block: Block) -> Result<()> {
        self.validate_block(&block, true)?;
        let height = self.blocks.len();

        for (index, tx) in block.transactions.iter().enumerate() {
            if index > 0 {
                for input in &tx.inputs {
                    self.set_spent(input, true)?;
                }
            }
            let tx_hash = tx.hash();
            self.tx_index.insert(tx_hash, TxLocation { height, index });
            self.utxo.insert(tx_hash, vec![true; tx.outputs.len()]);
        }
        self.blocks.push(Arc::new(block));
        Ok(())
    }

    /// Undo the tip block. Genesis can never be removed.
    pub fn rollback_block(&mut self) -> Result<Arc<Block>> {
        if self.blocks.len() <= 1 {
            return Err(BlockchainError::Invariant(
                "Cannot roll back the genesis block".to_string(),
            ));
        }
        let block = self
            .blocks
            .pop()
            .ok_or_else(|| BlockchainError::Invariant("Chain has no blocks".to_string()))?;

        for (index, tx) in block.transactions.iter().enumerate().rev() {
            let tx_hash = tx.hash();
            self.tx_index.remove(&tx_hash);
            self.utxo.remove(&tx_hash);
            if index > 0 {
                for input in &tx.inputs {
                    self.set_spent(input, false)?;
                }
            }
        }
        Ok(block)
    }

    /// Roll back until `height` is the tip.
    pub fn rollback_to(&mut self, height: usize) -> Result<()> {
        while self.height() > height {
            self.rollback_block()?;
        }
        Ok(())
    }

    /// Flip an output's flag. Anything other than a real state change means an
    /// already validated block was inconsistent with the ledger.
    fn set_spent(&mut self, input: &TxIn, spent: bool) -> Result<()> {
        let flag = self
            .utxo
            .get_mut(&input.source_tx)
            .and_then(|flags| flags.get_mut(input.output_index as usize))
            .ok_or_else(|| {
                BlockchainError::Invariant(format!(
                    "Output {}:{} does not exist",
                    input.source_tx, input.output_index
                ))
            })?;
        if *flag != spent {
            return Err(BlockchainError::Invariant(format!(
                "Output {}:{} is already {}",
                input.source_tx,
                input.output_index,
                if spent { "spent" } else { "unspent" }
            )));
        }
        *flag = !spent;
        Ok(())
    }

    /// Payment of `amount` from `sender` to `receiver` leaving `fee` to the miner.
    /// Oldest outputs are consumed first; change, if any, is the first output.
    pub fn construct_transaction(
        &self,
        sender: &PublicKey,
        receiver: &PublicKey,
        amount: u64,
        fee: u64,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }
        let required = amount
            .checked_add(fee)
            .ok_or_else(|| BlockchainError::Transaction("Amount plus fee overflows".to_string()))?;

        let mut inputs = Vec::new();
        let mut gathered = 0u64;
        for (input, value) in self.unspent_outputs_of(sender) {
            if gathered >= required {
                break;
            }
            gathered = gathered.saturating_add(value);
            inputs.push(input);
        }
        if gathered < required {
            return Err(BlockchainError::InsufficientFunds {
                required,
                available: gathered,
            });
        }

        let mut outputs = Vec::with_capacity(2);
        let change = gathered - required;
        if change > 0 {
            outputs.push(TxOut::new(change, sender.clone()));
        }
        outputs.push(TxOut::new(amount, receiver.clone()));
        Ok(Transaction::new(inputs, outputs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testnet::test_utils::{mine_next, pay};
    use crate::wallet::Key;

    #[test]
    fn test_new_chain_has_only_genesis() {
        let chain = Chain::new(0);
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.height(), 0);
        assert_eq!(**chain.tip(), Block::genesis());
        assert_eq!(chain.unspent_count(), 0);
    }

    #[test]
    fn test_append_links_headers() {
        let miner = Key::generate().unwrap();
        let mut chain = Chain::new(0);
        for _ in 0..3 {
            let block = mine_next(&chain, &miner.public(), vec![]);
            chain.append_block(block).unwrap();
        }
        for height in 0..chain.height() {
            assert_eq!(
                chain.block(height + 1).unwrap().header.prev_hash,
                chain.block_hash(height).unwrap()
            );
        }
        assert_eq!(chain.balance_of(&miner.public()), 3 * 1024);
    }

    #[test]
    fn test_payment_moves_value_and_fees() {
        let alice = Key::generate().unwrap();
        let bob = Key::generate().unwrap();
        let miner = Key::generate().unwrap();
        let mut chain = Chain::new(0);
        chain
            .append_block(mine_next(&chain, &alice.public(), vec![]))
            .unwrap();

        let tx = pay(&chain, &alice, &bob.public(), 100, 1);
        assert_eq!(chain.validate_transactions(&[tx.clone()]).unwrap(), 1);
        let before = chain.unspent_count();
        let block = mine_next(&chain, &miner.public(), vec![tx.clone()]);
        chain.append_block(block).unwrap();

        // coinbase adds one output, the payment consumes one and creates two
        assert_eq!(chain.unspent_count(), before + 1 + tx.outputs.len() - tx.inputs.len());
        assert_eq!(chain.balance_of(&bob.public()), 100);
        assert_eq!(chain.balance_of(&alice.public()), 1024 - 101);
        assert_eq!(chain.balance_of(&miner.public()), 1025);
        assert_eq!(chain.location(&tx.hash()).unwrap().height, 2);
    }

    #[test]
    fn test_rejects_same_output_twice_in_one_set() {
        let alice = Key::generate().unwrap();
        let bob = Key::generate().unwrap();
        let carol = Key::generate().unwrap();
        let mut chain = Chain::new(0);
        chain
            .append_block(mine_next(&chain, &alice.public(), vec![]))
            .unwrap();

        let first = pay(&chain, &alice, &bob.public(), 10, 0);
        let second = pay(&chain, &alice, &carol.public(), 20, 0);
        assert_eq!(first.inputs, second.inputs);
        assert!(matches!(
            chain.validate_transactions(&[first.clone(), second.clone()]),
            Err(BlockchainError::DoubleSpend { .. })
        ));

        let miner = Key::generate().unwrap().public();
        let coinbase = Transaction::coinbase(2, miner, 1024);
        let block = Block::new(chain.tip_hash(), 0, vec![coinbase, first, second]);
        assert!(chain.append_block(block).is_err());
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_rejects_spent_and_duplicate() {
        let alice = Key::generate().unwrap();
        let bob = Key::generate().unwrap();
        let mut chain = Chain::new(0);
        chain
            .append_block(mine_next(&chain, &alice.public(), vec![]))
            .unwrap();
        let tx = pay(&chain, &alice, &bob.public(), 10, 0);
        chain
            .append_block(mine_next(&chain, &alice.public(), vec![tx.clone()]))
            .unwrap();

        assert!(matches!(
            chain.validate_transactions(&[tx]),
            Err(BlockchainError::Transaction(_))
        ));
    }

    #[test]
    fn test_rejects_wrong_signer_and_overspend() {
        let alice = Key::generate().unwrap();
        let mallory = Key::generate().unwrap();
        let mut chain = Chain::new(0);
        chain
            .append_block(mine_next(&chain, &alice.public(), vec![]))
            .unwrap();

        let mut stolen = pay(&chain, &alice, &mallory.public(), 10, 0);
        stolen.sign(&mallory).unwrap();
        assert!(chain.validate_transactions(&[stolen]).is_err());

        let (input, _) = chain.unspent_outputs_of(&alice.public())[0].clone();
        let mut overspend = Transaction::new(
            vec![input],
            vec![TxOut::new(1025, mallory.public())],
        );
        overspend.sign(&alice).unwrap();
        assert!(chain.validate_transactions(&[overspend]).is_err());
    }

    #[test]
    fn test_validate_block_checks() {
        let miner = Key::generate().unwrap().public();
        let chain = Chain::new(0);

        let orphan = Block::candidate(Hash([9u8; 32]), 1, &miner, 0, vec![]).unwrap();
        assert!(matches!(
            chain.validate_block(&orphan, false),
            Err(BlockchainError::InvalidBlock(_))
        ));

        let wrong_height = Block::candidate(chain.tip_hash(), 5, &miner, 0, vec![]).unwrap();
        assert!(chain.validate_block(&wrong_height, false).is_err());

        let mut bad_root = Block::candidate(chain.tip_hash(), 1, &miner, 0, vec![]).unwrap();
        bad_root.header.merkle_root = DEFAULT_HASH;
        assert!(chain.validate_block(&bad_root, false).is_err());

        let empty = Block::new(chain.tip_hash(), 0, vec![]);
        assert!(chain.validate_block(&empty, false).is_err());

        let good = Block::candidate(chain.tip_hash(), 1, &miner, 0, vec![]).unwrap();
        assert_eq!(chain.validate_block(&good, false).unwrap(), 0);
    }

    #[test]
    fn test_difficulty_enforced_on_append() {
        let miner = Key::generate().unwrap();
        let mut chain = Chain::new(12);
        let mut block = Block::candidate(chain.tip_hash(), 1, &miner.public(), 0, vec![]).unwrap();
        while chain.validate_block(&block, true).is_ok() {
            block.randomize_nonce();
        }
        assert!(chain.append_block(block).is_err());

        let mined = mine_next(&chain, &miner.public(), vec![]);
        chain.append_block(mined).unwrap();
        assert_eq!(chain.height(), 1);
    }

    #[test]
    fn test_rollback_restores_state() {
        let alice = Key::generate().unwrap();
        let bob = Key::generate().unwrap();
        let mut chain = Chain::new(0);
        chain
            .append_block(mine_next(&chain, &alice.public(), vec![]))
            .unwrap();
        let unspent_before = chain.unspent_count();
        let tip_before = chain.tip_hash();

        let tx = pay(&chain, &alice, &bob.public(), 10, 2);
        chain
            .append_block(mine_next(&chain, &bob.public(), vec![tx.clone()]))
            .unwrap();
        chain.rollback_block().unwrap();

        assert_eq!(chain.tip_hash(), tip_before);
        assert_eq!(chain.unspent_count(), unspent_before);
        assert!(chain.transaction(&tx.hash()).is_none());
        assert_eq!(chain.balance_of(&alice.public()), 1024);
        assert_eq!(chain.validate_transactions(&[tx]).unwrap(), 2);
    }

    #[test]
    fn test_cannot_roll_back_genesis() {
        let mut chain = Chain::new(0);
        let err = chain.rollback_block().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_clone_is_independent() {
        let miner = Key::generate().unwrap();
        let mut chain = Chain::new(0);
        chain
            .append_block(mine_next(&chain, &miner.public(), vec![]))
            .unwrap();
        let mut copy = chain.clone();
        copy.rollback_block().unwrap();
        assert_eq!(chain.height(), 1);
        assert_eq!(copy.height(), 0);
        assert_eq!(chain.balance_of(&miner.public()), 1024);
    }

    #[test]
    fn test_construct_transaction() {
        let alice = Key::generate().unwrap();
        let bob = Key::generate().unwrap().public();
        let mut chain = Chain::new(0);
        chain
            .append_block(mine_next(&chain, &alice.public(), vec![]))
            .unwrap();

        let tx = chain
            .construct_transaction(&alice.public(), &bob, 100, 1)
            .unwrap();
        assert_eq!(tx.outputs[0], TxOut::new(923, alice.public()));
        assert_eq!(tx.outputs[1], TxOut::new(100, bob.clone()));
        assert!(tx.signatures.is_empty());

        let exact = chain
            .construct_transaction(&alice.public(), &bob, 1000, 24)
            .unwrap();
        assert_eq!(exact.outputs, vec![TxOut::new(1000, bob.clone())]);

        assert_eq!(
            chain.construct_transaction(&alice.public(), &bob, 1024, 1),
            Err(BlockchainError::InsufficientFunds {
                required: 1025,
                available: 1024
            })
        );
    }
}
