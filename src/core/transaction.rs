// Transactions move value in the UTXO model: each input points at an output of an
// earlier confirmed transaction and each output locks value to a public key.
// Signature i authorizes inputs[i] and covers a trimmed copy of the transaction
// holding only that input, every output and no signatures.

use crate::core::codec::{write_list, write_u32, write_u64, DecodeError, Encodable, Reader};
use crate::core::{Hash, DEFAULT_HASH, TAG_INPUT, TAG_OUTPUT, TAG_TRANSACTION};
use crate::error::{BlockchainError, Result};
use crate::wallet::{Key, PublicKey, PUBLIC_KEY_LEN};
use data_encoding::HEXLOWER;
use serde::{Serialize, Serializer};

/// Variable-length ASN.1 DER ECDSA signature.
pub type Signature = Vec<u8>;

/// Pointer to output `output_index` of confirmed transaction `source_tx`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TxIn {
    pub source_tx: Hash,
    pub output_index: u32,
}

impl TxIn {
    pub fn new(source_tx: Hash, output_index: u32) -> TxIn {
        TxIn {
            source_tx,
            output_index,
        }
    }
}

impl Encodable for TxIn {
    const TAG: u32 = TAG_INPUT;

    fn encode_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.source_tx.as_bytes());
        write_u32(out, self.output_index);
    }

    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<TxIn, DecodeError> {
        let source_tx = reader.read_hash()?;
        let output_index = reader.read_u32()?;
        Ok(TxIn {
            source_tx,
            output_index,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxOut {
    pub value: u64,
    pub owner: PublicKey,
}

impl TxOut {
    pub fn new(value: u64, owner: PublicKey) -> TxOut {
        TxOut { value, owner }
    }

    pub fn is_owned_by(&self, key: &PublicKey) -> bool {
        self.owner == *key
    }
}

impl Encodable for TxOut {
    const TAG: u32 = TAG_OUTPUT;

    fn encode_to(&self, out: &mut Vec<u8>) {
        write_u64(out, self.value);
        out.extend_from_slice(self.owner.as_bytes());
    }

    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<TxOut, DecodeError> {
        let value = reader.read_u64()?;
        let owner = PublicKey::from_bytes(reader.read_bytes(PUBLIC_KEY_LEN)?)?;
        Ok(TxOut { value, owner })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transaction {
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    #[serde(serialize_with = "serialize_signatures")]
    pub signatures: Vec<Signature>,
}

impl Transaction {
    /// An unsigned transaction.
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Transaction {
        Transaction {
            inputs,
            outputs,
            signatures: vec![],
        }
    }

    /// The reward transaction heading a block at `height`.
    pub fn coinbase(height: u32, miner: PublicKey, value: u64) -> Transaction {
        Transaction::new(
            vec![TxIn::new(DEFAULT_HASH, height)],
            vec![TxOut::new(value, miner)],
        )
    }

    /// Coinbase shape: a single input pointing at the null hash.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].source_tx == DEFAULT_HASH
    }

    /// Sum of output values, `None` on overflow.
    pub fn total_output(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, output| acc.checked_add(output.value))
    }

    /// Digest that signature `index` must cover, `None` when the input does not exist.
    pub fn sighash(&self, index: usize) -> Option<Hash> {
        let input = self.inputs.get(index)?;
        // identical to encoding a copy with one input and no signatures
        let mut out = Vec::new();
        write_u32(&mut out, 1);
        input.encode_to(&mut out);
        write_list(&mut out, &self.outputs);
        write_u32(&mut out, 0);
        Some(Hash::digest(&out))
    }

    /// Sign every input with `key`, replacing any existing signatures.
    pub fn sign(&mut self, key: &Key) -> Result<()> {
        let mut signatures = Vec::with_capacity(self.inputs.len());
        for index in 0..self.inputs.len() {
            let digest = self.sighash(index).ok_or_else(|| {
                BlockchainError::Transaction(format!("No input at index {index}"))
            })?;
            signatures.push(key.sign(digest.as_bytes())?);
        }
        self.signatures = signatures;
        Ok(())
    }

    /// Whether signature `index` authorizes its input under `owner`.
    pub fn verify_input(&self, index: usize, owner: &PublicKey) -> bool {
        match (self.sighash(index), self.signatures.get(index)) {
            (Some(digest), Some(signature)) => owner.verify(digest.as_bytes(), signature),
            _ => false,
        }
    }

    /// Indices of inputs whose signature verifies under `key`.
    pub fn inputs_signed_by(&self, key: &PublicKey) -> Vec<usize> {
        (0..self.inputs.len())
            .filter(|&index| self.verify_input(index, key))
            .collect()
    }

    /// Indices of outputs locked to `key`.
    pub fn outputs_owned_by(&self, key: &PublicKey) -> Vec<usize> {
        self.outputs
            .iter()
            .enumerate()
            .filter(|(_, output)| output.is_owned_by(key))
            .map(|(index, _)| index)
            .collect()
    }
}

impl Encodable for Transaction {
    const TAG: u32 = TAG_TRANSACTION;

    fn encode_to(&self, out: &mut Vec<u8>) {
        write_list(out, &self.inputs);
        write_list(out, &self.outputs);
        write_u32(out, self.signatures.len() as u32);
        for signature in &self.signatures {
            write_u32(out, signature.len() as u32);
            out.extend_from_slice(signature);
        }
    }

    fn decode_from(reader: &mut Reader<'_>) -> std::result::Result<Transaction, DecodeError> {
        let inputs = reader.read_list()?;
        let outputs = reader.read_list()?;
        let count = reader.read_u32()?;
        let mut signatures = Vec::new();
        for _ in 0..count {
            let len = reader.read_u32()? as usize;
            signatures.push(reader.read_bytes(len)?.to_vec());
        }
        Ok(Transaction {
            inputs,
            outputs,
            signatures,
        })
    }
}

fn serialize_signatures<S: Serializer>(
    signatures: &[Signature],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(signatures.iter().map(|s| HEXLOWER.encode(s)))
}
