//! Binary encoding for the ledger primitives
//!
//! All integers are little-endian, lists carry a 4-byte count and signatures
//! a 4-byte byte length. A top-level value travels in an envelope: a 4-byte
//! type tag followed by the untagged body. Hashes are always taken over the
//! untagged body.

use crate::core::{Block, BlockHeader, Hash, Transaction, TxIn, TxOut};
use serde::Serialize;
use std::fmt;

pub const TAG_HEADER: u32 = 0;
pub const TAG_BLOCK: u32 = 1;
pub const TAG_TRANSACTION: u32 = 2;
pub const TAG_INPUT: u32 = 3;
pub const TAG_OUTPUT: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The input ended in the middle of a value
    UnexpectedEof,
    /// The envelope tag names no known type
    UnknownTag(u32),
    /// The envelope holds a different type than the caller asked for
    UnexpectedType { expected: u32, found: u32 },
    InvalidPublicKey(String),
    /// Bytes left over after a complete value
    TrailingBytes(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of input"),
            DecodeError::UnknownTag(tag) => write!(f, "unknown type tag {tag}"),
            DecodeError::UnexpectedType { expected, found } => {
                write!(f, "expected type tag {expected}, found {found}")
            }
            DecodeError::InvalidPublicKey(msg) => write!(f, "invalid public key: {msg}"),
            DecodeError::TrailingBytes(n) => write!(f, "{n} trailing bytes after value"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Cursor over an encoded byte slice.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Reader<'a> {
        Reader { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.read_bytes(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    pub fn read_hash(&mut self) -> Result<Hash, DecodeError> {
        let mut buf = [0u8; 32];
        buf.copy_from_slice(self.read_bytes(32)?);
        Ok(Hash(buf))
    }

    /// Count-prefixed list. Nothing is reserved up front since the count is untrusted.
    pub fn read_list<T: Encodable>(&mut self) -> Result<Vec<T>, DecodeError> {
        let count = self.read_u32()?;
        let mut items = Vec::new();
        for _ in 0..count {
            items.push(T::decode_from(self)?);
        }
        Ok(items)
    }

    pub fn finish(self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}

pub fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_u64(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

pub fn write_list<T: Encodable>(out: &mut Vec<u8>, items: &[T]) {
    write_u32(out, items.len() as u32);
    for item in items {
        item.encode_to(out);
    }
}

/// A primitive with a binary body and an envelope tag.
pub trait Encodable: Sized {
    const TAG: u32;

    fn encode_to(&self, out: &mut Vec<u8>);

    fn decode_from(reader: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Untagged body.
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_to(&mut out);
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let value = Self::decode_from(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }

    fn hash(&self) -> Hash {
        Hash::digest(&self.encode())
    }

    fn encode_tagged(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u32(&mut out, Self::TAG);
        self.encode_to(&mut out);
        out
    }

    fn decode_tagged(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = Reader::new(bytes);
        let tag = reader.read_u32()?;
        if tag != Self::TAG {
            if tag > TAG_OUTPUT {
                return Err(DecodeError::UnknownTag(tag));
            }
            return Err(DecodeError::UnexpectedType {
                expected: Self::TAG,
                found: tag,
            });
        }
        let value = Self::decode_from(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

/// Any value that can sit inside an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value")]
pub enum Payload {
    Header(BlockHeader),
    Block(Block),
    Transaction(Transaction),
    Input(TxIn),
    Output(TxOut),
}

impl Payload {
    pub fn tag(&self) -> u32 {
        match self {
            Payload::Header(_) => TAG_HEADER,
            Payload::Block(_) => TAG_BLOCK,
            Payload::Transaction(_) => TAG_TRANSACTION,
            Payload::Input(_) => TAG_INPUT,
            Payload::Output(_) => TAG_OUTPUT,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Payload::Header(h) => h.encode_tagged(),
            Payload::Block(b) => b.encode_tagged(),
            Payload::Transaction(tx) => tx.encode_tagged(),
            Payload::Input(input) => input.encode_tagged(),
            Payload::Output(output) => output.encode_tagged(),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Payload, DecodeError> {
        let mut reader = Reader::new(bytes);
        let payload = match reader.read_u32()? {
            TAG_HEADER => Payload::Header(BlockHeader::decode_from(&mut reader)?),
            TAG_BLOCK => Payload::Block(Block::decode_from(&mut reader)?),
            TAG_TRANSACTION => Payload::Transaction(Transaction::decode_from(&mut reader)?),
            TAG_INPUT => Payload::Input(TxIn::decode_from(&mut reader)?),
            TAG_OUTPUT => Payload::Output(TxOut::decode_from(&mut reader)?),
            tag => return Err(DecodeError::UnknownTag(tag)),
        };
        reader.finish()?;
        Ok(payload)
    }

    /// Hash of the wrapped value's body.
    pub fn hash(&self) -> Hash {
        match self {
            Payload::Header(h) => h.hash(),
            Payload::Block(b) => b.hash(),
            Payload::Transaction(tx) => tx.hash(),
            Payload::Input(input) => input.hash(),
            Payload::Output(output) => output.hash(),
        }
    }
}
