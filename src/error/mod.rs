//! Error handling for the ledger
//!
//! Errors fall into three groups. Rejections (bad input, policy violations)
//! leave state untouched and may be dropped or retried by the caller. Fatal
//! invariants (`Invariant`) mean an already-validated block or candidate broke
//! a structural assumption; callers must stop instead of carrying on. I/O and
//! network failures propagate so the caller can retry or skip the peer.

use crate::core::DecodeError;
use std::fmt;

/// Result type alias for blockchain operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// Malformed binary encoding
    Decode(DecodeError),
    /// Cryptographic operation errors
    Crypto(String),
    /// Network communication errors
    Network(String),
    /// Transaction validation errors
    Transaction(String),
    /// Two inputs in one candidate set reference the same output
    DoubleSpend { source_tx: String, output_index: u32 },
    /// Wallet / key store errors
    Wallet(String),
    /// Configuration errors
    Config(String),
    /// JSON / TOML errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Insufficient funds for transaction
    InsufficientFunds { required: u64, available: u64 },
    /// Block validation errors
    InvalidBlock(String),
    /// A competing chain is not strictly longer than ours
    StaleChain { proposed: usize, current: usize },
    /// Consensus invariant broken after validation passed
    Invariant(String),
}

impl BlockchainError {
    /// Whether the error signals a defect rather than a rejected input.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BlockchainError::Invariant(_))
    }
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::Decode(err) => write!(f, "Decode error: {err}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Network(msg) => write!(f, "Network error: {msg}"),
            BlockchainError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            BlockchainError::DoubleSpend {
                source_tx,
                output_index,
            } => write!(
                f,
                "Double spend: output {source_tx}:{output_index} referenced twice"
            ),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            BlockchainError::StaleChain { proposed, current } => write!(
                f,
                "Not a longer chain: proposed length {proposed}, current length {current}"
            ),
            BlockchainError::Invariant(msg) => write!(f, "Consensus invariant violated: {msg}"),
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<DecodeError> for BlockchainError {
    fn from(err: DecodeError) -> Self {
        BlockchainError::Decode(err)
    }
}

impl From<serde_json::Error> for BlockchainError {
    fn from(err: serde_json::Error) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}
