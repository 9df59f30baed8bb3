//! Command-line interface
//!
//! Argument parsing for the node daemon and the wallet commands.

pub mod commands;

pub use commands::{Command, NodeAddr, Opt, WalletDir};
