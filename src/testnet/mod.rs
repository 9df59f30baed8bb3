//! Test helpers
//!
//! Throwaway mempools in temporary directories, a brute-force miner for
//! building chains by hand and signed payment builders.

pub mod test_utils;

pub use test_utils::*;
