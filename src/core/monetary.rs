/// Monetary constants
///
/// Values are plain integer units; there is no subdivision and no halving.
///
/// Value created by every block's coinbase on top of the fees it collects.
pub const MINER_REWARD: u64 = 1024;

/// Coinbase value for a block collecting `fees`, `None` on overflow.
pub fn coinbase_value(fees: u64) -> Option<u64> {
    MINER_REWARD.checked_add(fees)
}
