//! Peer-to-peer networking
//!
//! Newline separated JSON packages over TCP, one exchange per connection.
//! Nodes handshake, relay transactions, announce blocks and, when an
//! announcement is more than one block ahead, walk back to the fork point and
//! switch to the longer chain. Wallets use the same packages to build
//! payments and fetch their transaction records.

pub mod client;
pub mod peers;
pub mod protocol;
pub mod server;
pub mod sync;
pub mod task_pool;

pub use client::{
    announce_block, broadcast_transaction, construct_transaction, fan_out, handshake,
    request_header, request_records,
};
pub use peers::Peers;
pub use protocol::{Connection, Package, TransactionRecord};
pub use server::{Node, Server};
pub use sync::{fetch_blocks, find_fork_point, sync_from_peer, BlockSource, PeerSource};
pub use task_pool::TaskPool;
