use crate::core::{Block, BlockHeader, Encodable, Hash, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::protocol::{reject_errors, Connection, Package, TransactionRecord};
use crate::network::sync::{BlockSource, PeerSource};
use crate::storage::Mempool;
use crate::wallet::PublicKey;
use log::{debug, info, warn};
use std::thread;

/// Introduce ourselves to `peer`; returns the address it listens on.
pub fn handshake(peer: &str, own_addr: &str) -> Result<String> {
    let mut conn = Connection::connect(peer)?;
    match reject_errors(conn.request(&Package::Handshake {
        addr: own_addr.to_string(),
    })?)? {
        Package::HandshakeAck { addr } => Ok(addr),
        other => Err(unexpected(peer, &other)),
    }
}

pub fn broadcast_transaction(peer: &str, tx: &Transaction) -> Result<()> {
    let mut conn = Connection::connect(peer)?;
    match reject_errors(conn.request(&Package::BroadcastTransaction {
        transaction: tx.encode_tagged(),
    })?)? {
        Package::Ack => Ok(()),
        other => Err(unexpected(peer, &other)),
    }
}

/// Announce `block` at `height`, then answer the peer's header and block
/// requests from our chain until it acknowledges, rejects or asks for
/// something we cannot serve.
pub fn announce_block(peer: &str, height: usize, block: &Block, mempool: &Mempool) -> Result<()> {
    let mut conn = Connection::connect(peer)?;
    info!("Sending block {height} to {peer}");
    conn.send(&Package::Block {
        block: block.encode_tagged(),
        height: height as u64,
        header_only: false,
    })?;

    while let Some(pkg) = conn.receive()? {
        match reject_errors(pkg)? {
            Package::Ack => return Ok(()),
            Package::BlockRequest {
                height: requested,
                header_only,
            } => {
                if requested > height as u64 {
                    warn!("{peer} asked for block {requested} above announced height {height}");
                    break;
                }
                let Some(found) = mempool.get_block(requested as usize)? else {
                    warn!("{peer} asked for block {requested} which we no longer hold");
                    break;
                };
                let bytes = if header_only {
                    found.header.encode_tagged()
                } else {
                    found.encode_tagged()
                };
                conn.send(&Package::Block {
                    block: bytes,
                    height: requested,
                    header_only,
                })?;
            }
            other => return Err(unexpected(peer, &other)),
        }
    }
    Ok(())
}

/// Ask `node` to build an unsigned payment from `sender`'s unspent outputs.
pub fn construct_transaction(
    node: &str,
    sender: &PublicKey,
    receiver: &PublicKey,
    amount: u64,
    fee: u64,
) -> Result<Transaction> {
    let mut conn = Connection::connect(node)?;
    let reply = conn.request(&Package::ConstructTransaction {
        sender: sender.to_bytes().to_vec(),
        receiver: receiver.to_bytes().to_vec(),
        amount,
        fee,
    })?;
    match reject_errors(reply)? {
        Package::Transaction { transaction } => Ok(Transaction::decode_tagged(&transaction)?),
        other => Err(unexpected(node, &other)),
    }
}

/// Header of the block `node` holds at `height`.
pub fn request_header(node: &str, height: usize) -> Result<BlockHeader> {
    let mut conn = Connection::connect(node)?;
    PeerSource::new(&mut conn).request_header(height)
}

/// Every record in the block at `height` that concerns `key`. The node
/// refuses when its block there does not hash to `block_hash`.
pub fn request_records(
    node: &str,
    height: usize,
    key: &PublicKey,
    block_hash: &Hash,
) -> Result<Vec<TransactionRecord>> {
    let mut conn = Connection::connect(node)?;
    conn.send(&Package::RequestTransactionsByPublicKey {
        height: height as u64,
        public_key: key.to_bytes().to_vec(),
        block_hash: block_hash.to_hex(),
    })?;

    let mut records = Vec::new();
    loop {
        match reject_errors(conn.expect()?)? {
            Package::TransactionRecord(record) => records.push(record),
            Package::EndOfRecords => break,
            other => return Err(unexpected(node, &other)),
        }
    }
    debug!("{} records for block {height} from {node}", records.len());
    Ok(records)
}

/// Run `deliver` against every peer on its own thread and wait for all of
/// them. Failures are logged and skipped; returns how many succeeded.
pub fn fan_out<F>(peers: &[String], what: &str, deliver: F) -> usize
where
    F: Fn(&str) -> Result<()> + Sync,
{
    thread::scope(|scope| {
        let handles: Vec<_> = peers
            .iter()
            .map(|peer| {
                let deliver = &deliver;
                (peer, scope.spawn(move || deliver(peer.as_str())))
            })
            .collect();

        let mut delivered = 0;
        for (peer, handle) in handles {
            match handle.join() {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("Failed to send {what} to {peer}: {e}"),
                Err(_) => warn!("Sending {what} to {peer} panicked"),
            }
        }
        delivered
    })
}

fn unexpected(peer: &str, pkg: &Package) -> BlockchainError {
    BlockchainError::Network(format!("Unexpected reply from {peer}: {pkg:?}"))
}
