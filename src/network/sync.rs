//! Catching up with a peer that announced a block more than one ahead of us.
//!
//! The receiver walks back from its own tip asking the announcer for single
//! headers, doubling the step after each mismatch and halving it after each
//! match, until it knows the lowest height at which the two chains differ.
//! Every block from there to the announced height is then fetched and handed
//! to `Mempool::switch_chain`.

use crate::core::{Block, BlockHeader, Encodable, Hash};
use crate::error::{BlockchainError, Result};
use crate::network::protocol::{reject_errors, Connection, Package};
use crate::storage::Mempool;
use log::{debug, info};

/// Something that answers header and block requests by height.
pub trait BlockSource {
    fn request_header(&mut self, height: usize) -> Result<BlockHeader>;
    fn request_block(&mut self, height: usize) -> Result<Block>;
}

/// Requests served over the announcement connection, one at a time.
pub struct PeerSource<'a> {
    conn: &'a mut Connection,
}

impl<'a> PeerSource<'a> {
    pub fn new(conn: &'a mut Connection) -> PeerSource<'a> {
        PeerSource { conn }
    }

    fn request(&mut self, height: usize, header_only: bool) -> Result<Vec<u8>> {
        let reply = self.conn.request(&Package::BlockRequest {
            height: height as u64,
            header_only,
        })?;
        match reject_errors(reply)? {
            Package::Block {
                block,
                height: got,
                header_only: got_header_only,
            } if got == height as u64 && got_header_only == header_only => Ok(block),
            other => Err(BlockchainError::Network(format!(
                "Unexpected reply to request for height {height}: {other:?}"
            ))),
        }
    }
}

impl BlockSource for PeerSource<'_> {
    fn request_header(&mut self, height: usize) -> Result<BlockHeader> {
        debug!("Requesting header {height} from {}", self.conn.peer());
        let bytes = self.request(height, true)?;
        Ok(BlockHeader::decode_tagged(&bytes)?)
    }

    fn request_block(&mut self, height: usize) -> Result<Block> {
        debug!("Requesting block {height} from {}", self.conn.peer());
        let bytes = self.request(height, false)?;
        Ok(Block::decode_tagged(&bytes)?)
    }
}

/// Lowest height at which the source's chain differs from ours, i.e. one past
/// the last common block. `local_hash` gives our hash at a height.
///
/// Fails when even genesis does not match.
pub fn find_fork_point<S, F>(source: &mut S, local_height: usize, local_hash: F) -> Result<usize>
where
    S: BlockSource + ?Sized,
    F: Fn(usize) -> Option<Hash>,
{
    let mut current = local_height + 1;
    let mut backoff = 1usize;
    let mut found = false;

    while backoff > 0 {
        let check = current - backoff;
        let remote = source.request_header(check)?.hash();
        if local_hash(check) == Some(remote) {
            found = true;
        } else if check == 0 {
            return Err(BlockchainError::InvalidBlock(
                "Peer chain does not share our genesis block".to_string(),
            ));
        } else {
            current = check;
        }

        if found {
            backoff /= 2;
        } else {
            backoff *= 2;
        }
        while backoff > current {
            backoff /= 2;
        }
    }
    Ok(current)
}

/// Blocks `from..=to` in height order.
pub fn fetch_blocks<S>(source: &mut S, from: usize, to: usize) -> Result<Vec<Block>>
where
    S: BlockSource + ?Sized,
{
    (from..=to).map(|height| source.request_block(height)).collect()
}

/// Find the fork point against `source`, fetch up to `announced_height` and
/// switch the mempool onto the fetched chain.
pub fn sync_from_peer<S>(source: &mut S, mempool: &Mempool, announced_height: usize) -> Result<()>
where
    S: BlockSource + ?Sized,
{
    let (local_height, _) = mempool.latest_info()?;
    let from = find_fork_point(source, local_height, |height| {
        mempool.get_block_hash(height).ok().flatten()
    })?;
    info!("Chains diverge at height {from}, fetching up to {announced_height}");

    let blocks = fetch_blocks(source, from, announced_height)?;
    mempool.switch_chain(blocks, from)
}
