use crate::config::NodeConfig;
use crate::core::{Block, Encodable, Transaction};
use crate::error::{BlockchainError, Result};
use crate::network::client::{announce_block, broadcast_transaction, fan_out, handshake};
use crate::network::protocol::{Connection, Package, TransactionRecord};
use crate::network::sync::{sync_from_peer, PeerSource};
use crate::network::{Peers, TaskPool};
use crate::storage::Mempool;
use crate::wallet::PublicKey;
use log::{debug, error, info, warn};
use std::net::{TcpListener, TcpStream};
use std::process;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Everything a request handler needs: settings, the mempool, the peer table
/// and the pool that runs broadcasts off the request path.
pub struct Node {
    config: NodeConfig,
    mempool: Arc<Mempool>,
    peers: Peers,
    tasks: TaskPool,
}

impl Node {
    pub fn new(config: NodeConfig, mempool: Arc<Mempool>) -> Result<Node> {
        let tasks = TaskPool::new(config.workers, config.queue_capacity)?;
        Ok(Node {
            config,
            mempool,
            peers: Peers::new(),
            tasks,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.mempool
    }

    pub fn peers(&self) -> &Peers {
        &self.peers
    }

    /// Queue an announcement of `block` at `height` to every known peer.
    pub fn announce(&self, height: usize, block: Arc<Block>) -> Result<()> {
        let mempool = Arc::clone(&self.mempool);
        let peers = self.peers.clone();
        debug!(
            "Queueing announcement of block {height} behind {} tasks",
            self.tasks.queued()
        );
        self.tasks.submit(move || {
            let targets = match peers.snapshot() {
                Ok(targets) => targets,
                Err(e) => {
                    error!("Cannot read peer table: {e}");
                    return;
                }
            };
            let delivered = fan_out(&targets, &format!("block {height}"), |peer| {
                announce_block(peer, height, &block, &mempool)
            });
            debug!("Block {height} delivered to {delivered}/{} peers", targets.len());
        })
    }

    /// Queue a relay of `tx` to every known peer.
    pub fn relay_transaction(&self, tx: Transaction) -> Result<()> {
        let peers = self.peers.clone();
        self.tasks.submit(move || {
            let targets = match peers.snapshot() {
                Ok(targets) => targets,
                Err(e) => {
                    error!("Cannot read peer table: {e}");
                    return;
                }
            };
            let what = format!("transaction {}", tx.hash());
            fan_out(&targets, &what, |peer| broadcast_transaction(peer, &tx));
        })
    }

    /// Handshake with every configured peer on its own thread, retrying each
    /// until it answers.
    pub fn dial_peers(&self) -> Vec<JoinHandle<()>> {
        self.config
            .peers
            .iter()
            .filter(|peer| **peer != self.config.listen)
            .map(|peer| {
                let peer = peer.clone();
                let own = self.config.listen.clone();
                let peers = self.peers.clone();
                let retry = self.config.dial_retry();
                thread::spawn(move || loop {
                    match handshake(&peer, &own) {
                        Ok(advertised) => {
                            info!("Connected to {peer} (advertises {advertised})");
                            if let Err(e) = peers.add(&peer) {
                                error!("Cannot record peer {peer}: {e}");
                            }
                            return;
                        }
                        Err(e) => {
                            warn!("Handshake with {peer} failed, retrying: {e}");
                            thread::sleep(retry);
                        }
                    }
                })
            })
            .collect()
    }

    /// Serve one connection: read the opening package and run its exchange.
    pub fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let mut conn = Connection::from_stream(stream)?;
        let Some(pkg) = conn.receive()? else {
            return Ok(());
        };
        debug!("Received {pkg:?} from {}", conn.peer());

        let outcome = match pkg {
            Package::Handshake { addr } => self.handle_handshake(&mut conn, addr),
            Package::BroadcastTransaction { transaction } => {
                self.handle_transaction(&mut conn, &transaction)
            }
            Package::Block {
                block,
                height,
                header_only,
            } => self.handle_block(&mut conn, &block, height as usize, header_only),
            Package::BlockRequest {
                height,
                header_only,
            } => self.handle_block_request(&mut conn, height, header_only),
            Package::ConstructTransaction {
                sender,
                receiver,
                amount,
                fee,
            } => self.handle_construct(&mut conn, &sender, &receiver, amount, fee),
            Package::RequestTransactionsByPublicKey {
                height,
                public_key,
                block_hash,
            } => self.handle_records(&mut conn, height, &public_key, &block_hash),
            other => Err(BlockchainError::Network(format!(
                "Unexpected opening package {other:?}"
            ))),
        };

        if let Err(e) = &outcome {
            if !e.is_fatal() {
                // best effort, the peer may already be gone
                let _ = conn.send(&Package::Error {
                    message: e.to_string(),
                });
            }
        }
        outcome
    }

    fn handle_handshake(&self, conn: &mut Connection, addr: String) -> Result<()> {
        info!("Received handshake from {addr}");
        let is_new = addr != self.config.listen && self.peers.add(&addr)?;
        conn.send(&Package::HandshakeAck {
            addr: self.config.listen.clone(),
        })?;

        if is_new {
            let own = self.config.listen.clone();
            let peers = self.peers.clone();
            self.tasks.submit(move || {
                if let Err(e) = handshake(&addr, &own) {
                    warn!("Dial back to {addr} failed, forgetting it: {e}");
                    if let Err(e) = peers.remove(&addr) {
                        error!("Cannot drop peer {addr}: {e}");
                    }
                }
            })?;
        }
        Ok(())
    }

    fn handle_transaction(&self, conn: &mut Connection, bytes: &[u8]) -> Result<()> {
        let tx = Transaction::decode_tagged(bytes)?;
        let tx_hash = tx.hash();
        info!("Received transaction {tx_hash}");

        if let Err(e) = self.mempool.add_transaction(tx.clone()) {
            info!("Rejected transaction {tx_hash}: {e}");
            return Err(e);
        }
        conn.send(&Package::Ack)?;
        self.relay_transaction(tx)
    }

    fn handle_block(
        &self,
        conn: &mut Connection,
        bytes: &[u8],
        height: usize,
        header_only: bool,
    ) -> Result<()> {
        if header_only {
            return Err(BlockchainError::Network(
                "Block announcement carried only a header".to_string(),
            ));
        }
        let block = Block::decode_tagged(bytes)?;
        info!("Received block {height} from {}", conn.peer());

        let (local_height, tip) = self.mempool.latest_info()?;
        if height <= local_height {
            return Err(BlockchainError::StaleChain {
                proposed: height + 1,
                current: local_height + 1,
            });
        }

        if height == local_height + 1 && block.header.prev_hash == tip.hash() {
            let appended = self.mempool.append_block(Some(block))?;
            conn.send(&Package::Ack)?;
            return self.announce(height, appended);
        }

        let mut source = PeerSource::new(conn);
        sync_from_peer(&mut source, &self.mempool, height)?;
        conn.send(&Package::Ack)?;

        let (new_height, new_tip) = self.mempool.latest_info()?;
        self.announce(new_height, new_tip)
    }

    fn handle_block_request(
        &self,
        conn: &mut Connection,
        height: u64,
        header_only: bool,
    ) -> Result<()> {
        let block = self
            .mempool
            .get_block(height as usize)?
            .ok_or_else(|| BlockchainError::InvalidBlock(format!("No block at height {height}")))?;
        let bytes = if header_only {
            block.header.encode_tagged()
        } else {
            block.encode_tagged()
        };
        conn.send(&Package::Block {
            block: bytes,
            height,
            header_only,
        })
    }

    fn handle_construct(
        &self,
        conn: &mut Connection,
        sender: &[u8],
        receiver: &[u8],
        amount: u64,
        fee: u64,
    ) -> Result<()> {
        let sender = PublicKey::from_bytes(sender)?;
        let receiver = PublicKey::from_bytes(receiver)?;
        let tx = self
            .mempool
            .construct_transaction(&sender, &receiver, amount, fee)?;
        conn.send(&Package::Transaction {
            transaction: tx.encode_tagged(),
        })
    }

    fn handle_records(
        &self,
        conn: &mut Connection,
        height: u64,
        public_key: &[u8],
        block_hash: &str,
    ) -> Result<()> {
        let block = self
            .mempool
            .get_block(height as usize)?
            .ok_or_else(|| BlockchainError::InvalidBlock(format!("No block at height {height}")))?;
        if block.hash().to_hex() != block_hash {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {height} does not hash to {block_hash}"
            )));
        }
        let key = PublicKey::from_bytes(public_key)?;

        for (tx_index, tx) in block.transactions.iter().enumerate() {
            let encoded = tx.encode_tagged();
            let record = |in_out_index: usize, is_input: bool, amount: u64| {
                Package::TransactionRecord(TransactionRecord {
                    height,
                    block_hash: block_hash.to_string(),
                    transaction_index: tx_index as u32,
                    transaction: encoded.clone(),
                    in_out_index: in_out_index as u32,
                    is_input,
                    amount,
                })
            };

            for index in tx.inputs_signed_by(&key) {
                let amount = self
                    .mempool
                    .tx_output_value(&tx.inputs[index])?
                    .unwrap_or(0);
                conn.send(&record(index, true, amount))?;
            }
            for index in tx.outputs_owned_by(&key) {
                conn.send(&record(index, false, tx.outputs[index].value))?;
            }
        }
        conn.send(&Package::EndOfRecords)
    }
}

/// Accept loop; every connection runs on its own thread.
pub struct Server;

impl Server {
    pub fn bind(addr: &str) -> Result<TcpListener> {
        TcpListener::bind(addr)
            .map_err(|e| BlockchainError::Network(format!("Failed to bind to {addr}: {e}")))
    }

    pub fn spawn(node: Arc<Node>, listener: TcpListener) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("server".to_string())
            .spawn(move || Server::run(node, listener))?;
        Ok(handle)
    }

    pub fn run(node: Arc<Node>, listener: TcpListener) {
        match listener.local_addr() {
            Ok(addr) => info!("Server listening on {addr}"),
            Err(e) => warn!("Server listening on an unknown address: {e}"),
        }

        for stream in listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Error accepting connection: {e}");
                    continue;
                }
            };
            let node = Arc::clone(&node);
            thread::spawn(move || {
                let peer = stream
                    .peer_addr()
                    .map(|addr| addr.to_string())
                    .unwrap_or_else(|_| "unknown".to_string());
                match node.handle_connection(stream) {
                    Ok(()) => {}
                    Err(e) if e.is_fatal() => {
                        error!("Fatal error while serving {peer}: {e}");
                        process::exit(1);
                    }
                    Err(e) => warn!("Request from {peer} failed: {e}"),
                }
            });
        }
    }
}
