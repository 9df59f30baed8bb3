use crate::error::{BlockchainError, Result};
use log::trace;
use serde::{Deserialize, Serialize};
use serde_json::de::IoRead;
use serde_json::{Deserializer, StreamDeserializer};
use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(5000);
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Messages exchanged between nodes and between wallets and nodes. Binary
/// primitives travel in their tagged encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Package {
    Handshake {
        addr: String,
    },
    HandshakeAck {
        addr: String,
    },
    BroadcastTransaction {
        transaction: Vec<u8>,
    },
    /// A full block, or only its header when `header_only`
    Block {
        block: Vec<u8>,
        height: u64,
        header_only: bool,
    },
    BlockRequest {
        height: u64,
        header_only: bool,
    },
    ConstructTransaction {
        sender: Vec<u8>,
        receiver: Vec<u8>,
        amount: u64,
        fee: u64,
    },
    Transaction {
        transaction: Vec<u8>,
    },
    RequestTransactionsByPublicKey {
        height: u64,
        public_key: Vec<u8>,
        block_hash: String,
    },
    TransactionRecord(TransactionRecord),
    EndOfRecords,
    Ack,
    Error {
        message: String,
    },
}

/// One input or output of a confirmed transaction that concerns a queried key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub height: u64,
    pub block_hash: String,
    pub transaction_index: u32,
    pub transaction: Vec<u8>,
    pub in_out_index: u32,
    pub is_input: bool,
    /// Output value, or for inputs the value of the output being spent
    pub amount: u64,
}

/// Newline separated JSON packages over one TCP stream.
pub struct Connection {
    writer: TcpStream,
    reader: StreamDeserializer<'static, IoRead<BufReader<TcpStream>>, Package>,
    peer: String,
}

impl Connection {
    pub fn connect(addr: &str) -> Result<Connection> {
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| BlockchainError::Network(format!("Invalid address {addr}: {e}")))?
            .next()
            .ok_or_else(|| BlockchainError::Network(format!("Address {addr} did not resolve")))?;
        let stream = TcpStream::connect_timeout(&socket_addr, CONNECT_TIMEOUT)
            .map_err(|e| BlockchainError::Network(format!("Failed to connect to {addr}: {e}")))?;
        Connection::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Connection> {
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| BlockchainError::Network(format!("Failed to set read timeout: {e}")))?;
        stream
            .set_write_timeout(Some(CONNECT_TIMEOUT))
            .map_err(|e| BlockchainError::Network(format!("Failed to set write timeout: {e}")))?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Connection {
            writer: stream,
            reader: Deserializer::from_reader(reader).into_iter::<Package>(),
            peer,
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn send(&mut self, pkg: &Package) -> Result<()> {
        trace!("Sending to {}: {pkg:?}", self.peer);
        serde_json::to_writer(&mut self.writer, pkg).map_err(|e| {
            BlockchainError::Network(format!("Failed to send to {}: {e}", self.peer))
        })?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Next package, `None` once the peer has closed the stream.
    pub fn receive(&mut self) -> Result<Option<Package>> {
        match self.reader.next() {
            None => Ok(None),
            Some(Ok(pkg)) => {
                trace!("Received from {}: {pkg:?}", self.peer);
                Ok(Some(pkg))
            }
            Some(Err(e)) => Err(BlockchainError::Network(format!(
                "Failed to read package from {}: {e}",
                self.peer
            ))),
        }
    }

    pub fn expect(&mut self) -> Result<Package> {
        self.receive()?.ok_or_else(|| {
            BlockchainError::Network(format!("{} closed the connection", self.peer))
        })
    }

    pub fn request(&mut self, pkg: &Package) -> Result<Package> {
        self.send(pkg)?;
        self.expect()
    }
}

/// Turn an `Error` reply into a network error, pass anything else through.
pub fn reject_errors(pkg: Package) -> Result<Package> {
    match pkg {
        Package::Error { message } => Err(BlockchainError::Network(message)),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_package_serialization() {
        let pkg = Package::Block {
            block: vec![1, 2, 3],
            height: 7,
            header_only: true,
        };
        let text = serde_json::to_string(&pkg).unwrap();
        assert_eq!(serde_json::from_str::<Package>(&text).unwrap(), pkg);
    }

    #[test]
    fn test_connection_exchanges_packages() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut conn = Connection::from_stream(stream).unwrap();
            while let Some(pkg) = conn.receive().unwrap() {
                if let Package::Handshake { addr } = pkg {
                    conn.send(&Package::HandshakeAck { addr }).unwrap();
                }
            }
        });

        let mut conn = Connection::connect(&addr).unwrap();
        for n in 0..3 {
            let reply = conn
                .request(&Package::Handshake {
                    addr: format!("peer-{n}"),
                })
                .unwrap();
            assert_eq!(
                reply,
                Package::HandshakeAck {
                    addr: format!("peer-{n}")
                }
            );
        }
        drop(conn);
        server.join().unwrap();
    }

    #[test]
    fn test_reject_errors() {
        assert!(reject_errors(Package::Error {
            message: "stale".to_string()
        })
        .is_err());
        assert_eq!(reject_errors(Package::Ack).unwrap(), Package::Ack);
    }
}
