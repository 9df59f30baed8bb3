use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "utxo-chain", about = "Proof-of-work UTXO ledger node and wallet")]
pub struct Opt {
    #[command(subcommand)]
    pub command: Command,
}

/// Where local keys live: `<dir>/wallets` and `<dir>/pubkeys`.
#[derive(Debug, Args)]
pub struct WalletDir {
    #[arg(long = "dir", default_value = "./data", help = "Data directory")]
    pub dir: PathBuf,
}

#[derive(Debug, Args)]
pub struct NodeAddr {
    #[arg(long = "node", default_value = "127.0.0.1:51151", help = "Node to talk to")]
    pub node: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "startnode", about = "Run a mining node")]
    StartNode {
        #[arg(long = "config", help = "TOML configuration file")]
        config: Option<PathBuf>,
        #[arg(long = "listen", help = "Address to listen on and advertise")]
        listen: Option<String>,
        #[arg(long = "peer", help = "Peer to connect to (repeatable)")]
        peers: Vec<String>,
        #[arg(long = "dir", help = "Data directory")]
        dir: Option<PathBuf>,
        #[arg(long = "difficulty", help = "Leading zero bits required of a block hash")]
        difficulty: Option<u32>,
    },
    #[command(name = "createkey", about = "Generate a new signing key")]
    CreateKey {
        #[arg(help = "Key name")]
        name: String,
        #[command(flatten)]
        wallet: WalletDir,
    },
    #[command(name = "listkeys", about = "Print local and imported public keys")]
    ListKeys {
        #[command(flatten)]
        wallet: WalletDir,
    },
    #[command(name = "exportpubkey", about = "Write a public key to a file")]
    ExportPubKey {
        #[arg(help = "Key name")]
        name: String,
        #[arg(help = "Destination file")]
        dest: PathBuf,
        #[command(flatten)]
        wallet: WalletDir,
    },
    #[command(name = "importpubkey", about = "Store someone else's public key under a name")]
    ImportPubKey {
        #[arg(help = "Name to store the key under")]
        name: String,
        #[arg(help = "File holding the 91-byte public key")]
        source: PathBuf,
        #[command(flatten)]
        wallet: WalletDir,
    },
    #[command(name = "send", about = "Pay another key through a node")]
    Send {
        #[arg(help = "Name of the paying key")]
        from: String,
        #[arg(help = "Name of the receiving key, local or imported")]
        to: String,
        #[arg(help = "Amount to send")]
        amount: u64,
        #[arg(long = "fee", default_value_t = 0, help = "Fee left to the miner")]
        fee: u64,
        #[command(flatten)]
        wallet: WalletDir,
        #[command(flatten)]
        node: NodeAddr,
    },
    #[command(name = "txrecords", about = "Fetch the confirmed records of a key from a node")]
    TxRecords {
        #[arg(help = "Key name, local or imported")]
        name: String,
        #[arg(long = "from", default_value_t = 0, help = "First height to scan")]
        from: usize,
        #[command(flatten)]
        wallet: WalletDir,
        #[command(flatten)]
        node: NodeAddr,
    },
    #[command(name = "printblock", about = "Print a stored block file as JSON")]
    PrintBlock {
        #[arg(help = "Path to a Block<height>.dat file")]
        path: PathBuf,
    },
}
