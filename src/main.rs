// Entry point for the node daemon and the wallet commands
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::path::Path;
use std::process;
use std::sync::Arc;
use utxo_chain::core::inspect;
use utxo_chain::{
    broadcast_transaction, construct_transaction, request_header, request_records, BlockchainError,
    Command, ConfigOverrides, Encodable, KeyStore, Mempool, Node, NodeConfig, Opt, Server,
    Transaction, PUBLIC_KEYS_DIR, WALLETS_DIR,
};

fn main() {
    // Info level by default, RUST_LOG still wins
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::StartNode {
            config,
            listen,
            peers,
            dir,
            difficulty,
        } => {
            let config = NodeConfig::load(
                config.as_deref(),
                ConfigOverrides {
                    listen,
                    peers,
                    data_dir: dir,
                    difficulty,
                },
            )?;
            start_node(config)?;
        }
        Command::CreateKey { name, wallet } => {
            let public = open_keys(&wallet.dir)?.create(&name)?;
            println!("Created key {name}: {}", public.fingerprint());
        }
        Command::ListKeys { wallet } => {
            for (name, public) in open_keys(&wallet.dir)?.list()? {
                println!("{name}\t{}", public.fingerprint());
            }
        }
        Command::ExportPubKey { name, dest, wallet } => {
            let public = open_keys(&wallet.dir)?.export_public(&name, &dest)?;
            println!("Wrote {} to {}", public.fingerprint(), dest.display());
        }
        Command::ImportPubKey {
            name,
            source,
            wallet,
        } => {
            let public = open_keys(&wallet.dir)?.import_public(&name, &source)?;
            println!("Imported {name}: {}", public.fingerprint());
        }
        Command::Send {
            from,
            to,
            amount,
            fee,
            wallet,
            node,
        } => {
            let keys = open_keys(&wallet.dir)?;
            let sender = keys.load(&from)?;
            let receiver = keys.public_key(&to)?;

            // the node picks the inputs, signing stays local
            let mut tx: Transaction =
                construct_transaction(&node.node, &sender.public(), &receiver, amount, fee)?;
            tx.sign(&sender)?;
            broadcast_transaction(&node.node, &tx)?;
            println!("Sent transaction {}", tx.hash());
        }
        Command::TxRecords {
            name,
            from,
            wallet,
            node,
        } => {
            let key = open_keys(&wallet.dir)?.public_key(&name)?;
            let mut height = from;
            // walk up until the node has no block at the height
            loop {
                let header = match request_header(&node.node, height) {
                    Ok(header) => header,
                    Err(BlockchainError::Network(msg)) if height > from => {
                        info!("Stopped at height {height}: {msg}");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                };
                for record in request_records(&node.node, height, &key, &header.hash())? {
                    let role = if record.is_input { "in " } else { "out" };
                    println!(
                        "{} {} tx#{} {role}#{} {}",
                        record.height,
                        record.block_hash,
                        record.transaction_index,
                        record.in_out_index,
                        record.amount
                    );
                }
                height += 1;
            }
        }
        Command::PrintBlock { path } => {
            println!("{}", inspect::dump_file(&path)?);
        }
    }
    Ok(())
}

fn open_keys(dir: &Path) -> utxo_chain::Result<KeyStore> {
    KeyStore::open(&dir.join(WALLETS_DIR), &dir.join(PUBLIC_KEYS_DIR))
}

// Serve peers, dial the configured ones and mine until a fatal error.
fn start_node(config: NodeConfig) -> utxo_chain::Result<()> {
    let mempool = Arc::new(Mempool::open(
        &config.data_dir,
        config.difficulty,
        config.mine_interval(),
    )?);
    let listener = Server::bind(&config.listen)?;
    let node = Arc::new(Node::new(config, Arc::clone(&mempool))?);
    Server::spawn(Arc::clone(&node), listener)?;
    node.dial_peers();

    loop {
        let (height, _) = mempool.latest_info()?;
        info!("Mining block {}", height + 1);
        if let Err(e) = mempool.mine() {
            error!("Mining stopped: {e}");
            return Err(e);
        }
        match mempool.append_block(None) {
            Ok(tip) => {
                let (height, _) = mempool.latest_info()?;
                info!("Mined block {} at height {height}", tip.hash());
                node.announce(height, tip)?;
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => warn!("Mined candidate went stale: {e}"),
        }
    }
}
