//! Node-to-node and wallet-to-node exchanges over loopback TCP.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{tempdir, TempDir};
use utxo_chain::network::{announce_block, handshake};
use utxo_chain::{
    broadcast_transaction, construct_transaction, request_header, request_records, Encodable,
    Hash, Key, KeyStore, Mempool, Node, NodeConfig, Server, MINER_REWARD, PUBLIC_KEYS_DIR,
    WALLETS_DIR,
};

struct TestNode {
    node: Arc<Node>,
    addr: String,
    dir: TempDir,
}

impl TestNode {
    fn start() -> TestNode {
        let dir = tempdir().unwrap();
        let listener = Server::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let config = NodeConfig {
            listen: addr.clone(),
            data_dir: dir.path().to_path_buf(),
            difficulty: 0,
            mine_interval_ms: 0,
            dial_retry_ms: 50,
            ..NodeConfig::default()
        };
        let mempool =
            Arc::new(Mempool::open(dir.path(), config.difficulty, config.mine_interval()).unwrap());
        let node = Arc::new(Node::new(config, mempool).unwrap());
        Server::spawn(Arc::clone(&node), listener).unwrap();
        TestNode { node, addr, dir }
    }

    fn mempool(&self) -> &Mempool {
        self.node.mempool()
    }

    fn commit(&self) {
        self.mempool().mine().unwrap();
        self.mempool().append_block(None).unwrap();
    }

    fn height(&self) -> usize {
        self.mempool().latest_info().unwrap().0
    }

    fn tip_hash(&self) -> Hash {
        self.mempool().latest_info().unwrap().1.hash()
    }

    fn miner_key(&self) -> Key {
        KeyStore::open(
            &self.dir.path().join(WALLETS_DIR),
            &self.dir.path().join(PUBLIC_KEYS_DIR),
        )
        .unwrap()
        .load("miner")
        .unwrap()
    }
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn test_next_block_is_appended_and_repeat_is_stale() {
    let a = TestNode::start();
    let b = TestNode::start();
    a.commit();

    let (height, tip) = a.mempool().latest_info().unwrap();
    announce_block(&b.addr, height, &tip, a.mempool()).unwrap();
    assert_eq!(b.height(), 1);
    assert_eq!(b.tip_hash(), a.tip_hash());

    assert!(announce_block(&b.addr, height, &tip, a.mempool()).is_err());
    assert_eq!(b.height(), 1);
}

#[test]
fn test_longer_fork_is_adopted() {
    let a = TestNode::start();
    let b = TestNode::start();
    for _ in 0..3 {
        a.commit();
    }
    b.commit();
    assert_ne!(a.tip_hash(), b.tip_hash());

    let (height, tip) = a.mempool().latest_info().unwrap();
    announce_block(&b.addr, height, &tip, a.mempool()).unwrap();

    assert_eq!(b.height(), 3);
    assert_eq!(b.tip_hash(), a.tip_hash());
    for h in 0..=3 {
        assert_eq!(
            b.mempool().get_block_hash(h).unwrap(),
            a.mempool().get_block_hash(h).unwrap()
        );
    }
    // the miner of the abandoned block lost its reward
    assert_eq!(b.mempool().balance(b.mempool().miner_key()).unwrap(), 0);
}

#[test]
fn test_shorter_announcement_leaves_chain_alone() {
    let a = TestNode::start();
    let b = TestNode::start();
    a.commit();
    for _ in 0..3 {
        b.commit();
    }
    let before = b.tip_hash();

    let (height, tip) = a.mempool().latest_info().unwrap();
    assert!(announce_block(&b.addr, height, &tip, a.mempool()).is_err());
    assert_eq!(b.tip_hash(), before);
}

#[test]
fn test_handshake_registers_both_sides() {
    let a = TestNode::start();
    let b = TestNode::start();

    let advertised = handshake(&b.addr, &a.addr).unwrap();
    assert_eq!(advertised, b.addr);
    assert!(b.node.peers().contains(&a.addr).unwrap());
    // b dials back, which makes a record b
    assert!(wait_for(|| a.node.peers().contains(&b.addr).unwrap()));
}

#[test]
fn test_payment_through_node_and_records() {
    let a = TestNode::start();
    a.commit();
    let miner = a.miner_key();
    let bob = Key::generate().unwrap().public();

    let mut tx = construct_transaction(&a.addr, &miner.public(), &bob, 10, 1).unwrap();
    assert!(tx.signatures.is_empty());
    tx.sign(&miner).unwrap();
    broadcast_transaction(&a.addr, &tx).unwrap();
    assert_eq!(a.mempool().pending_count().unwrap(), 1);
    assert!(broadcast_transaction(&a.addr, &tx).is_err());

    a.commit();
    assert_eq!(a.mempool().balance(&bob).unwrap(), 10);

    let header = request_header(&a.addr, 2).unwrap();
    let records = request_records(&a.addr, 2, &bob, &header.hash()).unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].is_input);
    assert_eq!(records[0].amount, 10);
    assert_eq!(records[0].transaction_index, 1);

    let mine = request_records(&a.addr, 2, &miner.public(), &header.hash()).unwrap();
    let spent: Vec<_> = mine.iter().filter(|r| r.is_input).collect();
    assert_eq!(spent.len(), 1);
    assert_eq!(spent[0].amount, MINER_REWARD);
    // coinbase plus change
    assert_eq!(mine.iter().filter(|r| !r.is_input).count(), 2);

    assert!(request_records(&a.addr, 2, &bob, &Hash([9u8; 32])).is_err());
    assert!(request_header(&a.addr, 3).is_err());
}

#[test]
fn test_insufficient_funds_reported_to_wallet() {
    let a = TestNode::start();
    let nobody = Key::generate().unwrap().public();
    let bob = Key::generate().unwrap().public();
    assert!(construct_transaction(&a.addr, &nobody, &bob, 10, 0).is_err());
}

#[test]
fn test_blocks_and_transactions_fan_out_to_other_peers() {
    let a = TestNode::start();
    let b = TestNode::start();
    let c = TestNode::start();
    // c introduces itself to b, so b relays to c
    handshake(&b.addr, &c.addr).unwrap();
    assert!(b.node.peers().contains(&c.addr).unwrap());

    a.commit();
    let (height, tip) = a.mempool().latest_info().unwrap();
    announce_block(&b.addr, height, &tip, a.mempool()).unwrap();
    assert!(wait_for(|| c.height() == 1));
    assert_eq!(c.tip_hash(), a.tip_hash());

    // more than one block ahead: b syncs from a, then c syncs from b
    a.commit();
    a.commit();
    let (height, tip) = a.mempool().latest_info().unwrap();
    announce_block(&b.addr, height, &tip, a.mempool()).unwrap();
    assert!(wait_for(|| c.height() == 3));
    assert_eq!(c.tip_hash(), a.tip_hash());

    let miner = a.miner_key();
    let bob = Key::generate().unwrap().public();
    let mut tx = construct_transaction(&b.addr, &miner.public(), &bob, 10, 1).unwrap();
    tx.sign(&miner).unwrap();
    broadcast_transaction(&b.addr, &tx).unwrap();
    assert!(wait_for(|| c.mempool().pending_count().unwrap() == 1));
    assert_eq!(c.mempool().candidate().unwrap().transactions[1], tx);
}
