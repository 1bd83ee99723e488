//! End-to-end engine test: a single-validator chain produces blocks through
//! the full Sync → Accept → Validate → Commit cycle, and a second node
//! verifies the sealed headers.

use alloy_primitives::{Address, B256, U256};
use ibex_bft::adapters::{
    AdapterError, Blockchain, ExecutionOutput, Executor, Progression, SecretsStore, SyncPeer,
    Syncer, Transition, TransitionError, Transport, TxPool, VALIDATOR_KEY,
};
use ibex_bft::{Engine, EngineConfig, EngineParams, Message};
use ibex_types::{
    fixed_reward_selector, wei, Block, Header, KeyPair, Receipt, Transaction, EMPTY_ROOT_HASH,
    REWARD_POOL,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct MockChain {
    blocks: Mutex<Vec<Block>>,
}

impl MockChain {
    fn new(genesis: Header) -> Self {
        Self {
            blocks: Mutex::new(vec![Block {
                header: genesis,
                transactions: vec![],
            }]),
        }
    }

    fn height(&self) -> u64 {
        self.blocks.lock().last().expect("genesis").header.number
    }

    fn block(&self, number: u64) -> Option<Block> {
        self.blocks.lock().get(number as usize).cloned()
    }
}

impl Blockchain for MockChain {
    fn header(&self) -> Header {
        self.blocks.lock().last().expect("genesis").header.clone()
    }

    fn get_header_by_number(&self, number: u64) -> Option<Header> {
        self.blocks
            .lock()
            .get(number as usize)
            .map(|b| b.header.clone())
    }

    fn write_block(&self, block: &Block) -> Result<(), AdapterError> {
        let mut blocks = self.blocks.lock();
        if block.header.number != blocks.len() as u64 {
            return Err(AdapterError::msg("non-sequential block"));
        }
        blocks.push(block.clone());
        Ok(())
    }

    fn calculate_gas_limit(&self, _number: u64) -> Result<u64, AdapterError> {
        Ok(8_000_000)
    }
}

struct EmptyPool;

impl TxPool for EmptyPool {
    fn prepare(&self) {}
    fn length(&self) -> u64 {
        0
    }
    fn peek(&self) -> Option<Transaction> {
        None
    }
    fn pop(&self, _tx: &Transaction) {}
    fn drop(&self, _tx: &Transaction) {}
    fn demote(&self, _tx: &Transaction) {}
    fn reset_with_headers(&self, _headers: &[Header]) {}
}

struct LonelySyncer;

#[async_trait::async_trait]
impl Syncer for LonelySyncer {
    fn start(&self) {}

    fn best_peer(&self) -> Option<SyncPeer> {
        None
    }

    async fn bulk_sync_with_peer(
        &self,
        _peer: &SyncPeer,
        _on_block: &mut (dyn FnMut(&Block) + Send),
    ) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn watch_sync_with_peer(
        &self,
        _peer: &SyncPeer,
        _on_block: &mut (dyn FnMut(&Block) -> bool + Send),
    ) {
    }

    fn get_sync_progression(&self) -> Option<Progression> {
        None
    }

    fn broadcast(&self, _block: &Block) {}
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<Message>>,
}

impl Transport for RecordingTransport {
    fn gossip(&self, message: &Message) -> Result<(), AdapterError> {
        self.sent.lock().push(message.clone());
        Ok(())
    }
}

#[derive(Default)]
struct MemorySecrets {
    values: Mutex<HashMap<String, Vec<u8>>>,
}

impl SecretsStore for MemorySecrets {
    fn has(&self, name: &str) -> bool {
        self.values.lock().contains_key(name)
    }

    fn get(&self, name: &str) -> Result<Vec<u8>, AdapterError> {
        self.values
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| AdapterError::msg("missing secret"))
    }

    fn set(&self, name: &str, value: &[u8]) -> Result<(), AdapterError> {
        self.values.lock().insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), AdapterError> {
        self.values.lock().remove(name);
        Ok(())
    }
}

struct SimpleTransition {
    receipts: Vec<Receipt>,
    gas: u64,
}

impl Transition for SimpleTransition {
    fn write(&mut self, tx: &Transaction) -> Result<(), TransitionError> {
        self.gas += tx.gas;
        self.receipts.push(Receipt {
            success: true,
            cumulative_gas_used: self.gas,
            gas_used: tx.gas,
            tx_hash: tx.hash,
        });
        Ok(())
    }

    fn write_failed_receipt(&mut self, tx: &Transaction) -> Result<(), TransitionError> {
        self.receipts.push(Receipt::failed(tx.hash, self.gas));
        Ok(())
    }

    fn commit(&mut self) -> Result<B256, TransitionError> {
        Ok(EMPTY_ROOT_HASH)
    }

    fn total_gas(&self) -> u64 {
        self.gas
    }

    fn receipts(&self) -> Vec<Receipt> {
        self.receipts.clone()
    }

    fn nonce(&self, _address: Address) -> u64 {
        0
    }

    fn get_balance(&self, _address: Address) -> U256 {
        U256::ZERO
    }

    fn apply(&mut self, _tx: &Transaction) -> Result<ExecutionOutput, TransitionError> {
        Err(TransitionError::Execution("no contracts in mock".into()))
    }
}

struct SimpleExecutor;

impl Executor for SimpleExecutor {
    fn begin_txn(
        &self,
        _state_root: B256,
        _header: &Header,
        _miner: Address,
    ) -> Result<Box<dyn Transition>, AdapterError> {
        Ok(Box::new(SimpleTransition {
            receipts: vec![],
            gas: 0,
        }))
    }
}

fn genesis_for(validators: Vec<Address>) -> Header {
    let mut genesis = Header {
        number: 0,
        gas_limit: 8_000_000,
        state_root: EMPTY_ROOT_HASH,
        ..Default::default()
    };
    ibex_bft::put_extra_validators(&mut genesis, validators);
    genesis
}

fn engine_for(
    key: &KeyPair,
    chain: Arc<MockChain>,
    dir: &tempfile::TempDir,
) -> (Engine, Arc<RecordingTransport>) {
    let secrets = Arc::new(MemorySecrets::default());
    secrets.set(VALIDATOR_KEY, &key.to_bytes()).unwrap();

    let transport = Arc::new(RecordingTransport::default());
    let params = EngineParams {
        config: EngineConfig {
            path: Some(dir.path().to_path_buf()),
            block_time: Duration::from_secs(0),
            base_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        blockchain: chain,
        executor: Arc::new(SimpleExecutor),
        txpool: Arc::new(EmptyPool),
        syncer: Arc::new(LonelySyncer),
        transport: Arc::clone(&transport) as Arc<dyn Transport>,
        secrets,
    };

    let mut engine = Engine::new(params).unwrap();
    engine.initialize().unwrap();
    (engine, transport)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_validator_commits_blocks_with_reward_transactions() {
    let key = KeyPair::generate();
    let chain = Arc::new(MockChain::new(genesis_for(vec![key.address()])));
    let dir = tempfile::TempDir::new().unwrap();

    let (engine, transport) = engine_for(&key, Arc::clone(&chain), &dir);
    assert_eq!(engine.address(), key.address());

    // Unsigned gossip is dropped at the sink; it must never reach the queue.
    let sink = engine.message_sink();
    sink.push(Message::new(
        ibex_bft::MsgType::Prepare,
        ibex_bft::View::new(1, 0),
    ));

    let handle = engine.start();

    // Wait for the machine to commit a few blocks.
    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    while chain.height() < 3 {
        assert!(
            std::time::Instant::now() < deadline,
            "engine did not commit 3 blocks in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.close().await;

    let block1 = chain.block(1).unwrap();

    // The proposer sealed the block it announced.
    assert_eq!(block1.header.miner, key.address());
    assert_eq!(block1.header.difficulty, 1);
    assert_eq!(block1.header.mix_hash, ibex_types::ISTANBUL_DIGEST);

    // Exactly one transaction: the reward mint to the pool.
    assert_eq!(block1.transactions.len(), 1);
    let reward_tx = &block1.transactions[0];
    assert_eq!(reward_tx.to, Some(REWARD_POOL));
    assert_eq!(reward_tx.gas, 21_000);
    assert_eq!(reward_tx.gas_price, U256::ZERO);
    assert_eq!(reward_tx.input.as_ref(), &fixed_reward_selector()[..]);
    // Zero-second blocks clamp to one-second pacing: 63,072,000 blocks per
    // bucket, 330M tokens in bucket 0, five whole tokens per block.
    assert_eq!(reward_tx.value, U256::from(5u64) * wei());

    // The engine announced proposal, prepare and commit for each height.
    let sent = transport.sent.lock();
    assert!(sent
        .iter()
        .any(|m| m.msg_type == ibex_bft::MsgType::PrePrepare));
    assert!(sent.iter().any(|m| m.msg_type == ibex_bft::MsgType::Commit));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn four_validator_network_commits_with_a_full_quorum() {
    let keys: Vec<KeyPair> = (0..4).map(|_| KeyPair::generate()).collect();
    let addresses: Vec<Address> = keys.iter().map(|k| k.address()).collect();
    let genesis = genesis_for(addresses.clone());

    // Work out which validator the VRF elects for block 1 and run the
    // engine as that node; the other validators vote from the test side.
    let seed = ibex_bft::calc_vrf_seed(&genesis).unwrap();
    let elected = (U256::from_be_bytes(seed.0) % U256::from(addresses.len() as u64)).to::<u64>()
        as usize;

    let chain = Arc::new(MockChain::new(genesis.clone()));
    let dir = tempfile::TempDir::new().unwrap();
    let (engine, transport) = engine_for(&keys[elected], Arc::clone(&chain), &dir);
    let sink = engine.message_sink();
    let handle = engine.start();

    // Wait for the height-1 proposal to hit the wire.
    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    let proposal = loop {
        assert!(
            std::time::Instant::now() < deadline,
            "no proposal observed in time"
        );
        let raw = transport.sent.lock().iter().find_map(|m| {
            (m.msg_type == ibex_bft::MsgType::PrePrepare)
                .then(|| m.proposal.clone())
                .flatten()
        });
        if let Some(raw) = raw {
            break Block::decode_rlp(&raw).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    };
    assert_eq!(proposal.number(), 1);

    // With N=4 the engine tolerates F=1 and needs strictly more than 2F
    // votes. Its own Prepare and Commit count for one, so exactly two
    // peers voting through the gossip sink complete the 2F+1 quorum.
    for (_, key) in keys
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != elected)
        .take(2)
    {
        let mut prepare = Message::new(ibex_bft::MsgType::Prepare, ibex_bft::View::new(1, 0));
        prepare.sign(key).unwrap();
        sink.push(prepare);

        let seal = ibex_bft::write_committed_seal(key, &proposal.header).unwrap();
        let mut commit = Message::new(ibex_bft::MsgType::Commit, ibex_bft::View::new(1, 0));
        commit.seal = Some(ibex_types::Bytes::from(seal));
        commit.sign(key).unwrap();
        sink.push(commit);
    }

    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    while chain.height() < 1 {
        assert!(
            std::time::Instant::now() < deadline,
            "quorum votes did not commit the block in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.close().await;

    // The finalized header carries the full 2F+1 committed seals: the
    // proposer's own plus the two peer votes.
    let block1 = chain.block(1).unwrap();
    let extra = ibex_bft::get_extra(&block1.header).unwrap();
    assert_eq!(extra.committed_seals.len(), 3);

    // Any other node accepts the header, committed-seal floor included.
    let observer_key = KeyPair::generate();
    let observer_dir = tempfile::TempDir::new().unwrap();
    let (observer, _) = engine_for(&observer_key, Arc::clone(&chain), &observer_dir);
    observer.verify_header(&genesis, &block1.header).unwrap();
    assert_eq!(
        observer.block_creator(&block1.header).unwrap(),
        addresses[elected]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_second_node_verifies_the_sealed_chain() {
    let key = KeyPair::generate();
    let chain = Arc::new(MockChain::new(genesis_for(vec![key.address()])));
    let dir = tempfile::TempDir::new().unwrap();

    let (engine, _transport) = engine_for(&key, Arc::clone(&chain), &dir);
    let handle = engine.start();

    let deadline = std::time::Instant::now() + Duration::from_secs(30);
    while chain.height() < 2 {
        assert!(
            std::time::Instant::now() < deadline,
            "engine did not commit 2 blocks in time"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.close().await;

    // An observer with its own key rebuilds the snapshot store from the
    // chain and verifies the sealed headers, committed seals included.
    let observer_key = KeyPair::generate();
    let observer_dir = tempfile::TempDir::new().unwrap();
    let (observer, _) = engine_for(&observer_key, Arc::clone(&chain), &observer_dir);

    let snap = observer.latest_snapshot().unwrap();
    assert!(snap.includes(key.address()));

    let genesis = chain.get_header_by_number(0).unwrap();
    let block1 = chain.block(1).unwrap();
    observer.verify_header(&genesis, &block1.header).unwrap();
    assert_eq!(
        observer.block_creator(&block1.header).unwrap(),
        key.address()
    );

    let block2 = chain.block(2).unwrap();
    observer.verify_header(&block1.header, &block2.header).unwrap();

    // A tampered header no longer verifies.
    let mut forged = block1.header.clone();
    forged.gas_used += 1;
    assert!(observer.verify_header(&genesis, &forged).is_err());
}
