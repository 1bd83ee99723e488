//! External collaborator traits.
//!
//! The engine owns consensus; everything else — chain storage, transaction
//! pool, block sync, gossip transport, secrets, state execution — is reached
//! through these contracts. Implementations are expected to be thread-safe.

use crate::message::Message;
use alloy_primitives::{Address, B256, U256};
use ibex_types::{Block, Header, Receipt, Transaction};

/// Secret name of the validator signing key.
pub const VALIDATOR_KEY: &str = "validator-key";

/// Secret name of the libp2p network key.
pub const NETWORK_KEY: &str = "network-key";

/// Chain storage as seen by consensus.
pub trait Blockchain: Send + Sync {
    /// Latest finalized header.
    fn header(&self) -> Header;

    fn get_header_by_number(&self, number: u64) -> Option<Header>;

    fn write_block(&self, block: &Block) -> Result<(), AdapterError>;

    /// Gas limit for the block about to be built.
    fn calculate_gas_limit(&self, number: u64) -> Result<u64, AdapterError>;
}

/// Transaction pool contract.
pub trait TxPool: Send + Sync {
    /// Snapshot the pool into a stable iteration order before building.
    fn prepare(&self);

    fn length(&self) -> u64;

    /// Next candidate transaction without removing it.
    fn peek(&self) -> Option<Transaction>;

    /// Remove a successfully written transaction.
    fn pop(&self, tx: &Transaction);

    /// Discard an unusable transaction.
    fn drop(&self, tx: &Transaction);

    /// Push a recoverable transaction back for a later block.
    fn demote(&self, tx: &Transaction);

    /// Re-validate the pool against freshly written headers.
    fn reset_with_headers(&self, headers: &[Header]);
}

/// A peer advertised by the syncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPeer {
    pub id: String,
    pub number: u64,
}

impl SyncPeer {
    pub fn number(&self) -> u64 {
        self.number
    }
}

/// Progress of an ongoing bulk sync.
#[derive(Debug, Clone, Default)]
pub struct Progression {
    pub starting_block: u64,
    pub current_block: u64,
    pub highest_block: u64,
}

/// Block synchronization protocol.
#[async_trait::async_trait]
pub trait Syncer: Send + Sync {
    fn start(&self);

    /// The most advanced peer, if any.
    fn best_peer(&self) -> Option<SyncPeer>;

    /// Download blocks from `peer` until caught up, invoking `on_block`
    /// after each block is written.
    async fn bulk_sync_with_peer(
        &self,
        peer: &SyncPeer,
        on_block: &mut (dyn FnMut(&Block) + Send),
    ) -> Result<(), AdapterError>;

    /// Stream new blocks from `peer`; the callback returning `true` stops
    /// the watch.
    async fn watch_sync_with_peer(
        &self,
        peer: &SyncPeer,
        on_block: &mut (dyn FnMut(&Block) -> bool + Send),
    );

    fn get_sync_progression(&self) -> Option<Progression>;

    /// Announce a freshly committed block to the network.
    fn broadcast(&self, block: &Block);
}

/// Gossip transport for consensus messages. Subscription is wired by handing
/// the engine's [`crate::MessageSink`] to the topic handler.
pub trait Transport: Send + Sync {
    fn gossip(&self, message: &Message) -> Result<(), AdapterError>;
}

/// Named-secret storage.
pub trait SecretsStore: Send + Sync {
    fn has(&self, name: &str) -> bool;

    fn get(&self, name: &str) -> Result<Vec<u8>, AdapterError>;

    fn set(&self, name: &str, value: &[u8]) -> Result<(), AdapterError>;

    fn remove(&self, name: &str) -> Result<(), AdapterError>;
}

/// Outcome of applying a contract call through the executor.
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutput {
    pub return_value: Vec<u8>,
    pub failed: bool,
}

/// State executor: opens transitions on a parent state root.
pub trait Executor: Send + Sync {
    fn begin_txn(
        &self,
        state_root: B256,
        header: &Header,
        miner: Address,
    ) -> Result<Box<dyn Transition>, AdapterError>;
}

/// An open state transition for one block under construction.
pub trait Transition: Send {
    /// Execute and include a transaction.
    fn write(&mut self, tx: &Transaction) -> Result<(), TransitionError>;

    /// Record a failure receipt for a transaction that cannot execute.
    fn write_failed_receipt(&mut self, tx: &Transaction) -> Result<(), TransitionError>;

    /// Finalize the transition, returning the new state root.
    fn commit(&mut self) -> Result<B256, TransitionError>;

    fn total_gas(&self) -> u64;

    fn receipts(&self) -> Vec<Receipt>;

    /// Account nonce in the transition's view of state.
    fn nonce(&self, address: Address) -> u64;

    fn get_balance(&self, address: Address) -> U256;

    /// Apply a read-only contract call and return its output.
    fn apply(&mut self, tx: &Transaction) -> Result<ExecutionOutput, TransitionError>;
}

/// Errors produced by adapter implementations.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    pub fn msg(text: impl Into<String>) -> Self {
        Self::Other(text.into())
    }
}

/// Errors produced while applying transactions to a transition.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    /// The block ran out of gas; building stops here.
    #[error("gas limit reached for the current block")]
    GasLimitReached,

    #[error("execution failed: {0}")]
    Execution(String),
}
