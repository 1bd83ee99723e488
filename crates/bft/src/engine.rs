//! The consensus engine and its state machine loop.

use crate::adapters::{
    Blockchain, Executor, SecretsStore, Syncer, Transport, TxPool, VALIDATOR_KEY,
};
use crate::config::EngineConfig;
use crate::extra::get_extra;
use crate::message::{Message, MsgType, View};
use crate::msg_queue::MsgQueue;
use crate::proposer::{calc_vrf_seed, vrf_sign_input, VrfInfo};
use crate::round_state::CurrentState;
use crate::seal::{
    ecrecover_from_header, verify_committed_fields, verify_signer, write_committed_seal,
    write_committed_seals,
};
use crate::snapshot::{Snapshot, SnapshotStore};
use crate::strategy::{ConsensusStrategy, PosStrategy, StrategyContext};
use crate::{EngineError, IbftState, StateError};
use alloy_primitives::Address;
use ibex_reward::{BlockReward, FeePool, RewardLock};
use ibex_types::{
    to_address, vrf, Block, Bytes, Header, KeyPair, EMPTY_UNCLE_HASH, ISTANBUL_DIGEST,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Everything the engine needs from the host process.
pub struct EngineParams {
    pub config: EngineConfig,
    pub blockchain: Arc<dyn Blockchain>,
    pub executor: Arc<dyn Executor>,
    pub txpool: Arc<dyn TxPool>,
    pub syncer: Arc<dyn Syncer>,
    pub transport: Arc<dyn Transport>,
    pub secrets: Arc<dyn SecretsStore>,
}

/// Entry point the transport subscription pushes decoded messages into.
///
/// The sink validates signatures, discards our own gossip (we deliver local
/// copies directly) and wakes the reader.
#[derive(Clone)]
pub struct MessageSink {
    queue: Arc<MsgQueue>,
    update: Arc<Notify>,
    local_address: Address,
    sealing: bool,
}

impl MessageSink {
    /// Validate and enqueue a message received from gossip.
    pub fn push(&self, mut msg: Message) {
        if !self.sealing {
            // Non-sealing nodes relay gossip but never consume it.
            return;
        }

        if let Err(err) = msg.validate() {
            warn!(err = %err, "dropping message with bad signature");
            return;
        }

        if msg.from == self.local_address {
            return;
        }

        self.queue.push_message(msg);
        self.update.notify_one();
    }
}

/// The IBFT consensus engine.
///
/// Owns the snapshot store, the round state and the reward engine; shares
/// the blockchain, pool, syncer, transport and secrets adapters with the
/// host. Runs as one long-lived task via [`Engine::start`].
pub struct Engine {
    pub(crate) config: EngineConfig,
    pub(crate) state: CurrentState,
    pub(crate) store: SnapshotStore,

    msg_queue: Arc<MsgQueue>,
    update: Arc<Notify>,
    shutdown: CancellationToken,

    pub(crate) blockchain: Arc<dyn Blockchain>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) txpool: Arc<dyn TxPool>,
    syncer: Arc<dyn Syncer>,
    transport: Arc<dyn Transport>,

    pub(crate) key: KeyPair,
    pub(crate) address: Address,

    pub(crate) strategy: Box<dyn ConsensusStrategy>,
    pub(crate) vrf_info: VrfInfo,
    pub(crate) fee_pool: FeePool,
    pub(crate) reward: BlockReward,
    pub(crate) reward_lock: RewardLock,
}

/// Handle to a running engine.
pub struct EngineHandle {
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl EngineHandle {
    /// Signal shutdown and wait for the engine task to drain.
    pub async fn close(self) {
        self.token.cancel();
        let _ = self.join.await;
    }
}

impl Engine {
    /// Construct the engine: provision the validator key from the secrets
    /// store (generating and persisting one when absent) and open the
    /// reward database.
    pub fn new(params: EngineParams) -> Result<Self, EngineError> {
        let EngineParams {
            config,
            blockchain,
            executor,
            txpool,
            syncer,
            transport,
            secrets,
        } = params;

        let key = if secrets.has(VALIDATOR_KEY) {
            let bytes = secrets
                .get(VALIDATOR_KEY)
                .map_err(|_| EngineError::SecretNotFound(VALIDATOR_KEY.to_string()))?;
            KeyPair::from_bytes(&bytes)?
        } else {
            let key = KeyPair::generate();
            secrets
                .set(VALIDATOR_KEY, &key.to_bytes())
                .map_err(|e| EngineError::Secrets(e.to_string()))?;
            key
        };
        let address = key.address();
        info!(addr = %address, "validator key ready");

        let reward_path = config
            .path
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("ibex-{address}")));
        let reward = BlockReward::new(config.chain_id, &reward_path)?;

        let strategy = Box::new(PosStrategy::new(
            Arc::clone(&blockchain),
            Arc::clone(&executor),
            config.epoch_size,
            address,
        ));

        Ok(Self {
            config,
            state: CurrentState::new(),
            store: SnapshotStore::new(),
            msg_queue: Arc::new(MsgQueue::new()),
            update: Arc::new(Notify::new()),
            shutdown: CancellationToken::new(),
            blockchain,
            executor,
            txpool,
            syncer,
            transport,
            key,
            address,
            strategy,
            vrf_info: VrfInfo::new(),
            fee_pool: FeePool::new(),
            reward,
            reward_lock: RewardLock::new(),
        })
    }

    /// Rebuild the snapshot store. Must run before [`Engine::start`].
    pub fn initialize(&mut self) -> Result<(), EngineError> {
        self.setup_snapshot()
    }

    /// The local validator address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sink for the transport subscription; clone freely.
    pub fn message_sink(&self) -> MessageSink {
        MessageSink {
            queue: Arc::clone(&self.msg_queue),
            update: Arc::clone(&self.update),
            local_address: self.address,
            sealing: self.config.sealing,
        }
    }

    /// Start the syncer and spawn the state machine loop.
    pub fn start(self) -> EngineHandle {
        let token = self.shutdown.clone();
        self.syncer.start();
        let join = tokio::spawn(self.run());
        EngineHandle { token, join }
    }

    /// The state machine loop. Runs until the shutdown token fires, then
    /// persists the snapshot store.
    pub async fn run(mut self) {
        self.set_state(IbftState::Sync);

        let header = self.blockchain.header();
        debug!(sequence = header.number + 1, "starting consensus");

        while !self.shutdown.is_cancelled() {
            self.run_cycle().await;
        }

        if let Some(path) = self.config.path.clone() {
            if let Err(err) = self.store.save_to_path(&path) {
                error!(err = %err, "failed to persist snapshot store on close");
            }
        }
    }

    async fn run_cycle(&mut self) {
        debug!(
            state = %self.state.state(),
            sequence = self.state.view.sequence,
            round = self.state.view.round + 1,
            block = self.blockchain.header().number,
            "run cycle"
        );

        match self.state.state() {
            IbftState::Accept => self.run_accept_state().await,
            IbftState::Validate => self.run_validate_state().await,
            IbftState::RoundChange => self.run_round_change_state().await,
            IbftState::Sync => self.run_sync_state().await,
            // Commit is transient and resolved inside Validate.
            IbftState::Commit => {}
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Sync
    // ═══════════════════════════════════════════════════════════════════

    /// Whether the local node is a validator at the chain tip. Also primes
    /// the view for the next height when it is.
    fn is_valid_snapshot(&mut self) -> bool {
        if !self.config.sealing {
            return false;
        }

        let header = self.blockchain.header();
        let Ok(snap) = self.get_snapshot(header.number) else {
            return false;
        };

        if snap.includes(self.address) {
            self.state.view = View::new(header.number + 1, 0);
            return true;
        }
        false
    }

    /// Follow the best peer until the local node is a synced validator.
    async fn run_sync_state(&mut self) {
        while self.is_state(IbftState::Sync) && !self.shutdown.is_cancelled() {
            let mut old_latest = self.blockchain.header().number;

            let Some(peer) = self.syncer.best_peer() else {
                if self.is_valid_snapshot() {
                    // No peers and we are a validator: start proposing; a
                    // fork would be reverted by a later sync.
                    self.set_state(IbftState::Accept);
                } else {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                        _ = self.shutdown.cancelled() => return,
                    }
                }
                continue;
            };

            let syncer = Arc::clone(&self.syncer);
            let bulk_result = {
                let engine = &mut *self;
                syncer
                    .bulk_sync_with_peer(&peer, &mut |block: &Block| {
                        engine.sync_state_hook(old_latest);
                        old_latest = engine.blockchain.header().number;
                        engine.txpool.reset_with_headers(&[block.header.clone()]);
                    })
                    .await
            };
            if let Err(err) = bulk_result {
                error!(err = %err, "failed to bulk sync");
                continue;
            }

            if self.is_valid_snapshot() {
                self.set_state(IbftState::Accept);
                continue;
            }

            // Watch mode: stream blocks until we become a validator.
            let mut is_validator = false;
            {
                let engine = &mut *self;
                syncer
                    .watch_sync_with_peer(&peer, &mut |block: &Block| {
                        engine.sync_state_hook(old_latest);
                        old_latest = engine.blockchain.header().number;
                        engine.syncer.broadcast(block);
                        engine.txpool.reset_with_headers(&[block.header.clone()]);
                        is_validator = engine.is_valid_snapshot();
                        is_validator
                    })
                    .await;
            }

            if is_validator {
                self.set_state(IbftState::Accept);
            }
        }
    }

    /// Refresh the snapshot store after synced blocks crossed an epoch
    /// boundary.
    fn sync_state_hook(&mut self, old_latest: u64) {
        let mut ctx = StrategyContext {
            store: &self.store,
            state: &mut self.state,
            vrf_info: &self.vrf_info,
            fee_pool: &self.fee_pool,
        };
        if let Err(err) = self.strategy.sync_state(&mut ctx, old_latest) {
            error!(err = %err, "failed to update validators while syncing");
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Accept
    // ═══════════════════════════════════════════════════════════════════

    /// Either propose a block or wait for the elected proposer's
    /// Pre-Prepare.
    async fn run_accept_state(&mut self) {
        info!(
            block = self.state.view.sequence,
            round = self.state.view.round + 1,
            "accept state"
        );

        let parent = self.blockchain.header();
        let number = parent.number + 1;
        if number != self.state.view.sequence {
            error!(
                parent = parent.number,
                sequence = self.state.view.sequence,
                "sequence not correct"
            );
            self.set_state(IbftState::Sync);
            return;
        }

        let snap = match self.get_snapshot(parent.number) {
            Ok(snap) => snap,
            Err(_) => {
                error!(num = parent.number, "cannot find snapshot");
                self.set_state(IbftState::Sync);
                return;
            }
        };

        if !snap.includes(self.address) {
            info!("we are not a validator anymore");
            self.set_state(IbftState::Sync);
            return;
        }

        self.strategy.accept_state_log(&snap);

        self.state.reset_round_msgs();
        // The election set follows the snapshot; the snapshot is consensus
        // state, so this stays deterministic across nodes.
        self.state.vset.set_validators(snap.set.clone());

        let last_proposer = if parent.number == 0 {
            Address::ZERO
        } else {
            ecrecover_from_header(&parent)
                .map(|pubkey| to_address(&pubkey))
                .unwrap_or(Address::ZERO)
        };

        {
            let mut ctx = StrategyContext {
                store: &self.store,
                state: &mut self.state,
                vrf_info: &self.vrf_info,
                fee_pool: &self.fee_pool,
            };
            if let Err(err) = self.strategy.calculate_proposer(&mut ctx, last_proposer) {
                error!(err = %err, "failed to calculate proposer");
            }
        }

        if self.state.proposer == self.address {
            self.run_accept_as_proposer(&snap, &parent).await;
            return;
        }

        info!(block = number, proposer = %self.state.proposer, "waiting for proposer");

        let timeout = self.config.exponential_timeout(self.state.view.round);
        while self.is_state(IbftState::Accept) {
            let Some(read) = self.next_message(timeout).await else {
                return; // closing
            };

            let Some(msg) = read else {
                self.set_state(IbftState::RoundChange);
                continue;
            };

            if msg.from != self.state.proposer {
                error!(from = %msg.from, "message received from wrong proposer");
                continue;
            }

            let block = match msg.proposal.as_deref().map(Block::decode_rlp) {
                Some(Ok(block)) => block,
                _ => {
                    error!("failed to decode proposal");
                    self.set_state(IbftState::RoundChange);
                    return;
                }
            };

            if self.state.is_locked() {
                // Locked: only the identical block may pass, without
                // re-verification.
                let locked_hash = self.state.block.as_ref().map(|b| b.hash());
                if Some(block.hash()) == locked_hash {
                    self.send_commit();
                    self.set_state(IbftState::Validate);
                } else {
                    self.handle_state_err(StateError::IncorrectBlockLocked);
                }
            } else {
                if let Err(err) = self.verify_header_impl(&snap, &parent, &block.header) {
                    error!(err = %err, "block verification failed");
                    self.state.err = Some(StateError::BlockVerificationFailed);
                    continue;
                }

                if let Err(err) = self.strategy.verify_block(&block) {
                    error!(err = %err, "block rejected by mechanism");
                    self.state.err = Some(StateError::BlockVerificationFailed);
                    continue;
                }

                info!(block = block.number(), "accepted proposal");
                self.state.block = Some(block);
                self.send_prepare();
                self.set_state(IbftState::Validate);
            }
        }
    }

    /// Proposer path of Accept: build (unless locked), wait for the block
    /// timestamp, then announce.
    async fn run_accept_as_proposer(&mut self, snap: &Snapshot, parent: &Header) {
        if !self.state.is_locked() {
            let block = match self.build_block(snap, parent) {
                Ok(block) => block,
                Err(err) => {
                    error!(err = %err, "failed to build block");
                    self.set_state(IbftState::RoundChange);
                    return;
                }
            };

            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs();
            let delay = Duration::from_secs(block.header.timestamp.saturating_sub(now));
            info!(delay_secs = delay.as_secs(), "waiting to seal the block");

            self.state.block = Some(block);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.cancelled() => return,
            }
        }

        self.send_preprepare();
        self.send_prepare();
        self.set_state(IbftState::Validate);
    }

    // ═══════════════════════════════════════════════════════════════════
    // Validate / Commit
    // ═══════════════════════════════════════════════════════════════════

    /// Tally Prepare and Commit votes; lock and commit at quorum.
    async fn run_validate_state(&mut self) {
        let mut has_committed = false;

        let timeout = self.config.exponential_timeout(self.state.view.round);
        while self.is_state(IbftState::Validate) {
            let Some(read) = self.next_message(timeout).await else {
                return; // closing
            };

            let Some(msg) = read else {
                self.set_state(IbftState::RoundChange);
                continue;
            };

            match msg.msg_type {
                MsgType::Prepare | MsgType::Commit => self.state.add_message(msg),
                other => {
                    warn!(msg_type = %other, "unexpected message in validate state");
                    continue;
                }
            }

            let num_valid = self.state.vset.num_valid();
            if self.state.num_prepared() > num_valid {
                // 2F + 1 Prepares: lock the block and vote to commit.
                self.lock_and_commit(&mut has_committed);
            }

            if self.state.num_committed() > num_valid {
                // 2F + 1 Commits: the block is final.
                self.lock_and_commit(&mut has_committed);
                self.set_state(IbftState::Commit);
            }
        }

        if self.is_state(IbftState::Commit) {
            let block = self.state.block.clone();
            self.state.unlock();

            match block {
                Some(block) => match self.insert_block(&block) {
                    Ok(()) => {
                        self.log_inserted(&block);
                        self.set_state(IbftState::Accept);
                    }
                    Err(err) => {
                        error!(err = %err, "failed to insert block");
                        self.handle_state_err(StateError::FailedToInsertBlock);
                    }
                },
                None => self.handle_state_err(StateError::FailedToInsertBlock),
            }
        }
    }

    fn lock_and_commit(&mut self, has_committed: &mut bool) {
        self.state.lock();
        if !*has_committed {
            self.send_commit();
            *has_committed = true;
        }
    }

    /// Install the committed seals, write the block, run post-insert
    /// maintenance and advance the view.
    fn insert_block(&mut self, block: &Block) -> Result<(), EngineError> {
        let seals = self.state.committed_seals();
        let header = write_committed_seals(&block.header, seals)?;

        let mut sealed = block.clone();
        sealed.header = header;

        self.blockchain
            .write_block(&sealed)
            .map_err(|e| EngineError::Adapter(e.to_string()))?;

        {
            let mut ctx = StrategyContext {
                store: &self.store,
                state: &mut self.state,
                vrf_info: &self.vrf_info,
                fee_pool: &self.fee_pool,
            };
            if let Err(err) = self.strategy.insert_block(&mut ctx, sealed.number()) {
                // The chain moves on; this boundary's refresh is skipped.
                warn!(block = sealed.number(), err = %err, "post-insert maintenance failed");
            }
        }

        info!(
            block = sealed.number(),
            miner = %sealed.header.miner,
            rounds = self.state.view.round + 1,
            committed = self.state.num_committed(),
            "inserted block"
        );

        self.state.view = View::new(sealed.number() + 1, 0);
        self.syncer.broadcast(&sealed);
        self.txpool.reset_with_headers(&[sealed.header.clone()]);
        Ok(())
    }

    fn log_inserted(&self, block: &Block) {
        if block.number() > 1 {
            if let Some(prev) = self.blockchain.get_header_by_number(block.number() - 1) {
                debug!(
                    interval_secs = block.header.timestamp.saturating_sub(prev.timestamp),
                    txns = block.transactions.len(),
                    "block interval"
                );
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Round change
    // ═══════════════════════════════════════════════════════════════════

    /// Negotiate the next round, or fall back to Sync when a peer is ahead.
    async fn run_round_change_state(&mut self) {
        // A pending error means the round failed locally; vote for the
        // next round straight away. A plain timeout first tries to adopt
        // the highest round the network already certified.
        if let Some(err) = self.state.take_err() {
            debug!(err = %err, "round change due to error");
            self.send_next_round_change();
        } else if let Some(max_round) = self.state.max_round() {
            debug!(round = max_round, "round change adopting max round");
            self.send_round_change(max_round);
        } else if self.check_peer_ahead() {
            return; // moved to Sync
        } else {
            self.send_next_round_change();
        }

        let mut timeout = self.config.exponential_timeout(self.state.view.round);
        while self.is_state(IbftState::RoundChange) {
            let Some(read) = self.next_message(timeout).await else {
                return; // closing
            };

            let Some(msg) = read else {
                debug!("round change timeout");
                if self.check_peer_ahead() {
                    return;
                }
                self.send_next_round_change();
                timeout = self.config.exponential_timeout(self.state.view.round);
                continue;
            };

            let msg_round = msg.view.round;
            let num = self.state.add_round_message(msg);

            if num == self.state.vset.num_valid() {
                // Full certificate: restart consensus at that round.
                self.state.view.round = msg_round;
                self.set_state(IbftState::Accept);
            } else if num == self.state.vset.max_faulty() + 1
                && self.state.view.round < msg_round
            {
                // Weak certificate: catch up to the advertised round.
                timeout = self.config.exponential_timeout(msg_round);
                self.send_round_change(msg_round);
            }
        }
    }

    /// Move to Sync when the best peer is past our tip.
    fn check_peer_ahead(&mut self) -> bool {
        if let Some(peer) = self.syncer.best_peer() {
            let local = self.blockchain.header();
            if peer.number() > local.number {
                debug!(local = local.number, remote = peer.number(), "found a better peer");
                self.set_state(IbftState::Sync);
                return true;
            }
        }
        false
    }

    fn send_round_change(&mut self, round: u64) {
        debug!(round = round + 1, "local round change");
        self.state.view.round = round;
        self.state.clean_round(round);
        self.gossip(MsgType::RoundChange);
    }

    fn send_next_round_change(&mut self) {
        self.send_round_change(self.state.view.round + 1);
    }

    // ═══════════════════════════════════════════════════════════════════
    // Messaging
    // ═══════════════════════════════════════════════════════════════════

    fn send_preprepare(&mut self) {
        self.gossip(MsgType::PrePrepare);
    }

    fn send_prepare(&mut self) {
        self.gossip(MsgType::Prepare);
    }

    fn send_commit(&mut self) {
        self.gossip(MsgType::Commit);
    }

    fn gossip(&mut self, msg_type: MsgType) {
        let mut msg = Message::new(msg_type, self.state.view);

        if msg_type == MsgType::PrePrepare {
            let Some(block) = &self.state.block else {
                error!("no proposal to gossip");
                return;
            };
            msg.proposal = Some(Bytes::from(block.encode_rlp()));
        }

        if msg_type == MsgType::Commit {
            let Some(block) = &self.state.block else {
                error!("no proposal to commit");
                return;
            };
            match write_committed_seal(&self.key, &block.header) {
                Ok(seal) => msg.seal = Some(Bytes::from(seal)),
                Err(err) => {
                    error!(err = %err, "failed to write committed seal");
                    return;
                }
            }
        }

        // Deliver a copy to ourselves so our own vote is tallied. The
        // proposal itself is not self-delivered; the proposer already holds
        // the block.
        if msg_type != MsgType::PrePrepare {
            let mut own = msg.clone();
            own.from = self.address;
            self.msg_queue.push_message(own);
            self.update.notify_one();
        }

        if let Err(err) = msg.sign(&self.key) {
            error!(err = %err, "failed to sign message");
            return;
        }

        if let Err(err) = self.transport.gossip(&msg) {
            error!(err = %err, "failed to gossip");
        }
    }

    /// Read the next message for the current state.
    ///
    /// Returns `None` when the engine is closing, `Some(None)` on timeout,
    /// and `Some(Some(msg))` otherwise.
    async fn next_message(&mut self, timeout: Duration) -> Option<Option<Message>> {
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            if let Some(msg) = self
                .msg_queue
                .read_message(self.state.state(), &self.state.view)
            {
                return Some(Some(msg));
            }

            tokio::select! {
                _ = &mut deadline => {
                    debug!(timeout = ?timeout, "no message before timeout");
                    return Some(None);
                }
                _ = self.shutdown.cancelled() => return None,
                _ = self.update.notified() => {}
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════
    // Verification
    // ═══════════════════════════════════════════════════════════════════

    /// Structural and cryptographic header checks against a snapshot and
    /// parent: extra-data shape, digest markers, proposer seal membership
    /// and the VRF evaluation over the parent-derived seed.
    pub fn verify_header_impl(
        &self,
        snap: &Snapshot,
        _parent: &Header,
        header: &Header,
    ) -> Result<(), EngineError> {
        let extra = get_extra(header)?;

        if header.mix_hash != ISTANBUL_DIGEST {
            return Err(EngineError::InvalidMixHash);
        }

        if header.sha3_uncles != EMPTY_UNCLE_HASH {
            return Err(EngineError::InvalidUncles);
        }

        if header.difficulty != header.number {
            return Err(EngineError::WrongDifficulty);
        }

        let pubkey = verify_signer(snap, header)?;

        // Re-derive the VRF input from our own parent view.
        let vrf_data = match self.blockchain.get_header_by_number(header.number - 1) {
            Some(prev) => {
                let seed = calc_vrf_seed(&prev)
                    .map_err(|_| EngineError::VrfVerificationFailed(header.number))?;
                vrf_sign_input(header.number, seed)
                    .map_err(|_| EngineError::VrfVerificationFailed(header.number))?
            }
            None => Vec::new(),
        };

        if !vrf::verify(&pubkey, &vrf_data, &extra.vrf_value, &extra.vrf_proof) {
            return Err(EngineError::VrfVerificationFailed(header.number));
        }

        debug!(block = header.number, "header verified");
        Ok(())
    }

    /// Full header verification: the structural checks plus the committed
    /// seals, then the snapshot store advances over the header.
    pub fn verify_header(&self, parent: &Header, header: &Header) -> Result<(), EngineError> {
        let snap = self.get_snapshot(parent.number)?;
        self.verify_header_impl(&snap, parent, header)?;
        verify_committed_fields(&snap, header)?;
        self.process_headers(std::slice::from_ref(header))
    }

    /// Recover the block author from the proposer seal.
    pub fn block_creator(&self, header: &Header) -> Result<Address, EngineError> {
        Ok(to_address(&ecrecover_from_header(header)?))
    }

    /// Latest sync progression, if a bulk sync is running.
    pub fn sync_progression(&self) -> Option<crate::adapters::Progression> {
        self.syncer.get_sync_progression()
    }

    // ═══════════════════════════════════════════════════════════════════
    // Small helpers
    // ═══════════════════════════════════════════════════════════════════

    pub(crate) fn epoch_of(&self, number: u64) -> u64 {
        if number % self.config.epoch_size == 0 {
            number / self.config.epoch_size
        } else {
            number / self.config.epoch_size + 1
        }
    }

    fn handle_state_err(&mut self, err: StateError) {
        self.state.err = Some(err);
        self.set_state(IbftState::RoundChange);
    }

    fn is_state(&self, state: IbftState) -> bool {
        self.state.state() == state
    }

    fn set_state(&mut self, state: IbftState) {
        self.state.set_state(state);
    }
}
