//! Per-round consensus state.

use crate::message::{Message, MsgType, View};
use crate::validators::ValidatorSet;
use crate::{IbftState, StateError};
use alloy_primitives::{Address, U256};
use ibex_types::Block;
use std::collections::HashMap;

/// Everything the engine tracks about the round in flight: the view, the
/// elected proposer, the proposal under vote, the Prepare/Commit tallies,
/// the round-change tallies and the lock flag.
///
/// Only messages from current validator-set members are tallied, and each
/// validator counts once per tally.
pub struct CurrentState {
    /// Current sequence and round.
    pub view: View,

    /// Proposer elected for this view.
    pub proposer: Address,

    /// The validator set the tallies are measured against.
    pub vset: ValidatorSet,

    /// Block proposal being agreed on.
    pub block: Option<Block>,

    /// Prepare votes by sender.
    prepared: HashMap<Address, Message>,

    /// Commit votes (carrying seals) by sender.
    committed: HashMap<Address, Message>,

    /// Round-change votes, per target round, by sender.
    round_messages: HashMap<u64, HashMap<Address, Message>>,

    /// Whether the engine is locked on `block`.
    locked: bool,

    state: IbftState,

    /// Error that routed the machine into round change, if any.
    pub err: Option<StateError>,
}

impl Default for CurrentState {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrentState {
    pub fn new() -> Self {
        Self {
            view: View::default(),
            proposer: Address::ZERO,
            vset: ValidatorSet::new(),
            block: None,
            prepared: HashMap::new(),
            committed: HashMap::new(),
            round_messages: HashMap::new(),
            locked: false,
            state: IbftState::Sync,
            err: None,
        }
    }

    pub fn state(&self) -> IbftState {
        self.state
    }

    pub fn set_state(&mut self, state: IbftState) {
        self.state = state;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Lock onto the current proposal; only a commit or an explicit unlock
    /// releases it.
    pub fn lock(&mut self) {
        self.locked = true;
    }

    pub fn unlock(&mut self) {
        self.block = None;
        self.locked = false;
    }

    /// Take and clear the pending state error.
    pub fn take_err(&mut self) -> Option<StateError> {
        self.err.take()
    }

    /// Elect the proposer for the current view from the seed.
    pub fn calc_proposer(&mut self, seed: U256) {
        if let Some(proposer) = self.vset.calc_proposer(seed) {
            self.proposer = proposer;
        }
    }

    /// Forget all tallies for a fresh sequence.
    pub fn reset_round_msgs(&mut self) {
        self.prepared.clear();
        self.committed.clear();
        self.round_messages.clear();
    }

    /// Drop the round-change tally for one round.
    pub fn clean_round(&mut self, round: u64) {
        self.round_messages.remove(&round);
    }

    /// Record a Prepare or Commit vote from a current validator.
    pub fn add_message(&mut self, msg: Message) {
        if !self.vset.includes(msg.from) {
            return;
        }
        match msg.msg_type {
            MsgType::Prepare => {
                self.prepared.insert(msg.from, msg);
            }
            MsgType::Commit => {
                self.committed.insert(msg.from, msg);
            }
            _ => {}
        }
    }

    /// Record a round-change vote; returns the tally for its target round.
    pub fn add_round_message(&mut self, msg: Message) -> usize {
        if msg.msg_type != MsgType::RoundChange || !self.vset.includes(msg.from) {
            return 0;
        }
        let round = msg.view.round;
        let tally = self.round_messages.entry(round).or_default();
        tally.insert(msg.from, msg);
        tally.len()
    }

    /// Highest round backed by a weak certificate (`F + 1` votes), the
    /// round a node behind the network should catch up to.
    pub fn max_round(&self) -> Option<u64> {
        let threshold = self.vset.max_faulty() + 1;
        self.round_messages
            .iter()
            .filter(|(_, tally)| tally.len() >= threshold)
            .map(|(round, _)| *round)
            .max()
    }

    pub fn num_prepared(&self) -> usize {
        self.prepared.len()
    }

    pub fn num_committed(&self) -> usize {
        self.committed.len()
    }

    /// The committed seals gathered so far.
    pub fn committed_seals(&self) -> Vec<Vec<u8>> {
        self.committed
            .values()
            .filter_map(|msg| msg.seal.as_ref())
            .map(|seal| seal.to_vec())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;

    fn addr(tag: u8) -> Address {
        Address::repeat_byte(tag)
    }

    fn state_with_validators(n: u8) -> CurrentState {
        let state = CurrentState::new();
        state.vset.set_validators((1..=n).map(addr).collect());
        state
    }

    fn vote(from: u8, msg_type: MsgType, round: u64) -> Message {
        let mut msg = Message::new(msg_type, View::new(1, round));
        msg.from = addr(from);
        if msg_type == MsgType::Commit {
            msg.seal = Some(Bytes::from(vec![from; 65]));
        }
        msg
    }

    #[test]
    fn votes_count_once_per_validator() {
        let mut state = state_with_validators(4);

        state.add_message(vote(1, MsgType::Commit, 0));
        state.add_message(vote(2, MsgType::Commit, 0));
        state.add_message(vote(2, MsgType::Commit, 0));
        assert_eq!(state.num_committed(), 2);

        state.add_message(vote(3, MsgType::Prepare, 0));
        state.add_message(vote(3, MsgType::Prepare, 0));
        state.add_message(vote(4, MsgType::Prepare, 0));
        assert_eq!(state.num_prepared(), 2);
    }

    #[test]
    fn outsider_votes_are_ignored() {
        let mut state = state_with_validators(2);
        state.add_message(vote(9, MsgType::Prepare, 0));
        assert_eq!(state.num_prepared(), 0);
    }

    #[test]
    fn round_messages_tally_per_round() {
        let mut state = state_with_validators(4);

        assert_eq!(state.add_round_message(vote(1, MsgType::RoundChange, 2)), 1);
        assert_eq!(state.add_round_message(vote(2, MsgType::RoundChange, 2)), 2);
        assert_eq!(state.add_round_message(vote(3, MsgType::RoundChange, 5)), 1);

        // The weak certificate for N=4 is 2 votes, reached only by round 2.
        assert_eq!(state.max_round(), Some(2));

        state.clean_round(2);
        assert_eq!(state.max_round(), None);
    }

    #[test]
    fn committed_seals_come_from_commit_votes() {
        let mut state = state_with_validators(3);
        state.add_message(vote(1, MsgType::Commit, 0));
        state.add_message(vote(2, MsgType::Commit, 0));

        let seals = state.committed_seals();
        assert_eq!(seals.len(), 2);
        assert!(seals.iter().all(|seal| seal.len() == 65));
    }

    #[test]
    fn lock_and_unlock_manage_the_proposal() {
        let mut state = state_with_validators(1);
        state.block = Some(Block::default());
        state.lock();
        assert!(state.is_locked());

        state.unlock();
        assert!(!state.is_locked());
        assert!(state.block.is_none());
    }

    #[test]
    fn reset_clears_every_tally() {
        let mut state = state_with_validators(4);
        state.add_message(vote(1, MsgType::Prepare, 0));
        state.add_message(vote(2, MsgType::Commit, 0));
        state.add_round_message(vote(3, MsgType::RoundChange, 1));

        state.reset_round_msgs();
        assert_eq!(state.num_prepared(), 0);
        assert_eq!(state.num_committed(), 0);
        assert_eq!(state.max_round(), None);
    }
}
