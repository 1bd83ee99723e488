//! Per-state message queues with round gating.
//!
//! Messages are classified by type into three queues — PrePrepare feeds
//! Accept, Prepare/Commit feed Validate, RoundChange feeds its own state —
//! and indexed by `(sequence, round)`. Within a bucket arrival order is
//! preserved; across buckets the reader drains in ascending view order.
//! Messages below the engine's current view are discarded on read, messages
//! above it stay buffered until the view catches up.

use crate::message::{Message, MsgType, View};
use crate::IbftState;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

type Buckets = BTreeMap<(u64, u64), VecDeque<Message>>;

#[derive(Debug, Default)]
struct QueueInner {
    accept: Buckets,
    validate: Buckets,
    round_change: Buckets,
}

/// Thread-safe consensus message queue.
#[derive(Debug, Default)]
pub struct MsgQueue {
    inner: Mutex<QueueInner>,
}

impl MsgQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a validated message.
    pub fn push_message(&self, msg: Message) {
        let key = (msg.view.sequence, msg.view.round);
        let mut inner = self.inner.lock();
        let queue = match msg.msg_type {
            MsgType::PrePrepare => &mut inner.accept,
            MsgType::Prepare | MsgType::Commit => &mut inner.validate,
            MsgType::RoundChange => &mut inner.round_change,
        };
        queue.entry(key).or_default().push_back(msg);
    }

    /// Read the next deliverable message for `state` at `view`.
    ///
    /// Sync consumes nothing. Stale buckets are dropped as they are passed
    /// over; future buckets are left in place and `None` is returned.
    pub fn read_message(&self, state: IbftState, view: &View) -> Option<Message> {
        let mut inner = self.inner.lock();
        let (queue, any_round) = match state {
            IbftState::Sync | IbftState::Commit => return None,
            IbftState::Accept => (&mut inner.accept, false),
            IbftState::Validate => (&mut inner.validate, false),
            // Round-change certificates may arrive for rounds we have not
            // reached yet; deliver every round of the current sequence.
            IbftState::RoundChange => (&mut inner.round_change, true),
        };

        loop {
            let (&key, _) = queue.iter().next()?;
            let (sequence, round) = key;

            let stale = sequence < view.sequence
                || (sequence == view.sequence && round < view.round);
            if stale {
                queue.remove(&key);
                continue;
            }

            let deliverable = sequence == view.sequence && (any_round || round == view.round);
            if !deliverable {
                // Future bucket; keep it for later.
                return None;
            }

            let bucket = queue.get_mut(&key)?;
            let msg = bucket.pop_front();
            if bucket.is_empty() {
                queue.remove(&key);
            }
            return msg;
        }
    }

    /// Number of buffered messages across all queues.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        [&inner.accept, &inner.validate, &inner.round_change]
            .iter()
            .flat_map(|q| q.values())
            .map(|bucket| bucket.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn msg(msg_type: MsgType, sequence: u64, round: u64, tag: u8) -> Message {
        let mut m = Message::new(msg_type, View::new(sequence, round));
        m.from = Address::repeat_byte(tag);
        m
    }

    #[test]
    fn routes_by_state() {
        let queue = MsgQueue::new();
        queue.push_message(msg(MsgType::PrePrepare, 1, 0, 1));
        queue.push_message(msg(MsgType::Prepare, 1, 0, 2));
        queue.push_message(msg(MsgType::RoundChange, 1, 0, 3));

        let view = View::new(1, 0);
        assert!(queue.read_message(IbftState::Sync, &view).is_none());

        let accept = queue.read_message(IbftState::Accept, &view).unwrap();
        assert_eq!(accept.msg_type, MsgType::PrePrepare);

        let validate = queue.read_message(IbftState::Validate, &view).unwrap();
        assert_eq!(validate.msg_type, MsgType::Prepare);

        let rc = queue.read_message(IbftState::RoundChange, &view).unwrap();
        assert_eq!(rc.msg_type, MsgType::RoundChange);
    }

    #[test]
    fn stale_messages_are_dropped() {
        let queue = MsgQueue::new();
        queue.push_message(msg(MsgType::Prepare, 3, 0, 1));
        queue.push_message(msg(MsgType::Prepare, 5, 0, 2));

        // Reading at sequence 5 discards the sequence-3 bucket.
        let view = View::new(5, 0);
        let delivered = queue.read_message(IbftState::Validate, &view).unwrap();
        assert_eq!(delivered.view.sequence, 5);
        assert!(queue.is_empty());
    }

    #[test]
    fn future_messages_stay_buffered() {
        let queue = MsgQueue::new();
        queue.push_message(msg(MsgType::Prepare, 9, 0, 1));

        let view = View::new(5, 0);
        assert!(queue.read_message(IbftState::Validate, &view).is_none());
        assert_eq!(queue.len(), 1);

        // Once the view advances the buffered message is delivered.
        let later = View::new(9, 0);
        assert!(queue.read_message(IbftState::Validate, &later).is_some());
    }

    #[test]
    fn fifo_within_a_bucket() {
        let queue = MsgQueue::new();
        for tag in 1..=3u8 {
            queue.push_message(msg(MsgType::Commit, 2, 0, tag));
        }

        let view = View::new(2, 0);
        for tag in 1..=3u8 {
            let m = queue.read_message(IbftState::Validate, &view).unwrap();
            assert_eq!(m.from, Address::repeat_byte(tag));
        }
    }

    #[test]
    fn round_change_delivers_higher_rounds() {
        let queue = MsgQueue::new();
        queue.push_message(msg(MsgType::RoundChange, 4, 7, 1));

        let view = View::new(4, 1);
        let delivered = queue.read_message(IbftState::RoundChange, &view).unwrap();
        assert_eq!(delivered.view.round, 7);
    }

    #[test]
    fn validate_keeps_higher_round_buffered() {
        let queue = MsgQueue::new();
        queue.push_message(msg(MsgType::Prepare, 4, 2, 1));

        let view = View::new(4, 0);
        assert!(queue.read_message(IbftState::Validate, &view).is_none());

        let later = View::new(4, 2);
        assert!(queue.read_message(IbftState::Validate, &later).is_some());
    }
}
