//! Per-session memory of the local identity's last vote per target.

use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::vote::VoteSign;

/// Remembers the last sign this client cast on each target event, giving
/// vote controls their click-to-clear behavior. One entry per target;
/// concurrent votes on the same target serialize on the inner lock, last
/// write wins. Session-scoped, nothing is persisted.
#[derive(Debug, Default)]
pub struct VoteLedger {
    last: Mutex<HashMap<EventId, VoteSign>>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The sign an actual publish should carry: requesting the sign that is
    /// already recorded toggles it off (publishes a clear), anything else
    /// passes through.
    pub fn next_sign(&self, target: &EventId, requested: VoteSign) -> VoteSign {
        match self.last.lock().get(target) {
            Some(last) if *last == requested => VoteSign::Clear,
            _ => requested,
        }
    }

    /// Record a vote. Call only after the publish attempt succeeded; a
    /// failed broadcast must leave the ledger untouched.
    pub fn commit(&self, target: EventId, sign: VoteSign) {
        self.last.lock().insert(target, sign);
    }

    /// Last committed sign for a target, if any.
    pub fn last_sign(&self, target: &EventId) -> Option<VoteSign> {
        self.last.lock().get(target).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some_target() -> EventId {
        let keys = Keys::generate();
        EventBuilder::text_note("t").sign_with_keys(&keys).unwrap().id
    }

    #[test]
    fn first_vote_passes_through() {
        let ledger = VoteLedger::new();
        let target = some_target();
        assert_eq!(ledger.next_sign(&target, VoteSign::Up), VoteSign::Up);
        assert_eq!(ledger.next_sign(&target, VoteSign::Down), VoteSign::Down);
    }

    #[test]
    fn repeating_a_vote_clears_it() {
        let ledger = VoteLedger::new();
        let target = some_target();

        assert_eq!(ledger.next_sign(&target, VoteSign::Up), VoteSign::Up);
        ledger.commit(target, VoteSign::Up);
        assert_eq!(ledger.next_sign(&target, VoteSign::Up), VoteSign::Clear);
    }

    #[test]
    fn switching_sign_is_not_a_toggle() {
        let ledger = VoteLedger::new();
        let target = some_target();

        ledger.commit(target, VoteSign::Up);
        assert_eq!(ledger.next_sign(&target, VoteSign::Down), VoteSign::Down);
    }

    #[test]
    fn uncommitted_vote_leaves_ledger_unchanged() {
        let ledger = VoteLedger::new();
        let target = some_target();

        // next_sign alone must not record anything (publish may still fail).
        let _ = ledger.next_sign(&target, VoteSign::Up);
        assert_eq!(ledger.last_sign(&target), None);
        assert_eq!(ledger.next_sign(&target, VoteSign::Up), VoteSign::Up);
    }

    #[test]
    fn targets_are_independent() {
        let ledger = VoteLedger::new();
        let a = some_target();
        let b = some_target();

        ledger.commit(a, VoteSign::Up);
        assert_eq!(ledger.next_sign(&b, VoteSign::Up), VoteSign::Up);
    }
}
