//! Buffer for newly observed feed events, revealed on demand.
//!
//! Live events are held out of view until the user asks for them, instead
//! of being inserted into the visible feed as they arrive. The seen-id set
//! spans both the buffer and everything already rendered, and only grows
//! within a session.

use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use std::collections::HashSet;
use tracing::trace;

#[derive(Debug, Default)]
struct FeedState {
    seen: HashSet<EventId>,
    pending: Vec<Event>,
}

/// Pending-event buffer with session-wide id dedup.
#[derive(Debug, Default)]
pub struct FeedBuffer {
    state: Mutex<FeedState>,
}

impl FeedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a newly observed event. A no-op when the id was already
    /// buffered or already rendered; concurrent offers of distinct ids
    /// never conflict.
    pub fn offer(&self, event: Event) {
        let mut state = self.state.lock();
        if !state.seen.insert(event.id) {
            trace!("Ignoring already-seen event {}", event.id);
            return;
        }
        state.pending.push(event);
    }

    /// Register an id that went straight to the visible feed (initial
    /// backfill), so later relay echoes of it are not buffered again.
    pub fn mark_seen(&self, id: EventId) {
        self.state.lock().seen.insert(id);
    }

    /// Number of events waiting behind the reveal affordance.
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Drain the buffer, newest first. Equal timestamps are ordered by
    /// descending event id so the output is reproducible for the same
    /// input multiset regardless of arrival order. The ids stay in the
    /// seen set.
    pub fn flush(&self) -> Vec<Event> {
        let mut pending = std::mem::take(&mut self.state.lock().pending);
        pending.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        pending
    }
}
