//! Best-effort proof-of-work nonce search before publication.

use anyhow::Result;
use nostr_sdk::prelude::*;
use tracing::{debug, warn};

/// An unsigned event payload, rebuilt fresh for every nonce attempt.
#[derive(Debug, Clone)]
pub struct Draft {
    pub kind: Kind,
    pub content: String,
    pub tags: Vec<Tag>,
    /// Pin the timestamp so repeated signing attempts hash the same
    /// payload apart from the nonce. `None` stamps at signing time.
    pub created_at: Option<Timestamp>,
}

impl Draft {
    pub fn new(kind: Kind, content: impl Into<String>, tags: Vec<Tag>) -> Self {
        Self {
            kind,
            content: content.into(),
            tags,
            created_at: None,
        }
    }

    fn builder(&self, extra: Option<Tag>) -> EventBuilder {
        let mut tags = self.tags.clone();
        if let Some(tag) = extra {
            tags.push(tag);
        }
        let mut builder = EventBuilder::new(self.kind, self.content.as_str()).tags(tags);
        if let Some(ts) = self.created_at {
            builder = builder.custom_created_at(ts);
        }
        builder
    }

    /// Sign the draft as-is, without a nonce tag.
    pub fn sign(&self, keys: &Keys) -> Result<Event> {
        Ok(self.builder(None).sign_with_keys(keys)?)
    }
}

/// Required count of leading zero hex digits for a difficulty in bits.
fn zero_prefix_len(difficulty_bits: u8) -> usize {
    (difficulty_bits / 4) as usize
}

fn satisfies(id: &EventId, prefix_len: usize) -> bool {
    id.to_hex().bytes().take(prefix_len).all(|b| b == b'0')
}

/// Search for a nonce that gives the event id `difficulty_bits / 4`
/// leading zero hex digits.
///
/// Difficulty 0 short-circuits to a single signing call with no nonce tag.
/// Nonces are tried in order from 0, so the search is deterministic for a
/// fixed draft and key. An exhausted iteration budget degrades to the
/// unmined event instead of failing: mining is spam deterrence, not a
/// publication gate.
pub fn mine(draft: &Draft, keys: &Keys, difficulty_bits: u8, max_iterations: u64) -> Result<Event> {
    let prefix_len = zero_prefix_len(difficulty_bits);
    if prefix_len == 0 {
        return draft.sign(keys);
    }

    for nonce in 0..max_iterations {
        let tag = Tag::custom(TagKind::custom("nonce"), vec![nonce.to_string()]);
        let event = draft.builder(Some(tag)).sign_with_keys(keys)?;
        if satisfies(&event.id, prefix_len) {
            debug!(
                "Mined {}-bit id {} after {} iteration(s)",
                difficulty_bits,
                event.id,
                nonce + 1
            );
            return Ok(event);
        }
    }

    warn!("Mining budget of {max_iterations} exhausted, publishing unmined event");
    draft.sign(keys)
}
