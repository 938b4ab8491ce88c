//! Multi-relay aggregation, publication fan-out, and the vote entry point.

use anyhow::Result;
use futures_util::future::join_all;
use nostr_sdk::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::collector;
use crate::feed::FeedBuffer;
use crate::ledger::VoteLedger;
use crate::miner::{self, Draft};
use crate::relay::RelayHandle;
use crate::vote::{self, VoteSign, KARMA_VOTE_KIND};

/// The one engine error that reaches callers: the event was not accepted
/// anywhere, so the user-visible action did not happen. Per-relay errors
/// never surface individually.
#[derive(Debug, Error)]
#[error("event {event_id} was not accepted by any of {attempted} relay(s)")]
pub struct PublishError {
    pub event_id: EventId,
    pub attempted: usize,
}

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time budget granted to each relay during a collection.
    pub per_relay_timeout: Duration,
    /// Per-relay result cap on vote queries, bounding worst-case memory.
    pub vote_limit: usize,
    /// Proof-of-work difficulty in bits applied before publishing.
    /// 0 disables mining.
    pub pow_difficulty: u8,
    /// Iteration budget for the nonce search.
    pub pow_max_iterations: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            per_relay_timeout: Duration::from_secs(4),
            vote_limit: 500,
            pow_difficulty: 0,
            pow_max_iterations: 100_000,
        }
    }
}

/// Outcome of a vote publish.
#[derive(Debug, Clone)]
pub struct CastVote {
    /// The sign that actually went out (after toggle resolution).
    pub sign: VoteSign,
    /// The published vote event.
    pub event: Event,
    /// How many relays accepted it.
    pub accepted: usize,
}

/// Vote aggregation and feed engine for one client session.
///
/// Owns the relay set, the vote ledger, and the feed buffer's seen state
/// for its lifetime; nothing here is ambient or global.
pub struct KarmaEngine {
    keys: Keys,
    relays: Vec<Arc<dyn RelayHandle>>,
    config: EngineConfig,
    ledger: VoteLedger,
    feed: FeedBuffer,
}

impl KarmaEngine {
    pub fn new(keys: Keys, relays: Vec<Arc<dyn RelayHandle>>, config: EngineConfig) -> Self {
        Self {
            keys,
            relays,
            config,
            ledger: VoteLedger::new(),
            feed: FeedBuffer::new(),
        }
    }

    pub fn relays(&self) -> &[Arc<dyn RelayHandle>] {
        &self.relays
    }

    pub fn feed(&self) -> &FeedBuffer {
        &self.feed
    }

    pub fn ledger(&self) -> &VoteLedger {
        &self.ledger
    }

    pub fn public_key(&self) -> PublicKey {
        self.keys.public_key()
    }

    fn vote_filter(&self, target: &EventId) -> Filter {
        Filter::new()
            .kind(Kind::Custom(KARMA_VOTE_KIND))
            .custom_tag(SingleLetterTag::lowercase(Alphabet::E), target.to_hex())
            .limit(self.config.vote_limit)
    }

    /// Aggregate the karma score for a target event across every known
    /// relay.
    ///
    /// Each relay is collected concurrently under its own time budget and
    /// merged sequentially afterwards, deduplicated by event id, so an
    /// event echoed by several relays counts once and a hung relay cannot
    /// stall the others. Relay failures contribute empty sets; the call
    /// itself cannot fail.
    pub async fn score_for(&self, target: &EventId) -> i64 {
        let filter = self.vote_filter(target);
        let collections = join_all(self.relays.iter().map(|relay| {
            collector::collect(
                relay.clone(),
                vec![filter.clone()],
                self.config.per_relay_timeout,
            )
        }))
        .await;

        let mut merged: HashMap<EventId, Event> = HashMap::new();
        for collection in collections {
            merged.extend(collection);
        }
        debug!(
            "Resolved {} candidate vote(s) for {} from {} relay(s)",
            merged.len(),
            target,
            self.relays.len()
        );

        vote::resolve_score(merged.values(), target)
    }

    /// Look a single event up by id, first relay to answer wins.
    pub async fn fetch_event(&self, id: &EventId) -> Option<Event> {
        let filter = Filter::new().ids([*id]).limit(1);
        let collections = join_all(self.relays.iter().map(|relay| {
            collector::collect(
                relay.clone(),
                vec![filter.clone()],
                self.config.per_relay_timeout,
            )
        }))
        .await;

        collections
            .into_iter()
            .find_map(|mut collection| collection.remove(id))
    }

    /// Fan an event out to every relay. Individual refusals are logged
    /// and swallowed; only nobody-accepted-it surfaces, as that means the
    /// user's action failed.
    pub async fn publish(&self, event: &Event) -> Result<usize, PublishError> {
        let budget = self.config.per_relay_timeout;
        let results = join_all(self.relays.iter().map(|relay| async move {
            let attempt = tokio::time::timeout(budget, relay.publish(event.clone())).await;
            (relay.url().to_string(), attempt)
        }))
        .await;

        let mut accepted = 0usize;
        for (url, attempt) in results {
            match attempt {
                Ok(Ok(())) => accepted += 1,
                Ok(Err(e)) => warn!("Publish to {url} failed: {e:#}"),
                Err(_) => warn!("Publish to {url} timed out"),
            }
        }

        if accepted == 0 {
            return Err(PublishError {
                event_id: event.id,
                attempted: self.relays.len(),
            });
        }
        Ok(accepted)
    }

    /// Cast (or toggle off) a vote on a target event.
    ///
    /// The ledger decides the outgoing sign: requesting the currently
    /// recorded sign publishes a clear instead. The ledger is committed
    /// only after at least one relay accepted the broadcast; a total
    /// publish failure leaves it untouched.
    pub async fn cast_vote(
        &self,
        target: EventId,
        target_author: PublicKey,
        requested: VoteSign,
    ) -> Result<CastVote> {
        let sign = self.ledger.next_sign(&target, requested);

        let draft = Draft::new(
            Kind::Custom(KARMA_VOTE_KIND),
            "",
            vec![
                Tag::public_key(target_author),
                Tag::event(target),
                Tag::custom(TagKind::custom("v"), vec![sign.tag_value().to_string()]),
            ],
        );
        let event = miner::mine(
            &draft,
            &self.keys,
            self.config.pow_difficulty,
            self.config.pow_max_iterations,
        )?;

        let accepted = self.publish(&event).await?;
        self.ledger.commit(target, sign);
        info!(
            "Vote {} on {} accepted by {}/{} relay(s)",
            sign.tag_value(),
            target,
            accepted,
            self.relays.len()
        );

        Ok(CastVote {
            sign,
            event,
            accepted,
        })
    }

    /// Publish a plain text note, mined per the engine config.
    pub async fn publish_note(&self, content: &str) -> Result<(Event, usize)> {
        let draft = Draft::new(Kind::TextNote, content, Vec::new());
        let event = miner::mine(
            &draft,
            &self.keys,
            self.config.pow_difficulty,
            self.config.pow_max_iterations,
        )?;
        let accepted = self.publish(&event).await?;
        Ok((event, accepted))
    }
}
