//! End-to-end engine tests against in-process mock relays.
//!
//! These cover the full vote round trip (cast → broadcast → collect →
//! resolve) and the timeout isolation properties, with no network.

use anyhow::bail;
use async_trait::async_trait;
use futures_util::FutureExt;
use karma_core::nostr_sdk::prelude::*;
use karma_core::{EngineConfig, KarmaEngine, RelayHandle, Subscription, VoteSign, KARMA_VOTE_KIND};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Mock relay: serves stored events (optionally after a delay), accepts
/// publishes into `published`, and can play dead.
#[derive(Default)]
struct MockRelay {
    url: String,
    stored: Mutex<Vec<Event>>,
    delay: Option<Duration>,
    unreachable: bool,
    published: Mutex<Vec<Event>>,
}

impl MockRelay {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            ..Self::default()
        }
    }

    fn with_stored(url: &str, events: Vec<Event>) -> Self {
        let relay = Self::new(url);
        *relay.stored.lock() = events;
        relay
    }
}

#[async_trait]
impl RelayHandle for MockRelay {
    fn url(&self) -> &str {
        &self.url
    }

    fn is_connected(&self) -> bool {
        !self.unreachable
    }

    async fn subscribe(&self, _filters: Vec<Filter>) -> anyhow::Result<Subscription> {
        if self.unreachable {
            bail!("relay unreachable");
        }
        let (tx, rx) = mpsc::channel(256);
        let events = self.stored.lock().clone();
        let delay = self.delay;
        let feeder = tokio::spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            // Keep the stream open like a live subscription would.
            std::future::pending::<()>().await;
        });
        let teardown = async move {
            feeder.abort();
        }
        .boxed();
        Ok(Subscription::new(rx, teardown))
    }

    async fn publish(&self, event: Event) -> anyhow::Result<()> {
        if self.unreachable {
            bail!("relay unreachable");
        }
        self.published.lock().push(event);
        Ok(())
    }
}

fn engine(relays: Vec<Arc<dyn RelayHandle>>, keys: Keys) -> KarmaEngine {
    let config = EngineConfig {
        per_relay_timeout: Duration::from_millis(300),
        ..EngineConfig::default()
    };
    KarmaEngine::new(keys, relays, config)
}

fn vote_event(keys: &Keys, target: &EventId, author: &PublicKey, sign: &str, ts: u64) -> Event {
    EventBuilder::new(Kind::Custom(KARMA_VOTE_KIND), "")
        .tags(vec![
            Tag::public_key(*author),
            Tag::event(*target),
            Tag::custom(TagKind::custom("v"), vec![sign.to_string()]),
        ])
        .custom_created_at(Timestamp::from(ts))
        .sign_with_keys(keys)
        .unwrap()
}

fn text_note(keys: &Keys, content: &str, ts: u64) -> Event {
    EventBuilder::text_note(content)
        .custom_created_at(Timestamp::from(ts))
        .sign_with_keys(keys)
        .unwrap()
}

#[tokio::test]
async fn score_survives_echoes_conflicts_and_garbage() {
    let author_keys = Keys::generate();
    let post = text_note(&author_keys, "the post", 1000);
    let author = author_keys.public_key();

    let alice = Keys::generate();
    let bob = Keys::generate();
    let carol = Keys::generate();

    // Alice: +1 then -1 later => counts -1.
    let alice_up = vote_event(&alice, &post.id, &author, "1", 10);
    let alice_down = vote_event(&alice, &post.id, &author, "-1", 20);
    // Bob: +1, echoed by both relays => counts once.
    let bob_up = vote_event(&bob, &post.id, &author, "1", 15);
    // Carol: +1 then cleared => counts 0 and suppresses the +1.
    let carol_up = vote_event(&carol, &post.id, &author, "1", 5);
    let carol_clear = vote_event(&carol, &post.id, &author, "0", 30);
    // Garbage that must be silently excluded.
    let not_a_vote = text_note(&alice, "just chatting", 12);
    let bad_sign = vote_event(&alice, &post.id, &author, "7", 40);

    let r1: Arc<dyn RelayHandle> = Arc::new(MockRelay::with_stored(
        "wss://one.test",
        vec![
            alice_up.clone(),
            bob_up.clone(),
            carol_up.clone(),
            not_a_vote,
        ],
    ));
    let r2: Arc<dyn RelayHandle> = Arc::new(MockRelay::with_stored(
        "wss://two.test",
        vec![alice_down, bob_up, carol_clear, bad_sign],
    ));

    let engine = engine(vec![r1, r2], Keys::generate());

    // -1 (alice) + 1 (bob) + 0 (carol) = 0
    assert_eq!(engine.score_for(&post.id).await, 0);
    // Idempotent: asking again changes nothing.
    assert_eq!(engine.score_for(&post.id).await, 0);
}

#[tokio::test]
async fn hung_relay_costs_only_its_own_budget() {
    let author_keys = Keys::generate();
    let post = text_note(&author_keys, "post", 1000);
    let alice = Keys::generate();
    let up = vote_event(&alice, &post.id, &author_keys.public_key(), "1", 10);

    let mut hung = MockRelay::new("wss://hung.test");
    hung.delay = Some(Duration::from_secs(60));
    let live = MockRelay::with_stored("wss://live.test", vec![up]);

    let engine = engine(
        vec![Arc::new(hung), Arc::new(live)],
        Keys::generate(),
    );

    let started = std::time::Instant::now();
    let score = engine.score_for(&post.id).await;
    let elapsed = started.elapsed();

    assert_eq!(score, 1);
    // Collections run concurrently, so the whole call is bounded by one
    // per-relay budget, not their sum, and certainly not the hung delay.
    assert!(
        elapsed < Duration::from_secs(5),
        "aggregation blocked on a hung relay: {elapsed:?}"
    );
}

#[tokio::test]
async fn cast_vote_round_trips_through_aggregation() {
    let author_keys = Keys::generate();
    let post = text_note(&author_keys, "post", 1000);
    let author = author_keys.public_key();

    let relay = Arc::new(MockRelay::new("wss://loop.test"));
    let voter_engine = engine(vec![relay.clone()], Keys::generate());

    voter_engine
        .cast_vote(post.id, author, VoteSign::Up)
        .await
        .unwrap();

    // Feed the broadcast vote back in as if a relay stored it.
    let echoed = relay.published.lock().clone();
    let reader: Arc<dyn RelayHandle> =
        Arc::new(MockRelay::with_stored("wss://read.test", echoed));
    let reader_engine = engine(vec![reader], Keys::generate());

    assert_eq!(reader_engine.score_for(&post.id).await, 1);
}

#[tokio::test]
async fn toggling_publishes_a_clear_vote() {
    let author_keys = Keys::generate();
    let post = text_note(&author_keys, "post", 1000);
    let author = author_keys.public_key();

    let relay = Arc::new(MockRelay::new("wss://toggle.test"));
    let engine = engine(vec![relay.clone()], Keys::generate());

    let first = engine.cast_vote(post.id, author, VoteSign::Up).await.unwrap();
    let second = engine.cast_vote(post.id, author, VoteSign::Up).await.unwrap();

    assert_eq!(first.sign, VoteSign::Up);
    assert_eq!(second.sign, VoteSign::Clear);

    // The second broadcast is a well-formed clear vote on the same target.
    let published = relay.published.lock();
    assert_eq!(published.len(), 2);
    let cleared = karma_core::VoteTag::decode(&published[1]).unwrap();
    assert_eq!(cleared.sign, VoteSign::Clear);
    assert_eq!(cleared.target_event, post.id);
}

fn engine_default(relays: Vec<Arc<dyn RelayHandle>>) -> KarmaEngine {
    engine(relays, Keys::generate())
}

#[tokio::test]
async fn feed_buffers_live_events_until_reveal() {
    let keys = Keys::generate();
    let backfilled = text_note(&keys, "already on screen", 100);
    let live_a = text_note(&keys, "new a", 300);
    let live_b = text_note(&keys, "new b", 200);

    let relay: Arc<dyn RelayHandle> = Arc::new(MockRelay::new("wss://feed.test"));
    let engine = engine_default(vec![relay]);
    let feed = engine.feed();

    feed.mark_seen(backfilled.id);

    feed.offer(live_a.clone());
    feed.offer(live_b.clone());
    feed.offer(live_a.clone()); // relay echo
    feed.offer(backfilled); // already rendered

    assert_eq!(feed.pending_count(), 2);

    let revealed = feed.flush();
    let ids: Vec<EventId> = revealed.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![live_a.id, live_b.id]);
    assert_eq!(feed.pending_count(), 0);
}
