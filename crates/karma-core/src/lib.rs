//! Vote aggregation and feed buffering engine for Driftline.
//!
//! This crate holds the client's algorithmic core: collecting karma votes
//! from any number of unreliable relays under bounded time budgets,
//! resolving them per voter into a score, buffering live feed events
//! behind an explicit reveal, remembering the local identity's votes for
//! toggle semantics, and best-effort proof-of-work mining before
//! publication. Relay transport and event signing come from `nostr-sdk`
//! and are consumed, not reimplemented.

pub mod aggregator;
pub mod collector;
pub mod feed;
pub mod ledger;
pub mod miner;
pub mod relay;
pub mod vote;

// Re-export commonly used types
pub use aggregator::{CastVote, EngineConfig, KarmaEngine, PublishError};
pub use collector::collect;
pub use feed::FeedBuffer;
pub use ledger::VoteLedger;
pub use miner::{mine, Draft};
pub use relay::{NostrRelay, RelayHandle, Subscription};
pub use vote::{resolve_score, VoteSign, VoteTag, KARMA_VOTE_KIND};

// Re-export nostr-sdk for convenience
pub use nostr_sdk;
