//! Karma vote decoding and per-voter resolution.

use nostr_sdk::prelude::*;

/// Event kind carrying a karma vote (`p` = target author, `e` = target
/// event, `v` = vote value).
pub const KARMA_VOTE_KIND: u16 = 2121;

/// A single vote value: up, down, or cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteSign {
    Up,
    Down,
    Clear,
}

impl VoteSign {
    /// Parse a `v` tag value. Only the integers +1, -1 and 0 are votes;
    /// anything else yields `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().parse::<i64>().ok()? {
            1 => Some(Self::Up),
            -1 => Some(Self::Down),
            0 => Some(Self::Clear),
            _ => None,
        }
    }

    /// Integer contribution to a score sum.
    pub fn value(self) -> i64 {
        match self {
            Self::Up => 1,
            Self::Down => -1,
            Self::Clear => 0,
        }
    }

    /// Tag representation, the inverse of [`VoteSign::parse`].
    pub fn tag_value(self) -> &'static str {
        match self {
            Self::Up => "1",
            Self::Down => "-1",
            Self::Clear => "0",
        }
    }
}

/// A well-formed karma vote extracted from a raw event.
#[derive(Debug, Clone)]
pub struct VoteTag {
    pub event_id: EventId,
    pub voter: PublicKey,
    pub target_author: PublicKey,
    pub target_event: EventId,
    pub created_at: Timestamp,
    pub sign: VoteSign,
}

impl VoteTag {
    /// Try to decode an event as a karma vote. Returns `None` for anything
    /// that is not a well-formed vote: wrong kind, missing `p`/`e`/`v`
    /// tags, unparseable keys/ids, or an out-of-domain sign value.
    pub fn decode(event: &Event) -> Option<Self> {
        if event.kind.as_u16() != KARMA_VOTE_KIND {
            return None;
        }

        let target_author = PublicKey::parse(first_tag_value(event, "p")?).ok()?;
        let target_event = EventId::from_hex(first_tag_value(event, "e")?).ok()?;
        let sign = VoteSign::parse(first_tag_value(event, "v")?)?;

        Some(Self {
            event_id: event.id,
            voter: event.pubkey,
            target_author,
            target_event,
            created_at: event.created_at,
            sign,
        })
    }
}

fn first_tag_value<'a>(event: &'a Event, name: &str) -> Option<&'a str> {
    event.tags.iter().find_map(|tag| {
        let slice = tag.as_slice();
        if slice.first().map(|s| s.as_str()) == Some(name) {
            slice.get(1).map(|s| s.as_str())
        } else {
            None
        }
    })
}

/// Resolve a merged set of vote events for `target` into a score.
///
/// Per distinct voter only the vote with the greatest `created_at` counts.
/// Relay clocks are untrusted, so equal timestamps are possible: the tie
/// goes to the lexically greater event id, which is deterministic across
/// runs and input orderings. A retained `Clear` contributes 0 while still
/// occupying the voter's slot, so an earlier non-zero vote from the same
/// voter stays suppressed.
///
/// The fold is idempotent: duplicates of an already-included event never
/// change the result, and neither does input order.
pub fn resolve_score<'a, I>(events: I, target: &EventId) -> i64
where
    I: IntoIterator<Item = &'a Event>,
{
    let mut retained: std::collections::HashMap<PublicKey, VoteTag> =
        std::collections::HashMap::new();

    for event in events {
        let vote = match VoteTag::decode(event) {
            Some(v) if v.target_event == *target => v,
            _ => continue,
        };

        match retained.get(&vote.voter) {
            Some(kept)
                if (kept.created_at, kept.event_id) >= (vote.created_at, vote.event_id) => {}
            _ => {
                retained.insert(vote.voter, vote);
            }
        }
    }

    retained.values().map(|vote| vote.sign.value()).sum()
}
