//! Time-budgeted event collection from a single relay.

use nostr_sdk::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::relay::RelayHandle;

/// Collect every distinct event the relay supplies within `budget`.
///
/// The subscription is closed unconditionally once the budget elapses;
/// events arriving later are not counted. Partial relay failure is a
/// normal case: a subscription error or a silent relay yields an empty
/// map, never an error, so one bad relay can only cost its own budget.
pub async fn collect(
    relay: Arc<dyn RelayHandle>,
    filters: Vec<Filter>,
    budget: Duration,
) -> HashMap<EventId, Event> {
    let mut found = HashMap::new();
    let deadline = Instant::now() + budget;

    // The subscribe call itself counts against the budget; a relay that
    // hangs during setup is no better than one that never answers.
    let mut subscription = match tokio::time::timeout_at(deadline, relay.subscribe(filters)).await {
        Ok(Ok(sub)) => sub,
        Ok(Err(e)) => {
            debug!("Subscription on {} failed, contributing nothing: {e:#}", relay.url());
            return found;
        }
        Err(_) => {
            debug!("Subscription on {} timed out, contributing nothing", relay.url());
            return found;
        }
    };

    loop {
        match tokio::time::timeout_at(deadline, subscription.recv()).await {
            Ok(Some(event)) => {
                found.entry(event.id).or_insert(event);
            }
            // Stream ended before the budget did; keep what we have.
            Ok(None) => break,
            // Budget elapsed.
            Err(_) => break,
        }
    }

    subscription.close().await;
    debug!("Collected {} event(s) from {}", found.len(), relay.url());
    found
}
