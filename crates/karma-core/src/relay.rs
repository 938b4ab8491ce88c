//! Relay handle seam.
//!
//! The engine talks to relays through [`RelayHandle`], one handle per relay
//! URL, so a hung or dead relay can only ever cost its own time budget.
//! [`NostrRelay`] is the production implementation on top of a dedicated
//! `nostr_sdk::Client`; tests substitute in-memory handles.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use nostr_sdk::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Buffered events per live subscription.
const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 256;

/// An open subscription: a stream of events plus an explicit teardown.
///
/// Dropping without [`close`](Subscription::close) leaks the upstream
/// subscription until the handle disconnects; callers that care about the
/// relay-side state close explicitly. Teardown failures are swallowed by
/// contract — cancellation must always succeed from the caller's view.
pub struct Subscription {
    receiver: mpsc::Receiver<Event>,
    teardown: Option<BoxFuture<'static, ()>>,
}

impl Subscription {
    pub fn new(receiver: mpsc::Receiver<Event>, teardown: BoxFuture<'static, ()>) -> Self {
        Self {
            receiver,
            teardown: Some(teardown),
        }
    }

    /// Next event, or `None` once the upstream side is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Tear the subscription down. Runs at most once; never fails.
    pub async fn close(mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown.await;
        }
    }
}

/// One relay, as seen by the engine.
#[async_trait]
pub trait RelayHandle: Send + Sync {
    /// Relay URL, for logging and diagnostics.
    fn url(&self) -> &str;

    /// Whether the handle believes it has a live connection.
    fn is_connected(&self) -> bool;

    /// Open a subscription for the given filters.
    async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription>;

    /// Attempt to deliver an event to this relay. No delivery guarantee
    /// beyond "the relay accepted the send".
    async fn publish(&self, event: Event) -> Result<()>;
}

/// Production relay handle: a dedicated `nostr_sdk::Client` per relay URL.
pub struct NostrRelay {
    url: String,
    client: Client,
    connected: AtomicBool,
}

impl NostrRelay {
    /// Create a handle and connect it to its single relay.
    pub async fn connect(url: &str, keys: Keys) -> Result<Self> {
        let client = Client::new(keys);
        client
            .add_relay(url)
            .await
            .with_context(|| format!("Failed to add relay: {url}"))?;
        client.connect().await;
        info!("Relay handle connected: {url}");

        Ok(Self {
            url: url.to_string(),
            client,
            connected: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl RelayHandle for NostrRelay {
    fn url(&self) -> &str {
        &self.url
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn subscribe(&self, filters: Vec<Filter>) -> Result<Subscription> {
        let mut ids = Vec::with_capacity(filters.len());
        for filter in filters {
            let output = self
                .client
                .subscribe(filter, None)
                .await
                .with_context(|| format!("Failed to subscribe on {}", self.url))?;
            ids.push(output.val);
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CHANNEL_CAPACITY);
        let mut notifications = self.client.notifications();
        let task_ids = ids.clone();
        let forwarder = tokio::spawn(async move {
            while let Ok(notification) = notifications.recv().await {
                if let RelayPoolNotification::Event {
                    subscription_id,
                    event,
                    ..
                } = notification
                {
                    if !task_ids.contains(&subscription_id) {
                        continue;
                    }
                    if tx.send(*event).await.is_err() {
                        break;
                    }
                }
            }
        });

        let client = self.client.clone();
        let url = self.url.clone();
        let teardown = async move {
            for id in &ids {
                client.unsubscribe(id).await;
            }
            forwarder.abort();
            debug!("Closed subscription on {url}");
        }
        .boxed();

        Ok(Subscription::new(rx, teardown))
    }

    async fn publish(&self, event: Event) -> Result<()> {
        self.client
            .send_event(&event)
            .await
            .with_context(|| format!("Relay {} did not accept event", self.url))?;
        Ok(())
    }
}
