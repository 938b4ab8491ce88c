use anyhow::{bail, Context, Result};
use clap::{Subcommand, ValueEnum};
use futures_util::future::join_all;
use karma_core::{collect, KarmaEngine, NostrRelay, RelayHandle, VoteSign};
use nostr_sdk::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::{Config, NSEC_ENV_VAR};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate a new Nostr keypair
    Keygen,
    /// Show current Nostr identity from config
    Whoami,
    /// Import an existing nsec into config
    Import {
        /// Nostr secret key (nsec1... bech32 format or hex)
        nsec: String,
    },
    /// List configured relays
    Relays,
    /// Publish a text note
    Post {
        /// Note content
        content: String,
        /// Proof-of-work difficulty in bits (overrides config)
        #[clap(long)]
        pow: Option<u8>,
    },
    /// Vote on an event; repeating your current vote clears it
    Vote {
        /// Target event id (hex or note1...)
        event_id: String,
        /// Vote direction
        #[clap(value_enum)]
        direction: VoteDirection,
    },
    /// Show the aggregated karma score for an event
    Score {
        /// Target event id (hex or note1...)
        event_id: String,
    },
    /// Watch the live feed; new posts stay hidden until you press Enter
    Feed {
        /// Stop after this many seconds (0 = run until Ctrl+C / EOF)
        #[clap(long, default_value_t = 0)]
        seconds: u64,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum VoteDirection {
    Up,
    Down,
}

impl From<VoteDirection> for VoteSign {
    fn from(direction: VoteDirection) -> Self {
        match direction {
            VoteDirection::Up => VoteSign::Up,
            VoteDirection::Down => VoteSign::Down,
        }
    }
}

pub async fn handle_command(cmd: Commands, config: &Config) -> Result<()> {
    match cmd {
        Commands::Keygen => cmd_keygen(config),
        Commands::Whoami => cmd_whoami(config),
        Commands::Import { nsec } => cmd_import(nsec, config),
        Commands::Relays => cmd_relays(config),
        Commands::Post { content, pow } => cmd_post(content, pow, config).await,
        Commands::Vote { event_id, direction } => cmd_vote(event_id, direction, config).await,
        Commands::Score { event_id } => cmd_score(event_id, config).await,
        Commands::Feed { seconds } => cmd_feed(seconds, config).await,
    }
}

fn cmd_keygen(config: &Config) -> Result<()> {
    let keys = Keys::generate();
    let nsec = keys.secret_key().to_bech32()?;
    let npub = keys.public_key().to_bech32()?;
    let hex_pubkey = keys.public_key().to_hex();

    println!("🔑 New Nostr keypair generated:\n");
    println!("  npub: {npub}");
    println!("  nsec: {nsec}");
    println!("  hex:  {hex_pubkey}");
    println!();

    print!("Save to config? [Y/n] ");
    use std::io::Write;
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    let input = input.trim().to_lowercase();

    if input.is_empty() || input == "y" || input == "yes" {
        save_nsec_to_config(config, &nsec)?;
        println!("✅ Saved to config.");
    } else {
        println!("Not saved. You can import later with: driftline import {nsec}");
    }

    Ok(())
}

fn cmd_whoami(config: &Config) -> Result<()> {
    match config.nsec() {
        Some(nsec) => {
            let keys =
                Keys::parse(&nsec).map_err(|e| anyhow::anyhow!("Invalid nsec in config: {e}"))?;
            let npub = keys.public_key().to_bech32()?;
            let hex_pubkey = keys.public_key().to_hex();

            println!("🔑 Nostr identity:\n");
            println!("  npub: {npub}");
            println!("  hex:  {hex_pubkey}");
        }
        None => {
            println!("No Nostr identity configured.");
            println!("Run `driftline keygen` or `driftline import <nsec>`, or set {NSEC_ENV_VAR}.");
        }
    }

    Ok(())
}

fn cmd_import(nsec: String, config: &Config) -> Result<()> {
    let keys = Keys::parse(&nsec).map_err(|e| anyhow::anyhow!("Invalid nsec: {e}"))?;

    let npub = keys.public_key().to_bech32()?;
    let nsec_bech32 = keys.secret_key().to_bech32()?;

    save_nsec_to_config(config, &nsec_bech32)?;

    println!("✅ Imported Nostr identity:\n");
    println!("  npub: {npub}");
    println!("  hex:  {}", keys.public_key().to_hex());

    Ok(())
}

fn cmd_relays(config: &Config) -> Result<()> {
    if config.relays.is_empty() {
        println!("No relays configured.");
        println!("Add relays to `relays` in config.toml");
        return Ok(());
    }

    println!("📡 Configured relays:\n");
    for relay in &config.relays {
        println!("  {relay}");
    }

    Ok(())
}

fn save_nsec_to_config(config: &Config, nsec: &str) -> Result<()> {
    let mut config = config.clone();
    config.nsec = Some(nsec.to_string());
    config.save()?;
    Ok(())
}

/// Connect a relay handle per configured URL. Unreachable relays are
/// skipped with a warning; only an empty result is fatal.
async fn build_engine(config: &Config) -> Result<KarmaEngine> {
    if config.relays.is_empty() {
        bail!("No relays configured. Add relays to `relays` in config.toml");
    }
    let keys = config.load_keys()?;

    let mut relays: Vec<Arc<dyn RelayHandle>> = Vec::new();
    for url in &config.relays {
        match NostrRelay::connect(url, keys.clone()).await {
            Ok(handle) => relays.push(Arc::new(handle)),
            Err(e) => warn!("Skipping relay {url}: {e:#}"),
        }
    }
    if relays.is_empty() {
        bail!("None of the configured relays could be set up");
    }

    Ok(KarmaEngine::new(keys, relays, config.engine_config()))
}

async fn cmd_post(content: String, pow: Option<u8>, config: &Config) -> Result<()> {
    let mut config = config.clone();
    if let Some(bits) = pow {
        config.pow_difficulty = bits;
    }

    let engine = build_engine(&config).await?;
    let (event, accepted) = engine.publish_note(&content).await?;

    println!("✅ Note published to {accepted}/{} relay(s)", engine.relays().len());
    println!("   id: {}", event.id);
    if config.pow_difficulty > 0 {
        println!("   pow: {} bit(s) requested", config.pow_difficulty);
    }
    Ok(())
}

async fn cmd_vote(event_id: String, direction: VoteDirection, config: &Config) -> Result<()> {
    let target = EventId::parse(&event_id)
        .map_err(|e| anyhow::anyhow!("Invalid event id {event_id}: {e}"))?;

    let engine = build_engine(config).await?;

    // The vote event needs a p tag, so the target must be found first.
    let post = engine
        .fetch_event(&target)
        .await
        .with_context(|| format!("Event {target} not found on any configured relay"))?;

    let outcome = engine.cast_vote(target, post.pubkey, direction.into()).await?;
    match outcome.sign {
        VoteSign::Clear => println!("✅ Vote cleared on {target}"),
        sign => println!("✅ Voted {} on {target}", sign.tag_value()),
    }
    println!(
        "   accepted by {}/{} relay(s)",
        outcome.accepted,
        engine.relays().len()
    );
    Ok(())
}

async fn cmd_score(event_id: String, config: &Config) -> Result<()> {
    let target = EventId::parse(&event_id)
        .map_err(|e| anyhow::anyhow!("Invalid event id {event_id}: {e}"))?;

    let engine = build_engine(config).await?;
    let score = engine.score_for(&target).await;

    println!("⚖️  Karma for {target}: {score:+}");
    Ok(())
}

fn print_note(event: &Event) {
    let npub = event
        .pubkey
        .to_bech32()
        .unwrap_or_else(|_| event.pubkey.to_hex());
    let short = &npub[..16.min(npub.len())];
    println!("[{}] {short}…: {}", event.created_at, event.content);
}

async fn cmd_feed(seconds: u64, config: &Config) -> Result<()> {
    let engine = build_engine(config).await?;
    let feed = engine.feed();

    // Backfill: recent stored notes go straight to the screen and are
    // marked seen so relay echoes don't re-buffer them.
    let backfill_filter = Filter::new()
        .kind(Kind::TextNote)
        .limit(config.feed_backfill);
    let collections = join_all(engine.relays().iter().map(|relay| {
        collect(
            relay.clone(),
            vec![backfill_filter.clone()],
            Duration::from_secs(config.collect_timeout_secs),
        )
    }))
    .await;

    let mut backfill: HashMap<EventId, Event> = HashMap::new();
    for collection in collections {
        backfill.extend(collection);
    }
    let mut backfill: Vec<Event> = backfill.into_values().collect();
    backfill.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
    backfill.truncate(config.feed_backfill);

    for event in backfill.iter().rev() {
        print_note(event);
    }
    for event in backfill {
        feed.mark_seen(event.id);
    }

    // Live subscriptions: one per relay, all feeding one channel.
    let live_filter = Filter::new().kind(Kind::TextNote).since(Timestamp::now());
    let (tx, mut rx) = mpsc::channel::<Event>(64);
    let mut forwarders = Vec::new();
    for relay in engine.relays() {
        let relay = relay.clone();
        let filter = live_filter.clone();
        let tx = tx.clone();
        forwarders.push(tokio::spawn(async move {
            let mut subscription = match relay.subscribe(vec![filter]).await {
                Ok(sub) => sub,
                Err(e) => {
                    debug!("Live subscription on {} failed: {e:#}", relay.url());
                    return;
                }
            };
            while let Some(event) = subscription.recv().await {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            subscription.close().await;
        }));
    }
    drop(tx);

    println!();
    println!("Watching the feed — press Enter to reveal new posts, Ctrl+D to quit.");

    let limit = if seconds == 0 {
        Duration::MAX
    } else {
        Duration::from_secs(seconds)
    };
    let deadline = tokio::time::sleep(limit);
    tokio::pin!(deadline);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        let before = feed.pending_count();
                        feed.offer(event);
                        let now = feed.pending_count();
                        if now != before {
                            println!("📬 {now} new post(s) — press Enter to show");
                        }
                    }
                    None => break,
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(_) => {
                        let revealed = feed.flush();
                        if revealed.is_empty() {
                            println!("(no new posts)");
                        }
                        for event in revealed.iter().rev() {
                            print_note(event);
                        }
                    }
                    None => break,
                }
            }
            _ = &mut deadline => break,
        }
    }

    for forwarder in forwarders {
        forwarder.abort();
    }
    Ok(())
}
