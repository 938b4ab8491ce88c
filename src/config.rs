//! Driftline configuration.
//!
//! A single TOML file at `~/.driftline/config.toml`. Every field has a
//! default so a missing file is a working (keyless) configuration; the
//! secret key can also come from the `DRIFTLINE_NSEC` environment
//! variable instead of the file.

use anyhow::{Context, Result};
use karma_core::EngineConfig;
use nostr_sdk::Keys;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config directory name under `$HOME`.
pub const APP_DIR_NAME: &str = ".driftline";

/// Environment override for the secret key.
pub const NSEC_ENV_VAR: &str = "DRIFTLINE_NSEC";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Nostr secret key (nsec1... or hex). Can also be set via DRIFTLINE_NSEC.
    #[serde(default)]
    pub nsec: Option<String>,
    /// Relay URLs (wss://). Defaults to popular public relays if omitted.
    #[serde(default = "default_relays")]
    pub relays: Vec<String>,
    /// Time budget per relay when collecting votes or looking events up.
    #[serde(default = "default_collect_timeout_secs")]
    pub collect_timeout_secs: u64,
    /// Per-relay result cap on vote queries.
    #[serde(default = "default_vote_limit")]
    pub vote_limit: usize,
    /// Proof-of-work difficulty in bits for outgoing events. 0 disables.
    #[serde(default)]
    pub pow_difficulty: u8,
    /// Iteration budget for the proof-of-work nonce search.
    #[serde(default = "default_pow_max_iterations")]
    pub pow_max_iterations: u64,
    /// How many recent notes to render when the feed view starts.
    #[serde(default = "default_feed_backfill")]
    pub feed_backfill: usize,

    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nsec: None,
            relays: default_relays(),
            collect_timeout_secs: default_collect_timeout_secs(),
            vote_limit: default_vote_limit(),
            pow_difficulty: 0,
            pow_max_iterations: default_pow_max_iterations(),
            feed_backfill: default_feed_backfill(),
            config_path: PathBuf::new(),
        }
    }
}

pub fn default_relays() -> Vec<String> {
    vec![
        "wss://relay.damus.io".to_string(),
        "wss://nos.lol".to_string(),
        "wss://relay.primal.net".to_string(),
    ]
}

fn default_collect_timeout_secs() -> u64 {
    4
}

fn default_vote_limit() -> usize {
    500
}

fn default_pow_max_iterations() -> u64 {
    100_000
}

fn default_feed_backfill() -> usize {
    20
}

impl Config {
    /// Default config file location: `~/.driftline/config.toml`.
    pub fn default_path() -> Result<PathBuf> {
        let base = directories::BaseDirs::new().context("Could not determine home directory")?;
        Ok(base.home_dir().join(APP_DIR_NAME).join("config.toml"))
    }

    /// Load from an explicit path, or from the default location. A
    /// missing file yields the defaults, remembering where to save.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(p) => p,
            None => Self::default_path()?,
        };
        Self::load_from(&path)
    }

    fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            let mut config = Config::default();
            config.config_path = path.to_path_buf();
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Write the config back to where it was loaded from.
    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.config_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config dir: {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, content)
            .with_context(|| format!("Failed to write config file: {}", self.config_path.display()))?;
        Ok(())
    }

    /// The configured nsec, file first, then environment.
    pub fn nsec(&self) -> Option<String> {
        self.nsec
            .clone()
            .or_else(|| std::env::var(NSEC_ENV_VAR).ok())
    }

    /// Parse the configured identity.
    pub fn load_keys(&self) -> Result<Keys> {
        let nsec = self.nsec().with_context(|| {
            format!("No Nostr identity configured. Run `driftline keygen`, or set {NSEC_ENV_VAR}")
        })?;
        Keys::parse(&nsec).map_err(|e| anyhow::anyhow!("Invalid nsec in config: {e}"))
    }

    /// Engine tuning derived from this config.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            per_relay_timeout: Duration::from_secs(self.collect_timeout_secs),
            vote_limit: self.vote_limit,
            pow_difficulty: self.pow_difficulty,
            pow_max_iterations: self.pow_max_iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load(Some(path.clone())).unwrap();
        assert_eq!(config.relays, default_relays());
        assert_eq!(config.collect_timeout_secs, 4);
        assert_eq!(config.pow_difficulty, 0);
        assert_eq!(config.config_path, path);
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::load(Some(path.clone())).unwrap();
        config.nsec = Some("nsec1notarealkey".to_string());
        config.relays = vec!["wss://example.test".to_string()];
        config.pow_difficulty = 8;
        config.save().unwrap();

        let reloaded = Config::load(Some(path)).unwrap();
        assert_eq!(reloaded.nsec, Some("nsec1notarealkey".to_string()));
        assert_eq!(reloaded.relays, vec!["wss://example.test".to_string()]);
        assert_eq!(reloaded.pow_difficulty, 8);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "relays = [\"wss://only.test\"]\n").unwrap();

        let config = Config::load(Some(path)).unwrap();
        assert_eq!(config.relays, vec!["wss://only.test".to_string()]);
        assert_eq!(config.vote_limit, 500);
        assert!(config.nsec.is_none());
    }

    #[test]
    fn engine_config_mirrors_fields() {
        let mut config = Config::default();
        config.collect_timeout_secs = 7;
        config.vote_limit = 42;
        config.pow_difficulty = 12;

        let engine = config.engine_config();
        assert_eq!(engine.per_relay_timeout, Duration::from_secs(7));
        assert_eq!(engine.vote_limit, 42);
        assert_eq!(engine.pow_difficulty, 12);
    }
}
