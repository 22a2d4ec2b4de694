//! Configuration for the bridge.
//!
//! Values are layered: defaults, then an optional TOML file, then
//! environment variables, then command-line flags (applied by `main`).
//!
//! - `BRIDGE_SERVER_ADDR` (default: "127.0.0.1:9100")
//! - `BRIDGE_BOT_ID`
//! - `BRIDGE_USERNAME`
//! - `BRIDGE_API_KEY`
//! - `BRIDGE_ENGINE`      (whitespace-separated command line)
//! - `BRIDGE_PERSIST`, `BRIDGE_CORRQUEUE`
//! - `BRIDGE_GREETING`, `BRIDGE_FAREWELL`
//! - `BRIDGE_NOPAUSE`, `BRIDGE_NOPAUSE_RANKED`, `BRIDGE_NOPAUSE_UNRANKED`
//! - `BRIDGE_DEBUG`

use std::env;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use bridge_core::{MatchSnapshot, PlayerId};
use bridge_protocol::Auth;
use serde::Deserialize;

/// Bridge configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `host:port` of the game server's JSON-lines endpoint.
    pub server_addr: String,

    /// Player id the bridge plays as.
    pub bot_id: PlayerId,

    /// Username used for chat messages.
    pub username: String,

    pub api_key: Option<String>,

    /// Engine program followed by its arguments.
    pub engine_command: Vec<String>,

    /// Keep the engine running between moves.
    pub persist: bool,

    /// Run at most one correspondence computation at a time.
    pub corrqueue: bool,

    pub greeting: Option<String>,
    pub farewell: Option<String>,

    /// Lift player pauses in every match.
    pub nopause: bool,
    /// Lift player pauses in ranked matches.
    pub nopause_ranked: bool,
    /// Lift player pauses in unranked matches.
    pub nopause_unranked: bool,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_addr: "127.0.0.1:9100".to_string(),
            bot_id: 0,
            username: "gtp-bridge".to_string(),
            api_key: None,
            engine_command: Vec::new(),
            persist: false,
            corrqueue: false,
            greeting: None,
            farewell: None,
            nopause: false,
            nopause_ranked: false,
            nopause_unranked: false,
            debug: false,
        }
    }
}

impl Config {
    /// Read the TOML file (if any) and apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                Self::from_toml(&text)
                    .with_context(|| format!("parsing config file {}", path.display()))?
            }
            None => Config::default(),
        };
        base.with_env()
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `BRIDGE_*` environment overrides.
    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(addr) = env::var("BRIDGE_SERVER_ADDR") {
            self.server_addr = addr;
        }
        self.bot_id = read_env_or_default("BRIDGE_BOT_ID", self.bot_id)?;
        if let Ok(username) = env::var("BRIDGE_USERNAME") {
            self.username = username;
        }
        if let Ok(key) = env::var("BRIDGE_API_KEY") {
            self.api_key = Some(key);
        }
        if let Ok(command) = env::var("BRIDGE_ENGINE") {
            self.engine_command = split_command(&command);
        }
        self.persist = read_env_or_default("BRIDGE_PERSIST", self.persist)?;
        self.corrqueue = read_env_or_default("BRIDGE_CORRQUEUE", self.corrqueue)?;
        if let Ok(greeting) = env::var("BRIDGE_GREETING") {
            self.greeting = Some(greeting);
        }
        if let Ok(farewell) = env::var("BRIDGE_FAREWELL") {
            self.farewell = Some(farewell);
        }
        self.nopause = read_env_or_default("BRIDGE_NOPAUSE", self.nopause)?;
        self.nopause_ranked = read_env_or_default("BRIDGE_NOPAUSE_RANKED", self.nopause_ranked)?;
        self.nopause_unranked =
            read_env_or_default("BRIDGE_NOPAUSE_UNRANKED", self.nopause_unranked)?;
        self.debug = read_env_or_default("BRIDGE_DEBUG", self.debug)?;
        Ok(self)
    }

    /// Credentials merged into every outbound command.
    pub fn auth(&self) -> Auth {
        Auth {
            player_id: self.bot_id,
            apikey: self.api_key.clone(),
        }
    }

    /// True if the configured pause governance wants player pauses in
    /// this match lifted. Plain `nopause` only applies when neither of
    /// the ranked-specific flags is set.
    pub fn forbids_pause(&self, snapshot: &MatchSnapshot) -> bool {
        (self.nopause && !self.nopause_ranked && !self.nopause_unranked)
            || (self.nopause_ranked && snapshot.ranked)
            || (self.nopause_unranked && !snapshot.ranked)
    }
}

/// Split a command line on whitespace.
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

fn read_env_or_default<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .with_context(|| format!("invalid value {:?} for {}", val, key)),
        Err(_) => Ok(default),
    }
}
