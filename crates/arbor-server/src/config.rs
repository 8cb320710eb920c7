//! Server configuration
//!
//! Loaded from:
//! 1. Default values
//! 2. TOML file given with `--config`
//! 3. Environment variables (ARBOR_SERVER_* prefix)
//!
//! Command-line flags are applied last by `main`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "ARBOR_SERVER";

const DEFAULT_BIND: &str = "127.0.0.1:8080";
const DEFAULT_CACHE_TTL_SECS: u64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,

    /// SQLite database file
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// How long a cached workspace hash is trusted
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Bearer token → user id
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            database: default_database(),
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            tokens: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file: {:?}", path))?;
                Self::from_toml(&content)
                    .with_context(|| format!("Failed to parse config file: {:?}", path))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse server config TOML")
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_BIND", ENV_PREFIX)) {
            self.bind = val;
        }
        if let Ok(val) = std::env::var(format!("{}_DATABASE", ENV_PREFIX)) {
            self.database = PathBuf::from(val);
        }
        if let Ok(val) = std::env::var(format!("{}_CACHE_TTL", ENV_PREFIX)) {
            match val.parse::<u64>() {
                Ok(secs) => self.cache_ttl_secs = secs,
                _ => tracing::warn!("Ignoring invalid {}_CACHE_TTL: {:?}", ENV_PREFIX, val),
            }
        }
        // Format: token:user,token:user
        if let Ok(val) = std::env::var(format!("{}_TOKENS", ENV_PREFIX)) {
            self.tokens.extend(parse_tokens(&val));
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

fn parse_tokens(raw: &str) -> impl Iterator<Item = (String, String)> + '_ {
    raw.split(',').filter_map(|pair| {
        let (token, user) = pair.trim().split_once(':')?;
        let (token, user) = (token.trim(), user.trim());
        if token.is_empty() || user.is_empty() {
            tracing::warn!("Ignoring malformed token entry {:?}", pair);
            return None;
        }
        Some((token.to_string(), user.to_string()))
    })
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_database() -> PathBuf {
    PathBuf::from("arbor-server.db")
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}
