//! Client settings
//!
//! Built-in defaults, overlaid by `~/.config/arbor/config.toml` (or the file
//! named by `ARBOR_CONFIG` / `--config`), overlaid by `ARBOR_*` variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// `ARBOR_<suffix>` variables and the config key each one sets
const ENV_KEYS: &[(&str, &str)] = &[
    ("DATA_DIR", "data_dir"),
    ("SYNC_URL", "sync_url"),
    ("SYNC_ENABLED", "sync_enabled"),
    ("TOKEN", "auth_token"),
    ("USER_ID", "user_id"),
    ("SYNC_INTERVAL", "sync_interval_secs"),
];

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Holds `arbor.db` and `sync_state.json`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Base URL of the sync server
    #[serde(default)]
    pub sync_url: Option<String>,

    /// Master switch for push/pull and auto-sync after writes
    #[serde(default)]
    pub sync_enabled: bool,

    /// Bearer token presented to the sync server
    #[serde(default)]
    pub auth_token: Option<String>,

    /// User id that owns workspaces created on this device
    #[serde(default)]
    pub user_id: Option<String>,

    /// Seconds between scheduled sync runs
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Timeout for status/pull/push requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Timeout for the heartbeat probe
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,

    /// Write logs here instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            sync_url: None,
            sync_enabled: false,
            auth_token: None,
            user_id: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            heartbeat_timeout_secs: DEFAULT_HEARTBEAT_TIMEOUT_SECS,
            log_file: None,
        }
    }
}

impl Config {
    /// Load from the default file, then apply `ARBOR_*` overrides
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load from `path` (defaults when absent), apply overrides and make
    /// sure the data directory exists
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text)
                .with_context(|| format!("{} is not valid config TOML", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Could not read {}", path.display()))
            }
        };

        config.apply_env_overrides();
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Could not create {}", config.data_dir.display()))?;
        Ok(config)
    }

    /// `--config` wins over the default location
    pub fn load_with_cli_override(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(Self::load, Self::load_from_path)
    }

    /// Parse TOML text and apply overrides; touches no files
    pub fn load_from_str(text: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(text).context("Invalid config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Invalid values are logged and skipped; an empty value clears optional keys
    fn apply_env_overrides(&mut self) {
        for (suffix, key) in ENV_KEYS {
            let var = format!("ARBOR_{}", suffix);
            let Ok(value) = std::env::var(&var) else {
                continue;
            };
            if let Err(e) = self.set_value(key, &value) {
                tracing::warn!("Ignoring {}={:?}: {:#}", var, value, e);
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Write as pretty TOML, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Could not create {}", dir.display()))?;
        }
        let text = toml::to_string_pretty(self).context("Could not encode config as TOML")?;
        std::fs::write(path, text).with_context(|| format!("Could not write {}", path.display()))
    }

    /// Set a single key from its string form (`arbor config set`)
    pub fn set_value(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "data_dir" => self.data_dir = PathBuf::from(value),
            "sync_url" => self.sync_url = non_empty(value.to_string()),
            "sync_enabled" => self.sync_enabled = parse_flag(value)?,
            "auth_token" => self.auth_token = non_empty(value.to_string()),
            "user_id" => self.user_id = non_empty(value.to_string()),
            "sync_interval_secs" => self.sync_interval_secs = parse_secs(key, value)?,
            "request_timeout_secs" => self.request_timeout_secs = parse_secs(key, value)?,
            "heartbeat_timeout_secs" => self.heartbeat_timeout_secs = parse_secs(key, value)?,
            "log_file" => {
                self.log_file = non_empty(value.to_string()).map(PathBuf::from);
            }
            other => bail!("Unknown config key: {}", other),
        }
        Ok(())
    }

    /// `ARBOR_CONFIG`, else `<config dir>/arbor/config.toml`
    pub fn config_file_path() -> PathBuf {
        match std::env::var_os("ARBOR_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => app_dir(dirs::config_dir()).join("config.toml"),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("arbor.db")
    }

    pub fn sync_state_path(&self) -> PathBuf {
        self.data_dir.join("sync_state.json")
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    /// Whether there is enough configuration to talk to a server
    pub fn is_sync_configured(&self) -> bool {
        self.sync_enabled
            && self.sync_url.is_some()
            && self.auth_token.is_some()
            && self.user_id.is_some()
    }

    /// User id for locally created workspaces (falls back to "local")
    pub fn owner_id(&self) -> &str {
        self.user_id.as_deref().unwrap_or("local")
    }
}

fn non_empty(value: String) -> Option<String> {
    (!value.is_empty()).then_some(value)
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => bail!("expected true or false, got {:?}", value),
    }
}

fn parse_secs(key: &str, value: &str) -> Result<u64> {
    let secs: u64 = value
        .parse()
        .with_context(|| format!("{} must be a whole number of seconds", key))?;
    if secs == 0 {
        bail!("{} must be greater than zero", key);
    }
    Ok(secs)
}

fn default_sync_interval() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_heartbeat_timeout() -> u64 {
    DEFAULT_HEARTBEAT_TIMEOUT_SECS
}

fn default_data_dir() -> PathBuf {
    app_dir(dirs::data_local_dir())
}

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_default().join("arbor")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    /// Holds the env lock, clears `ARBOR_*` for the test, puts it back after
    struct ScopedEnv {
        previous: Vec<(&'static str, Option<std::ffi::OsString>)>,
        _lock: std::sync::MutexGuard<'static, ()>,
    }

    impl ScopedEnv {
        fn clean() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let previous = ENV_VARS
                .iter()
                .map(|&name| {
                    let old = env::var_os(name);
                    env::remove_var(name);
                    (name, old)
                })
                .collect();
            Self {
                previous,
                _lock: lock,
            }
        }
    }

    impl Drop for ScopedEnv {
        fn drop(&mut self) {
            for (name, old) in self.previous.drain(..) {
                if let Some(value) = old {
                    env::set_var(name, value);
                } else {
                    env::remove_var(name);
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "ARBOR_DATA_DIR",
        "ARBOR_SYNC_URL",
        "ARBOR_SYNC_ENABLED",
        "ARBOR_TOKEN",
        "ARBOR_USER_ID",
        "ARBOR_SYNC_INTERVAL",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.sync_enabled);
        assert!(config.sync_url.is_none());
        assert!(config.data_dir.ends_with("arbor"));
        assert_eq!(config.sync_interval(), Duration::from_secs(30));
        assert_eq!(config.heartbeat_timeout(), Duration::from_secs(5));
        assert!(!config.is_sync_configured());
    }

    #[test]
    fn test_file_paths() {
        let config = Config::default();
        assert!(config.database_path().ends_with("arbor.db"));
        assert!(config.sync_state_path().ends_with("sync_state.json"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _env = ScopedEnv::clean();

        let mut config = Config::default();

        env::set_var("ARBOR_DATA_DIR", "/tmp/arbor-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/arbor-test"));
    }

    #[test]
    fn test_env_override_sync_enabled() {
        let _env = ScopedEnv::clean();

        let mut config = Config::default();
        assert!(!config.sync_enabled);

        env::set_var("ARBOR_SYNC_ENABLED", "true");
        config.apply_env_overrides();
        assert!(config.sync_enabled);

        env::set_var("ARBOR_SYNC_ENABLED", "1");
        config.sync_enabled = false;
        config.apply_env_overrides();
        assert!(config.sync_enabled);

        env::set_var("ARBOR_SYNC_ENABLED", "false");
        config.apply_env_overrides();
        assert!(!config.sync_enabled);
    }

    #[test]
    fn test_env_override_credentials() {
        let _env = ScopedEnv::clean();

        let mut config = Config::default();
        env::set_var("ARBOR_SYNC_URL", "http://localhost:8080");
        env::set_var("ARBOR_TOKEN", "secret");
        env::set_var("ARBOR_USER_ID", "alice");
        env::set_var("ARBOR_SYNC_ENABLED", "true");
        config.apply_env_overrides();

        assert_eq!(config.sync_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.owner_id(), "alice");
        assert!(config.is_sync_configured());

        // Empty string clears it
        env::set_var("ARBOR_TOKEN", "");
        config.apply_env_overrides();
        assert!(config.auth_token.is_none());
        assert!(!config.is_sync_configured());
    }

    #[test]
    fn test_env_override_sync_interval() {
        let _env = ScopedEnv::clean();

        let mut config = Config::default();
        env::set_var("ARBOR_SYNC_INTERVAL", "120");
        config.apply_env_overrides();
        assert_eq!(config.sync_interval_secs, 120);

        env::set_var("ARBOR_SYNC_INTERVAL", "soon");
        config.apply_env_overrides();
        assert_eq!(config.sync_interval_secs, 120);
    }

    #[test]
    fn test_serialization() {
        let _env = ScopedEnv::clean();

        let config = Config {
            data_dir: PathBuf::from("/data/arbor"),
            sync_url: Some("http://sync.example.com".to_string()),
            sync_enabled: true,
            user_id: Some("bob".to_string()),
            ..Config::default()
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("data_dir"));
        assert!(toml_str.contains("sync_url"));
        assert!(toml_str.contains("sync_enabled"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_load_from_str() {
        let _env = ScopedEnv::clean();

        let toml = r#"
            data_dir = "/custom/data"
            sync_url = "http://example.com"
            sync_enabled = true
            sync_interval_secs = 10
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.sync_url, Some("http://example.com".to_string()));
        assert!(config.sync_enabled);
        assert_eq!(config.sync_interval_secs, 10);
        assert_eq!(config.request_timeout_secs, 30);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _env = ScopedEnv::clean();
        let temp_dir = tempfile::TempDir::new().unwrap();
        env::set_var("ARBOR_DATA_DIR", temp_dir.path().join("data"));

        let config = Config::load_from_path(&temp_dir.path().join("missing.toml")).unwrap();
        assert!(!config.sync_enabled);
        assert!(config.sync_url.is_none());
        assert!(config.data_dir.exists());
    }

    #[test]
    fn test_save_and_reload() {
        let _env = ScopedEnv::clean();
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");

        let mut config = Config {
            data_dir: temp_dir.path().join("data"),
            ..Config::default()
        };
        config.set_value("sync_url", "http://localhost:8080").unwrap();
        config.set_value("sync_enabled", "true").unwrap();
        config.set_value("sync_interval_secs", "45").unwrap();
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_set_value_rejects_bad_input() {
        let mut config = Config::default();
        assert!(config.set_value("colour", "blue").is_err());
        assert!(config.set_value("sync_interval_secs", "0").is_err());
        assert!(config.set_value("sync_enabled", "maybe").is_err());
    }
}
