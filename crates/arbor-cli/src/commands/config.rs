//! Config command handlers

use std::path::Path;

use anyhow::{Context, Result};

use arbor_core::Config;

use crate::output::{Output, OutputFormat};

/// Path the CLI reads and writes: `--config` or the default location
pub fn effective_path(config_path: Option<&Path>) -> std::path::PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_file_path)
}

/// Show current configuration
pub fn show(config_path: Option<&Path>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            output.json(&serde_json::json!({
                "data_dir": config.data_dir,
                "sync_url": config.sync_url,
                "sync_enabled": config.sync_enabled,
                "user_id": config.user_id,
                "auth_token": config.auth_token.as_ref().map(|_| "(set)"),
                "sync_interval_secs": config.sync_interval_secs,
                "request_timeout_secs": config.request_timeout_secs,
                "heartbeat_timeout_secs": config.heartbeat_timeout_secs,
                "log_file": config.log_file,
            }));
        }
        OutputFormat::Quiet => {
            println!("{}", config.data_dir.display());
        }
        OutputFormat::Human => {
            let unset = || "(not set)".to_string();
            println!("Configuration:");
            println!("  data_dir:               {}", config.data_dir.display());
            println!(
                "  sync_url:               {}",
                config.sync_url.clone().unwrap_or_else(unset)
            );
            println!("  sync_enabled:           {}", config.sync_enabled);
            println!(
                "  user_id:                {}",
                config.user_id.clone().unwrap_or_else(unset)
            );
            println!(
                "  auth_token:             {}",
                if config.auth_token.is_some() { "(set)".to_string() } else { unset() }
            );
            println!("  sync_interval_secs:     {}", config.sync_interval_secs);
            println!("  request_timeout_secs:   {}", config.request_timeout_secs);
            println!("  heartbeat_timeout_secs: {}", config.heartbeat_timeout_secs);
            println!(
                "  log_file:               {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(unset)
            );
            println!();
            println!("Config file: {}", effective_path(config_path).display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, config_path: Option<&Path>, output: &Output) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    config.set_value(&key, &value).with_context(|| {
        "Valid keys: data_dir, sync_url, sync_enabled, auth_token, user_id, \
         sync_interval_secs, request_timeout_secs, heartbeat_timeout_secs, log_file"
    })?;

    config
        .save_to_path(&effective_path(config_path))
        .context("Failed to save configuration")?;

    let shown = if key == "auth_token" { "(hidden)" } else { value.as_str() };
    output.success(&format!("Set {} = {}", key, shown));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_set_persists_to_the_given_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            format!("data_dir = {:?}\n", temp.path().join("data").display().to_string()),
        )
        .unwrap();
        let output = Output::new(OutputFormat::Quiet);

        set("sync_url".into(), "http://localhost:8080".into(), Some(&path), &output).unwrap();
        set("sync_interval_secs".into(), "90".into(), Some(&path), &output).unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.sync_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.sync_interval_secs, 90);
    }

    #[test]
    fn test_set_unknown_key_fails() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        let original = format!("data_dir = {:?}\n", temp.path().display().to_string());
        std::fs::write(&path, &original).unwrap();
        let output = Output::new(OutputFormat::Quiet);

        assert!(set("colour".into(), "blue".into(), Some(&path), &output).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
    }
}
