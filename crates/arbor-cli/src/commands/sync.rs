//! Sync command handlers

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::Mutex;

use arbor_core::sync::{
    HttpTransport, RunOutcome, Scheduler, SchedulerEvent, SkipReason, SyncDriver, SyncState,
    TokenAuth,
};
use arbor_core::{Config, Store};

use crate::output::Output;

type CliScheduler = Scheduler<HttpTransport, TokenAuth>;

/// Build a scheduler around a driver configured from `config`
fn scheduler(
    config: &Config,
    store: Arc<Mutex<Store>>,
) -> Result<(CliScheduler, tokio::sync::mpsc::UnboundedReceiver<SchedulerEvent>)> {
    if !config.sync_enabled {
        bail!(
            "Sync is not enabled. Enable it with:\n  \
             arbor login <url> --user <id> --token <token>"
        );
    }
    if !config.is_sync_configured() {
        bail!(
            "Sync is enabled but not fully configured (needs sync_url, user_id and auth_token).\n  \
             arbor login <url> --user <id> --token <token>"
        );
    }

    let transport = HttpTransport::from_config(config).context("Failed to set up transport")?;
    let state = SyncState::with_path(config.sync_state_path());
    let driver = SyncDriver::new(store, transport, TokenAuth::from_config(config)).with_state(state);
    Ok(Scheduler::new(driver))
}

fn skip_message(reason: SkipReason, config: &Config) -> String {
    match reason {
        SkipReason::AlreadyRunning => "a sync run is already in progress".to_string(),
        SkipReason::Unauthenticated => "not logged in (run `arbor login`)".to_string(),
        SkipReason::Offline => format!(
            "sync server {} is unreachable",
            config.sync_url.as_deref().unwrap_or("(not set)")
        ),
    }
}

/// Run one push/status/pull cycle now
pub async fn sync(config: &Config, store: Arc<Mutex<Store>>, output: &Output) -> Result<()> {
    let (scheduler, _events) = scheduler(config, store)?;

    output.message(&format!(
        "Syncing with {}...",
        config.sync_url.as_deref().unwrap_or_default()
    ));

    match scheduler.run_once().await {
        RunOutcome::Skipped(reason) => bail!("Sync skipped: {}", skip_message(reason, config)),
        RunOutcome::Completed(report) => {
            output.print_report(&report);
            if report.unauthorized() {
                bail!("The server rejected the token. Run `arbor login` again.");
            }
            if !report.success {
                bail!("Sync finished with {} error(s)", report.errors.len());
            }
        }
    }
    Ok(())
}

/// Sync after a local write; silent on success
pub async fn sync_quiet(config: &Config, store: Arc<Mutex<Store>>) -> Result<()> {
    let (scheduler, _events) = scheduler(config, store)?;
    match scheduler.run_once().await {
        RunOutcome::Skipped(reason) => bail!("{}", skip_message(reason, config)),
        RunOutcome::Completed(report) if !report.success => bail!("{}", report.summary()),
        RunOutcome::Completed(_) => Ok(()),
    }
}

/// Run the scheduler in the foreground until Ctrl-C
pub async fn watch(
    config: &Config,
    store: Arc<Mutex<Store>>,
    interval_secs: Option<u64>,
    output: &Output,
) -> Result<()> {
    let interval = interval_secs
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or_else(|| config.sync_interval());
    let (mut scheduler, mut events) = scheduler(config, store)?;

    scheduler.start(interval);
    output.message(&format!(
        "Watching {} every {}s. Press Ctrl-C to stop.",
        config.sync_url.as_deref().unwrap_or_default(),
        interval.as_secs()
    ));

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => {
                    if print_event(&event, config, output) {
                        break;
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                scheduler.stop().await;
                // Drain what the final run and the stop produced
                while let Ok(event) = events.try_recv() {
                    print_event(&event, config, output);
                }
                break;
            }
        }
    }
    Ok(())
}

/// Print one scheduler event; returns true once the scheduler has stopped
fn print_event(event: &SchedulerEvent, config: &Config, output: &Output) -> bool {
    let now = chrono::Local::now().format("%H:%M:%S");
    match event {
        SchedulerEvent::Started => {
            tracing::debug!("Scheduled sync started");
            false
        }
        SchedulerEvent::Completed(report) => {
            if output.is_json() {
                output.print_report(report);
            } else {
                output.message(&format!(
                    "[{}] {} {}",
                    now,
                    if report.success { "✓" } else { "✗" },
                    report.summary()
                ));
                for error in &report.errors {
                    output.message(&format!("    {} failed: {}", error.phase, error.message));
                }
                if report.unauthorized() {
                    output.message("    token rejected; runs are paused until `arbor login`");
                }
            }
            false
        }
        SchedulerEvent::Skipped(reason) => {
            output.message(&format!("[{}] skipped: {}", now, skip_message(*reason, config)));
            false
        }
        SchedulerEvent::Stopped => {
            output.message("Stopped.");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_requires_complete_config() {
        let store = Arc::new(Mutex::new(Store::open_in_memory().unwrap()));

        let disabled = Config::default();
        assert!(scheduler(&disabled, Arc::clone(&store)).is_err());

        let incomplete = Config {
            sync_enabled: true,
            sync_url: Some("http://localhost:8080".to_string()),
            ..Config::default()
        };
        assert!(scheduler(&incomplete, Arc::clone(&store)).is_err());

        let complete = Config {
            auth_token: Some("tok".to_string()),
            user_id: Some("alice".to_string()),
            ..incomplete
        };
        assert!(scheduler(&complete, store).is_ok());
    }

    #[test]
    fn test_skip_messages_name_the_server() {
        let config = Config {
            sync_url: Some("http://sync.example".to_string()),
            ..Config::default()
        };
        assert!(skip_message(SkipReason::Offline, &config).contains("http://sync.example"));
        assert!(skip_message(SkipReason::Unauthenticated, &config).contains("arbor login"));
    }
}
