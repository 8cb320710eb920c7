//! Background sync scheduling
//!
//! The scheduler runs the driver on a fixed interval and on demand. At most
//! one run is in flight: a run requested while another is active is skipped,
//! not queued. Before each run it checks the credential and probes the server
//! with a heartbeat; either failing skips the run.
//!
//! Progress is reported as [`SchedulerEvent`]s on an unbounded channel so a
//! CLI or UI can follow along without polling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::auth::{Auth, SessionState};
use super::driver::{SyncDriver, SyncReport};
use super::transport::SyncTransport;

/// Why a run did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    Unauthenticated,
    Offline,
}

/// Notifications emitted by the scheduler
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    Started,
    Completed(SyncReport),
    Skipped(SkipReason),
    Stopped,
}

/// Result of asking for a run
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(SyncReport),
    Skipped(SkipReason),
}

enum Command {
    Trigger,
    Stop,
}

struct Control {
    commands: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

struct Inner<T, A> {
    driver: Mutex<SyncDriver<T, A>>,
    running: AtomicBool,
    session: SessionState,
    events: mpsc::UnboundedSender<SchedulerEvent>,
}

/// Resets the in-flight flag when a run ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl<T: SyncTransport, A: Auth> Inner<T, A> {
    fn emit(&self, event: SchedulerEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn skip(&self, reason: SkipReason) -> RunOutcome {
        debug!("Sync run skipped: {:?}", reason);
        self.emit(SchedulerEvent::Skipped(reason));
        RunOutcome::Skipped(reason)
    }

    async fn run_once(&self) -> RunOutcome {
        if self.running.swap(true, Ordering::SeqCst) {
            return self.skip(SkipReason::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        let mut driver = self.driver.lock().await;

        if !driver.auth().is_authenticated() {
            self.session.set_auth_invalid(true);
            return self.skip(SkipReason::Unauthenticated);
        }
        self.session.set_auth_invalid(false);

        if let Err(e) = driver.heartbeat().await {
            warn!("Sync server unreachable: {}", e);
            self.session.set_online(false);
            return self.skip(SkipReason::Offline);
        }
        self.session.set_online(true);

        self.emit(SchedulerEvent::Started);
        let report = driver.sync().await;
        if report.unauthorized() {
            self.session.set_auth_invalid(true);
        }
        self.emit(SchedulerEvent::Completed(report.clone()));
        RunOutcome::Completed(report)
    }
}

/// Runs a [`SyncDriver`] periodically and on demand
pub struct Scheduler<T, A> {
    inner: Arc<Inner<T, A>>,
    control: Option<Control>,
}

impl<T, A> Scheduler<T, A>
where
    T: SyncTransport + 'static,
    A: Auth + 'static,
{
    /// Wrap a driver; the receiver yields every [`SchedulerEvent`]
    pub fn new(driver: SyncDriver<T, A>) -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let scheduler = Self {
            inner: Arc::new(Inner {
                driver: Mutex::new(driver),
                running: AtomicBool::new(false),
                session: SessionState::new(),
                events,
            }),
            control: None,
        };
        (scheduler, receiver)
    }

    pub fn session(&self) -> &SessionState {
        &self.inner.session
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.control.is_some()
    }

    /// Run now on the current task
    pub async fn run_once(&self) -> RunOutcome {
        self.inner.run_once().await
    }

    /// Start the periodic loop; the first run happens immediately.
    ///
    /// Returns false if the loop is already running.
    pub fn start(&mut self, interval: Duration) -> bool {
        if self.control.is_some() {
            return false;
        }

        let (commands, mut receiver) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => spawn_run(&inner),
                    command = receiver.recv() => match command {
                        Some(Command::Trigger) => spawn_run(&inner),
                        Some(Command::Stop) | None => break,
                    },
                }
            }
        });

        info!("Sync scheduler started (every {:?})", interval);
        self.control = Some(Control { commands, handle });
        true
    }

    /// Ask the loop for an extra run. Returns false if it is not started.
    pub fn trigger(&self) -> bool {
        match &self.control {
            Some(control) => control.commands.send(Command::Trigger).is_ok(),
            None => false,
        }
    }

    /// Stop the loop. A run already in flight finishes on its own.
    pub async fn stop(&mut self) {
        let Some(control) = self.control.take() else {
            return;
        };
        let _ = control.commands.send(Command::Stop);
        if let Err(e) = control.handle.await {
            warn!("Sync scheduler loop ended abnormally: {}", e);
        }
        info!("Sync scheduler stopped");
        self.inner.emit(SchedulerEvent::Stopped);
    }
}

fn spawn_run<T, A>(inner: &Arc<Inner<T, A>>)
where
    T: SyncTransport + 'static,
    A: Auth + 'static,
{
    let inner = Arc::clone(inner);
    tokio::spawn(async move {
        inner.run_once().await;
    });
}
