//! Periodic capture scheduling.
//!
//! [`UpdateScheduler`] runs one capture cycle eagerly at startup, alongside a
//! one-off device and address lookup for display, and then one per interval
//! tick. At most one cycle exists at a time: a tick that arrives
//! while a cycle is outstanding is skipped, not queued.
//!
//! Hosts that suspend (laptop lid closed, session locked) stop firing timers.
//! When the host reports it is visible again the scheduler compares wall-clock
//! time against the last successful cycle and, if a full interval has passed,
//! runs one catch-up cycle before restarting the regular cadence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{CaptureEngine, CycleOutcome, CycleTrigger};
use crate::error::{Error, Result};

const COMMAND_BUFFER: usize = 16;

/// How the last cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    /// A sample was produced.
    Success,
    /// The cycle failed.
    Error,
}

/// Observable scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No cycle has finished yet.
    Idle,
    /// A cycle is outstanding.
    Acquiring,
    /// The last cycle finished; ready for the next trigger.
    Settled(Settlement),
    /// The host is hidden and no cycle is outstanding.
    Suspended,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Acquiring => write!(f, "acquiring"),
            Self::Settled(Settlement::Success) => write!(f, "settled (success)"),
            Self::Settled(Settlement::Error) => write!(f, "settled (error)"),
            Self::Suspended => write!(f, "suspended"),
        }
    }
}

/// Host visibility as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// The host is active.
    Visible,
    /// The host is backgrounded or suspended.
    Hidden,
}

#[derive(Debug)]
enum SchedulerCommand {
    Visibility(Visibility),
    Refresh,
}

/// Drives a [`CaptureEngine`] on a fixed cadence.
#[derive(Debug)]
pub struct UpdateScheduler {
    engine: Arc<CaptureEngine>,
    interval: Duration,
}

impl UpdateScheduler {
    /// Create a scheduler running `engine` every `interval`.
    #[must_use]
    pub fn new(engine: Arc<CaptureEngine>, interval: Duration) -> Self {
        Self { engine, interval }
    }

    /// Start the run loop on the current runtime.
    #[must_use]
    pub fn spawn(self) -> SchedulerHandle {
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state) = watch::channel(SchedulerState::Idle);
        let cancel = CancellationToken::new();

        let run_loop = RunLoop {
            engine: self.engine,
            interval: self.interval,
            in_flight: Arc::new(AtomicBool::new(false)),
            cycles: JoinSet::new(),
            hidden: false,
            last_settlement: None,
            state: state_tx,
        };
        let task = tokio::spawn(run_loop.run(command_rx, cancel.clone()));

        SchedulerHandle {
            commands,
            state,
            cancel,
            task,
        }
    }
}

/// Controls a running [`UpdateScheduler`].
#[derive(Debug)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<SchedulerCommand>,
    state: watch::Receiver<SchedulerState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Report a host visibility change.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler has stopped.
    pub async fn set_visibility(&self, visibility: Visibility) -> Result<()> {
        self.send(SchedulerCommand::Visibility(visibility)).await
    }

    /// Request an immediate cycle, skipped if one is already running.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler has stopped.
    pub async fn refresh(&self) -> Result<()> {
        self.send(SchedulerCommand::Refresh).await
    }

    async fn send(&self, command: SchedulerCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::internal("scheduler is not running"))
    }

    /// The current scheduler state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.state.borrow()
    }

    /// Watch scheduler state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    /// Stop the scheduler.
    ///
    /// Cancels the timer and aborts any outstanding cycle; no cycle
    /// completion is processed after this returns.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
    }
}

/// Clears the in-flight flag when a cycle ends, including by abort or panic.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Event {
    Shutdown,
    Tick,
    Command(SchedulerCommand),
    Settled(std::result::Result<CycleOutcome, JoinError>),
}

struct RunLoop {
    engine: Arc<CaptureEngine>,
    interval: Duration,
    in_flight: Arc<AtomicBool>,
    cycles: JoinSet<CycleOutcome>,
    hidden: bool,
    last_settlement: Option<Settlement>,
    state: watch::Sender<SchedulerState>,
}

impl RunLoop {
    async fn run(mut self, mut commands: mpsc::Receiver<SchedulerCommand>, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            session_id = %self.engine.session_id(),
            "Scheduler started"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.trigger(CycleTrigger::Startup);

        // Display-only; concurrent with the first cycle
        let environment = {
            let engine = Arc::clone(&self.engine);
            tokio::spawn(async move { engine.probe_environment().await })
        };

        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => Event::Shutdown,
                _ = ticker.tick() => Event::Tick,
                command = commands.recv() => command.map_or(Event::Shutdown, Event::Command),
                Some(joined) = self.cycles.join_next() => Event::Settled(joined),
            };

            match event {
                Event::Shutdown => break,
                Event::Tick => {
                    self.trigger(CycleTrigger::Tick);
                }
                Event::Command(SchedulerCommand::Refresh) => {
                    self.trigger(CycleTrigger::Manual);
                }
                Event::Command(SchedulerCommand::Visibility(Visibility::Hidden)) => {
                    if !self.hidden {
                        debug!("Host hidden");
                        self.hidden = true;
                        self.publish();
                    }
                }
                Event::Command(SchedulerCommand::Visibility(Visibility::Visible)) => {
                    if self.hidden {
                        self.hidden = false;
                        if self.recovery_due() {
                            self.trigger(CycleTrigger::Recovery);
                        }
                        ticker.reset();
                        self.publish();
                    }
                }
                Event::Settled(joined) => self.settle(joined),
            }
        }

        // Drop the outstanding cycle without processing its completion
        environment.abort();
        self.cycles.shutdown().await;
        info!("Scheduler stopped");
    }

    /// Start a cycle unless one is outstanding.
    fn trigger(&mut self, trigger: CycleTrigger) -> bool {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            debug!(%trigger, "Cycle already in flight; skipping");
            return false;
        }

        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let engine = Arc::clone(&self.engine);
        self.cycles.spawn(async move {
            let _guard = guard;
            engine.fetch_location(trigger).await
        });
        self.publish();
        true
    }

    fn recovery_due(&self) -> bool {
        let Some(last) = self.engine.last_success() else {
            debug!("No successful cycle yet; recovering");
            return true;
        };
        let elapsed = self.engine.clock().now() - last;
        let due = elapsed
            .to_std()
            .is_ok_and(|elapsed| elapsed >= self.interval);
        debug!(elapsed_secs = elapsed.num_seconds(), due, "Visibility restored");
        due
    }

    fn settle(&mut self, joined: std::result::Result<CycleOutcome, JoinError>) {
        let settlement = match joined {
            Ok(outcome) if outcome.is_success() => Settlement::Success,
            Ok(_) => Settlement::Error,
            Err(e) => {
                warn!(error = %e, "Capture cycle did not complete");
                Settlement::Error
            }
        };
        self.last_settlement = Some(settlement);
        self.publish();
    }

    fn publish(&self) {
        let state = if self.in_flight.load(Ordering::Acquire) {
            SchedulerState::Acquiring
        } else if self.hidden {
            SchedulerState::Suspended
        } else {
            self.last_settlement
                .map_or(SchedulerState::Idle, SchedulerState::Settled)
        };
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }
}
