//! Daemon loop - merges poll ticks, config reloads and shutdown into one
//! sequential stream of work
//!
//! Only this loop touches the switcher. Other threads (config watcher, signal
//! listener) talk to it through [`DaemonEvent`]s on its channel.

pub mod signals;

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::config::ConfigSlot;
use crate::constants;
use crate::display::DisplayBackend;
use crate::process::ProcessSource;
use crate::switcher::{ResolutionSwitcher, ShutdownReport};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(i32),
    UserRequest,
}

/// Work items delivered to the loop from other threads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonEvent {
    /// A newer configuration is waiting in the [`ConfigSlot`]
    ConfigReloaded,
    Shutdown(ShutdownReason),
}

/// Fixed-period deadline that only changes period between ticks
#[derive(Debug, Clone, Copy)]
pub struct PollTimer {
    period: Duration,
    next_tick: Instant,
}

/// `now + period`, falling back to the longest allowed period when the sum
/// does not fit in an `Instant`
fn deadline(now: Instant, period: Duration) -> Instant {
    now.checked_add(period)
        .or_else(|| now.checked_add(Duration::from_secs(constants::config::MAX_POLL_INTERVAL_SECS)))
        .unwrap_or(now)
}

impl PollTimer {
    pub fn new(period: Duration, now: Instant) -> Self {
        Self {
            period,
            next_tick: deadline(now, period),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    #[cfg(test)]
    pub fn next_tick(&self) -> Instant {
        self.next_tick
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_tick
    }

    pub fn time_until_tick(&self, now: Instant) -> Duration {
        self.next_tick.saturating_duration_since(now)
    }

    /// Schedule the next tick after one has run, adopting `configured` if the
    /// configuration's interval changed since the timer was armed
    pub fn rearm(&mut self, configured: Duration, now: Instant) {
        if configured != self.period {
            info!(
                old_secs = self.period.as_secs(),
                new_secs = configured.as_secs(),
                "Poll interval changed"
            );
            self.period = configured;
        }
        self.next_tick = deadline(now, self.period);
    }
}

pub struct Daemon<D, P> {
    switcher: ResolutionSwitcher<D>,
    processes: P,
    slot: Arc<ConfigSlot>,
    events_tx: Sender<DaemonEvent>,
    events_rx: Receiver<DaemonEvent>,
}

impl<D: DisplayBackend, P: ProcessSource> Daemon<D, P> {
    pub fn new(switcher: ResolutionSwitcher<D>, processes: P, slot: Arc<ConfigSlot>) -> Self {
        let (events_tx, events_rx) = mpsc::channel();
        Self {
            switcher,
            processes,
            slot,
            events_tx,
            events_rx,
        }
    }

    /// Handle for other threads to post events into the loop
    pub fn sender(&self) -> Sender<DaemonEvent> {
        self.events_tx.clone()
    }

    #[cfg(test)]
    pub fn switcher(&self) -> &ResolutionSwitcher<D> {
        &self.switcher
    }

    /// Run until a shutdown event arrives, then restore all monitors
    pub fn run(mut self) -> ShutdownReport {
        let mut timer = PollTimer::new(self.switcher.configuration().poll_interval(), Instant::now());
        info!(
            poll_secs = timer.period().as_secs(),
            monitors = self.switcher.originals().len(),
            "Monitoring started"
        );

        loop {
            let now = Instant::now();
            if timer.is_due(now) {
                self.run_tick(&mut timer);
                continue;
            }

            let event = match self.events_rx.recv_timeout(timer.time_until_tick(now)) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                // The loop holds a sender itself, so this is unreachable in practice
                Err(RecvTimeoutError::Disconnected) => DaemonEvent::Shutdown(ShutdownReason::UserRequest),
            };
            if let Some(report) = self.handle_event(event) {
                return report;
            }
        }
    }

    /// Tick, then schedule the next one with the interval of whichever
    /// configuration is current now
    fn run_tick(&mut self, timer: &mut PollTimer) {
        self.tick();
        timer.rearm(self.switcher.configuration().poll_interval(), Instant::now());
    }

    /// Snapshot processes and reconcile. A failed snapshot skips the tick.
    pub fn tick(&mut self) {
        debug!("Checking running apps");
        let snapshot = match self.processes.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Skipping tick");
                return;
            }
        };
        let outcome = self.switcher.reconcile(&snapshot);
        if outcome.is_quiet() {
            return;
        }
        debug!(
            active_apps = self.switcher.active_apps().len(),
            overridden_monitors = self.switcher.active_overrides().len(),
            "Switcher state after tick"
        );
        for failure in &outcome.failures {
            warn!(process = failure.process(), error = %failure, "Rule failed this tick");
        }
        if !outcome.failures.is_empty() {
            warn!(
                failures = outcome.failures.len(),
                started = outcome.started.len(),
                stopped = outcome.stopped.len(),
                "Reconciliation finished with failures"
            );
        }
    }

    /// Returns the shutdown report once the loop should stop
    pub fn handle_event(&mut self, event: DaemonEvent) -> Option<ShutdownReport> {
        match event {
            DaemonEvent::ConfigReloaded => {
                match self.slot.take() {
                    Some(config) => self.switcher.replace_configuration(config),
                    None => debug!("Reload wake-up with empty slot"),
                }
                None
            }
            DaemonEvent::Shutdown(reason) => {
                info!(reason = ?reason, "Received shutdown signal, restoring displays");
                Some(self.shutdown())
            }
        }
    }

    fn shutdown(&mut self) -> ShutdownReport {
        let report = self.switcher.shutdown();
        for failure in &report.failures {
            error!(monitor = %failure.monitor(), error = %failure, "Resolution not restored");
        }
        info!(
            restored = report.restored.len(),
            failed = report.failures.len(),
            "Shutdown complete"
        );
        report
    }
}
