//! Per-monitor resolution state machine
//!
//! A monitor is either untouched (no override entry) or overridden (entry
//! present). Entries appear when a rule's process is first seen and its mode
//! is applied, and disappear only after a successful revert. A failed revert
//! keeps the entry so the monitor is never silently forgotten.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{AppRule, Configuration};
use crate::display::{DisplayBackend, RetryPolicy};
use crate::error::{DisplayError, ModeChangeError, RestoreError};
use crate::process::ProcessSnapshot;
use crate::types::{MonitorKey, Resolution};

/// A rule-level failure during one reconciliation pass
#[derive(Debug)]
pub enum SwitchFailure {
    /// Could not read the monitor's mode before applying a rule
    Query { process: String, error: DisplayError },
    /// Applying the rule's target resolution failed
    Apply { process: String, error: ModeChangeError },
    /// Restoring the monitor after the process stopped failed
    Restore { process: String, error: RestoreError },
}

impl SwitchFailure {
    pub fn process(&self) -> &str {
        match self {
            SwitchFailure::Query { process, .. }
            | SwitchFailure::Apply { process, .. }
            | SwitchFailure::Restore { process, .. } => process,
        }
    }
}

impl fmt::Display for SwitchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwitchFailure::Query { error, .. } => write!(f, "mode query failed: {error}"),
            SwitchFailure::Apply { error, .. } => write!(f, "apply failed: {error}"),
            SwitchFailure::Restore { error, .. } => write!(f, "restore failed: {error}"),
        }
    }
}

/// What one reconciliation pass did
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub started: Vec<AppRule>,
    pub stopped: Vec<AppRule>,
    pub failures: Vec<SwitchFailure>,
}

impl ReconcileOutcome {
    pub fn is_quiet(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty() && self.failures.is_empty()
    }
}

/// Result of restoring every overridden monitor at exit
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub restored: Vec<MonitorKey>,
    pub failures: Vec<RestoreError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Owns all switching state; driven only from the daemon loop
pub struct ResolutionSwitcher<D> {
    display: D,
    retry: RetryPolicy,
    config: Arc<Configuration>,
    /// Captured once at construction, never mutated afterwards
    originals: HashMap<MonitorKey, Resolution>,
    overrides: HashMap<MonitorKey, Resolution>,
    /// Rules whose process was running at the last pass, in activation order
    active: Vec<AppRule>,
    /// (lowercased process, monitor) pairs added by a reload while the process
    /// was already active. They wait for that process's next stop edge.
    deferred: HashSet<(String, MonitorKey)>,
}

fn same_rule(a: &AppRule, b: &AppRule) -> bool {
    a.monitor_name == b.monitor_name && a.matches(&b.process_name)
}

fn rule_key(rule: &AppRule) -> (String, MonitorKey) {
    (rule.process_name.to_lowercase(), rule.monitor_name.clone())
}

/// Current mode of every reachable monitor plus the primary sentinel
fn capture_originals(display: &dyn DisplayBackend) -> HashMap<MonitorKey, Resolution> {
    let mut originals = HashMap::new();

    let primary = MonitorKey::primary();
    match display.current_mode(&primary) {
        Ok(mode) => {
            info!(resolution = %mode, "Primary monitor resolution");
            originals.insert(primary, mode);
        }
        Err(e) => warn!(error = %e, "Failed to capture primary monitor resolution"),
    }

    for monitor in display.list_monitors() {
        if monitor.key.is_primary() {
            continue;
        }
        match display.current_mode(&monitor.key) {
            Ok(mode) => {
                info!(
                    monitor = %monitor.key,
                    name = %monitor.display_name,
                    primary = monitor.is_primary,
                    resolution = %mode,
                    "Captured original resolution"
                );
                originals.insert(monitor.key, mode);
            }
            Err(e) => {
                warn!(monitor = %monitor.key, error = %e, "Failed to capture original resolution, monitor excluded");
            }
        }
    }

    originals
}

impl<D: DisplayBackend> ResolutionSwitcher<D> {
    /// Capture original resolutions and start with no overrides
    pub fn new(display: D, config: Arc<Configuration>, retry: RetryPolicy) -> Self {
        let originals = capture_originals(&display);
        Self {
            display,
            retry,
            config,
            originals,
            overrides: HashMap::new(),
            active: Vec::new(),
            deferred: HashSet::new(),
        }
    }

    #[cfg(test)]
    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn configuration(&self) -> &Arc<Configuration> {
        &self.config
    }

    pub fn originals(&self) -> &HashMap<MonitorKey, Resolution> {
        &self.originals
    }

    pub fn active_overrides(&self) -> &HashMap<MonitorKey, Resolution> {
        &self.overrides
    }

    pub fn active_apps(&self) -> &[AppRule] {
        &self.active
    }

    /// Swap the configuration used by the next [`reconcile`](Self::reconcile).
    ///
    /// Running applications keep their current override until they stop. New
    /// rules for an already active process are held back until it stops.
    pub fn replace_configuration(&mut self, config: Arc<Configuration>) {
        let active_processes: HashSet<String> = self
            .active
            .iter()
            .map(|rule| rule.process_name.to_lowercase())
            .collect();
        for rule in &config.applications {
            let is_new = !self.config.applications.iter().any(|old| same_rule(old, rule));
            if is_new && active_processes.contains(&rule.process_name.to_lowercase()) {
                debug!(
                    process = %rule.process_name,
                    monitor = %rule.monitor_name,
                    "Rule added for a running application, deferred until it restarts"
                );
                self.deferred.insert(rule_key(rule));
            }
        }

        info!(
            rules = config.applications.len(),
            poll_interval = config.poll_interval,
            active = self.active.len(),
            deferred = self.deferred.len(),
            "Configuration replaced"
        );
        self.config = config;
    }

    fn is_active(&self, rule: &AppRule) -> bool {
        self.active.iter().any(|a| same_rule(a, rule))
    }

    /// Diff `running` against the active set and apply or revert modes
    pub fn reconcile(&mut self, running: &ProcessSnapshot) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        let config = Arc::clone(&self.config);
        for rule in &config.applications {
            if rule.process_name.trim().is_empty() {
                continue;
            }
            if running.contains(&rule.process_name)
                && !self.is_active(rule)
                && !self.deferred.contains(&rule_key(rule))
            {
                info!(process = %rule.process_name, monitor = %rule.monitor_name, "Application started");
                self.handle_start(rule, &mut outcome);
            }
        }

        let (stopped, still_running): (Vec<AppRule>, Vec<AppRule>) = std::mem::take(&mut self.active)
            .into_iter()
            .partition(|rule| !running.contains(&rule.process_name));
        self.active = still_running;
        self.deferred.retain(|(process, _)| running.contains(process));

        let mut handled = HashSet::new();
        for rule in stopped {
            info!(process = %rule.process_name, monitor = %rule.monitor_name, "Application stopped");
            // The first stopped rule for a monitor decides its restore target
            if handled.insert(rule.monitor_name.clone()) {
                self.handle_stop(&rule, &mut outcome);
            }
            outcome.stopped.push(rule);
        }

        outcome
    }

    fn handle_start(&mut self, rule: &AppRule, outcome: &mut ReconcileOutcome) {
        let monitor = &rule.monitor_name;
        let current = match self.display.current_mode(monitor) {
            Ok(current) => current,
            Err(error) => {
                error!(
                    process = %rule.process_name,
                    monitor = %monitor,
                    resolution = %rule.resolution,
                    error = %error,
                    "Cannot read current mode, will retry next poll"
                );
                outcome.failures.push(SwitchFailure::Query {
                    process: rule.process_name.clone(),
                    error,
                });
                return;
            }
        };

        if current == rule.resolution {
            debug!(process = %rule.process_name, monitor = %monitor, resolution = %current, "Monitor already at target resolution");
            let seed = self.originals.get(monitor).copied().unwrap_or(current);
            self.overrides.entry(monitor.clone()).or_insert(seed);
        } else {
            info!(
                process = %rule.process_name,
                monitor = %monitor,
                from = %current,
                resolution = %rule.resolution,
                "Changing resolution"
            );
            if let Err(error) = self.retry.apply(&self.display, monitor, rule.resolution) {
                error!(
                    process = %rule.process_name,
                    monitor = %monitor,
                    resolution = %rule.resolution,
                    error = %error,
                    "Failed to apply resolution, will retry next poll"
                );
                outcome.failures.push(SwitchFailure::Apply {
                    process: rule.process_name.clone(),
                    error,
                });
                return;
            }
            self.overrides.insert(monitor.clone(), rule.resolution);
        }

        self.active.push(rule.clone());
        outcome.started.push(rule.clone());
    }

    fn handle_stop(&mut self, rule: &AppRule, outcome: &mut ReconcileOutcome) {
        let monitor = &rule.monitor_name;
        if let Some(owner) = self.active.iter().find(|a| &a.monitor_name == monitor) {
            debug!(
                process = %rule.process_name,
                monitor = %monitor,
                still_used_by = %owner.process_name,
                "Monitor still claimed, keeping override"
            );
            return;
        }

        if let Err(error) = self.revert(rule) {
            error!(
                process = %rule.process_name,
                monitor = %monitor,
                error = %error,
                "Failed to restore resolution, override kept until the next stop on this monitor"
            );
            outcome.failures.push(SwitchFailure::Restore {
                process: rule.process_name.clone(),
                error,
            });
        }
    }

    fn revert(&mut self, rule: &AppRule) -> Result<(), RestoreError> {
        let monitor = &rule.monitor_name;
        let target = rule
            .restore_resolution
            .or_else(|| self.originals.get(monitor).copied())
            .ok_or_else(|| RestoreError::NoCapturedOriginal(monitor.clone()))?;

        match self.display.current_mode(monitor) {
            Ok(current) if current == target => {
                debug!(monitor = %monitor, resolution = %target, "Monitor already at restore resolution");
                self.overrides.remove(monitor);
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                warn!(monitor = %monitor, error = %e, "Cannot read live mode, restoring anyway");
            }
        }

        info!(monitor = %monitor, resolution = %target, "Restoring resolution");
        self.retry.apply(&self.display, monitor, target)?;
        self.overrides.remove(monitor);
        Ok(())
    }

    /// Restore every overridden monitor to its captured original and clear
    /// all bookkeeping. Best effort: every failure is collected.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();

        let mut monitors: Vec<MonitorKey> = self.overrides.keys().cloned().collect();
        monitors.sort();
        for monitor in monitors {
            let Some(original) = self.originals.get(&monitor).copied() else {
                error!(monitor = %monitor, "No captured original resolution to restore");
                report.failures.push(RestoreError::NoCapturedOriginal(monitor));
                continue;
            };
            info!(monitor = %monitor, resolution = %original, "Restoring original resolution before exit");
            match self.retry.apply(&self.display, &monitor, original) {
                Ok(()) => report.restored.push(monitor),
                Err(e) => {
                    error!(monitor = %monitor, error = %e, "Error restoring resolution");
                    report.failures.push(e.into());
                }
            }
        }

        self.overrides.clear();
        self.active.clear();
        self.deferred.clear();
        report
    }
}
