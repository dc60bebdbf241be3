//! In-memory display and process doubles for unit tests

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};

use crate::display::DisplayBackend;
use crate::error::{DisplayError, ModeChangeError, ModeChangeKind, ProcessSnapshotError};
use crate::process::{ProcessSnapshot, ProcessSource};
use crate::types::{MonitorInfo, MonitorKey, Resolution};

/// Scripted failure for `set_mode` on one monitor
#[derive(Debug, Clone, Copy)]
struct ScriptedFailure {
    kind: ModeChangeKind,
    /// None = fail forever
    remaining: Option<u32>,
}

/// Display whose monitors are plain map entries
///
/// The primary sentinel resolves to the monitor marked with
/// [`FakeDisplay::with_primary`].
#[derive(Debug, Default)]
pub struct FakeDisplay {
    modes: RefCell<BTreeMap<String, Resolution>>,
    supported: HashMap<String, Vec<Resolution>>,
    primary: Option<String>,
    set_failures: RefCell<HashMap<String, ScriptedFailure>>,
    query_failures: RefCell<Vec<String>>,
    calls: RefCell<Vec<(MonitorKey, Resolution)>>,
}

impl FakeDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_monitor(self, key: &str, mode: Resolution) -> Self {
        self.modes.borrow_mut().insert(key.to_string(), mode);
        self
    }

    pub fn with_primary(mut self, key: &str, mode: Resolution) -> Self {
        self.primary = Some(key.to_string());
        self.with_monitor(key, mode)
    }

    pub fn with_supported(mut self, key: &str, modes: &[Resolution]) -> Self {
        self.supported.insert(key.to_string(), modes.to_vec());
        self
    }

    pub fn fail_set_mode_always(&self, key: &str, kind: ModeChangeKind) {
        self.set_failures
            .borrow_mut()
            .insert(key.to_string(), ScriptedFailure { kind, remaining: None });
    }

    pub fn fail_set_mode_times(&self, key: &str, kind: ModeChangeKind, times: u32) {
        self.set_failures
            .borrow_mut()
            .insert(key.to_string(), ScriptedFailure { kind, remaining: Some(times) });
    }

    pub fn clear_failures(&self) {
        self.set_failures.borrow_mut().clear();
        self.query_failures.borrow_mut().clear();
    }

    pub fn fail_queries(&self, key: &str) {
        self.query_failures.borrow_mut().push(key.to_string());
    }

    pub fn mode_of(&self, key: &str) -> Option<Resolution> {
        self.modes.borrow().get(&self.resolve(key)).copied()
    }

    /// Every `set_mode` attempt, failed ones included
    pub fn set_mode_calls(&self) -> Vec<(MonitorKey, Resolution)> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    fn resolve(&self, key: &str) -> String {
        match (&self.primary, key.is_empty()) {
            (Some(primary), true) => primary.clone(),
            _ => key.to_string(),
        }
    }
}

impl DisplayBackend for FakeDisplay {
    fn list_monitors(&self) -> Vec<MonitorInfo> {
        self.modes
            .borrow()
            .keys()
            .filter(|k| !k.is_empty())
            .map(|k| MonitorInfo {
                key: MonitorKey::new(k.clone()),
                display_name: format!("Fake {k}"),
                is_primary: self.primary.as_deref() == Some(k.as_str()),
            })
            .collect()
    }

    fn current_mode(&self, monitor: &MonitorKey) -> Result<Resolution, DisplayError> {
        let key = self.resolve(monitor.as_str());
        if self.query_failures.borrow().contains(&key) {
            return Err(DisplayError::QueryFailed {
                monitor: monitor.clone(),
                reason: "scripted query failure".to_string(),
            });
        }
        self.modes
            .borrow()
            .get(&key)
            .copied()
            .ok_or_else(|| DisplayError::QueryFailed {
                monitor: monitor.clone(),
                reason: "no such monitor".to_string(),
            })
    }

    fn supported_modes(&self, monitor: &MonitorKey) -> Result<Vec<Resolution>, DisplayError> {
        let key = self.resolve(monitor.as_str());
        self.supported
            .get(&key)
            .cloned()
            .ok_or_else(|| DisplayError::QueryFailed {
                monitor: monitor.clone(),
                reason: "no mode list".to_string(),
            })
    }

    fn set_mode(&self, monitor: &MonitorKey, resolution: Resolution) -> Result<(), ModeChangeError> {
        self.calls.borrow_mut().push((monitor.clone(), resolution));
        let key = self.resolve(monitor.as_str());

        let scripted = {
            let mut failures = self.set_failures.borrow_mut();
            match failures.get(&key).copied() {
                None => None,
                Some(ScriptedFailure { kind, remaining: None }) => Some(kind),
                Some(ScriptedFailure { kind, remaining: Some(n) }) => {
                    if n <= 1 {
                        failures.remove(&key);
                    } else {
                        failures.insert(key.clone(), ScriptedFailure { kind, remaining: Some(n - 1) });
                    }
                    (n > 0).then_some(kind)
                }
            }
        };
        if let Some(kind) = scripted {
            return Err(ModeChangeError::new(monitor, resolution, kind, "scripted"));
        }

        let mut modes = self.modes.borrow_mut();
        if !modes.contains_key(&key) {
            return Err(ModeChangeError::new(
                monitor,
                resolution,
                ModeChangeKind::Unsupported,
                "no such monitor",
            ));
        }
        modes.insert(key, resolution);
        Ok(())
    }
}

/// Process source returning whatever the test last set
#[derive(Debug, Default)]
pub struct FakeProcesses {
    running: RefCell<ProcessSnapshot>,
    fail_next: RefCell<bool>,
}

impl FakeProcesses {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, names: &[&str]) {
        *self.running.borrow_mut() = names.iter().copied().collect();
    }

    pub fn fail_next(&self) {
        *self.fail_next.borrow_mut() = true;
    }
}

impl ProcessSource for FakeProcesses {
    fn snapshot(&self) -> Result<ProcessSnapshot, ProcessSnapshotError> {
        if self.fail_next.replace(false) {
            return Err(ProcessSnapshotError(std::io::Error::other("scripted snapshot failure")));
        }
        Ok(self.running.borrow().clone())
    }
}

/// Snapshot helper
pub fn running(names: &[&str]) -> ProcessSnapshot {
    names.iter().copied().collect()
}
