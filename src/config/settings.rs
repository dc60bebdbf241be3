//! Persisted configuration document
//!
//! One JSON file holds the monitored applications and daemon behaviour flags.
//! A loaded [`Configuration`] is an immutable snapshot: reloads replace it
//! wholesale, nothing edits it in place.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::constants;
use crate::display::DisplayBackend;
use crate::error::ConfigError;
use crate::types::{MonitorKey, Resolution};

/// Switch `monitor_name` to `resolution` while `process_name` is running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRule {
    /// Executable name, matched case-insensitively (e.g. "cs2.exe")
    pub process_name: String,
    pub resolution: Resolution,
    /// Empty = primary monitor
    #[serde(default)]
    pub monitor_name: MonitorKey,
    /// Resolution to restore on exit. None = the monitor's captured original
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_resolution: Option<Resolution>,
}

impl AppRule {
    pub fn new(process_name: impl Into<String>, resolution: Resolution, monitor: MonitorKey) -> Self {
        Self {
            process_name: process_name.into(),
            resolution,
            monitor_name: monitor,
            restore_resolution: None,
        }
    }

    #[cfg(test)]
    pub fn with_restore(mut self, restore: Resolution) -> Self {
        self.restore_resolution = Some(restore);
        self
    }

    /// Case-insensitive process name comparison
    pub fn matches(&self, process_name: &str) -> bool {
        self.process_name.eq_ignore_ascii_case(process_name)
    }
}

/// Full configuration snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub applications: Vec<AppRule>,

    /// Seconds between process checks; non-positive values become the default
    #[serde(default = "default_poll_interval", deserialize_with = "deserialize_poll_interval")]
    pub poll_interval: u64,

    #[serde(default = "default_true")]
    pub show_gui_on_launch: bool,

    #[serde(default)]
    pub start_with_windows: bool,

    #[serde(default = "default_true")]
    pub auto_start_monitoring: bool,
}

fn default_poll_interval() -> u64 {
    constants::config::DEFAULT_POLL_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

/// Accepts any integer; zero and negatives fall back to the default interval
fn deserialize_poll_interval<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = i64::deserialize(deserializer)?;
    if raw <= 0 {
        Ok(default_poll_interval())
    } else {
        Ok(raw as u64)
    }
}

impl Default for Configuration {
    /// First-run document: one example rule on the primary monitor
    fn default() -> Self {
        use constants::config::*;
        Self {
            applications: vec![AppRule::new(
                EXAMPLE_PROCESS,
                Resolution::new(EXAMPLE_WIDTH, EXAMPLE_HEIGHT, EXAMPLE_FREQUENCY),
                MonitorKey::primary(),
            )],
            poll_interval: DEFAULT_POLL_INTERVAL_SECS,
            show_gui_on_launch: true,
            start_with_windows: false,
            auto_start_monitoring: true,
        }
    }
}

/// A non-fatal problem found in a loaded configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    EmptyProcessName { index: usize },
    ZeroDimension { index: usize, process: String },
    DuplicateRule { index: usize, process: String, monitor: MonitorKey },
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationIssue::EmptyProcessName { index } => {
                write!(f, "application #{index} has an empty process_name and will never match")
            }
            ValidationIssue::ZeroDimension { index, process } => {
                write!(f, "application #{index} ({process}) has a zero width or height")
            }
            ValidationIssue::DuplicateRule { index, process, monitor } => write!(
                f,
                "application #{index} ({process}) duplicates an earlier rule for {monitor}; the earlier rule wins"
            ),
        }
    }
}

impl Configuration {
    /// Read and parse the document. No lenient parsing: any error is returned.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(path, &contents)
    }

    /// Parse an already-read document; `path` is only used for error context
    pub fn from_json(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let config: Configuration =
            serde_json::from_str(contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        info!(
            path = %path.display(),
            rules = config.applications.len(),
            poll_interval = config.poll_interval,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Rewrite the whole document, pretty-printed
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, json).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Effective timer period, between one second and
    /// [`MAX_POLL_INTERVAL_SECS`](constants::config::MAX_POLL_INTERVAL_SECS)
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(
            self.poll_interval
                .clamp(1, constants::config::MAX_POLL_INTERVAL_SECS),
        )
    }

    /// Collect problems that make rules ineffective or ambiguous
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();

        for (index, rule) in self.applications.iter().enumerate() {
            if rule.process_name.trim().is_empty() {
                issues.push(ValidationIssue::EmptyProcessName { index });
                continue;
            }
            if rule.resolution.width == 0 || rule.resolution.height == 0 {
                issues.push(ValidationIssue::ZeroDimension {
                    index,
                    process: rule.process_name.clone(),
                });
            }
            let key = (rule.process_name.to_ascii_lowercase(), rule.monitor_name.clone());
            if !seen.insert(key) {
                issues.push(ValidationIssue::DuplicateRule {
                    index,
                    process: rule.process_name.clone(),
                    monitor: rule.monitor_name.clone(),
                });
            }
        }

        issues
    }

    /// Log every validation issue as a warning
    pub fn log_validation(&self) {
        for issue in self.validate() {
            warn!(issue = %issue, "Configuration issue");
        }
    }

    /// Warn about rule targets a monitor does not list among its modes.
    /// Diagnostic only; a rule that fails here still gets attempted.
    pub fn check_supported(&self, display: &dyn DisplayBackend) -> Vec<(usize, MonitorKey, Resolution)> {
        let mut unsupported = Vec::new();
        for (index, rule) in self.applications.iter().enumerate() {
            let modes = match display.supported_modes(&rule.monitor_name) {
                Ok(modes) => modes,
                Err(e) => {
                    warn!(
                        process = %rule.process_name,
                        monitor = %rule.monitor_name,
                        error = %e,
                        "Cannot list supported modes to validate rule"
                    );
                    continue;
                }
            };
            if !modes.iter().any(|m| rule.resolution.satisfied_by(m)) {
                warn!(
                    process = %rule.process_name,
                    monitor = %rule.monitor_name,
                    resolution = %rule.resolution,
                    "Target resolution is not among the monitor's supported modes"
                );
                unsupported.push((index, rule.monitor_name.clone(), rule.resolution));
            }
        }
        unsupported
    }
}
