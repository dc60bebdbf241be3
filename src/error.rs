//! Error types for configuration, display and process operations.
//!
//! Application glue (startup, CLI) works with `anyhow`; the layers below return
//! these typed errors so the switcher can decide what to retry and what to log.

use std::path::PathBuf;
use thiserror::Error;

use crate::types::{MonitorKey, Resolution};

/// Loading or saving the configuration document failed.
///
/// Fatal at startup. During a live reload the last good configuration is kept.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Querying a monitor failed.
#[derive(Debug, Error)]
pub enum DisplayError {
    #[error("failed to query {monitor}: {reason}")]
    QueryFailed { monitor: MonitorKey, reason: String },

    #[error("display connection error: {0}")]
    Connection(String),
}

/// Why a mode change was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeChangeKind {
    /// The monitor has no mode matching the request
    Unsupported,
    /// The caller is not allowed to change display settings
    PermissionDenied,
    /// The driver rejected the change for now; worth retrying
    DriverBusy,
    /// The change only takes effect after a restart or reconnect
    RestartRequired,
    /// Anything else the backend could not classify
    Unknown,
}

impl ModeChangeKind {
    /// Transient kinds are retried by [`crate::display::RetryPolicy`]
    pub fn is_transient(self) -> bool {
        matches!(self, ModeChangeKind::DriverBusy | ModeChangeKind::Unknown)
    }
}

/// A display mode change failed.
#[derive(Debug, Clone, Error)]
#[error("failed to set {resolution} on {monitor} ({kind:?}): {detail}")]
pub struct ModeChangeError {
    pub monitor: MonitorKey,
    pub resolution: Resolution,
    pub kind: ModeChangeKind,
    pub detail: String,
}

impl ModeChangeError {
    pub fn new(
        monitor: &MonitorKey,
        resolution: Resolution,
        kind: ModeChangeKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            monitor: monitor.clone(),
            resolution,
            kind,
            detail: detail.into(),
        }
    }
}

/// Walking the process table failed; the tick is skipped.
#[derive(Debug, Error)]
#[error("failed to snapshot running processes: {0}")]
pub struct ProcessSnapshotError(#[from] pub std::io::Error);

/// Restoring a monitor to its pre-override resolution failed.
#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("no captured original resolution and no restore_resolution for {0}")]
    NoCapturedOriginal(MonitorKey),

    #[error(transparent)]
    ModeChange(#[from] ModeChangeError),
}

impl RestoreError {
    pub fn monitor(&self) -> &MonitorKey {
        match self {
            RestoreError::NoCapturedOriginal(monitor) => monitor,
            RestoreError::ModeChange(err) => &err.monitor,
        }
    }
}
