//! Process capability: which executables are running right now
//!
//! The switcher consumes a [`ProcessSnapshot`] per tick. [`ProcFsScanner`]
//! builds one from Linux procfs.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::constants::paths;
use crate::error::ProcessSnapshotError;

/// Set of running process names, compared case-insensitively
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSnapshot {
    names: HashSet<String>,
}

impl ProcessSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str) {
        if !name.is_empty() {
            self.names.insert(name.to_lowercase());
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }
}

impl<'a> FromIterator<&'a str> for ProcessSnapshot {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut snapshot = ProcessSnapshot::new();
        for name in iter {
            snapshot.insert(name);
        }
        snapshot
    }
}

/// Source of process snapshots
pub trait ProcessSource {
    fn snapshot(&self) -> Result<ProcessSnapshot, ProcessSnapshotError>;
}

/// Walks `/proc/<pid>` entries
///
/// Each process contributes its `comm` name, the file name of its `exe` link
/// and the file name of its argv[0]. `comm` is cut to 15 bytes by the kernel
/// and a Wine process's `exe` is the Wine loader, so long `.exe` names are
/// only visible through `cmdline`.
#[derive(Debug, Clone)]
pub struct ProcFsScanner {
    root: PathBuf,
}

impl Default for ProcFsScanner {
    fn default() -> Self {
        Self::with_root(paths::PROC)
    }
}

impl ProcFsScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan an alternate procfs-shaped directory
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn collect_names(pid_dir: &Path, snapshot: &mut ProcessSnapshot) {
        // Processes can exit mid-scan; unreadable entries are skipped
        if let Ok(comm) = fs::read_to_string(pid_dir.join(paths::COMM)) {
            snapshot.insert(comm.trim_end_matches('\n'));
        }
        if let Ok(exe) = fs::read_link(pid_dir.join(paths::EXE))
            && let Some(name) = exe.file_name()
        {
            snapshot.insert(&name.to_string_lossy());
        }
        if let Ok(cmdline) = fs::read(pid_dir.join(paths::CMDLINE))
            && let Some(name) = argv0_name(&cmdline)
        {
            snapshot.insert(&name);
        }
    }
}

/// File name of the first NUL-separated argument. Wine keeps Windows paths
/// in argv[0], so both separators count.
fn argv0_name(cmdline: &[u8]) -> Option<String> {
    let argv0 = cmdline.split(|&b| b == 0).next().filter(|arg| !arg.is_empty())?;
    let argv0 = String::from_utf8_lossy(argv0);
    argv0
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

impl ProcessSource for ProcFsScanner {
    fn snapshot(&self) -> Result<ProcessSnapshot, ProcessSnapshotError> {
        let mut snapshot = ProcessSnapshot::new();
        for entry in fs::read_dir(&self.root)? {
            let Ok(entry) = entry else { continue };
            let is_pid = entry
                .file_name()
                .to_str()
                .is_some_and(|name| !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()));
            if is_pid {
                Self::collect_names(&entry.path(), &mut snapshot);
            }
        }
        trace!(count = snapshot.names.len(), "Process snapshot taken");
        Ok(snapshot)
    }
}
