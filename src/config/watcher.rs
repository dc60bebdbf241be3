//! Live reload of the configuration file
//!
//! A `notify` watcher on the config file's directory feeds a worker thread that
//! debounces bursts of events, re-reads the file, and publishes the result into
//! a single-slot mailbox. The daemon loop is woken through its event channel;
//! the watcher never touches switcher state itself.

use anyhow::{Context, Result};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::Configuration;
use crate::constants;
use crate::daemon::DaemonEvent;

/// Holds at most one pending configuration. Newer reloads overwrite older ones.
#[derive(Debug, Default)]
pub struct ConfigSlot {
    latest: Mutex<Option<Arc<Configuration>>>,
}

impl ConfigSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `config`, returning true when the slot was previously empty
    /// (the consumer has not been woken for a pending value yet)
    pub fn publish(&self, config: Configuration) -> bool {
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        let was_empty = latest.is_none();
        if !was_empty {
            debug!("Dropping unconsumed configuration in favour of a newer one");
        }
        *latest = Some(Arc::new(config));
        was_empty
    }

    pub fn take(&self) -> Option<Arc<Configuration>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Tracks the document the daemon is running with
#[derive(Debug)]
struct ReloadState {
    path: PathBuf,
    last_hash: Option<u64>,
    current: Configuration,
}

fn content_hash(contents: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    contents.hash(&mut hasher);
    hasher.finish()
}

impl ReloadState {
    /// `loaded` is the configuration the daemon started with. The file is
    /// not read here: the first [`reload`](Self::reload) compares against it.
    fn new(path: PathBuf, loaded: Configuration) -> Self {
        Self {
            path,
            last_hash: None,
            current: loaded,
        }
    }

    /// Re-read the file; returns a configuration only when it parsed and
    /// differs from the one in use
    fn reload(&mut self) -> Option<Configuration> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Config file unreadable, keeping last good configuration");
                return None;
            }
        };

        let hash = content_hash(&contents);
        if self.last_hash == Some(hash) {
            debug!(path = %self.path.display(), "Config file event without content change");
            return None;
        }

        match Configuration::from_json(&self.path, &contents) {
            Ok(config) => {
                self.last_hash = Some(hash);
                if config == self.current {
                    debug!(path = %self.path.display(), "Config file rewritten with identical settings");
                    return None;
                }
                config.log_validation();
                self.current = config.clone();
                Some(config)
            }
            Err(e) => {
                error!(error = %e, "Failed to reload configuration, keeping last good configuration");
                None
            }
        }
    }
}

/// Background config file watcher. Stops when dropped.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    stop_flag: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ConfigWatcher {
    /// Watch `path`, comparing changes against `loaded`, the configuration
    /// the daemon is already running with
    pub fn spawn(
        path: &Path,
        loaded: &Configuration,
        slot: Arc<ConfigSlot>,
        events: Sender<DaemonEvent>,
    ) -> Result<Self> {
        let path = path.to_path_buf();
        let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => parent.to_path_buf(),
            None => PathBuf::from("."),
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_os_string())
            .context("Config path has no file name")?;

        let (notify_tx, notify_rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = notify::recommended_watcher(move |event| {
            if notify_tx.send(event).is_err() {
                debug!("Config watch event dropped because worker channel is closed");
            }
        })
        .context("Failed to create config file watcher")?;

        // Watch the directory: editors often replace the file rather than write it
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config directory {}", dir.display()))?;
        info!(path = %path.display(), "Watching configuration for changes");

        let stop_flag = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop_flag);
        let mut state = ReloadState::new(path, loaded.clone());

        let worker = thread::Builder::new()
            .name("config-watcher".to_owned())
            .spawn(move || {
                // Edits made before the watch was registered produce no event
                let mut pending_since: Option<Instant> = Some(Instant::now());
                while !worker_stop.load(Ordering::Acquire) {
                    let timeout = match pending_since {
                        Some(since) => constants::watcher::DEBOUNCE
                            .saturating_sub(since.elapsed())
                            .min(constants::watcher::STOP_POLL),
                        None => constants::watcher::STOP_POLL,
                    };

                    match notify_rx.recv_timeout(timeout) {
                        Ok(Ok(event)) => {
                            if is_relevant(&event, &file_name) {
                                pending_since = Some(Instant::now());
                            }
                            continue;
                        }
                        Ok(Err(e)) => {
                            error!(error = %e, "Config watcher error");
                            continue;
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }

                    let Some(since) = pending_since else { continue };
                    if since.elapsed() < constants::watcher::DEBOUNCE {
                        continue;
                    }
                    pending_since = None;

                    if let Some(config) = state.reload() {
                        info!("Configuration file changed, queued reload");
                        if slot.publish(config) && events.send(DaemonEvent::ConfigReloaded).is_err() {
                            debug!("Daemon loop gone, stopping config watcher");
                            break;
                        }
                    }
                }
                debug!("Config watcher thread exiting");
            })
            .context("Failed to spawn config watcher thread")?;

        Ok(Self {
            _watcher: watcher,
            stop_flag,
            worker: Some(worker),
        })
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            warn!("Config watcher thread panicked while stopping");
        }
    }
}

/// Creates, modifications and renames that touch the config file name
fn is_relevant(event: &Event, file_name: &std::ffi::OsStr) -> bool {
    if !(event.kind.is_create() || event.kind.is_modify()) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|p| p.file_name() == Some(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, EventKind, ModifyKind};
    use std::ffi::OsStr;
    use tempfile::TempDir;

    fn config_with_interval(poll_interval: u64) -> Configuration {
        Configuration {
            poll_interval,
            ..Configuration::default()
        }
    }

    fn write_config(path: &Path, poll_interval: u64) {
        config_with_interval(poll_interval).save(path).unwrap();
    }

    #[test]
    fn test_slot_keeps_only_latest() {
        let slot = ConfigSlot::new();
        let first = Configuration { poll_interval: 3, ..Configuration::default() };
        let second = Configuration { poll_interval: 9, ..Configuration::default() };

        assert!(slot.publish(first));
        assert!(!slot.publish(second));

        let taken = slot.take().unwrap();
        assert_eq!(taken.poll_interval, 9);
        assert!(slot.take().is_none());
        assert!(slot.publish(Configuration::default()));
    }

    #[test]
    fn test_reload_ignores_unchanged_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, 2);

        let mut state = ReloadState::new(path.clone(), config_with_interval(2));
        assert!(state.reload().is_none());

        write_config(&path, 5);
        let reloaded = state.reload().unwrap();
        assert_eq!(reloaded.poll_interval, 5);

        // Same content again
        assert!(state.reload().is_none());
    }

    #[test]
    fn test_reload_keeps_last_good_on_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, 2);
        let mut state = ReloadState::new(path.clone(), config_with_interval(2));

        std::fs::write(&path, "{ not json").unwrap();
        assert!(state.reload().is_none());

        // Going back to a valid but different document reloads
        write_config(&path, 4);
        assert_eq!(state.reload().unwrap().poll_interval, 4);
    }

    #[test]
    fn test_edit_before_watch_started_is_delivered() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        // Daemon loaded interval 2, file was changed to 7 before the watcher existed
        write_config(&path, 7);

        let mut state = ReloadState::new(path.clone(), config_with_interval(2));
        assert_eq!(state.reload().unwrap().poll_interval, 7);
        assert!(state.reload().is_none());
    }

    #[test]
    fn test_reformatted_identical_document_is_not_delivered() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = config_with_interval(3);
        std::fs::write(&path, serde_json::to_string(&config).unwrap()).unwrap();

        let mut state = ReloadState::new(path, config);
        assert!(state.reload().is_none());
    }

    #[test]
    fn test_file_change_reaches_daemon_channel() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        write_config(&path, 2);

        let slot = Arc::new(ConfigSlot::new());
        let (tx, rx) = mpsc::channel();
        let watcher = ConfigWatcher::spawn(&path, &config_with_interval(2), Arc::clone(&slot), tx).unwrap();

        // Nothing changed yet: the startup check stays quiet
        thread::sleep(constants::watcher::DEBOUNCE * 2);
        assert!(slot.take().is_none());

        write_config(&path, 9);
        let event = rx.recv_timeout(std::time::Duration::from_secs(10)).unwrap();
        assert_eq!(event, DaemonEvent::ConfigReloaded);
        assert_eq!(slot.take().unwrap().poll_interval, 9);
        drop(watcher);
    }

    #[test]
    fn test_relevant_events_filter_by_name_and_kind() {
        let name = OsStr::new("config.json");
        let modify = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/tmp/x/config.json"));
        let create = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/tmp/x/config.json"));
        let other_file = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("/tmp/x/other.json"));
        let access = Event::new(EventKind::Access(AccessKind::Read))
            .add_path(PathBuf::from("/tmp/x/config.json"));

        assert!(is_relevant(&modify, name));
        assert!(is_relevant(&create, name));
        assert!(!is_relevant(&other_file, name));
        assert!(!is_relevant(&access, name));
    }
}
