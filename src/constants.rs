//! Application-wide constants
//!
//! This module contains all magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// Application identity
pub mod app {
    /// Name printed by `--version` and in startup logs
    pub const NAME: &str = "res-switcher";

    /// Crate version baked in at compile time
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Configuration file defaults
pub mod config {
    /// Config path used when no positional argument is given
    pub const DEFAULT_FILENAME: &str = "config.json";

    /// Poll interval (seconds) substituted for missing or non-positive values
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

    /// Longest effective poll period (seconds); larger configured values are capped
    pub const MAX_POLL_INTERVAL_SECS: u64 = 3600;

    /// Example rule written into a freshly synthesized config
    pub const EXAMPLE_PROCESS: &str = "cs2.exe";
    pub const EXAMPLE_WIDTH: u32 = 1280;
    pub const EXAMPLE_HEIGHT: u32 = 960;
    pub const EXAMPLE_FREQUENCY: u32 = 144;
}

/// Mode change retry policy
pub mod retry {
    use std::time::Duration;

    /// Total attempts for a transient mode change failure (first try included)
    pub const MAX_ATTEMPTS: u32 = 3;

    /// Fixed pause between attempts
    pub const DELAY: Duration = Duration::from_millis(500);
}

/// Config file watcher timing
pub mod watcher {
    use std::time::Duration;

    /// Quiet window after the last filesystem event before the file is re-read
    pub const DEBOUNCE: Duration = Duration::from_millis(250);

    /// Upper bound on a single blocking wait so the stop flag is observed
    pub const STOP_POLL: Duration = Duration::from_millis(100);
}

/// Linux procfs layout
pub mod paths {
    /// Root of the process table
    pub const PROC: &str = "/proc";

    /// Short command name file inside a pid directory
    pub const COMM: &str = "comm";

    /// Executable symlink inside a pid directory
    pub const EXE: &str = "exe";

    /// NUL-separated argument vector inside a pid directory
    pub const CMDLINE: &str = "cmdline";
}

/// Display labels
pub mod display {
    /// Human label for the primary monitor sentinel
    pub const PRIMARY_LABEL: &str = "primary monitor";
}
