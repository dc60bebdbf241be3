#![forbid(unsafe_code)]

mod config;
mod constants;
mod daemon;
mod display;
mod error;
mod process;
mod switcher;
mod types;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level as TraceLevel};
use tracing_subscriber::FmtSubscriber;

use config::{ConfigSlot, ConfigWatcher, Configuration};
use daemon::Daemon;
use display::{DisplayBackend, RandrDisplay, RetryPolicy};
use process::ProcFsScanner;
use switcher::ResolutionSwitcher;

/// Switch monitor resolutions while specific applications are running
#[derive(Debug, Parser)]
#[command(name = constants::app::NAME, disable_version_flag = true)]
struct Cli {
    /// Path to the JSON configuration document
    #[arg(value_name = "CONFIG", default_value = constants::config::DEFAULT_FILENAME)]
    config: PathBuf,

    /// Print version and exit
    #[arg(short = 'v', long = "version")]
    version: bool,

    /// List monitors with their current and supported modes, then exit
    #[arg(long)]
    list_monitors: bool,
}

fn init_logging() -> Result<()> {
    // Parse log level from environment variable
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")
}

/// First run: write an example config and ask the user to edit it
fn bootstrap_config(path: &Path) -> Result<()> {
    info!(path = %path.display(), "Config file not found, creating default");
    Configuration::default()
        .save(path)
        .context("Failed to create default config")?;
    info!(
        path = %path.display(),
        "Default config created. Please edit it and restart the application."
    );
    Ok(())
}

fn print_monitors(display: &dyn DisplayBackend) {
    let monitors = display.list_monitors();
    if monitors.is_empty() {
        println!("No monitors found");
        return;
    }
    for monitor in monitors {
        let marker = if monitor.is_primary { " (Primary)" } else { "" };
        let current = display
            .current_mode(&monitor.key)
            .map(|r| r.to_string())
            .unwrap_or_else(|e| format!("unknown ({e})"));
        println!("{}: {}{} - {}", monitor.key.as_str(), monitor.display_name, marker, current);
        match display.supported_modes(&monitor.key) {
            Ok(modes) => {
                let modes: Vec<String> = modes.iter().map(ToString::to_string).collect();
                println!("    supported: {}", modes.join(", "));
            }
            Err(e) => println!("    supported: unavailable ({e})"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("{} v{}", constants::app::NAME, constants::app::VERSION);
        return Ok(());
    }

    init_logging()?;

    if cli.list_monitors {
        let display = RandrDisplay::connect()?;
        print_monitors(&display);
        return Ok(());
    }

    if !cli.config.exists() {
        return bootstrap_config(&cli.config);
    }

    let config = Configuration::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    config.log_validation();

    if !config.auto_start_monitoring {
        info!("auto_start_monitoring is disabled in the configuration, exiting");
        return Ok(());
    }

    info!(version = constants::app::VERSION, "Starting {}", constants::app::NAME);

    let display = RandrDisplay::connect()?;
    config.check_supported(&display);
    let config = Arc::new(config);
    let switcher = ResolutionSwitcher::new(display, Arc::clone(&config), RetryPolicy::default());

    let slot = Arc::new(ConfigSlot::new());
    let daemon = Daemon::new(switcher, ProcFsScanner::new(), Arc::clone(&slot));

    // Live reload is optional; monitoring continues with the loaded config
    let _watcher = ConfigWatcher::spawn(&cli.config, &config, slot, daemon.sender())
        .inspect_err(|e| warn!(error = %e, "Config hot reload disabled"))
        .ok();
    let _signals = daemon::signals::spawn(daemon.sender())?;

    let report = daemon.run();
    if !report.is_clean() {
        warn!(
            failed = report.failures.len(),
            "Some monitors could not be restored to their original resolution"
        );
    }
    Ok(())
}
