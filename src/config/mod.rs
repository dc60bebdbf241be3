//! Configuration management for res-switcher
//!
//! - **settings**: the persisted JSON document (rules, poll interval, flags)
//! - **watcher**: live reload of that document into a single-slot mailbox

pub mod settings;
pub mod watcher;

pub use settings::{AppRule, Configuration};
pub use watcher::{ConfigSlot, ConfigWatcher};
