//! Resolution switching driven by running processes

mod state;
#[cfg(test)]
pub mod testing;

pub use state::{ResolutionSwitcher, ShutdownReport};
