//! Forward process signals into the daemon loop

use anyhow::Result;
use std::sync::mpsc::Sender;

use super::DaemonEvent;

#[cfg(unix)]
pub use unix::SignalListener;

#[cfg(unix)]
mod unix {
    use anyhow::{Context, Result};
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
    use signal_hook::iterator::{Handle, Signals};
    use std::sync::mpsc::Sender;
    use std::thread;
    use tracing::{debug, info, warn};

    use crate::daemon::{DaemonEvent, ShutdownReason};

    /// Background thread turning SIGINT/SIGTERM/SIGHUP/SIGQUIT into shutdown
    /// events. Unregisters when dropped.
    pub struct SignalListener {
        handle: Handle,
        thread: Option<thread::JoinHandle<()>>,
    }

    impl SignalListener {
        pub fn spawn(events: Sender<DaemonEvent>) -> Result<Self> {
            let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP, SIGQUIT])
                .context("Failed to register signal listeners")?;
            let handle = signals.handle();

            let thread = thread::Builder::new()
                .name("signal-listener".to_owned())
                .spawn(move || {
                    for signal in signals.forever() {
                        info!(signal, "Signal received");
                        if events
                            .send(DaemonEvent::Shutdown(ShutdownReason::Signal(signal)))
                            .is_err()
                        {
                            debug!("Daemon loop gone, ignoring signal");
                            break;
                        }
                    }
                })
                .context("Failed to start signal listener thread")?;

            Ok(Self {
                handle,
                thread: Some(thread),
            })
        }
    }

    impl Drop for SignalListener {
        fn drop(&mut self) {
            self.handle.close();
            if let Some(thread) = self.thread.take()
                && thread.join().is_err()
            {
                warn!("Signal listener thread panicked while stopping");
            }
        }
    }
}

#[cfg(not(unix))]
pub struct SignalListener;

#[cfg(not(unix))]
impl SignalListener {
    pub fn spawn(_events: Sender<DaemonEvent>) -> Result<Self> {
        tracing::warn!("Signal listener is not supported on this platform");
        Ok(Self)
    }
}

/// Start forwarding termination signals to `events`
pub fn spawn(events: Sender<DaemonEvent>) -> Result<SignalListener> {
    SignalListener::spawn(events)
}
