//! SIGTERM/SIGINT handling for the drive loop.
//!
//! Signals only set a flag. The loop polls it between waits and batches, so a
//! batch in progress always finishes and persists its cursor before exit.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Shared shutdown flag.
#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register SIGTERM/SIGINT. Registration failures are
    /// reported on stderr and otherwise ignored.
    pub fn new() -> Self {
        let handler = Self::unregistered();
        for (signal, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&handler.shutdown_flag)) {
                eprintln!("[SHR-SIGNAL] failed to register {name}: {e}");
            }
        }
        handler
    }

    /// A handler with no OS hooks; only `request_shutdown` sets it.
    pub fn unregistered() -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn should_shutdown(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    pub fn request_shutdown(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
    }

    /// Sleep for `total` in slices of at most `slice`, returning early on
    /// shutdown. Returns `true` if the full wait elapsed.
    pub fn wait(&self, total: Duration, slice: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.should_shutdown() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(slice.min(deadline - now));
        }
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}
