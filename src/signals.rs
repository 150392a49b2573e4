//! Signal handling
//!
//! SIGINT, SIGTERM and SIGHUP cancel the active run instead of killing the
//! process outright. The main thread then shuts the engine down (every
//! channel to zero) and exits with `128 + signal`.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use tracing::info;

use crate::cancel::CancelToken;

/// Exit code used when no signal number is known
const DEFAULT_SIGNAL_EXIT: i32 = 130;

fn signal_name(sig: i32) -> &'static str {
    match sig {
        SIGINT => "SIGINT",
        SIGTERM => "SIGTERM",
        SIGHUP => "SIGHUP",
        _ => "UNKNOWN",
    }
}

/// Shared view of termination signals received by the process.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancelToken,
    received: Arc<AtomicI32>,
}

impl ShutdownSignal {
    /// Unarmed handle; [`ShutdownSignal::trigger`] is the only way to fire it.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when a signal arrives
    pub fn token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Signal number received, if any
    pub fn received(&self) -> Option<i32> {
        match self.received.load(Ordering::SeqCst) {
            0 => None,
            sig => Some(sig),
        }
    }

    /// Process exit code for the received signal (128 + number)
    pub fn exit_code(&self) -> i32 {
        self.received().map_or(DEFAULT_SIGNAL_EXIT, |sig| 128 + sig)
    }

    /// Record `sig` and cancel the token
    pub fn trigger(&self, sig: i32) {
        self.received.store(sig, Ordering::SeqCst);
        self.token.cancel();
    }
}

/// Install the handlers and return the shared handle.
///
/// A background thread waits for signals. The first one cancels the token;
/// cleanup is left to the thread that owns the engine.
pub fn init_signal_handlers() -> Result<ShutdownSignal, std::io::Error> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;
    let shutdown = ShutdownSignal::new();
    let handle = shutdown.clone();

    thread::spawn(move || {
        for sig in signals.forever() {
            info!("Received {} signal, stopping run...", signal_name(sig));
            handle.trigger(sig);
        }
    });

    Ok(shutdown)
}
