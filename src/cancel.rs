//! Cooperative cancellation for runs.
//!
//! A run checks its token between steps and polls it while waiting out a
//! delay, so a cancel request lands within one poll interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How often a delay wait looks at the token
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A wait was cut short by cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled {
    /// Time actually waited
    pub waited: Duration,
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Block for `duration`, returning early if cancelled.
    pub fn wait(&self, duration: Duration) -> Result<(), Cancelled> {
        let start = Instant::now();
        loop {
            if self.is_cancelled() {
                return Err(Cancelled {
                    waited: start.elapsed(),
                });
            }
            let elapsed = start.elapsed();
            if elapsed >= duration {
                return Ok(());
            }
            std::thread::sleep(POLL_INTERVAL.min(duration - elapsed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_runs_full_duration() {
        let token = CancelToken::new();
        let start = Instant::now();
        assert!(token.wait(Duration::from_millis(250)).is_ok());
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[test]
    fn test_cancel_interrupts_wait() {
        let token = CancelToken::new();
        let remote = token.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(150));
            remote.cancel();
        });

        let start = Instant::now();
        let err = token.wait(Duration::from_secs(3600)).unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert!(err.waited >= Duration::from_millis(100));
        canceller.join().unwrap();
    }

    #[test]
    fn test_already_cancelled_returns_immediately() {
        let token = CancelToken::new();
        token.cancel();
        assert!(token.wait(Duration::ZERO).is_err());
        assert!(token.is_cancelled());
    }
}
