//! Cooperative cancellation and deadline primitives.
//!
//! Adapted from `spark_core::contract::{Cancellation, Deadline}`: an
//! `Arc<AtomicBool>` cancellation flag shareable across a connection's
//! tasks, and a deadline expressed against a monotonic clock rather than
//! wall time. The teacher's `MonotonicTimePoint` newtype is dropped in
//! favour of `std::time::Instant` directly — this engine only ever runs
//! under a real OS clock, so the abstraction the teacher needed for
//! deterministic/loom testing has no payoff here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation token. Cloning shares the same underlying
/// flag; `cancel` is idempotent and reports whether it was the first to
/// fire.
#[derive(Clone, Debug)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns `true` if this call was the one that flipped the flag.
    pub fn cancel(&self) -> bool {
        let first = self
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            tracing::debug!(target: "roc_core::contract", "cancellation token fired");
        }
        first
    }

    /// Derived token sharing the same flag, for handing to child tasks.
    pub fn child(&self) -> Self {
        self.clone()
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

/// An absolute point in time after which an operation must give up.
/// Checked against an `Instant` supplied by the caller rather than read
/// internally, so a single `now()` snapshot can be reused across many
/// checks in one scheduling turn.
#[derive(Clone, Copy, Debug)]
pub struct Deadline {
    instant: Option<Instant>,
}

impl Deadline {
    pub const fn none() -> Self {
        Self { instant: None }
    }

    pub fn at(instant: Instant) -> Self {
        Self {
            instant: Some(instant),
        }
    }

    pub fn with_timeout(now: Instant, timeout: Duration) -> Self {
        Self::at(now + timeout)
    }

    pub fn instant(&self) -> Option<Instant> {
        self.instant
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.instant, Some(deadline) if now >= deadline)
    }

    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.instant.map(|deadline| deadline.saturating_duration_since(now))
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reports_first_caller_only() {
        let token = Cancellation::new();
        assert!(token.cancel());
        assert!(!token.cancel());
        assert!(token.is_cancelled());
    }

    #[test]
    fn child_shares_flag() {
        let token = Cancellation::new();
        let child = token.child();
        token.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn deadline_none_never_expires() {
        let deadline = Deadline::none();
        assert!(!deadline.is_expired(Instant::now()));
    }

    #[test]
    fn deadline_with_timeout_expires() {
        let now = Instant::now();
        let deadline = Deadline::with_timeout(now, Duration::from_millis(10));
        assert!(!deadline.is_expired(now));
        assert!(deadline.is_expired(now + Duration::from_millis(20)));
    }
}
