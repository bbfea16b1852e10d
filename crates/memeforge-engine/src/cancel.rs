use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Cooperative cancellation shared between a caller and a blocking run.
///
/// `sleep` parks on a condition variable, so a cancel wakes pollers
/// immediately instead of after their interval. An optional deadline makes
/// the token cancel itself once reached.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: Mutex<bool>,
    wake: Condvar,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CancelInner {
                cancelled: Mutex::new(false),
                wake: Condvar::new(),
                deadline: Instant::now().checked_add(timeout),
            }),
        }
    }

    pub fn cancel(&self) {
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *cancelled = true;
        self.inner.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        if self.deadline_passed() {
            return true;
        }
        *self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Time left before the deadline, if one was set.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Sleeps for `duration` unless cancelled first.
    ///
    /// Returns `false` when the sleep was cut short by cancellation or the
    /// deadline.
    pub fn sleep(&self, duration: Duration) -> bool {
        let wake_at = Instant::now() + duration;
        let mut cancelled = self
            .inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        loop {
            if *cancelled || self.deadline_passed() {
                return false;
            }
            let now = Instant::now();
            if now >= wake_at {
                return true;
            }
            let mut wait = wake_at - now;
            if let Some(remaining) = self.remaining() {
                wait = wait.min(remaining);
            }
            let (guard, _) = self
                .inner
                .wake
                .wait_timeout(cancelled, wait)
                .unwrap_or_else(PoisonError::into_inner);
            cancelled = guard;
        }
    }

    /// Caps a per-request timeout so it never outlives the deadline.
    pub fn clamp_timeout(&self, timeout: Duration) -> Duration {
        match self.remaining() {
            Some(remaining) => timeout.min(remaining.max(Duration::from_millis(1))),
            None => timeout,
        }
    }

    fn deadline_passed(&self) -> bool {
        self.inner
            .deadline
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }
}
