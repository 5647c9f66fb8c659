//! Exponential backoff state machine used while (re)connecting.

use std::{thread, time::Duration};

use super::config::RetryPolicy;

/// Blocks the calling thread between connection attempts.
pub trait Sleeper: Send {
    fn sleep(&mut self, delay: Duration);
}

/// Sleeper backed by [`std::thread::sleep`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, delay: Duration) {
        thread::sleep(delay);
    }
}

/// Tracks the delay to wait before the next attempt of a connect loop.
///
/// A fresh state is created for every call to `connect`, so each loop starts
/// again from the policy's initial delay.
#[derive(Debug)]
pub struct BackoffState<'a> {
    policy: &'a RetryPolicy,
    current: Duration,
}

impl<'a> BackoffState<'a> {
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            current: policy.initial_delay,
            policy,
        }
    }

    /// Delay to sleep before the next attempt.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Grow the delay by the backoff factor, then clamp it to the cap.
    ///
    /// A zero factor leaves the delay untouched, cap included.
    pub fn advance(&mut self) {
        if self.policy.backoff_factor == 0.0 {
            return;
        }
        let grown = self.current.as_secs_f64() * self.policy.backoff_factor;
        self.current = Duration::try_from_secs_f64(grown).unwrap_or(Duration::MAX);
        if let Some(cap) = self.policy.max_delay {
            self.current = self.current.min(cap);
        }
    }
}
