//! Throttled reporting of readings the worker queue refused.
//!
//! Producers can hit a full or closed queue thousands of times a second, so
//! drops are tallied per cause and summarised in at most one warning per
//! interval.

use std::time::{Duration, Instant};

use log::warn;
use parking_lot::Mutex;

/// Default interval between warnings about dropped readings.
pub const DEFAULT_WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Source of monotonic time, replaceable in tests.
pub type Clock = Box<dyn Fn() -> Instant + Send + Sync>;

/// Why a reading never reached the worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    QueueFull,
    Closed,
}

/// Drops accumulated since the last warning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DropTally {
    pub queue_full: u64,
    pub closed: u64,
}

impl DropTally {
    pub fn total(&self) -> u64 {
        self.queue_full.saturating_add(self.closed)
    }

    fn bump(&mut self, reason: DropReason) {
        let slot = match reason {
            DropReason::QueueFull => &mut self.queue_full,
            DropReason::Closed => &mut self.closed,
        };
        *slot = slot.saturating_add(1);
    }
}

#[derive(Default)]
struct WarnState {
    pending: DropTally,
    last_report: Option<Instant>,
}

/// Summarises dropped readings in one warning per interval.
///
/// The first drop is reported straight away. Later drops are held until the
/// interval since the previous report has elapsed, or until [`flush`] is
/// called.
///
/// [`flush`]: RateLimitedWarner::flush
pub struct RateLimitedWarner {
    interval: Duration,
    clock: Clock,
    state: Mutex<WarnState>,
}

impl RateLimitedWarner {
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, Box::new(Instant::now))
    }

    pub fn with_clock(interval: Duration, clock: Clock) -> Self {
        Self {
            interval,
            clock,
            state: Mutex::new(WarnState::default()),
        }
    }

    /// Count one dropped reading and warn if the interval allows it.
    ///
    /// Returns the tally that was reported, if any.
    pub fn record(&self, reason: DropReason) -> Option<DropTally> {
        let now = (self.clock)();
        let mut state = self.state.lock();
        state.pending.bump(reason);
        let due = state
            .last_report
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if !due {
            return None;
        }
        Some(Self::report(&mut state, now))
    }

    /// Warn about every pending drop regardless of the interval.
    pub fn flush(&self) -> Option<DropTally> {
        let now = (self.clock)();
        let mut state = self.state.lock();
        if state.pending.total() == 0 {
            return None;
        }
        Some(Self::report(&mut state, now))
    }

    fn report(state: &mut WarnState, now: Instant) -> DropTally {
        let tally = std::mem::take(&mut state.pending);
        state.last_report = Some(now);
        warn!(
            "Forwarder dropped {} readings ({} queue full, {} closed)",
            tally.total(),
            tally.queue_full,
            tally.closed
        );
        tally
    }
}

impl Default for RateLimitedWarner {
    fn default() -> Self {
        Self::new(DEFAULT_WARN_INTERVAL)
    }
}
