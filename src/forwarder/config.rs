//! Connection target and retry policy consumed by the forwarder lifecycle.
//!
//! [`ForwarderBuilder`](super::ForwarderBuilder) validates raw options and
//! constructs these values before handing them to
//! [`MetricForwarder`](super::MetricForwarder).

use std::{num::NonZeroU32, time::Duration};

/// Default OpenTSDB host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default OpenTSDB telnet-style listener port.
pub const DEFAULT_PORT: u16 = 4242;
/// Default number of connection or send attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 60;
/// Default delay before the first reconnection retry.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
/// Default multiplier applied to the delay after each failed attempt.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.5;
/// Default upper bound on the retry delay.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(60);
/// Default timeout applied when establishing sockets.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default timeout applied to socket writes.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Destination of the forwarded metrics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    /// Write messages to the debug sink instead of opening a socket.
    pub debug: bool,
}

impl Default for ConnectionTarget {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            debug: false,
        }
    }
}

/// Bounded retry policy with exponential backoff.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Attempt bound shared by connecting and sending; `None` is unbounded.
    pub max_attempts: Option<NonZeroU32>,
    pub initial_delay: Duration,
    /// Multiplier applied after each failure; `0.0` keeps the delay fixed.
    pub backoff_factor: f64,
    /// Clamp applied after growth; `None` lets the delay grow without limit.
    pub max_delay: Option<Duration>,
}

impl RetryPolicy {
    /// Total attempts permitted, with unbounded policies mapped to `u64::MAX`.
    pub fn attempt_limit(&self) -> u64 {
        self.max_attempts.map_or(u64::MAX, |n| u64::from(n.get()))
    }

    /// Interpret a raw attempt count, treating non-positive values as unbounded.
    pub fn attempts_from_raw(raw: i64) -> Option<NonZeroU32> {
        if raw <= 0 {
            return None;
        }
        NonZeroU32::new(u32::try_from(raw).unwrap_or(u32::MAX))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroU32::new(DEFAULT_MAX_ATTEMPTS),
            initial_delay: DEFAULT_RECONNECT_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: Some(DEFAULT_BACKOFF_MAX),
        }
    }
}

/// Socket level timeouts used by the TCP connector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketTimeouts {
    pub connect: Duration,
    pub write: Duration,
}

impl Default for SocketTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            write: DEFAULT_WRITE_TIMEOUT,
        }
    }
}
