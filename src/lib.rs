//! Forward metric readings to OpenTSDB over its line protocol.
//!
//! A [`MetricForwarder`] turns `(host, name, value, timestamp)` tuples into
//! `put` commands and writes them to a persistent TCP connection,
//! reconnecting with bounded exponential backoff when writes fail. Build one
//! with [`ForwarderBuilder`], optionally from an INI file, and either drive
//! it directly or hand it to [`spawn_worker`] so producers never block on
//! the network.

mod error;
mod file_config;
pub mod forwarder;
pub mod naming;
pub mod rate_limited_warner;
pub mod reading;
mod worker;

pub use error::{ForwarderError, SubmitError};
pub use forwarder::{
    ConnectionTarget, ForwarderBuilder, MetricForwarder, RetryPolicy, Sleeper, ThreadSleeper,
};
pub use naming::{HostNamer, StatNamer};
pub use reading::{MetricReading, MetricValue};
pub use worker::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_FLUSH_TIMEOUT, ForwarderHandle, WorkerConfig, spawn_worker,
};

/// Shared capture logger for unit tests. `logtest::Logger::start` installs a
/// process-global logger and panics if called twice, so every test that
/// captures logs goes through this once-only initialiser instead.
#[cfg(test)]
pub(crate) fn test_logger() -> logtest::Logger {
    static START: std::sync::Once = std::sync::Once::new();
    START.call_once(|| {
        logtest::Logger::start();
    });
    let mut logger = logtest::Logger;
    // Discard records captured before this test began, matching the empty
    // queue a freshly started logger would have.
    while logger.pop().is_some() {}
    logger
}
