//! OpenTSDB metric forwarder.
//!
//! This module defines [`MetricForwarder`], which formats readings as `put`
//! commands and writes them to a persistent TCP connection. The forwarder
//! reconnects with bounded exponential backoff whenever a write fails and
//! drops a message, with an error log, only after its attempt budget runs
//! out. Debug mode swaps the socket for a sink that writes to standard
//! output.

mod backoff;
mod builder;
mod client;
mod config;
mod transport;

#[cfg(test)]
mod tests;

pub use backoff::{Sleeper, ThreadSleeper};
pub use builder::ForwarderBuilder;
pub use client::MetricForwarder;
pub use config::{
    ConnectionTarget, DEFAULT_BACKOFF_FACTOR, DEFAULT_BACKOFF_MAX, DEFAULT_HOST,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_PORT, DEFAULT_RECONNECT_DELAY, RetryPolicy, SocketTimeouts,
};
pub use transport::{
    Connection, Connector, DebugConnection, SinkFactory, TcpConnection, TcpConnector,
    stdout_sink,
};
