//! Error types surfaced by the forwarder.

use std::io;

use thiserror::Error;

/// Errors that may occur while configuring or connecting a forwarder.
#[derive(Debug, Error)]
pub enum ForwarderError {
    /// Every permitted connection attempt failed.
    #[error("failed to connect to {host}:{port} after {attempts} attempts: {source}")]
    ConnectionExhausted {
        host: String,
        port: u16,
        attempts: u64,
        #[source]
        source: io::Error,
    },
    /// Invalid user supplied configuration.
    #[error("invalid forwarder configuration: {0}")]
    InvalidConfig(String),
    /// Underlying I/O error whilst reading configuration.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Errors returned when handing a reading to the worker thread.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// The bounded queue is full; the reading was dropped.
    #[error("forwarder queue is full")]
    QueueFull,
    /// The worker has shut down; the reading was dropped.
    #[error("forwarder worker is closed")]
    Closed,
}
