//! The connection manager and send path.

use std::io;

use log::{debug, error, info};

use crate::{
    error::ForwarderError,
    naming::StatNamer,
    reading::{MetricReading, MetricValue, format_put},
};

use super::{
    backoff::{BackoffState, Sleeper},
    config::{ConnectionTarget, RetryPolicy},
    transport::{Connection, Connector, DebugConnection, SinkFactory},
};

/// Forwards metric readings to OpenTSDB as `put` commands.
///
/// The forwarder owns a single connection which it replaces whenever a write
/// fails. All operations block the calling thread, including the sleeps
/// between connection attempts, so a forwarder should be driven by a thread
/// dedicated to it (see [`spawn_worker`](crate::spawn_worker)).
pub struct MetricForwarder {
    target: ConnectionTarget,
    policy: RetryPolicy,
    tags: String,
    namer: Box<dyn StatNamer>,
    connector: Box<dyn Connector>,
    debug_sink: SinkFactory,
    sleeper: Box<dyn Sleeper>,
    connection: Option<Box<dyn Connection>>,
}

/// Everything needed to assemble a forwarder, produced by the builder.
pub(crate) struct ForwarderParts {
    pub target: ConnectionTarget,
    pub policy: RetryPolicy,
    pub tags: String,
    pub namer: Box<dyn StatNamer>,
    pub connector: Box<dyn Connector>,
    pub debug_sink: SinkFactory,
    pub sleeper: Box<dyn Sleeper>,
}

impl MetricForwarder {
    pub(crate) fn from_parts(parts: ForwarderParts) -> Self {
        Self {
            target: parts.target,
            policy: parts.policy,
            tags: parts.tags,
            namer: parts.namer,
            connector: parts.connector,
            debug_sink: parts.debug_sink,
            sleeper: parts.sleeper,
            connection: None,
        }
    }

    pub fn target(&self) -> &ConnectionTarget {
        &self.target
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Tag suffix appended to every message; empty when no tags are set.
    pub fn tags(&self) -> &str {
        &self.tags
    }

    /// Whether a transport handle is currently held.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Establish a connection, retrying with backoff until the attempt bound.
    ///
    /// In debug mode the debug sink is bound immediately without touching
    /// the network.
    ///
    /// # Errors
    ///
    /// Returns [`ForwarderError::ConnectionExhausted`] once every permitted
    /// attempt has failed.
    pub fn connect(&mut self) -> Result<(), ForwarderError> {
        if self.target.debug {
            debug!("Connected the debug sink");
            self.connection = Some(Box::new(DebugConnection::new((self.debug_sink)())));
            return Ok(());
        }

        let limit = self.policy.attempt_limit();
        let mut backoff = BackoffState::new(&self.policy);
        let mut attempt: u64 = 0;
        loop {
            attempt += 1;
            match self.connector.connect(&self.target) {
                Ok(connection) => {
                    info!(
                        "Connected to OpenTSDB at {}:{}",
                        self.target.host, self.target.port
                    );
                    self.connection = Some(connection);
                    return Ok(());
                }
                Err(err) => {
                    error!(
                        "Failed to connect to {}:{} (attempt {attempt} of {}): {err}",
                        self.target.host,
                        self.target.port,
                        describe_limit(self.policy.max_attempts.map(|n| n.get())),
                    );
                    if attempt >= limit {
                        return Err(ForwarderError::ConnectionExhausted {
                            host: self.target.host.clone(),
                            port: self.target.port,
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let delay = backoff.current();
                    if !delay.is_zero() {
                        self.sleeper.sleep(delay);
                        backoff.advance();
                    }
                }
            }
        }
    }

    /// Close the current connection and establish a new one.
    ///
    /// # Errors
    ///
    /// Fails exactly as [`connect`](Self::connect) does.
    pub fn reconnect(&mut self) -> Result<(), ForwarderError> {
        self.close();
        self.connect()
    }

    /// Release the current connection. Close failures are logged and ignored.
    pub fn close(&mut self) {
        if let Some(mut connection) = self.connection.take()
            && let Err(err) = connection.close()
        {
            debug!("Ignoring error while closing OpenTSDB connection: {err}");
        }
    }

    /// Format and transmit one reading.
    ///
    /// Every failed write triggers a reconnect. Writes and failed reconnects
    /// share one attempt budget; when it runs out the message is dropped and
    /// logged at error level. Delivery is best effort and never reported to
    /// the caller.
    pub fn send(
        &mut self,
        host: &str,
        name: &str,
        value: impl Into<MetricValue>,
        timestamp: i64,
    ) {
        let statname = self.namer.statname(host, name);
        let message = format_put(&statname, timestamp, value.into(), &self.tags);
        for _ in 0..self.policy.attempt_limit() {
            match self.write(message.as_bytes()) {
                Ok(()) => return,
                Err(err) => {
                    error!("Failed to send data to OpenTSDB server: {err}");
                    if let Err(err) = self.reconnect() {
                        error!("Failed to reconnect to OpenTSDB server: {err}");
                    }
                }
            }
        }
        error!("Dropping message {}", message.trim_end());
    }

    /// Convenience wrapper around [`send`](Self::send) for pipeline readings.
    pub fn send_reading(&mut self, reading: &MetricReading) {
        self.send(
            &reading.host,
            &reading.name,
            reading.value,
            reading.timestamp,
        );
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.connection.as_mut() {
            Some(connection) => connection.send_all(buf),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "no active connection",
            )),
        }
    }
}

fn describe_limit(max_attempts: Option<u32>) -> String {
    max_attempts.map_or_else(|| "unbounded".to_owned(), |n| n.to_string())
}

impl Drop for MetricForwarder {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for MetricForwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricForwarder")
            .field("target", &self.target)
            .field("policy", &self.policy)
            .field("tags", &self.tags)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}
