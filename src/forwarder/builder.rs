//! Builder for [`MetricForwarder`](super::MetricForwarder).
//!
//! Collects the target, retry and tag options, validates them, and performs
//! the initial connection. The transport, sleeper, debug sink and namer can be
//! swapped out so that hosts and tests control every side effect.

use std::{io::Write, time::Duration};

use crate::{
    error::ForwarderError,
    naming::{HostNamer, StatNamer},
    reading::join_tags,
};

use super::{
    backoff::{Sleeper, ThreadSleeper},
    client::{ForwarderParts, MetricForwarder},
    config::{ConnectionTarget, RetryPolicy, SocketTimeouts},
    transport::{Connector, SinkFactory, TcpConnector, stdout_sink},
};

macro_rules! ensure_non_negative {
    ($value:expr, $field:expr) => {{
        if !$value.is_finite() || $value < 0.0 {
            Err(ForwarderError::InvalidConfig(format!(
                "{} must be a finite, non-negative number",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if !$value.is_finite() || $value <= 0.0 {
            Err(ForwarderError::InvalidConfig(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

fn secs_to_duration(secs: f64, field: &str) -> Result<Duration, ForwarderError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ForwarderError::InvalidConfig(format!("{field} is out of range")))
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

/// Builder for constructing connected [`MetricForwarder`] instances.
#[derive(Default)]
pub struct ForwarderBuilder {
    host: Option<String>,
    port: Option<u16>,
    debug: bool,
    max_attempts: Option<i64>,
    reconnect_delay_secs: Option<f64>,
    backoff_factor: Option<f64>,
    backoff_max_secs: Option<f64>,
    connect_timeout_secs: Option<f64>,
    write_timeout_secs: Option<f64>,
    tags: Vec<String>,
    namer: Option<Box<dyn StatNamer>>,
    connector: Option<Box<dyn Connector>>,
    sleeper: Option<Box<dyn Sleeper>>,
    debug_sink: Option<SinkFactory>,
}

impl ForwarderBuilder {
    /// Create a builder targeting the default OpenTSDB endpoint.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward to `host:port` over TCP.
    pub fn with_target(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    /// Write messages to the debug sink instead of opening sockets.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    option_setter!(
        #[doc = "Bound connection and send attempts; zero or negative is unbounded."]
        with_max_attempts,
        max_attempts,
        i64
    );
    option_setter!(
        #[doc = "Seconds to wait before the first reconnection retry."]
        with_reconnect_delay_secs,
        reconnect_delay_secs,
        f64
    );
    option_setter!(
        #[doc = "Multiplier applied to the delay after each failure; zero disables growth."]
        with_backoff_factor,
        backoff_factor,
        f64
    );
    option_setter!(
        #[doc = "Upper bound on the delay in seconds; zero disables the clamp."]
        with_backoff_max_secs,
        backoff_max_secs,
        f64
    );
    option_setter!(with_connect_timeout_secs, connect_timeout_secs, f64);
    option_setter!(with_write_timeout_secs, write_timeout_secs, f64);

    /// Static tag tokens appended to every message.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the default [`HostNamer`].
    pub fn with_namer(mut self, namer: impl StatNamer + 'static) -> Self {
        self.namer = Some(Box::new(namer));
        self
    }

    /// Replace the TCP connector.
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Box::new(connector));
        self
    }

    /// Replace the thread sleeper used between connection attempts.
    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Some(Box::new(sleeper));
        self
    }

    /// Direct debug-mode output somewhere other than standard output.
    pub fn with_debug_sink<F, W>(mut self, factory: F) -> Self
    where
        F: Fn() -> W + Send + 'static,
        W: Write + Send + 'static,
    {
        self.debug_sink = Some(Box::new(move || -> Box<dyn Write + Send> {
            Box::new(factory())
        }));
        self
    }

    fn validate_target(&self) -> Result<ConnectionTarget, ForwarderError> {
        let defaults = ConnectionTarget::default();
        let host = self.host.clone().unwrap_or(defaults.host);
        let port = self.port.unwrap_or(defaults.port);
        if !self.debug {
            if host.trim().is_empty() {
                return Err(ForwarderError::InvalidConfig(
                    "target host must not be empty".into(),
                ));
            }
            if port == 0 {
                return Err(ForwarderError::InvalidConfig(
                    "target port must be greater than zero".into(),
                ));
            }
        }
        Ok(ConnectionTarget {
            host,
            port,
            debug: self.debug,
        })
    }

    fn validate_policy(&self) -> Result<RetryPolicy, ForwarderError> {
        let mut policy = RetryPolicy::default();
        if let Some(raw) = self.max_attempts {
            policy.max_attempts = RetryPolicy::attempts_from_raw(raw);
        }
        if let Some(delay) = self.reconnect_delay_secs {
            let delay = ensure_non_negative!(delay, "reconnect_delay")?;
            policy.initial_delay = secs_to_duration(delay, "reconnect_delay")?;
        }
        if let Some(factor) = self.backoff_factor {
            policy.backoff_factor = ensure_non_negative!(factor, "backoff_factor")?;
        }
        if let Some(cap) = self.backoff_max_secs {
            let cap = ensure_non_negative!(cap, "backoff_max")?;
            policy.max_delay = if cap > 0.0 {
                Some(secs_to_duration(cap, "backoff_max")?)
            } else {
                None
            };
        }
        Ok(policy)
    }

    fn validate_timeouts(&self) -> Result<SocketTimeouts, ForwarderError> {
        let mut timeouts = SocketTimeouts::default();
        if let Some(secs) = self.connect_timeout_secs {
            let secs = ensure_positive!(secs, "connect_timeout")?;
            timeouts.connect = secs_to_duration(secs, "connect_timeout")?;
        }
        if let Some(secs) = self.write_timeout_secs {
            let secs = ensure_positive!(secs, "write_timeout")?;
            timeouts.write = secs_to_duration(secs, "write_timeout")?;
        }
        Ok(timeouts)
    }

    fn validate_tags(&self) -> Result<String, ForwarderError> {
        for tag in &self.tags {
            if tag.is_empty() || tag.chars().any(char::is_whitespace) {
                return Err(ForwarderError::InvalidConfig(format!(
                    "tag {tag:?} must be a non-empty token without whitespace"
                )));
            }
        }
        Ok(join_tags(&self.tags))
    }

    /// Validate the options and assemble an unconnected forwarder.
    pub(crate) fn build_disconnected(self) -> Result<MetricForwarder, ForwarderError> {
        let target = self.validate_target()?;
        let policy = self.validate_policy()?;
        let timeouts = self.validate_timeouts()?;
        let tags = self.validate_tags()?;
        Ok(MetricForwarder::from_parts(ForwarderParts {
            target,
            policy,
            tags,
            namer: self.namer.unwrap_or_else(|| Box::new(HostNamer::new())),
            connector: self
                .connector
                .unwrap_or_else(|| Box::new(TcpConnector::new(timeouts))),
            debug_sink: self.debug_sink.unwrap_or_else(stdout_sink),
            sleeper: self.sleeper.unwrap_or_else(|| Box::new(ThreadSleeper)),
        }))
    }

    /// Build the forwarder and establish its initial connection.
    ///
    /// # Errors
    ///
    /// Returns [`ForwarderError::InvalidConfig`] for rejected options and
    /// [`ForwarderError::ConnectionExhausted`] when the initial connection
    /// cannot be established. Either is fatal for the caller.
    pub fn build(self) -> Result<MetricForwarder, ForwarderError> {
        let mut forwarder = self.build_disconnected()?;
        forwarder.connect()?;
        Ok(forwarder)
    }
}

impl std::fmt::Debug for ForwarderBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwarderBuilder")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("debug", &self.debug)
            .field("max_attempts", &self.max_attempts)
            .field("reconnect_delay_secs", &self.reconnect_delay_secs)
            .field("backoff_factor", &self.backoff_factor)
            .field("backoff_max_secs", &self.backoff_max_secs)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}
