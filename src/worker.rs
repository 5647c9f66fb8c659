//! Worker thread owning a forwarder.
//!
//! The forwarder blocks while it reconnects, so producers hand readings to a
//! dedicated thread through a bounded channel instead of calling
//! [`MetricForwarder::send`] themselves. The channel serialises every
//! producer onto the single owner of the connection.

use std::{
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use log::{debug, warn};
use parking_lot::Mutex;

use crate::{
    error::{ForwarderError, SubmitError},
    forwarder::MetricForwarder,
    rate_limited_warner::{DEFAULT_WARN_INTERVAL, DropReason, RateLimitedWarner},
    reading::MetricReading,
};

/// Default bounded channel capacity used by the worker.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
/// Default time to wait for the worker to acknowledge a flush.
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Tuning for [`spawn_worker`].
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub capacity: usize,
    pub flush_timeout: Duration,
    pub warn_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
            warn_interval: DEFAULT_WARN_INTERVAL,
        }
    }
}

impl WorkerConfig {
    /// Override the channel capacity. Zero is raised to one.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_flush_timeout(mut self, timeout: Duration) -> Self {
        self.flush_timeout = timeout;
        self
    }

    pub fn with_warn_interval(mut self, interval: Duration) -> Self {
        self.warn_interval = interval;
        self
    }
}

/// Commands processed by the worker thread.
#[derive(Debug)]
enum ForwarderCommand {
    Reading(MetricReading),
    Flush(Sender<()>),
}

/// Producer side of a running forwarder worker.
///
/// The handle is `Sync`, so several producers may share it behind an `Arc`.
pub struct ForwarderHandle {
    tx: Mutex<Option<Sender<ForwarderCommand>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    warner: RateLimitedWarner,
    flush_timeout: Duration,
}

/// Move `forwarder` onto a dedicated thread fed by a bounded queue.
///
/// # Errors
///
/// Returns [`ForwarderError::Io`] if the thread cannot be spawned.
pub fn spawn_worker(
    forwarder: MetricForwarder,
    config: WorkerConfig,
) -> Result<ForwarderHandle, ForwarderError> {
    let (tx, rx) = bounded(config.capacity.max(1));
    let handle = thread::Builder::new()
        .name("tsdb-forwarder".into())
        .spawn(move || worker_loop(rx, forwarder))?;
    Ok(ForwarderHandle {
        tx: Mutex::new(Some(tx)),
        handle: Mutex::new(Some(handle)),
        warner: RateLimitedWarner::new(config.warn_interval),
        flush_timeout: config.flush_timeout,
    })
}

fn worker_loop(rx: Receiver<ForwarderCommand>, mut forwarder: MetricForwarder) {
    for cmd in rx {
        match cmd {
            ForwarderCommand::Reading(reading) => forwarder.send_reading(&reading),
            ForwarderCommand::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    forwarder.close();
    debug!("Forwarder worker for {:?} exiting", forwarder.target());
}

impl ForwarderHandle {
    /// Queue a reading without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::QueueFull`] when the worker is behind and
    /// [`SubmitError::Closed`] after [`close`](Self::close). Dropped readings
    /// are also reported through rate-limited warnings.
    pub fn submit(&self, reading: MetricReading) -> Result<(), SubmitError> {
        let Some(tx) = self.sender() else {
            self.warner.record(DropReason::Closed);
            return Err(SubmitError::Closed);
        };
        match tx.try_send(ForwarderCommand::Reading(reading)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.warner.record(DropReason::QueueFull);
                Err(SubmitError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.warner.record(DropReason::Closed);
                Err(SubmitError::Closed)
            }
        }
    }

    /// Wait until every reading queued before this call has been processed.
    ///
    /// Returns `false` if the worker is closed or does not acknowledge within
    /// the configured flush timeout.
    pub fn flush(&self) -> bool {
        let Some(tx) = self.sender() else {
            return false;
        };
        self.warner.flush();
        let (ack_tx, ack_rx) = bounded(1);
        if tx
            .send_timeout(ForwarderCommand::Flush(ack_tx), self.flush_timeout)
            .is_err()
        {
            return false;
        }
        ack_rx.recv_timeout(self.flush_timeout).is_ok()
    }

    /// Stop accepting readings, drain the queue and join the worker.
    ///
    /// Blocks for as long as the worker needs to deliver or drop the readings
    /// still queued.
    pub fn close(&self) {
        drop(self.tx.lock().take());
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            warn!("Forwarder worker thread panicked");
        }
    }

    fn sender(&self) -> Option<Sender<ForwarderCommand>> {
        self.tx.lock().as_ref().cloned()
    }
}

impl Drop for ForwarderHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ForwarderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForwarderHandle")
            .field("flush_timeout", &self.flush_timeout)
            .finish()
    }
}
