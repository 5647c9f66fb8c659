//! Transport primitives for the forwarder.
//!
//! A [`Connector`] opens [`Connection`]s to the configured target. The TCP
//! connector backs production use; the debug sink stands in for it when the
//! forwarder runs in debug mode and writes messages to standard output.

use std::{
    io::{self, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
};

use super::config::{ConnectionTarget, SocketTimeouts};

/// An open transport handle owned by the forwarder.
pub trait Connection: Send {
    /// Write the full buffer and flush it.
    fn send_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Release the handle. Callers treat failures as best effort.
    fn close(&mut self) -> io::Result<()>;
}

/// Opens fresh connections to a target.
pub trait Connector: Send {
    fn connect(&mut self, target: &ConnectionTarget) -> io::Result<Box<dyn Connection>>;
}

/// Produces the writer backing the debug sink.
pub type SinkFactory = Box<dyn Fn() -> Box<dyn Write + Send> + Send>;

/// Sink factory writing to the process's standard output.
pub fn stdout_sink() -> SinkFactory {
    Box::new(|| Box::new(io::stdout()))
}

/// Connects to the target over plain TCP.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpConnector {
    timeouts: SocketTimeouts,
}

impl TcpConnector {
    pub fn new(timeouts: SocketTimeouts) -> Self {
        Self { timeouts }
    }
}

fn socket_addrs(target: &ConnectionTarget) -> io::Result<Vec<SocketAddr>> {
    (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map(|iter| iter.collect())
}

impl Connector for TcpConnector {
    fn connect(&mut self, target: &ConnectionTarget) -> io::Result<Box<dyn Connection>> {
        let mut last_err = None;
        for addr in socket_addrs(target)? {
            match TcpStream::connect_timeout(&addr, self.timeouts.connect) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(Some(self.timeouts.write))?;
                    return Ok(Box::new(TcpConnection { stream }));
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no addresses resolved for {}:{}", target.host, target.port),
            )
        }))
    }
}

/// Live TCP stream to the database.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl Connection for TcpConnection {
    fn send_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)?;
        self.stream.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Debug stand-in that writes messages to a local writer.
pub struct DebugConnection {
    writer: Box<dyn Write + Send>,
}

impl DebugConnection {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self { writer }
    }
}

impl Connection for DebugConnection {
    fn send_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf)?;
        self.writer.flush()
    }

    fn close(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl std::fmt::Debug for DebugConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugConnection").finish_non_exhaustive()
    }
}
