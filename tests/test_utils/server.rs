//! Minimal line-collecting TCP server.

use std::{
    io::{BufRead, BufReader},
    net::{SocketAddr, TcpListener},
    sync::mpsc,
    thread,
};

/// Accept a single connection and forward each received line.
///
/// Lines keep their trailing newline so tests can compare exact bytes.
pub fn spawn_line_server() -> (SocketAddr, mpsc::Receiver<String>) {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener");
    let addr = listener.local_addr().expect("listener has address");
    let (line_tx, line_rx) = mpsc::channel();
    thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept connection");
        let mut reader = BufReader::new(stream);
        loop {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
            }
        }
    });
    (addr, line_rx)
}

/// Return an address on which nothing is listening.
pub fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener");
    listener.local_addr().expect("listener has address")
}
