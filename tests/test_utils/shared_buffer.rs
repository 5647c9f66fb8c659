//! Shared buffer used to capture debug-sink output.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

/// Thread-safe wrapper around a byte buffer handed to the debug sink.
///
/// Each clone appends to the same buffer, so a sink factory can hand out
/// fresh clones while the test keeps one to read from.
#[derive(Clone, Default)]
pub struct SharedBuf {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuf {
    /// Return the buffer contents as UTF-8.
    pub fn contents(&self) -> String {
        let bytes = self.buffer.lock().expect("SharedBuf mutex poisoned").clone();
        String::from_utf8(bytes).expect("Buffer contains invalid UTF-8")
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer
            .lock()
            .expect("SharedBuf mutex poisoned")
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
