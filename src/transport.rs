//! Byte-oriented serial transport with line-buffered reads.
//!
//! The protocol layer only needs two operations from its transport: write a
//! newline-terminated line, and read one line back with a deadline. The
//! [`LineTransport`] trait captures exactly that, so tests can substitute an
//! in-memory double (see [`crate::mock::MockTransport`]) for the real port.
//!
//! A timed-out read is an expected outcome for this hardware (it is how
//! echo draining finishes), so `read_line` reports it as `Ok(None)` rather
//! than an error; only genuine I/O failures surface as `Err`.

use std::io;
use std::time::Duration;

/// A line-oriented, blocking transport to the device.
pub trait LineTransport {
    /// Writes `line` followed by a newline terminator.
    fn send_line(&mut self, line: &str) -> io::Result<()>;

    /// Reads one line, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when no complete line arrived within the deadline.
    /// The line is returned without its trailing `\n` (or `\r\n`).
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>>;
}

#[cfg(feature = "instrument_serial")]
pub use serial::SerialTransport;

#[cfg(feature = "instrument_serial")]
mod serial {
    use super::*;
    use log::trace;
    use serialport::SerialPort;
    use std::io::{Read, Write};
    use std::time::Instant;

    /// Poll interval for the underlying port; the line deadline is enforced
    /// here, not by the port timeout.
    const POLL: Duration = Duration::from_millis(50);

    /// Blocking serial transport over a `serialport` handle.
    ///
    /// Bytes read past a newline stay in the internal buffer for the next
    /// call, so a command never observes a partial line left over from the
    /// previous one.
    pub struct SerialTransport {
        port: Box<dyn SerialPort>,
        pending: Vec<u8>,
    }

    impl SerialTransport {
        /// Opens `path` at `baud_rate` with the usual 8N1, no flow control.
        pub fn open(path: &str, baud_rate: u32) -> io::Result<Self> {
            let port = serialport::new(path, baud_rate)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::None)
                .timeout(POLL)
                .open()
                .map_err(io::Error::from)?;
            Ok(Self {
                port,
                pending: Vec::new(),
            })
        }

        /// Wraps an already-open port (used by the discovery tooling).
        pub fn from_port(port: Box<dyn SerialPort>) -> Self {
            Self {
                port,
                pending: Vec::new(),
            }
        }

        fn take_line(&mut self) -> Option<String> {
            let pos = self.pending.iter().position(|&b| b == b'\n')?;
            let mut raw: Vec<u8> = self.pending.drain(..=pos).collect();
            raw.pop();
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            Some(String::from_utf8_lossy(&raw).into_owned())
        }
    }

    impl LineTransport for SerialTransport {
        fn send_line(&mut self, line: &str) -> io::Result<()> {
            trace!("tx: '{}'", line.escape_default());
            self.port.write_all(line.as_bytes())?;
            self.port.write_all(b"\n")?;
            self.port.flush()
        }

        fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
            let deadline = Instant::now() + timeout;
            let mut chunk = [0u8; 256];

            loop {
                if let Some(line) = self.take_line() {
                    trace!("rx: '{}'", line.escape_default());
                    return Ok(Some(line));
                }
                if Instant::now() >= deadline {
                    return Ok(None);
                }
                match self.port.read(&mut chunk) {
                    Ok(0) => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "serial port closed",
                        ))
                    }
                    Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                    Err(e)
                        if e.kind() == io::ErrorKind::TimedOut
                            || e.kind() == io::ErrorKind::WouldBlock =>
                    {
                        // Port poll expired; loop re-checks the line deadline.
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}
