//! Line-oriented serial transport.
//!
//! All four instrument families speak ASCII command/response over a serial
//! line. A [`Transport`] is the byte-level half of that exchange: it frames
//! outgoing commands with the family's [`LineTerminator`] and returns reply
//! lines with the delimiter stripped.
//!
//! # Silence is not an error
//!
//! [`Transport::read_line`] returns an **empty** buffer when the timeout
//! expires with no complete line. Protocols decide what silence means.
//!
//! # Backends
//!
//! - [`SerialOpener`]: real hardware through the `serialport` crate
//! - `urashg_driver_mock::MockBackend`: simulated devices for tests and
//!   offline bring-up

use crate::descriptor::{ConnectionDescriptor, DataBits, Parity, StopBits};
use crate::error::{AppResult, DaqError};
use serialport::{ClearBuffer, SerialPort};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// =============================================================================
// Line framing
// =============================================================================

/// Terminator appended to every outgoing command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTerminator {
    /// `\r`
    Cr,
    /// `\n`
    Lf,
    /// `\r\n`
    CrLf,
}

impl LineTerminator {
    /// Terminator bytes.
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            LineTerminator::Cr => b"\r",
            LineTerminator::Lf => b"\n",
            LineTerminator::CrLf => b"\r\n",
        }
    }

    /// `line` followed by this terminator.
    pub fn frame(self, line: &[u8]) -> Vec<u8> {
        let mut framed = Vec::with_capacity(line.len() + 2);
        framed.extend_from_slice(line);
        framed.extend_from_slice(self.as_bytes());
        framed
    }
}

/// Split one reply line off the front of `pending`.
///
/// Replies are delimited by `\n`. A trailing `\r` is dropped so `\r\n`
/// devices read the same as `\n` devices.
pub fn take_line(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let end = pending.iter().position(|&b| b == b'\n')?;
    let mut line: Vec<u8> = pending.drain(..=end).collect();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(line)
}

// =============================================================================
// Transport contract
// =============================================================================

/// One open, exclusively owned serial connection.
pub trait Transport: Send {
    /// Write `line` followed by the terminator.
    ///
    /// A broken pipe surfaces as [`DaqError::Io`].
    fn write_line(&mut self, line: &[u8]) -> AppResult<()>;

    /// Block up to `timeout` for one reply line, delimiter excluded.
    ///
    /// Returns an empty buffer on timeout.
    fn read_line(&mut self, timeout: Duration) -> AppResult<Vec<u8>>;

    /// Discard any bytes already received.
    fn clear_input(&mut self) -> AppResult<()>;

    /// Release the underlying port. Calling it again does nothing.
    fn close(&mut self);
}

/// Opens transports for a connection descriptor.
pub trait TransportFactory: Send + Sync {
    /// Open the port named by `descriptor`.
    ///
    /// A missing, busy or inaccessible port is [`DaqError::Connection`].
    fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        terminator: LineTerminator,
    ) -> AppResult<Box<dyn Transport>>;
}

// =============================================================================
// Real hardware
// =============================================================================

/// Opens real serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialOpener;

impl TransportFactory for SerialOpener {
    fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        terminator: LineTerminator,
    ) -> AppResult<Box<dyn Transport>> {
        let port = serialport::new(&descriptor.port, descriptor.baud_rate)
            .data_bits(match descriptor.data_bits {
                DataBits::Seven => serialport::DataBits::Seven,
                DataBits::Eight => serialport::DataBits::Eight,
            })
            .parity(match descriptor.parity {
                Parity::None => serialport::Parity::None,
                Parity::Odd => serialport::Parity::Odd,
                Parity::Even => serialport::Parity::Even,
            })
            .stop_bits(match descriptor.stop_bits {
                StopBits::One => serialport::StopBits::One,
                StopBits::Two => serialport::StopBits::Two,
            })
            .flow_control(serialport::FlowControl::None)
            .timeout(descriptor.timeout())
            .open()
            .map_err(|e| DaqError::connection(&descriptor.port, e.to_string()))?;

        debug!(port = %descriptor.port, baud = descriptor.baud_rate, "Opened serial port");
        Ok(Box::new(SerialTransport {
            port: Some(port),
            name: descriptor.port.clone(),
            terminator,
            pending: Vec::new(),
        }))
    }
}

/// [`Transport`] over a `serialport` handle.
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
    terminator: LineTerminator,
    pending: Vec<u8>,
}

impl SerialTransport {
    fn port_mut(&mut self) -> AppResult<&mut Box<dyn SerialPort>> {
        let name = &self.name;
        self.port.as_mut().ok_or_else(|| DaqError::NotConnected {
            device: name.clone(),
        })
    }
}

impl Transport for SerialTransport {
    fn write_line(&mut self, line: &[u8]) -> AppResult<()> {
        let framed = self.terminator.frame(line);
        let port = self.port_mut()?;
        port.write_all(&framed)?;
        port.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> AppResult<Vec<u8>> {
        if let Some(line) = take_line(&mut self.pending) {
            return Ok(line);
        }

        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 64];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let port = self.port_mut()?;
            port.set_timeout(remaining).map_err(std::io::Error::from)?;
            match port.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    if let Some(line) = take_line(&mut self.pending) {
                        return Ok(line);
                    }
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if !self.pending.is_empty() {
            trace!(
                port = %self.name,
                partial = %String::from_utf8_lossy(&self.pending),
                "Read timed out with an incomplete line"
            );
        }
        Ok(Vec::new())
    }

    fn clear_input(&mut self) -> AppResult<()> {
        self.pending.clear();
        let port = self.port_mut()?;
        port.clear(ClearBuffer::Input).map_err(std::io::Error::from)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!(port = %self.name, "Closed serial port");
        }
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_appends_terminator() {
        assert_eq!(LineTerminator::Lf.frame(b"2gp"), b"2gp\n".to_vec());
        assert_eq!(LineTerminator::CrLf.frame(b"*IDN?"), b"*IDN?\r\n".to_vec());
        assert_eq!(LineTerminator::Cr.frame(b"D?"), b"D?\r".to_vec());
    }

    #[test]
    fn test_take_line_strips_delimiters() {
        let mut pending = b"820nm\r\n1.50W\npartial".to_vec();
        assert_eq!(take_line(&mut pending), Some(b"820nm".to_vec()));
        assert_eq!(take_line(&mut pending), Some(b"1.50W".to_vec()));
        assert_eq!(take_line(&mut pending), None);
        assert_eq!(pending, b"partial".to_vec());
    }

    #[test]
    fn test_missing_port_is_connection_error() {
        let desc = ConnectionDescriptor::new("/dev/urashg-does-not-exist", 9600);
        match SerialOpener.open(&desc, LineTerminator::Lf) {
            Err(DaqError::Connection { port, .. }) => {
                assert_eq!(port, "/dev/urashg-does-not-exist")
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }
}
