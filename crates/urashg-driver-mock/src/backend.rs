//! Simulated transport and the backend that opens it.
//!
//! [`MockBackend`] is a [`TransportFactory`]: controllers built on it run
//! their real protocol code, only the bytes go to a [`DeviceSimulator`]
//! instead of a serial port. The simulator is shared across reconnects, so
//! device state (positions, shutter, unit mode) survives a disconnect the
//! way it does on real hardware.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;
use urashg_core::{
    AppResult, ConnectionDescriptor, DaqError, LineTerminator, Transport, TransportFactory,
};

/// A simulated instrument: one command line in, at most one reply line out.
pub trait DeviceSimulator: Send {
    /// Reply to `command` (terminator already stripped).
    ///
    /// `None` means the device stays silent.
    fn respond(&mut self, command: &str) -> Option<String>;
}

#[derive(Default)]
struct Counters {
    opened: AtomicUsize,
    live: AtomicUsize,
    unopenable: AtomicBool,
    broken: AtomicBool,
    frames: Mutex<Vec<Vec<u8>>>,
}

/// Opens [`SimulatedTransport`]s onto one shared simulator.
pub struct MockBackend<S> {
    device: Arc<Mutex<S>>,
    counters: Arc<Counters>,
}

impl<S: DeviceSimulator + 'static> MockBackend<S> {
    /// Backend around `device`.
    pub fn new(device: S) -> Self {
        Self {
            device: Arc::new(Mutex::new(device)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Run `f` against the simulator, e.g. to inject state between calls.
    pub fn with_device<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.device.lock())
    }

    /// Transports opened so far.
    pub fn opened_count(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Transports currently open.
    pub fn live_count(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Make every later `open` fail, as if the port did not exist.
    pub fn set_unopenable(&self, unopenable: bool) {
        self.counters.unopenable.store(unopenable, Ordering::SeqCst);
    }

    /// Make every later write fail with a broken pipe.
    pub fn break_pipe(&self) {
        self.counters.broken.store(true, Ordering::SeqCst);
    }

    /// Every command written so far, terminator stripped.
    pub fn commands(&self) -> Vec<String> {
        self.counters
            .frames
            .lock()
            .iter()
            .map(|frame| {
                String::from_utf8_lossy(frame)
                    .trim_end_matches(['\r', '\n'])
                    .to_string()
            })
            .collect()
    }

    /// Every frame written so far, terminator included.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.counters.frames.lock().clone()
    }

    /// Forget recorded commands.
    pub fn clear_commands(&self) {
        self.counters.frames.lock().clear();
    }
}

impl<S: DeviceSimulator + 'static> TransportFactory for MockBackend<S> {
    fn open(
        &self,
        descriptor: &ConnectionDescriptor,
        terminator: LineTerminator,
    ) -> AppResult<Box<dyn Transport>> {
        if self.counters.unopenable.load(Ordering::SeqCst) {
            return Err(DaqError::connection(
                &descriptor.port,
                "No such file or directory (simulated)",
            ));
        }
        if self.counters.live.load(Ordering::SeqCst) > 0 {
            return Err(DaqError::connection(
                &descriptor.port,
                "Device or resource busy (simulated)",
            ));
        }
        self.counters.opened.fetch_add(1, Ordering::SeqCst);
        self.counters.live.fetch_add(1, Ordering::SeqCst);
        trace!(port = %descriptor.port, "Opened simulated transport");
        Ok(Box::new(SimulatedTransport {
            device: Arc::clone(&self.device),
            counters: Arc::clone(&self.counters),
            terminator,
            replies: VecDeque::new(),
            open: true,
        }))
    }
}

fn broken_pipe(reason: &str) -> DaqError {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, reason.to_string()).into()
}

/// [`Transport`] that answers from a [`DeviceSimulator`].
pub struct SimulatedTransport<S> {
    device: Arc<Mutex<S>>,
    counters: Arc<Counters>,
    terminator: LineTerminator,
    replies: VecDeque<String>,
    open: bool,
}

impl<S: DeviceSimulator> Transport for SimulatedTransport<S> {
    fn write_line(&mut self, line: &[u8]) -> AppResult<()> {
        if !self.open || self.counters.broken.load(Ordering::SeqCst) {
            return Err(broken_pipe("simulated broken pipe"));
        }
        let frame = self.terminator.frame(line);
        let command = String::from_utf8_lossy(line).to_string();
        self.counters.frames.lock().push(frame);
        if let Some(reply) = self.device.lock().respond(&command) {
            self.replies.push_back(reply);
        }
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> AppResult<Vec<u8>> {
        if !self.open {
            return Err(broken_pipe("transport closed"));
        }
        Ok(self
            .replies
            .pop_front()
            .map(String::into_bytes)
            .unwrap_or_default())
    }

    fn clear_input(&mut self) -> AppResult<()> {
        self.replies.clear();
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.replies.clear();
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl<S> Drop for SimulatedTransport<S> {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    impl DeviceSimulator for Echo {
        fn respond(&mut self, command: &str) -> Option<String> {
            (!command.is_empty()).then(|| command.to_uppercase())
        }
    }

    fn desc() -> ConnectionDescriptor {
        ConnectionDescriptor::new("sim0", 9600).mock()
    }

    #[test]
    fn test_round_trip_and_silence() {
        let backend = MockBackend::new(Echo);
        let mut transport = backend.open(&desc(), LineTerminator::CrLf).unwrap();
        transport.write_line(b"abc").unwrap();
        assert_eq!(transport.read_line(Duration::from_millis(10)).unwrap(), b"ABC");
        assert!(transport.read_line(Duration::from_millis(10)).unwrap().is_empty());
        assert_eq!(backend.frames(), vec![b"abc\r\n".to_vec()]);
        assert_eq!(backend.commands(), vec!["abc".to_string()]);
    }

    #[test]
    fn test_counts_live_transports() {
        let backend = MockBackend::new(Echo);
        let mut first = backend.open(&desc(), LineTerminator::Lf).unwrap();
        assert_eq!(backend.live_count(), 1);
        assert!(backend.open(&desc(), LineTerminator::Lf).is_err());
        first.close();
        first.close();
        assert_eq!(backend.live_count(), 0);
        let _second = backend.open(&desc(), LineTerminator::Lf).unwrap();
        assert_eq!(backend.opened_count(), 2);
    }

    #[test]
    fn test_unopenable_is_connection_error() {
        let backend = MockBackend::new(Echo);
        backend.set_unopenable(true);
        assert!(matches!(
            backend.open(&desc(), LineTerminator::Lf),
            Err(DaqError::Connection { .. })
        ));
    }

    #[test]
    fn test_broken_pipe_is_io_error() {
        let backend = MockBackend::new(Echo);
        let mut transport = backend.open(&desc(), LineTerminator::Lf).unwrap();
        backend.break_pipe();
        assert!(matches!(transport.write_line(b"x"), Err(DaqError::Io(_))));
    }
}
