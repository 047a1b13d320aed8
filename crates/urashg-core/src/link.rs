//! Per-connection I/O discipline.
//!
//! A [`Link`] owns at most one open [`Transport`] for one connection and
//! serialises every request/reply round trip on it. Two locks are involved:
//!
//! - the **I/O mutex** guards the transport for the length of a single
//!   round trip (clear input, write, read);
//! - the **session gate** is a re-entrant, thread-owned lock that a caller
//!   can hold across *several* round trips (see [`Link::session`]). Every
//!   round trip also passes through the gate, so a held session blocks other
//!   threads' traffic while letting the holder's own calls through.
//!
//! Lock order is always gate first, then I/O mutex.

use crate::descriptor::ConnectionDescriptor;
use crate::error::{AppResult, DaqError};
use crate::family::DeviceFamily;
use crate::transport::{Transport, TransportFactory};
use parking_lot::{
    ArcReentrantMutexGuard, Mutex, MutexGuard, RawMutex, RawThreadId, ReentrantMutex,
};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Lifecycle of one device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport open.
    Disconnected,
    /// Transport open, liveness probe running.
    Connecting,
    /// Probe succeeded.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// Ownership of a link's session for the current thread.
///
/// Released on drop, including during unwinding. Not `Send`: a session
/// belongs to the thread that opened it.
pub type SessionGuard = ArcReentrantMutexGuard<RawMutex, RawThreadId, ()>;

// =============================================================================
// Link
// =============================================================================

/// One device connection: descriptor, backend and the open transport.
pub struct Link {
    family: DeviceFamily,
    descriptor: ConnectionDescriptor,
    backend: Arc<dyn TransportFactory>,
    io: Mutex<Option<Box<dyn Transport>>>,
    state: Mutex<ConnectionState>,
    gate: Arc<ReentrantMutex<()>>,
}

impl Link {
    /// Disconnected link for `family` at `descriptor`.
    pub fn new(
        family: DeviceFamily,
        descriptor: ConnectionDescriptor,
        backend: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            family,
            descriptor,
            backend,
            io: Mutex::new(None),
            state: Mutex::new(ConnectionState::Disconnected),
            gate: Arc::new(ReentrantMutex::new(())),
        }
    }

    /// Device family.
    pub fn family(&self) -> DeviceFamily {
        self.family
    }

    /// Connection descriptor this link was built with.
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// `true` once the probe has succeeded.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Hold the session gate across several round trips.
    pub fn session(&self) -> SessionGuard {
        self.gate.lock_arc()
    }

    /// Whether some thread currently holds the session.
    pub fn session_held(&self) -> bool {
        self.gate.is_locked()
    }

    /// Open the transport and run `probe` to confirm the device is there.
    ///
    /// Returns `Ok(true)` when the probe matched. A probe that does not match
    /// (or answers with garbage) closes the transport and returns `Ok(false)`.
    /// An open failure is [`DaqError::Connection`]. Already connected links
    /// return `Ok(true)` without probing again.
    pub fn connect_with<F>(&self, probe: F) -> AppResult<bool>
    where
        F: FnOnce() -> AppResult<bool>,
    {
        let _session = self.gate.lock_arc();
        if self.is_connected() {
            return Ok(true);
        }

        *self.state.lock() = ConnectionState::Connecting;
        let transport = match self
            .backend
            .open(&self.descriptor, self.family.terminator())
        {
            Ok(transport) => transport,
            Err(e) => {
                *self.state.lock() = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        *self.io.lock() = Some(transport);

        match probe() {
            Ok(true) => {
                *self.state.lock() = ConnectionState::Connected;
                info!(port = %self.descriptor.port, device = %self.family, "Connected");
                Ok(true)
            }
            Ok(false) => {
                warn!(port = %self.descriptor.port, device = %self.family, "Probe did not match");
                self.close_transport();
                Ok(false)
            }
            Err(DaqError::Protocol { reply, reason, .. }) => {
                warn!(
                    port = %self.descriptor.port,
                    device = %self.family,
                    reply = %reply,
                    "Probe reply malformed: {}", reason
                );
                self.close_transport();
                Ok(false)
            }
            Err(e) => {
                self.close_transport();
                Err(e)
            }
        }
    }

    /// Close the transport. Safe to call when never connected.
    pub fn disconnect(&self) {
        let _session = self.gate.lock_arc();
        if self.state() != ConnectionState::Disconnected {
            info!(port = %self.descriptor.port, device = %self.family, "Disconnecting");
        }
        self.close_transport();
    }

    fn close_transport(&self) {
        if let Some(mut transport) = self.io.lock().take() {
            transport.close();
        }
        *self.state.lock() = ConnectionState::Disconnected;
    }

    fn transport<'a>(
        &self,
        io: &'a mut MutexGuard<'_, Option<Box<dyn Transport>>>,
    ) -> AppResult<&'a mut Box<dyn Transport>> {
        io.as_mut().ok_or_else(|| DaqError::NotConnected {
            device: format!("{} at {}", self.family, self.descriptor.port),
        })
    }

    /// Write `command` and wait for one reply, with no retry.
    ///
    /// `Ok(None)` means the device stayed silent for the descriptor timeout.
    /// Use this for commands that must not be repeated, such as relative
    /// moves.
    pub fn query_once(&self, command: &str) -> AppResult<Option<String>> {
        let _session = self.gate.lock_arc();
        let mut io = self.io.lock();
        let transport = self.transport(&mut io)?;
        transport.clear_input()?;
        transport.write_line(command.as_bytes())?;
        let raw = transport.read_line(self.descriptor.timeout())?;
        let reply = String::from_utf8_lossy(&raw).trim().to_string();
        trace!(port = %self.descriptor.port, cmd = command, reply = %reply, "Round trip");
        if reply.is_empty() {
            Ok(None)
        } else {
            Ok(Some(reply))
        }
    }

    /// Write `command` and wait for one reply, retrying once on silence.
    pub fn query(&self, command: &str) -> AppResult<Option<String>> {
        if let Some(reply) = self.query_once(command)? {
            return Ok(Some(reply));
        }
        debug!(port = %self.descriptor.port, cmd = command, "No reply, retrying once");
        self.query_once(command)
    }

    /// Write `command` without waiting for a reply.
    pub fn send(&self, command: &str) -> AppResult<()> {
        let _session = self.gate.lock_arc();
        let mut io = self.io.lock();
        let transport = self.transport(&mut io)?;
        transport.write_line(command.as_bytes())?;
        trace!(port = %self.descriptor.port, cmd = command, "Sent");
        Ok(())
    }

    /// Fail with [`DaqError::NotConnected`] unless a transport is open.
    pub fn ensure_open(&self) -> AppResult<()> {
        if self.io.lock().is_some() {
            Ok(())
        } else {
            Err(DaqError::NotConnected {
                device: format!("{} at {}", self.family, self.descriptor.port),
            })
        }
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("family", &self.family)
            .field("descriptor", &self.descriptor)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
