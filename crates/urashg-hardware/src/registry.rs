//! Shared Controller Registry
//!
//! One registry per device family. It owns at most one controller (and so at
//! most one open transport) per serial port, however many clients ask for it.
//!
//! ```text
//! client "rotator-plugin" ──┐
//! client "scan-worker"    ──┼──> port /dev/ttyUSB0 ──> Arc<Ell14Bus> ──> Link ──> Transport
//! client "gui-panel"      ──┘
//! ```
//!
//! The last client to unregister closes the transport. Handles are
//! `Arc<Controller>`; callers look them up when needed instead of keeping
//! them, so a torn-down connection is never reached through a stale handle.
//!
//! [`ExclusiveAccess`] runs a sequence of round trips without other threads'
//! commands interleaving.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, info, warn};
use urashg_core::{
    AppResult, ConnectionDescriptor, ControllerFactory, DaqError, DeviceProtocol, SerialOpener,
    SessionGuard, TransportFactory,
};

struct Entry<C> {
    descriptor: ConnectionDescriptor,
    controller: Arc<C>,
    clients: BTreeSet<String>,
}

struct State<C> {
    ports: HashMap<String, Entry<C>>,
    /// client id -> port
    clients: HashMap<String, String>,
}

/// Per-port shared controllers for one device family.
pub struct SharedControllerRegistry<F: ControllerFactory> {
    factory: F,
    serial: Arc<dyn TransportFactory>,
    mock: Option<Arc<dyn TransportFactory>>,
    state: Mutex<State<F::Controller>>,
}

impl<F: ControllerFactory> SharedControllerRegistry<F> {
    /// Registry opening real serial ports.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            serial: Arc::new(SerialOpener),
            mock: None,
            state: Mutex::new(State {
                ports: HashMap::new(),
                clients: HashMap::new(),
            }),
        }
    }

    /// Use `backend` for descriptors with `mock = true`.
    #[must_use]
    pub fn with_mock_backend(mut self, backend: Arc<dyn TransportFactory>) -> Self {
        self.mock = Some(backend);
        self
    }

    /// Use `backend` in place of real serial ports.
    #[must_use]
    pub fn with_serial_backend(mut self, backend: Arc<dyn TransportFactory>) -> Self {
        self.serial = backend;
        self
    }

    /// Factory this registry builds controllers with.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Attach `client_id` to the controller for `descriptor.port`.
    ///
    /// Builds and connects the controller if the port has none yet. Returns
    /// `true` only when the client ends up holding a connected controller.
    /// Every `false` is logged with its reason.
    pub fn register(&self, client_id: &str, descriptor: ConnectionDescriptor) -> bool {
        let port = descriptor.port.clone();
        let stale = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if Self::client_on_other_port(state, client_id, &port) {
                return false;
            }

            let existing = state.ports.get(&port).map(|entry| {
                if !entry.descriptor.is_compatible(&descriptor) {
                    warn!(
                        client = client_id,
                        port = %port,
                        requested = %descriptor,
                        active = %entry.descriptor,
                        "Descriptor mismatch, keeping the active connection settings"
                    );
                }
                entry.controller.clone()
            });
            match existing {
                Some(controller) if controller.is_connected() => {
                    Self::attach(state, client_id, &port);
                    return true;
                }
                Some(controller) => controller,
                None => {
                    let Some(controller) = self.build_connected(client_id, &descriptor) else {
                        return false;
                    };
                    info!(
                        client = client_id,
                        port = %port,
                        device = self.factory.name(),
                        "Opened shared connection"
                    );
                    state.ports.insert(
                        port.clone(),
                        Entry {
                            descriptor,
                            controller: Arc::new(controller),
                            clients: BTreeSet::new(),
                        },
                    );
                    Self::attach(state, client_id, &port);
                    return true;
                }
            }
        };

        // reconnect outside the registry lock; connect waits for any exclusive session
        if !Self::reconnect(&port, &stale) {
            return false;
        }
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let current = state
            .ports
            .get(&port)
            .is_some_and(|entry| Arc::ptr_eq(&entry.controller, &stale));
        if !current {
            drop(guard);
            debug!(port = %port, "Connection was torn down while reconnecting, starting over");
            stale.disconnect();
            return self.register(client_id, descriptor);
        }
        if Self::client_on_other_port(state, client_id, &port) {
            return false;
        }
        Self::attach(state, client_id, &port);
        true
    }

    fn client_on_other_port(state: &State<F::Controller>, client_id: &str, port: &str) -> bool {
        match state.clients.get(client_id) {
            Some(existing) if existing != port => {
                warn!(
                    client = client_id,
                    port = %port,
                    registered_port = %existing,
                    "Client already registered on another port"
                );
                true
            }
            _ => false,
        }
    }

    fn attach(state: &mut State<F::Controller>, client_id: &str, port: &str) {
        if let Some(entry) = state.ports.get_mut(port) {
            if entry.clients.insert(client_id.to_string()) {
                info!(
                    client = client_id,
                    port = %port,
                    clients = entry.clients.len(),
                    "Client joined shared connection"
                );
            } else {
                debug!(client = client_id, port = %port, "Client already registered");
            }
            state.clients.insert(client_id.to_string(), port.to_string());
        }
    }

    fn reconnect(port: &str, controller: &F::Controller) -> bool {
        warn!(port = %port, "Shared controller lost its connection, reconnecting");
        match controller.connect() {
            Ok(true) => true,
            Ok(false) => {
                warn!(port = %port, "Reconnect failed: device did not answer probe");
                false
            }
            Err(e) => {
                warn!(port = %port, category = %e.category(), "Reconnect failed: {}", e);
                false
            }
        }
    }

    fn build_connected(
        &self,
        client_id: &str,
        descriptor: &ConnectionDescriptor,
    ) -> Option<F::Controller> {
        let backend = if descriptor.mock {
            match &self.mock {
                Some(backend) => backend.clone(),
                None => {
                    warn!(
                        client = client_id,
                        port = %descriptor.port,
                        "Registration failed: mock descriptor but no mock backend configured"
                    );
                    return None;
                }
            }
        } else {
            self.serial.clone()
        };

        let controller = match self.factory.build(descriptor, backend) {
            Ok(controller) => controller,
            Err(e) => {
                warn!(client = client_id, port = %descriptor.port, "Registration failed: {}", e);
                return None;
            }
        };
        match controller.connect() {
            Ok(true) => Some(controller),
            Ok(false) => {
                warn!(
                    client = client_id,
                    port = %descriptor.port,
                    device = self.factory.name(),
                    "Registration failed: device did not answer probe"
                );
                None
            }
            Err(e) => {
                warn!(
                    client = client_id,
                    port = %descriptor.port,
                    category = %e.category(),
                    "Registration failed: {}",
                    e
                );
                None
            }
        }
    }

    /// Detach `client_id`. The last client out closes the connection.
    pub fn unregister(&self, client_id: &str) {
        let released = {
            let mut state = self.state.lock();
            let Some(port) = state.clients.remove(client_id) else {
                warn!(client = client_id, "Unregister for unknown client ignored");
                return;
            };
            let last = match state.ports.get_mut(&port) {
                Some(entry) => {
                    entry.clients.remove(client_id);
                    debug!(
                        client = client_id,
                        port = %port,
                        remaining = entry.clients.len(),
                        "Client left shared connection"
                    );
                    entry.clients.is_empty()
                }
                None => false,
            };
            if last {
                state.ports.remove(&port)
            } else {
                None
            }
        };

        // disconnect outside the registry lock; it waits for any exclusive session
        if let Some(entry) = released {
            info!(port = %entry.descriptor.port, "Last client left, closing connection");
            entry.controller.disconnect();
        }
    }

    /// Connected controller for `port`.
    pub fn get_handle(&self, port: &str) -> Option<Arc<F::Controller>> {
        let state = self.state.lock();
        state
            .ports
            .get(port)
            .filter(|entry| entry.controller.is_connected())
            .map(|entry| entry.controller.clone())
    }

    /// Connected controller `client_id` is registered on.
    pub fn handle_for(&self, client_id: &str) -> Option<Arc<F::Controller>> {
        let port = self.state.lock().clients.get(client_id).cloned()?;
        self.get_handle(&port)
    }

    /// Hold the controller of `client_id` exclusively until the guard drops.
    ///
    /// Blocks while another thread holds the session. Round trips from the
    /// holding thread pass; round trips from other threads wait.
    pub fn exclusive_access(&self, client_id: &str) -> AppResult<ExclusiveAccess<F::Controller>> {
        let controller = {
            let state = self.state.lock();
            let port = state
                .clients
                .get(client_id)
                .ok_or_else(|| DaqError::UnknownClient(client_id.to_string()))?;
            state
                .ports
                .get(port)
                .map(|entry| entry.controller.clone())
                .ok_or_else(|| DaqError::UnknownClient(client_id.to_string()))?
        };
        let session = controller.session();
        debug!(client = client_id, "Exclusive session acquired");
        Ok(ExclusiveAccess {
            controller,
            _session: session,
        })
    }

    /// Clients registered on `port`, sorted.
    pub fn clients(&self, port: &str) -> Vec<String> {
        self.state
            .lock()
            .ports
            .get(port)
            .map(|entry| entry.clients.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of open shared connections.
    pub fn connection_count(&self) -> usize {
        self.state.lock().ports.len()
    }

    /// Drop every client and close every connection.
    pub fn close_all(&self) {
        let entries: Vec<Entry<F::Controller>> = {
            let mut state = self.state.lock();
            state.clients.clear();
            state.ports.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            info!(
                port = %entry.descriptor.port,
                clients = entry.clients.len(),
                "Closing shared connection"
            );
            entry.controller.disconnect();
        }
    }
}

impl<F: ControllerFactory + std::fmt::Debug> std::fmt::Debug for SharedControllerRegistry<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedControllerRegistry")
            .field("factory", &self.factory)
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}

/// Scoped exclusive session on a shared controller.
///
/// Released on drop, including during unwinding. Not `Send`: the session
/// belongs to the thread that acquired it.
#[must_use = "the session is released as soon as the guard is dropped"]
pub struct ExclusiveAccess<C> {
    controller: Arc<C>,
    _session: SessionGuard,
}

impl<C> ExclusiveAccess<C> {
    /// Shared handle to the controller.
    pub fn handle(&self) -> Arc<C> {
        self.controller.clone()
    }
}

impl<C> Deref for ExclusiveAccess<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;
    use urashg_driver_mock::{MockBackend, PowerMeterSimulator};
    use urashg_driver_newport::Newport1830CFactory;

    fn registry() -> (
        SharedControllerRegistry<Newport1830CFactory>,
        Arc<MockBackend<PowerMeterSimulator>>,
    ) {
        let backend = Arc::new(MockBackend::new(PowerMeterSimulator::new()));
        let registry =
            SharedControllerRegistry::new(Newport1830CFactory).with_mock_backend(backend.clone());
        (registry, backend)
    }

    fn meter(port: &str) -> ConnectionDescriptor {
        ConnectionDescriptor::new(port, 9600).mock()
    }

    #[test]
    fn test_register_is_idempotent() {
        let (registry, backend) = registry();
        assert!(registry.register("a", meter("/dev/ttyS0")));
        assert!(registry.register("a", meter("/dev/ttyS0")));
        assert_eq!(registry.clients("/dev/ttyS0"), vec!["a".to_string()]);
        assert_eq!(backend.opened_count(), 1);
    }

    #[traced_test]
    #[test]
    fn test_mismatch_keeps_first_descriptor() {
        let (registry, backend) = registry();
        assert!(registry.register("a", meter("/dev/ttyS0")));
        let other_baud = ConnectionDescriptor::new("/dev/ttyS0", 19200).mock();
        assert!(registry.register("b", other_baud));
        assert!(logs_contain("Descriptor mismatch"));
        assert_eq!(backend.opened_count(), 1);
        assert_eq!(registry.clients("/dev/ttyS0").len(), 2);
    }

    #[traced_test]
    #[test]
    fn test_unknown_client_unregister_is_noop() {
        let (registry, _backend) = registry();
        assert!(registry.register("a", meter("/dev/ttyS0")));
        registry.unregister("nobody");
        assert!(logs_contain("unknown client"));
        assert_eq!(registry.connection_count(), 1);
    }

    #[traced_test]
    #[test]
    fn test_mock_descriptor_without_backend_is_logged() {
        let registry = SharedControllerRegistry::new(Newport1830CFactory);
        assert!(!registry.register("a", meter("/dev/ttyS0")));
        assert!(logs_contain("no mock backend configured"));
        assert_eq!(registry.connection_count(), 0);
    }

    #[traced_test]
    #[test]
    fn test_absent_hardware_is_logged_and_not_stored() {
        let (registry, backend) = registry();
        backend.set_unopenable(true);
        assert!(!registry.register("a", meter("/dev/ttyS0")));
        assert!(logs_contain("Registration failed"));
        assert!(logs_contain("hardware_absent"));
        assert_eq!(registry.connection_count(), 0);
        assert!(registry.handle_for("a").is_none());
    }

    #[test]
    fn test_client_cannot_span_two_ports() {
        let (registry, _backend) = registry();
        assert!(registry.register("a", meter("/dev/ttyS0")));
        assert!(!registry.register("a", meter("/dev/ttyS1")));
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn test_exclusive_access_unknown_client() {
        let (registry, _backend) = registry();
        assert!(matches!(
            registry.exclusive_access("ghost"),
            Err(DaqError::UnknownClient(_))
        ));
    }

    #[test]
    fn test_close_all() {
        let (registry, backend) = registry();
        assert!(registry.register("a", meter("/dev/ttyS0")));
        assert!(registry.register("b", meter("/dev/ttyS0")));
        registry.close_all();
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(backend.live_count(), 0);
        assert!(registry.handle_for("a").is_none());
    }
}
