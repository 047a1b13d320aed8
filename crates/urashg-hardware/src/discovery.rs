//! Serial port discovery.
//!
//! For every port, each family is tried at each of its canonical baud rates
//! (factory default first) by running that family's real probe through
//! `connect()`. The first match wins and the port is closed again.
//!
//! Probing writes to every port it finds. Make sure lasers are in a safe
//! state first: a laser at the wrong baud rate can read junk as commands.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use urashg_core::{
    AppResult, ConnectionDescriptor, DaqError, DeviceFamily, DeviceProtocol, SerialOpener,
    TransportFactory,
};
use urashg_driver_newport::{Esp300, Newport1830C};
use urashg_driver_spectra_physics::MaiTai;
use urashg_driver_thorlabs::Ell14Bus;

/// Per-read timeout while probing.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

/// Every ELL14 bus address.
const BUS_ADDRESSES: [char; 16] = [
    '0', '1', '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F',
];

/// A device found on a port.
#[derive(Debug, Clone, PartialEq)]
pub struct Discovery {
    /// Port path.
    pub port: String,
    /// Family that answered.
    pub family: DeviceFamily,
    /// Baud rate it answered at.
    pub baud_rate: u32,
    /// Identity string, for families that report one.
    pub identity: Option<String>,
    /// ELL14 bus addresses that answered.
    pub addresses: Vec<char>,
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> AppResult<Vec<String>> {
    let ports = serialport::available_ports().map_err(std::io::Error::from)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Probe every port present on this machine.
pub fn scan(timeout: Duration) -> AppResult<Vec<Discovery>> {
    let ports = available_ports()?;
    if ports.is_empty() {
        warn!("No serial ports detected on this system");
    }
    Ok(scan_ports(&ports, Arc::new(SerialOpener), timeout))
}

/// Probe `ports` through `backend`. Ports nothing answers on are left out.
pub fn scan_ports(
    ports: &[String],
    backend: Arc<dyn TransportFactory>,
    timeout: Duration,
) -> Vec<Discovery> {
    let mut found = Vec::new();
    for port in ports {
        match probe_port(port, backend.clone(), timeout) {
            Ok(Some(discovery)) => found.push(discovery),
            Ok(None) => info!(port = %port, "Unknown device or no response"),
            Err(e) => warn!(port = %port, "Skipping port: {}", e),
        }
    }
    found
}

/// Try every family on `port` until one answers its probe.
///
/// An error means the port itself could not be used (missing, busy, broken).
pub fn probe_port(
    port: &str,
    backend: Arc<dyn TransportFactory>,
    timeout: Duration,
) -> AppResult<Option<Discovery>> {
    for family in DeviceFamily::ALL {
        for &baud_rate in family.baud_rates() {
            let descriptor = ConnectionDescriptor::new(port, baud_rate).with_timeout(timeout);
            debug!(port, baud_rate, family = %family, "Probing");
            if let Some(discovery) = probe_family(family, descriptor, backend.clone())? {
                info!(
                    port,
                    baud_rate,
                    family = %family,
                    "Found {}",
                    family.model()
                );
                return Ok(Some(discovery));
            }
        }
    }
    Ok(None)
}

fn probe_family(
    family: DeviceFamily,
    descriptor: ConnectionDescriptor,
    backend: Arc<dyn TransportFactory>,
) -> AppResult<Option<Discovery>> {
    let port = descriptor.port.clone();
    let baud_rate = descriptor.baud_rate;
    let found = |identity: Option<String>, addresses: Vec<char>| Discovery {
        port: port.clone(),
        family,
        baud_rate,
        identity,
        addresses,
    };

    match family {
        DeviceFamily::RotationMount => {
            let bus = Ell14Bus::new(descriptor, BUS_ADDRESSES.to_vec(), backend);
            if !bus.connect()? {
                return Ok(None);
            }
            let mut alive = Vec::new();
            for &address in bus.addresses() {
                match bus.get_info(address) {
                    Ok(Some(_)) => alive.push(address),
                    Ok(None) | Err(DaqError::Protocol { .. }) => {}
                    Err(e) => {
                        bus.disconnect();
                        return Err(e);
                    }
                }
            }
            bus.disconnect();
            Ok(Some(found(None, alive)))
        }
        DeviceFamily::Laser => {
            let laser = MaiTai::new(descriptor, backend);
            with_connected(&laser, |l| l.identify())
                .map(|hit| hit.map(|identity| found(identity, Vec::new())))
        }
        DeviceFamily::PowerMeter => {
            let meter = Newport1830C::new(descriptor, backend);
            with_connected(&meter, |_| Ok(())).map(|hit| hit.map(|()| found(None, Vec::new())))
        }
        DeviceFamily::MotionController => {
            let stage = Esp300::new(descriptor, 1, backend);
            with_connected(&stage, |s| s.identify())
                .map(|hit| hit.map(|identity| found(identity, Vec::new())))
        }
    }
}

/// Connect, run `f`, disconnect. `None` if the probe did not match.
fn with_connected<C, T>(controller: &C, f: impl FnOnce(&C) -> AppResult<T>) -> AppResult<Option<T>>
where
    C: DeviceProtocol,
{
    if !controller.connect()? {
        return Ok(None);
    }
    let result = f(controller);
    controller.disconnect();
    result.map(Some)
}
