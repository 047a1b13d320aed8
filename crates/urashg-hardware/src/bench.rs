//! The whole bench, assembled from a [`HardwareConfig`].
//!
//! Every configured device gets its own [`Station`]: the descriptor from the
//! config plus a [`SharedControllerRegistry`] for it. Entries marked
//! `mock = true` get a simulator behind their registry.
//!
//! Nothing here talks to hardware until [`Bench::register_all`], and every
//! connection is closed by [`Bench::shutdown`]. Dropping a `Bench` does not
//! do I/O.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use urashg_core::config::{DeviceEntry, HardwareConfig};
use urashg_core::{AppResult, ConnectionDescriptor, ControllerFactory, DaqError, DeviceFamily};
use urashg_driver_mock::{
    DeviceSimulator, Ell14Simulator, Esp300Simulator, MaiTaiSimulator, MockBackend,
    PowerMeterSimulator,
};
use urashg_driver_newport::{Esp300Factory, Newport1830CFactory};
use urashg_driver_spectra_physics::MaiTaiFactory;
use urashg_driver_thorlabs::Ell14Factory;

use crate::registry::SharedControllerRegistry;

/// One configured device and the registry that shares it.
pub struct Station<F: ControllerFactory> {
    id: String,
    descriptor: ConnectionDescriptor,
    registry: SharedControllerRegistry<F>,
}

impl<F: ControllerFactory> Station<F> {
    fn new<S>(entry: &DeviceEntry, factory: F, simulator: S) -> Self
    where
        S: DeviceSimulator + 'static,
    {
        let mut registry = SharedControllerRegistry::new(factory);
        if entry.mock {
            registry = registry.with_mock_backend(Arc::new(MockBackend::new(simulator)));
        }
        Self {
            id: entry.id.clone(),
            descriptor: entry.descriptor(),
            registry,
        }
    }

    /// Device id from the config.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Connection settings.
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    /// Registry sharing this device.
    pub fn registry(&self) -> &SharedControllerRegistry<F> {
        &self.registry
    }

    /// Connected controller, if any client holds one.
    pub fn handle(&self) -> Option<Arc<F::Controller>> {
        self.registry.get_handle(&self.descriptor.port)
    }

    fn client_id(&self, prefix: &str) -> String {
        format!("{prefix}/{}", self.id)
    }
}

/// Every configured device, grouped by family.
pub struct Bench {
    rotators: Vec<Station<Ell14Factory>>,
    lasers: Vec<Station<MaiTaiFactory>>,
    power_meters: Vec<Station<Newport1830CFactory>>,
    stages: Vec<Station<Esp300Factory>>,
}

impl Bench {
    /// Build stations for every entry in `config`. No port is opened.
    pub fn from_config(config: &HardwareConfig) -> AppResult<Self> {
        config.validate()?;
        let mut ports = HashSet::new();
        for entry in &config.devices {
            if !ports.insert(entry.port.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "device '{}': port {} is already used by another entry",
                    entry.id, entry.port
                )));
            }
        }

        let mut bench = Self {
            rotators: Vec::new(),
            lasers: Vec::new(),
            power_meters: Vec::new(),
            stages: Vec::new(),
        };
        for entry in &config.devices {
            match entry.family {
                DeviceFamily::RotationMount => {
                    let addresses = entry.bus_addresses()?;
                    let simulator = Ell14Simulator::new(&addresses);
                    bench
                        .rotators
                        .push(Station::new(entry, Ell14Factory::new(addresses), simulator));
                }
                DeviceFamily::Laser => {
                    bench
                        .lasers
                        .push(Station::new(entry, MaiTaiFactory, MaiTaiSimulator::new()));
                }
                DeviceFamily::PowerMeter => {
                    bench.power_meters.push(Station::new(
                        entry,
                        Newport1830CFactory,
                        PowerMeterSimulator::new(),
                    ));
                }
                DeviceFamily::MotionController => {
                    let axes = entry.axis_count();
                    bench.stages.push(Station::new(
                        entry,
                        Esp300Factory::new(axes),
                        Esp300Simulator::new(axes),
                    ));
                }
            }
        }
        info!(
            rotators = bench.rotators.len(),
            lasers = bench.lasers.len(),
            power_meters = bench.power_meters.len(),
            stages = bench.stages.len(),
            "Bench assembled"
        );
        Ok(bench)
    }

    /// ELL14 buses.
    pub fn rotators(&self) -> &[Station<Ell14Factory>] {
        &self.rotators
    }

    /// MaiTai lasers.
    pub fn lasers(&self) -> &[Station<MaiTaiFactory>] {
        &self.lasers
    }

    /// 1830-C power meters.
    pub fn power_meters(&self) -> &[Station<Newport1830CFactory>] {
        &self.power_meters
    }

    /// ESP300 controllers.
    pub fn stages(&self) -> &[Station<Esp300Factory>] {
        &self.stages
    }

    /// Register client `<client_prefix>/<id>` on every device.
    ///
    /// Returns whether each device (by id) ended up connected. A device that
    /// fails does not stop the others.
    pub fn register_all(&self, client_prefix: &str) -> BTreeMap<String, bool> {
        let mut outcome = BTreeMap::new();
        register_stations(&self.rotators, client_prefix, &mut outcome);
        register_stations(&self.lasers, client_prefix, &mut outcome);
        register_stations(&self.power_meters, client_prefix, &mut outcome);
        register_stations(&self.stages, client_prefix, &mut outcome);
        let connected = outcome.values().filter(|ok| **ok).count();
        info!(connected, total = outcome.len(), "Bench registration finished");
        outcome
    }

    /// Close every connection on the bench.
    pub fn shutdown(&self) {
        self.rotators.iter().for_each(|s| s.registry.close_all());
        self.lasers.iter().for_each(|s| s.registry.close_all());
        self.power_meters.iter().for_each(|s| s.registry.close_all());
        self.stages.iter().for_each(|s| s.registry.close_all());
        info!("Bench shut down");
    }
}

fn register_stations<F: ControllerFactory>(
    stations: &[Station<F>],
    client_prefix: &str,
    outcome: &mut BTreeMap<String, bool>,
) {
    for station in stations {
        let connected = station
            .registry
            .register(&station.client_id(client_prefix), station.descriptor.clone());
        if !connected {
            warn!(
                device = %station.id,
                port = %station.descriptor.port,
                "Device unavailable"
            );
        }
        outcome.insert(station.id.clone(), connected);
    }
}

impl std::fmt::Debug for Bench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids = |stations: Vec<&str>| stations.join(", ");
        f.debug_struct("Bench")
            .field("rotators", &ids(self.rotators.iter().map(|s| s.id()).collect()))
            .field("lasers", &ids(self.lasers.iter().map(|s| s.id()).collect()))
            .field(
                "power_meters",
                &ids(self.power_meters.iter().map(|s| s.id()).collect()),
            )
            .field("stages", &ids(self.stages.iter().map(|s| s.id()).collect()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[[devices]]
id = "rotators"
family = "rotation_mount"
port = "/dev/ttyUSB0"
mock = true
addresses = ["2", "3", "8"]

[[devices]]
id = "laser"
family = "laser"
port = "/dev/ttyUSB5"
mock = true

[[devices]]
id = "meter"
family = "power_meter"
port = "/dev/ttyS0"
mock = true

[[devices]]
id = "stage"
family = "motion_controller"
port = "/dev/ttyUSB3"
mock = true
axes = 2
"#;

    #[test]
    fn test_from_config_groups_by_family() {
        let config = HardwareConfig::from_toml_str(CONFIG).unwrap();
        let bench = Bench::from_config(&config).unwrap();
        assert_eq!(bench.rotators().len(), 1);
        assert_eq!(bench.lasers().len(), 1);
        assert_eq!(bench.power_meters().len(), 1);
        assert_eq!(bench.stages().len(), 1);
        assert_eq!(bench.stages()[0].descriptor().baud_rate, 19200);
        assert!(bench.rotators()[0].descriptor().mock);
    }

    #[test]
    fn test_nothing_opened_before_register_all() {
        let config = HardwareConfig::from_toml_str(CONFIG).unwrap();
        let bench = Bench::from_config(&config).unwrap();
        assert!(bench.lasers()[0].handle().is_none());
        assert_eq!(bench.lasers()[0].registry().connection_count(), 0);
    }

    #[test]
    fn test_shared_port_rejected() {
        let config = HardwareConfig::from_toml_str(
            r#"
[[devices]]
id = "a"
family = "laser"
port = "/dev/ttyUSB5"

[[devices]]
id = "b"
family = "power_meter"
port = "/dev/ttyUSB5"
"#,
        )
        .unwrap();
        assert!(matches!(
            Bench::from_config(&config),
            Err(DaqError::Configuration(_))
        ));
    }
}
