//! Hardware configuration.
//!
//! A bench is described by one TOML file, merged with `URASHG_`-prefixed
//! environment variables (nested keys split on `__`, e.g.
//! `URASHG_LOGGING__LEVEL=debug`):
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "pretty"
//!
//! [[devices]]
//! id = "rotators"
//! family = "rotation_mount"
//! port = "/dev/ttyUSB0"
//! mock = true
//! addresses = ["2", "3", "8"]
//!
//! [[devices]]
//! id = "stage"
//! family = "motion_controller"
//! port = "/dev/ttyUSB3"
//! axes = 3
//! ```
//!
//! `baud_rate` may be omitted; it then defaults to the family's factory
//! setting.

use crate::descriptor::{ConnectionDescriptor, DataBits, Parity, StopBits, DEFAULT_TIMEOUT_MS};
use crate::error::{AppResult, DaqError};
use crate::family::DeviceFamily;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "URASHG_";

/// Maximum number of ESP300 axes.
pub const MAX_ESP300_AXES: u8 = 3;

fn default_level() -> String {
    "info".to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line, coloured.
    #[default]
    Pretty,
    /// Single line, no colour.
    Compact,
    /// One JSON object per event.
    Json,
}

/// `[logging]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level, overridden by `RUST_LOG`.
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

/// One `[[devices]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Unique id within the bench.
    pub id: String,
    /// Instrument family.
    pub family: DeviceFamily,
    /// Port path.
    pub port: String,
    /// Baud rate; the family default when omitted.
    #[serde(default)]
    pub baud_rate: Option<u32>,
    /// Per-call read timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Data bits.
    #[serde(default)]
    pub data_bits: DataBits,
    /// Parity.
    #[serde(default)]
    pub parity: Parity,
    /// Stop bits.
    #[serde(default)]
    pub stop_bits: StopBits,
    /// Route to the simulated backend.
    #[serde(default)]
    pub mock: bool,
    /// ELL14 bus addresses (`"0"`..`"F"`).
    #[serde(default)]
    pub addresses: Vec<String>,
    /// ESP300 axis count.
    #[serde(default)]
    pub axes: Option<u8>,
}

impl DeviceEntry {
    /// Connection descriptor with family defaults filled in.
    pub fn descriptor(&self) -> ConnectionDescriptor {
        ConnectionDescriptor {
            port: self.port.clone(),
            baud_rate: self.baud_rate.unwrap_or_else(|| self.family.default_baud()),
            timeout_ms: self.timeout_ms,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
            mock: self.mock,
        }
    }

    /// Parsed ELL14 bus addresses.
    pub fn bus_addresses(&self) -> AppResult<Vec<char>> {
        self.addresses
            .iter()
            .map(|raw| parse_bus_address(raw))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                DaqError::Configuration(format!(
                    "device '{}': addresses must be single characters 0-9 or A-F, got {:?}",
                    self.id, self.addresses
                ))
            })
    }

    /// ESP300 axis count (all three when omitted).
    pub fn axis_count(&self) -> u8 {
        self.axes.unwrap_or(MAX_ESP300_AXES)
    }
}

/// Parse one ELL14 bus address (`0`-`9`, `A`-`F`, case-insensitive).
pub fn parse_bus_address(raw: &str) -> Option<char> {
    let mut chars = raw.trim().chars();
    let c = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() || !c.is_ascii_hexdigit() {
        return None;
    }
    Some(c)
}

/// Whole-bench configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Device entries.
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

impl HardwareConfig {
    /// Load from a TOML file merged with `URASHG_` environment overrides.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(DaqError::Configuration(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        debug!("Loading hardware config from: {}", path.display());

        let config: HardwareConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;

        info!(
            devices = config.devices.len(),
            "Loaded hardware config from {}",
            path.display()
        );
        Ok(config)
    }

    /// Parse a TOML string without environment overrides.
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let config: HardwareConfig = Figment::new().merge(Toml::string(toml)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks that serde cannot express.
    pub fn validate(&self) -> AppResult<()> {
        let mut ids = HashSet::new();
        for entry in &self.devices {
            if !ids.insert(entry.id.as_str()) {
                return Err(DaqError::Configuration(format!(
                    "duplicate device id '{}'",
                    entry.id
                )));
            }
            if entry.baud_rate == Some(0) {
                return Err(DaqError::Configuration(format!(
                    "device '{}': baud_rate must be non-zero",
                    entry.id
                )));
            }
            match entry.family {
                DeviceFamily::RotationMount => {
                    if entry.addresses.is_empty() {
                        return Err(DaqError::Configuration(format!(
                            "device '{}': rotation mount bus needs at least one address",
                            entry.id
                        )));
                    }
                    entry.bus_addresses()?;
                }
                DeviceFamily::MotionController => {
                    let axes = entry.axis_count();
                    if axes == 0 || axes > MAX_ESP300_AXES {
                        return Err(DaqError::Configuration(format!(
                            "device '{}': axes must be 1..={}, got {}",
                            entry.id, MAX_ESP300_AXES, axes
                        )));
                    }
                }
                DeviceFamily::Laser | DeviceFamily::PowerMeter => {}
            }
        }
        Ok(())
    }

    /// Entries of one family, in file order.
    pub fn devices_of(&self, family: DeviceFamily) -> impl Iterator<Item = &DeviceEntry> {
        self.devices.iter().filter(move |d| d.family == family)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BENCH: &str = r#"
        [logging]
        level = "debug"
        format = "json"

        [[devices]]
        id = "rotators"
        family = "rotation_mount"
        port = "/dev/ttyUSB0"
        mock = true
        addresses = ["2", "3", "8"]

        [[devices]]
        id = "stage"
        family = "motion_controller"
        port = "/dev/ttyUSB3"
        axes = 2

        [[devices]]
        id = "laser"
        family = "laser"
        port = "/dev/ttyUSB5"
        baud_rate = 115200
    "#;

    #[test]
    fn test_parse_bench() {
        let config = HardwareConfig::from_toml_str(BENCH).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.devices.len(), 3);

        let rotators = &config.devices[0];
        assert_eq!(rotators.bus_addresses().unwrap(), vec!['2', '3', '8']);
        assert_eq!(rotators.descriptor().baud_rate, 9600);
        assert!(rotators.descriptor().mock);

        let stage = &config.devices[1];
        assert_eq!(stage.descriptor().baud_rate, 19200);
        assert_eq!(stage.axis_count(), 2);

        assert_eq!(config.devices[2].descriptor().baud_rate, 115200);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let toml = r#"
            [[devices]]
            id = "pm"
            family = "power_meter"
            port = "/dev/ttyUSB1"
            [[devices]]
            id = "pm"
            family = "power_meter"
            port = "/dev/ttyUSB2"
        "#;
        assert!(matches!(
            HardwareConfig::from_toml_str(toml),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_bad_bus_address_rejected() {
        let toml = r#"
            [[devices]]
            id = "rot"
            family = "rotation_mount"
            port = "/dev/ttyUSB0"
            addresses = ["2", "G"]
        "#;
        assert!(HardwareConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_too_many_axes_rejected() {
        let toml = r#"
            [[devices]]
            id = "stage"
            family = "motion_controller"
            port = "/dev/ttyUSB3"
            axes = 4
        "#;
        assert!(HardwareConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn test_parse_bus_address() {
        assert_eq!(parse_bus_address("a"), Some('A'));
        assert_eq!(parse_bus_address("0"), Some('0'));
        assert_eq!(parse_bus_address("10"), None);
        assert_eq!(parse_bus_address(""), None);
    }
}
