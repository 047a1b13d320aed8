//! Newport 1830-C Optical Power Meter Driver
//!
//! Reference: Newport 1830-C User's Manual
//!
//! Protocol Overview:
//! - Format: Simple ASCII commands (NOT SCPI)
//! - Baud: 9600, 8N1, no flow control
//! - Terminator: LF only (\n) - NOT CRLF
//! - Settings: `L=<nm>` (wavelength), `U=<0|1>` (units), `A=<0|1>` (attenuator),
//!   `F=<1|2|3>` (filter), `Z` (zero)
//! - Queries: `D?` (power), `L?` (wavelength), `U?` (units)
//!
//! Unit codes:
//! - 0 = Watts (scientific notation, e.g., "5.000E-3" or "+.11E-9")
//! - 1 = dBm (decimal, e.g., "-15.24")
//!
//! The meter does not say which unit a `D?` reply is in, so the unit mode is
//! tracked here. The probe reads `U?` to seed it.
//!
//! # Usage
//!
//! ```rust,ignore
//! use urashg_driver_newport::Newport1830C;
//!
//! let meter = Newport1830C::new(descriptor, backend);
//! meter.connect()?;
//! let samples = meter.sample_power(10)?;
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use urashg_core::protocol::check_range;
use urashg_core::{
    AppResult, ConnectionDescriptor, ControllerFactory, DaqError, DeviceFamily, DeviceProtocol,
    Link, TransportFactory,
};

/// Shortest calibration wavelength in nm.
pub const WAVELENGTH_MIN_NM: f64 = 300.0;
/// Longest calibration wavelength in nm.
pub const WAVELENGTH_MAX_NM: f64 = 1100.0;
/// Largest batch accepted by [`Newport1830C::sample_power`].
pub const MAX_SAMPLES: usize = 1000;

const DEVICE: &str = "Newport 1830-C";

// =============================================================================
// Newport1830CFactory - ControllerFactory implementation
// =============================================================================

/// Factory for [`Newport1830C`] controllers.
#[derive(Debug, Clone, Copy, Default)]
pub struct Newport1830CFactory;

impl ControllerFactory for Newport1830CFactory {
    type Controller = Newport1830C;

    fn family(&self) -> DeviceFamily {
        DeviceFamily::PowerMeter
    }

    fn name(&self) -> &'static str {
        "Newport 1830-C Optical Power Meter"
    }

    fn build(
        &self,
        descriptor: &ConnectionDescriptor,
        backend: Arc<dyn TransportFactory>,
    ) -> AppResult<Newport1830C> {
        self.validate(descriptor)?;
        Ok(Newport1830C::new(descriptor.clone(), backend))
    }
}

// =============================================================================
// Units and readings
// =============================================================================

/// Display unit of the meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerUnit {
    /// Watts.
    #[default]
    Watts,
    /// Decibels relative to 1 mW.
    Dbm,
}

impl PowerUnit {
    /// Wire code (`U=<code>`).
    pub fn code(self) -> u8 {
        match self {
            Self::Watts => 0,
            Self::Dbm => 1,
        }
    }

    /// Decode a `U?` reply.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "0" => Some(Self::Watts),
            "1" => Some(Self::Dbm),
            _ => None,
        }
    }
}

/// One `D?` reading, tagged with the unit it was read in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerReading {
    /// Value as reported.
    pub value: f64,
    /// Unit in force when it was read.
    pub unit: PowerUnit,
}

impl PowerReading {
    /// Reading in W.
    pub fn watts(&self) -> f64 {
        match self.unit {
            PowerUnit::Watts => self.value,
            PowerUnit::Dbm => 1.0e-3 * 10f64.powf(self.value / 10.0),
        }
    }
}

/// Analog filter setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Filter {
    /// Slow (most averaging).
    Slow = 1,
    /// Medium.
    Medium = 2,
    /// Fast (no averaging).
    Fast = 3,
}

/// Parse a `D?` reply under `unit`.
///
/// Error responses detected:
/// - "ERR" - General error
/// - "OVER" - Overrange (too bright)
/// - "UNDER" - Underrange (too dim)
/// - "SAT" - Saturated detector
fn parse_power_reply(reply: &str, unit: PowerUnit) -> AppResult<PowerReading> {
    let upper = reply.to_ascii_uppercase();
    let fault = if upper.contains("ERR") {
        Some("meter error")
    } else if upper.contains("OVER") {
        Some("overrange (signal too bright)")
    } else if upper.contains("UNDER") {
        Some("underrange (signal too dim)")
    } else if upper.contains("SAT") {
        Some("saturated (detector overloaded)")
    } else {
        None
    };
    if let Some(reason) = fault {
        return Err(DaqError::protocol(DEVICE, "D?", reply, reason));
    }
    let value = reply
        .parse::<f64>()
        .map_err(|_| DaqError::protocol(DEVICE, "D?", reply, "failed to parse power"))?;
    if !value.is_finite() {
        return Err(DaqError::protocol(DEVICE, "D?", reply, "power is not a finite number"));
    }
    Ok(PowerReading { value, unit })
}

// =============================================================================
// Newport1830C
// =============================================================================

/// Controller for one 1830-C power meter.
pub struct Newport1830C {
    link: Link,
    unit: Mutex<PowerUnit>,
}

impl Newport1830C {
    /// Disconnected controller for the meter behind `descriptor`.
    pub fn new(descriptor: ConnectionDescriptor, backend: Arc<dyn TransportFactory>) -> Self {
        Self {
            link: Link::new(DeviceFamily::PowerMeter, descriptor, backend),
            unit: Mutex::new(PowerUnit::default()),
        }
    }

    /// Unit mode as last set or read.
    pub fn cached_unit(&self) -> PowerUnit {
        *self.unit.lock()
    }

    /// Read power once, interpreted in the cached unit.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_power(&self) -> AppResult<Option<PowerReading>> {
        let Some(reply) = self.link.query("D?")? else {
            return Ok(None);
        };
        parse_power_reply(&reply, self.cached_unit()).map(Some)
    }

    /// `n` sequential power reads, `n` in 1..=1000.
    ///
    /// Silent reads stay in the list as `None`. Averaging is up to the caller.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn sample_power(&self, n: usize) -> AppResult<Vec<Option<PowerReading>>> {
        if !(1..=MAX_SAMPLES).contains(&n) {
            return Err(DaqError::validation(
                "samples",
                n,
                format!("expected 1..={MAX_SAMPLES}"),
            ));
        }
        let samples = (0..n)
            .map(|_| self.get_power())
            .collect::<AppResult<Vec<_>>>()?;
        debug!(
            requested = n,
            missing = samples.iter().filter(|s| s.is_none()).count(),
            "Power samples"
        );
        Ok(samples)
    }

    /// Set the calibration wavelength, `nm` in 300..=1100.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn set_wavelength(&self, nm: f64) -> AppResult<()> {
        check_range("wavelength_nm", nm, WAVELENGTH_MIN_NM, WAVELENGTH_MAX_NM)?;
        self.link.send(&format!("L={nm:.0}"))
    }

    /// Calibration wavelength in nm.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_wavelength(&self) -> AppResult<Option<f64>> {
        let Some(reply) = self.link.query("L?")? else {
            return Ok(None);
        };
        reply.parse::<f64>().map(Some).map_err(|_| {
            DaqError::protocol(DEVICE, "L?", reply.as_str(), "failed to parse wavelength")
        })
    }

    /// Switch the display unit.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn set_units(&self, unit: PowerUnit) -> AppResult<()> {
        self.link.send(&format!("U={}", unit.code()))?;
        *self.unit.lock() = unit;
        Ok(())
    }

    /// Read the display unit and refresh the cache.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_units(&self) -> AppResult<Option<PowerUnit>> {
        let Some(reply) = self.link.query("U?")? else {
            return Ok(None);
        };
        let unit = PowerUnit::from_code(&reply).ok_or_else(|| {
            DaqError::protocol(DEVICE, "U?", reply.as_str(), "expected 0 or 1")
        })?;
        *self.unit.lock() = unit;
        Ok(Some(unit))
    }

    /// Zero against the current reading.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn zero(&self) -> AppResult<()> {
        self.link.send("Z")
    }

    /// Put the attenuator in or out of the beam.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn set_attenuator(&self, enabled: bool) -> AppResult<()> {
        self.link.send(if enabled { "A=1" } else { "A=0" })
    }

    /// Select the analog filter.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn set_filter(&self, filter: Filter) -> AppResult<()> {
        self.link.send(&format!("F={}", filter as u8))
    }
}

impl DeviceProtocol for Newport1830C {
    fn link(&self) -> &Link {
        &self.link
    }

    /// Connected if `U?` answers `0` or `1`.
    fn probe(&self) -> AppResult<bool> {
        match self.get_units() {
            Ok(Some(unit)) => {
                info!(port = %self.link.descriptor().port, ?unit, "1830-C identified");
                Ok(true)
            }
            Ok(None) => {
                warn!(port = %self.link.descriptor().port, "1830-C silent during probe");
                Ok(false)
            }
            Err(DaqError::Protocol { reply, .. }) => {
                warn!(port = %self.link.descriptor().port, reply = %reply, "Unexpected unit reply");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for Newport1830C {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Newport1830C")
            .field("link", &self.link)
            .field("unit", &self.cached_unit())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_power_reply() {
        let reading = parse_power_reply("+.11E-9", PowerUnit::Watts).unwrap();
        assert!((reading.value - 0.11e-9).abs() < 1e-20);
        let reading = parse_power_reply("5.000E-3", PowerUnit::Watts).unwrap();
        assert!((reading.watts() - 5.0e-3).abs() < 1e-12);
        let reading = parse_power_reply("0", PowerUnit::Watts).unwrap();
        assert_eq!(reading.value, 0.0);
    }

    #[test]
    fn test_parse_power_reply_errors() {
        for reply in ["ERR", "OVER", "UNDER", "SAT", "abc", "inf", "-inf", "NaN", "infinity"] {
            assert!(matches!(
                parse_power_reply(reply, PowerUnit::Watts),
                Err(DaqError::Protocol { .. })
            ));
        }
    }

    #[test]
    fn test_dbm_to_watts() {
        let reading = PowerReading {
            value: 0.0,
            unit: PowerUnit::Dbm,
        };
        assert!((reading.watts() - 1.0e-3).abs() < 1e-12);
        let reading = PowerReading {
            value: -30.0,
            unit: PowerUnit::Dbm,
        };
        assert!((reading.watts() - 1.0e-6).abs() < 1e-15);
    }

    #[test]
    fn test_unit_codes() {
        assert_eq!(PowerUnit::from_code("0"), Some(PowerUnit::Watts));
        assert_eq!(PowerUnit::from_code("1"), Some(PowerUnit::Dbm));
        assert_eq!(PowerUnit::from_code("2"), None);
        assert_eq!(PowerUnit::Dbm.code(), 1);
    }
}
