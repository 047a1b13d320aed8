//! Spectra-Physics MaiTai Ti:Sapphire Laser Driver
//!
//! Reference: MaiTai HP/MaiTai XF User's Manual
//!
//! Protocol Overview:
//! - Format: ASCII SCPI-style command/response over RS-232 or USB-to-USB
//! - Baud: 9600 (RS-232) or 115200 (USB-to-USB), 8N1, NO flow control
//! - Command terminator: CR+LF (\r\n)
//! - Response terminator: LF (\n)
//! - Commands: `WAVelength <nm>`, `SHUTter 0|1`, `ON`, `OFF`
//! - Queries: `*IDN?`, `*STB?`, `WAVelength?`, `READ:POWer?`, `SHUTter?`,
//!   `SYSTem:ERRor?`, `READ:PCTWarmedup?`
//!
//! Response Formats (actual observed from hardware):
//! - `WAVelength?` -> "820nm" (value with "nm" suffix)
//! - `READ:POWer?` -> "1.50W"
//! - `SHUTter?` -> "0" or "1" (0=closed, 1=open)
//! - `*STB?` -> decimal status byte, e.g. "3"
//!
//! Set commands are not acknowledged. A set succeeds when the write does.
//!
//! # Usage
//!
//! ```rust,ignore
//! use urashg_driver_spectra_physics::MaiTai;
//!
//! let laser = MaiTai::new(descriptor, backend);
//! laser.connect()?;
//! laser.set_wavelength(800.0)?;
//! if let Some(status) = laser.get_status()? {
//!     println!("modelocked: {}", status.modelocked);
//! }
//! ```

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use urashg_core::protocol::{check_range, leading_number};
use urashg_core::{
    AppResult, ConnectionDescriptor, ControllerFactory, DaqError, DeviceFamily, DeviceProtocol,
    Link, TransportFactory,
};

/// Shortest tunable wavelength in nm.
pub const WAVELENGTH_MIN_NM: f64 = 690.0;
/// Longest tunable wavelength in nm.
pub const WAVELENGTH_MAX_NM: f64 = 1040.0;
/// Upper bound on `SYSTem:ERRor?` reads per drain.
pub const MAX_ERROR_READS: usize = 16;

const DEVICE: &str = "MaiTai";

// =============================================================================
// MaiTaiFactory - ControllerFactory implementation
// =============================================================================

/// Factory for [`MaiTai`] controllers.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaiTaiFactory;

impl ControllerFactory for MaiTaiFactory {
    type Controller = MaiTai;

    fn family(&self) -> DeviceFamily {
        DeviceFamily::Laser
    }

    fn name(&self) -> &'static str {
        "Spectra-Physics MaiTai Ti:Sapphire Laser"
    }

    fn build(
        &self,
        descriptor: &ConnectionDescriptor,
        backend: Arc<dyn TransportFactory>,
    ) -> AppResult<MaiTai> {
        self.validate(descriptor)?;
        Ok(MaiTai::new(descriptor.clone(), backend))
    }
}

// =============================================================================
// Status byte
// =============================================================================

/// Decoded `*STB?` status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaserStatus {
    /// Raw byte as reported.
    pub raw: u8,
    /// Bit 0: pump on, emission possible.
    pub emission_possible: bool,
    /// Bit 1: pulsing (modelocked).
    pub modelocked: bool,
    /// Bit 4: shutter open.
    pub shutter_open: bool,
}

impl LaserStatus {
    const EMISSION_POSSIBLE: u8 = 1 << 0;
    const MODELOCKED: u8 = 1 << 1;
    const SHUTTER_OPEN: u8 = 1 << 4;

    /// Decode a status byte.
    pub fn from_byte(raw: u8) -> Self {
        Self {
            raw,
            emission_possible: raw & Self::EMISSION_POSSIBLE != 0,
            modelocked: raw & Self::MODELOCKED != 0,
            shutter_open: raw & Self::SHUTTER_OPEN != 0,
        }
    }
}

// =============================================================================
// MaiTai
// =============================================================================

/// Controller for one MaiTai laser.
pub struct MaiTai {
    link: Link,
}

impl MaiTai {
    /// Disconnected controller for the laser behind `descriptor`.
    pub fn new(descriptor: ConnectionDescriptor, backend: Arc<dyn TransportFactory>) -> Self {
        Self {
            link: Link::new(DeviceFamily::Laser, descriptor, backend),
        }
    }

    fn parse_number(command: &str, reply: &str, what: &str) -> AppResult<f64> {
        leading_number(reply).ok_or_else(|| {
            DaqError::protocol(DEVICE, command, reply, format!("failed to parse {what}"))
        })
    }

    /// Query laser identity (`*IDN?`).
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn identify(&self) -> AppResult<Option<String>> {
        self.link.query("*IDN?")
    }

    /// Read and decode the status byte.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_status(&self) -> AppResult<Option<LaserStatus>> {
        let command = "*STB?";
        let Some(reply) = self.link.query(command)? else {
            return Ok(None);
        };
        let raw: u8 = reply.parse().map_err(|_| {
            DaqError::protocol(DEVICE, command, reply.as_str(), "expected a decimal status byte")
        })?;
        let status = LaserStatus::from_byte(raw);
        debug!(?status, "MaiTai status");
        Ok(Some(status))
    }

    /// Tuned wavelength in nm.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_wavelength(&self) -> AppResult<Option<f64>> {
        let command = "WAVelength?";
        match self.link.query(command)? {
            Some(reply) => Self::parse_number(command, &reply, "wavelength").map(Some),
            None => Ok(None),
        }
    }

    /// Tune to `nm`, in 690..=1040.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn set_wavelength(&self, nm: f64) -> AppResult<()> {
        check_range("wavelength_nm", nm, WAVELENGTH_MIN_NM, WAVELENGTH_MAX_NM)?;
        self.link.send(&format!("WAVelength {nm}"))
    }

    /// Output power in W.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_power(&self) -> AppResult<Option<f64>> {
        let command = "READ:POWer?";
        let Some(reply) = self.link.query(command)? else {
            return Ok(None);
        };
        let value = Self::parse_number(command, &reply, "power")?;
        if reply.to_ascii_lowercase().ends_with("mw") {
            Ok(Some(value / 1000.0))
        } else {
            Ok(Some(value))
        }
    }

    /// `true` when the shutter is open.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_shutter(&self) -> AppResult<Option<bool>> {
        let command = "SHUTter?";
        let Some(reply) = self.link.query(command)? else {
            return Ok(None);
        };
        match reply.as_str() {
            "0" => Ok(Some(false)),
            "1" => Ok(Some(true)),
            _ => Err(DaqError::protocol(
                DEVICE,
                command,
                reply.as_str(),
                "unexpected shutter state (expected 0 or 1)",
            )),
        }
    }

    /// Open or close the shutter.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn set_shutter(&self, open: bool) -> AppResult<()> {
        self.link
            .send(if open { "SHUTter 1" } else { "SHUTter 0" })
    }

    /// Turn the pump on or off.
    ///
    /// Turning emission on is refused unless the shutter reads closed. The
    /// shutter read and the `ON` command run in one session.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn set_emission(&self, on: bool) -> AppResult<()> {
        let _session = self.link.session();
        if on {
            let shutter = match self.get_shutter() {
                Ok(state) => state,
                Err(DaqError::Protocol { .. }) => None,
                Err(e) => return Err(e),
            };
            if shutter != Some(false) {
                warn!(?shutter, "Emission enable refused, shutter is open or state unknown");
                return Err(DaqError::validation(
                    "emission",
                    "on",
                    "shutter is open or state unknown, close the shutter first",
                ));
            }
        }
        self.link.send(if on { "ON" } else { "OFF" })
    }

    /// Read the error queue until it reports no error.
    ///
    /// Returns every non-empty report read. Stops early on silence and after
    /// [`MAX_ERROR_READS`] reads.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn drain_errors(&self) -> AppResult<Vec<String>> {
        let mut reports = Vec::new();
        for _ in 0..MAX_ERROR_READS {
            let Some(reply) = self.link.query("SYSTem:ERRor?")? else {
                break;
            };
            if is_no_error(&reply) {
                break;
            }
            warn!(reply = %reply, "MaiTai error report");
            reports.push(reply);
        }
        Ok(reports)
    }

    /// Warm-up progress in percent.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_warmup_percent(&self) -> AppResult<Option<f64>> {
        let command = "READ:PCTWarmedup?";
        match self.link.query(command)? {
            Some(reply) => Self::parse_number(command, &reply, "warm-up percentage").map(Some),
            None => Ok(None),
        }
    }
}

fn is_no_error(reply: &str) -> bool {
    let code = reply.split(',').next().unwrap_or(reply).trim();
    code.parse::<i32>() == Ok(0) || reply.to_ascii_uppercase().contains("NO ERROR")
}

impl DeviceProtocol for MaiTai {
    fn link(&self) -> &Link {
        &self.link
    }

    /// Connected if `*IDN?` names Spectra-Physics or MaiTai.
    fn probe(&self) -> AppResult<bool> {
        let Some(identity) = self.identify()? else {
            warn!(port = %self.link.descriptor().port, "MaiTai silent during probe");
            return Ok(false);
        };
        let lower = identity.to_ascii_lowercase();
        let matched = lower.contains("spectra") || lower.contains("maitai");
        if matched {
            info!(port = %self.link.descriptor().port, identity = %identity, "MaiTai identified");
        } else {
            warn!(
                port = %self.link.descriptor().port,
                identity = %identity,
                "Unexpected identity for MaiTai"
            );
        }
        Ok(matched)
    }
}

impl std::fmt::Debug for MaiTai {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaiTai").field("link", &self.link).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_byte_three() {
        let status = LaserStatus::from_byte(3);
        assert!(status.emission_possible);
        assert!(status.modelocked);
        assert!(!status.shutter_open);
    }

    #[test]
    fn test_status_byte_bits_are_independent() {
        let status = LaserStatus::from_byte(0b0001_0000);
        assert!(!status.emission_possible);
        assert!(!status.modelocked);
        assert!(status.shutter_open);

        // bits other than 0, 1 and 4 carry no meaning here
        let status = LaserStatus::from_byte(0b1110_1100);
        assert!(!status.emission_possible);
        assert!(!status.modelocked);
        assert!(!status.shutter_open);
        assert_eq!(status.raw, 0b1110_1100);
    }

    #[test]
    fn test_no_error_detection() {
        assert!(is_no_error("0,\"NO ERROR\""));
        assert!(is_no_error("0"));
        assert!(is_no_error("No error"));
        assert!(!is_no_error("-113,\"Undefined header\""));
    }

    #[test]
    fn test_factory_identity() {
        assert_eq!(MaiTaiFactory.family(), DeviceFamily::Laser);
        assert!(MaiTaiFactory
            .validate(&ConnectionDescriptor::new("/dev/ttyUSB5", 0))
            .is_err());
    }
}
