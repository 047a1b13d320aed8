//! Thorlabs Elliptec ELL14 Rotation Mount Bus
//!
//! Protocol: RS-485 multidrop bus, 9600 baud, ASCII encoded
//! Reference: ELLx modules protocol manual Issue 10
//!
//! Up to sixteen units share one serial line. Every command starts with the
//! one-character address of the unit it is for (`0`-`9`, `A`-`F`), followed
//! by a two-letter lower-case mnemonic and an optional 8-digit upper-case hex
//! argument. Replies echo the address with an upper-case mnemonic:
//!
//! | Command        | Meaning           | Reply            |
//! |----------------|-------------------|------------------|
//! | `2in`          | device info       | `2IN0E1140...`   |
//! | `2gp`          | get position      | `2PO00008C00`    |
//! | `2gs`          | get status        | `2GS00`          |
//! | `2ma00008C00`  | move absolute     | `2PO00008C00`    |
//! | `2mrFFFFFF9C`  | move relative     | `2PO...`         |
//! | `2ho0`         | home              | `2PO00000000`    |
//! | `2st`          | stop              | `2GS00`          |
//!
//! Positions are signed 32-bit step counts. A stock ELL14 has 143360 steps
//! per revolution; the exact figure is read per unit from its `in` reply.
//!
//! # Usage
//!
//! ```rust,ignore
//! use urashg_driver_thorlabs::Ell14Bus;
//!
//! let bus = Ell14Bus::new(descriptor, vec!['2', '3', '8'], backend);
//! bus.connect()?;
//! for (address, reading) in bus.get_all_positions()? {
//!     println!("{address}: {reading:?}");
//! }
//! ```

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace, warn};
use urashg_core::{
    AppResult, ConnectionDescriptor, ControllerFactory, DaqError, DeviceFamily, DeviceProtocol,
    Link, TransportFactory,
};

/// Steps per degree of a stock ELL14 (143360 / 360).
pub const DEFAULT_PULSES_PER_DEGREE: f64 = 143_360.0 / 360.0;

const DEVICE: &str = "ELL14";

// =============================================================================
// Ell14Factory - ControllerFactory implementation
// =============================================================================

/// Factory for [`Ell14Bus`] controllers.
#[derive(Debug, Clone)]
pub struct Ell14Factory {
    addresses: Vec<char>,
}

impl Ell14Factory {
    /// Factory for buses with units at `addresses`.
    pub fn new(addresses: Vec<char>) -> Self {
        Self { addresses }
    }
}

impl ControllerFactory for Ell14Factory {
    type Controller = Ell14Bus;

    fn family(&self) -> DeviceFamily {
        DeviceFamily::RotationMount
    }

    fn name(&self) -> &'static str {
        "Thorlabs ELL14 Rotation Mount"
    }

    fn validate(&self, descriptor: &ConnectionDescriptor) -> AppResult<()> {
        if self.addresses.is_empty() {
            return Err(DaqError::validation(
                "addresses",
                "[]",
                "at least one bus address is required",
            ));
        }
        if let Some(bad) = self.addresses.iter().find(|a| !a.is_ascii_hexdigit()) {
            return Err(DaqError::validation("address", bad, "expected 0-9 or A-F"));
        }
        if descriptor.baud_rate == 0 {
            return Err(DaqError::validation("baud_rate", 0, "must be non-zero"));
        }
        Ok(())
    }

    fn build(
        &self,
        descriptor: &ConnectionDescriptor,
        backend: Arc<dyn TransportFactory>,
    ) -> AppResult<Ell14Bus> {
        self.validate(descriptor)?;
        Ok(Ell14Bus::new(
            descriptor.clone(),
            self.addresses.clone(),
            backend,
        ))
    }
}

// =============================================================================
// ELL14 Status Codes
// =============================================================================

/// ELL14 status/error codes returned in GS responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ell14StatusCode {
    /// No error.
    Ok = 0x00,
    /// Communication timeout.
    CommunicationTimeout = 0x01,
    /// Mechanical timeout.
    MechanicalTimeout = 0x02,
    /// Command not understood.
    CommandError = 0x03,
    /// Argument out of range.
    ValueOutOfRange = 0x04,
    /// Module isolated.
    ModuleIsolated = 0x05,
    /// Module out of isolation.
    ModuleOutOfIsolation = 0x06,
    /// Initialisation error.
    InitializationError = 0x07,
    /// Thermal error.
    ThermalError = 0x08,
    /// Motion in progress.
    Busy = 0x09,
    /// Sensor error.
    SensorError = 0x0A,
    /// Motor error.
    MotorError = 0x0B,
    /// Position out of range.
    OutOfRange = 0x0C,
    /// Over-current.
    OverCurrentError = 0x0D,
    /// Anything else.
    Unknown = 0xFF,
}

impl Ell14StatusCode {
    /// Decode a two-digit hex status.
    pub fn from_hex(hex: &str) -> Self {
        match u8::from_str_radix(hex, 16) {
            Ok(code) => Self::from_u8(code),
            Err(_) => Self::Unknown,
        }
    }

    /// Decode a raw status byte.
    pub fn from_u8(code: u8) -> Self {
        match code {
            0x00 => Self::Ok,
            0x01 => Self::CommunicationTimeout,
            0x02 => Self::MechanicalTimeout,
            0x03 => Self::CommandError,
            0x04 => Self::ValueOutOfRange,
            0x05 => Self::ModuleIsolated,
            0x06 => Self::ModuleOutOfIsolation,
            0x07 => Self::InitializationError,
            0x08 => Self::ThermalError,
            0x09 => Self::Busy,
            0x0A => Self::SensorError,
            0x0B => Self::MotorError,
            0x0C => Self::OutOfRange,
            0x0D => Self::OverCurrentError,
            _ => Self::Unknown,
        }
    }

    /// `true` for [`Ell14StatusCode::Ok`].
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Operator-facing description.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Ok => "No error",
            Self::CommunicationTimeout => "Communication timeout",
            Self::MechanicalTimeout => "Mechanical timeout",
            Self::CommandError => "Command error",
            Self::ValueOutOfRange => "Value out of range",
            Self::ModuleIsolated => "Module isolated",
            Self::ModuleOutOfIsolation => "Module out of isolation",
            Self::InitializationError => "Initialization error",
            Self::ThermalError => "Thermal error",
            Self::Busy => "Busy",
            Self::SensorError => "Sensor error",
            Self::MotorError => "Motor error",
            Self::OutOfRange => "Position out of range",
            Self::OverCurrentError => "Over current error",
            Self::Unknown => "Unknown error",
        }
    }
}

// =============================================================================
// Replies
// =============================================================================

/// Parsed `in` reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Ell14Info {
    /// Bus address.
    pub address: char,
    /// Elliptec model code (0x0E for ELL14).
    pub model: u8,
    /// Serial number.
    pub serial: String,
    /// Year of manufacture.
    pub year: u16,
    /// Firmware release.
    pub firmware: String,
    /// Hardware release.
    pub hardware: String,
    /// Travel in degrees.
    pub travel: u32,
    /// Steps per revolution.
    pub pulses_per_unit: u32,
}

impl Ell14Info {
    /// Parse `<addr>IN<type:2><serial:8><year:4><fw:2><hw:2><travel:4><pulses:8>`.
    pub fn parse(address: char, reply: &str) -> Option<Self> {
        let body = reply.trim().strip_prefix(address)?.strip_prefix("IN")?;
        if body.len() < 30 || !body.is_ascii() {
            return None;
        }
        Some(Self {
            address,
            model: u8::from_str_radix(&body[0..2], 16).ok()?,
            serial: body[2..10].to_string(),
            year: body[10..14].parse().ok()?,
            firmware: body[14..16].to_string(),
            hardware: body[16..18].to_string(),
            travel: u32::from_str_radix(&body[18..22], 16).ok()?,
            pulses_per_unit: u32::from_str_radix(&body[22..30], 16).ok()?,
        })
    }

    /// Steps per degree implied by `pulses_per_unit`.
    pub fn pulses_per_degree(&self) -> f64 {
        f64::from(self.pulses_per_unit) / 360.0
    }
}

/// Outcome for one unit in a batch position read.
#[derive(Debug, Clone, PartialEq)]
pub enum AxisReading {
    /// Position in degrees, `[0, 360)`.
    Position(f64),
    /// The unit stayed silent.
    NoReply,
    /// The unit answered with an error or garbage.
    Fault(String),
}

/// Split a reply addressed to `address` into mnemonic and payload.
fn split_reply<'a>(address: char, reply: &'a str) -> Option<(&'a str, &'a str)> {
    let rest = reply.trim().strip_prefix(address)?;
    Some((rest.get(..2)?, rest.get(2..)?))
}

fn steps_from_hex(hex: &str) -> Option<i32> {
    let hex = hex.get(..8)?;
    u32::from_str_radix(hex, 16).ok().map(|raw| raw as i32)
}

/// Steps to degrees in `[0, 360)`.
pub fn steps_to_degrees(steps: i32, pulses_per_degree: f64) -> f64 {
    let degrees = (f64::from(steps) / pulses_per_degree).rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if degrees >= 360.0 {
        0.0
    } else {
        degrees
    }
}

// =============================================================================
// Ell14Bus
// =============================================================================

/// Controller for every ELL14 unit on one RS-485 bus.
pub struct Ell14Bus {
    link: Link,
    addresses: Vec<char>,
    calibration: Mutex<BTreeMap<char, f64>>,
}

impl Ell14Bus {
    /// Disconnected bus controller for the units at `addresses`.
    pub fn new(
        descriptor: ConnectionDescriptor,
        addresses: Vec<char>,
        backend: Arc<dyn TransportFactory>,
    ) -> Self {
        let addresses: Vec<char> = addresses
            .into_iter()
            .map(|a| a.to_ascii_uppercase())
            .collect();
        Self {
            link: Link::new(DeviceFamily::RotationMount, descriptor, backend),
            addresses,
            calibration: Mutex::new(BTreeMap::new()),
        }
    }

    /// Configured bus addresses.
    pub fn addresses(&self) -> &[char] {
        &self.addresses
    }

    /// Steps per degree used for `address`.
    pub fn pulses_per_degree(&self, address: char) -> f64 {
        self.calibration
            .lock()
            .get(&address.to_ascii_uppercase())
            .copied()
            .unwrap_or(DEFAULT_PULSES_PER_DEGREE)
    }

    fn check_address(&self, address: char) -> AppResult<char> {
        let address = address.to_ascii_uppercase();
        if self.addresses.contains(&address) {
            Ok(address)
        } else {
            Err(DaqError::validation(
                "address",
                address,
                format!("not configured on this bus ({:?})", self.addresses),
            ))
        }
    }

    fn interpret_move(
        &self,
        address: char,
        command: &str,
        reply: Option<String>,
    ) -> AppResult<bool> {
        let Some(reply) = reply else {
            warn!(address = %address, cmd = command, "No acknowledgement for move");
            return Ok(false);
        };
        match split_reply(address, &reply) {
            Some(("PO", _)) => Ok(true),
            Some(("GS", code)) => {
                let status = Ell14StatusCode::from_hex(code.get(..2).unwrap_or(code));
                if status.is_ok() {
                    Ok(true)
                } else {
                    Err(DaqError::protocol(
                        DEVICE,
                        command,
                        reply.as_str(),
                        status.description(),
                    ))
                }
            }
            _ => Err(DaqError::protocol(
                DEVICE,
                command,
                reply.as_str(),
                "expected PO or GS reply",
            )),
        }
    }

    /// Query `in` on one unit and refine its calibration.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_info(&self, address: char) -> AppResult<Option<Ell14Info>> {
        let address = self.check_address(address)?;
        let command = format!("{address}in");
        let Some(reply) = self.link.query(&command)? else {
            return Ok(None);
        };
        let info = Ell14Info::parse(address, &reply).ok_or_else(|| {
            DaqError::protocol(DEVICE, &command, reply.as_str(), "malformed info reply")
        })?;
        self.refine_calibration(&info);
        Ok(Some(info))
    }

    fn refine_calibration(&self, info: &Ell14Info) {
        let ppd = info.pulses_per_degree();
        // ~398 for an ELL14
        if ppd > 100.0 && ppd < 1000.0 {
            self.calibration.lock().insert(info.address, ppd);
            debug!(address = %info.address, pulses_per_degree = ppd, "Calibrated ELL14 unit");
        } else {
            warn!(
                address = %info.address,
                parsed_ppd = ppd,
                "Invalid pulses_per_degree parsed, using default"
            );
        }
    }

    /// Position of one unit in degrees, `[0, 360)`.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_position(&self, address: char) -> AppResult<Option<f64>> {
        let address = self.check_address(address)?;
        let command = format!("{address}gp");
        let Some(reply) = self.link.query(&command)? else {
            return Ok(None);
        };
        match split_reply(address, &reply) {
            Some(("PO", hex)) => {
                let steps = steps_from_hex(hex).ok_or_else(|| {
                    DaqError::protocol(DEVICE, &command, reply.as_str(), "bad position hex")
                })?;
                let degrees = steps_to_degrees(steps, self.pulses_per_degree(address));
                trace!(address = %address, steps, degrees, "ELL14 position");
                Ok(Some(degrees))
            }
            Some(("GS", code)) => Err(DaqError::protocol(
                DEVICE,
                &command,
                reply.as_str(),
                Ell14StatusCode::from_hex(code.get(..2).unwrap_or(code)).description(),
            )),
            _ => Err(DaqError::protocol(
                DEVICE,
                &command,
                reply.as_str(),
                "expected PO reply",
            )),
        }
    }

    /// Position of every configured unit.
    ///
    /// A silent or faulted unit is reported in its own entry and does not
    /// stop the others from being read.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_all_positions(&self) -> AppResult<BTreeMap<char, AxisReading>> {
        self.link.ensure_open()?;
        let mut readings = BTreeMap::new();
        for &address in &self.addresses {
            let reading = match self.get_position(address) {
                Ok(Some(degrees)) => AxisReading::Position(degrees),
                Ok(None) => {
                    warn!(address = %address, "ELL14 unit did not reply");
                    AxisReading::NoReply
                }
                Err(DaqError::Protocol { reason, reply, .. }) => {
                    warn!(address = %address, reply = %reply, "ELL14 unit fault: {}", reason);
                    AxisReading::Fault(reason)
                }
                Err(e) => return Err(e),
            };
            readings.insert(address, reading);
        }
        Ok(readings)
    }

    /// Move one unit to `degrees` in `[0, 360)`.
    ///
    /// `Ok(true)` on a position acknowledgement, `Ok(false)` when the unit
    /// stayed silent. Not retried.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn move_absolute(&self, address: char, degrees: f64) -> AppResult<bool> {
        if !(degrees.is_finite() && (0.0..360.0).contains(&degrees)) {
            return Err(DaqError::validation("degrees", degrees, "expected [0, 360)"));
        }
        let address = self.check_address(address)?;
        let steps = (degrees * self.pulses_per_degree(address)).round() as i32;
        let command = format!("{address}ma{:08X}", steps as u32);
        let reply = self.link.query_once(&command)?;
        self.interpret_move(address, &command, reply)
    }

    /// Move one unit by `delta` degrees, `delta` in `(-360, 360)`.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn move_relative(&self, address: char, delta: f64) -> AppResult<bool> {
        if !(delta.is_finite() && delta > -360.0 && delta < 360.0) {
            return Err(DaqError::validation("delta", delta, "expected (-360, 360)"));
        }
        let address = self.check_address(address)?;
        let steps = (delta * self.pulses_per_degree(address)).round() as i32;
        let command = format!("{address}mr{:08X}", steps as u32);
        let reply = self.link.query_once(&command)?;
        self.interpret_move(address, &command, reply)
    }

    /// Drive one unit to its mechanical zero.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn home(&self, address: char) -> AppResult<bool> {
        let address = self.check_address(address)?;
        let command = format!("{address}ho0");
        let reply = self.link.query_once(&command)?;
        self.interpret_move(address, &command, reply)
    }

    /// Stop any motion on one unit.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn stop(&self, address: char) -> AppResult<bool> {
        let address = self.check_address(address)?;
        let command = format!("{address}st");
        let reply = self.link.query_once(&command)?;
        self.interpret_move(address, &command, reply)
    }

    /// Status code of one unit.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_status(&self, address: char) -> AppResult<Option<Ell14StatusCode>> {
        let address = self.check_address(address)?;
        let command = format!("{address}gs");
        let Some(reply) = self.link.query(&command)? else {
            return Ok(None);
        };
        match split_reply(address, &reply) {
            Some(("GS", code)) if code.len() >= 2 => {
                let status = Ell14StatusCode::from_hex(&code[..2]);
                trace!(address = %address, ?status, "ELL14 status");
                Ok(Some(status))
            }
            _ => Err(DaqError::protocol(
                DEVICE,
                &command,
                reply.as_str(),
                "expected GS reply",
            )),
        }
    }

    /// Poll status until the unit reports OK three times in a row.
    ///
    /// `Ok(false)` if `timeout` passes first. A fault status other than
    /// busy is an error.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn wait_settled(&self, address: char, timeout: Duration) -> AppResult<bool> {
        let start = Instant::now();
        let mut consecutive_settled = 0;
        loop {
            if start.elapsed() > timeout {
                warn!(address = %address, consecutive_settled, "ELL14 wait_settled timed out");
                return Ok(false);
            }
            match self.get_status(address)? {
                Some(status) if status.is_ok() => {
                    consecutive_settled += 1;
                    if consecutive_settled >= 3 {
                        return Ok(true);
                    }
                }
                Some(Ell14StatusCode::Busy) | None => consecutive_settled = 0,
                Some(status) => {
                    return Err(DaqError::protocol(
                        DEVICE,
                        format!("{address}gs"),
                        format!("{:02X}", status as u8),
                        status.description(),
                    ))
                }
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}

impl DeviceProtocol for Ell14Bus {
    fn link(&self) -> &Link {
        &self.link
    }

    /// Connected if at least one configured unit answers `in`.
    fn probe(&self) -> AppResult<bool> {
        let mut alive = 0usize;
        for &address in &self.addresses {
            let command = format!("{address}in");
            match self.link.query(&command)? {
                Some(reply) if reply.starts_with(&format!("{address}IN")) => {
                    alive += 1;
                    match Ell14Info::parse(address, &reply) {
                        Some(info) => self.refine_calibration(&info),
                        None => warn!(
                            address = %address,
                            response = %reply,
                            "Incomplete IN response, using default calibration"
                        ),
                    }
                }
                Some(reply) => {
                    warn!(address = %address, response = %reply, "Unexpected reply to info query")
                }
                None => warn!(address = %address, "ELL14 unit silent during probe"),
            }
        }
        info!(
            port = %self.link.descriptor().port,
            alive,
            configured = self.addresses.len(),
            "ELL14 bus probe"
        );
        Ok(alive > 0)
    }
}

impl std::fmt::Debug for Ell14Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ell14Bus")
            .field("link", &self.link)
            .field("addresses", &self.addresses)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_parsing() {
        assert!(Ell14StatusCode::from_hex("00").is_ok());
        assert_eq!(
            Ell14StatusCode::from_hex("02"),
            Ell14StatusCode::MechanicalTimeout
        );
        assert_eq!(Ell14StatusCode::from_hex("0D"), Ell14StatusCode::OverCurrentError);
        assert_eq!(Ell14StatusCode::from_hex("FF"), Ell14StatusCode::Unknown);
        assert_eq!(Ell14StatusCode::from_hex("zz"), Ell14StatusCode::Unknown);
    }

    #[test]
    fn test_info_parsing() {
        let info = Ell14Info::parse('2', "2IN0E1140051720231701016800023000").unwrap();
        assert_eq!(info.model, 0x0E);
        assert_eq!(info.serial, "11400517");
        assert_eq!(info.year, 2023);
        assert_eq!(info.travel, 360);
        assert_eq!(info.pulses_per_unit, 143_360);
        assert!((info.pulses_per_degree() - DEFAULT_PULSES_PER_DEGREE).abs() < 1e-9);

        assert!(Ell14Info::parse('3', "2IN0E1140051720231701016800023000").is_none());
        assert!(Ell14Info::parse('2', "2IN0E11").is_none());
    }

    #[test]
    fn test_steps_to_degrees_normalises() {
        let ppd = DEFAULT_PULSES_PER_DEGREE;
        assert!((steps_to_degrees(0x8C00, ppd) - 90.0).abs() < 1e-9);
        assert!((steps_to_degrees(-0x8C00, ppd) - 270.0).abs() < 1e-9);
        let full_turn = steps_to_degrees(143_360, ppd);
        assert!(full_turn < 1e-6 || 360.0 - full_turn < 1e-6);
        assert!(steps_to_degrees(-1, ppd) < 360.0);
    }

    #[test]
    fn test_factory_identity() {
        let factory = Ell14Factory::new(vec!['2']);
        assert_eq!(factory.family(), DeviceFamily::RotationMount);
        assert_eq!(factory.name(), "Thorlabs ELL14 Rotation Mount");
    }

    #[test]
    fn test_factory_validate() {
        let desc = ConnectionDescriptor::new("/dev/ttyUSB0", 9600);
        assert!(Ell14Factory::new(vec!['2', 'A']).validate(&desc).is_ok());
        assert!(Ell14Factory::new(vec![]).validate(&desc).is_err());
        assert!(Ell14Factory::new(vec!['G']).validate(&desc).is_err());
    }
}
