//! Simulated MaiTai Ti:Sapphire laser.
//!
//! Speaks the SCPI-style subset the controller uses. Mnemonics are matched
//! case-insensitively on their long form. Set commands are silent, as on the
//! real laser.

use crate::backend::DeviceSimulator;
use std::collections::VecDeque;

/// Identity string returned by `*IDN?`.
pub const MAITAI_IDN: &str = "Spectra Physics,MaiTai,3227/51054/40856,0245-2.00.34";

/// Simulated laser state.
#[derive(Debug, Clone)]
pub struct MaiTaiSimulator {
    /// Tuned wavelength in nm.
    pub wavelength_nm: f64,
    /// Output power when emitting, in W.
    pub power_w: f64,
    /// Shutter open.
    pub shutter_open: bool,
    /// Pump diodes on.
    pub emission_on: bool,
    /// Warm-up progress in percent.
    pub warmup_percent: f64,
    /// Fixed `*STB?` value; derived from state when `None`.
    pub status_byte: Option<u8>,
    /// Identity reply.
    pub identity: String,
    errors: VecDeque<(i32, String)>,
}

impl Default for MaiTaiSimulator {
    fn default() -> Self {
        Self {
            wavelength_nm: 800.0,
            power_w: 1.5,
            shutter_open: false,
            emission_on: false,
            warmup_percent: 100.0,
            status_byte: None,
            identity: MAITAI_IDN.to_string(),
            errors: VecDeque::new(),
        }
    }
}

impl MaiTaiSimulator {
    /// Laser at 800 nm, shutter closed, emission off, fully warmed up.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for `SYSTem:ERRor?`.
    pub fn push_error(&mut self, code: i32, message: impl Into<String>) {
        self.errors.push_back((code, message.into()));
    }

    /// Errors not yet read.
    pub fn pending_errors(&self) -> usize {
        self.errors.len()
    }

    fn derived_status(&self) -> u8 {
        let mut byte = 0u8;
        if self.emission_on {
            byte |= 0b0000_0011;
        }
        if self.shutter_open {
            byte |= 0b0001_0000;
        }
        byte
    }
}

impl DeviceSimulator for MaiTaiSimulator {
    fn respond(&mut self, command: &str) -> Option<String> {
        let upper = command.trim().to_ascii_uppercase();
        let (head, arg) = match upper.split_once(' ') {
            Some((head, arg)) => (head, Some(arg.trim())),
            None => (upper.as_str(), None),
        };

        match (head, arg) {
            ("*IDN?", None) => Some(self.identity.clone()),
            ("*STB?", None) => Some(
                self.status_byte
                    .unwrap_or_else(|| self.derived_status())
                    .to_string(),
            ),
            ("WAVELENGTH?", None) => Some(format!("{:.0}nm", self.wavelength_nm)),
            ("WAVELENGTH", Some(value)) => {
                if let Ok(nm) = value.parse::<f64>() {
                    self.wavelength_nm = nm;
                }
                None
            }
            ("READ:POWER?", None) => {
                let watts = if self.emission_on { self.power_w } else { 0.0 };
                Some(format!("{watts:.2}W"))
            }
            ("SHUTTER?", None) => Some(if self.shutter_open { "1" } else { "0" }.to_string()),
            ("SHUTTER", Some(value)) => {
                match value {
                    "1" => self.shutter_open = true,
                    "0" => self.shutter_open = false,
                    _ => self.push_error(-224, "Illegal parameter value"),
                }
                None
            }
            ("ON", None) => {
                self.emission_on = true;
                None
            }
            ("OFF", None) => {
                self.emission_on = false;
                None
            }
            ("SYSTEM:ERROR?", None) => Some(match self.errors.pop_front() {
                Some((code, message)) => format!("{code},\"{message}\""),
                None => "0,\"NO ERROR\"".to_string(),
            }),
            ("READ:PCTWARMEDUP?", None) => Some(format!("{:.2}%", self.warmup_percent)),
            _ => {
                self.push_error(-113, "Undefined header");
                None
            }
        }
    }
}
