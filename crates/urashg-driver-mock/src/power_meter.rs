//! Simulated Newport 1830-C optical power meter.

use crate::backend::DeviceSimulator;

/// Simulated power meter state.
#[derive(Debug, Clone)]
pub struct PowerMeterSimulator {
    /// Incident power in W.
    pub power_w: f64,
    /// Calibration wavelength in nm.
    pub wavelength_nm: u32,
    /// `false` for Watts, `true` for dBm.
    pub dbm: bool,
    /// Attenuator in the beam.
    pub attenuator: bool,
    /// Filter setting (1 slow, 2 medium, 3 fast).
    pub filter: u8,
    /// Offset subtracted after a `Z` command.
    pub zero_offset_w: f64,
    /// Raw `D?` reply overriding the computed one; `Some("")` is silence.
    pub canned_reading: Option<String>,
}

impl Default for PowerMeterSimulator {
    fn default() -> Self {
        Self {
            power_w: 5.0e-3,
            wavelength_nm: 800,
            dbm: false,
            attenuator: false,
            filter: 3,
            zero_offset_w: 0.0,
            canned_reading: None,
        }
    }
}

impl PowerMeterSimulator {
    /// Meter reading 5 mW at 800 nm in Watts mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Meter whose `D?` always answers `reply`.
    pub fn with_canned_reading(reply: impl Into<String>) -> Self {
        Self {
            canned_reading: Some(reply.into()),
            ..Self::default()
        }
    }

    fn reading(&self) -> Option<String> {
        if let Some(canned) = &self.canned_reading {
            return (!canned.is_empty()).then(|| canned.clone());
        }
        let watts = (self.power_w - self.zero_offset_w).max(0.0);
        if self.dbm {
            if watts <= 0.0 {
                return Some("UNDER".to_string());
            }
            Some(format!("{:.2}", 10.0 * (watts / 1.0e-3).log10()))
        } else {
            Some(format!("{watts:.3E}"))
        }
    }
}

impl DeviceSimulator for PowerMeterSimulator {
    fn respond(&mut self, command: &str) -> Option<String> {
        let command = command.trim();
        match command {
            "D?" => self.reading(),
            "L?" => Some(self.wavelength_nm.to_string()),
            "U?" => Some(if self.dbm { "1" } else { "0" }.to_string()),
            "A?" => Some(if self.attenuator { "1" } else { "0" }.to_string()),
            "F?" => Some(self.filter.to_string()),
            "Z" => {
                self.zero_offset_w = self.power_w;
                None
            }
            _ => {
                let (key, value) = command.split_once('=')?;
                match (key, value.trim()) {
                    ("L", nm) => match nm.parse() {
                        Ok(nm) => self.wavelength_nm = nm,
                        Err(_) => return Some("ERR".to_string()),
                    },
                    ("U", "0") => self.dbm = false,
                    ("U", "1") => self.dbm = true,
                    ("A", "0") => self.attenuator = false,
                    ("A", "1") => self.attenuator = true,
                    ("F", f @ ("1" | "2" | "3")) => self.filter = f.parse().unwrap_or(3),
                    _ => return Some("ERR".to_string()),
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_follows_unit_mode() {
        let mut meter = PowerMeterSimulator::new();
        assert_eq!(meter.respond("D?").as_deref(), Some("5.000E-3"));
        meter.respond("U=1");
        assert_eq!(meter.respond("U?").as_deref(), Some("1"));
        assert_eq!(meter.respond("D?").as_deref(), Some("6.99"));
    }

    #[test]
    fn test_canned_reading() {
        let mut meter = PowerMeterSimulator::with_canned_reading("OVER");
        assert_eq!(meter.respond("D?").as_deref(), Some("OVER"));
        meter.canned_reading = Some(String::new());
        assert_eq!(meter.respond("D?"), None);
    }

    #[test]
    fn test_set_commands_are_silent() {
        let mut meter = PowerMeterSimulator::new();
        assert_eq!(meter.respond("L=1064"), None);
        assert_eq!(meter.respond("L?").as_deref(), Some("1064"));
        assert_eq!(meter.respond("F=9").as_deref(), Some("ERR"));
    }
}
