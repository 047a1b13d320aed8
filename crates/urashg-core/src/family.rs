//! Device families and their framing defaults.
//!
//! This is the one table of per-family serial defaults used by the
//! controllers, the configuration loader and port discovery.

use crate::transport::LineTerminator;
use serde::{Deserialize, Serialize};

/// The four instrument families this layer speaks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    /// Thorlabs ELL14 rotation mounts on an RS-485 multi-drop bus.
    RotationMount,
    /// Spectra-Physics MaiTai Ti:Sapphire laser.
    Laser,
    /// Newport 1830-C optical power meter.
    PowerMeter,
    /// Newport ESP300 motion controller.
    MotionController,
}

impl DeviceFamily {
    /// Every family, in discovery order.
    pub const ALL: [DeviceFamily; 4] = [
        DeviceFamily::RotationMount,
        DeviceFamily::Laser,
        DeviceFamily::PowerMeter,
        DeviceFamily::MotionController,
    ];

    /// Line terminator appended to outgoing commands.
    pub fn terminator(self) -> LineTerminator {
        match self {
            DeviceFamily::RotationMount | DeviceFamily::PowerMeter => LineTerminator::Lf,
            DeviceFamily::Laser | DeviceFamily::MotionController => LineTerminator::CrLf,
        }
    }

    /// Baud rates to try, factory default first.
    pub fn baud_rates(self) -> &'static [u32] {
        match self {
            DeviceFamily::RotationMount => &[9600],
            DeviceFamily::Laser => &[9600, 115200, 57600, 38400, 19200],
            DeviceFamily::PowerMeter => &[9600, 19200, 38400, 115200],
            DeviceFamily::MotionController => &[19200, 9600, 38400, 115200],
        }
    }

    /// Factory default baud rate.
    pub fn default_baud(self) -> u32 {
        // every table above is non-empty
        self.baud_rates().first().copied().unwrap_or(9600)
    }

    /// Device model name used in logs and errors.
    pub fn model(self) -> &'static str {
        match self {
            DeviceFamily::RotationMount => "ELL14",
            DeviceFamily::Laser => "MaiTai",
            DeviceFamily::PowerMeter => "Newport 1830-C",
            DeviceFamily::MotionController => "ESP300",
        }
    }

    /// Configuration key for this family.
    pub fn key(self) -> &'static str {
        match self {
            DeviceFamily::RotationMount => "rotation_mount",
            DeviceFamily::Laser => "laser",
            DeviceFamily::PowerMeter => "power_meter",
            DeviceFamily::MotionController => "motion_controller",
        }
    }
}

impl std::fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.model())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_baud_is_first_in_order() {
        assert_eq!(DeviceFamily::RotationMount.default_baud(), 9600);
        assert_eq!(DeviceFamily::Laser.default_baud(), 9600);
        assert_eq!(DeviceFamily::PowerMeter.default_baud(), 9600);
        assert_eq!(DeviceFamily::MotionController.default_baud(), 19200);
    }

    #[test]
    fn test_terminators() {
        assert_eq!(DeviceFamily::RotationMount.terminator(), LineTerminator::Lf);
        assert_eq!(DeviceFamily::Laser.terminator(), LineTerminator::CrLf);
        assert_eq!(DeviceFamily::MotionController.terminator().as_bytes(), b"\r\n");
    }

    #[test]
    fn test_serde_keys_match() {
        for family in DeviceFamily::ALL {
            let parsed: DeviceFamily =
                serde_json::from_str(&format!("\"{}\"", family.key())).unwrap();
            assert_eq!(parsed, family);
        }
    }
}
