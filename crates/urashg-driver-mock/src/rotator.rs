//! Simulated ELL14 rotation mounts on one RS-485 bus.

use crate::backend::DeviceSimulator;
use std::collections::{BTreeMap, HashSet};

/// Pulses per revolution reported by a stock ELL14.
pub const ELL14_PULSES_PER_REV: u32 = 143_360;

#[derive(Debug, Clone)]
struct Unit {
    position: i32,
    pulses_per_rev: u32,
    fault: u8,
    serial: u32,
}

/// A multi-drop bus of ELL14 units, keyed by one-character address.
///
/// Addresses not on the bus, and addresses marked silent, never answer.
#[derive(Debug, Clone, Default)]
pub struct Ell14Simulator {
    units: BTreeMap<char, Unit>,
    silent: HashSet<char>,
}

impl Ell14Simulator {
    /// Bus with one stock unit at each address, all at 0 degrees.
    pub fn new(addresses: &[char]) -> Self {
        let units = addresses
            .iter()
            .zip(11_400_517u32..)
            .map(|(&addr, serial)| {
                (
                    addr.to_ascii_uppercase(),
                    Unit {
                        position: 0,
                        pulses_per_rev: ELL14_PULSES_PER_REV,
                        fault: 0,
                        serial,
                    },
                )
            })
            .collect();
        Self {
            units,
            silent: HashSet::new(),
        }
    }

    /// Unit at `address` stops answering (power or cable fault).
    pub fn set_silent(&mut self, address: char, silent: bool) {
        let address = address.to_ascii_uppercase();
        if silent {
            self.silent.insert(address);
        } else {
            self.silent.remove(&address);
        }
    }

    /// Unit at `address` answers moves with `GS<code>` instead of `PO`.
    pub fn set_fault(&mut self, address: char, code: u8) {
        if let Some(unit) = self.units.get_mut(&address.to_ascii_uppercase()) {
            unit.fault = code;
        }
    }

    /// Override the calibration a unit reports in its `in` reply.
    pub fn set_pulses_per_rev(&mut self, address: char, pulses: u32) {
        if let Some(unit) = self.units.get_mut(&address.to_ascii_uppercase()) {
            unit.pulses_per_rev = pulses;
        }
    }

    /// Raw step count of a unit.
    pub fn position_pulses(&self, address: char) -> Option<i32> {
        self.units
            .get(&address.to_ascii_uppercase())
            .map(|u| u.position)
    }

    /// Put a unit at a raw step count.
    pub fn set_position_pulses(&mut self, address: char, pulses: i32) {
        if let Some(unit) = self.units.get_mut(&address.to_ascii_uppercase()) {
            unit.position = pulses;
        }
    }
}

fn parse_steps(arg: &str) -> Option<i32> {
    if arg.len() != 8 {
        return None;
    }
    u32::from_str_radix(arg, 16).ok().map(|raw| raw as i32)
}

impl DeviceSimulator for Ell14Simulator {
    fn respond(&mut self, command: &str) -> Option<String> {
        let mut chars = command.chars();
        let addr = chars.next()?.to_ascii_uppercase();
        if self.silent.contains(&addr) {
            return None;
        }
        let unit = self.units.get_mut(&addr)?;
        let rest = chars.as_str();
        let op = rest.get(..2).unwrap_or(rest);
        let arg = rest.get(2..).unwrap_or("");

        let position_reply = |unit: &Unit| format!("{addr}PO{:08X}", unit.position as u32);
        let status_reply = |code: u8| format!("{addr}GS{code:02X}");

        match op {
            // type, serial, year, firmware, hardware, travel, pulses per unit
            "in" => Some(format!(
                "{addr}IN0E{:08}20231701{:04X}{:08X}",
                unit.serial, 360u16, unit.pulses_per_rev
            )),
            "gp" => Some(position_reply(&*unit)),
            "gs" => Some(status_reply(unit.fault)),
            "ma" | "mr" if unit.fault != 0 => Some(status_reply(unit.fault)),
            "ma" => match parse_steps(arg) {
                Some(target) => {
                    unit.position = target;
                    Some(position_reply(&*unit))
                }
                None => Some(status_reply(0x03)),
            },
            "mr" => match parse_steps(arg) {
                Some(delta) => {
                    unit.position = unit.position.wrapping_add(delta);
                    Some(position_reply(&*unit))
                }
                None => Some(status_reply(0x03)),
            },
            "ho" => {
                unit.position = 0;
                Some(position_reply(&*unit))
            }
            "st" => Some(status_reply(0)),
            _ => Some(status_reply(0x03)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_reply_format() {
        let mut bus = Ell14Simulator::new(&['2']);
        bus.set_position_pulses('2', 0x8C00);
        assert_eq!(bus.respond("2gp").as_deref(), Some("2PO00008C00"));
    }

    #[test]
    fn test_relative_move_wraps_signed() {
        let mut bus = Ell14Simulator::new(&['3']);
        assert_eq!(bus.respond("3mrFFFFFF9C").as_deref(), Some("3POFFFFFF9C"));
        assert_eq!(bus.position_pulses('3'), Some(-100));
    }

    #[test]
    fn test_info_reply_carries_calibration() {
        let mut bus = Ell14Simulator::new(&['8']);
        let reply = bus.respond("8in").unwrap();
        assert!(reply.starts_with("8IN0E"));
        assert!(reply.ends_with("00023000"));
        assert_eq!(reply.len(), 33);
    }

    #[test]
    fn test_silent_and_absent_units() {
        let mut bus = Ell14Simulator::new(&['2', '3']);
        bus.set_silent('3', true);
        assert_eq!(bus.respond("3gp"), None);
        assert_eq!(bus.respond("9gp"), None);
        assert!(bus.respond("2gp").is_some());
    }

    #[test]
    fn test_fault_answers_moves_with_status() {
        let mut bus = Ell14Simulator::new(&['2']);
        bus.set_fault('2', 0x02);
        assert_eq!(bus.respond("2ma00000000").as_deref(), Some("2GS02"));
    }
}
