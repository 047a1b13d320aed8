//! Simulated serial devices for the URASHG device layer.
//!
//! This crate provides a [`MockBackend`] that stands in for real serial
//! ports. Controllers built on it run unchanged protocol code, so range
//! validation, retries and empty-reply handling behave exactly as they do on
//! hardware.
//!
//! # Available Simulators
//!
//! - [`Ell14Simulator`] - ELL14 rotation mounts on one bus, with silent and faulted units
//! - [`MaiTaiSimulator`] - MaiTai laser with status byte and error queue
//! - [`PowerMeterSimulator`] - 1830-C power meter with unit mode and canned readings
//! - [`Esp300Simulator`] - ESP300 with up to three axes, instant or stepped motion
//! - [`ScriptedDevice`] - regex-pattern canned replies
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use urashg_driver_mock::{MockBackend, PowerMeterSimulator};
//!
//! let backend = Arc::new(MockBackend::new(PowerMeterSimulator::new()));
//! let meter = Newport1830C::new(descriptor, backend.clone());
//! assert!(meter.connect()?);
//! assert_eq!(backend.live_count(), 1);
//! ```

mod backend;
mod laser;
mod power_meter;
mod rotator;
mod scripted;
mod stage;

pub use backend::{DeviceSimulator, MockBackend, SimulatedTransport};
pub use laser::{MaiTaiSimulator, MAITAI_IDN};
pub use power_meter::PowerMeterSimulator;
pub use rotator::{Ell14Simulator, ELL14_PULSES_PER_REV};
pub use scripted::ScriptedDevice;
pub use stage::{Esp300Simulator, ESP300_IDN};
