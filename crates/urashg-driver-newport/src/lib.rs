//! Newport hardware drivers for the URASHG device layer.
//!
//! This crate provides drivers for Newport instruments, including:
//! - ESP300 Universal Motion Controller (RS-232)
//! - 1830-C Optical Power Meter (RS-232)
//!
//! # Usage
//!
//! ```rust,ignore
//! use urashg_driver_newport::{Esp300Factory, Newport1830CFactory};
//! use urashg_hardware::SharedControllerRegistry;
//!
//! let stages = SharedControllerRegistry::new(Esp300Factory::new(3));
//! let meters = SharedControllerRegistry::new(Newport1830CFactory);
//! ```

pub mod esp300;
pub mod newport_1830c;

pub use esp300::{AxisLimits, Esp300, Esp300Factory};
pub use newport_1830c::{Filter, Newport1830C, Newport1830CFactory, PowerReading, PowerUnit};
