//! Thorlabs hardware drivers for the URASHG device layer.
//!
//! This crate provides:
//! - [`Ell14Bus`]: every ELL14 rotation mount on one RS-485 bus, behind one
//!   serial connection
//! - [`Ell14Factory`]: the matching `ControllerFactory` for the shared
//!   controller registry
//!
//! # Usage
//!
//! ```rust,ignore
//! use urashg_driver_thorlabs::Ell14Factory;
//! use urashg_hardware::SharedControllerRegistry;
//!
//! let registry = SharedControllerRegistry::new(Ell14Factory::new(vec!['2', '3', '8']));
//! registry.register("rotator-plugin", descriptor);
//! ```

mod ell14;

pub use ell14::{
    steps_to_degrees, AxisReading, Ell14Bus, Ell14Factory, Ell14Info, Ell14StatusCode,
    DEFAULT_PULSES_PER_DEGREE,
};
