//! Spectra-Physics hardware drivers for the URASHG device layer.
//!
//! This crate provides drivers for Spectra-Physics instruments, including:
//! - MaiTai Ti:Sapphire Tunable Laser (RS-232/USB-to-USB)
//!
//! # Usage
//!
//! ```rust,ignore
//! use urashg_driver_spectra_physics::MaiTaiFactory;
//! use urashg_hardware::SharedControllerRegistry;
//!
//! let registry = SharedControllerRegistry::new(MaiTaiFactory);
//! registry.register("laser-plugin", descriptor);
//! ```

mod maitai;

pub use maitai::{
    LaserStatus, MaiTai, MaiTaiFactory, MAX_ERROR_READS, WAVELENGTH_MAX_NM, WAVELENGTH_MIN_NM,
};
