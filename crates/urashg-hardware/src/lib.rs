//! Hardware assembly for the URASHG device layer.
//!
//! - [`registry`]: one connection per serial port, shared by any number of
//!   named clients
//! - [`bench`]: registries for every device in a [`HardwareConfig`](urashg_core::config::HardwareConfig)
//! - [`discovery`]: find which family answers on which port
//!
//! # Example
//!
//! ```rust,ignore
//! use urashg_hardware::SharedControllerRegistry;
//! use urashg_driver_newport::Newport1830CFactory;
//!
//! let meters = SharedControllerRegistry::new(Newport1830CFactory);
//! if meters.register("power-plugin", descriptor.clone()) {
//!     let meter = meters.handle_for("power-plugin").unwrap();
//!     println!("{:?}", meter.get_power()?);
//! }
//! meters.unregister("power-plugin");
//! ```

pub mod bench;
pub mod discovery;
pub mod registry;

pub use bench::{Bench, Station};
pub use discovery::{Discovery, DEFAULT_PROBE_TIMEOUT};
pub use registry::{ExclusiveAccess, SharedControllerRegistry};
