//! Core types for the URASHG serial device layer.
//!
//! This crate holds everything the driver crates share:
//!
//! - [`error`]: `DaqError`, `AppResult` and failure categories
//! - [`descriptor`]: connection descriptors
//! - [`family`]: per-family framing and baud defaults
//! - [`transport`]: the line-oriented `Transport` contract and real serial ports
//! - [`link`]: per-connection locking, connection state and session gate
//! - [`protocol`]: the `DeviceProtocol` contract
//! - [`driver`]: `ControllerFactory`, used by the shared controller registry
//! - [`config`]: figment-based hardware configuration
//! - [`logging`]: tracing subscriber setup
//!
//! The layer is synchronous. Every call blocks the calling thread for at most
//! the descriptor timeout (twice for getters, which retry once on silence).

pub mod config;
pub mod descriptor;
pub mod driver;
pub mod error;
pub mod family;
pub mod link;
pub mod logging;
pub mod protocol;
pub mod transport;

pub use descriptor::ConnectionDescriptor;
pub use driver::ControllerFactory;
pub use error::{AppResult, DaqError, FailureCategory};
pub use family::DeviceFamily;
pub use link::{ConnectionState, Link, SessionGuard};
pub use protocol::DeviceProtocol;
pub use transport::{LineTerminator, SerialOpener, Transport, TransportFactory};
