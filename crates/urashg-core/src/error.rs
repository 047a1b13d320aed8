//! Error types for the device layer.
//!
//! `DaqError` is the single error type returned by transports, device
//! protocols and the shared controller registry. Using `thiserror`, each
//! variant maps to one failure mode a host has to react to differently:
//!
//! - **`Connection`**: the transport could not be opened or claimed (missing
//!   device node, port already open elsewhere, permission denied).
//! - **`NotConnected`**: an operation was attempted on a disconnected handle.
//! - **`Protocol`**: a reply arrived but did not match the grammar expected for
//!   the command that was sent.
//! - **`Validation`**: an argument was outside the documented device range and
//!   was rejected before any I/O.
//! - **`UnknownClient`**: a registry operation named a client that never
//!   registered.
//! - **`Io`**: an I/O failure on an open transport (broken pipe).
//! - **`Configuration`** / **`Figment`**: hardware configuration problems.
//!
//! A device that stays silent is *not* an error: transports return an empty
//! line and protocol getters return `Ok(None)`.

use thiserror::Error;

/// Convenience alias for results using the device-layer error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Coarse classification used by hosts to pick an operator message.
///
/// "Hardware absent or wrong" needs a cable or port check, while "hardware
/// present but rejected the command" needs a look at the command itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// No device, wrong device or unusable port.
    HardwareAbsent,
    /// A device answered but the exchange failed.
    CommandRejected,
    /// The caller passed an argument the device cannot accept.
    InvalidArgument,
    /// Configuration or bookkeeping error on the host side.
    Internal,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FailureCategory::HardwareAbsent => "hardware_absent",
            FailureCategory::CommandRejected => "command_rejected",
            FailureCategory::InvalidArgument => "invalid_argument",
            FailureCategory::Internal => "internal",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for the device layer.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Transport could not be opened or claimed.
    #[error("Cannot open '{port}': {reason}")]
    Connection {
        /// Port path or mock identifier.
        port: String,
        /// Human-readable cause.
        reason: String,
    },

    /// Operation attempted while the device handle is disconnected.
    #[error("Device '{device}' is not connected")]
    NotConnected {
        /// Device name.
        device: String,
    },

    /// Reply present but malformed or reporting a device-side error.
    #[error("Protocol error from {device} on '{command}' (reply {reply:?}): {reason}")]
    Protocol {
        /// Device name.
        device: String,
        /// Command that produced the reply.
        command: String,
        /// Raw reply text.
        reply: String,
        /// Why the reply was rejected.
        reason: String,
    },

    /// Argument outside the documented device range. No I/O was performed.
    #[error("Invalid {parameter} = {value}: {reason}")]
    Validation {
        /// Parameter name.
        parameter: String,
        /// Offending value, formatted.
        value: String,
        /// Accepted range or rule.
        reason: String,
    },

    /// Registry operation for a client id that was never registered.
    #[error("Client '{0}' is not registered")]
    UnknownClient(String),

    /// I/O failure on an open transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Semantic configuration error.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Configuration file could not be read or parsed.
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl DaqError {
    /// Build a [`DaqError::Protocol`] from its parts.
    pub fn protocol(
        device: impl Into<String>,
        command: impl Into<String>,
        reply: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            device: device.into(),
            command: command.into(),
            reply: reply.into(),
            reason: reason.into(),
        }
    }

    /// Build a [`DaqError::Validation`] from its parts.
    pub fn validation(
        parameter: impl Into<String>,
        value: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::Validation {
            parameter: parameter.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Build a [`DaqError::Connection`] from its parts.
    pub fn connection(port: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connection {
            port: port.into(),
            reason: reason.into(),
        }
    }

    /// Classify this error for operator-facing reporting.
    pub fn category(&self) -> FailureCategory {
        match self {
            DaqError::Connection { .. } | DaqError::NotConnected { .. } => {
                FailureCategory::HardwareAbsent
            }
            DaqError::Io(_) => FailureCategory::HardwareAbsent,
            DaqError::Protocol { .. } => FailureCategory::CommandRejected,
            DaqError::Validation { .. } => FailureCategory::InvalidArgument,
            DaqError::UnknownClient(_)
            | DaqError::Configuration(_)
            | DaqError::Figment(_) => FailureCategory::Internal,
        }
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Figment(Box::new(err))
    }
}
