//! Connection descriptors.
//!
//! A [`ConnectionDescriptor`] names one physical serial connection: the port
//! path plus the framing parameters needed to open it. The shared controller
//! registry keys connections by `port`, so two descriptors that name the same
//! port describe the same connection even if their other fields differ.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default per-call read timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    /// No parity bit.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    /// One stop bit.
    #[default]
    One,
    /// Two stop bits.
    Two,
}

/// Identifies one serial connection and how to open it.
///
/// Immutable once the first client registers it with a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    /// Port path, e.g. `/dev/ttyUSB0` or `COM3`.
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Per-call read timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Data bits (8 unless the device says otherwise).
    #[serde(default)]
    pub data_bits: DataBits,
    /// Parity (none unless the device says otherwise).
    #[serde(default)]
    pub parity: Parity,
    /// Stop bits (one unless the device says otherwise).
    #[serde(default)]
    pub stop_bits: StopBits,
    /// Use the simulated backend instead of a real port.
    #[serde(default)]
    pub mock: bool,
}

impl ConnectionDescriptor {
    /// 8N1 descriptor with the default timeout.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            mock: false,
        }
    }

    /// Same descriptor routed to the simulated backend.
    pub fn mock(mut self) -> Self {
        self.mock = true;
        self
    }

    /// Override the per-call read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Per-call read timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether `other` can share this connection without a mismatch warning.
    ///
    /// Only the port and baud rate are compared.
    pub fn is_compatible(&self, other: &ConnectionDescriptor) -> bool {
        self.port == other.port && self.baud_rate == other.baud_rate
    }
}

impl std::fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.port, self.baud_rate)?;
        if self.mock {
            write!(f, " (mock)")?;
        }
        Ok(())
    }
}
