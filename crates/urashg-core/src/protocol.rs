//! The common device contract.
//!
//! Every controller (`Ell14Bus`, `MaiTai`, `Newport1830C`, `Esp300`) owns one
//! [`Link`] and implements [`DeviceProtocol`] by supplying a liveness probe.
//! Connect, disconnect and state reporting come from the provided methods.
//!
//! # Reply conventions
//!
//! - Getters return `Ok(None)` when the device stayed silent after one retry.
//! - Malformed replies are `DaqError::Protocol`.
//! - Setters check ranges before any I/O and fail with
//!   `DaqError::Validation` without touching the transport.

use crate::error::{AppResult, DaqError};
use crate::family::DeviceFamily;
use crate::link::{ConnectionState, Link, SessionGuard};

/// Connect/disconnect contract shared by all instrument families.
pub trait DeviceProtocol: Send + Sync {
    /// The connection this controller talks through.
    fn link(&self) -> &Link;

    /// Family-specific liveness check, run while `Connecting`.
    ///
    /// `Ok(true)` means the expected device answered.
    fn probe(&self) -> AppResult<bool>;

    /// Instrument family.
    fn family(&self) -> DeviceFamily {
        self.link().family()
    }

    /// Open the transport and run [`probe`](Self::probe).
    fn connect(&self) -> AppResult<bool> {
        self.link().connect_with(|| self.probe())
    }

    /// Close the transport. Safe when never connected.
    fn disconnect(&self) {
        self.link().disconnect();
    }

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState {
        self.link().state()
    }

    /// `true` once the probe has succeeded.
    fn is_connected(&self) -> bool {
        self.link().is_connected()
    }

    /// Hold this connection for a multi-command sequence.
    fn session(&self) -> SessionGuard {
        self.link().session()
    }
}

/// Check `value` against an inclusive range before any I/O.
pub fn check_range(parameter: &str, value: f64, min: f64, max: f64) -> AppResult<()> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(DaqError::validation(
            parameter,
            value,
            format!("expected {min}..={max}"),
        ))
    }
}

/// Leading numeric part of a reply such as `820nm` or `1.50W`.
pub fn leading_number(reply: &str) -> Option<f64> {
    let trimmed = reply.trim();
    let end = trimmed
        .char_indices()
        .find(|&(i, c)| {
            !(c.is_ascii_digit()
                || c == '.'
                || ((c == '-' || c == '+') && (i == 0 || trimmed[..i].ends_with(['e', 'E'])))
                || ((c == 'e' || c == 'E') && i > 0))
        })
        .map_or(trimmed.len(), |(i, _)| i);
    trimmed[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_range_inclusive() {
        assert!(check_range("wavelength_nm", 690.0, 690.0, 1040.0).is_ok());
        assert!(check_range("wavelength_nm", 1040.0, 690.0, 1040.0).is_ok());
        assert!(matches!(
            check_range("wavelength_nm", 1040.5, 690.0, 1040.0),
            Err(DaqError::Validation { .. })
        ));
        assert!(check_range("wavelength_nm", f64::NAN, 690.0, 1040.0).is_err());
    }

    #[test]
    fn test_leading_number() {
        assert_eq!(leading_number("820nm"), Some(820.0));
        assert_eq!(leading_number("1.50W"), Some(1.5));
        assert_eq!(leading_number("5.0E-3"), Some(0.005));
        assert_eq!(leading_number("-12.5"), Some(-12.5));
        assert_eq!(leading_number("W"), None);
    }
}
