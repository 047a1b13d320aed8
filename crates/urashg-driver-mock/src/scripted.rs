//! Regex-scripted device for one-off protocol scenarios.
//!
//! ```rust,ignore
//! let device = ScriptedDevice::new()
//!     .on(r"^\*IDN\?$", "Acme Widget 1.0")?
//!     .on(r"^(\d)TP\?$", "$1.00000")?;
//! ```

use crate::backend::DeviceSimulator;
use regex::Regex;

/// Replies chosen by the first matching pattern. Unmatched commands are silent.
#[derive(Debug, Clone, Default)]
pub struct ScriptedDevice {
    rules: Vec<(Regex, String)>,
    seen: Vec<String>,
}

impl ScriptedDevice {
    /// Device with no rules (silent to everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands matching `pattern` with `reply`.
    ///
    /// `reply` may reference capture groups (`$1`, `${name}`). An empty
    /// `reply` makes matching commands silent.
    pub fn on(mut self, pattern: &str, reply: impl Into<String>) -> Result<Self, regex::Error> {
        self.rules.push((Regex::new(pattern)?, reply.into()));
        Ok(self)
    }

    /// Commands received so far.
    pub fn seen(&self) -> &[String] {
        &self.seen
    }
}

impl DeviceSimulator for ScriptedDevice {
    fn respond(&mut self, command: &str) -> Option<String> {
        self.seen.push(command.to_string());
        let (regex, template) = self.rules.iter().find(|(re, _)| re.is_match(command))?;
        let captures = regex.captures(command)?;
        let mut reply = String::new();
        captures.expand(template, &mut reply);
        (!reply.is_empty()).then_some(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins_with_captures() {
        let mut device = ScriptedDevice::new()
            .on(r"^(\d)TP\?$", "${1}2.50000")
            .unwrap()
            .on(r".*", "fallback")
            .unwrap();
        assert_eq!(device.respond("3TP?").as_deref(), Some("32.50000"));
        assert_eq!(device.respond("XYZ").as_deref(), Some("fallback"));
        assert_eq!(device.seen().len(), 2);
    }

    #[test]
    fn test_unmatched_is_silent() {
        let mut device = ScriptedDevice::new().on(r"^U\?$", "").unwrap();
        assert_eq!(device.respond("U?"), None);
        assert_eq!(device.respond("D?"), None);
    }

    #[test]
    fn test_bad_pattern_is_error() {
        assert!(ScriptedDevice::new().on(r"(", "x").is_err());
    }
}
