//! Newport ESP300 Multi-Axis Motion Controller Driver
//!
//! Reference: ESP300 Universal Motion Controller/Driver User's Manual
//!
//! Protocol Overview:
//! - Format: ASCII command/response over RS-232
//! - Baud: 19200, 8N1, no flow control
//! - Terminator: CR+LF
//! - Commands: {Axis}{Command}{Value}
//! - Example: "1PA5.0" (axis 1, position absolute, 5.0mm)
//!
//! Motion and setting commands are not acknowledged. Errors are queued on the
//! controller and read back with `TB?`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::collections::BTreeMap;
//! use urashg_driver_newport::Esp300;
//!
//! let stage = Esp300::new(descriptor, 3, backend);
//! stage.connect()?;
//! stage.move_multiple_axes(&BTreeMap::from([(1, 5.0), (3, -2.5)]))?;
//! stage.home_all(Some(Duration::from_secs(30)))?;
//! ```

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};
use urashg_core::config::MAX_ESP300_AXES;
use urashg_core::{
    AppResult, ConnectionDescriptor, ControllerFactory, DaqError, DeviceFamily, DeviceProtocol,
    Link, TransportFactory,
};

/// Upper bound on `TB?` reads per drain.
pub const MAX_ERROR_READS: usize = 16;

const DEVICE: &str = "ESP300";
const POLL_INTERVAL: Duration = Duration::from_millis(50);

// =============================================================================
// Esp300Factory - ControllerFactory implementation
// =============================================================================

/// Factory for [`Esp300`] controllers.
#[derive(Debug, Clone, Copy)]
pub struct Esp300Factory {
    axes: u8,
}

impl Esp300Factory {
    /// Factory for controllers with `axes` axes.
    pub fn new(axes: u8) -> Self {
        Self { axes }
    }
}

impl ControllerFactory for Esp300Factory {
    type Controller = Esp300;

    fn family(&self) -> DeviceFamily {
        DeviceFamily::MotionController
    }

    fn name(&self) -> &'static str {
        "Newport ESP300 Motion Controller"
    }

    fn validate(&self, descriptor: &ConnectionDescriptor) -> AppResult<()> {
        if !(1..=MAX_ESP300_AXES).contains(&self.axes) {
            return Err(DaqError::validation(
                "axes",
                self.axes,
                format!("expected 1..={MAX_ESP300_AXES}"),
            ));
        }
        if descriptor.baud_rate == 0 {
            return Err(DaqError::validation("baud_rate", 0, "must be non-zero"));
        }
        Ok(())
    }

    fn build(
        &self,
        descriptor: &ConnectionDescriptor,
        backend: Arc<dyn TransportFactory>,
    ) -> AppResult<Esp300> {
        self.validate(descriptor)?;
        Ok(Esp300::new(descriptor.clone(), self.axes, backend))
    }
}

// =============================================================================
// Axis limits
// =============================================================================

/// Travel limits of one axis, in controller units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    /// Lowest allowed position.
    pub min: f64,
    /// Highest allowed position.
    pub max: f64,
}

impl Default for AxisLimits {
    fn default() -> Self {
        Self {
            min: -100.0,
            max: 100.0,
        }
    }
}

impl AxisLimits {
    /// `true` if `position` is finite and within the limits.
    pub fn contains(&self, position: f64) -> bool {
        position.is_finite() && position >= self.min && position <= self.max
    }

    /// Full travel span.
    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

// =============================================================================
// Esp300
// =============================================================================

/// Controller for one ESP300 and its axes.
pub struct Esp300 {
    link: Link,
    axes: u8,
    limits: Mutex<BTreeMap<u8, AxisLimits>>,
}

impl Esp300 {
    /// Disconnected controller with axes `1..=axes`, all at default limits.
    pub fn new(
        descriptor: ConnectionDescriptor,
        axes: u8,
        backend: Arc<dyn TransportFactory>,
    ) -> Self {
        let limits = (1..=axes).map(|axis| (axis, AxisLimits::default())).collect();
        Self {
            link: Link::new(DeviceFamily::MotionController, descriptor, backend),
            axes,
            limits: Mutex::new(limits),
        }
    }

    /// Number of configured axes.
    pub fn axis_count(&self) -> u8 {
        self.axes
    }

    /// Travel limits of `axis`.
    pub fn limits(&self, axis: u8) -> AppResult<AxisLimits> {
        self.check_axis(axis)?;
        Ok(self.limits.lock().get(&axis).copied().unwrap_or_default())
    }

    /// Replace the travel limits of `axis`.
    pub fn set_limits(&self, axis: u8, limits: AxisLimits) -> AppResult<()> {
        self.check_axis(axis)?;
        if !(limits.min.is_finite() && limits.max.is_finite() && limits.min < limits.max) {
            return Err(DaqError::validation(
                "limits",
                format!("{}..={}", limits.min, limits.max),
                "expected finite min < max",
            ));
        }
        self.limits.lock().insert(axis, limits);
        Ok(())
    }

    fn check_axis(&self, axis: u8) -> AppResult<()> {
        if (1..=self.axes).contains(&axis) {
            Ok(())
        } else {
            Err(DaqError::validation(
                "axis",
                axis,
                format!("expected 1..={}", self.axes),
            ))
        }
    }

    fn check_target(&self, axis: u8, position: f64) -> AppResult<()> {
        let limits = self.limits(axis)?;
        if limits.contains(position) {
            Ok(())
        } else {
            Err(DaqError::validation(
                format!("axis {axis} position"),
                position,
                format!("expected {}..={}", limits.min, limits.max),
            ))
        }
    }

    fn check_positive(parameter: &str, value: f64) -> AppResult<()> {
        if value.is_finite() && value > 0.0 {
            Ok(())
        } else {
            Err(DaqError::validation(parameter, value, "must be positive"))
        }
    }

    fn query_number(&self, command: &str) -> AppResult<Option<f64>> {
        let Some(reply) = self.link.query(command)? else {
            return Ok(None);
        };
        reply.parse::<f64>().map(Some).map_err(|_| {
            DaqError::protocol(DEVICE, command, reply.as_str(), "failed to parse number")
        })
    }

    /// Query controller identity (`*IDN?`).
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn identify(&self) -> AppResult<Option<String>> {
        self.link.query("*IDN?")
    }

    /// Actual position of `axis`.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_position(&self, axis: u8) -> AppResult<Option<f64>> {
        self.check_axis(axis)?;
        self.query_number(&format!("{axis}TP?"))
    }

    /// Start a move of `axis` to `position`.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn move_absolute(&self, axis: u8, position: f64) -> AppResult<()> {
        self.check_target(axis, position)?;
        self.link.send(&format!("{axis}PA{position:.6}"))
    }

    /// Start a move of `axis` by `delta`.
    ///
    /// `delta` may not exceed the travel span of the axis.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn move_relative(&self, axis: u8, delta: f64) -> AppResult<()> {
        let span = self.limits(axis)?.span();
        if !(delta.is_finite() && delta.abs() <= span) {
            return Err(DaqError::validation(
                format!("axis {axis} delta"),
                delta,
                format!("expected magnitude <= {span}"),
            ));
        }
        self.link.send(&format!("{axis}PR{delta:.6}"))
    }

    /// Start absolute moves for the axes in `targets`.
    ///
    /// Every entry is validated before any command is sent. Axes not in
    /// `targets` are left alone.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn move_multiple_axes(&self, targets: &BTreeMap<u8, f64>) -> AppResult<()> {
        self.link.ensure_open()?;
        for (&axis, &position) in targets {
            self.check_target(axis, position)?;
        }
        let _session = self.link.session();
        for (&axis, &position) in targets {
            self.link.send(&format!("{axis}PA{position:.6}"))?;
        }
        debug!(axes = ?targets.keys().collect::<Vec<_>>(), "Multi-axis move started");
        Ok(())
    }

    /// Search for home on every axis.
    ///
    /// With `wait`, blocks until every axis reports motion done and returns
    /// `Ok(false)` if that takes longer than `wait`. Without it, returns
    /// `Ok(true)` once the commands are written.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn home_all(&self, wait: Option<Duration>) -> AppResult<bool> {
        for axis in 1..=self.axes {
            self.link.send(&format!("{axis}OR"))?;
        }
        match wait {
            Some(timeout) => self.wait_all_done(timeout),
            None => Ok(true),
        }
    }

    /// Stop motion on every axis.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn stop_all(&self) -> AppResult<()> {
        for axis in 1..=self.axes {
            self.link.send(&format!("{axis}ST"))?;
        }
        Ok(())
    }

    /// `true` once `axis` has stopped.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn is_motion_done(&self, axis: u8) -> AppResult<Option<bool>> {
        self.check_axis(axis)?;
        let command = format!("{axis}MD?");
        let Some(reply) = self.link.query(&command)? else {
            return Ok(None);
        };
        match reply.as_str() {
            "1" => Ok(Some(true)),
            "0" => Ok(Some(false)),
            _ => Err(DaqError::protocol(
                DEVICE,
                command,
                reply.as_str(),
                "expected 0 or 1",
            )),
        }
    }

    /// Poll `axis` until motion is done. `Ok(false)` on timeout.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn wait_motion_done(&self, axis: u8, timeout: Duration) -> AppResult<bool> {
        let start = Instant::now();
        loop {
            if self.is_motion_done(axis)? == Some(true) {
                return Ok(true);
            }
            if start.elapsed() > timeout {
                warn!(axis, "ESP300 motion did not finish in time");
                return Ok(false);
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn wait_all_done(&self, timeout: Duration) -> AppResult<bool> {
        let deadline = Instant::now() + timeout;
        for axis in 1..=self.axes {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if !self.wait_motion_done(axis, remaining)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Set the velocity of `axis`.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn set_velocity(&self, axis: u8, velocity: f64) -> AppResult<()> {
        self.check_axis(axis)?;
        Self::check_positive("velocity", velocity)?;
        self.link.send(&format!("{axis}VA{velocity:.6}"))
    }

    /// Velocity of `axis`.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn get_velocity(&self, axis: u8) -> AppResult<Option<f64>> {
        self.check_axis(axis)?;
        self.query_number(&format!("{axis}VA?"))
    }

    /// Set the acceleration of `axis`.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn set_acceleration(&self, axis: u8, acceleration: f64) -> AppResult<()> {
        self.check_axis(axis)?;
        Self::check_positive("acceleration", acceleration)?;
        self.link.send(&format!("{axis}AC{acceleration:.6}"))
    }

    /// Power the motor of `axis`.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn motor_on(&self, axis: u8) -> AppResult<()> {
        self.check_axis(axis)?;
        self.link.send(&format!("{axis}MO"))
    }

    /// Unpower the motor of `axis`.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn motor_off(&self, axis: u8) -> AppResult<()> {
        self.check_axis(axis)?;
        self.link.send(&format!("{axis}MF"))
    }

    /// Read `TB?` until the controller reports error code 0.
    ///
    /// Returns every other report. Stops early on silence and after
    /// [`MAX_ERROR_READS`] reads.
    #[instrument(skip(self), fields(port = %self.link.descriptor().port))]
    pub fn drain_errors(&self) -> AppResult<Vec<String>> {
        let mut reports = Vec::new();
        for _ in 0..MAX_ERROR_READS {
            let Some(reply) = self.link.query("TB?")? else {
                break;
            };
            let code = reply.split(',').next().unwrap_or_default().trim();
            if code.parse::<i32>() == Ok(0) {
                break;
            }
            warn!(reply = %reply, "ESP300 error report");
            reports.push(reply);
        }
        Ok(reports)
    }
}

impl DeviceProtocol for Esp300 {
    fn link(&self) -> &Link {
        &self.link
    }

    /// Connected if `*IDN?` names an ESP controller.
    fn probe(&self) -> AppResult<bool> {
        let Some(identity) = self.identify()? else {
            warn!(port = %self.link.descriptor().port, "ESP300 silent during probe");
            return Ok(false);
        };
        let matched = identity.to_ascii_uppercase().contains("ESP");
        if matched {
            info!(
                port = %self.link.descriptor().port,
                identity = %identity,
                axes = self.axes,
                "ESP300 identified"
            );
        } else {
            warn!(
                port = %self.link.descriptor().port,
                identity = %identity,
                "Unexpected identity for ESP300"
            );
        }
        Ok(matched)
    }
}

impl std::fmt::Debug for Esp300 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Esp300")
            .field("link", &self.link)
            .field("axes", &self.axes)
            .finish_non_exhaustive()
    }
}
