//! Simulated Newport ESP300 motion controller.

use crate::backend::DeviceSimulator;
use std::collections::VecDeque;

/// Identity string returned by `*IDN?`.
pub const ESP300_IDN: &str = "ESP300 Version 3.08 09/09/02";

#[derive(Debug, Clone, Default)]
struct Axis {
    position: f64,
    target: f64,
    polls_left: u32,
    velocity: f64,
    acceleration: f64,
    motor_on: bool,
}

/// Simulated ESP300 with `axes` axes numbered from 1.
///
/// Motion is instant by default. With [`with_motion_polls`](Self::with_motion_polls)
/// every move stays in progress for that many `MD?` polls.
#[derive(Debug, Clone)]
pub struct Esp300Simulator {
    axes: Vec<Axis>,
    motion_polls: u32,
    errors: VecDeque<i32>,
    /// Identity reply.
    pub identity: String,
}

impl Esp300Simulator {
    /// Controller with `axes` axes at position 0.
    pub fn new(axes: u8) -> Self {
        let axis = Axis {
            velocity: 10.0,
            acceleration: 40.0,
            motor_on: true,
            ..Axis::default()
        };
        Self {
            axes: vec![axis; usize::from(axes)],
            motion_polls: 0,
            errors: VecDeque::new(),
            identity: ESP300_IDN.to_string(),
        }
    }

    /// Keep each move in progress for `polls` motion-done queries.
    pub fn with_motion_polls(mut self, polls: u32) -> Self {
        self.motion_polls = polls;
        self
    }

    /// Position of `axis` (1-based).
    pub fn position(&self, axis: u8) -> Option<f64> {
        self.axis(axis).map(|a| a.position)
    }

    /// Queue an error code for `TB?`.
    pub fn push_error(&mut self, code: i32) {
        self.errors.push_back(code);
    }

    fn axis(&self, axis: u8) -> Option<&Axis> {
        usize::from(axis).checked_sub(1).and_then(|i| self.axes.get(i))
    }

    fn axis_mut(&mut self, axis: u8) -> Option<&mut Axis> {
        usize::from(axis)
            .checked_sub(1)
            .and_then(|i| self.axes.get_mut(i))
    }

    fn start_move(&mut self, axis: u8, target: f64) {
        let polls = self.motion_polls;
        if let Some(a) = self.axis_mut(axis) {
            a.target = target;
            if polls == 0 {
                a.position = target;
            } else {
                a.polls_left = polls;
            }
        }
    }
}

impl DeviceSimulator for Esp300Simulator {
    fn respond(&mut self, command: &str) -> Option<String> {
        let command = command.trim();
        if command == "*IDN?" {
            return Some(self.identity.clone());
        }
        if command == "TB?" {
            return Some(match self.errors.pop_front() {
                Some(code) => format!("{code}, 0, ERROR {code}"),
                None => "0, 0, NO ERROR DETECTED".to_string(),
            });
        }

        let digits = command.chars().take_while(char::is_ascii_digit).count();
        let Ok(axis) = command[..digits].parse::<u8>() else {
            self.push_error(6);
            return None;
        };
        if self.axis(axis).is_none() {
            self.push_error(i32::from(axis) * 100 + 9);
            return None;
        }
        let rest = &command[digits..];
        let mnemonic = rest.get(..2).unwrap_or(rest).to_ascii_uppercase();
        let arg = rest.get(2..).unwrap_or("").trim();
        let value = arg.parse::<f64>().ok();

        match (mnemonic.as_str(), arg) {
            ("TP", _) => self.axis(axis).map(|a| format!("{:.5}", a.position)),
            ("MD", "?") => {
                let a = self.axis_mut(axis)?;
                if a.polls_left > 0 {
                    a.polls_left -= 1;
                    if a.polls_left == 0 {
                        a.position = a.target;
                    }
                    Some("0".to_string())
                } else {
                    Some("1".to_string())
                }
            }
            ("PA", _) => {
                match value {
                    Some(target) => self.start_move(axis, target),
                    None => self.push_error(7),
                }
                None
            }
            ("PR", _) => {
                match value {
                    Some(delta) => {
                        let base = self.axis(axis).map_or(0.0, |a| {
                            if a.polls_left > 0 {
                                a.target
                            } else {
                                a.position
                            }
                        });
                        self.start_move(axis, base + delta);
                    }
                    None => self.push_error(7),
                }
                None
            }
            ("OR", _) => {
                self.start_move(axis, 0.0);
                None
            }
            ("ST", _) => {
                if let Some(a) = self.axis_mut(axis) {
                    a.polls_left = 0;
                    a.target = a.position;
                }
                None
            }
            ("VA", "?") => self.axis(axis).map(|a| format!("{:.5}", a.velocity)),
            ("VA", _) => {
                match (value, self.axis_mut(axis)) {
                    (Some(v), Some(a)) => a.velocity = v,
                    _ => self.push_error(7),
                }
                None
            }
            ("AC", "?") => self.axis(axis).map(|a| format!("{:.5}", a.acceleration)),
            ("AC", _) => {
                match (value, self.axis_mut(axis)) {
                    (Some(v), Some(a)) => a.acceleration = v,
                    _ => self.push_error(7),
                }
                None
            }
            ("MO", "?") => self
                .axis(axis)
                .map(|a| if a.motor_on { "1" } else { "0" }.to_string()),
            ("MO", _) | ("MF", _) => {
                let on = mnemonic == "MO";
                if let Some(a) = self.axis_mut(axis) {
                    a.motor_on = on;
                }
                None
            }
            _ => {
                self.push_error(6);
                None
            }
        }
    }
}
