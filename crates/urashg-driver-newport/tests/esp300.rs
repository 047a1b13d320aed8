//! ESP300 controller against the simulated motion controller.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use urashg_core::{ConnectionDescriptor, DaqError, DeviceProtocol};
use urashg_driver_mock::{Esp300Simulator, MockBackend, ESP300_IDN};
use urashg_driver_newport::{AxisLimits, Esp300};

type Backend = Arc<MockBackend<Esp300Simulator>>;

fn connected(sim: Esp300Simulator, axes: u8) -> (Esp300, Backend) {
    let backend = Arc::new(MockBackend::new(sim));
    let stage = Esp300::new(
        ConnectionDescriptor::new("/dev/ttyUSB3", 19200).mock(),
        axes,
        backend.clone(),
    );
    assert!(stage.connect().unwrap());
    (stage, backend)
}

#[test]
fn test_identify_and_crlf_framing() {
    let (stage, backend) = connected(Esp300Simulator::new(3), 3);
    backend.clear_commands();
    assert_eq!(stage.identify().unwrap().as_deref(), Some(ESP300_IDN));
    assert_eq!(backend.frames(), vec![b"*IDN?\r\n".to_vec()]);
}

#[test]
fn test_probe_rejects_foreign_identity() {
    let mut sim = Esp300Simulator::new(3);
    sim.identity = "Acme Widget 1.0".to_string();
    let backend = Arc::new(MockBackend::new(sim));
    let stage = Esp300::new(
        ConnectionDescriptor::new("/dev/ttyUSB3", 19200).mock(),
        3,
        backend.clone(),
    );
    assert!(!stage.connect().unwrap());
    assert_eq!(backend.live_count(), 0);
}

#[test]
fn test_absolute_and_relative_moves() {
    let (stage, backend) = connected(Esp300Simulator::new(3), 3);
    stage.move_absolute(2, 12.5).unwrap();
    assert_eq!(stage.get_position(2).unwrap(), Some(12.5));
    stage.move_relative(2, -2.5).unwrap();
    assert_eq!(backend.with_device(|sim| sim.position(2)), Some(10.0));
    assert!(backend.commands().contains(&"2PA12.500000".to_string()));
}

#[test]
fn test_partial_multi_axis_move() {
    let (stage, backend) = connected(Esp300Simulator::new(3), 3);
    backend.clear_commands();
    let targets = BTreeMap::from([(1, 5.0), (3, -2.5)]);
    stage.move_multiple_axes(&targets).unwrap();

    assert_eq!(
        backend.commands(),
        vec!["1PA5.000000".to_string(), "3PA-2.500000".to_string()]
    );
    backend.with_device(|sim| {
        assert_eq!(sim.position(1), Some(5.0));
        assert_eq!(sim.position(2), Some(0.0));
        assert_eq!(sim.position(3), Some(-2.5));
    });
}

#[test]
fn test_multi_axis_move_validates_every_entry_first() {
    let (stage, backend) = connected(Esp300Simulator::new(3), 3);
    backend.clear_commands();
    let targets = BTreeMap::from([(1, 5.0), (2, 150.0)]);
    assert!(matches!(
        stage.move_multiple_axes(&targets),
        Err(DaqError::Validation { .. })
    ));
    let targets = BTreeMap::from([(1, 5.0), (4, 1.0)]);
    assert!(matches!(
        stage.move_multiple_axes(&targets),
        Err(DaqError::Validation { .. })
    ));
    assert!(backend.commands().is_empty());
}

#[test]
fn test_out_of_range_rejected_without_io() {
    let (stage, backend) = connected(Esp300Simulator::new(2), 2);
    backend.clear_commands();
    assert!(stage.move_absolute(1, 100.5).is_err());
    assert!(stage.move_absolute(3, 0.0).is_err());
    assert!(stage.move_absolute(0, 0.0).is_err());
    assert!(stage.move_relative(1, 200.1).is_err());
    assert!(stage.set_velocity(1, 0.0).is_err());
    assert!(stage.set_acceleration(1, f64::NAN).is_err());
    assert!(stage.get_position(3).is_err());
    assert!(backend.commands().is_empty());
}

#[test]
fn test_custom_limits() {
    let (stage, _backend) = connected(Esp300Simulator::new(1), 1);
    stage
        .set_limits(1, AxisLimits { min: 0.0, max: 25.0 })
        .unwrap();
    assert!(stage.move_absolute(1, -1.0).is_err());
    assert!(stage.move_absolute(1, 25.0).is_ok());
    assert!(stage
        .set_limits(1, AxisLimits { min: 5.0, max: 5.0 })
        .is_err());
}

#[test]
fn test_home_all_waits_for_motion_done() {
    let sim = Esp300Simulator::new(2).with_motion_polls(2);
    let (stage, backend) = connected(sim, 2);
    stage.move_absolute(1, 7.0).unwrap();
    assert!(stage.home_all(Some(Duration::from_secs(2))).unwrap());
    backend.with_device(|sim| {
        assert_eq!(sim.position(1), Some(0.0));
        assert_eq!(sim.position(2), Some(0.0));
    });
}

#[test]
fn test_home_all_without_wait_returns_immediately() {
    let (stage, backend) = connected(Esp300Simulator::new(3).with_motion_polls(5), 3);
    backend.clear_commands();
    assert!(stage.home_all(None).unwrap());
    assert_eq!(
        backend.commands(),
        vec!["1OR".to_string(), "2OR".to_string(), "3OR".to_string()]
    );
    assert_eq!(stage.is_motion_done(1).unwrap(), Some(false));
}

#[test]
fn test_wait_motion_done() {
    let (stage, _backend) = connected(Esp300Simulator::new(1).with_motion_polls(3), 1);
    stage.move_absolute(1, 4.0).unwrap();
    assert!(stage.wait_motion_done(1, Duration::from_secs(2)).unwrap());
    assert_eq!(stage.get_position(1).unwrap(), Some(4.0));
}

#[test]
fn test_stop_all() {
    let (stage, backend) = connected(Esp300Simulator::new(2), 2);
    backend.clear_commands();
    stage.stop_all().unwrap();
    assert_eq!(backend.commands(), vec!["1ST".to_string(), "2ST".to_string()]);
}

#[test]
fn test_velocity_acceleration_motor() {
    let (stage, backend) = connected(Esp300Simulator::new(1), 1);
    stage.set_velocity(1, 2.5).unwrap();
    assert_eq!(stage.get_velocity(1).unwrap(), Some(2.5));
    stage.set_acceleration(1, 8.0).unwrap();
    stage.motor_off(1).unwrap();
    stage.motor_on(1).unwrap();
    let commands = backend.commands();
    assert!(commands.contains(&"1AC8.000000".to_string()));
    assert!(commands.ends_with(&["1MF".to_string(), "1MO".to_string()]));
}

#[test]
fn test_drain_errors() {
    let (stage, backend) = connected(Esp300Simulator::new(1), 1);
    backend.with_device(|sim| {
        sim.push_error(7);
        sim.push_error(309);
    });
    assert_eq!(
        stage.drain_errors().unwrap(),
        vec!["7, 0, ERROR 7".to_string(), "309, 0, ERROR 309".to_string()]
    );
    assert!(stage.drain_errors().unwrap().is_empty());
}

#[test]
fn test_empty_multi_axis_move_requires_connection() {
    let backend = Arc::new(MockBackend::new(Esp300Simulator::new(3)));
    let stage = Esp300::new(
        ConnectionDescriptor::new("/dev/ttyUSB3", 19200).mock(),
        3,
        backend.clone(),
    );
    assert!(matches!(
        stage.move_multiple_axes(&BTreeMap::new()),
        Err(DaqError::NotConnected { .. })
    ));

    assert!(stage.connect().unwrap());
    backend.clear_commands();
    stage.move_multiple_axes(&BTreeMap::new()).unwrap();
    assert!(backend.commands().is_empty());
}
