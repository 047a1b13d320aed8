//! ELL14 bus behaviour against the simulated bus.

use std::sync::Arc;
use std::time::Duration;
use urashg_core::{ConnectionDescriptor, ConnectionState, DaqError, DeviceProtocol};
use urashg_driver_mock::{Ell14Simulator, MockBackend, ScriptedDevice};
use urashg_driver_thorlabs::{AxisReading, Ell14Bus, Ell14StatusCode, DEFAULT_PULSES_PER_DEGREE};

type Backend = Arc<MockBackend<Ell14Simulator>>;

fn bus_with(sim: Ell14Simulator, addresses: &[char]) -> (Ell14Bus, Backend) {
    let backend = Arc::new(MockBackend::new(sim));
    let bus = Ell14Bus::new(
        ConnectionDescriptor::new("/dev/ttyUSB0", 9600).mock(),
        addresses.to_vec(),
        backend.clone(),
    );
    (bus, backend)
}

fn connected(addresses: &[char]) -> (Ell14Bus, Backend) {
    let (bus, backend) = bus_with(Ell14Simulator::new(addresses), addresses);
    assert!(bus.connect().unwrap());
    (bus, backend)
}

#[test]
fn test_commands_are_lf_terminated_and_addressed() {
    let (bus, backend) = connected(&['2']);
    backend.clear_commands();
    bus.get_position('2').unwrap();
    assert_eq!(backend.frames(), vec![b"2gp\n".to_vec()]);
}

#[test]
fn test_position_in_degrees() {
    let (bus, backend) = connected(&['2']);
    backend.with_device(|sim| sim.set_position_pulses('2', 0x8C00));
    let degrees = bus.get_position('2').unwrap().unwrap();
    assert!((degrees - 90.0).abs() < 1e-6);
}

#[test]
fn test_negative_steps_normalise_into_range() {
    let (bus, backend) = connected(&['2']);
    backend.with_device(|sim| sim.set_position_pulses('2', -0x8C00));
    let degrees = bus.get_position('2').unwrap().unwrap();
    assert!((degrees - 270.0).abs() < 1e-6);
}

#[test]
fn test_partial_bus_failure_reports_per_address() {
    let mut sim = Ell14Simulator::new(&['2', '3', '8']);
    sim.set_silent('3', true);
    let (bus, _backend) = bus_with(sim, &['2', '3', '8']);
    assert!(bus.connect().unwrap());

    let readings = bus.get_all_positions().unwrap();
    assert_eq!(readings.len(), 3);
    assert_eq!(readings[&'2'], AxisReading::Position(0.0));
    assert_eq!(readings[&'3'], AxisReading::NoReply);
    assert_eq!(readings[&'8'], AxisReading::Position(0.0));
}

#[test]
fn test_fault_unit_reported_without_aborting_batch() {
    let device = ScriptedDevice::new()
        .on(r"^(\w)in$", "${1}IN0E1140051720231701016800023000")
        .unwrap()
        .on(r"^2gp$", "2PO00004600")
        .unwrap()
        .on(r"^3gp$", "3GS0B")
        .unwrap();
    let bus = Ell14Bus::new(
        ConnectionDescriptor::new("/dev/ttyUSB0", 9600).mock(),
        vec!['2', '3'],
        Arc::new(MockBackend::new(device)),
    );
    assert!(bus.connect().unwrap());

    let readings = bus.get_all_positions().unwrap();
    assert!(matches!(readings[&'2'], AxisReading::Position(d) if (d - 45.0).abs() < 1e-6));
    assert_eq!(readings[&'3'], AxisReading::Fault("Motor error".to_string()));
}

#[test]
fn test_probe_fails_when_every_unit_is_silent() {
    let mut sim = Ell14Simulator::new(&['2']);
    sim.set_silent('2', true);
    let (bus, backend) = bus_with(sim, &['2']);
    assert!(!bus.connect().unwrap());
    assert_eq!(bus.state(), ConnectionState::Disconnected);
    assert_eq!(backend.live_count(), 0);
}

#[test]
fn test_probe_refines_calibration() {
    let mut sim = Ell14Simulator::new(&['2', '3']);
    sim.set_pulses_per_rev('3', 262_144);
    let (bus, _backend) = bus_with(sim, &['2', '3']);
    assert!(bus.connect().unwrap());
    assert!((bus.pulses_per_degree('2') - DEFAULT_PULSES_PER_DEGREE).abs() < 1e-9);
    assert!((bus.pulses_per_degree('3') - 262_144.0 / 360.0).abs() < 1e-9);
}

#[test]
fn test_move_absolute_acknowledged() {
    let (bus, backend) = connected(&['8']);
    assert!(bus.move_absolute('8', 90.0).unwrap());
    assert_eq!(backend.with_device(|sim| sim.position_pulses('8')), Some(0x8C00));
    assert!(backend.commands().contains(&"8ma00008C00".to_string()));
}

#[test]
fn test_move_relative_encodes_twos_complement() {
    let (bus, backend) = connected(&['2']);
    backend.clear_commands();
    assert!(bus.move_relative('2', -90.0).unwrap());
    assert_eq!(backend.commands(), vec!["2mrFFFF7400".to_string()]);
}

#[test]
fn test_move_to_silent_unit_is_false_and_not_retried() {
    let (bus, backend) = connected(&['2', '3']);
    backend.with_device(|sim| sim.set_silent('3', true));
    backend.clear_commands();
    assert!(!bus.move_relative('3', 10.0).unwrap());
    assert_eq!(backend.commands().len(), 1);
}

#[test]
fn test_move_fault_is_protocol_error() {
    let (bus, backend) = connected(&['2']);
    backend.with_device(|sim| sim.set_fault('2', 0x02));
    assert!(matches!(
        bus.move_absolute('2', 45.0),
        Err(DaqError::Protocol { .. })
    ));
}

#[test]
fn test_out_of_range_moves_rejected_without_io() {
    let (bus, backend) = connected(&['2']);
    backend.clear_commands();
    for result in [
        bus.move_absolute('2', 360.0),
        bus.move_absolute('2', -0.1),
        bus.move_relative('2', 360.0),
        bus.move_relative('2', -360.0),
        bus.move_absolute('2', f64::NAN),
    ] {
        assert!(matches!(result, Err(DaqError::Validation { .. })));
    }
    assert!(backend.commands().is_empty());
}

#[test]
fn test_unconfigured_address_rejected() {
    let (bus, backend) = connected(&['2']);
    backend.clear_commands();
    assert!(matches!(
        bus.get_position('5'),
        Err(DaqError::Validation { .. })
    ));
    assert!(backend.commands().is_empty());
}

#[test]
fn test_home_stop_status_info() {
    let (bus, backend) = connected(&['2']);
    backend.with_device(|sim| sim.set_position_pulses('2', 1234));
    assert!(bus.home('2').unwrap());
    assert_eq!(backend.with_device(|sim| sim.position_pulses('2')), Some(0));
    assert!(bus.stop('2').unwrap());
    assert_eq!(bus.get_status('2').unwrap(), Some(Ell14StatusCode::Ok));

    let info = bus.get_info('2').unwrap().unwrap();
    assert_eq!(info.model, 0x0E);
    assert_eq!(info.pulses_per_unit, 143_360);
}

#[test]
fn test_wait_settled() {
    let (bus, _backend) = connected(&['2']);
    assert!(bus.wait_settled('2', Duration::from_secs(2)).unwrap());
}

#[test]
fn test_operations_require_connection() {
    let (bus, backend) = bus_with(Ell14Simulator::new(&['2']), &['2']);
    assert!(matches!(
        bus.get_position('2'),
        Err(DaqError::NotConnected { .. })
    ));
    assert!(matches!(
        bus.get_all_positions(),
        Err(DaqError::NotConnected { .. })
    ));
    assert_eq!(backend.opened_count(), 0);
}

#[test]
fn test_broken_pipe_surfaces_as_io() {
    let (bus, backend) = connected(&['2']);
    backend.break_pipe();
    assert!(matches!(bus.get_position('2'), Err(DaqError::Io(_))));
}
