//! Loading hardware configuration from disk and the environment.

use std::io::Write;
use std::path::Path;
use urashg_core::config::{HardwareConfig, LogFormat};
use urashg_core::{DaqError, DeviceFamily};

const BENCH: &str = r#"
[logging]
level = "info"
format = "pretty"

[[devices]]
id = "rotators"
family = "rotation_mount"
port = "/dev/ttyUSB0"
mock = true
addresses = ["2", "3", "8"]

[[devices]]
id = "power"
family = "power_meter"
port = "/dev/ttyUSB1"
timeout_ms = 500
"#;

#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(BENCH.as_bytes()).unwrap();

    let config = HardwareConfig::load(file.path()).unwrap();
    assert_eq!(config.devices.len(), 2);
    assert_eq!(config.devices_of(DeviceFamily::PowerMeter).count(), 1);

    let power = config.devices_of(DeviceFamily::PowerMeter).next().unwrap();
    assert_eq!(power.descriptor().timeout_ms, 500);
    assert_eq!(power.descriptor().baud_rate, 9600);
}

#[test]
fn test_missing_file_is_configuration_error() {
    let err = HardwareConfig::load(Path::new("/nonexistent/urashg/bench.toml")).unwrap_err();
    assert!(matches!(err, DaqError::Configuration(_)));
}

#[test]
fn test_environment_overrides_file() {
    figment::Jail::expect_with(|jail| {
        jail.create_file("bench.toml", BENCH)?;
        jail.set_env("URASHG_LOGGING__LEVEL", "warn");
        jail.set_env("URASHG_LOGGING__FORMAT", "json");

        let config = HardwareConfig::load(Path::new("bench.toml")).map_err(|e| e.to_string())?;
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.logging.format, LogFormat::Json);
        Ok(())
    });
}

#[test]
fn test_unknown_family_rejected() {
    let toml = r#"
        [[devices]]
        id = "cam"
        family = "camera"
        port = "/dev/video0"
    "#;
    assert!(matches!(
        HardwareConfig::from_toml_str(toml),
        Err(DaqError::Figment(_))
    ));
}
