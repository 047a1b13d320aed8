//! `urashg`: bring-up and inspection of the URASHG serial bench.
//!
//! ```bash
//! urashg scan
//! urashg devices --config config/bench.toml
//! urashg power --config config/bench.toml --samples 20
//! ```
//!
//! Every command except `scan` reads a hardware config, registers one client
//! per device, prints what it finds and closes every port before exiting.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use urashg_core::config::{HardwareConfig, LoggingConfig};
use urashg_core::logging;
use urashg_driver_thorlabs::AxisReading;
use urashg_hardware::{discovery, Bench};

const CLIENT_PREFIX: &str = "urashg-cli";

#[derive(Parser)]
#[command(name = "urashg")]
#[command(about = "URASHG serial bench bring-up", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every serial port for known instruments
    Scan {
        /// Per-read timeout while probing, in milliseconds
        #[arg(long, default_value_t = 200)]
        timeout_ms: u64,
    },

    /// Connect every configured device and report which answered
    Devices {
        /// Hardware configuration file (TOML)
        #[arg(long)]
        config: PathBuf,
    },

    /// Print rotator angles and stage positions
    Positions {
        /// Hardware configuration file (TOML)
        #[arg(long)]
        config: PathBuf,
    },

    /// Print laser and power meter state
    Status {
        /// Hardware configuration file (TOML)
        #[arg(long)]
        config: PathBuf,
    },

    /// Average readings from every power meter
    Power {
        /// Hardware configuration file (TOML)
        #[arg(long)]
        config: PathBuf,

        /// Readings per meter
        #[arg(long, default_value_t = 10)]
        samples: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { timeout_ms } => scan(Duration::from_millis(timeout_ms)),
        Commands::Devices { config } => with_bench(&config, devices),
        Commands::Positions { config } => with_bench(&config, positions),
        Commands::Status { config } => with_bench(&config, status),
        Commands::Power { config, samples } => with_bench(&config, |bench| power(bench, samples)),
    }
}

fn scan(timeout: Duration) -> Result<()> {
    logging::init(&LoggingConfig::default())?;
    println!("Scanning serial ports (probe timeout {timeout:?})");
    println!("Make sure lasers are shuttered before probing.");

    let found = discovery::scan(timeout).context("listing serial ports")?;
    if found.is_empty() {
        println!("No known instruments found.");
        return Ok(());
    }
    for device in found {
        println!(
            "{:<16} {:<34} {:>6} baud  {}",
            device.port,
            device.family.model(),
            device.baud_rate,
            describe_discovery(&device)
        );
    }
    Ok(())
}

fn describe_discovery(device: &discovery::Discovery) -> String {
    if !device.addresses.is_empty() {
        let addresses: Vec<String> = device.addresses.iter().map(char::to_string).collect();
        return format!("addresses {}", addresses.join(","));
    }
    device.identity.clone().unwrap_or_default()
}

/// Load `path`, register the whole bench, run `f`, then shut everything down.
fn with_bench(path: &Path, f: impl FnOnce(&Bench) -> Result<()>) -> Result<()> {
    let config = HardwareConfig::load(path)
        .with_context(|| format!("loading hardware config {}", path.display()))?;
    logging::init(&config.logging)?;

    let bench = Bench::from_config(&config).context("assembling bench")?;
    bench.register_all(CLIENT_PREFIX);
    let result = f(&bench);
    bench.shutdown();
    info!("Done");
    result
}

fn devices(bench: &Bench) -> Result<()> {
    fn row(id: &str, port: &str, model: &str, connected: bool) {
        let state = if connected { "connected" } else { "unavailable" };
        println!("{id:<16} {port:<16} {model:<34} {state}");
    }

    for s in bench.rotators() {
        let d = s.descriptor();
        row(s.id(), &d.port, "Thorlabs ELL14", s.handle().is_some());
    }
    for s in bench.lasers() {
        let d = s.descriptor();
        row(s.id(), &d.port, "Spectra-Physics MaiTai", s.handle().is_some());
    }
    for s in bench.power_meters() {
        let d = s.descriptor();
        row(s.id(), &d.port, "Newport 1830-C", s.handle().is_some());
    }
    for s in bench.stages() {
        let d = s.descriptor();
        row(s.id(), &d.port, "Newport ESP300", s.handle().is_some());
    }
    Ok(())
}

fn positions(bench: &Bench) -> Result<()> {
    for station in bench.rotators() {
        let Some(bus) = station.handle() else {
            println!("{}: unavailable", station.id());
            continue;
        };
        for (address, reading) in bus.get_all_positions()? {
            let text = match reading {
                AxisReading::Position(deg) => format!("{deg:.3} deg"),
                AxisReading::NoReply => "no reply".to_string(),
                AxisReading::Fault(reason) => format!("fault: {reason}"),
            };
            println!("{} [{address}]: {text}", station.id());
        }
    }

    for station in bench.stages() {
        let Some(stage) = station.handle() else {
            println!("{}: unavailable", station.id());
            continue;
        };
        for axis in 1..=stage.axis_count() {
            let position = stage.get_position(axis)?;
            println!("{} axis {axis}: {}", station.id(), or_no_reply(position, " mm"));
        }
    }
    Ok(())
}

fn status(bench: &Bench) -> Result<()> {
    for station in bench.lasers() {
        let Some(laser) = station.handle() else {
            println!("{}: unavailable", station.id());
            continue;
        };
        let id = station.id();
        match laser.get_status()? {
            Some(s) => println!(
                "{id}: status 0x{:02X} (emission possible: {}, modelocked: {}, shutter open: {})",
                s.raw, s.emission_possible, s.modelocked, s.shutter_open
            ),
            None => println!("{id}: status no reply"),
        }
        println!("{id}: wavelength {}", or_no_reply(laser.get_wavelength()?, " nm"));
        println!("{id}: output {}", or_no_reply(laser.get_power()?, " W"));
        println!("{id}: warmup {}", or_no_reply(laser.get_warmup_percent()?, " %"));
        for report in laser.drain_errors()? {
            println!("{id}: error queue: {report}");
        }
    }

    for station in bench.power_meters() {
        let Some(meter) = station.handle() else {
            println!("{}: unavailable", station.id());
            continue;
        };
        let id = station.id();
        let units = meter.get_units()?.map(|u| format!("{u:?}"));
        println!("{id}: units {}", or_no_reply(units, ""));
        println!("{id}: wavelength {}", or_no_reply(meter.get_wavelength()?, " nm"));
    }
    Ok(())
}

fn power(bench: &Bench, samples: usize) -> Result<()> {
    for station in bench.power_meters() {
        let Some(meter) = station.handle() else {
            println!("{}: unavailable", station.id());
            continue;
        };
        let readings = meter
            .sample_power(samples)
            .with_context(|| format!("sampling {}", station.id()))?;
        let watts: Vec<f64> = readings.iter().flatten().map(|r| r.watts()).collect();
        if watts.is_empty() {
            println!("{}: no readings", station.id());
            continue;
        }
        let mean = watts.iter().sum::<f64>() / watts.len() as f64;
        println!(
            "{}: {mean:.4e} W ({} of {samples} readings)",
            station.id(),
            watts.len()
        );
    }
    Ok(())
}

fn or_no_reply<T: Display>(value: Option<T>, suffix: &str) -> String {
    match value {
        Some(v) => format!("{v}{suffix}"),
        None => "no reply".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_power_defaults_to_ten_samples() {
        let cli = Cli::try_parse_from(["urashg", "power", "--config", "bench.toml"]).unwrap();
        match cli.command {
            Commands::Power { samples, config } => {
                assert_eq!(samples, 10);
                assert_eq!(config, PathBuf::from("bench.toml"));
            }
            _ => panic!("expected power"),
        }
    }

    #[test]
    fn test_or_no_reply() {
        assert_eq!(or_no_reply(Some(800.0), " nm"), "800 nm");
        assert_eq!(or_no_reply(None::<f64>, " nm"), "no reply");
    }
}
