//! Loadstar Sensors Probe Tool
//!
//! Connects to an interface board, prints its device info and optionally
//! tares it and captures a short continuous stream.
//!
//! Usage:
//!   cargo run --example loadstar_probe -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: /dev/ttyUSB0)
//!   --baud RATE       Baud rate (default: 115200)
//!   --config FILE     Load connection settings from a JSON file
//!   --current         Use the current firmware profile (LF responses)
//!   --unit UNIT       Report readings in UNIT (native unit queried from board)
//!   --tare            Tare before reading
//!   --stream MS       Capture a continuous stream for MS milliseconds
//!
//! Set RUST_LOG=loadstar_core=debug to watch the wire.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use loadstar_core::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();

    let mut config = ConnectionConfig::for_port("/dev/ttyUSB0");
    let mut output_unit: Option<String> = None;
    let mut tare = false;
    let mut stream_ms: Option<u64> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                config.port_name = args.get(i).context("--port needs a value")?.clone();
            }
            "--baud" | "-b" => {
                i += 1;
                config.baud_rate = args
                    .get(i)
                    .context("--baud needs a value")?
                    .parse()
                    .context("invalid baud rate")?;
            }
            "--config" | "-c" => {
                i += 1;
                let path = args.get(i).context("--config needs a file")?;
                let port_name = std::mem::take(&mut config.port_name);
                config = ConnectionConfig::load(path)
                    .with_context(|| format!("loading {path}"))?;
                if config.port_name.is_empty() {
                    config.port_name = port_name;
                }
            }
            "--current" => {
                config.firmware = FirmwareProfile::current();
            }
            "--unit" | "-u" => {
                i += 1;
                output_unit = Some(args.get(i).context("--unit needs a value")?.clone());
            }
            "--tare" => {
                tare = true;
            }
            "--stream" | "-s" => {
                i += 1;
                stream_ms = Some(
                    args.get(i)
                        .context("--stream needs a duration")?
                        .parse()
                        .context("invalid stream duration")?,
                );
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => {
                config.port_name = arg.to_string();
            }
            other => bail!("unknown option: {other}"),
        }
        i += 1;
    }

    println!("Opening {} at {} baud...", config.port_name, config.baud_rate);
    let port = open_port(&config)?;
    let sensor = LoadstarSensor::connect(port, config).await?;
    println!("✓ Sensor ready");

    if let Some(output) = output_unit {
        let native = sensor
            .native_units()
            .await?
            .context("board did not report its native unit")?;
        sensor.set_output_unit(&native, &output)?;
        println!("✓ Converting {native} to {output}");
    }

    let info = sensor.device_info().await?;
    println!("{}", serde_json::to_string_pretty(&info)?);

    if tare {
        if sensor.tare().await? {
            println!("✓ Tared");
        } else {
            println!("⚠ Tare not acknowledged");
        }
    }

    match sensor.sensor_value().await? {
        Some(sample) => println!("Reading: {sample}"),
        None => println!("⚠ No reading"),
    }

    if let Some(ms) = stream_ms {
        let (samples, stats) = sensor
            .sample_for_duration(Duration::from_millis(ms))
            .await?;
        println!(
            "Captured {} samples in {:.3}s ({:.1} samples/s)",
            stats.sample_count,
            stats.duration.as_secs_f64(),
            stats.samples_per_second
        );
        if let (Some(first), Some(last)) = (samples.first(), samples.last()) {
            println!("  first: {first}");
            println!("  last:  {last}");
        }
    }

    sensor.close().await?;
    Ok(())
}

fn print_help() {
    println!("Loadstar Sensors Probe Tool");
    println!();
    println!("Usage: loadstar_probe [OPTIONS] [PORT]");
    println!();
    println!("Options:");
    println!("  --port, -p PORT     Serial port (default: /dev/ttyUSB0)");
    println!("  --baud, -b RATE     Baud rate (default: 115200)");
    println!("  --config, -c FILE   Load connection settings from JSON");
    println!("  --current           Current firmware profile (LF responses)");
    println!("  --unit, -u UNIT     Report readings in UNIT");
    println!("  --tare              Tare before reading");
    println!("  --stream, -s MS     Capture a continuous stream for MS milliseconds");
    println!("  --help, -h          Show this help");
}
