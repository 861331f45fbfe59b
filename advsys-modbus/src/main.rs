//! Driver for AdvanticSys DM108 gateways.
//!
//! Polls one gateway over Modbus RTU and prints each reading as JSON
//! telemetry lines on stdout.

use advsys_modbus::config::{AppConfig, DeviceConfig, ModelKind};
use advsys_modbus::device::{Device, DeviceModel};
use advsys_modbus::models::{Dm108, Dm108c};
use advsys_modbus::telemetry::reading_points;
use advsys_modbus::transport::RtuTransport;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Modbus RTU driver for AdvanticSys DM108 gateways.
#[derive(Parser, Debug)]
#[command(name = "advsys-modbus")]
#[command(about = "Polls an AdvanticSys DM108 gateway and prints telemetry")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format)
    #[arg(short, long, default_value = "advsys.json5")]
    config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AppConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let mut log_config = config.logging.clone();
    if let Some(level) = args.log_level.clone() {
        log_config.level = level;
    }
    advsys_common::init_tracing(&log_config)
        .map_err(|e| anyhow::anyhow!("Failed to init tracing: {}", e))?;

    info!("Starting advsys-modbus");
    info!("Loaded configuration from {:?}", args.config);

    let device = &config.device;
    info!(
        "Device '{}': {} unit {} on {}",
        device.name,
        device.model.as_str(),
        device.unit_id,
        device.connection.port
    );
    let mut transport = RtuTransport::connect(
        device.serial_settings()?,
        device.unit_id,
        device.register_type,
        device.timeout(),
    )
    .await
    .with_context(|| format!("Failed to open {}", device.connection.port))?;

    match device.model {
        ModelKind::Dm108 => run::<Dm108>(device, &mut transport).await?,
        ModelKind::Dm108c => run::<Dm108c>(device, &mut transport).await?,
    }

    info!("advsys-modbus stopped");
    Ok(())
}

/// Identify the gateway, then poll it until Ctrl+C.
async fn run<M: DeviceModel>(config: &DeviceConfig, transport: &mut RtuTransport) -> Result<()> {
    let mut device =
        Device::<M, _>::construct(transport, config.unit_id, config.poller_config())
            .await
            .with_context(|| {
                format!(
                    "Failed to identify {} '{}' (unit {})",
                    M::NAME,
                    config.name,
                    config.unit_id
                )
            })?;

    info!(
        "Polling '{}' every {}s",
        config.name, config.poll_interval_secs
    );

    let mut interval = tokio::time::interval(config.poll_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(reading) = device.poll().await else {
                    continue;
                };
                for point in reading_points(&config.name, M::NAME, &reading) {
                    match point.to_json() {
                        Ok(line) => println!("{}", line),
                        Err(e) => error!("Failed to serialize {}: {}", point.metric, e),
                    }
                }
            }
            result = &mut shutdown => {
                result?;
                info!("Received shutdown signal");
                break;
            }
        }
    }

    Ok(())
}
