// SPDX-FileCopyrightText: 2024 Sensor Fleet Contributors
// SPDX-License-Identifier: MIT

//! Sensor polling daemon
//!
//! Opens the board's buses once and runs one polling thread per sensor
//! family, all sharing the same bus handles.
//!
//! ```text
//!   dht-*  ───────────────────────────────► GpioLine
//!   leak   ──► SerialBus ◄── RegisterBus ◄── register-*
//!   (outlets written once at startup)
//! ```

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{bail, Context};
use log::{error, info, warn};

use bbb_hal::prelude::*;

mod config;
mod pollers;
mod telemetry;

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::pollers::{DhtSensor, RegisterSensor, DHT_RETRY_DELAY};
use crate::telemetry::{LogTelemetry, Telemetry};

fn main() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sensord=info,bbb_hal=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if let Err(e) = run() {
        error!("sensord: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let path = env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load(&path)?;
    info!(
        "Starting sensord v{} with {}",
        env!("CARGO_PKG_VERSION"),
        path.display()
    );

    let banks = GpioBanks::new();
    let telemetry: Arc<dyn Telemetry> = Arc::new(LogTelemetry);
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    let serial = match &config.serial {
        Some(serial) => {
            let bus = SerialBus::open(&serial.device, serial.bus_config(), &banks)
                .with_context(|| format!("failed to open serial bus {}", serial.device))?;
            Some(Arc::new(bus))
        }
        None => None,
    };

    let register_bus = match &config.register_bus {
        Some(bus_config) => {
            let mut bus = RegisterBus::open(&bus_config.device, &banks)
                .with_context(|| format!("failed to open register bus {}", bus_config.device))?;
            if let (Some(address), Some(serial)) = (bus_config.extension_address, &serial) {
                serial
                    .set_extension_address(address)
                    .context("invalid extension address")?;
                serial.unselect_extension().context("failed to park extension board")?;
                let extension: Arc<dyn ExtensionSelect> = serial.clone();
                bus = bus.with_extension(extension);
            }
            Some(Arc::new(bus))
        }
        None => None,
    };

    if let (Some(outlets), Some(serial)) = (&config.outlets, &serial) {
        pollers::set_outlets(serial.as_ref(), outlets).context("failed to set outlets")?;
    }

    for dht in &config.dht {
        let line = banks
            .resolve(dht.pin()?)
            .with_context(|| format!("dht {}: failed to claim pin", dht.name))?;
        let mut sensor = DhtSensor {
            name: dht.name.clone(),
            kind: dht.kind()?,
            line,
            timing: DhtTiming::default(),
            retry_delay: DHT_RETRY_DELAY,
        };
        let telemetry = Arc::clone(&telemetry);
        workers.push(pollers::spawn_loop(
            format!("dht-{}", dht.name),
            dht.interval(),
            move || sensor.poll(telemetry.as_ref()),
        )?);
    }

    if let (Some(leak), Some(serial)) = (&config.leak, &serial) {
        let serial = Arc::clone(serial);
        let telemetry = Arc::clone(&telemetry);
        let address = leak.address;
        workers.push(pollers::spawn_loop(
            "leak".to_string(),
            leak.interval(),
            move || pollers::poll_leak(serial.as_ref(), address, telemetry.as_ref()),
        )?);
    }

    if let Some(bus) = &register_bus {
        for sensor_config in &config.register_sensor {
            let handle = bus
                .open_channel_handle_with(sensor_config.address, sensor_config.framing.into())
                .with_context(|| format!("register sensor {}: failed to open handle", sensor_config.name))?;
            let sensor = RegisterSensor {
                name: sensor_config.name.clone(),
                channel: sensor_config.channel()?,
                handle,
                register: sensor_config.register,
                len: sensor_config.len,
            };
            let bus = Arc::clone(bus);
            let telemetry = Arc::clone(&telemetry);
            workers.push(pollers::spawn_loop(
                format!("register-{}", sensor_config.name),
                sensor_config.interval(),
                move || sensor.poll(bus.as_ref(), telemetry.as_ref()),
            )?);
        }
    }

    if workers.is_empty() {
        warn!("No sensors configured in {}", path.display());
        return Ok(());
    }
    info!("Running {} polling loops", workers.len());

    for worker in workers {
        let name = worker.thread().name().unwrap_or("worker").to_string();
        if worker.join().is_err() {
            bail!("polling loop {} panicked", name);
        }
    }
    Ok(())
}
