// SPDX-FileCopyrightText: 2024 Sensor Fleet Contributors
// SPDX-License-Identifier: MIT

//! Sensor polling cycles
//!
//! Each function runs one cycle against the bus layer and hands the result
//! to telemetry. [`spawn_loop`] repeats a cycle on its own thread.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use bbb_hal::dht::{self, DhtTiming, SensorKind};
use bbb_hal::gpio::GpioPin;
use bbb_hal::i2c::{ChannelHandle, ChannelId, I2cAdapter, I2cDevice, RegisterBus};
use bbb_hal::spi::{SerialBus, SpiDevice};
use bbb_hal::{time, Result};

use crate::config::OutletConfig;
use crate::telemetry::{Telemetry, Value};

/// Consecutive attempts per cycle before a read is reported failed
pub const ERROR_THRESHOLD: u32 = 5;

/// Pause between DHT attempts; the sensor needs ~2 s between conversions
pub const DHT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Run `f` up to `attempts` times, sleeping `delay` between attempts.
/// Fatal errors are returned at once.
pub fn with_retries<T>(attempts: u32, delay: Duration, mut f: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 1;
    loop {
        match f() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_fatal() || attempt >= attempts => return Err(e),
            Err(e) => {
                debug!("attempt {}/{} failed: {}", attempt, attempts, e);
                attempt += 1;
                time::sleep(delay);
            }
        }
    }
}

/// One DHT sensor on its own line
pub struct DhtSensor<P> {
    pub name: String,
    pub kind: SensorKind,
    pub line: P,
    pub timing: DhtTiming,
    pub retry_delay: Duration,
}

impl<P: GpioPin> DhtSensor<P> {
    pub fn poll(&mut self, telemetry: &dyn Telemetry) -> Result<()> {
        let (kind, timing) = (self.kind, self.timing);
        let line = &mut self.line;
        let reading = with_retries(ERROR_THRESHOLD, self.retry_delay, || {
            dht::read_with(kind, &mut *line, &timing)
        })?;

        telemetry.publish(&self.name, "humidity", Value::Float(reading.humidity));
        telemetry.publish(&self.name, "temperature", Value::Float(reading.temperature));
        Ok(())
    }
}

/// Read the leak detector module and publish each of its 8 inputs
pub fn poll_leak<D: SpiDevice, L: GpioPin>(
    serial: &SerialBus<D, L>,
    address: u8,
    telemetry: &dyn Telemetry,
) -> Result<()> {
    let states = serial.read_from_module(address)?;
    for i in 0..8 {
        telemetry.publish("leak_detector", &i.to_string(), Value::Flag(states >> i & 1 == 1));
    }
    Ok(())
}

/// Push the configured outlet states to the AC board
pub fn set_outlets<D: SpiDevice, L: GpioPin>(serial: &SerialBus<D, L>, outlets: &OutletConfig) -> Result<()> {
    let bitmap = outlets.bitmap();
    serial.write_to_module(outlets.address, &[bitmap])?;
    info!("outlets: module {} set to {:#010b}", outlets.address, bitmap);
    Ok(())
}

/// Register-bus sensor probed for raw register contents
pub struct RegisterSensor<T> {
    pub name: String,
    pub channel: ChannelId,
    pub handle: Arc<ChannelHandle<T>>,
    pub register: u8,
    pub len: usize,
}

impl<T: I2cDevice> RegisterSensor<T> {
    /// Read the probe register; an extension board is parked afterwards,
    /// on failure too.
    ///
    /// A read error takes precedence over a failed park. Data read before a
    /// failed park is still published.
    pub fn poll<A, L>(&self, bus: &RegisterBus<A, L>, telemetry: &dyn Telemetry) -> Result<()>
    where
        A: I2cAdapter<Device = T>,
        L: GpioPin,
    {
        let data = bus.transaction(self.channel, || bus.read(&self.handle, self.register, self.len));
        let parked = match self.channel.extension_channel() {
            Some(_) => bus.unselect_extension(),
            None => Ok(()),
        };

        let data = match data {
            Ok(data) => data,
            Err(e) => {
                if let Err(park) = parked {
                    warn!("{}: failed to park extension board: {}", self.name, park);
                }
                return Err(e);
            }
        };
        telemetry.publish(&self.name, "raw", Value::Raw(data));
        parked
    }
}

/// Run `cycle` every `interval` on a named thread, logging failures.
pub fn spawn_loop<F>(name: String, interval: Duration, mut cycle: F) -> io::Result<JoinHandle<()>>
where
    F: FnMut() -> Result<()> + Send + 'static,
{
    thread::Builder::new().name(name.clone()).spawn(move || {
        let mut failures = 0u64;
        loop {
            match cycle() {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures += 1;
                    warn!("{}: {} ({} consecutive failures)", name, e, failures);
                    if e.is_fatal() {
                        warn!("{}: stopping, hardware unusable", name);
                        return;
                    }
                }
            }
            thread::sleep(interval);
        }
    })
}
