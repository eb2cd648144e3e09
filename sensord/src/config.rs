// SPDX-FileCopyrightText: 2024 Sensor Fleet Contributors
// SPDX-License-Identifier: MIT

//! Daemon configuration
//!
//! Every section is optional; a missing section disables the loop it feeds.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use bbb_hal::addressing::MAX_MODULE_ADDRESS;
use bbb_hal::boards::Pin;
use bbb_hal::dht::SensorKind;
use bbb_hal::i2c::{ChannelId, Framing, DEFAULT_I2C_DEVICE};
use bbb_hal::spi::{BusConfig, SpiMode, DEFAULT_SPI_DEVICE};

/// Default configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sensord.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub serial: Option<SerialConfig>,
    pub register_bus: Option<RegisterBusConfig>,
    pub dht: Vec<DhtConfig>,
    pub leak: Option<LeakConfig>,
    pub outlets: Option<OutletConfig>,
    pub register_sensor: Vec<RegisterSensorConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SerialConfig {
    pub device: String,
    pub mode: u8,
    pub word_size: u8,
    pub speed_hz: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        let bus = BusConfig::default();
        Self {
            device: DEFAULT_SPI_DEVICE.to_string(),
            mode: bus.mode.clock_mode(),
            word_size: bus.word_size,
            speed_hz: bus.speed_hz,
        }
    }
}

impl SerialConfig {
    pub fn bus_config(&self) -> BusConfig {
        BusConfig {
            mode: SpiMode::from_clock_mode(self.mode),
            word_size: self.word_size,
            speed_hz: self.speed_hz,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegisterBusConfig {
    pub device: String,
    /// Module address of the extension board selector
    pub extension_address: Option<u8>,
}

impl Default for RegisterBusConfig {
    fn default() -> Self {
        Self {
            device: DEFAULT_I2C_DEVICE.to_string(),
            extension_address: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DhtConfig {
    pub name: String,
    /// Header pin name, e.g. `P8_11`
    pub pin: String,
    #[serde(default = "default_dht_kind")]
    pub kind: String,
    #[serde(default = "default_dht_interval")]
    pub interval_secs: u64,
}

impl DhtConfig {
    pub fn pin(&self) -> anyhow::Result<Pin> {
        Pin::from_name(&self.pin).with_context(|| format!("dht {}: unknown pin {}", self.name, self.pin))
    }

    pub fn kind(&self) -> anyhow::Result<SensorKind> {
        SensorKind::from_name(&self.kind)
            .with_context(|| format!("dht {}: unknown sensor kind {}", self.name, self.kind))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_dht_kind() -> String {
    "dht22".to_string()
}

fn default_dht_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LeakConfig {
    pub address: u8,
    pub interval_secs: u64,
}

impl Default for LeakConfig {
    fn default() -> Self {
        Self {
            address: 3,
            interval_secs: 1,
        }
    }
}

impl LeakConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutletConfig {
    pub address: u8,
    /// Initial outlet states, outlet 0 first
    pub states: Vec<bool>,
}

impl Default for OutletConfig {
    fn default() -> Self {
        Self {
            address: 15,
            states: Vec::new(),
        }
    }
}

impl OutletConfig {
    /// Command byte with outlet `i` at bit `i + 1`
    pub fn bitmap(&self) -> u8 {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .fold(0u8, |acc, (i, _)| acc | 1 << (i + 1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramingConfig {
    #[default]
    Register,
    Bare,
}

impl From<FramingConfig> for Framing {
    fn from(framing: FramingConfig) -> Self {
        match framing {
            FramingConfig::Register => Framing::Register,
            FramingConfig::Bare => Framing::Bare,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterSensorConfig {
    pub name: String,
    pub local_channel: u8,
    pub extension_channel: Option<u8>,
    /// 7-bit target address
    pub address: u8,
    #[serde(default)]
    pub framing: FramingConfig,
    /// Register read each cycle
    pub register: u8,
    #[serde(default = "default_probe_len")]
    pub len: usize,
    #[serde(default = "default_register_interval")]
    pub interval_secs: u64,
}

impl RegisterSensorConfig {
    pub fn channel(&self) -> anyhow::Result<ChannelId> {
        ChannelId::new(self.local_channel, self.extension_channel)
            .with_context(|| format!("register sensor {}: invalid channel", self.name))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_probe_len() -> usize {
    1
}

fn default_register_interval() -> u64 {
    30
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-section checks that serde cannot express
    pub fn validate(&self) -> anyhow::Result<()> {
        let needs_serial = self.leak.is_some()
            || self.outlets.is_some()
            || self
                .register_bus
                .as_ref()
                .is_some_and(|bus| bus.extension_address.is_some());
        if needs_serial && self.serial.is_none() {
            bail!("[leak], [outlets] and extension_address need a [serial] section");
        }

        let modules = [
            ("[leak] address", self.leak.as_ref().map(|leak| leak.address)),
            ("[outlets] address", self.outlets.as_ref().map(|outlets| outlets.address)),
            (
                "extension_address",
                self.register_bus.as_ref().and_then(|bus| bus.extension_address),
            ),
        ];
        for (what, address) in modules {
            if let Some(address) = address.filter(|a| *a > MAX_MODULE_ADDRESS) {
                bail!("{} {} is not a module address (0..={})", what, address, MAX_MODULE_ADDRESS);
            }
        }

        if self.leak.as_ref().is_some_and(|leak| leak.interval_secs == 0) {
            bail!("[leak] interval_secs must be at least 1");
        }

        for dht in &self.dht {
            dht.pin()?;
            dht.kind()?;
            if dht.interval_secs == 0 {
                bail!("dht {}: interval_secs must be at least 1", dht.name);
            }
        }

        if !self.register_sensor.is_empty() && self.register_bus.is_none() {
            bail!("[[register_sensor]] entries need a [register_bus] section");
        }
        let has_extension = self
            .register_bus
            .as_ref()
            .is_some_and(|bus| bus.extension_address.is_some());
        for sensor in &self.register_sensor {
            sensor.channel()?;
            if sensor.interval_secs == 0 {
                bail!("register sensor {}: interval_secs must be at least 1", sensor.name);
            }
            if sensor.extension_channel.is_some() && !has_extension {
                bail!("register sensor {}: no extension_address configured", sensor.name);
            }
        }

        if let Some(outlets) = &self.outlets {
            if outlets.states.len() > 7 {
                bail!("at most 7 outlets fit the command byte");
            }
        }

        Ok(())
    }
}
