//! BeagleBone (AM335x) sensor bus layer
//!
//! This crate provides the hardware bus and addressing layer shared by the
//! sensor daemons: memory-mapped GPIO, a dual-profile SPI bus with
//! parity-checked module addressing, a multiplexed I2C register bus, and a
//! bit-banged DHT decoder.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Sensor drivers (sensord)                    │
//! └───────┬──────────────────────┬─────────────────────┬────────────┘
//!         │                      │                     │
//! ┌───────▼────────┐   ┌─────────▼────────┐   ┌────────▼─────────┐
//! │  RegisterBus   │──►│  Addressing      │   │  dht::read       │
//! │  (i2c-dev)     │   │  (frames, CS)    │   │  (pulse widths)  │
//! └───────┬────────┘   └─────────┬────────┘   └────────┬─────────┘
//!         │            ┌─────────▼────────┐            │
//!         │            │  SerialBus       │            │
//!         │            │  (spidev, DS)    │            │
//!         │            └─────────┬────────┘            │
//! ┌───────▼──────────────────────▼─────────────────────▼────────────┐
//! │        GpioLine ── RegisterWindow (/dev/mem, 4 banks)           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`gpio`] - register windows and GPIO lines
//! - [`spi`] - serial bus with primary and secondary profiles
//! - [`addressing`] - module address frames and extension-board selection
//! - [`i2c`] - register bus with local and extension multiplexing
//! - [`dht`] - single-wire humidity/temperature decoder
//! - [`boards`] - AM335x register map and header pin-out
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use bbb_hal::prelude::*;
//!
//! let banks = GpioBanks::new();
//! let serial = Arc::new(SerialBus::open(DEFAULT_SPI_DEVICE, BusConfig::default(), &banks)?);
//! serial.write_to_module(5, &[0xFF])?;
//!
//! let i2c = RegisterBus::open(DEFAULT_I2C_DEVICE, &banks)?.with_extension(serial);
//! let bme = i2c.open_channel_handle(0x76)?;
//! let id = i2c.transaction(ChannelId::local(1)?, || bme.read(0xD0, 1))?;
//! ```
//!
//! All operations block. Nothing retries internally; [`Error::is_fatal`]
//! tells a caller whether a failure is worth retrying.

pub mod addressing;
pub mod boards;
pub mod dht;
pub mod error;
pub mod gpio;
pub mod i2c;
pub mod ioctl;
pub mod prelude;
pub mod sched;
pub mod spi;
pub mod time;

// Re-exports
pub use error::{Error, Result};
