//! Register-addressed two-wire bus
//!
//! The single `i2c-dev` controller fans out to sensors through two levels of
//! multiplexing:
//!
//! ```text
//!   i2c-2 ──► local mux (P9_15/P9_16, 4 channels)
//!                 └──► extension board selector (addressed over SPI)
//! ```
//!
//! A sensor is identified by a [`ChannelId`] plus the [`ChannelHandle`] for its
//! 7-bit target address. Handles are opened once per address for the life of
//! the bus.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::addressing::validate_extension_channel;
use crate::boards::Pin;
use crate::error::{Error, Result};
use crate::gpio::{GpioBanks, GpioLine, GpioPin};
use crate::ioctl::{self, I2C_SLAVE};
use crate::spi::{SerialBus, SpiDevice};

/// Default register bus device node
pub const DEFAULT_I2C_DEVICE: &str = "/dev/i2c-2";

/// Local multiplexer select, least significant bit
pub const MUX_LSB_PIN: Pin = Pin::P9_15;
/// Local multiplexer select, most significant bit
pub const MUX_MSB_PIN: Pin = Pin::P9_16;

/// Number of local multiplexer channels
pub const LOCAL_CHANNELS: u8 = 4;

/// Highest 7-bit target address
pub const MAX_TARGET_ADDRESS: u8 = 0x7F;

/// Kernel handle bound to one target address
pub trait I2cDevice: Send {
    /// Single write transaction
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Single read transaction
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens target-bound handles on one physical bus
pub trait I2cAdapter: Send + Sync {
    /// Handle type
    type Device: I2cDevice;

    /// Open a handle and bind it to `address`
    fn open(&self, address: u8) -> Result<Self::Device>;
}

/// Linux `i2c-dev` character device node
#[derive(Debug, Clone)]
pub struct LinuxI2c {
    path: PathBuf,
}

impl LinuxI2c {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl I2cAdapter for LinuxI2c {
    type Device = I2cDev;

    fn open(&self, address: u8) -> Result<I2cDev> {
        I2cDev::open(&self.path, address)
    }
}

/// `i2c-dev` handle with a selected target address
#[derive(Debug)]
pub struct I2cDev {
    file: File,
    address: u8,
}

impl I2cDev {
    /// Open `path` and select `address` with `I2C_SLAVE`
    pub fn open(path: &Path, address: u8) -> Result<Self> {
        let failed = |e| Error::open_failed(path.display().to_string(), e);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(failed)?;
        ioctl::ioctl_value(file.as_raw_fd(), I2C_SLAVE, libc::c_ulong::from(address))
            .map_err(failed)?;

        Ok(Self { file, address })
    }

    /// Selected target address
    pub fn address(&self) -> u8 {
        self.address
    }
}

impl I2cDevice for I2cDev {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.file.write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

/// How register reads and writes are framed for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Framing {
    /// Register address byte precedes every transfer
    #[default]
    Register,
    /// Device does its own addressing; payload goes out bare
    Bare,
}

/// Open handle for one target address
#[derive(Debug)]
pub struct ChannelHandle<T> {
    address: u8,
    framing: Framing,
    device: Mutex<T>,
}

impl<T: I2cDevice> ChannelHandle<T> {
    fn new(address: u8, framing: Framing, device: T) -> Self {
        Self {
            address,
            framing,
            device: Mutex::new(device),
        }
    }

    /// Target address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Framing chosen at open
    pub fn framing(&self) -> Framing {
        self.framing
    }

    /// Read `len` bytes from `register`
    ///
    /// A rejected register address counts as a failed read.
    pub fn read(&self, register: u8, len: usize) -> Result<Vec<u8>> {
        let mut device = self.device.lock();
        if self.framing == Framing::Register {
            Error::check_written(device.write(&[register]), 1).map_err(|e| match e {
                Error::WriteFailed { source, .. } => Error::ReadFailed { expected: len, source },
                other => other,
            })?;
        }

        let mut buf = vec![0u8; len];
        Error::check_read(device.read(&mut buf), len)?;
        Ok(buf)
    }

    /// Write `data` to `register` in one transaction
    pub fn write(&self, register: u8, data: &[u8]) -> Result<()> {
        let mut frame = Vec::with_capacity(data.len() + 1);
        if self.framing == Framing::Register {
            frame.push(register);
        }
        frame.extend_from_slice(data);

        let mut device = self.device.lock();
        Error::check_written(device.write(&frame), frame.len())?;
        Ok(())
    }
}

/// Physical route to a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId {
    local: u8,
    extension: Option<u8>,
}

impl ChannelId {
    /// Route through local channel `local` (0..=3) and, optionally, an
    /// extension-board channel. Park codes are rejected.
    pub fn new(local: u8, extension: Option<u8>) -> Result<Self> {
        if local >= LOCAL_CHANNELS {
            return Err(Error::ContractViolation("local channel out of range"));
        }
        let extension = extension.map(validate_extension_channel).transpose()?;
        Ok(Self { local, extension })
    }

    /// Local channel without an extension board
    pub fn local(local: u8) -> Result<Self> {
        Self::new(local, None)
    }

    pub fn local_channel(&self) -> u8 {
        self.local
    }

    pub fn extension_channel(&self) -> Option<u8> {
        self.extension
    }
}

/// Drives the extension-board selector
pub trait ExtensionSelect: Send + Sync {
    /// Route the extension board to `channel`
    fn select_extension_channel(&self, channel: u8) -> Result<()>;

    /// Park the extension board
    fn unselect_extension(&self) -> Result<()>;
}

impl<D, L> ExtensionSelect for SerialBus<D, L>
where
    D: SpiDevice,
    L: GpioPin + Send,
{
    fn select_extension_channel(&self, channel: u8) -> Result<()> {
        SerialBus::select_extension_channel(self, channel)
    }

    fn unselect_extension(&self) -> Result<()> {
        SerialBus::unselect_extension(self)
    }
}

struct LocalMux<L> {
    lsb: L,
    msb: L,
    configured: bool,
}

impl<L: GpioPin> LocalMux<L> {
    fn select(&mut self, channel: u8) -> Result<()> {
        if !self.configured {
            self.lsb.set_output()?;
            self.msb.set_output()?;
            self.configured = true;
        }
        self.lsb.write((channel & 0b01 != 0).into())?;
        self.msb.write((channel & 0b10 != 0).into())
    }
}

struct MuxState<L> {
    mux: LocalMux<L>,
    extension: Option<u8>,
}

type HandleSlot<T> = Arc<OnceCell<Arc<ChannelHandle<T>>>>;

/// Shared register bus
pub struct RegisterBus<A: I2cAdapter, L> {
    adapter: A,
    handles: Mutex<HashMap<u8, HandleSlot<A::Device>>>,
    state: Mutex<MuxState<L>>,
    extension: Option<Arc<dyn ExtensionSelect>>,
}

impl RegisterBus<LinuxI2c, GpioLine> {
    /// Bus on an `i2c-dev` node with the board's local mux lines
    pub fn open(path: impl Into<PathBuf>, banks: &GpioBanks) -> Result<Self> {
        let lsb = banks.resolve(MUX_LSB_PIN)?;
        let msb = banks.resolve(MUX_MSB_PIN)?;
        Ok(Self::new(LinuxI2c::new(path), lsb, msb))
    }
}

impl<A: I2cAdapter, L: GpioPin> RegisterBus<A, L> {
    pub fn new(adapter: A, lsb: L, msb: L) -> Self {
        Self {
            adapter,
            handles: Mutex::new(HashMap::new()),
            state: Mutex::new(MuxState {
                mux: LocalMux {
                    lsb,
                    msb,
                    configured: false,
                },
                extension: None,
            }),
            extension: None,
        }
    }

    /// Attach the extension-board selector
    pub fn with_extension(mut self, extension: Arc<dyn ExtensionSelect>) -> Self {
        self.extension = Some(extension);
        self
    }

    /// Handle for `address` with register framing
    pub fn open_channel_handle(&self, address: u8) -> Result<Arc<ChannelHandle<A::Device>>> {
        self.open_channel_handle_with(address, Framing::Register)
    }

    /// Handle for `address`, opened on first request
    ///
    /// Concurrent first requests for one address share a single open. A
    /// later request must ask for the framing the handle was opened with.
    pub fn open_channel_handle_with(
        &self,
        address: u8,
        framing: Framing,
    ) -> Result<Arc<ChannelHandle<A::Device>>> {
        if address > MAX_TARGET_ADDRESS {
            return Err(Error::ContractViolation("target address out of range"));
        }

        let slot = Arc::clone(self.handles.lock().entry(address).or_default());
        let handle = slot.get_or_try_init(|| {
            let device = self.adapter.open(address)?;
            debug!("i2c: opened target {:#04x} ({:?})", address, framing);
            Ok::<_, Error>(Arc::new(ChannelHandle::new(address, framing, device)))
        })?;

        if handle.framing != framing {
            return Err(Error::ContractViolation(
                "channel handle already open with another framing",
            ));
        }
        Ok(Arc::clone(handle))
    }

    /// Drive the local mux and, if requested, the extension board
    ///
    /// Selecting a channel without an extension parks a previously selected
    /// extension board first.
    pub fn select_channel(&self, channel: ChannelId) -> Result<()> {
        let mut state = self.state.lock();
        self.select_locked(&mut state, channel)
    }

    /// Park the extension board, if one is attached
    pub fn unselect_extension(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.unselect_locked(&mut state)
    }

    /// Read `len` bytes from `register` on `handle`
    pub fn read(&self, handle: &ChannelHandle<A::Device>, register: u8, len: usize) -> Result<Vec<u8>> {
        handle.read(register, len)
    }

    /// Write `data` to `register` on `handle`
    pub fn write(&self, handle: &ChannelHandle<A::Device>, register: u8, data: &[u8]) -> Result<()> {
        handle.write(register, data)
    }

    /// Select `channel` and run `f` with the mux held
    pub fn transaction<R>(&self, channel: ChannelId, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let mut state = self.state.lock();
        self.select_locked(&mut state, channel)?;
        f()
    }

    fn select_locked(&self, state: &mut MuxState<L>, channel: ChannelId) -> Result<()> {
        state.mux.select(channel.local)?;

        match channel.extension {
            Some(code) => {
                let extension = self
                    .extension
                    .as_ref()
                    .ok_or(Error::ContractViolation("no extension board attached"))?;
                extension.select_extension_channel(code)?;
                state.extension = Some(code);
                Ok(())
            }
            None if state.extension.is_some() => self.unselect_locked(state),
            None => Ok(()),
        }
    }

    fn unselect_locked(&self, state: &mut MuxState<L>) -> Result<()> {
        if let Some(extension) = &self.extension {
            extension.unselect_extension()?;
        }
        state.extension = None;
        Ok(())
    }
}
