//! SPI bus with two configuration profiles
//!
//! A [`SerialBus`] owns one kernel `spidev` handle together with the
//! chip-select and data-strobe GPIO lines that frame addressed-module
//! traffic. Two configurations are held side by side:
//!
//! - the **primary** profile, chosen when the bus is opened, used for plain
//!   full-duplex transfers;
//! - the **secondary** profile (mode 3, 8-bit words, primary speed), used for
//!   module addressing and payloads.
//!
//! Switching between them only rewrites the fields that differ, and always
//! happens under the bus lock together with the strobe framing it belongs to.
//!
//! ```text
//!   strobe ────┐                         ┌──── high
//!              └─────────────────────────┘
//!   profile    primary │ secondary ... │ primary
//!   bytes                ▓▓▓▓▓▓▓▓▓▓▓
//! ```

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use log::debug;
use parking_lot::{Mutex, MutexGuard};

use crate::boards::Pin;
use crate::error::{Error, Result};
use crate::gpio::{GpioBanks, GpioLine, GpioPin};
use crate::ioctl::{
    self, SpiIocTransfer, SPI_IOC_MESSAGE_1, SPI_IOC_WR_BITS_PER_WORD, SPI_IOC_WR_MAX_SPEED_HZ,
    SPI_IOC_WR_MODE,
};

/// Default serial bus device node
pub const DEFAULT_SPI_DEVICE: &str = "/dev/spidev0.0";

/// Chip-select line framing raw module payloads
pub const CHIP_SELECT_PIN: Pin = Pin::P9_17;

/// Data-strobe line framing secondary-profile transfers
pub const DATA_STROBE_PIN: Pin = Pin::P9_14;

bitflags! {
    /// `spidev` mode word
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SpiMode: u8 {
        /// Sample on the second clock transition
        const CPHA = 0x01;
        /// Clock idles high
        const CPOL = 0x02;
        /// Chip select active high
        const CS_HIGH = 0x04;
        /// Least significant bit first
        const LSB_FIRST = 0x08;
        /// Shared SI/SO line
        const THREE_WIRE = 0x10;
        /// Loopback
        const LOOP = 0x20;
        /// No chip select
        const NO_CS = 0x40;
        /// Slave pulls low to pause
        const READY = 0x80;
    }
}

impl SpiMode {
    /// CPOL=0, CPHA=0
    pub const MODE_0: SpiMode = SpiMode::empty();
    /// CPOL=0, CPHA=1
    pub const MODE_1: SpiMode = SpiMode::CPHA;
    /// CPOL=1, CPHA=0
    pub const MODE_2: SpiMode = SpiMode::CPOL;
    /// CPOL=1, CPHA=1
    pub const MODE_3: SpiMode = SpiMode::CPOL.union(SpiMode::CPHA);

    /// Mode from a clock mode number (0..=3); higher bits are ignored.
    pub const fn from_clock_mode(mode: u8) -> Self {
        SpiMode::from_bits_truncate(mode & 0x03)
    }

    /// Clock mode number (0..=3)
    pub const fn clock_mode(&self) -> u8 {
        self.bits() & 0x03
    }
}

/// One bus configuration (clock mode, word size, clock speed)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    /// SPI mode word
    pub mode: SpiMode,
    /// Word size in bits
    pub word_size: u8,
    /// Clock frequency in Hz
    pub speed_hz: u32,
}

impl BusConfig {
    /// Secondary profile mode
    pub const SECONDARY_MODE: SpiMode = SpiMode::MODE_3;
    /// Secondary profile word size
    pub const SECONDARY_WORD_SIZE: u8 = 8;

    /// The fixed secondary profile derived from a primary one
    pub const fn secondary_of(primary: &BusConfig) -> Self {
        Self {
            mode: Self::SECONDARY_MODE,
            word_size: Self::SECONDARY_WORD_SIZE,
            speed_hz: primary.speed_hz,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mode: SpiMode::MODE_3,
            word_size: 8,
            speed_hz: 1_000_000, // 1 MHz
        }
    }
}

/// Which configuration is applied to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusProfile {
    /// Configuration chosen at open
    Primary,
    /// Fixed mode 3 / 8-bit configuration for module traffic
    Secondary,
}

/// Kernel serial bus handle
pub trait SpiDevice: Send {
    /// Write the mode word
    fn set_mode(&mut self, mode: SpiMode) -> io::Result<()>;

    /// Write the word size
    fn set_word_size(&mut self, bits: u8) -> io::Result<()>;

    /// Write the maximum clock speed
    fn set_speed(&mut self, hz: u32) -> io::Result<()>;

    /// One synchronous full-duplex exchange; `tx` and `rx` have equal length
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8], config: &BusConfig) -> io::Result<()>;

    /// Raw half-duplex write
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Raw half-duplex read
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Linux `spidev` character device
#[derive(Debug)]
pub struct Spidev {
    file: File,
    path: PathBuf,
}

impl Spidev {
    /// Open a `spidev` node
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::open_failed(path.display().to_string(), e))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Device node path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SpiDevice for Spidev {
    fn set_mode(&mut self, mode: SpiMode) -> io::Result<()> {
        let mut raw = mode.bits();
        unsafe { ioctl::ioctl_ptr(self.file.as_raw_fd(), SPI_IOC_WR_MODE, &mut raw) }?;
        Ok(())
    }

    fn set_word_size(&mut self, bits: u8) -> io::Result<()> {
        let mut raw = bits;
        unsafe { ioctl::ioctl_ptr(self.file.as_raw_fd(), SPI_IOC_WR_BITS_PER_WORD, &mut raw) }?;
        Ok(())
    }

    fn set_speed(&mut self, hz: u32) -> io::Result<()> {
        let mut raw = hz;
        unsafe { ioctl::ioctl_ptr(self.file.as_raw_fd(), SPI_IOC_WR_MAX_SPEED_HZ, &mut raw) }?;
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8], config: &BusConfig) -> io::Result<()> {
        if tx.len() != rx.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tx and rx buffers differ in length",
            ));
        }
        let len = u32::try_from(tx.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "transfer too large"))?;

        let mut tr = SpiIocTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len,
            speed_hz: config.speed_hz,
            bits_per_word: config.word_size,
            ..Default::default()
        };
        unsafe { ioctl::ioctl_ptr(self.file.as_raw_fd(), SPI_IOC_MESSAGE_1, &mut tr) }?;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.file.write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

/// Shared serial bus
///
/// Everything that touches the profile, the strobe or chip-select runs under
/// one lock; hold [`SerialBus::lock`] across multi-step sequences.
pub struct SerialBus<D, L> {
    state: Mutex<BusState<D, L>>,
}

/// Bus state guarded by the [`SerialBus`] lock
pub struct BusState<D, L> {
    device: D,
    primary: BusConfig,
    secondary: BusConfig,
    applied: BusConfig,
    active: BusProfile,
    pub(crate) chip_select: L,
    strobe: L,
    pub(crate) extension: Option<u8>,
}

impl SerialBus<Spidev, GpioLine> {
    /// Open a `spidev` node with `config` as the primary profile and claim
    /// the chip-select and data-strobe lines.
    pub fn open(path: impl AsRef<Path>, config: BusConfig, banks: &GpioBanks) -> Result<Self> {
        let device = Spidev::open(&path)?;
        let chip_select = banks.resolve(CHIP_SELECT_PIN)?;
        let strobe = banks.resolve(DATA_STROBE_PIN)?;

        Self::new(device, config, chip_select, strobe).map_err(|e| match e {
            Error::TransferFailed { source, .. } => {
                Error::open_failed(path.as_ref().display().to_string(), source)
            }
            other => other,
        })
    }
}

impl<D: SpiDevice, L: GpioPin> SerialBus<D, L> {
    /// Configure `device` with the primary profile and set both framing
    /// lines as idle-high outputs.
    pub fn new(mut device: D, config: BusConfig, mut chip_select: L, mut strobe: L) -> Result<Self> {
        let configure = |device: &mut D| -> io::Result<()> {
            device.set_mode(config.mode)?;
            device.set_word_size(config.word_size)?;
            device.set_speed(config.speed_hz)
        };
        configure(&mut device).map_err(|source| Error::TransferFailed { len: 0, source })?;

        for line in [&mut chip_select, &mut strobe] {
            line.set_output()?;
            line.set_high()?;
        }

        debug!(
            "spi: opened with mode {} / {} bits / {} Hz",
            config.mode.clock_mode(),
            config.word_size,
            config.speed_hz
        );

        Ok(Self {
            state: Mutex::new(BusState {
                device,
                primary: config,
                secondary: BusConfig::secondary_of(&config),
                applied: config,
                active: BusProfile::Primary,
                chip_select,
                strobe,
                extension: None,
            }),
        })
    }

    /// Take the bus lock
    pub fn lock(&self) -> MutexGuard<'_, BusState<D, L>> {
        self.state.lock()
    }

    /// Full-duplex transfer under the primary profile
    pub fn transfer(&self, tx: &[u8]) -> Result<Vec<u8>> {
        self.lock().transfer(tx)
    }

    /// Strobe-framed transfer under the secondary profile
    pub fn transfer_secondary(&self, tx: &[u8]) -> Result<Vec<u8>> {
        self.lock().transfer_secondary(tx)
    }

    /// Currently applied profile
    pub fn active_profile(&self) -> BusProfile {
        self.lock().active
    }

    /// Release the device handle and framing lines
    pub fn close(self) {
        let state = self.state.into_inner();
        debug!("spi: closing bus");
        drop(state);
    }
}

impl<D: SpiDevice, L: GpioPin> BusState<D, L> {
    /// Currently applied profile
    pub fn active_profile(&self) -> BusProfile {
        self.active
    }

    /// Configuration currently written to the device
    pub fn applied_config(&self) -> BusConfig {
        self.applied
    }

    /// Profile configuration
    pub fn config(&self, profile: BusProfile) -> BusConfig {
        match profile {
            BusProfile::Primary => self.primary,
            BusProfile::Secondary => self.secondary,
        }
    }

    /// Full-duplex transfer of `tx.len()` bytes under the primary profile
    pub fn transfer(&mut self, tx: &[u8]) -> Result<Vec<u8>> {
        self.with_profile(BusProfile::Primary, |bus| {
            let config = bus.primary;
            bus.exchange(tx, &config)
        })
    }

    /// Transfer under the secondary profile with the data strobe held low
    /// for its duration; the prior profile is restored afterwards.
    pub fn transfer_secondary(&mut self, tx: &[u8]) -> Result<Vec<u8>> {
        self.with_profile(BusProfile::Secondary, |bus| {
            let config = bus.secondary;
            bus.strobe.set_low()?;
            let result = bus.exchange(tx, &config);
            let raised = bus.strobe.set_high();
            let rx = result?;
            raised?;
            Ok(rx)
        })
    }

    /// Run `f` with `profile` applied, restoring the prior profile after,
    /// whether `f` succeeded or not.
    pub fn with_profile<R>(
        &mut self,
        profile: BusProfile,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let prior = self.active;
        let result = match self.switch_to(profile) {
            Ok(()) => f(self),
            Err(e) => Err(e),
        };
        let restored = self.switch_to(prior);
        let value = result?;
        restored?;
        Ok(value)
    }

    /// Raw write straight to the device handle
    pub(crate) fn write_raw(&mut self, data: &[u8]) -> Result<usize> {
        Error::check_written(self.device.write(data), data.len())
    }

    /// Raw read straight from the device handle
    pub(crate) fn read_raw(&mut self, buf: &mut [u8]) -> Result<usize> {
        let expected = buf.len();
        Error::check_read(self.device.read(buf), expected)
    }

    fn exchange(&mut self, tx: &[u8], config: &BusConfig) -> Result<Vec<u8>> {
        let tx = tx.to_vec();
        let mut rx = vec![0u8; tx.len()];
        self.device
            .transfer(&tx, &mut rx, config)
            .map_err(|source| Error::TransferFailed {
                len: tx.len(),
                source,
            })?;
        Ok(rx)
    }

    /// Apply `profile`, rewriting only the fields that differ from what the
    /// device currently holds.
    fn switch_to(&mut self, profile: BusProfile) -> Result<()> {
        let target = self.config(profile);
        let failed = |source| Error::TransferFailed { len: 0, source };

        if self.applied.mode != target.mode {
            self.device.set_mode(target.mode).map_err(failed)?;
            self.applied.mode = target.mode;
        }
        if self.applied.word_size != target.word_size {
            self.device.set_word_size(target.word_size).map_err(failed)?;
            self.applied.word_size = target.word_size;
        }
        if self.applied.speed_hz != target.speed_hz {
            self.device.set_speed(target.speed_hz).map_err(failed)?;
            self.applied.speed_hz = target.speed_hz;
        }

        if self.active != profile {
            debug!("spi: profile {:?} -> {:?}", self.active, profile);
            self.active = profile;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_numbers() {
        assert_eq!(SpiMode::MODE_0.bits(), 0);
        assert_eq!(SpiMode::MODE_3.bits(), 3);
        assert_eq!(SpiMode::from_clock_mode(2), SpiMode::CPOL);
        assert_eq!(SpiMode::from_clock_mode(7).clock_mode(), 3);
        assert_eq!((SpiMode::MODE_1 | SpiMode::CS_HIGH).clock_mode(), 1);
    }

    #[test]
    fn test_secondary_profile_keeps_speed() {
        let primary = BusConfig {
            mode: SpiMode::MODE_0,
            word_size: 16,
            speed_hz: 500_000,
        };
        let secondary = BusConfig::secondary_of(&primary);
        assert_eq!(secondary.mode, SpiMode::MODE_3);
        assert_eq!(secondary.word_size, 8);
        assert_eq!(secondary.speed_hz, 500_000);
    }

    #[test]
    fn test_open_missing_device() {
        let err = Spidev::open("/nonexistent/spidev9.9").unwrap_err();
        assert!(matches!(err, Error::DeviceOpenFailed { .. }));
    }
}
