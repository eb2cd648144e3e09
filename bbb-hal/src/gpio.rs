//! Memory-mapped GPIO
//!
//! Each of the four AM335x GPIO banks is reached through a [`RegisterWindow`]:
//! one 4 KiB mapping of the bank's physical register block, created on first
//! use and shared by every [`GpioLine`] on that bank.
//!
//! Data lines are driven through the write-1-to-set/clear registers, so
//! `set_high`/`set_low` never read-modify-write. Only direction changes touch
//! the shared output-enable register; those are serialized per bank.

use std::fmt;
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

use log::{debug, info};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::boards::am335x::{
    GPIO_BANKS, GPIO_CLEARDATAOUT, GPIO_DATAIN, GPIO_OE, GPIO_SETDATAOUT, GPIO_WINDOW_LEN,
};
use crate::boards::Pin;
use crate::error::{Error, Result};

/// Privileged physical memory device
pub const DEV_MEM: &str = "/dev/mem";

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    /// High-impedance input
    Input,
    /// Push-pull output
    Output,
}

/// Digital logic level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Logic low (0V)
    Low,
    /// Logic high (VCC)
    High,
}

impl Level {
    /// Convert from boolean
    pub fn from_bool(value: bool) -> Self {
        if value {
            Level::High
        } else {
            Level::Low
        }
    }
}

impl From<bool> for Level {
    fn from(value: bool) -> Self {
        Level::from_bool(value)
    }
}

/// GPIO pin trait
///
/// The bus layers drive their framing and multiplexer lines through this
/// trait, which keeps them testable against recording mocks.
pub trait GpioPin {
    /// Get the logical pin number
    fn pin_number(&self) -> u8;

    /// Set pin direction
    fn set_mode(&mut self, mode: PinMode) -> Result<()>;

    /// Read the current logic level
    fn read(&self) -> Result<Level>;

    /// Drive the line high
    fn set_high(&mut self) -> Result<()>;

    /// Drive the line low
    fn set_low(&mut self) -> Result<()>;

    /// Configure as output
    fn set_output(&mut self) -> Result<()> {
        self.set_mode(PinMode::Output)
    }

    /// Configure as input
    fn set_input(&mut self) -> Result<()> {
        self.set_mode(PinMode::Input)
    }

    /// Write a logic level
    fn write(&mut self, level: Level) -> Result<()> {
        match level {
            Level::High => self.set_high(),
            Level::Low => self.set_low(),
        }
    }

    /// Check if pin is high
    fn is_high(&self) -> Result<bool> {
        Ok(self.read()? == Level::High)
    }
}

/// One mapped GPIO bank register block
pub struct RegisterWindow {
    bank: usize,
    ptr: NonNull<u32>,
    len: usize,
    oe_lock: Mutex<()>,
}

// The window is device memory accessed only through volatile loads and
// stores; the one read-modify-write register is guarded by `oe_lock`.
unsafe impl Send for RegisterWindow {}
unsafe impl Sync for RegisterWindow {}

impl RegisterWindow {
    /// Map `bank`'s register block from `device` (normally `/dev/mem`).
    pub fn map(device: &Path, bank: usize) -> Result<Self> {
        let base = *GPIO_BANKS
            .get(bank)
            .ok_or(Error::ContractViolation("GPIO bank out of range"))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(device)
            .map_err(|e| Error::open_failed(device.display().to_string(), e))?;

        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                GPIO_WINDOW_LEN,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                base as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::MapFailed {
                bank,
                source: io::Error::last_os_error(),
            });
        }

        info!("gpio: mapped bank {} at {:#010x}", bank, base);
        Self::from_mapping(bank, ptr)
    }

    /// Anonymous zero-filled window standing in for a bank.
    #[cfg(test)]
    pub(crate) fn anonymous(bank: usize) -> Result<Self> {
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                GPIO_WINDOW_LEN,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(Error::MapFailed {
                bank,
                source: io::Error::last_os_error(),
            });
        }
        Self::from_mapping(bank, ptr)
    }

    fn from_mapping(bank: usize, ptr: *mut libc::c_void) -> Result<Self> {
        let ptr = NonNull::new(ptr.cast::<u32>()).ok_or(Error::MapFailed {
            bank,
            source: io::Error::from(io::ErrorKind::InvalidData),
        })?;

        Ok(Self {
            bank,
            ptr,
            len: GPIO_WINDOW_LEN,
            oe_lock: Mutex::new(()),
        })
    }

    /// Bank index this window maps
    pub fn bank(&self) -> usize {
        self.bank
    }

    /// Read a 32-bit register at a byte offset
    pub fn read_reg(&self, offset: usize) -> u32 {
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.len);
        unsafe { core::ptr::read_volatile(self.ptr.as_ptr().add(offset / 4)) }
    }

    /// Write a 32-bit register at a byte offset
    pub fn write_reg(&self, offset: usize, value: u32) {
        debug_assert!(offset % 4 == 0 && offset + 4 <= self.len);
        unsafe { core::ptr::write_volatile(self.ptr.as_ptr().add(offset / 4), value) }
    }

    /// Read-modify-write of the output-enable register
    fn update_oe(&self, f: impl FnOnce(u32) -> u32) {
        let _guard = self.oe_lock.lock();
        let value = self.read_reg(GPIO_OE);
        self.write_reg(GPIO_OE, f(value));
    }
}

impl Drop for RegisterWindow {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}

impl fmt::Debug for RegisterWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterWindow")
            .field("bank", &self.bank)
            .field("ptr", &self.ptr)
            .finish()
    }
}

/// Register windows for all four banks, mapped lazily
///
/// A window is created at most once; concurrent first resolutions of pins on
/// the same bank block on the one mapping in progress.
#[derive(Debug)]
pub struct GpioBanks {
    device: PathBuf,
    windows: [OnceCell<Arc<RegisterWindow>>; 4],
}

impl GpioBanks {
    /// Banks backed by `/dev/mem`
    pub fn new() -> Self {
        Self::with_device(DEV_MEM)
    }

    /// Banks backed by an alternative memory device
    pub fn with_device(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
            windows: Default::default(),
        }
    }

    /// Get (mapping on first use) the window for `bank`
    pub fn window(&self, bank: usize) -> Result<Arc<RegisterWindow>> {
        let cell = self
            .windows
            .get(bank)
            .ok_or(Error::ContractViolation("GPIO bank out of range"))?;
        cell.get_or_try_init(|| RegisterWindow::map(&self.device, bank).map(Arc::new))
            .cloned()
    }

    /// Resolve a header pin into a usable line
    pub fn resolve(&self, pin: Pin) -> Result<GpioLine> {
        if pin.bank() >= GPIO_BANKS.len() {
            return Err(Error::InvalidPin(pin.gpio()));
        }
        let window = self.window(pin.bank())?;
        debug!("gpio: resolved pin {} to bank {} bit {}", pin.gpio(), pin.bank(), pin.bit());
        Ok(GpioLine::new(pin, window))
    }
}

impl Default for GpioBanks {
    fn default() -> Self {
        Self::new()
    }
}

/// A single GPIO line on a mapped bank
#[derive(Debug, Clone)]
pub struct GpioLine {
    pin: Pin,
    mask: u32,
    window: Arc<RegisterWindow>,
}

impl GpioLine {
    pub(crate) fn new(pin: Pin, window: Arc<RegisterWindow>) -> Self {
        Self {
            pin,
            mask: 1 << pin.bit(),
            window,
        }
    }

    /// Header pin this line drives
    pub fn pin(&self) -> Pin {
        self.pin
    }

    /// Clear the line's output-enable bit
    pub fn make_output(&self) {
        self.window.update_oe(|oe| oe & !self.mask);
    }

    /// Set the line's output-enable bit
    pub fn make_input(&self) {
        self.window.update_oe(|oe| oe | self.mask);
    }

    /// Drive high through SETDATAOUT
    pub fn high(&self) {
        self.window.write_reg(GPIO_SETDATAOUT, self.mask);
    }

    /// Drive low through CLEARDATAOUT
    pub fn low(&self) {
        self.window.write_reg(GPIO_CLEARDATAOUT, self.mask);
    }

    /// Sample DATAIN
    #[inline]
    pub fn level(&self) -> Level {
        Level::from_bool(self.window.read_reg(GPIO_DATAIN) & self.mask != 0)
    }
}

impl GpioPin for GpioLine {
    fn pin_number(&self) -> u8 {
        self.pin.gpio()
    }

    fn set_mode(&mut self, mode: PinMode) -> Result<()> {
        match mode {
            PinMode::Input => self.make_input(),
            PinMode::Output => self.make_output(),
        }
        Ok(())
    }

    #[inline]
    fn read(&self) -> Result<Level> {
        Ok(self.level())
    }

    fn set_high(&mut self) -> Result<()> {
        self.high();
        Ok(())
    }

    fn set_low(&mut self) -> Result<()> {
        self.low();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::boards::am335x::GPIO_DATAOUT;

    fn line(pin: Pin) -> GpioLine {
        let window = RegisterWindow::anonymous(pin.bank()).expect("anonymous mapping");
        GpioLine::new(pin, Arc::new(window))
    }

    #[test]
    fn test_direction_updates_only_own_bit() {
        let line = line(Pin::P9_14);
        line.window.write_reg(GPIO_OE, 0xFFFF_FFFF);

        line.make_output();
        assert_eq!(line.window.read_reg(GPIO_OE), !(1 << 18));

        line.make_input();
        assert_eq!(line.window.read_reg(GPIO_OE), 0xFFFF_FFFF);
    }

    #[test]
    fn test_set_clear_write_mask_only() {
        let mut line = line(Pin::P9_17);
        line.set_high().unwrap();
        assert_eq!(line.window.read_reg(GPIO_SETDATAOUT), 1 << 5);
        line.set_low().unwrap();
        assert_eq!(line.window.read_reg(GPIO_CLEARDATAOUT), 1 << 5);
        assert_eq!(line.window.read_reg(GPIO_DATAOUT), 0);
    }

    #[test]
    fn test_read_masks_datain() {
        let line = line(Pin::P9_15);
        line.window.write_reg(GPIO_DATAIN, !(1 << 16));
        assert_eq!(line.read().unwrap(), Level::Low);
        line.window.write_reg(GPIO_DATAIN, 1 << 16);
        assert_eq!(line.read().unwrap(), Level::High);
    }

    #[test]
    fn test_shared_window_oe_serialized() {
        let window = Arc::new(RegisterWindow::anonymous(1).unwrap());
        window.write_reg(GPIO_OE, 0xFFFF_FFFF);

        let handles: Vec<_> = (0..8u8)
            .map(|bit| {
                let line = GpioLine::new(Pin::from_gpio(32 + bit), Arc::clone(&window));
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        line.make_output();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(window.read_reg(GPIO_OE), 0xFFFF_FF00);
    }

    #[test]
    fn test_invalid_pin() {
        let banks = GpioBanks::with_device("/nonexistent/mem");
        assert!(matches!(
            banks.resolve(Pin::from_gpio(128)),
            Err(Error::InvalidPin(128))
        ));
    }

    #[test]
    fn test_concurrent_first_mapping_shared() {
        // sparse stand-in for physical memory, long enough to cover bank 1
        let path = std::env::temp_dir().join(format!("bbb-hal-mem-{}", std::process::id()));
        let file = std::fs::File::create(&path).unwrap();
        file.set_len(0x4900_0000).unwrap();

        let banks = Arc::new(GpioBanks::with_device(path.clone()));
        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let banks = Arc::clone(&banks);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    banks.window(1).unwrap()
                })
            })
            .collect();
        let windows: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        std::fs::remove_file(&path).unwrap();

        assert!(windows.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        // eight callers plus the cache
        assert_eq!(Arc::strong_count(&windows[0]), 9);
        assert!(Arc::ptr_eq(&banks.window(1).unwrap(), &windows[0]));
    }

    #[test]
    fn test_open_failure_is_fatal_and_not_cached() {
        let banks = GpioBanks::with_device("/nonexistent/mem");
        let err = banks.resolve(Pin::P9_17).unwrap_err();
        assert!(matches!(err, Error::DeviceOpenFailed { .. }));
        assert!(err.is_fatal());
        assert!(banks.windows[0].get().is_none());
    }
}
