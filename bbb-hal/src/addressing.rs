//! Parity-checked module addressing over the serial bus
//!
//! Every module on the serial bus listens for a one-byte address frame sent
//! under the secondary profile:
//!
//! ```text
//!   bit  7   6   5   4   3   2   1   0
//!      [ P | A3  A2  A1  A0 | OP2 OP1 OP0 ]
//! ```
//!
//! `P` makes the parity of `[P, A3..A0]` even. After the frame, payload bytes
//! move as raw device reads/writes framed by the chip-select line.
//!
//! An extension board is itself a module: its selector is written like any
//! other module payload, and parking it (`0b0000`) returns the two-wire bus to
//! local channels only.

use std::io;

use log::debug;

use crate::error::{Error, Result};
use crate::gpio::GpioPin;
use crate::spi::{BusProfile, BusState, SerialBus, SpiDevice};

/// Highest valid module address
pub const MAX_MODULE_ADDRESS: u8 = 0x0F;

/// Selector code that parks the extension board
pub const EXTENSION_PARKED: u8 = 0b0000;

/// Number of extension-board channel codes
pub const EXTENSION_CHANNELS: u8 = 16;

/// Even parity bit of a 4-bit address (1 iff the popcount is odd)
pub const fn calculate_parity(address: u8) -> u8 {
    let mut y = address ^ (address >> 1);
    y ^= y >> 2;
    y ^= y >> 4;
    y & 1
}

/// Operation carried in the low three bits of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Select the module for a payload write
    Write = 1,
    /// Arm the module for a read
    ReadReady = 2,
    /// Clock the armed read out
    ReadExecute = 3,
}

/// One address frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressFrame {
    address: u8,
    operation: Operation,
}

impl AddressFrame {
    /// Frame for `address` (0..=15)
    pub fn new(address: u8, operation: Operation) -> Result<Self> {
        if address > MAX_MODULE_ADDRESS {
            return Err(Error::ContractViolation("module address out of range"));
        }
        Ok(Self { address, operation })
    }

    /// Module address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Frame operation
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Parity bit
    pub fn parity(&self) -> u8 {
        calculate_parity(self.address)
    }

    /// Encoded wire byte
    pub fn to_byte(&self) -> u8 {
        (((self.parity() << 4) | self.address) << 3) | self.operation as u8
    }
}

/// Check an extension channel code
///
/// The low and high 2-bit halves drive the board's two sub-bus muxes, with
/// zero parking that mux. Codes with either half at zero are park codes and
/// are rejected, so every accepted code switches both muxes on at once and
/// joins one sub-bus from each. Single-mux routes such as `0b0001` or
/// `0b0100` cannot be expressed.
pub fn validate_extension_channel(channel: u8) -> Result<u8> {
    if channel >= EXTENSION_CHANNELS {
        return Err(Error::ContractViolation("extension channel out of range"));
    }
    if channel & 0b0011 == 0 || channel & 0b1100 == 0 {
        return Err(Error::ContractViolation("extension channel is a park code"));
    }
    Ok(channel)
}

impl<D: SpiDevice, L: GpioPin> BusState<D, L> {
    /// Transmit one address frame
    pub fn select(&mut self, address: u8, operation: Operation) -> Result<()> {
        let frame = AddressFrame::new(address, operation)?;
        self.transfer_secondary(&[frame.to_byte()])?;
        Ok(())
    }

    /// Select `address` for writing and push `data` as a raw write framed by
    /// chip-select. Returns the number of bytes written.
    pub fn write_to_module(&mut self, address: u8, data: &[u8]) -> Result<usize> {
        AddressFrame::new(address, Operation::Write)?;

        self.with_profile(BusProfile::Secondary, |bus| {
            bus.select(address, Operation::Write)?;
            bus.chip_selected(|bus| {
                bus.chip_select.set_high()?;
                bus.chip_select.set_low()?;
                bus.chip_select.set_low()?;
                bus.write_raw(data)
            })
        })
    }

    /// Two-step select of `address` followed by a single-byte raw read
    pub fn read_from_module(&mut self, address: u8) -> Result<u8> {
        AddressFrame::new(address, Operation::ReadReady)?;

        self.with_profile(BusProfile::Secondary, |bus| {
            bus.select(address, Operation::ReadReady)?;
            bus.chip_selected(|bus| bus.chip_select.set_low())?;

            bus.select(address, Operation::ReadExecute)?;
            bus.chip_selected(|bus| {
                bus.chip_select.set_low()?;
                let mut byte = [0u8; 1];
                bus.read_raw(&mut byte)?;
                Ok(byte[0])
            })
        })
    }

    /// Configure the extension selector module address
    pub fn set_extension_address(&mut self, address: u8) -> Result<()> {
        AddressFrame::new(address, Operation::Write)?;
        debug!("addressing: extension selector at module {}", address);
        self.extension = Some(address);
        Ok(())
    }

    /// Extension selector module address, if configured
    pub fn extension_address(&self) -> Option<u8> {
        self.extension
    }

    /// Route the extension board to `channel`
    pub fn select_extension_channel(&mut self, channel: u8) -> Result<()> {
        let channel = validate_extension_channel(channel)?;
        let address = self
            .extension
            .ok_or(Error::ContractViolation("no extension board configured"))?;
        self.write_extension(address, channel)
    }

    /// Park the extension board; a no-op when none is configured
    pub fn unselect_extension(&mut self) -> Result<()> {
        match self.extension {
            Some(address) => self.write_extension(address, EXTENSION_PARKED),
            None => Ok(()),
        }
    }

    fn write_extension(&mut self, address: u8, code: u8) -> Result<()> {
        let written = self.write_to_module(address, &[code])?;
        if written != 1 {
            return Err(Error::WriteFailed {
                expected: 1,
                source: io::Error::from(io::ErrorKind::WriteZero),
            });
        }
        debug!("addressing: extension code {:#06b}", code);
        Ok(())
    }

    /// Run `f` and leave chip-select idle high afterwards, on failure too.
    fn chip_selected<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        let result = f(self);
        let idle = self.chip_select.set_high();
        let value = result?;
        idle?;
        Ok(value)
    }
}

impl<D: SpiDevice, L: GpioPin> SerialBus<D, L> {
    /// Transmit one address frame
    pub fn select(&self, address: u8, operation: Operation) -> Result<()> {
        self.lock().select(address, operation)
    }

    /// See [`BusState::write_to_module`]
    pub fn write_to_module(&self, address: u8, data: &[u8]) -> Result<usize> {
        self.lock().write_to_module(address, data)
    }

    /// See [`BusState::read_from_module`]
    pub fn read_from_module(&self, address: u8) -> Result<u8> {
        self.lock().read_from_module(address)
    }

    /// Configure the extension selector module address
    pub fn set_extension_address(&self, address: u8) -> Result<()> {
        self.lock().set_extension_address(address)
    }

    /// Route the extension board to `channel`
    pub fn select_extension_channel(&self, channel: u8) -> Result<()> {
        self.lock().select_extension_channel(channel)
    }

    /// Park the extension board
    pub fn unselect_extension(&self) -> Result<()> {
        self.lock().unselect_extension()
    }
}
