//! Recording mocks shared by the integration tests
//!
//! Every mock appends to one [`EventLog`], so tests can assert the exact
//! interleaving of line changes and bus traffic.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use bbb_hal::boards::Pin;
use bbb_hal::error::Result;
use bbb_hal::gpio::{GpioPin, Level, PinMode};
use bbb_hal::i2c::{I2cAdapter, I2cDevice, RegisterBus};
use bbb_hal::spi::{BusConfig, SerialBus, SpiDevice, SpiMode, CHIP_SELECT_PIN, DATA_STROBE_PIN};

pub const CS: u8 = CHIP_SELECT_PIN.gpio();
pub const DS: u8 = DATA_STROBE_PIN.gpio();
pub const MUX_LSB: u8 = Pin::P9_15.gpio();
pub const MUX_MSB: u8 = Pin::P9_16.gpio();

/// Primary profile used by the tests, distinct from the secondary one in
/// every field but speed
pub const PRIMARY: BusConfig = BusConfig {
    mode: SpiMode::MODE_0,
    word_size: 16,
    speed_hz: 1_000_000,
};

pub const SECONDARY: BusConfig = BusConfig::secondary_of(&PRIMARY);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Output(u8),
    Input(u8),
    High(u8),
    Low(u8),
    Mode(SpiMode),
    WordSize(u8),
    Speed(u32),
    /// Full-duplex exchange with the device configuration at that moment
    Transfer { tx: Vec<u8>, config: BusConfig },
    Write { data: Vec<u8>, config: BusConfig },
    Read { len: usize, config: BusConfig },
    I2cWrite { address: u8, data: Vec<u8> },
    I2cRead { address: u8, len: usize },
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Mock output line
#[derive(Debug)]
pub struct MockLine {
    pin: u8,
    level: Level,
    log: EventLog,
}

impl MockLine {
    pub fn new(pin: u8, log: &EventLog) -> Self {
        Self {
            pin,
            level: Level::Low,
            log: Arc::clone(log),
        }
    }
}

impl GpioPin for MockLine {
    fn pin_number(&self) -> u8 {
        self.pin
    }

    fn set_mode(&mut self, mode: PinMode) -> Result<()> {
        self.log.lock().push(match mode {
            PinMode::Output => Event::Output(self.pin),
            PinMode::Input => Event::Input(self.pin),
        });
        Ok(())
    }

    fn read(&self) -> Result<Level> {
        Ok(self.level)
    }

    fn set_high(&mut self) -> Result<()> {
        self.level = Level::High;
        self.log.lock().push(Event::High(self.pin));
        Ok(())
    }

    fn set_low(&mut self) -> Result<()> {
        self.level = Level::Low;
        self.log.lock().push(Event::Low(self.pin));
        Ok(())
    }
}

/// Mock `spidev` handle
#[derive(Debug)]
pub struct MockSpi {
    log: EventLog,
    config: BusConfig,
    /// Transfers fail with EIO
    pub fail_transfers: bool,
    /// Raw writes accept at most this many bytes
    pub write_limit: Option<usize>,
    /// Byte returned by raw reads; `None` reads nothing
    pub read_value: Option<u8>,
}

impl MockSpi {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: Arc::clone(log),
            config: BusConfig {
                mode: SpiMode::MODE_0,
                word_size: 8,
                speed_hz: 500_000,
            },
            fail_transfers: false,
            write_limit: None,
            read_value: Some(0x5A),
        }
    }
}

impl SpiDevice for MockSpi {
    fn set_mode(&mut self, mode: SpiMode) -> io::Result<()> {
        self.config.mode = mode;
        self.log.lock().push(Event::Mode(mode));
        Ok(())
    }

    fn set_word_size(&mut self, bits: u8) -> io::Result<()> {
        self.config.word_size = bits;
        self.log.lock().push(Event::WordSize(bits));
        Ok(())
    }

    fn set_speed(&mut self, hz: u32) -> io::Result<()> {
        self.config.speed_hz = hz;
        self.log.lock().push(Event::Speed(hz));
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8], _config: &BusConfig) -> io::Result<()> {
        self.log.lock().push(Event::Transfer {
            tx: tx.to_vec(),
            config: self.config,
        });
        if self.fail_transfers {
            return Err(io::Error::from_raw_os_error(libc::EIO));
        }
        for (r, t) in rx.iter_mut().zip(tx) {
            *r = !t;
        }
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.log.lock().push(Event::Write {
            data: data.to_vec(),
            config: self.config,
        });
        Ok(self.write_limit.map_or(data.len(), |limit| limit.min(data.len())))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.log.lock().push(Event::Read {
            len: buf.len(),
            config: self.config,
        });
        match self.read_value {
            Some(value) => {
                buf.fill(value);
                Ok(buf.len())
            }
            None => Ok(0),
        }
    }
}

pub type MockSerialBus = SerialBus<MockSpi, MockLine>;

/// Serial bus on mocks, with the log cleared after open
pub fn serial_bus(log: &EventLog) -> MockSerialBus {
    serial_bus_with(log, MockSpi::new(log))
}

pub fn serial_bus_with(log: &EventLog, device: MockSpi) -> MockSerialBus {
    let bus = SerialBus::new(device, PRIMARY, MockLine::new(CS, log), MockLine::new(DS, log))
        .expect("open mock bus");
    log.lock().clear();
    bus
}

/// Mock `i2c-dev` adapter serving fixed register contents
#[derive(Debug, Default)]
pub struct MockAdapter {
    log: EventLog,
    pub opens: Arc<AtomicUsize>,
    /// Reads return this many bytes at most
    pub read_limit: Option<usize>,
    /// Writes accept this many bytes at most
    pub write_limit: Option<usize>,
}

impl MockAdapter {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: Arc::clone(log),
            ..Default::default()
        }
    }
}

impl I2cAdapter for MockAdapter {
    type Device = MockI2cDevice;

    fn open(&self, address: u8) -> Result<MockI2cDevice> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(MockI2cDevice {
            address,
            log: Arc::clone(&self.log),
            read_limit: self.read_limit,
            write_limit: self.write_limit,
        })
    }
}

#[derive(Debug)]
pub struct MockI2cDevice {
    address: u8,
    log: EventLog,
    read_limit: Option<usize>,
    write_limit: Option<usize>,
}

impl I2cDevice for MockI2cDevice {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.log.lock().push(Event::I2cWrite {
            address: self.address,
            data: data.to_vec(),
        });
        Ok(self.write_limit.map_or(data.len(), |limit| limit.min(data.len())))
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.log.lock().push(Event::I2cRead {
            address: self.address,
            len: buf.len(),
        });
        let n = self.read_limit.map_or(buf.len(), |limit| limit.min(buf.len()));
        for (i, b) in buf[..n].iter_mut().enumerate() {
            *b = self.address.wrapping_add(i as u8);
        }
        Ok(n)
    }
}

pub type MockRegisterBus = RegisterBus<MockAdapter, MockLine>;

pub fn register_bus(log: &EventLog) -> MockRegisterBus {
    RegisterBus::new(
        MockAdapter::new(log),
        MockLine::new(MUX_LSB, log),
        MockLine::new(MUX_MSB, log),
    )
}

/// Single-wire line replaying a fixed sequence of sampled levels
pub struct ScriptedLine {
    script: RefCell<VecDeque<Level>>,
    idle: Level,
    pub modes: Vec<PinMode>,
}

impl ScriptedLine {
    /// Line that reads `script` in order, then `idle` forever
    pub fn new(script: impl IntoIterator<Item = Level>, idle: Level) -> Self {
        Self {
            script: RefCell::new(script.into_iter().collect()),
            idle,
            modes: Vec::new(),
        }
    }

    /// Line replaying a sensor response with the given per-phase counts
    ///
    /// Each polling loop consumes the read that ends its phase, so a phase
    /// measured as `n` iterations needs `n + 1` samples.
    pub fn responding(lows: &[u32], highs: &[u32]) -> Self {
        let mut script = vec![Level::High; 3];
        for (low, high) in lows.iter().zip(highs) {
            script.extend(std::iter::repeat(Level::Low).take(*low as usize + 1));
            script.extend(std::iter::repeat(Level::High).take(*high as usize + 1));
        }
        Self::new(script, Level::Low)
    }

    pub fn remaining(&self) -> usize {
        self.script.borrow().len()
    }
}

impl GpioPin for ScriptedLine {
    fn pin_number(&self) -> u8 {
        Pin::P8_11.gpio()
    }

    fn set_mode(&mut self, mode: PinMode) -> Result<()> {
        self.modes.push(mode);
        Ok(())
    }

    fn read(&self) -> Result<Level> {
        Ok(self.script.borrow_mut().pop_front().unwrap_or(self.idle))
    }

    fn set_high(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_low(&mut self) -> Result<()> {
        Ok(())
    }
}
