//! Prelude module for convenient imports

pub use crate::error::{Error, Result};

pub use crate::boards::Pin;
pub use crate::gpio::{GpioBanks, GpioLine, GpioPin, Level, PinMode};

pub use crate::addressing::{AddressFrame, Operation};
pub use crate::spi::{BusConfig, BusProfile, SerialBus, SpiMode, DEFAULT_SPI_DEVICE};

pub use crate::i2c::{ChannelHandle, ChannelId, ExtensionSelect, Framing, RegisterBus, DEFAULT_I2C_DEVICE};

pub use crate::dht::{DhtTiming, Reading, SensorKind};
