//! DHT11/DHT22 single-wire humidity and temperature sensors
//!
//! The sensor answers a host start pulse with 41 low/high pulse pairs. The
//! first pair is a fixed 80 µs preamble; each of the remaining 40 encodes one
//! bit in the width of its high phase (~28 µs for 0, ~70 µs for 1). Widths
//! are measured in poll iterations and compared against the mean low-phase
//! width (~50 µs), which makes the decoder independent of CPU speed.
//!
//! ```text
//!   host          sensor
//!   ‾‾‾‾|____|‾‾ |__80__|‾‾80‾‾|_50_|‾28/70‾|_50_|‾28/70‾| ...
//!   wake  req     preamble      bit 0          bit 1
//! ```

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::gpio::GpioPin;
use crate::sched::RealtimeGuard;
use crate::time;

/// Pulse pairs per reading, preamble included
pub const DHT_PULSES: usize = 41;

/// Poll iterations after which a phase is considered stuck
pub const DHT_MAXCOUNT: u32 = 32_000;

/// Sensor variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    /// Integer humidity and temperature
    Dht11,
    /// Tenths of a unit, signed temperature
    Dht22,
    /// Same wire format as DHT22
    Am2302,
}

impl SensorKind {
    /// Parse `"dht11"`, `"dht22"` or `"am2302"`, ignoring case.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "dht11" | "11" => Some(SensorKind::Dht11),
            "dht22" | "22" => Some(SensorKind::Dht22),
            "am2302" => Some(SensorKind::Am2302),
            _ => None,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorKind::Dht11 => write!(f, "DHT11"),
            SensorKind::Dht22 => write!(f, "DHT22"),
            SensorKind::Am2302 => write!(f, "AM2302"),
        }
    }
}

/// One decoded measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Relative humidity (% RH)
    pub humidity: f32,
    /// Temperature (°C)
    pub temperature: f32,
}

/// Hold times and polling bound for a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhtTiming {
    /// Line held high before the request
    pub wake: Duration,
    /// Request pulse, held low by busy-waiting
    pub request: Duration,
    /// Poll iterations per phase before [`Error::Timeout`]
    pub max_count: u32,
}

impl Default for DhtTiming {
    fn default() -> Self {
        Self {
            wake: Duration::from_millis(500),
            request: Duration::from_millis(20),
            max_count: DHT_MAXCOUNT,
        }
    }
}

/// Measured low/high poll counts, one pair per pulse
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PulseTrain {
    counts: [u32; DHT_PULSES * 2],
}

impl PulseTrain {
    /// Train from interleaved `[low0, high0, low1, high1, ...]` counts
    pub fn from_counts(counts: [u32; DHT_PULSES * 2]) -> Self {
        Self { counts }
    }

    /// Train from separate low and high phase counts
    pub fn from_phases(lows: &[u32; DHT_PULSES], highs: &[u32; DHT_PULSES]) -> Self {
        let mut counts = [0u32; DHT_PULSES * 2];
        for (i, pair) in counts.chunks_exact_mut(2).enumerate() {
            pair[0] = lows[i];
            pair[1] = highs[i];
        }
        Self { counts }
    }

    /// Low-phase count of pair `i`
    pub fn low(&self, i: usize) -> u32 {
        self.counts[i * 2]
    }

    /// High-phase count of pair `i`
    pub fn high(&self, i: usize) -> u32 {
        self.counts[i * 2 + 1]
    }

    /// Mean low-phase count of the data pairs
    pub fn threshold(&self) -> u32 {
        let sum: u64 = (1..DHT_PULSES).map(|i| u64::from(self.low(i))).sum();
        (sum / (DHT_PULSES as u64 - 1)) as u32
    }

    /// Pack the 40 data bits, MSB first
    pub fn bytes(&self) -> [u8; 5] {
        let threshold = self.threshold();
        let mut data = [0u8; 5];
        for bit in 0..DHT_PULSES - 1 {
            let byte = &mut data[bit / 8];
            *byte <<= 1;
            if self.high(bit + 1) >= threshold {
                *byte |= 1;
            }
        }
        data
    }
}

/// Check the payload checksum
pub fn validate(data: &[u8; 5]) -> Result<()> {
    let sum = data[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != data[4] {
        return Err(Error::ChecksumFailed {
            expected: sum,
            actual: data[4],
        });
    }
    Ok(())
}

/// Interpret a validated payload
pub fn interpret(kind: SensorKind, data: &[u8; 5]) -> Reading {
    match kind {
        SensorKind::Dht11 => Reading {
            humidity: f32::from(data[0]),
            temperature: f32::from(data[2]),
        },
        SensorKind::Dht22 | SensorKind::Am2302 => {
            let humidity = f32::from(u16::from(data[0]) << 8 | u16::from(data[1])) / 10.0;
            let mut temperature =
                f32::from(u16::from(data[2] & 0x7F) << 8 | u16::from(data[3])) / 10.0;
            if data[2] & 0x80 != 0 {
                temperature = -temperature;
            }
            Reading {
                humidity,
                temperature,
            }
        }
    }
}

/// Decode a measured train into a reading
pub fn decode(kind: SensorKind, train: &PulseTrain) -> Result<Reading> {
    let data = train.bytes();
    validate(&data)?;
    Ok(interpret(kind, &data))
}

/// Read a sensor with the default timing
pub fn read<P: GpioPin>(kind: SensorKind, line: &mut P) -> Result<Reading> {
    read_with(kind, line, &DhtTiming::default())
}

/// Read a sensor on `line`
///
/// The thread runs at real-time priority from the request pulse until the
/// last pulse is sampled.
pub fn read_with<P: GpioPin>(kind: SensorKind, line: &mut P, timing: &DhtTiming) -> Result<Reading> {
    line.set_output()?;
    line.set_high()?;
    time::sleep(timing.wake);

    let train = {
        let _priority = RealtimeGuard::acquire();
        line.set_low()?;
        time::busy_wait(timing.request);
        line.set_input()?;
        sample(line, timing.max_count)?
    };

    decode(kind, &train)
}

fn sample<P: GpioPin>(line: &P, max_count: u32) -> Result<PulseTrain> {
    let mut count = 0u32;
    while line.is_high()? {
        count += 1;
        if count >= max_count {
            return Err(Error::Timeout);
        }
    }

    let mut counts = [0u32; DHT_PULSES * 2];
    for pair in counts.chunks_exact_mut(2) {
        while !line.is_high()? {
            pair[0] += 1;
            if pair[0] >= max_count {
                return Err(Error::Timeout);
            }
        }
        while line.is_high()? {
            pair[1] += 1;
            if pair[1] >= max_count {
                return Err(Error::Timeout);
            }
        }
    }

    Ok(PulseTrain::from_counts(counts))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Train encoding `data` with 50-count lows and 26/70-count highs
    fn train_for(data: [u8; 5]) -> PulseTrain {
        let mut lows = [50u32; DHT_PULSES];
        let mut highs = [0u32; DHT_PULSES];
        lows[0] = 80;
        highs[0] = 80;
        for bit in 0..40 {
            let set = data[bit / 8] & (0x80 >> (bit % 8)) != 0;
            highs[bit + 1] = if set { 70 } else { 26 };
        }
        PulseTrain::from_phases(&lows, &highs)
    }

    #[test]
    fn test_threshold_skips_preamble() {
        let train = train_for([0; 5]);
        assert_eq!(train.threshold(), 50);
    }

    #[test]
    fn test_dht22_decode() {
        // 65.2 %RH, 35.1 °C
        let data = [0x02, 0x8C, 0x01, 0x5F, 0xEE];
        let reading = decode(SensorKind::Dht22, &train_for(data)).unwrap();
        assert_eq!(reading.humidity, 65.2);
        assert_eq!(reading.temperature, 35.1);
    }

    #[test]
    fn test_dht22_negative_temperature() {
        let data = [0x01, 0x90, 0x80, 0x65, 0x76];
        let reading = interpret(SensorKind::Am2302, &data);
        assert_eq!(reading.humidity, 40.0);
        assert_eq!(reading.temperature, -10.1);
    }

    #[test]
    fn test_dht11_decode() {
        let data = [45, 0, 23, 0, 68];
        let reading = decode(SensorKind::Dht11, &train_for(data)).unwrap();
        assert_eq!(reading, Reading { humidity: 45.0, temperature: 23.0 });
    }

    #[test]
    fn test_checksum_wraps() {
        assert!(validate(&[0xFF, 0xFF, 0x01, 0x01, 0x00]).is_ok());
        assert!(matches!(
            validate(&[1, 2, 3, 4, 11]),
            Err(Error::ChecksumFailed { expected: 10, actual: 11 })
        ));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(SensorKind::from_name("DHT22"), Some(SensorKind::Dht22));
        assert_eq!(SensorKind::from_name("am2302"), Some(SensorKind::Am2302));
        assert_eq!(SensorKind::from_name("dht33"), None);
    }
}
