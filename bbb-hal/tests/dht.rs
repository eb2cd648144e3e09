mod common;

use std::time::Duration;

use bbb_hal::dht::{self, DhtTiming, PulseTrain, SensorKind, DHT_PULSES};
use bbb_hal::error::Error;
use bbb_hal::gpio::{Level, PinMode};
use common::ScriptedLine;

const FAST: DhtTiming = DhtTiming {
    wake: Duration::ZERO,
    request: Duration::ZERO,
    max_count: dht::DHT_MAXCOUNT,
};

/// Low counts `[80, 50, 50, ...]`, highs encoding `data` as 20/90 counts
fn phases(data: [u8; 5]) -> ([u32; DHT_PULSES], [u32; DHT_PULSES]) {
    let mut lows = [50u32; DHT_PULSES];
    let mut highs = [80u32; DHT_PULSES];
    lows[0] = 80;
    for bit in 0..40 {
        let set = data[bit / 8] >> (7 - bit % 8) & 1 == 1;
        highs[bit + 1] = if set { 90 } else { 20 };
    }
    (lows, highs)
}

#[test]
fn test_pulse_train_decodes_fixed_pattern() {
    let data = [0x02, 0x8C, 0x01, 0x5F, 0xEE];
    let (lows, highs) = phases(data);
    let train = PulseTrain::from_phases(&lows, &highs);

    assert_eq!(train.threshold(), 50);
    assert_eq!(train.bytes(), data);

    let mut corrupted = highs;
    // flip the lowest bit of byte 4
    corrupted[40] = if corrupted[40] >= 50 { 20 } else { 90 };
    let train = PulseTrain::from_phases(&lows, &corrupted);
    assert!(matches!(
        dht::decode(SensorKind::Dht22, &train),
        Err(Error::ChecksumFailed { .. })
    ));
}

#[test]
fn test_decode_is_idempotent() {
    let data = [0x01, 0x90, 0x80, 0x65, 0x76];
    let (lows, highs) = phases(data);
    let train = PulseTrain::from_phases(&lows, &highs);

    let first = dht::decode(SensorKind::Dht22, &train).unwrap();
    let second = dht::decode(SensorKind::Dht22, &train).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.temperature, -10.1);
}

#[test]
fn test_single_bit_flip_fails_checksum() {
    let data = [0x02, 0x8C, 0x01, 0x5F, 0xEE];
    for bit in 0..32 {
        let mut flipped = data;
        flipped[bit / 8] ^= 0x80 >> (bit % 8);
        assert!(
            matches!(dht::validate(&flipped), Err(Error::ChecksumFailed { .. })),
            "bit {bit}"
        );
    }
}

#[test]
fn test_read_from_scripted_line() {
    let data = [0x02, 0x8C, 0x01, 0x5F, 0xEE];
    let (lows, highs) = phases(data);
    let mut line = ScriptedLine::responding(&lows, &highs);

    let reading = dht::read_with(SensorKind::Dht22, &mut line, &FAST).unwrap();
    assert_eq!(reading.humidity, 65.2);
    assert_eq!(reading.temperature, 35.1);
    assert_eq!(line.modes, vec![PinMode::Output, PinMode::Input]);
    assert_eq!(line.remaining(), 0);
}

#[test]
fn test_read_dht11() {
    let (lows, highs) = phases([45, 0, 23, 0, 68]);
    let mut line = ScriptedLine::responding(&lows, &highs);

    let reading = dht::read_with(SensorKind::Dht11, &mut line, &FAST).unwrap();
    assert_eq!(reading.humidity, 45.0);
    assert_eq!(reading.temperature, 23.0);
}

#[test]
fn test_no_response_times_out() {
    let mut line = ScriptedLine::new(Vec::new(), Level::High);
    let timing = DhtTiming { max_count: 1000, ..FAST };

    let err = dht::read_with(SensorKind::Dht22, &mut line, &timing).unwrap_err();
    assert!(matches!(err, Error::Timeout));
    assert!(!err.is_fatal());
}

#[test]
fn test_stuck_phase_times_out() {
    // responds, then holds the line low
    let mut line = ScriptedLine::new([Level::High, Level::Low], Level::Low);
    let timing = DhtTiming { max_count: 1000, ..FAST };

    assert!(matches!(
        dht::read_with(SensorKind::Dht11, &mut line, &timing),
        Err(Error::Timeout)
    ));
}
