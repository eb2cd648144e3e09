// SPDX-FileCopyrightText: 2024 Sensor Fleet Contributors
// SPDX-License-Identifier: MIT

//! Telemetry sink
//!
//! The store client lives outside this daemon; pollers only see the
//! [`Telemetry`] trait.

use std::fmt;

use log::info;

/// One published value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f32),
    Flag(bool),
    /// Undecoded register bytes
    Raw(Vec<u8>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{:.1}", v),
            Value::Flag(v) => write!(f, "{}", u8::from(*v)),
            Value::Raw(bytes) => {
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

pub trait Telemetry: Send + Sync {
    fn publish(&self, sensor: &str, field: &str, value: Value);
}

/// Writes every sample to the log
#[derive(Debug, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn publish(&self, sensor: &str, field: &str, value: Value) {
        info!("{} {}={}", sensor, field, value);
    }
}
