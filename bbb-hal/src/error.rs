//! Error types for bus operations

use std::io;

/// Bus layer result type
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Bus layer error type
///
/// `InvalidPin`, `DeviceOpenFailed` and `MapFailed` describe hardware that
/// cannot be recovered in-process; see [`Error::is_fatal`]. Everything else is
/// a per-operation condition the caller may retry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Logical pin does not map onto one of the four GPIO banks
    #[error("invalid pin {0}")]
    InvalidPin(u8),
    /// Privileged or kernel bus device node could not be opened or configured
    #[error("failed to open {path}: {source}")]
    DeviceOpenFailed {
        path: String,
        #[source]
        source: io::Error,
    },
    /// Register bank could not be mapped into the process
    #[error("failed to map GPIO bank {bank}: {source}")]
    MapFailed {
        bank: usize,
        #[source]
        source: io::Error,
    },
    /// Full-duplex serial transfer rejected by the kernel
    #[error("serial transfer of {len} bytes failed: {source}")]
    TransferFailed {
        len: usize,
        #[source]
        source: io::Error,
    },
    /// Write rejected or fewer bytes accepted than requested
    #[error("write of {expected} bytes failed: {source}")]
    WriteFailed {
        expected: usize,
        #[source]
        source: io::Error,
    },
    /// Read rejected or fewer bytes returned than requested
    #[error("read of {expected} bytes failed: {source}")]
    ReadFailed {
        expected: usize,
        #[source]
        source: io::Error,
    },
    /// Bounded polling loop ran out of iterations
    #[error("operation timeout")]
    Timeout,
    /// Single-wire payload checksum mismatch
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumFailed { expected: u8, actual: u8 },
    /// Caller supplied an out-of-range address or channel
    #[error("contract violation: {0}")]
    ContractViolation(&'static str),
}

impl Error {
    /// Whether the error leaves the addressed hardware unusable for the
    /// rest of the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidPin(_) | Error::DeviceOpenFailed { .. } | Error::MapFailed { .. }
        )
    }

    pub(crate) fn open_failed(path: impl Into<String>, source: io::Error) -> Self {
        Error::DeviceOpenFailed {
            path: path.into(),
            source,
        }
    }

    /// Check a write count against the expected length
    pub(crate) fn check_written(written: io::Result<usize>, expected: usize) -> Result<usize> {
        match written {
            Ok(n) if n >= expected => Ok(n),
            Ok(n) => Err(Error::WriteFailed {
                expected,
                source: io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("{n} of {expected} bytes accepted"),
                ),
            }),
            Err(source) => Err(Error::WriteFailed { expected, source }),
        }
    }

    /// Check a read count against the expected length
    pub(crate) fn check_read(read: io::Result<usize>, expected: usize) -> Result<usize> {
        match read {
            Ok(n) if n >= expected => Ok(n),
            Ok(n) => Err(Error::ReadFailed {
                expected,
                source: io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{n} of {expected} bytes returned"),
                ),
            }),
            Err(source) => Err(Error::ReadFailed { expected, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::InvalidPin(200).is_fatal());
        assert!(Error::open_failed("/dev/mem", io::Error::from(io::ErrorKind::PermissionDenied)).is_fatal());
        assert!(!Error::Timeout.is_fatal());
        assert!(!Error::ChecksumFailed { expected: 1, actual: 2 }.is_fatal());
        assert!(!Error::check_written(Ok(0), 1).unwrap_err().is_fatal());
    }

    #[test]
    fn test_short_counts() {
        assert_eq!(Error::check_written(Ok(3), 3).unwrap(), 3);
        assert!(matches!(
            Error::check_written(Ok(2), 3),
            Err(Error::WriteFailed { expected: 3, .. })
        ));
        assert!(matches!(
            Error::check_read(Ok(1), 2),
            Err(Error::ReadFailed { expected: 2, .. })
        ));
        assert!(matches!(
            Error::check_read(Err(io::Error::from_raw_os_error(libc::EIO)), 2),
            Err(Error::ReadFailed { .. })
        ));
    }

    #[test]
    fn test_display() {
        let err = Error::ChecksumFailed { expected: 0x10, actual: 0x11 };
        assert_eq!(err.to_string(), "checksum mismatch: expected 0x10, got 0x11");
    }
}
