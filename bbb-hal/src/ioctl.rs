//! Linux `spidev` and `i2c-dev` request numbers
//!
//! Encoded with the asm-generic `_IOC` layout used by ARM and x86.

use std::io;
use std::os::unix::io::RawFd;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = 8;
const IOC_SIZESHIFT: u32 = 16;
const IOC_DIRSHIFT: u32 = 30;

const IOC_WRITE: u32 = 1;

const fn ioc(dir: u32, ty: u8, nr: u8, size: usize) -> u32 {
    (dir << IOC_DIRSHIFT)
        | ((ty as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)
}

const SPI_IOC_MAGIC: u8 = b'k';

pub const SPI_IOC_WR_MODE: u32 = ioc(IOC_WRITE, SPI_IOC_MAGIC, 1, 1);
pub const SPI_IOC_WR_BITS_PER_WORD: u32 = ioc(IOC_WRITE, SPI_IOC_MAGIC, 3, 1);
pub const SPI_IOC_WR_MAX_SPEED_HZ: u32 = ioc(IOC_WRITE, SPI_IOC_MAGIC, 4, 4);

/// `SPI_IOC_MESSAGE(1)`
pub const SPI_IOC_MESSAGE_1: u32 = ioc(
    IOC_WRITE,
    SPI_IOC_MAGIC,
    0,
    core::mem::size_of::<SpiIocTransfer>(),
);

/// Select the target address on an `i2c-dev` handle
pub const I2C_SLAVE: u32 = 0x0703;

/// `struct spi_ioc_transfer`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct SpiIocTransfer {
    pub tx_buf: u64,
    pub rx_buf: u64,
    pub len: u32,
    pub speed_hz: u32,
    pub delay_usecs: u16,
    pub bits_per_word: u8,
    pub cs_change: u8,
    pub tx_nbits: u8,
    pub rx_nbits: u8,
    pub word_delay_usecs: u8,
    pub pad: u8,
}

/// Issue a request taking a pointer argument
///
/// # Safety
///
/// `arg` must point to a value of the type `request` expects, valid for the
/// duration of the call.
pub unsafe fn ioctl_ptr<T>(fd: RawFd, request: u32, arg: *mut T) -> io::Result<libc::c_int> {
    let ret = libc::ioctl(fd, request as _, arg);
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

/// Issue a request taking an integer argument
pub fn ioctl_value(fd: RawFd, request: u32, value: libc::c_ulong) -> io::Result<libc::c_int> {
    let ret = unsafe { libc::ioctl(fd, request as _, value) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_numbers() {
        assert_eq!(core::mem::size_of::<SpiIocTransfer>(), 32);
        assert_eq!(SPI_IOC_WR_MODE, 0x4001_6b01);
        assert_eq!(SPI_IOC_WR_BITS_PER_WORD, 0x4001_6b03);
        assert_eq!(SPI_IOC_WR_MAX_SPEED_HZ, 0x4004_6b04);
        assert_eq!(SPI_IOC_MESSAGE_1, 0x4020_6b00);
    }
}
