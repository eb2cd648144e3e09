//! Delay helpers for bit-banged protocols
//!
//! Two flavours: a yielding sleep that survives signal interruption, for
//! holds where scheduling jitter is harmless, and a spinning wait on the
//! monotonic clock for holds where it is not.

use std::time::{Duration, Instant};

/// Sleep for `duration`, resuming after signal interruptions.
pub fn sleep(duration: Duration) {
    // std::thread::sleep already restarts nanosleep on EINTR.
    std::thread::sleep(duration);
}

/// Spin until `duration` has elapsed without yielding the CPU.
pub fn busy_wait(duration: Duration) {
    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        core::hint::spin_loop();
    }
}
