//! Scoped real-time scheduling for timing-critical sampling

use std::io;

use log::{debug, warn};

/// Holds the calling thread at the highest `SCHED_FIFO` priority until
/// dropped, then returns it to `SCHED_OTHER`.
///
/// Raising is best effort: without the privilege the guard logs a warning
/// and does nothing.
#[derive(Debug)]
#[must_use = "priority is restored as soon as the guard is dropped"]
pub struct RealtimeGuard {
    raised: bool,
}

impl RealtimeGuard {
    pub fn acquire() -> Self {
        let priority = unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) };
        if priority < 0 {
            warn!("sched: no SCHED_FIFO priority range: {}", io::Error::last_os_error());
            return Self { raised: false };
        }

        let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
        param.sched_priority = priority;
        if unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) } != 0 {
            warn!("sched: failed to raise priority: {}", io::Error::last_os_error());
            return Self { raised: false };
        }

        debug!("sched: SCHED_FIFO priority {}", priority);
        Self { raised: true }
    }

    /// Whether the raise took effect
    pub fn is_raised(&self) -> bool {
        self.raised
    }
}

impl Drop for RealtimeGuard {
    fn drop(&mut self) {
        if !self.raised {
            return;
        }
        let param: libc::sched_param = unsafe { std::mem::zeroed() };
        if unsafe { libc::sched_setscheduler(0, libc::SCHED_OTHER, &param) } != 0 {
            warn!("sched: failed to restore priority: {}", io::Error::last_os_error());
        }
    }
}
