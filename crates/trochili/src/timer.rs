//! Per-thread countdown used for delays and IPC wait timeouts.
//!
//! Each thread owns one [`ThreadTimer`]. The tick handler decrements every
//! armed timer; when one reaches zero the kernel either readies the delayed
//! thread or releases the blocked one with a timeout.

use crate::error::IpcError;
use crate::kernel::Kernel;
use crate::port::Port;
use crate::thread::ThreadStatus;
use crate::trace::records;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ThreadTimer {
    remaining: u32,
    armed: bool,
}

impl ThreadTimer {
    pub(crate) const fn new() -> Self {
        Self {
            remaining: 0,
            armed: false,
        }
    }

    pub(crate) fn arm(&mut self, ticks: u32) {
        self.remaining = ticks;
        self.armed = ticks > 0;
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
        self.remaining = 0;
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed
    }

    pub(crate) fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Counts one tick; returns true exactly once, on expiry.
    pub(crate) fn poll(&mut self) -> bool {
        if !self.armed {
            return false;
        }
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.armed = false;
            true
        } else {
            false
        }
    }
}

impl<P: Port> Kernel<P> {
    /// Advances every armed thread timer by one tick.
    pub(crate) fn poll_timers(&mut self) {
        for index in 0..self.threads.slot_count() {
            if !self.threads.is_live(index) || !self.threads.at_mut(index).timer.poll() {
                continue;
            }

            match self.threads.at(index).status {
                ThreadStatus::Delayed => {
                    // Status was just checked, so the transition cannot fail.
                    let _ = self.set_ready(index, ThreadStatus::Delayed);
                }
                ThreadStatus::Blocked => {
                    let number = self.threads.at(index).number;
                    self.emit_thread(records::ipc::TIMEOUT, number, &[]);
                    log::trace!("wait of thread #{number} timed out");
                    // Interrupt exit reschedules, so the preemption hint is not needed.
                    let _ = self.unblock(index, Err(IpcError::Timeout));
                }
                status => {
                    log::warn!("timer expired for thread in {status} state");
                }
            }
        }
    }
}
