//! Canonical record identifiers shared by the kernel and host tools.
//!
//! Payloads that name a thread start with its number as a little-endian
//! `u32`; thread numbers are never reused.

/// Scheduler decisions.
pub mod sched {
    /// Scheduler locked; payload: `1`.
    pub const LOCK: u8 = 50;
    /// Last scheduler lock released; payload: `0`.
    pub const UNLOCK: u8 = 51;
    /// Switch confirmed; payload: next thread number, its priority.
    pub const NEXT: u8 = 52;
    /// Switch withdrawn because the nominee is already running; payload:
    /// thread number, priority.
    pub const CANCEL: u8 = 53;
    /// Time slice of the running thread expired and its bucket rotated;
    /// payload: thread number, priority.
    pub const SLICE: u8 = 54;
}

/// Thread lifecycle.
pub mod thread {
    /// Thread created; payload: thread number, priority.
    pub const CREATE: u8 = 60;
    /// Thread deleted; payload: thread number.
    pub const DELETE: u8 = 61;
    /// Status transition; payload: thread number, new status code.
    pub const STATUS: u8 = 62;
    /// Priority change; payload: thread number, new priority, `1` if permanent.
    pub const PRIORITY: u8 = 63;
}

/// IPC wait and wake-up.
pub mod ipc {
    /// Thread parked on a wait queue; payload: thread number, object kind.
    pub const BLOCK: u8 = 70;
    /// Thread released from a wait queue; payload: thread number, outcome code.
    pub const UNBLOCK: u8 = 71;
    /// Wait expired; payload: thread number.
    pub const TIMEOUT: u8 = 72;
}
