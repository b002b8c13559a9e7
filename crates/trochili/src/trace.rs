//! Binary trace hook and record identifiers.
//!
//! With the `trace` feature the hook type, error and record ids come from
//! `trochili-trace`; without it an equivalent local table is compiled in so
//! the kernel can still report to any closure.

#[cfg(feature = "trace")]
pub use trochili_trace::{records, TraceError, TraceHook};

#[cfg(not(feature = "trace"))]
pub type TraceError = core::convert::Infallible;

#[cfg(not(feature = "trace"))]
pub type TraceHook =
    alloc::sync::Arc<dyn Fn(u8, &[u8], bool) -> Result<(), TraceError> + Send + Sync>;

#[cfg(not(feature = "trace"))]
pub mod records {
    pub mod sched {
        pub const LOCK: u8 = 50;
        pub const UNLOCK: u8 = 51;
        pub const NEXT: u8 = 52;
        pub const CANCEL: u8 = 53;
        pub const SLICE: u8 = 54;
    }

    pub mod thread {
        pub const CREATE: u8 = 60;
        pub const DELETE: u8 = 61;
        pub const STATUS: u8 = 62;
        pub const PRIORITY: u8 = 63;
    }

    pub mod ipc {
        pub const BLOCK: u8 = 70;
        pub const UNBLOCK: u8 = 71;
        pub const TIMEOUT: u8 = 72;
    }
}

/// Largest payload the kernel ever emits.
pub(crate) const MAX_PAYLOAD: usize = 8;

pub(crate) type Payload = heapless::Vec<u8, MAX_PAYLOAD>;

/// Builds a payload from up to [`MAX_PAYLOAD`] bytes; extra bytes are dropped.
pub(crate) fn payload(bytes: &[u8]) -> Payload {
    let len = bytes.len().min(MAX_PAYLOAD);
    Payload::from_slice(&bytes[..len]).unwrap_or_default()
}
