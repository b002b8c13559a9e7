//! Error types for thread management, IPC and kernel construction.

use thiserror::Error;

/// Detailed failure of a thread management call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThreadError {
    /// The thread is not in the state the operation requires.
    #[error("thread is in the wrong state for this operation")]
    Status,
    /// The call is not allowed in the current context or configuration.
    #[error("operation not permitted here")]
    Fault,
    /// The thread's capability mask refuses this operation.
    #[error("operation refused by the thread's capability mask")]
    Acapi,
    /// The handle does not name a live thread.
    #[error("thread is not initialized")]
    Unready,
    /// The requested priority is invalid for this thread.
    #[error("invalid priority")]
    Priority,
}

/// Detailed failure of an IPC call, including the wake outcomes of a wait.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IpcError {
    /// The handle does not name a live object.
    #[error("object is not initialized")]
    Unready,
    /// The call is not allowed in the current context.
    #[error("operation not permitted here")]
    Fault,
    /// Counter at its bound (semaphore) or invalid creation value.
    #[error("value out of range")]
    InvalidValue,
    /// Object is in the wrong state (mailbox full or empty).
    #[error("object is in the wrong state")]
    InvalidStatus,
    /// Caller does not own the object.
    #[error("caller does not own the object")]
    Forbidden,
    /// Flag pattern did not match, or sending changed nothing.
    #[error("flag pattern not satisfied")]
    Flags,
    /// Woken because the object was reset.
    #[error("wait aborted by reset")]
    Reset,
    /// Woken because the object was deleted.
    #[error("wait aborted by delete")]
    Delete,
    /// Woken because the object's waiters were flushed.
    #[error("wait aborted by flush")]
    Flush,
    /// Woken because the wait timed out.
    #[error("wait timed out")]
    Timeout,
    /// Woken by an explicit unblock of the thread.
    #[error("wait aborted by unblock")]
    Abort,
}

impl IpcError {
    /// Compact code used in trace payloads.
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Unready => 1,
            Self::Fault => 2,
            Self::InvalidValue => 3,
            Self::InvalidStatus => 4,
            Self::Forbidden => 5,
            Self::Flags => 6,
            Self::Reset => 7,
            Self::Delete => 8,
            Self::Flush => 9,
            Self::Timeout => 10,
            Self::Abort => 11,
        }
    }
}

/// Failure of a kernel-level call.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    #[error("{0} table is full")]
    Capacity(&'static str),
    #[error("kernel already started")]
    Started,
}
