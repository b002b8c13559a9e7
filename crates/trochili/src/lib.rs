//! # trochili
//!
//! Core of the Trochili real-time kernel: a preemptive, priority-based
//! thread scheduler and the IPC objects threads synchronise through.
//!
//! ## Module Overview
//! - [`kernel`] – Kernel state, start-up, scheduler lock and dispatch.
//! - [`thread`] – Thread control blocks and the thread management API.
//! - [`ipc`]    – Blocking protocol shared by every IPC object.
//! - [`semaphore`], [`mutex`], [`flags`], [`mailbox`] – The IPC objects.
//! - [`isr`]    – The subset of the API reachable from interrupt handlers.
//! - [`port`]   – Hooks into the CPU: context switch, stacks, critical sections.
//!
//! All kernel state lives in one explicitly owned [`Kernel`]. A port that
//! needs global access wraps it in a [`KernelCell`], which serialises every
//! call through a critical section.
//!
//! Blocking calls never suspend the caller's Rust stack. They return
//! [`Completion::Pending`]; the port switches to another thread and, once the
//! blocked thread runs again, [`Kernel::poll_wait`] yields the outcome.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod arena;
mod list;
mod queue;
mod sched;
mod timer;

pub mod config;
pub mod error;
pub mod flags;
pub mod ipc;
pub mod isr;
pub mod kernel;
pub mod mailbox;
pub mod mutex;
pub mod port;
pub mod priority;
pub mod semaphore;
pub mod thread;
pub mod trace;

pub use arena::Handle;
pub use config::{KernelConfig, KernelConfigBuilder};
pub use error::{IpcError, KernelError, ThreadError};
pub use flags::{FlagsId, FlagsInfo};
pub use ipc::{Completion, IpcOption, ObjectRef, Pending};
pub use isr::IsrScope;
pub use kernel::{ExecContext, Kernel, KernelBuilder, KernelCell, KernelDiagnosis};
pub use mailbox::{Mail, MailboxId, MailboxInfo};
pub use mutex::{MutexId, MutexInfo};
pub use port::{HostPort, Port, StackProbe, StackRegion};
pub use priority::{Priority, PriorityMask, PRIORITY_LEVELS};
pub use queue::QueuePolicy;
pub use semaphore::{SemaphoreId, SemaphoreInfo};
pub use thread::{
    Acapi, ThreadConfig, ThreadDiagnosis, ThreadEntry, ThreadId, ThreadInfo, ThreadProperty,
    ThreadStatus,
};
pub use trace::{records, TraceError, TraceHook};
