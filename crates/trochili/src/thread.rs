//! Thread control blocks, creation parameters and status.
//!
//! A thread is always in exactly one place: the ready queue (`Ready`,
//! `Running`), the auxiliary queue (`Init`, `Delayed`, `Suspended`,
//! `Dormant`) or the wait queue of one IPC object (`Blocked`). The
//! [`QueueTag`] records which, so a thread found in the wrong queue is
//! caught before any link is touched.

use core::fmt;

use bitflags::bitflags;

use crate::arena::{handle, Slab};
use crate::ipc::{IpcContext, ObjectRef};
use crate::list::{Link, NodeStore, Ring};
use crate::port::StackRegion;
use crate::priority::Priority;
use crate::timer::ThreadTimer;

handle!(
    /// Handle of a thread owned by a [`Kernel`](crate::Kernel).
    ThreadId
);

/// Function a port starts the thread in, with its argument.
pub type ThreadEntry = fn(usize);

/// Scheduling status of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ThreadStatus {
    /// Being constructed; never observable after `create_thread` returns.
    Init,
    Ready,
    Running,
    /// Waiting on an IPC object.
    Blocked,
    /// Sleeping for a number of ticks.
    Delayed,
    Suspended,
    /// Not started, or finished; may be activated or deleted.
    Dormant,
}

impl ThreadStatus {
    pub(crate) fn code(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

bitflags! {
    /// Behavioural properties of a thread.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadProperty: u8 {
        /// Priority never changes, not even under a mutex ceiling.
        const PRIORITY_FIXED = 1 << 0;
        /// Priority may be changed through the API (cleared while mutexes are held).
        const PRIORITY_SAFE = 1 << 1;
        /// Entry returns once; the thread then becomes dormant.
        const RUN2COMPLETION = 1 << 2;
        /// Entry runs once per resume, the thread suspends itself afterwards.
        const RUNASR = 1 << 3;
        /// Ask the port to zero the stack at creation.
        const CLEAN_STACK = 1 << 4;
    }
}

bitflags! {
    /// Management operations other code may perform on a thread.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Acapi: u16 {
        const DEINIT = 1 << 0;
        const SET_PRIORITY = 1 << 1;
        const SET_SLICE = 1 << 2;
        const YIELD = 1 << 3;
        const ACTIVATE = 1 << 4;
        const DEACTIVATE = 1 << 5;
        const SUSPEND = 1 << 6;
        const RESUME = 1 << 7;
        const UNBLOCK = 1 << 8;
        const DELAY = 1 << 9;
        const UNDELAY = 1 << 10;
    }
}

bitflags! {
    /// Faults recorded against a thread.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadDiagnosis: u8 {
        const STACK_OVERFLOW = 1 << 0;
        const STACK_ALARM = 1 << 1;
        const INVALID_EXIT = 1 << 2;
        const INVALID_STATE = 1 << 3;
    }
}

/// Parameters for [`Kernel::create_thread`](crate::Kernel::create_thread).
#[derive(Debug, Clone)]
pub struct ThreadConfig {
    pub name: &'static str,
    pub priority: Priority,
    /// Ticks per time slice; `None` uses the kernel default.
    pub time_slice: Option<u32>,
    /// `Ready`, `Dormant` or `Suspended`.
    pub initial: ThreadStatus,
    pub property: ThreadProperty,
    pub acapi: Acapi,
    pub stack: Option<StackRegion>,
    pub entry: Option<ThreadEntry>,
    pub argument: usize,
}

impl ThreadConfig {
    /// A ready thread with every management operation allowed.
    pub fn new(priority: Priority) -> Self {
        Self {
            name: "thread",
            priority,
            time_slice: None,
            initial: ThreadStatus::Ready,
            property: ThreadProperty::empty(),
            acapi: Acapi::all(),
            stack: None,
            entry: None,
            argument: 0,
        }
    }

    pub fn name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn time_slice(mut self, ticks: u32) -> Self {
        self.time_slice = Some(ticks);
        self
    }

    pub fn initial(mut self, status: ThreadStatus) -> Self {
        self.initial = status;
        self
    }

    /// Shorthand for `initial(ThreadStatus::Dormant)`.
    pub fn dormant(self) -> Self {
        self.initial(ThreadStatus::Dormant)
    }

    pub fn property(mut self, property: ThreadProperty) -> Self {
        self.property = property;
        self
    }

    pub fn acapi(mut self, acapi: Acapi) -> Self {
        self.acapi = acapi;
        self
    }

    pub fn stack(mut self, stack: StackRegion) -> Self {
        self.stack = Some(stack);
        self
    }

    pub fn entry(mut self, entry: ThreadEntry, argument: usize) -> Self {
        self.entry = Some(entry);
        self.argument = argument;
        self
    }
}

/// Which queue a thread is linked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueueTag {
    Detached,
    Ready,
    Auxiliary,
    Wait(ObjectRef),
}

pub(crate) struct Thread {
    pub(crate) number: u32,
    pub(crate) name: &'static str,
    pub(crate) status: ThreadStatus,
    pub(crate) priority: Priority,
    pub(crate) base_priority: Priority,
    pub(crate) ticks: u32,
    pub(crate) base_ticks: u32,
    pub(crate) jiffies: u64,
    pub(crate) property: ThreadProperty,
    pub(crate) acapi: Acapi,
    pub(crate) diagnosis: ThreadDiagnosis,
    pub(crate) link: Link,
    pub(crate) queue: QueueTag,
    pub(crate) ipc: Option<IpcContext>,
    pub(crate) timer: ThreadTimer,
    /// Held mutexes, highest ceiling first.
    pub(crate) locks: Ring,
    pub(crate) stack: Option<StackRegion>,
    pub(crate) entry: Option<ThreadEntry>,
    pub(crate) argument: usize,
}

impl Thread {
    pub(crate) fn new(number: u32, config: &ThreadConfig, ticks: u32) -> Self {
        Self {
            number,
            name: config.name,
            status: ThreadStatus::Init,
            priority: config.priority,
            base_priority: config.priority,
            ticks,
            base_ticks: ticks,
            jiffies: 0,
            property: config.property | ThreadProperty::PRIORITY_SAFE,
            acapi: config.acapi,
            diagnosis: ThreadDiagnosis::empty(),
            link: Link::default(),
            queue: QueueTag::Detached,
            ipc: None,
            timer: ThreadTimer::new(),
            locks: Ring::new(),
            stack: config.stack,
            entry: config.entry,
            argument: config.argument,
        }
    }
}

impl NodeStore for Slab<Thread, ThreadId> {
    fn link(&self, node: usize) -> Link {
        self.at(node).link
    }

    fn link_mut(&mut self, node: usize) -> &mut Link {
        &mut self.at_mut(node).link
    }

    fn key(&self, node: usize) -> Priority {
        self.at(node).priority
    }
}

/// Snapshot of a thread returned by [`Kernel::thread_info`](crate::Kernel::thread_info).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ThreadInfo {
    pub id: ThreadId,
    /// Creation-order number, unique for the kernel's lifetime.
    pub number: u32,
    pub name: &'static str,
    pub status: ThreadStatus,
    pub priority: Priority,
    pub base_priority: Priority,
    pub ticks: u32,
    pub base_ticks: u32,
    pub jiffies: u64,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub diagnosis: ThreadDiagnosis,
    pub locks_held: usize,
    pub blocked_on: Option<ObjectRef>,
    /// Ticks left on an armed delay or wait timer.
    pub timer: Option<u32>,
}

impl fmt::Display for ThreadInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} [{}] prio {}/{} slice {}/{}",
            self.number,
            self.name,
            self.status,
            self.priority,
            self.base_priority,
            self.ticks,
            self.base_ticks
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_sets_fields() {
        let config = ThreadConfig::new(Priority::new(4))
            .name("worker")
            .time_slice(3)
            .dormant()
            .property(ThreadProperty::RUN2COMPLETION)
            .acapi(Acapi::ACTIVATE | Acapi::DEINIT)
            .stack(StackRegion::new(0x1000, 0x400));

        assert_eq!(config.name, "worker");
        assert_eq!(config.time_slice, Some(3));
        assert_eq!(config.initial, ThreadStatus::Dormant);
        assert!(config.acapi.contains(Acapi::ACTIVATE));
        assert!(!config.acapi.contains(Acapi::SUSPEND));
        assert_eq!(config.stack.map(|s| s.top()), Some(0x1400));
    }

    #[test]
    fn new_thread_is_detached_and_priority_safe() {
        let config = ThreadConfig::new(Priority::new(2)).property(ThreadProperty::PRIORITY_FIXED);
        let thread = Thread::new(7, &config, 5);

        assert_eq!(thread.status, ThreadStatus::Init);
        assert_eq!(thread.queue, QueueTag::Detached);
        assert!(thread.property.contains(ThreadProperty::PRIORITY_SAFE));
        assert!(thread.property.contains(ThreadProperty::PRIORITY_FIXED));
        assert_eq!((thread.ticks, thread.base_ticks), (5, 5));
    }
}
