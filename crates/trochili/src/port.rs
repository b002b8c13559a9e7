//! Boundary between the kernel core and the CPU/board port.
//!
//! The core decides *which* thread runs; the port performs the switch, builds
//! initial stack frames and reports stack usage. [`HostPort`] implements the
//! trait in plain memory for host simulation and tests.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use crate::thread::{ThreadEntry, ThreadId};

/// Memory reserved for a thread's stack (full-descending: grows from
/// `base + size` toward `base`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StackRegion {
    pub base: usize,
    pub size: usize,
}

impl StackRegion {
    pub const fn new(base: usize, size: usize) -> Self {
        Self { base, size }
    }

    /// Address one past the highest stack word.
    pub const fn top(&self) -> usize {
        self.base + self.size
    }

    /// Stack pointer value below which the alarm fires.
    pub(crate) fn alarm_level(&self, ratio: u8) -> usize {
        self.top() - self.size * ratio as usize / 100
    }
}

/// Snapshot of a suspended thread's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackProbe {
    /// Saved stack pointer.
    pub top: usize,
    /// Word currently stored at the stack base.
    pub barrier: u32,
}

/// Hooks the kernel calls into the CPU port.
pub trait Port {
    /// Requests a switch to `to`; the port performs it once the critical
    /// section is left.
    fn confirm_switch(&mut self, from: Option<ThreadId>, to: ThreadId);

    /// Withdraws a pending switch because the nominee is already running.
    fn cancel_switch(&mut self) {}

    /// Builds the initial frame and writes `barrier` at `stack.base`.
    fn init_stack(
        &mut self,
        _thread: ThreadId,
        _stack: &StackRegion,
        _entry: Option<ThreadEntry>,
        _argument: usize,
        _clean: bool,
        _barrier: u32,
    ) {
    }

    /// Reports the saved stack pointer and barrier word of a thread that is
    /// about to be switched in. `None` disables the check for that thread.
    fn stack_probe(&self, _thread: ThreadId, _stack: &StackRegion) -> Option<StackProbe> {
        None
    }
}

/// In-memory port: records switch requests and simulates stacks.
#[derive(Debug, Default)]
pub struct HostPort {
    switches: Vec<(Option<ThreadId>, ThreadId)>,
    cancels: usize,
    stacks: BTreeMap<ThreadId, StackProbe>,
}

impl HostPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch requests confirmed so far, oldest first.
    pub fn switches(&self) -> &[(Option<ThreadId>, ThreadId)] {
        &self.switches
    }

    /// Thread named by the most recent switch request.
    pub fn last_switch(&self) -> Option<ThreadId> {
        self.switches.last().map(|&(_, to)| to)
    }

    pub fn cancels(&self) -> usize {
        self.cancels
    }

    pub fn clear(&mut self) {
        self.switches.clear();
        self.cancels = 0;
    }

    /// Simulates stack usage by moving the saved stack pointer.
    pub fn set_stack_top(&mut self, thread: ThreadId, top: usize) {
        if let Some(probe) = self.stacks.get_mut(&thread) {
            probe.top = top;
        }
    }

    /// Simulates an overflow that overwrote the barrier word.
    pub fn smash_barrier(&mut self, thread: ThreadId) {
        if let Some(probe) = self.stacks.get_mut(&thread) {
            probe.barrier = !probe.barrier;
        }
    }
}

impl Port for HostPort {
    fn confirm_switch(&mut self, from: Option<ThreadId>, to: ThreadId) {
        self.switches.push((from, to));
    }

    fn cancel_switch(&mut self) {
        self.cancels += 1;
    }

    fn init_stack(
        &mut self,
        thread: ThreadId,
        stack: &StackRegion,
        _entry: Option<ThreadEntry>,
        _argument: usize,
        _clean: bool,
        barrier: u32,
    ) {
        self.stacks.insert(
            thread,
            StackProbe {
                top: stack.top(),
                barrier,
            },
        );
    }

    fn stack_probe(&self, thread: ThreadId, _stack: &StackRegion) -> Option<StackProbe> {
        self.stacks.get(&thread).copied()
    }
}
