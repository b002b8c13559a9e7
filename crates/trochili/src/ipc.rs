//! Blocking and wake-up machinery shared by every IPC primitive.
//!
//! A thread that cannot complete an IPC call saves an [`IpcContext`]
//! (object, options, data slot), leaves the ready queue and is linked into
//! the object's wait queue. Whoever later satisfies or aborts the wait fills
//! the context's result and moves the thread back to the ready queue. The
//! thread collects the outcome with [`Kernel::poll_wait`] once it runs again.

use core::fmt;
use core::marker::PhantomData;

use bitflags::bitflags;

use crate::arena::{Handle, Slab};
use crate::error::IpcError;
use crate::flags::FlagsId;
use crate::kernel::Kernel;
use crate::mailbox::{Mail, MailboxId};
use crate::mutex::MutexId;
use crate::port::Port;
use crate::queue::{QueuePosition, WaitQueue};
use crate::semaphore::SemaphoreId;
use crate::thread::{QueueTag, Thread, ThreadId, ThreadStatus};
use crate::trace::records;

bitflags! {
    /// Options accepted by the IPC calls.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IpcOption: u8 {
        /// Block when the call cannot complete immediately.
        const WAIT = 1 << 0;
        /// Flags: every requested bit must be set.
        const AND = 1 << 1;
        /// Flags: any requested bit suffices.
        const OR = 1 << 2;
        /// Flags: clear the matched bits on success.
        const CONSUME = 1 << 3;
        /// Mailbox send: wait in the urgent lane.
        const URGENT = 1 << 4;
    }
}

/// The IPC object a thread is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ObjectRef {
    Semaphore(SemaphoreId),
    Mutex(MutexId),
    Flags(FlagsId),
    Mailbox(MailboxId),
}

impl ObjectRef {
    fn kind_code(self) -> u8 {
        match self {
            Self::Semaphore(_) => 1,
            Self::Mutex(_) => 2,
            Self::Flags(_) => 3,
            Self::Mailbox(_) => 4,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Semaphore(id) => write!(f, "semaphore {id:?}"),
            Self::Mutex(id) => write!(f, "mutex {id:?}"),
            Self::Flags(id) => write!(f, "flags {id:?}"),
            Self::Mailbox(id) => write!(f, "mailbox {id:?}"),
        }
    }
}

/// Per-call data slot of a blocked thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitData {
    None,
    /// Requested pattern; overwritten with the matched bits on wake.
    Flags(u32),
    /// Mail delivered to a blocked reader.
    Receive(Option<Mail>),
    /// Mail a blocked writer wants to deposit.
    Send(Mail),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct IpcContext {
    pub(crate) object: ObjectRef,
    pub(crate) option: IpcOption,
    pub(crate) data: WaitData,
    pub(crate) result: Option<Result<(), IpcError>>,
}

impl IpcContext {
    fn urgent(&self) -> bool {
        self.option.contains(IpcOption::URGENT)
    }
}

/// Result of an IPC call that may block.
#[must_use]
#[derive(Debug)]
pub enum Completion<T> {
    /// Completed without blocking.
    Done(T),
    /// The calling thread is parked; collect the outcome with
    /// [`Kernel::poll_wait`] once it runs again.
    Pending(Pending<T>),
}

impl<T> Completion<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn into_done(self) -> Option<T> {
        match self {
            Self::Done(value) => Some(value),
            Self::Pending(_) => None,
        }
    }

    pub fn into_pending(self) -> Option<Pending<T>> {
        match self {
            Self::Done(_) => None,
            Self::Pending(pending) => Some(pending),
        }
    }
}

/// Ticket for a parked IPC call.
#[must_use]
pub struct Pending<T> {
    thread: ThreadId,
    extract: fn(&WaitData) -> Option<T>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Pending<T> {
    pub(crate) fn new(thread: ThreadId, extract: fn(&WaitData) -> Option<T>) -> Self {
        Self {
            thread,
            extract,
            _value: PhantomData,
        }
    }

    /// Thread that made the call.
    pub fn thread(&self) -> ThreadId {
        self.thread
    }
}

impl<T> fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("thread", &self.thread)
            .finish()
    }
}

pub(crate) fn extract_unit(_: &WaitData) -> Option<()> {
    Some(())
}

impl<P: Port> Kernel<P> {
    /// Collects the outcome of a parked call.
    ///
    /// Returns `None` while the thread is still blocked. The first `Some`
    /// clears the thread's IPC context; polling the same ticket again yields
    /// `Some(Err(IpcError::Fault))`.
    pub fn poll_wait<T>(&mut self, pending: &Pending<T>) -> Option<Result<T, IpcError>> {
        let Some(thread) = self.threads.get_mut(pending.thread) else {
            return Some(Err(IpcError::Fault));
        };
        if thread.status == ThreadStatus::Blocked {
            return None;
        }
        let Some(ctx) = thread.ipc.take() else {
            return Some(Err(IpcError::Fault));
        };

        Some(match ctx.result {
            Some(Ok(())) => (pending.extract)(&ctx.data).ok_or(IpcError::Fault),
            Some(Err(error)) => Err(error),
            None => Err(IpcError::Fault),
        })
    }

    /// True while `pending`'s thread is still parked.
    pub fn is_waiting<T>(&self, pending: &Pending<T>) -> bool {
        self.threads
            .get(pending.thread)
            .is_some_and(|thread| thread.status == ThreadStatus::Blocked)
    }

    /// True when a blocking call may park the caller.
    pub(crate) fn can_block(&self) -> bool {
        self.in_thread_context() && self.is_schedulable()
    }

    pub(crate) fn wait_queue(&self, object: ObjectRef) -> Option<&WaitQueue> {
        match object {
            ObjectRef::Semaphore(id) => self.semaphores.get(id).map(|s| &s.queue),
            ObjectRef::Mutex(id) => self.mutexes.get(id).map(|m| &m.queue),
            ObjectRef::Flags(id) => self.flags.get(id).map(|f| &f.queue),
            ObjectRef::Mailbox(id) => self.mailboxes.get(id).map(|m| &m.queue),
        }
    }

    fn split_wait(
        &mut self,
        object: ObjectRef,
    ) -> Option<(&mut WaitQueue, &mut Slab<Thread, ThreadId>)> {
        let queue = match object {
            ObjectRef::Semaphore(id) => &mut self.semaphores.get_mut(id)?.queue,
            ObjectRef::Mutex(id) => &mut self.mutexes.get_mut(id)?.queue,
            ObjectRef::Flags(id) => &mut self.flags.get_mut(id)?.queue,
            ObjectRef::Mailbox(id) => &mut self.mailboxes.get_mut(id)?.queue,
        };
        Some((queue, &mut self.threads))
    }

    /// Parks the running thread on `object` and hands the CPU to the next
    /// ready thread. `timeout` of zero waits forever.
    pub(crate) fn block_current<T>(
        &mut self,
        object: ObjectRef,
        option: IpcOption,
        data: WaitData,
        timeout: u32,
        extract: fn(&WaitData) -> Option<T>,
    ) -> Pending<T> {
        let id = self.running_thread();
        let index = id.index();

        self.leave_queue(index, QueueTag::Ready);
        let ctx = IpcContext {
            object,
            option,
            data,
            result: None,
        };

        let Some((queue, threads)) = self.split_wait(object) else {
            panic!("blocking on dead {object}");
        };
        queue.enter(threads, index, ctx.urgent());

        let thread = self.threads.at_mut(index);
        thread.queue = QueueTag::Wait(object);
        thread.ipc = Some(ctx);
        thread.timer.arm(timeout);
        let number = thread.number;
        self.set_status(index, ThreadStatus::Blocked);

        self.emit_thread(records::ipc::BLOCK, number, &[object.kind_code()]);
        log::trace!("thread #{number} blocked on {object} (timeout {timeout})");

        self.schedule();
        Pending::new(id, extract)
    }

    /// Releases a blocked thread with `outcome`. Returns true when the
    /// released thread outranks the running one.
    pub(crate) fn unblock(&mut self, index: usize, outcome: Result<(), IpcError>) -> bool {
        let thread = self.threads.at(index);
        let (QueueTag::Wait(object), Some(ctx)) = (thread.queue, thread.ipc) else {
            panic!("thread #{} is not on a wait queue", thread.number);
        };

        let Some((queue, threads)) = self.split_wait(object) else {
            panic!("waiter of dead {object}");
        };
        queue.leave(threads, index, ctx.urgent());

        let thread = self.threads.at_mut(index);
        thread.queue = QueueTag::Detached;
        thread.timer.disarm();
        if let Some(ctx) = thread.ipc.as_mut() {
            ctx.result = Some(outcome);
        }
        let number = thread.number;
        let code = outcome.err().map_or(0, IpcError::code);

        self.enter_ready(index, QueuePosition::Tail);
        self.emit_thread(records::ipc::UNBLOCK, number, &[code]);
        log::trace!("thread #{number} released from {object}: {outcome:?}");

        self.outranks_current(index)
    }

    /// Releases every waiter of `object`, urgent lane first. `mail` is
    /// delivered to waiting readers (broadcast).
    pub(crate) fn unblock_all(
        &mut self,
        object: ObjectRef,
        outcome: Result<(), IpcError>,
        mail: Option<Mail>,
    ) -> bool {
        let mut hirp = false;
        while let Some(index) = self.wait_queue(object).and_then(WaitQueue::first) {
            if let (Some(mail), Some(ctx)) = (mail, self.threads.at_mut(index).ipc.as_mut()) {
                if let WaitData::Receive(slot) = &mut ctx.data {
                    *slot = Some(mail);
                }
            }
            hirp |= self.unblock(index, outcome);
        }
        hirp
    }

    /// Re-sorts a blocked thread after its priority changed.
    pub(crate) fn reposition_waiter(&mut self, index: usize) {
        let thread = self.threads.at(index);
        let (QueueTag::Wait(object), Some(ctx)) = (thread.queue, thread.ipc) else {
            panic!("thread #{} is not on a wait queue", thread.number);
        };
        if let Some((queue, threads)) = self.split_wait(object) {
            queue.reposition(threads, index, ctx.urgent());
        }
    }

    pub(crate) fn wait_data(&self, index: usize) -> WaitData {
        self.threads
            .at(index)
            .ipc
            .map_or(WaitData::None, |ctx| ctx.data)
    }

    pub(crate) fn wait_option(&self, index: usize) -> IpcOption {
        self.threads
            .at(index)
            .ipc
            .map_or(IpcOption::empty(), |ctx| ctx.option)
    }

    pub(crate) fn set_wait_data(&mut self, index: usize, data: WaitData) {
        if let Some(ctx) = self.threads.at_mut(index).ipc.as_mut() {
            ctx.data = data;
        }
    }
}
