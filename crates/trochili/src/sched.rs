//! Thread state machine and the thread management API.
//!
//! Every status change goes through [`Kernel::set_ready`] or
//! [`Kernel::set_unready`] (or the IPC block/unblock pair), which move the
//! thread between the ready and auxiliary queues and decide whether the
//! scheduler has to run.

use crate::arena::Handle;
use crate::error::{IpcError, ThreadError};
use crate::kernel::{Kernel, KernelDiagnosis};
use crate::port::Port;
use crate::priority::Priority;
use crate::queue::QueuePosition;
use crate::thread::{
    Acapi, QueueTag, Thread, ThreadConfig, ThreadDiagnosis, ThreadId, ThreadInfo, ThreadProperty,
    ThreadStatus,
};
use crate::trace::records;

impl<P: Port> Kernel<P> {
    pub(crate) fn set_status(&mut self, index: usize, status: ThreadStatus) {
        let thread = self.threads.at_mut(index);
        let from = thread.status;
        thread.status = status;
        let number = thread.number;

        log::trace!("thread #{number}: {from} -> {status}");
        self.emit_thread(records::thread::STATUS, number, &[status.code()]);
    }

    /// Links a detached thread into the ready or auxiliary queue.
    ///
    /// # Panics
    ///
    /// If the thread is already queued somewhere.
    pub(crate) fn enter_queue(&mut self, index: usize, tag: QueueTag, position: QueuePosition) {
        let thread = self.threads.at(index);
        if thread.queue != QueueTag::Detached {
            panic!("thread #{} is already queued ({:?})", thread.number, thread.queue);
        }
        let priority = thread.priority;

        match tag {
            QueueTag::Ready => self.ready.enter(&mut self.threads, index, priority, position),
            QueueTag::Auxiliary => {
                self.auxiliary
                    .enter(&mut self.threads, index, priority, position)
            }
            QueueTag::Detached | QueueTag::Wait(_) => {
                panic!("{tag:?} is not a thread queue")
            }
        }
        self.threads.at_mut(index).queue = tag;
    }

    /// Unlinks a thread from the queue it is expected to be in.
    ///
    /// # Panics
    ///
    /// If the thread is in a different queue.
    pub(crate) fn leave_queue(&mut self, index: usize, tag: QueueTag) {
        let thread = self.threads.at(index);
        if thread.queue != tag {
            panic!(
                "thread #{} expected in {tag:?} queue, found in {:?}",
                thread.number, thread.queue
            );
        }
        let priority = thread.priority;

        match tag {
            QueueTag::Ready => self.ready.leave(&mut self.threads, index, priority),
            QueueTag::Auxiliary => self.auxiliary.leave(&mut self.threads, index, priority),
            QueueTag::Detached | QueueTag::Wait(_) => {
                panic!("{tag:?} is not a thread queue")
            }
        }
        self.threads.at_mut(index).queue = QueueTag::Detached;
    }

    /// Puts a detached thread in the ready queue with a fresh time slice.
    pub(crate) fn enter_ready(&mut self, index: usize, position: QueuePosition) {
        self.enter_queue(index, QueueTag::Ready, position);
        let thread = self.threads.at_mut(index);
        thread.ticks = thread.base_ticks;
        self.set_status(index, ThreadStatus::Ready);
    }

    /// Moves a thread from `expected` to `Ready` and preempts if it
    /// outranks the running thread.
    pub(crate) fn set_ready(
        &mut self,
        index: usize,
        expected: ThreadStatus,
    ) -> Result<(), ThreadError> {
        if self.threads.at(index).status != expected {
            return Err(ThreadError::Status);
        }

        self.leave_queue(index, QueueTag::Auxiliary);
        if expected == ThreadStatus::Delayed {
            self.threads.at_mut(index).timer.disarm();
        }
        self.enter_ready(index, QueuePosition::Tail);

        let hirp = self.outranks_current(index);
        self.preempt(hirp);
        Ok(())
    }

    /// Moves a ready or running thread to the auxiliary queue with `status`.
    /// `ticks` arms the thread timer when `status` is `Delayed`.
    pub(crate) fn set_unready(
        &mut self,
        index: usize,
        status: ThreadStatus,
        ticks: u32,
    ) -> Result<(), ThreadError> {
        let running = match self.threads.at(index).status {
            ThreadStatus::Running => {
                if !(self.in_thread_context() && self.is_schedulable()) {
                    return Err(ThreadError::Fault);
                }
                true
            }
            ThreadStatus::Ready => false,
            _ => return Err(ThreadError::Status),
        };

        self.leave_queue(index, QueueTag::Ready);
        self.enter_queue(index, QueueTag::Auxiliary, QueuePosition::Tail);
        self.set_status(index, status);
        if status == ThreadStatus::Delayed {
            self.threads.at_mut(index).timer.arm(ticks);
        }

        if running {
            self.schedule();
        }
        Ok(())
    }

    /// Changes a thread's priority, keeping it in the right bucket or wait
    /// position. Returns true when a reschedule is due.
    pub(crate) fn set_priority_internal(
        &mut self,
        index: usize,
        priority: Priority,
        permanent: bool,
    ) -> bool {
        let mut hirp = false;

        let thread = self.threads.at_mut(index);
        if thread.priority == priority {
            // Same bucket; the thread keeps its queue position.
            if permanent {
                thread.base_priority = priority;
            }
            return false;
        }

        match self.threads.at(index).status {
            ThreadStatus::Blocked => {
                self.threads.at_mut(index).priority = priority;
                self.reposition_waiter(index);
            }
            ThreadStatus::Ready => {
                self.leave_queue(index, QueueTag::Ready);
                self.threads.at_mut(index).priority = priority;
                self.enter_queue(index, QueueTag::Ready, QueuePosition::Tail);
                hirp = self.outranks_current(index);
            }
            ThreadStatus::Running => {
                self.leave_queue(index, QueueTag::Ready);
                self.threads.at_mut(index).priority = priority;
                self.enter_queue(index, QueueTag::Ready, QueuePosition::Head);
                hirp = self
                    .ready
                    .highest()
                    .is_some_and(|highest| highest.is_higher_than(priority));
            }
            _ => {
                // Auxiliary buckets are keyed by priority too.
                let queued = self.threads.at(index).queue == QueueTag::Auxiliary;
                if queued {
                    self.leave_queue(index, QueueTag::Auxiliary);
                }
                self.threads.at_mut(index).priority = priority;
                if queued {
                    self.enter_queue(index, QueueTag::Auxiliary, QueuePosition::Tail);
                }
            }
        }

        let thread = self.threads.at_mut(index);
        if permanent {
            thread.base_priority = priority;
        }
        let number = thread.number;
        log::trace!("thread #{number} priority {priority} (permanent: {permanent})");
        self.emit_thread(
            records::thread::PRIORITY,
            number,
            &[priority.raw(), permanent as u8],
        );
        hirp
    }

    /// Time-slice accounting and timer service for one tick.
    pub(crate) fn tick(&mut self) {
        self.jiffies += 1;

        if let Some(index) = self
            .current
            .filter(|&id| self.threads.contains(id))
            .map(|id| id.index())
        {
            let thread = self.threads.at_mut(index);
            thread.jiffies += 1;
            thread.ticks = thread.ticks.saturating_sub(1);

            if thread.ticks == 0 {
                thread.ticks = thread.base_ticks;
                let priority = thread.priority;
                let number = thread.number;
                let running = thread.status == ThreadStatus::Running;

                if running && self.is_schedulable() && self.ready.head(priority) == Some(index) {
                    self.ready.rotate(&self.threads, priority);
                    self.threads.at_mut(index).status = ThreadStatus::Ready;
                    log::trace!("time slice of thread #{number} expired");
                    self.emit_thread(records::sched::SLICE, number, &[priority.raw()]);
                }
            }
        }

        self.poll_timers();
    }

    /// Creates a thread without API checks; `None` when the table is full.
    pub(crate) fn spawn_thread(&mut self, config: &ThreadConfig) -> Option<ThreadId> {
        let ticks = config
            .time_slice
            .unwrap_or(self.config.default_time_slice)
            .max(1);
        let number = self.next_number;
        let id = self.threads.insert(Thread::new(number, config, ticks))?;
        self.next_number += 1;

        let index = id.index();
        if let Some(stack) = config.stack {
            let clean = config.property.contains(ThreadProperty::CLEAN_STACK);
            let barrier = self.config.stack_barrier;
            self.port
                .init_stack(id, &stack, config.entry, config.argument, clean, barrier);
        }
        self.enter_queue(index, QueueTag::Auxiliary, QueuePosition::Tail);

        log::debug!(
            "created thread #{number} '{}' at {} ({})",
            config.name,
            config.priority,
            config.initial
        );
        self.emit_thread(records::thread::CREATE, number, &[config.priority.raw()]);

        match config.initial {
            // Init is the expected status, so this cannot fail.
            ThreadStatus::Ready => {
                let _ = self.set_ready(index, ThreadStatus::Init);
            }
            status => self.set_status(index, status),
        }
        Some(id)
    }

    fn resolve(&self, target: Option<ThreadId>) -> Result<usize, ThreadError> {
        match target {
            Some(id) if self.threads.contains(id) => Ok(id.index()),
            Some(_) => Err(ThreadError::Unready),
            None => self
                .current
                .filter(|_| self.in_thread_context())
                .map(|id| id.index())
                .ok_or(ThreadError::Fault),
        }
    }

    fn permit(&self, index: usize, operation: Acapi) -> Result<(), ThreadError> {
        let thread = self.threads.at(index);
        if thread.acapi.contains(operation) {
            Ok(())
        } else {
            log::warn!("thread #{} refuses {operation:?}", thread.number);
            Err(ThreadError::Acapi)
        }
    }

    /// Creates a thread and, for a `Ready` initial status, makes it
    /// schedulable right away.
    pub fn create_thread(&mut self, config: ThreadConfig) -> Result<ThreadId, ThreadError> {
        if config.priority == Priority::LOWEST {
            return Err(ThreadError::Priority);
        }
        if !matches!(
            config.initial,
            ThreadStatus::Ready | ThreadStatus::Dormant | ThreadStatus::Suspended
        ) {
            return Err(ThreadError::Status);
        }

        self.spawn_thread(&config).ok_or_else(|| {
            log::warn!("thread table full");
            ThreadError::Fault
        })
    }

    /// Deletes a dormant thread. Its handle stops resolving.
    pub fn delete_thread(&mut self, target: Option<ThreadId>) -> Result<(), ThreadError> {
        let index = self.resolve(target)?;
        self.permit(index, Acapi::DEINIT)?;

        let thread = self.threads.at(index);
        if thread.status != ThreadStatus::Dormant {
            return Err(ThreadError::Status);
        }
        if !thread.locks.is_empty() {
            return Err(ThreadError::Fault);
        }

        self.leave_queue(index, QueueTag::Auxiliary);
        let id = self.threads.handle_at(index);
        if let Some(thread) = self.threads.remove(id) {
            log::debug!("deleted thread #{} '{}'", thread.number, thread.name);
            self.emit_thread(records::thread::DELETE, thread.number, &[]);
        }
        Ok(())
    }

    /// Permanently changes a thread's priority.
    pub fn set_thread_priority(
        &mut self,
        target: Option<ThreadId>,
        priority: Priority,
    ) -> Result<(), ThreadError> {
        let index = self.resolve(target)?;
        self.permit(index, Acapi::SET_PRIORITY)?;

        if priority == Priority::LOWEST {
            return Err(ThreadError::Priority);
        }
        let property = self.threads.at(index).property;
        if property.contains(ThreadProperty::PRIORITY_FIXED)
            || !property.contains(ThreadProperty::PRIORITY_SAFE)
        {
            return Err(ThreadError::Fault);
        }

        let hirp = self.set_priority_internal(index, priority, true);
        self.preempt(hirp);
        Ok(())
    }

    /// Sets the time slice length. A longer slice extends the remaining
    /// ticks by the difference; a shorter one caps them.
    pub fn set_time_slice(&mut self, target: Option<ThreadId>, ticks: u32) -> Result<(), ThreadError> {
        let index = self.resolve(target)?;
        self.permit(index, Acapi::SET_SLICE)?;
        if ticks == 0 {
            return Err(ThreadError::Fault);
        }

        let thread = self.threads.at_mut(index);
        if thread.base_ticks > ticks {
            thread.ticks = thread.ticks.min(ticks);
        } else {
            thread.ticks += ticks - thread.base_ticks;
        }
        thread.base_ticks = ticks;
        Ok(())
    }

    /// Hands the CPU to the next ready thread of the same priority.
    pub fn yield_thread(&mut self) -> Result<(), ThreadError> {
        if !(self.in_thread_context() && self.is_schedulable()) {
            return Err(ThreadError::Fault);
        }
        let index = self.resolve(None)?;
        self.permit(index, Acapi::YIELD)?;

        let priority = self.threads.at(index).priority;
        self.ready.rotate(&self.threads, priority);
        self.threads.at_mut(index).status = ThreadStatus::Ready;
        self.schedule();
        Ok(())
    }

    /// Dormant -> Ready.
    pub fn activate_thread(&mut self, id: ThreadId) -> Result<(), ThreadError> {
        let index = self.resolve(Some(id))?;
        self.permit(index, Acapi::ACTIVATE)?;
        self.set_ready(index, ThreadStatus::Dormant)
    }

    /// Ready or Running -> Dormant.
    pub fn deactivate_thread(&mut self, target: Option<ThreadId>) -> Result<(), ThreadError> {
        let index = self.resolve(target)?;
        self.permit(index, Acapi::DEACTIVATE)?;
        self.set_unready(index, ThreadStatus::Dormant, 0)
    }

    /// Ready or Running -> Suspended.
    pub fn suspend_thread(&mut self, target: Option<ThreadId>) -> Result<(), ThreadError> {
        let index = self.resolve(target)?;
        self.permit(index, Acapi::SUSPEND)?;
        self.set_unready(index, ThreadStatus::Suspended, 0)
    }

    /// Suspended -> Ready.
    pub fn resume_thread(&mut self, id: ThreadId) -> Result<(), ThreadError> {
        let index = self.resolve(Some(id))?;
        self.permit(index, Acapi::RESUME)?;
        self.set_ready(index, ThreadStatus::Suspended)
    }

    /// Puts a thread to sleep for `ticks` ticks (at least one).
    pub fn delay_thread(&mut self, target: Option<ThreadId>, ticks: u32) -> Result<(), ThreadError> {
        let index = self.resolve(target)?;
        self.permit(index, Acapi::DELAY)?;
        if ticks == 0 {
            return Err(ThreadError::Fault);
        }
        self.set_unready(index, ThreadStatus::Delayed, ticks)
    }

    /// Ends a delay early.
    pub fn undelay_thread(&mut self, id: ThreadId) -> Result<(), ThreadError> {
        let index = self.resolve(Some(id))?;
        self.permit(index, Acapi::UNDELAY)?;
        self.set_ready(index, ThreadStatus::Delayed)
    }

    /// Aborts a thread's IPC wait; its call completes with [`IpcError::Abort`].
    pub fn unblock_thread(&mut self, id: ThreadId) -> Result<(), ThreadError> {
        let hirp = self.abort_wait(id)?;
        self.preempt(hirp);
        Ok(())
    }

    pub(crate) fn abort_wait(&mut self, id: ThreadId) -> Result<bool, ThreadError> {
        let index = self.resolve(Some(id))?;
        self.permit(index, Acapi::UNBLOCK)?;
        if self.threads.at(index).status != ThreadStatus::Blocked {
            return Err(ThreadError::Status);
        }
        Ok(self.unblock(index, Err(IpcError::Abort)))
    }

    /// Called by the port when the running thread's entry function returns.
    ///
    /// `RUNASR` threads suspend until resumed, `RUN2COMPLETION` threads go
    /// dormant.
    ///
    /// # Panics
    ///
    /// For any other thread: such a thread must never return.
    pub fn thread_exit(&mut self) -> Result<(), ThreadError> {
        let index = self.resolve(None)?;
        let property = self.threads.at(index).property;

        let status = if property.contains(ThreadProperty::RUNASR) {
            ThreadStatus::Suspended
        } else if property.contains(ThreadProperty::RUN2COMPLETION) {
            ThreadStatus::Dormant
        } else {
            let thread = self.threads.at_mut(index);
            thread.diagnosis |= ThreadDiagnosis::INVALID_EXIT;
            self.diagnosis |= KernelDiagnosis::THREAD_ERROR;
            panic!("thread #{} returned from its entry function", thread.number);
        };

        self.set_unready(index, status, 0).inspect_err(|_| {
            self.threads.at_mut(index).diagnosis |= ThreadDiagnosis::INVALID_STATE;
        })
    }

    /// Snapshot of a thread.
    pub fn thread_info(&self, id: ThreadId) -> Result<ThreadInfo, ThreadError> {
        let thread = self.threads.get(id).ok_or(ThreadError::Unready)?;
        Ok(ThreadInfo {
            id,
            number: thread.number,
            name: thread.name,
            status: thread.status,
            priority: thread.priority,
            base_priority: thread.base_priority,
            ticks: thread.ticks,
            base_ticks: thread.base_ticks,
            jiffies: thread.jiffies,
            diagnosis: thread.diagnosis,
            locks_held: thread.locks.len(),
            blocked_on: match thread.queue {
                QueueTag::Wait(object) => Some(object),
                _ => None,
            },
            timer: thread
                .timer
                .is_armed()
                .then(|| thread.timer.remaining()),
        })
    }

    /// Checks the stack of the thread about to be switched in.
    ///
    /// # Panics
    ///
    /// On overflow: saved stack pointer below the base or barrier word
    /// overwritten.
    #[cfg(feature = "stack-check")]
    pub(crate) fn check_stack(&mut self, index: usize) {
        let thread = self.threads.at(index);
        let Some(stack) = thread.stack else {
            return;
        };
        let id = self.threads.handle_at(index);
        let Some(probe) = self.port.stack_probe(id, &stack) else {
            return;
        };

        let number = thread.number;
        if probe.top < stack.base || probe.barrier != self.config.stack_barrier {
            self.threads.at_mut(index).diagnosis |= ThreadDiagnosis::STACK_OVERFLOW;
            self.diagnosis |= KernelDiagnosis::THREAD_ERROR;
            panic!("stack overflow in thread #{number}");
        }

        let thread = self.threads.at_mut(index);
        if probe.top < stack.alarm_level(self.config.stack_alarm_ratio)
            && !thread.diagnosis.contains(ThreadDiagnosis::STACK_ALARM)
        {
            thread.diagnosis |= ThreadDiagnosis::STACK_ALARM;
            log::warn!(
                "thread #{number} used more than {}% of its stack",
                self.config.stack_alarm_ratio
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{HostPort, StackRegion};

    fn started() -> (Kernel<HostPort>, ThreadId) {
        let mut kernel = Kernel::builder(HostPort::new()).build();
        let idle = kernel.start().unwrap();
        (kernel, idle)
    }

    #[test]
    fn higher_priority_creation_preempts() {
        let (mut kernel, idle) = started();
        let worker = kernel
            .create_thread(ThreadConfig::new(Priority::new(4)))
            .unwrap();

        assert_eq!(kernel.current_thread(), Some(worker));
        assert_eq!(kernel.thread_info(idle).unwrap().status, ThreadStatus::Ready);
        assert_eq!(
            kernel.thread_info(worker).unwrap().status,
            ThreadStatus::Running
        );
    }

    #[test]
    fn creation_before_start_does_not_switch() {
        let mut kernel = Kernel::builder(HostPort::new()).build();
        let worker = kernel
            .create_thread(ThreadConfig::new(Priority::new(4)))
            .unwrap();

        assert!(kernel.port().switches().is_empty());
        assert_eq!(kernel.thread_info(worker).unwrap().status, ThreadStatus::Ready);

        kernel.start().unwrap();
        assert_eq!(kernel.current_thread(), Some(worker));
    }

    #[test]
    fn idle_priority_is_reserved() {
        let (mut kernel, _) = started();
        assert_eq!(
            kernel.create_thread(ThreadConfig::new(Priority::LOWEST)),
            Err(ThreadError::Priority)
        );
    }

    #[test]
    fn suspend_self_switches_away() {
        let (mut kernel, idle) = started();
        let worker = kernel
            .create_thread(ThreadConfig::new(Priority::new(4)))
            .unwrap();

        kernel.suspend_thread(None).unwrap();
        assert_eq!(kernel.current_thread(), Some(idle));
        assert_eq!(
            kernel.thread_info(worker).unwrap().status,
            ThreadStatus::Suspended
        );

        assert_eq!(kernel.suspend_thread(Some(worker)), Err(ThreadError::Status));
        kernel.resume_thread(worker).unwrap();
        assert_eq!(kernel.current_thread(), Some(worker));
    }

    #[test]
    fn locked_scheduler_refuses_self_suspend() {
        let (mut kernel, _) = started();
        kernel
            .create_thread(ThreadConfig::new(Priority::new(4)))
            .unwrap();

        kernel.lock_scheduler();
        assert_eq!(kernel.suspend_thread(None), Err(ThreadError::Fault));
        kernel.unlock_scheduler();
    }

    #[test]
    fn time_slice_shrink_caps_remaining_ticks() {
        let (mut kernel, _) = started();
        let worker = kernel
            .create_thread(ThreadConfig::new(Priority::new(4)).time_slice(8).dormant())
            .unwrap();

        kernel.set_time_slice(Some(worker), 3).unwrap();
        let info = kernel.thread_info(worker).unwrap();
        assert_eq!((info.ticks, info.base_ticks), (3, 3));

        kernel.set_time_slice(Some(worker), 5).unwrap();
        let info = kernel.thread_info(worker).unwrap();
        assert_eq!((info.ticks, info.base_ticks), (5, 5));
    }

    #[test]
    fn delete_requires_dormant() {
        let (mut kernel, _) = started();
        let worker = kernel
            .create_thread(ThreadConfig::new(Priority::new(4)).dormant())
            .unwrap();
        let other = kernel
            .create_thread(ThreadConfig::new(Priority::new(6)).initial(ThreadStatus::Suspended))
            .unwrap();

        assert_eq!(kernel.delete_thread(Some(other)), Err(ThreadError::Status));
        kernel.delete_thread(Some(worker)).unwrap();
        assert_eq!(kernel.thread_info(worker), Err(ThreadError::Unready));
        assert_eq!(kernel.activate_thread(worker), Err(ThreadError::Unready));
    }

    #[test]
    fn stack_alarm_is_recorded() {
        let (mut kernel, _) = started();
        let stack = StackRegion::new(0x1000, 0x100);
        let worker = kernel
            .create_thread(ThreadConfig::new(Priority::new(4)).stack(stack).dormant())
            .unwrap();
        kernel.port_mut().set_stack_top(worker, 0x1010);

        kernel.activate_thread(worker).unwrap();
        let diagnosis = kernel.thread_info(worker).unwrap().diagnosis;
        assert!(diagnosis.contains(ThreadDiagnosis::STACK_ALARM));
        assert_eq!(kernel.current_thread(), Some(worker));
    }

    #[test]
    #[should_panic(expected = "stack overflow")]
    fn smashed_barrier_is_fatal() {
        let (mut kernel, _) = started();
        let stack = StackRegion::new(0x1000, 0x100);
        let worker = kernel
            .create_thread(ThreadConfig::new(Priority::new(4)).stack(stack).dormant())
            .unwrap();
        kernel.port_mut().smash_barrier(worker);
        let _ = kernel.activate_thread(worker);
    }
}
