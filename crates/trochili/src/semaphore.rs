//! Counting semaphore.
//!
//! Waiters are inferred from the counter: while `value == 0` the queue holds
//! threads waiting to obtain, while `value == limit` it holds threads waiting
//! to release. Both kinds can never be queued at the same time, so handing a
//! unit straight to the head waiter leaves the counter untouched.

use crate::arena::handle;
use crate::error::IpcError;
use crate::ipc::{extract_unit, Completion, IpcOption, ObjectRef, WaitData};
use crate::kernel::Kernel;
use crate::port::Port;
use crate::queue::{QueuePolicy, WaitQueue};

handle!(
    /// Handle of a semaphore owned by a [`Kernel`](crate::Kernel).
    SemaphoreId
);

pub(crate) struct Semaphore {
    value: u32,
    limit: u32,
    initial: u32,
    pub(crate) queue: WaitQueue,
}

impl Semaphore {
    fn debug_check(&self) {
        debug_assert!(
            self.queue.is_empty() || self.value == 0 || self.value == self.limit,
            "semaphore has waiters with value {} of {}",
            self.value,
            self.limit
        );
    }
}

/// Snapshot returned by [`Kernel::semaphore_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SemaphoreInfo {
    pub id: SemaphoreId,
    pub value: u32,
    pub limit: u32,
    pub initial: u32,
    pub waiters: usize,
    pub policy: QueuePolicy,
}

impl<P: Port> Kernel<P> {
    /// Creates a semaphore holding `value` of at most `limit` units.
    pub fn create_semaphore(
        &mut self,
        value: u32,
        limit: u32,
        policy: QueuePolicy,
    ) -> Result<SemaphoreId, IpcError> {
        if limit == 0 || value > limit {
            return Err(IpcError::InvalidValue);
        }

        let id = self
            .semaphores
            .insert(Semaphore {
                value,
                limit,
                initial: value,
                queue: WaitQueue::new(policy),
            })
            .ok_or_else(|| {
                log::warn!("semaphore table full");
                IpcError::Fault
            })?;
        log::debug!("created semaphore {id:?} ({value}/{limit}, {policy:?})");
        Ok(id)
    }

    /// Deletes a semaphore; waiters wake with [`IpcError::Delete`].
    pub fn delete_semaphore(&mut self, id: SemaphoreId) -> Result<(), IpcError> {
        if !self.semaphores.contains(id) {
            return Err(IpcError::Unready);
        }

        let hirp = self.unblock_all(ObjectRef::Semaphore(id), Err(IpcError::Delete), None);
        self.semaphores.remove(id);
        log::debug!("deleted semaphore {id:?}");
        self.preempt(hirp);
        Ok(())
    }

    /// Restores the initial value; waiters wake with [`IpcError::Reset`].
    pub fn reset_semaphore(&mut self, id: SemaphoreId) -> Result<(), IpcError> {
        if !self.semaphores.contains(id) {
            return Err(IpcError::Unready);
        }

        let hirp = self.unblock_all(ObjectRef::Semaphore(id), Err(IpcError::Reset), None);
        if let Some(semaphore) = self.semaphores.get_mut(id) {
            semaphore.value = semaphore.initial;
        }
        log::debug!("reset semaphore {id:?}");
        self.preempt(hirp);
        Ok(())
    }

    /// Wakes every waiter with [`IpcError::Flush`]; the value is kept.
    pub fn flush_semaphore(&mut self, id: SemaphoreId) -> Result<(), IpcError> {
        if !self.semaphores.contains(id) {
            return Err(IpcError::Unready);
        }

        let hirp = self.unblock_all(ObjectRef::Semaphore(id), Err(IpcError::Flush), None);
        log::debug!("flushed semaphore {id:?}");
        self.preempt(hirp);
        Ok(())
    }

    /// Takes one unit without blocking. Returns whether a released waiter
    /// outranks the running thread.
    pub(crate) fn try_obtain(&mut self, id: SemaphoreId) -> Result<bool, IpcError> {
        let semaphore = self.semaphores.get_mut(id).ok_or(IpcError::Unready)?;
        semaphore.debug_check();
        if semaphore.value == 0 {
            return Err(IpcError::InvalidValue);
        }

        let waiter = if semaphore.value == semaphore.limit {
            semaphore.queue.primary_head()
        } else {
            None
        };
        match waiter {
            // A blocked releaser hands its unit over directly.
            Some(index) => Ok(self.unblock(index, Ok(()))),
            None => {
                semaphore.value -= 1;
                Ok(false)
            }
        }
    }

    /// Returns one unit without blocking.
    pub(crate) fn try_release(&mut self, id: SemaphoreId) -> Result<bool, IpcError> {
        let semaphore = self.semaphores.get_mut(id).ok_or(IpcError::Unready)?;
        semaphore.debug_check();
        if semaphore.value == semaphore.limit {
            return Err(IpcError::InvalidValue);
        }

        let waiter = if semaphore.value == 0 {
            semaphore.queue.primary_head()
        } else {
            None
        };
        match waiter {
            Some(index) => Ok(self.unblock(index, Ok(()))),
            None => {
                semaphore.value += 1;
                Ok(false)
            }
        }
    }

    /// Takes one unit, blocking with `IpcOption::WAIT` while none is left.
    pub fn obtain_semaphore(
        &mut self,
        id: SemaphoreId,
        option: IpcOption,
        timeout: u32,
    ) -> Result<Completion<()>, IpcError> {
        let outcome = self.try_obtain(id);
        self.finish_semaphore_call(id, outcome, option, timeout)
    }

    /// Returns one unit, blocking with `IpcOption::WAIT` while the semaphore
    /// is full.
    pub fn release_semaphore(
        &mut self,
        id: SemaphoreId,
        option: IpcOption,
        timeout: u32,
    ) -> Result<Completion<()>, IpcError> {
        let outcome = self.try_release(id);
        self.finish_semaphore_call(id, outcome, option, timeout)
    }

    fn finish_semaphore_call(
        &mut self,
        id: SemaphoreId,
        outcome: Result<bool, IpcError>,
        option: IpcOption,
        timeout: u32,
    ) -> Result<Completion<()>, IpcError> {
        match outcome {
            Ok(hirp) => {
                self.preempt(hirp);
                Ok(Completion::Done(()))
            }
            Err(IpcError::InvalidValue) if option.contains(IpcOption::WAIT) && self.can_block() => {
                Ok(Completion::Pending(self.block_current(
                    ObjectRef::Semaphore(id),
                    option - IpcOption::URGENT,
                    WaitData::None,
                    timeout,
                    extract_unit,
                )))
            }
            Err(error) => Err(error),
        }
    }

    pub fn semaphore_info(&self, id: SemaphoreId) -> Result<SemaphoreInfo, IpcError> {
        let semaphore = self.semaphores.get(id).ok_or(IpcError::Unready)?;
        Ok(SemaphoreInfo {
            id,
            value: semaphore.value,
            limit: semaphore.limit,
            initial: semaphore.initial,
            waiters: semaphore.queue.len(),
            policy: semaphore.queue.policy(),
        })
    }
}
