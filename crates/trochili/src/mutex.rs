//! Mutex with the priority ceiling protocol.
//!
//! The owner runs at the highest ceiling among the mutexes it holds (unless
//! its priority is fixed). Held mutexes sit in the owner's lock list, sorted
//! by ceiling, so releasing one only changes the owner's priority when it
//! was the list head.

use crate::arena::{handle, Handle, Slab};
use crate::error::IpcError;
use crate::ipc::{extract_unit, Completion, IpcOption, ObjectRef, WaitData};
use crate::kernel::Kernel;
use crate::list::{Link, NodeStore};
use crate::port::Port;
use crate::priority::Priority;
use crate::queue::{QueuePolicy, WaitQueue};
use crate::thread::{ThreadId, ThreadProperty};

handle!(
    /// Handle of a mutex owned by a [`Kernel`](crate::Kernel).
    MutexId
);

pub(crate) struct Mutex {
    ceiling: Priority,
    owner: Option<ThreadId>,
    nest: u32,
    /// Position in the owner's lock list.
    link: Link,
    pub(crate) queue: WaitQueue,
}

impl NodeStore for Slab<Mutex, MutexId> {
    fn link(&self, node: usize) -> Link {
        self.at(node).link
    }

    fn link_mut(&mut self, node: usize) -> &mut Link {
        &mut self.at_mut(node).link
    }

    fn key(&self, node: usize) -> Priority {
        self.at(node).ceiling
    }
}

/// Snapshot returned by [`Kernel::mutex_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MutexInfo {
    pub id: MutexId,
    pub ceiling: Priority,
    pub owner: Option<ThreadId>,
    /// Lock depth of the owner.
    pub nest: u32,
    pub waiters: usize,
    pub policy: QueuePolicy,
}

impl<P: Port> Kernel<P> {
    /// Gives the mutex to the thread at `index` and applies the ceiling.
    fn add_lock(&mut self, index: usize, id: MutexId) -> bool {
        let mutex_index = id.index();
        let owner = self.threads.handle_at(index);

        self.threads
            .at_mut(index)
            .locks
            .insert_by_key(&mut self.mutexes, mutex_index);
        let mutex = self.mutexes.at_mut(mutex_index);
        mutex.owner = Some(owner);
        mutex.nest = 1;
        let ceiling = mutex.ceiling;

        let thread = self.threads.at_mut(index);
        if thread.property.contains(ThreadProperty::PRIORITY_FIXED) {
            return false;
        }
        thread.property.remove(ThreadProperty::PRIORITY_SAFE);

        if ceiling.is_higher_than(thread.priority) {
            self.set_priority_internal(index, ceiling, false)
        } else {
            false
        }
    }

    /// Takes the mutex away from the thread at `index` and drops its
    /// priority to whatever its remaining locks demand.
    fn remove_lock(&mut self, index: usize, id: MutexId) -> bool {
        let mutex_index = id.index();
        let was_head = self.threads.at(index).locks.head() == Some(mutex_index);

        self.threads
            .at_mut(index)
            .locks
            .remove(&mut self.mutexes, mutex_index);
        let mutex = self.mutexes.at_mut(mutex_index);
        mutex.owner = None;
        mutex.nest = 0;

        let thread = self.threads.at_mut(index);
        if thread.property.contains(ThreadProperty::PRIORITY_FIXED) {
            return false;
        }

        let target = match thread.locks.head() {
            None => {
                thread.property.insert(ThreadProperty::PRIORITY_SAFE);
                Some(thread.base_priority)
            }
            Some(head) if was_head => {
                let ceiling = self.mutexes.at(head).ceiling;
                Some(if ceiling.is_higher_than(thread.base_priority) {
                    ceiling
                } else {
                    thread.base_priority
                })
            }
            Some(_) => None,
        };

        match target {
            Some(target) if thread.priority.is_higher_than(target) => {
                self.set_priority_internal(index, target, false)
            }
            _ => false,
        }
    }

    fn running_index(&self) -> Result<usize, IpcError> {
        if !self.in_thread_context() {
            return Err(IpcError::Fault);
        }
        Ok(self.running_thread().index())
    }

    /// Creates a mutex whose owner runs at least at `ceiling`.
    pub fn create_mutex(
        &mut self,
        ceiling: Priority,
        policy: QueuePolicy,
    ) -> Result<MutexId, IpcError> {
        let id = self
            .mutexes
            .insert(Mutex {
                ceiling,
                owner: None,
                nest: 0,
                link: Link::default(),
                queue: WaitQueue::new(policy),
            })
            .ok_or_else(|| {
                log::warn!("mutex table full");
                IpcError::Fault
            })?;
        log::debug!("created mutex {id:?} with ceiling {ceiling}");
        Ok(id)
    }

    fn release_owner(&mut self, id: MutexId) -> Result<bool, IpcError> {
        if !self.in_thread_context() {
            return Err(IpcError::Fault);
        }
        let owner = self.mutexes.get(id).ok_or(IpcError::Unready)?.owner;
        Ok(match owner {
            Some(owner) => self.remove_lock(owner.index(), id),
            None => false,
        })
    }

    /// Deletes a mutex, taking it from its owner; waiters wake with
    /// [`IpcError::Delete`].
    pub fn delete_mutex(&mut self, id: MutexId) -> Result<(), IpcError> {
        let mut hirp = self.release_owner(id)?;
        hirp |= self.unblock_all(ObjectRef::Mutex(id), Err(IpcError::Delete), None);
        self.mutexes.remove(id);
        log::debug!("deleted mutex {id:?}");
        self.preempt(hirp);
        Ok(())
    }

    /// Forces the mutex free; waiters wake with [`IpcError::Reset`].
    pub fn reset_mutex(&mut self, id: MutexId) -> Result<(), IpcError> {
        let mut hirp = self.release_owner(id)?;
        hirp |= self.unblock_all(ObjectRef::Mutex(id), Err(IpcError::Reset), None);
        log::debug!("reset mutex {id:?}");
        self.preempt(hirp);
        Ok(())
    }

    /// Wakes every waiter with [`IpcError::Flush`]; ownership is kept.
    pub fn flush_mutex(&mut self, id: MutexId) -> Result<(), IpcError> {
        if !self.in_thread_context() {
            return Err(IpcError::Fault);
        }
        if !self.mutexes.contains(id) {
            return Err(IpcError::Unready);
        }

        let hirp = self.unblock_all(ObjectRef::Mutex(id), Err(IpcError::Flush), None);
        log::debug!("flushed mutex {id:?}");
        self.preempt(hirp);
        Ok(())
    }

    fn try_lock(&mut self, index: usize, id: MutexId) -> Result<bool, IpcError> {
        let mutex = self.mutexes.get_mut(id).ok_or(IpcError::Unready)?;
        let owner = mutex.owner;
        match owner {
            None => Ok(self.add_lock(index, id)),
            Some(owner) if owner.index() == index => {
                mutex.nest += 1;
                Ok(false)
            }
            Some(_) => Err(IpcError::Forbidden),
        }
    }

    /// Locks the mutex, recursively if the caller already owns it. With
    /// `IpcOption::WAIT` the caller blocks while another thread owns it.
    pub fn lock_mutex(
        &mut self,
        id: MutexId,
        option: IpcOption,
        timeout: u32,
    ) -> Result<Completion<()>, IpcError> {
        let index = self.running_index()?;
        match self.try_lock(index, id) {
            Ok(hirp) => {
                self.preempt(hirp);
                Ok(Completion::Done(()))
            }
            Err(IpcError::Forbidden) if option.contains(IpcOption::WAIT) && self.can_block() => {
                Ok(Completion::Pending(self.block_current(
                    ObjectRef::Mutex(id),
                    option - IpcOption::URGENT,
                    WaitData::None,
                    timeout,
                    extract_unit,
                )))
            }
            Err(error) => Err(error),
        }
    }

    /// Unlocks one level. The last unlock passes the mutex to the head
    /// waiter, if any.
    pub fn free_mutex(&mut self, id: MutexId) -> Result<(), IpcError> {
        let index = self.running_index()?;
        let mutex = self.mutexes.get_mut(id).ok_or(IpcError::Unready)?;
        if mutex.owner.map(|owner| owner.index()) != Some(index) {
            log::warn!("mutex {id:?} freed by a thread that does not own it");
            return Err(IpcError::Forbidden);
        }

        mutex.nest -= 1;
        if mutex.nest > 0 {
            return Ok(());
        }

        let mut hirp = self.remove_lock(index, id);
        if let Some(waiter) = self.mutexes.at(id.index()).queue.primary_head() {
            hirp |= self.unblock(waiter, Ok(()));
            hirp |= self.add_lock(waiter, id);
        }
        self.preempt(hirp);
        Ok(())
    }

    pub fn mutex_info(&self, id: MutexId) -> Result<MutexInfo, IpcError> {
        let mutex = self.mutexes.get(id).ok_or(IpcError::Unready)?;
        Ok(MutexInfo {
            id,
            ceiling: mutex.ceiling,
            owner: mutex.owner,
            nest: mutex.nest,
            waiters: mutex.queue.len(),
            policy: mutex.queue.policy(),
        })
    }
}
