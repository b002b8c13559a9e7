//! Event flags group.

use crate::arena::{handle, Handle};
use crate::error::IpcError;
use crate::ipc::{Completion, IpcOption, ObjectRef, WaitData};
use crate::kernel::Kernel;
use crate::port::Port;
use crate::queue::{QueuePolicy, WaitQueue};

handle!(
    /// Handle of an event flags group owned by a [`Kernel`](crate::Kernel).
    FlagsId
);

pub(crate) struct Flags {
    value: u32,
    pub(crate) queue: WaitQueue,
}

/// Snapshot returned by [`Kernel::flags_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FlagsInfo {
    pub id: FlagsId,
    pub value: u32,
    pub waiters: usize,
    pub policy: QueuePolicy,
}

/// Bits of `pattern` present in `value`, if they satisfy `option`.
/// `OR` accepts any requested bit; otherwise all of them are required.
fn matched(value: u32, pattern: u32, option: IpcOption) -> Option<u32> {
    let bits = value & pattern;
    let satisfied = if option.contains(IpcOption::OR) {
        bits != 0
    } else {
        bits == pattern
    };
    satisfied.then_some(bits)
}

fn extract_flags(data: &WaitData) -> Option<u32> {
    match data {
        WaitData::Flags(bits) => Some(*bits),
        _ => None,
    }
}

impl<P: Port> Kernel<P> {
    pub fn create_flags(&mut self, policy: QueuePolicy) -> Result<FlagsId, IpcError> {
        let id = self
            .flags
            .insert(Flags {
                value: 0,
                queue: WaitQueue::new(policy),
            })
            .ok_or_else(|| {
                log::warn!("flags table full");
                IpcError::Fault
            })?;
        log::debug!("created flags {id:?}");
        Ok(id)
    }

    pub fn delete_flags(&mut self, id: FlagsId) -> Result<(), IpcError> {
        if !self.flags.contains(id) {
            return Err(IpcError::Unready);
        }

        let hirp = self.unblock_all(ObjectRef::Flags(id), Err(IpcError::Delete), None);
        self.flags.remove(id);
        log::debug!("deleted flags {id:?}");
        self.preempt(hirp);
        Ok(())
    }

    /// Clears every bit; waiters wake with [`IpcError::Reset`].
    pub fn reset_flags(&mut self, id: FlagsId) -> Result<(), IpcError> {
        if !self.flags.contains(id) {
            return Err(IpcError::Unready);
        }

        let hirp = self.unblock_all(ObjectRef::Flags(id), Err(IpcError::Reset), None);
        if let Some(flags) = self.flags.get_mut(id) {
            flags.value = 0;
        }
        log::debug!("reset flags {id:?}");
        self.preempt(hirp);
        Ok(())
    }

    /// Wakes every waiter with [`IpcError::Flush`]; the bits are kept.
    pub fn flush_flags(&mut self, id: FlagsId) -> Result<(), IpcError> {
        if !self.flags.contains(id) {
            return Err(IpcError::Unready);
        }

        let hirp = self.unblock_all(ObjectRef::Flags(id), Err(IpcError::Flush), None);
        log::debug!("flushed flags {id:?}");
        self.preempt(hirp);
        Ok(())
    }

    /// Checks `pattern` against the current bits without blocking and
    /// returns the matched bits.
    pub(crate) fn try_match(
        &mut self,
        id: FlagsId,
        pattern: u32,
        option: IpcOption,
    ) -> Result<u32, IpcError> {
        let flags = self.flags.get_mut(id).ok_or(IpcError::Unready)?;
        if pattern == 0 {
            return Err(IpcError::InvalidValue);
        }

        let bits = matched(flags.value, pattern, option).ok_or(IpcError::Flags)?;
        if option.contains(IpcOption::CONSUME) {
            flags.value &= !bits;
        }
        Ok(bits)
    }

    /// Sets `pattern` and wakes every waiter it satisfies, in queue order.
    /// Consuming waiters take their bits before later waiters are checked.
    pub fn send_flags(&mut self, id: FlagsId, pattern: u32) -> Result<(), IpcError> {
        let flags = self.flags.get_mut(id).ok_or(IpcError::Unready)?;
        if flags.value | pattern == flags.value {
            return Err(IpcError::Flags);
        }
        flags.value |= pattern;

        let mut hirp = false;
        let mut cursor = flags.queue.primary_head();
        while let Some(index) = cursor {
            let flags = self.flags.at(id.index());
            cursor = flags.queue.primary().next_of(&self.threads, index);

            let WaitData::Flags(wanted) = self.wait_data(index) else {
                continue;
            };
            let option = self.wait_option(index);
            let Some(bits) = matched(flags.value, wanted, option) else {
                continue;
            };

            self.set_wait_data(index, WaitData::Flags(bits));
            let flags = self.flags.at_mut(id.index());
            if option.contains(IpcOption::CONSUME) {
                flags.value &= !bits;
            }
            let drained = flags.value == 0;
            hirp |= self.unblock(index, Ok(()));
            if drained {
                break;
            }
        }

        self.preempt(hirp);
        Ok(())
    }

    /// Waits for `pattern`: all bits by default, any bit with
    /// `IpcOption::OR`. Returns the matched bits.
    pub fn receive_flags(
        &mut self,
        id: FlagsId,
        pattern: u32,
        option: IpcOption,
        timeout: u32,
    ) -> Result<Completion<u32>, IpcError> {
        match self.try_match(id, pattern, option) {
            Ok(bits) => Ok(Completion::Done(bits)),
            Err(IpcError::Flags) if option.contains(IpcOption::WAIT) && self.can_block() => {
                Ok(Completion::Pending(self.block_current(
                    ObjectRef::Flags(id),
                    option - IpcOption::URGENT,
                    WaitData::Flags(pattern),
                    timeout,
                    extract_flags,
                )))
            }
            Err(error) => Err(error),
        }
    }

    pub fn flags_info(&self, id: FlagsId) -> Result<FlagsInfo, IpcError> {
        let flags = self.flags.get(id).ok_or(IpcError::Unready)?;
        Ok(FlagsInfo {
            id,
            value: flags.value,
            waiters: flags.queue.len(),
            policy: flags.queue.policy(),
        })
    }
}
