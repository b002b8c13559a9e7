//! Interrupt-context entry points.
//!
//! An [`IsrScope`] mutably borrows the kernel for the duration of an
//! interrupt handler, so only the non-blocking operations listed here can be
//! reached from it. Rescheduling is deferred to the drop of the outermost
//! scope.

use crate::error::{IpcError, ThreadError};
use crate::flags::FlagsId;
use crate::ipc::IpcOption;
use crate::kernel::{ExecContext, Kernel};
use crate::mailbox::{Mail, MailboxId};
use crate::port::Port;
use crate::semaphore::SemaphoreId;
use crate::thread::ThreadId;

impl<P: Port> Kernel<P> {
    /// Enters interrupt context.
    pub fn enter_isr(&mut self) -> IsrScope<'_, P> {
        if self.isr_nesting == 0 {
            self.isr_saved = self.context;
            self.context = ExecContext::Interrupt;
        }
        self.isr_nesting += 1;
        IsrScope { kernel: self }
    }

    fn leave_isr(&mut self) {
        self.isr_nesting -= 1;
        if self.isr_nesting > 0 {
            return;
        }

        self.context = self.isr_saved;
        if self.in_thread_context() && self.is_schedulable() {
            self.schedule();
        }
    }
}

/// A live interrupt handler.
///
/// Operations that may release a higher-priority thread do not switch
/// immediately; the switch happens when the outermost scope is dropped.
pub struct IsrScope<'k, P: Port> {
    kernel: &'k mut Kernel<P>,
}

impl<P: Port> IsrScope<'_, P> {
    /// Nested interrupt.
    pub fn enter_isr(&mut self) -> IsrScope<'_, P> {
        self.kernel.enter_isr()
    }

    /// Read-only view of the kernel.
    pub fn kernel(&self) -> &Kernel<P> {
        self.kernel
    }

    /// Counts one system tick: time slicing, delays and wait timeouts.
    pub fn tick(&mut self) {
        self.kernel.tick();
    }

    pub fn unblock_thread(&mut self, id: ThreadId) -> Result<(), ThreadError> {
        self.kernel.abort_wait(id).map(drop)
    }

    pub fn try_obtain_semaphore(&mut self, id: SemaphoreId) -> Result<(), IpcError> {
        self.kernel.try_obtain(id).map(drop)
    }

    pub fn try_release_semaphore(&mut self, id: SemaphoreId) -> Result<(), IpcError> {
        self.kernel.try_release(id).map(drop)
    }

    pub fn flush_semaphore(&mut self, id: SemaphoreId) -> Result<(), IpcError> {
        self.kernel.flush_semaphore(id)
    }

    pub fn send_flags(&mut self, id: FlagsId, pattern: u32) -> Result<(), IpcError> {
        self.kernel.send_flags(id, pattern)
    }

    pub fn try_receive_flags(
        &mut self,
        id: FlagsId,
        pattern: u32,
        option: IpcOption,
    ) -> Result<u32, IpcError> {
        self.kernel.try_match(id, pattern, option)
    }

    pub fn flush_flags(&mut self, id: FlagsId) -> Result<(), IpcError> {
        self.kernel.flush_flags(id)
    }

    pub fn try_send_mail(&mut self, id: MailboxId, mail: Mail) -> Result<(), IpcError> {
        self.kernel.try_send(id, mail).map(drop)
    }

    pub fn try_receive_mail(&mut self, id: MailboxId) -> Result<Mail, IpcError> {
        self.kernel.try_receive_mail(id).map(|(mail, _)| mail)
    }

    pub fn broadcast_mail(&mut self, id: MailboxId, mail: Mail) -> Result<(), IpcError> {
        self.kernel.broadcast_mail(id, mail)
    }

    pub fn flush_mailbox(&mut self, id: MailboxId) -> Result<(), IpcError> {
        self.kernel.flush_mailbox(id)
    }
}

impl<P: Port> Drop for IsrScope<'_, P> {
    fn drop(&mut self) {
        self.kernel.leave_isr();
    }
}
