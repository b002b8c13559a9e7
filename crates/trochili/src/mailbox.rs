//! Single-slot mailbox.
//!
//! While the slot is empty only readers can be waiting; while it is full
//! only writers can. Urgent writers wait in the auxiliary lane and are
//! served before ordinary ones.

use crate::arena::{handle, Handle};
use crate::error::IpcError;
use crate::ipc::{extract_unit, Completion, IpcOption, ObjectRef, WaitData};
use crate::kernel::Kernel;
use crate::port::Port;
use crate::queue::{QueuePolicy, WaitQueue};

handle!(
    /// Handle of a mailbox owned by a [`Kernel`](crate::Kernel).
    MailboxId
);

/// One mail item: an opaque word, typically a pointer or an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Mail(pub usize);

pub(crate) struct Mailbox {
    slot: Option<Mail>,
    pub(crate) queue: WaitQueue,
}

/// Snapshot returned by [`Kernel::mailbox_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MailboxInfo {
    pub id: MailboxId,
    /// Mail currently held; `None` when empty.
    pub mail: Option<Mail>,
    pub waiters: usize,
    pub policy: QueuePolicy,
}

impl MailboxInfo {
    pub fn is_full(&self) -> bool {
        self.mail.is_some()
    }
}

fn extract_mail(data: &WaitData) -> Option<Mail> {
    match data {
        WaitData::Receive(mail) => *mail,
        _ => None,
    }
}

impl<P: Port> Kernel<P> {
    pub fn create_mailbox(&mut self, policy: QueuePolicy) -> Result<MailboxId, IpcError> {
        let id = self
            .mailboxes
            .insert(Mailbox {
                slot: None,
                queue: WaitQueue::new(policy),
            })
            .ok_or_else(|| {
                log::warn!("mailbox table full");
                IpcError::Fault
            })?;
        log::debug!("created mailbox {id:?}");
        Ok(id)
    }

    pub fn delete_mailbox(&mut self, id: MailboxId) -> Result<(), IpcError> {
        if !self.mailboxes.contains(id) {
            return Err(IpcError::Unready);
        }

        let hirp = self.unblock_all(ObjectRef::Mailbox(id), Err(IpcError::Delete), None);
        self.mailboxes.remove(id);
        log::debug!("deleted mailbox {id:?}");
        self.preempt(hirp);
        Ok(())
    }

    /// Empties the slot; waiters wake with [`IpcError::Reset`].
    pub fn reset_mailbox(&mut self, id: MailboxId) -> Result<(), IpcError> {
        if !self.mailboxes.contains(id) {
            return Err(IpcError::Unready);
        }

        let hirp = self.unblock_all(ObjectRef::Mailbox(id), Err(IpcError::Reset), None);
        if let Some(mailbox) = self.mailboxes.get_mut(id) {
            mailbox.slot = None;
        }
        log::debug!("reset mailbox {id:?}");
        self.preempt(hirp);
        Ok(())
    }

    /// Wakes every waiter with [`IpcError::Flush`]; the slot is kept.
    pub fn flush_mailbox(&mut self, id: MailboxId) -> Result<(), IpcError> {
        if !self.mailboxes.contains(id) {
            return Err(IpcError::Unready);
        }

        let hirp = self.unblock_all(ObjectRef::Mailbox(id), Err(IpcError::Flush), None);
        log::debug!("flushed mailbox {id:?}");
        self.preempt(hirp);
        Ok(())
    }

    /// Takes the mail without blocking. A waiting writer, urgent ones
    /// first, refills the slot at once.
    pub(crate) fn try_receive_mail(&mut self, id: MailboxId) -> Result<(Mail, bool), IpcError> {
        let mailbox = self.mailboxes.get_mut(id).ok_or(IpcError::Unready)?;
        let mail = mailbox.slot.take().ok_or(IpcError::InvalidStatus)?;

        let mut hirp = false;
        if let Some(writer) = mailbox.queue.first() {
            if let WaitData::Send(next) = self.wait_data(writer) {
                self.mailboxes.at_mut(id.index()).slot = Some(next);
            }
            hirp = self.unblock(writer, Ok(()));
        }
        Ok((mail, hirp))
    }

    /// Deposits the mail without blocking, handing it straight to a
    /// waiting reader if there is one.
    pub(crate) fn try_send(&mut self, id: MailboxId, mail: Mail) -> Result<bool, IpcError> {
        let mailbox = self.mailboxes.get_mut(id).ok_or(IpcError::Unready)?;
        if mailbox.slot.is_some() {
            return Err(IpcError::InvalidStatus);
        }

        match mailbox.queue.primary_head() {
            Some(reader) => {
                self.set_wait_data(reader, WaitData::Receive(Some(mail)));
                Ok(self.unblock(reader, Ok(())))
            }
            None => {
                mailbox.slot = Some(mail);
                Ok(false)
            }
        }
    }

    /// Sends one mail. With `IpcOption::WAIT` the caller blocks while the
    /// slot is full; `IpcOption::URGENT` puts it ahead of ordinary writers.
    pub fn send_mail(
        &mut self,
        id: MailboxId,
        mail: Mail,
        option: IpcOption,
        timeout: u32,
    ) -> Result<Completion<()>, IpcError> {
        match self.try_send(id, mail) {
            Ok(hirp) => {
                self.preempt(hirp);
                Ok(Completion::Done(()))
            }
            Err(IpcError::InvalidStatus)
                if option.contains(IpcOption::WAIT) && self.can_block() =>
            {
                Ok(Completion::Pending(self.block_current(
                    ObjectRef::Mailbox(id),
                    option,
                    WaitData::Send(mail),
                    timeout,
                    extract_unit,
                )))
            }
            Err(error) => Err(error),
        }
    }

    /// Receives one mail, blocking with `IpcOption::WAIT` while the slot is
    /// empty.
    pub fn receive_mail(
        &mut self,
        id: MailboxId,
        option: IpcOption,
        timeout: u32,
    ) -> Result<Completion<Mail>, IpcError> {
        match self.try_receive_mail(id) {
            Ok((mail, hirp)) => {
                self.preempt(hirp);
                Ok(Completion::Done(mail))
            }
            Err(IpcError::InvalidStatus)
                if option.contains(IpcOption::WAIT) && self.can_block() =>
            {
                Ok(Completion::Pending(self.block_current(
                    ObjectRef::Mailbox(id),
                    option - IpcOption::URGENT,
                    WaitData::Receive(None),
                    timeout,
                    extract_mail,
                )))
            }
            Err(error) => Err(error),
        }
    }

    /// Delivers `mail` to every waiting reader. The mailbox must be empty;
    /// the mail is not stored.
    pub fn broadcast_mail(&mut self, id: MailboxId, mail: Mail) -> Result<(), IpcError> {
        let mailbox = self.mailboxes.get(id).ok_or(IpcError::Unready)?;
        if mailbox.slot.is_some() {
            return Err(IpcError::InvalidStatus);
        }

        let hirp = self.unblock_all(ObjectRef::Mailbox(id), Ok(()), Some(mail));
        self.preempt(hirp);
        Ok(())
    }

    pub fn mailbox_info(&self, id: MailboxId) -> Result<MailboxInfo, IpcError> {
        let mailbox = self.mailboxes.get(id).ok_or(IpcError::Unready)?;
        Ok(MailboxInfo {
            id,
            mail: mailbox.slot,
            waiters: mailbox.queue.len(),
            policy: mailbox.queue.policy(),
        })
    }
}
