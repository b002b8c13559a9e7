//! The kernel object: object tables, ready queues and scheduling decisions.

use core::cell::RefCell;

use bitflags::bitflags;

use crate::arena::Slab;
use crate::config::KernelConfig;
use crate::error::KernelError;
use crate::flags::{Flags, FlagsId};
use crate::mailbox::{Mailbox, MailboxId};
use crate::mutex::{Mutex, MutexId};
use crate::port::Port;
use crate::priority::Priority;
use crate::queue::ThreadQueue;
use crate::semaphore::{Semaphore, SemaphoreId};
use crate::thread::{Acapi, Thread, ThreadConfig, ThreadId, ThreadStatus};
use crate::trace::{payload, records, TraceHook, MAX_PAYLOAD};

/// Where kernel code is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExecContext {
    /// Before [`Kernel::start`].
    Origin,
    Thread,
    Interrupt,
}

bitflags! {
    /// Kernel-wide fault record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KernelDiagnosis: u8 {
        /// A thread hit a fatal fault; see its [`ThreadDiagnosis`](crate::ThreadDiagnosis).
        const THREAD_ERROR = 1 << 0;
    }
}

/// Builder for [`Kernel`].
pub struct KernelBuilder<P: Port> {
    port: P,
    config: KernelConfig,
    trace: Option<TraceHook>,
}

impl<P: Port> KernelBuilder<P> {
    pub fn new(port: P, config: KernelConfig) -> Self {
        Self {
            port,
            config,
            trace: None,
        }
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    pub fn build(self) -> Kernel<P> {
        Kernel::new(self.port, self.config, self.trace)
    }
}

/// A single-core preemptive kernel instance.
///
/// Every method takes `&mut self`: holding the kernel mutably is what the
/// critical section guarantees on a target. Wrap it in a [`KernelCell`]
/// when interrupt handlers need to reach it.
pub struct Kernel<P: Port> {
    pub(crate) config: KernelConfig,
    pub(crate) port: P,
    pub(crate) threads: Slab<Thread, ThreadId>,
    pub(crate) semaphores: Slab<Semaphore, SemaphoreId>,
    pub(crate) mutexes: Slab<Mutex, MutexId>,
    pub(crate) flags: Slab<Flags, FlagsId>,
    pub(crate) mailboxes: Slab<Mailbox, MailboxId>,
    /// Ready and running threads.
    pub(crate) ready: ThreadQueue,
    /// Init, delayed, suspended and dormant threads.
    pub(crate) auxiliary: ThreadQueue,
    pub(crate) current: Option<ThreadId>,
    pub(crate) context: ExecContext,
    pub(crate) isr_nesting: u32,
    pub(crate) isr_saved: ExecContext,
    sched_lock: u32,
    pub(crate) next_number: u32,
    pub(crate) jiffies: u64,
    pub(crate) diagnosis: KernelDiagnosis,
    idle: Option<ThreadId>,
    trace: Option<TraceHook>,
}

impl<P: Port> Kernel<P> {
    /// Starts building a kernel with the default configuration.
    pub fn builder(port: P) -> KernelBuilder<P> {
        KernelBuilder::new(port, KernelConfig::default())
    }

    pub fn with_config(port: P, config: KernelConfig) -> KernelBuilder<P> {
        KernelBuilder::new(port, config)
    }

    fn new(port: P, config: KernelConfig, trace: Option<TraceHook>) -> Self {
        log::debug!(
            "kernel {} sized for {} threads, {} semaphores, {} mutexes, {} flags, {} mailboxes",
            config.name,
            config.max_threads,
            config.max_semaphores,
            config.max_mutexes,
            config.max_flags,
            config.max_mailboxes
        );

        Self {
            threads: Slab::with_capacity(config.max_threads),
            semaphores: Slab::with_capacity(config.max_semaphores),
            mutexes: Slab::with_capacity(config.max_mutexes),
            flags: Slab::with_capacity(config.max_flags),
            mailboxes: Slab::with_capacity(config.max_mailboxes),
            config,
            port,
            ready: ThreadQueue::new(),
            auxiliary: ThreadQueue::new(),
            current: None,
            context: ExecContext::Origin,
            isr_nesting: 0,
            isr_saved: ExecContext::Origin,
            sched_lock: 0,
            next_number: 0,
            jiffies: 0,
            diagnosis: KernelDiagnosis::empty(),
            idle: None,
            trace,
        }
    }

    /// Creates the idle thread, switches to thread context and performs the
    /// first scheduling decision. Returns the idle thread's handle.
    pub fn start(&mut self) -> Result<ThreadId, KernelError> {
        if self.context != ExecContext::Origin {
            return Err(KernelError::Started);
        }

        let mut idle = ThreadConfig::new(Priority::LOWEST)
            .name("idle")
            .time_slice(self.config.idle_time_slice)
            .acapi(Acapi::empty());
        if let Some(hook) = self.config.idle_hook {
            idle = idle.entry(hook, 0);
        }
        let id = self
            .spawn_thread(&idle)
            .ok_or(KernelError::Capacity("thread"))?;
        self.idle = Some(id);

        self.context = ExecContext::Thread;
        log::info!("kernel {} started", self.config.name);
        self.schedule();
        Ok(id)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn context(&self) -> ExecContext {
        self.context
    }

    pub fn is_started(&self) -> bool {
        self.context != ExecContext::Origin
    }

    /// Thread the scheduler last switched to.
    pub fn current_thread(&self) -> Option<ThreadId> {
        self.current
    }

    pub fn idle_thread(&self) -> Option<ThreadId> {
        self.idle
    }

    /// Ticks counted since start.
    pub fn jiffies(&self) -> u64 {
        self.jiffies
    }

    pub fn diagnosis(&self) -> KernelDiagnosis {
        self.diagnosis
    }

    /// True when the scheduler is not locked.
    pub fn is_schedulable(&self) -> bool {
        self.sched_lock == 0
    }

    pub(crate) fn in_thread_context(&self) -> bool {
        self.context == ExecContext::Thread
    }

    pub fn trace_hook(&self) -> Option<TraceHook> {
        self.trace.clone()
    }

    /// Disables preemption until the matching [`unlock_scheduler`](Self::unlock_scheduler).
    /// Calls nest.
    pub fn lock_scheduler(&mut self) {
        self.sched_lock += 1;
        if self.sched_lock == 1 {
            log::trace!("scheduler locked");
            self.emit(records::sched::LOCK, &[1]);
        }
    }

    /// Re-enables preemption once every lock is released and runs any
    /// switch that became due meanwhile.
    pub fn unlock_scheduler(&mut self) {
        if self.sched_lock == 0 {
            log::warn!("scheduler unlocked more often than locked");
            return;
        }
        self.sched_lock -= 1;
        if self.sched_lock == 0 {
            log::trace!("scheduler unlocked");
            self.emit(records::sched::UNLOCK, &[0]);
            if self.in_thread_context() {
                self.schedule();
            }
        }
    }

    /// Picks the highest ready thread and asks the port to switch to it.
    ///
    /// # Panics
    ///
    /// If the ready queue is empty; the idle thread keeps it populated.
    pub(crate) fn schedule(&mut self) {
        let Some(priority) = self.ready.highest() else {
            panic!("ready queue is empty");
        };
        let Some(index) = self.ready.head(priority) else {
            panic!("priority bitmap marks empty bucket {priority}");
        };
        let nominee = self.threads.handle_at(index);

        if self.current == Some(nominee) {
            self.port.cancel_switch();
            self.threads.at_mut(index).status = ThreadStatus::Running;
            let number = self.threads.at(index).number;
            self.emit_thread(records::sched::CANCEL, number, &[priority.raw()]);
            return;
        }

        #[cfg(feature = "stack-check")]
        self.check_stack(index);

        let previous = self.current;
        if let Some(thread) = previous.and_then(|id| self.threads.get_mut(id)) {
            if thread.status == ThreadStatus::Running {
                thread.status = ThreadStatus::Ready;
            }
        }

        let thread = self.threads.at_mut(index);
        thread.status = ThreadStatus::Running;
        let number = thread.number;
        self.current = Some(nominee);
        self.port.confirm_switch(previous, nominee);

        log::trace!("switch to thread #{number} at {priority}");
        self.emit_thread(records::sched::NEXT, number, &[priority.raw()]);
    }

    /// Reschedules when `hirp` is set and a switch may happen right now.
    pub(crate) fn preempt(&mut self, hirp: bool) {
        if hirp && self.in_thread_context() && self.is_schedulable() {
            self.schedule();
        }
    }

    /// The running thread; only valid in thread context.
    pub(crate) fn running_thread(&self) -> ThreadId {
        match self.current {
            Some(id) => id,
            None => panic!("no thread is running"),
        }
    }

    pub(crate) fn current_priority(&self) -> Option<Priority> {
        self.current
            .and_then(|id| self.threads.get(id))
            .map(|thread| thread.priority)
    }

    /// True when the thread at `index` outranks the running thread.
    pub(crate) fn outranks_current(&self, index: usize) -> bool {
        let priority = self.threads.at(index).priority;
        self.current_priority()
            .is_some_and(|current| priority.is_higher_than(current))
    }

    pub(crate) fn emit(&self, record: u8, bytes: &[u8]) {
        if let Some(hook) = &self.trace {
            let payload = payload(bytes);
            // Tracing never alters kernel behaviour.
            let _ = hook(record, &payload, true);
        }
    }

    /// Emits `record` with the thread number (little-endian `u32`) ahead
    /// of `rest`.
    pub(crate) fn emit_thread(&self, record: u8, number: u32, rest: &[u8]) {
        let mut bytes = [0u8; MAX_PAYLOAD];
        bytes[..4].copy_from_slice(&number.to_le_bytes());
        let len = (4 + rest.len()).min(MAX_PAYLOAD);
        bytes[4..len].copy_from_slice(&rest[..len - 4]);
        self.emit(record, &bytes[..len]);
    }
}

/// A kernel behind a `critical-section` mutex, for platform code that keeps
/// it in a `static`.
pub struct KernelCell<P: Port> {
    inner: critical_section::Mutex<RefCell<Kernel<P>>>,
}

impl<P: Port> KernelCell<P> {
    pub const fn new(kernel: Kernel<P>) -> Self {
        Self {
            inner: critical_section::Mutex::new(RefCell::new(kernel)),
        }
    }

    /// Runs `f` on the kernel inside a critical section.
    ///
    /// # Panics
    ///
    /// If called re-entrantly from inside `f`.
    pub fn with<R>(&self, f: impl FnOnce(&mut Kernel<P>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }

    pub fn into_inner(self) -> Kernel<P> {
        self.inner.into_inner().into_inner()
    }
}
