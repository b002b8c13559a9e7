//! Priority ceiling mutex: ownership hand-off and priority restoration.

use trochili::{
    HostPort, IpcError, IpcOption, Kernel, MutexId, Pending, Priority, QueuePolicy, ThreadConfig,
    ThreadId, ThreadStatus,
};

fn started() -> (Kernel<HostPort>, ThreadId) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut kernel = Kernel::builder(HostPort::new()).build();
    let idle = kernel.start().expect("start kernel");
    (kernel, idle)
}

fn priority(kernel: &Kernel<HostPort>, id: ThreadId) -> Priority {
    kernel.thread_info(id).expect("live thread").priority
}

fn tick(kernel: &mut Kernel<HostPort>, count: u32) {
    for _ in 0..count {
        kernel.enter_isr().tick();
    }
}

/// `owner` (priority 8) holds a mutex with ceiling 2 and sleeps for
/// `sleep` ticks; `waiter` (priority 5) then blocks on the mutex.
fn contended(
    sleep: u32,
    timeout: u32,
) -> (Kernel<HostPort>, MutexId, ThreadId, ThreadId, Pending<()>) {
    let (mut kernel, idle) = started();
    let mutex = kernel.create_mutex(Priority::new(2), QueuePolicy::Priority).unwrap();

    let owner = kernel.create_thread(ThreadConfig::new(Priority::new(8))).unwrap();
    assert!(kernel.lock_mutex(mutex, IpcOption::empty(), 0).unwrap().is_done());
    assert_eq!(priority(&kernel, owner), Priority::new(2));

    let waiter = kernel.create_thread(ThreadConfig::new(Priority::new(5))).unwrap();
    assert_eq!(kernel.current_thread(), Some(owner));

    kernel.delay_thread(None, sleep).unwrap();
    assert_eq!(kernel.current_thread(), Some(waiter));

    let pending = kernel
        .lock_mutex(mutex, IpcOption::WAIT, timeout)
        .unwrap()
        .into_pending()
        .expect("waiter blocks");
    assert_eq!(kernel.current_thread(), Some(idle));
    (kernel, mutex, owner, waiter, pending)
}

#[test]
fn free_hands_mutex_to_waiter_with_ceiling() {
    let (mut kernel, mutex, owner, waiter, pending) = contended(2, 0);

    tick(&mut kernel, 2);
    assert_eq!(kernel.current_thread(), Some(owner));

    kernel.free_mutex(mutex).unwrap();
    assert_eq!(priority(&kernel, owner), Priority::new(8));
    assert_eq!(kernel.current_thread(), Some(waiter));
    assert_eq!(kernel.poll_wait(&pending), Some(Ok(())));

    let info = kernel.mutex_info(mutex).unwrap();
    assert_eq!(info.owner, Some(waiter));
    assert_eq!(info.nest, 1);
    assert_eq!(priority(&kernel, waiter), Priority::new(2));

    kernel.free_mutex(mutex).unwrap();
    assert_eq!(priority(&kernel, waiter), Priority::new(5));
    assert_eq!(kernel.mutex_info(mutex).unwrap().owner, None);
}

#[test]
fn lock_wait_times_out() {
    let (mut kernel, mutex, owner, waiter, pending) = contended(10, 3);

    tick(&mut kernel, 3);
    assert_eq!(kernel.current_thread(), Some(waiter));
    assert_eq!(kernel.poll_wait(&pending), Some(Err(IpcError::Timeout)));
    assert_eq!(kernel.mutex_info(mutex).unwrap().owner, Some(owner));
    assert_eq!(kernel.thread_info(owner).unwrap().status, ThreadStatus::Delayed);
}

#[test]
fn delete_strips_owner_and_wakes_waiters() {
    let (mut kernel, mutex, owner, waiter, pending) = contended(10, 0);

    kernel.delete_mutex(mutex).unwrap();
    assert_eq!(kernel.current_thread(), Some(waiter));
    assert_eq!(kernel.poll_wait(&pending), Some(Err(IpcError::Delete)));

    let info = kernel.thread_info(owner).unwrap();
    assert_eq!(info.priority, Priority::new(8));
    assert_eq!(info.locks_held, 0);
    assert_eq!(kernel.mutex_info(mutex), Err(IpcError::Unready));
}

#[test]
fn lock_without_wait_reports_contention() {
    let (mut kernel, mutex, _, waiter, pending) = contended(10, 0);

    kernel.flush_mutex(mutex).unwrap();
    assert_eq!(kernel.current_thread(), Some(waiter));
    assert_eq!(kernel.poll_wait(&pending), Some(Err(IpcError::Flush)));
    assert_eq!(
        kernel.lock_mutex(mutex, IpcOption::empty(), 0).unwrap_err(),
        IpcError::Forbidden
    );
}

#[test]
fn mutex_calls_need_thread_context() {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut kernel = Kernel::builder(HostPort::new()).build();
    let mutex = kernel.create_mutex(Priority::new(2), QueuePolicy::Fifo).unwrap();

    assert_eq!(
        kernel.lock_mutex(mutex, IpcOption::WAIT, 0).unwrap_err(),
        IpcError::Fault
    );
    assert_eq!(kernel.free_mutex(mutex), Err(IpcError::Fault));
    assert_eq!(kernel.reset_mutex(mutex), Err(IpcError::Fault));
}
