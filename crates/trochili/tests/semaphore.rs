//! Blocking semaphore scenarios driven through the host port.

use trochili::{
    HostPort, IpcError, IpcOption, Kernel, ObjectRef, Priority, QueuePolicy, ThreadConfig,
    ThreadId, ThreadStatus,
};

fn started() -> (Kernel<HostPort>, ThreadId) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut kernel = Kernel::builder(HostPort::new()).build();
    let idle = kernel.start().expect("start kernel");
    (kernel, idle)
}

fn spawn(kernel: &mut Kernel<HostPort>, priority: u8) -> ThreadId {
    let id = kernel
        .create_thread(ThreadConfig::new(Priority::new(priority)))
        .expect("create thread");
    assert_eq!(kernel.current_thread(), Some(id));
    id
}

#[test]
fn release_hands_unit_to_waiter_and_preempts() {
    let (mut kernel, idle) = started();
    let sem = kernel.create_semaphore(0, 1, QueuePolicy::Priority).unwrap();
    let worker = spawn(&mut kernel, 3);

    let pending = kernel
        .obtain_semaphore(sem, IpcOption::WAIT, 0)
        .unwrap()
        .into_pending()
        .expect("worker blocks");
    assert_eq!(pending.thread(), worker);
    assert_eq!(kernel.current_thread(), Some(idle));
    assert!(kernel.is_waiting(&pending));
    assert_eq!(kernel.poll_wait(&pending), None);

    let info = kernel.thread_info(worker).unwrap();
    assert_eq!(info.status, ThreadStatus::Blocked);
    assert_eq!(info.blocked_on, Some(ObjectRef::Semaphore(sem)));

    assert!(kernel
        .release_semaphore(sem, IpcOption::empty(), 0)
        .unwrap()
        .is_done());
    assert_eq!(kernel.current_thread(), Some(worker));
    assert_eq!(kernel.poll_wait(&pending), Some(Ok(())));
    assert_eq!(kernel.poll_wait(&pending), Some(Err(IpcError::Fault)));
    assert_eq!(kernel.semaphore_info(sem).unwrap().value, 0);
}

#[test]
fn priority_policy_wakes_most_urgent_first() {
    let (mut kernel, _) = started();
    let sem = kernel.create_semaphore(0, 2, QueuePolicy::Priority).unwrap();

    let low = spawn(&mut kernel, 6);
    let low_wait = kernel
        .obtain_semaphore(sem, IpcOption::WAIT, 0)
        .unwrap()
        .into_pending()
        .unwrap();
    let high = spawn(&mut kernel, 4);
    let high_wait = kernel
        .obtain_semaphore(sem, IpcOption::WAIT, 0)
        .unwrap()
        .into_pending()
        .unwrap();
    assert_eq!(kernel.semaphore_info(sem).unwrap().waiters, 2);

    let _ = kernel.release_semaphore(sem, IpcOption::empty(), 0).unwrap();
    assert_eq!(kernel.current_thread(), Some(high));
    assert_eq!(kernel.poll_wait(&high_wait), Some(Ok(())));
    assert!(kernel.is_waiting(&low_wait));

    let _ = kernel.release_semaphore(sem, IpcOption::empty(), 0).unwrap();
    assert_eq!(kernel.current_thread(), Some(high));
    assert_eq!(kernel.thread_info(low).unwrap().status, ThreadStatus::Ready);
    assert_eq!(kernel.poll_wait(&low_wait), Some(Ok(())));
}

#[test]
fn fifo_policy_wakes_in_arrival_order() {
    let (mut kernel, _) = started();
    let sem = kernel.create_semaphore(0, 2, QueuePolicy::Fifo).unwrap();

    let low = spawn(&mut kernel, 6);
    let low_wait = kernel
        .obtain_semaphore(sem, IpcOption::WAIT, 0)
        .unwrap()
        .into_pending()
        .unwrap();
    spawn(&mut kernel, 4);
    let high_wait = kernel
        .obtain_semaphore(sem, IpcOption::WAIT, 0)
        .unwrap()
        .into_pending()
        .unwrap();

    let _ = kernel.release_semaphore(sem, IpcOption::empty(), 0).unwrap();
    assert_eq!(kernel.current_thread(), Some(low));
    assert_eq!(kernel.poll_wait(&low_wait), Some(Ok(())));
    assert!(kernel.is_waiting(&high_wait));
}

#[test]
fn unchanged_priority_keeps_wait_position() {
    let (mut kernel, _) = started();
    let sem = kernel.create_semaphore(0, 2, QueuePolicy::Priority).unwrap();

    let first = spawn(&mut kernel, 5);
    let first_wait = kernel
        .obtain_semaphore(sem, IpcOption::WAIT, 0)
        .unwrap()
        .into_pending()
        .unwrap();
    spawn(&mut kernel, 5);
    let second_wait = kernel
        .obtain_semaphore(sem, IpcOption::WAIT, 0)
        .unwrap()
        .into_pending()
        .unwrap();

    kernel.set_thread_priority(Some(first), Priority::new(5)).unwrap();
    let _ = kernel.release_semaphore(sem, IpcOption::empty(), 0).unwrap();
    assert_eq!(kernel.current_thread(), Some(first));
    assert_eq!(kernel.poll_wait(&first_wait), Some(Ok(())));
    assert!(kernel.is_waiting(&second_wait));
}

#[test]
fn releaser_blocks_while_full() {
    let (mut kernel, idle) = started();
    let sem = kernel.create_semaphore(1, 1, QueuePolicy::Priority).unwrap();
    let worker = spawn(&mut kernel, 3);

    let pending = kernel
        .release_semaphore(sem, IpcOption::WAIT, 0)
        .unwrap()
        .into_pending()
        .unwrap();
    assert_eq!(kernel.current_thread(), Some(idle));

    // The obtained unit is replaced by the blocked releaser's unit.
    let _ = kernel.obtain_semaphore(sem, IpcOption::empty(), 0).unwrap();
    assert_eq!(kernel.current_thread(), Some(worker));
    assert_eq!(kernel.poll_wait(&pending), Some(Ok(())));
    assert_eq!(kernel.semaphore_info(sem).unwrap().value, 1);
}

#[test]
fn wait_times_out_on_the_requested_tick() {
    let (mut kernel, idle) = started();
    let sem = kernel.create_semaphore(0, 1, QueuePolicy::Priority).unwrap();
    let worker = spawn(&mut kernel, 3);

    let pending = kernel
        .obtain_semaphore(sem, IpcOption::WAIT, 3)
        .unwrap()
        .into_pending()
        .unwrap();

    for _ in 0..2 {
        kernel.enter_isr().tick();
    }
    assert_eq!(kernel.current_thread(), Some(idle));
    assert_eq!(kernel.poll_wait(&pending), None);

    kernel.enter_isr().tick();
    assert_eq!(kernel.current_thread(), Some(worker));
    assert_eq!(kernel.poll_wait(&pending), Some(Err(IpcError::Timeout)));
    assert_eq!(kernel.semaphore_info(sem).unwrap().waiters, 0);
}

#[test]
fn delete_flush_and_unblock_wake_waiters_with_reason() {
    let (mut kernel, _) = started();
    let sem = kernel.create_semaphore(0, 1, QueuePolicy::Priority).unwrap();

    let worker = spawn(&mut kernel, 3);
    let pending = kernel
        .obtain_semaphore(sem, IpcOption::WAIT, 0)
        .unwrap()
        .into_pending()
        .unwrap();
    kernel.flush_semaphore(sem).unwrap();
    assert_eq!(kernel.current_thread(), Some(worker));
    assert_eq!(kernel.poll_wait(&pending), Some(Err(IpcError::Flush)));

    let pending = kernel
        .obtain_semaphore(sem, IpcOption::WAIT, 0)
        .unwrap()
        .into_pending()
        .unwrap();
    kernel.unblock_thread(worker).unwrap();
    assert_eq!(kernel.poll_wait(&pending), Some(Err(IpcError::Abort)));

    let pending = kernel
        .obtain_semaphore(sem, IpcOption::WAIT, 0)
        .unwrap()
        .into_pending()
        .unwrap();
    kernel.delete_semaphore(sem).unwrap();
    assert_eq!(kernel.poll_wait(&pending), Some(Err(IpcError::Delete)));
    assert_eq!(
        kernel.obtain_semaphore(sem, IpcOption::WAIT, 0).unwrap_err(),
        IpcError::Unready
    );
}

#[test]
fn interrupt_release_switches_on_exit() {
    let (mut kernel, idle) = started();
    let sem = kernel.create_semaphore(0, 1, QueuePolicy::Priority).unwrap();
    let worker = spawn(&mut kernel, 3);
    let pending = kernel
        .obtain_semaphore(sem, IpcOption::WAIT, 0)
        .unwrap()
        .into_pending()
        .unwrap();

    {
        let mut isr = kernel.enter_isr();
        isr.try_release_semaphore(sem).unwrap();
        assert_eq!(isr.kernel().current_thread(), Some(idle));
    }
    assert_eq!(kernel.current_thread(), Some(worker));
    assert_eq!(kernel.poll_wait(&pending), Some(Ok(())));
}

#[test]
fn interrupt_context_never_blocks() {
    let (mut kernel, _) = started();
    let sem = kernel.create_semaphore(0, 1, QueuePolicy::Priority).unwrap();

    let mut isr = kernel.enter_isr();
    assert_eq!(isr.try_obtain_semaphore(sem), Err(IpcError::InvalidValue));
}
