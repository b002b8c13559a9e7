//! Kernel sizing and tuning through `KernelConfig`.

use trochili::{
    HostPort, IpcError, Kernel, KernelConfig, Priority, QueuePolicy, ThreadConfig, ThreadError,
};

fn started(config: KernelConfig) -> Kernel<HostPort> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut kernel = Kernel::with_config(HostPort::new(), config).build();
    kernel.start().expect("start kernel");
    kernel
}

#[test]
fn default_config() {
    let config = KernelConfig::default();
    assert_eq!(config.name, "Trochili");
    assert_eq!(config.max_threads, 16);
    assert_eq!(config.default_time_slice, 10);
    assert_eq!(config.stack_alarm_ratio, 70);
}

#[test]
fn thread_table_counts_idle() {
    let mut kernel = started(KernelConfig::builder().max_threads(2).build());
    kernel
        .create_thread(ThreadConfig::new(Priority::new(4)).dormant())
        .unwrap();
    assert_eq!(
        kernel.create_thread(ThreadConfig::new(Priority::new(4)).dormant()),
        Err(ThreadError::Fault)
    );
}

#[test]
fn object_tables_are_bounded() {
    let config = KernelConfig::builder()
        .max_semaphores(1)
        .max_mutexes(1)
        .max_flags(1)
        .max_mailboxes(1)
        .build();
    let mut kernel = started(config);

    let sem = kernel.create_semaphore(0, 1, QueuePolicy::Fifo).unwrap();
    assert_eq!(
        kernel.create_semaphore(0, 1, QueuePolicy::Fifo),
        Err(IpcError::Fault)
    );
    kernel.delete_semaphore(sem).unwrap();
    kernel.create_semaphore(0, 1, QueuePolicy::Fifo).unwrap();

    kernel.create_mutex(Priority::new(1), QueuePolicy::Fifo).unwrap();
    assert_eq!(
        kernel.create_mutex(Priority::new(1), QueuePolicy::Fifo),
        Err(IpcError::Fault)
    );
    kernel.create_flags(QueuePolicy::Fifo).unwrap();
    assert_eq!(kernel.create_flags(QueuePolicy::Fifo), Err(IpcError::Fault));
    kernel.create_mailbox(QueuePolicy::Fifo).unwrap();
    assert_eq!(kernel.create_mailbox(QueuePolicy::Fifo), Err(IpcError::Fault));
}

#[test]
fn time_slices_apply_to_new_threads() {
    let mut kernel = started(KernelConfig::builder().time_slices(4, 2).build());
    let idle = kernel.idle_thread().unwrap();
    assert_eq!(kernel.thread_info(idle).unwrap().base_ticks, 2);

    let worker = kernel
        .create_thread(ThreadConfig::new(Priority::new(4)).dormant())
        .unwrap();
    let custom = kernel
        .create_thread(ThreadConfig::new(Priority::new(4)).time_slice(7).dormant())
        .unwrap();
    assert_eq!(kernel.thread_info(worker).unwrap().base_ticks, 4);
    assert_eq!(kernel.thread_info(custom).unwrap().base_ticks, 7);
}

#[test]
fn idle_hook_is_handed_to_the_port() {
    fn idle_loop(_: usize) {}

    let kernel = started(
        KernelConfig::builder()
            .name("bench")
            .idle_hook(idle_loop)
            .build(),
    );
    assert_eq!(kernel.config().name, "bench");
    assert!(kernel.config().idle_hook.is_some());
    assert_eq!(
        kernel.thread_info(kernel.idle_thread().unwrap()).unwrap().name,
        "idle"
    );
}
