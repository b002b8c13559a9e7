//! Kernel records flowing through a framed tracer.
#![cfg(feature = "trace")]

use trochili::{
    records, HostPort, IpcOption, Kernel, Priority, QueuePolicy, ThreadConfig, ThreadStatus,
};
use trochili_trace::{MemoryBackend, TraceConfig, Tracer};

#[test]
fn blocking_round_trip_is_traced() {
    let _ = env_logger::builder().is_test(true).try_init();
    let backend = MemoryBackend::new();
    let cfg = TraceConfig {
        max_payload: 8,
        timestamps: false,
    };
    let handle = Tracer::new(cfg, backend.clone()).into_handle();

    let mut kernel = Kernel::builder(HostPort::new())
        .with_trace_hook(handle.hook())
        .build();
    kernel.start().unwrap();
    let sem = kernel.create_semaphore(0, 1, QueuePolicy::Fifo).unwrap();
    kernel
        .create_thread(ThreadConfig::new(Priority::new(3)))
        .unwrap();
    let pending = kernel
        .obtain_semaphore(sem, IpcOption::WAIT, 0)
        .unwrap()
        .into_pending()
        .unwrap();
    let _ = kernel.release_semaphore(sem, IpcOption::empty(), 0).unwrap();
    assert_eq!(kernel.poll_wait(&pending), Some(Ok(())));

    let ids: Vec<u8> = backend.records(false).iter().map(|r| r.id).collect();
    let block = ids.iter().position(|&id| id == records::ipc::BLOCK);
    let unblock = ids.iter().position(|&id| id == records::ipc::UNBLOCK);
    assert!(block.is_some() && unblock > block);

    let statuses: Vec<Vec<u8>> = backend
        .records(false)
        .into_iter()
        .filter(|r| r.id == records::thread::STATUS)
        .map(|r| r.payload)
        .collect();
    assert!(statuses.contains(&vec![1, 0, 0, 0, ThreadStatus::Blocked as u8]));
}
