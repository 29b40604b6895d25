//! Lifetime of the process-wide default thread registry
//!
//! Kept in its own test binary: every thread here uses the default
//! registry, and the tests assert when it exists.

use kobjects::{
    Handle, ThreadBuilder, ThreadCreationFlags, ThreadRegistry, Timeout, WaitStatus, close_handle,
    create_thread, current_thread, get_exit_code, resume_thread, wait_single,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

fn run_to_exit(handle: &Handle) -> u32 {
    assert_eq!(
        wait_single(handle, Timeout::from_millis(10_000)),
        Ok(WaitStatus::Signaled)
    );
    get_exit_code(handle).unwrap()
}

// ============================================================================
// Creation and release
// ============================================================================

#[test]
fn test_default_registry_exists_only_while_threads_are_registered() {
    let _serial = serial();
    assert!(ThreadRegistry::try_global().is_none());

    // Created and closed without ever starting
    let never_started = create_thread(|| 0, 0, ThreadCreationFlags::CREATE_SUSPENDED).unwrap();
    close_handle(&never_started).unwrap();
    assert!(ThreadRegistry::try_global().is_none());

    let suspended = create_thread(|| 5, 0, ThreadCreationFlags::CREATE_SUSPENDED).unwrap();
    assert!(ThreadRegistry::try_global().is_none());
    resume_thread(&suspended).unwrap();
    let first = ThreadRegistry::try_global().unwrap();
    assert_eq!(run_to_exit(&suspended), 5);

    // Exited but still open: the entry stays until the handle is closed
    assert_eq!(first.len(), 1);
    close_handle(&suspended).unwrap();
    assert!(first.is_empty());
    assert!(ThreadRegistry::try_global().is_none());

    // The next start installs a fresh registry
    let again = ThreadBuilder::new().spawn(|| 6).unwrap();
    let second = ThreadRegistry::try_global().unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(run_to_exit(&again), 6);
    close_handle(&again).unwrap();
    assert!(ThreadRegistry::try_global().is_none());
}

#[test]
fn test_detached_thread_releases_default_registry_at_exit() {
    let _serial = serial();
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let handle = ThreadBuilder::new()
        .spawn(move || {
            let _ = release_rx.recv();
            0
        })
        .unwrap();
    close_handle(&handle).unwrap();
    let registry = ThreadRegistry::try_global().unwrap();
    assert_eq!(registry.len(), 1);
    release_tx.send(()).unwrap();

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
    while ThreadRegistry::try_global().is_some() && std::time::Instant::now() < deadline {
        thread::yield_now();
    }
    assert!(ThreadRegistry::try_global().is_none());
    assert!(registry.is_empty());
}

// ============================================================================
// Concurrent creators
// ============================================================================

#[test]
fn test_concurrent_creators_threads_observe_current_thread() {
    const CREATORS: usize = 10;
    const PER_CREATOR: usize = 10;

    let _serial = serial();
    let creators: Vec<_> = (0..CREATORS)
        .map(|_| {
            thread::spawn(|| {
                let handles: Vec<_> = (0..PER_CREATOR)
                    .map(|_| {
                        ThreadBuilder::new()
                            .spawn(|| if current_thread().is_some() { 0 } else { 1 })
                            .unwrap()
                    })
                    .collect();
                let misses: u32 = handles.iter().map(run_to_exit).sum();
                for handle in &handles {
                    close_handle(handle).unwrap();
                }
                misses
            })
        })
        .collect();

    let misses: u32 = creators.into_iter().map(|c| c.join().unwrap()).sum();
    assert_eq!(misses, 0);
    assert!(ThreadRegistry::try_global().is_none());
}
