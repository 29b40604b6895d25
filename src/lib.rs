//! kobjects - portable kernel objects
//!
//! One handle abstraction over events, mutexes, semaphores, waitable
//! timers and threads, with generic wait/close/descriptor operations that
//! dispatch through a per-kind operation table.
//!
//! Layers, leaves first:
//! - [`atomic`]: interlocked integer operations
//! - [`interlocked`]: lock-free singly linked list, doubly linked list
//! - [`collections`]: synchronized queue, stack, dictionary, linked list
//! - [`handle`]: handle object model, waits, native descriptors
//! - [`synch`]: event, mutex, semaphore, waitable timer
//! - [`thread`]: thread lifecycle, registry, thread-local storage
//!
//! The crate logs through `tracing` and never installs a subscriber.

/// Hot-path trace events, compiled in only with the `trace-debug` feature.
/// Defined ahead of the module declarations so every module sees it.
macro_rules! kobj_trace {
    ($($arg:tt)*) => {
        #[cfg(feature = "trace-debug")]
        tracing::trace!($($arg)*);
    };
}

pub mod atomic;
pub mod collections;
pub mod config;
pub mod error;
pub mod handle;
pub mod interlocked;
pub mod synch;
pub mod thread;

pub use config::Config;
pub use error::{Error, Result};
pub use handle::{
    Handle, HandleKind, HandleMode, INFINITE, MultiWaitStatus, Timeout, WaitStatus, close_handle,
    get_native_descriptor, wait_multi, wait_single,
};
pub use synch::{
    cancel_waitable_timer, create_event, create_mutex, create_semaphore, create_waitable_timer,
    release_mutex, release_semaphore, reset_event, set_event, set_waitable_timer, sleep,
    switch_to_thread,
};
pub use thread::{
    STILL_ACTIVE, ThreadBuilder, ThreadCreationFlags, ThreadRegistry, create_thread, current_thread,
    current_thread_id, exit_thread, get_exit_code, get_thread_id, resume_thread, suspend_thread,
    terminate_thread, tls_alloc, tls_free, tls_get_value, tls_set_value,
};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a previous holder panicked.
/// Guarded state is only mutated by crate code, which never panics mid-update.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
