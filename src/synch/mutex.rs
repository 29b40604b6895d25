//! Recursive mutex objects
//!
//! Ownership belongs to a native thread. The owner may acquire again
//! without blocking and must release once per acquisition. Waiting
//! threads spin `mutex_spin_count` times (from the installed
//! configuration) before parking.

use crate::config;
use crate::error::{Error, Result};
use crate::handle::{
    Handle, HandleKind, HandleMode, HandleObject, HandleOps, ObjectBody, RawDescriptor, close_noop,
    no_deadline,
};
use crate::lock;
use std::sync::Mutex;
use std::thread::{self, ThreadId};

#[derive(Debug, Default)]
struct Ownership {
    owner: Option<ThreadId>,
    recursion: u32,
}

pub(crate) struct MutexObject {
    state: Mutex<Ownership>,
    spin_count: u32,
}

pub(crate) static MUTEX_OPS: HandleOps = HandleOps {
    kind: HandleKind::Mutex,
    is_handled,
    close: close_noop,
    native_descriptor: Some(native_descriptor),
    cleanup: None,
    try_acquire,
    is_signaled,
    restore,
    spin_count,
    next_deadline: no_deadline,
};

fn body(obj: &HandleObject) -> Option<&MutexObject> {
    match &obj.body {
        ObjectBody::Mutex(m) => Some(m),
        _ => None,
    }
}

fn is_handled(obj: &HandleObject) -> bool {
    body(obj).is_some()
}

fn native_descriptor(obj: &HandleObject) -> Result<RawDescriptor> {
    let mutex = body(obj).ok_or(Error::InvalidHandle)?;
    let state = lock(&mutex.state);
    obj.descriptor().raw(state.owner.is_none())
}

fn try_acquire(obj: &HandleObject) -> bool {
    let Some(mutex) = body(obj) else {
        return false;
    };
    let me = thread::current().id();
    let mut state = lock(&mutex.state);
    match state.owner {
        None => {
            state.owner = Some(me);
            state.recursion = 1;
            obj.descriptor().sync(false);
            true
        }
        Some(owner) if owner == me => {
            state.recursion += 1;
            true
        }
        Some(_) => false,
    }
}

/// Acquirable by the calling thread
fn is_signaled(obj: &HandleObject) -> bool {
    body(obj).is_some_and(|m| {
        let state = lock(&m.state);
        state.owner.is_none_or(|owner| owner == thread::current().id())
    })
}

fn restore(obj: &HandleObject) {
    let _ = release(obj);
}

fn spin_count(obj: &HandleObject) -> u32 {
    body(obj).map_or(0, |m| m.spin_count)
}

fn release(obj: &HandleObject) -> Result<()> {
    let mutex = body(obj).ok_or(Error::InvalidHandle)?;
    let me = thread::current().id();
    let freed = {
        let mut state = lock(&mutex.state);
        if state.owner != Some(me) {
            return Err(Error::NotOwner);
        }
        state.recursion -= 1;
        if state.recursion == 0 {
            state.owner = None;
            obj.descriptor().sync(true);
            true
        } else {
            false
        }
    };
    if freed {
        kobj_trace!("mutex released");
        obj.notify_waiters();
    }
    Ok(())
}

/// Create a mutex, owned by the calling thread if `initial_owner`
pub fn create_mutex(initial_owner: bool) -> Result<Handle> {
    let state = if initial_owner {
        Ownership {
            owner: Some(thread::current().id()),
            recursion: 1,
        }
    } else {
        Ownership::default()
    };
    Ok(Handle::new(
        HandleKind::Mutex,
        HandleMode::READ | HandleMode::WAITABLE,
        &MUTEX_OPS,
        ObjectBody::Mutex(MutexObject {
            state: Mutex::new(state),
            spin_count: config::get().mutex_spin_count,
        }),
    ))
}

/// Release one level of ownership
///
/// Fails with [`Error::NotOwner`] when the calling thread does not own the
/// mutex.
pub fn release_mutex(handle: &Handle) -> Result<()> {
    let obj = handle.expect(HandleKind::Mutex)?;
    release(obj).inspect_err(|e| {
        if *e == Error::NotOwner {
            tracing::warn!("mutex released by a thread that does not own it");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Timeout, WaitStatus, wait_single};
    use std::time::Duration;

    #[test]
    fn test_initial_owner_holds_lock() {
        let mutex = create_mutex(true).unwrap();
        let other = {
            let mutex = mutex.clone();
            thread::spawn(move || wait_single(&mutex, Timeout::ZERO))
        };
        assert_eq!(other.join().unwrap(), Ok(WaitStatus::Timeout));
        release_mutex(&mutex).unwrap();
    }

    #[test]
    fn test_recursive_acquire_and_release() {
        let mutex = create_mutex(false).unwrap();
        assert_eq!(wait_single(&mutex, Timeout::ZERO), Ok(WaitStatus::Signaled));
        assert_eq!(wait_single(&mutex, Timeout::ZERO), Ok(WaitStatus::Signaled));
        release_mutex(&mutex).unwrap();
        release_mutex(&mutex).unwrap();
        assert_eq!(release_mutex(&mutex), Err(Error::NotOwner));
    }

    #[test]
    fn test_release_by_non_owner_fails() {
        let mutex = create_mutex(true).unwrap();
        let result = {
            let mutex = mutex.clone();
            thread::spawn(move || release_mutex(&mutex)).join().unwrap()
        };
        assert_eq!(result, Err(Error::NotOwner));
        release_mutex(&mutex).unwrap();
    }

    #[test]
    fn test_handoff_to_waiter() {
        let mutex = create_mutex(true).unwrap();
        let waiter = {
            let mutex = mutex.clone();
            thread::spawn(move || {
                let status = wait_single(&mutex, Timeout::from_millis(2000));
                release_mutex(&mutex).unwrap();
                status
            })
        };
        thread::sleep(Duration::from_millis(20));
        release_mutex(&mutex).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(WaitStatus::Signaled));
    }

    #[test]
    fn test_mutual_exclusion_counter() {
        let mutex = create_mutex(false).unwrap();
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let mutex = mutex.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..200 {
                        wait_single(&mutex, Timeout::Infinite).unwrap();
                        // Non-atomic read-modify-write under the mutex
                        let v = counter.load(std::sync::atomic::Ordering::Relaxed);
                        counter.store(v + 1, std::sync::atomic::Ordering::Relaxed);
                        release_mutex(&mutex).unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 800);
    }
}
