//! Counting semaphore objects
//!
//! Signaled while the count is above zero. Each successful wait takes one
//! unit; [`release_semaphore`] returns units up to the maximum.

use crate::error::{Error, Result};
use crate::handle::{
    Handle, HandleKind, HandleMode, HandleObject, HandleOps, ObjectBody, RawDescriptor, close_noop,
    no_deadline, no_spin,
};
use crate::lock;
use std::sync::Mutex;

pub(crate) struct SemaphoreObject {
    count: Mutex<u32>,
    maximum: u32,
}

pub(crate) static SEMAPHORE_OPS: HandleOps = HandleOps {
    kind: HandleKind::Semaphore,
    is_handled,
    close: close_noop,
    native_descriptor: Some(native_descriptor),
    cleanup: None,
    try_acquire,
    is_signaled,
    restore,
    spin_count: no_spin,
    next_deadline: no_deadline,
};

fn body(obj: &HandleObject) -> Option<&SemaphoreObject> {
    match &obj.body {
        ObjectBody::Semaphore(s) => Some(s),
        _ => None,
    }
}

fn is_handled(obj: &HandleObject) -> bool {
    body(obj).is_some()
}

fn native_descriptor(obj: &HandleObject) -> Result<RawDescriptor> {
    let sem = body(obj).ok_or(Error::InvalidHandle)?;
    let count = lock(&sem.count);
    obj.descriptor().raw(*count > 0)
}

fn try_acquire(obj: &HandleObject) -> bool {
    let Some(sem) = body(obj) else {
        return false;
    };
    let mut count = lock(&sem.count);
    if *count == 0 {
        return false;
    }
    *count -= 1;
    if *count == 0 {
        obj.descriptor().sync(false);
    }
    true
}

fn is_signaled(obj: &HandleObject) -> bool {
    body(obj).is_some_and(|s| *lock(&s.count) > 0)
}

fn restore(obj: &HandleObject) {
    let _ = release(obj, 1);
}

fn release(obj: &HandleObject, units: u32) -> Result<u32> {
    let sem = body(obj).ok_or(Error::InvalidHandle)?;
    let previous = {
        let mut count = lock(&sem.count);
        let previous = *count;
        match previous.checked_add(units) {
            Some(next) if next <= sem.maximum => *count = next,
            _ => return Err(Error::TooManyPosts),
        }
        obj.descriptor().sync(true);
        previous
    };
    obj.notify_waiters();
    Ok(previous)
}

/// Create a semaphore with `initial` units available out of `maximum`
pub fn create_semaphore(initial: u32, maximum: u32) -> Result<Handle> {
    if maximum == 0 {
        return Err(Error::InvalidParameter("semaphore maximum must be positive"));
    }
    if initial > maximum {
        return Err(Error::InvalidParameter("semaphore initial count exceeds maximum"));
    }
    Ok(Handle::new(
        HandleKind::Semaphore,
        HandleMode::READ | HandleMode::WAITABLE,
        &SEMAPHORE_OPS,
        ObjectBody::Semaphore(SemaphoreObject {
            count: Mutex::new(initial),
            maximum,
        }),
    ))
}

/// Return `units` to the semaphore, reporting the count before the release
///
/// The count is left unchanged and [`Error::TooManyPosts`] is reported if
/// it would exceed the maximum.
pub fn release_semaphore(handle: &Handle, units: u32) -> Result<u32> {
    if units == 0 {
        return Err(Error::InvalidParameter("release count must be positive"));
    }
    let obj = handle.expect(HandleKind::Semaphore)?;
    release(obj, units).inspect_err(|e| {
        if *e == Error::TooManyPosts {
            tracing::warn!(units, "semaphore release exceeds maximum");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Timeout, WaitStatus, wait_single};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_create_validates_counts() {
        assert!(create_semaphore(0, 1).is_ok());
        assert!(matches!(create_semaphore(0, 0), Err(Error::InvalidParameter(_))));
        assert!(matches!(create_semaphore(2, 1), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_wait_takes_one_unit() {
        let sem = create_semaphore(2, 5).unwrap();
        assert_eq!(wait_single(&sem, Timeout::ZERO), Ok(WaitStatus::Signaled));
        assert_eq!(wait_single(&sem, Timeout::ZERO), Ok(WaitStatus::Signaled));
        assert_eq!(wait_single(&sem, Timeout::ZERO), Ok(WaitStatus::Timeout));
    }

    #[test]
    fn test_release_reports_previous_count() {
        let sem = create_semaphore(1, 4).unwrap();
        assert_eq!(release_semaphore(&sem, 2), Ok(1));
        assert_eq!(release_semaphore(&sem, 1), Ok(3));
        assert_eq!(release_semaphore(&sem, 1), Err(Error::TooManyPosts));
        assert!(matches!(release_semaphore(&sem, 0), Err(Error::InvalidParameter(_))));
        // Count untouched by the failed releases
        for _ in 0..4 {
            assert_eq!(wait_single(&sem, Timeout::ZERO), Ok(WaitStatus::Signaled));
        }
        assert_eq!(wait_single(&sem, Timeout::ZERO), Ok(WaitStatus::Timeout));
    }

    #[test]
    fn test_release_wakes_waiter() {
        let sem = create_semaphore(0, 1).unwrap();
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || wait_single(&sem, Timeout::from_millis(2000)))
        };
        thread::sleep(Duration::from_millis(20));
        release_semaphore(&sem, 1).unwrap();
        assert_eq!(waiter.join().unwrap(), Ok(WaitStatus::Signaled));
    }
}
