//! Event objects
//!
//! A manual-reset event stays signaled until reset and releases every
//! waiter. An auto-reset event is cleared by the one waiter it releases.

use crate::error::{Error, Result};
use crate::handle::{
    Handle, HandleKind, HandleMode, HandleObject, HandleOps, ObjectBody, RawDescriptor, close_noop,
    no_deadline, no_spin,
};
use crate::lock;
use std::sync::Mutex;

pub(crate) struct EventObject {
    manual_reset: bool,
    signaled: Mutex<bool>,
}

pub(crate) static EVENT_OPS: HandleOps = HandleOps {
    kind: HandleKind::Event,
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

fn body(obj: &HandleObject) -> Option<&EventObject> {
    match &obj.body {
        ObjectBody::Event(e) => Some(e),
        _ => None,
    }
}

fn is_handled(obj: &HandleObject) -> bool {
    body(obj).is_some()
}

fn native_descriptor(obj: &HandleObject) -> Result<RawDescriptor> {
    let event = body(obj).ok_or(Error::InvalidHandle)?;
    let signaled = lock(&event.signaled);
    obj.descriptor().raw(*signaled)
}

fn try_acquire(obj: &HandleObject) -> bool {
    let Some(event) = body(obj) else {
        return false;
    };
    let mut signaled = lock(&event.signaled);
    if !*signaled {
        return false;
    }
    if !event.manual_reset {
        *signaled = false;
        obj.descriptor().sync(false);
    }
    true
}

fn is_signaled(obj: &HandleObject) -> bool {
    body(obj).is_some_and(|e| *lock(&e.signaled))
}

fn restore(obj: &HandleObject) {
    if let Some(event) = body(obj) {
        if !event.manual_reset {
            store(obj, event, true);
        }
    }
}

fn store(obj: &HandleObject, event: &EventObject, value: bool) {
    {
        let mut signaled = lock(&event.signaled);
        *signaled = value;
        obj.descriptor().sync(value);
    }
    if value {
        obj.notify_waiters();
    }
}

/// Create an event in the given initial state
pub fn create_event(manual_reset: bool, initial_state: bool) -> Result<Handle> {
    Ok(Handle::new(
        HandleKind::Event,
        HandleMode::READ | HandleMode::WRITE | HandleMode::WAITABLE,
        &EVENT_OPS,
        ObjectBody::Event(EventObject {
            manual_reset,
            signaled: Mutex::new(initial_state),
        }),
    ))
}

/// Signal the event, releasing one waiter (auto-reset) or all (manual-reset)
pub fn set_event(handle: &Handle) -> Result<()> {
    let obj = handle.expect(HandleKind::Event)?;
    let event = body(obj).ok_or(Error::InvalidHandle)?;
    store(obj, event, true);
    Ok(())
}

/// Return the event to the non-signaled state
pub fn reset_event(handle: &Handle) -> Result<()> {
    let obj = handle.expect(HandleKind::Event)?;
    let event = body(obj).ok_or(Error::InvalidHandle)?;
    store(obj, event, false);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Timeout, WaitStatus, wait_single};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_manual_reset_stays_signaled() {
        let event = create_event(true, false).unwrap();
        set_event(&event).unwrap();
        assert_eq!(wait_single(&event, Timeout::ZERO), Ok(WaitStatus::Signaled));
        assert_eq!(wait_single(&event, Timeout::ZERO), Ok(WaitStatus::Signaled));
        reset_event(&event).unwrap();
        assert_eq!(wait_single(&event, Timeout::ZERO), Ok(WaitStatus::Timeout));
    }

    #[test]
    fn test_auto_reset_clears_after_one_wait() {
        let event = create_event(false, true).unwrap();
        assert_eq!(wait_single(&event, Timeout::ZERO), Ok(WaitStatus::Signaled));
        assert_eq!(wait_single(&event, Timeout::ZERO), Ok(WaitStatus::Timeout));
    }

    #[test]
    fn test_auto_reset_releases_exactly_one_waiter() {
        let event = create_event(false, false).unwrap();
        let released = Arc::new(AtomicUsize::new(0));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let event = event.clone();
                let released = released.clone();
                thread::spawn(move || {
                    if wait_single(&event, Timeout::from_millis(300)) == Ok(WaitStatus::Signaled) {
                        released.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(30));
        set_event(&event).unwrap();
        for w in waiters {
            w.join().unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_reset_releases_everyone() {
        let event = create_event(true, false).unwrap();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let event = event.clone();
                thread::spawn(move || wait_single(&event, Timeout::from_millis(2000)))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        set_event(&event).unwrap();
        for w in waiters {
            assert_eq!(w.join().unwrap(), Ok(WaitStatus::Signaled));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_available() {
        let event = create_event(true, true).unwrap();
        let fd = crate::handle::get_native_descriptor(&event).unwrap();
        assert!(fd >= 0);
        reset_event(&event).unwrap();
        assert_eq!(crate::handle::get_native_descriptor(&event).unwrap(), fd);
    }
}
