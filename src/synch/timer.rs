//! Waitable timers
//!
//! A timer becomes signaled when its deadline passes. With an interval it
//! re-arms itself for the next period. Firing is evaluated lazily whenever
//! the timer is inspected; waiters park no later than the deadline, so no
//! background thread is needed.
//!
//! Timers have no native descriptor.

use crate::error::{Error, Result};
use crate::handle::{Handle, HandleKind, HandleMode, HandleObject, HandleOps, ObjectBody, close_noop, no_spin};
use crate::lock;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct TimerState {
    /// Next firing time, `None` while idle or cancelled
    deadline: Option<Instant>,
    /// Re-arm period for periodic timers
    interval: Option<Duration>,
    signaled: bool,
}

impl TimerState {
    /// Fire if the deadline has passed, re-arming periodic timers
    fn poll(&mut self, now: Instant) {
        let Some(deadline) = self.deadline else {
            return;
        };
        if now < deadline {
            return;
        }
        self.signaled = true;
        self.deadline = self.interval.and_then(|period| {
            // Skip periods missed while nobody looked
            let missed = (now - deadline).as_nanos() / period.as_nanos() + 1;
            let missed = u32::try_from(missed).unwrap_or(u32::MAX);
            deadline.checked_add(period.saturating_mul(missed))
        });
    }
}

pub(crate) struct TimerObject {
    manual_reset: bool,
    state: Mutex<TimerState>,
}

pub(crate) static TIMER_OPS: HandleOps = HandleOps {
    kind: HandleKind::Timer,
    is_handled,
    close: close_noop,
    native_descriptor: None,
    cleanup: None,
    try_acquire,
    is_signaled,
    restore,
    spin_count: no_spin,
    next_deadline,
};

fn body(obj: &HandleObject) -> Option<&TimerObject> {
    match &obj.body {
        ObjectBody::Timer(t) => Some(t),
        _ => None,
    }
}

fn is_handled(obj: &HandleObject) -> bool {
    body(obj).is_some()
}

fn try_acquire(obj: &HandleObject) -> bool {
    let Some(timer) = body(obj) else {
        return false;
    };
    let mut state = lock(&timer.state);
    state.poll(Instant::now());
    if !state.signaled {
        return false;
    }
    if !timer.manual_reset {
        state.signaled = false;
    }
    true
}

fn is_signaled(obj: &HandleObject) -> bool {
    body(obj).is_some_and(|t| {
        let mut state = lock(&t.state);
        state.poll(Instant::now());
        state.signaled
    })
}

fn restore(obj: &HandleObject) {
    if let Some(timer) = body(obj) {
        if !timer.manual_reset {
            lock(&timer.state).signaled = true;
            obj.notify_waiters();
        }
    }
}

fn next_deadline(obj: &HandleObject) -> Option<Instant> {
    body(obj).and_then(|t| lock(&t.state).deadline)
}

/// Create an idle, non-signaled timer
pub fn create_waitable_timer(manual_reset: bool) -> Result<Handle> {
    Ok(Handle::new(
        HandleKind::Timer,
        HandleMode::WAITABLE,
        &TIMER_OPS,
        ObjectBody::Timer(TimerObject {
            manual_reset,
            state: Mutex::new(TimerState::default()),
        }),
    ))
}

/// Arm the timer to fire after `due`, then every `interval` if given
///
/// Arming clears any pending signal.
pub fn set_waitable_timer(handle: &Handle, due: Duration, interval: Option<Duration>) -> Result<()> {
    if interval.is_some_and(|p| p.is_zero()) {
        return Err(Error::InvalidParameter("timer interval must be positive"));
    }
    let obj = handle.expect(HandleKind::Timer)?;
    let timer = body(obj).ok_or(Error::InvalidHandle)?;
    {
        let mut state = lock(&timer.state);
        state.signaled = false;
        // A due time past the end of the clock never fires
        state.deadline = Instant::now().checked_add(due);
        state.interval = interval;
    }
    // Parked waiters recompute their wake time
    obj.notify_waiters();
    Ok(())
}

/// Stop the timer. A signal that already fired stays pending.
pub fn cancel_waitable_timer(handle: &Handle) -> Result<()> {
    let obj = handle.expect(HandleKind::Timer)?;
    let timer = body(obj).ok_or(Error::InvalidHandle)?;
    let mut state = lock(&timer.state);
    state.poll(Instant::now());
    state.deadline = None;
    state.interval = None;
    Ok(())
}
