//! Generic waits
//!
//! A waiter registers one [`WaitBlock`] on every object it waits for.
//! Objects notify their registered blocks on every transition toward
//! signaled. The waiter loop is
//!
//! 1. arm the block
//! 2. try to satisfy the wait through the objects' `try_acquire` slots
//! 3. park on the block until notified, the timeout, or the earliest
//!    object deadline (waitable timers)
//!
//! Arming before the attempt means a notification that lands between the
//! attempt and the park is never lost.
//!
//! Wait-all first peeks every object and only then acquires them in order.
//! If an acquisition loses a race, the ones already taken are handed back
//! through the `restore` slot and the waiter parks again.

use super::{Handle, HandleMode, HandleOps};
use crate::error::{Error, Result};
use crate::lock;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Millisecond timeout value meaning "never time out"
pub const INFINITE: u32 = u32::MAX;

/// Most handles a single wait accepts
pub const MAXIMUM_WAIT_OBJECTS: usize = 64;

/// How long a wait may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Infinite,
    After(Duration),
}

impl Timeout {
    /// Poll without blocking
    pub const ZERO: Timeout = Timeout::After(Duration::ZERO);

    /// Milliseconds, with [`INFINITE`] as the sentinel
    pub fn from_millis(ms: u32) -> Self {
        if ms == INFINITE {
            Timeout::Infinite
        } else {
            Timeout::After(Duration::from_millis(ms as u64))
        }
    }

    fn deadline(self, from: Instant) -> Option<Instant> {
        match self {
            Timeout::Infinite => None,
            // Saturate absurd durations to "infinite"
            Timeout::After(d) => from.checked_add(d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::After(d)
    }
}

/// Outcome of [`wait_single`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Signaled,
    Timeout,
}

/// Outcome of [`wait_multi`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiWaitStatus {
    /// Wait-any: the lowest index among the objects that were acquired
    Signaled(usize),
    /// Wait-all: every object was acquired together
    AllSignaled,
    Timeout,
}

/// Parking spot shared between one waiter and the objects it waits on
pub(crate) struct WaitBlock {
    notified: Mutex<bool>,
    cond: Condvar,
}

impl WaitBlock {
    fn new() -> Self {
        WaitBlock {
            notified: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn arm(&self) {
        *lock(&self.notified) = false;
    }

    pub(crate) fn notify(&self) {
        *lock(&self.notified) = true;
        self.cond.notify_all();
    }

    /// Block until notified or `until` passes
    fn park(&self, until: Option<Instant>) {
        let mut notified = lock(&self.notified);
        while !*notified {
            match until {
                None => {
                    notified = self.cond.wait(notified).unwrap_or_else(PoisonError::into_inner);
                }
                Some(t) => {
                    let now = Instant::now();
                    if now >= t {
                        return;
                    }
                    notified = self
                        .cond
                        .wait_timeout(notified, t - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}

/// Registration of one block on a set of objects, undone on drop
struct Registration<'a> {
    handles: &'a [&'a Handle],
    block: Arc<WaitBlock>,
}

impl<'a> Registration<'a> {
    fn new(handles: &'a [&'a Handle]) -> Self {
        let block = Arc::new(WaitBlock::new());
        for h in handles {
            h.object().add_waiter(&block);
        }
        Registration { handles, block }
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        for h in self.handles {
            h.object().remove_waiter(&self.block);
        }
    }
}

/// Wait until `handle` is signaled or `timeout` elapses
///
/// A successful wait consumes the signal where the kind defines one:
/// auto-reset events and timers reset, semaphores decrement, mutexes are
/// acquired (recursively by their owner).
pub fn wait_single(handle: &Handle, timeout: Timeout) -> Result<WaitStatus> {
    match wait_on(&[handle], false, timeout)? {
        MultiWaitStatus::Timeout => Ok(WaitStatus::Timeout),
        _ => Ok(WaitStatus::Signaled),
    }
}

/// Wait for any (`wait_all == false`) or all of `handles`
///
/// Wait-any acquires at most one object. Wait-all acquires every object
/// or none; acquisition is not a single atomic step, but no other waiter
/// can observe a partial acquisition that persists.
pub fn wait_multi(handles: &[Handle], wait_all: bool, timeout: Timeout) -> Result<MultiWaitStatus> {
    let refs: Vec<&Handle> = handles.iter().collect();
    wait_on(&refs, wait_all, timeout)
}

fn wait_on(handles: &[&Handle], wait_all: bool, timeout: Timeout) -> Result<MultiWaitStatus> {
    if handles.is_empty() || handles.len() > MAXIMUM_WAIT_OBJECTS {
        return Err(Error::InvalidParameter("wait object count out of range"));
    }

    let mut ops = Vec::with_capacity(handles.len());
    for h in handles {
        let table = h.resolve()?;
        if !h.mode().contains(HandleMode::WAITABLE) {
            return Err(Error::InvalidHandle);
        }
        ops.push(table);
    }

    if wait_all {
        for (i, a) in handles.iter().enumerate() {
            if handles[i + 1..].iter().any(|b| a == b) {
                return Err(Error::InvalidParameter("duplicate handle in wait-all"));
            }
        }
    }

    let deadline = timeout.deadline(Instant::now());

    let spins = handles
        .iter()
        .zip(&ops)
        .map(|(h, o)| (o.spin_count)(h.object()))
        .max()
        .unwrap_or(0);
    for _ in 0..spins {
        if let Some(status) = attempt(handles, &ops, wait_all) {
            return Ok(finish(handles, &ops, status));
        }
        std::hint::spin_loop();
    }

    let registration = Registration::new(handles);
    let block = &registration.block;
    loop {
        block.arm();

        if let Some(status) = attempt(handles, &ops, wait_all) {
            return Ok(finish(handles, &ops, status));
        }

        if handles.iter().any(|h| h.is_closed()) {
            tracing::warn!("handle closed while a wait was in progress");
            return Err(Error::WaitFailed("handle closed during wait".into()));
        }

        let now = Instant::now();
        if deadline.is_some_and(|d| now >= d) {
            return Ok(MultiWaitStatus::Timeout);
        }

        let wake = handles
            .iter()
            .zip(&ops)
            .filter_map(|(h, o)| (o.next_deadline)(h.object()))
            .chain(deadline)
            .min();
        kobj_trace!(count = handles.len(), wait_all, "parking waiter");
        block.park(wake);
    }
}

fn attempt(handles: &[&Handle], ops: &[&'static HandleOps], wait_all: bool) -> Option<MultiWaitStatus> {
    if !wait_all {
        return handles
            .iter()
            .zip(ops)
            .position(|(h, o)| (o.try_acquire)(h.object()))
            .map(MultiWaitStatus::Signaled);
    }

    if !handles.iter().zip(ops).all(|(h, o)| (o.is_signaled)(h.object())) {
        return None;
    }
    for (i, (h, o)) in handles.iter().zip(ops).enumerate() {
        if !(o.try_acquire)(h.object()) {
            kobj_trace!(index = i, "wait-all lost a race, backing out");
            for (taken, t) in handles[..i].iter().zip(ops) {
                (t.restore)(taken.object());
            }
            return None;
        }
    }
    Some(MultiWaitStatus::AllSignaled)
}

/// Run post-wait cleanup on the objects the wait consumed
fn finish(handles: &[&Handle], ops: &[&'static HandleOps], status: MultiWaitStatus) -> MultiWaitStatus {
    let run = |i: usize| {
        if let Some(cleanup) = ops[i].cleanup {
            cleanup(handles[i].object());
        }
    };
    match status {
        MultiWaitStatus::Signaled(i) => run(i),
        MultiWaitStatus::AllSignaled => (0..handles.len()).for_each(run),
        MultiWaitStatus::Timeout => {}
    }
    status
}
