//! Handle object model
//!
//! Every kernel object is reached through a [`Handle`]. The object starts
//! with a fixed header {kind, mode, ops}: `kind` says what the object is,
//! `mode` carries capability bits, and `ops` points at the operation table
//! shared by every object of that kind. Generic operations (close, wait,
//! native descriptor, post-wait cleanup) look up the slot in `ops` and
//! call it; they never switch on the kind themselves.
//!
//! ```text
//!   Handle ──► HandleObject
//!              ├── header { kind, mode, ops ──► static HandleOps (per kind) }
//!              ├── closed flag
//!              ├── waiters registered by wait_single / wait_multi
//!              ├── native descriptor (lazy)
//!              └── body: Event | Mutex | Semaphore | Timer | Thread
//! ```
//!
//! A handle whose header fails its own table's validity check, or whose
//! body does not match its kind, is rejected with [`Error::InvalidHandle`]
//! by every operation. So is a closed handle.

mod descriptor;
mod wait;

pub use descriptor::RawDescriptor;
pub(crate) use descriptor::SignalDescriptor;
pub use wait::{INFINITE, MAXIMUM_WAIT_OBJECTS, MultiWaitStatus, Timeout, WaitStatus, wait_multi, wait_single};
pub(crate) use wait::WaitBlock;

use crate::error::{Error, Result};
use crate::lock;
use crate::synch::event::EventObject;
use crate::synch::mutex::MutexObject;
use crate::synch::semaphore::SemaphoreObject;
use crate::synch::timer::TimerObject;
use crate::thread::ThreadObject;
use bitflags::bitflags;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Closed set of object kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Event,
    Mutex,
    Semaphore,
    Timer,
    Thread,
}

impl HandleKind {
    pub fn name(&self) -> &'static str {
        match self {
            HandleKind::Event => "event",
            HandleKind::Mutex => "mutex",
            HandleKind::Semaphore => "semaphore",
            HandleKind::Timer => "timer",
            HandleKind::Thread => "thread",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Capability bits carried in the handle header
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HandleMode: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// The object can be passed to the wait functions
        const WAITABLE = 1 << 2;
    }
}

/// Per-kind operation table
///
/// One static instance exists per kind and every object of that kind
/// points at it. The `try_acquire`/`is_signaled`/`restore` slots are the
/// wait protocol: `is_signaled` peeks, `try_acquire` consumes the signal
/// (auto-reset, counts, ownership) and `restore` undoes one `try_acquire`
/// when a wait-all has to back out.
pub struct HandleOps {
    pub(crate) kind: HandleKind,
    pub(crate) is_handled: fn(&HandleObject) -> bool,
    pub(crate) close: fn(&HandleObject) -> Result<()>,
    pub(crate) native_descriptor: Option<fn(&HandleObject) -> Result<RawDescriptor>>,
    /// Runs after a wait on the object succeeded
    pub(crate) cleanup: Option<fn(&HandleObject)>,
    pub(crate) try_acquire: fn(&HandleObject) -> bool,
    pub(crate) is_signaled: fn(&HandleObject) -> bool,
    pub(crate) restore: fn(&HandleObject),
    /// Acquisition attempts a waiter spins through before parking
    pub(crate) spin_count: fn(&HandleObject) -> u32,
    /// When the object will become signaled on its own, if ever
    pub(crate) next_deadline: fn(&HandleObject) -> Option<Instant>,
}

impl fmt::Debug for HandleOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleOps").field("kind", &self.kind).finish_non_exhaustive()
    }
}

pub(crate) fn close_noop(_: &HandleObject) -> Result<()> {
    Ok(())
}

pub(crate) fn restore_noop(_: &HandleObject) {}

pub(crate) fn no_spin(_: &HandleObject) -> u32 {
    0
}

pub(crate) fn no_deadline(_: &HandleObject) -> Option<Instant> {
    None
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HandleHeader {
    pub(crate) kind: HandleKind,
    pub(crate) mode: HandleMode,
    pub(crate) ops: &'static HandleOps,
}

/// Kind-specific object state
pub(crate) enum ObjectBody {
    Event(EventObject),
    Mutex(MutexObject),
    Semaphore(SemaphoreObject),
    Timer(TimerObject),
    Thread(ThreadObject),
}

pub struct HandleObject {
    header: HandleHeader,
    closed: AtomicBool,
    waiters: Mutex<Vec<Arc<WaitBlock>>>,
    descriptor: SignalDescriptor,
    pub(crate) body: ObjectBody,
}

impl HandleObject {
    pub(crate) fn header(&self) -> &HandleHeader {
        &self.header
    }

    pub(crate) fn descriptor(&self) -> &SignalDescriptor {
        &self.descriptor
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wake every parked waiter so it re-examines this object
    pub(crate) fn notify_waiters(&self) {
        for block in lock(&self.waiters).iter() {
            block.notify();
        }
    }

    pub(crate) fn add_waiter(&self, block: &Arc<WaitBlock>) {
        lock(&self.waiters).push(block.clone());
    }

    pub(crate) fn remove_waiter(&self, block: &Arc<WaitBlock>) {
        lock(&self.waiters).retain(|b| !Arc::ptr_eq(b, block));
    }
}

/// Reference to a kernel object
///
/// Clones refer to the same object and share its open/closed state.
#[derive(Clone)]
pub struct Handle(Arc<HandleObject>);

impl Handle {
    pub(crate) fn new(kind: HandleKind, mode: HandleMode, ops: &'static HandleOps, body: ObjectBody) -> Handle {
        Handle(Arc::new(HandleObject {
            header: HandleHeader { kind, mode, ops },
            closed: AtomicBool::new(false),
            waiters: Mutex::new(Vec::new()),
            descriptor: SignalDescriptor::new(),
            body,
        }))
    }

    pub fn kind(&self) -> HandleKind {
        self.0.header.kind
    }

    pub fn mode(&self) -> HandleMode {
        self.0.header.mode
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    pub(crate) fn object(&self) -> &HandleObject {
        &self.0
    }

    /// Validate the header and return the object's operation table
    pub(crate) fn resolve(&self) -> Result<&'static HandleOps> {
        let obj = &*self.0;
        if obj.is_closed() {
            return Err(Error::InvalidHandle);
        }
        let ops = obj.header.ops;
        if ops.kind != obj.header.kind || !(ops.is_handled)(obj) {
            tracing::warn!(kind = %obj.header.kind, "handle failed validity check");
            return Err(Error::InvalidHandle);
        }
        Ok(ops)
    }

    /// Resolve, and also require a specific kind
    pub(crate) fn expect(&self, kind: HandleKind) -> Result<&HandleObject> {
        let ops = self.resolve()?;
        if ops.kind != kind {
            return Err(Error::InvalidHandle);
        }
        Ok(&self.0)
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Handle {}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.kind())
            .field("mode", &self.mode())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Close a handle
///
/// Runs the kind's close slot once. Every later operation on the handle,
/// including a second close, fails with [`Error::InvalidHandle`]. Waiters
/// parked on the object are woken and fail with [`Error::WaitFailed`].
pub fn close_handle(handle: &Handle) -> Result<()> {
    let ops = handle.resolve()?;
    let obj = handle.object();
    if obj.closed.swap(true, Ordering::AcqRel) {
        return Err(Error::InvalidHandle);
    }
    kobj_trace!(kind = %ops.kind, "closing handle");
    let result = (ops.close)(obj);
    obj.notify_waiters();
    result
}

/// OS-level descriptor that is readable exactly while the object is signaled
///
/// Suitable for poll/select. Kinds without a descriptor report
/// [`Error::Unsupported`].
pub fn get_native_descriptor(handle: &Handle) -> Result<RawDescriptor> {
    let ops = handle.resolve()?;
    match ops.native_descriptor {
        Some(descriptor) => descriptor(handle.object()),
        None => Err(Error::Unsupported("object kind has no native descriptor")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synch::{create_event, create_mutex, create_semaphore, create_waitable_timer, set_event};

    #[test]
    fn test_header_fields() {
        let event = create_event(true, false).unwrap();
        assert_eq!(event.kind(), HandleKind::Event);
        assert!(event.mode().contains(HandleMode::WAITABLE));
        assert_eq!(event.object().header().ops.kind, HandleKind::Event);
    }

    #[test]
    fn test_kinds_have_distinct_tables() {
        let e = create_event(false, false).unwrap();
        let m = create_mutex(false).unwrap();
        let s = create_semaphore(0, 1).unwrap();
        let t = create_waitable_timer(false).unwrap();
        let tables = [e.resolve().unwrap(), m.resolve().unwrap(), s.resolve().unwrap(), t.resolve().unwrap()];
        for (i, a) in tables.iter().enumerate() {
            for b in &tables[i + 1..] {
                assert!(!std::ptr::eq(*a, *b));
            }
        }
    }

    #[test]
    fn test_close_then_use_fails() {
        let event = create_event(true, false).unwrap();
        let alias = event.clone();
        close_handle(&event).unwrap();
        assert!(alias.is_closed());
        assert_eq!(close_handle(&alias), Err(Error::InvalidHandle));
        assert_eq!(set_event(&alias), Err(Error::InvalidHandle));
        assert_eq!(wait_single(&alias, Timeout::ZERO), Err(Error::InvalidHandle));
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let mutex = create_mutex(false).unwrap();
        assert_eq!(set_event(&mutex), Err(Error::InvalidHandle));
        assert!(mutex.expect(HandleKind::Event).is_err());
        assert!(mutex.expect(HandleKind::Mutex).is_ok());
    }

    #[test]
    fn test_timer_has_no_descriptor() {
        let timer = create_waitable_timer(true).unwrap();
        assert!(matches!(get_native_descriptor(&timer), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_handle_equality_is_identity() {
        let a = create_event(true, false).unwrap();
        let b = create_event(true, false).unwrap();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
