//! Threads
//!
//! A thread is a kernel object like any other: its handle is waitable and
//! becomes signaled when the thread exits. Each thread runs its routine
//! on one native thread spawned through `std::thread::Builder`.
//!
//! # Start handshake
//!
//! ```text
//!   creator                          launcher (new native thread)
//!   ───────                          ────────
//!   spawn native thread  ─────────►  block on rendezvous
//!   lock registry (default: claim it,
//!     retry if it was replaced)
//!   lock thread state
//!   insert {native id → handle}
//!   mark started
//!   send rendezvous      ─────────►  wake
//!   unlock state, registry           lock registry (waits for creator)
//!                                    confirm own entry
//!                                    run routine
//! ```
//!
//! Registration therefore happens before the routine's first instruction,
//! and [`current_thread`] never misses a thread started by this crate.
//!
//! Teardown follows the flag table in `lifecycle`: a thread whose handle
//! was closed while it ran tears itself down at exit, otherwise teardown
//! waits for the handle to be closed.
//!
//! A thread built without an explicit registry has none until it starts.
//! It then joins the process-wide default, which exists only while it has
//! entries (see [`ThreadRegistry::try_global`]).

mod lifecycle;
mod registry;
mod tls;

pub use registry::ThreadRegistry;
pub use tls::{TLS_SLOTS, tls_alloc, tls_free, tls_get_value, tls_set_value};

use crate::collections::DictionaryState;
use crate::config;
use crate::error::{Error, Result};
use crate::handle::{
    Handle, HandleKind, HandleMode, HandleObject, HandleOps, ObjectBody, RawDescriptor, no_deadline,
    no_spin, restore_noop,
};
use crate::lock;
use bitflags::bitflags;
use lifecycle::{CloseAction, ExitAction, LifecycleFlags, ThreadPhase};
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::{JoinHandle, ThreadId};

/// Exit code reported while a thread has not exited
pub const STILL_ACTIVE: u32 = 259;

/// Exit code recorded when a routine panics
pub const PANIC_EXIT_CODE: u32 = 0xE000_0001;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadCreationFlags: u32 {
        /// Create the thread without starting it; see [`resume_thread`]
        const CREATE_SUSPENDED = 0x4;
    }
}

type Routine = Box<dyn FnOnce() -> u32 + Send + 'static>;

static NEXT_THREAD_ID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static CURRENT_ID: Cell<u32> = const { Cell::new(0) };
    static CURRENT_REGISTRY: RefCell<Option<Arc<ThreadRegistry>>> = const { RefCell::new(None) };
}

fn allocate_thread_id() -> u32 {
    loop {
        let id = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

/// Unwind payload carrying the code passed to [`exit_thread`]
struct ThreadExit(u32);

struct PendingStart {
    routine: Routine,
    stack_size: usize,
    name: Option<String>,
}

struct ThreadState {
    flags: LifecycleFlags,
    exit_code: u32,
    suspend_count: u32,
    pending: Option<PendingStart>,
    join: Option<JoinHandle<()>>,
    native: Option<ThreadId>,
    /// The launcher has left the routine and is about to return
    returned: bool,
}

pub(crate) struct ThreadObject {
    id: u32,
    /// Set by the builder, or to the default registry when the thread starts
    registry: OnceLock<Arc<ThreadRegistry>>,
    state: Mutex<ThreadState>,
}

pub(crate) static THREAD_OPS: HandleOps = HandleOps {
    kind: HandleKind::Thread,
    is_handled,
    close,
    native_descriptor: Some(native_descriptor),
    cleanup: Some(reap),
    try_acquire: has_exited,
    is_signaled: has_exited,
    restore: restore_noop,
    spin_count: no_spin,
    next_deadline: no_deadline,
};

fn body(obj: &HandleObject) -> Option<&ThreadObject> {
    match &obj.body {
        ObjectBody::Thread(t) => Some(t),
        _ => None,
    }
}

fn thread_of(handle: &Handle) -> Result<(&HandleObject, &ThreadObject)> {
    let obj = handle.expect(HandleKind::Thread)?;
    let thread = body(obj).ok_or(Error::InvalidHandle)?;
    Ok((obj, thread))
}

fn is_handled(obj: &HandleObject) -> bool {
    body(obj).is_some()
}

fn has_exited(obj: &HandleObject) -> bool {
    body(obj).is_some_and(|t| lock(&t.state).flags.exited)
}

fn native_descriptor(obj: &HandleObject) -> Result<RawDescriptor> {
    let thread = body(obj).ok_or(Error::InvalidHandle)?;
    let state = lock(&thread.state);
    obj.descriptor().raw(state.flags.exited)
}

/// Join the native thread once its routine has returned
///
/// Runs after a successful wait. The join only covers the launcher's last
/// few instructions, so it never blocks on user code.
fn reap(obj: &HandleObject) {
    let Some(thread) = body(obj) else {
        return;
    };
    let join = {
        let mut state = lock(&thread.state);
        if !state.returned || state.flags.detached || state.flags.joined {
            return;
        }
        state.join.take()
    };
    if let Some(join) = join {
        if join.join().is_err() {
            tracing::warn!(thread_id = thread.id, "launcher panicked after its routine returned");
        }
        lock(&thread.state).flags.joined = true;
        kobj_trace!(thread_id = thread.id, "joined");
    }
}

/// Remove the registry entry and release the native thread
///
/// Called with both locks held. Returns the removed registry handle, to be
/// dropped after unlocking, and a join handle that may be joined without
/// blocking on user code.
fn teardown(
    registry: Option<&Arc<ThreadRegistry>>,
    threads: Option<&mut DictionaryState<ThreadId, Handle>>,
    state: &mut ThreadState,
) -> (Option<Handle>, Option<JoinHandle<()>>) {
    if !state.flags.started {
        // A start racing with this teardown sees `detached` and the thread
        // removes itself at exit.
        state.flags.detached = true;
        state.pending = None;
    }
    let removed = unregister(registry, threads, state.native);
    let join = state.join.take();
    if state.returned {
        (removed, join)
    } else {
        if join.is_some() {
            state.flags.detached = true;
        }
        (removed, None)
    }
}

fn unregister(
    registry: Option<&Arc<ThreadRegistry>>,
    threads: Option<&mut DictionaryState<ThreadId, Handle>>,
    native: Option<ThreadId>,
) -> Option<Handle> {
    match (registry, threads, native) {
        (Some(registry), Some(threads), Some(native)) => registry.remove_locked(threads, native),
        _ => None,
    }
}

fn close(obj: &HandleObject) -> Result<()> {
    let thread = body(obj).ok_or(Error::InvalidHandle)?;
    let (removed, join) = {
        // No registry yet means the thread never started.
        let registry = thread.registry.get();
        let mut threads = registry.map(|r| r.lock());
        let mut state = lock(&thread.state);
        match state.flags.on_close() {
            CloseAction::Detach => {
                state.flags.detached = true;
                kobj_trace!(thread_id = thread.id, "closed while running, detaching");
                state.join = None;
                (None, None)
            }
            CloseAction::Teardown => {
                kobj_trace!(thread_id = thread.id, returned = state.returned, "closed, tearing down");
                teardown(registry, threads.as_deref_mut(), &mut state)
            }
        }
    };
    drop(removed);
    if let Some(join) = join {
        if join.join().is_err() {
            tracing::warn!(thread_id = thread.id, "launcher panicked after its routine returned");
        }
        lock(&thread.state).flags.joined = true;
    }
    Ok(())
}

/// Spawn the native thread and register it
fn start(handle: &Handle) -> Result<()> {
    let (_, thread) = thread_of(handle)?;
    let pending = {
        let mut state = lock(&thread.state);
        if state.flags.phase() != ThreadPhase::Created {
            return Ok(());
        }
        match state.pending.take() {
            Some(pending) => pending,
            None => return Ok(()),
        }
    };

    let (tx, rx) = mpsc::sync_channel::<()>(1);
    let mut builder = std::thread::Builder::new();
    if pending.stack_size > 0 {
        builder = builder.stack_size(pending.stack_size);
    }
    if let Some(name) = pending.name {
        builder = builder.name(name);
    }
    let launched = handle.clone();
    let routine = pending.routine;
    let join = builder.spawn(move || launch(launched, rx, routine)).map_err(|e| {
        tracing::error!(thread_id = thread.id, error = %e, "failed to spawn native thread");
        Error::from(e)
    })?;
    let native = join.thread().id();

    let explicit = thread.registry.get().cloned();
    let mut registry = match &explicit {
        Some(registry) => registry.clone(),
        None => ThreadRegistry::global(),
    };
    loop {
        let mut threads = registry.lock();
        if explicit.is_none() {
            if !ThreadRegistry::claim_default(&registry) {
                drop(threads);
                registry = ThreadRegistry::global();
                continue;
            }
            let _ = thread.registry.set(registry.clone());
        }
        let mut state = lock(&thread.state);
        threads.add(native, handle.clone());
        state.flags.started = true;
        state.native = Some(native);
        state.join = Some(join);
        kobj_trace!(thread_id = thread.id, "registered, releasing launcher");
        // The launcher holds the receiver until it returns and the channel has
        // room for the one message, so this neither blocks nor fails.
        let _ = tx.send(());
        return Ok(());
    }
}

fn launch(handle: Handle, rx: Receiver<()>, routine: Routine) {
    let Some(thread) = body(handle.object()) else {
        return;
    };
    if rx.recv().is_err() {
        tracing::warn!(thread_id = thread.id, "creator abandoned thread start");
        return;
    }
    // Blocks until the creator has released the registry lock.
    let registered = thread
        .registry
        .get()
        .filter(|registry| registry.contains(std::thread::current().id()));
    let Some(registry) = registered else {
        tracing::error!(thread_id = thread.id, "launched thread missing from registry");
        finish(&handle, thread, PANIC_EXIT_CODE);
        return;
    };

    CURRENT_ID.with(|id| id.set(thread.id));
    CURRENT_REGISTRY.with(|r| *r.borrow_mut() = Some(registry.clone()));
    kobj_trace!(thread_id = thread.id, "routine starting");

    let code = match panic::catch_unwind(AssertUnwindSafe(routine)) {
        Ok(code) => code,
        Err(payload) => match payload.downcast::<ThreadExit>() {
            Ok(exit) => exit.0,
            Err(_) => {
                tracing::error!(thread_id = thread.id, "thread routine panicked");
                PANIC_EXIT_CODE
            }
        },
    };

    finish(&handle, thread, code);
    CURRENT_REGISTRY.with(|r| r.borrow_mut().take());
}

/// Exit path: record the code, signal, and tear down if nobody else will
fn finish(handle: &Handle, thread: &ThreadObject, code: u32) {
    let obj = handle.object();
    let removed = {
        let registry = thread.registry.get();
        let mut threads = registry.map(|r| r.lock());
        let mut state = lock(&thread.state);
        state.returned = true;
        if !state.flags.exited {
            state.flags.exited = true;
            state.exit_code = code;
        }
        obj.descriptor().sync(true);
        match state.flags.on_exit() {
            ExitAction::SelfTeardown => {
                kobj_trace!(thread_id = thread.id, "detached thread tearing itself down");
                state.join = None;
                unregister(registry, threads.as_deref_mut(), state.native)
            }
            ExitAction::Retain => None,
        }
    };
    drop(removed);
    obj.notify_waiters();
}

/// Configures and creates a thread
///
/// ```ignore
/// let handle = ThreadBuilder::new().name("worker").spawn(|| 7)?;
/// wait_single(&handle, Timeout::Infinite)?;
/// assert_eq!(get_exit_code(&handle)?, 7);
/// ```
#[derive(Debug, Default)]
pub struct ThreadBuilder {
    name: Option<String>,
    stack_size: usize,
    suspended: bool,
    registry: Option<Arc<ThreadRegistry>>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Native stack size in bytes. Zero uses the configured default.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    /// Create without starting; [`resume_thread`] starts it
    pub fn suspended(mut self, suspended: bool) -> Self {
        self.suspended = suspended;
        self
    }

    /// Register in `registry` instead of the process-wide default
    pub fn registry(mut self, registry: Arc<ThreadRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn spawn<F>(self, routine: F) -> Result<Handle>
    where
        F: FnOnce() -> u32 + Send + 'static,
    {
        let stack_size = match self.stack_size {
            0 => config::get().default_stack_size,
            n => n,
        };
        let id = allocate_thread_id();
        let handle = Handle::new(
            HandleKind::Thread,
            HandleMode::READ | HandleMode::WAITABLE,
            &THREAD_OPS,
            ObjectBody::Thread(ThreadObject {
                id,
                registry: self.registry.map(OnceLock::from).unwrap_or_default(),
                state: Mutex::new(ThreadState {
                    flags: LifecycleFlags::default(),
                    exit_code: STILL_ACTIVE,
                    suspend_count: u32::from(self.suspended),
                    pending: Some(PendingStart {
                        routine: Box::new(routine),
                        stack_size,
                        name: self.name,
                    }),
                    join: None,
                    native: None,
                    returned: false,
                }),
            }),
        );
        tracing::debug!(thread_id = id, suspended = self.suspended, "thread created");
        if !self.suspended {
            start(&handle)?;
        }
        Ok(handle)
    }
}

/// Create a thread running `routine`
///
/// With [`ThreadCreationFlags::CREATE_SUSPENDED`] the thread is not started
/// until [`resume_thread`]. A `stack_size` of zero uses the configured
/// default.
pub fn create_thread<F>(routine: F, stack_size: usize, flags: ThreadCreationFlags) -> Result<Handle>
where
    F: FnOnce() -> u32 + Send + 'static,
{
    ThreadBuilder::new()
        .stack_size(stack_size)
        .suspended(flags.contains(ThreadCreationFlags::CREATE_SUSPENDED))
        .spawn(routine)
}

/// Decrement the suspend count, starting the thread when it reaches zero
///
/// Returns the previous suspend count. Resuming a thread that already
/// started is a no-op returning zero.
pub fn resume_thread(handle: &Handle) -> Result<u32> {
    let (_, thread) = thread_of(handle)?;
    let (previous, launch) = {
        let mut state = lock(&thread.state);
        if state.flags.phase() != ThreadPhase::Created {
            return Ok(0);
        }
        let previous = state.suspend_count;
        state.suspend_count = previous.saturating_sub(1);
        (previous, state.suspend_count == 0)
    };
    if launch {
        start(handle)?;
    }
    Ok(previous)
}

/// Increment the suspend count of a thread that has not started
///
/// Returns the previous count. Suspending a running thread is not
/// supported.
pub fn suspend_thread(handle: &Handle) -> Result<u32> {
    let (_, thread) = thread_of(handle)?;
    let mut state = lock(&thread.state);
    if state.flags.phase() != ThreadPhase::Created {
        return Err(Error::Unsupported("cannot suspend a started thread"));
    }
    let previous = state.suspend_count;
    state.suspend_count = previous.saturating_add(1);
    Ok(previous)
}

/// Exit code, or [`STILL_ACTIVE`] while the thread has not exited
pub fn get_exit_code(handle: &Handle) -> Result<u32> {
    let (_, thread) = thread_of(handle)?;
    let state = lock(&thread.state);
    Ok(if state.flags.exited {
        state.exit_code
    } else {
        STILL_ACTIVE
    })
}

/// Crate-assigned id of the thread behind `handle`
pub fn get_thread_id(handle: &Handle) -> Result<u32> {
    let (_, thread) = thread_of(handle)?;
    Ok(thread.id)
}

/// Mark the thread exited with `code` and wake its waiters
///
/// Best effort: the native thread is not interrupted and keeps running
/// until its routine returns. A thread that never started never will.
pub fn terminate_thread(handle: &Handle, code: u32) -> Result<()> {
    let (obj, thread) = thread_of(handle)?;
    {
        let mut state = lock(&thread.state);
        if state.flags.exited {
            return Ok(());
        }
        state.flags.exited = true;
        state.exit_code = code;
        state.pending = None;
        obj.descriptor().sync(true);
        if state.flags.started && !state.returned {
            tracing::warn!(thread_id = thread.id, code, "terminated thread keeps running until its routine returns");
        }
    }
    obj.notify_waiters();
    Ok(())
}

/// End the calling thread's routine with `code`
///
/// Unwinds to the launcher, running destructors on the way. Must not be
/// called from inside `catch_unwind` that swallows the payload.
pub fn exit_thread(code: u32) -> ! {
    if CURRENT_ID.with(Cell::get) == 0 || CURRENT_REGISTRY.with(|r| r.borrow().is_none()) {
        tracing::warn!(code, "exit_thread called on a thread this crate did not start");
    }
    panic::resume_unwind(Box::new(ThreadExit(code)))
}

/// Handle of the calling thread, if it was started by this crate
///
/// A thread whose handle has already been closed may still find it here;
/// operations on it then fail with [`Error::InvalidHandle`].
pub fn current_thread() -> Option<Handle> {
    let registry = CURRENT_REGISTRY
        .with(|r| r.borrow().clone())
        .or_else(ThreadRegistry::try_global)?;
    registry.lookup(std::thread::current().id())
}

/// Id of the calling thread
///
/// Threads started by this crate report the id of their thread object;
/// other threads get a fresh id on first call that stays stable.
pub fn current_thread_id() -> u32 {
    CURRENT_ID.with(|id| {
        if id.get() == 0 {
            id.set(allocate_thread_id());
        }
        id.get()
    })
}
