//! Thread registry
//!
//! Maps native thread identity to the thread's handle. A thread is entered
//! by its creator before its routine runs and removed at teardown. Every
//! access goes through the dictionary lock, which is always taken before a
//! thread object's private lock.
//!
//! Threads built without an explicit registry share a process-wide default.
//! The default is created when such a thread starts and released when its
//! last entry is removed; a later start creates a fresh one.

use crate::collections::{Dictionary, DictionaryGuard, DictionaryState};
use crate::handle::Handle;
use crate::lock;
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

type DefaultSlot = Mutex<Option<Arc<ThreadRegistry>>>;

static DEFAULT_REGISTRY: DefaultSlot = Mutex::new(None);

#[derive(Debug, Default)]
pub struct ThreadRegistry {
    threads: Dictionary<ThreadId, Handle>,
}

fn slot_get_or_create(slot: &DefaultSlot) -> Arc<ThreadRegistry> {
    let mut slot = lock(slot);
    if let Some(registry) = slot.as_ref() {
        return registry.clone();
    }
    let registry = ThreadRegistry::new();
    *slot = Some(registry.clone());
    tracing::debug!("created default thread registry");
    registry
}

/// Keep `registry` installed in the slot, reinstalling it if the slot was
/// emptied. Fails if a different registry took its place.
fn slot_claim(slot: &DefaultSlot, registry: &Arc<ThreadRegistry>) -> bool {
    let mut slot = lock(slot);
    match slot.as_ref() {
        Some(current) => Arc::ptr_eq(current, registry),
        None => {
            *slot = Some(registry.clone());
            true
        }
    }
}

fn slot_release(slot: &DefaultSlot, registry: &ThreadRegistry) {
    let mut slot = lock(slot);
    if slot.as_deref().is_some_and(|current| std::ptr::eq(current, registry)) {
        *slot = None;
        tracing::debug!("released default thread registry");
    }
}

impl ThreadRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(ThreadRegistry::default())
    }

    /// The shared default registry, created if none is installed
    pub fn global() -> Arc<Self> {
        slot_get_or_create(&DEFAULT_REGISTRY)
    }

    /// The default registry if one is installed, without creating it
    pub fn try_global() -> Option<Arc<Self>> {
        lock(&DEFAULT_REGISTRY).clone()
    }

    /// Make sure `registry` is the installed default before a thread is
    /// entered into it
    ///
    /// Must be called with `registry` locked; a release only happens under
    /// that same lock. Fails if another registry has been installed since
    /// `registry` was obtained.
    pub(crate) fn claim_default(registry: &Arc<Self>) -> bool {
        slot_claim(&DEFAULT_REGISTRY, registry)
    }

    pub(crate) fn lock(&self) -> DictionaryGuard<'_, ThreadId, Handle> {
        self.threads.lock()
    }

    /// Remove the entry for `id` under an already held lock
    ///
    /// Removing the last entry of the default registry uninstalls it.
    pub(crate) fn remove_locked(
        &self,
        threads: &mut DictionaryState<ThreadId, Handle>,
        id: ThreadId,
    ) -> Option<Handle> {
        let removed = threads.take(&id);
        if removed.is_some() && threads.is_empty() {
            slot_release(&DEFAULT_REGISTRY, self);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.threads.contains(&id)
    }

    /// Handle of the registered thread with native identity `id`
    pub fn lookup(&self, id: ThreadId) -> Option<Handle> {
        self.threads.get(&id)
    }

    /// Native identities of every registered thread, oldest first
    pub fn thread_ids(&self) -> Vec<ThreadId> {
        self.threads.keys()
    }
}
