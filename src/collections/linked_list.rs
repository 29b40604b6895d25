//! Synchronized doubly linked list with a built-in enumerator
//!
//! The list owns a single cursor. A traversal is
//! `enumerator_reset`, then `enumerator_move_next` until it returns
//! `false`, reading `enumerator_current` in between. Any mutation resets
//! the cursor to the unset state, where `move_next` keeps returning `false`
//! until the next reset.

use super::ObjectPolicy;
use crate::interlocked::{DList, EntryKey};
use crate::lock;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    /// Never reset, or invalidated by a mutation
    Unset,
    /// Reset; the next move lands on the head
    BeforeHead,
    At(EntryKey),
    /// Moved past the tail
    Finished,
}

/// Thread-safe enumerable list. Clones share the same storage and cursor.
pub struct LinkedList<T> {
    inner: Arc<Mutex<LinkedListState<T>>>,
}

pub struct LinkedListState<T> {
    items: DList<T>,
    cursor: Cursor,
    policy: ObjectPolicy<T>,
}

pub type LinkedListGuard<'a, T> = MutexGuard<'a, LinkedListState<T>>;

impl<T> LinkedListState<T> {
    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn add_first(&mut self, value: T) {
        let value = self.policy.admit(value);
        self.items.insert_head(value);
        self.cursor = Cursor::Unset;
    }

    pub fn add_last(&mut self, value: T) {
        let value = self.policy.admit(value);
        self.items.insert_tail(value);
        self.cursor = Cursor::Unset;
    }

    pub fn remove_first(&mut self) -> Option<T> {
        self.cursor = Cursor::Unset;
        self.items.remove_head()
    }

    pub fn remove_last(&mut self) -> Option<T> {
        self.cursor = Cursor::Unset;
        self.items.remove_tail()
    }

    pub fn clear(&mut self) {
        while let Some(value) = self.items.remove_head() {
            self.policy.discard(value);
        }
        self.cursor = Cursor::Unset;
    }

    pub fn enumerator_reset(&mut self) {
        self.cursor = Cursor::BeforeHead;
    }

    pub fn enumerator_move_next(&mut self) -> bool {
        let next = match self.cursor {
            Cursor::Unset | Cursor::Finished => return false,
            Cursor::BeforeHead => self.items.head(),
            Cursor::At(key) => self.items.next(key),
        };
        self.cursor = match next {
            Some(key) => Cursor::At(key),
            None => Cursor::Finished,
        };
        next.is_some()
    }

    pub fn enumerator_current(&self) -> Option<&T> {
        match self.cursor {
            Cursor::At(key) => self.items.get(key),
            _ => None,
        }
    }
}

impl<T: PartialEq> LinkedListState<T> {
    pub fn contains(&self, value: &T) -> bool {
        self.items.find(|v| self.policy.matches(v, value)).is_some()
    }

    /// Remove the first element equal to `value`, handing it to the free hook
    pub fn remove(&mut self, value: &T) -> bool {
        let Some(key) = self.items.find(|v| self.policy.matches(v, value)) else {
            return false;
        };
        if let Some(removed) = self.items.remove(key) {
            self.policy.discard(removed);
        }
        self.cursor = Cursor::Unset;
        true
    }
}

impl<T> LinkedList<T> {
    pub fn new() -> Self {
        Self::with_policy(ObjectPolicy::new())
    }

    pub fn with_policy(policy: ObjectPolicy<T>) -> Self {
        LinkedList {
            inner: Arc::new(Mutex::new(LinkedListState {
                items: DList::new(),
                cursor: Cursor::Unset,
                policy,
            })),
        }
    }

    /// Hold the list lock across several operations, such as a traversal
    pub fn lock(&self) -> LinkedListGuard<'_, T> {
        lock(&self.inner)
    }

    pub fn count(&self) -> usize {
        self.lock().count()
    }

    pub fn first(&self) -> Option<T>
    where
        T: Clone,
    {
        self.lock().first().cloned()
    }

    pub fn last(&self) -> Option<T>
    where
        T: Clone,
    {
        self.lock().last().cloned()
    }

    pub fn add_first(&self, value: T) {
        self.lock().add_first(value)
    }

    pub fn add_last(&self, value: T) {
        self.lock().add_last(value)
    }

    pub fn remove_first(&self) -> Option<T> {
        self.lock().remove_first()
    }

    pub fn remove_last(&self) -> Option<T> {
        self.lock().remove_last()
    }

    pub fn clear(&self) {
        self.lock().clear()
    }

    pub fn enumerator_reset(&self) {
        self.lock().enumerator_reset()
    }

    pub fn enumerator_move_next(&self) -> bool {
        self.lock().enumerator_move_next()
    }

    pub fn enumerator_current(&self) -> Option<T>
    where
        T: Clone,
    {
        self.lock().enumerator_current().cloned()
    }
}

impl<T: PartialEq> LinkedList<T> {
    pub fn contains(&self, value: &T) -> bool {
        self.lock().contains(value)
    }

    pub fn remove(&self, value: &T) -> bool {
        self.lock().remove(value)
    }
}

impl<T> Default for LinkedList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for LinkedList<T> {
    fn clone(&self) -> Self {
        LinkedList {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for LinkedList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkedList").field("count", &self.count()).finish()
    }
}
