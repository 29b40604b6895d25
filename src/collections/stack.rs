//! Synchronized LIFO stack

use super::ObjectPolicy;
use crate::config;
use crate::lock;
use std::sync::{Arc, Mutex, MutexGuard};

/// Thread-safe stack. Clones share the same storage.
pub struct Stack<T> {
    inner: Arc<Mutex<StackState<T>>>,
}

/// Stack contents, reachable through [`Stack::lock`] for multi-step sequences
pub struct StackState<T> {
    items: Vec<T>,
    capacity: usize,
    growth_factor: usize,
    policy: ObjectPolicy<T>,
}

pub type StackGuard<'a, T> = MutexGuard<'a, StackState<T>>;

impl<T> StackState<T> {
    pub fn push(&mut self, value: T) {
        if self.items.len() == self.capacity {
            let grown = self.capacity * self.growth_factor;
            self.items.reserve_exact(grown - self.items.len());
            self.capacity = grown;
        }
        let value = self.policy.admit(value);
        self.items.push(value);
    }

    pub fn pop(&mut self) -> Option<T> {
        self.items.pop()
    }

    pub fn peek(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.items.iter().any(|v| self.policy.matches(v, value))
    }

    pub fn clear(&mut self) {
        for value in self.items.drain(..) {
            self.policy.discard(value);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Slots available before the next growth
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Stack<T> {
    /// Empty stack sized from the installed configuration
    pub fn new() -> Self {
        Self::with_policy(ObjectPolicy::new())
    }

    pub fn with_policy(policy: ObjectPolicy<T>) -> Self {
        let config = config::get();
        Self::with_capacity(config.stack_capacity, config.queue_growth_factor, policy)
    }

    pub fn with_capacity(capacity: usize, growth_factor: usize, policy: ObjectPolicy<T>) -> Self {
        let capacity = capacity.max(1);
        Stack {
            inner: Arc::new(Mutex::new(StackState {
                items: Vec::with_capacity(capacity),
                capacity,
                growth_factor: growth_factor.max(2),
                policy,
            })),
        }
    }

    /// Hold the stack lock across several operations
    pub fn lock(&self) -> StackGuard<'_, T> {
        lock(&self.inner)
    }

    pub fn push(&self, value: T) {
        self.lock().push(value)
    }

    pub fn pop(&self) -> Option<T> {
        self.lock().pop()
    }

    pub fn peek(&self) -> Option<T>
    where
        T: Clone,
    {
        self.lock().peek().cloned()
    }

    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.lock().contains(value)
    }

    pub fn clear(&self) {
        self.lock().clear()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Stack<T> {
    fn clone(&self) -> Self {
        Stack {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Stack<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Stack")
            .field("len", &state.len())
            .field("capacity", &state.capacity())
            .finish()
    }
}
