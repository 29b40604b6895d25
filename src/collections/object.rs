//! Element lifecycle policies
//!
//! A collection can be given hooks that run when an element enters it,
//! when the collection discards an element (clear, overwrite, remove
//! without return), and when two elements are compared. Elements handed
//! back to the caller by pop/dequeue/remove-returning calls skip the free
//! hook: ownership moves to the caller.

use std::fmt;

type InsertFn<T> = Box<dyn Fn(T) -> T + Send + Sync>;
type FreeFn<T> = Box<dyn Fn(T) + Send + Sync>;
type EqualsFn<T> = Box<dyn Fn(&T, &T) -> bool + Send + Sync>;

pub struct ObjectPolicy<T> {
    on_insert: Option<InsertFn<T>>,
    on_free: Option<FreeFn<T>>,
    equals: Option<EqualsFn<T>>,
}

impl<T> ObjectPolicy<T> {
    /// No hooks; equality falls back to `PartialEq`
    pub fn new() -> Self {
        Self {
            on_insert: None,
            on_free: None,
            equals: None,
        }
    }

    /// Transform (typically clone or initialize) each element as it is inserted
    pub fn on_insert(mut self, f: impl Fn(T) -> T + Send + Sync + 'static) -> Self {
        self.on_insert = Some(Box::new(f));
        self
    }

    /// Called with each element the collection discards
    pub fn on_free(mut self, f: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.on_free = Some(Box::new(f));
        self
    }

    /// Replace the default equality used by contains/remove/lookup
    pub fn equals(mut self, f: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        self.equals = Some(Box::new(f));
        self
    }

    pub(crate) fn admit(&self, value: T) -> T {
        match &self.on_insert {
            Some(f) => f(value),
            None => value,
        }
    }

    pub(crate) fn discard(&self, value: T) {
        match &self.on_free {
            Some(f) => f(value),
            None => drop(value),
        }
    }

    pub(crate) fn matches(&self, a: &T, b: &T) -> bool
    where
        T: PartialEq,
    {
        match &self.equals {
            Some(f) => f(a, b),
            None => a == b,
        }
    }
}

impl<T> Default for ObjectPolicy<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ObjectPolicy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPolicy")
            .field("on_insert", &self.on_insert.is_some())
            .field("on_free", &self.on_free.is_some())
            .field("equals", &self.equals.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_default_policy_is_identity() {
        let policy = ObjectPolicy::<i32>::new();
        assert_eq!(policy.admit(4), 4);
        assert!(policy.matches(&1, &1));
        assert!(!policy.matches(&1, &2));
    }

    #[test]
    fn test_hooks_run() {
        let freed = Arc::new(AtomicUsize::new(0));
        let counter = freed.clone();
        let policy = ObjectPolicy::<String>::new()
            .on_insert(|s| s.to_uppercase())
            .on_free(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .equals(|a, b| a.eq_ignore_ascii_case(b));

        assert_eq!(policy.admit("abc".into()), "ABC");
        assert!(policy.matches(&"Key".into(), &"KEY".into()));
        policy.discard("x".into());
        assert_eq!(freed.load(Ordering::SeqCst), 1);
    }
}
