//! Synchronized FIFO queue
//!
//! Storage is a circular buffer. A full buffer grows by the growth factor
//! and re-lays its elements out from slot zero; enqueue never drops.
//!
//! The queue owns a manual-reset event that is signaled exactly while the
//! queue is non-empty, so consumers can block in
//! [`wait_single`](crate::handle::wait_single) instead of polling.

use super::ObjectPolicy;
use crate::config;
use crate::error::Result;
use crate::handle::Handle;
use crate::lock;
use crate::synch::{create_event, reset_event, set_event};
use std::sync::{Arc, Mutex, MutexGuard};

/// Thread-safe queue. Clones share the same storage and event.
pub struct Queue<T> {
    inner: Arc<Mutex<QueueState<T>>>,
}

pub struct QueueState<T> {
    slots: Vec<Option<T>>,
    head: usize,
    size: usize,
    growth_factor: usize,
    policy: ObjectPolicy<T>,
    event: Handle,
}

pub type QueueGuard<'a, T> = MutexGuard<'a, QueueState<T>>;

impl<T> QueueState<T> {
    fn tail(&self) -> usize {
        (self.head + self.size) % self.slots.len()
    }

    fn grow(&mut self) {
        let old_capacity = self.slots.len();
        let new_capacity = old_capacity * self.growth_factor;
        let mut slots: Vec<Option<T>> = Vec::with_capacity(new_capacity);
        for i in 0..self.size {
            slots.push(self.slots[(self.head + i) % old_capacity].take());
        }
        slots.resize_with(new_capacity, || None);
        self.slots = slots;
        self.head = 0;
        kobj_trace!(old_capacity, new_capacity, "queue grew");
    }

    fn signal(&self, non_empty: bool) {
        let result = if non_empty {
            set_event(&self.event)
        } else {
            reset_event(&self.event)
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "queue event no longer usable");
        }
    }

    pub fn enqueue(&mut self, value: T) {
        if self.size == self.slots.len() {
            self.grow();
        }
        let value = self.policy.admit(value);
        let tail = self.tail();
        self.slots[tail] = Some(value);
        self.size += 1;
        if self.size == 1 {
            self.signal(true);
        }
    }

    /// Oldest element, or `None` when empty. Never blocks.
    pub fn dequeue(&mut self) -> Option<T> {
        if self.size == 0 {
            return None;
        }
        let value = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.size -= 1;
        if self.size == 0 {
            self.signal(false);
        }
        value
    }

    pub fn peek(&self) -> Option<&T> {
        if self.size == 0 {
            return None;
        }
        self.slots[self.head].as_ref()
    }

    pub fn clear(&mut self) {
        while let Some(value) = self.dequeue() {
            self.policy.discard(value);
        }
        self.head = 0;
    }

    pub fn count(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        let capacity = self.slots.len();
        (0..self.size).filter_map(move |i| self.slots[(self.head + i) % capacity].as_ref())
    }

    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        self.iter().any(|v| self.policy.matches(v, value))
    }
}

impl<T> Queue<T> {
    /// Empty queue sized from the installed configuration
    pub fn new() -> Result<Self> {
        Self::with_policy(ObjectPolicy::new())
    }

    pub fn with_policy(policy: ObjectPolicy<T>) -> Result<Self> {
        let config = config::get();
        Self::with_capacity(config.queue_capacity, config.queue_growth_factor, policy)
    }

    pub fn with_capacity(capacity: usize, growth_factor: usize, policy: ObjectPolicy<T>) -> Result<Self> {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Queue {
            inner: Arc::new(Mutex::new(QueueState {
                slots,
                head: 0,
                size: 0,
                growth_factor: growth_factor.max(2),
                policy,
                event: create_event(true, false)?,
            })),
        })
    }

    /// Hold the queue lock across several operations
    pub fn lock(&self) -> QueueGuard<'_, T> {
        lock(&self.inner)
    }

    /// Manual-reset event signaled while the queue holds elements
    pub fn event(&self) -> Handle {
        self.lock().event.clone()
    }

    pub fn enqueue(&self, value: T) {
        self.lock().enqueue(value)
    }

    pub fn dequeue(&self) -> Option<T> {
        self.lock().dequeue()
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

    pub fn count(&self) -> usize {
        self.lock().count()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T> Clone for Queue<T> {
    fn clone(&self) -> Self {
        Queue {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Queue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Queue")
            .field("count", &state.count())
            .field("capacity", &state.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Timeout, WaitStatus, wait_single};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = Queue::new().unwrap();
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);
        assert_eq!(queue.peek(), Some(1));
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), Some(3));
        assert_eq!(queue.dequeue(), None);
    }

    #[test]
    fn test_grow_preserves_order_after_wrap() {
        let queue = Queue::with_capacity(4, 2, ObjectPolicy::new()).unwrap();
        for i in 0..3 {
            queue.enqueue(i);
        }
        // Move head forward so the live range wraps
        assert_eq!(queue.dequeue(), Some(0));
        assert_eq!(queue.dequeue(), Some(1));
        for i in 3..8 {
            queue.enqueue(i);
        }
        assert_eq!(queue.lock().capacity(), 8);
        let drained: Vec<_> = std::iter::from_fn(|| queue.dequeue()).collect();
        assert_eq!(drained, vec![2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_event_tracks_emptiness() {
        let queue = Queue::new().unwrap();
        let event = queue.event();
        assert_eq!(wait_single(&event, Timeout::ZERO), Ok(WaitStatus::Timeout));
        queue.enqueue("job");
        assert_eq!(wait_single(&event, Timeout::ZERO), Ok(WaitStatus::Signaled));
        queue.dequeue();
        assert_eq!(wait_single(&event, Timeout::ZERO), Ok(WaitStatus::Timeout));
    }

    #[test]
    fn test_consumer_blocks_on_event() {
        let queue = Queue::new().unwrap();
        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let event = queue.event();
                let mut got = Vec::new();
                while got.len() < 3 {
                    if wait_single(&event, Timeout::from_millis(2000)) != Ok(WaitStatus::Signaled) {
                        break;
                    }
                    while let Some(v) = queue.dequeue() {
                        got.push(v);
                    }
                }
                got
            })
        };
        for i in 0..3 {
            thread::sleep(Duration::from_millis(5));
            queue.enqueue(i);
        }
        assert_eq!(consumer.join().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_contains_and_clear() {
        let queue = Queue::new().unwrap();
        queue.enqueue(10);
        queue.enqueue(20);
        assert!(queue.contains(&20));
        assert!(!queue.contains(&30));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.count(), 0);
    }
}
