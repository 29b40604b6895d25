//! Lock-free interlocked singly linked list
//!
//! A concurrent LIFO stack supporting push, pop, flush and depth without
//! taking a lock. Nodes live in an index-based arena owned by the list and
//! are referenced by 24-bit indices, never by address, so a slot that is
//! popped and reused is never freed while the list exists.
//!
//! The list header is a single 64-bit word updated by compare-and-swap:
//!
//! ```text
//!   63        48 47                  24 23                   0
//!  ┌────────────┬──────────────────────┬──────────────────────┐
//!  │  sequence  │        depth         │      top index       │
//!  └────────────┴──────────────────────┴──────────────────────┘
//! ```
//!
//! Every successful push, pop or flush bumps `sequence`. Without it a pop
//! could read `top` and `top.next`, stall while that node is popped and
//! pushed back, and then succeed with a stale `next` (the ABA hazard).
//! With it the stale compare-and-swap fails and the pop retries.
//!
//! Free slots are kept on a second tagged stack threaded through the same
//! arena. The arena grows by appending buckets of doubling size; buckets are
//! installed with a compare-and-swap and released only when the list drops.
//!
//! Properties:
//! - push/pop/flush are linearizable at their successful compare-and-swap
//! - contention can starve an individual operation, never deadlock it
//! - depth is advisory and may be stale as soon as it is returned

use crate::atomic::Atomic64;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU32, Ordering};

/// Index value meaning "no node"
const NIL: u32 = (1 << 24) - 1;

const INDEX_MASK: u64 = (1 << 24) - 1;
const DEPTH_SHIFT: u32 = 24;
const SEQUENCE_SHIFT: u32 = 48;

const FIRST_BUCKET_SHIFT: u32 = 5;
const FIRST_BUCKET_LEN: usize = 1 << FIRST_BUCKET_SHIFT;
const BUCKETS: usize = 19;

/// Maximum number of nodes a list can hold at once
pub const SLIST_CAPACITY: usize = FIRST_BUCKET_LEN * ((1 << BUCKETS) - 1);

/// Unpacked list header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    top: u32,
    depth: u32,
    sequence: u16,
}

impl Header {
    const EMPTY: Header = Header {
        top: NIL,
        depth: 0,
        sequence: 0,
    };

    #[inline]
    fn pack(self) -> u64 {
        ((self.sequence as u64) << SEQUENCE_SHIFT)
            | (((self.depth as u64) & INDEX_MASK) << DEPTH_SHIFT)
            | (self.top as u64 & INDEX_MASK)
    }

    #[inline]
    fn unpack(word: u64) -> Self {
        Header {
            top: (word & INDEX_MASK) as u32,
            depth: ((word >> DEPTH_SHIFT) & INDEX_MASK) as u32,
            sequence: (word >> SEQUENCE_SHIFT) as u16,
        }
    }
}

struct Slot<T> {
    next: AtomicU32,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    fn vacant() -> Self {
        Slot {
            next: AtomicU32::new(NIL),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// Map a slot index to (bucket, offset within bucket)
#[inline]
fn locate(index: u32) -> (usize, usize) {
    let biased = index as usize + FIRST_BUCKET_LEN;
    let bit = usize::BITS - 1 - biased.leading_zeros();
    let bucket = (bit - FIRST_BUCKET_SHIFT) as usize;
    (bucket, biased - (FIRST_BUCKET_LEN << bucket))
}

#[inline]
fn bucket_len(bucket: usize) -> usize {
    FIRST_BUCKET_LEN << bucket
}

/// Growable slot storage. Buckets are never moved or freed before drop.
struct Arena<T> {
    buckets: [AtomicPtr<Slot<T>>; BUCKETS],
    fresh: AtomicU32,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Arena {
            buckets: std::array::from_fn(|_| AtomicPtr::new(ptr::null_mut())),
            fresh: AtomicU32::new(0),
        }
    }

    /// The slot at `index`. The index must have been handed out by
    /// [`Arena::claim_fresh`], which installs its bucket first.
    #[inline]
    fn slot(&self, index: u32) -> &Slot<T> {
        let (bucket, offset) = locate(index);
        let base = self.buckets[bucket].load(Ordering::Acquire);
        debug_assert!(!base.is_null(), "slot {} read before its bucket exists", index);
        // Safety: the bucket was installed before `index` became reachable
        // and stays allocated until the arena drops
        unsafe { &*base.add(offset) }
    }

    /// Hand out a never-used index, installing its bucket if needed
    fn claim_fresh(&self) -> Option<u32> {
        let index = self
            .fresh
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                ((n as usize) < SLIST_CAPACITY).then_some(n + 1)
            })
            .ok()?;

        let (bucket, _) = locate(index);
        if self.buckets[bucket].load(Ordering::Acquire).is_null() {
            let storage: Box<[Slot<T>]> = (0..bucket_len(bucket)).map(|_| Slot::vacant()).collect();
            let raw = Box::into_raw(storage) as *mut Slot<T>;
            if let Err(_installed) = self.buckets[bucket].compare_exchange(
                ptr::null_mut(),
                raw,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                // Another claimer won the race to install this bucket
                // Safety: `raw` came from Box::into_raw above and was never shared
                drop(unsafe {
                    Box::from_raw(ptr::slice_from_raw_parts_mut(raw, bucket_len(bucket)))
                });
            }
        }
        Some(index)
    }

    fn allocated(&self) -> usize {
        self.fresh.load(Ordering::Relaxed) as usize
    }
}

impl<T> Drop for Arena<T> {
    fn drop(&mut self) {
        for (bucket, cell) in self.buckets.iter_mut().enumerate() {
            let raw = *cell.get_mut();
            if !raw.is_null() {
                // Safety: installed from Box::into_raw with this exact length.
                // Slot values are MaybeUninit and were drained by the list.
                drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(raw, bucket_len(bucket))) });
            }
        }
    }
}

/// A tagged stack head threading indices through the arena
struct TaggedHead {
    word: Atomic64,
}

impl TaggedHead {
    fn new() -> Self {
        TaggedHead {
            word: Atomic64::new(Header::EMPTY.pack()),
        }
    }

    #[inline]
    fn header(&self) -> Header {
        Header::unpack(self.word.load())
    }

    fn push<T>(&self, arena: &Arena<T>, index: u32) {
        let slot = arena.slot(index);
        loop {
            let old = self.header();
            slot.next.store(old.top, Ordering::Relaxed);
            let new = Header {
                top: index,
                depth: old.depth + 1,
                sequence: old.sequence.wrapping_add(1),
            };
            if self.word.compare_exchange(old.pack(), new.pack()).is_ok() {
                return;
            }
            std::hint::spin_loop();
        }
    }

    fn pop<T>(&self, arena: &Arena<T>) -> Option<u32> {
        loop {
            let old = self.header();
            if old.top == NIL {
                return None;
            }
            // May be stale if `old.top` was popped meanwhile; the sequence
            // check in the compare-and-swap rejects it.
            let next = arena.slot(old.top).next.load(Ordering::Relaxed);
            let new = Header {
                top: next,
                depth: old.depth.saturating_sub(1),
                sequence: old.sequence.wrapping_add(1),
            };
            if self.word.compare_exchange(old.pack(), new.pack()).is_ok() {
                return Some(old.top);
            }
            std::hint::spin_loop();
        }
    }

    /// Detach the whole chain, returning its first index
    fn take_all(&self) -> Option<u32> {
        loop {
            let old = self.header();
            if old.top == NIL {
                return None;
            }
            let new = Header {
                sequence: old.sequence.wrapping_add(1),
                ..Header::EMPTY
            };
            if self.word.compare_exchange(old.pack(), new.pack()).is_ok() {
                return Some(old.top);
            }
            std::hint::spin_loop();
        }
    }
}

/// Lock-free LIFO list of values
///
/// A value pushed onto the list is owned by the list until a pop or flush
/// hands it back.
pub struct SList<T> {
    items: TaggedHead,
    free: TaggedHead,
    arena: Arena<T>,
}

impl<T> SList<T> {
    /// Create an empty list
    pub fn new() -> Self {
        SList {
            items: TaggedHead::new(),
            free: TaggedHead::new(),
            arena: Arena::new(),
        }
    }

    /// Push a value onto the top of the list
    ///
    /// Returns `Err(value)` only when [`SLIST_CAPACITY`] nodes are live.
    pub fn push(&self, value: T) -> Result<(), T> {
        let index = match self.free.pop(&self.arena) {
            Some(index) => index,
            None => match self.arena.claim_fresh() {
                Some(index) => index,
                None => {
                    tracing::warn!(capacity = SLIST_CAPACITY, "interlocked list exhausted");
                    return Err(value);
                }
            },
        };

        // Safety: `index` came off the free stack or is fresh, so no other
        // thread can reach this slot's value until the push below publishes it
        unsafe {
            (*self.arena.slot(index).value.get()).write(value);
        }
        self.items.push(&self.arena, index);
        Ok(())
    }

    /// Pop the most recently pushed value, or `None` if the list is empty
    pub fn pop(&self) -> Option<T> {
        let index = self.items.pop(&self.arena)?;
        // Safety: the successful pop made this slot exclusively ours and the
        // pusher initialized it before publishing the index
        let value = unsafe { (*self.arena.slot(index).value.get()).assume_init_read() };
        self.free.push(&self.arena, index);
        Some(value)
    }

    /// Atomically remove every value, returned in pop order (newest first)
    pub fn flush(&self) -> Vec<T> {
        let mut out = Vec::new();
        let mut cursor = match self.items.take_all() {
            Some(top) => top,
            None => return out,
        };

        while cursor != NIL {
            let slot = self.arena.slot(cursor);
            // Read the link before the free push overwrites it
            let next = slot.next.load(Ordering::Relaxed);
            // Safety: the detached chain is reachable only from this call
            out.push(unsafe { (*slot.value.get()).assume_init_read() });
            self.free.push(&self.arena, cursor);
            cursor = next;
        }
        out
    }

    /// Number of values on the list (advisory)
    pub fn depth(&self) -> usize {
        self.items.header().depth as usize
    }

    pub fn is_empty(&self) -> bool {
        self.items.header().top == NIL
    }

    /// Number of arena slots ever claimed (live plus free)
    pub fn allocated_slots(&self) -> usize {
        self.arena.allocated()
    }
}

impl<T> Default for SList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for SList<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
    }
}

impl<T> std::fmt::Debug for SList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SList")
            .field("depth", &self.depth())
            .field("allocated_slots", &self.allocated_slots())
            .finish()
    }
}

// Safety: values move between threads only through the header CAS, and a
// slot's value is touched by exactly one thread at a time
unsafe impl<T: Send> Send for SList<T> {}
unsafe impl<T: Send> Sync for SList<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_header_pack_unpack() {
        let h = Header {
            top: 12345,
            depth: 678,
            sequence: 0xBEEF,
        };
        assert_eq!(Header::unpack(h.pack()), h);
        assert_eq!(Header::unpack(Header::EMPTY.pack()), Header::EMPTY);
    }

    #[test]
    fn test_locate_bucket_boundaries() {
        assert_eq!(locate(0), (0, 0));
        assert_eq!(locate(31), (0, 31));
        assert_eq!(locate(32), (1, 0));
        assert_eq!(locate(95), (1, 63));
        assert_eq!(locate(96), (2, 0));
        let last = (SLIST_CAPACITY - 1) as u32;
        assert_eq!(locate(last), (BUCKETS - 1, bucket_len(BUCKETS - 1) - 1));
        assert!(last < NIL);
    }

    #[test]
    fn test_stack_order() {
        let list = SList::new();
        list.push('a').unwrap();
        list.push('b').unwrap();
        list.push('c').unwrap();
        assert_eq!(list.depth(), 3);

        assert_eq!(list.pop(), Some('c'));
        assert_eq!(list.pop(), Some('b'));
        assert_eq!(list.pop(), Some('a'));
        assert_eq!(list.pop(), None);
        assert!(list.is_empty());
        assert_eq!(list.depth(), 0);
    }

    #[test]
    fn test_pop_empty_is_not_an_error() {
        let list: SList<u32> = SList::new();
        assert_eq!(list.pop(), None);
        assert_eq!(list.flush(), Vec::<u32>::new());
    }

    #[test]
    fn test_flush_returns_chain_newest_first() {
        let list = SList::new();
        for i in 0..5 {
            list.push(i).unwrap();
        }
        assert_eq!(list.flush(), vec![4, 3, 2, 1, 0]);
        assert_eq!(list.depth(), 0);

        // List stays usable and reuses flushed slots
        list.push(9).unwrap();
        assert_eq!(list.pop(), Some(9));
        assert_eq!(list.allocated_slots(), 5);
    }

    #[test]
    fn test_slots_are_recycled() {
        let list = SList::new();
        for round in 0..100 {
            for i in 0..10 {
                list.push(round * 10 + i).unwrap();
            }
            for _ in 0..10 {
                list.pop().unwrap();
            }
        }
        assert_eq!(list.allocated_slots(), 10);
    }

    #[test]
    fn test_grows_across_buckets() {
        let list = SList::new();
        for i in 0..1000u32 {
            list.push(i).unwrap();
        }
        assert_eq!(list.depth(), 1000);
        for i in (0..1000u32).rev() {
            assert_eq!(list.pop(), Some(i));
        }
    }

    #[test]
    fn test_drop_releases_values() {
        let counter = Arc::new(AtomicUsize::new(0));
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        {
            let list = SList::new();
            for _ in 0..7 {
                assert!(list.push(Tracked(counter.clone())).is_ok());
            }
            drop(list.pop());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_concurrent_push_pop_no_loss_or_duplication() {
        const THREADS: usize = 8;
        const PUSHES: usize = 2000;
        const POPS: usize = 1500;

        let list = Arc::new(SList::new());
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let list = list.clone();
                thread::spawn(move || {
                    let mut popped = Vec::new();
                    for i in 0..PUSHES {
                        list.push(t * PUSHES + i).unwrap();
                        if i % 4 != 3 && popped.len() < POPS {
                            if let Some(v) = list.pop() {
                                popped.push(v);
                            }
                        }
                    }
                    while popped.len() < POPS {
                        if let Some(v) = list.pop() {
                            popped.push(v);
                        }
                    }
                    popped
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for v in h.join().unwrap() {
                assert!(seen.insert(v), "value {} popped twice", v);
            }
        }

        let expected_remaining = THREADS * (PUSHES - POPS);
        assert_eq!(list.depth(), expected_remaining);

        let rest = list.flush();
        assert_eq!(rest.len(), expected_remaining);
        for v in rest {
            assert!(seen.insert(v), "value {} both popped and left", v);
        }
        assert_eq!(seen.len(), THREADS * PUSHES);
    }

    #[test]
    fn test_concurrent_flush_and_push() {
        let list = Arc::new(SList::new());
        let pushers: Vec<_> = (0..4)
            .map(|t| {
                let list = list.clone();
                thread::spawn(move || {
                    for i in 0..1000 {
                        list.push(t * 1000 + i).unwrap();
                    }
                })
            })
            .collect();

        let mut drained = Vec::new();
        for _ in 0..50 {
            drained.extend(list.flush());
            thread::yield_now();
        }
        for h in pushers {
            h.join().unwrap();
        }
        drained.extend(list.flush());

        drained.sort_unstable();
        assert_eq!(drained, (0..4000).collect::<Vec<_>>());
    }
}
