//! Interlocked integer operations
//!
//! Thin wrappers with Win32-style return conventions over the std atomics:
//! - increment / decrement return the value after the operation
//! - exchange / exchange-add / compare-exchange return the prior value
//!
//! All operations are sequentially consistent.
//!
//! [`Atomic64`] is the 64-bit word used by the interlocked list header. On
//! targets without native 8-byte atomics it degrades to [`LockedU64`], which
//! serializes every 64-bit operation through one process-wide mutex. That
//! mode is correct but slower, and it is not fair under contention.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicPtr, Ordering};
use std::sync::{Mutex, PoisonError};

/// Native 64-bit atomic when the target has one
#[cfg(target_has_atomic = "64")]
pub type Atomic64 = NativeU64;

/// Mutex-serialized fallback on targets without 8-byte atomics
#[cfg(not(target_has_atomic = "64"))]
pub type Atomic64 = LockedU64;

/// Whether 64-bit operations are lock-free on this target
pub const fn has_native_atomic64() -> bool {
    cfg!(target_has_atomic = "64")
}

pub fn interlocked_increment(addend: &AtomicI32) -> i32 {
    addend.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
}

pub fn interlocked_decrement(addend: &AtomicI32) -> i32 {
    addend.fetch_sub(1, Ordering::SeqCst).wrapping_sub(1)
}

pub fn interlocked_exchange(target: &AtomicI32, value: i32) -> i32 {
    target.swap(value, Ordering::SeqCst)
}

pub fn interlocked_exchange_add(addend: &AtomicI32, value: i32) -> i32 {
    addend.fetch_add(value, Ordering::SeqCst)
}

/// Store `exchange` only if the current value equals `comparand`.
/// Returns the value observed before the operation either way.
pub fn interlocked_compare_exchange(target: &AtomicI32, exchange: i32, comparand: i32) -> i32 {
    match target.compare_exchange(comparand, exchange, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(prev) | Err(prev) => prev,
    }
}

pub fn interlocked_compare_exchange_pointer<T>(
    target: &AtomicPtr<T>,
    exchange: *mut T,
    comparand: *mut T,
) -> *mut T {
    match target.compare_exchange(comparand, exchange, Ordering::SeqCst, Ordering::SeqCst) {
        Ok(prev) | Err(prev) => prev,
    }
}

pub fn interlocked_increment64(addend: &Atomic64) -> u64 {
    addend.fetch_add(1).wrapping_add(1)
}

pub fn interlocked_decrement64(addend: &Atomic64) -> u64 {
    addend.fetch_sub(1).wrapping_sub(1)
}

pub fn interlocked_exchange64(target: &Atomic64, value: u64) -> u64 {
    target.swap(value)
}

pub fn interlocked_compare_exchange64(target: &Atomic64, exchange: u64, comparand: u64) -> u64 {
    match target.compare_exchange(comparand, exchange) {
        Ok(prev) | Err(prev) => prev,
    }
}

/// 64-bit word backed by a hardware atomic
#[cfg(target_has_atomic = "64")]
#[derive(Debug, Default)]
pub struct NativeU64(std::sync::atomic::AtomicU64);

#[cfg(target_has_atomic = "64")]
impl NativeU64 {
    pub const fn new(v: u64) -> Self {
        Self(std::sync::atomic::AtomicU64::new(v))
    }

    #[inline]
    pub fn load(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    #[inline]
    pub fn store(&self, v: u64) {
        self.0.store(v, Ordering::Release)
    }

    #[inline]
    pub fn swap(&self, v: u64) -> u64 {
        self.0.swap(v, Ordering::SeqCst)
    }

    #[inline]
    pub fn fetch_add(&self, v: u64) -> u64 {
        self.0.fetch_add(v, Ordering::SeqCst)
    }

    #[inline]
    pub fn fetch_sub(&self, v: u64) -> u64 {
        self.0.fetch_sub(v, Ordering::SeqCst)
    }

    #[inline]
    pub fn compare_exchange(&self, current: u64, new: u64) -> Result<u64, u64> {
        self.0
            .compare_exchange(current, new, Ordering::SeqCst, Ordering::Acquire)
    }
}

/// Serializes every 64-bit operation in the process through this lock.
static FALLBACK_LOCK: Mutex<()> = Mutex::new(());

/// 64-bit word whose operations run under [`FALLBACK_LOCK`]
///
/// Always compiled so the degraded mode stays tested on 64-bit hosts.
#[derive(Debug, Default)]
pub struct LockedU64 {
    v: UnsafeCell<u64>,
}

// Safety: every access to `v` happens while FALLBACK_LOCK is held
unsafe impl Sync for LockedU64 {}

impl LockedU64 {
    pub const fn new(v: u64) -> Self {
        Self {
            v: UnsafeCell::new(v),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut u64) -> R) -> R {
        let _guard = FALLBACK_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        // Safety: FALLBACK_LOCK is held for the duration of the closure
        f(unsafe { &mut *self.v.get() })
    }

    pub fn load(&self) -> u64 {
        self.with(|v| *v)
    }

    pub fn store(&self, new: u64) {
        self.with(|v| *v = new)
    }

    pub fn swap(&self, new: u64) -> u64 {
        self.with(|v| std::mem::replace(v, new))
    }

    pub fn fetch_add(&self, delta: u64) -> u64 {
        self.with(|v| {
            let prev = *v;
            *v = prev.wrapping_add(delta);
            prev
        })
    }

    pub fn fetch_sub(&self, delta: u64) -> u64 {
        self.with(|v| {
            let prev = *v;
            *v = prev.wrapping_sub(delta);
            prev
        })
    }

    pub fn compare_exchange(&self, current: u64, new: u64) -> Result<u64, u64> {
        self.with(|v| {
            let prev = *v;
            if prev == current {
                *v = new;
                Ok(prev)
            } else {
                Err(prev)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_increment_returns_new_value() {
        let v = AtomicI32::new(5);
        assert_eq!(interlocked_increment(&v), 6);
        assert_eq!(interlocked_decrement(&v), 5);
        assert_eq!(interlocked_decrement(&v), 4);
    }

    #[test]
    fn test_exchange_returns_prior() {
        let v = AtomicI32::new(1);
        assert_eq!(interlocked_exchange(&v, 9), 1);
        assert_eq!(interlocked_exchange_add(&v, 3), 9);
        assert_eq!(v.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_compare_exchange() {
        let v = AtomicI32::new(10);
        // Mismatch: no store, prior value returned
        assert_eq!(interlocked_compare_exchange(&v, 20, 11), 10);
        assert_eq!(v.load(Ordering::SeqCst), 10);
        // Match: store happens
        assert_eq!(interlocked_compare_exchange(&v, 20, 10), 10);
        assert_eq!(v.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn test_compare_exchange_pointer() {
        let mut a = 1u8;
        let mut b = 2u8;
        let p = AtomicPtr::new(&mut a as *mut u8);
        let prev = interlocked_compare_exchange_pointer(&p, &mut b, &mut a);
        assert_eq!(prev, &mut a as *mut u8);
        assert_eq!(p.load(Ordering::SeqCst), &mut b as *mut u8);
    }

    #[test]
    fn test_atomic64_ops() {
        let v = Atomic64::new(u64::MAX - 1);
        assert_eq!(interlocked_increment64(&v), u64::MAX);
        assert_eq!(interlocked_increment64(&v), 0);
        assert_eq!(interlocked_decrement64(&v), u64::MAX);
        assert_eq!(interlocked_exchange64(&v, 7), u64::MAX);
        assert_eq!(interlocked_compare_exchange64(&v, 8, 6), 7);
        assert_eq!(interlocked_compare_exchange64(&v, 8, 7), 7);
        assert_eq!(v.load(), 8);
    }

    #[test]
    fn test_locked_fallback_matches_native_semantics() {
        let v = LockedU64::new(3);
        assert_eq!(v.compare_exchange(4, 5), Err(3));
        assert_eq!(v.compare_exchange(3, 5), Ok(3));
        assert_eq!(v.swap(1), 5);
        assert_eq!(v.fetch_add(2), 1);
        assert_eq!(v.fetch_sub(1), 3);
        assert_eq!(v.load(), 2);
    }

    #[test]
    fn test_locked_fallback_concurrent_increments() {
        let v = Arc::new(LockedU64::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let v = v.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        loop {
                            let cur = v.load();
                            if v.compare_exchange(cur, cur + 1).is_ok() {
                                break;
                            }
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(v.load(), 4000);
    }
}
