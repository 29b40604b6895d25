//! Thread-local storage slots
//!
//! A slot index is allocated process-wide; each thread holds its own value
//! per slot. Freeing a slot invalidates it for every thread at once: the
//! slot's generation moves on, so values stored under the old generation
//! are never returned again, even after the index is reallocated.

use crate::error::{Error, Result};
use crate::lock;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Mutex;

/// Number of slot indexes available to the process
pub const TLS_SLOTS: usize = 1088;

#[derive(Debug, Clone, Copy)]
struct Slot {
    generation: u64,
    in_use: bool,
}

static SLOTS: Mutex<Vec<Slot>> = Mutex::new(Vec::new());

thread_local! {
    static VALUES: RefCell<HashMap<u32, (u64, Box<dyn Any>)>> = RefCell::new(HashMap::new());
}

fn live_generation(index: u32) -> Result<u64> {
    match lock(&SLOTS).get(index as usize) {
        Some(slot) if slot.in_use => Ok(slot.generation),
        _ => Err(Error::InvalidParameter("thread-local slot is not allocated")),
    }
}

/// Allocate a slot index. Every thread starts with no value in it.
pub fn tls_alloc() -> Result<u32> {
    let mut slots = lock(&SLOTS);
    if let Some(index) = slots.iter().position(|s| !s.in_use) {
        let slot = &mut slots[index];
        slot.in_use = true;
        slot.generation += 1;
        return Ok(index as u32);
    }
    if slots.len() >= TLS_SLOTS {
        tracing::warn!(slots = TLS_SLOTS, "thread-local slots exhausted");
        return Err(Error::ResourceExhausted("no free thread-local slot".to_string()));
    }
    slots.push(Slot {
        generation: 1,
        in_use: true,
    });
    Ok((slots.len() - 1) as u32)
}

pub fn tls_free(index: u32) -> Result<()> {
    let mut slots = lock(&SLOTS);
    match slots.get_mut(index as usize) {
        Some(slot) if slot.in_use => {
            slot.in_use = false;
            slot.generation += 1;
            Ok(())
        }
        _ => Err(Error::InvalidParameter("thread-local slot is not allocated")),
    }
}

/// Store `value` in the calling thread's copy of the slot
pub fn tls_set_value<T: Any>(index: u32, value: T) -> Result<()> {
    let generation = live_generation(index)?;
    let previous = VALUES.with(|values| values.borrow_mut().insert(index, (generation, Box::new(value))));
    // Dropped outside the borrow: a destructor may touch thread-local slots.
    drop(previous);
    Ok(())
}

/// The calling thread's value in the slot, `None` if it never stored one
///
/// Asking for a different type than was stored is an error.
pub fn tls_get_value<T: Any + Clone>(index: u32) -> Result<Option<T>> {
    let generation = live_generation(index)?;
    let (found, stale) = VALUES.with(|values| {
        let mut values = values.borrow_mut();
        if values.get(&index).is_some_and(|(stored, _)| *stored != generation) {
            return (Ok(None), values.remove(&index));
        }
        match values.get(&index) {
            Some((_, value)) => match value.downcast_ref::<T>() {
                Some(v) => (Ok(Some(v.clone())), None),
                None => (Err(Error::InvalidParameter("thread-local value has another type")), None),
            },
            None => (Ok(None), None),
        }
    });
    drop(stale);
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_values_are_per_thread() {
        let index = tls_alloc().unwrap();
        tls_set_value(index, 5u32).unwrap();
        let other = thread::spawn(move || {
            let before = tls_get_value::<u32>(index).unwrap();
            tls_set_value(index, 9u32).unwrap();
            (before, tls_get_value::<u32>(index).unwrap())
        })
        .join()
        .unwrap();
        assert_eq!(other, (None, Some(9)));
        assert_eq!(tls_get_value::<u32>(index), Ok(Some(5)));
        tls_free(index).unwrap();
    }

    #[test]
    fn test_free_invalidates_slot() {
        let index = tls_alloc().unwrap();
        tls_set_value(index, String::from("kept")).unwrap();
        tls_free(index).unwrap();
        assert!(matches!(tls_get_value::<String>(index), Err(Error::InvalidParameter(_))));
        assert!(matches!(tls_set_value(index, 1u8), Err(Error::InvalidParameter(_))));
        assert!(tls_free(index).is_err());
    }

    #[test]
    fn test_reallocated_slot_starts_empty() {
        let index = tls_alloc().unwrap();
        tls_set_value(index, 1i64).unwrap();
        // Same effect as a free followed by a reallocation of this index
        lock(&SLOTS)[index as usize].generation += 2;
        assert_eq!(tls_get_value::<i64>(index), Ok(None));
        tls_free(index).unwrap();
    }

    #[test]
    fn test_type_mismatch_is_error() {
        let index = tls_alloc().unwrap();
        tls_set_value(index, 3u16).unwrap();
        assert!(tls_get_value::<u32>(index).is_err());
        tls_free(index).unwrap();
    }
}
