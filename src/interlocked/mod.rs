//! Interlocked lists
//!
//! - [`SList`]: lock-free LIFO with an ABA-safe tagged header
//! - [`DList`]: unsynchronized doubly linked list with O(1) unlink

mod list;
mod slist;

pub use list::{DList, EntryKey, Iter};
pub use slist::{SLIST_CAPACITY, SList};
