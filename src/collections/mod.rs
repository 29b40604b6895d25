//! Thread-safe collections
//!
//! Every collection guards its state with one lock. The plain methods take
//! and drop the lock per call; `lock()` returns the guard so a caller can
//! compose several operations into one atomic sequence. Clones of a
//! collection share its storage.
//!
//! - [`Queue`]: growable circular FIFO with a "non-empty" event
//! - [`Stack`]: growable LIFO
//! - [`Dictionary`]: insertion-ordered key/value list
//! - [`LinkedList`]: doubly linked list with a built-in enumerator
//! - [`CountdownEvent`]: counter that signals at zero

mod countdown;
mod dictionary;
mod linked_list;
mod object;
mod queue;
mod stack;

pub use countdown::CountdownEvent;
pub use dictionary::{Dictionary, DictionaryGuard, DictionaryState};
pub use linked_list::{LinkedList, LinkedListGuard, LinkedListState};
pub use object::ObjectPolicy;
pub use queue::{Queue, QueueGuard, QueueState};
pub use stack::{Stack, StackGuard, StackState};
