//! Synchronization objects
//!
//! Each kind registers a static operation table with the handle layer and
//! exposes typed create/signal operations. Waiting goes through the
//! generic [`wait_single`](crate::handle::wait_single) and
//! [`wait_multi`](crate::handle::wait_multi).

pub(crate) mod event;
pub(crate) mod mutex;
pub(crate) mod semaphore;
pub(crate) mod timer;

pub use event::{create_event, reset_event, set_event};
pub use mutex::{create_mutex, release_mutex};
pub use semaphore::{create_semaphore, release_semaphore};
pub use timer::{cancel_waitable_timer, create_waitable_timer, set_waitable_timer};

use crate::handle::INFINITE;
use std::thread;
use std::time::Duration;

/// Give up the rest of the time slice
pub fn switch_to_thread() {
    thread::yield_now();
}

/// Block the calling thread for `ms` milliseconds. Zero yields.
/// [`INFINITE`] parks the thread for good.
pub fn sleep(ms: u32) {
    match ms {
        0 => thread::yield_now(),
        INFINITE => loop {
            thread::park();
        },
        ms => thread::sleep(Duration::from_millis(ms as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_sleep_blocks_for_duration() {
        let start = Instant::now();
        sleep(15);
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_zero_sleep_and_switch_return() {
        let start = Instant::now();
        sleep(0);
        switch_to_thread();
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
