//! Countdown event
//!
//! A counter paired with a manual-reset event that is signaled exactly
//! while the counter is zero.

use crate::error::Result;
use crate::handle::Handle;
use crate::lock;
use crate::synch::{create_event, reset_event, set_event};
use std::sync::Mutex;

#[derive(Debug)]
struct Counts {
    current: u32,
    initial: u32,
}

#[derive(Debug)]
pub struct CountdownEvent {
    counts: Mutex<Counts>,
    event: Handle,
}

impl CountdownEvent {
    pub fn new(initial_count: u32) -> Result<Self> {
        Ok(CountdownEvent {
            counts: Mutex::new(Counts {
                current: initial_count,
                initial: initial_count,
            }),
            event: create_event(true, initial_count == 0)?,
        })
    }

    pub fn current_count(&self) -> u32 {
        lock(&self.counts).current
    }

    pub fn initial_count(&self) -> u32 {
        lock(&self.counts).initial
    }

    pub fn is_set(&self) -> bool {
        lock(&self.counts).current == 0
    }

    /// Manual-reset event signaled while the count is zero
    pub fn wait_handle(&self) -> Handle {
        self.event.clone()
    }

    /// Raise the count, un-signaling the event if it was set
    pub fn add_count(&self, count: u32) -> Result<()> {
        let mut counts = lock(&self.counts);
        let was_zero = counts.current == 0;
        counts.current = counts.current.saturating_add(count);
        if was_zero && counts.current > 0 {
            reset_event(&self.event)?;
        }
        Ok(())
    }

    /// Lower the count by `count`, saturating at zero
    ///
    /// Returns `true` if this call brought the count to zero and set the
    /// event.
    pub fn signal(&self, count: u32) -> Result<bool> {
        let mut counts = lock(&self.counts);
        if counts.current == 0 {
            return Ok(false);
        }
        counts.current = counts.current.saturating_sub(count);
        if counts.current == 0 {
            set_event(&self.event)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Start over with a new initial count
    pub fn reset(&self, count: u32) -> Result<()> {
        let mut counts = lock(&self.counts);
        counts.initial = count;
        counts.current = count;
        if count == 0 {
            set_event(&self.event)
        } else {
            reset_event(&self.event)
        }
    }
}
