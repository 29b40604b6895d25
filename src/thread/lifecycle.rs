//! Thread lifecycle flags
//!
//! A thread object carries four one-way flags. `started` and `exited` are
//! each set exactly once; `detached` is set when the handle is closed while
//! the thread runs; `joined` once the native thread has been reaped. What
//! happens at exit and at close is read from an explicit table over all
//! sixteen combinations rather than derived from drop order.
//!
//! ```text
//!   Created ──start──► Running ──exit──► Exited ──close/join──► Reaped
//!      │                  │
//!      │ close            │ close: detach, self-teardown at exit
//!      ▼                  ▼
//!   torn down         (Running, detached) ──exit──► Reaped
//! ```

/// Coarse lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ThreadPhase {
    /// Not yet spawned (created suspended, or closed before start)
    Created,
    Running,
    /// Exit recorded, native thread not yet reaped
    Exited,
    /// Joined, or detached and torn down by the thread itself
    Reaped,
    /// Combination no transition sequence produces
    Invalid,
}

/// What the exit path does after recording the exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitAction {
    /// Leave teardown to close or join
    Retain,
    /// Nobody will join: the thread tears itself down
    SelfTeardown,
}

/// What closing the handle does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CloseAction {
    /// Still running: detach and let the exit path tear down
    Detach,
    Teardown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct LifecycleFlags {
    pub(crate) started: bool,
    pub(crate) exited: bool,
    pub(crate) detached: bool,
    pub(crate) joined: bool,
}

#[derive(Debug, Clone, Copy)]
struct Row {
    phase: ThreadPhase,
    on_exit: ExitAction,
    on_close: CloseAction,
}

const fn row(phase: ThreadPhase, on_exit: ExitAction, on_close: CloseAction) -> Row {
    Row {
        phase,
        on_exit,
        on_close,
    }
}

use CloseAction::{Detach, Teardown};
use ExitAction::{Retain, SelfTeardown};
use ThreadPhase::{Created, Exited, Invalid, Reaped, Running};

/// Indexed by `started << 3 | exited << 2 | detached << 1 | joined`
#[rustfmt::skip]
const TRUTH_TABLE: [Row; 16] = [
    // started exited detached joined
    /* 0 0 0 0 */ row(Created, SelfTeardown, Teardown),
    /* 0 0 0 1 */ row(Invalid, SelfTeardown, Teardown),
    /* 0 0 1 0 */ row(Created, SelfTeardown, Teardown),
    /* 0 0 1 1 */ row(Invalid, SelfTeardown, Teardown),
    /* 0 1 0 0 */ row(Exited,  SelfTeardown, Teardown), // terminated before start
    /* 0 1 0 1 */ row(Invalid, SelfTeardown, Teardown),
    /* 0 1 1 0 */ row(Exited,  SelfTeardown, Teardown),
    /* 0 1 1 1 */ row(Invalid, SelfTeardown, Teardown),
    /* 1 0 0 0 */ row(Running, Retain,       Detach),
    /* 1 0 0 1 */ row(Invalid, Retain,       Detach),
    /* 1 0 1 0 */ row(Running, SelfTeardown, Teardown),
    /* 1 0 1 1 */ row(Invalid, SelfTeardown, Teardown),
    /* 1 1 0 0 */ row(Exited,  Retain,       Teardown),
    /* 1 1 0 1 */ row(Reaped,  Retain,       Teardown),
    /* 1 1 1 0 */ row(Reaped,  SelfTeardown, Teardown),
    /* 1 1 1 1 */ row(Invalid, SelfTeardown, Teardown),
];

impl LifecycleFlags {
    fn bits(self) -> usize {
        (self.started as usize) << 3
            | (self.exited as usize) << 2
            | (self.detached as usize) << 1
            | self.joined as usize
    }

    fn row(self) -> Row {
        TRUTH_TABLE[self.bits()]
    }

    pub(crate) fn phase(self) -> ThreadPhase {
        self.row().phase
    }

    pub(crate) fn on_exit(self) -> ExitAction {
        self.row().on_exit
    }

    pub(crate) fn on_close(self) -> CloseAction {
        self.row().on_close
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_bits(bits: usize) -> LifecycleFlags {
        LifecycleFlags {
            started: bits & 8 != 0,
            exited: bits & 4 != 0,
            detached: bits & 2 != 0,
            joined: bits & 1 != 0,
        }
    }

    #[test]
    fn test_bits_roundtrip() {
        for bits in 0..16 {
            assert_eq!(from_bits(bits).bits(), bits);
        }
    }

    #[test]
    fn test_exit_tears_down_iff_detached_or_never_started() {
        for bits in 0..16 {
            let f = from_bits(bits);
            let expected = if f.detached || !f.started {
                ExitAction::SelfTeardown
            } else {
                ExitAction::Retain
            };
            assert_eq!(f.on_exit(), expected, "flags {:?}", f);
        }
    }

    #[test]
    fn test_close_detaches_only_running_attached_threads() {
        for bits in 0..16 {
            let f = from_bits(bits);
            let expected = if f.started && !f.exited && !f.detached {
                CloseAction::Detach
            } else {
                CloseAction::Teardown
            };
            assert_eq!(f.on_close(), expected, "flags {:?}", f);
        }
    }

    #[test]
    fn test_impossible_combinations_are_invalid() {
        for bits in 0..16 {
            let f = from_bits(bits);
            let impossible = f.joined && (!f.started || !f.exited || f.detached);
            assert_eq!(f.phase() == ThreadPhase::Invalid, impossible, "flags {:?}", f);
        }
    }

    #[test]
    fn test_normal_sequences() {
        let mut f = LifecycleFlags::default();
        assert_eq!(f.phase(), ThreadPhase::Created);
        f.started = true;
        assert_eq!(f.phase(), ThreadPhase::Running);
        f.exited = true;
        assert_eq!(f.phase(), ThreadPhase::Exited);
        f.joined = true;
        assert_eq!(f.phase(), ThreadPhase::Reaped);

        let mut d = LifecycleFlags {
            started: true,
            ..Default::default()
        };
        assert_eq!(d.on_close(), CloseAction::Detach);
        d.detached = true;
        d.exited = true;
        assert_eq!(d.phase(), ThreadPhase::Reaped);
    }
}
