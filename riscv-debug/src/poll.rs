//! Bounded busy-polling.
//!
//! Every wait on a hardware busy bit runs against a [`PollBudget`], which combines an
//! injected [`Clock`] with a cooperative [`AbortSignal`]. A raised abort signal or an
//! expired deadline only stops the waiting; a command the hardware already accepted
//! keeps running.

use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::RiscvError;

/// A monotonic time source.
pub trait Clock: fmt::Debug {
    /// Time elapsed since an arbitrary, fixed origin.
    fn now(&self) -> Duration;
}

/// [`Clock`] backed by [`std::time::Instant`].
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose origin is the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Flag that an external party (e.g. a host interrupt handler) raises to stop long waits.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    /// Create a new, lowered signal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that pending waits stop.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Lower the signal again.
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    /// Whether the signal is raised.
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The time a single busy-poll loop is allowed to spend.
#[derive(Debug)]
pub(crate) struct PollBudget {
    clock: Rc<dyn Clock>,
    abort: AbortSignal,
    deadline: Duration,
}

impl PollBudget {
    pub(crate) fn new(clock: Rc<dyn Clock>, abort: AbortSignal, timeout: Duration) -> Self {
        let deadline = clock.now() + timeout;
        Self {
            clock,
            abort,
            deadline,
        }
    }

    /// Called once per poll iteration, after the hardware reported busy.
    pub(crate) fn check(&self) -> Result<(), RiscvError> {
        if self.abort.is_raised() {
            return Err(RiscvError::Aborted);
        }

        if self.clock.now() > self.deadline {
            return Err(RiscvError::Timeout);
        }

        Ok(())
    }
}

/// A [`Clock`] that advances by a fixed step on every query.
///
/// Lets tests model slow or permanently busy hardware without real delays.
#[cfg(any(test, feature = "test"))]
#[derive(Debug)]
pub struct SteppingClock {
    now: std::cell::Cell<Duration>,
    step: Duration,
}

#[cfg(any(test, feature = "test"))]
impl SteppingClock {
    /// Create a clock starting at zero that advances by `step` each time it is read.
    pub fn new(step: Duration) -> Self {
        Self {
            now: std::cell::Cell::new(Duration::ZERO),
            step,
        }
    }
}

#[cfg(any(test, feature = "test"))]
impl Clock for SteppingClock {
    fn now(&self) -> Duration {
        let now = self.now.get();
        self.now.set(now + self.step);
        now
    }
}
