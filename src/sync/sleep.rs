/*!
 * Interruptible Sleep
 *
 * Wraps a mutex + condition variable. `sleep(duration)` returns
 * `TimedOut` after the requested duration elapses normally; `unblock`
 * sets an exit flag and broadcasts, causing any in-flight `sleep`
 * (including ones that start after `unblock` was called) to return
 * `Interrupted` immediately.
 *
 * Used by the worker loop's bounded backoff on `try_again`, and
 * available to callers that need a cancellable wait outside the
 * FIFO/fair-lock paths.
 */

use parking_lot::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    /// The requested duration elapsed.
    TimedOut,
    /// `unblock` was called before or during the sleep.
    Interrupted,
}

pub struct InterruptibleSleep {
    exit: Mutex<bool>,
    cond: Condvar,
}

impl InterruptibleSleep {
    pub fn new() -> Self {
        Self {
            exit: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Sleep for `duration`, or return early with `Interrupted` if
    /// `unblock` has been (or is) called.
    pub fn sleep(&self, duration: Duration) -> SleepOutcome {
        let mut exit = self.exit.lock();
        if *exit {
            return SleepOutcome::Interrupted;
        }
        let result = self.cond.wait_for(&mut exit, duration);
        if *exit {
            SleepOutcome::Interrupted
        } else if result.timed_out() {
            SleepOutcome::TimedOut
        } else {
            // Spurious wake with no exit flag set: treat the remaining
            // time as elapsed rather than looping, matching the
            // best-effort nature of the generic worker backoff.
            SleepOutcome::TimedOut
        }
    }

    /// Unblock any sleeper, now and in the future, until reset.
    pub fn unblock(&self) {
        *self.exit.lock() = true;
        self.cond.notify_all();
    }

    /// Clear the exit flag so the sleep can be reused.
    pub fn reset(&self) {
        *self.exit.lock() = false;
    }
}

impl Default for InterruptibleSleep {
    fn default() -> Self {
        Self::new()
    }
}
