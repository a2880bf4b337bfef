/*!
 * Bounded FIFO
 *
 * A circular buffer of `slots_max` element slots with blocking and
 * non-blocking modes, optional timeouts, and an optional process-shared
 * variant. `fifo::queue::Fifo<T>` is the in-process generic queue used
 * for processor input/output; `fifo::shared::SharedFifo` is the
 * byte-only, `shm_open`-backed variant for cross-process use.
 *
 * Built the way `ipc/queue` is: a `parking_lot::Mutex`-protected state
 * struct, `log` for structural transitions, and explicit status values
 * rather than panics, generalized here to a closed-form FIFO contract
 * (push/push_dup/pull/show/set_blocking/empty/level/traverse).
 */

pub mod queue;
// `pthread_condattr_setclock(CLOCK_MONOTONIC)` (required so the shared
// FIFO's timed wait is immune to wall-clock changes, same as the local
// `Fifo`'s use of `Instant`) is a glibc/Linux extension, not portable
// POSIX; restricted to Linux rather than all of `cfg(unix)`.
#[cfg(target_os = "linux")]
pub mod shared;

pub use queue::{Fifo, FifoStats};
#[cfg(target_os = "linux")]
pub use shared::SharedFifo;

use crate::core::Status;

/// Maximum payload size accepted by a process-shared FIFO chunk, or the
/// advisory size recorded for a local FIFO element. Elements must
/// implement this to give the FIFO's byte-level accounting
/// (`buf_level`) something to sum.
pub trait FifoElement {
    fn byte_size(&self) -> usize;
}

impl FifoElement for Vec<u8> {
    fn byte_size(&self) -> usize {
        self.len()
    }
}

/// Flags accepted by `Fifo::open`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    pub non_blocking: bool,
}

/// Convert a FIFO-local error condition into the shared `Status` enum:
/// contention/deadlines become `TryAgain`/`TimedOut`; shutdown becomes
/// `EndOfFile`.
pub(crate) fn overflow_status() -> Status {
    Status::NoMemory("fifo full".into())
}

pub(crate) fn underflow_status() -> Status {
    Status::TryAgain
}
