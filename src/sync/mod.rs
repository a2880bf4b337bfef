/*!
 * Synchronization Primitives
 *
 * Two small primitives the generic processor runtime is built over:
 * a ticket-ordered fair lock and an interruptible, monotonic-clock
 * sleep. Both are thin wrappers over `parking_lot::{Mutex, Condvar}`,
 * the same condvar-based wait strategy `core/sync/condvar.rs` falls back
 * to on every platform.
 */

pub mod fair_lock;
pub mod sleep;

pub use fair_lock::{FairLock, FairLockGuard};
pub use sleep::{InterruptibleSleep, SleepOutcome};
