/*!
 * Local Bounded FIFO
 *
 * In-process circular buffer of `slots_max` slots. Strict FIFO: `push`
 * and `pull` are totally ordered with each other under the internal
 * mutex. Waiters on either condition variable are released via
 * broadcast — any stronger ordering guarantee across waiters is
 * provided by the caller wrapping this FIFO in a
 * [`crate::sync::FairLock`], exactly as `ProcessorInstance` does for its
 * input/output sides.
 */

use super::FifoElement;
use crate::core::{MpResult, Status};
use log::debug;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How long `pull`/`show` should wait for an element to arrive.
#[derive(Debug, Clone, Copy)]
pub enum Wait {
    /// Block until an element arrives or the FIFO is closed.
    Indefinite,
    /// Block at most `Duration`, returning `Status::TimedOut` if it
    /// elapses. Measured on a monotonic clock (`Instant`), so immune
    /// to wall-clock adjustments.
    Timeout(Duration),
}

struct Slot<T> {
    value: T,
    size: usize,
}

struct State<T> {
    slots: Vec<Option<Slot<T>>>,
    slots_used: usize,
    buf_level: usize,
    input_idx: usize,
    output_idx: usize,
}

impl<T> State<T> {
    fn new(slots_max: usize) -> Self {
        let mut slots = Vec::with_capacity(slots_max);
        slots.resize_with(slots_max, || None);
        Self {
            slots,
            slots_used: 0,
            buf_level: 0,
            input_idx: 0,
            output_idx: 0,
        }
    }

    fn slots_max(&self) -> usize {
        self.slots.len()
    }

    fn is_full(&self) -> bool {
        self.slots_used == self.slots_max()
    }

    fn is_empty(&self) -> bool {
        self.slots_used == 0
    }

    fn enqueue(&mut self, value: T, size: usize) {
        debug_assert!(!self.is_full());
        let idx = self.input_idx;
        self.slots[idx] = Some(Slot { value, size });
        self.input_idx = (self.input_idx + 1) % self.slots_max();
        self.slots_used += 1;
        self.buf_level += size;
    }

    fn dequeue(&mut self) -> Option<Slot<T>> {
        if self.is_empty() {
            return None;
        }
        let idx = self.output_idx;
        let slot = self.slots[idx].take();
        self.output_idx = (self.output_idx + 1) % self.slots_max();
        self.slots_used -= 1;
        if let Some(ref s) = slot {
            self.buf_level -= s.size;
        }
        slot
    }

    fn peek(&self) -> Option<&Slot<T>> {
        self.slots[self.output_idx].as_ref()
    }

    fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.slots_used = 0;
        self.buf_level = 0;
        self.input_idx = 0;
        self.output_idx = 0;
    }
}

/// Point-in-time snapshot of a FIFO's counters.
#[derive(Debug, Clone, Copy)]
pub struct FifoStats {
    pub slots_used: usize,
    pub slots_max: usize,
    pub buf_level: usize,
    pub input_idx: usize,
    pub output_idx: usize,
    pub closed: bool,
}

/// A bounded, in-process FIFO of `T`.
pub struct Fifo<T> {
    state: Mutex<State<T>>,
    /// Signaled when a slot frees up (a blocked `push` waits on this).
    get_signal: Condvar,
    /// Signaled when an element is enqueued (a blocked `pull` waits on
    /// this).
    put_signal: Condvar,
    non_blocking: AtomicBool,
    closed: AtomicBool,
}

impl<T: FifoElement> Fifo<T> {
    /// Open a FIFO with the given capacity and initial flags.
    pub fn open(slots_max: usize, flags: super::OpenFlags) -> Self {
        assert!(slots_max > 0, "slots_max must be positive");
        Self {
            state: Mutex::new(State::new(slots_max)),
            get_signal: Condvar::new(),
            put_signal: Condvar::new(),
            non_blocking: AtomicBool::new(flags.non_blocking),
            closed: AtomicBool::new(false),
        }
    }

    /// Set the exit flag, broadcast both signals so blocked callers
    /// unwind with `EndOfFile`, and release every queued element.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.get_signal.notify_all();
        self.put_signal.notify_all();
        self.state.lock().clear();
        debug!("fifo closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Toggle the non-blocking flag and wake any currently-blocked
    /// caller so it re-evaluates under the new mode.
    pub fn set_blocking(&self, blocking: bool) {
        self.non_blocking.store(!blocking, Ordering::SeqCst);
        self.get_signal.notify_all();
        self.put_signal.notify_all();
    }

    pub fn is_non_blocking(&self) -> bool {
        self.non_blocking.load(Ordering::SeqCst)
    }

    /// Push an element, taking ownership. Fails with `NoMemory` in
    /// non-blocking mode when full; otherwise waits until a slot frees
    /// or the FIFO is closed.
    pub fn push(&self, elem: T) -> MpResult<()> {
        if self.is_closed() {
            return Err(Status::EndOfFile);
        }
        let size = elem.byte_size();
        let mut state = self.state.lock();

        if self.non_blocking.load(Ordering::SeqCst) {
            if state.is_full() {
                return Err(super::overflow_status());
            }
        } else {
            while state.is_full() {
                if self.is_closed() {
                    return Err(Status::EndOfFile);
                }
                self.get_signal.wait(&mut state);
                if self.non_blocking.load(Ordering::SeqCst) {
                    if state.is_full() {
                        return Err(super::overflow_status());
                    }
                    break;
                }
            }
        }

        if self.is_closed() {
            return Err(Status::EndOfFile);
        }

        state.enqueue(elem, size);
        self.put_signal.notify_all();
        Ok(())
    }

    /// Dequeue at `output_idx`, waiting according to `wait`.
    pub fn pull(&self, wait: Wait) -> MpResult<T> {
        let mut state = self.state.lock();
        self.wait_for_element(&mut state, wait)?;
        Ok(state.dequeue().expect("checked non-empty").value)
    }

    /// Like `pull` but does not remove the element; used for peeking.
    /// Requires `T: Clone` since the element stays queued.
    pub fn show(&self, wait: Wait) -> MpResult<T>
    where
        T: Clone,
    {
        let mut state = self.state.lock();
        self.wait_for_element(&mut state, wait)?;
        Ok(state.peek().expect("checked non-empty").value.clone())
    }

    /// Block `state`'s guard until an element is available, honoring
    /// non-blocking mode and the timeout, or return the terminating
    /// status (`EndOfFile`/`TryAgain`/`TimedOut`).
    fn wait_for_element(&self, state: &mut parking_lot::MutexGuard<'_, State<T>>, wait: Wait) -> MpResult<()> {
        let deadline = match wait {
            Wait::Timeout(d) => Some(Instant::now() + d),
            Wait::Indefinite => None,
        };

        loop {
            if !state.is_empty() {
                return Ok(());
            }

            if self.is_closed() {
                return Err(Status::EndOfFile);
            }

            if self.non_blocking.load(Ordering::SeqCst) {
                return Err(super::underflow_status());
            }

            match deadline {
                None => {
                    self.put_signal.wait(state);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Status::TimedOut);
                    }
                    let timed_out = self.put_signal.wait_for(state, deadline - now).timed_out();
                    if timed_out && state.is_empty() && !self.is_closed() {
                        return Err(Status::TimedOut);
                    }
                }
            }
        }
    }

    /// Release every queued element and reset counters/indices.
    pub fn empty(&self) {
        self.state.lock().clear();
        self.get_signal.notify_all();
    }

    /// Current byte level of all enqueued elements.
    pub fn level(&self) -> usize {
        self.state.lock().buf_level
    }

    pub fn stats(&self) -> FifoStats {
        let state = self.state.lock();
        FifoStats {
            slots_used: state.slots_used,
            slots_max: state.slots_max(),
            buf_level: state.buf_level,
            input_idx: state.input_idx,
            output_idx: state.output_idx,
            closed: self.is_closed(),
        }
    }

    /// Walk from the most recently enqueued element backwards, up to
    /// `n` elements (or all, if `n` is `None`), calling `visitor` for
    /// each. `visitor` returning `false` stops the walk early.
    pub fn traverse(&self, n: Option<usize>, mut visitor: impl FnMut(&T) -> bool) {
        let state = self.state.lock();
        if state.is_empty() {
            return;
        }
        let limit = n.unwrap_or(state.slots_used).min(state.slots_used);
        let slots_max = state.slots_max();
        // Most recently enqueued is the slot just before input_idx.
        let mut idx = (state.input_idx + slots_max - 1) % slots_max;
        for _ in 0..limit {
            if let Some(slot) = state.slots[idx].as_ref() {
                if !visitor(&slot.value) {
                    break;
                }
            }
            idx = (idx + slots_max - 1) % slots_max;
        }
    }
}

impl<T: FifoElement + Clone> Fifo<T> {
    /// Duplicate `elem` (via `Clone`) and push the copy. The caller
    /// retains ownership of the original.
    pub fn push_dup(&self, elem: &T) -> MpResult<()> {
        self.push(elem.clone())
    }
}
