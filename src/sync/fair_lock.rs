/*!
 * Fair Lock
 *
 * A ticket lock guaranteeing FIFO acquisition order, which a naked mutex
 * does not provide under contention. `acquire` reads-and-increments a
 * tail counter then waits until the head counter equals its ticket;
 * `release` (on guard drop) increments the head counter and broadcasts.
 *
 * Acquirers submitted in order a1..an are served in that order — no
 * acquirer can be starved by a later one arriving while it waits.
 */

use parking_lot::{Condvar, Mutex};

/// A ticket-ordered mutex over `T`.
pub struct FairLock<T> {
    data: Mutex<T>,
    head: Mutex<u64>,
    tail: Mutex<u64>,
    served: Condvar,
}

impl<T> FairLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            data: Mutex::new(value),
            head: Mutex::new(0),
            tail: Mutex::new(0),
            served: Condvar::new(),
        }
    }

    /// Take a ticket and block until it is this caller's turn, then
    /// return an RAII guard holding both the ticket (for release) and
    /// the underlying data lock.
    pub fn acquire(&self) -> FairLockGuard<'_, T> {
        let ticket = {
            let mut tail = self.tail.lock();
            let t = *tail;
            *tail = tail.wrapping_add(1);
            t
        };

        let mut head = self.head.lock();
        while *head != ticket {
            self.served.wait(&mut head);
        }
        drop(head);

        // Ticket granted: safe to take the data lock now. Because tickets
        // are served strictly in order and only the current ticket-holder
        // ever holds `data`, this can't deadlock against another holder.
        let data = self.data.lock();

        FairLockGuard {
            lock: self,
            ticket,
            data: Some(data),
        }
    }

    /// Ticket currently being served, for tests/observability.
    pub fn head(&self) -> u64 {
        *self.head.lock()
    }
}

/// RAII guard returned by [`FairLock::acquire`]. Releasing (via `Drop`)
/// advances the head ticket and wakes every waiter so the next in line
/// can re-check its ticket.
pub struct FairLockGuard<'a, T> {
    lock: &'a FairLock<T>,
    ticket: u64,
    data: Option<parking_lot::MutexGuard<'a, T>>,
}

impl<'a, T> std::ops::Deref for FairLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        self.data.as_ref().expect("guard data taken before drop")
    }
}

impl<'a, T> std::ops::DerefMut for FairLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.data.as_mut().expect("guard data taken before drop")
    }
}

impl<'a, T> Drop for FairLockGuard<'a, T> {
    fn drop(&mut self) {
        // Drop the data lock before releasing the ticket so the next
        // acquirer's data lock acquisition never races a still-held lock.
        self.data = None;
        let mut head = self.lock.head.lock();
        debug_assert_eq!(*head, self.ticket, "fair lock released out of order");
        *head = head.wrapping_add(1);
        self.lock.served.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn serves_acquirers_in_arrival_order() {
        let lock = Arc::new(FairLock::new(Vec::<u32>::new()));
        let first = lock.acquire();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..4u32 {
            let lock = Arc::clone(&lock);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                // Stagger submission so tickets are taken in order 0..4.
                thread::sleep(Duration::from_millis(5 * i as u64));
                let _g = lock.acquire();
                order.lock().push(i);
            }));
        }

        // Give every thread time to block on its ticket before releasing.
        thread::sleep(Duration::from_millis(50));
        drop(first);

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn mutual_exclusion_holds() {
        let lock = Arc::new(FairLock::new(0u64));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    let mut g = lock.acquire();
                    *g += 1;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.acquire(), 8000);
    }
}
