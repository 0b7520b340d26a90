use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::context::Context;

// Cancellation does not notify the condvar, so waiters poll at this period.
const POLL: Duration = Duration::from_millis(10);

/// Fixed-capacity token pool.
#[derive(Debug)]
pub struct Semaphore {
    capacity: usize,
    available: Mutex<usize>,
    cond: Condvar,
}

impl Semaphore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            available: Mutex::new(capacity),
            cond: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        *self.available.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take a token, waiting until one is free, `ctx` is done or `timeout`
    /// elapses. Returns whether a token was taken.
    pub fn acquire(&self, ctx: &Context, timeout: Option<Duration>) -> bool {
        let deadline = match (ctx.deadline(), timeout.map(|t| Instant::now() + t)) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *available > 0 {
                *available -= 1;
                return true;
            }
            if ctx.is_done() {
                return false;
            }
            let wait = match deadline {
                Some(d) => {
                    let left = d.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        return false;
                    }
                    left.min(POLL)
                }
                None => POLL,
            };
            available = self
                .cond
                .wait_timeout(available, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn try_acquire(&self) -> bool {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        if *available == 0 {
            return false;
        }
        *available -= 1;
        true
    }

    /// Return a token.
    ///
    /// # Panics
    ///
    /// When more tokens are released than were acquired.
    pub fn release(&self) {
        let mut available = self.available.lock().unwrap_or_else(PoisonError::into_inner);
        assert!(
            *available < self.capacity,
            "semaphore released more tokens than it holds"
        );
        *available += 1;
        self.cond.notify_one();
    }
}

/// A token that returns itself to its semaphore when dropped.
#[derive(Debug)]
pub(crate) struct Permit {
    semaphore: Arc<Semaphore>,
}

impl Permit {
    pub(crate) fn acquire(
        semaphore: &Arc<Semaphore>,
        ctx: &Context,
        timeout: Option<Duration>,
    ) -> Option<Permit> {
        semaphore.acquire(ctx, timeout).then(|| Permit {
            semaphore: Arc::clone(semaphore),
        })
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn acquire_and_release() {
        let sem = Semaphore::new(2);
        let ctx = Context::background();
        assert!(sem.acquire(&ctx, None));
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release();
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn times_out_when_exhausted() {
        let sem = Semaphore::new(1);
        let ctx = Context::background();
        assert!(sem.acquire(&ctx, None));
        assert!(!sem.acquire(&ctx, Some(Duration::from_millis(20))));
    }

    #[test]
    fn cancellation_stops_the_wait() {
        let sem = Arc::new(Semaphore::new(1));
        let ctx = Context::background();
        assert!(sem.acquire(&ctx, None));

        let waiter = {
            let sem = Arc::clone(&sem);
            let ctx = ctx.clone();
            thread::spawn(move || sem.acquire(&ctx, None))
        };
        thread::sleep(Duration::from_millis(20));
        ctx.canceller().cancel();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn release_wakes_a_waiter() {
        let sem = Arc::new(Semaphore::new(1));
        let ctx = Context::background();
        assert!(sem.acquire(&ctx, None));

        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.acquire(&Context::background(), Some(Duration::from_secs(5))))
        };
        thread::sleep(Duration::from_millis(20));
        sem.release();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn permit_releases_on_drop() {
        let sem = Arc::new(Semaphore::new(1));
        let permit = Permit::acquire(&sem, &Context::background(), None);
        assert!(permit.is_some());
        assert_eq!(sem.available(), 0);
        drop(permit);
        assert_eq!(sem.available(), 1);
    }

    #[test]
    #[should_panic(expected = "released more tokens")]
    fn over_release_panics() {
        Semaphore::new(1).release();
    }
}
