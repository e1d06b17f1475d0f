//! Query admission control.
//!
//! A counting semaphore caps how many threads may be inside the match
//! engine at once. It is an explicit value owned by the server, not
//! process-global state, so the engine stays embeddable and testable.
//! Permits are RAII guards: release happens on drop, which covers the
//! success path, client disconnects, and panic unwinding alike.

use std::sync::{Condvar, Mutex, MutexGuard};

pub struct QueryLimiter {
    capacity: usize,
    in_use: Mutex<usize>,
    available: Condvar,
}

impl QueryLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            in_use: Mutex::new(0),
            available: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Block until a permit is free, then take it
    pub fn acquire(&self) -> QueryPermit<'_> {
        let mut in_use = self.lock();
        while *in_use >= self.capacity {
            in_use = match self.available.wait(in_use) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *in_use += 1;
        QueryPermit { limiter: self }
    }

    /// Permits currently held
    pub fn in_use(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        match self.in_use.lock() {
            Ok(guard) => guard,
            // A panicking query thread must not wedge admission for the
            // rest of the server.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct QueryPermit<'a> {
    limiter: &'a QueryLimiter,
}

impl Drop for QueryPermit<'_> {
    fn drop(&mut self) {
        let mut in_use = self.limiter.lock();
        *in_use -= 1;
        self.limiter.available.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_acquire_release() {
        let limiter = QueryLimiter::new(2);
        let a = limiter.acquire();
        let b = limiter.acquire();
        assert_eq!(limiter.in_use(), 2);
        drop(a);
        assert_eq!(limiter.in_use(), 1);
        drop(b);
        assert_eq!(limiter.in_use(), 0);
    }

    #[test]
    fn test_released_on_panic() {
        let limiter = Arc::new(QueryLimiter::new(1));
        let held = Arc::clone(&limiter);
        let result = thread::spawn(move || {
            let _permit = held.acquire();
            panic!("query thread died");
        })
        .join();
        assert!(result.is_err());
        // The permit must have been returned during unwinding.
        assert_eq!(limiter.in_use(), 0);
        let _permit = limiter.acquire();
    }

    #[test]
    fn test_capacity_is_never_exceeded() {
        let limiter = Arc::new(QueryLimiter::new(2));
        let peak = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let peak = Arc::clone(&peak);
            let running = Arc::clone(&running);
            handles.push(thread::spawn(move || {
                let _permit = limiter.acquire();
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
