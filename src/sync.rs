// SPDX-License-Identifier: MPL-2.0

//! Small synchronization primitives shared by the worker threads

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// One-shot startup latch.
///
/// A worker thread calls [`ReadyLatch::set_ready`] once its message loop is
/// live; any number of callers may block in [`ReadyLatch::wait`] until then.
#[derive(Default)]
pub struct ReadyLatch {
    ready: Mutex<bool>,
    cond: Condvar,
}

impl ReadyLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the latch ready and wake every waiter.
    pub fn set_ready(&self) {
        let mut ready = self.ready.lock().unwrap();
        *ready = true;
        self.cond.notify_all();
    }

    /// Block until the latch is ready.
    pub fn wait(&self) {
        let mut ready = self.ready.lock().unwrap();
        while !*ready {
            ready = self.cond.wait(ready).unwrap();
        }
    }

    /// Block until the latch is ready or the timeout elapses. Returns
    /// whether the latch was ready.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut ready = self.ready.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        while !*ready {
            let now = std::time::Instant::now();
            let Some(remaining) = deadline.checked_duration_since(now) else {
                return false;
            };
            let (guard, result) = self.cond.wait_timeout(ready, remaining).unwrap();
            ready = guard;
            if result.timed_out() && !*ready {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_latch_releases_waiter() {
        let latch = Arc::new(ReadyLatch::new());
        let latch_clone = Arc::clone(&latch);

        let waiter = thread::spawn(move || {
            latch_clone.wait();
        });

        thread::sleep(Duration::from_millis(20));
        latch.set_ready();
        waiter.join().unwrap();
    }

    #[test]
    fn test_latch_is_sticky() {
        let latch = ReadyLatch::new();
        latch.set_ready();
        // A late waiter must not block
        latch.wait();
        assert!(latch.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_wait_timeout_expires() {
        let latch = ReadyLatch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_many_waiters() {
        let latch = Arc::new(ReadyLatch::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let latch = Arc::clone(&latch);
                thread::spawn(move || latch.wait())
            })
            .collect();
        latch.set_ready();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
