//! Wakeable wait-object living in shared memory.
//!
//! A latch is a boolean that one owning process sleeps on and any process
//! may set. [`Latch::set`] is async-signal-safe (an atomic swap plus a futex
//! wake), so signal handlers use it to cut a wait short.
//!
//! The owner follows the reset → check work → wait pattern: reset first,
//! then look for work, then wait. A set that races with the work check is
//! never lost because `wait` returns at once when the latch is already set.

use crate::platform::{futex_wait, futex_wake};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Why [`Latch::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitEvent {
    /// The latch was set.
    Set,
    /// The timeout elapsed first.
    Timeout,
}

/// Cross-process latch. `#[repr(C)]`, valid when zeroed.
#[derive(Debug)]
#[repr(C)]
pub struct Latch {
    is_set: AtomicU32,
    owner_pid: AtomicU32,
}

impl Latch {
    /// An unset, unowned latch.
    pub const fn new() -> Self {
        Self {
            is_set: AtomicU32::new(0),
            owner_pid: AtomicU32::new(0),
        }
    }

    /// Claim the latch for process `pid`. Returns the previous owner, if any.
    pub fn own(&self, pid: u32) -> Option<u32> {
        match self.owner_pid.swap(pid, Ordering::AcqRel) {
            0 => None,
            previous => Some(previous),
        }
    }

    /// Release ownership.
    pub fn disown(&self) {
        self.owner_pid.store(0, Ordering::Release);
    }

    /// Owning process, if any.
    pub fn owner(&self) -> Option<u32> {
        match self.owner_pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Whether the latch is currently set.
    pub fn is_set(&self) -> bool {
        self.is_set.load(Ordering::Acquire) != 0
    }

    /// Set the latch and wake the owner. Async-signal-safe.
    pub fn set(&self) {
        if self.is_set.swap(1, Ordering::AcqRel) != 0 {
            return;
        }
        futex_wake(&self.is_set);
    }

    /// Clear the latch. Only the owner calls this.
    pub fn reset(&self) {
        self.is_set.store(0, Ordering::SeqCst);
    }

    /// Block until the latch is set or `timeout` elapses.
    ///
    /// Returns immediately with [`WaitEvent::Set`] if the latch is already
    /// set. The set state is left in place; callers reset it.
    pub fn wait(&self, timeout: Duration) -> WaitEvent {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_set() {
                return WaitEvent::Set;
            }
            let now = Instant::now();
            if now >= deadline {
                return WaitEvent::Timeout;
            }
            futex_wait(&self.is_set, 0, deadline - now);
        }
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_wait_times_out() {
        let latch = Latch::new();
        let start = Instant::now();
        assert_eq!(latch.wait(Duration::from_millis(30)), WaitEvent::Timeout);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_already_set_returns_immediately() {
        let latch = Latch::new();
        latch.set();
        let start = Instant::now();
        assert_eq!(latch.wait(Duration::from_secs(5)), WaitEvent::Set);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(latch.is_set());

        latch.reset();
        assert!(!latch.is_set());
    }

    #[test]
    fn test_set_from_other_thread_wakes_waiter() {
        let latch = Arc::new(Latch::new());
        let setter = Arc::clone(&latch);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            setter.set();
        });

        let start = Instant::now();
        assert_eq!(latch.wait(Duration::from_secs(10)), WaitEvent::Set);
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }

    #[test]
    fn test_ownership() {
        let latch = Latch::new();
        assert_eq!(latch.owner(), None);
        assert_eq!(latch.own(10), None);
        assert_eq!(latch.own(11), Some(10));
        assert_eq!(latch.owner(), Some(11));
        latch.disown();
        assert_eq!(latch.owner(), None);
    }

    #[test]
    fn test_zeroed_latch_is_unset() {
        // SAFETY: Latch is two AtomicU32; all-zero is the unset, unowned state.
        let latch: Latch = unsafe { core::mem::zeroed() };
        assert!(!latch.is_set());
        assert_eq!(latch.owner(), None);
    }
}
