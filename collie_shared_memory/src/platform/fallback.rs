//! Polling stand-in for futexes on non-Linux unix targets.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Sleep while `*word == expected`, at most `timeout`, in short slices.
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Duration) {
    if word.load(Ordering::Acquire) == expected {
        std::thread::sleep(timeout.min(POLL_INTERVAL));
    }
}

/// No-op: pollers observe the word on their next slice.
pub fn futex_wake(_word: &AtomicU32) {}
