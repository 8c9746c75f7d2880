//! Pending-interrupt inbox.
//!
//! Signal handlers post interrupts here and nothing else; the controller
//! drains the inbox at the top of every iteration. One bit per kind, so
//! repeated posts of the same kind coalesce.

use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, Ordering};

bitflags! {
    /// Interrupt kinds the controller reacts to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Interrupt: u32 {
        /// Absorb pending process barriers.
        const BARRIER       = 0x0001;
        /// Re-read the configuration file.
        const CONFIG_RELOAD = 0x0002;
        /// Leave the loop and exit cleanly.
        const SHUTDOWN      = 0x0004;
        /// Exit immediately, bypassing recovery.
        const CRASH_EXIT    = 0x0008;
    }
}

/// Lock-free inbox of pending interrupts.
#[derive(Debug, Default)]
pub struct Inbox {
    pending: AtomicU32,
    holdoff: AtomicU32,
}

impl Inbox {
    /// Empty inbox.
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
            holdoff: AtomicU32::new(0),
        }
    }

    /// Post `kinds`. Async-signal-safe.
    pub fn post(&self, kinds: Interrupt) {
        self.pending.fetch_or(kinds.bits(), Ordering::AcqRel);
    }

    /// Pending kinds, without consuming them.
    pub fn pending(&self) -> Interrupt {
        Interrupt::from_bits_truncate(self.pending.load(Ordering::Acquire))
    }

    /// Take every pending kind.
    ///
    /// Returns an empty set while interrupts are held off; posts made in the
    /// meantime stay queued.
    pub fn drain(&self) -> Interrupt {
        if self.is_held() {
            return Interrupt::empty();
        }
        Interrupt::from_bits_truncate(self.pending.swap(0, Ordering::AcqRel))
    }

    /// Stop draining until the returned guard drops. Nests.
    pub fn hold(&self) -> HoldGuard<'_> {
        self.holdoff.fetch_add(1, Ordering::AcqRel);
        HoldGuard { inbox: self }
    }

    /// Whether a [`HoldGuard`] is alive.
    pub fn is_held(&self) -> bool {
        self.holdoff.load(Ordering::Acquire) != 0
    }
}

/// Holds interrupts off while alive.
#[derive(Debug)]
pub struct HoldGuard<'a> {
    inbox: &'a Inbox,
}

impl Drop for HoldGuard<'_> {
    fn drop(&mut self) {
        self.inbox.holdoff.fetch_sub(1, Ordering::AcqRel);
    }
}
