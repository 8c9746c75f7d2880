//! Flag store: a fixed-capacity array of 64-bit flags in shared memory.
//!
//! The array is allocated once per engine instance and zero-filled only by
//! the process that creates it. Every other process attaches and sees the
//! current contents. Slots are accessed with naturally atomic 64-bit loads
//! and stores; callers needing read-modify-write across processes bring
//! their own synchronization.
//!
//! What each slot means is up to the callers.

use crate::arena::{InitOutcome, Region, ShmArena};
use crate::error::ShmResult;
use collie_common::consts::REGION_FLAGS;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// One opaque flag slot.
pub type Flag = u64;

/// Handle to the shared flag array.
#[derive(Debug, Clone)]
pub struct FlagStore {
    region: Region,
    len: usize,
}

// SAFETY: slots are only accessed as `AtomicU64`; the region keeps the
// mapping alive.
unsafe impl Send for FlagStore {}
unsafe impl Sync for FlagStore {}

impl FlagStore {
    /// Bytes required for `n` flags.
    pub const fn size(n: usize) -> usize {
        n * core::mem::size_of::<Flag>()
    }

    /// Create or attach to the flag array with capacity `n`.
    ///
    /// Idempotent across the engine instance: only the call that creates
    /// the region zero-fills it. The init lock is held for the lookup and
    /// the fill.
    pub fn initialize(arena: &ShmArena, n: usize) -> ShmResult<(Self, InitOutcome)> {
        let size = crate::sizing::mul_size(n, core::mem::size_of::<Flag>())?;

        let guard = arena.lock_init()?;
        let (region, outcome) = guard.init_region(REGION_FLAGS, size)?;
        if outcome.is_created() {
            region.zero();
        }
        drop(guard);

        debug!("Flag store {} with {} slots", outcome, n);
        Ok((Self { region, len: n }, outcome))
    }

    fn slots(&self) -> &[AtomicU64] {
        let ptr: NonNull<AtomicU64> = self.region.as_ptr().cast();
        // SAFETY: the region holds `len` u64 slots, is 64-byte aligned and
        // lives as long as `self.region`.
        unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.len) }
    }

    /// Number of slots (`N`).
    pub fn capacity(&self) -> usize {
        self.len
    }

    /// Read slot `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id >= capacity()`. Callers validate ids.
    pub fn get(&self, id: usize) -> Flag {
        self.slots()[id].load(Ordering::Relaxed)
    }

    /// Write slot `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id >= capacity()`. Callers validate ids.
    pub fn set(&self, id: usize, value: Flag) {
        self.slots()[id].store(value, Ordering::Relaxed);
    }

    /// Read slot `id`, or `None` when out of range.
    pub fn try_get(&self, id: usize) -> Option<Flag> {
        self.slots().get(id).map(|slot| slot.load(Ordering::Relaxed))
    }

    /// Write slot `id`. Returns `false` when out of range.
    pub fn try_set(&self, id: usize, value: Flag) -> bool {
        match self.slots().get(id) {
            Some(slot) => {
                slot.store(value, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Copy of every slot.
    pub fn snapshot(&self) -> Vec<Flag> {
        self.slots()
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect()
    }
}
