//! Shared state of the controller: registration record and flag store.
//!
//! Contributes two regions to the engine segment:
//! - `"Collie Data"`: one [`RegistrationRecord`]
//! - `"Collie Flags"`: the [`FlagStore`] array
//!
//! Both are created by the first process that runs the bootstrap and
//! attached by everyone else, the controller included.

use collie_common::consts::{REGION_FLAGS, REGION_REGISTRATION};
use collie_shared_memory::platform::is_process_alive;
use collie_shared_memory::{
    Flag, FlagStore, InitOutcome, Latch, Region, ShmArena, ShmResult, ShmemSizing, add_size,
    mul_size,
};
use static_assertions::const_assert_eq;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Poll interval of [`RegistrationRecord::wait_for_barrier`].
const BARRIER_POLL: Duration = Duration::from_millis(5);

// ─── Registration Record ────────────────────────────────────────────

/// Process-shared record of the running controller.
///
/// Zero is the valid initial state: no controller, latch unset, no barrier
/// emitted.
#[derive(Debug)]
#[repr(C, align(64))]
pub struct RegistrationRecord {
    controller_pid: AtomicU32,
    latch: Latch,
    barrier_generation: AtomicU64,
    absorbed_generation: AtomicU64,
}

const_assert_eq!(core::mem::size_of::<RegistrationRecord>(), 64);

impl RegistrationRecord {
    /// Record `pid` as the running controller. Overwrites any stale entry.
    pub fn register(&self, pid: u32) {
        self.controller_pid.store(pid, Ordering::Release);
    }

    /// Pid of the last controller that registered, if any.
    pub fn controller_pid(&self) -> Option<u32> {
        match self.controller_pid.load(Ordering::Acquire) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// The controller's wakeable wait-object.
    pub fn latch(&self) -> &Latch {
        &self.latch
    }

    /// Wake the controller early.
    ///
    /// Returns `false` when no controller has advertised the latch, or when
    /// the advertised owner is no longer alive.
    pub fn wake_controller(&self) -> bool {
        match self.latch.owner() {
            Some(pid) if is_process_alive(pid) => {
                self.latch.set();
                true
            }
            Some(pid) => {
                debug!("Latch owner {} is gone, not waking", pid);
                false
            }
            None => false,
        }
    }

    /// Ask the controller to absorb a new barrier. Returns its generation.
    pub fn emit_barrier(&self) -> u64 {
        let generation = self.barrier_generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.wake_controller();
        generation
    }

    /// Latest emitted barrier generation.
    pub fn barrier_generation(&self) -> u64 {
        self.barrier_generation.load(Ordering::Acquire)
    }

    /// Latest generation the controller has absorbed.
    pub fn absorbed_generation(&self) -> u64 {
        self.absorbed_generation.load(Ordering::Acquire)
    }

    /// Publish every barrier emitted so far as absorbed.
    ///
    /// Returns the newly absorbed generation, or `None` if nothing was
    /// pending.
    pub fn absorb_barriers(&self) -> Option<u64> {
        let emitted = self.barrier_generation();
        let previous = self.absorbed_generation.fetch_max(emitted, Ordering::AcqRel);
        (emitted > previous).then_some(emitted)
    }

    /// Block until the controller absorbs `generation`, at most `timeout`.
    pub fn wait_for_barrier(&self, generation: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.absorbed_generation() < generation {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(BARRIER_POLL);
        }
        true
    }
}

/// Handle to the registration record inside the mapped segment.
#[derive(Debug, Clone)]
pub struct Registration {
    region: Region,
}

// SAFETY: the record is made of atomics; the region keeps the mapping alive.
unsafe impl Send for Registration {}
unsafe impl Sync for Registration {}

impl Deref for Registration {
    type Target = RegistrationRecord;

    fn deref(&self) -> &RegistrationRecord {
        // SAFETY: the region is exactly one cache-line aligned record and
        // every bit pattern reachable from zero is valid for atomics.
        unsafe { &*self.region.as_ptr().cast::<RegistrationRecord>().as_ptr() }
    }
}

impl Registration {
    /// Create or attach to the record. Zeroes it on creation only.
    pub fn initialize(arena: &ShmArena) -> ShmResult<(Self, InitOutcome)> {
        let guard = arena.lock_init()?;
        let (region, outcome) =
            guard.init_region(REGION_REGISTRATION, core::mem::size_of::<RegistrationRecord>())?;
        if outcome.is_created() {
            // SAFETY: freshly allocated, nobody else can see it before the
            // guard drops.
            unsafe {
                std::ptr::write_bytes(region.as_ptr().as_ptr(), 0, region.size());
            }
        }
        drop(guard);

        debug!("Registration record {}", outcome);
        Ok((Self { region }, outcome))
    }
}

// ─── Sizing & Init ──────────────────────────────────────────────────

fn flag_bytes(n: usize) -> ShmResult<usize> {
    mul_size(n, core::mem::size_of::<Flag>())
}

/// Bytes the controller needs for `n` flags, before arena alignment.
pub fn controller_shmem_size(n: usize) -> ShmResult<usize> {
    add_size(core::mem::size_of::<RegistrationRecord>(), flag_bytes(n)?)
}

/// Add the controller's regions to a sizing pass.
pub fn request_controller_shmem(sizing: &mut ShmemSizing, n: usize) -> ShmResult<()> {
    sizing.request(REGION_REGISTRATION, core::mem::size_of::<RegistrationRecord>())?;
    sizing.request(REGION_FLAGS, flag_bytes(n)?)?;
    Ok(())
}

/// Shared state handles of the controller.
#[derive(Debug, Clone)]
pub struct ControllerShared {
    /// Registration record.
    pub registration: Registration,
    /// Flag store.
    pub flags: FlagStore,
    /// Whether this call created the registration record.
    pub outcome: InitOutcome,
}

/// Create or attach to the record then the flag store.
///
/// Each region takes the init lock on its own.
pub fn controller_shmem_init(arena: &ShmArena, n: usize) -> ShmResult<ControllerShared> {
    let (registration, outcome) = Registration::initialize(arena)?;
    let (flags, _) = FlagStore::initialize(arena, n)?;
    Ok(ControllerShared {
        registration,
        flags,
        outcome,
    })
}
