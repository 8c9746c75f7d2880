//! Administrative commands against a running instance.
//!
//! Every command attaches to an existing segment and never creates one, so
//! pointing the CLI at a stopped instance reports `NotFound` instead of
//! leaving an empty segment behind.

use collie_common::config::ShmemConfig;
use collie_controller::{ControllerShared, controller_shmem_init};
use collie_shared_memory::platform::is_process_alive;
use collie_shared_memory::{Flag, ShmArena, ShmError, ShmOptions};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors of administrative commands.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Shared memory could not be attached.
    #[error(transparent)]
    Shm(#[from] ShmError),

    /// Flag id beyond the store's capacity.
    #[error("flag {id} out of range (capacity {capacity})")]
    FlagOutOfRange { id: usize, capacity: usize },

    /// The controller did not absorb a barrier in time.
    #[error("barrier generation {generation} not absorbed within {timeout:?}")]
    BarrierTimeout { generation: u64, timeout: Duration },

    /// Status could not be serialized.
    #[error("json encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Handle on a running instance's shared state.
pub struct Admin {
    arena: ShmArena,
    shared: ControllerShared,
}

impl Admin {
    /// Attach to the instance described by `config`.
    pub fn attach(config: &ShmemConfig) -> Result<Self, AdminError> {
        let arena = ShmArena::attach(&ShmOptions::from_config(config))?;
        let shared = controller_shmem_init(&arena, config.flag_count)?;
        Ok(Self { arena, shared })
    }

    /// Read flag `id`.
    pub fn flag_get(&self, id: usize) -> Result<Flag, AdminError> {
        self.shared
            .flags
            .try_get(id)
            .ok_or(AdminError::FlagOutOfRange {
                id,
                capacity: self.shared.flags.capacity(),
            })
    }

    /// Write flag `id`.
    pub fn flag_set(&self, id: usize, value: Flag) -> Result<(), AdminError> {
        if self.shared.flags.try_set(id, value) {
            Ok(())
        } else {
            Err(AdminError::FlagOutOfRange {
                id,
                capacity: self.shared.flags.capacity(),
            })
        }
    }

    /// Wake the controller. Returns `false` if none is running, including
    /// when the latch is still advertised by a controller that died.
    pub fn wake(&self) -> bool {
        self.shared.registration.wake_controller()
    }

    /// Emit a barrier and wait until the controller absorbs it.
    pub fn barrier(&self, timeout: Duration) -> Result<u64, AdminError> {
        let registration = &self.shared.registration;
        let generation = registration.emit_barrier();
        if registration.wait_for_barrier(generation, timeout) {
            Ok(generation)
        } else {
            Err(AdminError::BarrierTimeout {
                generation,
                timeout,
            })
        }
    }

    /// Snapshot of the instance.
    pub fn status(&self) -> Result<StatusReport, AdminError> {
        let registration = &self.shared.registration;
        let controller_pid = registration.controller_pid();
        let latch_owner = registration.latch().owner();
        let flags = self
            .shared
            .flags
            .snapshot()
            .into_iter()
            .enumerate()
            .filter(|&(_, value)| value != 0)
            .map(|(id, value)| FlagEntry { id, value })
            .collect();
        let regions = self
            .arena
            .regions()?
            .into_iter()
            .map(|r| RegionEntry {
                name: r.name,
                offset: r.offset,
                size: r.size,
            })
            .collect();

        Ok(StatusReport {
            segment: self.arena.segment_path().display().to_string(),
            total_size: self.arena.total_size(),
            controller_pid,
            controller_alive: controller_pid.is_some_and(is_process_alive),
            latch_owner,
            latch_owner_alive: latch_owner.is_some_and(is_process_alive),
            latch_set: registration.latch().is_set(),
            barrier_generation: registration.barrier_generation(),
            absorbed_generation: registration.absorbed_generation(),
            flag_capacity: self.shared.flags.capacity(),
            flags,
            regions,
        })
    }
}

// ─── Status Report ──────────────────────────────────────────────────

/// Output of `collie status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub segment: String,
    pub total_size: usize,
    pub controller_pid: Option<u32>,
    pub controller_alive: bool,
    pub latch_owner: Option<u32>,
    /// Stale ownership left by a killed controller reads as `false`.
    pub latch_owner_alive: bool,
    pub latch_set: bool,
    pub barrier_generation: u64,
    pub absorbed_generation: u64,
    pub flag_capacity: usize,
    /// Non-zero flags only.
    pub flags: Vec<FlagEntry>,
    pub regions: Vec<RegionEntry>,
}

/// One non-zero flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlagEntry {
    pub id: usize,
    pub value: Flag,
}

/// One arena region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegionEntry {
    pub name: String,
    pub offset: usize,
    pub size: usize,
}

impl StatusReport {
    /// Pretty JSON rendering.
    pub fn to_json(&self) -> Result<String, AdminError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "segment:     {} ({} bytes)", self.segment, self.total_size)?;
        match self.controller_pid {
            Some(pid) if self.controller_alive => writeln!(f, "controller:  pid {pid} (running)")?,
            Some(pid) => writeln!(f, "controller:  pid {pid} (not running)")?,
            None => writeln!(f, "controller:  never started")?,
        }
        match self.latch_owner {
            Some(pid) if self.latch_owner_alive => {
                writeln!(f, "latch:       owned by {pid}, set={}", self.latch_set)?
            }
            Some(pid) => writeln!(f, "latch:       owned by {pid} (not running), set={}", self.latch_set)?,
            None => writeln!(f, "latch:       unowned")?,
        }
        writeln!(
            f,
            "barrier:     emitted={} absorbed={}",
            self.barrier_generation, self.absorbed_generation
        )?;
        writeln!(
            f,
            "flags:       {} non-zero of {}",
            self.flags.len(),
            self.flag_capacity
        )?;
        for flag in &self.flags {
            writeln!(f, "  [{:>4}] {}", flag.id, flag.value)?;
        }
        writeln!(f, "regions:")?;
        for region in &self.regions {
            writeln!(
                f,
                "  {:<16} offset={:<8} size={}",
                region.name, region.offset, region.size
            )?;
        }
        Ok(())
    }
}
