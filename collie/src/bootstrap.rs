//! Engine shared memory bootstrap.
//!
//! Runs the sizing pass for every region of the instance, then creates or
//! attaches the segment and initializes each region. Safe to run from any
//! number of processes at once: exactly one of them observes `Created`.

use collie_common::config::ShmemConfig;
use collie_controller::{ControllerShared, controller_shmem_init, request_controller_shmem};
use collie_shared_memory::{InitOutcome, ShmArena, ShmOptions, ShmResult, ShmemSizing};
use tracing::info;

/// Attached engine shared memory.
#[derive(Debug, Clone)]
pub struct Bootstrap {
    /// The instance segment.
    pub arena: ShmArena,
    /// Controller registration record and flag store.
    pub shared: ControllerShared,
    /// Whether this call created the segment.
    pub segment: InitOutcome,
}

/// Total segment size for the configured instance.
pub fn engine_shmem_size(config: &ShmemConfig) -> ShmResult<usize> {
    let mut sizing = ShmemSizing::new();
    request_controller_shmem(&mut sizing, config.flag_count)?;
    Ok(sizing.total())
}

/// Create or attach the instance segment and every region in it.
pub fn bootstrap(config: &ShmemConfig) -> ShmResult<Bootstrap> {
    let options = ShmOptions::from_config(config);
    let total = engine_shmem_size(config)?;

    let (arena, segment) = ShmArena::create_or_attach(&options, total)?;
    let shared = controller_shmem_init(&arena, config.flag_count)?;

    info!(
        "Shared memory {}: segment {:?}, controller state {:?} ({} bytes, {} flags)",
        options.segment_path().display(),
        segment,
        shared.outcome,
        total,
        shared.flags.capacity()
    );

    Ok(Bootstrap {
        arena,
        shared,
        segment,
    })
}
