//! # Collie Shared Memory
//!
//! Shared memory plumbing for the collie engine: one segment per engine
//! instance, carved into named regions that independent processes agree on.
//!
//! ## Layout
//!
//! ```text
//! <dir>/<instance>.shm                        <dir>/<instance>.lock
//! ┌──────────────┬───────────────┬──────────────┐   ┌──────────┐
//! │ ArenaHeader  │ "Collie Data" │ "Collie      │   │  flock   │
//! │ magic, bump, │ registration  │  Flags"      │   │ (init)   │
//! │ region index │ record        │ N × u64      │   └──────────┘
//! └──────────────┴───────────────┴──────────────┘
//! ```
//!
//! Startup runs in two passes. The sizing pass ([`ShmemSizing`]) adds up
//! what every component needs; the init pass maps the segment with
//! [`ShmArena::create_or_attach`] and lets each component create or attach
//! to its region under the init lock. Only the creator of a region
//! initializes it, so attaching never clobbers live state.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use collie_shared_memory::{FlagStore, ShmArena, ShmOptions, ShmemSizing};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let options = ShmOptions::new("/dev/shm", "collie");
//! let mut sizing = ShmemSizing::new();
//! sizing.request("Collie Flags", FlagStore::size(64))?;
//!
//! let (arena, _) = ShmArena::create_or_attach(&options, sizing.total())?;
//! let (flags, _) = FlagStore::initialize(&arena, 64)?;
//! flags.set(3, 42);
//! assert_eq!(flags.get(3), 42);
//! # Ok(())
//! # }
//! ```

pub mod arena;
pub mod error;
pub mod flags;
pub mod latch;
pub mod platform;
pub mod sizing;

pub use arena::{
    InitLockGuard, InitOutcome, Region, RegionInfo, ShmArena, ShmOptions, arena_header_size,
    segment_exists,
};
pub use error::{ShmError, ShmResult};
pub use flags::{Flag, FlagStore};
pub use latch::{Latch, WaitEvent};
pub use sizing::{ShmemSizing, add_size, cache_aligned, mul_size};

/// Initialize tracing for tests and tools that embed the arena
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
