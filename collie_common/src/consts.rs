//! Collie constants.
//!
//! Single source of truth for region names, configuration defaults and
//! process exit codes. All other crates import from here.

// ─── Shared memory ──────────────────────────────────────────────────

/// Default directory holding the instance segment and its lock file.
pub const DEFAULT_SHM_DIR: &str = "/dev/shm";

/// Default instance name. Prefixes every file of the instance.
pub const DEFAULT_INSTANCE: &str = "collie";

/// CPU cache line size in bytes.
///
/// Every named region inside the arena starts on a cache line boundary.
pub const CACHE_LINE_SIZE: usize = 64;

/// Maximum number of named regions one arena can index.
pub const MAX_REGIONS: usize = 32;

/// Maximum length of a region name in bytes (the index stores 48 bytes,
/// NUL terminated).
pub const MAX_REGION_NAME_LEN: usize = 47;

/// Region holding the controller registration record.
pub const REGION_REGISTRATION: &str = "Collie Data";

/// Region holding the flag array.
pub const REGION_FLAGS: &str = "Collie Flags";

// ─── Flags ──────────────────────────────────────────────────────────

/// Default flag capacity (`N`).
pub const DEFAULT_FLAG_COUNT: usize = 64;

/// Upper bound accepted for `shmem.flag_count` (8 MiB of flags).
pub const MAX_FLAG_COUNT: usize = 1 << 20;

// ─── Controller ─────────────────────────────────────────────────────

/// Default loop delay [ms].
pub const DEFAULT_DELAY_MS: u64 = 1000;

/// Smallest accepted loop delay [ms].
pub const MIN_DELAY_MS: u64 = 1;

/// Largest accepted loop delay [ms].
pub const MAX_DELAY_MS: u64 = 10_000;

/// Fixed sleep after every recovered iteration error [ms].
pub const RECOVERY_BACKOFF_MS: u64 = 1000;

/// Largest accepted SIGTERM grace period [s].
pub const MAX_SIGTERM_TIMEOUT_S: f64 = 600.0;

/// Name of the controller executable spawned by the supervisor.
pub const CONTROLLER_BINARY: &str = "collie_controller";

// ─── Exit codes ─────────────────────────────────────────────────────

/// Graceful shutdown.
pub const EXIT_OK: i32 = 0;

/// Supervisor died, or a `collie` command failed.
pub const EXIT_FATAL: i32 = 1;

/// Immediate crash request or controller startup failure.
pub const EXIT_CRASH: i32 = 2;
