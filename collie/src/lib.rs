//! # Collie
//!
//! Engine-side collaborators of the collie controller:
//!
//! - [`bootstrap`]: sizes and initializes the instance's shared memory,
//!   once per engine start.
//! - [`supervisor`]: spawns the `collie_controller` process and restarts
//!   it when it dies.
//! - [`admin`]: flag access, wakeups, barriers and status for operators.

pub mod admin;
pub mod bootstrap;
pub mod supervisor;

pub use admin::{Admin, AdminError, StatusReport};
pub use bootstrap::{Bootstrap, bootstrap, engine_shmem_size};
pub use supervisor::{Supervisor, controller_binary};
