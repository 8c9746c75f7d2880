//! # Collie Controller Library
//!
//! The long-lived background process of the collie engine. Once started by
//! the supervisor it attaches the shared flag store, records its pid in the
//! registration record and loops:
//!
//! ```text
//! reset latch ─► drain interrupts ─► domain action ─► tick ─► wait(delay)
//!      ▲                                                          │
//!      └──────────────────────────────────────────────────────────┘
//! ```
//!
//! Errors and panics raised by an iteration never escape the process: they
//! go through a bounded rollback and a fixed backoff, then the loop resumes.
//! Shutdown is honored at the next loop top and always wins over the action.

pub mod action;
pub mod config;
pub mod controller;
pub mod interrupt;
pub mod memory;
pub mod recovery;
pub mod shmem;
pub mod signals;

pub use action::{ActionContext, ActionError, DomainAction, FnAction, IdleAction};
pub use config::{ConfigSource, ReloadOutcome};
pub use controller::{
    Controller, ControllerError, ControllerExit, ControllerOptions, ControllerState,
    ControllerStats,
};
pub use interrupt::{Inbox, Interrupt};
pub use memory::WorkArena;
pub use recovery::{ResourceKind, ResourceOwner, ROLLBACK_ORDER};
pub use shmem::{
    ControllerShared, Registration, RegistrationRecord, controller_shmem_init,
    controller_shmem_size, request_controller_shmem,
};
