//! Domain action seam.
//!
//! The controller knows nothing about what the flags mean. Once per
//! iteration it hands a [`DomainAction`] an [`ActionContext`] and lets it
//! read or write the flag store. Errors and panics raised from `run` are
//! absorbed by the controller's recovery path.

use crate::memory::WorkArena;
use crate::recovery::ResourceOwner;
use crate::shmem::RegistrationRecord;
use collie_shared_memory::{Flag, FlagStore, ShmError};
use std::time::Duration;
use thiserror::Error;

/// Recoverable error raised by a domain action.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Flag id outside `0..capacity`.
    #[error("flag {id} out of range (capacity {capacity})")]
    FlagOutOfRange {
        /// Requested id.
        id: usize,
        /// Store capacity.
        capacity: usize,
    },

    /// Shared memory failure while acting.
    #[error("shared memory error: {0}")]
    Shm(#[from] ShmError),

    /// The action panicked; carries the panic message.
    #[error("action panicked: {0}")]
    Panicked(String),

    /// Any other failure reported by the action.
    #[error("{0}")]
    Failed(String),
}

/// Everything an action may touch during one iteration.
pub struct ActionContext<'a> {
    tick: u64,
    delay: Duration,
    flags: &'a FlagStore,
    registration: &'a RegistrationRecord,
    work: &'a mut WorkArena,
    resources: &'a mut ResourceOwner,
}

impl<'a> ActionContext<'a> {
    /// Build a context. The controller does this once per iteration.
    pub fn new(
        tick: u64,
        delay: Duration,
        flags: &'a FlagStore,
        registration: &'a RegistrationRecord,
        work: &'a mut WorkArena,
        resources: &'a mut ResourceOwner,
    ) -> Self {
        Self {
            tick,
            delay,
            flags,
            registration,
            work,
            resources,
        }
    }

    /// Current tick, starting at 1.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Delay the controller will wait after this iteration.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Shared flag store.
    pub fn flags(&self) -> &FlagStore {
        self.flags
    }

    /// Read a flag, reporting an out-of-range id as an error.
    pub fn flag(&self, id: usize) -> Result<Flag, ActionError> {
        self.flags.try_get(id).ok_or(ActionError::FlagOutOfRange {
            id,
            capacity: self.flags.capacity(),
        })
    }

    /// Write a flag, reporting an out-of-range id as an error.
    pub fn set_flag(&self, id: usize, value: Flag) -> Result<(), ActionError> {
        if self.flags.try_set(id, value) {
            Ok(())
        } else {
            Err(ActionError::FlagOutOfRange {
                id,
                capacity: self.flags.capacity(),
            })
        }
    }

    /// Shared registration record.
    pub fn registration(&self) -> &RegistrationRecord {
        self.registration
    }

    /// Per-iteration scratch memory.
    pub fn work(&mut self) -> &mut WorkArena {
        self.work
    }

    /// Resource owner for anything that must be released on failure.
    pub fn resources(&mut self) -> &mut ResourceOwner {
        self.resources
    }
}

/// The controller's periodic action.
pub trait DomainAction {
    /// Short name for logs.
    fn name(&self) -> &str {
        "idle"
    }

    /// One-time setup, run in the Starting state.
    fn init(&mut self, _flags: &FlagStore) -> Result<(), ActionError> {
        Ok(())
    }

    /// Run once for the current iteration.
    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError>;

    /// Called once when the controller shuts down cleanly.
    fn on_shutdown(&mut self) {}
}

/// Action that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleAction;

impl DomainAction for IdleAction {
    fn run(&mut self, _ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        Ok(())
    }
}

/// Adapts a closure into a [`DomainAction`].
pub struct FnAction<F> {
    name: String,
    run: F,
}

impl<F> FnAction<F>
where
    F: FnMut(&mut ActionContext<'_>) -> Result<(), ActionError>,
{
    /// Wrap `run` under `name`.
    pub fn new(name: impl Into<String>, run: F) -> Self {
        Self {
            name: name.into(),
            run,
        }
    }
}

impl<F> DomainAction for FnAction<F>
where
    F: FnMut(&mut ActionContext<'_>) -> Result<(), ActionError>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), ActionError> {
        (self.run)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shmem::{controller_shmem_init, request_controller_shmem};
    use collie_shared_memory::{ShmArena, ShmOptions, ShmemSizing};

    #[test]
    fn test_context_flag_access() {
        let dir = tempfile::tempdir().unwrap();
        let mut sizing = ShmemSizing::new();
        request_controller_shmem(&mut sizing, 4).unwrap();
        let (arena, _) =
            ShmArena::create_or_attach(&ShmOptions::new(dir.path(), "action"), sizing.total())
                .unwrap();
        let shared = controller_shmem_init(&arena, 4).unwrap();

        let mut work = WorkArena::new();
        let mut resources = ResourceOwner::new();
        let mut ctx = ActionContext::new(
            1,
            Duration::from_millis(10),
            &shared.flags,
            &shared.registration,
            &mut work,
            &mut resources,
        );

        let mut action = FnAction::new("bump", |ctx: &mut ActionContext<'_>| {
            let next = ctx.flag(0)? + ctx.tick();
            ctx.set_flag(0, next)?;
            ctx.work().alloc(8);
            Ok(())
        });
        assert_eq!(action.name(), "bump");
        action.run(&mut ctx).unwrap();
        assert_eq!(ctx.flag(0).unwrap(), 1);
        assert!(matches!(
            ctx.set_flag(4, 1),
            Err(ActionError::FlagOutOfRange { id: 4, capacity: 4 })
        ));

        assert_eq!(IdleAction.name(), "idle");
        assert!(IdleAction.run(&mut ctx).is_ok());
        drop(ctx);
        assert_eq!(work.allocated_bytes(), 8);
    }
}
