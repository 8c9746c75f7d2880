//! The controller state machine and its supervised loop.
//!
//! ```text
//! Starting ─► Running ─► ShuttingDown ─► Terminated
//!               ▲  │
//!               │  ▼
//!           ErrorRecovery
//! ```
//!
//! ## Loop body
//! 1. Reset the latch so a consumed wakeup does not spin the loop.
//! 2. Drain interrupts: crash-exit, then barriers, then config reload, then
//!    shutdown. Crash-exit and shutdown leave before the action runs.
//! 3. Run the domain action once.
//! 4. Emit one `tick` record.
//! 5. Wait on the latch for the configured delay.
//!
//! Steps 2 and 3 run inside one recovery boundary. An error or panic there
//! rolls back tracked resources, discards the work arena, sleeps a fixed
//! backoff and goes back to step 1 without waiting.

use crate::action::{ActionContext, ActionError, DomainAction};
use crate::config::{ConfigSource, ReloadOutcome};
use crate::interrupt::{Inbox, Interrupt};
use crate::memory::WorkArena;
use crate::recovery::ResourceOwner;
use crate::shmem::{ControllerShared, controller_shmem_init};
use crate::signals;
use collie_common::config::ConfigError;
use collie_common::consts::{EXIT_CRASH, EXIT_FATAL, EXIT_OK, RECOVERY_BACKOFF_MS};
use collie_shared_memory::platform::{get_current_pid, get_parent_pid};
use collie_shared_memory::{FlagStore, ShmArena, ShmError, WaitEvent};
use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ─── States & Exits ─────────────────────────────────────────────────

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Attaching shared state, installing handlers.
    Starting,
    /// Looping.
    Running,
    /// Absorbing a failed iteration.
    ErrorRecovery,
    /// Leaving the loop.
    ShuttingDown,
    /// Done; the process may exit.
    Terminated,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerExit {
    /// Graceful shutdown request.
    Shutdown,
    /// Immediate crash request.
    Crashed,
    /// The supervisor that started us is gone.
    SupervisorGone,
}

impl ControllerExit {
    /// Process exit code for this outcome.
    pub const fn exit_code(self) -> i32 {
        match self {
            Self::Shutdown => EXIT_OK,
            Self::Crashed => EXIT_CRASH,
            Self::SupervisorGone => EXIT_FATAL,
        }
    }
}

/// Fatal startup errors. Iteration errors never surface here.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Shared state could not be attached.
    #[error("shared memory error: {0}")]
    Shm(#[from] ShmError),

    /// Signal handlers could not be installed.
    #[error("signal setup failed: {0}")]
    Signals(#[from] nix::Error),

    /// The domain action's one-time setup failed.
    #[error("domain action init failed: {0}")]
    ActionInit(#[source] ActionError),
}

// ─── Options & Stats ────────────────────────────────────────────────

/// Process-level behavior switches.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Install signal handlers and advertise the latch to them.
    pub install_signals: bool,
    /// Exit when the parent process changes.
    pub watch_parent: bool,
    /// Sleep after every error recovery.
    pub recovery_backoff: Duration,
}

impl ControllerOptions {
    /// Options for the real controller process.
    pub fn process() -> Self {
        Self {
            install_signals: true,
            watch_parent: true,
            ..Self::default()
        }
    }
}

impl Default for ControllerOptions {
    /// In-process options: no signal handlers, no parent watch.
    fn default() -> Self {
        Self {
            install_signals: false,
            watch_parent: false,
            recovery_backoff: Duration::from_millis(RECOVERY_BACKOFF_MS),
        }
    }
}

/// Counters kept across the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Ticks started, failed ones included.
    pub ticks: u64,
    /// Error recoveries performed.
    pub recoveries: u64,
    /// Configuration reloads applied.
    pub reloads: u64,
    /// Latest barrier generation absorbed.
    pub absorbed_generation: u64,
}

enum Step {
    Continue,
    Exit(ControllerExit),
}

// ─── Controller ─────────────────────────────────────────────────────

/// The background controller.
pub struct Controller<A: DomainAction> {
    config: ConfigSource,
    shared: ControllerShared,
    inbox: Arc<Inbox>,
    action: A,
    options: ControllerOptions,
    state: ControllerState,
    work: WorkArena,
    resources: ResourceOwner,
    stats: ControllerStats,
    pid: u32,
    parent_pid: u32,
}

impl<A: DomainAction> Controller<A> {
    /// Run the Starting state.
    ///
    /// Attaches the registration record and flag store, records this
    /// process as the controller, installs handlers and runs the action's
    /// one-time setup. Any failure here is fatal.
    pub fn start(
        config: ConfigSource,
        arena: &ShmArena,
        inbox: Arc<Inbox>,
        mut action: A,
        options: ControllerOptions,
    ) -> Result<Self, ControllerError> {
        let pid = get_current_pid();
        let parent_pid = get_parent_pid();
        debug!("Controller state -> {}", ControllerState::Starting);

        let shared = controller_shmem_init(arena, config.config().shmem.flag_count)?;
        shared.registration.register(pid);

        if options.install_signals {
            signals::install()?;
        }

        let latch = shared.registration.latch();
        if let Some(previous) = latch.own(pid).filter(|&previous| previous != pid) {
            debug!("Taking over latch from previous controller {}", previous);
        }
        if options.install_signals {
            signals::advertise_latch(latch);
        }

        action
            .init(&shared.flags)
            .map_err(ControllerError::ActionInit)?;

        info!(
            "Controller started: pid={}, action={}, flags={}, delay={}ms",
            pid,
            action.name(),
            shared.flags.capacity(),
            config.delay().as_millis()
        );

        let mut controller = Self {
            config,
            shared,
            inbox,
            action,
            options,
            state: ControllerState::Starting,
            work: WorkArena::new(),
            resources: ResourceOwner::new(),
            stats: ControllerStats::default(),
            pid,
            parent_pid,
        };
        controller.transition(ControllerState::Running);
        Ok(controller)
    }

    /// Current state.
    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Run counters.
    pub fn stats(&self) -> ControllerStats {
        self.stats
    }

    /// Shared flag store.
    pub fn flags(&self) -> &FlagStore {
        &self.shared.flags
    }

    /// Active configuration source.
    pub fn config(&self) -> &ConfigSource {
        &self.config
    }

    /// Pid recorded at startup.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The domain action.
    pub fn action(&self) -> &A {
        &self.action
    }

    /// Loop until shutdown, crash request or supervisor loss.
    pub fn run(&mut self) -> ControllerExit {
        loop {
            self.shared.registration.latch().reset();

            let attempt = catch_unwind(AssertUnwindSafe(|| self.iteration()));
            match attempt {
                Ok(Ok(Step::Continue)) => {}
                Ok(Ok(Step::Exit(exit))) => return self.finish(exit),
                Ok(Err(e)) => {
                    self.recover(&e);
                    continue;
                }
                Err(payload) => {
                    self.recover(&ActionError::Panicked(panic_message(payload.as_ref())));
                    continue;
                }
            }

            let delay = self.config.delay();
            if self.shared.registration.latch().wait(delay) == WaitEvent::Set {
                debug!("Controller woken early");
            }

            if self.options.watch_parent && get_parent_pid() != self.parent_pid {
                warn!("Supervisor process {} is gone", self.parent_pid);
                return self.finish(ControllerExit::SupervisorGone);
            }
        }
    }

    fn iteration(&mut self) -> Result<Step, ActionError> {
        if let Some(exit) = self.handle_interrupts() {
            return Ok(Step::Exit(exit));
        }

        self.stats.ticks += 1;
        let tick = self.stats.ticks;
        let mut ctx = ActionContext::new(
            tick,
            self.config.delay(),
            &self.shared.flags,
            &self.shared.registration,
            &mut self.work,
            &mut self.resources,
        );
        self.action.run(&mut ctx)?;

        self.resources.release_leaked();
        self.work.reset();
        info!(tick, "Controller tick");
        Ok(Step::Continue)
    }

    /// Drain the inbox in the fixed order. Returns an exit if one was
    /// requested.
    fn handle_interrupts(&mut self) -> Option<ControllerExit> {
        let pending = self.inbox.drain();
        if pending.contains(Interrupt::CRASH_EXIT) {
            return Some(ControllerExit::Crashed);
        }

        // Barriers emitted through shared memory need no signal.
        if let Some(generation) = self.shared.registration.absorb_barriers() {
            debug!("Absorbed barrier generation {}", generation);
            self.stats.absorbed_generation = generation;
        }

        if pending.contains(Interrupt::CONFIG_RELOAD) {
            if let ReloadOutcome::Applied { .. } = self.config.reload() {
                self.stats.reloads += 1;
            }
        }

        if pending.contains(Interrupt::SHUTDOWN) {
            info!("Shutdown requested");
            return Some(ControllerExit::Shutdown);
        }
        None
    }

    fn recover(&mut self, e: &ActionError) {
        self.transition(ControllerState::ErrorRecovery);
        {
            let _hold = self.inbox.hold();
            error!("Controller iteration failed: {e}");

            let released = self.resources.rollback();
            if !released.is_empty() {
                debug!("Rolled back {} resources", released.len());
            }
            self.work.reset();
            self.stats.recoveries += 1;
        }

        std::thread::sleep(self.options.recovery_backoff);
        self.transition(ControllerState::Running);
    }

    fn finish(&mut self, exit: ControllerExit) -> ControllerExit {
        self.transition(ControllerState::ShuttingDown);
        match exit {
            ControllerExit::Shutdown => {
                self.action.on_shutdown();
                self.resources.release_leaked();
            }
            ControllerExit::Crashed | ControllerExit::SupervisorGone => {
                self.resources.rollback();
            }
        }
        self.work.reset();

        if self.options.install_signals {
            signals::withdraw_latch();
        }
        self.shared.registration.latch().disown();

        self.transition(ControllerState::Terminated);
        info!(
            "Controller exiting: {:?} after {} ticks, {} recoveries",
            exit, self.stats.ticks, self.stats.recoveries
        );
        exit
    }

    fn transition(&mut self, next: ControllerState) {
        debug!("Controller state {} -> {}", self.state, next);
        self.state = next;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
