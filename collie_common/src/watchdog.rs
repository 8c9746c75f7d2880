//! # Watchdog Trait
//!
//! Defines the supervisor contract for the controller process lifecycle.
//! The `collie` binary implements this trait to spawn, monitor, restart
//! and shut down the controller.
//!
//! # Design
//!
//! The trait captures the four operations any supervisor must provide,
//! without mandating a process management strategy. Restart policy lives
//! in the implementation; the controller itself never decides whether it
//! is restarted.

use std::path::Path;

/// Identifies a managed child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ManagedModule {
    /// The background controller (`collie_controller`).
    Controller,
}

/// Health status returned by [`Watchdog::health_check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Process is running and registered in shared memory.
    Healthy,
    /// Process is alive but has not registered its pid yet.
    Starting,
    /// Process has exited.
    Dead {
        /// Exit code if available.
        exit_code: Option<i32>,
    },
    /// Process was never started or is not being tracked.
    Unknown,
}

/// Error type for watchdog operations.
#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    /// Failed to spawn the requested module.
    #[error("failed to spawn {module:?}: {reason}")]
    SpawnFailed {
        module: ManagedModule,
        reason: String,
    },

    /// Maximum restart attempts exhausted.
    #[error("max restarts ({max}) exhausted for {module:?}")]
    RestartsExhausted { module: ManagedModule, max: u32 },

    /// Generic I/O or system error.
    #[error("watchdog error: {0}")]
    Other(String),
}

/// Supervisor contract for collie process lifecycle management.
pub trait Watchdog {
    /// Spawn a child module process.
    ///
    /// Returns the OS PID of the spawned process. The implementation
    /// forwards `config_path` to the child via `--config`.
    fn spawn_module(
        &mut self,
        module: ManagedModule,
        config_path: &Path,
    ) -> Result<u32, WatchdogError>;

    /// Query the health of a managed module.
    fn health_check(&mut self, module: ManagedModule) -> HealthStatus;

    /// Restart a module that has died.
    ///
    /// Returns the new PID, or `RestartsExhausted` once the policy gives up.
    fn restart_module(&mut self, module: ManagedModule) -> Result<u32, WatchdogError>;

    /// Shut down all managed modules (SIGTERM, grace period, SIGKILL).
    fn shutdown_all(&mut self) -> Result<(), WatchdogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchdog_error_display() {
        let e = WatchdogError::SpawnFailed {
            module: ManagedModule::Controller,
            reason: "binary not found".into(),
        };
        let msg = format!("{e}");
        assert!(msg.contains("Controller"), "error should mention module: {msg}");
        assert!(msg.contains("binary not found"));

        let e2 = WatchdogError::RestartsExhausted {
            module: ManagedModule::Controller,
            max: 5,
        };
        assert!(format!("{e2}").contains('5'));
    }

    #[test]
    fn test_watchdog_trait_is_object_safe() {
        struct DummyWatchdog;
        impl Watchdog for DummyWatchdog {
            fn spawn_module(
                &mut self,
                _module: ManagedModule,
                _config_path: &Path,
            ) -> Result<u32, WatchdogError> {
                Ok(12345)
            }
            fn health_check(&mut self, _module: ManagedModule) -> HealthStatus {
                HealthStatus::Unknown
            }
            fn restart_module(&mut self, _module: ManagedModule) -> Result<u32, WatchdogError> {
                Err(WatchdogError::Other("not implemented".into()))
            }
            fn shutdown_all(&mut self) -> Result<(), WatchdogError> {
                Ok(())
            }
        }

        let mut wd: Box<dyn Watchdog> = Box::new(DummyWatchdog);
        let pid = wd
            .spawn_module(ManagedModule::Controller, Path::new("/tmp/collie.toml"))
            .unwrap();
        assert_eq!(pid, 12345);
        assert_eq!(wd.health_check(ManagedModule::Controller), HealthStatus::Unknown);
        assert!(wd.shutdown_all().is_ok());
    }
}
