//! # Controller Supervisor
//!
//! Spawns the `collie_controller` process, watches it and restarts it with
//! exponential backoff when it dies abnormally. A clean controller exit
//! (code 0) ends supervision. On shutdown the controller gets SIGTERM, a
//! grace period, then SIGKILL. Inside the async loop the grace period is
//! awaited ([`Supervisor::stop`]); the blocking [`Watchdog::shutdown_all`]
//! remains for `Drop` and synchronous callers.
//!
//! Health is derived from the child's exit status and the registration
//! record: a live child becomes `Healthy` once it has written its pid.

use collie_common::config::WatchdogConfig;
use collie_common::consts::CONTROLLER_BINARY;
use collie_common::watchdog::{HealthStatus, ManagedModule, Watchdog, WatchdogError};
use collie_controller::Registration;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How often the supervisor polls the controller.
pub const HEALTH_POLL: Duration = Duration::from_millis(100);

/// Poll interval while waiting for the controller to exit after SIGTERM.
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Path of the controller executable installed next to the running binary.
pub fn controller_binary() -> std::io::Result<PathBuf> {
    Ok(std::env::current_exe()?.with_file_name(CONTROLLER_BINARY))
}

/// Watchdog over the single controller process.
pub struct Supervisor {
    binary: PathBuf,
    policy: WatchdogConfig,
    registration: Registration,
    config_path: Option<PathBuf>,
    child: Option<Child>,
    last_exit: Option<Option<i32>>,
    restarts: u32,
    announced: bool,
}

impl Supervisor {
    /// Supervisor spawning `binary`, checking registration in `registration`.
    pub fn new(binary: PathBuf, policy: WatchdogConfig, registration: Registration) -> Self {
        Self {
            binary,
            policy,
            registration,
            config_path: None,
            child: None,
            last_exit: None,
            restarts: 0,
            announced: false,
        }
    }

    /// Pid of the running controller child, if any.
    pub fn child_pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Restarts performed so far.
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Spawn the controller and supervise it until it exits cleanly,
    /// restarts are exhausted or `shutdown` resolves.
    pub async fn run<S>(&mut self, config_path: &Path, shutdown: S) -> Result<(), WatchdogError>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        self.spawn_module(ManagedModule::Controller, config_path)?;
        let mut poll = tokio::time::interval(HEALTH_POLL);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("🛑 Shutdown requested, stopping controller");
                    return self.stop().await;
                }
                _ = poll.tick() => {}
            }

            match self.health_check(ManagedModule::Controller) {
                HealthStatus::Dead { exit_code: Some(0) } => {
                    info!("Controller exited cleanly");
                    return Ok(());
                }
                HealthStatus::Dead { exit_code } => {
                    let delay = self.policy.backoff(self.restarts);
                    warn!(
                        "⚠️ Controller died (exit code {:?}), restarting in {:?}",
                        exit_code, delay
                    );
                    tokio::select! {
                        _ = &mut shutdown => {
                            info!("🛑 Shutdown requested during restart backoff");
                            return self.stop().await;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.restart_module(ManagedModule::Controller)?;
                }
                HealthStatus::Healthy if !self.announced => {
                    self.announced = true;
                    info!("✅ Controller registered (pid {:?})", self.child_pid());
                }
                _ => {}
            }
        }
    }

    /// Stop the controller without blocking the runtime: SIGTERM, await the
    /// grace period, then SIGKILL.
    pub async fn stop(&mut self) -> Result<(), WatchdogError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let pid = child.id();
        Self::signal_child(pid, Signal::SIGTERM);

        let deadline = Instant::now() + self.policy.sigterm_timeout();
        let mut killed = false;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!("Controller {} stopped: {}", pid, status);
                    self.last_exit = Some(status.code());
                    return Ok(());
                }
                Ok(None) if !killed && Instant::now() >= deadline => {
                    warn!(
                        "Controller {} ignored SIGTERM for {:?}, sending SIGKILL",
                        pid,
                        self.policy.sigterm_timeout()
                    );
                    Self::signal_child(pid, Signal::SIGKILL);
                    killed = true;
                }
                Ok(None) => tokio::time::sleep(EXIT_POLL).await,
                Err(e) => return Err(WatchdogError::Other(format!("wait for {pid}: {e}"))),
            }
        }
    }

    fn signal_child(pid: u32, signal: Signal) {
        match kill(Pid::from_raw(pid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!("Failed to send {} to controller {}: {}", signal, pid, e),
        }
    }
}

impl Watchdog for Supervisor {
    fn spawn_module(
        &mut self,
        module: ManagedModule,
        config_path: &Path,
    ) -> Result<u32, WatchdogError> {
        let child = Command::new(&self.binary)
            .arg("--config")
            .arg(config_path)
            .spawn()
            .map_err(|e| WatchdogError::SpawnFailed {
                module,
                reason: format!("{}: {e}", self.binary.display()),
            })?;

        let pid = child.id();
        info!("🚀 Spawned {:?} (pid {})", module, pid);
        self.config_path = Some(config_path.to_path_buf());
        self.child = Some(child);
        self.last_exit = None;
        self.announced = false;
        Ok(pid)
    }

    fn health_check(&mut self, _module: ManagedModule) -> HealthStatus {
        let Some(child) = self.child.as_mut() else {
            return match self.last_exit {
                Some(exit_code) => HealthStatus::Dead { exit_code },
                None => HealthStatus::Unknown,
            };
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Controller {} exited: {}", child.id(), status);
                self.child = None;
                self.last_exit = Some(status.code());
                HealthStatus::Dead {
                    exit_code: status.code(),
                }
            }
            Ok(None) if self.registration.controller_pid() == Some(child.id()) => {
                HealthStatus::Healthy
            }
            Ok(None) => HealthStatus::Starting,
            Err(e) => {
                error!("Failed to poll controller {}: {}", child.id(), e);
                HealthStatus::Unknown
            }
        }
    }

    fn restart_module(&mut self, module: ManagedModule) -> Result<u32, WatchdogError> {
        if self.restarts >= self.policy.max_restarts {
            error!("❌ {:?} restarts exhausted ({})", module, self.policy.max_restarts);
            return Err(WatchdogError::RestartsExhausted {
                module,
                max: self.policy.max_restarts,
            });
        }
        let config_path = self
            .config_path
            .clone()
            .ok_or_else(|| WatchdogError::Other(format!("{module:?} was never spawned")))?;

        self.restarts += 1;
        info!(
            "🔄 Restarting {:?} (attempt {}/{})",
            module, self.restarts, self.policy.max_restarts
        );
        self.spawn_module(module, &config_path)
    }

    fn shutdown_all(&mut self) -> Result<(), WatchdogError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let pid = child.id();
        Self::signal_child(pid, Signal::SIGTERM);

        let deadline = Instant::now() + self.policy.sigterm_timeout();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!("Controller {} stopped: {}", pid, status);
                    self.last_exit = Some(status.code());
                    return Ok(());
                }
                Ok(None) if Instant::now() < deadline => std::thread::sleep(EXIT_POLL),
                Ok(None) => break,
                Err(e) => return Err(WatchdogError::Other(format!("wait for {pid}: {e}"))),
            }
        }

        warn!(
            "Controller {} ignored SIGTERM for {:?}, sending SIGKILL",
            pid,
            self.policy.sigterm_timeout()
        );
        Self::signal_child(pid, Signal::SIGKILL);
        let status = child
            .wait()
            .map_err(|e| WatchdogError::Other(format!("wait for {pid}: {e}")))?;
        self.last_exit = Some(status.code());
        Ok(())
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.child.is_some() {
            if let Err(e) = self.shutdown_all() {
                error!("Failed to stop controller: {e}");
            }
        }
    }
}
