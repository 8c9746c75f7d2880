//! Controller process tests.
//!
//! Runs the real `collie_controller` binary against a segment bootstrapped
//! in a temp directory and drives it with signals, the way the supervisor
//! and operators do. Tick lines on the child's stdout show when the loop
//! runs.

use collie_controller::{Registration, controller_shmem_init, request_controller_shmem};
use collie_shared_memory::{ShmArena, ShmOptions, ShmemSizing};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::{Duration, Instant};

const FLAGS: usize = 8;
const INSTANCE: &str = "proc";

// ─── Helpers ────────────────────────────────────────────────────────

struct Instance {
    dir: tempfile::TempDir,
    _arena: Option<ShmArena>,
    registration: Option<Registration>,
}

impl Instance {
    /// Temp directory with a bootstrapped segment, like `collie init`.
    fn bootstrapped() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut sizing = ShmemSizing::new();
        request_controller_shmem(&mut sizing, FLAGS).unwrap();
        let options = ShmOptions::new(dir.path(), INSTANCE);
        let (arena, _) = ShmArena::create_or_attach(&options, sizing.total()).unwrap();
        let registration = controller_shmem_init(&arena, FLAGS).unwrap().registration;
        Self {
            dir,
            _arena: Some(arena),
            registration: Some(registration),
        }
    }

    /// Temp directory without any segment.
    fn empty() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            _arena: None,
            registration: None,
        }
    }

    fn registration(&self) -> &Registration {
        self.registration.as_ref().unwrap()
    }

    fn config_path(&self) -> PathBuf {
        self.dir.path().join("collie.toml")
    }

    fn write_config(&self, delay_ms: u64) {
        let body = format!(
            "[shared]\nservice_name = \"collie-process-test\"\n\n\
             [shmem]\ndir = \"{}\"\ninstance = \"{INSTANCE}\"\nflag_count = {FLAGS}\n\n\
             [controller]\ndelay_ms = {delay_ms}\n",
            self.dir.path().display()
        );
        std::fs::write(self.config_path(), body).unwrap();
    }
}

/// Running controller child plus the tick lines read from its stdout.
struct Controller {
    child: Child,
    ticks: Receiver<Instant>,
}

impl Controller {
    fn spawn(config: &Path) -> Self {
        let mut child = Command::new(env!("CARGO_BIN_EXE_collie_controller"))
            .arg("--config")
            .arg(config)
            .env_remove("RUST_LOG")
            .env("NO_COLOR", "1")
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();

        let stdout = child.stdout.take().unwrap();
        let (tx, ticks) = mpsc::channel();
        std::thread::spawn(move || {
            for line in BufReader::new(stdout).lines() {
                let Ok(line) = line else { break };
                if line.contains("Controller tick") && tx.send(Instant::now()).is_err() {
                    break;
                }
            }
        });
        Self { child, ticks }
    }

    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn signal(&self, signal: Signal) {
        kill(Pid::from_raw(self.pid() as i32), signal).unwrap();
    }

    /// Block until the next tick line, failing after `timeout`.
    fn next_tick(&self, timeout: Duration) -> Instant {
        self.ticks
            .recv_timeout(timeout)
            .expect("controller did not tick in time")
    }

    /// Ticks seen within `window`.
    fn count_ticks(&self, window: Duration) -> usize {
        let deadline = Instant::now() + window;
        let mut seen = 0;
        while let Some(left) = deadline.checked_duration_since(Instant::now()) {
            match self.ticks.recv_timeout(left) {
                Ok(_) => seen += 1,
                Err(_) => break,
            }
        }
        seen
    }

    fn wait_exit(&mut self, timeout: Duration) -> ExitStatus {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait().unwrap() {
                return status;
            }
            if Instant::now() > deadline {
                let _ = self.child.kill();
                let _ = self.child.wait();
                panic!("controller {} did not exit within {timeout:?}", self.pid());
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Spawn a controller and wait until its loop has ticked once, so its
/// signal handlers and latch are in place.
fn start(instance: &Instance, delay_ms: u64) -> Controller {
    instance.write_config(delay_ms);
    let controller = Controller::spawn(&instance.config_path());
    controller.next_tick(Duration::from_secs(10));
    assert_eq!(
        instance.registration().controller_pid(),
        Some(controller.pid())
    );
    assert_eq!(
        instance.registration().latch().owner(),
        Some(controller.pid())
    );
    controller
}

// ─── Exit paths ─────────────────────────────────────────────────────

#[test]
fn test_sigterm_exits_cleanly() {
    let instance = Instance::bootstrapped();
    let mut controller = start(&instance, 10_000);

    controller.signal(Signal::SIGTERM);
    let status = controller.wait_exit(Duration::from_secs(5));

    assert_eq!(status.code(), Some(0));
    assert_eq!(instance.registration().latch().owner(), None);
}

#[test]
fn test_sigint_exits_cleanly() {
    let instance = Instance::bootstrapped();
    let mut controller = start(&instance, 10_000);

    controller.signal(Signal::SIGINT);
    assert_eq!(
        controller.wait_exit(Duration::from_secs(5)).code(),
        Some(0)
    );
}

#[test]
fn test_sigquit_exits_immediately_with_crash_code() {
    let instance = Instance::bootstrapped();
    let mut controller = start(&instance, 10_000);

    controller.signal(Signal::SIGQUIT);
    let status = controller.wait_exit(Duration::from_secs(5));

    assert_eq!(status.code(), Some(2));
    // _exit skips the orderly shutdown, so the latch stays claimed.
    assert_eq!(
        instance.registration().latch().owner(),
        Some(controller.pid())
    );
    assert!(!instance.registration().wake_controller());
}

#[test]
fn test_missing_segment_is_startup_failure() {
    let instance = Instance::empty();
    instance.write_config(100);
    let mut controller = Controller::spawn(&instance.config_path());

    assert_eq!(
        controller.wait_exit(Duration::from_secs(5)).code(),
        Some(2)
    );
    assert!(!instance.dir.path().join(format!("{INSTANCE}.shm")).exists());
}

#[test]
fn test_invalid_config_is_startup_failure() {
    let instance = Instance::bootstrapped();
    std::fs::write(instance.config_path(), "[controller]\ndelay_ms = 0\n").unwrap();
    let mut controller = Controller::spawn(&instance.config_path());

    assert_eq!(
        controller.wait_exit(Duration::from_secs(5)).code(),
        Some(2)
    );
    assert_eq!(instance.registration().controller_pid(), None);
}

// ─── Signals that keep the loop running ─────────────────────────────

#[test]
fn test_sighup_reload_shortens_tick_spacing() {
    let instance = Instance::bootstrapped();
    let mut controller = start(&instance, 10_000);

    // A 10 s delay: nothing more until something wakes the loop.
    assert_eq!(controller.count_ticks(Duration::from_millis(500)), 0);

    instance.write_config(20);
    controller.signal(Signal::SIGHUP);

    // One tick for the wakeup itself, then the 20 ms cadence.
    let first = controller.next_tick(Duration::from_secs(5));
    let second = controller.next_tick(Duration::from_secs(5));
    assert!(second.duration_since(first) < Duration::from_secs(2));
    assert!(controller.count_ticks(Duration::from_millis(500)) >= 5);

    controller.signal(Signal::SIGTERM);
    assert_eq!(
        controller.wait_exit(Duration::from_secs(5)).code(),
        Some(0)
    );
}

#[test]
fn test_sighup_with_broken_config_keeps_running() {
    let instance = Instance::bootstrapped();
    let mut controller = start(&instance, 10_000);

    std::fs::write(instance.config_path(), "[controller\n").unwrap();
    controller.signal(Signal::SIGHUP);

    // Woken and still on the old delay.
    controller.next_tick(Duration::from_secs(5));
    assert_eq!(controller.count_ticks(Duration::from_millis(500)), 0);

    controller.signal(Signal::SIGTERM);
    assert_eq!(
        controller.wait_exit(Duration::from_secs(5)).code(),
        Some(0)
    );
}

#[test]
fn test_ignored_signals_do_not_stop_the_loop() {
    let instance = Instance::bootstrapped();
    let mut controller = start(&instance, 10_000);

    for signal in [Signal::SIGPIPE, Signal::SIGALRM, Signal::SIGUSR2] {
        controller.signal(signal);
    }
    std::thread::sleep(Duration::from_millis(200));
    assert!(controller.child.try_wait().unwrap().is_none());

    controller.signal(Signal::SIGTERM);
    assert_eq!(
        controller.wait_exit(Duration::from_secs(5)).code(),
        Some(0)
    );
}
