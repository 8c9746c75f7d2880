//! Process signal wiring for the controller binary.
//!
//! | signal            | effect                                  |
//! |-------------------|-----------------------------------------|
//! | SIGHUP            | post `CONFIG_RELOAD`                    |
//! | SIGINT, SIGTERM   | post `SHUTDOWN`                         |
//! | SIGQUIT           | `_exit(2)` from the handler             |
//! | SIGUSR1           | post `BARRIER`                          |
//! | SIGALRM, SIGPIPE, SIGUSR2 | ignored                         |
//! | SIGCHLD           | default                                 |
//!
//! Handlers only touch atomics: they post to the process inbox, then set
//! the advertised latch so a sleeping controller wakes. `errno` is saved
//! and restored around both.

use crate::interrupt::{Inbox, Interrupt};
use collie_common::consts::EXIT_CRASH;
use collie_shared_memory::Latch;
use nix::errno::Errno;
use nix::sys::signal::{
    SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal, pthread_sigmask, sigaction,
};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

static INBOX: OnceLock<Arc<Inbox>> = OnceLock::new();
static LATCH: AtomicPtr<Latch> = AtomicPtr::new(ptr::null_mut());

/// The inbox signal handlers post to.
pub fn process_inbox() -> Arc<Inbox> {
    Arc::clone(INBOX.get_or_init(|| Arc::new(Inbox::new())))
}

/// Make `latch` the one handlers set.
///
/// The latch must stay mapped until [`withdraw_latch`] is called.
pub fn advertise_latch(latch: &Latch) {
    LATCH.store(ptr::from_ref(latch).cast_mut(), Ordering::Release);
}

/// Stop setting any latch from handlers.
pub fn withdraw_latch() {
    LATCH.store(ptr::null_mut(), Ordering::Release);
}

/// Set the advertised latch, if any. Async-signal-safe.
pub fn set_advertised_latch() {
    let latch = LATCH.load(Ordering::Acquire);
    // SAFETY: non-null only between advertise_latch and withdraw_latch,
    // while the owner keeps the mapping alive.
    if let Some(latch) = unsafe { latch.as_ref() } {
        latch.set();
    }
}

fn post_and_wake(kind: Interrupt) {
    let saved = Errno::last_raw();
    if let Some(inbox) = INBOX.get() {
        inbox.post(kind);
    }
    set_advertised_latch();
    Errno::set_raw(saved);
}

extern "C" fn on_reload(_: libc::c_int) {
    post_and_wake(Interrupt::CONFIG_RELOAD);
}

extern "C" fn on_shutdown(_: libc::c_int) {
    post_and_wake(Interrupt::SHUTDOWN);
}

extern "C" fn on_barrier(_: libc::c_int) {
    post_and_wake(Interrupt::BARRIER);
}

extern "C" fn on_quit(_: libc::c_int) {
    // SAFETY: _exit is async-signal-safe and skips atexit handlers and
    // destructors on purpose.
    unsafe { libc::_exit(EXIT_CRASH) }
}

fn handlers() -> [(Signal, SigHandler); 9] {
    [
        (Signal::SIGHUP, SigHandler::Handler(on_reload)),
        (Signal::SIGINT, SigHandler::Handler(on_shutdown)),
        (Signal::SIGTERM, SigHandler::Handler(on_shutdown)),
        (Signal::SIGQUIT, SigHandler::Handler(on_quit)),
        (Signal::SIGUSR1, SigHandler::Handler(on_barrier)),
        (Signal::SIGALRM, SigHandler::SigIgn),
        (Signal::SIGPIPE, SigHandler::SigIgn),
        (Signal::SIGUSR2, SigHandler::SigIgn),
        (Signal::SIGCHLD, SigHandler::SigDfl),
    ]
}

/// Install every handler, then unblock all signals.
///
/// Call once from the controller's main thread, before entering the loop.
pub fn install() -> nix::Result<()> {
    // Handlers post only once the inbox exists.
    process_inbox();
    for (signal, handler) in handlers() {
        let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
        // SAFETY: every handler only touches atomics and async-signal-safe
        // syscalls.
        unsafe { sigaction(signal, &action)? };
    }
    pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None)?;
    debug!("Signal handlers installed, signal mask cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_and_wake_sets_advertised_latch() {
        let inbox = process_inbox();
        let latch = Latch::new();
        advertise_latch(&latch);
        post_and_wake(Interrupt::BARRIER);
        assert!(latch.is_set());
        assert!(inbox.drain().contains(Interrupt::BARRIER));

        withdraw_latch();
        latch.reset();
        set_advertised_latch();
        assert!(!latch.is_set());
    }

    #[test]
    fn test_handler_table_covers_engine_signals() {
        let table = handlers();
        let find = |sig| table.iter().find(|(s, _)| *s == sig).map(|(_, h)| *h);
        assert_eq!(find(Signal::SIGPIPE), Some(SigHandler::SigIgn));
        assert_eq!(find(Signal::SIGCHLD), Some(SigHandler::SigDfl));
        assert!(matches!(find(Signal::SIGTERM), Some(SigHandler::Handler(_))));
        assert!(matches!(find(Signal::SIGHUP), Some(SigHandler::Handler(_))));
    }
}
