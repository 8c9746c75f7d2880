//! Resource owner and the bounded rollback run on error recovery.
//!
//! The domain action registers a release callback for every engine-wide
//! resource it acquires. When an iteration fails, [`ResourceOwner::rollback`]
//! releases them kind by kind in [`ROLLBACK_ORDER`]; within a kind, the most
//! recently acquired goes first. A successful iteration is expected to have
//! released everything itself; leftovers are released and reported as
//! leaks.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, warn};

/// Kinds of resources an iteration may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Lightweight or heavyweight lock.
    Lock,
    /// Registration on a condition variable.
    ConditionWait,
    /// In-flight buffer I/O.
    BufferIo,
    /// Buffer pin.
    BufferPin,
    /// Any other tracked handle.
    Handle,
    /// Open file.
    File,
}

/// Fixed release sequence of [`ResourceOwner::rollback`].
pub const ROLLBACK_ORDER: [ResourceKind; 6] = [
    ResourceKind::Lock,
    ResourceKind::ConditionWait,
    ResourceKind::BufferIo,
    ResourceKind::BufferPin,
    ResourceKind::Handle,
    ResourceKind::File,
];

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lock => "lock",
            Self::ConditionWait => "condition wait",
            Self::BufferIo => "buffer I/O",
            Self::BufferPin => "buffer pin",
            Self::Handle => "handle",
            Self::File => "file",
        };
        f.write_str(name)
    }
}

struct Tracked {
    kind: ResourceKind,
    name: String,
    release: Box<dyn FnOnce() + Send>,
}

/// Release record returned by [`ResourceOwner::rollback`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Name given at registration.
    pub name: String,
    /// Whether the release callback panicked.
    pub panicked: bool,
}

/// Tracks resources acquired during one iteration.
#[derive(Default)]
pub struct ResourceOwner {
    tracked: Vec<Tracked>,
}

impl fmt::Debug for ResourceOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.tracked.iter().map(|t| (t.kind, &t.name)))
            .finish()
    }
}

impl ResourceOwner {
    /// Owner with nothing tracked.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a resource and the callback that releases it.
    pub fn register(
        &mut self,
        kind: ResourceKind,
        name: impl Into<String>,
        release: impl FnOnce() + Send + 'static,
    ) {
        self.tracked.push(Tracked {
            kind,
            name: name.into(),
            release: Box::new(release),
        });
    }

    /// Release one tracked resource without running the rollback.
    ///
    /// Returns `false` if nothing named `name` of `kind` is tracked.
    pub fn release(&mut self, kind: ResourceKind, name: &str) -> bool {
        let Some(index) = self
            .tracked
            .iter()
            .rposition(|t| t.kind == kind && t.name == name)
        else {
            return false;
        };
        let tracked = self.tracked.remove(index);
        run_release(tracked);
        true
    }

    /// Number of tracked resources.
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    /// Whether nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Release every tracked resource in [`ROLLBACK_ORDER`].
    pub fn rollback(&mut self) -> Vec<Released> {
        let mut released = Vec::with_capacity(self.tracked.len());
        for kind in ROLLBACK_ORDER {
            while let Some(index) = self.tracked.iter().rposition(|t| t.kind == kind) {
                let tracked = self.tracked.remove(index);
                let (kind, name) = (tracked.kind, tracked.name.clone());
                let panicked = !run_release(tracked);
                released.push(Released {
                    kind,
                    name,
                    panicked,
                });
            }
        }
        released
    }

    /// Release leftovers after a successful iteration, warning per leak.
    pub fn release_leaked(&mut self) -> usize {
        let leaked = self.rollback();
        for resource in &leaked {
            warn!(
                "Resource leak: {} {:?} still held at end of iteration",
                resource.kind, resource.name
            );
        }
        leaked.len()
    }
}

fn run_release(tracked: Tracked) -> bool {
    let Tracked {
        kind,
        name,
        release,
    } = tracked;
    match catch_unwind(AssertUnwindSafe(release)) {
        Ok(()) => {
            debug!("Released {} {:?}", kind, name);
            true
        }
        Err(_) => {
            warn!("Release of {} {:?} panicked", kind, name);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn recorder() -> (Log, impl Fn(&str) -> Box<dyn FnOnce() + Send>) {
        let log: Log = Arc::default();
        let sink = Arc::clone(&log);
        let make = move |name: &str| -> Box<dyn FnOnce() + Send> {
            let sink = Arc::clone(&sink);
            let name = name.to_string();
            Box::new(move || sink.lock().unwrap().push(name))
        };
        (log, make)
    }

    #[test]
    fn test_rollback_follows_fixed_order() {
        let (log, make) = recorder();
        let mut owner = ResourceOwner::new();
        owner.register(ResourceKind::File, "wal", make("wal"));
        owner.register(ResourceKind::BufferPin, "pin-1", make("pin-1"));
        owner.register(ResourceKind::Lock, "lock-a", make("lock-a"));
        owner.register(ResourceKind::BufferPin, "pin-2", make("pin-2"));
        owner.register(ResourceKind::Lock, "lock-b", make("lock-b"));

        let released = owner.rollback();
        assert!(owner.is_empty());
        assert_eq!(
            *log.lock().unwrap(),
            vec!["lock-b", "lock-a", "pin-2", "pin-1", "wal"]
        );
        assert_eq!(released.len(), 5);
        assert!(released.iter().all(|r| !r.panicked));
    }

    #[test]
    fn test_release_single() {
        let (log, make) = recorder();
        let mut owner = ResourceOwner::new();
        owner.register(ResourceKind::Handle, "h", make("h"));
        assert!(!owner.release(ResourceKind::File, "h"));
        assert!(owner.release(ResourceKind::Handle, "h"));
        assert!(owner.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["h"]);
    }

    #[test]
    fn test_panicking_release_does_not_stop_rollback() {
        let (log, make) = recorder();
        let mut owner = ResourceOwner::new();
        owner.register(ResourceKind::Lock, "bad", || panic!("release failed"));
        owner.register(ResourceKind::File, "good", make("good"));

        let released = owner.rollback();
        assert_eq!(released[0].kind, ResourceKind::Lock);
        assert!(released[0].panicked);
        assert_eq!(*log.lock().unwrap(), vec!["good"]);
    }

    #[test]
    fn test_release_leaked_counts() {
        let mut owner = ResourceOwner::new();
        assert_eq!(owner.release_leaked(), 0);
        owner.register(ResourceKind::BufferIo, "io", || {});
        assert_eq!(owner.len(), 1);
        assert_eq!(owner.release_leaked(), 1);
    }
}
