//! Controller configuration and hot reload.
//!
//! The controller reads the engine TOML once at startup. A reload request
//! parses and validates a shadow copy first; only when that succeeds is the
//! active configuration swapped. Only `controller.*` takes effect at
//! runtime: shared memory placement and capacity stay as they were at boot.

use collie_common::config::{ConfigError, EngineConfig};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Result of a reload attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadOutcome {
    /// New configuration is live.
    Applied {
        /// Delay before the reload.
        old_delay: Duration,
        /// Delay now in effect.
        new_delay: Duration,
    },
    /// Nothing to reload from (in-memory configuration).
    NoSource,
    /// Shadow load failed; active configuration unchanged.
    Failed(String),
}

/// Active configuration plus the file it came from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: Option<PathBuf>,
    active: EngineConfig,
}

impl ConfigSource {
    /// Load and validate `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let active = EngineConfig::load_validated(path)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
            active,
        })
    }

    /// Fixed in-memory configuration. Reloads are no-ops.
    pub fn fixed(config: EngineConfig) -> Self {
        Self {
            path: None,
            active: config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.active
    }

    /// Current loop delay.
    pub fn delay(&self) -> Duration {
        self.active.controller.delay()
    }

    /// File backing this source, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Re-read the file and swap in the reloadable sections.
    pub fn reload(&mut self) -> ReloadOutcome {
        let Some(path) = self.path.as_deref() else {
            return ReloadOutcome::NoSource;
        };

        let shadow = match EngineConfig::load_validated(path) {
            Ok(shadow) => shadow,
            Err(e) => {
                warn!(
                    "Configuration reload from {} failed, keeping current settings: {e}",
                    path.display()
                );
                return ReloadOutcome::Failed(e.to_string());
            }
        };

        if shadow.shmem != self.active.shmem {
            warn!(
                "shmem settings changed in {}; they take effect on engine restart",
                path.display()
            );
        }

        let old_delay = self.delay();
        self.active.shared = shadow.shared;
        self.active.controller = shadow.controller;
        self.active.watchdog = shadow.watchdog;
        let new_delay = self.delay();

        info!(
            "Configuration reloaded: delay {}ms -> {}ms",
            old_delay.as_millis(),
            new_delay.as_millis()
        );
        ReloadOutcome::Applied {
            old_delay,
            new_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, Write};
    use tempfile::NamedTempFile;

    fn write_config(file: &mut NamedTempFile, body: &str) {
        let f = file.as_file_mut();
        f.set_len(0).unwrap();
        f.rewind().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    const BASE: &str = r#"
[shared]
service_name = "collie"

[shmem]
instance = "unit"
flag_count = 8

[controller]
delay_ms = 250
"#;

    #[test]
    fn test_reload_applies_delay() {
        let mut file = NamedTempFile::new().unwrap();
        write_config(&mut file, BASE);
        let mut source = ConfigSource::load(file.path()).unwrap();
        assert_eq!(source.delay(), Duration::from_millis(250));

        write_config(&mut file, &BASE.replace("250", "50"));
        assert_eq!(
            source.reload(),
            ReloadOutcome::Applied {
                old_delay: Duration::from_millis(250),
                new_delay: Duration::from_millis(50),
            }
        );
        assert_eq!(source.delay(), Duration::from_millis(50));
    }

    #[test]
    fn test_failed_reload_keeps_active() {
        let mut file = NamedTempFile::new().unwrap();
        write_config(&mut file, BASE);
        let mut source = ConfigSource::load(file.path()).unwrap();

        write_config(&mut file, "[controller\ndelay_ms = ");
        assert!(matches!(source.reload(), ReloadOutcome::Failed(_)));
        assert_eq!(source.delay(), Duration::from_millis(250));

        write_config(&mut file, &BASE.replace("250", "0"));
        assert!(matches!(source.reload(), ReloadOutcome::Failed(_)));
        assert_eq!(source.delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_shmem_changes_are_not_applied() {
        let mut file = NamedTempFile::new().unwrap();
        write_config(&mut file, BASE);
        let mut source = ConfigSource::load(file.path()).unwrap();

        write_config(&mut file, &BASE.replace("flag_count = 8", "flag_count = 16"));
        assert!(matches!(source.reload(), ReloadOutcome::Applied { .. }));
        assert_eq!(source.config().shmem.flag_count, 8);
    }

    #[test]
    fn test_fixed_source_ignores_reload() {
        let mut source = ConfigSource::fixed(EngineConfig::new("collie"));
        assert_eq!(source.path(), None);
        assert_eq!(source.reload(), ReloadOutcome::NoSource);
    }
}
