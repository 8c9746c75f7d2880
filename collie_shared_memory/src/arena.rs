//! Named-region arena inside one shared memory segment.
//!
//! The segment file `<dir>/<instance>.shm` starts with an [`ArenaHeader`]
//! holding a bump pointer and an index of named regions. The first process
//! to run the bootstrap creates the segment; every later process attaches
//! to it. Both decisions, and every index lookup, happen while holding the
//! instance-wide init lock (`flock` on `<dir>/<instance>.lock`).

use crate::error::{ShmError, ShmResult};
use crate::platform::{map_shared, open_segment_file};
use crate::sizing::cache_aligned;
use collie_common::config::ShmemConfig;
use collie_common::consts::{CACHE_LINE_SIZE, MAX_REGION_NAME_LEN, MAX_REGIONS};
use memmap2::MmapMut;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use static_assertions::const_assert_eq;
use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, info};

/// Magic number identifying an initialized collie segment.
pub const COLLIE_SHM_MAGIC: u64 = u64::from_le_bytes(*b"COLLIE\x00\x01");

/// Result of a create-or-open operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// This call created the object; the caller initializes it.
    Created,
    /// The object already existed; its contents must be left alone.
    Attached,
}

impl InitOutcome {
    /// `true` for [`InitOutcome::Created`].
    pub fn is_created(self) -> bool {
        matches!(self, Self::Created)
    }
}

impl fmt::Display for InitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Attached => f.write_str("attached"),
        }
    }
}

// ─── Header layout ──────────────────────────────────────────────────

#[derive(Clone, Copy)]
#[repr(C)]
struct RegionEntry {
    /// NUL-terminated name.
    name: [u8; MAX_REGION_NAME_LEN + 1],
    offset: u64,
    size: u64,
}

#[repr(C, align(64))]
struct ArenaHeader {
    magic: u64,
    total_size: u64,
    /// Bump pointer for the next region.
    next_offset: u64,
    region_count: u32,
    _pad: u32,
    regions: [RegionEntry; MAX_REGIONS],
}

const_assert_eq!(core::mem::size_of::<RegionEntry>(), 64);
const_assert_eq!(core::mem::size_of::<ArenaHeader>() % CACHE_LINE_SIZE, 0);

/// Bytes reserved at the start of every segment for the header and index.
pub const fn arena_header_size() -> usize {
    core::mem::size_of::<ArenaHeader>()
}

impl RegionEntry {
    fn name_bytes(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        &self.name[..end]
    }
}

fn validate_region_name(name: &str) -> ShmResult<()> {
    if name.is_empty() || name.len() > MAX_REGION_NAME_LEN || name.as_bytes().contains(&0) {
        return Err(ShmError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

// ─── Options ────────────────────────────────────────────────────────

/// Location of one engine instance's shared memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShmOptions {
    /// Directory holding the segment and lock files.
    pub dir: PathBuf,
    /// Instance name.
    pub instance: String,
}

impl ShmOptions {
    /// Options for `instance` under `dir`.
    pub fn new(dir: impl Into<PathBuf>, instance: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            instance: instance.into(),
        }
    }

    /// Options from the `[shmem]` configuration section.
    pub fn from_config(config: &ShmemConfig) -> Self {
        Self::new(config.dir.clone(), config.instance.clone())
    }

    /// Path of the segment file.
    pub fn segment_path(&self) -> PathBuf {
        self.dir.join(format!("{}.shm", self.instance))
    }

    /// Path of the init lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(format!("{}.lock", self.instance))
    }
}

fn acquire_init_lock(options: &ShmOptions) -> ShmResult<Flock<File>> {
    let path = options.lock_path();
    let mut file = open_segment_file(&path, true)?;
    loop {
        match Flock::lock(file, FlockArg::LockExclusive) {
            Ok(lock) => return Ok(lock),
            Err((f, Errno::EINTR)) => file = f,
            Err((_, errno)) => return Err(errno.into()),
        }
    }
}

// ─── Arena ──────────────────────────────────────────────────────────

struct ArenaInner {
    options: ShmOptions,
    total_size: usize,
    base: NonNull<u8>,
    _mmap: MmapMut,
}

// SAFETY: `base` points into `_mmap`, which lives as long as the inner
// value. Region contents are only accessed through atomics, and the header
// only while holding the init lock.
unsafe impl Send for ArenaInner {}
unsafe impl Sync for ArenaInner {}

/// Handle to a mapped instance segment. Cheap to clone.
#[derive(Clone)]
pub struct ShmArena {
    inner: Arc<ArenaInner>,
}

impl fmt::Debug for ShmArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmArena")
            .field("segment", &self.inner.options.segment_path())
            .field("total_size", &self.inner.total_size)
            .finish()
    }
}

/// Name, offset and size of a registered region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    /// Region name.
    pub name: String,
    /// Offset from the segment start.
    pub offset: usize,
    /// Region size in bytes.
    pub size: usize,
}

impl ShmArena {
    /// Create the instance segment with `total_size` bytes, or attach to it
    /// if another process already created it.
    ///
    /// The size must come from the sizing pass ([`crate::ShmemSizing`]).
    pub fn create_or_attach(
        options: &ShmOptions,
        total_size: usize,
    ) -> ShmResult<(Self, InitOutcome)> {
        let total_size = total_size.max(arena_header_size());
        let _lock = acquire_init_lock(options)?;

        let path = options.segment_path();
        let file = open_segment_file(&path, true)?;
        let found = file.metadata()?.len() as usize;
        if found != 0 && found != total_size {
            return Err(ShmError::SizeMismatch {
                name: path.display().to_string(),
                expected: total_size,
                found,
            });
        }
        if found == 0 {
            file.set_len(total_size as u64)?;
        }

        let arena = Self::map(options, &file, total_size)?;
        // SAFETY: the init lock is held; nobody else touches the header.
        let header = unsafe { &mut *arena.header_ptr() };
        let outcome = match header.magic {
            // Fresh file, or a creator that died before publishing the magic.
            0 => {
                header.total_size = total_size as u64;
                header.next_offset = arena_header_size() as u64;
                header.region_count = 0;
                header.magic = COLLIE_SHM_MAGIC;
                InitOutcome::Created
            }
            COLLIE_SHM_MAGIC if header.total_size as usize == total_size => InitOutcome::Attached,
            COLLIE_SHM_MAGIC => {
                return Err(ShmError::SizeMismatch {
                    name: path.display().to_string(),
                    expected: total_size,
                    found: header.total_size as usize,
                });
            }
            _ => {
                return Err(ShmError::Corrupted {
                    path: path.display().to_string(),
                });
            }
        };

        info!(
            "Shared memory segment {} {} ({} bytes)",
            path.display(),
            outcome,
            total_size
        );
        Ok((arena, outcome))
    }

    /// Attach to an existing, initialized segment. Never creates it.
    pub fn attach(options: &ShmOptions) -> ShmResult<Self> {
        let path = options.segment_path();
        let file = open_segment_file(&path, false)?;
        let _lock = acquire_init_lock(options)?;

        let len = file.metadata()?.len() as usize;
        if len < arena_header_size() {
            return Err(ShmError::NotFound {
                name: path.display().to_string(),
            });
        }

        let arena = Self::map(options, &file, len)?;
        // SAFETY: the init lock is held.
        let header = unsafe { &*arena.header_ptr() };
        if header.magic != COLLIE_SHM_MAGIC || header.total_size as usize != len {
            return Err(ShmError::Corrupted {
                path: path.display().to_string(),
            });
        }

        debug!("Attached to shared memory segment {}", path.display());
        Ok(arena)
    }

    /// Delete the segment and lock files of an instance.
    ///
    /// Existing mappings stay valid until dropped.
    pub fn remove(options: &ShmOptions) -> ShmResult<()> {
        for path in [options.segment_path(), options.lock_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn map(options: &ShmOptions, file: &File, len: usize) -> ShmResult<Self> {
        let mut mmap = map_shared(file, len)?;
        let base = NonNull::new(mmap.as_mut_ptr()).ok_or(ShmError::AlignmentError {
            address: 0,
            alignment: CACHE_LINE_SIZE,
        })?;
        let address = base.as_ptr() as usize;
        if address % CACHE_LINE_SIZE != 0 {
            return Err(ShmError::AlignmentError {
                address,
                alignment: CACHE_LINE_SIZE,
            });
        }

        Ok(Self {
            inner: Arc::new(ArenaInner {
                options: options.clone(),
                total_size: len,
                base,
                _mmap: mmap,
            }),
        })
    }

    /// Take the instance-wide init lock.
    ///
    /// The lock is not reentrant: never call this while already holding a
    /// guard, or the second call blocks forever.
    pub fn lock_init(&self) -> ShmResult<InitLockGuard<'_>> {
        Ok(InitLockGuard {
            arena: self,
            _lock: acquire_init_lock(&self.inner.options)?,
        })
    }

    /// Snapshot of the region index.
    pub fn regions(&self) -> ShmResult<Vec<RegionInfo>> {
        let _guard = self.lock_init()?;
        // SAFETY: the init lock is held.
        let header = unsafe { &*self.header_ptr() };
        let count = (header.region_count as usize).min(MAX_REGIONS);
        Ok(header.regions[..count]
            .iter()
            .map(|entry| RegionInfo {
                name: String::from_utf8_lossy(entry.name_bytes()).into_owned(),
                offset: entry.offset as usize,
                size: entry.size as usize,
            })
            .collect())
    }

    /// Options this arena was opened with.
    pub fn options(&self) -> &ShmOptions {
        &self.inner.options
    }

    /// Mapped segment size in bytes.
    pub fn total_size(&self) -> usize {
        self.inner.total_size
    }

    /// Path of the segment file.
    pub fn segment_path(&self) -> PathBuf {
        self.inner.options.segment_path()
    }

    fn header_ptr(&self) -> *mut ArenaHeader {
        self.inner.base.as_ptr().cast::<ArenaHeader>()
    }
}

/// Exclusive hold on the instance-wide init lock. Released on drop.
pub struct InitLockGuard<'a> {
    arena: &'a ShmArena,
    _lock: Flock<File>,
}

impl InitLockGuard<'_> {
    /// Look up region `name`, allocating `size` bytes for it if absent.
    ///
    /// On [`InitOutcome::Created`] the caller initializes the region before
    /// dropping the guard. On [`InitOutcome::Attached`] the recorded size
    /// must equal `size`.
    pub fn init_region(&self, name: &str, size: usize) -> ShmResult<(Region, InitOutcome)> {
        validate_region_name(name)?;
        let arena = self.arena;
        // SAFETY: `self` proves the init lock is held.
        let header = unsafe { &mut *arena.header_ptr() };
        let count = header.region_count as usize;
        if count > MAX_REGIONS {
            return Err(ShmError::Corrupted {
                path: arena.segment_path().display().to_string(),
            });
        }

        if let Some(entry) = header.regions[..count]
            .iter()
            .find(|entry| entry.name_bytes() == name.as_bytes())
        {
            if entry.size as usize != size {
                return Err(ShmError::SizeMismatch {
                    name: name.to_string(),
                    expected: size,
                    found: entry.size as usize,
                });
            }
            let region = Region::new(arena, entry.offset as usize, size);
            return Ok((region, InitOutcome::Attached));
        }

        if count == MAX_REGIONS {
            return Err(ShmError::IndexFull {
                name: name.to_string(),
            });
        }

        let offset = cache_aligned(header.next_offset as usize)?;
        let available = arena.total_size().saturating_sub(offset);
        if size > available {
            return Err(ShmError::OutOfSpace {
                name: name.to_string(),
                requested: size,
                available,
            });
        }

        let entry = &mut header.regions[count];
        entry.name = [0; MAX_REGION_NAME_LEN + 1];
        entry.name[..name.len()].copy_from_slice(name.as_bytes());
        entry.offset = offset as u64;
        entry.size = size as u64;
        header.region_count += 1;
        header.next_offset = (offset + size) as u64;

        debug!("Allocated region {:?}: {} bytes at offset {}", name, size, offset);
        Ok((Region::new(arena, offset, size), InitOutcome::Created))
    }

    /// Arena this guard locks.
    pub fn arena(&self) -> &ShmArena {
        self.arena
    }
}

/// A named region inside the arena. Keeps the mapping alive.
#[derive(Debug, Clone)]
pub struct Region {
    arena: ShmArena,
    offset: usize,
    size: usize,
}

impl Region {
    fn new(arena: &ShmArena, offset: usize, size: usize) -> Self {
        Self {
            arena: arena.clone(),
            offset,
            size,
        }
    }

    /// Start of the region. Cache line aligned.
    pub fn as_ptr(&self) -> NonNull<u8> {
        // SAFETY: offset + size <= total_size was checked at allocation.
        unsafe { self.arena.inner.base.add(self.offset) }
    }

    /// Region size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Offset from the segment start.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Arena owning this region.
    pub fn arena(&self) -> &ShmArena {
        &self.arena
    }

    /// Zero the whole region. Only meaningful right after creation.
    pub(crate) fn zero(&self) {
        // SAFETY: the region lies within the mapping.
        unsafe { std::ptr::write_bytes(self.as_ptr().as_ptr(), 0, self.size) }
    }
}

/// Whether the segment file of an instance exists.
pub fn segment_exists(options: &ShmOptions) -> bool {
    options.segment_path().exists()
}
