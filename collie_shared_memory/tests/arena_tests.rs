//! Multi-attacher behavior of the arena and flag store.
//!
//! Each `ShmArena` opened here is its own mapping and its own lock file
//! descriptor, so threads stand in for separate processes.

use collie_shared_memory::{
    FlagStore, InitOutcome, Latch, ShmArena, ShmError, ShmOptions, ShmResult, ShmemSizing,
    WaitEvent,
};
use std::sync::{Arc, Barrier};
use std::time::Duration;

const FLAGS: usize = 64;

fn segment_size(n: usize) -> usize {
    let mut sizing = ShmemSizing::new();
    sizing.request("Collie Flags", FlagStore::size(n)).unwrap();
    sizing.total()
}

#[test]
fn test_reinitialize_keeps_contents() -> ShmResult<()> {
    collie_shared_memory::init_tracing();
    let dir = tempfile::tempdir()?;
    let options = ShmOptions::new(dir.path(), "reinit");

    let (arena, _) = ShmArena::create_or_attach(&options, segment_size(FLAGS))?;
    let (flags, outcome) = FlagStore::initialize(&arena, FLAGS)?;
    assert_eq!(outcome, InitOutcome::Created);
    flags.set(3, 42);

    let (again, outcome) = FlagStore::initialize(&arena, FLAGS)?;
    assert_eq!(outcome, InitOutcome::Attached);
    assert_eq!(again.get(3), 42);
    Ok(())
}

#[test]
fn test_late_attacher_sees_writes() -> ShmResult<()> {
    let dir = tempfile::tempdir()?;
    let options = ShmOptions::new(dir.path(), "late");
    let size = segment_size(FLAGS);

    let (first, outcome) = ShmArena::create_or_attach(&options, size)?;
    assert_eq!(outcome, InitOutcome::Created);
    let (writer, _) = FlagStore::initialize(&first, FLAGS)?;
    writer.set(0, 0xDEAD_BEEF);
    writer.set(FLAGS - 1, 7);

    let (second, outcome) = ShmArena::create_or_attach(&options, size)?;
    assert_eq!(outcome, InitOutcome::Attached);
    let (reader, outcome) = FlagStore::initialize(&second, FLAGS)?;
    assert_eq!(outcome, InitOutcome::Attached);
    assert_eq!(reader.get(0), 0xDEAD_BEEF);
    assert_eq!(reader.get(FLAGS - 1), 7);

    reader.set(5, 99);
    assert_eq!(writer.get(5), 99);
    Ok(())
}

#[test]
fn test_concurrent_first_init_creates_once() {
    let dir = tempfile::tempdir().unwrap();
    let options = ShmOptions::new(dir.path(), "race");
    let size = segment_size(FLAGS);
    let workers = 8;
    let start = Arc::new(Barrier::new(workers));

    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let options = options.clone();
            let start = Arc::clone(&start);
            std::thread::spawn(move || -> ShmResult<(InitOutcome, InitOutcome, FlagStore)> {
                start.wait();
                let (arena, segment) = ShmArena::create_or_attach(&options, size)?;
                let (flags, region) = FlagStore::initialize(&arena, FLAGS)?;
                // Every worker writes its own slot; creation must not wipe them.
                flags.set(i, i as u64 + 1);
                Ok((segment, region, flags))
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    let segments_created = results.iter().filter(|r| r.0.is_created()).count();
    let regions_created = results.iter().filter(|r| r.1.is_created()).count();
    assert_eq!(segments_created, 1);
    assert_eq!(regions_created, 1);

    let flags = &results[0].2;
    for i in 0..workers {
        assert_eq!(flags.get(i), i as u64 + 1);
    }
}

#[test]
fn test_attach_with_different_capacity_fails() -> ShmResult<()> {
    let dir = tempfile::tempdir()?;
    let options = ShmOptions::new(dir.path(), "capacity");
    // Room for both sizes so only the region index can object.
    let (arena, _) = ShmArena::create_or_attach(&options, segment_size(2 * FLAGS))?;
    FlagStore::initialize(&arena, FLAGS)?;

    let other = ShmArena::attach(&options)?;
    let err = FlagStore::initialize(&other, FLAGS * 2).unwrap_err();
    assert!(matches!(err, ShmError::SizeMismatch { .. }));
    Ok(())
}

#[test]
fn test_latch_wakes_across_mappings() -> ShmResult<()> {
    let dir = tempfile::tempdir()?;
    let options = ShmOptions::new(dir.path(), "latch");
    let mut sizing = ShmemSizing::new();
    sizing.request("latch", std::mem::size_of::<Latch>())?;
    let size = sizing.total();

    let (owner_arena, _) = ShmArena::create_or_attach(&options, size)?;
    let owner_region = {
        let guard = owner_arena.lock_init()?;
        guard.init_region("latch", std::mem::size_of::<Latch>())?.0
    };
    // SAFETY: the fresh region is zero-filled by set_len, which is a valid
    // unset latch, and it is cache line aligned.
    let owner = unsafe { &*owner_region.as_ptr().cast::<Latch>().as_ptr() };
    owner.own(std::process::id());

    let setter_options = options.clone();
    let handle = std::thread::spawn(move || -> ShmResult<()> {
        let arena = ShmArena::attach(&setter_options)?;
        let region = {
            let guard = arena.lock_init()?;
            guard.init_region("latch", std::mem::size_of::<Latch>())?.0
        };
        std::thread::sleep(Duration::from_millis(20));
        // SAFETY: same region as the owner's, mapped a second time.
        let latch = unsafe { &*region.as_ptr().cast::<Latch>().as_ptr() };
        latch.set();
        Ok(())
    });

    assert_eq!(owner.wait(Duration::from_secs(10)), WaitEvent::Set);
    handle.join().unwrap()?;
    Ok(())
}
