//! Private per-run working memory of the controller.
//!
//! Allocations live until the next [`WorkArena::reset`], which the
//! controller calls after every successful iteration and on every error
//! recovery, so nothing an iteration allocates outlives it.

/// Bump-style scratch arena. Not shared with other processes.
#[derive(Debug, Default)]
pub struct WorkArena {
    chunks: Vec<Box<[u8]>>,
    allocated: usize,
    peak: usize,
    resets: u64,
}

impl WorkArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate `len` zeroed bytes.
    pub fn alloc(&mut self, len: usize) -> &mut [u8] {
        self.allocated += len;
        self.peak = self.peak.max(self.allocated);
        self.chunks.push(vec![0u8; len].into_boxed_slice());
        let last = self.chunks.len() - 1;
        &mut self.chunks[last]
    }

    /// Bytes allocated since the last reset.
    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    /// Live allocations since the last reset.
    pub fn allocation_count(&self) -> usize {
        self.chunks.len()
    }

    /// Highest [`allocated_bytes`](Self::allocated_bytes) ever observed.
    pub fn peak_bytes(&self) -> usize {
        self.peak
    }

    /// Number of resets so far.
    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Free everything.
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.allocated = 0;
        self.resets += 1;
    }
}
