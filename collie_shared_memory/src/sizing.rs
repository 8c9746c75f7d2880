//! Shared memory sizing pass.
//!
//! Every component contributes the byte size of its regions before the
//! segment is mapped. The arena lays regions out on cache line boundaries,
//! so each request is rounded up here the same way.

use crate::arena::arena_header_size;
use crate::error::{ShmError, ShmResult};
use collie_common::consts::CACHE_LINE_SIZE;

/// Overflow-checked addition of two sizes.
pub fn add_size(a: usize, b: usize) -> ShmResult<usize> {
    a.checked_add(b).ok_or(ShmError::SizeOverflow)
}

/// Overflow-checked multiplication of two sizes.
pub fn mul_size(a: usize, b: usize) -> ShmResult<usize> {
    a.checked_mul(b).ok_or(ShmError::SizeOverflow)
}

/// Round `size` up to the next cache line boundary.
pub fn cache_aligned(size: usize) -> ShmResult<usize> {
    let padded = add_size(size, CACHE_LINE_SIZE - 1)?;
    Ok(padded & !(CACHE_LINE_SIZE - 1))
}

/// Accumulates region requests into the total segment size.
#[derive(Debug, Clone)]
pub struct ShmemSizing {
    total: usize,
    requests: Vec<(String, usize)>,
}

impl ShmemSizing {
    /// Start a sizing pass. The arena header is counted up front.
    pub fn new() -> Self {
        Self {
            total: arena_header_size(),
            requests: Vec::new(),
        }
    }

    /// Count a region of `size` bytes.
    pub fn request(&mut self, name: &str, size: usize) -> ShmResult<&mut Self> {
        self.total = add_size(self.total, cache_aligned(size)?)?;
        self.requests.push((name.to_string(), size));
        Ok(self)
    }

    /// Total segment size covering the header and every request so far.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Requests in registration order.
    pub fn requests(&self) -> &[(String, usize)] {
        &self.requests
    }
}

impl Default for ShmemSizing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_mul_overflow() {
        assert_eq!(add_size(2, 3).unwrap(), 5);
        assert!(matches!(add_size(usize::MAX, 1), Err(ShmError::SizeOverflow)));
        assert_eq!(mul_size(8, 64).unwrap(), 512);
        assert!(matches!(mul_size(usize::MAX, 2), Err(ShmError::SizeOverflow)));
    }

    #[test]
    fn test_cache_aligned() {
        assert_eq!(cache_aligned(0).unwrap(), 0);
        assert_eq!(cache_aligned(1).unwrap(), 64);
        assert_eq!(cache_aligned(64).unwrap(), 64);
        assert_eq!(cache_aligned(65).unwrap(), 128);
        assert!(cache_aligned(usize::MAX).is_err());
    }

    #[test]
    fn test_sizing_accumulates_aligned_requests() {
        let mut sizing = ShmemSizing::new();
        let base = sizing.total();
        assert_eq!(base % CACHE_LINE_SIZE, 0);

        sizing.request("a", 8).unwrap().request("b", 100).unwrap();
        assert_eq!(sizing.total(), base + 64 + 128);
        assert_eq!(sizing.requests().len(), 2);
        assert_eq!(sizing.requests()[1], ("b".to_string(), 100));
    }
}
