//! Pools of executable memory mapped close to hook sites

use std::ops::Range;
use std::slice;

use slice_pool::sync::{SliceBox, SlicePool};
use thiserror::Error;
use tracing::debug;

use super::search::{Direction, FreePages};

/// A chunk handed out by a pool
pub type Allocation = SliceBox<u8>;

/// Errors that occur while allocating executable memory
#[derive(Debug, Error)]
pub enum ProximityError {
    /// No free memory could be mapped inside the requested window
    #[error("ran out of memory within {max_distance:#x} bytes of {origin:#x}")]
    OutOfMemory {
        /// Address the allocation had to be close to
        origin: usize,
        /// Maximum allowed distance from `origin`
        max_distance: usize,
    },
    /// Mapping memory anywhere in the process failed
    #[error("could not map executable memory: {0}")]
    Mmap(String),
    /// Error while querying the address space
    #[error("{0}")]
    Region(#[from] region::Error),
    /// Code did not fit in the allocation it was written to
    #[error("{needed} bytes of code do not fit in {available} bytes")]
    TooLarge {
        /// Bytes that had to be written
        needed: usize,
        /// Size of the allocation
        available: usize,
    },
}

/// Set of read-write-execute pools, each one a separate memory mapping
pub struct ProximityAllocator {
    /// Maximum distance between an origin and any byte of memory allocated for it
    max_distance: usize,
    /// Pools mapped so far; never unmapped
    pools: Vec<SlicePool<u8>>,
}

impl ProximityAllocator {
    /// Creates an empty allocator
    pub fn new(max_distance: usize) -> Self {
        Self {
            max_distance,
            pools: Vec::new(),
        }
    }

    /// Window of addresses acceptable for `origin`
    fn window(&self, origin: usize) -> Range<usize> {
        origin.saturating_sub(self.max_distance)..origin.saturating_add(self.max_distance)
    }

    /// Allocates `size` bytes whose every byte lies within `max_distance` of `origin`.
    ///
    /// Existing pools are tried first; otherwise a new pool is mapped at the nearest free page,
    /// searching upwards before downwards.
    pub fn allocate_near(&mut self, origin: usize, size: usize) -> Result<Allocation, ProximityError> {
        let window = self.window(origin);
        let in_window = |pool: &SlicePool<u8>| {
            let start = pool.as_ptr() as usize;
            window.contains(&start) && window.contains(&(start + pool.len() - 1))
        };
        if let Some(chunk) = self
            .pools
            .iter()
            .filter(|pool| in_window(pool))
            .find_map(|pool| pool.alloc(size))
        {
            return Ok(chunk);
        }

        let pool_len = pool_len(size);
        let candidates = FreePages::new(origin, window.clone(), Direction::Up)
            .chain(FreePages::new(origin, window.clone(), Direction::Down));
        for candidate in candidates {
            let address = candidate?;
            if address.saturating_add(pool_len) > window.end {
                continue;
            }
            // a fixed-address map replaces whatever it covers, so the whole span must be free first
            if !span_is_free(address, pool_len) {
                continue;
            }
            let Ok(map) = map_pool(Some(address), pool_len) else {
                continue;
            };
            let pool = SlicePool::new(map);
            if !in_window(&pool) {
                continue;
            }
            debug!("Mapped executable pool at {:#x} for {:#x}", address, origin);
            let chunk = pool.alloc(size).ok_or(ProximityError::OutOfMemory {
                origin,
                max_distance: self.max_distance,
            })?;
            self.pools.push(pool);
            return Ok(chunk);
        }

        Err(ProximityError::OutOfMemory {
            origin,
            max_distance: self.max_distance,
        })
    }

    /// Allocates `size` bytes anywhere in the address space
    pub fn allocate_anywhere(&mut self, size: usize) -> Result<Allocation, ProximityError> {
        if let Some(chunk) = self.pools.iter().find_map(|pool| pool.alloc(size)) {
            return Ok(chunk);
        }
        let pool = SlicePool::new(map_pool(None, pool_len(size))?);
        let chunk = pool.alloc(size).ok_or(ProximityError::Mmap(format!(
            "fresh pool could not hold {size} bytes"
        )))?;
        self.pools.push(pool);
        Ok(chunk)
    }

    /// Number of pools mapped so far
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

/// Pool size for a request of `size` bytes: whole pages, at least one
fn pool_len(size: usize) -> usize {
    let page = region::page::size();
    size.max(1).div_ceil(page) * page
}

/// Whether no page of `address..address + len` is mapped
fn span_is_free(address: usize, len: usize) -> bool {
    let page = region::page::size();
    (address..address.saturating_add(len))
        .step_by(page)
        .all(|p| matches!(region::query(p as *const u8), Err(region::Error::UnmappedRegion)))
}

/// Maps `len` bytes of read-write-execute memory, at `address` if given.
///
/// With an address the mapping is placed there unconditionally; callers check the span is free.
fn map_pool(address: Option<usize>, len: usize) -> Result<PoolMemory, ProximityError> {
    let mut options = vec![
        mmap::MapOption::MapReadable,
        mmap::MapOption::MapWritable,
        mmap::MapOption::MapExecutable,
    ];
    if let Some(address) = address {
        options.push(mmap::MapOption::MapAddr(address as *const u8));
    }
    let map = mmap::MemoryMap::new(len, &options).map_err(|e| ProximityError::Mmap(e.to_string()))?;
    if let Some(address) = address {
        if map.data() as usize != address {
            return Err(ProximityError::Mmap(format!(
                "requested {:#x}, got {:#x}",
                address,
                map.data() as usize
            )));
        }
    }
    Ok(PoolMemory(map))
}

/// Memory mapping exposed as a byte slice so `SlicePool` can carve it up
struct PoolMemory(mmap::MemoryMap);

impl AsRef<[u8]> for PoolMemory {
    fn as_ref(&self) -> &[u8] {
        // Safety: the mapping is readable for its whole length and lives as long as `self`
        unsafe { slice::from_raw_parts(self.0.data(), self.0.len()) }
    }
}

impl AsMut<[u8]> for PoolMemory {
    fn as_mut(&mut self) -> &mut [u8] {
        // Safety: as above, and the mapping is writable
        unsafe { slice::from_raw_parts_mut(self.0.data(), self.0.len()) }
    }
}

// The mapping is plain process memory with no thread affinity
unsafe impl Send for PoolMemory {}
unsafe impl Sync for PoolMemory {}
