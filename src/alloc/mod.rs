//! # Alloc
//!
//! Executable memory for hook stubs and trampolines, preferably within `jmp rel32` reach of the
//! hook site

pub mod proximity;
pub mod search;

use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;
use tracing::warn;

use self::proximity::{Allocation, ProximityAllocator, ProximityError};

/// The furthest distance a `jmp rel32` can cover (2 GiB)
pub const NEAR_RANGE: usize = 0x8000_0000;

lazy_static! {
    /// Process-wide pool set, shared by every hook
    static ref POOL: Mutex<ProximityAllocator> = Mutex::new(ProximityAllocator::new(NEAR_RANGE));
}

/// A chunk of read-write-execute memory.
///
/// Dropping it returns the chunk to its pool; the pool itself stays mapped.
pub struct ExecutableMemory {
    /// Underlying pool chunk
    data: Allocation,
}

impl ExecutableMemory {
    /// Address of the first byte
    pub fn address(&self) -> usize {
        self.data.as_ptr() as usize
    }

    /// Size of the chunk in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the chunk is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Copies `code` to the start of the chunk
    pub fn write(&mut self, code: &[u8]) -> Result<(), ProximityError> {
        if code.len() > self.data.len() {
            return Err(ProximityError::TooLarge {
                needed: code.len(),
                available: self.data.len(),
            });
        }
        self.data[..code.len()].copy_from_slice(code);
        crate::patcher::flush_instruction_cache(self.data.as_ptr(), code.len());
        Ok(())
    }
}

/// Allocates `size` bytes of executable memory, close to `origin` when possible.
///
/// If nothing can be mapped within [`NEAR_RANGE`] the memory comes from anywhere in the process;
/// callers then have to reach it with an absolute jump.
pub fn allocate_executable(origin: usize, size: usize) -> Result<ExecutableMemory, ProximityError> {
    let mut pool = POOL.lock().unwrap_or_else(PoisonError::into_inner);
    let data = match pool.allocate_near(origin, size) {
        Ok(data) => data,
        Err(e) => {
            warn!("No executable memory near {:#x} ({e}), using any address", origin);
            pool.allocate_anywhere(size)?
        }
    };
    Ok(ExecutableMemory { data })
}
