//! # Patcher
//!
//! Writing bytes into loaded code, either reversibly through a [`Patcher`] and its guard or
//! permanently through [`write_bytes`]

pub mod byte;
pub mod mem;

use std::ptr;
use std::sync::atomic::{AtomicU64, Ordering};

pub use mem::{flush_instruction_cache, write_bytes};

/// Reversible writer: every patch hands back a guard holding what it replaced
///
/// # Safety
///
/// Implementations write to arbitrary addresses and must document what they require of the target
pub unsafe trait Patcher {
    /// Failure while patching, `()` for patchers that cannot fail
    type Error;
    /// Rollback handle; dropping it restores the location
    type Guard<'a>: PatchGuard + 'a
    where
        Self: 'a;

    /// Writes `patch` at `target`
    ///
    /// # Safety
    ///
    /// `target` must satisfy the implementation's requirements for `patch.len()` bytes
    unsafe fn patch<'a>(
        &'a self,
        target: *mut u8,
        patch: &[u8],
    ) -> Result<Self::Guard<'a>, Self::Error>;
}

/// Outstanding patch
///
/// # Safety
///
/// Dropping the guard must put back every original byte, whether or not `restore` was called
pub unsafe trait PatchGuard: Sized {
    /// Puts the original bytes back
    fn restore(self) {
        // the rollback lives in `Drop`
    }
}

/// Copies `bytes` to `location` as one contiguous write.
///
/// When the destination fits inside one naturally aligned 8-byte word the whole word is replaced
/// with a single atomic store, so a thread fetching those bytes sees either the old or the new
/// sequence and never a mix of both.
///
/// # Safety
///
/// `location` must be valid for writes of `bytes.len()` bytes, and for short writes the enclosing
/// aligned word must be readable and writable
pub(crate) unsafe fn write_contiguous(location: *mut u8, bytes: &[u8]) {
    let start = location as usize;
    let word = start & !7;
    if !bytes.is_empty() && start + bytes.len() <= word + 8 {
        // Safety: an aligned word never crosses a page, so it shares the caller's permissions
        let cell = &*(word as *const AtomicU64);
        let mut value = cell.load(Ordering::SeqCst).to_ne_bytes();
        value[start - word..start - word + bytes.len()].copy_from_slice(bytes);
        cell.store(u64::from_ne_bytes(value), Ordering::SeqCst);
    } else {
        ptr::copy_nonoverlapping(bytes.as_ptr(), location, bytes.len());
    }
}

#[cfg(test)]
mod tests {
    use super::write_contiguous;

    #[test]
    fn short_write_inside_a_word() {
        let mut data = [0u64; 2];
        let ptr = data.as_mut_ptr() as *mut u8;
        unsafe { write_contiguous(ptr.add(3), &[0x90, 0x90]) };
        let bytes: [u8; 16] = unsafe { std::mem::transmute(data) };
        assert_eq!(&bytes[..8], &[0, 0, 0, 0x90, 0x90, 0, 0, 0]);
        assert_eq!(&bytes[8..], &[0; 8]);
    }

    #[test]
    fn write_across_words() {
        let mut data = [0u64; 3];
        let ptr = data.as_mut_ptr() as *mut u8;
        let patch = [0xE9, 0x11, 0x22, 0x33, 0x44, 0x90, 0x90];
        unsafe { write_contiguous(ptr.add(5), &patch) };
        let bytes: [u8; 24] = unsafe { std::mem::transmute(data) };
        assert_eq!(&bytes[5..12], &patch);
        assert!(bytes[..5].iter().chain(&bytes[12..]).all(|&b| b == 0));
    }
}
