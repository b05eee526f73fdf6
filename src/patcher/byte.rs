//! Plain byte overwrites with rollback

use std::ptr;

use super::{write_contiguous, PatchGuard, Patcher};

/// Writes raw bytes over a location and remembers what was there.
///
/// Needs the target to be writable already; wrap it in a
/// [`PermissionWrapper`](super::mem::PermissionWrapper) for code pages. Never fails.
#[derive(Default)]
pub struct BytePatcher;
impl BytePatcher {
    /// Creates a new [`BytePatcher`]
    pub fn new() -> Self {
        Self
    }
}
unsafe impl Patcher for BytePatcher {
    type Error = ();
    type Guard<'a> = BytePatchGuard;

    unsafe fn patch<'a>(
        &'a self,
        location: *mut u8,
        patch: &[u8],
    ) -> Result<Self::Guard<'a>, Self::Error> {
        Ok(BytePatchGuard::patch(location, patch))
    }
}
/// Original bytes of a [`BytePatcher`] write, put back on drop
pub struct BytePatchGuard {
    /// Original data from `location`
    original: Vec<u8>,
    /// Location of the patch
    location: *mut u8,
}
impl BytePatchGuard {
    /// Saves the bytes under `patch` and writes it
    ///
    /// # Safety
    ///
    /// `location` must be readable and writable for `patch.len()` bytes
    unsafe fn patch(location: *mut u8, patch: &[u8]) -> Self {
        let original = read_bytes(location, patch.len());
        write_contiguous(location, patch);
        Self { original, location }
    }

    /// Bytes that were at the location before it was patched
    pub fn original(&self) -> &[u8] {
        &self.original
    }

    /// Location of the patch
    pub fn location(&self) -> *const u8 {
        self.location
    }
}
unsafe impl PatchGuard for BytePatchGuard {}
impl Drop for BytePatchGuard {
    fn drop(&mut self) {
        // Safety: the range was writable when patched and the hook owning it is still alive
        unsafe { write_contiguous(self.location, &self.original) };
    }
}

// The guard only refers to foreign code memory, never to Rust-owned data
unsafe impl Send for BytePatchGuard {}
unsafe impl Sync for BytePatchGuard {}

/// Reads `len` bytes at `location` into a vector, for callers that need to capture original bytes
/// before a permanent [`write_bytes`](super::write_bytes)
///
/// # Safety
///
/// `location` must be valid for reads of `len` bytes
pub unsafe fn read_bytes(location: *const u8, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    ptr::copy_nonoverlapping(location, out.as_mut_ptr(), len);
    out
}

#[cfg(test)]
mod tests {
    use crate::patcher::byte::{read_bytes, BytePatcher};
    use crate::patcher::{PatchGuard, Patcher};

    /// Word-aligned stand-in for a hook site
    #[repr(align(8))]
    struct Site([u8; 16]);

    /// `movss xmm0, [rip+0x10]` followed by `ret` and padding
    const PROLOGUE: [u8; 16] = [
        0xF3, 0x0F, 0x10, 0x05, 0x10, 0x00, 0x00, 0x00, 0xC3, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC, 0xCC,
    ];

    #[test]
    fn jump_is_written_and_reverted() {
        let mut site = Site(PROLOGUE);
        let ptr = site.0.as_mut_ptr();
        let jump = [0xE9, 0x00, 0x10, 0x00, 0x00];

        let guard = unsafe { BytePatcher::new().patch(ptr, &jump).unwrap() };
        assert_eq!(guard.original(), &PROLOGUE[..5]);
        assert_eq!(guard.location(), ptr as *const u8);
        assert_eq!(unsafe { read_bytes(ptr, 5) }, jump);
        // bytes past the jump stay as they were
        assert_eq!(unsafe { read_bytes(ptr.add(5), 11) }, &PROLOGUE[5..]);

        guard.restore();
        assert_eq!(site.0, PROLOGUE);
    }

    #[test]
    fn dropping_the_guard_reverts() {
        let mut site = Site(PROLOGUE);
        let ptr = site.0.as_mut_ptr();
        {
            let _guard = unsafe { BytePatcher::new().patch(ptr.add(8), &[0x90]).unwrap() };
            assert_eq!(unsafe { read_bytes(ptr.add(8), 1) }, [0x90]);
        }
        assert_eq!(site.0, PROLOGUE);
    }
}
