//! Patching code pages that are mapped read-only

use region::Protection;
use thiserror::Error;
use tracing::error;

use super::{write_contiguous, PatchGuard, Patcher};

/// Failure of a [`PermissionWrapper`] patch
#[derive(Debug, Error)]
pub enum PermissionError<E> {
    /// The target's protection could not be changed
    #[error("could not unprotect the patch target")]
    ProtectionError(#[from] region::Error),
    /// The inner patcher failed
    #[error("{0:?}")]
    CustomError(E),
}
impl From<()> for PermissionError<()> {
    fn from(e: ()) -> Self {
        Self::CustomError(e)
    }
}

/// Makes sure instruction fetches observe bytes that were just written to `location`
pub fn flush_instruction_cache(location: *const u8, len: usize) {
    #[cfg(windows)]
    unsafe {
        use tracing::warn;
        use windows::Win32::System::Diagnostics::Debug::FlushInstructionCache;
        use windows::Win32::System::Threading::GetCurrentProcess;

        if let Err(e) = FlushInstructionCache(GetCurrentProcess(), Some(location as _), len) {
            warn!("FlushInstructionCache failed for {:#x}: {e}", location as usize);
        }
    }
    #[cfg(not(windows))]
    {
        // x86 keeps instruction fetch coherent with stores on the same core; order the write before any jump into it
        let _ = (location, len);
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}

/// Overwrites `bytes.len()` bytes of (normally read-only) code at `location`.
///
/// The pages are made writable, the bytes are copied in one contiguous write, the previous
/// protection is restored and the instruction cache is flushed. Nothing is saved for rollback;
/// callers needing reversibility capture the original bytes first or use [`PermissionWrapper`].
///
/// # Safety
///
/// `location` must be mapped for `bytes.len()` bytes and no other thread may be executing inside that range
pub unsafe fn write_bytes(location: *mut u8, bytes: &[u8]) -> Result<(), region::Error> {
    {
        let _guard = region::protect_with_handle(location, bytes.len(), Protection::all())?;
        write_contiguous(location, bytes);
    }
    flush_instruction_cache(location, bytes.len());
    Ok(())
}

/// Makes the target pages writable around an inner patcher's write and again around its rollback.
///
/// Protection is restored and the instruction cache flushed after both.
///
/// # Safety
///
/// Only the `patch.len()` bytes at the target are unprotected, so the inner patcher must not write
/// past them. Targets are expected to be game code, not memory Rust holds references to.
#[derive(Default)]
pub struct PermissionWrapper<P: Patcher> {
    /// Inner patcher
    patcher: P,
}
impl<P: Patcher> PermissionWrapper<P> {
    /// Wraps `patcher`
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }
}

/// Casts a pointer into read-only code for [`PermissionWrapper::patch`].
///
/// # Safety
///
/// The result is not writable by itself; only pass it to [`PermissionWrapper::patch`].
pub unsafe fn to_mut<T>(ptr: *const T) -> *mut T {
    ptr as _
}

unsafe impl<P> Patcher for PermissionWrapper<P>
where
    P: Patcher,
    PermissionError<P::Error>: From<P::Error>,
{
    type Error = PermissionError<P::Error>;
    type Guard<'a> = PermissionWrapperGuard<P::Guard<'a>> where Self: 'a;

    unsafe fn patch<'a>(
        &'a self,
        location: *mut u8,
        patch: &[u8],
    ) -> Result<Self::Guard<'a>, Self::Error> {
        let guard = {
            let _guard = region::protect_with_handle(location, patch.len(), Protection::all())?;
            self.patcher.patch(location, patch)?
        };
        flush_instruction_cache(location, patch.len());
        Ok(PermissionWrapperGuard::guard(guard, location, patch.len()))
    }
}

/// Guard of a [`PermissionWrapper`] patch
pub struct PermissionWrapperGuard<G: PatchGuard> {
    /// Inner guard, taken on drop
    guard: Option<G>,
    /// Start of the unprotected range
    location: *const u8,
    /// Bytes unprotected
    len: usize,
}
impl<G: PatchGuard> PermissionWrapperGuard<G> {
    /// Wraps `guard` so its rollback runs with `location` writable
    fn guard(guard: G, location: *const u8, len: usize) -> Self {
        Self { guard: Some(guard), location, len }
    }

    /// Inner guard
    pub fn inner(&self) -> Option<&G> {
        self.guard.as_ref()
    }
}
unsafe impl<G: PatchGuard> PatchGuard for PermissionWrapperGuard<G> {}

// Same reasoning as for the byte guard: only foreign memory is referenced
unsafe impl<G: PatchGuard + Send> Send for PermissionWrapperGuard<G> {}
unsafe impl<G: PatchGuard + Sync> Sync for PermissionWrapperGuard<G> {}

impl<P: PatchGuard> Drop for PermissionWrapperGuard<P> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };
        // Safety: We already changed memory permissions to construct the wrapper, so the range is mapped
        match unsafe { region::protect_with_handle(self.location, self.len, Protection::all()) } {
            Ok(_protection) => guard.restore(),
            Err(e) => {
                // restoring without write access would fault, so the patch stays in place
                error!("Could not restore {:#x}: {e}", self.location as usize);
                std::mem::forget(guard);
                return;
            }
        }
        flush_instruction_cache(self.location, self.len);
    }
}
