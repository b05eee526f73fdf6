//! # Jump Hook
//!
//! Redirects a hook site with a single jump, `jmp rel32` when the destination is in reach and an
//! absolute jump otherwise

use crate::{
    code::x64::site_patch,
    error::{Error, Result},
    patcher::{PatchGuard, Patcher},
};

/// Jump writer over an arbitrary patcher
pub struct JmpHook<P> {
    /// Underlying patcher used to write the jump
    patcher: P,
}

impl<P: Patcher> JmpHook<P>
where
    Error: From<P::Error>,
{
    /// Creates a new jmp hook
    pub fn new(patcher: P) -> Self {
        Self { patcher }
    }

    /// Overwrites `len` bytes at `source` with a jump to `destination` followed by `nop` padding.
    ///
    /// # Safety
    ///
    /// - `source` must be valid for writes of `len` bytes, and `len` must end on an instruction boundary
    /// - `destination` must be valid executable code
    pub unsafe fn hook(
        &self,
        source: usize,
        destination: usize,
        len: usize,
    ) -> Result<JmpHookGuard<P::Guard<'_>>> {
        let patch = site_patch(source, destination, len).ok_or_else(|| {
            Error::Relocation(format!(
                "a jump from {source:#x} to {destination:#x} does not fit in {len} bytes"
            ))
        })?;
        let guard = self.patcher.patch(source as *mut u8, &patch)?;
        Ok(JmpHookGuard { guard, len })
    }
}

/// Guard for jmp hooks, restoring the original bytes when dropped
pub struct JmpHookGuard<G: PatchGuard> {
    /// Underlying patch guard that we're wrapping
    guard: G,
    /// Bytes covered by the jump and its padding
    len: usize,
}

impl<G: PatchGuard> JmpHookGuard<G> {
    /// Get the underlying patch guard in case info is needed
    pub fn patch(&self) -> &G {
        &self.guard
    }

    /// Number of bytes overwritten at the site
    pub fn len(&self) -> usize {
        self.len
    }

    /// Removes the jump
    pub fn unhook(self) {
        self.guard.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patcher::byte::BytePatcher;
    use crate::patcher::mem::PermissionWrapper;

    #[test]
    fn writes_padded_jump_and_restores() {
        let mut code = [0xCCu8; 32];
        let site = code.as_mut_ptr() as usize;
        let hook = JmpHook::new(PermissionWrapper::new(BytePatcher::new()));

        // hook the site with a short jump to the end of the buffer
        let guard = unsafe { hook.hook(site, site + 24, 7).unwrap() };
        assert_eq!(guard.len(), 7);
        assert_eq!(code[0], 0xE9);
        assert_eq!(&code[1..5], &19i32.to_le_bytes());
        assert_eq!(&code[5..7], &[0x90, 0x90]);

        guard.unhook();
        assert!(code.iter().all(|&b| b == 0xCC));
    }

    #[test]
    fn rejects_short_sites() {
        let mut code = [0xCCu8; 8];
        let site = code.as_mut_ptr() as usize;
        let wrapper = PermissionWrapper::new(BytePatcher::new());
        let hook = JmpHook::new(wrapper);
        let err = unsafe { hook.hook(site, site + 4, 3) };
        assert!(matches!(err, Err(Error::Relocation(_))));
        assert!(code.iter().all(|&b| b == 0xCC));
    }
}
