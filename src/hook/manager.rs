//! Bookkeeping for every hook installed in the process

use std::ops::Range;
use std::sync::{Mutex, PoisonError};

use lazy_static::lazy_static;

use super::{Hook, HookKind};
use crate::code::x64::JMP_ABS_LEN;
use crate::error::{Error, Result};

lazy_static! {
    /// Hooks installed by the setup sequence. Never dropped, so hooks live until process exit.
    pub static ref HOOKS: HookManager = HookManager::new();
}

/// Where an installed hook lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookSite {
    /// Hooked address
    pub address: usize,
    /// Bytes of original code replaced by the jump
    pub len: usize,
    /// Generated stub (observe-only) or relay (full replacement)
    pub code: usize,
    /// Entry point running the original code, for full replacements
    pub trampoline: Option<usize>,
}

/// Owns installed hooks and keeps their patched ranges disjoint
#[derive(Default)]
pub struct HookManager {
    /// Installed hooks, in install order
    hooks: Mutex<Vec<Hook>>,
}

impl HookManager {
    /// Creates a manager with nothing installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a hook of `kind` at `address`.
    ///
    /// Fails with [`Error::HookOverlap`] when the patched bytes would overlap an installed hook;
    /// the installed hook is left untouched.
    ///
    /// # Safety
    ///
    /// See [`Hook::install`]
    pub unsafe fn install(&self, address: usize, kind: HookKind) -> Result<HookSite> {
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        if hooks.iter().any(|hook| hook.range().contains(&address)) {
            return Err(Error::HookOverlap(address));
        }

        let mut hook = Hook::new(address, kind);
        let prepared = match hook.prepare() {
            Ok(prepared) => prepared,
            // decoding ran into another hook's jump
            Err(_) if hooks.iter().any(|other| (address..address + JMP_ABS_LEN).contains(&other.address())) => {
                return Err(Error::HookOverlap(address));
            }
            Err(e) => return Err(e),
        };
        let range = prepared.range(address);
        if hooks.iter().any(|other| overlaps(&range, &other.range())) {
            return Err(Error::HookOverlap(address));
        }
        hook.commit(prepared)?;

        let site = HookSite {
            address,
            len: range.len(),
            code: hook.code_address().unwrap_or_default(),
            trampoline: hook.trampoline(),
        };
        hooks.push(hook);
        Ok(site)
    }

    /// Removes the hook installed at `address`, restoring the original bytes.
    ///
    /// # Safety
    ///
    /// See [`Hook::uninstall`]
    pub unsafe fn uninstall(&self, address: usize) -> Result<()> {
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        let index = hooks
            .iter()
            .position(|hook| hook.address() == address)
            .ok_or(Error::HookNotFound(address))?;
        let mut hook = hooks.remove(index);
        hook.uninstall();
        Ok(())
    }

    /// Whether a hook is installed exactly at `address`
    pub fn is_installed(&self, address: usize) -> bool {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|hook| hook.address() == address)
    }

    /// Number of installed hooks
    pub fn len(&self) -> usize {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing is installed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether two byte ranges share at least one byte
fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

#[cfg(all(test, target_arch = "x86_64"))]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::alloc::{allocate_executable, ExecutableMemory};
    use crate::patcher::byte::read_bytes;

    /// Copies `code` into fresh executable memory near this test binary
    fn place(code: &[u8]) -> ExecutableMemory {
        let mut memory = allocate_executable(place as usize, code.len()).unwrap();
        memory.write(code).unwrap();
        memory
    }

    /// `xor eax,eax; nop x 30; add eax,5; ret`
    fn counting_function() -> Vec<u8> {
        let mut code = vec![0x31u8, 0xC0];
        code.extend([0x90; 30]);
        code.extend([0x83, 0xC0, 0x05, 0xC3]);
        code
    }

    extern "C" fn replacement() -> u32 {
        42
    }

    #[test]
    fn two_mid_hooks_fire_and_overlap_is_rejected() {
        let memory = place(&counting_function());
        let base = memory.address();
        let function: extern "C" fn() -> u32 = unsafe { std::mem::transmute(base) };
        assert_eq!(function(), 5);

        let manager = HookManager::new();
        unsafe {
            manager
                .install(base + 2, HookKind::ObserveOnly(Box::new(|ctx| ctx.rax += 10)))
                .unwrap();
            manager
                .install(base + 18, HookKind::ObserveOnly(Box::new(|ctx| ctx.rax += 100)))
                .unwrap();
        }
        assert_eq!(function(), 115);

        // a second hook on an owned range is refused and the first one keeps working
        let err = unsafe { manager.install(base + 2, HookKind::ObserveOnly(Box::new(|ctx| ctx.rax = 0))) };
        assert!(matches!(err, Err(Error::HookOverlap(_))));
        let err = unsafe { manager.install(base + 3, HookKind::ObserveOnly(Box::new(|ctx| ctx.rax = 0))) };
        assert!(matches!(err, Err(Error::HookOverlap(_))));
        assert_eq!(manager.len(), 2);
        assert_eq!(function(), 115);

        // removing one hook leaves the other in place
        unsafe { manager.uninstall(base + 18).unwrap() };
        assert_eq!(function(), 15);
        assert!(!manager.is_installed(base + 18));
        assert!(matches!(
            unsafe { manager.uninstall(base + 18) },
            Err(Error::HookNotFound(_))
        ));
    }

    #[test]
    fn rejected_install_never_writes_over_an_installed_hook() {
        let memory = place(&counting_function());
        let base = memory.address();
        let function: extern "C" fn() -> u32 = unsafe { std::mem::transmute(base) };

        let manager = HookManager::new();
        unsafe {
            manager
                .install(base + 18, HookKind::ObserveOnly(Box::new(|ctx| ctx.rax += 100)))
                .unwrap();
        }
        let watched = base + 16..base + 24;
        let installed = unsafe { read_bytes(watched.start as *const u8, watched.len()) };

        // watch the bytes around the installed site while overlapping installs are attempted
        let stop = AtomicBool::new(false);
        let (changed, rejected) = std::thread::scope(|scope| {
            let watcher = scope.spawn(|| {
                let mut changed = false;
                while !stop.load(Ordering::Acquire) {
                    let now: Vec<u8> = watched
                        .clone()
                        .map(|a| unsafe { std::ptr::read_volatile(a as *const u8) })
                        .collect();
                    changed |= now != installed;
                }
                changed
            });
            let rejected = (0..200)
                .filter(|_| {
                    let err = unsafe { manager.install(base + 16, HookKind::ObserveOnly(Box::new(|ctx| ctx.rax = 0))) };
                    matches!(err, Err(Error::HookOverlap(_)))
                })
                .count();
            stop.store(true, Ordering::Release);
            (watcher.join().unwrap(), rejected)
        });

        assert_eq!(rejected, 200);
        assert!(!changed);
        assert_eq!(manager.len(), 1);
        assert_eq!(function(), 105);
    }

    #[test]
    fn overlap_is_symmetric() {
        assert!(overlaps(&(16..21), &(18..23)));
        assert!(overlaps(&(18..23), &(16..21)));
        assert!(!overlaps(&(16..18), &(18..23)));
        assert!(!overlaps(&(23..28), &(18..23)));
    }

    #[test]
    #[cfg(not(windows))]
    fn mid_hook_sees_and_edits_xmm() {
        // movd xmm0,edi; nop x 16; addss xmm0,xmm0; movd eax,xmm0; ret
        let mut code = vec![0x66u8, 0x0F, 0x6E, 0xC7];
        code.extend([0x90; 16]);
        code.extend([0xF3, 0x0F, 0x58, 0xC0, 0x66, 0x0F, 0x7E, 0xC0, 0xC3]);
        let memory = place(&code);
        let function: extern "C" fn(u32) -> u32 = unsafe { std::mem::transmute(memory.address()) };
        let doubled = |x: f32| f32::from_bits(function(x.to_bits()));
        assert_eq!(doubled(75.0), 150.0);

        let manager = HookManager::new();
        unsafe {
            manager
                .install(
                    memory.address() + 4,
                    HookKind::ObserveOnly(Box::new(|ctx| {
                        let lane = ctx.xmm[0].f32(0);
                        ctx.xmm[0].set_f32(0, lane + 10.0);
                    })),
                )
                .unwrap();
        }
        assert_eq!(doubled(75.0), 170.0);
    }

    #[test]
    fn full_replace_and_restore() {
        // mov eax,7; ret; padding
        let mut code = vec![0xB8u8, 0x07, 0x00, 0x00, 0x00, 0xC3];
        code.extend([0xCC; 16]);
        let memory = place(&code);
        let base = memory.address();
        let function: extern "C" fn() -> u32 = unsafe { std::mem::transmute(base) };
        let original = unsafe { read_bytes(base as *const u8, code.len()) };

        let manager = HookManager::new();
        let site = unsafe { manager.install(base, HookKind::FullReplace(replacement as usize)) }.unwrap();
        assert_eq!(site.len, 5);
        assert_eq!(function(), 42);

        // the trampoline still runs the original code
        let trampoline: extern "C" fn() -> u32 = unsafe { std::mem::transmute(site.trampoline.unwrap()) };
        assert_eq!(trampoline(), 7);

        unsafe { manager.uninstall(base).unwrap() };
        assert_eq!(unsafe { read_bytes(base as *const u8, code.len()) }, original);
        assert_eq!(function(), 7);
        assert!(manager.is_empty());
    }
}
