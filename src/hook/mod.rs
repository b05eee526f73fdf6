//! # Hook
//!
//! This module covers hooks, which redirect execution from one location to another.
//!
//! A [`Hook`] is either an observe-only mid hook, which runs a callback against the live registers
//! and then carries on with the original code, or a full replacement, which sends execution to a
//! different function and keeps the original reachable through a trampoline.

pub mod context;
pub mod jmphook;
pub mod manager;

use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error};

use crate::{
    alloc::{allocate_executable, ExecutableMemory},
    code::x64::{displaced_instructions, jmp_abs, jump_len, stub, JMP_ABS_LEN},
    error::Result,
    patcher::{
        byte::{BytePatchGuard, BytePatcher},
        mem::{PermissionWrapper, PermissionWrapperGuard},
    },
};

pub use context::{RegisterContext, Xmm};
pub use jmphook::{JmpHook, JmpHookGuard};
pub use manager::{HookManager, HookSite, HOOKS};

/// Callback run by an observe-only hook
pub type MidCallback = Box<dyn Fn(&mut RegisterContext) + Send + Sync>;

/// Room reserved for a mid-hook stub: the register save and restore sequence plus relocated code
const MID_STUB_CAPACITY: usize = 512;
/// Room reserved for a trampoline and its relay jump
const TRAMPOLINE_CAPACITY: usize = 128;

/// What a hook does once execution reaches its address
pub enum HookKind {
    /// Run a callback with the register context, then resume the original code
    ObserveOnly(MidCallback),
    /// Jump to a replacement function instead of running the original code
    FullReplace(usize),
}

impl std::fmt::Debug for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ObserveOnly(_) => f.write_str("ObserveOnly"),
            Self::FullReplace(destination) => write!(f, "FullReplace({destination:#x})"),
        }
    }
}

/// Internal form of [`HookKind`] with the callback at a stable heap address
enum Action {
    /// Pointer handed to the stub points at the inner box
    Observe(Box<MidCallback>),
    /// Replacement function
    Replace(usize),
}

/// Installation state of a hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookState {
    /// The original code runs unmodified
    Uninstalled,
    /// The site jumps into the hook
    Installed,
}

/// Site patch type used by every hook
type SiteGuard = JmpHookGuard<PermissionWrapperGuard<BytePatchGuard>>;

/// Everything an installed hook owns
struct Installation {
    /// Jump written over the site; dropping it restores the original bytes
    site: SiteGuard,
    /// Stub or trampoline memory
    code: ExecutableMemory,
    /// Entry point of the trampoline for full replacements
    trampoline: Option<usize>,
}

/// A redirection of the code at one address
pub struct Hook {
    /// Hooked address
    address: usize,
    /// What the hook runs
    action: Action,
    /// Present while installed
    installation: Option<Installation>,
}

impl Hook {
    /// Creates an uninstalled hook for `address`
    pub fn new(address: usize, kind: HookKind) -> Self {
        let action = match kind {
            HookKind::ObserveOnly(callback) => Action::Observe(Box::new(callback)),
            HookKind::FullReplace(destination) => Action::Replace(destination),
        };
        Self {
            address,
            action,
            installation: None,
        }
    }

    /// Hooked address
    pub fn address(&self) -> usize {
        self.address
    }

    /// Current state
    pub fn state(&self) -> HookState {
        match self.installation {
            Some(_) => HookState::Installed,
            None => HookState::Uninstalled,
        }
    }

    /// Bytes of original code owned by the installed hook, empty while uninstalled
    pub fn range(&self) -> Range<usize> {
        let len = self.installation.as_ref().map_or(0, |i| i.site.len());
        self.address..self.address + len
    }

    /// Address that runs the original code, for an installed full replacement
    pub fn trampoline(&self) -> Option<usize> {
        self.installation.as_ref().and_then(|i| i.trampoline)
    }

    /// Address of the generated stub or trampoline memory, while installed
    pub fn code_address(&self) -> Option<usize> {
        self.installation.as_ref().map(|i| i.code.address())
    }

    /// Writes the redirection. Installing an installed hook does nothing.
    ///
    /// # Safety
    ///
    /// - `address` must be the start of an instruction in mapped code, followed by at least
    ///   [`JMP_ABS_LEN`] bytes of instructions that no branch targets
    /// - no thread may be executing the bytes being replaced
    /// - for full replacements, the destination must be a function compatible with the hooked one
    pub unsafe fn install(&mut self) -> Result<()> {
        if self.installation.is_some() {
            return Ok(());
        }
        let prepared = self.prepare()?;
        self.commit(prepared)
    }

    /// Generates the stub or trampoline without touching the hook site.
    ///
    /// # Safety
    ///
    /// `address` must be readable code, see [`Hook::install`]
    pub(crate) unsafe fn prepare(&self) -> Result<Prepared> {
        match &self.action {
            Action::Observe(callback) => {
                let data = &**callback as *const MidCallback as u64;
                prepare_mid(self.address, data)
            }
            Action::Replace(destination) => prepare_replace(self.address, *destination),
        }
    }

    /// Writes the site jump of a [`Prepared`] hook
    ///
    /// # Safety
    ///
    /// See [`Hook::install`]
    pub(crate) unsafe fn commit(&mut self, prepared: Prepared) -> Result<()> {
        let Prepared {
            code,
            target,
            len,
            trampoline,
        } = prepared;
        let jumper = JmpHook::new(PermissionWrapper::new(BytePatcher::new()));
        let site = jumper.hook(self.address, target, len)?;
        debug!("Hooked {:#x} ({} bytes) via {:#x}", self.address, len, code.address());
        self.installation = Some(Installation {
            site,
            code,
            trampoline,
        });
        Ok(())
    }

    /// Restores the original bytes and releases the stub. Uninstalling an uninstalled hook does nothing.
    ///
    /// # Safety
    ///
    /// No thread may be executing inside the hook site, the stub or the trampoline
    pub unsafe fn uninstall(&mut self) {
        if let Some(installation) = self.installation.take() {
            installation.site.unhook();
            debug!("Unhooked {:#x}", self.address);
        }
    }
}

/// Generated code for a hook whose site has not been written yet
pub(crate) struct Prepared {
    /// Stub or trampoline memory, already filled
    code: ExecutableMemory,
    /// Where the site jump lands
    target: usize,
    /// Bytes of original code the site jump will replace
    len: usize,
    /// Entry point of the trampoline for full replacements
    trampoline: Option<usize>,
}

impl Prepared {
    /// Bytes of original code that committing will overwrite, starting at `address`
    pub(crate) fn range(&self, address: usize) -> Range<usize> {
        address..address + self.len
    }
}

/// Builds the register-saving stub for a hook at `address`
unsafe fn prepare_mid(address: usize, data: u64) -> Result<Prepared> {
    let mut code = allocate_executable(address, MID_STUB_CAPACITY)?;
    let entry = code.address();
    let displaced = displaced_instructions(address, jump_len(address, entry))?;

    let bytes = stub::mid_hook(
        entry as u64,
        dispatch as usize as u64,
        data,
        &displaced.instructions,
        (address + displaced.len) as u64,
    )?;
    code.write(&bytes)?;
    Ok(Prepared {
        code,
        target: entry,
        len: displaced.len,
        trampoline: None,
    })
}

/// Builds the relay and trampoline for a replacement of `address`.
///
/// The site jumps to a relay at the start of the trampoline memory, which is allocated close to
/// the site, so the patch stays a short jump however far away the replacement is.
unsafe fn prepare_replace(address: usize, destination: usize) -> Result<Prepared> {
    let mut code = allocate_executable(address, TRAMPOLINE_CAPACITY)?;
    let relay = code.address();
    let trampoline = relay + JMP_ABS_LEN;
    let displaced = displaced_instructions(address, jump_len(address, relay))?;

    let mut bytes = jmp_abs(destination).to_vec();
    bytes.extend(stub::trampoline(
        trampoline as u64,
        &displaced.instructions,
        (address + displaced.len) as u64,
    )?);
    code.write(&bytes)?;
    Ok(Prepared {
        code,
        target: relay,
        len: displaced.len,
        trampoline: Some(trampoline),
    })
}

/// Entry point called by every mid-hook stub
extern "C" fn dispatch(context: *mut RegisterContext, callback: *const MidCallback) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        // Safety: the stub passes its own stack frame and the callback pinned by the hook
        let (context, callback) = unsafe { (&mut *context, &*callback) };
        callback(context);
    }));
    if let Err(payload) = result {
        error!("Hook callback panicked: {}", panic_message(&*payload));
    }
}

/// Text of a panic payload
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
