//! # Host
//!
//! Windows entry point: starts the setup thread when the library is loaded into the game

use std::ffi::c_void;
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::error;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{BOOL, HINSTANCE, HMODULE, TRUE};
use windows::Win32::System::LibraryLoader::{
    FreeLibraryAndExitThread, GetModuleFileNameW, GetModuleHandleW,
};

use crate::config::config_path;
use crate::engine::{run_setup, spawn_setup};
use crate::hook::HOOKS;
use crate::logging::{self, LOG_FILE_NAME};
use crate::resolve::ThreadSleep;
use crate::scan::ModuleImage;

/// `fdwReason` for a process attach
const DLL_PROCESS_ATTACH: u32 = 1;

/// Longest executable path read, in UTF-16 units
const MAX_PATH_UNITS: usize = 32 * 1024;

/// This library's own module handle, for unloading on fatal errors
static LIBRARY: OnceLock<usize> = OnceLock::new();

/// Library entry point
#[no_mangle]
#[allow(non_snake_case)]
pub extern "system" fn DllMain(module: HINSTANCE, reason: u32, _reserved: *mut c_void) -> BOOL {
    if reason == DLL_PROCESS_ATTACH {
        let _ = LIBRARY.set(module.0 as usize);
        // no subscriber exists yet, so a spawn failure cannot be reported anywhere
        let _ = spawn_setup(setup);
    }
    TRUE
}

/// Body of the setup thread
fn setup() {
    let Some(exe_path) = executable_path() else {
        return;
    };
    let exe_dir = exe_path.parent().map(PathBuf::from).unwrap_or_default();
    let log_path = exe_dir.join(LOG_FILE_NAME);
    if logging::init(&log_path).is_err() {
        return;
    }

    // Safety: a null name yields the executable's own, always mapped, module
    let image = unsafe {
        GetModuleHandleW(PCWSTR::null())
            .ok()
            .and_then(|module| ModuleImage::from_pe_header(module.0 as usize))
    };
    let Some(image) = image else {
        error!("Could not read the executable's module headers.");
        return;
    };
    logging::banner(&log_path, &exe_path, &image);

    if let Err(e) = run_setup(&config_path(&exe_dir), image, &HOOKS, &ThreadSleep) {
        if e.is_fatal() {
            unload();
        }
    }
}

/// Full path of the host executable
fn executable_path() -> Option<PathBuf> {
    let mut buffer = vec![0u16; MAX_PATH_UNITS];
    // Safety: the buffer is writable for its whole length
    let len = unsafe { GetModuleFileNameW(HMODULE::default(), &mut buffer) } as usize;
    (len > 0 && len < buffer.len()).then(|| PathBuf::from(String::from_utf16_lossy(&buffer[..len])))
}

/// Unloads this library and ends the calling thread
fn unload() {
    if let Some(&library) = LIBRARY.get() {
        // Safety: the handle came from the loader and no hooks were installed
        unsafe { FreeLibraryAndExitThread(HMODULE(library as *mut c_void), 0) };
    }
}
