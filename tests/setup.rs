//! Setup sequence driven through the public API against a fake module

use std::fs;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing_subscriber::fmt::MakeWriter;

use tweakhook::engine::run_setup;
use tweakhook::error::Error;
use tweakhook::hook::HookManager;
use tweakhook::resolve::Sleep;
use tweakhook::scan::ModuleImage;

/// Shared log sink
#[derive(Clone, Default)]
struct Logs(Arc<Mutex<Vec<u8>>>);

impl Logs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap_or_else(PoisonError::into_inner)).into_owned()
    }
}

impl Write for Logs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Logs {
    type Writer = Logs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Never sleeps
struct NoSleep;

impl Sleep for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

fn logged<T>(f: impl FnOnce() -> T) -> (T, String) {
    let logs = Logs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .with_target(false)
        .finish();
    let value = tracing::subscriber::with_default(subscriber, f);
    (value, logs.text())
}

/// Aspect ratio branch as it appears in the game
const ASPECT_CODE: [u8; 17] = [
    0x45, 0x0F, 0x2F, 0x74, 0x05, 0x0F, 0x28, 0xC1, 0x0F, 0x28, 0xC8, 0xFE, 0xC0, 0x41, 0x88, 0x00,
    0xC3,
];

#[test]
fn missing_config_stops_everything() {
    let dir = tempfile::tempdir().unwrap();
    let mut module = vec![0xCCu8; 0x200];
    module[0x80..0x80 + ASPECT_CODE.len()].copy_from_slice(&ASPECT_CODE);
    let image = unsafe { ModuleImage::from_raw_parts(module.as_mut_ptr() as usize, module.len()) };
    let hooks = HookManager::new();

    let (result, logs) = logged(|| run_setup(&dir.path().join("tweakhook.toml"), image, &hooks, &NoSleep));
    assert!(matches!(result, Err(ref e) if e.is_fatal()));
    assert!(matches!(result, Err(Error::ConfigurationMissing(_))));
    assert_eq!(logs.lines().count(), 1, "{logs}");
    assert!(hooks.is_empty());
    // untouched
    assert_eq!(&module[0x80..0x80 + ASPECT_CODE.len()], &ASPECT_CODE);
}

#[test]
fn zero_fov_offset_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tweakhook.toml");
    fs::write(
        &path,
        "[aspect_ratio_limit]\nenabled = true\n\n[gameplay_fov]\nadditional_fov = 0.0\n",
    )
    .unwrap();
    let mut module = vec![0xCCu8; 0x200];
    module[0x80..0x80 + ASPECT_CODE.len()].copy_from_slice(&ASPECT_CODE);
    let image = unsafe { ModuleImage::from_raw_parts(module.as_mut_ptr() as usize, module.len()) };
    let hooks = HookManager::new();

    let (result, logs) = logged(|| run_setup(&path, image, &hooks, &NoSleep));
    result.unwrap();
    assert!(!logs.contains("Gameplay FOV"), "{logs}");
    assert!(logs.contains("Aspect Ratio: Patched instruction."));
    assert_eq!(&module[0x83..0x85], &[0x90, 0x90]);
    // the console manager is absent from the fake module
    assert!(logs.contains("Console Variables: pattern scan failed"));
    assert!(hooks.is_empty());
}
