//! # Logging
//!
//! File logging through `tracing-subscriber`

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::Result;
use crate::scan::ModuleImage;

/// File name of the log, created in the executable's directory
pub const LOG_FILE_NAME: &str = "tweakhook.log";

/// Level used when `RUST_LOG` is not set
const DEFAULT_FILTER: &str = "info";

/// Installs a plain-text subscriber writing to a fresh file at `path` as the global default.
///
/// The file is truncated. Levels come from `RUST_LOG`, defaulting to `info`.
pub fn init(path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;
    Ok(())
}

/// Logs what was loaded into which process
pub fn banner(log_path: &Path, module_path: &Path, image: &ModuleImage) {
    info!("{} v{} loaded.", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    info!("Log file: {}", log_path.display());
    info!(
        "Module Name: {}",
        module_path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    );
    info!("Module Path: {}", module_path.display());
    info!("Module Address: {:#x} ({:#x} bytes)", image.base(), image.size());
    match image.timestamp() {
        Some(timestamp) => info!("Module Timestamp: {}", timestamp),
        None => info!("Module Timestamp: unavailable"),
    }
}
