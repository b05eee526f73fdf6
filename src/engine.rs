//! # Engine
//!
//! The one-time setup sequence, run on its own thread once the library is attached

use std::io;
use std::path::Path;
use std::thread::{self, JoinHandle};

use tracing::error;

use crate::config::TweakConfig;
use crate::error::Result;
use crate::hook::HookManager;
use crate::resolve::Sleep;
use crate::scan::ModuleImage;
use crate::tweaks::{aspect, cvars, fov, SetupContext};

/// Name of the setup thread
const THREAD_NAME: &str = "tweakhook-setup";

/// Reads the configuration and runs every tweak against `image`.
///
/// Returns an error only when the configuration is missing or unreadable; that error is logged
/// here and nothing is scanned. Failures of single tweaks are logged and do not stop the others.
pub fn run_setup<S: Sleep>(
    config_path: &Path,
    image: ModuleImage,
    hooks: &HookManager,
    sleeper: &S,
) -> Result<()> {
    let config = match TweakConfig::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("Config: {e}");
            return Err(e);
        }
    };
    let mut ctx = SetupContext::new(image, config, hooks);
    run_tweaks(&mut ctx, sleeper);
    Ok(())
}

/// Runs every tweak in order, isolating failures per feature
pub fn run_tweaks<S: Sleep>(ctx: &mut SetupContext, sleeper: &S) {
    report(aspect::NAME, aspect::apply(ctx));
    report(fov::NAME, fov::apply(ctx));

    match cvars::discover(ctx, sleeper) {
        Ok(vars) => {
            ctx.console_variables = Some(vars);
            report(cvars::NAME, cvars::install_enforcement(ctx));
        }
        Err(e) => report(cvars::NAME, Err(e)),
    }
}

/// Logs a feature failure
fn report(feature: &str, result: Result<()>) {
    if let Err(e) = result {
        error!("{feature}: {e}");
    }
}

/// Runs `setup` on a new named thread that logs to the caller's current subscriber
pub fn spawn_setup<F>(setup: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|d| d.clone());
    thread::Builder::new()
        .name(THREAD_NAME.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, setup))
}
