//! # Tweaks
//!
//! Each driver combines the scanning, resolving and hooking primitives with one group of settings.
//! Drivers return their failure instead of logging it; the engine reports it once per feature.

pub mod aspect;
pub mod cvars;
pub mod fov;

use crate::config::TweakConfig;
use crate::hook::HookManager;
use crate::resolve::PollPolicy;
use crate::scan::ModuleImage;

pub use cvars::{ConsoleVariables, CvarSettings};

/// Everything a driver needs, built once by the setup sequence
pub struct SetupContext<'a> {
    /// Module being tweaked
    pub image: ModuleImage,
    /// Settings read at startup
    pub config: TweakConfig,
    /// Where hooks get installed
    pub hooks: &'a HookManager,
    /// Polling policy for singletons the game creates late
    pub poll: PollPolicy,
    /// Console variables found by discovery, if it succeeded
    pub console_variables: Option<ConsoleVariables>,
}

impl<'a> SetupContext<'a> {
    /// Creates a context with nothing discovered yet
    pub fn new(image: ModuleImage, config: TweakConfig, hooks: &'a HookManager) -> Self {
        Self {
            image,
            config,
            hooks,
            poll: PollPolicy::default(),
            console_variables: None,
        }
    }
}
