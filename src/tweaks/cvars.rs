//! Console variable discovery and enforcement.
//!
//! Discovery finds the console manager singleton through the code that lazily creates it, then
//! looks the variables up by name in the manager's object map. Enforcement hooks level loading and
//! re-applies the configured values there, so they win over whatever the game sets while loading.

use tracing::{info, warn};

use super::SetupContext;
use crate::config::TweakConfig;
use crate::directory::{ConsoleVariable, NamedObjectTable, ObjectLayout};
use crate::error::{Error, Result};
use crate::hook::{HookKind, MidCallback};
use crate::resolve::{poll_non_null, resolve_relative, OperandWidth, Sleep};
use crate::scan::Landmark;

/// Name used in log lines
pub const NAME: &str = "Console Variables";

/// Lazy creation of the console manager: `cmp [rip+disp32], 0` at +4 tests the singleton slot
const MANAGER_PATTERN: &str = "48 83 ?? ?? 48 83 3D ?? ?? ?? ?? 00 0F 85 ?? ?? ?? ?? B9 ?? ?? ?? ?? \
                               48 89 ?? ?? ?? E8 ?? ?? ?? ?? 48 ?? ?? 48 ?? ??";

/// Displacement of the `cmp` inside [`MANAGER_PATTERN`]
const MANAGER_DISPLACEMENT: usize = 7;

/// Immediate byte following the displacement
const MANAGER_TRAILING_IMMEDIATE: usize = 1;

/// Offset of the object map inside the console manager
const OBJECT_MAP_OFFSET: usize = 0x8;

/// Name used for the polled singleton
const MANAGER_NAME: &str = "IConsoleManager";

/// Hooked level sequence load
const LEVEL_LOAD_PATTERN: &str = "40 ?? 48 ?? ?? ?? 48 ?? ?? E8 ?? ?? ?? ?? 80 ?? ?? ?? ?? ?? 03 75 ?? \
                                  0F ?? ?? ?? ?? ?? ?? 48 ?? ?? C0 ?? 02";

/// Sharpening strength
pub const SHARPEN: &str = "r.Tonemapper.Sharpen";
/// Chromatic aberration quality, 0 disables
pub const CHROMATIC_ABERRATION: &str = "r.SceneColorFringeQuality";
/// Tonemapper quality, 1 drops the vignette
pub const VIGNETTE: &str = "r.Tonemapper.Quality";
/// DLSS denoiser mode, 1 enables ray reconstruction
pub const RAY_RECONSTRUCTION: &str = "r.NGX.DLSS.DenoiserMode";

/// Layout of one driven variable in the supported build.
///
/// Sharpening gets its whole flag word replaced. The toggles only get their set-by bits updated.
pub fn layout_of(name: &str) -> ObjectLayout {
    match name {
        SHARPEN => ObjectLayout::CONSOLE_VARIABLE.overwriting_flags(),
        _ => ObjectLayout::CONSOLE_VARIABLE,
    }
}

/// Landmark of the console manager creation code
pub fn manager_landmark() -> Result<Landmark> {
    Landmark::new(NAME, MANAGER_PATTERN, 0)
}

/// Landmark of the level load hook
pub fn level_load_landmark() -> Result<Landmark> {
    Landmark::new("Level Load", LEVEL_LOAD_PATTERN, 0)
}

/// Console variables the tweaks drive; absent ones were not found
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsoleVariables {
    /// [`SHARPEN`]
    pub sharpen: Option<ConsoleVariable>,
    /// [`CHROMATIC_ABERRATION`]
    pub chromatic_aberration: Option<ConsoleVariable>,
    /// [`VIGNETTE`]
    pub vignette: Option<ConsoleVariable>,
    /// [`RAY_RECONSTRUCTION`]
    pub ray_reconstruction: Option<ConsoleVariable>,
}

impl ConsoleVariables {
    /// Whether nothing was found
    pub fn is_empty(&self) -> bool {
        self.sharpen.is_none()
            && self.chromatic_aberration.is_none()
            && self.vignette.is_none()
            && self.ray_reconstruction.is_none()
    }
}

/// Values enforced on the console variables
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CvarSettings {
    /// Sharpening strength
    pub sharpen: f32,
    /// Keep chromatic aberration
    pub chromatic_aberration: bool,
    /// Keep the vignette
    pub vignette: bool,
    /// Enable ray reconstruction
    pub ray_reconstruction: bool,
}

impl From<&TweakConfig> for CvarSettings {
    fn from(config: &TweakConfig) -> Self {
        Self {
            sharpen: config.sharpening.strength,
            chromatic_aberration: config.chromatic_aberration.enabled,
            vignette: config.vignette.enabled,
            ray_reconstruction: config.ray_reconstruction.enabled,
        }
    }
}

/// Finds the console manager and looks up every driven variable.
///
/// Scan and polling failures are returned. Missing variables are logged one by one and left out.
pub fn discover<S: Sleep>(ctx: &SetupContext, sleeper: &S) -> Result<ConsoleVariables> {
    let hit = ctx.image.locate(&manager_landmark()?)?;
    // Safety: the displacement lies inside the matched pattern
    let slot = unsafe { resolve_relative(hit + MANAGER_DISPLACEMENT, OperandWidth::Rel32) } + MANAGER_TRAILING_IMMEDIATE;
    info!(
        "{NAME}: {MANAGER_NAME} singleton address is module+{:#x}",
        ctx.image.offset_of(slot)
    );

    // Safety: the slot is a global of the module and stays mapped
    let manager = unsafe { poll_non_null(MANAGER_NAME, slot, ctx.poll, sleeper)? };
    // Safety: the singleton owns its object map for the life of the process
    let table = unsafe { NamedObjectTable::new(manager + OBJECT_MAP_OFFSET) };
    info!("{NAME}: Object map holds {} entries.", table.len());

    Ok(lookup_all(&table))
}

/// Resolves every driven variable in `table`
pub fn lookup_all(table: &NamedObjectTable) -> ConsoleVariables {
    let find = |name: &str| match table.resolve(name) {
        Some(address) => {
            info!("{NAME}: {name} found at {:#x}", address);
            // Safety: entries of the console object map are live console variables
            Some(unsafe { ConsoleVariable::new(address, layout_of(name)) })
        }
        None => {
            warn!("{NAME}: {}", Error::DirectoryLookupMiss(name.to_owned()));
            None
        }
    };
    ConsoleVariables {
        sharpen: find(SHARPEN),
        chromatic_aberration: find(CHROMATIC_ABERRATION),
        vignette: find(VIGNETTE),
        ray_reconstruction: find(RAY_RECONSTRUCTION),
    }
}

/// Writes every configured value that differs from the live one, logging each change
pub fn enforce(vars: &ConsoleVariables, settings: &CvarSettings) {
    if let Some(cvar) = vars.sharpen {
        if cvar.get_f32() != settings.sharpen {
            cvar.set_f32(settings.sharpen);
            info!("CVar: {SHARPEN}: Set to {}", cvar.get_f32());
        }
    }
    let toggles = [
        (vars.chromatic_aberration, CHROMATIC_ABERRATION, Some(settings.chromatic_aberration as i32)),
        // the vignette can only be forced off
        (vars.vignette, VIGNETTE, (!settings.vignette).then_some(1)),
        (vars.ray_reconstruction, RAY_RECONSTRUCTION, Some(settings.ray_reconstruction as i32)),
    ];
    for (cvar, name, wanted) in toggles {
        let (Some(cvar), Some(wanted)) = (cvar, wanted) else {
            continue;
        };
        if cvar.get_i32() != wanted {
            cvar.set_i32(wanted);
            info!("CVar: {name}: Set to {}", cvar.get_i32());
        }
    }
}

/// Callback re-applying `settings` every time a level loads
pub fn callback(vars: ConsoleVariables, settings: CvarSettings) -> MidCallback {
    Box::new(move |_ctx| enforce(&vars, &settings))
}

/// Hooks level loading to enforce the configured values
pub fn install_enforcement(ctx: &SetupContext) -> Result<()> {
    let Some(vars) = ctx.console_variables.filter(|vars| !vars.is_empty()) else {
        return Err(Error::DirectoryLookupMiss("any driven console variable".into()));
    };
    let address = ctx.image.locate(&level_load_landmark()?)?;
    let settings = CvarSettings::from(&ctx.config);
    // Safety: the landmark is the start of a function inside the module image
    unsafe { ctx.hooks.install(address, HookKind::ObserveOnly(callback(vars, settings)))? };
    info!("{NAME}: Hooked level load at module+{:#x}", ctx.image.offset_of(address));
    Ok(())
}
