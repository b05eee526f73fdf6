//! Gameplay field of view offset

use tracing::info;

use super::SetupContext;
use crate::error::Result;
use crate::hook::{HookKind, MidCallback};
use crate::scan::Landmark;

/// Name used in log lines
pub const NAME: &str = "Gameplay FOV";

/// Camera update; the instruction at +8 consumes the field of view in `xmm0`
const PATTERN: &str = "F3 0F ?? ?? ?? 03 ?? ?? F3 0F ?? ?? ?? ?? ?? ?? F3 0F ?? ?? ?? ?? ?? ?? \
                       48 8B ?? ?? 48 8B ?? 83 ?? 00 F3 0F ?? ?? ?? ?? ?? ?? F3 0F ?? ?? ?? ?? ?? ?? \
                       F3 0F ?? ?? ?? ?? ?? ?? F3 0F ?? ?? 48 8B ?? ?? 48 8B ?? 83 ?? 00";

/// Landmark pointing at the hooked instruction
pub fn landmark() -> Result<Landmark> {
    Landmark::new(NAME, PATTERN, 8)
}

/// Callback adding `offset` degrees to the field of view in `xmm0`
pub fn callback(offset: f32) -> MidCallback {
    Box::new(move |ctx| {
        let fov = ctx.xmm[0].f32(0);
        ctx.xmm[0].set_f32(0, fov + offset);
    })
}

/// Hooks the camera update when an offset is configured.
///
/// An offset of zero leaves the game untouched and logs nothing.
pub fn apply(ctx: &SetupContext) -> Result<()> {
    let offset = ctx.config.gameplay_fov.additional_fov;
    if offset == 0.0 {
        return Ok(());
    }
    let address = ctx.image.locate(&landmark()?)?;
    // Safety: the landmark is the start of an instruction inside the module image
    unsafe { ctx.hooks.install(address, HookKind::ObserveOnly(callback(offset)))? };
    info!("{NAME}: Hooked at module+{:#x}", ctx.image.offset_of(address));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TweakConfig;
    use crate::error::Error;
    use crate::hook::{HookManager, RegisterContext};
    use crate::logging::testing::capture;
    use crate::scan::ModuleImage;

    #[test]
    fn adds_the_offset_to_xmm0() {
        let mut context = RegisterContext::default();
        context.xmm[0].set_f32(0, 75.0);
        context.xmm[0].set_f32(1, 3.0);

        callback(10.0)(&mut context);
        assert_eq!(context.xmm[0].f32(0), 85.0);
        // other lanes untouched
        assert_eq!(context.xmm[0].f32(1), 3.0);

        callback(-20.0)(&mut context);
        assert_eq!(context.xmm[0].f32(0), 65.0);
    }

    #[test]
    fn zero_offset_installs_nothing() {
        let module = vec![0xCCu8; 0x40];
        let image = unsafe { ModuleImage::from_raw_parts(module.as_ptr() as usize, module.len()) };
        let hooks = HookManager::new();
        let ctx = SetupContext::new(image, TweakConfig::default(), &hooks);

        let (result, logs) = capture(|| apply(&ctx));
        result.unwrap();
        assert!(hooks.is_empty());
        assert!(!logs.contains(NAME));
    }

    #[test]
    fn nonzero_offset_needs_the_landmark() {
        let module = vec![0xCCu8; 0x40];
        let image = unsafe { ModuleImage::from_raw_parts(module.as_ptr() as usize, module.len()) };
        let hooks = HookManager::new();
        let mut config = TweakConfig::default();
        config.gameplay_fov.additional_fov = 10.0;
        let ctx = SetupContext::new(image, config, &hooks);

        assert!(matches!(apply(&ctx), Err(Error::ScanNotFound(_))));
        assert!(hooks.is_empty());
    }

    #[test]
    fn pattern_parses() {
        assert_eq!(landmark().unwrap().pattern.len(), 72);
    }
}
