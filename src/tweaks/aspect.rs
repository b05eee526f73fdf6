//! Aspect ratio limit removal

use tracing::info;

use super::SetupContext;
use crate::error::Result;
use crate::patcher::write_bytes;
use crate::scan::Landmark;

/// Name used in log lines
pub const NAME: &str = "Aspect Ratio";

/// Conditional jump skipping the constraint; the `74 ??` at +3 becomes two `nop`s
const PATTERN: &str = "45 ?? ?? 74 ?? 0F ?? ?? 0F ?? ?? FE ?? 41 ?? ?? C3";

/// Landmark pointing at the jump to remove
pub fn landmark() -> Result<Landmark> {
    Landmark::new(NAME, PATTERN, 3)
}

/// Replaces the aspect ratio check's branch with `nop`s when enabled
pub fn apply(ctx: &SetupContext) -> Result<()> {
    if !ctx.config.aspect_ratio_limit.enabled {
        return Ok(());
    }
    let address = ctx.image.locate(&landmark()?)?;
    // Safety: the landmark lies inside the module image
    unsafe { write_bytes(address as *mut u8, &[0x90, 0x90])? };
    info!("{NAME}: Patched instruction.");
    Ok(())
}
