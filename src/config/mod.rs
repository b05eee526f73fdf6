//! # Config
//!
//! Tweak settings read from a TOML file next to the host executable

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// File name of the configuration, looked up in the executable's directory
pub const CONFIG_FILE_NAME: &str = "tweakhook.toml";

/// Largest field-of-view offset accepted, in degrees either way
pub const MAX_ADDITIONAL_FOV: f32 = 80.0;

/// Aspect ratio limit removal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AspectRatioConfig {
    /// Patch out the aspect ratio constraint
    pub enabled: bool,
}

impl Default for AspectRatioConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Gameplay field of view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FovConfig {
    /// Degrees added to the gameplay camera's field of view; 0 disables the hook
    pub additional_fov: f32,
}

/// Tonemapper sharpening
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SharpeningConfig {
    /// Sharpening strength forced onto the console variable
    pub strength: f32,
}

impl Default for SharpeningConfig {
    fn default() -> Self {
        Self { strength: 0.5 }
    }
}

/// Plain on/off toggle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Toggle {
    /// Whether the effect stays enabled
    pub enabled: bool,
}

impl Default for Toggle {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Every setting the tweaks consume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TweakConfig {
    /// `[aspect_ratio_limit]`
    pub aspect_ratio_limit: AspectRatioConfig,
    /// `[gameplay_fov]`
    pub gameplay_fov: FovConfig,
    /// `[sharpening]`
    pub sharpening: SharpeningConfig,
    /// `[chromatic_aberration]`
    pub chromatic_aberration: Toggle,
    /// `[vignette]`
    pub vignette: Toggle,
    /// `[ray_reconstruction]`, off by default
    pub ray_reconstruction: Toggle,
}

impl Default for TweakConfig {
    fn default() -> Self {
        Self {
            aspect_ratio_limit: AspectRatioConfig::default(),
            gameplay_fov: FovConfig::default(),
            sharpening: SharpeningConfig::default(),
            chromatic_aberration: Toggle::default(),
            vignette: Toggle::default(),
            ray_reconstruction: Toggle { enabled: false },
        }
    }
}

impl TweakConfig {
    /// Reads, validates and logs the configuration at `path`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigurationMissing(path.to_path_buf()));
        }
        let contents = fs::read_to_string(path)?;
        let config = Self::parse(&contents)?;
        config.log_values();
        Ok(config)
    }

    /// Parses and validates TOML text; absent sections and keys keep their defaults
    pub fn parse(contents: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(contents)?;
        config.validate();
        Ok(config)
    }

    /// Clamps values the game cannot handle
    fn validate(&mut self) {
        let fov = self.gameplay_fov.additional_fov;
        if !fov.is_finite() || fov.abs() > MAX_ADDITIONAL_FOV {
            let clamped = if fov.is_nan() {
                0.0
            } else {
                fov.clamp(-MAX_ADDITIONAL_FOV, MAX_ADDITIONAL_FOV)
            };
            warn!(
                "Config: gameplay_fov.additional_fov = {} is out of range, clamping to {}",
                fov, clamped
            );
            self.gameplay_fov.additional_fov = clamped;
        }
    }

    /// Writes one line per setting
    pub fn log_values(&self) {
        info!("Config: aspect_ratio_limit.enabled = {}", self.aspect_ratio_limit.enabled);
        info!("Config: gameplay_fov.additional_fov = {}", self.gameplay_fov.additional_fov);
        info!("Config: sharpening.strength = {}", self.sharpening.strength);
        info!("Config: chromatic_aberration.enabled = {}", self.chromatic_aberration.enabled);
        info!("Config: vignette.enabled = {}", self.vignette.enabled);
        info!("Config: ray_reconstruction.enabled = {}", self.ray_reconstruction.enabled);
    }
}

/// Path of the configuration file inside `exe_dir`
pub fn config_path(exe_dir: &Path) -> PathBuf {
    exe_dir.join(CONFIG_FILE_NAME)
}
