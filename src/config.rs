use anyhow::{Context, Result};
use glam::Vec3;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PoolPreset {
    pub pool_size: usize,
    #[serde(default)]
    pub preallocate: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "PoolConfig::default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    #[serde(default = "PoolConfig::default_pool_size")]
    pub default_pool_size: usize,
    /// Keys listed here are pooled; everything else takes the fresh path.
    #[serde(default)]
    pub presets: BTreeMap<String, PoolPreset>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivationConfig {
    #[serde(default = "ActivationConfig::default_fade_ms")]
    pub fade_ms: u64,
    #[serde(default = "ActivationConfig::default_emissive_intensity")]
    pub emissive_intensity: f32,
    /// Emissive color per category, `0xRRGGBB`.
    #[serde(default)]
    pub category_colors: BTreeMap<String, u32>,
    #[serde(default = "ActivationConfig::default_fallback_color")]
    pub fallback_color: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "RenderConfig::default_overlay_render_order")]
    pub overlay_render_order: i32,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AssetConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub activation: ActivationConfig,
    #[serde(default)]
    pub render: RenderConfig,
}

impl PoolConfig {
    const fn default_cleanup_interval_ms() -> u64 {
        5_000
    }

    const fn default_pool_size() -> usize {
        10
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn preset(&self, key: &str) -> Option<PoolPreset> {
        self.presets.get(key).copied()
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: Self::default_cleanup_interval_ms(),
            default_pool_size: Self::default_pool_size(),
            presets: BTreeMap::new(),
        }
    }
}

impl ActivationConfig {
    const fn default_fade_ms() -> u64 {
        500
    }

    const fn default_emissive_intensity() -> f32 {
        9.0
    }

    const fn default_fallback_color() -> u32 {
        0xffffff
    }

    pub fn fade_duration(&self) -> Duration {
        Duration::from_millis(self.fade_ms)
    }

    pub fn color_for(&self, category: &str) -> Vec3 {
        rgb_from_hex(self.category_colors.get(category).copied().unwrap_or(self.fallback_color))
    }
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            fade_ms: Self::default_fade_ms(),
            emissive_intensity: Self::default_emissive_intensity(),
            category_colors: BTreeMap::new(),
            fallback_color: Self::default_fallback_color(),
        }
    }
}

impl RenderConfig {
    const fn default_overlay_render_order() -> i32 {
        999
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { overlay_render_order: Self::default_overlay_render_order() }
    }
}

impl AssetConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                log::warn!("[config] {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }
}

pub fn rgb_from_hex(hex: u32) -> Vec3 {
    Vec3::new(
        ((hex >> 16) & 0xff) as f32 / 255.0,
        ((hex >> 8) & 0xff) as f32 / 255.0,
        (hex & 0xff) as f32 / 255.0,
    )
}

/// Inverse of [`rgb_from_hex`], clamping each channel.
pub fn hex_from_rgb(color: Vec3) -> u32 {
    let channel = |value: f32| (value.clamp(0.0, 1.0) * 255.0).round() as u32;
    (channel(color.x) << 16) | (channel(color.y) << 8) | channel(color.z)
}
