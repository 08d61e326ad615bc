use crate::errors::{AssetError, Result};
use crate::mesh::Mesh;
use anyhow::Context;
use glam::{Quat, Vec3};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveGeometry {
    Box { width: f32, height: f32, depth: f32 },
    Sphere { radius: f32, #[serde(default = "PrimitiveGeometry::default_segments")] segments: u32 },
    Plane { width: f32, depth: f32 },
}

impl PrimitiveGeometry {
    const fn default_segments() -> u32 {
        16
    }

    pub fn build_mesh(&self) -> Mesh {
        match *self {
            PrimitiveGeometry::Box { width, height, depth } => Mesh::cuboid(width, height, depth),
            PrimitiveGeometry::Sphere { radius, segments } => Mesh::sphere(radius, segments),
            PrimitiveGeometry::Plane { width, depth } => Mesh::plane(width, depth),
        }
    }

    fn is_valid(&self) -> bool {
        match *self {
            PrimitiveGeometry::Box { width, height, depth } => width > 0.0 && height > 0.0 && depth > 0.0,
            PrimitiveGeometry::Sphere { radius, segments } => radius > 0.0 && segments >= 3,
            PrimitiveGeometry::Plane { width, depth } => width > 0.0 && depth > 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssetTypeConfig {
    pub key: String,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub primitive: Option<PrimitiveGeometry>,
    #[serde(default = "AssetTypeConfig::default_scale")]
    pub scale: f32,
    #[serde(default = "AssetTypeConfig::default_mass")]
    pub mass: f32,
    #[serde(default)]
    pub restitution: f32,
    #[serde(default = "AssetTypeConfig::default_damping")]
    pub linear_damping: f32,
    #[serde(default = "AssetTypeConfig::default_damping")]
    pub angular_damping: f32,
    /// Base color for procedural geometry, `0xRRGGBB`.
    #[serde(default)]
    pub color: Option<u32>,
    #[serde(default)]
    pub category: Option<String>,
}

impl AssetTypeConfig {
    const fn default_scale() -> f32 {
        1.0
    }

    const fn default_mass() -> f32 {
        1.0
    }

    const fn default_damping() -> f32 {
        0.5
    }

    pub fn from_source(key: impl Into<String>, source_path: impl Into<String>) -> Self {
        Self { source_path: Some(source_path.into()), ..Self::blank(key.into()) }
    }

    pub fn primitive(key: impl Into<String>, geometry: PrimitiveGeometry) -> Self {
        Self { primitive: Some(geometry), ..Self::blank(key.into()) }
    }

    fn blank(key: String) -> Self {
        Self {
            key,
            source_path: None,
            primitive: None,
            scale: Self::default_scale(),
            mass: Self::default_mass(),
            restitution: 0.0,
            linear_damping: Self::default_damping(),
            angular_damping: Self::default_damping(),
            color: None,
            category: None,
        }
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass = mass;
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution;
        self
    }

    pub fn with_color(mut self, color: u32) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    fn validate(&self) -> Result<()> {
        match (&self.source_path, &self.primitive) {
            (Some(_), Some(_)) => {
                return Err(AssetError::invalid_catalog(&self.key, "both source_path and primitive are set"))
            }
            (None, None) => {
                return Err(AssetError::invalid_catalog(&self.key, "neither source_path nor primitive is set"))
            }
            (None, Some(primitive)) if !primitive.is_valid() => {
                return Err(AssetError::invalid_catalog(&self.key, "primitive dimensions must be positive"))
            }
            _ => {}
        }
        if !(self.scale.is_finite() && self.scale > 0.0) {
            return Err(AssetError::invalid_catalog(&self.key, "scale must be positive"));
        }
        if !(self.mass.is_finite() && self.mass >= 0.0) {
            return Err(AssetError::invalid_catalog(&self.key, "mass must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssemblyComponent {
    pub asset: String,
    #[serde(default)]
    pub offset: [f32; 3],
    /// Euler angles in radians, XYZ order.
    #[serde(default)]
    pub rotation: [f32; 3],
}

impl AssemblyComponent {
    pub fn new(asset: impl Into<String>, offset: Vec3) -> Self {
        Self { asset: asset.into(), offset: offset.to_array(), rotation: [0.0; 3] }
    }

    pub fn offset(&self) -> Vec3 {
        Vec3::from_array(self.offset)
    }

    pub fn rotation(&self) -> Quat {
        Quat::from_euler(glam::EulerRot::XYZ, self.rotation[0], self.rotation[1], self.rotation[2])
    }
}

/// Composite shape whose components are pooled, moved, slept and woken as a unit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssemblyDescriptor {
    pub key: String,
    pub components: Vec<AssemblyComponent>,
}

impl AssemblyDescriptor {
    pub const SIGN_WITH_CHAIN: &'static str = "sign_with_chain";
    pub const CHAIN_SEGMENTS: usize = 6;

    /// One sign hanging from six chain segments stacked above it.
    pub fn sign_with_chain(sign_asset: &str, link_asset: &str, link_spacing: f32) -> Self {
        let mut components = vec![AssemblyComponent::new(sign_asset, Vec3::ZERO)];
        for segment in 0..Self::CHAIN_SEGMENTS {
            let height = 0.5 + link_spacing * (segment as f32 + 0.5);
            components.push(AssemblyComponent::new(link_asset, Vec3::new(0.0, height, 0.0)));
        }
        Self { key: Self::SIGN_WITH_CHAIN.to_string(), components }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    types: Vec<AssetTypeConfig>,
    #[serde(default)]
    assemblies: Vec<AssemblyDescriptor>,
}

/// Immutable registry of asset types and assemblies, fixed at startup.
#[derive(Debug, Clone, Default)]
pub struct AssetCatalog {
    types: BTreeMap<String, AssetTypeConfig>,
    assemblies: BTreeMap<String, AssemblyDescriptor>,
}

impl AssetCatalog {
    pub fn new(types: Vec<AssetTypeConfig>, assemblies: Vec<AssemblyDescriptor>) -> Result<Self> {
        let mut catalog = AssetCatalog::default();
        for config in types {
            config.validate()?;
            if catalog.types.contains_key(&config.key) {
                return Err(AssetError::invalid_catalog(&config.key, "duplicate asset type"));
            }
            catalog.types.insert(config.key.clone(), config);
        }
        for assembly in assemblies {
            if assembly.components.is_empty() {
                return Err(AssetError::invalid_catalog(&assembly.key, "assembly has no components"));
            }
            if catalog.types.contains_key(&assembly.key) || catalog.assemblies.contains_key(&assembly.key) {
                return Err(AssetError::invalid_catalog(&assembly.key, "assembly key already registered"));
            }
            if let Some(missing) = assembly.components.iter().find(|c| !catalog.types.contains_key(&c.asset)) {
                return Err(AssetError::invalid_catalog(
                    &assembly.key,
                    format!("component references unknown asset type '{}'", missing.asset),
                ));
            }
            catalog.assemblies.insert(assembly.key.clone(), assembly);
        }
        Ok(catalog)
    }

    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let file: CatalogFile = serde_json::from_str(text).context("Failed to parse asset catalog")?;
        Ok(Self::new(file.types, file.assemblies)?)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text =
            fs::read_to_string(path).with_context(|| format!("Failed to read catalog file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid catalog file {}", path.display()))
    }

    /// Procedural catalog used when no catalog file is supplied.
    pub fn builtin() -> Self {
        let types = vec![
            AssetTypeConfig::primitive("CUBE", PrimitiveGeometry::Box { width: 1.0, height: 1.0, depth: 1.0 })
                .with_restitution(1.1),
            AssetTypeConfig::primitive("BALL", PrimitiveGeometry::Sphere { radius: 0.5, segments: 16 })
                .with_restitution(0.8)
                .with_color(0x3070ff),
            AssetTypeConfig::primitive("SIGN", PrimitiveGeometry::Box { width: 1.6, height: 1.0, depth: 0.1 })
                .with_mass(0.5)
                .with_color(0xd8c8a0)
                .with_category("sign"),
            AssetTypeConfig::primitive("CHAIN_LINK", PrimitiveGeometry::Box { width: 0.08, height: 0.2, depth: 0.08 })
                .with_mass(0.05)
                .with_color(0x707070),
        ];
        let assemblies = vec![AssemblyDescriptor::sign_with_chain("SIGN", "CHAIN_LINK", 0.22)];
        match Self::new(types, assemblies) {
            Ok(catalog) => catalog,
            Err(err) => unreachable!("builtin catalog is valid: {err}"),
        }
    }

    pub fn get(&self, key: &str) -> Option<&AssetTypeConfig> {
        self.types.get(key)
    }

    pub fn assembly(&self, key: &str) -> Option<&AssemblyDescriptor> {
        self.assemblies.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.types.contains_key(key)
    }

    pub fn is_spawnable(&self, key: &str) -> bool {
        self.types.contains_key(key) || self.assemblies.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(|k| k.as_str())
    }

    pub fn assembly_keys(&self) -> impl Iterator<Item = &str> {
        self.assemblies.keys().map(|k| k.as_str())
    }
}
