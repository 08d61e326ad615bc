//! Parsed model templates and the loaders that produce them.

use crate::catalog::AssetTypeConfig;
use crate::config::rgb_from_hex;
use crate::material_registry::{Material, Side, TextureData};
use crate::mesh::{compute_normals, Mesh, MeshBounds, MeshVertex};
use crate::scene::Transform3D;
use anyhow::{anyhow, bail, Context, Result};
use futures::future::{FutureExt, LocalBoxFuture};
use glam::{Mat4, Quat, Vec2, Vec3};
use gltf::mesh::Mode;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Prefix marking sub-meshes that only carry collision geometry.
pub const COLLISION_PREFIX: &str = "col_";

#[derive(Clone, Debug, Default)]
pub struct ModelNode {
    pub name: String,
    pub transform: Transform3D,
    pub mesh: Option<Arc<Mesh>>,
    pub material: Option<Material>,
    pub children: Vec<ModelNode>,
}

impl ModelNode {
    pub fn group(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_mesh(name: impl Into<String>, mesh: Arc<Mesh>, material: Material) -> Self {
        Self { name: name.into(), mesh: Some(mesh), material: Some(material), ..Self::default() }
    }

    pub fn with_transform(mut self, transform: Transform3D) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_child(mut self, child: ModelNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_collision(&self) -> bool {
        self.name.starts_with(COLLISION_PREFIX)
    }

    fn visit<'a>(&'a self, parent: Mat4, out: &mut Vec<(&'a ModelNode, Mat4)>) {
        let matrix = parent * self.transform.matrix();
        out.push((self, matrix));
        for child in &self.children {
            child.visit(matrix, out);
        }
    }
}

/// Read-only template produced by a [`ModelLoader`]. Instantiation always
/// copies it into fresh scene nodes.
#[derive(Debug)]
pub struct LoadedModel {
    pub source: String,
    pub root: ModelNode,
}

impl LoadedModel {
    pub fn new(source: impl Into<String>, root: ModelNode) -> Self {
        Self { source: source.into(), root }
    }

    /// Template for a catalog entry with procedural geometry.
    pub fn from_primitive(config: &AssetTypeConfig) -> Option<Self> {
        let primitive = config.primitive?;
        let color = config.color.map(rgb_from_hex).unwrap_or(Vec3::ONE);
        let material = Material { label: format!("{}::body", config.key), color, ..Material::default() };
        let body = ModelNode::with_mesh("body", Arc::new(primitive.build_mesh()), material);
        Some(Self::new(format!("primitive:{}", config.key), ModelNode::group(&config.key).with_child(body)))
    }

    /// Every node paired with its transform relative to the model root.
    pub fn nodes(&self) -> Vec<(&ModelNode, Mat4)> {
        let mut out = Vec::new();
        self.root.visit(Mat4::IDENTITY, &mut out);
        out
    }

    pub fn mesh_count(&self) -> usize {
        self.nodes().iter().filter(|(node, _)| node.mesh.is_some()).count()
    }

    pub fn collision_mesh_count(&self) -> usize {
        self.nodes().iter().filter(|(node, _)| node.mesh.is_some() && node.is_collision()).count()
    }

    /// Bounds of the visible geometry in model-root space.
    pub fn visible_bounds(&self) -> Option<MeshBounds> {
        let mut points = Vec::new();
        for (node, matrix) in self.nodes() {
            if node.is_collision() {
                continue;
            }
            if let Some(mesh) = &node.mesh {
                points.extend(mesh.bounds.transformed(&matrix).corners());
            }
        }
        if points.is_empty() {
            None
        } else {
            Some(MeshBounds::from_points(points))
        }
    }
}

/// Source of parsed models. Implementations resolve `source` however they
/// like; the store guarantees at most one call per asset key in flight.
pub trait ModelLoader {
    fn load(&self, source: &str) -> LocalBoxFuture<'static, Result<LoadedModel>>;
}

/// Loads `.gltf` / `.glb` files relative to a root directory.
#[derive(Debug, Clone)]
pub struct GltfModelLoader {
    root: PathBuf,
}

impl GltfModelLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ModelLoader for GltfModelLoader {
    fn load(&self, source: &str) -> LocalBoxFuture<'static, Result<LoadedModel>> {
        let path = self.root.join(source);
        let label = source.to_string();
        async move { load_gltf_model(&path).map(|root| LoadedModel::new(label, root)) }.boxed_local()
    }
}

pub fn load_gltf_model(path: &Path) -> Result<ModelNode> {
    let (document, buffers, images) =
        gltf::import(path).with_context(|| format!("Failed to import glTF from {}", path.display()))?;

    let mut textures: HashMap<usize, Arc<TextureData>> = HashMap::new();
    for texture in document.textures() {
        let source = texture.source();
        let image = images
            .get(source.index())
            .ok_or_else(|| anyhow!("Image index {} missing in {}", source.index(), path.display()))?;
        let data = convert_image_to_rgba(image)?;
        textures.insert(
            texture.index(),
            Arc::new(TextureData {
                key: format!("{}::tex{}", path.display(), texture.index()),
                width: image.width,
                height: image.height,
                data,
            }),
        );
    }

    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or_else(|| anyhow!("No scenes found in {}", path.display()))?;
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("model");
    let mut root = ModelNode::group(stem);
    for node in scene.nodes() {
        root.children.push(convert_node(&node, &buffers, &textures, path)?);
    }
    if !has_mesh(&root) {
        bail!("Model {} contains no triangle meshes", path.display());
    }
    Ok(root)
}

fn has_mesh(node: &ModelNode) -> bool {
    node.mesh.is_some() || node.children.iter().any(has_mesh)
}

fn convert_node(
    node: &gltf::Node,
    buffers: &[gltf::buffer::Data],
    textures: &HashMap<usize, Arc<TextureData>>,
    path: &Path,
) -> Result<ModelNode> {
    let (translation, rotation, scale) = node.transform().decomposed();
    let name = node.name().map(str::to_string).unwrap_or_else(|| format!("node_{}", node.index()));
    let mut out = ModelNode::group(&name).with_transform(Transform3D {
        translation: Vec3::from_array(translation),
        rotation: Quat::from_array(rotation),
        scale: Vec3::from_array(scale),
    });

    if let Some(mesh) = node.mesh() {
        let mut primitives = Vec::new();
        for primitive in mesh.primitives() {
            if primitive.mode() != Mode::Triangles {
                continue;
            }
            if let Some(converted) = convert_primitive(&primitive, buffers, path)? {
                let material = convert_material(&primitive.material(), textures);
                primitives.push((converted, material));
            }
        }
        // Single-primitive meshes stay on the node so `col_` names survive.
        if primitives.len() == 1 {
            if let Some((mesh, material)) = primitives.pop() {
                out.mesh = Some(Arc::new(mesh));
                out.material = Some(material);
            }
        } else {
            for (index, (mesh, material)) in primitives.into_iter().enumerate() {
                out.children.push(ModelNode::with_mesh(format!("{name}_{index}"), Arc::new(mesh), material));
            }
        }
    }

    for child in node.children() {
        out.children.push(convert_node(&child, buffers, textures, path)?);
    }
    Ok(out)
}

fn convert_primitive(primitive: &gltf::Primitive, buffers: &[gltf::buffer::Data], path: &Path) -> Result<Option<Mesh>> {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| &data[..]));
    let positions: Vec<Vec3> = reader
        .read_positions()
        .ok_or_else(|| anyhow!("POSITION attribute missing in {}", path.display()))?
        .map(Vec3::from_array)
        .collect();
    if positions.is_empty() {
        return Ok(None);
    }
    let indices: Vec<u32> = reader
        .read_indices()
        .map(|read| read.into_u32().collect())
        .unwrap_or_else(|| (0..positions.len() as u32).collect());

    let mut normals: Vec<Vec3> =
        reader.read_normals().map(|it| it.map(Vec3::from_array).collect()).unwrap_or_default();
    if normals.len() != positions.len() || normals.iter().all(|n| n.length_squared() == 0.0) {
        normals = compute_normals(&positions, &indices);
    }
    let mut tex_coords: Vec<Vec2> = reader
        .read_tex_coords(0)
        .map(|coords| coords.into_f32().map(Vec2::from_array).collect())
        .unwrap_or_default();
    tex_coords.resize(positions.len(), Vec2::ZERO);

    let vertices = positions
        .iter()
        .enumerate()
        .map(|(i, pos)| MeshVertex::new(*pos, normals[i].normalize_or_zero(), tex_coords[i]))
        .collect();
    Ok(Some(Mesh::new(vertices, indices)))
}

fn convert_material(material: &gltf::Material, textures: &HashMap<usize, Arc<TextureData>>) -> Material {
    let pbr = material.pbr_metallic_roughness();
    let [r, g, b, a] = pbr.base_color_factor();
    let map = pbr.base_color_texture().and_then(|info| textures.get(&info.texture().index()).cloned());
    Material {
        label: material.name().unwrap_or("Default").to_string(),
        color: Vec3::new(r, g, b),
        map,
        transparent: material.alpha_mode() == gltf::material::AlphaMode::Blend,
        opacity: a,
        side: if material.double_sided() { Side::Double } else { Side::Front },
        roughness: pbr.roughness_factor(),
        metalness: pbr.metallic_factor(),
        env_map_intensity: 1.0,
        ao_map_intensity: if material.occlusion_texture().is_some() { 1.0 } else { 0.0 },
        ..Material::default()
    }
}

fn convert_image_to_rgba(image: &gltf::image::Data) -> Result<Vec<u8>> {
    match image.format {
        gltf::image::Format::R8 => Ok(image.pixels.iter().flat_map(|&value| [value, value, value, 255]).collect()),
        gltf::image::Format::R8G8 => {
            Ok(image.pixels.chunks_exact(2).flat_map(|chunk| [chunk[0], chunk[1], 0, 255]).collect())
        }
        gltf::image::Format::R8G8B8 => {
            Ok(image.pixels.chunks_exact(3).flat_map(|chunk| [chunk[0], chunk[1], chunk[2], 255]).collect())
        }
        gltf::image::Format::R8G8B8A8 => Ok(image.pixels.clone()),
        other => bail!("Unsupported image format {:?}", other),
    }
}
