//! Scene graph the asset core attaches visual nodes to.
//!
//! Nodes are `bevy_ecs` entities linked through [`Parent`] / [`Children`].
//! Materials are referenced by key through [`MaterialSlot`] and stored in the
//! graph's [`MaterialRegistry`], so swapping a slot is a reference-count
//! update rather than a copy.

use crate::asset_store::InstanceId;
use crate::material_registry::{Material, MaterialRegistry};
use crate::mesh::Mesh;
use bevy_ecs::prelude::*;
use glam::{Mat4, Quat, Vec3};
use std::sync::Arc;

#[derive(Component, Clone, Copy)]
pub struct Parent(pub Entity);
#[derive(Component, Default)]
pub struct Children(pub Vec<Entity>);

#[derive(Component, Clone, Debug)]
pub struct NodeName(pub String);

#[derive(Component, Clone, Copy, Debug, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform3D {
    fn default() -> Self {
        Self { translation: Vec3::ZERO, rotation: Quat::IDENTITY, scale: Vec3::ONE }
    }
}

impl Transform3D {
    pub fn from_translation(translation: Vec3) -> Self {
        Self { translation, ..Self::default() }
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

#[derive(Component, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Visibility(pub bool);

#[derive(Component, Clone)]
pub struct MeshRef(pub Arc<Mesh>);

#[derive(Component, Clone, Debug)]
pub struct MaterialSlot(pub String);

#[derive(Component, Clone, Debug)]
pub struct InstanceTag(pub InstanceId);

/// Marks a `col_` mesh used only to build colliders.
#[derive(Component, Clone, Copy, Debug)]
pub struct CollisionMesh;

#[derive(Component, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderOrder(pub i32);

/// Name and category an instance answers to for highlight requests.
#[derive(Component, Clone, Debug, PartialEq, Eq)]
pub struct Activatable {
    pub name: String,
    pub category: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SceneStats {
    pub nodes_spawned: u64,
    pub nodes_despawned: u64,
    pub geometries_disposed: u64,
}

pub struct SceneGraph {
    world: World,
    root: Entity,
    pub materials: MaterialRegistry,
    stats: SceneStats,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        let mut world = World::new();
        let root = world
            .spawn((NodeName("scene_root".to_string()), Transform3D::default(), Visibility(true), Children::default()))
            .id();
        Self { world, root, materials: MaterialRegistry::new(), stats: SceneStats::default() }
    }

    pub fn root(&self) -> Entity {
        self.root
    }

    pub fn stats(&self) -> SceneStats {
        self.stats
    }

    pub fn spawn_node(&mut self, name: impl Into<String>, transform: Transform3D) -> Entity {
        self.stats.nodes_spawned += 1;
        self.world.spawn((NodeName(name.into()), transform, Visibility(true))).id()
    }

    pub fn contains(&self, node: Entity) -> bool {
        self.world.get_entity(node).is_ok()
    }

    pub fn add(&mut self, parent: Entity, child: Entity) {
        if !self.contains(parent) || !self.contains(child) || parent == child {
            return;
        }
        self.detach(child);
        match self.world.get_mut::<Children>(parent) {
            Some(mut children) => children.0.push(child),
            None => {
                self.world.entity_mut(parent).insert(Children(vec![child]));
            }
        }
        self.world.entity_mut(child).insert(Parent(parent));
    }

    /// Detaches `child` from `parent`. Returns false if `child` was not a
    /// direct child of `parent`.
    pub fn remove(&mut self, parent: Entity, child: Entity) -> bool {
        if self.parent(child) != Some(parent) {
            return false;
        }
        self.detach(child)
    }

    pub fn detach(&mut self, node: Entity) -> bool {
        let Some(parent) = self.parent(node) else {
            return false;
        };
        if let Some(mut children) = self.world.get_mut::<Children>(parent) {
            children.0.retain(|entry| *entry != node);
        }
        if let Ok(mut entity) = self.world.get_entity_mut(node) {
            entity.remove::<Parent>();
        }
        true
    }

    pub fn parent(&self, node: Entity) -> Option<Entity> {
        self.world.get::<Parent>(node).map(|parent| parent.0)
    }

    pub fn children(&self, node: Entity) -> &[Entity] {
        self.world.get::<Children>(node).map(|children| children.0.as_slice()).unwrap_or(&[])
    }

    /// `node` first, then its subtree depth first.
    pub fn descendants(&self, node: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        if !self.contains(node) {
            return out;
        }
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    pub fn name(&self, node: Entity) -> Option<&str> {
        self.world.get::<NodeName>(node).map(|name| name.0.as_str())
    }

    pub fn set_name(&mut self, node: Entity, name: impl Into<String>) {
        if let Some(mut current) = self.world.get_mut::<NodeName>(node) {
            current.0 = name.into();
        }
    }

    pub fn find_by_name(&self, start: Entity, name: &str) -> Option<Entity> {
        self.descendants(start).into_iter().find(|node| self.name(*node) == Some(name))
    }

    pub fn transform(&self, node: Entity) -> Option<Transform3D> {
        self.world.get::<Transform3D>(node).copied()
    }

    pub fn update_transform(&mut self, node: Entity, update: impl FnOnce(&mut Transform3D)) {
        if let Some(mut transform) = self.world.get_mut::<Transform3D>(node) {
            update(&mut *transform);
        }
    }

    pub fn is_visible(&self, node: Entity) -> bool {
        self.world.get::<Visibility>(node).map(|visibility| visibility.0).unwrap_or(false)
    }

    pub fn set_visible(&mut self, node: Entity, visible: bool) {
        if let Some(mut visibility) = self.world.get_mut::<Visibility>(node) {
            visibility.0 = visible;
        }
    }

    pub fn set_mesh(&mut self, node: Entity, mesh: Arc<Mesh>) {
        if let Ok(mut entity) = self.world.get_entity_mut(node) {
            entity.insert(MeshRef(mesh));
        }
    }

    pub fn mesh(&self, node: Entity) -> Option<&Arc<Mesh>> {
        self.world.get::<MeshRef>(node).map(|mesh| &mesh.0)
    }

    pub fn material_key(&self, node: Entity) -> Option<&str> {
        self.world.get::<MaterialSlot>(node).map(|slot| slot.0.as_str())
    }

    pub fn material(&self, node: Entity) -> Option<&Material> {
        self.material_key(node).and_then(|key| self.materials.get(key))
    }

    /// Points `node` at the registry entry `key`, moving one reference from
    /// the previous material to the new one.
    pub fn assign_material(&mut self, node: Entity, key: &str) {
        if !self.contains(node) {
            return;
        }
        let previous = self.material_key(node).map(str::to_string);
        if previous.as_deref() == Some(key) {
            return;
        }
        self.materials.retain(key);
        self.world.entity_mut(node).insert(MaterialSlot(key.to_string()));
        if let Some(previous) = previous {
            self.materials.release(&previous);
        }
    }

    pub fn insert<C: Component>(&mut self, node: Entity, component: C) {
        if let Ok(mut entity) = self.world.get_entity_mut(node) {
            entity.insert(component);
        }
    }

    pub fn remove_component<C: Component>(&mut self, node: Entity) {
        if let Ok(mut entity) = self.world.get_entity_mut(node) {
            entity.remove::<C>();
        }
    }

    pub fn get<C: Component>(&self, node: Entity) -> Option<&C> {
        self.world.get::<C>(node)
    }

    pub fn has<C: Component>(&self, node: Entity) -> bool {
        self.get::<C>(node).is_some()
    }

    pub fn nodes_with<C: Component>(&self) -> Vec<Entity> {
        self.world.iter_entities().filter(|entity| entity.contains::<C>()).map(|entity| entity.id()).collect()
    }

    pub fn instance_id_of(&self, node: Entity) -> Option<&InstanceId> {
        let mut current = Some(node);
        while let Some(entity) = current {
            if let Some(tag) = self.world.get::<InstanceTag>(entity) {
                return Some(&tag.0);
            }
            current = self.parent(entity);
        }
        None
    }

    /// Visible mesh nodes under `node` that are not collision proxies.
    pub fn render_meshes(&self, node: Entity) -> Vec<Entity> {
        self.descendants(node)
            .into_iter()
            .filter(|entity| self.has::<MeshRef>(*entity) && !self.has::<CollisionMesh>(*entity))
            .collect()
    }

    pub fn dispose_subtree(&mut self, node: Entity) -> usize {
        if !self.contains(node) {
            return 0;
        }
        self.detach(node);
        let nodes = self.descendants(node);
        for entity in &nodes {
            let Ok(mut entity_mut) = self.world.get_entity_mut(*entity) else {
                continue;
            };
            if entity_mut.take::<MeshRef>().is_some() {
                self.stats.geometries_disposed += 1;
            }
            let slot = entity_mut.take::<MaterialSlot>();
            if let Some(slot) = slot {
                self.materials.release(&slot.0);
            }
        }
        for entity in &nodes {
            if self.world.despawn(*entity) {
                self.stats.nodes_despawned += 1;
            }
        }
        nodes.len()
    }
}
