//! The façade that owns instance creation and teardown.
//!
//! Async operations take the scene and physics world as `&RefCell<_>` so
//! several spawns can wait on loads at the same time; every borrow is taken
//! after the last await of its step and dropped before the next one.

use crate::activation::{ActivationController, EmissionState};
use crate::asset_store::{
    material_cache_key, AssetStore, Instance, InstanceId, InstanceOrigin, InstancePart, RegisteredInstance,
    StaticInstance,
};
use crate::catalog::{AssetCatalog, AssetTypeConfig};
use crate::config::AssetConfig;
use crate::errors::{AssetError, Result};
use crate::material_registry::Side;
use crate::model::{LoadedModel, ModelLoader, ModelNode};
use crate::physics::{BodyDesc, ColliderDesc, ColliderShape, PhysicsWorld};
use crate::resource_pool::{PoolComponent, PoolEntry, ResourcePool};
use crate::scene::{Activatable, CollisionMesh, InstanceTag, RenderOrder, SceneGraph, Transform3D};
use crate::time::Time;
use bevy_ecs::entity::Entity;
use glam::{Mat4, Quat, Vec3};
use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

const MIN_HALF_EXTENT: f32 = 0.005;
const INTERACTABLE_PREFIX: &str = "interactable_";

/// Recognised spawn options. Unset fields fall back to the catalog entry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpawnOptions {
    pub color: Option<Vec3>,
    pub category: Option<String>,
    /// Defaults to the instance id.
    pub name: Option<String>,
    pub mass_override: Option<f32>,
}

impl SpawnOptions {
    pub fn with_color(mut self, color: Vec3) -> Self {
        self.color = Some(color);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_mass(mut self, mass: f32) -> Self {
        self.mass_override = Some(mass);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MaterialMode {
    Interactable,
    Overlay,
}

struct Blueprint {
    components: Vec<BlueprintComponent>,
}

struct BlueprintComponent {
    config: AssetTypeConfig,
    model: Arc<LoadedModel>,
    offset: Vec3,
    rotation: Quat,
}

pub struct AssetLifecycleManager {
    store: AssetStore,
    pool: RefCell<ResourcePool>,
    activation: RefCell<ActivationController>,
    checked_out: RefCell<HashMap<InstanceId, PoolEntry>>,
    config: AssetConfig,
    clock: Cell<Time>,
}

impl AssetLifecycleManager {
    pub fn new(catalog: Rc<AssetCatalog>, loader: Rc<dyn ModelLoader>, config: AssetConfig) -> Self {
        let mut pool = ResourcePool::new(config.pool.default_pool_size, config.pool.cleanup_interval());
        for (key, preset) in &config.pool.presets {
            if catalog.is_spawnable(key) {
                pool.configure(key, preset.pool_size);
            } else {
                log::warn!("[pool] preset '{key}' does not name an asset type or assembly");
            }
        }
        Self {
            store: AssetStore::new(catalog, loader),
            pool: RefCell::new(pool),
            activation: RefCell::new(ActivationController::new(config.activation.clone())),
            checked_out: RefCell::new(HashMap::new()),
            config,
            clock: Cell::new(Time::new()),
        }
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }

    pub fn catalog(&self) -> &AssetCatalog {
        self.store.catalog()
    }

    pub fn config(&self) -> &AssetConfig {
        &self.config
    }

    pub fn pool(&self) -> Ref<'_, ResourcePool> {
        self.pool.borrow()
    }

    pub fn activation(&self) -> Ref<'_, ActivationController> {
        self.activation.borrow()
    }

    pub fn configure_pool(&self, key: &str, pool_size: usize) {
        self.pool.borrow_mut().configure(key, pool_size);
    }

    /// Pooled keys reuse an idle entry and skip loading. Failures are logged
    /// and reported as `None`.
    pub async fn spawn(
        &self,
        key: &str,
        parent: Entity,
        scene: &RefCell<SceneGraph>,
        physics: &RefCell<PhysicsWorld>,
        options: SpawnOptions,
        offset: Vec3,
    ) -> Option<Instance> {
        let result = self.try_spawn(key, parent, scene, physics, &options, offset).await;
        self.flush_opportunistically(scene, physics);
        match result {
            Ok(instance) => {
                log::debug!("[assets] spawned '{}' ({:?})", instance.id, instance.origin);
                Some(instance)
            }
            Err(err) => {
                log::error!("[assets] spawn of '{key}' failed: {err}");
                None
            }
        }
    }

    async fn try_spawn(
        &self,
        key: &str,
        parent: Entity,
        scene: &RefCell<SceneGraph>,
        physics: &RefCell<PhysicsWorld>,
        options: &SpawnOptions,
        offset: Vec3,
    ) -> Result<Instance> {
        if !self.catalog().is_spawnable(key) {
            return Err(AssetError::InvalidAssetType(key.to_string()));
        }

        let pooled = {
            let mut scene = scene.borrow_mut();
            self.pool.borrow_mut().acquire(key, &mut scene)
        };
        if let Some(entry) = pooled {
            let mut scene = scene.borrow_mut();
            let mut physics = physics.borrow_mut();
            return Ok(self.place_pooled(key, entry, parent, &mut scene, &mut physics, options, offset));
        }

        let blueprint = self.blueprint(key).await?;
        let mut scene = scene.borrow_mut();
        let mut physics = physics.borrow_mut();
        let built = self.build(&blueprint, &mut scene, &mut physics, options, offset)?;
        let id = self.store.mint_instance_id(key);
        let parts = built
            .into_iter()
            .map(|component| InstancePart { visual_node: component.visual_node, physics_body: component.physics_body });
        let instance = self.finish_instance(&id, key, parts, parent, &mut scene, options, InstanceOrigin::Fresh);
        self.store.register_dynamic_instance(id, instance.clone());
        Ok(instance)
    }

    #[allow(clippy::too_many_arguments)]
    fn place_pooled(
        &self,
        key: &str,
        entry: PoolEntry,
        parent: Entity,
        scene: &mut SceneGraph,
        physics: &mut PhysicsWorld,
        options: &SpawnOptions,
        offset: Vec3,
    ) -> Instance {
        for component in &entry.components {
            let position = offset + component.offset;
            physics.set_translation(component.physics_body, position);
            physics.set_rotation(component.physics_body, component.rotation);
            physics.wake_up(component.physics_body);
            scene.update_transform(component.visual_node, |transform| {
                transform.translation = position;
                transform.rotation = component.rotation;
            });
        }
        let id = self.store.mint_instance_id(key);
        let parts = entry
            .components
            .iter()
            .map(|component| InstancePart { visual_node: component.visual_node, physics_body: component.physics_body });
        let instance = self.finish_instance(&id, key, parts, parent, scene, options, InstanceOrigin::Pooled);
        self.checked_out.borrow_mut().insert(id.clone(), entry);
        self.store.register_dynamic_instance(id, instance.clone());
        instance
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_instance(
        &self,
        id: &InstanceId,
        key: &str,
        parts: impl Iterator<Item = InstancePart>,
        parent: Entity,
        scene: &mut SceneGraph,
        options: &SpawnOptions,
        origin: InstanceOrigin,
    ) -> Instance {
        let mut parts: Vec<InstancePart> = parts.collect();
        for part in &parts {
            scene.insert(part.visual_node, InstanceTag(id.clone()));
            scene.add(parent, part.visual_node);
        }
        let primary = parts.remove(0);
        let category = options.category.clone().or_else(|| self.default_category(key));
        if let Some(category) = category {
            let name = options.name.clone().unwrap_or_else(|| id.to_string());
            scene.insert(primary.visual_node, Activatable { name, category });
        }
        Instance {
            id: id.clone(),
            asset_key: key.to_string(),
            visual_node: primary.visual_node,
            physics_body: primary.physics_body,
            parts,
            origin,
        }
    }

    fn default_category(&self, key: &str) -> Option<String> {
        let catalog = self.catalog();
        let asset = match catalog.assembly(key) {
            Some(assembly) => assembly.components.first().map(|component| component.asset.as_str())?,
            None => key,
        };
        catalog.get(asset).and_then(|config| config.category.clone())
    }

    async fn blueprint(&self, key: &str) -> Result<Blueprint> {
        let catalog = self.catalog();
        let layout: Vec<(String, Vec3, Quat)> = match catalog.assembly(key) {
            Some(assembly) => {
                assembly.components.iter().map(|c| (c.asset.clone(), c.offset(), c.rotation())).collect()
            }
            None => vec![(key.to_string(), Vec3::ZERO, Quat::IDENTITY)],
        };
        let mut components = Vec::with_capacity(layout.len());
        for (asset, offset, rotation) in layout {
            let config = catalog.get(&asset).cloned().ok_or_else(|| AssetError::InvalidAssetType(asset.clone()))?;
            let model = self.store.load(&asset).await?;
            components.push(BlueprintComponent { config, model, offset, rotation });
        }
        Ok(Blueprint { components })
    }

    // Anything built before a failure is torn down again.
    fn build(
        &self,
        blueprint: &Blueprint,
        scene: &mut SceneGraph,
        physics: &mut PhysicsWorld,
        options: &SpawnOptions,
        origin: Vec3,
    ) -> Result<Vec<PoolComponent>> {
        let mut built: Vec<PoolComponent> = Vec::with_capacity(blueprint.components.len());
        for component in &blueprint.components {
            match self.build_component(component, scene, physics, options, origin + component.offset) {
                Ok(part) => built.push(PoolComponent {
                    visual_node: part.visual_node,
                    physics_body: part.physics_body,
                    offset: component.offset,
                    rotation: component.rotation,
                }),
                Err(err) => {
                    for part in built {
                        physics.remove_rigid_body(part.physics_body);
                        scene.dispose_subtree(part.visual_node);
                    }
                    return Err(err);
                }
            }
        }
        Ok(built)
    }

    fn build_component(
        &self,
        component: &BlueprintComponent,
        scene: &mut SceneGraph,
        physics: &mut PhysicsWorld,
        options: &SpawnOptions,
        position: Vec3,
    ) -> Result<InstancePart> {
        let config = &component.config;
        let body = physics.create_rigid_body(&BodyDesc {
            translation: position,
            rotation: component.rotation,
            mass: options.mass_override.unwrap_or(config.mass),
            linear_damping: config.linear_damping,
            angular_damping: config.angular_damping,
            can_sleep: true,
        });

        let wrapper = scene.spawn_node(
            config.key.clone(),
            Transform3D { translation: position, rotation: component.rotation, scale: Vec3::splat(config.scale) },
        );
        let model_root =
            self.instantiate_node(scene, &config.key, &component.model.root, MaterialMode::Interactable, options.color);
        scene.add(wrapper, model_root);

        if let Err(err) = attach_colliders(config, &component.model, physics, body) {
            physics.remove_rigid_body(body);
            scene.dispose_subtree(wrapper);
            return Err(err);
        }
        Ok(InstancePart { visual_node: wrapper, physics_body: body })
    }

    fn instantiate_node(
        &self,
        scene: &mut SceneGraph,
        asset_key: &str,
        node: &ModelNode,
        mode: MaterialMode,
        color: Option<Vec3>,
    ) -> Entity {
        let entity = scene.spawn_node(node.name.clone(), node.transform);
        if let Some(mesh) = &node.mesh {
            scene.set_mesh(entity, mesh.clone());
            if node.is_collision() {
                scene.set_visible(entity, false);
                scene.insert(entity, CollisionMesh);
            } else {
                let mut template = node.material.clone().unwrap_or_default();
                if let Some(color) = color {
                    template.color = color;
                }
                let mut key = material_cache_key(asset_key, &node.name, &template);
                if mode == MaterialMode::Overlay {
                    key.push_str("::overlay");
                }
                let shared = self.store.get_or_create_material(&mut scene.materials, &key, &template);
                match mode {
                    MaterialMode::Interactable => {
                        scene.set_name(entity, format!("{INTERACTABLE_PREFIX}{}", node.name));
                    }
                    MaterialMode::Overlay => {
                        if let Some(material) = scene.materials.get_mut(&shared) {
                            material.depth_test = false;
                            material.depth_write = false;
                            material.side = Side::Double;
                        }
                        scene.insert(entity, RenderOrder(self.config.render.overlay_render_order));
                    }
                }
                scene.assign_material(entity, &shared);
            }
        }
        for child in &node.children {
            let child_entity = self.instantiate_node(scene, asset_key, child, mode, color);
            scene.add(entity, child_entity);
        }
        entity
    }

    /// Pooled instances go back to their pool with their bodies intact.
    pub fn despawn(&self, scene: &mut SceneGraph, physics: &mut PhysicsWorld, instance: &Instance) -> bool {
        if !matches!(self.store.instance(&instance.id), Some(RegisteredInstance::Dynamic(_))) {
            return false;
        }
        self.store.unregister(&instance.id);
        {
            let mut activation = self.activation.borrow_mut();
            for part in instance.components() {
                activation.forget(scene, part.visual_node);
            }
        }

        match instance.origin {
            InstanceOrigin::Pooled => {
                let entry = self.checked_out.borrow_mut().remove(&instance.id);
                for part in instance.components() {
                    scene.detach(part.visual_node);
                    scene.remove_component::<InstanceTag>(part.visual_node);
                    scene.remove_component::<Activatable>(part.visual_node);
                }
                match entry {
                    Some(entry) => self.pool.borrow_mut().release(&instance.asset_key, entry, scene, physics),
                    None => log::warn!("[pool] '{}' has no checked-out entry", instance.id),
                }
            }
            InstanceOrigin::Fresh => {
                for part in instance.components() {
                    scene.detach(part.visual_node);
                    physics.remove_rigid_body(part.physics_body);
                    scene.dispose_subtree(part.visual_node);
                }
            }
        }
        log::debug!("[assets] despawned '{}'", instance.id);
        true
    }

    pub async fn create_static_mesh(
        &self,
        key: &str,
        parent: Entity,
        scene: &RefCell<SceneGraph>,
        offset: Vec3,
        rotation: Quat,
    ) -> Result<StaticInstance> {
        let model = self.store.load(key).await?;
        let config = self.catalog().get(key).cloned().ok_or_else(|| AssetError::UnknownAssetType(key.to_string()))?;

        let mut scene = scene.borrow_mut();
        let id = self.store.mint_instance_id(key);
        let wrapper = scene.spawn_node(
            id.to_string(),
            Transform3D { translation: offset, rotation, scale: Vec3::splat(config.scale) },
        );
        let model_root = self.instantiate_node(&mut scene, key, &model.root, MaterialMode::Overlay, None);
        scene.add(wrapper, model_root);
        scene.insert(wrapper, InstanceTag(id.clone()));
        scene.add(parent, wrapper);

        let instance = StaticInstance { id: id.clone(), asset_key: key.to_string(), visual_node: wrapper };
        self.store.register_static_instance(id, instance.clone());
        Ok(instance)
    }

    pub fn remove_static_mesh(&self, scene: &mut SceneGraph, instance: &StaticInstance) -> bool {
        if !matches!(self.store.instance(&instance.id), Some(RegisteredInstance::Static(_))) {
            return false;
        }
        self.store.unregister(&instance.id);
        scene.dispose_subtree(instance.visual_node);
        true
    }

    pub fn sync_visuals_from_physics(&self, scene: &mut SceneGraph, physics: &PhysicsWorld) -> usize {
        let mut synced = 0;
        for instance in self.store.dynamic_instances() {
            for part in instance.components() {
                let (Some(translation), Some(rotation)) =
                    (physics.translation(part.physics_body), physics.rotation(part.physics_body))
                else {
                    continue;
                };
                scene.update_transform(part.visual_node, |transform| {
                    transform.translation = translation;
                    transform.rotation = rotation;
                });
                synced += 1;
            }
        }
        synced
    }

    pub async fn prewarm_pool(
        &self,
        key: &str,
        count: usize,
        scene: &RefCell<SceneGraph>,
        physics: &RefCell<PhysicsWorld>,
    ) -> Result<usize> {
        if !self.catalog().is_spawnable(key) {
            return Err(AssetError::InvalidAssetType(key.to_string()));
        }
        let blueprint = self.blueprint(key).await?;
        let mut scene = scene.borrow_mut();
        let mut physics = physics.borrow_mut();
        let options = SpawnOptions::default();
        let created = self.pool.borrow_mut().preallocate(key, count, &mut scene, &mut physics, |scene, physics| {
            let mut entry = PoolEntry::new(key);
            entry.components.extend(self.build(&blueprint, scene, physics, &options, Vec3::ZERO)?);
            Ok(entry)
        });
        log::info!("[pool] '{key}' prewarmed with {created} entries");
        Ok(created)
    }

    pub async fn prewarm_presets(&self, scene: &RefCell<SceneGraph>, physics: &RefCell<PhysicsWorld>) -> usize {
        let mut total = 0;
        for (key, preset) in self.config.pool.presets.clone() {
            if preset.preallocate == 0 {
                continue;
            }
            match self.prewarm_pool(&key, preset.preallocate, scene, physics).await {
                Ok(created) => total += created,
                Err(err) => log::warn!("[pool] prewarm of '{key}' failed: {err}"),
            }
        }
        total
    }

    pub fn elapsed(&self) -> Duration {
        self.clock.get().elapsed()
    }

    pub fn flush_disposal_queue(&self, scene: &mut SceneGraph, physics: &mut PhysicsWorld) -> usize {
        self.pool.borrow_mut().flush_disposal_queue(self.elapsed(), scene, physics)
    }

    fn flush_opportunistically(&self, scene: &RefCell<SceneGraph>, physics: &RefCell<PhysicsWorld>) {
        let (Ok(mut scene), Ok(mut physics)) = (scene.try_borrow_mut(), physics.try_borrow_mut()) else {
            return;
        };
        self.flush_disposal_queue(&mut scene, &mut physics);
    }

    pub fn activate(&self, scene: &mut SceneGraph, name: &str) -> Option<EmissionState> {
        self.activation.borrow_mut().activate(scene, name)
    }

    pub fn deactivate(&self, scene: &mut SceneGraph, name: &str) -> bool {
        self.activation.borrow_mut().deactivate(scene, name)
    }

    pub fn deactivate_all(&self, scene: &mut SceneGraph, prefix: Option<&str>) -> usize {
        self.activation.borrow_mut().deactivate_all(scene, prefix)
    }

    pub fn update(&self, scene: &mut SceneGraph, dt: Duration) {
        let mut clock = self.clock.get();
        clock.tick(dt);
        self.clock.set(clock);
        self.activation.borrow_mut().update(scene, dt);
    }

    pub fn shutdown(&self, scene: &mut SceneGraph, physics: &mut PhysicsWorld) {
        let dynamic = self.store.dynamic_instances();
        for instance in &dynamic {
            self.despawn(scene, physics, instance);
        }
        let drained = self.pool.borrow_mut().drain_all(scene, physics);
        let remaining: Vec<Entity> = scene.nodes_with::<InstanceTag>();
        for node in remaining {
            scene.dispose_subtree(node);
        }
        let materials = self.store.dispose(&mut scene.materials);
        log::info!(
            "[assets] shutdown: {} instances, {drained} pooled entries, {materials} materials released",
            dynamic.len()
        );
    }
}

// One trimesh per `col_` mesh, else a box around the visible geometry.
fn attach_colliders(
    config: &AssetTypeConfig,
    model: &LoadedModel,
    physics: &mut PhysicsWorld,
    body: rapier3d::prelude::RigidBodyHandle,
) -> Result<usize> {
    let root_scale = Mat4::from_scale(Vec3::splat(config.scale));
    let mut count = 0;
    for (node, matrix) in model.nodes() {
        if !node.is_collision() {
            continue;
        }
        let Some(mesh) = &node.mesh else {
            continue;
        };
        let (scale, rotation, translation) = (root_scale * matrix).to_scale_rotation_translation();
        let vertices = mesh.positions().map(|position| position * scale).collect();
        let mut desc = ColliderDesc::new(ColliderShape::TriMesh { vertices, indices: mesh.triangles() });
        desc.offset = translation;
        desc.rotation = rotation;
        desc.restitution = config.restitution;
        physics.create_collider(&desc, body)?;
        count += 1;
    }
    if count > 0 {
        return Ok(count);
    }

    let bounds = model
        .visible_bounds()
        .ok_or_else(|| AssetError::spawn(&config.key, "model has no visible geometry for a fallback collider"))?;
    let half_extents = (bounds.size() * config.scale * 0.5).max(Vec3::splat(MIN_HALF_EXTENT));
    let mut desc = ColliderDesc::new(ColliderShape::Cuboid { half_extents });
    desc.offset = bounds.center * config.scale;
    desc.restitution = config.restitution;
    physics.create_collider(&desc, body)?;
    Ok(1)
}
