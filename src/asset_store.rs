//! Loaded-model cache, in-flight load table, material cache and the registry
//! of live instances.
//!
//! The store is a cheap-to-clone handle over shared single-threaded state.
//! Loads for the same key are collapsed into one [`Shared`] future; the entry
//! leaves the in-flight table in the same step that populates the cache, so a
//! key is never reported as both loading and loaded.

use crate::catalog::AssetCatalog;
use crate::config::hex_from_rgb;
use crate::errors::{AssetError, Result};
use crate::material_registry::{Material, MaterialRegistry};
use crate::model::{LoadedModel, ModelLoader};
use crate::scene::SceneGraph;
use bevy_ecs::entity::Entity;
use futures::future::{self, FutureExt, LocalBoxFuture, Shared};
use rapier3d::prelude::RigidBodyHandle;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for InstanceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceOrigin {
    Fresh,
    Pooled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstancePart {
    pub visual_node: Entity,
    pub physics_body: RigidBodyHandle,
}

/// A visual node paired with its physics body. Assemblies carry their
/// remaining components in `parts`.
#[derive(Clone, Debug, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    pub asset_key: String,
    pub visual_node: Entity,
    pub physics_body: RigidBodyHandle,
    pub parts: Vec<InstancePart>,
    pub origin: InstanceOrigin,
}

impl Instance {
    pub fn components(&self) -> impl Iterator<Item = InstancePart> + '_ {
        std::iter::once(InstancePart { visual_node: self.visual_node, physics_body: self.physics_body })
            .chain(self.parts.iter().copied())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct StaticInstance {
    pub id: InstanceId,
    pub asset_key: String,
    pub visual_node: Entity,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RegisteredInstance {
    Dynamic(Instance),
    Static(StaticInstance),
}

impl RegisteredInstance {
    pub fn id(&self) -> &InstanceId {
        match self {
            RegisteredInstance::Dynamic(instance) => &instance.id,
            RegisteredInstance::Static(instance) => &instance.id,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub loads_issued: u64,
    pub load_failures: u64,
    pub cache_hits: u64,
    pub deduplicated: u64,
    pub materials_created: u64,
    pub material_hits: u64,
}

type LoadFuture = Shared<LocalBoxFuture<'static, Result<Arc<LoadedModel>>>>;

#[derive(Default)]
struct StoreState {
    models: HashMap<String, Arc<LoadedModel>>,
    loading: HashMap<String, LoadFuture>,
    materials: BTreeSet<String>,
    dynamic: BTreeMap<InstanceId, Instance>,
    statics: BTreeMap<InstanceId, StaticInstance>,
    next_instance: u64,
    stats: StoreStats,
}

/// Cache key for a shared material: asset, mesh, texture presence and base color.
pub fn material_cache_key(asset: &str, mesh: &str, template: &Material) -> String {
    let texture = if template.has_texture() { "tex" } else { "notex" };
    format!("{asset}::{mesh}::{texture}::{:06x}", hex_from_rgb(template.color))
}

#[derive(Clone)]
pub struct AssetStore {
    catalog: Rc<AssetCatalog>,
    loader: Rc<dyn ModelLoader>,
    state: Rc<RefCell<StoreState>>,
}

impl AssetStore {
    pub fn new(catalog: Rc<AssetCatalog>, loader: Rc<dyn ModelLoader>) -> Self {
        Self { catalog, loader, state: Rc::new(RefCell::new(StoreState::default())) }
    }

    pub fn catalog(&self) -> &AssetCatalog {
        &self.catalog
    }

    /// Resolves the template for `key`.
    ///
    /// Cached models resolve on the first poll. A request arriving while the
    /// key is loading awaits the pending load instead of issuing another one.
    /// Failures clear the in-flight entry so the next call retries.
    pub fn load(&self, key: &str) -> LocalBoxFuture<'static, Result<Arc<LoadedModel>>> {
        let Some(config) = self.catalog.get(key) else {
            return future::ready(Err(AssetError::UnknownAssetType(key.to_string()))).boxed_local();
        };

        let mut state = self.state.borrow_mut();
        if let Some(model) = state.models.get(key).cloned() {
            state.stats.cache_hits += 1;
            return future::ready(Ok(model)).boxed_local();
        }
        if let Some(pending) = state.loading.get(key).cloned() {
            state.stats.deduplicated += 1;
            log::debug!("[assets] joining in-flight load of '{key}'");
            return pending.boxed_local();
        }

        if let Some(model) = LoadedModel::from_primitive(config) {
            let model = Arc::new(model);
            state.models.insert(key.to_string(), model.clone());
            return future::ready(Ok(model)).boxed_local();
        }
        let Some(source) = config.source_path.as_deref() else {
            return future::ready(Err(AssetError::Load {
                key: key.to_string(),
                message: "no source path".to_string(),
            }))
            .boxed_local();
        };

        state.stats.loads_issued += 1;
        log::info!("[assets] loading '{key}' from {source}");
        let request = self.loader.load(source);
        let pending = complete_load(key.to_string(), request, Rc::downgrade(&self.state)).boxed_local().shared();
        state.loading.insert(key.to_string(), pending.clone());
        pending.boxed_local()
    }

    pub fn has_loaded_asset(&self, key: &str) -> bool {
        self.state.borrow().models.contains_key(key)
    }

    pub fn has_loading_promise(&self, key: &str) -> bool {
        self.state.borrow().loading.contains_key(key)
    }

    /// Every caller with the same key gets the same registry entry.
    pub fn get_or_create_material(&self, registry: &mut MaterialRegistry, key: &str, template: &Material) -> String {
        let mut state = self.state.borrow_mut();
        if state.materials.contains(key) && registry.has(key) {
            state.stats.material_hits += 1;
            return key.to_string();
        }
        let key = registry.insert_permanent(key, Material::normalized_from(template));
        state.materials.insert(key.clone());
        state.stats.materials_created += 1;
        key
    }

    /// Mints `"{key}_{n}"` from a counter that never repeats within this store.
    pub fn mint_instance_id(&self, key: &str) -> InstanceId {
        let mut state = self.state.borrow_mut();
        state.next_instance += 1;
        InstanceId(format!("{key}_{}", state.next_instance))
    }

    pub fn register_dynamic_instance(&self, id: InstanceId, instance: Instance) {
        self.state.borrow_mut().dynamic.insert(id, instance);
    }

    pub fn register_static_instance(&self, id: InstanceId, instance: StaticInstance) {
        self.state.borrow_mut().statics.insert(id, instance);
    }

    pub fn unregister(&self, id: &InstanceId) -> Option<RegisteredInstance> {
        let mut state = self.state.borrow_mut();
        if let Some(instance) = state.dynamic.remove(id) {
            return Some(RegisteredInstance::Dynamic(instance));
        }
        state.statics.remove(id).map(RegisteredInstance::Static)
    }

    pub fn instance(&self, id: &InstanceId) -> Option<RegisteredInstance> {
        let state = self.state.borrow();
        if let Some(instance) = state.dynamic.get(id) {
            return Some(RegisteredInstance::Dynamic(instance.clone()));
        }
        state.statics.get(id).cloned().map(RegisteredInstance::Static)
    }

    pub fn find_instance_by_visual_node(&self, scene: &SceneGraph, node: Entity) -> Option<RegisteredInstance> {
        let id = scene.instance_id_of(node)?;
        self.instance(id)
    }

    pub fn dynamic_instances(&self) -> Vec<Instance> {
        self.state.borrow().dynamic.values().cloned().collect()
    }

    pub fn dynamic_count(&self) -> usize {
        self.state.borrow().dynamic.len()
    }

    pub fn static_count(&self) -> usize {
        self.state.borrow().statics.len()
    }

    pub fn stats(&self) -> StoreStats {
        self.state.borrow().stats
    }

    pub fn dispose(&self, registry: &mut MaterialRegistry) -> usize {
        let mut state = self.state.borrow_mut();
        let mut disposed = 0;
        for key in std::mem::take(&mut state.materials) {
            if registry.dispose(&key) {
                disposed += 1;
            }
        }
        state.models.clear();
        state.loading.clear();
        state.dynamic.clear();
        state.statics.clear();
        log::info!("[assets] store disposed ({disposed} cached materials)");
        disposed
    }
}

async fn complete_load(
    key: String,
    request: LocalBoxFuture<'static, anyhow::Result<LoadedModel>>,
    state: Weak<RefCell<StoreState>>,
) -> Result<Arc<LoadedModel>> {
    let result = request
        .await
        .map(Arc::new)
        .map_err(|err| AssetError::Load { key: key.clone(), message: format!("{err:#}") });
    if let Some(state) = state.upgrade() {
        let mut state = state.borrow_mut();
        state.loading.remove(&key);
        match &result {
            Ok(model) => {
                state.models.insert(key.clone(), model.clone());
                log::debug!("[assets] cached '{key}'");
            }
            Err(err) => {
                state.stats.load_failures += 1;
                log::warn!("[assets] {err}");
            }
        }
    }
    result
}
