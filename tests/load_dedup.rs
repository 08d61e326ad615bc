use anyhow::anyhow;
use asset_lifecycle::catalog::{AssetCatalog, AssetTypeConfig};
use asset_lifecycle::config::AssetConfig;
use asset_lifecycle::lifecycle::{AssetLifecycleManager, SpawnOptions};
use asset_lifecycle::material_registry::Material;
use asset_lifecycle::mesh::Mesh;
use asset_lifecycle::model::{LoadedModel, ModelLoader, ModelNode};
use asset_lifecycle::physics::PhysicsWorld;
use asset_lifecycle::scene::SceneGraph;
use asset_lifecycle::{AssetError, AssetStore};
use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};
use glam::Vec3;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

/// Loader whose requests stay pending until the test opens their gates.
#[derive(Default)]
struct GatedLoader {
    calls: Cell<usize>,
    gates: RefCell<Vec<oneshot::Sender<bool>>>,
}

impl GatedLoader {
    fn open_all(&self, succeed: bool) {
        for gate in self.gates.borrow_mut().drain(..) {
            let _ = gate.send(succeed);
        }
    }
}

impl ModelLoader for GatedLoader {
    fn load(&self, source: &str) -> LocalBoxFuture<'static, anyhow::Result<LoadedModel>> {
        self.calls.set(self.calls.get() + 1);
        let (sender, receiver) = oneshot::channel();
        self.gates.borrow_mut().push(sender);
        let source = source.to_string();
        async move {
            let succeed = receiver.await.map_err(|_| anyhow!("gate dropped"))?;
            if !succeed {
                return Err(anyhow!("parse failure in {source}"));
            }
            let mesh = Arc::new(Mesh::cuboid(4.0, 0.2, 4.0));
            Ok(LoadedModel::new(source, ModelNode::group("room").with_child(ModelNode::with_mesh("floor", mesh, Material::default()))))
        }
        .boxed_local()
    }
}

fn catalog() -> Rc<AssetCatalog> {
    Rc::new(AssetCatalog::new(vec![AssetTypeConfig::from_source("ROOM", "room.gltf")], Vec::new()).expect("catalog"))
}

#[test]
fn concurrent_loads_share_one_loader_call() {
    let loader = Rc::new(GatedLoader::default());
    let store = AssetStore::new(catalog(), loader.clone());

    let mut first = store.load("ROOM");
    let second = store.load("ROOM");
    let third = store.load("ROOM");
    assert_eq!(loader.calls.get(), 1);
    assert!(store.has_loading_promise("ROOM"));
    assert!(!store.has_loaded_asset("ROOM"));
    assert!((&mut first).now_or_never().is_none(), "load should wait for the gate");

    loader.open_all(true);
    let (a, b, c) = pollster::block_on(async { futures::join!(first, second, third) });
    let (a, b, c) = (a.expect("first"), b.expect("second"), c.expect("third"));
    assert!(Arc::ptr_eq(&a, &b));
    assert!(Arc::ptr_eq(&b, &c));
    assert_eq!(loader.calls.get(), 1);
    assert!(store.has_loaded_asset("ROOM"));
    assert!(!store.has_loading_promise("ROOM"));
}

#[test]
fn cached_loads_resolve_without_waiting() {
    let loader = Rc::new(GatedLoader::default());
    let store = AssetStore::new(catalog(), loader.clone());
    let pending = store.load("ROOM");
    loader.open_all(true);
    let model = pollster::block_on(pending).expect("model");

    let cached = store.load("ROOM").now_or_never().expect("cached load resolves on first poll").expect("model");
    assert!(Arc::ptr_eq(&model, &cached));
    assert_eq!(loader.calls.get(), 1);
    assert_eq!(store.stats().cache_hits, 1);
}

#[test]
fn failed_load_is_seen_by_every_waiter_and_retried_afterwards() {
    let loader = Rc::new(GatedLoader::default());
    let store = AssetStore::new(catalog(), loader.clone());
    let first = store.load("ROOM");
    let second = store.load("ROOM");
    loader.open_all(false);
    let (a, b) = pollster::block_on(async { futures::join!(first, second) });
    let (a, b) = (a.unwrap_err(), b.unwrap_err());
    assert!(matches!(a, AssetError::Load { ref key, .. } if key == "ROOM"));
    assert_eq!(a, b);
    assert!(!store.has_loading_promise("ROOM"));

    let retry = store.load("ROOM");
    assert_eq!(loader.calls.get(), 2);
    loader.open_all(true);
    assert!(pollster::block_on(retry).is_ok());
}

#[test]
fn concurrent_spawns_of_an_uncached_key_issue_one_load() {
    let loader = Rc::new(GatedLoader::default());
    let manager = AssetLifecycleManager::new(catalog(), loader.clone(), AssetConfig::default());
    let scene = RefCell::new(SceneGraph::new());
    let physics = RefCell::new(PhysicsWorld::default());
    let parent = scene.borrow().root();

    let (a, b, ()) = pollster::block_on(async {
        futures::join!(
            manager.spawn("ROOM", parent, &scene, &physics, SpawnOptions::default(), Vec3::ZERO),
            manager.spawn("ROOM", parent, &scene, &physics, SpawnOptions::default(), Vec3::new(10.0, 0.0, 0.0)),
            async { loader.open_all(true) },
        )
    });
    let (a, b) = (a.expect("first spawn"), b.expect("second spawn"));
    assert_ne!(a.id, b.id);
    assert_eq!(loader.calls.get(), 1);
    assert_eq!(physics.borrow().body_count(), 2);
    assert_eq!(scene.borrow().children(parent).len(), 2);
}
