use asset_lifecycle::catalog::AssetCatalog;
use asset_lifecycle::cli::CliOptions;
use asset_lifecycle::config::AssetConfig;
use asset_lifecycle::debugger::run;
use asset_lifecycle::lifecycle::{AssetLifecycleManager, SpawnOptions};
use asset_lifecycle::model::GltfModelLoader;
use asset_lifecycle::physics::PhysicsWorld;
use asset_lifecycle::scene::SceneGraph;
use asset_lifecycle::InstanceOrigin;
use glam::Vec3;
use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

const CATALOG: &str = r#"{
    "types": [
        { "key": "LAMP", "primitive": { "box": { "width": 0.5, "height": 1.0, "depth": 0.5 } },
          "category": "lamp", "color": 16776960 },
        { "key": "CRATE", "source_path": "crate.gltf", "scale": 2.0, "mass": 4.0 }
    ],
    "assemblies": [
        { "key": "lamp_pair", "components": [ { "asset": "LAMP" }, { "asset": "LAMP", "offset": [1.0, 0.0, 0.0] } ] }
    ]
}"#;

const CONFIG: &str = r#"{
    "pool": { "cleanup_interval_ms": 100, "presets": { "LAMP": { "pool_size": 2, "preallocate": 4 } } },
    "activation": { "fade_ms": 50, "category_colors": { "lamp": 16755200 } }
}"#;

#[test]
fn catalog_file_round_trips_types_and_assemblies() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_file(dir.path(), "catalog.json", CATALOG);
    let catalog = AssetCatalog::load(&path).expect("catalog");

    assert_eq!(catalog.keys().collect::<Vec<_>>(), vec!["CRATE", "LAMP"]);
    assert_eq!(catalog.assembly_keys().collect::<Vec<_>>(), vec!["lamp_pair"]);
    let crate_type = catalog.get("CRATE").expect("crate type");
    assert_eq!(crate_type.scale, 2.0);
    assert_eq!(crate_type.mass, 4.0);
    assert_eq!(crate_type.linear_damping, 0.5);
    assert!(catalog.is_spawnable("lamp_pair"));
    assert!(!catalog.contains("lamp_pair"));
}

#[test]
fn catalog_errors_name_the_offending_entry() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = write_file(
        dir.path(),
        "broken.json",
        r#"{ "assemblies": [ { "key": "orphan", "components": [ { "asset": "GHOST" } ] } ] }"#,
    );
    let err = AssetCatalog::load(&path).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("orphan"), "{message}");
    assert!(message.contains("GHOST"), "{message}");

    assert!(AssetCatalog::load(dir.path().join("missing.json")).is_err());
}

#[test]
fn presets_prewarm_pools_up_to_their_size() {
    let dir = tempfile::tempdir().expect("temp dir");
    let catalog = AssetCatalog::load(write_file(dir.path(), "catalog.json", CATALOG)).expect("catalog");
    let config = AssetConfig::load(write_file(dir.path(), "config.json", CONFIG)).expect("config");
    let manager = AssetLifecycleManager::new(Rc::new(catalog), Rc::new(GltfModelLoader::new("assets/models")), config);
    let scene = RefCell::new(SceneGraph::new());
    let physics = RefCell::new(PhysicsWorld::default());
    let parent = scene.borrow().root();

    assert_eq!(pollster::block_on(manager.prewarm_presets(&scene, &physics)), 2);
    assert_eq!(manager.pool().available("LAMP"), 2);
    assert_eq!(manager.pool().capacity("LAMP"), 2);
    assert_eq!(physics.borrow().body_count(), 2);
    assert!(scene.borrow().children(parent).is_empty(), "idle entries stay out of the graph");

    let lamp = pollster::block_on(manager.spawn("LAMP", parent, &scene, &physics, SpawnOptions::default(), Vec3::Y))
        .expect("pooled lamp");
    assert_eq!(lamp.origin, InstanceOrigin::Pooled);
    assert_eq!(physics.borrow().body_count(), 2);
    assert!(scene.borrow().is_visible(lamp.visual_node));

    let crate_instance =
        pollster::block_on(manager.spawn("CRATE", parent, &scene, &physics, SpawnOptions::default(), Vec3::ZERO))
            .expect("fresh crate");
    assert_eq!(crate_instance.origin, InstanceOrigin::Fresh);
    assert_eq!(manager.pool().available("CRATE"), 0);
    assert!(!manager.pool().is_pooled("CRATE"));
}

#[test]
fn debugger_runs_a_file_catalog_end_to_end() {
    let dir = tempfile::tempdir().expect("temp dir");
    let options = CliOptions {
        catalog: Some(write_file(dir.path(), "catalog.json", CATALOG)),
        config: Some(write_file(dir.path(), "config.json", CONFIG)),
        assets_root: PathBuf::from("assets/models"),
        spawn: vec!["LAMP".into(), "CRATE".into(), "lamp_pair".into()],
        count: 2,
        ticks: 6,
        activate: Some("lamp".into()),
    };
    let report = run(&options).expect("debugger run");

    assert_eq!(report.requested, 6);
    assert_eq!(report.spawned, 6);
    assert_eq!(report.despawned, 6);
    assert_eq!(report.pool.preallocated, 2);
    assert_eq!(report.pool.acquired, 2);
    assert_eq!(report.store.loads_issued, 1);
    assert_eq!(report.activation.applied, 1);
}

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write fixture");
    path
}
