use asset_lifecycle::catalog::AssetCatalog;
use asset_lifecycle::config::AssetConfig;
use asset_lifecycle::lifecycle::{AssetLifecycleManager, SpawnOptions};
use asset_lifecycle::model::GltfModelLoader;
use asset_lifecycle::physics::PhysicsWorld;
use asset_lifecycle::scene::SceneGraph;
use asset_lifecycle::{EmissionState, Instance, InstanceOrigin};
use glam::Vec3;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

const RED: Vec3 = Vec3::new(1.0, 0.0, 0.0);
const GREEN: Vec3 = Vec3::new(0.0, 1.0, 0.0);

#[test]
fn switching_highlight_waits_for_the_previous_fade() {
    let (manager, scene, physics) = setup(AssetConfig::default());
    let a = spawn_tagged(&manager, &scene, &physics, "A", "category_alpha", RED);
    let b = spawn_tagged(&manager, &scene, &physics, "B", "category_beta", GREEN);
    let mut scene = scene.borrow_mut();

    assert_eq!(manager.activate(&mut scene, "A"), Some(EmissionState::Active));
    let a_mesh = scene.render_meshes(a.visual_node)[0];
    assert!((scene.material(a_mesh).expect("material").emissive_intensity - 9.0).abs() < 1e-4);

    assert_eq!(manager.activate(&mut scene, "B"), Some(EmissionState::Applying));
    assert_eq!(manager.activation().state("A"), Some(EmissionState::Deactivating));
    assert_eq!(manager.activation().pending(), Some("B"));
    assert!(manager.activation().is_fading());

    manager.update(&mut scene, Duration::from_millis(250));
    let halfway = scene.material(a_mesh).expect("fading material").emissive_intensity;
    assert!(halfway > 0.0 && halfway < 9.0, "intensity {halfway} should be mid-fade");
    assert_eq!(manager.activation().state("B"), Some(EmissionState::Applying));

    manager.update(&mut scene, Duration::from_millis(350));
    assert_eq!(manager.activation().state("A"), None);
    assert_eq!(manager.activation().state("B"), Some(EmissionState::Active));
    assert_eq!(manager.activation().current(), Some("B"));

    let restored = scene.material(a_mesh).expect("restored material");
    assert_eq!(restored.color, RED);
    assert_eq!(restored.emissive_intensity, 0.0);
    let b_mesh = scene.render_meshes(b.visual_node)[0];
    assert!((scene.material(b_mesh).expect("material").emissive_intensity - 9.0).abs() < 1e-4);
}

#[test]
fn repeated_category_activation_short_circuits() {
    let (manager, scene, physics) = setup(AssetConfig::default());
    let first = spawn_tagged(&manager, &scene, &physics, "alpha_1", "category_alpha", RED);
    let second = spawn_tagged(&manager, &scene, &physics, "alpha_2", "category_alpha", RED);
    let mut scene = scene.borrow_mut();

    assert_eq!(manager.activate(&mut scene, "category_alpha"), Some(EmissionState::Active));
    for instance in [&first, &second] {
        let mesh = scene.render_meshes(instance.visual_node)[0];
        assert_eq!(scene.material_key(mesh), Some("emissive::category_alpha"));
    }

    assert_eq!(manager.activate(&mut scene, "category_alpha"), Some(EmissionState::Active));
    let stats = manager.activation().stats();
    assert_eq!(stats.short_circuits, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.fades_started, 0);
    assert!(!manager.activation().is_fading());
}

#[test]
fn despawning_a_highlighted_instance_clears_its_state() {
    let (manager, scene, physics) = setup(AssetConfig::default());
    let instance = spawn_tagged(&manager, &scene, &physics, "A", "category_alpha", RED);
    let mut scene = scene.borrow_mut();
    let mut physics = physics.borrow_mut();
    assert_eq!(manager.activate(&mut scene, "A"), Some(EmissionState::Active));

    assert!(manager.despawn(&mut scene, &mut physics, &instance));
    assert_eq!(manager.activation().state("A"), None);
    assert_eq!(manager.activation().current(), None);
    assert_eq!(manager.activate(&mut scene, "A"), None);
}

#[test]
fn zero_length_fades_restore_on_the_next_tick() {
    let mut config = AssetConfig::default();
    config.activation.fade_ms = 0;
    let (manager, scene, physics) = setup(config);
    let instance = spawn_tagged(&manager, &scene, &physics, "A", "category_alpha", RED);
    let mut scene = scene.borrow_mut();
    let mesh = scene.render_meshes(instance.visual_node)[0];

    manager.activate(&mut scene, "A");
    assert!(manager.deactivate(&mut scene, "A"));
    manager.update(&mut scene, Duration::ZERO);
    assert_eq!(manager.activation().state("A"), None);
    assert_eq!(scene.material(mesh).expect("material").color, RED);
    assert_eq!(manager.activation().stats().fades_completed, 1);
}

#[test]
fn one_name_glows_even_when_names_share_a_category() {
    let (manager, scene, physics) = setup(AssetConfig::default());
    let a = spawn_tagged(&manager, &scene, &physics, "A", "category_alpha", RED);
    let b = spawn_tagged(&manager, &scene, &physics, "B", "category_alpha", GREEN);
    let c = spawn_tagged(&manager, &scene, &physics, "C", "category_beta", RED);
    let mut scene = scene.borrow_mut();

    assert_eq!(manager.activate(&mut scene, "A"), Some(EmissionState::Active));
    assert_eq!(manager.activate(&mut scene, "B"), Some(EmissionState::Applying));
    assert_eq!(manager.activation().state("A"), Some(EmissionState::Deactivating));
    assert_eq!(manager.activation().stats().short_circuits, 0);

    manager.update(&mut scene, Duration::from_millis(600));
    assert_eq!(manager.activation().state("A"), None);
    assert_eq!(manager.activation().current(), Some("B"));
    assert_eq!(intensity(&scene, &a), 0.0);
    assert!((intensity(&scene, &b) - 9.0).abs() < 1e-4);

    assert!(manager.deactivate(&mut scene, "B"));
    assert_eq!(manager.activate(&mut scene, "C"), Some(EmissionState::Applying));
    manager.update(&mut scene, Duration::from_millis(600));

    let lit: Vec<&str> = ["A", "B", "C"].into_iter().filter(|name| manager.activation().state(name).is_some()).collect();
    assert_eq!(lit, vec!["C"]);
    assert_eq!(intensity(&scene, &a), 0.0);
    assert_eq!(intensity(&scene, &b), 0.0);
    assert!((intensity(&scene, &c) - 9.0).abs() < 1e-4);
}

#[test]
fn recycled_instances_come_back_unlit() {
    let (manager, scene, physics) = setup(AssetConfig::default());
    manager.configure_pool("CUBE", 2);
    pollster::block_on(manager.prewarm_pool("CUBE", 1, &scene, &physics)).expect("prewarm");

    let first = spawn_tagged(&manager, &scene, &physics, "A", "category_alpha", RED);
    assert_eq!(first.origin, InstanceOrigin::Pooled);
    {
        let mut scene = scene.borrow_mut();
        let mut physics = physics.borrow_mut();
        assert_eq!(manager.activate(&mut scene, "A"), Some(EmissionState::Active));
        assert!(manager.despawn(&mut scene, &mut physics, &first));
    }

    let second = spawn_tagged(&manager, &scene, &physics, "B", "category_alpha", RED);
    assert_eq!(second.origin, InstanceOrigin::Pooled);
    assert_eq!(second.visual_node, first.visual_node);
    let scene = scene.borrow();
    let mesh = scene.render_meshes(second.visual_node)[0];
    assert_ne!(scene.material_key(mesh), Some("emissive::category_alpha"));
    assert_eq!(intensity(&scene, &second), 0.0);
    assert_eq!(manager.activation().state("A"), None);
}

fn intensity(scene: &SceneGraph, instance: &Instance) -> f32 {
    let mesh = scene.render_meshes(instance.visual_node)[0];
    scene.material(mesh).expect("material").emissive_intensity
}

fn setup(config: AssetConfig) -> (AssetLifecycleManager, RefCell<SceneGraph>, RefCell<PhysicsWorld>) {
    let manager =
        AssetLifecycleManager::new(Rc::new(AssetCatalog::builtin()), Rc::new(GltfModelLoader::new("assets")), config);
    (manager, RefCell::new(SceneGraph::new()), RefCell::new(PhysicsWorld::default()))
}

fn spawn_tagged(
    manager: &AssetLifecycleManager,
    scene: &RefCell<SceneGraph>,
    physics: &RefCell<PhysicsWorld>,
    name: &str,
    category: &str,
    color: Vec3,
) -> Instance {
    let parent = scene.borrow().root();
    let options = SpawnOptions::default().with_name(name).with_category(category).with_color(color);
    pollster::block_on(manager.spawn("CUBE", parent, scene, physics, options, Vec3::ZERO)).expect("tagged cube")
}
