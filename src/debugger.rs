//! Headless driver behind the `asset_debugger` binary: spawns the requested
//! keys concurrently, steps physics for a number of ticks, exercises the
//! highlight path and tears everything down again.

use crate::activation::ActivationStats;
use crate::asset_store::StoreStats;
use crate::catalog::AssetCatalog;
use crate::cli::CliOptions;
use crate::config::AssetConfig;
use crate::lifecycle::{AssetLifecycleManager, SpawnOptions};
use crate::model::GltfModelLoader;
use crate::physics::PhysicsWorld;
use crate::resource_pool::PoolStats;
use crate::scene::SceneGraph;
use anyhow::Result;
use futures::future::join_all;
use glam::Vec3;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

const TICK: Duration = Duration::from_micros(16_667);
const SPACING: f32 = 1.5;

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub requested: usize,
    pub spawned: usize,
    pub despawned: usize,
    pub store: StoreStats,
    pub pool: PoolStats,
    pub activation: ActivationStats,
}

pub fn run(options: &CliOptions) -> Result<RunReport> {
    let catalog = match &options.catalog {
        Some(path) => AssetCatalog::load(path)?,
        None => AssetCatalog::builtin(),
    };
    let config = options.config.as_ref().map(AssetConfig::load_or_default).unwrap_or_default();
    let loader = Rc::new(GltfModelLoader::new(options.assets_root.clone()));
    let manager = AssetLifecycleManager::new(Rc::new(catalog), loader, config);

    let scene = RefCell::new(SceneGraph::new());
    let physics = RefCell::new(PhysicsWorld::default());
    let parent = scene.borrow().root();

    let prewarmed = pollster::block_on(manager.prewarm_presets(&scene, &physics));
    if prewarmed > 0 {
        log::info!("[pool] {prewarmed} entries prewarmed from presets");
    }

    let keys: Vec<String> = if options.spawn.is_empty() {
        manager.catalog().keys().chain(manager.catalog().assembly_keys()).map(str::to_string).collect()
    } else {
        options.spawn.clone()
    };
    let requests: Vec<(String, Vec3)> = keys
        .iter()
        .enumerate()
        .flat_map(|(row, key)| {
            (0..options.count).map(move |column| {
                (key.clone(), Vec3::new(column as f32 * SPACING, 2.0, row as f32 * SPACING))
            })
        })
        .collect();
    let spawns = requests.iter().map(|(key, offset)| {
        manager.spawn(key, parent, &scene, &physics, SpawnOptions::default(), *offset)
    });
    let instances: Vec<_> = pollster::block_on(join_all(spawns)).into_iter().flatten().collect();
    log::info!("[assets] spawned {}/{} instances", instances.len(), requests.len());

    if let Some(name) = &options.activate {
        let state = manager.activate(&mut scene.borrow_mut(), name);
        log::info!("[activation] '{name}' -> {state:?}");
    }

    for tick in 0..options.ticks {
        physics.borrow_mut().step(TICK.as_secs_f32());
        manager.sync_visuals_from_physics(&mut scene.borrow_mut(), &physics.borrow());
        manager.update(&mut scene.borrow_mut(), TICK);
        manager.flush_disposal_queue(&mut scene.borrow_mut(), &mut physics.borrow_mut());
        if tick == options.ticks / 2 {
            manager.deactivate_all(&mut scene.borrow_mut(), None);
        }
    }

    let mut despawned = 0;
    {
        let mut scene = scene.borrow_mut();
        let mut physics = physics.borrow_mut();
        for instance in &instances {
            if manager.despawn(&mut scene, &mut physics, instance) {
                despawned += 1;
            }
        }
    }

    let report = RunReport {
        requested: requests.len(),
        spawned: instances.len(),
        despawned,
        store: manager.store().stats(),
        pool: manager.pool().stats(),
        activation: manager.activation().stats(),
    };
    manager.shutdown(&mut scene.borrow_mut(), &mut physics.borrow_mut());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_run_spawns_and_cleans_up() {
        let options = CliOptions {
            spawn: vec!["CUBE".into(), "sign_with_chain".into()],
            count: 2,
            ticks: 4,
            activate: Some("sign".into()),
            ..CliOptions::default()
        };
        let report = run(&options).expect("run");
        assert_eq!(report.requested, 4);
        assert_eq!(report.spawned, 4);
        assert_eq!(report.despawned, 4);
        assert_eq!(report.activation.applied, 1);
        assert_eq!(report.store.loads_issued, 0);
    }
}
