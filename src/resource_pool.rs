use crate::errors::Result;
use crate::physics::PhysicsWorld;
use crate::scene::SceneGraph;
use bevy_ecs::entity::Entity;
use glam::{Quat, Vec3};
use rapier3d::prelude::RigidBodyHandle;
use smallvec::SmallVec;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// One visual node and its body. `offset` and `rotation` place the
/// component relative to the assembly origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PoolComponent {
    pub visual_node: Entity,
    pub physics_body: RigidBodyHandle,
    pub offset: Vec3,
    pub rotation: Quat,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PoolEntry {
    pub key: String,
    pub components: SmallVec<[PoolComponent; 1]>,
}

impl PoolEntry {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), components: SmallVec::new() }
    }

    pub fn with_component(mut self, component: PoolComponent) -> Self {
        self.components.push(component);
        self
    }

    fn primary_node(&self) -> Option<Entity> {
        self.components.first().map(|component| component.visual_node)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub preallocated: u64,
    pub factory_failures: u64,
    pub acquired: u64,
    pub recycled: u64,
    pub evicted: u64,
    pub disposed: u64,
    pub flushes: u64,
}

#[derive(Default)]
struct Pool {
    capacity: usize,
    available: Vec<PoolEntry>,
}

/// Reusable physics-backed entries per key plus the deferred disposal queue.
///
/// Release never tears anything down directly: entries beyond a pool's
/// capacity wait in the queue until [`ResourcePool::flush_disposal_queue`]
/// runs, which it does at most once per cleanup interval.
pub struct ResourcePool {
    pools: HashMap<String, Pool>,
    default_capacity: usize,
    cleanup_interval: Duration,
    disposal_queue: Vec<PoolEntry>,
    queued_nodes: HashSet<Entity>,
    last_flush: Option<Duration>,
    stats: PoolStats,
}

impl ResourcePool {
    pub fn new(default_capacity: usize, cleanup_interval: Duration) -> Self {
        Self {
            pools: HashMap::new(),
            default_capacity,
            cleanup_interval,
            disposal_queue: Vec::new(),
            queued_nodes: HashSet::new(),
            last_flush: None,
            stats: PoolStats::default(),
        }
    }

    pub fn configure(&mut self, key: &str, pool_size: usize) {
        self.pools.entry(key.to_string()).or_default().capacity = pool_size;
    }

    pub fn is_pooled(&self, key: &str) -> bool {
        self.pools.contains_key(key)
    }

    pub fn capacity(&self, key: &str) -> usize {
        self.pools.get(key).map(|pool| pool.capacity).unwrap_or(self.default_capacity)
    }

    pub fn available(&self, key: &str) -> usize {
        self.pools.get(key).map(|pool| pool.available.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    pub fn queued_for_disposal(&self) -> usize {
        self.disposal_queue.len()
    }

    /// Builds up to `count` inert entries with `factory`. A failing slot is
    /// logged and skipped. Returns the number of entries added.
    pub fn preallocate<F>(
        &mut self,
        key: &str,
        count: usize,
        scene: &mut SceneGraph,
        physics: &mut PhysicsWorld,
        mut factory: F,
    ) -> usize
    where
        F: FnMut(&mut SceneGraph, &mut PhysicsWorld) -> Result<PoolEntry>,
    {
        let default_capacity = self.default_capacity;
        let pool = self.pools.entry(key.to_string()).or_insert_with(|| Pool { capacity: default_capacity, ..Pool::default() });
        let room = pool.capacity.saturating_sub(pool.available.len());
        if count > room {
            log::warn!("[pool] '{key}' preallocation clamped from {count} to {room}");
        }
        let mut created = 0;
        for slot in 0..count.min(room) {
            match factory(scene, physics) {
                Ok(entry) => {
                    make_inert(&entry, scene, physics);
                    pool.available.push(entry);
                    created += 1;
                }
                Err(err) => {
                    self.stats.factory_failures += 1;
                    log::warn!("[pool] '{key}' preallocation slot {slot} failed: {err}");
                }
            }
        }
        self.stats.preallocated += created as u64;
        log::debug!("[pool] '{key}' preallocated {created} entries");
        created
    }

    /// Bodies stay asleep; the caller decides when to wake them.
    pub fn acquire(&mut self, key: &str, scene: &mut SceneGraph) -> Option<PoolEntry> {
        let entry = self.pools.get_mut(key)?.available.pop()?;
        for component in &entry.components {
            scene.set_visible(component.visual_node, true);
        }
        self.stats.acquired += 1;
        Some(entry)
    }

    /// Returns `entry` to its pool in a neutral pose, or queues it for
    /// disposal when the pool is full.
    pub fn release(&mut self, key: &str, entry: PoolEntry, scene: &mut SceneGraph, physics: &mut PhysicsWorld) {
        let Some(primary) = entry.primary_node() else {
            return;
        };
        if self.queued_nodes.contains(&primary) {
            return;
        }
        let default_capacity = self.default_capacity;
        let pool = self.pools.entry(key.to_string()).or_insert_with(|| Pool { capacity: default_capacity, ..Pool::default() });
        if pool.available.iter().any(|idle| idle.primary_node() == Some(primary)) {
            return;
        }
        if pool.available.len() < pool.capacity {
            for component in &entry.components {
                scene.detach(component.visual_node);
                scene.update_transform(component.visual_node, |transform| {
                    transform.translation = Vec3::ZERO;
                    transform.rotation = Quat::IDENTITY;
                });
                physics.set_translation(component.physics_body, Vec3::ZERO);
                physics.set_rotation(component.physics_body, Quat::IDENTITY);
            }
            make_inert(&entry, scene, physics);
            pool.available.push(entry);
            self.stats.recycled += 1;
        } else {
            for component in &entry.components {
                scene.set_visible(component.visual_node, false);
                physics.sleep(component.physics_body);
            }
            self.queued_nodes.insert(primary);
            self.disposal_queue.push(entry);
            self.stats.evicted += 1;
            log::debug!("[pool] '{key}' full, entry queued for disposal");
        }
    }

    /// Disposes queued entries if the cleanup interval has elapsed since the
    /// last flush. Returns the number of entries disposed.
    pub fn flush_disposal_queue(&mut self, now: Duration, scene: &mut SceneGraph, physics: &mut PhysicsWorld) -> usize {
        if self.disposal_queue.is_empty() {
            return 0;
        }
        if let Some(last) = self.last_flush {
            if now.saturating_sub(last) < self.cleanup_interval {
                return 0;
            }
        }
        self.last_flush = Some(now);
        self.dispose_queued(scene, physics)
    }

    pub fn drain_all(&mut self, scene: &mut SceneGraph, physics: &mut PhysicsWorld) -> usize {
        let mut drained = Vec::new();
        for pool in self.pools.values_mut() {
            drained.append(&mut pool.available);
        }
        for entry in drained {
            if let Some(primary) = entry.primary_node() {
                if self.queued_nodes.insert(primary) {
                    self.disposal_queue.push(entry);
                }
            }
        }
        self.dispose_queued(scene, physics)
    }

    fn dispose_queued(&mut self, scene: &mut SceneGraph, physics: &mut PhysicsWorld) -> usize {
        let queue = std::mem::take(&mut self.disposal_queue);
        self.queued_nodes.clear();
        let count = queue.len();
        for entry in queue {
            for component in &entry.components {
                physics.remove_rigid_body(component.physics_body);
                scene.dispose_subtree(component.visual_node);
            }
        }
        self.stats.disposed += count as u64;
        self.stats.flushes += 1;
        if count > 0 {
            log::debug!("[pool] disposed {count} queued entries");
        }
        count
    }
}

fn make_inert(entry: &PoolEntry, scene: &mut SceneGraph, physics: &mut PhysicsWorld) {
    for component in &entry.components {
        physics.set_linvel(component.physics_body, Vec3::ZERO);
        physics.set_angvel(component.physics_body, Vec3::ZERO);
        physics.sleep(component.physics_body);
        scene.set_visible(component.visual_node, false);
    }
}
