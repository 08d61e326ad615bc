//! Single-selection emissive highlight. Fades only advance in `update`.

use crate::config::ActivationConfig;
use crate::material_registry::Material;
use crate::scene::{Activatable, SceneGraph};
use bevy_ecs::entity::Entity;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

const INTENSITY_EPSILON: f32 = 1e-3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmissionState {
    Applying,
    Active,
    Deactivating,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ActivationStats {
    pub applied: u64,
    pub short_circuits: u64,
    pub verification_failures: u64,
    pub fades_started: u64,
    pub fades_completed: u64,
}

/// A mesh currently wearing the shared emissive material and the material it
/// wore before. The original is retained until the mesh is restored.
#[derive(Clone, Debug)]
struct AppliedMesh {
    node: Entity,
    original: String,
}

#[derive(Clone, Debug)]
struct Fade {
    node: Entity,
    material: String,
    original: String,
    start_intensity: f32,
    elapsed: Duration,
    duration: Duration,
}

impl Fade {
    fn progress(&self) -> f32 {
        if self.duration.is_zero() {
            1.0
        } else {
            (self.elapsed.as_secs_f32() / self.duration.as_secs_f32()).min(1.0)
        }
    }
}

pub struct ActivationController {
    config: ActivationConfig,
    current: Option<String>,
    pending: Option<String>,
    states: BTreeMap<String, EmissionState>,
    applied: HashMap<String, Vec<AppliedMesh>>,
    fades: HashMap<String, Vec<Fade>>,
    stats: ActivationStats,
}

impl ActivationController {
    pub fn new(config: ActivationConfig) -> Self {
        Self {
            config,
            current: None,
            pending: None,
            states: BTreeMap::new(),
            applied: HashMap::new(),
            fades: HashMap::new(),
            stats: ActivationStats::default(),
        }
    }

    pub fn state(&self, name: &str) -> Option<EmissionState> {
        self.states.get(name).copied()
    }

    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    pub fn is_fading(&self) -> bool {
        !self.fades.is_empty()
    }

    pub fn stats(&self) -> ActivationStats {
        self.stats
    }

    pub fn shared_material_key(category: &str) -> String {
        format!("emissive::{category}")
    }

    /// Highlights `name`. Returns the resulting state, or `None` when no
    /// tagged instance answers to `name` or verification failed.
    pub fn activate(&mut self, scene: &mut SceneGraph, name: &str) -> Option<EmissionState> {
        let Some((category, roots)) = resolve(scene, name) else {
            log::debug!("[activation] no instance answers to '{name}'");
            return None;
        };
        let meshes: Vec<Entity> = roots.iter().flat_map(|root| scene.render_meshes(*root)).collect();
        let displaced = self.owners_of(&meshes, name);

        if let Some(stale) = self.pending.take() {
            if stale != name {
                self.states.remove(&stale);
            }
        }
        let others: Vec<String> = self
            .states
            .iter()
            .filter(|(other, state)| other.as_str() != name && **state == EmissionState::Active)
            .map(|(other, _)| other.clone())
            .collect();
        for other in others {
            self.deactivate(scene, &other);
        }

        let fading = self.fades.values().flatten().any(|fade| meshes.contains(&fade.node));
        if displaced.is_empty() && !fading && self.all_emissive(scene, &meshes) {
            self.stats.short_circuits += 1;
            self.states.insert(name.to_string(), EmissionState::Active);
            self.current = Some(name.to_string());
            return Some(EmissionState::Active);
        }

        if self.states.values().any(|state| *state == EmissionState::Deactivating) {
            self.states.insert(name.to_string(), EmissionState::Applying);
            self.pending = Some(name.to_string());
            return Some(EmissionState::Applying);
        }
        self.apply(scene, name, &category, &roots)
    }

    /// Starts the fade-out for `name`. Returns false when `name` was neither
    /// applying nor active.
    pub fn deactivate(&mut self, scene: &mut SceneGraph, name: &str) -> bool {
        match self.states.get(name).copied() {
            Some(EmissionState::Active) => {}
            Some(EmissionState::Applying) => {
                self.states.remove(name);
                if self.pending.as_deref() == Some(name) {
                    self.pending = None;
                }
                return true;
            }
            Some(EmissionState::Deactivating) | None => return false,
        }
        if self.current.as_deref() == Some(name) {
            self.current = None;
        }

        let applied = self.applied.remove(name).unwrap_or_default();
        if applied.is_empty() {
            self.states.remove(name);
            return true;
        }
        self.states.insert(name.to_string(), EmissionState::Deactivating);
        let duration = self.config.fade_duration();
        let mut fades = Vec::with_capacity(applied.len());
        for mesh in applied {
            let live = scene.material_key(mesh.node).map(str::to_string);
            let clone = live.as_deref().and_then(|key| scene.materials.clone_material(key));
            let Some(clone) = clone else {
                scene.materials.release(&mesh.original);
                continue;
            };
            scene.assign_material(mesh.node, &clone);
            let start_intensity = scene.materials.get(&clone).map(|m| m.emissive_intensity).unwrap_or(0.0);
            fades.push(Fade {
                node: mesh.node,
                material: clone,
                original: mesh.original,
                start_intensity,
                elapsed: Duration::ZERO,
                duration,
            });
        }
        self.stats.fades_started += fades.len() as u64;
        if fades.is_empty() {
            self.states.remove(name);
        } else {
            self.fades.insert(name.to_string(), fades);
        }
        true
    }

    /// Fades every highlighted name, optionally only those starting with
    /// `prefix`. Does nothing when no instance is emissive.
    pub fn deactivate_all(&mut self, scene: &mut SceneGraph, prefix: Option<&str>) -> usize {
        let names: Vec<String> = self
            .states
            .iter()
            .filter(|(_, state)| **state != EmissionState::Deactivating)
            .map(|(name, _)| name.clone())
            .filter(|name| prefix.map_or(true, |prefix| name.starts_with(prefix)))
            .collect();
        if names.is_empty() && !self.anything_emissive(scene) {
            return 0;
        }
        let mut count = 0;
        for name in &names {
            if self.deactivate(scene, name) {
                count += 1;
            }
        }
        self.current = None;
        self.pending = None;
        count
    }

    /// Completed meshes get a private copy of their original material back.
    pub fn update(&mut self, scene: &mut SceneGraph, dt: Duration) {
        let mut finished_names = Vec::new();
        for (name, fades) in self.fades.iter_mut() {
            let mut completed = 0;
            fades.retain_mut(|fade| {
                fade.elapsed += dt;
                let progress = fade.progress();
                if let Some(material) = scene.materials.get_mut(&fade.material) {
                    material.emissive_intensity = fade.start_intensity * (1.0 - progress);
                }
                if progress < 1.0 {
                    return true;
                }
                if scene.contains(fade.node) {
                    if let Some(restored) = scene.materials.clone_material(&fade.original) {
                        scene.assign_material(fade.node, &restored);
                    }
                } else {
                    scene.materials.release(&fade.material);
                }
                scene.materials.release(&fade.original);
                completed += 1;
                false
            });
            self.stats.fades_completed += completed;
            if fades.is_empty() {
                finished_names.push(name.clone());
            }
        }
        for name in finished_names {
            self.fades.remove(&name);
            if self.states.get(&name) == Some(&EmissionState::Deactivating) {
                self.states.remove(&name);
            }
            log::debug!("[activation] '{name}' restored");
        }

        if self.fades.is_empty() {
            if let Some(name) = self.pending.take() {
                if self.states.get(&name) == Some(&EmissionState::Applying) {
                    match resolve(scene, &name) {
                        Some((category, roots)) => {
                            self.apply(scene, &name, &category, &roots);
                        }
                        None => {
                            self.states.remove(&name);
                        }
                    }
                }
            }
        }
    }

    /// Drops highlight bookkeeping for meshes under `node` before it is
    /// torn down or recycled, putting their original materials back.
    pub fn forget(&mut self, scene: &mut SceneGraph, node: Entity) {
        let doomed = scene.descendants(node);
        let mut emptied = Vec::new();
        for (name, meshes) in self.applied.iter_mut() {
            meshes.retain(|mesh| {
                if !doomed.contains(&mesh.node) {
                    return true;
                }
                scene.assign_material(mesh.node, &mesh.original);
                scene.materials.release(&mesh.original);
                false
            });
            if meshes.is_empty() {
                emptied.push(name.clone());
            }
        }
        for name in emptied {
            self.applied.remove(&name);
            self.states.remove(&name);
            if self.current.as_deref() == Some(name.as_str()) {
                self.current = None;
            }
        }
        for fades in self.fades.values_mut() {
            fades.retain(|fade| {
                if !doomed.contains(&fade.node) {
                    return true;
                }
                scene.assign_material(fade.node, &fade.original);
                scene.materials.release(&fade.original);
                false
            });
        }
    }

    fn apply(&mut self, scene: &mut SceneGraph, name: &str, category: &str, roots: &[Entity]) -> Option<EmissionState> {
        self.states.insert(name.to_string(), EmissionState::Applying);
        let shared = Self::shared_material_key(category);
        if !scene.materials.has(&shared) {
            let color = self.config.color_for(category);
            scene.materials.insert_permanent(
                shared.clone(),
                Material {
                    label: shared.clone(),
                    color,
                    emissive: color,
                    emissive_intensity: self.config.emissive_intensity,
                    ..Material::default()
                },
            );
        }

        let meshes: Vec<Entity> = roots.iter().flat_map(|root| scene.render_meshes(*root)).collect();
        let records = self.applied.entry(name.to_string()).or_default();
        let mut updated = 0;
        for node in &meshes {
            if !records.iter().any(|record| record.node == *node) {
                let Some(original) = scene.material_key(*node).map(str::to_string) else {
                    continue;
                };
                scene.materials.retain(&original);
                records.push(AppliedMesh { node: *node, original });
            }
            scene.assign_material(*node, &shared);
            updated += 1;
        }

        let verified = updated == meshes.len() && self.all_emissive(scene, &meshes);
        if verified {
            self.states.insert(name.to_string(), EmissionState::Active);
            self.current = Some(name.to_string());
            self.stats.applied += 1;
            log::debug!("[activation] '{name}' active ({updated} meshes)");
            Some(EmissionState::Active)
        } else {
            self.states.remove(name);
            self.stats.verification_failures += 1;
            log::debug!("[activation] '{name}' failed verification, state cleared");
            None
        }
    }

    fn owners_of(&self, meshes: &[Entity], name: &str) -> Vec<String> {
        self.applied
            .iter()
            .filter(|(owner, records)| {
                owner.as_str() != name && records.iter().any(|record| meshes.contains(&record.node))
            })
            .map(|(owner, _)| owner.clone())
            .collect()
    }

    fn all_emissive(&self, scene: &SceneGraph, meshes: &[Entity]) -> bool {
        !meshes.is_empty() && meshes.iter().all(|node| is_emissive(scene, *node, self.config.emissive_intensity))
    }

    fn anything_emissive(&self, scene: &SceneGraph) -> bool {
        scene.nodes_with::<Activatable>().into_iter().any(|root| {
            scene
                .render_meshes(root)
                .iter()
                .any(|node| scene.material(*node).map(|m| m.emissive_intensity > INTENSITY_EPSILON).unwrap_or(false))
        })
    }
}

fn is_emissive(scene: &SceneGraph, node: Entity, expected: f32) -> bool {
    scene.material(node).map(|m| (m.emissive_intensity - expected).abs() < INTENSITY_EPSILON).unwrap_or(false)
}

/// Instance roots tagged with `name`, or with category `name` when no tag
/// carries that name.
fn resolve(scene: &SceneGraph, name: &str) -> Option<(String, Vec<Entity>)> {
    let tagged: Vec<(Entity, Activatable)> = scene
        .nodes_with::<Activatable>()
        .into_iter()
        .filter_map(|node| scene.get::<Activatable>(node).map(|tag| (node, tag.clone())))
        .collect();
    let by_name: Vec<&(Entity, Activatable)> = tagged.iter().filter(|(_, tag)| tag.name == name).collect();
    let matches = if by_name.is_empty() {
        tagged.iter().filter(|(_, tag)| tag.category == name).collect()
    } else {
        by_name
    };
    let (_, first) = matches.first()?;
    let category = first.category.clone();
    let roots = matches.iter().map(|(node, _)| *node).collect();
    Some((category, roots))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use crate::scene::Transform3D;
    use glam::Vec3;
    use std::sync::Arc;

    fn tagged_instance(scene: &mut SceneGraph, name: &str, category: &str, color: Vec3) -> (Entity, Entity, String) {
        let key = scene.materials.insert_permanent(format!("{name}::body"), Material { color, ..Material::default() });
        let root = scene.spawn_node(name, Transform3D::default());
        let mesh = scene.spawn_node("interactable_body", Transform3D::default());
        scene.add(scene.root(), root);
        scene.add(root, mesh);
        scene.set_mesh(mesh, Arc::new(Mesh::cuboid(1.0, 1.0, 1.0)));
        scene.assign_material(mesh, &key);
        scene.insert(root, Activatable { name: name.to_string(), category: category.to_string() });
        (root, mesh, key)
    }

    #[test]
    fn activation_applies_shared_emissive_material() {
        let mut scene = SceneGraph::new();
        let (_, mesh_a, _) = tagged_instance(&mut scene, "sign_a", "alpha", Vec3::ONE);
        let (_, mesh_b, _) = tagged_instance(&mut scene, "sign_b", "alpha", Vec3::ONE);
        let mut controller = ActivationController::new(ActivationConfig::default());

        assert_eq!(controller.activate(&mut scene, "alpha"), Some(EmissionState::Active));
        assert_eq!(scene.material_key(mesh_a), Some("emissive::alpha"));
        assert_eq!(scene.material_key(mesh_b), Some("emissive::alpha"));
        assert_eq!(scene.material(mesh_a).map(|m| m.emissive_intensity), Some(9.0));
        assert_eq!(controller.current(), Some("alpha"));
    }

    #[test]
    fn deactivation_fades_on_a_clone_and_restores_a_copy() {
        let mut scene = SceneGraph::new();
        let (_, mesh, original) = tagged_instance(&mut scene, "sign_a", "alpha", Vec3::new(0.2, 0.4, 0.6));
        let mut controller = ActivationController::new(ActivationConfig::default());
        controller.activate(&mut scene, "sign_a");

        assert!(controller.deactivate(&mut scene, "sign_a"));
        assert_eq!(controller.state("sign_a"), Some(EmissionState::Deactivating));
        let fading = scene.material_key(mesh).map(str::to_string).expect("fade material");
        assert_ne!(fading, "emissive::alpha");

        controller.update(&mut scene, Duration::from_millis(250));
        let halfway = scene.material(mesh).map(|m| m.emissive_intensity).expect("material");
        assert!((halfway - 4.5).abs() < 1e-3);
        assert_eq!(scene.materials.get("emissive::alpha").map(|m| m.emissive_intensity), Some(9.0));

        controller.update(&mut scene, Duration::from_millis(300));
        assert_eq!(controller.state("sign_a"), None);
        let restored = scene.material_key(mesh).expect("restored key");
        assert_ne!(restored, original);
        assert_eq!(scene.material(mesh).map(|m| m.color), Some(Vec3::new(0.2, 0.4, 0.6)));
        assert!(!scene.materials.has(&fading));
        assert_eq!(scene.materials.ref_count(&original), 0);
    }

    #[test]
    fn verification_mismatch_clears_state() {
        let mut scene = SceneGraph::new();
        tagged_instance(&mut scene, "sign_a", "alpha", Vec3::ONE);
        let desynced = Material { emissive_intensity: 2.0, ..Material::default() };
        scene.materials.insert_permanent(ActivationController::shared_material_key("alpha"), desynced);
        let mut controller = ActivationController::new(ActivationConfig::default());

        assert_eq!(controller.activate(&mut scene, "sign_a"), None);
        assert_eq!(controller.state("sign_a"), None);
        assert_eq!(controller.stats().verification_failures, 1);
    }

    #[test]
    fn deactivate_all_is_a_no_op_when_nothing_glows() {
        let mut scene = SceneGraph::new();
        tagged_instance(&mut scene, "sign_a", "alpha", Vec3::ONE);
        let mut controller = ActivationController::new(ActivationConfig::default());
        assert_eq!(controller.deactivate_all(&mut scene, None), 0);
        assert!(!controller.is_fading());
    }

    #[test]
    fn deactivate_all_honours_prefix_and_clears_marker() {
        let mut scene = SceneGraph::new();
        tagged_instance(&mut scene, "sign_a", "alpha", Vec3::ONE);
        let mut controller = ActivationController::new(ActivationConfig::default());
        controller.activate(&mut scene, "sign_a");

        assert_eq!(controller.deactivate_all(&mut scene, Some("lamp_")), 0);
        assert_eq!(controller.current(), None);
        assert_eq!(controller.state("sign_a"), Some(EmissionState::Active));

        assert_eq!(controller.deactivate_all(&mut scene, Some("sign_")), 1);
        assert!(controller.is_fading());
    }

    #[test]
    fn a_lit_name_left_behind_by_a_prefix_clear_still_hands_over() {
        let mut scene = SceneGraph::new();
        tagged_instance(&mut scene, "sign_a", "alpha", Vec3::ONE);
        tagged_instance(&mut scene, "lamp_b", "beta", Vec3::ONE);
        let mut controller = ActivationController::new(ActivationConfig::default());
        controller.activate(&mut scene, "sign_a");
        controller.deactivate_all(&mut scene, Some("lamp_"));
        assert_eq!(controller.current(), None);

        assert_eq!(controller.activate(&mut scene, "lamp_b"), Some(EmissionState::Applying));
        assert_eq!(controller.state("sign_a"), Some(EmissionState::Deactivating));
    }

    #[test]
    fn forgetting_a_node_restores_its_original_material() {
        let mut scene = SceneGraph::new();
        let (root, mesh, original) = tagged_instance(&mut scene, "sign_a", "alpha", Vec3::ONE);
        let mut controller = ActivationController::new(ActivationConfig::default());
        controller.activate(&mut scene, "sign_a");
        assert_eq!(scene.materials.ref_count(&original), 1);

        controller.forget(&mut scene, root);
        assert_eq!(scene.material_key(mesh), Some(original.as_str()));
        assert_eq!(scene.materials.ref_count(&original), 1);
        assert_eq!(scene.material(mesh).map(|m| m.emissive_intensity), Some(0.0));
        assert_eq!(controller.state("sign_a"), None);
        assert_eq!(controller.current(), None);
    }

    #[test]
    fn forgetting_a_fading_node_drops_its_clone() {
        let mut scene = SceneGraph::new();
        let (root, mesh, original) = tagged_instance(&mut scene, "sign_a", "alpha", Vec3::ONE);
        let mut controller = ActivationController::new(ActivationConfig::default());
        controller.activate(&mut scene, "sign_a");
        controller.deactivate(&mut scene, "sign_a");
        let fading = scene.material_key(mesh).map(str::to_string).expect("fade material");

        controller.forget(&mut scene, root);
        assert_eq!(scene.material_key(mesh), Some(original.as_str()));
        assert!(!scene.materials.has(&fading));
        assert_eq!(scene.materials.ref_count(&original), 1);
    }

    #[test]
    fn sharing_a_category_does_not_count_as_already_lit() {
        let mut scene = SceneGraph::new();
        let (_, mesh_a, _) = tagged_instance(&mut scene, "sign_a", "alpha", Vec3::ONE);
        let (_, mesh_b, _) = tagged_instance(&mut scene, "sign_b", "alpha", Vec3::ONE);
        let mut controller = ActivationController::new(ActivationConfig::default());
        controller.activate(&mut scene, "sign_a");

        assert_eq!(controller.activate(&mut scene, "sign_b"), Some(EmissionState::Applying));
        assert_eq!(controller.stats().short_circuits, 0);
        assert_eq!(controller.state("sign_a"), Some(EmissionState::Deactivating));

        controller.update(&mut scene, Duration::from_millis(600));
        assert_eq!(controller.state("sign_a"), None);
        assert_eq!(controller.state("sign_b"), Some(EmissionState::Active));
        assert_eq!(scene.material(mesh_a).map(|m| m.emissive_intensity), Some(0.0));
        assert_eq!(scene.material_key(mesh_b), Some("emissive::alpha"));
    }
}
