use glam::Vec3;
use std::collections::HashMap;
use std::sync::Arc;

/// Decoded image data bound to a material slot.
#[derive(Debug)]
pub struct TextureData {
    pub key: String,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Side {
    #[default]
    Front,
    Back,
    Double,
}

#[derive(Clone, Debug)]
pub struct Material {
    pub label: String,
    pub color: Vec3,
    pub map: Option<Arc<TextureData>>,
    pub transparent: bool,
    pub opacity: f32,
    pub side: Side,
    pub roughness: f32,
    pub metalness: f32,
    pub env_map_intensity: f32,
    pub ao_map_intensity: f32,
    pub displacement_scale: f32,
    pub emissive: Vec3,
    pub emissive_intensity: f32,
    pub depth_test: bool,
    pub depth_write: bool,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            label: "Default".to_string(),
            color: Vec3::ONE,
            map: None,
            transparent: false,
            opacity: 1.0,
            side: Side::Front,
            roughness: 1.0,
            metalness: 0.0,
            env_map_intensity: 0.0,
            ao_map_intensity: 0.0,
            displacement_scale: 0.0,
            emissive: Vec3::ZERO,
            emissive_intensity: 0.0,
            depth_test: true,
            depth_write: true,
        }
    }
}

impl Material {
    /// Shared material built from the subset of `template` that survives
    /// normalisation: map, color, transparency and side.
    pub fn normalized_from(template: &Material) -> Self {
        Self {
            label: template.label.clone(),
            color: template.color,
            map: template.map.clone(),
            transparent: template.transparent,
            opacity: template.opacity,
            side: template.side,
            ..Material::default()
        }
    }

    pub fn with_color(mut self, color: Vec3) -> Self {
        self.color = color;
        self
    }

    pub fn has_texture(&self) -> bool {
        self.map.is_some()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MaterialStats {
    pub created: u64,
    pub cloned: u64,
    pub disposed: u64,
    pub textures_disposed: u64,
}

/// String-keyed material storage. Nodes refer to materials by key, so every
/// node holding the same key observes the same material. Entries are
/// reference counted; `permanent` entries (cache members) survive a zero count
/// until they are disposed explicitly.
#[derive(Default)]
pub struct MaterialRegistry {
    materials: HashMap<String, MaterialEntry>,
    clone_counter: u64,
    stats: MaterialStats,
}

struct MaterialEntry {
    material: Material,
    ref_count: usize,
    permanent: bool,
}

impl MaterialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, key: &str) -> bool {
        self.materials.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Material> {
        self.materials.get(key).map(|entry| &entry.material)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Material> {
        self.materials.get_mut(key).map(|entry| &mut entry.material)
    }

    pub fn ref_count(&self, key: &str) -> usize {
        self.materials.get(key).map(|entry| entry.ref_count).unwrap_or(0)
    }

    /// Inserts a pinned material. An existing entry under `key` is kept.
    pub fn insert_permanent(&mut self, key: impl Into<String>, material: Material) -> String {
        let key = key.into();
        if !self.materials.contains_key(&key) {
            self.stats.created += 1;
            self.materials.insert(key.clone(), MaterialEntry { material, ref_count: 0, permanent: true });
        }
        key
    }

    pub fn clone_material(&mut self, key: &str) -> Option<String> {
        let material = self.materials.get(key)?.material.clone();
        self.clone_counter += 1;
        let base = key.split('#').next().unwrap_or(key);
        let clone_key = format!("{base}#{}", self.clone_counter);
        self.stats.cloned += 1;
        self.materials.insert(clone_key.clone(), MaterialEntry { material, ref_count: 0, permanent: false });
        Some(clone_key)
    }

    pub fn retain(&mut self, key: &str) -> bool {
        match self.materials.get_mut(key) {
            Some(entry) => {
                entry.ref_count = entry.ref_count.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Drops one reference; unpinned entries are disposed when the count
    /// reaches zero.
    pub fn release(&mut self, key: &str) {
        let mut remove_entry = false;
        if let Some(entry) = self.materials.get_mut(key) {
            if entry.ref_count > 0 {
                entry.ref_count -= 1;
            }
            if entry.ref_count == 0 && !entry.permanent {
                remove_entry = true;
            }
        }
        if remove_entry {
            self.dispose(key);
        }
    }

    /// Removes the entry regardless of its reference count, detaching any
    /// bound texture.
    pub fn dispose(&mut self, key: &str) -> bool {
        let Some(mut entry) = self.materials.remove(key) else {
            return false;
        };
        if entry.material.map.take().is_some() {
            self.stats.textures_disposed += 1;
        }
        self.stats.disposed += 1;
        true
    }

    pub fn stats(&self) -> MaterialStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_material_drops_lighting_contributions() {
        let template = Material {
            roughness: 0.2,
            metalness: 0.9,
            env_map_intensity: 1.0,
            ao_map_intensity: 1.0,
            displacement_scale: 0.3,
            transparent: true,
            opacity: 0.5,
            side: Side::Double,
            color: Vec3::new(1.0, 0.0, 0.0),
            ..Material::default()
        };
        let normalized = Material::normalized_from(&template);
        assert_eq!(normalized.roughness, 1.0);
        assert_eq!(normalized.metalness, 0.0);
        assert_eq!(normalized.env_map_intensity, 0.0);
        assert_eq!(normalized.ao_map_intensity, 0.0);
        assert_eq!(normalized.displacement_scale, 0.0);
        assert!(normalized.transparent);
        assert_eq!(normalized.opacity, 0.5);
        assert_eq!(normalized.side, Side::Double);
        assert_eq!(normalized.color, Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn released_clones_are_disposed_but_pinned_entries_survive() {
        let mut registry = MaterialRegistry::new();
        let key = registry.insert_permanent("shared", Material::default());
        registry.retain(&key);
        let clone = registry.clone_material(&key).expect("clone");
        registry.retain(&clone);

        registry.release(&key);
        assert!(registry.has(&key));
        registry.release(&clone);
        assert!(!registry.has(&clone));
        assert_eq!(registry.stats().disposed, 1);
    }

    #[test]
    fn disposing_a_textured_material_detaches_the_texture() {
        let mut registry = MaterialRegistry::new();
        let texture = Arc::new(TextureData { key: "tex".into(), width: 1, height: 1, data: vec![255; 4] });
        let key = registry.insert_permanent("textured", Material { map: Some(texture), ..Material::default() });
        assert!(registry.dispose(&key));
        assert!(!registry.dispose(&key));
        assert_eq!(registry.stats().textures_disposed, 1);
    }

    #[test]
    fn clones_of_clones_stay_unique() {
        let mut registry = MaterialRegistry::new();
        let key = registry.insert_permanent("base", Material::default());
        let first = registry.clone_material(&key).expect("first");
        let second = registry.clone_material(&first).expect("second");
        assert_ne!(first, second);
        assert!(second.starts_with("base#"));
    }
}
