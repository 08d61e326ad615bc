pub mod activation;
pub mod asset_store;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod debugger;
pub mod errors;
pub mod lifecycle;
pub mod material_registry;
pub mod mesh;
pub mod model;
pub mod physics;
pub mod resource_pool;
pub mod scene;
pub mod time;

pub use activation::{ActivationController, EmissionState};
pub use asset_store::{AssetStore, Instance, InstanceId, InstanceOrigin, StaticInstance};
pub use catalog::{AssemblyDescriptor, AssetCatalog, AssetTypeConfig, PrimitiveGeometry};
pub use config::AssetConfig;
pub use errors::AssetError;
pub use lifecycle::{AssetLifecycleManager, SpawnOptions};
pub use model::{GltfModelLoader, LoadedModel, ModelLoader, ModelNode};
pub use physics::PhysicsWorld;
pub use resource_pool::{PoolEntry, ResourcePool};
pub use scene::SceneGraph;
