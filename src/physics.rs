use crate::errors::{AssetError, Result};
use glam::{Quat, Vec3};
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::prelude::{
    CCDSolver, Collider, ColliderBuilder, ColliderHandle, ColliderSet, DefaultBroadPhase, ImpulseJointSet,
    IntegrationParameters, IslandManager, Isometry, MultibodyJointSet, NarrowPhase, PhysicsPipeline, Point,
    QueryPipeline, Real, RigidBody, RigidBodyBuilder, RigidBodyHandle, RigidBodySet, Vector,
};

#[derive(Clone, Copy, Debug)]
pub struct PhysicsParams {
    pub gravity: Vec3,
}

impl Default for PhysicsParams {
    fn default() -> Self {
        Self { gravity: Vec3::new(0.0, -9.81, 0.0) }
    }
}

/// Rigid body request. Bodies are dynamic and may fall asleep.
#[derive(Clone, Copy, Debug)]
pub struct BodyDesc {
    pub translation: Vec3,
    pub rotation: Quat,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub can_sleep: bool,
}

impl Default for BodyDesc {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            mass: 1.0,
            linear_damping: 0.5,
            angular_damping: 0.5,
            can_sleep: true,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ColliderShape {
    Cuboid { half_extents: Vec3 },
    TriMesh { vertices: Vec<Vec3>, indices: Vec<[u32; 3]> },
}

/// Collider request; `offset` and `rotation` are relative to the parent body.
#[derive(Clone, Debug)]
pub struct ColliderDesc {
    pub shape: ColliderShape,
    pub offset: Vec3,
    pub rotation: Quat,
    pub restitution: f32,
    pub friction: f32,
}

impl ColliderDesc {
    pub fn new(shape: ColliderShape) -> Self {
        Self { shape, offset: Vec3::ZERO, rotation: Quat::IDENTITY, restitution: 0.3, friction: 0.6 }
    }
}

pub struct PhysicsWorld {
    pipeline: PhysicsPipeline,
    gravity: Vector<Real>,
    integration_parameters: IntegrationParameters,
    island_manager: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd_solver: CCDSolver,
    query_pipeline: QueryPipeline,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        Self::new(&PhysicsParams::default())
    }
}

impl PhysicsWorld {
    pub fn new(params: &PhysicsParams) -> Self {
        Self {
            pipeline: PhysicsPipeline::new(),
            gravity: vec_to_rapier(params.gravity),
            integration_parameters: IntegrationParameters::default(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd_solver: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
        }
    }

    pub fn create_rigid_body(&mut self, desc: &BodyDesc) -> RigidBodyHandle {
        let body = RigidBodyBuilder::dynamic()
            .position(isometry(desc.translation, desc.rotation))
            .linear_damping(desc.linear_damping)
            .angular_damping(desc.angular_damping)
            .can_sleep(desc.can_sleep)
            .build();
        let handle = self.bodies.insert(body);
        if desc.mass > 0.0 {
            if let Some(body) = self.bodies.get_mut(handle) {
                body.set_additional_mass(desc.mass, true);
            }
        }
        handle
    }

    pub fn create_collider(&mut self, desc: &ColliderDesc, body: RigidBodyHandle) -> Result<ColliderHandle> {
        if self.bodies.get(body).is_none() {
            return Err(AssetError::Physics("collider parent body does not exist".to_string()));
        }
        let builder = match &desc.shape {
            ColliderShape::Cuboid { half_extents } => {
                if half_extents.cmple(Vec3::ZERO).any() || !half_extents.is_finite() {
                    return Err(AssetError::Physics(format!("invalid cuboid half extents {half_extents:?}")));
                }
                ColliderBuilder::cuboid(half_extents.x, half_extents.y, half_extents.z)
            }
            ColliderShape::TriMesh { vertices, indices } => {
                let points: Vec<Point<Real>> = vertices.iter().map(|v| Point::new(v.x, v.y, v.z)).collect();
                ColliderBuilder::trimesh(points, indices.clone())
                    .map_err(|err| AssetError::Physics(format!("trimesh rejected: {err:?}")))?
            }
        };
        let collider = builder
            .position(isometry(desc.offset, desc.rotation))
            .restitution(desc.restitution)
            .friction(desc.friction)
            .build();
        Ok(self.colliders.insert_with_parent(collider, body, &mut self.bodies))
    }

    /// Removes the body together with every collider attached to it.
    pub fn remove_rigid_body(&mut self, handle: RigidBodyHandle) -> bool {
        self.bodies
            .remove(
                handle,
                &mut self.island_manager,
                &mut self.colliders,
                &mut self.impulse_joints,
                &mut self.multibody_joints,
                true,
            )
            .is_some()
    }

    pub fn contains_body(&self, handle: RigidBodyHandle) -> bool {
        self.bodies.get(handle).is_some()
    }

    pub fn translation(&self, handle: RigidBodyHandle) -> Option<Vec3> {
        self.bodies.get(handle).map(|body| vec_from_rapier(body.translation()))
    }

    pub fn rotation(&self, handle: RigidBodyHandle) -> Option<Quat> {
        self.bodies.get(handle).map(|body| quat_from_rapier(body.rotation()))
    }

    pub fn set_translation(&mut self, handle: RigidBodyHandle, translation: Vec3) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_translation(vec_to_rapier(translation), false);
        }
    }

    pub fn set_rotation(&mut self, handle: RigidBodyHandle, rotation: Quat) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_rotation(quat_to_rapier(rotation), false);
        }
    }

    pub fn set_linvel(&mut self, handle: RigidBodyHandle, velocity: Vec3) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_linvel(vec_to_rapier(velocity), false);
        }
    }

    pub fn set_angvel(&mut self, handle: RigidBodyHandle, velocity: Vec3) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.set_angvel(vec_to_rapier(velocity), false);
        }
    }

    pub fn linvel(&self, handle: RigidBodyHandle) -> Option<Vec3> {
        self.bodies.get(handle).map(|body| vec_from_rapier(body.linvel()))
    }

    pub fn sleep(&mut self, handle: RigidBodyHandle) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.sleep();
        }
    }

    pub fn wake_up(&mut self, handle: RigidBodyHandle) {
        if let Some(body) = self.bodies.get_mut(handle) {
            body.wake_up(true);
        }
    }

    pub fn is_sleeping(&self, handle: RigidBodyHandle) -> bool {
        self.bodies.get(handle).map(|body| body.is_sleeping()).unwrap_or(false)
    }

    pub fn step(&mut self, dt: f32) {
        self.integration_parameters.dt = dt;
        let hooks = ();
        let events = ();
        self.pipeline.step(
            &self.gravity,
            &self.integration_parameters,
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd_solver,
            Some(&mut self.query_pipeline),
            &hooks,
            &events,
        );
    }

    pub fn body(&self, handle: RigidBodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    pub fn collider(&self, handle: ColliderHandle) -> Option<&Collider> {
        self.colliders.get(handle)
    }

    pub fn body_colliders(&self, handle: RigidBodyHandle) -> Vec<ColliderHandle> {
        self.bodies.get(handle).map(|body| body.colliders().to_vec()).unwrap_or_default()
    }

    /// Half extents of a cuboid collider, `None` for other shapes.
    pub fn cuboid_half_extents(&self, handle: ColliderHandle) -> Option<Vec3> {
        let collider = self.colliders.get(handle)?;
        let cuboid = collider.shape().as_cuboid()?;
        Some(vec_from_rapier(&cuboid.half_extents))
    }

    /// Collider offset relative to its parent body.
    pub fn collider_offset(&self, handle: ColliderHandle) -> Option<Vec3> {
        let collider = self.colliders.get(handle)?;
        collider.position_wrt_parent().map(|pos| vec_from_rapier(&pos.translation.vector))
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn collider_count(&self) -> usize {
        self.colliders.len()
    }
}

fn isometry(translation: Vec3, rotation: Quat) -> Isometry<Real> {
    Isometry::from_parts(Translation3::from(vec_to_rapier(translation)), quat_to_rapier(rotation))
}

fn vec_to_rapier(v: Vec3) -> Vector<Real> {
    Vector::new(v.x, v.y, v.z)
}

fn vec_from_rapier(v: &Vector<Real>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

fn quat_to_rapier(q: Quat) -> UnitQuaternion<Real> {
    UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z))
}

fn quat_from_rapier(q: &UnitQuaternion<Real>) -> Quat {
    Quat::from_xyzw(q.i, q.j, q.k, q.w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removing_a_body_drops_its_colliders() {
        let mut world = PhysicsWorld::default();
        let body = world.create_rigid_body(&BodyDesc { translation: Vec3::new(0.0, 5.0, 0.0), ..BodyDesc::default() });
        world
            .create_collider(&ColliderDesc::new(ColliderShape::Cuboid { half_extents: Vec3::splat(0.5) }), body)
            .expect("collider");
        assert_eq!(world.collider_count(), 1);
        assert_eq!(world.translation(body), Some(Vec3::new(0.0, 5.0, 0.0)));
        assert!(world.remove_rigid_body(body));
        assert_eq!(world.collider_count(), 0);
        assert!(!world.remove_rigid_body(body));
    }

    #[test]
    fn degenerate_cuboid_is_rejected() {
        let mut world = PhysicsWorld::default();
        let body = world.create_rigid_body(&BodyDesc::default());
        let result =
            world.create_collider(&ColliderDesc::new(ColliderShape::Cuboid { half_extents: Vec3::ZERO }), body);
        assert!(matches!(result, Err(AssetError::Physics(_))));
    }

    #[test]
    fn rotation_round_trips_through_backend() {
        let mut world = PhysicsWorld::default();
        let body = world.create_rigid_body(&BodyDesc::default());
        let rotation = Quat::from_rotation_y(0.75);
        world.set_rotation(body, rotation);
        let read = world.rotation(body).expect("rotation");
        assert!(read.angle_between(rotation) < 1e-4);
    }

    #[test]
    fn sleeping_body_reports_sleep_state() {
        let mut world = PhysicsWorld::default();
        let body = world.create_rigid_body(&BodyDesc::default());
        world.sleep(body);
        assert!(world.is_sleeping(body));
        world.wake_up(body);
        assert!(!world.is_sleeping(body));
    }
}
