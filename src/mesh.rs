use glam::{Mat4, Vec2, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshVertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl MeshVertex {
    pub fn new(position: Vec3, normal: Vec3, uv: Vec2) -> Self {
        Self { position, normal, uv }
    }
}

/// CPU-side geometry. Instances share it through `Arc<Mesh>`; it is never
/// mutated once built.
#[derive(Clone, Debug)]
pub struct Mesh {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    pub bounds: MeshBounds,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshBounds {
    pub min: Vec3,
    pub max: Vec3,
    pub center: Vec3,
    pub radius: f32,
}

impl Mesh {
    pub fn new(vertices: Vec<MeshVertex>, indices: Vec<u32>) -> Self {
        let bounds = MeshBounds::from_vertices(&vertices);
        Self { vertices, indices, bounds }
    }

    /// Builds a mesh from raw positions, deriving normals from the triangles.
    pub fn from_positions(positions: Vec<Vec3>, indices: Vec<u32>) -> Self {
        let normals = compute_normals(&positions, &indices);
        let vertices = positions
            .iter()
            .zip(normals)
            .map(|(position, normal)| MeshVertex::new(*position, normal, Vec2::ZERO))
            .collect();
        Self::new(vertices, indices)
    }

    pub fn cuboid(width: f32, height: f32, depth: f32) -> Self {
        let h = Vec3::new(width, height, depth) * 0.5;
        let positions = [
            Vec3::new(-h.x, -h.y, -h.z),
            Vec3::new(h.x, -h.y, -h.z),
            Vec3::new(h.x, h.y, -h.z),
            Vec3::new(-h.x, h.y, -h.z),
            Vec3::new(-h.x, -h.y, h.z),
            Vec3::new(h.x, -h.y, h.z),
            Vec3::new(h.x, h.y, h.z),
            Vec3::new(-h.x, h.y, h.z),
        ];
        let normals = [
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, -1.0, 0.0),
        ];

        let uv_quad = [Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(0.0, 1.0)];
        let mut vertices = Vec::with_capacity(24);
        let mut write_face = |indices: [usize; 4], normal: Vec3| {
            for (i, &index) in indices.iter().enumerate() {
                vertices.push(MeshVertex::new(positions[index], normal, uv_quad[i]));
            }
        };

        write_face([0, 3, 2, 1], normals[0]); // back
        write_face([4, 5, 6, 7], normals[1]); // front
        write_face([0, 4, 7, 3], normals[2]); // left
        write_face([1, 2, 6, 5], normals[3]); // right
        write_face([3, 7, 6, 2], normals[4]); // top
        write_face([0, 1, 5, 4], normals[5]); // bottom

        let mut indices = Vec::with_capacity(36);
        for face in 0..6 {
            let base = face * 4;
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new(vertices, indices)
    }

    pub fn sphere(radius: f32, segments: u32) -> Self {
        let longitude = segments.max(3);
        let latitude = (segments / 2).max(2);
        let mut vertices = Vec::with_capacity(((latitude + 1) * (longitude + 1)) as usize);
        for lat in 0..=latitude {
            let v = lat as f32 / latitude as f32;
            let theta = v * std::f32::consts::PI;
            for lon in 0..=longitude {
                let u = lon as f32 / longitude as f32;
                let phi = u * std::f32::consts::TAU;
                let normal = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
                vertices.push(MeshVertex::new(normal * radius, normal, Vec2::new(u, v)));
            }
        }
        let stride = longitude + 1;
        let mut indices = Vec::with_capacity((latitude * longitude * 6) as usize);
        for lat in 0..latitude {
            for lon in 0..longitude {
                let a = lat * stride + lon;
                let b = a + stride;
                indices.extend_from_slice(&[a, b, a + 1, b, b + 1, a + 1]);
            }
        }
        Self::new(vertices, indices)
    }

    pub fn plane(width: f32, depth: f32) -> Self {
        let hw = width * 0.5;
        let hd = depth * 0.5;
        let vertices = vec![
            MeshVertex::new(Vec3::new(-hw, 0.0, -hd), Vec3::Y, Vec2::new(0.0, 0.0)),
            MeshVertex::new(Vec3::new(hw, 0.0, -hd), Vec3::Y, Vec2::new(1.0, 0.0)),
            MeshVertex::new(Vec3::new(hw, 0.0, hd), Vec3::Y, Vec2::new(1.0, 1.0)),
            MeshVertex::new(Vec3::new(-hw, 0.0, hd), Vec3::Y, Vec2::new(0.0, 1.0)),
        ];
        Self::new(vertices, vec![0, 2, 1, 0, 3, 2])
    }

    pub fn triangles(&self) -> Vec<[u32; 3]> {
        self.indices.chunks_exact(3).map(|tri| [tri[0], tri[1], tri[2]]).collect()
    }

    pub fn positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        self.vertices.iter().map(|vertex| vertex.position)
    }
}

pub(crate) fn compute_normals(positions: &[Vec3], indices: &[u32]) -> Vec<Vec3> {
    let mut normals = vec![Vec3::ZERO; positions.len()];
    for tri in indices.chunks(3) {
        if tri.len() < 3 {
            continue;
        }
        let i0 = tri[0] as usize;
        let i1 = tri[1] as usize;
        let i2 = tri[2] as usize;
        if i0 >= positions.len() || i1 >= positions.len() || i2 >= positions.len() {
            continue;
        }
        let a = positions[i0];
        let b = positions[i1];
        let c = positions[i2];
        let normal = (b - a).cross(c - a);
        if normal.length_squared() > 0.0 {
            normals[i0] += normal;
            normals[i1] += normal;
            normals[i2] += normal;
        }
    }
    for normal in &mut normals {
        if normal.length_squared() > 0.0 {
            *normal = normal.normalize();
        } else {
            *normal = Vec3::Y;
        }
    }
    normals
}

impl MeshBounds {
    pub fn from_vertices(vertices: &[MeshVertex]) -> Self {
        Self::from_points(vertices.iter().map(|vertex| vertex.position))
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let points: Vec<Vec3> = points.into_iter().collect();
        if points.is_empty() {
            return MeshBounds { min: Vec3::ZERO, max: Vec3::ZERO, center: Vec3::ZERO, radius: 0.0 };
        }
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for pos in &points {
            min = min.min(*pos);
            max = max.max(*pos);
        }
        let center = (min + max) * 0.5;
        let radius = points.iter().fold(0.0_f32, |acc, pos| acc.max((*pos - center).length()));
        MeshBounds { min, max, center, radius }
    }

    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Axis-aligned bounds of these bounds after `transform`.
    pub fn transformed(&self, transform: &Mat4) -> Self {
        Self::from_points(self.corners().into_iter().map(|corner| transform.transform_point3(corner)))
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }
}
