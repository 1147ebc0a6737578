//! Core point cloud and mesh data types.

use nalgebra::{Point3, Vector3};

use crate::adjacency::MeshAdjacency;

/// Normalize a vector, returning the zero vector when the length is
/// below 1e-8. Degenerate cross products and averaged normals funnel
/// through here so downstream code never sees NaN components.
#[inline]
pub fn normalize_or_zero(v: Vector3<f32>) -> Vector3<f32> {
    let len = v.norm();
    if len > 1e-8 {
        v / len
    } else {
        Vector3::zeros()
    }
}

/// An unorganized collection of 3D point samples.
///
/// Point indices are stable for the lifetime of the cloud; the spatial
/// index ([`crate::KdTree`]) and the normal estimator both hand out
/// indices into this sequence.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    /// Point positions, in meters.
    pub points: Vec<Point3<f32>>,
}

impl PointCloud {
    /// Create a new empty point cloud.
    pub fn new() -> Self {
        Self { points: Vec::new() }
    }

    /// Create a point cloud with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            points: Vec::with_capacity(capacity),
        }
    }

    /// Create a point cloud from a list of positions.
    pub fn from_positions(positions: &[Point3<f32>]) -> Self {
        Self {
            points: positions.to_vec(),
        }
    }

    /// Number of points in the cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Add a point to the cloud.
    #[inline]
    pub fn push(&mut self, point: Point3<f32>) {
        self.points.push(point);
    }

    /// Add a point from raw coordinates.
    #[inline]
    pub fn push_coords(&mut self, x: f32, y: f32, z: f32) {
        self.points.push(Point3::new(x, y, z));
    }

    /// Compute the axis-aligned bounding box.
    /// Returns `(min_corner, max_corner)` or `None` if the cloud is empty.
    pub fn bounds(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        if self.points.is_empty() {
            return None;
        }

        let mut min = self.points[0];
        let mut max = self.points[0];

        for p in &self.points[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        Some((min, max))
    }

    /// Compute the centroid (center of mass) of the cloud.
    pub fn centroid(&self) -> Option<Point3<f32>> {
        if self.points.is_empty() {
            return None;
        }

        let sum: Vector3<f32> = self
            .points
            .iter()
            .map(|p| p.coords)
            .fold(Vector3::zeros(), |acc, v| acc + v);

        Some(Point3::from(sum / self.points.len() as f32))
    }

    /// Translate the cloud by the given vector.
    pub fn translate(&mut self, offset: Vector3<f32>) {
        for p in &mut self.points {
            *p += offset;
        }
    }

    /// Scale the cloud uniformly around its centroid.
    pub fn scale(&mut self, factor: f32) {
        let centroid = match self.centroid() {
            Some(c) => c,
            None => return,
        };

        for p in &mut self.points {
            let offset = *p - centroid;
            *p = centroid + offset * factor;
        }
    }
}

/// A triangle mesh with indexed vertices and faces.
///
/// Faces are `[a, b, c]` indices into the vertex array with
/// counter-clockwise winding: the outward normal is
/// `(v_b - v_a) x (v_c - v_a)`, normalized.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    /// Vertex positions.
    pub vertices: Vec<Point3<f32>>,

    /// Triangle faces as indices into the vertex array.
    pub faces: Vec<[u32; 3]>,
}

impl Mesh {
    /// Create a new empty mesh.
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Create a mesh with pre-allocated capacity.
    pub fn with_capacity(vertex_count: usize, face_count: usize) -> Self {
        Self {
            vertices: Vec::with_capacity(vertex_count),
            faces: Vec::with_capacity(face_count),
        }
    }

    /// Number of vertices in the mesh.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Number of faces (triangles) in the mesh.
    #[inline]
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if the mesh is empty (no vertices or faces).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Compute the axis-aligned bounding box.
    /// Returns `(min_corner, max_corner)` or `None` if the mesh has no vertices.
    pub fn bounds(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        if self.vertices.is_empty() {
            return None;
        }

        let mut min = self.vertices[0];
        let mut max = self.vertices[0];

        for p in &self.vertices[1..] {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            min.z = min.z.min(p.z);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
            max.z = max.z.max(p.z);
        }

        Some((min, max))
    }

    /// Get a specific triangle with concrete vertex positions.
    pub fn triangle(&self, face_idx: usize) -> Option<Triangle> {
        self.faces.get(face_idx).map(|&[a, b, c]| Triangle {
            v0: self.vertices[a as usize],
            v1: self.vertices[b as usize],
            v2: self.vertices[c as usize],
        })
    }

    /// Iterate over triangles, yielding [`Triangle`] structs with actual
    /// vertex positions.
    pub fn triangles(&self) -> impl Iterator<Item = Triangle> + '_ {
        self.faces.iter().map(|&[a, b, c]| Triangle {
            v0: self.vertices[a as usize],
            v1: self.vertices[b as usize],
            v2: self.vertices[c as usize],
        })
    }

    /// Compute the unit normal of a face, following the right-hand rule.
    /// Returns the zero vector for degenerate faces.
    pub fn face_normal(&self, face_idx: usize) -> Vector3<f32> {
        let [a, b, c] = self.faces[face_idx];
        let e1 = self.vertices[b as usize] - self.vertices[a as usize];
        let e2 = self.vertices[c as usize] - self.vertices[a as usize];
        normalize_or_zero(e1.cross(&e2))
    }

    /// Compute per-vertex normals as the normalized sum of incident face
    /// normals. Vertices with no incident faces get the zero vector.
    pub fn vertex_normals(&self) -> Vec<Vector3<f32>> {
        let mut normals = vec![Vector3::zeros(); self.vertices.len()];
        for face_idx in 0..self.faces.len() {
            let n = self.face_normal(face_idx);
            for &vi in &self.faces[face_idx] {
                normals[vi as usize] += n;
            }
        }
        for n in &mut normals {
            *n = normalize_or_zero(*n);
        }
        normals
    }

    /// Compute the signed volume of the mesh via the divergence theorem.
    ///
    /// Positive for a closed mesh with outward-facing normals, negative for
    /// an inside-out mesh. Not meaningful for open meshes.
    pub fn signed_volume(&self) -> f64 {
        let mut volume = 0.0f64;

        for &[a, b, c] in &self.faces {
            let v0 = self.vertices[a as usize].coords.cast::<f64>();
            let v1 = self.vertices[b as usize].coords.cast::<f64>();
            let v2 = self.vertices[c as usize].coords.cast::<f64>();
            volume += v0.dot(&v1.cross(&v2));
        }

        volume / 6.0
    }

    /// Check that every undirected edge is used by at most 2 triangles.
    pub fn is_manifold(&self) -> bool {
        MeshAdjacency::build(&self.faces)
            .edge_to_faces
            .values()
            .all(|faces| faces.len() <= 2)
    }

    /// Check that every undirected edge is used by exactly 2 triangles.
    pub fn is_watertight(&self) -> bool {
        if self.faces.is_empty() {
            return false;
        }
        MeshAdjacency::build(&self.faces)
            .edge_to_faces
            .values()
            .all(|faces| faces.len() == 2)
    }
}

/// A triangle with concrete vertex positions.
///
/// Utility type for geometric calculations; winding follows the enclosing
/// mesh's convention.
#[derive(Debug, Clone, Copy)]
pub struct Triangle {
    pub v0: Point3<f32>,
    pub v1: Point3<f32>,
    pub v2: Point3<f32>,
}

impl Triangle {
    /// Create a new triangle from three points.
    #[inline]
    pub fn new(v0: Point3<f32>, v1: Point3<f32>, v2: Point3<f32>) -> Self {
        Self { v0, v1, v2 }
    }

    /// Compute the (unnormalized) face normal via cross product.
    #[inline]
    pub fn normal_unnormalized(&self) -> Vector3<f32> {
        (self.v1 - self.v0).cross(&(self.v2 - self.v0))
    }

    /// Compute the unit face normal, or the zero vector for degenerate
    /// triangles.
    #[inline]
    pub fn normal(&self) -> Vector3<f32> {
        normalize_or_zero(self.normal_unnormalized())
    }

    /// Compute the area of the triangle.
    #[inline]
    pub fn area(&self) -> f32 {
        self.normal_unnormalized().norm() * 0.5
    }

    /// Compute the centroid.
    #[inline]
    pub fn centroid(&self) -> Point3<f32> {
        Point3::from((self.v0.coords + self.v1.coords + self.v2.coords) / 3.0)
    }
}
