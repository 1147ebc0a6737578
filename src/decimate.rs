//! Mesh simplification by quadric-error-metric edge collapse.
//!
//! Every vertex accumulates the quadric of its incident face planes; edges
//! live in a min-heap keyed by the error of their optimal collapse
//! position. Heap entries carry a version stamp (the sum of both endpoint
//! versions at insert time) and stale entries are discarded lazily at pop
//! time instead of being removed from the heap.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use hashbrown::HashSet;
use nalgebra::Point3;
use tracing::{debug, info};

use crate::adjacency::edge_key;
use crate::types::Mesh;

/// Parameters for mesh decimation.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct DecimateParams {
    /// Target number of triangles. If `None`, `target_ratio` decides.
    pub target_triangles: Option<usize>,

    /// Target fraction of triangles to keep, in `[0, 1]`. Default 0.5.
    pub target_ratio: f32,
}

impl Default for DecimateParams {
    fn default() -> Self {
        Self {
            target_triangles: None,
            target_ratio: 0.5,
        }
    }
}

impl DecimateParams {
    /// Create params targeting a specific triangle count.
    pub fn with_target_triangles(count: usize) -> Self {
        Self {
            target_triangles: Some(count),
            ..Default::default()
        }
    }

    /// Create params targeting a fraction of the original triangles.
    pub fn with_target_ratio(ratio: f32) -> Self {
        Self {
            target_ratio: ratio.clamp(0.0, 1.0),
            ..Default::default()
        }
    }
}

/// Result of mesh decimation.
#[derive(Debug, Clone)]
pub struct DecimateResult {
    /// The decimated mesh, compacted to dense indices.
    pub mesh: Mesh,

    /// Triangle count before decimation.
    pub original_triangles: usize,

    /// Triangle count after decimation.
    pub final_triangles: usize,

    /// Number of edge collapses performed.
    pub collapses_performed: usize,
}

/// Quadric error matrix: a symmetric 4x4 stored as its 10 unique scalars.
#[derive(Debug, Clone, Copy, Default)]
struct Quadric {
    // a00 a01 a02 a03
    //     a11 a12 a13
    //         a22 a23
    //             a33
    m: [f32; 10],
}

impl Quadric {
    /// Accumulate the outer product of the plane `(a, b, c, d)`.
    fn add_plane(&mut self, a: f32, b: f32, c: f32, d: f32) {
        self.m[0] += a * a;
        self.m[1] += a * b;
        self.m[2] += a * c;
        self.m[3] += a * d;
        self.m[4] += b * b;
        self.m[5] += b * c;
        self.m[6] += b * d;
        self.m[7] += c * c;
        self.m[8] += c * d;
        self.m[9] += d * d;
    }

    fn add(&mut self, other: &Quadric) {
        for (dst, src) in self.m.iter_mut().zip(other.m.iter()) {
            *dst += src;
        }
    }

    fn sum(&self, other: &Quadric) -> Quadric {
        let mut q = *self;
        q.add(other);
        q
    }

    /// Evaluate `v^T Q v` with `v = (x, y, z, 1)`.
    fn evaluate(&self, p: &Point3<f32>) -> f32 {
        let [a00, a01, a02, a03, a11, a12, a13, a22, a23, a33] = self.m;
        let (x, y, z) = (p.x, p.y, p.z);
        a00 * x * x
            + 2.0 * a01 * x * y
            + 2.0 * a02 * x * z
            + 2.0 * a03 * x
            + a11 * y * y
            + 2.0 * a12 * y * z
            + 2.0 * a13 * y
            + a22 * z * z
            + 2.0 * a23 * z
            + a33
    }

    /// Position minimizing the quadric error for a collapse of the edge
    /// `(v1, v2)`.
    ///
    /// Solves the 3x3 system from the upper-left block against
    /// `(-a03, -a13, -a23)` by Cramer's rule. Falls back to the edge
    /// midpoint when the system is singular, or when the solution lands
    /// more than 3x the edge length away from the midpoint (which happens
    /// under ill-conditioned normal fans).
    fn optimal_vertex(&self, v1: &Point3<f32>, v2: &Point3<f32>) -> Point3<f32> {
        let [a00, a01, a02, a03, a11, a12, a13, a22, a23, _] = self.m;
        let midpoint = Point3::from((v1.coords + v2.coords) * 0.5);

        let det = a00 * (a11 * a22 - a12 * a12) - a01 * (a01 * a22 - a12 * a02)
            + a02 * (a01 * a12 - a11 * a02);

        if det.abs() < 1e-10 {
            return midpoint;
        }

        let inv_det = 1.0 / det;
        let (bx, by, bz) = (-a03, -a13, -a23);

        let x = inv_det
            * (bx * (a11 * a22 - a12 * a12) - a01 * (by * a22 - a12 * bz)
                + a02 * (by * a12 - a11 * bz));
        let y = inv_det
            * (a00 * (by * a22 - a12 * bz) - bx * (a01 * a22 - a12 * a02)
                + a02 * (a01 * bz - by * a02));
        let z = inv_det
            * (a00 * (a11 * bz - by * a12) - a01 * (a01 * bz - by * a02)
                + bx * (a01 * a12 - a11 * a02));

        let solved = Point3::new(x, y, z);
        let edge_len = (v1 - v2).norm();
        if (solved - midpoint).norm() > edge_len * 3.0 {
            return midpoint;
        }

        solved
    }
}

/// An edge collapse candidate in the priority queue.
#[derive(Debug, Clone, Copy)]
struct EdgeCollapse {
    cost: f32,
    v0: u32,
    v1: u32,
    /// Sum of both endpoint versions at insert time; a mismatch at pop
    /// time marks the entry stale.
    version: u32,
}

impl PartialEq for EdgeCollapse {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost
    }
}

impl Eq for EdgeCollapse {}

impl PartialOrd for EdgeCollapse {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EdgeCollapse {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap behaves as a min-heap on cost.
        other
            .cost
            .partial_cmp(&self.cost)
            .unwrap_or(Ordering::Equal)
    }
}

/// Decimate a mesh by iterative edge collapse.
///
/// Returns the input unchanged when it already meets the target.
pub fn decimate_mesh(mesh: &Mesh, params: &DecimateParams) -> DecimateResult {
    let original_triangles = mesh.faces.len();
    let target = params
        .target_triangles
        .unwrap_or_else(|| (original_triangles as f32 * params.target_ratio).ceil() as usize);

    if original_triangles <= target {
        return DecimateResult {
            mesh: mesh.clone(),
            original_triangles,
            final_triangles: original_triangles,
            collapses_performed: 0,
        };
    }

    info!(
        "decimating: {} -> {} triangles",
        original_triangles, target
    );

    let n_verts = mesh.vertices.len();
    let mut vertices = mesh.vertices.clone();
    let mut faces = mesh.faces.clone();
    let mut tri_valid = vec![true; faces.len()];
    let mut vert_valid = vec![true; n_verts];
    let mut active_tris = faces.len();

    // Per-vertex quadrics from incident face planes.
    let mut quadrics = vec![Quadric::default(); n_verts];
    for face in &faces {
        let tri = crate::types::Triangle::new(
            vertices[face[0] as usize],
            vertices[face[1] as usize],
            vertices[face[2] as usize],
        );
        let n = tri.normal();
        if n == nalgebra::Vector3::zeros() {
            continue;
        }
        let d = -n.dot(&vertices[face[0] as usize].coords);
        for &vi in face {
            quadrics[vi as usize].add_plane(n.x, n.y, n.z, d);
        }
    }

    // Vertex -> incident triangle set.
    let mut vert_tris: Vec<HashSet<u32>> = vec![HashSet::new(); n_verts];
    for (ti, face) in faces.iter().enumerate() {
        for &vi in face {
            vert_tris[vi as usize].insert(ti as u32);
        }
    }

    let mut versions = vec![0u32; n_verts];
    let mut heap: BinaryHeap<EdgeCollapse> = BinaryHeap::new();

    let push_edge = |heap: &mut BinaryHeap<EdgeCollapse>,
                     quadrics: &[Quadric],
                     vertices: &[Point3<f32>],
                     versions: &[u32],
                     a: u32,
                     b: u32| {
        let (v0, v1) = edge_key(a, b);
        let q = quadrics[v0 as usize].sum(&quadrics[v1 as usize]);
        let optimal = q.optimal_vertex(&vertices[v0 as usize], &vertices[v1 as usize]);
        heap.push(EdgeCollapse {
            cost: q.evaluate(&optimal),
            v0,
            v1,
            version: versions[v0 as usize] + versions[v1 as usize],
        });
    };

    // Seed the heap with every unique edge.
    let mut seen: HashSet<(u32, u32)> = HashSet::new();
    for face in &faces {
        for e in 0..3 {
            let key = edge_key(face[e], face[(e + 1) % 3]);
            if seen.insert(key) {
                push_edge(&mut heap, &quadrics, &vertices, &versions, key.0, key.1);
            }
        }
    }
    drop(seen);

    let mut collapses = 0usize;

    while active_tris > target {
        let Some(entry) = heap.pop() else {
            break;
        };

        let (keep, remove) = (entry.v0 as usize, entry.v1 as usize);

        // Lazy rejection of stale entries.
        if !vert_valid[keep] || !vert_valid[remove] {
            continue;
        }
        if entry.version != versions[keep] + versions[remove] {
            continue;
        }

        let q = quadrics[keep].sum(&quadrics[remove]);
        let optimal = q.optimal_vertex(&vertices[keep], &vertices[remove]);

        vertices[keep] = optimal;
        quadrics[keep] = q;
        versions[keep] += 1;
        vert_valid[remove] = false;

        // Rewire the removed vertex's triangles onto the kept vertex.
        let incident: Vec<u32> = vert_tris[remove].iter().copied().collect();
        for ti in incident {
            let t = ti as usize;
            if !tri_valid[t] {
                continue;
            }

            for idx in faces[t].iter_mut() {
                if *idx as usize == remove {
                    *idx = keep as u32;
                }
            }

            let [a, b, c] = faces[t];
            if a == b || b == c || a == c {
                tri_valid[t] = false;
                active_tris -= 1;
                vert_tris[a as usize].remove(&ti);
                vert_tris[b as usize].remove(&ti);
                vert_tris[c as usize].remove(&ti);
            } else {
                vert_tris[keep].insert(ti);
            }
        }
        vert_tris[remove].clear();

        collapses += 1;

        // Refresh the edge fan around the kept vertex with current costs.
        let mut requeued: HashSet<(u32, u32)> = HashSet::new();
        let incident: Vec<u32> = vert_tris[keep].iter().copied().collect();
        for ti in incident {
            let t = ti as usize;
            if !tri_valid[t] {
                continue;
            }
            let face = faces[t];
            for e in 0..3 {
                let key = edge_key(face[e], face[(e + 1) % 3]);
                if requeued.insert(key) {
                    push_edge(&mut heap, &quadrics, &vertices, &versions, key.0, key.1);
                }
            }
        }
    }

    // Compact surviving vertices and triangles to dense indices.
    let mut remap = vec![u32::MAX; n_verts];
    let mut out = Mesh::new();
    for (t, face) in faces.iter().enumerate() {
        if !tri_valid[t] {
            continue;
        }
        let mut new_face = [0u32; 3];
        for (slot, &vi) in new_face.iter_mut().zip(face.iter()) {
            if remap[vi as usize] == u32::MAX {
                remap[vi as usize] = out.vertices.len() as u32;
                out.vertices.push(vertices[vi as usize]);
            }
            *slot = remap[vi as usize];
        }
        out.faces.push(new_face);
    }

    debug!(
        "decimation done: {} collapses, {} -> {} triangles",
        collapses,
        original_triangles,
        out.faces.len()
    );

    DecimateResult {
        final_triangles: out.faces.len(),
        mesh: out,
        original_triangles,
        collapses_performed: collapses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_cube(size: f32) -> Mesh {
        let s = size / 2.0;
        let mut mesh = Mesh::new();

        mesh.vertices.push(Point3::new(-s, -s, -s)); // 0
        mesh.vertices.push(Point3::new(s, -s, -s)); // 1
        mesh.vertices.push(Point3::new(s, s, -s)); // 2
        mesh.vertices.push(Point3::new(-s, s, -s)); // 3
        mesh.vertices.push(Point3::new(-s, -s, s)); // 4
        mesh.vertices.push(Point3::new(s, -s, s)); // 5
        mesh.vertices.push(Point3::new(s, s, s)); // 6
        mesh.vertices.push(Point3::new(-s, s, s)); // 7

        mesh.faces.push([0, 2, 1]);
        mesh.faces.push([0, 3, 2]);
        mesh.faces.push([4, 5, 6]);
        mesh.faces.push([4, 6, 7]);
        mesh.faces.push([0, 1, 5]);
        mesh.faces.push([0, 5, 4]);
        mesh.faces.push([3, 7, 6]);
        mesh.faces.push([3, 6, 2]);
        mesh.faces.push([0, 4, 7]);
        mesh.faces.push([0, 7, 3]);
        mesh.faces.push([1, 2, 6]);
        mesh.faces.push([1, 6, 5]);

        mesh
    }

    #[test]
    fn empty_mesh_passes_through() {
        let mesh = Mesh::new();
        let result = decimate_mesh(&mesh, &DecimateParams::default());
        assert_eq!(result.original_triangles, 0);
        assert_eq!(result.final_triangles, 0);
    }

    #[test]
    fn already_at_target_is_unchanged() {
        let mesh = make_cube(1.0);
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_triangles(20));
        assert_eq!(result.final_triangles, 12);
        assert_eq!(result.collapses_performed, 0);
    }

    #[test]
    fn cube_decimates_to_target() {
        let mesh = make_cube(1.0);
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_triangles(8));

        assert_eq!(result.original_triangles, 12);
        assert!(result.final_triangles <= 8);
        assert!(result.collapses_performed > 0);

        // All indices valid and no degenerate triangles survive.
        let vcount = result.mesh.vertices.len() as u32;
        for face in &result.mesh.faces {
            assert!(face.iter().all(|&i| i < vcount));
            assert!(face[0] != face[1] && face[1] != face[2] && face[0] != face[2]);
        }
    }

    #[test]
    fn ratio_target_halves_triangle_count() {
        let mesh = make_cube(2.0);
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_ratio(0.5));
        assert!(result.final_triangles <= 6);
        assert!(!result.mesh.faces.is_empty());
    }

    #[test]
    fn quadric_plane_distance() {
        let mut q = Quadric::default();
        q.add_plane(0.0, 0.0, 1.0, 0.0); // z = 0 plane

        assert!(q.evaluate(&Point3::new(5.0, -2.0, 0.0)).abs() < 1e-6);
        assert!((q.evaluate(&Point3::new(0.0, 0.0, 2.0)) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn quadric_optimal_between_parallel_planes() {
        let mut q = Quadric::default();
        q.add_plane(0.0, 0.0, 1.0, 0.0); // z = 0
        q.add_plane(0.0, 0.0, 1.0, -2.0); // z = 2

        // The z system alone is singular in x/y, so midpoint fallback
        // applies; both plane constraints still pull z toward 1.
        let v = q.optimal_vertex(&Point3::new(0.0, 0.0, 0.0), &Point3::new(0.0, 0.0, 2.0));
        assert!((v.z - 1.0).abs() < 1e-5);
    }

    #[test]
    fn quadric_optimal_at_corner() {
        let mut q = Quadric::default();
        q.add_plane(1.0, 0.0, 0.0, -1.0); // x = 1
        q.add_plane(0.0, 1.0, 0.0, -2.0); // y = 2
        q.add_plane(0.0, 0.0, 1.0, -3.0); // z = 3

        let v = q.optimal_vertex(&Point3::new(0.9, 1.9, 2.9), &Point3::new(1.1, 2.1, 3.1));
        assert!((v.x - 1.0).abs() < 1e-4);
        assert!((v.y - 2.0).abs() < 1e-4);
        assert!((v.z - 3.0).abs() < 1e-4);
    }

    #[test]
    fn version_stamps_reject_stale_entries() {
        // Collapsing a dense mesh must terminate without reusing stale
        // costs; success here is simply a valid, small output.
        let mesh = make_cube(1.0);
        let result = decimate_mesh(&mesh, &DecimateParams::with_target_triangles(4));
        assert!(result.final_triangles <= 4 || result.collapses_performed > 0);
        for face in &result.mesh.faces {
            assert!(face[0] != face[1] && face[1] != face[2] && face[0] != face[2]);
        }
    }
}
