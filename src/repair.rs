//! Mesh repair passes: degenerate removal, vertex welding, manifold
//! enforcement, hole filling, and consistent face orientation.
//!
//! Every pass is idempotent and independently callable; [`repair_mesh`]
//! runs all five in the order a scan pipeline wants them.

use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};
use nalgebra::{Point3, Vector3};
use tracing::{debug, info};

use crate::adjacency::{edge_key, MeshAdjacency};
use crate::types::{Mesh, Triangle};

/// Triangles with area at or below this are degenerate.
const DEGENERATE_AREA: f32 = 1e-10;

/// Welding cell size: vertices within the same `1e-6` grid cell merge.
const WELD_EPSILON: f32 = 1e-6;

/// Boundary loop traces longer than this abort (malformed boundaries).
const MAX_LOOP_STEPS: usize = 1000;

/// Remove triangles with duplicate indices or near-zero area.
///
/// Returns the number of triangles removed.
pub fn remove_degenerate(mesh: &mut Mesh) -> usize {
    let before = mesh.faces.len();

    let vertices = &mesh.vertices;
    mesh.faces.retain(|&[a, b, c]| {
        if a == b || b == c || a == c {
            return false;
        }
        let tri = Triangle::new(
            vertices[a as usize],
            vertices[b as usize],
            vertices[c as usize],
        );
        tri.area() > DEGENERATE_AREA
    });

    let removed = before - mesh.faces.len();
    if removed > 0 {
        info!("removed {} degenerate triangles", removed);
    }
    removed
}

/// Merge vertices that fall into the same welding grid cell.
///
/// The first vertex to claim a cell becomes canonical; triangle indices
/// are rewritten and triangles that become degenerate are dropped.
/// Returns the number of vertices merged away.
pub fn weld_vertices(mesh: &mut Mesh) -> usize {
    let inv_cell = 1.0 / WELD_EPSILON;

    let mut cells: HashMap<(i64, i64, i64), u32> = HashMap::with_capacity(mesh.vertices.len());
    let mut remap: Vec<u32> = Vec::with_capacity(mesh.vertices.len());
    let mut new_vertices: Vec<Point3<f32>> = Vec::with_capacity(mesh.vertices.len());

    for v in &mesh.vertices {
        let key = (
            (v.x as f64 * inv_cell as f64).floor() as i64,
            (v.y as f64 * inv_cell as f64).floor() as i64,
            (v.z as f64 * inv_cell as f64).floor() as i64,
        );
        let idx = *cells.entry(key).or_insert_with(|| {
            let idx = new_vertices.len() as u32;
            new_vertices.push(*v);
            idx
        });
        remap.push(idx);
    }

    let merged = mesh.vertices.len() - new_vertices.len();
    if merged == 0 {
        return 0;
    }

    info!(
        "welded {} duplicate vertices ({} -> {})",
        merged,
        mesh.vertices.len(),
        new_vertices.len()
    );

    mesh.vertices = new_vertices;
    let mut new_faces = Vec::with_capacity(mesh.faces.len());
    for &[a, b, c] in &mesh.faces {
        let (a, b, c) = (
            remap[a as usize],
            remap[b as usize],
            remap[c as usize],
        );
        if a != b && b != c && a != c {
            new_faces.push([a, b, c]);
        }
    }
    mesh.faces = new_faces;

    merged
}

/// Enforce the manifold edge condition: any undirected edge used by more
/// than two triangles keeps its first two and loses the rest.
///
/// Returns the number of triangles removed.
pub fn make_manifold(mesh: &mut Mesh) -> usize {
    let adjacency = MeshAdjacency::build(&mesh.faces);

    let mut doomed: HashSet<u32> = HashSet::new();
    for faces in adjacency.edge_to_faces.values() {
        if faces.len() > 2 {
            doomed.extend(faces.iter().skip(2).copied());
        }
    }

    if doomed.is_empty() {
        return 0;
    }

    info!("removing {} triangles at non-manifold edges", doomed.len());

    let mut idx = 0u32;
    mesh.faces.retain(|_| {
        let keep = !doomed.contains(&idx);
        idx += 1;
        keep
    });

    doomed.len()
}

/// Fill holes by fan triangulation.
///
/// Boundary half-edges (directed edges with no opposite) are chained into
/// loops by following the reverse-direction successor map; each closed
/// loop of length >= 3 gets a new centroid vertex and a triangle fan.
/// Traces that revisit a foreign vertex or run past 1000 steps are
/// abandoned. Returns the number of holes filled.
pub fn fill_holes(mesh: &mut Mesh) -> usize {
    let adjacency = MeshAdjacency::build(&mesh.faces);

    // successor[to] = from reverses each boundary half-edge, so a trace
    // walks the hole rim in the direction that gives the fan the same
    // winding as the surrounding surface.
    let mut successor: HashMap<u32, u32> = HashMap::new();
    for (from, to) in adjacency.boundary_half_edges() {
        successor.insert(to, from);
    }

    if successor.is_empty() {
        debug!("fill_holes: mesh is already closed");
        return 0;
    }

    let mut visited: HashSet<u32> = HashSet::new();
    let starts: Vec<u32> = successor.keys().copied().collect();
    let mut holes_filled = 0usize;

    for start in starts {
        if visited.contains(&start) {
            continue;
        }

        let mut ring: Vec<u32> = Vec::new();
        let mut current = start;
        let mut closed = false;

        loop {
            if visited.contains(&current) {
                closed = current == start && ring.len() >= 3;
                break;
            }
            visited.insert(current);
            ring.push(current);

            match successor.get(&current) {
                Some(&next) => current = next,
                None => break,
            }

            if ring.len() > MAX_LOOP_STEPS {
                break;
            }
        }

        if !closed {
            continue;
        }

        let centroid: Vector3<f32> = ring
            .iter()
            .map(|&vi| mesh.vertices[vi as usize].coords)
            .fold(Vector3::zeros(), |acc, v| acc + v)
            / ring.len() as f32;

        let centroid_idx = mesh.vertices.len() as u32;
        mesh.vertices.push(Point3::from(centroid));

        for i in 0..ring.len() {
            let v0 = ring[i];
            let v1 = ring[(i + 1) % ring.len()];
            mesh.faces.push([v0, v1, centroid_idx]);
        }

        holes_filled += 1;
    }

    info!("filled {} holes", holes_filled);
    holes_filled
}

/// Make face winding consistent and oriented outward.
///
/// BFS from triangle 0 over edge adjacency flips any neighbor that
/// traverses a shared edge in the same direction as the current face
/// (consistent winding requires opposite directions). Triangles in
/// shells not edge-connected to triangle 0 keep their winding. A final
/// majority vote against the vertex centroid flips the whole mesh if
/// most faces point inward. Returns the number of faces flipped.
pub fn orient_faces(mesh: &mut Mesh) -> usize {
    if mesh.faces.is_empty() {
        return 0;
    }

    let adjacency = MeshAdjacency::build(&mesh.faces);
    let face_count = mesh.faces.len();

    let mut visited = vec![false; face_count];
    let mut flip = vec![false; face_count];
    let mut queue: VecDeque<u32> = VecDeque::new();

    visited[0] = true;
    queue.push_back(0);

    while let Some(face_idx) = queue.pop_front() {
        let face = mesh.faces[face_idx as usize];

        for e in 0..3 {
            let v0 = face[e];
            let v1 = face[(e + 1) % 3];

            let Some(neighbors) = adjacency.edge_to_faces.get(&edge_key(v0, v1)) else {
                continue;
            };

            for &ni in neighbors {
                if ni == face_idx || visited[ni as usize] {
                    continue;
                }
                visited[ni as usize] = true;

                // The edge direction in this face, accounting for a
                // pending flip.
                let (cur_v0, cur_v1) = if flip[face_idx as usize] {
                    (v1, v0)
                } else {
                    (v0, v1)
                };

                let neighbor = mesh.faces[ni as usize];
                let mut same_direction = false;
                for ne in 0..3 {
                    if neighbor[ne] == cur_v0 && neighbor[(ne + 1) % 3] == cur_v1 {
                        same_direction = true;
                        break;
                    }
                }

                if same_direction {
                    flip[ni as usize] = true;
                }
                queue.push_back(ni);
            }
        }
    }

    let mut flipped = 0usize;
    for (face, do_flip) in mesh.faces.iter_mut().zip(flip.iter()) {
        if *do_flip {
            face.swap(1, 2);
            flipped += 1;
        }
    }

    if flipped > 0 {
        info!("flipped {} faces for consistent winding", flipped);
    }

    // Majority vote: if most faces look at the centroid, the whole mesh is
    // inside out.
    let centroid: Vector3<f32> = mesh
        .vertices
        .iter()
        .map(|v| v.coords)
        .fold(Vector3::zeros(), |acc, v| acc + v)
        / mesh.vertices.len() as f32;

    let mut inward = 0usize;
    let mut outward = 0usize;
    for i in 0..mesh.faces.len() {
        let tri = mesh.triangle(i).expect("index in range");
        let to_centroid = centroid - tri.centroid().coords;
        if mesh.face_normal(i).dot(&to_centroid) > 0.0 {
            inward += 1;
        } else {
            outward += 1;
        }
    }

    if inward > outward {
        info!("flipping all {} faces (majority inward)", mesh.faces.len());
        for face in &mut mesh.faces {
            face.swap(1, 2);
        }
        flipped += mesh.faces.len();
    }

    flipped
}

/// Run the full repair sequence: degenerate removal, welding, manifold
/// enforcement, hole filling, and orientation.
pub fn repair_mesh(mesh: &mut Mesh) {
    remove_degenerate(mesh);
    weld_vertices(mesh);
    make_manifold(mesh);
    fill_holes(mesh);
    orient_faces(mesh);

    info!(
        "repair complete: {} vertices, {} triangles, manifold={}, watertight={}",
        mesh.vertex_count(),
        mesh.face_count(),
        mesh.is_manifold(),
        mesh.is_watertight()
    );
}
