//! Laplacian and Taubin mesh smoothing.

use hashbrown::HashSet;
use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::types::Mesh;

/// Default Taubin shrink factor.
pub const TAUBIN_LAMBDA: f32 = 0.5;

/// Default Taubin expand factor.
pub const TAUBIN_MU: f32 = -0.53;

/// Vertex -> adjacent-vertex sets from the face list.
fn vertex_neighbors(mesh: &Mesh) -> Vec<HashSet<u32>> {
    let mut adjacency: Vec<HashSet<u32>> = vec![HashSet::new(); mesh.vertices.len()];
    for &[a, b, c] in &mesh.faces {
        adjacency[a as usize].insert(b);
        adjacency[a as usize].insert(c);
        adjacency[b as usize].insert(a);
        adjacency[b as usize].insert(c);
        adjacency[c as usize].insert(a);
        adjacency[c as usize].insert(b);
    }
    adjacency
}

/// One uniform-weight Laplacian step over prebuilt adjacency. New
/// positions are computed against a snapshot and applied at the end, so
/// the update order cannot bias the result.
fn laplacian_step(mesh: &mut Mesh, adjacency: &[HashSet<u32>], lambda: f32) {
    let mut new_positions: Vec<Point3<f32>> = Vec::with_capacity(mesh.vertices.len());

    for (i, p) in mesh.vertices.iter().enumerate() {
        let neighbors = &adjacency[i];
        if neighbors.is_empty() {
            new_positions.push(*p);
            continue;
        }

        let avg: Vector3<f32> = neighbors
            .iter()
            .map(|&n| mesh.vertices[n as usize].coords)
            .fold(Vector3::zeros(), |acc, v| acc + v)
            / neighbors.len() as f32;

        new_positions.push(p + (avg - p.coords) * lambda);
    }

    mesh.vertices = new_positions;
}

/// Laplacian smoothing: each iteration moves every vertex toward the mean
/// of its neighbors by the factor `lambda`.
///
/// Shrinks the mesh; use [`taubin_smooth`] when volume matters.
pub fn laplacian_smooth(mesh: &mut Mesh, iterations: usize, lambda: f32) {
    if mesh.is_empty() {
        return;
    }

    let adjacency = vertex_neighbors(mesh);
    for _ in 0..iterations {
        laplacian_step(mesh, &adjacency, lambda);
    }

    debug!(
        "laplacian smoothing: {} iterations, lambda={}",
        iterations, lambda
    );
}

/// Taubin smoothing: each iteration runs a shrink step with `lambda`
/// followed by an expand step with `mu < 0`, which smooths without the
/// volume loss of plain Laplacian.
///
/// Common defaults are [`TAUBIN_LAMBDA`] and [`TAUBIN_MU`].
pub fn taubin_smooth(mesh: &mut Mesh, iterations: usize, lambda: f32, mu: f32) {
    if mesh.is_empty() {
        return;
    }

    let adjacency = vertex_neighbors(mesh);
    for _ in 0..iterations {
        laplacian_step(mesh, &adjacency, lambda);
        laplacian_step(mesh, &adjacency, mu);
    }

    debug!(
        "taubin smoothing: {} iterations, lambda={}, mu={}",
        iterations, lambda, mu
    );
}
