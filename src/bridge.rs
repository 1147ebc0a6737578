//! Flat-array boundary for embedding the kernels in a host runtime.
//!
//! Every function here takes and returns flat `f32` arrays of known
//! layout, so a foreign-function shim only has to marshal buffers:
//!
//! - point arrays are `[x, y, z, ...]`;
//! - oriented point arrays are `[x, y, z, nx, ny, nz, ...]`;
//! - meshes travel as a blob `[vcount, tcount, vertices..., triangles...]`
//!   with triangle indices stored as floats.
//!
//! Index floats are exact for vertex counts up to 2^24; callers must keep
//! meshes below that.

use std::path::Path;

use nalgebra::{Matrix4, Point3, Vector3};
use tracing::warn;

use crate::decimate::{decimate_mesh, DecimateParams};
use crate::export;
use crate::filters;
use crate::normals;
use crate::reconstruct::{reconstruct_surface, ReconstructionParams};
use crate::registration::{icp_align, IcpParams};
use crate::repair::repair_mesh;
use crate::types::{Mesh, PointCloud};

/// Decode `[x, y, z, ...]` into a point cloud. Trailing floats that do
/// not complete a point are ignored.
fn decode_points(data: &[f32]) -> PointCloud {
    let mut cloud = PointCloud::with_capacity(data.len() / 3);
    for p in data.chunks_exact(3) {
        cloud.push_coords(p[0], p[1], p[2]);
    }
    cloud
}

/// Encode a point cloud as `[x, y, z, ...]`.
fn encode_points(cloud: &PointCloud) -> Vec<f32> {
    let mut out = Vec::with_capacity(cloud.len() * 3);
    for p in &cloud.points {
        out.extend_from_slice(&[p.x, p.y, p.z]);
    }
    out
}

/// Decode a mesh blob: `[vcount, tcount, v0.x, v0.y, v0.z, ..., t0.a,
/// t0.b, t0.c, ...]`. Returns an empty mesh if the payload is too short
/// for its own counts.
pub fn decode_mesh_blob(data: &[f32]) -> Mesh {
    if data.len() < 2 {
        return Mesh::new();
    }

    let vcount = data[0] as usize;
    let tcount = data[1] as usize;
    let needed = 2 + vcount * 3 + tcount * 3;
    if data.len() < needed {
        warn!(
            "mesh blob truncated: {} floats, {} needed",
            data.len(),
            needed
        );
        return Mesh::new();
    }

    let mut mesh = Mesh::with_capacity(vcount, tcount);
    let mut offset = 2;
    for _ in 0..vcount {
        mesh.vertices
            .push(Point3::new(data[offset], data[offset + 1], data[offset + 2]));
        offset += 3;
    }
    for _ in 0..tcount {
        mesh.faces.push([
            data[offset] as u32,
            data[offset + 1] as u32,
            data[offset + 2] as u32,
        ]);
        offset += 3;
    }
    mesh
}

/// Encode a mesh as a blob (see [`decode_mesh_blob`] for the layout).
pub fn encode_mesh_blob(mesh: &Mesh) -> Vec<f32> {
    let mut out = Vec::with_capacity(2 + mesh.vertices.len() * 3 + mesh.faces.len() * 3);
    out.push(mesh.vertices.len() as f32);
    out.push(mesh.faces.len() as f32);
    for v in &mesh.vertices {
        out.extend_from_slice(&[v.x, v.y, v.z]);
    }
    for face in &mesh.faces {
        out.extend_from_slice(&[face[0] as f32, face[1] as f32, face[2] as f32]);
    }
    out
}

/// Voxel-grid downsampling over a flat point array.
pub fn voxel_filter(points: &[f32], voxel_size: f32) -> Vec<f32> {
    let cloud = decode_points(points);
    encode_points(&filters::voxel_downsample(&cloud, voxel_size))
}

/// Statistical outlier removal over a flat point array.
pub fn statistical_outlier_removal(points: &[f32], k_neighbors: usize, std_ratio: f32) -> Vec<f32> {
    let cloud = decode_points(points);
    encode_points(&filters::remove_statistical_outliers(
        &cloud, k_neighbors, std_ratio,
    ))
}

/// ICP alignment of two flat point arrays. Returns the 4x4 transform in
/// column-major order.
pub fn icp(source: &[f32], target: &[f32], max_iterations: usize, tolerance: f32) -> [f32; 16] {
    let source = decode_points(source);
    let target = decode_points(target);

    let params = IcpParams::default()
        .with_max_iterations(max_iterations)
        .with_tolerance(tolerance);
    let result = icp_align(&source, &target, &params);

    matrix_to_column_major(&result.transform)
}

/// Estimate oriented normals for a flat point array. Returns interleaved
/// `[x, y, z, nx, ny, nz, ...]`.
pub fn estimate_normals(points: &[f32], k_neighbors: usize) -> Vec<f32> {
    let cloud = decode_points(points);
    let normals = normals::estimate_normals(&cloud, k_neighbors);

    let mut out = Vec::with_capacity(cloud.len() * 6);
    for (p, n) in cloud.points.iter().zip(normals.iter()) {
        out.extend_from_slice(&[p.x, p.y, p.z, n.x, n.y, n.z]);
    }
    out
}

/// Reconstruct a surface from interleaved oriented points
/// `[x, y, z, nx, ny, nz, ...]`. Returns a mesh blob.
pub fn reconstruct(points_with_normals: &[f32], depth: u32) -> Vec<f32> {
    let mut cloud = PointCloud::with_capacity(points_with_normals.len() / 6);
    let mut normals: Vec<Vector3<f32>> = Vec::with_capacity(points_with_normals.len() / 6);
    for chunk in points_with_normals.chunks_exact(6) {
        cloud.push_coords(chunk[0], chunk[1], chunk[2]);
        normals.push(Vector3::new(chunk[3], chunk[4], chunk[5]));
    }

    let mesh = reconstruct_surface(&cloud, &normals, &ReconstructionParams::with_depth(depth));
    encode_mesh_blob(&mesh)
}

/// Decimate a mesh blob to `target_ratio` of its triangles.
pub fn decimate(mesh_blob: &[f32], target_ratio: f32) -> Vec<f32> {
    let mesh = decode_mesh_blob(mesh_blob);
    let target = (mesh.face_count() as f32 * target_ratio) as usize;
    let result = decimate_mesh(&mesh, &DecimateParams::with_target_triangles(target));
    encode_mesh_blob(&result.mesh)
}

/// Run the full repair sequence on a mesh blob.
pub fn repair(mesh_blob: &[f32]) -> Vec<f32> {
    let mut mesh = decode_mesh_blob(mesh_blob);
    repair_mesh(&mut mesh);
    encode_mesh_blob(&mesh)
}

/// Export a mesh blob as binary STL. Returns false on failure.
pub fn export_stl(mesh_blob: &[f32], path: &Path) -> bool {
    let mesh = decode_mesh_blob(mesh_blob);
    export::export_stl_binary(&mesh, path).is_ok()
}

/// Export a mesh blob as OBJ. Returns false on failure.
pub fn export_obj(mesh_blob: &[f32], path: &Path) -> bool {
    let mesh = decode_mesh_blob(mesh_blob);
    export::export_obj(&mesh, path).is_ok()
}

/// Export a mesh blob as binary PLY. Returns false on failure.
pub fn export_ply(mesh_blob: &[f32], path: &Path) -> bool {
    let mesh = decode_mesh_blob(mesh_blob);
    export::export_ply(&mesh, path).is_ok()
}

fn matrix_to_column_major(m: &Matrix4<f32>) -> [f32; 16] {
    let mut out = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            out[col * 4 + row] = m[(row, col)];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mesh_blob_roundtrip() {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Point3::new(0.0, 0.0, 0.0));
        mesh.vertices.push(Point3::new(1.0, 0.0, 0.0));
        mesh.vertices.push(Point3::new(0.0, 1.0, 0.0));
        mesh.faces.push([0, 1, 2]);

        let blob = encode_mesh_blob(&mesh);
        assert_eq!(blob[0], 3.0);
        assert_eq!(blob[1], 1.0);
        assert_eq!(blob.len(), 2 + 9 + 3);

        let decoded = decode_mesh_blob(&blob);
        assert_eq!(decoded.vertex_count(), 3);
        assert_eq!(decoded.face_count(), 1);
        assert_eq!(decoded.faces[0], [0, 1, 2]);
    }

    #[test]
    fn truncated_blob_decodes_empty() {
        assert!(decode_mesh_blob(&[]).is_empty());
        assert!(decode_mesh_blob(&[5.0, 2.0, 1.0]).is_empty());
    }

    #[test]
    fn voxel_filter_over_flat_arrays() {
        let points = [
            0.0, 0.0, 0.0, //
            0.01, 0.0, 0.0, //
            2.0, 2.0, 2.0,
        ];
        let out = voxel_filter(&points, 0.1);
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn icp_identity_over_flat_arrays() {
        let points = [
            0.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, //
            0.0, 0.0, 1.0, //
            1.0, 1.0, 0.5,
        ];
        let transform = icp(&points, &points, 20, 1e-6);

        // Column-major identity.
        for col in 0..4 {
            for row in 0..4 {
                let expected = if row == col { 1.0 } else { 0.0 };
                assert!((transform[col * 4 + row] - expected).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn estimate_normals_interleaves_positions() {
        let mut points = Vec::new();
        for i in 0..5 {
            for j in 0..5 {
                points.extend_from_slice(&[i as f32 * 0.1, j as f32 * 0.1, 0.0]);
            }
        }
        let out = estimate_normals(&points, 8);
        assert_eq!(out.len(), 25 * 6);

        // Positions preserved, normals unit length.
        assert_eq!(out[0], 0.0);
        let n = Vector3::new(out[3], out[4], out[5]);
        assert!((n.norm() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn export_reports_failure_for_bad_path() {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Point3::new(0.0, 0.0, 0.0));
        mesh.vertices.push(Point3::new(1.0, 0.0, 0.0));
        mesh.vertices.push(Point3::new(0.0, 1.0, 0.0));
        mesh.faces.push([0, 1, 2]);
        let blob = encode_mesh_blob(&mesh);

        let bad = Path::new("/no-such-directory/out.stl");
        assert!(!export_stl(&blob, bad));
        assert!(!export_obj(&blob, bad));
        assert!(!export_ply(&blob, bad));
    }

    #[test]
    fn export_writes_file() {
        let mut mesh = Mesh::new();
        mesh.vertices.push(Point3::new(0.0, 0.0, 0.0));
        mesh.vertices.push(Point3::new(1.0, 0.0, 0.0));
        mesh.vertices.push(Point3::new(0.0, 1.0, 0.0));
        mesh.faces.push([0, 1, 2]);
        let blob = encode_mesh_blob(&mesh);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.stl");
        assert!(export_stl(&blob, &path));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 134);
    }
}
