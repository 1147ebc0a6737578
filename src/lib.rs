//! Geometry kernels for 3D scan post-processing.
//!
//! This crate turns raw oriented point clouds from depth sensors into
//! clean, watertight triangle meshes ready for export:
//!
//! - **Filtering**: voxel-grid downsampling and statistical outlier
//!   removal over a shared KD-tree spatial index
//! - **Normals**: PCA estimation with globally propagated orientation
//! - **Registration**: point-to-point ICP with SVD pose solve
//! - **Reconstruction**: marching cubes over a signed distance field
//! - **Simplification**: quadric-error-metric edge collapse
//! - **Repair**: degenerate removal, welding, manifold enforcement, hole
//!   filling, winding correction
//! - **Smoothing**: Laplacian and Taubin
//! - **Export**: STL (binary/ASCII), OBJ, and binary PLY writers
//!
//! # Units and conventions
//!
//! Coordinates are meters (depth sensors report meters; the ICP inlier
//! threshold of 1 cm assumes this). Faces wind counter-clockwise viewed
//! from outside, so normals follow the right-hand rule. Matrices are
//! column-major.
//!
//! # Pipeline example
//!
//! ```
//! use scanforge_core::{
//!     estimate_normals, reconstruct_surface, voxel_downsample,
//!     PointCloud, ReconstructionParams,
//! };
//! use nalgebra::Point3;
//!
//! // A tiny synthetic scan: points on a sphere.
//! let mut cloud = PointCloud::new();
//! for i in 0..200 {
//!     let t = i as f32 * 0.618034 * std::f32::consts::TAU;
//!     let z = 1.0 - 2.0 * (i as f32 + 0.5) / 200.0;
//!     let r = (1.0 - z * z).sqrt();
//!     cloud.push(Point3::new(r * t.cos(), r * t.sin(), z));
//! }
//!
//! let cloud = voxel_downsample(&cloud, 0.05);
//! let normals = estimate_normals(&cloud, 10);
//! let mut mesh = reconstruct_surface(&cloud, &normals, &ReconstructionParams::with_depth(5));
//!
//! scanforge_core::repair_mesh(&mut mesh);
//! assert!(mesh.is_watertight());
//! ```
//!
//! # Concurrency
//!
//! Every kernel is single-threaded and synchronous; nothing here spawns
//! threads or blocks on anything but the exporters' file writes. A
//! [`KdTree`] borrows its cloud read-only, so the borrow checker enforces
//! that the cloud outlives and is not mutated under the index.

mod error;
mod math;
mod tables;
mod types;

pub mod adjacency;
pub mod bridge;
pub mod decimate;
pub mod export;
pub mod filters;
pub mod kdtree;
pub mod normals;
pub mod reconstruct;
pub mod registration;
pub mod repair;
pub mod smooth;

pub use error::{ScanError, ScanResult};
pub use types::{normalize_or_zero, Mesh, PointCloud, Triangle};

pub use adjacency::MeshAdjacency;
pub use decimate::{decimate_mesh, DecimateParams, DecimateResult};
pub use export::{export_obj, export_ply, export_stl_ascii, export_stl_binary};
pub use filters::{remove_statistical_outliers, voxel_downsample};
pub use kdtree::KdTree;
pub use normals::{estimate_normals, orient_normals};
pub use reconstruct::{reconstruct_surface, ReconstructionParams};
pub use registration::{icp_align, IcpParams, IcpResult};
pub use repair::{
    fill_holes, make_manifold, orient_faces, remove_degenerate, repair_mesh, weld_vertices,
};
pub use smooth::{laplacian_smooth, taubin_smooth, TAUBIN_LAMBDA, TAUBIN_MU};

// Convenience methods chaining the kernels off the container types.
impl PointCloud {
    /// Downsample on a voxel grid; see [`voxel_downsample`].
    pub fn downsample(&self, voxel_size: f32) -> PointCloud {
        voxel_downsample(self, voxel_size)
    }

    /// Remove statistical outliers; see [`remove_statistical_outliers`].
    pub fn remove_outliers(&self, k: usize, std_ratio: f32) -> PointCloud {
        remove_statistical_outliers(self, k, std_ratio)
    }

    /// Estimate oriented normals; see [`estimate_normals`].
    pub fn estimate_normals(&self, k: usize) -> Vec<nalgebra::Vector3<f32>> {
        estimate_normals(self, k)
    }

    /// Align this cloud to a target; see [`icp_align`].
    pub fn align_to(&self, target: &PointCloud, params: &IcpParams) -> IcpResult {
        icp_align(self, target, params)
    }
}

impl Mesh {
    /// Decimate to a triangle budget; see [`decimate_mesh`].
    pub fn decimate(&self, params: &DecimateParams) -> DecimateResult {
        decimate_mesh(self, params)
    }

    /// Run the full repair sequence in place; see [`repair_mesh`].
    pub fn repair(&mut self) {
        repair_mesh(self)
    }

    /// Laplacian-smooth in place; see [`laplacian_smooth`].
    pub fn smooth_laplacian(&mut self, iterations: usize, lambda: f32) {
        laplacian_smooth(self, iterations, lambda)
    }

    /// Taubin-smooth in place; see [`taubin_smooth`].
    pub fn smooth_taubin(&mut self, iterations: usize, lambda: f32, mu: f32) {
        taubin_smooth(self, iterations, lambda, mu)
    }
}
