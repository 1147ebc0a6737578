//! Rigid point cloud registration via iterative closest point.
//!
//! Each iteration finds nearest-neighbor correspondences against a static
//! KD-tree on the target, rejects outlier pairs against a median-based
//! distance gate, solves for the optimal rigid motion with the Kabsch
//! algorithm (cross-covariance SVD with reflection correction), and
//! accumulates the step into the running pose.

use nalgebra::{Matrix3, Matrix4, Point3, Vector3};
use tracing::{debug, info, warn};

use crate::kdtree::KdTree;
use crate::math::svd3;
use crate::types::PointCloud;

/// Inlier distance for the fitness metric: 1 cm.
const INLIER_THRESHOLD: f32 = 0.01;

/// Parameters for ICP registration.
#[derive(Debug, Clone)]
#[cfg_attr(
    feature = "pipeline-config",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct IcpParams {
    /// Maximum number of iterations.
    pub max_iterations: usize,

    /// Convergence threshold on the change in RMSE between iterations.
    pub tolerance: f32,
}

impl Default for IcpParams {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            tolerance: 1e-6,
        }
    }
}

impl IcpParams {
    /// Set the maximum iteration count.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the RMSE convergence tolerance.
    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// Result of an ICP alignment.
#[derive(Debug, Clone)]
pub struct IcpResult {
    /// Rigid transformation mapping source onto target, as a homogeneous
    /// 4x4 matrix (column-major storage, nalgebra's native layout).
    pub transform: Matrix4<f32>,

    /// Fraction of source points whose final nearest-target distance is
    /// below 1 cm.
    pub fitness: f32,

    /// Root-mean-square error over the retained correspondences of the
    /// last iteration.
    pub rmse: f32,

    /// Number of iterations performed.
    pub iterations: usize,
}

impl IcpResult {
    fn identity() -> Self {
        Self {
            transform: Matrix4::identity(),
            fitness: 0.0,
            rmse: f32::MAX,
            iterations: 0,
        }
    }
}

/// Align a source point cloud to a target point cloud.
///
/// Returns the accumulated rigid transform together with fitness, RMSE,
/// and iteration count. Empty inputs yield the identity result; the
/// iteration breaks early if fewer than 3 correspondence pairs survive
/// outlier rejection.
pub fn icp_align(source: &PointCloud, target: &PointCloud, params: &IcpParams) -> IcpResult {
    let mut result = IcpResult::identity();

    if source.is_empty() || target.is_empty() {
        warn!("icp: empty source or target, returning identity");
        return result;
    }

    let target_tree = KdTree::build(target);

    // Working copy of the source, moved by each accepted step.
    let mut current: Vec<Point3<f32>> = source.points.clone();

    let mut accum_r = Matrix3::<f32>::identity();
    let mut accum_t = Vector3::<f32>::zeros();
    let mut prev_rmse = f32::MAX;

    for iter in 0..params.max_iterations {
        // Nearest-target correspondence per current source point.
        let correspondences: Vec<(usize, f32)> = current
            .iter()
            .map(|p| target_tree.nearest(p).expect("target is non-empty"))
            .collect();

        // Median-based outlier gate, floored at the inlier threshold.
        let mut dists: Vec<f32> = correspondences.iter().map(|c| c.1).collect();
        dists.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = dists[dists.len() / 2];
        let max_corr_dist = (median * 3.0).max(INLIER_THRESHOLD);

        let retained: Vec<(usize, usize)> = correspondences
            .iter()
            .enumerate()
            .filter(|(_, c)| c.1 <= max_corr_dist)
            .map(|(src_idx, c)| (src_idx, c.0))
            .collect();

        if retained.len() < 3 {
            debug!("icp: only {} correspondences survive, stopping", retained.len());
            break;
        }

        let rmse = {
            let sum_sq: f32 = retained
                .iter()
                .map(|&(src_idx, _)| {
                    let d = correspondences[src_idx].1;
                    d * d
                })
                .sum();
            (sum_sq / retained.len() as f32).sqrt()
        };

        if (prev_rmse - rmse).abs() < params.tolerance {
            result.rmse = rmse;
            result.iterations = iter;
            break;
        }

        prev_rmse = rmse;
        result.rmse = rmse;
        result.iterations = iter + 1;

        let (step_r, step_t) = solve_rigid_step(&current, target, &retained);

        // Accumulate: R <- Rs * R, t <- Rs * t + ts.
        accum_r = step_r * accum_r;
        accum_t = step_r * accum_t + step_t;

        for p in &mut current {
            *p = Point3::from(step_r * p.coords + step_t);
        }
    }

    result.transform = Matrix4::identity();
    result
        .transform
        .fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&accum_r);
    result
        .transform
        .fixed_view_mut::<3, 1>(0, 3)
        .copy_from(&accum_t);

    // Final fitness over the moved source.
    let inliers = current
        .iter()
        .filter(|p| {
            target_tree
                .nearest(p)
                .map(|(_, d)| d < INLIER_THRESHOLD)
                .unwrap_or(false)
        })
        .count();
    result.fitness = inliers as f32 / current.len() as f32;

    info!(
        "icp: iterations={}, fitness={:.4}, rmse={:.6}",
        result.iterations, result.fitness, result.rmse
    );

    result
}

/// Solve the optimal rigid motion for the retained correspondence pairs
/// with the Kabsch algorithm.
fn solve_rigid_step(
    current: &[Point3<f32>],
    target: &PointCloud,
    pairs: &[(usize, usize)],
) -> (Matrix3<f32>, Vector3<f32>) {
    let n = pairs.len() as f32;

    let mut src_centroid = Vector3::zeros();
    let mut tgt_centroid = Vector3::zeros();
    for &(si, ti) in pairs {
        src_centroid += current[si].coords;
        tgt_centroid += target.points[ti].coords;
    }
    src_centroid /= n;
    tgt_centroid /= n;

    // Cross-covariance H = sum (s - mu_s)(t - mu_t)^T.
    let mut h = Matrix3::zeros();
    for &(si, ti) in pairs {
        let s = current[si].coords - src_centroid;
        let t = target.points[ti].coords - tgt_centroid;
        h += s * t.transpose();
    }

    let (u, _, mut v) = svd3(&h);
    let mut rotation = v * u.transpose();

    // Kabsch reflection fix: a negative determinant means the best
    // orthogonal map is a reflection; negate V's last column.
    if rotation.determinant() < 0.0 {
        let flipped = -v.column(2);
        v.set_column(2, &flipped);
        rotation = v * u.transpose();
    }

    let translation = tgt_centroid - rotation * src_centroid;
    (rotation, translation)
}
