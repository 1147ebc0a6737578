//! Point cloud cleanup filters: voxel-grid downsampling and statistical
//! outlier removal.

use hashbrown::HashMap;
use nalgebra::{Point3, Vector3};
use tracing::debug;

use crate::kdtree::KdTree;
use crate::types::PointCloud;

/// Downsample a point cloud on a voxel grid.
///
/// Every input point maps to the voxel `floor(p / voxel_size)`
/// (componentwise); each occupied voxel contributes one output point at
/// the centroid of the points it received. Output ordering follows the
/// voxel map's iteration order and is not meaningful.
pub fn voxel_downsample(cloud: &PointCloud, voxel_size: f32) -> PointCloud {
    if cloud.is_empty() || voxel_size <= 0.0 {
        return cloud.clone();
    }

    struct Accum {
        sum: Vector3<f32>,
        count: u32,
    }

    let inv_size = 1.0 / voxel_size;
    let mut voxels: HashMap<(i64, i64, i64), Accum> = HashMap::new();

    for p in &cloud.points {
        let key = (
            (p.x * inv_size).floor() as i64,
            (p.y * inv_size).floor() as i64,
            (p.z * inv_size).floor() as i64,
        );
        let acc = voxels.entry(key).or_insert(Accum {
            sum: Vector3::zeros(),
            count: 0,
        });
        acc.sum += p.coords;
        acc.count += 1;
    }

    let mut result = PointCloud::with_capacity(voxels.len());
    for acc in voxels.values() {
        result.push(Point3::from(acc.sum / acc.count as f32));
    }

    debug!(
        "voxel downsample: {} -> {} points (voxel_size={})",
        cloud.len(),
        result.len(),
        voxel_size
    );

    result
}

/// Remove statistical outliers from a point cloud.
///
/// For each point, the mean distance to its `k` nearest neighbors
/// (excluding itself) is computed; points whose mean distance exceeds
/// `global_mean + std_ratio * std_dev` are dropped. Clouds with fewer
/// than `k + 1` points are returned unchanged.
pub fn remove_statistical_outliers(cloud: &PointCloud, k: usize, std_ratio: f32) -> PointCloud {
    let n = cloud.len();
    if k == 0 || n < k + 1 {
        return cloud.clone();
    }

    let tree = KdTree::build(cloud);

    // Mean k-NN distance per point; the k+1 query absorbs the self hit.
    let mut mean_distances = Vec::with_capacity(n);
    for (i, p) in cloud.points.iter().enumerate() {
        let neighbors = tree.k_nearest(p, k + 1);

        let mut sum = 0.0f32;
        let mut count = 0usize;
        for &(ni, dist) in &neighbors {
            if ni == i {
                continue;
            }
            sum += dist;
            count += 1;
            if count >= k {
                break;
            }
        }
        mean_distances.push(if count > 0 { sum / count as f32 } else { 0.0 });
    }

    let global_mean: f32 = mean_distances.iter().sum::<f32>() / n as f32;
    let variance: f32 = mean_distances
        .iter()
        .map(|d| (d - global_mean) * (d - global_mean))
        .sum::<f32>()
        / n as f32;
    let threshold = global_mean + std_ratio * variance.sqrt();

    let mut result = PointCloud::with_capacity(n);
    for (p, &mean_dist) in cloud.points.iter().zip(mean_distances.iter()) {
        if mean_dist <= threshold {
            result.push(*p);
        }
    }

    debug!(
        "outlier removal: dropped {} of {} points (threshold={:.6})",
        n - result.len(),
        n,
        threshold
    );

    result
}
