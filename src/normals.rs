//! PCA-based normal estimation with consistent orientation propagation.
//!
//! For each point the k-nearest neighborhood (including the point itself)
//! defines a scatter matrix whose smallest-eigenvalue eigenvector is the
//! surface normal. Orientation is seeded by flipping every normal away
//! from the cloud centroid, then propagated over the k-NN graph by BFS
//! from the point farthest from the centroid.

use std::collections::VecDeque;

use nalgebra::{Matrix3, Vector3};
use tracing::{debug, info};

use crate::kdtree::KdTree;
use crate::math::sym_eigen3;
use crate::types::PointCloud;

/// Fallback normal for points whose neighborhood is too small or whose
/// scatter matrix is degenerate.
const FALLBACK_NORMAL: Vector3<f32> = Vector3::new(0.0, 1.0, 0.0);

/// Estimate a unit normal for every point of the cloud and orient the
/// result consistently.
///
/// Uses PCA over the `k` nearest neighbors per point. Points with fewer
/// than 3 neighbors receive the fallback normal `(0, 1, 0)`.
pub fn estimate_normals(cloud: &PointCloud, k: usize) -> Vec<Vector3<f32>> {
    let n = cloud.len();
    let mut normals = vec![FALLBACK_NORMAL; n];

    if n < 3 {
        return normals;
    }

    info!("estimating normals: {} points, k={}", n, k);

    let tree = KdTree::build(cloud);
    let k = k.min(n);

    for i in 0..n {
        let neighbors = tree.k_nearest(&cloud.points[i], k);
        if neighbors.len() < 3 {
            continue;
        }

        let centroid: Vector3<f32> = neighbors
            .iter()
            .map(|&(ni, _)| cloud.points[ni].coords)
            .fold(Vector3::zeros(), |acc, v| acc + v)
            / neighbors.len() as f32;

        let mut scatter = Matrix3::zeros();
        for &(ni, _) in &neighbors {
            let d = cloud.points[ni].coords - centroid;
            scatter += d * d.transpose();
        }

        // Normal direction = eigenvector of the smallest eigenvalue.
        let (_, eigenvectors) = sym_eigen3(&scatter);
        let normal: Vector3<f32> = eigenvectors.column(0).into_owned();
        let len = normal.norm();
        if len > 1e-8 {
            normals[i] = normal / len;
        }
    }

    orient_normals(cloud, &mut normals, k);

    debug!("normal estimation complete: {} normals", n);
    normals
}

/// Orient normals consistently across the cloud.
///
/// Seeds each normal to point away from the cloud centroid, then runs BFS
/// over the k-NN graph starting from the point farthest from the centroid,
/// flipping any unvisited neighbor whose normal disagrees with the current
/// one.
///
/// The propagation is locally consistent; on surfaces with handles or thin
/// sheets (where the two sides become k-NN neighbors) global correctness
/// is not guaranteed.
pub fn orient_normals(cloud: &PointCloud, normals: &mut [Vector3<f32>], k: usize) {
    let n = cloud.len();
    if n == 0 || normals.len() != n {
        return;
    }

    let centroid = match cloud.centroid() {
        Some(c) => c,
        None => return,
    };

    // Seed orientation: away from the centroid.
    for (i, normal) in normals.iter_mut().enumerate() {
        let to_point = cloud.points[i] - centroid;
        if normal.dot(&to_point) < 0.0 {
            *normal = -*normal;
        }
    }

    let tree = KdTree::build(cloud);
    let k = k.min(n);

    // The farthest point has the most reliable seed orientation.
    let mut seed = 0;
    let mut max_dist = 0.0f32;
    for (i, p) in cloud.points.iter().enumerate() {
        let d = (p - centroid).norm();
        if d > max_dist {
            max_dist = d;
            seed = i;
        }
    }

    let mut visited = vec![false; n];
    let mut queue = VecDeque::new();
    visited[seed] = true;
    queue.push_back(seed);

    while let Some(idx) = queue.pop_front() {
        let neighbors = tree.k_nearest(&cloud.points[idx], k);
        for &(ni, _) in &neighbors {
            if visited[ni] {
                continue;
            }
            visited[ni] = true;

            if normals[ni].dot(&normals[idx]) < 0.0 {
                normals[ni] = -normals[ni];
            }

            queue.push_back(ni);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;

    fn plane_cloud(n_side: usize, spacing: f32) -> PointCloud {
        let mut cloud = PointCloud::new();
        for i in 0..n_side {
            for j in 0..n_side {
                cloud.push_coords(i as f32 * spacing, j as f32 * spacing, 0.0);
            }
        }
        cloud
    }

    #[test]
    fn plane_normals_align_with_z() {
        let cloud = plane_cloud(10, 0.1);
        let normals = estimate_normals(&cloud, 10);

        assert_eq!(normals.len(), 100);
        for n in &normals {
            assert!((n.norm() - 1.0).abs() < 1e-4);
            assert!(
                n.z.abs() > 0.999,
                "plane normal should be +/-z, got {:?}",
                n
            );
        }
    }

    #[test]
    fn plane_normals_agree_in_sign_after_orientation() {
        let cloud = plane_cloud(10, 0.1);
        let normals = estimate_normals(&cloud, 10);

        let reference = normals[0].z.signum();
        for n in &normals {
            assert_eq!(n.z.signum(), reference, "inconsistent orientation");
        }
    }

    #[test]
    fn tiny_cloud_gets_fallback_normals() {
        let cloud = PointCloud::from_positions(&[
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
        ]);
        let normals = estimate_normals(&cloud, 10);
        assert_eq!(normals.len(), 2);
        for n in &normals {
            assert_eq!(*n, Vector3::new(0.0, 1.0, 0.0));
        }
    }

    #[test]
    fn sphere_normals_point_outward() {
        // Latitude/longitude sampling of a unit sphere.
        let mut cloud = PointCloud::new();
        let rings = 16;
        let segs = 24;
        for i in 1..rings {
            let theta = std::f32::consts::PI * i as f32 / rings as f32;
            for j in 0..segs {
                let phi = 2.0 * std::f32::consts::PI * j as f32 / segs as f32;
                cloud.push_coords(
                    theta.sin() * phi.cos(),
                    theta.sin() * phi.sin(),
                    theta.cos(),
                );
            }
        }

        let normals = estimate_normals(&cloud, 10);
        let mut outward = 0;
        for (p, n) in cloud.points.iter().zip(normals.iter()) {
            if n.dot(&p.coords) > 0.0 {
                outward += 1;
            }
        }
        // Centroid seeding plus BFS should orient essentially everything
        // outward on a closed convex shape.
        assert!(
            outward as f32 > cloud.len() as f32 * 0.95,
            "only {}/{} normals point outward",
            outward,
            cloud.len()
        );
    }
}
