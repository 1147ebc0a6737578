//! KD-tree spatial index for nearest-neighbor queries over point clouds.
//!
//! The tree borrows its cloud read-only for its entire lifetime; queries
//! return indices into that cloud, which stay valid as long as the cloud
//! is not mutated. Construction sorts index ranges along the split axis
//! (axis = depth mod 3) and recurses on the halves around the median.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use nalgebra::Point3;

use crate::types::PointCloud;

const NO_CHILD: i32 = -1;

#[derive(Debug, Clone, Copy)]
struct Node {
    point_index: u32,
    left: i32,
    right: i32,
    split_axis: u8,
}

/// A KD-tree over the points of a [`PointCloud`].
#[derive(Debug)]
pub struct KdTree<'a> {
    cloud: &'a PointCloud,
    nodes: Vec<Node>,
}

/// Max-heap entry for k-nearest queries; ordered by distance so the
/// current k-th best is always on top.
#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    distance: f32,
    index: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .partial_cmp(&other.distance)
            .unwrap_or(Ordering::Equal)
    }
}

impl<'a> KdTree<'a> {
    /// Build a KD-tree over all points of the cloud.
    ///
    /// O(n log^2 n) due to the per-level sort; fine at scan sizes.
    pub fn build(cloud: &'a PointCloud) -> Self {
        let mut tree = Self {
            cloud,
            nodes: Vec::with_capacity(cloud.len()),
        };

        if !cloud.is_empty() {
            let mut indices: Vec<u32> = (0..cloud.len() as u32).collect();
            tree.build_recursive(&mut indices, 0);
        }

        tree
    }

    fn build_recursive(&mut self, indices: &mut [u32], depth: usize) -> i32 {
        if indices.is_empty() {
            return NO_CHILD;
        }

        let axis = depth % 3;
        indices.sort_by(|&a, &b| {
            let va = self.cloud.points[a as usize][axis];
            let vb = self.cloud.points[b as usize][axis];
            va.partial_cmp(&vb).unwrap_or(Ordering::Equal)
        });

        let mid = indices.len() / 2;
        let node_idx = self.nodes.len() as i32;
        self.nodes.push(Node {
            point_index: indices[mid],
            left: NO_CHILD,
            right: NO_CHILD,
            split_axis: axis as u8,
        });

        let (left_slice, rest) = indices.split_at_mut(mid);
        let right_slice = &mut rest[1..];

        let left = self.build_recursive(left_slice, depth + 1);
        let right = self.build_recursive(right_slice, depth + 1);
        self.nodes[node_idx as usize].left = left;
        self.nodes[node_idx as usize].right = right;

        node_idx
    }

    /// Find the nearest point to `query` under Euclidean distance.
    ///
    /// Returns `(point_index, distance)`, or `None` if the tree is empty.
    pub fn nearest(&self, query: &Point3<f32>) -> Option<(usize, f32)> {
        if self.nodes.is_empty() {
            return None;
        }

        let mut best_idx = usize::MAX;
        let mut best_dist = f32::MAX;
        self.search_nearest(0, query, &mut best_idx, &mut best_dist);
        Some((best_idx, best_dist))
    }

    fn search_nearest(
        &self,
        node_idx: i32,
        query: &Point3<f32>,
        best_idx: &mut usize,
        best_dist: &mut f32,
    ) {
        if node_idx == NO_CHILD {
            return;
        }

        let node = self.nodes[node_idx as usize];
        let point = self.cloud.points[node.point_index as usize];

        let dist = (query - point).norm();
        if dist < *best_dist {
            *best_dist = dist;
            *best_idx = node.point_index as usize;
        }

        let axis = node.split_axis as usize;
        let diff = query[axis] - point[axis];

        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        self.search_nearest(near, query, best_idx, best_dist);

        // The far side can only improve if the splitting plane is closer
        // than the current best.
        if diff * diff < *best_dist * *best_dist {
            self.search_nearest(far, query, best_idx, best_dist);
        }
    }

    /// Find the k nearest points to `query`, sorted by ascending distance.
    ///
    /// The query point itself is included if it is part of the cloud;
    /// callers that want to exclude it request `k + 1` and skip the
    /// zero-distance hit.
    pub fn k_nearest(&self, query: &Point3<f32>, k: usize) -> Vec<(usize, f32)> {
        if self.nodes.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(k + 1);
        self.search_k_nearest(0, query, k, &mut heap);

        let mut result: Vec<(usize, f32)> = heap
            .into_iter()
            .map(|e| (e.index as usize, e.distance))
            .collect();
        result.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
        result
    }

    fn search_k_nearest(
        &self,
        node_idx: i32,
        query: &Point3<f32>,
        k: usize,
        heap: &mut BinaryHeap<HeapEntry>,
    ) {
        if node_idx == NO_CHILD {
            return;
        }

        let node = self.nodes[node_idx as usize];
        let point = self.cloud.points[node.point_index as usize];
        let dist = (query - point).norm();

        if heap.len() < k {
            heap.push(HeapEntry {
                distance: dist,
                index: node.point_index,
            });
        } else if dist < heap.peek().map(|e| e.distance).unwrap_or(f32::MAX) {
            heap.pop();
            heap.push(HeapEntry {
                distance: dist,
                index: node.point_index,
            });
        }

        let axis = node.split_axis as usize;
        let diff = query[axis] - point[axis];

        let (near, far) = if diff < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        self.search_k_nearest(near, query, k, heap);

        let plane_dist = diff.abs();
        let worst = heap.peek().map(|e| e.distance).unwrap_or(f32::MAX);
        if heap.len() < k || plane_dist < worst {
            self.search_k_nearest(far, query, k, heap);
        }
    }
}
