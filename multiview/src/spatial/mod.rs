//! Spatial index for nearest-neighbour queries on interest points.


use std::cmp::Ordering;
use std::collections::BinaryHeap;

use glam::DVec3;

/// A 3D k-d tree built once per point set and queried many times.
///
/// The tree is implicit: `order` holds point indices such that the node of a
/// range `lo..hi` sits at its midpoint and splits the range along `axes[mid]`.
#[derive(Debug)]
pub struct KdTree {
    points: Vec<DVec3>,
    order: Vec<usize>,
    axes: Vec<u8>,
}

/// Heap entry ordered by distance, ties broken by index.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Neighbour {
    dist_sq: f64,
    index: usize,
}

impl Eq for Neighbour {}

impl Ord for Neighbour {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist_sq
            .total_cmp(&other.dist_sq)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for Neighbour {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl KdTree {
    /// Returns `None` for an empty set.
    pub fn build(points: &[DVec3]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }

        let mut order: Vec<usize> = (0..points.len()).collect();
        let mut axes = vec![0u8; points.len()];
        split(points, &mut order, &mut axes);

        Some(Self {
            points: points.to_vec(),
            order,
            axes,
        })
    }

    /// The `k` nearest points to `query` as `(index, distance_squared)`, closest first.
    pub fn k_nearest(&self, query: DVec3, k: usize) -> Vec<(usize, f64)> {
        if k == 0 {
            return Vec::new();
        }

        let mut best = BinaryHeap::with_capacity(k + 1);
        self.search(0, self.order.len(), query, k, &mut best);

        best.into_sorted_vec()
            .into_iter()
            .map(|n| (n.index, n.dist_sq))
            .collect()
    }

    /// Nearest point to `query` as `(index, distance)`.
    pub fn nearest(&self, query: DVec3) -> Option<(usize, f64)> {
        self.k_nearest(query, 1)
            .first()
            .map(|&(index, dist_sq)| (index, dist_sq.sqrt()))
    }

    fn search(&self, lo: usize, hi: usize, query: DVec3, k: usize, best: &mut BinaryHeap<Neighbour>) {
        if lo >= hi {
            return;
        }

        let mid = lo + (hi - lo) / 2;
        let index = self.order[mid];
        let point = self.points[index];

        best.push(Neighbour {
            dist_sq: query.distance_squared(point),
            index,
        });
        if best.len() > k {
            best.pop();
        }

        let axis = self.axes[mid] as usize;
        let delta = query[axis] - point[axis];
        let (near, far) = if delta < 0.0 {
            ((lo, mid), (mid + 1, hi))
        } else {
            ((mid + 1, hi), (lo, mid))
        };

        self.search(near.0, near.1, query, k, best);

        let worst = best.peek().map_or(f64::INFINITY, |n| n.dist_sq);
        if best.len() < k || delta * delta < worst {
            self.search(far.0, far.1, query, k, best);
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Partitions `order` around its median along the axis of largest extent,
/// then recurses into both halves.
fn split(points: &[DVec3], order: &mut [usize], axes: &mut [u8]) {
    if order.len() <= 1 {
        return;
    }

    let axis = widest_axis(points, order);
    let mid = order.len() / 2;
    order.select_nth_unstable_by(mid, |&a, &b| points[a][axis].total_cmp(&points[b][axis]));
    axes[mid] = axis as u8;

    let (left, right) = order.split_at_mut(mid);
    let (left_axes, right_axes) = axes.split_at_mut(mid);
    split(points, left, left_axes);
    split(points, &mut right[1..], &mut right_axes[1..]);
}

fn widest_axis(points: &[DVec3], order: &[usize]) -> usize {
    let (min, max) = order.iter().fold(
        (DVec3::splat(f64::INFINITY), DVec3::splat(f64::NEG_INFINITY)),
        |(min, max), &i| (min.min(points[i]), max.max(points[i])),
    );
    let extent = max - min;

    if extent.x >= extent.y && extent.x >= extent.z {
        0
    } else if extent.y >= extent.z {
        1
    } else {
        2
    }
}
