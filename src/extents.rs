//! Axis-aligned extents in D dimensions.
//!
//! An [`Extents`] describes the closed-open region a tree node covers,
//! one `(min, max)` pair per axis. Subdivision produces a regular grid
//! of child regions; child indices are linearized with axis 0 varying
//! fastest, and the same convention is used by the dense-grid iterator.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::errors::{StoreError, StoreResult};

/// The extent of a region along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisExtent {
    pub min: f64,
    pub max: f64,
}

impl AxisExtent {
    pub fn width(&self) -> f64 {
        self.max - self.min
    }
}

/// An axis-aligned D-dimensional region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extents {
    axes: SmallVec<[AxisExtent; 3]>,
}

impl Extents {
    /// Creates extents from `(min, max)` pairs, one per axis.
    ///
    /// Fails with a `Config` error if any axis is empty or inverted.
    pub fn new(axes: &[(f64, f64)]) -> StoreResult<Self> {
        for (d, &(min, max)) in axes.iter().enumerate() {
            if !(min < max) {
                return Err(StoreError::Config(format!(
                    "axis {} has empty or inverted extent [{}, {})",
                    d, min, max
                )));
            }
        }
        Ok(Extents {
            axes: axes
                .iter()
                .map(|&(min, max)| AxisExtent { min, max })
                .collect(),
        })
    }

    /// Creates extents with the same `(min, max)` range on every axis.
    pub fn uniform(nd: usize, min: f64, max: f64) -> StoreResult<Self> {
        Self::new(&vec![(min, max); nd])
    }

    /// Number of dimensions.
    pub fn nd(&self) -> usize {
        self.axes.len()
    }

    /// Per-axis extents.
    pub fn axes(&self) -> &[AxisExtent] {
        &self.axes
    }

    /// Geometric center of the region.
    pub fn center(&self) -> Vec<f64> {
        self.axes
            .iter()
            .map(|a| 0.5 * (a.min + a.max))
            .collect()
    }

    /// Volume of the region (product of axis widths).
    pub fn volume(&self) -> f64 {
        self.axes.iter().map(|a| a.width()).product()
    }

    /// Whether the point lies inside the region. Closed at the lower
    /// edges and at the overall upper edges.
    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.nd()
            && self
                .axes
                .iter()
                .zip(point)
                .all(|(a, &x)| x >= a.min && x <= a.max)
    }

    /// Subdivides the region into a regular grid with the given per-axis
    /// factor, returning one child region per grid cell.
    ///
    /// Children are produced in linear order with axis 0 varying fastest,
    /// matching [`child_index_of`](Extents::child_index_of). The children
    /// exactly and disjointly partition this region.
    pub fn subdivide(&self, factors: &[usize]) -> Vec<Extents> {
        debug_assert_eq!(factors.len(), self.nd());
        let num_split: usize = factors.iter().product();
        let mut children = Vec::with_capacity(num_split);
        for linear in 0..num_split {
            let mut rest = linear;
            let mut axes = SmallVec::with_capacity(self.nd());
            for (a, &k) in self.axes.iter().zip(factors) {
                let i = rest % k;
                rest /= k;
                let step = a.width() / k as f64;
                // Last cell closes exactly on the parent's upper edge.
                let max = if i + 1 == k {
                    a.max
                } else {
                    a.min + (i + 1) as f64 * step
                };
                axes.push(AxisExtent {
                    min: a.min + i as f64 * step,
                    max,
                });
            }
            children.push(Extents { axes });
        }
        children
    }

    /// Linear index of the child cell owning the given point under the
    /// per-axis factors used by [`subdivide`](Extents::subdivide).
    ///
    /// Cells are closed-open along every axis except the last cell,
    /// which is closed at both ends, so every in-region point lands in
    /// exactly one child. Out-of-region coordinates clamp to the edge
    /// cells.
    pub fn child_index_of(&self, point: &[f64], factors: &[usize]) -> usize {
        let mut index = 0;
        let mut stride = 1;
        for ((a, &k), &x) in self.axes.iter().zip(factors).zip(point) {
            let step = a.width() / k as f64;
            let i = (((x - a.min) / step).floor() as i64).clamp(0, k as i64 - 1) as usize;
            index += i * stride;
            stride *= k;
        }
        index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extents_rejects_inverted_axis() {
        assert!(Extents::new(&[(0.0, 1.0), (5.0, 5.0)]).is_err());
        assert!(Extents::new(&[(2.0, 1.0)]).is_err());
    }

    #[test]
    fn test_center_and_volume() {
        let ext = Extents::new(&[(0.0, 2.0), (0.0, 4.0)]).unwrap();
        assert_eq!(ext.center(), vec![1.0, 2.0]);
        assert_eq!(ext.volume(), 8.0);
    }

    #[test]
    fn test_subdivide_partitions_exactly() {
        let ext = Extents::new(&[(0.0, 10.0), (0.0, 10.0)]).unwrap();
        let children = ext.subdivide(&[2, 5]);
        assert_eq!(children.len(), 10);

        let total: f64 = children.iter().map(|c| c.volume()).sum();
        assert!((total - ext.volume()).abs() < 1e-9);

        // Last cell along each axis closes on the parent's upper edge.
        let last = children.last().unwrap();
        assert_eq!(last.axes()[0].max, 10.0);
        assert_eq!(last.axes()[1].max, 10.0);
    }

    #[test]
    fn test_child_index_axis_zero_fastest() {
        let ext = Extents::new(&[(0.0, 2.0), (0.0, 2.0)]).unwrap();
        // 2x2 grid: cell (1, 0) has linear index 1, cell (0, 1) index 2.
        assert_eq!(ext.child_index_of(&[1.5, 0.5], &[2, 2]), 1);
        assert_eq!(ext.child_index_of(&[0.5, 1.5], &[2, 2]), 2);
        assert_eq!(ext.child_index_of(&[1.5, 1.5], &[2, 2]), 3);
    }

    #[test]
    fn test_child_index_upper_edge_closed() {
        let ext = Extents::new(&[(0.0, 2.0)]).unwrap();
        // A point exactly on the upper edge belongs to the last cell.
        assert_eq!(ext.child_index_of(&[2.0], &[2]), 1);
        // An interior boundary belongs to the cell above it (closed-open).
        assert_eq!(ext.child_index_of(&[1.0], &[2]), 1);
        assert_eq!(ext.child_index_of(&[0.0], &[2]), 0);
    }

    #[test]
    fn test_child_index_matches_subdivide_membership() {
        let ext = Extents::new(&[(-5.0, 5.0), (0.0, 1.0), (0.0, 30.0)]).unwrap();
        let factors = [3, 2, 4];
        let children = ext.subdivide(&factors);
        let point = [4.9, 0.5, 29.0];
        let idx = ext.child_index_of(&point, &factors);
        assert!(children[idx].contains(&point));
    }
}
