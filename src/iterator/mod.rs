//! Uniform cursor over leaf cells, independent of the backing
//! structure (partition tree or dense grid).
//!
//! Iterators start unpositioned; accessing cell data before the first
//! successful `next`/`jump_to` is an `IllegalState` error, never
//! undefined behavior. A backing that does not model spatial adjacency
//! fails the neighbour queries with an explicit `Unsupported` error
//! instead of returning a silently-wrong empty list.

mod grid_iter;
mod tree_iter;

pub use grid_iter::DenseGridIterator;
pub use tree_iter::BoxTreeIterator;

use crate::errors::{StoreError, StoreResult};

/// Filter restricting iteration to a sub-volume; applied to cell centers.
pub type RegionPredicate = Box<dyn Fn(&[f64]) -> bool + Send>;

/// How signal and error are scaled by the cell accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizationMode {
    /// Raw aggregated values
    #[default]
    None,
    /// Divided by cell volume
    Volume,
    /// Divided by the cell's event count
    NumEvents,
}

/// A cursor over the cells of a spatial structure.
pub trait SpatialIterator {
    /// Number of cells addressable by this cursor.
    fn size(&self) -> usize;

    /// Whether the cursor currently points at a cell.
    fn valid(&self) -> bool;

    /// Advances one cell, skipping cells outside the region predicate
    /// when one is set. Returns `false` only when exhausted.
    fn next(&mut self) -> bool;

    /// Positions the cursor at a linear index. No bounds checking; the
    /// caller is responsible for the index being meaningful.
    fn jump_to(&mut self, index: usize);

    fn get_center(&self) -> StoreResult<Vec<f64>>;
    fn get_signal(&self) -> StoreResult<f64>;
    fn get_error(&self) -> StoreResult<f64>;
    fn get_normalized_signal(&self) -> StoreResult<f64>;
    fn get_normalized_error(&self) -> StoreResult<f64>;
    fn get_num_events(&self) -> StoreResult<u64>;

    /// Linear indices of vertex-adjacent neighbor cells. Symmetric and
    /// irreflexive wherever implemented.
    fn find_neighbour_indexes(&self) -> StoreResult<Vec<usize>> {
        Err(StoreError::Unsupported(
            "spatial adjacency is not modeled by this iterator",
        ))
    }

    /// Linear indices of face-adjacent neighbor cells.
    fn find_neighbour_indexes_face_touching(&self) -> StoreResult<Vec<usize>> {
        Err(StoreError::Unsupported(
            "spatial adjacency is not modeled by this iterator",
        ))
    }
}

/// Applies a normalization mode to an aggregated cell value.
pub(crate) fn normalize(value: f64, mode: NormalizationMode, volume: f64, num_events: u64) -> f64 {
    let divisor = match mode {
        NormalizationMode::None => return value,
        NormalizationMode::Volume => volume,
        NormalizationMode::NumEvents => num_events as f64,
    };
    if divisor == 0.0 {
        0.0
    } else {
        value / divisor
    }
}
