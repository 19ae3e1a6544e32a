//! Cursor over a dense regular grid of cells.

use crate::errors::{StoreError, StoreResult};
use crate::extents::Extents;

use super::{normalize, NormalizationMode, RegionPredicate, SpatialIterator};

/// A cursor over a dense D-dimensional grid of aggregated cells.
///
/// Cells are linearized with axis 0 varying fastest, the same
/// convention the partition tree uses for child regions. Unlike the
/// tree-backed cursor this one models spatial adjacency, so the
/// neighbour queries are supported.
pub struct DenseGridIterator {
    extents: Extents,
    shape: Vec<usize>,
    signal: Vec<f64>,
    error_sq: Vec<f64>,
    num_events: Vec<u64>,
    cell_volume: f64,
    pos: Option<usize>,
    mode: NormalizationMode,
    predicate: Option<RegionPredicate>,
}

impl DenseGridIterator {
    /// Creates a cursor over per-cell aggregates.
    ///
    /// `shape` gives the cell count per axis; the data vectors are in
    /// linear order and must each hold exactly `product(shape)` values.
    pub fn new(
        extents: Extents,
        shape: Vec<usize>,
        signal: Vec<f64>,
        error_sq: Vec<f64>,
        num_events: Vec<u64>,
    ) -> StoreResult<Self> {
        if shape.len() != extents.nd() {
            return Err(StoreError::Config(format!(
                "grid shape has {} axes, extents have {}",
                shape.len(),
                extents.nd()
            )));
        }
        if shape.iter().any(|&k| k == 0) {
            return Err(StoreError::Config("grid shape contains a zero axis".into()));
        }
        let cells: usize = shape.iter().product();
        if signal.len() != cells || error_sq.len() != cells || num_events.len() != cells {
            return Err(StoreError::Config(format!(
                "grid data length does not match {} cells",
                cells
            )));
        }
        let cell_volume = extents.volume() / cells as f64;
        Ok(DenseGridIterator {
            extents,
            shape,
            signal,
            error_sq,
            num_events,
            cell_volume,
            pos: None,
            mode: NormalizationMode::default(),
            predicate: None,
        })
    }

    pub fn with_normalization(mut self, mode: NormalizationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Restricts iteration to cells whose center matches the predicate.
    pub fn with_region_predicate(
        mut self,
        predicate: impl Fn(&[f64]) -> bool + Send + 'static,
    ) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }

    fn position(&self) -> StoreResult<usize> {
        self.pos
            .filter(|&p| p < self.signal.len())
            .ok_or_else(|| StoreError::IllegalState("iterator is not positioned on a cell".into()))
    }

    fn decompose(&self, linear: usize) -> Vec<usize> {
        let mut rest = linear;
        self.shape
            .iter()
            .map(|&k| {
                let i = rest % k;
                rest /= k;
                i
            })
            .collect()
    }

    fn center_of(&self, linear: usize) -> Vec<f64> {
        self.decompose(linear)
            .iter()
            .zip(self.extents.axes())
            .zip(&self.shape)
            .map(|((&i, axis), &k)| {
                let step = axis.width() / k as f64;
                axis.min + (i as f64 + 0.5) * step
            })
            .collect()
    }

    /// Linear index of the cell displaced by `offsets`, or `None` when
    /// it falls outside the grid.
    fn offset_index(&self, multi: &[usize], offsets: &[i64]) -> Option<usize> {
        let mut linear = 0;
        let mut stride = 1;
        for ((&i, &off), &k) in multi.iter().zip(offsets).zip(&self.shape) {
            let shifted = i as i64 + off;
            if shifted < 0 || shifted >= k as i64 {
                return None;
            }
            linear += shifted as usize * stride;
            stride *= k;
        }
        Some(linear)
    }
}

impl SpatialIterator for DenseGridIterator {
    fn size(&self) -> usize {
        self.signal.len()
    }

    fn valid(&self) -> bool {
        matches!(self.pos, Some(p) if p < self.signal.len())
    }

    fn next(&mut self) -> bool {
        loop {
            let candidate = match self.pos {
                None => 0,
                Some(p) => p + 1,
            };
            if candidate >= self.signal.len() {
                self.pos = Some(self.signal.len());
                return false;
            }
            self.pos = Some(candidate);
            match &self.predicate {
                Some(pred) if !pred(&self.center_of(candidate)) => continue,
                _ => return true,
            }
        }
    }

    fn jump_to(&mut self, index: usize) {
        self.pos = Some(index);
    }

    fn get_center(&self) -> StoreResult<Vec<f64>> {
        Ok(self.center_of(self.position()?))
    }

    fn get_signal(&self) -> StoreResult<f64> {
        Ok(self.signal[self.position()?])
    }

    fn get_error(&self) -> StoreResult<f64> {
        Ok(self.error_sq[self.position()?].sqrt())
    }

    fn get_normalized_signal(&self) -> StoreResult<f64> {
        let p = self.position()?;
        Ok(normalize(
            self.signal[p],
            self.mode,
            self.cell_volume,
            self.num_events[p],
        ))
    }

    fn get_normalized_error(&self) -> StoreResult<f64> {
        let p = self.position()?;
        Ok(normalize(
            self.error_sq[p].sqrt(),
            self.mode,
            self.cell_volume,
            self.num_events[p],
        ))
    }

    fn get_num_events(&self) -> StoreResult<u64> {
        Ok(self.num_events[self.position()?])
    }

    fn find_neighbour_indexes(&self) -> StoreResult<Vec<usize>> {
        let multi = self.decompose(self.position()?);
        let nd = self.shape.len();
        let mut offsets = vec![-1i64; nd];
        let mut neighbours = Vec::new();
        'walk: loop {
            if offsets.iter().any(|&o| o != 0) {
                if let Some(index) = self.offset_index(&multi, &offsets) {
                    neighbours.push(index);
                }
            }
            let mut axis = 0;
            loop {
                offsets[axis] += 1;
                if offsets[axis] <= 1 {
                    break;
                }
                offsets[axis] = -1;
                axis += 1;
                if axis == nd {
                    break 'walk;
                }
            }
        }
        Ok(neighbours)
    }

    fn find_neighbour_indexes_face_touching(&self) -> StoreResult<Vec<usize>> {
        let multi = self.decompose(self.position()?);
        let nd = self.shape.len();
        let mut neighbours = Vec::new();
        let mut offsets = vec![0i64; nd];
        for axis in 0..nd {
            for step in [-1i64, 1] {
                offsets[axis] = step;
                if let Some(index) = self.offset_index(&multi, &offsets) {
                    neighbours.push(index);
                }
            }
            offsets[axis] = 0;
        }
        Ok(neighbours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 3x3 grid with signal equal to the linear index.
    fn grid_3x3() -> DenseGridIterator {
        let extents = Extents::uniform(2, 0.0, 3.0).unwrap();
        let signal: Vec<f64> = (0..9).map(|i| i as f64).collect();
        let error_sq = vec![1.0; 9];
        let num_events = vec![2u64; 9];
        DenseGridIterator::new(extents, vec![3, 3], signal, error_sq, num_events).unwrap()
    }

    #[test]
    fn test_new_validates_shape_and_lengths() {
        let extents = Extents::uniform(2, 0.0, 1.0).unwrap();
        assert!(matches!(
            DenseGridIterator::new(extents.clone(), vec![3], vec![], vec![], vec![]),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            DenseGridIterator::new(extents, vec![2, 2], vec![0.0; 3], vec![0.0; 4], vec![0; 4]),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_access_before_positioning_is_illegal_state() {
        let it = grid_3x3();
        assert!(matches!(it.get_signal(), Err(StoreError::IllegalState(_))));
    }

    #[test]
    fn test_centers_follow_linear_order() {
        let mut it = grid_3x3();
        assert!(it.next());
        assert_eq!(it.get_center().unwrap(), vec![0.5, 0.5]);
        assert!(it.next());
        // Axis 0 varies fastest.
        assert_eq!(it.get_center().unwrap(), vec![1.5, 0.5]);
        it.jump_to(4);
        assert_eq!(it.get_center().unwrap(), vec![1.5, 1.5]);
    }

    #[test]
    fn test_vertex_neighbours_of_center_and_corner() {
        let mut it = grid_3x3();
        it.jump_to(4);
        let mut around_center = it.find_neighbour_indexes().unwrap();
        around_center.sort_unstable();
        assert_eq!(around_center, vec![0, 1, 2, 3, 5, 6, 7, 8]);

        it.jump_to(0);
        let mut around_corner = it.find_neighbour_indexes().unwrap();
        around_corner.sort_unstable();
        assert_eq!(around_corner, vec![1, 3, 4]);
    }

    #[test]
    fn test_face_neighbours() {
        let mut it = grid_3x3();
        it.jump_to(4);
        let mut faces = it.find_neighbour_indexes_face_touching().unwrap();
        faces.sort_unstable();
        assert_eq!(faces, vec![1, 3, 5, 7]);

        it.jump_to(0);
        let mut faces = it.find_neighbour_indexes_face_touching().unwrap();
        faces.sort_unstable();
        assert_eq!(faces, vec![1, 3]);
    }

    #[test]
    fn test_neighbour_relation_symmetric_and_irreflexive() {
        let mut it = grid_3x3();
        let mut vertex_sets: Vec<Vec<usize>> = Vec::new();
        for i in 0..it.size() {
            it.jump_to(i);
            let neighbours = it.find_neighbour_indexes().unwrap();
            assert!(!neighbours.contains(&i), "cell {} neighbours itself", i);
            vertex_sets.push(neighbours);
        }
        for (i, neighbours) in vertex_sets.iter().enumerate() {
            for &j in neighbours {
                assert!(
                    vertex_sets[j].contains(&i),
                    "neighbour relation not symmetric between {} and {}",
                    i,
                    j
                );
            }
        }
    }

    #[test]
    fn test_normalization_by_volume_and_events() {
        let mut it = grid_3x3().with_normalization(NormalizationMode::Volume);
        it.jump_to(8);
        // Each cell is 1x1, so volume normalization is the identity here.
        assert_eq!(it.get_normalized_signal().unwrap(), 8.0);

        let mut it = grid_3x3().with_normalization(NormalizationMode::NumEvents);
        it.jump_to(8);
        assert_eq!(it.get_normalized_signal().unwrap(), 4.0);
        assert_eq!(it.get_normalized_error().unwrap(), 0.5);
    }

    #[test]
    fn test_region_predicate() {
        let mut it = grid_3x3().with_region_predicate(|center| center[1] < 1.0);
        let mut visited = vec![];
        while it.next() {
            visited.push(it.get_signal().unwrap());
        }
        // Only the bottom row matches.
        assert_eq!(visited, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_one_dimensional_grid() {
        let extents = Extents::uniform(1, 0.0, 4.0).unwrap();
        let mut it = DenseGridIterator::new(
            extents,
            vec![4],
            vec![1.0; 4],
            vec![1.0; 4],
            vec![1; 4],
        )
        .unwrap();
        it.jump_to(1);
        let mut neighbours = it.find_neighbour_indexes().unwrap();
        neighbours.sort_unstable();
        assert_eq!(neighbours, vec![0, 2]);
        assert_eq!(
            it.find_neighbour_indexes_face_touching().unwrap().len(),
            2
        );
    }
}
