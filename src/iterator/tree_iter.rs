//! Cursor over the leaf cells of a partition tree.

use crate::errors::{StoreError, StoreResult};
use crate::tree::{BoxTree, LeafCell};

use super::{normalize, NormalizationMode, RegionPredicate, SpatialIterator};

/// A cursor over a [`BoxTree`]'s leaf cells, in the tree's stable
/// depth-first order.
///
/// Works on a snapshot of the leaves taken at construction. The tree's
/// leaves carry no dense adjacency structure, so the neighbour queries
/// report `Unsupported`.
pub struct BoxTreeIterator {
    cells: Vec<LeafCell>,
    pos: Option<usize>,
    mode: NormalizationMode,
    predicate: Option<RegionPredicate>,
}

impl BoxTreeIterator {
    /// Snapshots the tree's leaf cells. The cursor starts unpositioned.
    pub fn new(tree: &BoxTree) -> Self {
        BoxTreeIterator {
            cells: tree.leaf_cells(),
            pos: None,
            mode: NormalizationMode::default(),
            predicate: None,
        }
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

    /// Box id of the current cell, for mapping cells back to tree nodes.
    pub fn get_box_id(&self) -> StoreResult<u64> {
        Ok(self.cell()?.box_id)
    }

    fn cell(&self) -> StoreResult<&LeafCell> {
        self.pos
            .and_then(|p| self.cells.get(p))
            .ok_or_else(|| StoreError::IllegalState("iterator is not positioned on a cell".into()))
    }
}

impl SpatialIterator for BoxTreeIterator {
    fn size(&self) -> usize {
        self.cells.len()
    }

    fn valid(&self) -> bool {
        matches!(self.pos, Some(p) if p < self.cells.len())
    }

    fn next(&mut self) -> bool {
        loop {
            let candidate = match self.pos {
                None => 0,
                Some(p) => p + 1,
            };
            if candidate >= self.cells.len() {
                self.pos = Some(self.cells.len());
                return false;
            }
            self.pos = Some(candidate);
            match &self.predicate {
                Some(pred) if !pred(&self.cells[candidate].center) => continue,
                _ => return true,
            }
        }
    }

    fn jump_to(&mut self, index: usize) {
        self.pos = Some(index);
    }

    fn get_center(&self) -> StoreResult<Vec<f64>> {
        Ok(self.cell()?.center.clone())
    }

    fn get_signal(&self) -> StoreResult<f64> {
        Ok(self.cell()?.signal)
    }

    fn get_error(&self) -> StoreResult<f64> {
        Ok(self.cell()?.error_sq.sqrt())
    }

    fn get_normalized_signal(&self) -> StoreResult<f64> {
        let cell = self.cell()?;
        Ok(normalize(cell.signal, self.mode, cell.volume, cell.num_events))
    }

    fn get_normalized_error(&self) -> StoreResult<f64> {
        let cell = self.cell()?;
        Ok(normalize(
            cell.error_sq.sqrt(),
            self.mode,
            cell.volume,
            cell.num_events,
        ))
    }

    fn get_num_events(&self) -> StoreResult<u64> {
        Ok(self.cell()?.num_events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SpacePartitionController;
    use crate::event::Event;
    use crate::extents::Extents;
    use rand::Rng;
    use std::sync::Arc;
    use std::thread;

    fn small_tree() -> BoxTree {
        let controller = Arc::new(SpacePartitionController::new(2, 4, 2, vec![2, 2]).unwrap());
        let tree =
            BoxTree::new(controller, Extents::uniform(2, 0.0, 4.0).unwrap()).unwrap();
        let events: Vec<Event> = vec![
            Event::new(&[0.5, 0.5], 2.0, 4.0),
            Event::new(&[1.5, 0.5], 2.0, 4.0),
            Event::new(&[3.0, 1.0], 1.0, 1.0),
            Event::new(&[1.0, 3.0], 1.0, 1.0),
            Event::new(&[3.0, 3.0], 1.0, 1.0),
        ];
        tree.add_events(&events).unwrap();
        tree.split_all_if_needed(None).unwrap();
        tree
    }

    #[test]
    fn test_access_before_positioning_is_illegal_state() {
        let tree = small_tree();
        let it = BoxTreeIterator::new(&tree);
        assert!(!it.valid());
        assert!(matches!(
            it.get_center(),
            Err(StoreError::IllegalState(_))
        ));
        assert!(matches!(it.get_signal(), Err(StoreError::IllegalState(_))));
    }

    #[test]
    fn test_full_traversal_recovers_all_events() {
        let tree = small_tree();
        let mut it = BoxTreeIterator::new(&tree);
        let mut total = 0;
        let mut cells = 0;
        while it.next() {
            total += it.get_num_events().unwrap();
            cells += 1;
        }
        assert_eq!(total, 5);
        assert_eq!(cells, it.size());
        assert!(!it.valid());
    }

    #[test]
    fn test_region_predicate_skips_cells() {
        let tree = small_tree();
        // Only cells left of x = 2.
        let mut it = BoxTreeIterator::new(&tree).with_region_predicate(|center| center[0] < 2.0);
        while it.next() {
            assert!(it.get_center().unwrap()[0] < 2.0);
        }
    }

    #[test]
    fn test_normalization_modes() {
        let tree = small_tree();

        // First cell: the low quadrant, 2 events of signal 2.0 each in
        // a 2x2 region.
        let mut it = BoxTreeIterator::new(&tree).with_normalization(NormalizationMode::Volume);
        assert!(it.next());
        assert_eq!(it.get_signal().unwrap(), 4.0);
        assert_eq!(it.get_normalized_signal().unwrap(), 1.0);

        let mut it = BoxTreeIterator::new(&tree).with_normalization(NormalizationMode::NumEvents);
        assert!(it.next());
        assert_eq!(it.get_normalized_signal().unwrap(), 2.0);
        // Raw accessors are unaffected by the mode.
        assert_eq!(it.get_signal().unwrap(), 4.0);
        assert_eq!(it.get_error().unwrap(), 8.0_f64.sqrt());
    }

    #[test]
    fn test_jump_to() {
        let tree = small_tree();
        let mut it = BoxTreeIterator::new(&tree);
        it.jump_to(2);
        assert!(it.valid());
        let expected = tree.leaf_cells()[2].box_id;
        assert_eq!(it.get_box_id().unwrap(), expected);
    }

    #[test]
    fn test_adjacency_is_unsupported() {
        let tree = small_tree();
        let mut it = BoxTreeIterator::new(&tree);
        assert!(it.next());
        assert!(matches!(
            it.find_neighbour_indexes(),
            Err(StoreError::Unsupported(_))
        ));
        assert!(matches!(
            it.find_neighbour_indexes_face_touching(),
            Err(StoreError::Unsupported(_))
        ));
    }

    #[test]
    fn test_concurrent_insert_then_iterator_recovers_ten_thousand() {
        let controller = Arc::new(SpacePartitionController::new(3, 10, 2, vec![2, 2, 2]).unwrap());
        let tree = Arc::new(
            BoxTree::new(controller, Extents::uniform(3, 0.0, 1.0).unwrap()).unwrap(),
        );

        let mut handles = vec![];
        for _ in 0..8 {
            let tree = tree.clone();
            handles.push(thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let batch: Vec<Event> = (0..1250)
                    .map(|_| {
                        Event::new(
                            &[
                                rng.gen_range(0.0..1.0),
                                rng.gen_range(0.0..1.0),
                                rng.gen_range(0.0..1.0),
                            ],
                            1.0,
                            1.0,
                        )
                    })
                    .collect();
                tree.add_events(&batch).unwrap();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        tree.split_all_if_needed(None).unwrap();

        let mut it = BoxTreeIterator::new(&tree);
        let mut total = 0;
        while it.next() {
            total += it.get_num_events().unwrap();
        }
        assert_eq!(total, 10_000);
    }
}
