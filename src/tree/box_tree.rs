//! The adaptively-partitioned event tree.
//!
//! Bulk insertion appends events to leaves under a shared arena read
//! lock, one private mutex per leaf; splitting runs separately under
//! the arena write lock so a batch never races a structural change.
//! Deferring splits to [`split_all_if_needed`](BoxTree::split_all_if_needed)
//! bounds re-split churn while many workers drive batches concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::controller::SpacePartitionController;
use crate::errors::{StoreError, StoreResult};
use crate::event::Event;
use crate::extents::Extents;

use super::node::{BoxNode, LeafState, NodeKind};

/// Arena index of the root node
const ROOT: usize = 0;

struct Arena {
    nodes: Vec<BoxNode>,
    by_id: HashMap<u64, usize>,
}

impl Arena {
    fn push(&mut self, node: BoxNode) -> usize {
        let index = self.nodes.len();
        self.by_id.insert(node.id, index);
        self.nodes.push(node);
        index
    }
}

/// Snapshot of one leaf cell, consumed by the tree iterator.
#[derive(Debug, Clone)]
pub struct LeafCell {
    pub box_id: u64,
    pub center: Vec<f64>,
    pub volume: f64,
    pub signal: f64,
    pub error_sq: f64,
    pub num_events: u64,
}

/// A partition tree of event boxes rooted in a single region.
pub struct BoxTree {
    controller: Arc<SpacePartitionController>,
    arena: RwLock<Arena>,
}

impl BoxTree {
    /// Creates a tree whose root leaf covers `extents`, claiming the
    /// root's id from the controller.
    pub fn new(
        controller: Arc<SpacePartitionController>,
        extents: Extents,
    ) -> StoreResult<Self> {
        if extents.nd() != controller.nd() {
            return Err(StoreError::Config(format!(
                "extents have {} dimensions, controller expects {}",
                extents.nd(),
                controller.nd()
            )));
        }
        let root_id = controller.claim_id_range(1);
        let root = BoxNode {
            id: root_id,
            depth: 0,
            extents,
            kind: NodeKind::Leaf(parking_lot::Mutex::new(LeafState::default())),
        };
        let mut arena = Arena {
            nodes: Vec::new(),
            by_id: HashMap::new(),
        };
        arena.push(root);
        Ok(BoxTree {
            controller,
            arena: RwLock::new(arena),
        })
    }

    pub fn controller(&self) -> &Arc<SpacePartitionController> {
        &self.controller
    }

    /// Extents of the root region.
    pub fn extents(&self) -> Extents {
        self.arena.read().nodes[ROOT].extents.clone()
    }

    /// Appends a batch of events, each to the leaf owning its
    /// coordinates. Within one calling thread events land in
    /// submission order; concurrent appends to the same leaf are
    /// serialized by that leaf's lock. Splitting is deferred until
    /// [`split_all_if_needed`](BoxTree::split_all_if_needed).
    ///
    /// Returns the number of events appended. A dimensionality mismatch
    /// is an `IllegalState` error; events before the offending one stay
    /// appended.
    pub fn add_events(&self, events: &[Event]) -> StoreResult<usize> {
        let nd = self.controller.nd();
        let arena = self.arena.read();
        for event in events {
            if event.nd() != nd {
                return Err(StoreError::IllegalState(format!(
                    "event has {} coordinates, tree expects {}",
                    event.nd(),
                    nd
                )));
            }
            let mut index = ROOT;
            loop {
                let node = &arena.nodes[index];
                match &node.kind {
                    NodeKind::Interior { children } => {
                        let factors = self.controller.split_factor_at(node.depth);
                        let child = node.extents.child_index_of(&event.coords, factors);
                        index = children[child];
                    }
                    NodeKind::Leaf(state) => {
                        state.lock().push(event.clone());
                        break;
                    }
                }
            }
        }
        Ok(events.len())
    }

    /// Splits every leaf that crossed the split threshold, recursing
    /// into over-full children, bounded by the controller's max depth.
    /// Leaves at max depth stay over-full; that is expected.
    ///
    /// Cancellation is checked between per-box units; a split that has
    /// started always completes, so the tree stays structurally valid
    /// even when this returns `Cancelled`.
    pub fn split_all_if_needed(&self, cancel: Option<&AtomicBool>) -> StoreResult<()> {
        let threshold = self.controller.split_threshold() as u64;
        let max_depth = self.controller.max_depth();
        let mut arena = self.arena.write();

        let mut stack = vec![ROOT];
        while let Some(index) = stack.pop() {
            if let Some(flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    return Err(StoreError::Cancelled);
                }
            }
            let over_threshold = {
                let node = &mut arena.nodes[index];
                match &mut node.kind {
                    NodeKind::Interior { children } => {
                        stack.extend(children.iter().copied());
                        false
                    }
                    NodeKind::Leaf(state) => {
                        node.depth < max_depth && state.get_mut().num_events > threshold
                    }
                }
            };
            if over_threshold {
                let children = self.split_leaf(&mut arena, index)?;
                stack.extend(children);
            }
        }
        Ok(())
    }

    /// Converts the leaf at `index` into an interior node, distributing
    /// its events over freshly-created children. One-way.
    fn split_leaf(&self, arena: &mut Arena, index: usize) -> StoreResult<Vec<usize>> {
        let depth = arena.nodes[index].depth;
        let box_id = arena.nodes[index].id;
        let factors = self.controller.split_factor_at(depth).to_vec();
        let num_split: usize = factors.iter().product();
        if num_split == 0 {
            // Silently skipping would desynchronize the controller's
            // statistics from the real tree shape.
            return Err(StoreError::IllegalState(format!(
                "box {} computed a zero split factor",
                box_id
            )));
        }

        let first_id = self.controller.claim_id_range(num_split as u64);

        let (resident, on_disk) = match &mut arena.nodes[index].kind {
            NodeKind::Leaf(state) => {
                let state = state.get_mut();
                (std::mem::take(&mut state.events), state.on_disk)
            }
            NodeKind::Interior { .. } => {
                return Err(StoreError::IllegalState(format!(
                    "box {} is already split",
                    box_id
                )))
            }
        };
        let events = if on_disk {
            let backend = self.controller.backend().ok_or_else(|| {
                StoreError::IllegalState(format!(
                    "box {} is file-backed but no backend is attached",
                    box_id
                ))
            })?;
            let mut all = backend.read(box_id)?;
            all.extend(resident);
            all
        } else {
            resident
        };

        let parent_extents = arena.nodes[index].extents.clone();
        let mut buckets: Vec<Vec<Event>> = (0..num_split).map(|_| Vec::new()).collect();
        for event in events {
            let child = parent_extents.child_index_of(&event.coords, &factors);
            buckets[child].push(event);
        }

        let mut children = Vec::with_capacity(num_split);
        for (offset, (sub_extents, bucket)) in parent_extents
            .subdivide(&factors)
            .into_iter()
            .zip(buckets)
            .enumerate()
        {
            let child = arena.push(BoxNode {
                id: first_id + offset as u64,
                depth: depth + 1,
                extents: sub_extents,
                kind: NodeKind::Leaf(parking_lot::Mutex::new(LeafState::from_events(bucket))),
            });
            children.push(child);
        }
        arena.nodes[index].kind = NodeKind::Interior {
            children: children.clone(),
        };
        self.controller.record_split(depth, num_split)?;
        log::debug!(
            "split box {} at depth {} into {} children (ids {}..{})",
            box_id,
            depth,
            num_split,
            first_id,
            first_id + num_split as u64
        );
        Ok(children)
    }

    /// Pages one leaf's events out through the attached backend and
    /// drops the resident copy. Splits cannot race this: they hold the
    /// arena write lock, eviction holds a read lock plus the leaf lock.
    pub fn evict_leaf(&self, box_id: u64) -> StoreResult<()> {
        let backend = self.controller.backend().ok_or_else(|| {
            StoreError::IllegalState("cannot evict without an attached file backend".into())
        })?;
        let arena = self.arena.read();
        let &index = arena.by_id.get(&box_id).ok_or_else(|| {
            StoreError::IllegalState(format!("box {} is not in this tree", box_id))
        })?;
        let state = match &arena.nodes[index].kind {
            NodeKind::Leaf(state) => state,
            NodeKind::Interior { .. } => {
                return Err(StoreError::IllegalState(format!(
                    "box {} is an interior node and holds no events",
                    box_id
                )))
            }
        };

        let mut state = state.lock();
        if state.events.is_empty() && state.on_disk {
            return Ok(());
        }
        let full = if state.on_disk {
            let mut all = backend.read(box_id)?;
            all.extend(state.events.iter().cloned());
            all
        } else {
            state.events.clone()
        };
        backend.write(box_id, full)?;
        state.events.clear();
        state.events.shrink_to_fit();
        state.on_disk = true;
        Ok(())
    }

    /// One leaf's events, resident or fetched back through the backend.
    pub fn events_in(&self, box_id: u64) -> StoreResult<Vec<Event>> {
        let arena = self.arena.read();
        let &index = arena.by_id.get(&box_id).ok_or_else(|| {
            StoreError::IllegalState(format!("box {} is not in this tree", box_id))
        })?;
        let state = match &arena.nodes[index].kind {
            NodeKind::Leaf(state) => state,
            NodeKind::Interior { .. } => {
                return Err(StoreError::IllegalState(format!(
                    "box {} is an interior node and holds no events",
                    box_id
                )))
            }
        };
        let state = state.lock();
        if state.on_disk {
            let backend = self.controller.backend().ok_or_else(|| {
                StoreError::IllegalState(format!(
                    "box {} is file-backed but no backend is attached",
                    box_id
                ))
            })?;
            let mut all = backend.read(box_id)?;
            all.extend(state.events.iter().cloned());
            Ok(all)
        } else {
            Ok(state.events.clone())
        }
    }

    /// Total event count over the whole tree.
    pub fn total_events(&self) -> u64 {
        self.fold_leaves(0u64, |acc, state| acc + state.num_events)
    }

    /// Total signal over the whole tree.
    pub fn total_signal(&self) -> f64 {
        self.fold_leaves(0.0, |acc, state| acc + state.signal_sum)
    }

    /// Total squared error over the whole tree.
    pub fn total_error_sq(&self) -> f64 {
        self.fold_leaves(0.0, |acc, state| acc + state.error_sq_sum)
    }

    /// Number of leaf boxes.
    pub fn leaf_count(&self) -> usize {
        self.fold_leaves(0usize, |acc, _| acc + 1)
    }

    /// Depth-first snapshot of every leaf cell, in a stable order.
    pub fn leaf_cells(&self) -> Vec<LeafCell> {
        let arena = self.arena.read();
        let mut cells = Vec::new();
        let mut stack = vec![ROOT];
        while let Some(index) = stack.pop() {
            let node = &arena.nodes[index];
            match &node.kind {
                NodeKind::Interior { children } => {
                    stack.extend(children.iter().rev().copied());
                }
                NodeKind::Leaf(state) => {
                    let state = state.lock();
                    cells.push(LeafCell {
                        box_id: node.id,
                        center: node.extents.center(),
                        volume: node.extents.volume(),
                        signal: state.signal_sum,
                        error_sq: state.error_sq_sum,
                        num_events: state.num_events,
                    });
                }
            }
        }
        cells
    }

    fn fold_leaves<T>(&self, init: T, mut fold: impl FnMut(T, &LeafState) -> T) -> T {
        let arena = self.arena.read();
        let mut acc = init;
        let mut stack = vec![ROOT];
        while let Some(index) = stack.pop() {
            match &arena.nodes[index].kind {
                NodeKind::Interior { children } => stack.extend(children.iter().copied()),
                NodeKind::Leaf(state) => acc = fold(acc, &*state.lock()),
            }
        }
        acc
    }
}
