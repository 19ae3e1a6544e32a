//! # Boxstore - Adaptively-Partitioned Out-of-Core Event Storage
//!
//! This crate stores very large collections of D-dimensional point
//! observations ("events": a position, a signal value, and its squared
//! error) in a recursively split partition tree, paging cold leaves to
//! disk, for later binning, visualization, and clustering.
//!
//! ## Features
//!
//! - **Adaptive Partitioning**: A leaf box splits into a regular grid of
//!   children once it crosses a configurable event threshold, down to a
//!   maximum depth
//! - **Out-of-Core**: Cold leaf buffers are paged to a backing file
//!   through a dirty-aware MRU write cache
//! - **Thread Safe**: Many workers drive private event batches into the
//!   tree concurrently; id allocation and per-depth statistics stay
//!   globally consistent
//! - **Uniform Cell Cursor**: One iterator contract over tree leaves and
//!   dense grids, with vertex/face adjacency where the backing models it
//! - **Persistent Metadata**: The controller's configuration round-trips
//!   through a flat metadata record
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use boxstore::{
//!     BoxTree, Event, Extents, SpacePartitionController, SpatialIterator, BoxTreeIterator,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // 3 dimensions, split past 1000 events, at most 5 levels deep,
//! // 2x2x2 children per split.
//! let controller = Arc::new(SpacePartitionController::new(3, 1000, 5, vec![2, 2, 2])?);
//! let tree = BoxTree::new(controller, Extents::uniform(3, -10.0, 10.0)?)?;
//!
//! tree.add_events(&[Event::new(&[0.5, -2.0, 3.5], 1.0, 1.0)])?;
//! tree.split_all_if_needed(None)?;
//!
//! let mut cells = BoxTreeIterator::new(&tree);
//! while cells.next() {
//!     println!("{:?}: {}", cells.get_center()?, cells.get_signal()?);
//! }
//! # Ok(())
//! # }
//! ```

// Core storage modules
pub mod backend;
pub mod controller;
pub mod errors;
pub mod event;
pub mod extents;
pub mod tree;

// Cell iteration
pub mod iterator;

// Re-export core types
pub use backend::{FileBackend, OpenMode};
pub use controller::{SpacePartitionController, MAX_DIMS};
pub use errors::{StoreError, StoreResult};
pub use event::Event;
pub use extents::{AxisExtent, Extents};
pub use tree::{BoxTree, LeafCell};

// Re-export iterator types
pub use iterator::{
    BoxTreeIterator, DenseGridIterator, NormalizationMode, RegionPredicate, SpatialIterator,
};
