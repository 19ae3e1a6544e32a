//! The partition tree: leaf boxes, interior grid boxes, and the
//! split-on-demand algorithm.

mod box_tree;
mod node;

pub use box_tree::{BoxTree, LeafCell};
