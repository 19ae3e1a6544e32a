//! Arena nodes of the partition tree.
//!
//! Nodes are addressed by arena index rather than pointers; a node is a
//! leaf holding an event buffer until its one-way conversion into an
//! interior node whose children exactly partition its region.

use parking_lot::Mutex;

use crate::event::Event;
use crate::extents::Extents;

/// A node of the partition tree.
pub(crate) struct BoxNode {
    /// Unique id claimed from the controller. Never reused.
    pub id: u64,
    pub depth: usize,
    pub extents: Extents,
    pub kind: NodeKind,
}

pub(crate) enum NodeKind {
    Leaf(Mutex<LeafState>),
    /// Children as arena indexes, in the linear order produced by
    /// [`Extents::subdivide`].
    Interior { children: Vec<usize> },
}

/// Mutable state of a leaf. The per-leaf mutex serializes concurrent
/// appends into the same leaf; different leaves never contend.
#[derive(Default)]
pub(crate) struct LeafState {
    /// Resident events. When `on_disk` is set, events written earlier
    /// live in the file backend under this box's id and only events
    /// appended since the last eviction are resident.
    pub events: Vec<Event>,
    /// Total events in this leaf, resident plus on disk.
    pub num_events: u64,
    pub signal_sum: f64,
    pub error_sq_sum: f64,
    pub on_disk: bool,
}

impl LeafState {
    pub fn from_events(events: Vec<Event>) -> Self {
        let mut state = LeafState::default();
        state.num_events = events.len() as u64;
        for ev in &events {
            state.signal_sum += ev.signal;
            state.error_sq_sum += ev.error_sq;
        }
        state.events = events;
        state
    }

    pub fn push(&mut self, event: Event) {
        self.num_events += 1;
        self.signal_sum += event.signal;
        self.error_sq_sum += event.error_sq;
        self.events.push(event);
    }
}
