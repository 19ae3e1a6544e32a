//! MRU write cache for leaf event buffers.
//!
//! Buffers written through the file backend land here first, flagged
//! dirty, and are committed to the backing file on flush or when the
//! cache evicts them to stay within capacity. Reads served from this
//! cache observe the latest write even before any flush.

use std::collections::{HashMap, VecDeque};

use crate::event::Event;

/// A cached event buffer with its dirty flag
pub struct CachedBuffer {
    pub events: Vec<Event>,
    pub dirty: bool,
}

/// MRU-ordered cache of leaf event buffers, keyed by box id.
///
/// The cache never touches the disk itself; the owning backend decides
/// when an evicted dirty buffer gets written out.
pub struct WriteCache {
    buffers: HashMap<u64, CachedBuffer>,
    /// MRU order (front = oldest, back = newest)
    order: VecDeque<u64>,
    /// Maximum number of buffers to keep resident
    capacity: usize,
}

impl WriteCache {
    pub fn new(capacity: usize) -> Self {
        WriteCache {
            buffers: HashMap::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// Gets a buffer, moving it to the most-recently-used position.
    pub fn get(&mut self, box_id: u64) -> Option<&[Event]> {
        if self.buffers.contains_key(&box_id) {
            self.touch(box_id);
        }
        self.buffers.get(&box_id).map(|c| c.events.as_slice())
    }

    /// Inserts or replaces a buffer.
    pub fn insert(&mut self, box_id: u64, events: Vec<Event>, dirty: bool) {
        if self.buffers.contains_key(&box_id) {
            self.order.retain(|&id| id != box_id);
        }
        self.order.push_back(box_id);
        self.buffers.insert(box_id, CachedBuffer { events, dirty });
    }

    pub fn contains(&self, box_id: u64) -> bool {
        self.buffers.contains_key(&box_id)
    }

    /// Whether the cache has grown past its capacity.
    pub fn needs_eviction(&self) -> bool {
        self.buffers.len() > self.capacity
    }

    /// Removes the least recently used buffer.
    pub fn evict_oldest(&mut self) -> Option<(u64, Vec<Event>, bool)> {
        while let Some(box_id) = self.order.pop_front() {
            if let Some(cached) = self.buffers.remove(&box_id) {
                return Some((box_id, cached.events, cached.dirty));
            }
        }
        None
    }

    /// Removes a specific buffer.
    pub fn remove(&mut self, box_id: u64) -> Option<(Vec<Event>, bool)> {
        self.order.retain(|&id| id != box_id);
        self.buffers.remove(&box_id).map(|c| (c.events, c.dirty))
    }

    /// Ids of all buffers awaiting a disk write.
    pub fn dirty_ids(&self) -> Vec<u64> {
        self.buffers
            .iter()
            .filter(|(_, c)| c.dirty)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Borrows a buffer without changing its MRU position.
    pub fn peek(&self, box_id: u64) -> Option<&[Event]> {
        self.buffers.get(&box_id).map(|c| c.events.as_slice())
    }

    pub fn mark_clean(&mut self, box_id: u64) {
        if let Some(cached) = self.buffers.get_mut(&box_id) {
            cached.dirty = false;
        }
    }

    /// Drops everything, returning the dirty buffers that were resident.
    pub fn clear(&mut self) -> Vec<(u64, Vec<Event>)> {
        self.order.clear();
        self.buffers
            .drain()
            .filter(|(_, c)| c.dirty)
            .map(|(id, c)| (id, c.events))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    fn touch(&mut self, box_id: u64) {
        self.order.retain(|&id| id != box_id);
        self.order.push_back(box_id);
    }
}
