//! The event record: a D-dimensional observation with a signal value
//! and its squared error.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A single point observation.
///
/// Coordinates are stored inline for the common low-dimensional case
/// (up to 3 axes) and spill to the heap above that. The error is kept
/// squared so that aggregation over a cell is a plain sum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub coords: SmallVec<[f64; 3]>,
    pub signal: f64,
    pub error_sq: f64,
}

impl Event {
    /// Creates an event at the given position.
    pub fn new(coords: &[f64], signal: f64, error_sq: f64) -> Self {
        Event {
            coords: SmallVec::from_slice(coords),
            signal,
            error_sq,
        }
    }

    /// Number of dimensions of the position vector.
    pub fn nd(&self) -> usize {
        self.coords.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_new() {
        let ev = Event::new(&[1.0, 2.0, 3.0], 5.0, 2.5);
        assert_eq!(ev.nd(), 3);
        assert_eq!(ev.coords.as_slice(), &[1.0, 2.0, 3.0]);
        assert_eq!(ev.signal, 5.0);
        assert_eq!(ev.error_sq, 2.5);
    }

    #[test]
    fn test_event_high_dimensional() {
        let coords: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let ev = Event::new(&coords, 1.0, 1.0);
        assert_eq!(ev.nd(), 20);
    }
}
