//! Global splitting policy and shared bookkeeping for the partition tree.
//!
//! One controller exists per dataset. It hands out never-reused box id
//! ranges, keeps per-depth box counts consistent with the tree shape,
//! owns the optional file backend, and round-trips its own
//! configuration through a flat metadata record.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::backend::{FileBackend, OpenMode};
use crate::errors::{StoreError, StoreResult};

/// Highest supported dimensionality
pub const MAX_DIMS: usize = 20;

/// Per-depth box counts, mutated only by splits and never decremented.
#[derive(Debug, Clone, PartialEq)]
struct DepthStats {
    num_boxes: Vec<u64>,
    num_grid_boxes: Vec<u64>,
}

/// The splitting policy and thread-safe bookkeeping shared by every
/// node of one partition tree.
pub struct SpacePartitionController {
    nd: usize,
    split_threshold: usize,
    max_depth: usize,
    split_into: Vec<usize>,
    /// Per-axis factor override applied only when the depth-0 box
    /// splits. `None` means "use `split_into` everywhere".
    split_top_into: Option<Vec<usize>>,
    /// Upper bound on box count per depth, derived from the factors.
    max_num_boxes: Vec<u64>,
    /// Next unused box id. Ranges are claimed by atomic fetch-add, so
    /// concurrent callers never overlap.
    next_id: AtomicU64,
    stats: RwLock<DepthStats>,
    backend: RwLock<Option<Arc<FileBackend>>>,
}

impl SpacePartitionController {
    /// Creates a controller.
    ///
    /// Fails with a `Config` error when `nd` is out of `1..=20`, when
    /// `split_into` does not have one factor per dimension, or when any
    /// factor is below 2.
    pub fn new(
        nd: usize,
        split_threshold: usize,
        max_depth: usize,
        split_into: Vec<usize>,
    ) -> StoreResult<Self> {
        validate_params(nd, &split_into).map_err(StoreError::Config)?;

        let stats = DepthStats {
            // The depth-0 slot accounts for the root box.
            num_boxes: {
                let mut v = vec![0; max_depth + 1];
                v[0] = 1;
                v
            },
            num_grid_boxes: vec![0; max_depth + 1],
        };
        let mut controller = SpacePartitionController {
            nd,
            split_threshold,
            max_depth,
            split_into,
            split_top_into: None,
            max_num_boxes: Vec::new(),
            next_id: AtomicU64::new(0),
            stats: RwLock::new(stats),
            backend: RwLock::new(None),
        };
        controller.recompute_max_num_boxes();
        Ok(controller)
    }

    /// Sets (or clears) the depth-0 split factor override.
    ///
    /// An empty vector normalizes to "unset", matching how the
    /// serialized form treats an empty and an absent field alike.
    pub fn set_split_top_into(&mut self, split_top_into: Option<Vec<usize>>) -> StoreResult<()> {
        let normalized = match split_top_into {
            Some(v) if v.is_empty() => None,
            other => other,
        };
        if let Some(top) = &normalized {
            validate_params(self.nd, top).map_err(StoreError::Config)?;
        }
        self.split_top_into = normalized;
        self.recompute_max_num_boxes();
        Ok(())
    }

    pub fn nd(&self) -> usize {
        self.nd
    }

    pub fn split_threshold(&self) -> usize {
        self.split_threshold
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn split_into(&self) -> &[usize] {
        &self.split_into
    }

    pub fn split_top_into(&self) -> Option<&[usize]> {
        self.split_top_into.as_deref()
    }

    /// Number of children a non-top split produces.
    pub fn num_split(&self) -> usize {
        self.split_into.iter().product()
    }

    /// Per-axis split factors used when a box at `depth` splits. The
    /// top override applies to the depth-0 box only.
    pub fn split_factor_at(&self, depth: usize) -> &[usize] {
        match (&self.split_top_into, depth) {
            (Some(top), 0) => top,
            _ => &self.split_into,
        }
    }

    /// Number of children a split at `depth` produces.
    pub fn num_split_at(&self, depth: usize) -> usize {
        self.split_factor_at(depth).iter().product()
    }

    /// Claims a contiguous block of `count` previously-unused box ids,
    /// returning the first. Thread-safe; concurrent callers never
    /// receive overlapping ranges.
    pub fn claim_id_range(&self, count: u64) -> u64 {
        self.next_id.fetch_add(count, Ordering::Relaxed)
    }

    /// The next unused box id. Monotonically non-decreasing.
    pub fn max_id(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Records one split of a box at `depth` producing `child_count`
    /// new leaves. Safe under concurrent calls from splitting subtrees.
    pub fn record_split(&self, depth: usize, child_count: usize) -> StoreResult<()> {
        if depth >= self.max_depth {
            return Err(StoreError::IllegalState(format!(
                "split recorded at depth {} but max depth is {}",
                depth, self.max_depth
            )));
        }
        let mut stats = self.stats.write();
        stats.num_grid_boxes[depth] += 1;
        stats.num_boxes[depth + 1] += child_count as u64;
        Ok(())
    }

    /// Leaf-or-interior box count per depth.
    pub fn num_boxes(&self) -> Vec<u64> {
        self.stats.read().num_boxes.clone()
    }

    /// Interior box count per depth.
    pub fn num_grid_boxes(&self) -> Vec<u64> {
        self.stats.read().num_grid_boxes.clone()
    }

    /// Upper bound on the box count per depth under the current factors.
    pub fn max_num_boxes(&self) -> &[u64] {
        &self.max_num_boxes
    }

    // ------------------------------------------------------------------
    // File backend
    // ------------------------------------------------------------------

    /// Attaches a backend and opens `path` in write mode. A previously
    /// attached backend is flushed and closed first.
    pub fn attach_file_backend(
        &self,
        backend: FileBackend,
        path: impl AsRef<Path>,
    ) -> StoreResult<()> {
        let mut guard = self.backend.write();
        if let Some(old) = guard.take() {
            old.close_file()?;
        }
        backend.open_file(path, OpenMode::ReadWrite)?;
        *guard = Some(Arc::new(backend));
        Ok(())
    }

    /// Flushes, closes, and releases the attached backend. Idempotent.
    pub fn detach_file_backend(&self) -> StoreResult<()> {
        if let Some(backend) = self.backend.write().take() {
            backend.close_file()?;
        }
        Ok(())
    }

    /// Handle to the attached backend, if any.
    pub fn backend(&self) -> Option<Arc<FileBackend>> {
        self.backend.read().clone()
    }

    pub fn is_backend_open(&self) -> bool {
        self.backend
            .read()
            .as_ref()
            .map(|b| b.is_open())
            .unwrap_or(false)
    }

    /// Path of the attached backend's file, or an empty string when no
    /// backend is attached.
    pub fn file_name(&self) -> String {
        self.backend
            .read()
            .as_ref()
            .map(|b| b.file_name())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Persisted metadata
    // ------------------------------------------------------------------

    /// Serializes the controller's configuration and statistics to a
    /// flat metadata record. Runtime-only state (the attached backend)
    /// and derived fields (`max_num_boxes`) are excluded.
    pub fn serialize(&self) -> StoreResult<String> {
        let stats = self.stats.read();
        let record = ControllerRecord {
            num_dims: self.nd,
            max_id: self.max_id(),
            split_threshold: self.split_threshold,
            max_depth: self.max_depth,
            split_into: self.split_into.clone(),
            split_top_into: self.split_top_into.clone(),
            num_boxes: stats.num_boxes.clone(),
            num_grid_boxes: stats.num_grid_boxes.clone(),
        };
        serde_json::to_string(&record).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Reconstructs a controller from a metadata record.
    ///
    /// Fails with a `Validation` error on a missing required field, an
    /// out-of-range dimensionality, or malformed split factors. A
    /// present-but-empty `SplitTopInto` reads the same as an absent one.
    pub fn deserialize(record: &str) -> StoreResult<Self> {
        let record: ControllerRecord =
            serde_json::from_str(record).map_err(|e| StoreError::Validation(e.to_string()))?;

        validate_params(record.num_dims, &record.split_into).map_err(StoreError::Validation)?;

        let mut controller = SpacePartitionController::new(
            record.num_dims,
            record.split_threshold,
            record.max_depth,
            record.split_into,
        )?;

        let top = match record.split_top_into {
            Some(v) if v.is_empty() => None,
            other => other,
        };
        if let Some(top) = &top {
            validate_params(record.num_dims, top).map_err(StoreError::Validation)?;
        }
        controller.split_top_into = top;
        controller.recompute_max_num_boxes();

        let depths = record.max_depth + 1;
        if record.num_boxes.len() > depths || record.num_grid_boxes.len() > depths {
            return Err(StoreError::Validation(format!(
                "per-depth statistics longer than max depth {} allows",
                record.max_depth
            )));
        }
        {
            let mut stats = controller.stats.write();
            stats.num_boxes = record.num_boxes;
            stats.num_boxes.resize(depths, 0);
            stats.num_grid_boxes = record.num_grid_boxes;
            stats.num_grid_boxes.resize(depths, 0);
        }
        controller.next_id.store(record.max_id, Ordering::Relaxed);
        Ok(controller)
    }

    fn recompute_max_num_boxes(&mut self) {
        let mut max_num_boxes = vec![1u64; self.max_depth + 1];
        for depth in 1..=self.max_depth {
            max_num_boxes[depth] = max_num_boxes[depth - 1] * self.num_split_at(depth - 1) as u64;
        }
        self.max_num_boxes = max_num_boxes;
    }
}

impl PartialEq for SpacePartitionController {
    /// Equality over configuration, id allocation, and per-depth
    /// statistics. The attached backend and other runtime-only state
    /// are excluded.
    fn eq(&self, other: &Self) -> bool {
        self.nd == other.nd
            && self.max_id() == other.max_id()
            && self.split_threshold == other.split_threshold
            && self.max_depth == other.max_depth
            && self.num_split() == other.num_split()
            && self.split_into == other.split_into
            && self.split_top_into == other.split_top_into
            && self.max_num_boxes == other.max_num_boxes
            && *self.stats.read() == *other.stats.read()
    }
}

impl std::fmt::Debug for SpacePartitionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpacePartitionController")
            .field("nd", &self.nd)
            .field("split_threshold", &self.split_threshold)
            .field("max_depth", &self.max_depth)
            .field("split_into", &self.split_into)
            .field("split_top_into", &self.split_top_into)
            .field("max_id", &self.max_id())
            .finish()
    }
}

fn validate_params(nd: usize, split_into: &[usize]) -> Result<(), String> {
    if nd < 1 || nd > MAX_DIMS {
        return Err(format!("dimensionality {} out of range [1, {}]", nd, MAX_DIMS));
    }
    if split_into.len() != nd {
        return Err(format!(
            "expected {} split factors, got {}",
            nd,
            split_into.len()
        ));
    }
    if let Some(&bad) = split_into.iter().find(|&&f| f < 2) {
        return Err(format!("split factor {} below minimum of 2", bad));
    }
    Ok(())
}

/// The persisted flat record. `SplitTopInto` is omitted when unset;
/// readers accept an absent or an empty list as "unset" for backward
/// file compatibility.
#[derive(Debug, Serialize, Deserialize)]
struct ControllerRecord {
    #[serde(rename = "NumDims")]
    num_dims: usize,
    #[serde(rename = "MaxId")]
    max_id: u64,
    #[serde(rename = "SplitThreshold")]
    split_threshold: usize,
    #[serde(rename = "MaxDepth")]
    max_depth: usize,
    #[serde(rename = "SplitInto")]
    split_into: Vec<usize>,
    #[serde(rename = "SplitTopInto", default, skip_serializing_if = "Option::is_none")]
    split_top_into: Option<Vec<usize>>,
    #[serde(rename = "NumMDBoxes")]
    num_boxes: Vec<u64>,
    #[serde(rename = "NumMDGridBoxes")]
    num_grid_boxes: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::thread;

    fn controller_3d() -> SpacePartitionController {
        SpacePartitionController::new(3, 10, 2, vec![2, 2, 2]).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_parameters() {
        assert!(matches!(
            SpacePartitionController::new(0, 10, 2, vec![]),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            SpacePartitionController::new(21, 10, 2, vec![2; 21]),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            SpacePartitionController::new(3, 10, 2, vec![2, 2]),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            SpacePartitionController::new(3, 10, 2, vec![2, 1, 2]),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_claim_id_range_contiguous() {
        let c = controller_3d();
        assert_eq!(c.claim_id_range(1), 0);
        assert_eq!(c.claim_id_range(8), 1);
        assert_eq!(c.claim_id_range(3), 9);
        assert_eq!(c.max_id(), 12);
    }

    #[test]
    fn test_claim_id_range_concurrent_no_overlap() {
        let c = std::sync::Arc::new(controller_3d());
        let mut handles = vec![];
        for _ in 0..8 {
            let c = c.clone();
            handles.push(thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut claimed = vec![];
                for _ in 0..200 {
                    let count = rng.gen_range(1..=16u64);
                    let first = c.claim_id_range(count);
                    claimed.push((first, count));
                }
                claimed
            }));
        }

        let mut ranges: Vec<(u64, u64)> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        ranges.sort_unstable();

        let total: u64 = ranges.iter().map(|&(_, count)| count).sum();
        assert_eq!(c.max_id(), total);
        for pair in ranges.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0, "overlapping id ranges");
        }
    }

    #[test]
    fn test_split_factor_top_override() {
        let mut c = controller_3d();
        assert_eq!(c.split_factor_at(0), &[2, 2, 2]);

        c.set_split_top_into(Some(vec![4, 4, 4])).unwrap();
        assert_eq!(c.split_factor_at(0), &[4, 4, 4]);
        assert_eq!(c.split_factor_at(1), &[2, 2, 2]);
        assert_eq!(c.num_split_at(0), 64);
        assert_eq!(c.max_num_boxes(), &[1, 64, 512]);

        // Present-but-empty normalizes to unset.
        c.set_split_top_into(Some(vec![])).unwrap();
        assert_eq!(c.split_top_into(), None);
        assert_eq!(c.max_num_boxes(), &[1, 8, 64]);
    }

    #[test]
    fn test_set_split_top_into_validates() {
        let mut c = controller_3d();
        assert!(matches!(
            c.set_split_top_into(Some(vec![4, 4])),
            Err(StoreError::Config(_))
        ));
        assert!(matches!(
            c.set_split_top_into(Some(vec![1, 2, 2])),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn test_record_split_updates_stats() {
        let c = controller_3d();
        c.record_split(0, 8).unwrap();
        c.record_split(1, 8).unwrap();
        c.record_split(1, 8).unwrap();
        assert_eq!(c.num_grid_boxes(), vec![1, 2, 0]);
        assert_eq!(c.num_boxes(), vec![1, 8, 16]);
    }

    #[test]
    fn test_record_split_at_max_depth_fails() {
        let c = controller_3d();
        assert!(matches!(
            c.record_split(2, 8),
            Err(StoreError::IllegalState(_))
        ));
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut c = SpacePartitionController::new(4, 50, 3, vec![2, 3, 2, 4]).unwrap();
        c.set_split_top_into(Some(vec![5, 5, 5, 5])).unwrap();
        c.claim_id_range(1);
        c.claim_id_range(60);
        c.record_split(0, 625).unwrap();
        c.record_split(1, 48).unwrap();

        let restored = SpacePartitionController::deserialize(&c.serialize().unwrap()).unwrap();
        assert_eq!(c, restored);
    }

    #[test]
    fn test_serialize_omits_unset_top_split() {
        let c = controller_3d();
        let record = c.serialize().unwrap();
        assert!(!record.contains("SplitTopInto"));

        let restored = SpacePartitionController::deserialize(&record).unwrap();
        assert_eq!(restored.split_top_into(), None);
        assert_eq!(c, restored);
    }

    #[test]
    fn test_deserialize_treats_empty_top_split_as_unset() {
        let record = r#"{
            "NumDims": 2, "MaxId": 9, "SplitThreshold": 10, "MaxDepth": 1,
            "SplitInto": [2, 2], "SplitTopInto": [],
            "NumMDBoxes": [1, 0], "NumMDGridBoxes": [0, 0]
        }"#;
        let c = SpacePartitionController::deserialize(record).unwrap();
        assert_eq!(c.split_top_into(), None);
        assert_eq!(c.max_id(), 9);
    }

    #[test]
    fn test_deserialize_rejects_bad_metadata() {
        // Dimensionality out of range.
        let bad_nd = r#"{
            "NumDims": 25, "MaxId": 0, "SplitThreshold": 10, "MaxDepth": 1,
            "SplitInto": [2], "NumMDBoxes": [1, 0], "NumMDGridBoxes": [0, 0]
        }"#;
        assert!(matches!(
            SpacePartitionController::deserialize(bad_nd),
            Err(StoreError::Validation(_))
        ));

        // Missing required field.
        let missing = r#"{"NumDims": 2, "MaxId": 0, "MaxDepth": 1, "SplitInto": [2, 2]}"#;
        assert!(matches!(
            SpacePartitionController::deserialize(missing),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_equality_excludes_backend() {
        let a = controller_3d();
        let b = controller_3d();
        assert_eq!(a, b);

        let dir = tempfile::tempdir().unwrap();
        a.attach_file_backend(FileBackend::new(), dir.path().join("events.bin"))
            .unwrap();
        assert_eq!(a, b);
        assert!(a.is_backend_open());
        a.detach_file_backend().unwrap();
        // Detach is idempotent.
        a.detach_file_backend().unwrap();
        assert_eq!(a.file_name(), "");
    }
}
