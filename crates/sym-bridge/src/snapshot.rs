//! Brain snapshots
//!
//! The synapse graph serialized as parallel id arrays: `(source id,
//! target id, weight, jitter)` per edge. The array form is allocation-free
//! on the hot path (caller-owned slices); [`BrainSnapshot`] is the
//! editor-side convenience wrapper with serde derives for project files.

use serde::{Deserialize, Serialize};

/// Caller-owned output slices for a zero-allocation snapshot. All four
/// slices must be at least as long as the expected edge count; shorter
/// slices truncate the snapshot at their common length.
pub struct SnapshotArrays<'a> {
    pub source_ids: &'a mut [u32],
    pub target_ids: &'a mut [u32],
    pub weights: &'a mut [u16],
    pub jitters: &'a mut [u16],
}

impl SnapshotArrays<'_> {
    /// Common capacity of the four slices.
    pub fn capacity(&self) -> usize {
        self.source_ids
            .len()
            .min(self.target_ids.len())
            .min(self.weights.len())
            .min(self.jitters.len())
    }
}

/// Owned snapshot of every live synapse whose endpoints carry source ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrainSnapshot {
    pub source_ids: Vec<u32>,
    pub target_ids: Vec<u32>,
    pub weights: Vec<u16>,
    pub jitters: Vec<u16>,
}

impl BrainSnapshot {
    pub fn len(&self) -> usize {
        self.source_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source_ids.is_empty()
    }

    pub fn push(&mut self, source_id: u32, target_id: u32, weight: u16, jitter: u16) {
        self.source_ids.push(source_id);
        self.target_ids.push(target_id);
        self.weights.push(weight);
        self.jitters.push(jitter);
    }

    /// Edge tuples in a comparison-friendly order.
    pub fn sorted_tuples(&self) -> Vec<(u32, u32, u16, u16)> {
        let mut tuples: Vec<_> = (0..self.len())
            .map(|i| {
                (
                    self.source_ids[i],
                    self.target_ids[i],
                    self.weights[i],
                    self.jitters[i],
                )
            })
            .collect();
        tuples.sort_unstable();
        tuples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrays_capacity_is_min() {
        let mut s = [0u32; 8];
        let mut t = [0u32; 4];
        let mut w = [0u16; 8];
        let mut j = [0u16; 8];
        let out = SnapshotArrays {
            source_ids: &mut s,
            target_ids: &mut t,
            weights: &mut w,
            jitters: &mut j,
        };
        assert_eq!(out.capacity(), 4);
    }

    #[test]
    fn test_snapshot_round_trips_serde() {
        let mut snap = BrainSnapshot::default();
        snap.push(1, 2, 750, 10);
        snap.push(1, 3, 200, 0);

        let json = serde_json::to_string(&snap).unwrap();
        let back: BrainSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.sorted_tuples(), vec![(1, 2, 750, 10), (1, 3, 200, 0)]);
    }
}
