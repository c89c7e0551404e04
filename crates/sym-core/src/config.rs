//! Kernel configuration and region geometry
//!
//! All capacities are fixed at construction. The hash tables mask with
//! `capacity - 1`, so those capacities must be powers of two; validation
//! rejects anything else up front.

use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};
use crate::layout::{
    COMMAND_WORDS, DATA_START_BYTES, GROOVE_BYTES, IDENT_ENTRY_WORDS, NODE_STRIDE,
    REVERSE_BUCKETS, SYMBOL_ENTRY_WORDS, SYNAPSE_WORDS,
};

/// Construction-time kernel parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Node heap capacity (power of two)
    pub node_capacity: u32,
    /// Command ring capacity in commands (power of two)
    pub ring_capacity: u32,
    /// Reclaim ring capacity in entries (power of two)
    pub reclaim_capacity: u32,
    /// Synapse table capacity (power of two)
    pub synapse_capacity: u32,
    /// Pulses per quarter note
    pub ppq: u32,
    /// Structural-edit exclusion window ahead of the playhead, in ticks
    pub safe_zone_ticks: u32,
    /// Initial tempo in milli-BPM
    pub tempo_milli_bpm: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            node_capacity: 1024,
            ring_capacity: 4096,
            reclaim_capacity: 1024,
            synapse_capacity: 65_536,
            ppq: 960,
            safe_zone_ticks: 0,
            tempo_milli_bpm: 120_000,
        }
    }
}

impl KernelConfig {
    /// Identity (and symbol) table capacity: two entries per node slot.
    #[inline]
    pub fn ident_capacity(&self) -> u32 {
        self.node_capacity * 2
    }

    /// Node index where Zone B begins.
    #[inline]
    pub fn zone_split(&self) -> u32 {
        self.node_capacity / 2
    }

    /// Reject capacities the hash masks and stride math cannot support.
    pub fn validate(&self) -> KernelResult<()> {
        fn pow2(name: &'static str, v: u32) -> KernelResult<()> {
            if v == 0 || !v.is_power_of_two() {
                return Err(KernelError::BadConfig { field: name });
            }
            Ok(())
        }

        pow2("node_capacity", self.node_capacity)?;
        pow2("ring_capacity", self.ring_capacity)?;
        pow2("reclaim_capacity", self.reclaim_capacity)?;
        pow2("synapse_capacity", self.synapse_capacity)?;
        if self.node_capacity < 8 {
            return Err(KernelError::BadConfig {
                field: "node_capacity",
            });
        }
        if self.ppq == 0 {
            return Err(KernelError::BadConfig { field: "ppq" });
        }
        Ok(())
    }
}

/// Byte offsets of every segment, computed once from a validated config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionMap {
    pub heap_start: u32,
    pub ident_start: u32,
    pub symbol_start: u32,
    pub groove_start: u32,
    pub ring_start: u32,
    pub reclaim_start: u32,
    pub synapse_start: u32,
    pub reverse_start: u32,
    /// Exact region size in bytes
    pub total_bytes: u32,
}

impl RegionMap {
    pub fn compute(cfg: &KernelConfig) -> Self {
        let heap_start = DATA_START_BYTES;
        let heap_bytes = cfg.node_capacity * NODE_STRIDE;

        let ident_start = heap_start + heap_bytes;
        let ident_bytes = cfg.ident_capacity() * IDENT_ENTRY_WORDS * 4;

        let symbol_start = ident_start + ident_bytes;
        let symbol_bytes = cfg.ident_capacity() * SYMBOL_ENTRY_WORDS * 4;

        let groove_start = symbol_start + symbol_bytes;

        let ring_start = groove_start + GROOVE_BYTES;
        let ring_bytes = cfg.ring_capacity * COMMAND_WORDS * 4;

        let reclaim_start = ring_start + ring_bytes;
        let reclaim_bytes = cfg.reclaim_capacity * 4;

        let synapse_start = reclaim_start + reclaim_bytes;
        let synapse_bytes = cfg.synapse_capacity * SYNAPSE_WORDS * 4;

        let reverse_start = synapse_start + synapse_bytes;
        let reverse_bytes = REVERSE_BUCKETS * 4;

        // Round the total up to a whole number of 64-bit words.
        let total_bytes = (reverse_start + reverse_bytes + 7) & !7;

        Self {
            heap_start,
            ident_start,
            symbol_start,
            groove_start,
            ring_start,
            reclaim_start,
            synapse_start,
            reverse_start,
            total_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let cfg = KernelConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.ident_capacity(), 2048);
        assert_eq!(cfg.zone_split(), 512);
    }

    #[test]
    fn test_non_pow2_rejected() {
        let cfg = KernelConfig {
            node_capacity: 1000,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_map_segments_do_not_overlap() {
        let cfg = KernelConfig::default();
        let map = RegionMap::compute(&cfg);

        assert_eq!(map.heap_start, DATA_START_BYTES);
        assert!(map.ident_start > map.heap_start);
        assert!(map.symbol_start > map.ident_start);
        assert!(map.groove_start > map.symbol_start);
        assert!(map.ring_start > map.groove_start);
        assert!(map.reclaim_start > map.ring_start);
        assert!(map.synapse_start > map.reclaim_start);
        assert!(map.reverse_start > map.synapse_start);
        assert!(map.total_bytes > map.reverse_start);
        assert_eq!(map.total_bytes % 8, 0);
    }

    #[test]
    fn test_map_scales_with_capacity() {
        let small = RegionMap::compute(&KernelConfig {
            node_capacity: 64,
            synapse_capacity: 256,
            ..Default::default()
        });
        let large = RegionMap::compute(&KernelConfig::default());
        assert!(small.total_bytes < large.total_bytes);
    }
}
