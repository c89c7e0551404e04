//! Synapse graph
//!
//! Directed, weighted edges between chain nodes, stored in a linear-probe
//! table keyed on the source node's byte offset. The first probe hit for a
//! source is that source's chain head; overflow entries land in further
//! empty slots and are chained through the 24-bit next field packed with
//! the plasticity byte. Every entry also belongs to its target's
//! reverse-index bucket (256 buckets, chained via `next_same_target`), so
//! incoming edges of a deleted node are findable without a table sweep.
//!
//! Tombstoning keeps `source_ptr` intact (probe chains stay walkable) but
//! unlinks the entry from its reverse bucket. Compaction rebuilds the
//! table once tombstones dominate.

use std::sync::atomic::{AtomicU32, Ordering};

use sym_core::error::{KernelError, KernelResult};
use sym_core::layout::{REVERSE_BUCKETS, SYNAPSE_WORDS, header, synapse};
use sym_core::mix::knuth_slot;
use sym_core::packed::{self, pack_syn_meta, pack_weight_jitter, syn_meta_next};

use crate::region::Region;

/// Walk cap for per-source and per-bucket chains.
pub const CHAIN_STEP_CAP: u32 = 1000;

/// Compaction thresholds: at least this many occupied slots, and more
/// tombstones than live entries.
const COMPACT_MIN_USED: u32 = 100;

/// Maximum stored weight (scaled probability, parts-per-thousand).
pub const WEIGHT_MAX: u16 = 1000;

/// Staging record used by compaction and snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynapseRecord {
    pub source_ptr: u32,
    pub target_ptr: u32,
    pub weight: u16,
    pub jitter: u16,
    pub plasticity: u8,
}

/// Occupancy counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynapseStats {
    pub capacity: u32,
    pub used_slots: u32,
    pub tombstones: u32,
    pub live: u32,
}

impl Region {
    #[inline]
    fn syn_word(&self, slot: u32, field: u32) -> &AtomicU32 {
        self.byte_word(self.map().synapse_start + slot * SYNAPSE_WORDS * 4 + field * 4)
    }

    #[inline]
    fn rev_bucket_word(&self, bucket: u32) -> &AtomicU32 {
        self.byte_word(self.map().reverse_start + bucket * 4)
    }

    #[inline]
    fn rev_bucket_of(&self, target_ptr: u32) -> u32 {
        knuth_slot(target_ptr, REVERSE_BUCKETS - 1)
    }

    // --- public operations (chain-mutex domain) ---

    /// Create an edge. A second `connect` for an existing (src, tgt) pair
    /// creates an independent duplicate entry. Returns the slot index.
    pub fn syn_connect(&self, src: u32, tgt: u32, weight: u16, jitter: u16) -> KernelResult<u32> {
        self.check_node_ptr(src)?;
        self.check_node_ptr(tgt)?;
        self.syn_insert(src, tgt, pack_weight_jitter(weight.min(WEIGHT_MAX), jitter), 0)
    }

    /// Tombstone the first edge src -> tgt, or every live edge from src
    /// when `tgt` is `None`. Returns how many edges were tombstoned.
    pub fn syn_disconnect(&self, src: u32, tgt: Option<u32>) -> KernelResult<u32> {
        let Some(head) = self.syn_find_head(src) else {
            return Ok(0);
        };

        let mut count = 0;
        let mut slot = head;
        for _ in 0..CHAIN_STEP_CAP {
            let target = self.syn_word(slot, synapse::TARGET).load(Ordering::Acquire);
            let matches = target != 0 && tgt.is_none_or(|t| t == target);
            if matches {
                self.syn_tombstone(slot, target);
                count += 1;
                if tgt.is_some() {
                    return Ok(count);
                }
            }
            let next = syn_meta_next(self.syn_word(slot, synapse::META).load(Ordering::Acquire));
            if next == 0 {
                return Ok(count);
            }
            slot = next - 1;
        }
        Err(KernelError::ChainLoop)
    }

    /// Tombstone everything touching a node: outgoing edges via its probe
    /// chain, incoming edges via its reverse bucket.
    pub fn syn_tombstone_all_for_node(&self, ptr: u32) -> KernelResult<()> {
        self.syn_disconnect(ptr, None)?;

        let bucket = self.rev_bucket_of(ptr);
        let bucket_word = self.rev_bucket_word(bucket);
        let mut prev: Option<u32> = None;
        let mut cur = bucket_word.load(Ordering::Acquire);
        for _ in 0..CHAIN_STEP_CAP {
            if cur == 0 {
                return Ok(());
            }
            let slot = cur - 1;
            let next = self.syn_word(slot, synapse::NEXT_TARGET).load(Ordering::Acquire);
            let target = self.syn_word(slot, synapse::TARGET).load(Ordering::Acquire);
            if target == ptr {
                // Unlink from the bucket, then mark dead.
                match prev {
                    Some(p) => self.syn_word(p, synapse::NEXT_TARGET).store(next, Ordering::Release),
                    None => bucket_word.store(next, Ordering::Release),
                }
                self.syn_word(slot, synapse::NEXT_TARGET).store(0, Ordering::Release);
                self.syn_word(slot, synapse::TARGET).store(0, Ordering::Release);
                self.word(header::SYN_TOMBSTONES).fetch_add(1, Ordering::Relaxed);
            } else {
                prev = Some(slot);
            }
            cur = next;
        }
        Err(KernelError::ChainLoop)
    }

    /// Wipe the table and reverse index (CLEAR path).
    pub fn syn_clear(&self) {
        let cap = self.config().synapse_capacity;
        for slot in 0..cap {
            for field in 0..SYNAPSE_WORDS {
                self.syn_word(slot, field).store(0, Ordering::Relaxed);
            }
        }
        for bucket in 0..REVERSE_BUCKETS {
            self.rev_bucket_word(bucket).store(0, Ordering::Relaxed);
        }
        self.word(header::SYN_USED).store(0, Ordering::Release);
        self.word(header::SYN_TOMBSTONES).store(0, Ordering::Release);
    }

    pub fn syn_stats(&self) -> SynapseStats {
        let used = self.load(header::SYN_USED);
        let tombstones = self.load(header::SYN_TOMBSTONES);
        SynapseStats {
            capacity: self.config().synapse_capacity,
            used_slots: used,
            tombstones,
            live: used - tombstones,
        }
    }

    /// Read a live slot's record.
    pub fn syn_record(&self, slot: u32) -> Option<SynapseRecord> {
        if slot >= self.config().synapse_capacity {
            return None;
        }
        let src = self.syn_word(slot, synapse::SOURCE).load(Ordering::Acquire);
        let tgt = self.syn_word(slot, synapse::TARGET).load(Ordering::Acquire);
        if src == 0 || tgt == 0 {
            return None;
        }
        let wj = self.syn_word(slot, synapse::WEIGHT_JITTER).load(Ordering::Acquire);
        let meta = self.syn_word(slot, synapse::META).load(Ordering::Acquire);
        Some(SynapseRecord {
            source_ptr: src,
            target_ptr: tgt,
            weight: packed::weight_of(wj),
            jitter: packed::jitter_of(wj),
            plasticity: packed::syn_meta_plasticity(meta),
        })
    }

    /// Rewrite a live slot's weight, preserving jitter. Used by the
    /// reward/penalty path; clamping is the caller's business.
    pub fn syn_set_weight(&self, slot: u32, weight: u16) -> bool {
        if self.syn_record(slot).is_none() {
            return false;
        }
        let w = self.syn_word(slot, synapse::WEIGHT_JITTER);
        let wj = w.load(Ordering::Acquire);
        w.store(
            pack_weight_jitter(weight.min(WEIGHT_MAX), packed::jitter_of(wj)),
            Ordering::Release,
        );
        true
    }

    /// Visit the live outgoing edges of one source, in chain order.
    /// Lock-free: safe from the audio thread, tolerating concurrent
    /// tombstoning (a dying edge is either seen live or skipped).
    pub fn syn_for_each_from(
        &self,
        src: u32,
        mut f: impl FnMut(u32, SynapseRecord),
    ) -> KernelResult<()> {
        let Some(head) = self.syn_find_head(src) else {
            return Ok(());
        };
        let mut slot = head;
        for _ in 0..CHAIN_STEP_CAP {
            if let Some(rec) = self.syn_record(slot) {
                if rec.source_ptr == src {
                    f(slot, rec);
                }
            }
            let next = syn_meta_next(self.syn_word(slot, synapse::META).load(Ordering::Acquire));
            if next == 0 {
                return Ok(());
            }
            slot = next - 1;
        }
        Err(KernelError::ChainLoop)
    }

    /// Visit every live entry (table-order sweep; editor-side only).
    pub fn syn_for_each_live(&self, mut f: impl FnMut(u32, SynapseRecord)) {
        for slot in 0..self.config().synapse_capacity {
            if let Some(rec) = self.syn_record(slot) {
                f(slot, rec);
            }
        }
    }

    /// Whether the tombstone ratio justifies a rebuild.
    pub fn syn_should_compact(&self) -> bool {
        let stats = self.syn_stats();
        stats.used_slots >= COMPACT_MIN_USED && stats.tombstones * 2 > stats.used_slots
    }

    /// Rebuild the table without tombstones. `staging` is caller-owned and
    /// lazily grown on first use; live entries survive with chains and
    /// reverse buckets re-derived.
    pub fn syn_compact(&self, staging: &mut Vec<SynapseRecord>) -> u32 {
        staging.clear();
        self.syn_for_each_live(|_, rec| staging.push(rec));

        let cap = self.config().synapse_capacity;
        for slot in 0..cap {
            for field in 0..SYNAPSE_WORDS {
                self.syn_word(slot, field).store(0, Ordering::Relaxed);
            }
        }
        for bucket in 0..REVERSE_BUCKETS {
            self.rev_bucket_word(bucket).store(0, Ordering::Relaxed);
        }
        self.word(header::SYN_USED).store(0, Ordering::Release);
        self.word(header::SYN_TOMBSTONES).store(0, Ordering::Release);

        for rec in staging.iter() {
            // Reinsertion into an empty table cannot fail.
            let _ = self.syn_insert(
                rec.source_ptr,
                rec.target_ptr,
                pack_weight_jitter(rec.weight, rec.jitter),
                rec.plasticity,
            );
        }
        log::debug!("synapse compaction kept {} live entries", staging.len());
        staging.len() as u32
    }

    // --- internals ---

    /// First probe hit for a source (live or tombstoned): its chain head.
    fn syn_find_head(&self, src: u32) -> Option<u32> {
        let cap = self.config().synapse_capacity;
        let mask = cap - 1;
        let start = knuth_slot(src, mask);
        for i in 0..cap {
            let slot = (start + i) & mask;
            let s = self.syn_word(slot, synapse::SOURCE).load(Ordering::Acquire);
            if s == src {
                return Some(slot);
            }
            if s == 0 {
                return None;
            }
        }
        None
    }

    fn syn_insert(&self, src: u32, tgt: u32, wj: u32, plasticity: u8) -> KernelResult<u32> {
        let cap = self.config().synapse_capacity;
        let mask = cap - 1;
        let start = knuth_slot(src, mask);

        let mut head = None;
        let mut free = None;
        for i in 0..cap {
            let slot = (start + i) & mask;
            let s = self.syn_word(slot, synapse::SOURCE).load(Ordering::Acquire);
            if s == src && head.is_none() {
                head = Some(slot);
                continue;
            }
            if s == 0 {
                free = Some(slot);
                break;
            }
        }
        let Some(slot) = free else {
            return Err(KernelError::TableFull);
        };

        // Append to the source chain before the entry becomes live, so a
        // lock-free walker never sees a half-written tail.
        self.syn_word(slot, synapse::WEIGHT_JITTER).store(wj, Ordering::Relaxed);
        self.syn_word(slot, synapse::META)
            .store(pack_syn_meta(plasticity, 0), Ordering::Relaxed);
        self.syn_word(slot, synapse::TARGET).store(tgt, Ordering::Relaxed);
        self.syn_word(slot, synapse::SOURCE).store(src, Ordering::Release);

        self.rev_link(slot, tgt);

        if let Some(head_slot) = head {
            let tail = self.syn_chain_tail(head_slot)?;
            let meta_word = self.syn_word(tail, synapse::META);
            let meta = meta_word.load(Ordering::Acquire);
            meta_word.store(
                pack_syn_meta(packed::syn_meta_plasticity(meta), slot + 1),
                Ordering::Release,
            );
        }

        self.word(header::SYN_USED).fetch_add(1, Ordering::Relaxed);
        Ok(slot)
    }

    fn syn_chain_tail(&self, head: u32) -> KernelResult<u32> {
        let mut slot = head;
        for _ in 0..CHAIN_STEP_CAP {
            let next = syn_meta_next(self.syn_word(slot, synapse::META).load(Ordering::Acquire));
            if next == 0 {
                return Ok(slot);
            }
            slot = next - 1;
        }
        Err(KernelError::ChainLoop)
    }

    fn syn_tombstone(&self, slot: u32, target: u32) {
        self.rev_unlink(slot, target);
        self.syn_word(slot, synapse::TARGET).store(0, Ordering::Release);
        self.word(header::SYN_TOMBSTONES).fetch_add(1, Ordering::Relaxed);
    }

    fn rev_link(&self, slot: u32, tgt: u32) {
        let bucket = self.rev_bucket_word(self.rev_bucket_of(tgt));
        let head = bucket.load(Ordering::Acquire);
        self.syn_word(slot, synapse::NEXT_TARGET).store(head, Ordering::Release);
        bucket.store(slot + 1, Ordering::Release);
    }

    fn rev_unlink(&self, slot: u32, tgt: u32) {
        let bucket = self.rev_bucket_word(self.rev_bucket_of(tgt));
        let mut prev: Option<u32> = None;
        let mut cur = bucket.load(Ordering::Acquire);
        for _ in 0..CHAIN_STEP_CAP {
            if cur == 0 {
                return;
            }
            let s = cur - 1;
            let next = self.syn_word(s, synapse::NEXT_TARGET).load(Ordering::Acquire);
            if s == slot {
                match prev {
                    Some(p) => self.syn_word(p, synapse::NEXT_TARGET).store(next, Ordering::Release),
                    None => bucket.store(next, Ordering::Release),
                }
                self.syn_word(slot, synapse::NEXT_TARGET).store(0, Ordering::Release);
                return;
            }
            prev = Some(s);
            cur = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use sym_core::config::KernelConfig;

    use super::*;

    fn region() -> Region {
        Region::new(KernelConfig {
            node_capacity: 64,
            synapse_capacity: 512,
            ..Default::default()
        })
        .unwrap()
    }

    fn nodes(r: &Region, n: u32) -> Vec<u32> {
        (0..n).map(|i| r.node_ptr(i)).collect()
    }

    #[test]
    fn test_connect_and_record() {
        let r = region();
        let n = nodes(&r, 3);
        let slot = r.syn_connect(n[0], n[1], 750, 10).unwrap();
        let rec = r.syn_record(slot).unwrap();
        assert_eq!(rec.source_ptr, n[0]);
        assert_eq!(rec.target_ptr, n[1]);
        assert_eq!(rec.weight, 750);
        assert_eq!(rec.jitter, 10);
        assert_eq!(r.syn_stats().live, 1);
    }

    #[test]
    fn test_weight_clamped_at_connect() {
        let r = region();
        let n = nodes(&r, 2);
        let slot = r.syn_connect(n[0], n[1], 5000, 0).unwrap();
        assert_eq!(r.syn_record(slot).unwrap().weight, WEIGHT_MAX);
    }

    #[test]
    fn test_duplicate_connect_creates_second_entry() {
        let r = region();
        let n = nodes(&r, 2);
        let a = r.syn_connect(n[0], n[1], 500, 0).unwrap();
        let b = r.syn_connect(n[0], n[1], 600, 0).unwrap();
        assert_ne!(a, b);
        assert_eq!(r.syn_stats().live, 2);
    }

    #[test]
    fn test_per_source_chain_grows() {
        let r = region();
        let n = nodes(&r, 5);
        for tgt in &n[1..] {
            r.syn_connect(n[0], *tgt, 500, 0).unwrap();
        }
        let mut found = 0;
        r.syn_for_each_live(|_, rec| {
            if rec.source_ptr == n[0] {
                found += 1;
            }
        });
        assert_eq!(found, 4);
    }

    #[test]
    fn test_disconnect_specific_target() {
        let r = region();
        let n = nodes(&r, 3);
        r.syn_connect(n[0], n[1], 500, 0).unwrap();
        r.syn_connect(n[0], n[2], 500, 0).unwrap();

        assert_eq!(r.syn_disconnect(n[0], Some(n[1])).unwrap(), 1);
        let stats = r.syn_stats();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.tombstones, 1);

        // Idempotent: the edge is already gone.
        assert_eq!(r.syn_disconnect(n[0], Some(n[1])).unwrap(), 0);
        assert_eq!(r.syn_stats().tombstones, 1);
    }

    #[test]
    fn test_disconnect_all_from_source() {
        let r = region();
        let n = nodes(&r, 4);
        for tgt in &n[1..] {
            r.syn_connect(n[0], *tgt, 500, 0).unwrap();
        }
        assert_eq!(r.syn_disconnect(n[0], None).unwrap(), 3);
        assert_eq!(r.syn_stats().live, 0);
    }

    #[test]
    fn test_duplicate_disconnect_peels_one_at_a_time() {
        let r = region();
        let n = nodes(&r, 2);
        r.syn_connect(n[0], n[1], 100, 0).unwrap();
        r.syn_connect(n[0], n[1], 200, 0).unwrap();
        assert_eq!(r.syn_disconnect(n[0], Some(n[1])).unwrap(), 1);
        assert_eq!(r.syn_disconnect(n[0], Some(n[1])).unwrap(), 1);
        assert_eq!(r.syn_disconnect(n[0], Some(n[1])).unwrap(), 0);
    }

    #[test]
    fn test_tombstone_all_covers_incoming() {
        let r = region();
        let n = nodes(&r, 4);
        r.syn_connect(n[0], n[2], 500, 0).unwrap(); // incoming to n2
        r.syn_connect(n[1], n[2], 500, 0).unwrap(); // incoming to n2
        r.syn_connect(n[2], n[3], 500, 0).unwrap(); // outgoing from n2
        r.syn_connect(n[0], n[3], 500, 0).unwrap(); // unrelated

        r.syn_tombstone_all_for_node(n[2]).unwrap();
        let stats = r.syn_stats();
        assert_eq!(stats.live, 1);

        let mut survivors = Vec::new();
        r.syn_for_each_live(|_, rec| survivors.push((rec.source_ptr, rec.target_ptr)));
        assert_eq!(survivors, vec![(n[0], n[3])]);
    }

    #[test]
    fn test_set_weight_on_live_only() {
        let r = region();
        let n = nodes(&r, 2);
        let slot = r.syn_connect(n[0], n[1], 995, 0).unwrap();
        assert!(r.syn_set_weight(slot, 1000));
        assert_eq!(r.syn_record(slot).unwrap().weight, 1000);

        r.syn_disconnect(n[0], Some(n[1])).unwrap();
        assert!(!r.syn_set_weight(slot, 500));
    }

    #[test]
    fn test_compaction_drops_tombstones_keeps_live() {
        let r = region();
        let n = nodes(&r, 60);
        // 59 edges from n0; tombstone most of them.
        for tgt in &n[1..] {
            r.syn_connect(n[0], *tgt, 500, 7).unwrap();
        }
        for tgt in &n[1..51] {
            r.syn_disconnect(n[0], Some(*tgt)).unwrap();
        }
        let before = r.syn_stats();
        assert_eq!(before.live, 9);
        assert_eq!(before.tombstones, 50);

        let mut staging = Vec::new();
        let kept = r.syn_compact(&mut staging);
        assert_eq!(kept, 9);
        let after = r.syn_stats();
        assert_eq!(after.used_slots, 9);
        assert_eq!(after.tombstones, 0);

        // Chains and reverse buckets still work post-rebuild.
        assert_eq!(r.syn_disconnect(n[0], None).unwrap(), 9);
    }

    #[test]
    fn test_should_compact_thresholds() {
        let r = region();
        let n = nodes(&r, 64);
        assert!(!r.syn_should_compact());
        // 120 edges, then tombstone 70 of them: used 120, tombstones 70.
        for i in 0..120u32 {
            r.syn_connect(n[(i % 60) as usize], n[((i + 1) % 60) as usize], 500, 0).unwrap();
        }
        assert!(!r.syn_should_compact());
        let mut removed = 0;
        for i in 0..120u32 {
            if removed >= 70 {
                break;
            }
            removed += r
                .syn_disconnect(n[(i % 60) as usize], Some(n[((i + 1) % 60) as usize]))
                .unwrap();
        }
        assert!(r.syn_should_compact());
    }

    #[test]
    fn test_invalid_ptr_rejected() {
        let r = region();
        let n = nodes(&r, 1);
        assert!(matches!(
            r.syn_connect(12, n[0], 500, 0),
            Err(KernelError::InvalidPtr { .. })
        ));
    }

    #[test]
    fn test_clear_empties_table() {
        let r = region();
        let n = nodes(&r, 3);
        r.syn_connect(n[0], n[1], 500, 0).unwrap();
        r.syn_connect(n[1], n[2], 500, 0).unwrap();
        r.syn_clear();
        let stats = r.syn_stats();
        assert_eq!(stats.used_slots, 0);
        assert_eq!(stats.live, 0);
        let mut any = false;
        r.syn_for_each_live(|_, _| any = true);
        assert!(!any);
    }
}
