//! Probabilistic synapse following
//!
//! Given a just-played node, pick its next node by walking the outgoing
//! synapse chain and rolling against the accumulated weights (0..=1000
//! each, scaled probability). Deterministic for a given roll, lock-free,
//! and bounded, so either role can call it between emissions. The chosen
//! slot index is what the learning pass's fired window records.

use sym_core::mix::mix64;

use crate::region::Region;

/// The outcome of one weighted roll over a node's outgoing edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChosenSynapse {
    /// Synapse table slot (what the fired window records).
    pub slot: u32,
    /// Target node byte offset.
    pub target_ptr: u32,
    /// Per-edge timing jitter in ticks.
    pub jitter: u16,
}

/// Weighted selection among the live outgoing edges of `from`.
///
/// Returns `None` when the node has no live edges or their weights sum
/// to zero. A concurrent edit between the two chain walks can also
/// resolve to `None`; callers treat that as "no follow-up this time".
pub fn choose_next(region: &Region, from: u32, roll: u32) -> Option<ChosenSynapse> {
    let mut total: u32 = 0;
    region
        .syn_for_each_from(from, |_, rec| total += rec.weight as u32)
        .ok()?;
    if total == 0 {
        return None;
    }

    let mut remaining = roll % total;
    let mut chosen = None;
    region
        .syn_for_each_from(from, |slot, rec| {
            if chosen.is_some() {
                return;
            }
            let weight = rec.weight as u32;
            if remaining < weight {
                chosen = Some(ChosenSynapse {
                    slot,
                    target_ptr: rec.target_ptr,
                    jitter: rec.jitter,
                });
            } else {
                remaining -= weight;
            }
        })
        .ok()?;
    chosen
}

/// Roll derived from the playhead and the seed register, so a fixed seed
/// replays the same walk.
pub fn deterministic_roll(region: &Region, playhead: u32) -> u32 {
    mix64(playhead, region.prng_seed()) as u32
}
