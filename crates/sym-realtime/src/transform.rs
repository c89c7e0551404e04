//! Playback transforms
//!
//! Groove, humanize, transpose, and velocity scaling, evaluated per note
//! from the register bank. All integer math, all deterministic: the same
//! node under the same registers always lands on the same trigger tick.

use sym_core::mix::{humanize_ticks, humanize_velocity};
use sym_kernel::{NoteSnapshot, Region};

/// Transformed trigger tick:
/// `base + groove[base mod len] + humanize(base, seed)`, floored at 0.
#[inline]
pub fn trigger_tick(region: &Region, base_tick: u32) -> u32 {
    let groove = region.groove_offset(base_tick) as i64;
    let jitter = humanize_ticks(
        base_tick,
        region.prng_seed(),
        region.humanize_timing_ppt(),
        region.ppq(),
    ) as i64;
    (base_tick as i64 + groove + jitter).max(0) as u32
}

/// Transposed pitch, clamped to the MIDI range.
#[inline]
pub fn transformed_pitch(region: &Region, pitch: u8) -> u8 {
    (pitch as i32 + region.transpose()).clamp(0, 127) as u8
}

/// Velocity after the global multiplier and humanize jitter, clamped.
#[inline]
pub fn transformed_velocity(region: &Region, snap: &NoteSnapshot) -> u8 {
    let scaled = snap.velocity as i64 * region.velocity_mult_ppt() as i64 / 1000;
    let jitter = humanize_velocity(
        snap.base_tick,
        region.prng_seed(),
        region.humanize_velocity_ppt(),
    ) as i64;
    (scaled + jitter).clamp(0, 127) as u8
}
