//! Deterministic integer mixing
//!
//! One hash family for the whole kernel: Knuth multiplicative hashing for
//! the linear-probe tables, and a splitmix-style 64-bit finalizer for
//! humanize jitter and source-id derivation. Everything here is pure, so
//! the same (tick, seed) pair always produces the same jitter — replayable
//! humanization, no RNG state on the audio thread.

/// Knuth's multiplicative constant (2^32 / phi).
pub const KNUTH: u32 = 0x9E37_79B1;

/// Hash a key into a power-of-two table.
#[inline]
pub fn knuth_slot(key: u32, capacity_mask: u32) -> u32 {
    key.wrapping_mul(KNUTH) & capacity_mask
}

/// splitmix64 finalizer over two 32-bit inputs.
#[inline]
pub fn mix64(a: u32, b: u32) -> u64 {
    let mut z = ((a as u64) << 32) ^ (b as u64);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Timing humanization: a value in `[-ppt, +ppt] * ppq / 1000` ticks,
/// derived only from the base tick and the seed register.
#[inline]
pub fn humanize_ticks(base_tick: u32, seed: u32, timing_ppt: u32, ppq: u32) -> i32 {
    if timing_ppt == 0 {
        return 0;
    }
    let range = (ppq as u64 * timing_ppt as u64 / 1000) as i64;
    if range == 0 {
        return 0;
    }
    let span = 2 * range + 1;
    let m = mix64(base_tick, seed) as i64 & i64::MAX;
    (m % span - range) as i32
}

/// Velocity humanization: `[-ppt, +ppt] * 127 / 1000` steps, salted so it
/// decorrelates from the timing jitter of the same tick.
#[inline]
pub fn humanize_velocity(base_tick: u32, seed: u32, velocity_ppt: u32) -> i32 {
    if velocity_ppt == 0 {
        return 0;
    }
    let range = (127u64 * velocity_ppt as u64 / 1000) as i64;
    if range == 0 {
        return 0;
    }
    let span = 2 * range + 1;
    let m = mix64(base_tick ^ 0x5EED_CAFE, seed) as i64 & i64::MAX;
    (m % span - range) as i32
}

/// Derive a positive 31-bit source id from a source location.
#[inline]
pub fn location_id(file_hash: u32, line: u16, col: u16) -> u32 {
    let packed = ((line as u32) << 16) | col as u32;
    let id = (mix64(file_hash, packed) as u32).wrapping_mul(KNUTH) & 0x7FFF_FFFF;
    if id == 0 { 1 } else { id }
}

/// FNV-1a over a path string, for callers that only have a file name.
pub fn file_hash(path: &str) -> u32 {
    let mut h: u32 = 0x811C_9DC5;
    for b in path.bytes() {
        h ^= b as u32;
        h = h.wrapping_mul(0x0100_0193);
    }
    h
}
