//! The shared memory region
//!
//! One owned, zeroed, 8-byte-aligned allocation addressed in 32-bit words.
//! Every pointer handed between threads is a byte offset from the region
//! base; offset 0 holds the magic word and doubles as the null sentinel.
//!
//! All cross-thread access goes through `&AtomicU32` / `&AtomicU64` views
//! carved out of the allocation. The two 64-bit header fields (tagged
//! free-list head) sit at even word indices so the native 8-byte CAS
//! applies.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use sym_core::config::{KernelConfig, RegionMap};
use sym_core::error::{KernelError, KernelFault, KernelResult};
use sym_core::layout::{self, GROOVE_MAX_STEPS, header, regs};

/// Shared memory region handle.
///
/// Cloneable only through `Arc`; the editor, kernel, and consumer all hold
/// the same allocation.
pub struct Region {
    storage: Box<[AtomicU64]>,
    map: RegionMap,
    cfg: KernelConfig,
}

// The storage is a slice of atomics; all shared mutation goes through them.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Allocate and initialize a region for `cfg`.
    pub fn new(cfg: KernelConfig) -> KernelResult<Self> {
        cfg.validate()?;
        let map = RegionMap::compute(&cfg);
        let words64 = (map.total_bytes / 8) as usize;
        let storage: Box<[AtomicU64]> = (0..words64).map(|_| AtomicU64::new(0)).collect();

        let region = Self { storage, map, cfg };
        region.init_header();
        Ok(region)
    }

    /// Construction-time configuration.
    #[inline]
    pub fn config(&self) -> &KernelConfig {
        &self.cfg
    }

    /// Segment byte offsets.
    #[inline]
    pub fn map(&self) -> &RegionMap {
        &self.map
    }

    #[inline]
    pub fn size_bytes(&self) -> u32 {
        self.map.total_bytes
    }

    // --- word views ---

    /// Atomic view of the 32-bit word at `index`.
    #[inline]
    pub(crate) fn word(&self, index: u32) -> &AtomicU32 {
        debug_assert!(((index as usize) + 1) * 4 <= self.storage.len() * 8);
        // SAFETY: the allocation is 8-aligned and outlives the reference;
        // AtomicU32 has the in-memory representation of u32, and every
        // shared access in this crate is word-atomic.
        unsafe {
            let base = self.storage.as_ptr() as *const AtomicU32;
            &*base.add(index as usize)
        }
    }

    /// Atomic view of the 64-bit word pair starting at even word `index`.
    #[inline]
    pub(crate) fn word64(&self, index: u32) -> &AtomicU64 {
        debug_assert_eq!(index % 2, 0, "64-bit fields must sit at even words");
        &self.storage[(index / 2) as usize]
    }

    /// Atomic view of the word at byte offset `offset`.
    #[inline]
    pub(crate) fn byte_word(&self, offset: u32) -> &AtomicU32 {
        debug_assert_eq!(offset % 4, 0);
        self.word(offset / 4)
    }

    // --- header primitives ---

    #[inline]
    pub(crate) fn load(&self, index: u32) -> u32 {
        self.word(index).load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn store(&self, index: u32, value: u32) {
        self.word(index).store(value, Ordering::Release);
    }

    // --- initialization ---

    fn init_header(&self) {
        // Quiescent by construction; plain release stores are enough.
        for w in self.storage.iter() {
            w.store(0, Ordering::Relaxed);
        }

        self.store(header::MAGIC, layout::MAGIC);
        self.store(header::VERSION, layout::FORMAT_VERSION);
        self.store(header::PPQ, self.cfg.ppq);
        self.store(header::TEMPO, self.cfg.tempo_milli_bpm);
        self.store(header::SAFE_ZONE, self.cfg.safe_zone_ticks);
        self.store(header::NODE_CAPACITY, self.cfg.node_capacity);
        self.store(header::HEAP_START, self.map.heap_start);
        self.store(header::IDENT_PTR, self.map.ident_start);
        self.store(header::IDENT_CAPACITY, self.cfg.ident_capacity());
        self.store(header::RING_CAPACITY, self.cfg.ring_capacity);
        self.store(header::RING_PTR, self.map.ring_start);
        self.store(header::SYN_PTR, self.map.synapse_start);
        self.store(header::SYN_CAPACITY, self.cfg.synapse_capacity);
        self.store(header::REV_PTR, self.map.reverse_start);

        self.store(regs::GROOVE_PTR, self.map.groove_start);
        self.store(regs::VELOCITY_MULT_PPT, 1000);
        self.store(regs::RECLAIM_CAPACITY, self.cfg.reclaim_capacity);
        self.store(regs::RECLAIM_PTR, self.map.reclaim_start);

        self.init_free_list();
    }

    /// Reinitialize everything: header, mutex, free list, tables, rings.
    ///
    /// The caller owns quiescence; any thread parked on the yield slot is
    /// woken by the generation bump.
    pub fn hard_reset(&self) {
        let r#gen = self.load(header::YIELD_SLOT);
        self.init_header();
        self.store(header::YIELD_SLOT, r#gen.wrapping_add(1));
    }

    /// Validate magic, version, and that the allocation covers the
    /// configured geometry.
    pub fn validate(&self) -> KernelResult<()> {
        if self.load(header::MAGIC) != layout::MAGIC
            || self.load(header::VERSION) != layout::FORMAT_VERSION
        {
            return Err(KernelError::BadHeader);
        }
        let required = RegionMap::compute(&self.cfg).total_bytes;
        let actual = (self.storage.len() * 8) as u32;
        if actual < required {
            return Err(KernelError::RegionTooSmall { actual, required });
        }
        Ok(())
    }

    // --- error latch ---

    /// Latch a fault code into the shared error word (last error wins).
    pub fn latch(&self, fault: KernelFault) {
        self.store(header::ERROR_CODE, fault.code());
        if fault.is_fatal() {
            log::error!("kernel fault latched: {fault:?}");
        }
    }

    pub fn fault(&self) -> KernelFault {
        KernelFault::from_code(self.load(header::ERROR_CODE))
    }

    pub fn clear_fault(&self) {
        self.store(header::ERROR_CODE, KernelFault::Ok.code());
    }

    // --- counters and flags ---

    #[inline]
    pub fn playhead(&self) -> u32 {
        self.load(header::PLAYHEAD)
    }

    #[inline]
    pub fn set_playhead(&self, tick: u32) {
        self.store(header::PLAYHEAD, tick);
    }

    #[inline]
    pub fn safe_zone(&self) -> u32 {
        self.load(header::SAFE_ZONE)
    }

    pub fn set_safe_zone(&self, ticks: u32) {
        self.store(header::SAFE_ZONE, ticks);
    }

    #[inline]
    pub fn head_ptr(&self) -> u32 {
        self.load(header::HEAD_PTR)
    }

    #[inline]
    pub fn node_count(&self) -> u32 {
        self.load(header::NODE_COUNT)
    }

    #[inline]
    pub fn free_count(&self) -> u32 {
        self.load(header::FREE_COUNT)
    }

    #[inline]
    pub fn commit_flag(&self) -> u32 {
        self.load(header::COMMIT_FLAG)
    }

    #[inline]
    pub fn set_commit_flag(&self, state: u32) {
        self.store(header::COMMIT_FLAG, state);
    }

    pub fn tempo_milli_bpm(&self) -> u32 {
        self.load(header::TEMPO)
    }

    pub fn set_tempo_milli_bpm(&self, milli_bpm: u32) {
        self.store(header::TEMPO, milli_bpm);
    }

    #[inline]
    pub fn ppq(&self) -> u32 {
        self.load(header::PPQ)
    }

    /// Editor-to-consumer notification: something changed, wake up soon.
    pub fn notify(&self) {
        self.word(header::YIELD_SLOT)
            .fetch_add(1, Ordering::Release);
    }

    pub fn update_generation(&self) -> u32 {
        self.load(header::UPDATE_GEN)
    }

    pub(crate) fn bump_update_generation(&self) {
        self.word(header::UPDATE_GEN)
            .fetch_add(1, Ordering::Release);
    }

    // --- telemetry (two 32-bit words, carry-correct) ---

    pub(crate) fn bump_telemetry(&self) {
        let old = self
            .word(header::TELEMETRY_LO)
            .fetch_add(1, Ordering::Relaxed);
        if old == u32::MAX {
            self.word(header::TELEMETRY_HI)
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Read the 64-bit mutation counter without tearing across the carry.
    pub fn telemetry(&self) -> u64 {
        loop {
            let hi1 = self.word(header::TELEMETRY_HI).load(Ordering::Acquire);
            let lo = self.word(header::TELEMETRY_LO).load(Ordering::Acquire);
            let hi2 = self.word(header::TELEMETRY_HI).load(Ordering::Acquire);
            if hi1 == hi2 {
                return ((hi1 as u64) << 32) | lo as u64;
            }
        }
    }

    // --- registers ---

    pub fn set_humanize(&self, timing_ppt: u32, velocity_ppt: u32) {
        self.store(regs::HUMANIZE_TIMING_PPT, timing_ppt);
        self.store(regs::HUMANIZE_VELOCITY_PPT, velocity_ppt);
    }

    pub fn humanize_timing_ppt(&self) -> u32 {
        self.load(regs::HUMANIZE_TIMING_PPT)
    }

    pub fn humanize_velocity_ppt(&self) -> u32 {
        self.load(regs::HUMANIZE_VELOCITY_PPT)
    }

    pub fn set_transpose(&self, semitones: i32) {
        self.store(regs::TRANSPOSE, semitones as u32);
    }

    pub fn transpose(&self) -> i32 {
        self.load(regs::TRANSPOSE) as i32
    }

    pub fn set_velocity_mult_ppt(&self, ppt: u32) {
        self.store(regs::VELOCITY_MULT_PPT, ppt);
    }

    pub fn velocity_mult_ppt(&self) -> u32 {
        self.load(regs::VELOCITY_MULT_PPT)
    }

    pub fn set_prng_seed(&self, seed: u32) {
        self.store(regs::PRNG_SEED, seed);
    }

    pub fn prng_seed(&self) -> u32 {
        self.load(regs::PRNG_SEED)
    }

    // --- groove bank ---

    /// Install a groove template. Length is published last so a concurrent
    /// reader never strides past initialized steps.
    pub fn set_groove(&self, offsets: &[i32]) -> KernelResult<()> {
        if offsets.len() > GROOVE_MAX_STEPS as usize {
            return Err(KernelError::BadConfig { field: "groove" });
        }
        self.store(regs::GROOVE_LEN, 0);
        let base = self.map.groove_start;
        for (i, &off) in offsets.iter().enumerate() {
            self.byte_word(base + (i as u32) * 4)
                .store(off as u32, Ordering::Relaxed);
        }
        self.store(regs::GROOVE_LEN, offsets.len() as u32);
        Ok(())
    }

    pub fn clear_groove(&self) {
        self.store(regs::GROOVE_LEN, 0);
    }

    /// Groove offset for a base tick: `groove[tick mod len]`, 0 when no
    /// groove is installed.
    #[inline]
    pub fn groove_offset(&self, base_tick: u32) -> i32 {
        let len = self.load(regs::GROOVE_LEN);
        if len == 0 {
            return 0;
        }
        let step = base_tick % len;
        self.byte_word(self.map.groove_start + step * 4)
            .load(Ordering::Relaxed) as i32
    }

    // --- free-list bootstrap (see freelist.rs for the hot ops) ---

    fn init_free_list(&self) {
        let split = self.cfg.zone_split();
        for i in 0..split {
            let next = if i + 1 < split { self.node_ptr(i + 1) } else { 0 };
            self.byte_word(self.node_ptr(i)).store(next, Ordering::Relaxed);
        }
        let head = (1u64 << 32) | self.node_ptr(0) as u64;
        self.word64(header::FREE_HEAD).store(head, Ordering::Release);
        self.store(header::FREE_COUNT, split);
    }

    // --- node addressing ---

    /// Byte offset of heap slot `index`.
    #[inline]
    pub fn node_ptr(&self, index: u32) -> u32 {
        self.map.heap_start + index * layout::NODE_STRIDE
    }

    /// Heap slot index of a validated byte offset.
    #[inline]
    pub fn node_index(&self, ptr: u32) -> u32 {
        (ptr - self.map.heap_start) / layout::NODE_STRIDE
    }

    /// Whether `ptr` falls in the audio-owned half of the heap.
    #[inline]
    pub fn in_zone_a(&self, ptr: u32) -> bool {
        self.node_index(ptr) < self.cfg.zone_split()
    }
}
