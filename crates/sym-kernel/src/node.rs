//! Node views and versioned reads
//!
//! A node is 8 words in the heap. Attribute words are guarded by a 24-bit
//! seqlock in word 6: writers bump it before and after touching any other
//! field (odd = write in progress), readers loop until they observe the
//! same even sequence on both sides of the field loads.
//!
//! Link words (`next`/`prev`) are not covered by the seqlock; they only
//! change under the chain mutex and are read as single atomic words.

use std::sync::atomic::{AtomicU32, Ordering};

use sym_core::error::{KernelError, KernelFault, KernelResult};
use sym_core::layout::{NODE_STRIDE, node};
use sym_core::packed;

use crate::region::Region;

/// Versioned-read retry budget on the audio thread: bail out and skip the
/// node rather than stall the quantum.
pub const AUDIO_READ_RETRIES: u32 = 50;

/// Editor-side retry budget; exhausting it latches KERNEL_PANIC.
pub const EDITOR_READ_RETRIES: u32 = 1000;

/// Consistent snapshot of a node's attribute words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteSnapshot {
    pub opcode_raw: u8,
    pub pitch: u8,
    pub velocity: u8,
    pub flags: u32,
    pub base_tick: u32,
    pub duration: u32,
    pub source_id: u32,
}

impl NoteSnapshot {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.flags & packed::NodeFlags::ACTIVE != 0
    }

    #[inline]
    pub fn is_muted(&self) -> bool {
        self.flags & packed::NodeFlags::MUTED != 0
    }

    #[inline]
    pub fn expression(&self) -> u8 {
        ((self.flags & packed::NodeFlags::EXPR_MASK) >> packed::NodeFlags::EXPR_SHIFT) as u8
    }
}

impl Region {
    /// Atomic view of one field word of the node at `ptr`.
    #[inline]
    pub(crate) fn node_word(&self, ptr: u32, field: u32) -> &AtomicU32 {
        self.byte_word(ptr + field * 4)
    }

    /// Bounds- and stride-check a node pointer. INVALID_PTR is latched on
    /// failure so non-Rust readers of the region see the same verdict.
    pub fn check_node_ptr(&self, ptr: u32) -> KernelResult<()> {
        let heap = self.map().heap_start;
        let heap_end = heap + self.config().node_capacity * NODE_STRIDE;
        if ptr < heap || ptr >= heap_end || (ptr - heap) % NODE_STRIDE != 0 {
            self.latch(KernelFault::InvalidPtr);
            return Err(KernelError::InvalidPtr { ptr });
        }
        Ok(())
    }

    // --- link words (chain-mutex domain) ---

    #[inline]
    pub fn node_next(&self, ptr: u32) -> u32 {
        self.node_word(ptr, node::NEXT).load(Ordering::Acquire)
    }

    #[inline]
    pub fn node_prev(&self, ptr: u32) -> u32 {
        self.node_word(ptr, node::PREV).load(Ordering::Acquire)
    }

    #[inline]
    pub fn node_source_id(&self, ptr: u32) -> u32 {
        self.node_word(ptr, node::SOURCE_ID).load(Ordering::Acquire)
    }

    #[inline]
    pub fn node_base_tick(&self, ptr: u32) -> u32 {
        self.node_word(ptr, node::TICK).load(Ordering::Acquire)
    }

    // --- seqlock ---

    /// Open a write section: bump the sequence to odd.
    pub(crate) fn seq_open(&self, ptr: u32) {
        let seq = self.node_word(ptr, node::SEQ);
        let mut current = seq.load(Ordering::Relaxed);
        loop {
            match seq.compare_exchange_weak(
                current,
                packed::seq_bumped(current),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Close a write section: bump the sequence back to even.
    pub(crate) fn seq_close(&self, ptr: u32) {
        self.seq_open(ptr);
    }

    /// Versioned read of the attribute words. Returns `None` once the
    /// retry budget is spent (torn read under sustained writing).
    pub fn read_node(&self, ptr: u32, retries: u32) -> Option<NoteSnapshot> {
        for _ in 0..retries {
            let s1 = self.node_word(ptr, node::SEQ).load(Ordering::Acquire);
            if packed::seq_is_writing(s1) {
                std::hint::spin_loop();
                continue;
            }
            let packed_a = self.node_word(ptr, node::PACKED).load(Ordering::Acquire);
            let base_tick = self.node_word(ptr, node::TICK).load(Ordering::Acquire);
            let duration = self.node_word(ptr, node::DURATION).load(Ordering::Acquire);
            let source_id = self.node_word(ptr, node::SOURCE_ID).load(Ordering::Acquire);
            let s2 = self.node_word(ptr, node::SEQ).load(Ordering::Acquire);
            if s1 == s2 {
                return Some(NoteSnapshot {
                    opcode_raw: packed::opcode_raw(packed_a),
                    pitch: packed::pitch_of(packed_a),
                    velocity: packed::velocity_of(packed_a),
                    flags: packed::flags_of(packed_a),
                    base_tick,
                    duration,
                    source_id,
                });
            }
        }
        None
    }

    /// Editor-side read: generous retry budget, KERNEL_PANIC on exhaustion.
    pub fn read_node_editor(&self, ptr: u32) -> KernelResult<NoteSnapshot> {
        self.check_node_ptr(ptr)?;
        self.read_node(ptr, EDITOR_READ_RETRIES).ok_or_else(|| {
            self.latch(KernelFault::KernelPanic);
            KernelError::KernelPanic {
                reason: "versioned read exhausted",
            }
        })
    }

    /// Write the full attribute set of a floating (unlinked) node.
    ///
    /// The slot must not be chain-reachable yet; publication happens via
    /// the command ring's release store.
    pub fn write_floating_node(
        &self,
        ptr: u32,
        packed_a: u32,
        base_tick: u32,
        duration: u32,
        source_id: u32,
    ) -> KernelResult<()> {
        self.check_node_ptr(ptr)?;
        self.node_word(ptr, node::PACKED).store(packed_a, Ordering::Relaxed);
        self.node_word(ptr, node::TICK).store(base_tick, Ordering::Relaxed);
        self.node_word(ptr, node::DURATION).store(duration, Ordering::Relaxed);
        self.node_word(ptr, node::NEXT).store(0, Ordering::Relaxed);
        self.node_word(ptr, node::PREV).store(0, Ordering::Relaxed);
        self.node_word(ptr, node::SOURCE_ID).store(source_id, Ordering::Relaxed);
        self.node_word(ptr, node::SEQ).store(0, Ordering::Relaxed);
        self.node_word(ptr, node::PASS).store(0, Ordering::Release);
        Ok(())
    }
}
