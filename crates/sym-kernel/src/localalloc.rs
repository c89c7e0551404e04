//! Zone B local allocator
//!
//! Single-writer bump allocator over the editor-owned half of the heap.
//! The editor is the only thread that touches the frontier, so no atomics
//! guard it; freed Zone B slots travel back from the kernel through the
//! reclaim ring and land on a local free list that `alloc` consults before
//! bumping.
//!
//! Every slot handed out is zeroed first; publication to other threads
//! rides the command ring's release store.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use sym_core::error::{KernelError, KernelFault, KernelResult};
use sym_core::layout::NODE_WORDS;

use crate::region::Region;

pub struct LocalAllocator {
    region: Arc<Region>,
    /// Next unBumped slot index; starts at the zone split.
    frontier: u32,
    end: u32,
    /// Reclaimed Zone B byte offsets, reused before the frontier moves.
    free: Vec<u32>,
}

impl LocalAllocator {
    pub fn new(region: Arc<Region>) -> Self {
        let frontier = region.config().zone_split();
        let end = region.config().node_capacity;
        Self {
            region,
            frontier,
            end,
            free: Vec::with_capacity(64),
        }
    }

    /// Allocate one zeroed Zone B slot.
    pub fn alloc(&mut self) -> KernelResult<u32> {
        let ptr = if let Some(ptr) = self.free.pop() {
            ptr
        } else {
            if self.frontier >= self.end {
                self.region.latch(KernelFault::HeapExhausted);
                return Err(KernelError::HeapExhausted);
            }
            let ptr = self.region.node_ptr(self.frontier);
            self.frontier += 1;
            ptr
        };
        self.zero_slot(ptr);
        Ok(ptr)
    }

    /// Return a slot to the local list without round-tripping the kernel
    /// (used when an enqueue fails after allocation).
    pub fn free_local(&mut self, ptr: u32) {
        self.free.push(ptr);
    }

    /// Drain the reclaim ring into the local free list. Returns how many
    /// slots came back.
    pub fn drain_reclaim(&mut self) -> usize {
        let mut n = 0;
        while let Some(ptr) = self.region.reclaim_pop() {
            self.free.push(ptr);
            n += 1;
        }
        n
    }

    /// Reset the frontier and forget reclaimed slots (post-CLEAR).
    pub fn reset(&mut self) {
        self.frontier = self.region.config().zone_split();
        self.free.clear();
    }

    pub fn free_len(&self) -> usize {
        self.free.len()
    }

    /// Slots handed out by the bump frontier so far (reused ones included).
    pub fn frontier_used(&self) -> u32 {
        self.frontier - self.region.config().zone_split()
    }

    fn zero_slot(&self, ptr: u32) {
        for w in 0..NODE_WORDS {
            self.region.node_word(ptr, w).store(0, Ordering::Relaxed);
        }
    }
}
