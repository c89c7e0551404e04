//! Zone A free list
//!
//! Lock-free LIFO stack of free heap slots in the audio-owned half of the
//! heap. The header holds a 64-bit tagged head `(version << 32) | ptr`;
//! every successful install bumps the version, so a slot popped, reused,
//! and pushed back can never satisfy a stale compare-exchange (ABA).
//!
//! A free slot's first word holds the byte offset of the next free slot.

use std::sync::atomic::Ordering;

use sym_core::error::{KernelError, KernelFault, KernelResult};
use sym_core::layout::{NODE_STRIDE, header};

use crate::region::Region;

impl Region {
    /// Pop a free Zone A slot. Returns `None` with HEAP_EXHAUSTED latched
    /// when the stack is empty, or with FREE_LIST_CORRUPT latched when a
    /// link points outside Zone A.
    pub fn free_pop(&self) -> Option<u32> {
        let head = self.word64(header::FREE_HEAD);
        loop {
            let current = head.load(Ordering::Acquire);
            let ptr = current as u32;
            if ptr == 0 {
                self.latch(KernelFault::HeapExhausted);
                return None;
            }
            if self.check_zone_a_ptr(ptr).is_err() {
                self.latch(KernelFault::FreeListCorrupt);
                log::error!("free list head points at {ptr:#x}");
                return None;
            }
            let next = self.byte_word(ptr).load(Ordering::Acquire);
            let version = (current >> 32).wrapping_add(1);
            let replacement = (version << 32) | next as u64;
            if head
                .compare_exchange_weak(current, replacement, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.word(header::FREE_COUNT).fetch_sub(1, Ordering::Relaxed);
                return Some(ptr);
            }
        }
    }

    /// Push a Zone A slot back onto the stack.
    pub fn free_push(&self, ptr: u32) -> KernelResult<()> {
        self.check_zone_a_ptr(ptr)?;
        let head = self.word64(header::FREE_HEAD);
        loop {
            let current = head.load(Ordering::Acquire);
            self.byte_word(ptr).store(current as u32, Ordering::Release);
            let version = (current >> 32).wrapping_add(1);
            let replacement = (version << 32) | ptr as u64;
            if head
                .compare_exchange_weak(current, replacement, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.word(header::FREE_COUNT).fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
        }
    }

    fn check_zone_a_ptr(&self, ptr: u32) -> KernelResult<()> {
        let heap = self.map().heap_start;
        let zone_a_end = heap + self.config().zone_split() * NODE_STRIDE;
        if ptr < heap || ptr >= zone_a_end || (ptr - heap) % NODE_STRIDE != 0 {
            return Err(KernelError::InvalidPtr { ptr });
        }
        Ok(())
    }
}
