//! Attribute patcher
//!
//! Immediate mutation of a live node's musical attributes. Each patch is a
//! seqlock-bracketed read-modify-write of the smallest word that holds the
//! field; linkage and the chain mutex are never touched, and the commit
//! flag is never signaled (the consumer picks the new value up on its next
//! versioned read).

use std::sync::atomic::Ordering;

use sym_core::error::KernelResult;
use sym_core::layout::node;
use sym_core::packed::{self, NodeFlags};

use crate::region::Region;

/// Patchable attributes. Linkage and identity are structural and go
/// through the command ring instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchField {
    Pitch,
    Velocity,
    Duration,
    BaseTick,
    Muted,
}

impl Region {
    /// Apply one attribute patch. Pitch and velocity clamp to 0..=127;
    /// `Muted` treats nonzero as muted.
    pub fn patch_node(&self, ptr: u32, field: PatchField, value: i32) -> KernelResult<()> {
        self.check_node_ptr(ptr)?;

        self.seq_open(ptr);
        match field {
            PatchField::Pitch => {
                let pitch = value.clamp(0, 127) as u8;
                let w = self.node_word(ptr, node::PACKED);
                let packed = w.load(Ordering::Relaxed);
                w.store(packed::with_pitch(packed, pitch), Ordering::Release);
            }
            PatchField::Velocity => {
                let velocity = value.clamp(0, 127) as u8;
                let w = self.node_word(ptr, node::PACKED);
                let packed = w.load(Ordering::Relaxed);
                w.store(packed::with_velocity(packed, velocity), Ordering::Release);
            }
            PatchField::Muted => {
                let w = self.node_word(ptr, node::PACKED);
                let packed = w.load(Ordering::Relaxed);
                w.store(
                    packed::with_flag(packed, NodeFlags::MUTED, value != 0),
                    Ordering::Release,
                );
            }
            PatchField::Duration => {
                self.node_word(ptr, node::DURATION)
                    .store(value.max(0) as u32, Ordering::Release);
            }
            PatchField::BaseTick => {
                self.node_word(ptr, node::TICK)
                    .store(value.max(0) as u32, Ordering::Release);
            }
        }
        self.seq_close(ptr);
        Ok(())
    }
}
