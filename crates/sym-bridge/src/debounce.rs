//! Debounce rings
//!
//! Fixed-capacity parallel-array buffers for edits that should coalesce
//! while the user is still dragging: attribute patches (64 slots),
//! structural inserts/deletes (32 slots), and the fired-synapse window
//! (16 slots) the learning pass operates over. Nothing here allocates
//! after construction.

use sym_kernel::PatchField;

pub const PATCH_SLOTS: usize = 64;
pub const STRUCTURAL_SLOTS: usize = 32;
pub const FIRED_SLOTS: usize = 16;

/// Pending attribute patches, coalesced on (source id, field).
pub struct PatchRing {
    source_ids: [u32; PATCH_SLOTS],
    fields: [PatchField; PATCH_SLOTS],
    values: [i32; PATCH_SLOTS],
    len: usize,
}

impl Default for PatchRing {
    fn default() -> Self {
        Self {
            source_ids: [0; PATCH_SLOTS],
            fields: [PatchField::Pitch; PATCH_SLOTS],
            values: [0; PATCH_SLOTS],
            len: 0,
        }
    }
}

impl PatchRing {
    /// Queue a patch. An existing entry for the same (id, field) is
    /// updated in place; returns false when the buffer is full.
    pub fn push(&mut self, source_id: u32, field: PatchField, value: i32) -> bool {
        for i in 0..self.len {
            if self.source_ids[i] == source_id && self.fields[i] == field {
                self.values[i] = value;
                return true;
            }
        }
        if self.len == PATCH_SLOTS {
            return false;
        }
        self.source_ids[self.len] = source_id;
        self.fields[self.len] = field;
        self.values[self.len] = value;
        self.len += 1;
        true
    }

    pub fn drain(&mut self, mut apply: impl FnMut(u32, PatchField, i32)) {
        for i in 0..self.len {
            apply(self.source_ids[i], self.fields[i], self.values[i]);
        }
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A queued structural edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuralKind {
    Insert,
    Delete,
}

/// One drained structural intent.
#[derive(Debug, Clone, Copy)]
pub struct StructuralEdit {
    pub kind: StructuralKind,
    pub source_id: u32,
    pub after_id: u32,
    pub pitch: u8,
    pub velocity: u8,
    pub duration: u32,
    pub base_tick: u32,
    pub flags: u32,
}

/// Pending structural edits, order-preserving.
pub struct StructuralRing {
    kinds: [StructuralKind; STRUCTURAL_SLOTS],
    source_ids: [u32; STRUCTURAL_SLOTS],
    after_ids: [u32; STRUCTURAL_SLOTS],
    pitches: [u8; STRUCTURAL_SLOTS],
    velocities: [u8; STRUCTURAL_SLOTS],
    durations: [u32; STRUCTURAL_SLOTS],
    base_ticks: [u32; STRUCTURAL_SLOTS],
    flags: [u32; STRUCTURAL_SLOTS],
    len: usize,
}

impl Default for StructuralRing {
    fn default() -> Self {
        Self {
            kinds: [StructuralKind::Insert; STRUCTURAL_SLOTS],
            source_ids: [0; STRUCTURAL_SLOTS],
            after_ids: [0; STRUCTURAL_SLOTS],
            pitches: [0; STRUCTURAL_SLOTS],
            velocities: [0; STRUCTURAL_SLOTS],
            durations: [0; STRUCTURAL_SLOTS],
            base_ticks: [0; STRUCTURAL_SLOTS],
            flags: [0; STRUCTURAL_SLOTS],
            len: 0,
        }
    }
}

impl StructuralRing {
    pub fn push(&mut self, edit: StructuralEdit) -> bool {
        if self.len == STRUCTURAL_SLOTS {
            return false;
        }
        let i = self.len;
        self.kinds[i] = edit.kind;
        self.source_ids[i] = edit.source_id;
        self.after_ids[i] = edit.after_id;
        self.pitches[i] = edit.pitch;
        self.velocities[i] = edit.velocity;
        self.durations[i] = edit.duration;
        self.base_ticks[i] = edit.base_tick;
        self.flags[i] = edit.flags;
        self.len += 1;
        true
    }

    pub fn drain(&mut self, mut apply: impl FnMut(StructuralEdit)) {
        for i in 0..self.len {
            apply(StructuralEdit {
                kind: self.kinds[i],
                source_id: self.source_ids[i],
                after_id: self.after_ids[i],
                pitch: self.pitches[i],
                velocity: self.velocities[i],
                duration: self.durations[i],
                base_tick: self.base_ticks[i],
                flags: self.flags[i],
            });
        }
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Sliding window of recently fired synapse slots; reward and penalty
/// apply over whatever the window currently holds. Overflow evicts the
/// oldest fire.
pub struct FiredRing {
    slots: [u32; FIRED_SLOTS],
    len: usize,
    head: usize,
}

impl Default for FiredRing {
    fn default() -> Self {
        Self {
            slots: [0; FIRED_SLOTS],
            len: 0,
            head: 0,
        }
    }
}

impl FiredRing {
    pub fn record(&mut self, slot: u32) {
        let idx = (self.head + self.len) % FIRED_SLOTS;
        self.slots[idx] = slot;
        if self.len < FIRED_SLOTS {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % FIRED_SLOTS;
        }
    }

    pub fn for_each(&self, mut f: impl FnMut(u32)) {
        for i in 0..self.len {
            f(self.slots[(self.head + i) % FIRED_SLOTS]);
        }
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.head = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
