//! The editor facade
//!
//! All editor intent funnels through here: immediate structural edits run
//! the synchronous worker path (enqueue + process under editor mutex
//! rules), debounced edits sit in pre-allocated rings until `tick()`
//! crosses their deadline, and the learning pass adjusts weights over the
//! fired-synapse window.

use std::sync::Arc;

use sym_core::error::{KernelError, KernelFault};
use sym_core::layout::command;
use sym_core::packed::{self, NodeFlags, Opcode};
use sym_kernel::{
    Command, LocalAllocator, MmuContext, NoteSnapshot, PatchField, Region, SynapseRecord,
    choose_next, deterministic_roll,
};

use crate::debounce::{FiredRing, PatchRing, StructuralEdit, StructuralKind, StructuralRing};
use crate::error::{BridgeError, BridgeResult};
use crate::snapshot::{BrainSnapshot, SnapshotArrays};
use crate::source_id::{IdGenerator, SourceLocation};

/// Ticks of quiescence before a debounce class flushes.
pub const DEFAULT_DEBOUNCE_TICKS: u64 = 10;

const DEFAULT_LEARNING_RATE: f32 = 10.0;

/// Full description of a note insert.
#[derive(Debug, Clone, Copy)]
pub struct NoteSpec {
    pub opcode: Opcode,
    pub pitch: u8,
    pub velocity: u8,
    pub duration: u32,
    pub base_tick: u32,
    pub muted: bool,
    pub source_id: u32,
    pub after_source_id: Option<u32>,
    pub expression: u8,
    pub location: Option<SourceLocation>,
}

impl Default for NoteSpec {
    fn default() -> Self {
        Self {
            opcode: Opcode::Note,
            pitch: 60,
            velocity: 100,
            duration: 480,
            base_tick: 0,
            muted: false,
            source_id: 0,
            after_source_id: None,
            expression: 0,
            location: None,
        }
    }
}

/// One note of a clip for batch loading.
#[derive(Debug, Clone, Copy)]
pub struct ClipNote {
    pub pitch: u8,
    pub velocity: u8,
    pub duration: u32,
    pub base_tick: u32,
    pub muted: bool,
}

type ErrorHandler = Box<dyn Fn(BridgeError) + Send>;

pub struct Bridge {
    region: Arc<Region>,
    local: LocalAllocator,
    ids: IdGenerator,

    tick: u64,
    pub attribute_debounce_ticks: u64,
    pub structural_debounce_ticks: u64,
    patch_ring: PatchRing,
    structural_ring: StructuralRing,
    patch_deadline: Option<u64>,
    structural_deadline: Option<u64>,

    fired: FiredRing,
    learning_rate: f32,
    compact_staging: Vec<SynapseRecord>,

    on_error: Option<ErrorHandler>,
}

impl Bridge {
    pub fn new(region: Arc<Region>) -> Self {
        let local = LocalAllocator::new(Arc::clone(&region));
        Self {
            region,
            local,
            ids: IdGenerator::new(),
            tick: 0,
            attribute_debounce_ticks: DEFAULT_DEBOUNCE_TICKS,
            structural_debounce_ticks: DEFAULT_DEBOUNCE_TICKS,
            patch_ring: PatchRing::default(),
            structural_ring: StructuralRing::default(),
            patch_deadline: None,
            structural_deadline: None,
            fired: FiredRing::default(),
            learning_rate: DEFAULT_LEARNING_RATE,
            // Compaction staging grows lazily on the first compaction.
            compact_staging: Vec::new(),
            on_error: None,
        }
    }

    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    /// Install the error callback, bound once; it observes every tier-2
    /// error that surfaces through the bridge.
    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.on_error = Some(handler);
    }

    fn report<T>(&self, result: BridgeResult<T>) -> BridgeResult<T> {
        if let Err(err) = &result {
            if let Some(handler) = &self.on_error {
                handler(*err);
            }
        }
        result
    }

    // --- source ids ---

    pub fn generate_source_id(&mut self, location: Option<SourceLocation>) -> u32 {
        self.ids.generate(location)
    }

    // --- structural edits ---

    /// Allocate, write, and queue a note insert. The floating pointer is
    /// returned immediately; linking happens when the kernel drains the
    /// ring (the audio thread's next poll, or a synchronous flush).
    pub fn insert_async(&mut self, spec: NoteSpec) -> BridgeResult<u32> {
        // Resolve the predecessor before allocating anything.
        let prev = match spec.after_source_id {
            Some(after) => match self.region.ident_lookup(after) {
                Some(ptr) => ptr,
                None => return self.report(Err(BridgeError::NotFound)),
            },
            None => 0,
        };

        let ptr = match self.local.alloc() {
            Ok(ptr) => ptr,
            Err(err) => return self.report(Err(err.into())),
        };

        let mut flags = NodeFlags::ACTIVE;
        if spec.muted {
            flags |= NodeFlags::MUTED;
        }
        flags |= ((spec.expression as u32) & 0xF) << NodeFlags::EXPR_SHIFT;

        let packed = packed::pack_node(
            spec.opcode,
            spec.pitch.min(127),
            spec.velocity.min(127),
            flags,
        );
        self.region
            .write_floating_node(ptr, packed, spec.base_tick, spec.duration, spec.source_id)?;

        if let Some(loc) = spec.location {
            // Location first: identity becomes visible only with its
            // symbol entry already in place.
            let _ = self.region.symbol_store(spec.source_id, loc.file_hash, loc.line_col());
        }

        if self
            .region
            .ring_write(Command::new(command::INSERT, ptr, prev, 0))
            .is_err()
        {
            self.local.free_local(ptr);
            return self.report(Err(BridgeError::RingFull));
        }
        self.region.notify();
        Ok(ptr)
    }

    /// Insert and link synchronously (the minimum-configuration worker
    /// path). Returns the node pointer.
    pub fn insert_sync(&mut self, spec: NoteSpec) -> BridgeResult<u32> {
        let ptr = self.insert_async(spec)?;
        self.region.process_commands(MmuContext::Editor);
        Ok(ptr)
    }

    /// Resolve, pre-tombstone synapses, queue DELETE, and process it now.
    pub fn delete_note_immediate(&mut self, source_id: u32) -> BridgeResult<()> {
        let ptr = match self.region.ident_lookup(source_id) {
            Some(ptr) => ptr,
            None => return self.report(Err(BridgeError::NotFound)),
        };

        {
            let _guard = self.region.lock_chain_editor().map_err(BridgeError::from)?;
            let _ = self.region.syn_tombstone_all_for_node(ptr);
        }

        self.region
            .ring_write(Command::new(command::DELETE, ptr, 0, 0))
            .map_err(BridgeError::from)?;
        self.region.process_commands(MmuContext::Editor);
        self.maybe_compact();
        Ok(())
    }

    /// Pointer-based delete for just-inserted nodes (skips the identity
    /// lookup); queued, not flushed.
    pub fn delete_async(&mut self, ptr: u32) -> BridgeResult<()> {
        self.region.check_node_ptr(ptr)?;
        self.region
            .ring_write(Command::new(command::DELETE, ptr, 0, 0))
            .map_err(BridgeError::from)?;
        self.region.notify();
        Ok(())
    }

    /// Queue CLEAR and run it now; the Zone B frontier resets with it.
    pub fn clear(&mut self) -> BridgeResult<()> {
        self.region
            .ring_write(Command::new(command::CLEAR, 0, 0, 0))
            .map_err(BridgeError::from)?;
        self.region.process_commands(MmuContext::Editor);
        self.local.reset();
        Ok(())
    }

    // --- attribute edits ---

    pub fn patch_direct(&self, source_id: u32, field: PatchField, value: i32) -> BridgeResult<()> {
        let ptr = match self.region.ident_lookup(source_id) {
            Some(ptr) => ptr,
            None => return self.report(Err(BridgeError::NotFound)),
        };
        self.region.patch_node(ptr, field, value)?;
        Ok(())
    }

    pub fn patch_debounced(&mut self, source_id: u32, field: PatchField, value: i32) {
        if !self.patch_ring.push(source_id, field, value) {
            self.flush_patches();
            self.patch_ring.push(source_id, field, value);
        }
        self.patch_deadline = Some(self.tick + self.attribute_debounce_ticks);
    }

    pub fn insert_note_debounced(&mut self, spec: NoteSpec) {
        let mut flags = 0;
        if spec.muted {
            flags |= NodeFlags::MUTED;
        }
        flags |= ((spec.expression as u32) & 0xF) << NodeFlags::EXPR_SHIFT;
        let edit = StructuralEdit {
            kind: StructuralKind::Insert,
            source_id: spec.source_id,
            after_id: spec.after_source_id.unwrap_or(0),
            pitch: spec.pitch,
            velocity: spec.velocity,
            duration: spec.duration,
            base_tick: spec.base_tick,
            flags,
        };
        if !self.structural_ring.push(edit) {
            self.flush_structural();
            self.structural_ring.push(edit);
        }
        self.structural_deadline = Some(self.tick + self.structural_debounce_ticks);
    }

    pub fn delete_note_debounced(&mut self, source_id: u32) {
        let edit = StructuralEdit {
            kind: StructuralKind::Delete,
            source_id,
            after_id: 0,
            pitch: 0,
            velocity: 0,
            duration: 0,
            base_tick: 0,
            flags: 0,
        };
        if !self.structural_ring.push(edit) {
            self.flush_structural();
            self.structural_ring.push(edit);
        }
        self.structural_deadline = Some(self.tick + self.structural_debounce_ticks);
    }

    /// Advance editor time: drain the reclaim ring, then flush any
    /// debounce class whose deadline has passed.
    pub fn tick(&mut self) {
        self.tick += 1;
        self.local.drain_reclaim();

        if self.patch_deadline.is_some_and(|d| self.tick >= d) {
            self.flush_patches();
        }
        if self.structural_deadline.is_some_and(|d| self.tick >= d) {
            self.flush_structural();
        }
    }

    pub fn editor_tick(&self) -> u64 {
        self.tick
    }

    pub fn pending_patches(&self) -> usize {
        self.patch_ring.len()
    }

    pub fn pending_structural(&self) -> usize {
        self.structural_ring.len()
    }

    fn flush_patches(&mut self) {
        self.patch_deadline = None;
        let mut ring = std::mem::take(&mut self.patch_ring);
        ring.drain(|id, field, value| {
            if let Err(err) = self.patch_direct(id, field, value) {
                log::warn!("debounced patch for id {id} dropped: {err}");
            }
        });
        self.patch_ring = ring;
    }

    fn flush_structural(&mut self) {
        self.structural_deadline = None;
        let mut ring = std::mem::take(&mut self.structural_ring);
        ring.drain(|edit| match edit.kind {
            StructuralKind::Insert => {
                let spec = NoteSpec {
                    opcode: Opcode::Note,
                    pitch: edit.pitch,
                    velocity: edit.velocity,
                    duration: edit.duration,
                    base_tick: edit.base_tick,
                    muted: edit.flags & NodeFlags::MUTED != 0,
                    source_id: edit.source_id,
                    after_source_id: (edit.after_id != 0).then_some(edit.after_id),
                    expression: ((edit.flags & NodeFlags::EXPR_MASK) >> NodeFlags::EXPR_SHIFT) as u8,
                    location: None,
                };
                if let Err(err) = self.insert_async(spec) {
                    log::warn!("debounced insert for id {} dropped: {err}", edit.source_id);
                }
            }
            StructuralKind::Delete => {
                let ptr = self.region.ident_lookup(edit.source_id);
                match ptr {
                    Some(ptr) => {
                        if self
                            .region
                            .ring_write(Command::new(command::DELETE, ptr, 0, 0))
                            .is_err()
                        {
                            log::warn!("debounced delete for id {} dropped: ring full", edit.source_id);
                        }
                    }
                    None => log::warn!("debounced delete for id {} dropped: not found", edit.source_id),
                }
            }
        });
        self.structural_ring = ring;
        // Worker path: apply the whole batch before returning to the caller.
        self.region.process_commands(MmuContext::Editor);
        self.maybe_compact();
    }

    // --- clip loading ---

    /// Batch-load a clip. Inserts run in reverse tick order so plain
    /// head-inserts leave the chain ascending; input index `i` maps to
    /// source id `i + 1`. Returns the assigned ids in input order.
    pub fn load_clip(&mut self, notes: &[ClipNote]) -> BridgeResult<Vec<u32>> {
        let mut order: Vec<usize> = (0..notes.len()).collect();
        order.sort_by(|&a, &b| notes[b].base_tick.cmp(&notes[a].base_tick));

        for &i in &order {
            let note = notes[i];
            let spec = NoteSpec {
                opcode: Opcode::Note,
                pitch: note.pitch,
                velocity: note.velocity,
                duration: note.duration,
                base_tick: note.base_tick,
                muted: note.muted,
                source_id: i as u32 + 1,
                after_source_id: None,
                expression: 0,
                location: None,
            };
            self.insert_async(spec)?;
        }
        self.region.process_commands(MmuContext::Editor);
        Ok((0..notes.len()).map(|i| i as u32 + 1).collect())
    }

    // --- synapses ---

    /// Create an edge between two identified notes, immediately.
    pub fn connect(
        &mut self,
        source_id: u32,
        target_id: u32,
        weight: u16,
        jitter: u16,
    ) -> BridgeResult<u32> {
        let src = self
            .region
            .ident_lookup(source_id)
            .ok_or(BridgeError::NotFound);
        let src = self.report(src)?;
        let tgt = self
            .region
            .ident_lookup(target_id)
            .ok_or(BridgeError::NotFound);
        let tgt = self.report(tgt)?;

        let _guard = self.region.lock_chain_editor().map_err(BridgeError::from)?;
        let slot = self.region.syn_connect(src, tgt, weight, jitter)?;
        Ok(slot)
    }

    /// Tombstone the edge source -> target (or every edge from source).
    pub fn disconnect(&mut self, source_id: u32, target_id: Option<u32>) -> BridgeResult<()> {
        let src = self
            .region
            .ident_lookup(source_id)
            .ok_or(BridgeError::NotFound);
        let src = self.report(src)?;
        let tgt = match target_id {
            Some(id) => {
                let t = self.region.ident_lookup(id).ok_or(BridgeError::NotFound);
                Some(self.report(t)?)
            }
            None => None,
        };

        let count = {
            let _guard = self.region.lock_chain_editor().map_err(BridgeError::from)?;
            self.region.syn_disconnect(src, tgt)?
        };
        if count == 0 {
            return self.report(Err(BridgeError::NotFound));
        }
        self.maybe_compact();
        Ok(())
    }

    /// Pointer-based variants for just-inserted nodes; FIFO ordering makes
    /// a CONNECT behind its INSERT always safe.
    pub fn connect_async(&self, src_ptr: u32, tgt_ptr: u32, weight: u16, jitter: u16) -> BridgeResult<()> {
        let packed = ((weight.min(1000) as u32) << 16) | jitter as u32;
        self.region
            .ring_write(Command::new(command::CONNECT, src_ptr, tgt_ptr, packed))
            .map_err(BridgeError::from)?;
        Ok(())
    }

    pub fn disconnect_async(&self, src_ptr: u32, tgt_ptr: Option<u32>) -> BridgeResult<()> {
        self.region
            .ring_write(Command::new(
                command::DISCONNECT,
                src_ptr,
                tgt_ptr.unwrap_or(0),
                0,
            ))
            .map_err(BridgeError::from)?;
        Ok(())
    }

    /// Rebuild the synapse table if tombstones dominate.
    pub fn maybe_compact(&mut self) -> bool {
        if !self.region.syn_should_compact() {
            return false;
        }
        match self.region.lock_chain_editor() {
            Ok(_guard) => {
                self.region.syn_compact(&mut self.compact_staging);
                true
            }
            Err(_) => false,
        }
    }

    // --- learning ---

    pub fn record_fire(&mut self, synapse_slot: u32) {
        self.fired.record(synapse_slot);
    }

    /// One generative step: roll over `source_id`'s outgoing edges,
    /// record the chosen synapse in the fired window, and return the
    /// target's source id. `Ok(None)` means the note has no live,
    /// weighted follow-up.
    pub fn fire_next(&mut self, source_id: u32) -> BridgeResult<Option<u32>> {
        let ptr = match self.region.ident_lookup(source_id) {
            Some(ptr) => ptr,
            None => return self.report(Err(BridgeError::NotFound)),
        };

        let roll = deterministic_roll(&self.region, self.region.playhead());
        let Some(choice) = choose_next(&self.region, ptr, roll) else {
            return Ok(None);
        };
        self.fired.record(choice.slot);

        let target_id = self.region.node_source_id(choice.target_ptr);
        Ok((target_id != 0).then_some(target_id))
    }

    pub fn set_learning_rate(&mut self, rate: f32) {
        self.learning_rate = rate.max(0.0);
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    /// Strengthen every synapse in the fired window.
    pub fn reward(&mut self, mult: f32) {
        self.adjust_fired((self.learning_rate * mult).round() as i32);
    }

    /// Weaken every synapse in the fired window.
    pub fn penalize(&mut self, mult: f32) {
        self.adjust_fired(-(self.learning_rate * mult).round() as i32);
    }

    fn adjust_fired(&mut self, delta: i32) {
        let region = &self.region;
        self.fired.for_each(|slot| {
            if let Some(rec) = region.syn_record(slot) {
                let weight = (rec.weight as i32 + delta).clamp(0, 1000) as u16;
                region.syn_set_weight(slot, weight);
            }
        });
    }

    // --- persistence ---

    /// Write every live, identified edge into caller-owned arrays.
    /// Returns the edge count written.
    pub fn snapshot_to_arrays(&self, out: &mut SnapshotArrays<'_>) -> usize {
        let cap = out.capacity();
        let mut n = 0;
        self.region.syn_for_each_live(|_, rec| {
            if n >= cap {
                return;
            }
            let src_id = self.region.node_source_id(rec.source_ptr);
            let tgt_id = self.region.node_source_id(rec.target_ptr);
            if src_id == 0 || tgt_id == 0 {
                return;
            }
            out.source_ids[n] = src_id;
            out.target_ids[n] = tgt_id;
            out.weights[n] = rec.weight;
            out.jitters[n] = rec.jitter;
            n += 1;
        });
        n
    }

    /// Recreate edges from parallel arrays. Tuples whose endpoints no
    /// longer resolve are skipped; returns how many edges were restored.
    pub fn restore_from_arrays(
        &mut self,
        source_ids: &[u32],
        target_ids: &[u32],
        weights: &[u16],
        jitters: &[u16],
    ) -> BridgeResult<usize> {
        let len = source_ids
            .len()
            .min(target_ids.len())
            .min(weights.len())
            .min(jitters.len());

        let mut restored = 0;
        for i in 0..len {
            let (Some(src), Some(tgt)) = (
                self.region.ident_lookup(source_ids[i]),
                self.region.ident_lookup(target_ids[i]),
            ) else {
                continue;
            };
            let _guard = self.region.lock_chain_editor().map_err(BridgeError::from)?;
            self.region.syn_connect(src, tgt, weights[i], jitters[i])?;
            restored += 1;
        }
        Ok(restored)
    }

    /// Owned-snapshot convenience over [`Self::snapshot_to_arrays`].
    pub fn snapshot(&self) -> BrainSnapshot {
        let mut snap = BrainSnapshot::default();
        self.region.syn_for_each_live(|_, rec| {
            let src_id = self.region.node_source_id(rec.source_ptr);
            let tgt_id = self.region.node_source_id(rec.target_ptr);
            if src_id != 0 && tgt_id != 0 {
                snap.push(src_id, tgt_id, rec.weight, rec.jitter);
            }
        });
        snap
    }

    pub fn restore(&mut self, snap: &BrainSnapshot) -> BridgeResult<usize> {
        self.restore_from_arrays(&snap.source_ids, &snap.target_ids, &snap.weights, &snap.jitters)
    }

    /// Stream every live, identified edge to a callback as primitives,
    /// with no per-call allocation.
    pub fn snapshot_stream(&self, mut f: impl FnMut(u32, u32, u16, u16)) -> usize {
        let mut n = 0;
        self.region.syn_for_each_live(|_, rec| {
            let src_id = self.region.node_source_id(rec.source_ptr);
            let tgt_id = self.region.node_source_id(rec.target_ptr);
            if src_id != 0 && tgt_id != 0 {
                f(src_id, tgt_id, rec.weight, rec.jitter);
                n += 1;
            }
        });
        n
    }

    // --- reads ---

    pub fn read_note(&self, source_id: u32) -> BridgeResult<NoteSnapshot> {
        let ptr = match self.region.ident_lookup(source_id) {
            Some(ptr) => ptr,
            None => return self.report(Err(BridgeError::NotFound)),
        };
        Ok(self.region.read_node_editor(ptr)?)
    }

    /// Walk the live chain head-first. The callback sees each node's
    /// pointer and snapshot; no allocation per call.
    pub fn traverse_notes(&self, mut f: impl FnMut(u32, &NoteSnapshot)) -> BridgeResult<u32> {
        let cap = self.region.config().node_capacity;
        let mut cur = self.region.head_ptr();
        let mut visited = 0;
        while cur != 0 && visited < cap {
            let snap = self.region.read_node_editor(cur)?;
            f(cur, &snap);
            visited += 1;
            cur = self.region.node_next(cur);
        }
        if cur != 0 {
            self.region.latch(KernelFault::KernelPanic);
            return Err(BridgeError::Kernel(KernelError::KernelPanic {
                reason: "chain walk exceeded node capacity",
            }));
        }
        Ok(visited)
    }

    // --- registers and transport ---

    pub fn set_bpm(&self, bpm: f64) {
        self.region.set_tempo_milli_bpm((bpm * 1000.0).round() as u32);
    }

    pub fn bpm(&self) -> f64 {
        self.region.tempo_milli_bpm() as f64 / 1000.0
    }

    pub fn playhead_tick(&self) -> u32 {
        self.region.playhead()
    }

    pub fn set_humanize(&self, timing_ppt: u32, velocity_ppt: u32) {
        self.region.set_humanize(timing_ppt, velocity_ppt);
    }

    pub fn set_transpose(&self, semitones: i32) {
        self.region.set_transpose(semitones);
    }

    pub fn set_velocity_mult(&self, ppt: u32) {
        self.region.set_velocity_mult_ppt(ppt);
    }

    pub fn set_prng_seed(&self, seed: u32) {
        self.region.set_prng_seed(seed);
    }

    pub fn set_groove(&self, offsets: &[i32]) -> BridgeResult<()> {
        Ok(self.region.set_groove(offsets)?)
    }

    pub fn clear_groove(&self) {
        self.region.clear_groove();
    }

    pub fn node_count(&self) -> u32 {
        self.region.node_count()
    }

    pub fn synapse_stats(&self) -> sym_kernel::SynapseStats {
        self.region.syn_stats()
    }

    /// Tear the whole kernel down to a fresh state.
    pub fn hard_reset(&mut self) {
        self.region.hard_reset();
        self.local.reset();
        self.ids = IdGenerator::new();
        self.patch_ring = PatchRing::default();
        self.structural_ring = StructuralRing::default();
        self.patch_deadline = None;
        self.structural_deadline = None;
        self.fired.clear();
        self.tick = 0;
    }
}
