//! Audio-thread consumer
//!
//! Runs once per audio quantum:
//! 1. Poll the command ring (audio-context mutex rules, bounded work).
//! 2. On a pending structural commit, re-seek the cursor to the first
//!    node at or after the playhead and acknowledge.
//! 3. Walk the chain across the quantum window, emitting transformed note
//!    events; BARRIER nodes halt traversal until the playhead aligns to
//!    their cycle.
//! 4. Advance and store the playhead.
//!
//! The walk is bounded, allocation-free, and tolerant of torn reads: a
//! node whose versioned read fails its retry budget is skipped for this
//! quantum rather than stalling the thread.

use std::sync::Arc;

use sym_core::layout::commit;
use sym_core::packed::Opcode;
use sym_core::{CYCLE_INFINITE, KernelFault, modulated_tick};
use sym_kernel::{AUDIO_READ_RETRIES, MmuContext, Region};

use crate::event::NoteEvent;
use crate::transform;

/// Default quantum width in ticks.
const DEFAULT_QUANTUM_TICKS: u32 = 24;

/// Event buffer capacity; one quantum never emits more than this.
const EVENT_CAPACITY: usize = 256;

pub struct Consumer {
    region: Arc<Region>,
    /// Next chain node to consider; 0 = end of chain.
    cursor: u32,
    /// Barrier hold: traversal is parked until the playhead reaches this.
    pending_target: Option<u32>,
    quantum_ticks: u32,
    /// When unlinked, poll() leaves command processing to a worker role.
    linked: bool,
    events: Vec<NoteEvent>,
}

impl Consumer {
    pub fn new(region: Arc<Region>) -> Self {
        let cursor = region.head_ptr();
        Self {
            region,
            cursor,
            pending_target: None,
            quantum_ticks: DEFAULT_QUANTUM_TICKS,
            linked: true,
            events: Vec::with_capacity(EVENT_CAPACITY),
        }
    }

    /// Attach or detach the kernel linker. Detached consumers only read;
    /// some other role must drain the command ring.
    pub fn set_linker(&mut self, linked: bool) {
        self.linked = linked;
    }

    pub fn set_quantum_ticks(&mut self, ticks: u32) {
        self.quantum_ticks = ticks.max(1);
    }

    pub fn playhead_tick(&self) -> u32 {
        self.region.playhead()
    }

    pub fn set_playhead_tick(&self, tick: u32) {
        self.region.set_playhead(tick);
    }

    /// Rewind to the head of the chain with a zeroed playhead.
    pub fn reset(&mut self) {
        self.cursor = self.region.head_ptr();
        self.pending_target = None;
        self.events.clear();
        self.region.set_playhead(0);
    }

    /// Drain pending structural commands under audio mutex rules.
    /// Contention is absorbed; missed commands retry next quantum.
    pub fn poll(&self) -> u32 {
        if self.linked {
            self.region.process_commands(MmuContext::Audio)
        } else {
            0
        }
    }

    /// Run one quantum. Returns the events emitted inside the window
    /// `[playhead, playhead + quantum)`.
    pub fn process(&mut self) -> &[NoteEvent] {
        self.poll();
        self.events.clear();

        let start = self.region.playhead();
        let end = start.saturating_add(self.quantum_ticks);

        if self.region.commit_flag() == commit::PENDING {
            self.reseek(start);
            self.region.set_commit_flag(commit::ACK);
        }

        if let Some(target) = self.pending_target {
            if end < target {
                // Still phase-locked; time advances, traversal does not.
                self.region.set_playhead(end);
                return &self.events;
            }
            // Aligned: step past the barrier and resume.
            self.pending_target = None;
            if self.cursor != 0 {
                self.cursor = self.region.node_next(self.cursor);
            }
        }

        self.walk_window(start, end);
        self.region.set_playhead(end);
        &self.events
    }

    /// Re-find the first node at or after `playhead` (structure changed
    /// under us; the cursor may point at unlinked memory).
    fn reseek(&mut self, playhead: u32) {
        self.pending_target = None;
        let mut cur = self.region.head_ptr();
        while cur != 0 {
            match self.region.read_node(cur, AUDIO_READ_RETRIES) {
                Some(snap) if snap.base_tick >= playhead => break,
                Some(_) => cur = self.region.node_next(cur),
                None => cur = self.region.node_next(cur),
            }
        }
        self.cursor = cur;
    }

    fn walk_window(&mut self, start: u32, end: u32) {
        let node_cap = self.region.config().node_capacity;
        let mut steps = 0;

        while self.cursor != 0 && steps <= node_cap {
            steps += 1;
            let ptr = self.cursor;
            let Some(snap) = self.region.read_node(ptr, AUDIO_READ_RETRIES) else {
                // Torn under sustained writing: skip it this quantum.
                self.cursor = self.region.node_next(ptr);
                continue;
            };

            match Opcode::from_u8(snap.opcode_raw) {
                Some(Opcode::Barrier) => {
                    let cycle = snap.duration;
                    // Degenerate cycles (0 / infinite) never modulate.
                    let remainder = if cycle == 0 || cycle == CYCLE_INFINITE {
                        0
                    } else {
                        modulated_tick(end, cycle)
                    };
                    if remainder == 0 {
                        self.cursor = self.region.node_next(ptr);
                        continue;
                    }
                    self.pending_target = Some(end + (cycle - remainder));
                    return;
                }
                Some(Opcode::Note) => {
                    if snap.base_tick >= end {
                        return;
                    }
                    if snap.is_active() && !snap.is_muted() {
                        let tick = transform::trigger_tick(&self.region, snap.base_tick);
                        // Both bounds: jitter can throw a trigger outside
                        // the window its node is walked in, and the cursor
                        // will not come back for it.
                        if tick >= start && tick < end && self.events.len() < EVENT_CAPACITY {
                            self.events.push(NoteEvent {
                                tick,
                                pitch: transform::transformed_pitch(&self.region, snap.pitch),
                                velocity: transform::transformed_velocity(&self.region, &snap),
                                duration: snap.duration,
                                ptr,
                            });
                        }
                    }
                    self.cursor = self.region.node_next(ptr);
                }
                Some(Opcode::Rest) | Some(Opcode::Cc) | Some(Opcode::Bend) => {
                    // Carried for upstack layers; nothing to emit here.
                    if snap.base_tick >= end {
                        return;
                    }
                    self.cursor = self.region.node_next(ptr);
                }
                None => {
                    self.region.latch(KernelFault::UnknownOpcode);
                    log::error!("node {ptr:#x} carries opcode byte {}", snap.opcode_raw);
                    self.cursor = self.region.node_next(ptr);
                }
            }
        }
    }
}
