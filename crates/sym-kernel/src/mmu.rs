//! Kernel MMU
//!
//! The only code allowed to mutate chain structure. Commands arrive on the
//! ring; execution happens under the chain mutex with context-aware
//! acquisition (audio: bounded try, editor: yielding spin). Per call, at
//! most 256 commands are drained; the rest wait for the next quantum or
//! the next editor flush.
//!
//! Linking discipline: a new node's own words are fully written before the
//! predecessor's `next` (or the head pointer) is release-stored, so a
//! lock-free walker either sees the old chain or the complete new one.

use std::sync::atomic::Ordering;

use sym_core::error::KernelFault;
use sym_core::layout::{command, commit, header, node};

use crate::region::Region;
use crate::ring::Command;

/// Per-call drain cap; bounds audio-thread work.
pub const MAX_COMMANDS_PER_POLL: u32 = 256;

/// Who is asking for the chain mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuContext {
    /// Realtime thread: never blocks, silently retries next quantum.
    Audio,
    /// Editor/worker thread: may yield, faults if the chain never frees.
    Editor,
}

impl Region {
    /// Drain up to [`MAX_COMMANDS_PER_POLL`] commands. Returns how many
    /// were executed; 0 when the mutex was contended (audio) or poisoned
    /// wait was exhausted (editor, with KERNEL_PANIC latched).
    pub fn process_commands(&self, ctx: MmuContext) -> u32 {
        let guard = match ctx {
            MmuContext::Audio => match self.try_lock_chain_audio() {
                Some(g) => g,
                None => return 0,
            },
            MmuContext::Editor => match self.lock_chain_editor() {
                Ok(g) => g,
                Err(_) => return 0,
            },
        };

        let mut processed = 0;
        while processed < MAX_COMMANDS_PER_POLL {
            let Some(cmd) = self.ring_read() else {
                break;
            };
            self.execute(cmd);
            processed += 1;
        }
        drop(guard);
        processed
    }

    fn execute(&self, cmd: Command) {
        match cmd.opcode {
            command::INSERT => self.cmd_insert(cmd.p1, cmd.p2),
            command::DELETE => self.cmd_delete(cmd.p1),
            command::CLEAR => self.cmd_clear(),
            command::PATCH => {
                // Reserved: attribute patches take the direct path today.
            }
            command::CONNECT => {
                let weight = (cmd.p3 >> 16) as u16;
                let jitter = (cmd.p3 & 0xFFFF) as u16;
                if let Err(err) = self.syn_connect(cmd.p1, cmd.p2, weight, jitter) {
                    log::warn!("CONNECT {:#x}->{:#x} failed: {err}", cmd.p1, cmd.p2);
                }
                self.bump_telemetry();
            }
            command::DISCONNECT => {
                let tgt = if cmd.p2 == 0 { None } else { Some(cmd.p2) };
                if let Err(err) = self.syn_disconnect(cmd.p1, tgt) {
                    log::warn!("DISCONNECT {:#x} failed: {err}", cmd.p1);
                }
                self.bump_telemetry();
            }
            other => {
                self.latch(KernelFault::UnknownOpcode);
                log::error!("unknown command opcode {other}");
            }
        }
    }

    // --- INSERT ---

    fn cmd_insert(&self, ptr: u32, prev: u32) {
        if self.check_node_ptr(ptr).is_err() {
            return;
        }
        if prev != 0 && self.check_node_ptr(prev).is_err() {
            return;
        }

        let tick = self.node_base_tick(ptr);
        if self.in_safe_zone(tick) {
            self.latch(KernelFault::SafeZone);
            self.reclaim_slot(ptr);
            return;
        }

        if prev == 0 {
            let old_head = self.head_ptr();
            self.node_word(ptr, node::NEXT).store(old_head, Ordering::Relaxed);
            self.node_word(ptr, node::PREV).store(0, Ordering::Relaxed);
            if old_head != 0 {
                self.node_word(old_head, node::PREV).store(ptr, Ordering::Relaxed);
            }
            // Publication point for the whole node.
            self.store(header::HEAD_PTR, ptr);
        } else {
            let next = self.node_next(prev);
            self.node_word(ptr, node::NEXT).store(next, Ordering::Relaxed);
            self.node_word(ptr, node::PREV).store(prev, Ordering::Relaxed);
            if next != 0 {
                self.node_word(next, node::PREV).store(ptr, Ordering::Relaxed);
            }
            self.node_word(prev, node::NEXT).store(ptr, Ordering::Release);
        }

        self.word(header::NODE_COUNT).fetch_add(1, Ordering::Relaxed);

        let source_id = self.node_source_id(ptr);
        if source_id > 0 {
            if let Err(err) = self.ident_insert(source_id, ptr) {
                log::warn!("identity insert for id {source_id} failed: {err}");
            }
        }

        self.mark_structural_change();
    }

    // --- DELETE ---

    fn cmd_delete(&self, ptr: u32) {
        if self.check_node_ptr(ptr).is_err() {
            return;
        }

        let tick = self.node_base_tick(ptr);
        if self.in_safe_zone(tick) {
            self.latch(KernelFault::SafeZone);
            return;
        }

        let prev = self.node_prev(ptr);
        let next = self.node_next(ptr);
        if prev == 0 {
            self.store(header::HEAD_PTR, next);
        } else {
            self.node_word(prev, node::NEXT).store(next, Ordering::Release);
        }
        if next != 0 {
            self.node_word(next, node::PREV).store(prev, Ordering::Release);
        }

        let source_id = self.node_source_id(ptr);
        if source_id > 0 {
            self.ident_remove(source_id);
        }

        if let Err(err) = self.syn_tombstone_all_for_node(ptr) {
            log::warn!("synapse tombstoning for {ptr:#x} hit {err}");
        }

        self.word(header::NODE_COUNT).fetch_sub(1, Ordering::Relaxed);
        self.reclaim_slot(ptr);
        self.mark_structural_change();
    }

    // --- CLEAR ---

    fn cmd_clear(&self) {
        // Unlink everything first; Zone A slots go back through a wholesale
        // free-list rebuild, Zone B slots are the editor's to reset.
        let mut cur = self.head_ptr();
        let mut steps = 0;
        while cur != 0 && steps <= self.config().node_capacity {
            cur = self.node_next(cur);
            steps += 1;
        }
        if cur != 0 {
            log::error!("chain walk exceeded node capacity during CLEAR");
        }

        self.store(header::HEAD_PTR, 0);
        self.store(header::NODE_COUNT, 0);
        self.rebuild_free_list();
        self.ident_clear();
        self.syn_clear();
        self.mark_structural_change();
    }

    fn rebuild_free_list(&self) {
        let split = self.config().zone_split();
        for i in 0..split {
            let next = if i + 1 < split { self.node_ptr(i + 1) } else { 0 };
            self.byte_word(self.node_ptr(i)).store(next, Ordering::Relaxed);
        }
        let head64 = self.word64(header::FREE_HEAD);
        let version = (head64.load(Ordering::Acquire) >> 32).wrapping_add(1);
        head64.store((version << 32) | self.node_ptr(0) as u64, Ordering::Release);
        self.store(header::FREE_COUNT, split);
    }

    // --- helpers ---

    /// Structural edits are refused in `[playhead, playhead + safe_zone)`.
    pub fn in_safe_zone(&self, tick: u32) -> bool {
        let safe = self.safe_zone();
        if safe == 0 {
            return false;
        }
        let playhead = self.playhead();
        tick >= playhead && tick - playhead < safe
    }

    /// Return a never-linked or just-unlinked slot to its zone's pool.
    fn reclaim_slot(&self, ptr: u32) {
        if self.in_zone_a(ptr) {
            let _ = self.free_push(ptr);
        } else if !self.reclaim_push(ptr) {
            // Slot leaks until hard reset; the editor will notice the warn.
            log::warn!("reclaim ring full; Zone B slot {ptr:#x} leaked");
        }
    }

    fn mark_structural_change(&self) {
        self.set_commit_flag(commit::PENDING);
        self.bump_update_generation();
        self.bump_telemetry();
    }
}

#[cfg(test)]
mod tests {
    use sym_core::config::KernelConfig;
    use sym_core::packed::{NodeFlags, Opcode, pack_node};

    use super::*;
    use crate::node::AUDIO_READ_RETRIES;

    fn region() -> Region {
        Region::new(KernelConfig {
            node_capacity: 64,
            ring_capacity: 64,
            synapse_capacity: 256,
            ..Default::default()
        })
        .unwrap()
    }

    /// Allocate from Zone A, write fields, and queue an INSERT.
    fn queue_note(r: &Region, pitch: u8, tick: u32, source_id: u32, prev: u32) -> u32 {
        let ptr = r.free_pop().unwrap();
        r.write_floating_node(
            ptr,
            pack_node(Opcode::Note, pitch, 100, NodeFlags::ACTIVE),
            tick,
            480,
            source_id,
        )
        .unwrap();
        r.ring_write(Command::new(command::INSERT, ptr, prev, 0)).unwrap();
        ptr
    }

    fn chain_ticks(r: &Region) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cur = r.head_ptr();
        while cur != 0 {
            out.push(r.read_node(cur, AUDIO_READ_RETRIES).unwrap().base_tick);
            cur = r.node_next(cur);
        }
        out
    }

    #[test]
    fn test_insert_at_head_reverse_order_sorts_chain() {
        let r = region();
        // Head-insert in reverse tick order -> ascending chain.
        queue_note(&r, 67, 960, 3, 0);
        queue_note(&r, 64, 480, 2, 0);
        queue_note(&r, 60, 0, 1, 0);
        assert_eq!(r.process_commands(MmuContext::Editor), 3);

        assert_eq!(chain_ticks(&r), vec![0, 480, 960]);
        assert_eq!(r.node_count(), 3);
        assert_eq!(r.commit_flag(), commit::PENDING);
    }

    #[test]
    fn test_insert_after_predecessor() {
        let r = region();
        let first = queue_note(&r, 60, 0, 1, 0);
        r.process_commands(MmuContext::Editor);
        queue_note(&r, 64, 480, 2, first);
        r.process_commands(MmuContext::Editor);

        assert_eq!(chain_ticks(&r), vec![0, 480]);
        // Symmetry: next/prev agree.
        let second = r.node_next(first);
        assert_eq!(r.node_prev(second), first);
    }

    #[test]
    fn test_insert_registers_identity() {
        let r = region();
        let ptr = queue_note(&r, 60, 0, 42, 0);
        r.process_commands(MmuContext::Editor);
        assert_eq!(r.ident_lookup(42), Some(ptr));
    }

    #[test]
    fn test_delete_unlinks_and_frees() {
        let r = region();
        let a = queue_note(&r, 60, 0, 1, 0);
        queue_note(&r, 64, 480, 2, a);
        r.process_commands(MmuContext::Editor);
        let b = r.node_next(a);

        let free_before = r.free_count();
        r.ring_write(Command::new(command::DELETE, b, 0, 0)).unwrap();
        r.process_commands(MmuContext::Editor);

        assert_eq!(chain_ticks(&r), vec![0]);
        assert_eq!(r.node_count(), 1);
        assert_eq!(r.ident_lookup(2), None);
        assert_eq!(r.free_count(), free_before + 1);
    }

    #[test]
    fn test_delete_head_moves_head_ptr() {
        let r = region();
        let a = queue_note(&r, 60, 0, 1, 0);
        queue_note(&r, 64, 480, 2, a);
        r.process_commands(MmuContext::Editor);
        let b = r.node_next(a);

        r.ring_write(Command::new(command::DELETE, a, 0, 0)).unwrap();
        r.process_commands(MmuContext::Editor);
        assert_eq!(r.head_ptr(), b);
        assert_eq!(r.node_prev(b), 0);
    }

    #[test]
    fn test_delete_tombstones_synapses_both_directions() {
        let r = region();
        let a = queue_note(&r, 60, 0, 1, 0);
        r.process_commands(MmuContext::Editor);
        let b = queue_note(&r, 64, 480, 2, a);
        let c = queue_note(&r, 67, 960, 3, 0);
        r.process_commands(MmuContext::Editor);

        r.syn_connect(b, c, 500, 0).unwrap();
        r.syn_connect(c, b, 500, 0).unwrap();
        r.syn_connect(a, c, 500, 0).unwrap();

        r.ring_write(Command::new(command::DELETE, b, 0, 0)).unwrap();
        r.process_commands(MmuContext::Editor);

        let mut survivors = Vec::new();
        r.syn_for_each_live(|_, rec| survivors.push((rec.source_ptr, rec.target_ptr)));
        assert_eq!(survivors, vec![(a, c)]);
    }

    #[test]
    fn test_safe_zone_rejects_insert() {
        let r = region();
        r.set_safe_zone(960);
        r.set_playhead(1500);

        // Inside the window: 1500 <= 2000 < 2460.
        queue_note(&r, 60, 2000, 9, 0);
        let free_before = r.free_count();
        r.process_commands(MmuContext::Editor);

        assert_eq!(r.node_count(), 0);
        assert_eq!(r.fault(), KernelFault::SafeZone);
        // Rejected slot went back to the free list.
        assert_eq!(r.free_count(), free_before + 1);
    }

    #[test]
    fn test_safe_zone_allows_past_and_far_future() {
        let r = region();
        r.set_safe_zone(960);
        r.set_playhead(1500);

        queue_note(&r, 60, 1000, 1, 0); // behind the playhead
        queue_note(&r, 64, 2460, 2, 0); // exactly past the window
        r.process_commands(MmuContext::Editor);
        assert_eq!(r.node_count(), 2);
    }

    #[test]
    fn test_safe_zone_rejects_delete() {
        let r = region();
        let a = queue_note(&r, 60, 1000, 1, 0);
        r.process_commands(MmuContext::Editor);

        r.set_safe_zone(500);
        r.set_playhead(900);
        r.ring_write(Command::new(command::DELETE, a, 0, 0)).unwrap();
        r.process_commands(MmuContext::Editor);

        assert_eq!(r.node_count(), 1, "node in safe zone must survive DELETE");
        assert_eq!(r.fault(), KernelFault::SafeZone);
    }

    #[test]
    fn test_clear_resets_everything() {
        let r = region();
        let a = queue_note(&r, 60, 0, 1, 0);
        queue_note(&r, 64, 480, 2, a);
        r.process_commands(MmuContext::Editor);
        let b = r.node_next(a);
        r.syn_connect(a, b, 500, 0).unwrap();

        r.ring_write(Command::new(command::CLEAR, 0, 0, 0)).unwrap();
        r.process_commands(MmuContext::Editor);

        assert_eq!(r.head_ptr(), 0);
        assert_eq!(r.node_count(), 0);
        assert_eq!(r.free_count(), r.config().zone_split());
        assert_eq!(r.ident_lookup(1), None);
        assert_eq!(r.syn_stats().used_slots, 0);
    }

    #[test]
    fn test_connect_disconnect_commands() {
        let r = region();
        let a = queue_note(&r, 60, 0, 1, 0);
        r.process_commands(MmuContext::Editor);
        let b = queue_note(&r, 64, 480, 2, a);
        // FIFO lets CONNECT reference the node inserted one command earlier.
        r.ring_write(Command::new(command::CONNECT, a, b, (750 << 16) | 10)).unwrap();
        r.process_commands(MmuContext::Editor);
        assert_eq!(r.syn_stats().live, 1);

        r.ring_write(Command::new(command::DISCONNECT, a, 0, 0)).unwrap();
        r.process_commands(MmuContext::Editor);
        assert_eq!(r.syn_stats().live, 0);
    }

    #[test]
    fn test_unknown_opcode_latches_fatal() {
        let r = region();
        r.ring_write(Command::new(99, 0, 0, 0)).unwrap();
        r.process_commands(MmuContext::Editor);
        assert_eq!(r.fault(), KernelFault::UnknownOpcode);
    }

    #[test]
    fn test_audio_context_skips_when_contended() {
        let r = region();
        queue_note(&r, 60, 0, 1, 0);
        let _held = r.lock_chain_editor().unwrap();
        assert_eq!(r.process_commands(MmuContext::Audio), 0);
        assert_eq!(r.ring_len(), 1, "command stays queued for the next quantum");
    }

    #[test]
    fn test_telemetry_counts_mutations() {
        let r = region();
        let before = r.telemetry();
        let a = queue_note(&r, 60, 0, 1, 0);
        r.process_commands(MmuContext::Editor);
        r.ring_write(Command::new(command::DELETE, a, 0, 0)).unwrap();
        r.process_commands(MmuContext::Editor);
        assert_eq!(r.telemetry(), before + 2);
    }
}
