//! End-to-end scenarios across the bridge, kernel, and consumer.

use std::sync::Arc;

use sym_bridge::{Bridge, BridgeError, ClipNote, NoteSpec};
use sym_core::config::KernelConfig;
use sym_core::error::KernelFault;
use sym_core::packed::Opcode;
use sym_kernel::{PatchField, Region};
use sym_realtime::{Consumer, NoteEvent};

fn setup(cfg: KernelConfig) -> (Arc<Region>, Bridge, Consumer) {
    let region = Arc::new(Region::new(cfg).unwrap());
    let bridge = Bridge::new(Arc::clone(&region));
    let consumer = Consumer::new(Arc::clone(&region));
    (region, bridge, consumer)
}

fn small() -> KernelConfig {
    KernelConfig {
        node_capacity: 64,
        ring_capacity: 64,
        synapse_capacity: 512,
        ..Default::default()
    }
}

fn note(id: u32, pitch: u8, tick: u32) -> NoteSpec {
    NoteSpec {
        pitch,
        base_tick: tick,
        source_id: id,
        ..Default::default()
    }
}

/// S1: three head-inserts in reverse pitch/tick order come out as an
/// ascending chain, and 80 quanta of 24 ticks emit exactly those three
/// events at their base ticks.
#[test]
fn sequential_chain_plays_in_order() {
    let (region, mut bridge, mut consumer) = setup(small());

    bridge.insert_async(note(3, 67, 960)).unwrap();
    bridge.insert_async(note(2, 64, 480)).unwrap();
    bridge.insert_async(note(1, 60, 0)).unwrap();

    let mut events: Vec<NoteEvent> = Vec::new();
    for _ in 0..80 {
        events.extend_from_slice(consumer.process());
    }

    assert_eq!(region.node_count(), 3);
    assert_eq!(events.len(), 3);
    assert_eq!(
        events.iter().map(|e| (e.tick, e.pitch)).collect::<Vec<_>>(),
        vec![(0, 60), (480, 64), (960, 67)]
    );
    assert_eq!(events[0].duration, 480);
}

/// S2: an insert landing inside the safe zone returns a floating pointer,
/// latches SAFE_ZONE when the kernel refuses it, and never links.
#[test]
fn safe_zone_rejects_insert_ahead_of_playhead() {
    let cfg = KernelConfig {
        safe_zone_ticks: 960,
        ..small()
    };
    let (region, mut bridge, consumer) = setup(cfg);
    region.set_playhead(1500);

    // 2000 - 1500 = 500 < 960 and 2000 >= 1500: inside the zone.
    let ptr = bridge.insert_async(note(9, 60, 2000)).unwrap();
    assert_ne!(ptr, 0, "floating pointer is returned before the kernel votes");

    consumer.poll();
    assert_eq!(region.fault(), KernelFault::SafeZone);
    assert_eq!(region.node_count(), 0);
    assert_eq!(region.ident_lookup(9), None);
}

/// S3: five same-tick debounced patches coalesce; only the last value is
/// applied at flush.
#[test]
fn patch_coalescing_applies_last_value() {
    let (_region, mut bridge, _consumer) = setup(small());
    bridge.insert_sync(note(7, 60, 0)).unwrap();

    for i in 0..5 {
        bridge.patch_debounced(7, PatchField::Pitch, 60 + i);
    }
    assert_eq!(bridge.pending_patches(), 1, "coalesced to one entry");

    for _ in 0..10 {
        bridge.tick();
    }
    assert_eq!(bridge.read_note(7).unwrap().pitch, 64);
}

/// S4: a barrier holds traversal until the playhead aligns to its cycle,
/// then releases with no spurious emissions.
#[test]
fn barrier_phase_locks_traversal() {
    let (_region, mut bridge, mut consumer) = setup(small());

    bridge.insert_async(note(3, 72, 100)).unwrap();
    bridge
        .insert_async(NoteSpec {
            opcode: Opcode::Barrier,
            duration: 96, // cycle length rides the duration word
            base_tick: 0,
            source_id: 2,
            ..Default::default()
        })
        .unwrap();
    bridge.insert_async(note(1, 60, 0)).unwrap();

    // Quantum 0 emits the pre-barrier note and parks at target 96.
    let first = consumer.process().to_vec();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].pitch, 60);

    // Held until the playhead reaches 96.
    assert!(consumer.process().is_empty());
    assert!(consumer.process().is_empty());
    assert!(consumer.process().is_empty());

    // Window [96, 120): released, the post-barrier note fires once.
    let released = consumer.process().to_vec();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].pitch, 72);
    assert_eq!(released[0].tick, 100);

    assert!(consumer.process().is_empty());
}

/// S5: snapshot -> clear -> reinsert endpoints -> restore reproduces the
/// edge set; a fresh duplicate connect adds a second entry per policy.
#[test]
fn synapse_snapshot_round_trip() {
    let (_region, mut bridge, _consumer) = setup(small());
    bridge.insert_sync(note(1, 60, 0)).unwrap(); // A
    bridge.insert_sync(note(2, 64, 480)).unwrap(); // B
    bridge.insert_sync(note(3, 67, 960)).unwrap(); // C

    bridge.connect(1, 2, 750, 10).unwrap();
    bridge.connect(1, 3, 200, 0).unwrap();

    let mut src = [0u32; 8];
    let mut tgt = [0u32; 8];
    let mut w = [0u16; 8];
    let mut j = [0u16; 8];
    let n = bridge.snapshot_to_arrays(&mut sym_bridge::SnapshotArrays {
        source_ids: &mut src,
        target_ids: &mut tgt,
        weights: &mut w,
        jitters: &mut j,
    });
    assert_eq!(n, 2);

    bridge.clear().unwrap();
    assert_eq!(bridge.node_count(), 0);
    assert_eq!(bridge.synapse_stats().used_slots, 0);

    // Re-create the endpoints under their old ids, then restore.
    bridge.insert_sync(note(1, 60, 0)).unwrap();
    bridge.insert_sync(note(2, 64, 480)).unwrap();
    bridge.insert_sync(note(3, 67, 960)).unwrap();
    let restored = bridge
        .restore_from_arrays(&src[..n], &tgt[..n], &w[..n], &j[..n])
        .unwrap();
    assert_eq!(restored, 2);
    assert_eq!(bridge.synapse_stats().used_slots, 2);

    let snap = bridge.snapshot();
    assert_eq!(
        snap.sorted_tuples(),
        vec![(1, 2, 750, 10), (1, 3, 200, 0)]
    );

    // Documented duplicate policy: a repeat connect is a second edge.
    bridge.connect(1, 2, 500, 0).unwrap();
    assert_eq!(bridge.synapse_stats().live, 3);
}

/// Restore skips tuples whose endpoints were not re-created.
#[test]
fn restore_skips_missing_endpoints() {
    let (_region, mut bridge, _consumer) = setup(small());
    bridge.insert_sync(note(1, 60, 0)).unwrap();
    bridge.insert_sync(note(2, 64, 480)).unwrap();
    bridge.connect(1, 2, 600, 0).unwrap();

    let snap = bridge.snapshot();
    bridge.clear().unwrap();

    // Only endpoint 1 comes back.
    bridge.insert_sync(note(1, 60, 0)).unwrap();
    assert_eq!(bridge.restore(&snap).unwrap(), 0);
    assert_eq!(bridge.synapse_stats().used_slots, 0);
}

/// Generative follow: fire_next rolls over a note's outgoing edges,
/// feeds the fired window, and the subsequent reward strengthens exactly
/// the edges that were walked.
#[test]
fn probabilistic_follow_feeds_learning() {
    let (region, mut bridge, _consumer) = setup(small());
    bridge.insert_sync(note(1, 60, 0)).unwrap();
    bridge.insert_sync(note(2, 64, 480)).unwrap();
    bridge.insert_sync(note(3, 67, 960)).unwrap();

    bridge.connect(1, 2, 500, 0).unwrap();
    bridge.connect(2, 3, 500, 0).unwrap();
    bridge.set_learning_rate(10.0);
    region.set_prng_seed(42);

    // Walk the graph two hops: each note has exactly one follow-up, so
    // the rolls are forced and the path is 1 -> 2 -> 3.
    let second = bridge.fire_next(1).unwrap().unwrap();
    assert_eq!(second, 2);
    let third = bridge.fire_next(second).unwrap().unwrap();
    assert_eq!(third, 3);
    assert_eq!(bridge.fire_next(third).unwrap(), None, "3 is a dead end");

    // Both walked edges sit in the fired window; reward moves them both.
    bridge.reward(1.0);
    assert_eq!(bridge.snapshot().sorted_tuples(), vec![
        (1, 2, 510, 0),
        (2, 3, 510, 0),
    ]);

    // A fixed seed and playhead replay the same walk.
    assert_eq!(bridge.fire_next(1).unwrap(), Some(2));
}

/// Ring saturation surfaces as RingFull and leaves the allocator clean
/// enough to retry after a drain.
#[test]
fn command_ring_full_is_retryable() {
    let cfg = KernelConfig {
        node_capacity: 256,
        ring_capacity: 8,
        ..small()
    };
    let (region, mut bridge, consumer) = setup(cfg);

    let mut queued = 0;
    let mut rejected = 0;
    for i in 0..10u32 {
        match bridge.insert_async(note(i + 1, 60, i * 480)) {
            Ok(_) => queued += 1,
            Err(BridgeError::RingFull) => rejected += 1,
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(queued, 7, "capacity-1 commands fit");
    assert_eq!(rejected, 3);

    consumer.poll();
    assert_eq!(region.node_count(), 7);
    // The ring drained; a retry succeeds.
    bridge.insert_async(note(99, 60, 9600)).unwrap();
    consumer.poll();
    assert_eq!(region.node_count(), 8);
}

/// Deleting a note mid-playback never emits it again and returns its
/// Zone B slot through the reclaim ring.
#[test]
fn delete_while_playing_reclaims_slot() {
    let (region, mut bridge, mut consumer) = setup(small());
    let ids = bridge
        .load_clip(&[
            ClipNote { pitch: 60, velocity: 100, duration: 480, base_tick: 0, muted: false },
            ClipNote { pitch: 64, velocity: 100, duration: 480, base_tick: 960, muted: false },
        ])
        .unwrap();

    // Play through the first note only.
    let mut events = Vec::new();
    for _ in 0..20 {
        events.extend_from_slice(consumer.process());
    }
    assert_eq!(events.len(), 1);

    bridge.delete_note_immediate(ids[1]).unwrap();
    assert!(region.reclaim_len() > 0);
    bridge.tick();
    assert_eq!(region.reclaim_len(), 0);

    for _ in 0..60 {
        events.extend_from_slice(consumer.process());
    }
    assert_eq!(events.len(), 1, "deleted note never fires");
}

/// BPM, groove, and register plumbing reach the consumer's transforms.
#[test]
fn registers_shape_emission() {
    let (_region, mut bridge, mut consumer) = setup(small());
    bridge.insert_sync(note(1, 60, 1)).unwrap();

    bridge.set_bpm(98.5);
    assert!((bridge.bpm() - 98.5).abs() < 1e-9);

    bridge.set_transpose(12);
    bridge.set_velocity_mult(500);
    bridge.set_groove(&[0, 3]).unwrap();

    let events = consumer.process().to_vec();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].pitch, 72);
    assert_eq!(events[0].velocity, 50);
    assert_eq!(events[0].tick, 4, "odd tick picks groove step 1");
}
