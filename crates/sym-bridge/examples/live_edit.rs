//! Live-edit walkthrough: an editor mutates a playing sequence while a
//! consumer runs quanta on another thread.
//!
//! Run with `RUST_LOG=debug cargo run -p sym-bridge --example live_edit`.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sym_bridge::{Bridge, ClipNote};
use sym_core::config::KernelConfig;
use sym_kernel::{PatchField, Region};
use sym_realtime::Consumer;

fn main() {
    env_logger::init();

    let region = Arc::new(Region::new(KernelConfig::default()).expect("region"));

    let audio = {
        let region = Arc::clone(&region);
        thread::spawn(move || {
            let mut consumer = Consumer::new(region);
            for _ in 0..200 {
                for event in consumer.process() {
                    println!(
                        "  [audio] tick {:>5}  pitch {:>3}  vel {:>3}  dur {}",
                        event.tick, event.pitch, event.velocity, event.duration
                    );
                }
                thread::sleep(Duration::from_millis(2));
            }
        })
    };

    let mut bridge = Bridge::new(Arc::clone(&region));

    // A four-note clip, batch-loaded in one flush.
    let ids = bridge
        .load_clip(&[
            ClipNote { pitch: 60, velocity: 100, duration: 480, base_tick: 0, muted: false },
            ClipNote { pitch: 64, velocity: 96, duration: 480, base_tick: 480, muted: false },
            ClipNote { pitch: 67, velocity: 92, duration: 480, base_tick: 960, muted: false },
            ClipNote { pitch: 72, velocity: 88, duration: 480, base_tick: 1440, muted: false },
        ])
        .expect("load clip");
    println!("[editor] loaded clip, ids {ids:?}");

    // Edits while it plays: drag the second note's pitch around (these
    // coalesce), then commit by ticking past the debounce window.
    for pitch in [65, 66, 67, 66] {
        bridge.patch_debounced(ids[1], PatchField::Pitch, pitch);
    }
    for _ in 0..12 {
        bridge.tick();
        thread::sleep(Duration::from_millis(1));
    }
    println!("[editor] second note settled at pitch {}", bridge.read_note(ids[1]).expect("read").pitch);

    // Wire a probabilistic edge, roll across it, and reward the walk.
    bridge.connect(ids[0], ids[1], 800, 0).expect("connect");
    if let Some(next) = bridge.fire_next(ids[0]).expect("fire") {
        println!("[editor] follow-up roll landed on note id {next}");
    }
    bridge.reward(1.0);

    let snapshot = bridge.snapshot();
    println!(
        "[editor] brain snapshot: {}",
        serde_json::to_string(&snapshot).expect("serialize")
    );

    audio.join().expect("audio thread");
    println!("[editor] done; playhead at {}", bridge.playhead_tick());
}
