//! Chain mutex
//!
//! A single word in the header guards all structural mutation of the
//! chain and its satellite tables. Acquisition is context-aware:
//! - Audio: at most 3 compare-exchange attempts, no yield, no error on
//!   failure; the quantum simply skips command processing.
//! - Editor: spin with 1 ms sleeps up to ~200 iterations, then latch
//!   KERNEL_PANIC (something is holding the chain far beyond any
//!   legitimate critical section).
//!
//! Readers never take this lock.

use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use sym_core::error::{KernelError, KernelFault, KernelResult};
use sym_core::layout::header;

use crate::region::Region;

const AUDIO_SPINS: u32 = 3;
const EDITOR_SPINS: u32 = 200;
const EDITOR_YIELD: Duration = Duration::from_millis(1);

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

/// RAII guard; the mutex word is released on drop.
pub struct ChainGuard<'a> {
    region: &'a Region,
}

impl Drop for ChainGuard<'_> {
    fn drop(&mut self) {
        self.region
            .word(header::CHAIN_MUTEX)
            .store(UNLOCKED, Ordering::Release);
    }
}

impl Region {
    fn try_lock_once(&self) -> bool {
        self.word(header::CHAIN_MUTEX)
            .compare_exchange(UNLOCKED, LOCKED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Audio-context acquisition: bounded attempts, silent failure.
    pub fn try_lock_chain_audio(&self) -> Option<ChainGuard<'_>> {
        for _ in 0..AUDIO_SPINS {
            if self.try_lock_once() {
                return Some(ChainGuard { region: self });
            }
            std::hint::spin_loop();
        }
        None
    }

    /// Editor-context acquisition: yielding spin, fatal on exhaustion.
    pub fn lock_chain_editor(&self) -> KernelResult<ChainGuard<'_>> {
        for _ in 0..EDITOR_SPINS {
            if self.try_lock_once() {
                return Ok(ChainGuard { region: self });
            }
            thread::sleep(EDITOR_YIELD);
        }
        self.latch(KernelFault::KernelPanic);
        Err(KernelError::KernelPanic {
            reason: "chain mutex acquisition exhausted",
        })
    }
}

#[cfg(test)]
mod tests {
    use sym_core::config::KernelConfig;

    use super::*;

    fn region() -> Region {
        Region::new(KernelConfig {
            node_capacity: 16,
            synapse_capacity: 256,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_audio_lock_release_cycle() {
        let r = region();
        {
            let _guard = r.try_lock_chain_audio().unwrap();
            assert!(r.try_lock_chain_audio().is_none());
        }
        assert!(r.try_lock_chain_audio().is_some());
    }

    #[test]
    fn test_audio_gives_up_silently() {
        let r = region();
        let _held = r.lock_chain_editor().unwrap();
        assert!(r.try_lock_chain_audio().is_none());
        // No fault latched by the audio path.
        assert_eq!(r.fault(), KernelFault::Ok);
    }

    #[test]
    fn test_editor_acquires_after_release() {
        let r = region();
        {
            let _g = r.try_lock_chain_audio().unwrap();
        }
        assert!(r.lock_chain_editor().is_ok());
    }
}
