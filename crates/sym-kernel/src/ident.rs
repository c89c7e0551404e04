//! Identity and symbol tables
//!
//! Two linear-probe open-addressing tables sharing one slot space: the
//! identity table maps source-id -> node byte offset, the symbol table
//! stores the packed source location at the same slot index. Slot states:
//! empty (key 0), tombstone (key -1), live (key > 0).
//!
//! Structural changes happen under the chain mutex; lookups are lock-free
//! per-slot atomic reads from any thread.

use std::sync::atomic::Ordering;

use sym_core::error::{KernelError, KernelFault, KernelResult};
use sym_core::layout::{IDENT_TOMBSTONE, header};
use sym_core::mix::knuth_slot;

use crate::region::Region;

enum Probe {
    /// Live entry with this key.
    Found(u32),
    /// Would insert here (first tombstone on the path, else first empty).
    Insert { slot: u32, reusing_tombstone: bool },
    Full,
}

impl Region {
    #[inline]
    fn ident_key_word(&self, slot: u32) -> &std::sync::atomic::AtomicU32 {
        self.byte_word(self.map().ident_start + slot * 8)
    }

    #[inline]
    fn ident_val_word(&self, slot: u32) -> &std::sync::atomic::AtomicU32 {
        self.byte_word(self.map().ident_start + slot * 8 + 4)
    }

    fn ident_probe(&self, source_id: u32) -> Probe {
        let cap = self.config().ident_capacity();
        let mask = cap - 1;
        let start = knuth_slot(source_id, mask);
        let mut first_tombstone = None;

        for i in 0..cap {
            let slot = (start + i) & mask;
            let key = self.ident_key_word(slot).load(Ordering::Acquire);
            if key == source_id {
                return Probe::Found(slot);
            }
            if key == IDENT_TOMBSTONE {
                if first_tombstone.is_none() {
                    first_tombstone = Some(slot);
                }
                continue;
            }
            if key == 0 {
                return match first_tombstone {
                    Some(slot) => Probe::Insert {
                        slot,
                        reusing_tombstone: true,
                    },
                    None => Probe::Insert {
                        slot,
                        reusing_tombstone: false,
                    },
                };
            }
        }
        match first_tombstone {
            Some(slot) => Probe::Insert {
                slot,
                reusing_tombstone: true,
            },
            None => Probe::Full,
        }
    }

    /// Map `source_id` to `node_ptr`, updating in place when the id is
    /// already present. Latches LOAD_FACTOR_WARNING past 75% occupancy.
    pub fn ident_insert(&self, source_id: u32, node_ptr: u32) -> KernelResult<()> {
        debug_assert!(source_id > 0 && source_id != IDENT_TOMBSTONE);
        match self.ident_probe(source_id) {
            Probe::Found(slot) => {
                self.ident_val_word(slot).store(node_ptr, Ordering::Release);
                Ok(())
            }
            Probe::Insert {
                slot,
                reusing_tombstone,
            } => {
                self.ident_val_word(slot).store(node_ptr, Ordering::Release);
                self.ident_key_word(slot).store(source_id, Ordering::Release);
                if !reusing_tombstone {
                    let used = self.word(header::IDENT_USED).fetch_add(1, Ordering::Relaxed) + 1;
                    let cap = self.config().ident_capacity();
                    if used * 4 > cap * 3 {
                        self.latch(KernelFault::LoadFactorWarning);
                        log::warn!("identity table at {used}/{cap} slots");
                    }
                }
                Ok(())
            }
            Probe::Full => Err(KernelError::TableFull),
        }
    }

    /// Resolve a source id to its node byte offset.
    pub fn ident_lookup(&self, source_id: u32) -> Option<u32> {
        match self.ident_probe(source_id) {
            Probe::Found(slot) => Some(self.ident_val_word(slot).load(Ordering::Acquire)),
            _ => None,
        }
    }

    /// Tombstone an id. Returns whether it was present.
    pub fn ident_remove(&self, source_id: u32) -> bool {
        match self.ident_probe(source_id) {
            Probe::Found(slot) => {
                self.ident_key_word(slot).store(IDENT_TOMBSTONE, Ordering::Release);
                self.ident_val_word(slot).store(0, Ordering::Release);
                // Clear the parallel location entry with it.
                self.symbol_word(slot, 0).store(0, Ordering::Release);
                self.symbol_word(slot, 1).store(0, Ordering::Release);
                true
            }
            _ => false,
        }
    }

    /// Wipe both tables (CLEAR path; caller holds the chain mutex).
    pub fn ident_clear(&self) {
        let cap = self.config().ident_capacity();
        for slot in 0..cap {
            self.ident_key_word(slot).store(0, Ordering::Relaxed);
            self.ident_val_word(slot).store(0, Ordering::Relaxed);
            self.symbol_word(slot, 0).store(0, Ordering::Relaxed);
            self.symbol_word(slot, 1).store(0, Ordering::Relaxed);
        }
        self.word(header::IDENT_USED).store(0, Ordering::Release);
    }

    pub fn ident_used(&self) -> u32 {
        self.load(header::IDENT_USED)
    }

    // --- symbol table (parallel slot space) ---

    #[inline]
    fn symbol_word(&self, slot: u32, which: u32) -> &std::sync::atomic::AtomicU32 {
        self.byte_word(self.map().symbol_start + slot * 8 + which * 4)
    }

    /// Store the packed source location at the slot the identity insert
    /// for `source_id` will use. Writing the location first means there is
    /// never a moment where the identity is visible without it.
    pub fn symbol_store(&self, source_id: u32, file_hash: u32, line_col: u32) -> KernelResult<()> {
        let slot = match self.ident_probe(source_id) {
            Probe::Found(slot) => slot,
            Probe::Insert { slot, .. } => slot,
            Probe::Full => return Err(KernelError::TableFull),
        };
        self.symbol_word(slot, 0).store(file_hash, Ordering::Release);
        self.symbol_word(slot, 1).store(line_col, Ordering::Release);
        Ok(())
    }

    /// Read back `(file_hash, line_col)` for a live id.
    pub fn symbol_lookup(&self, source_id: u32) -> Option<(u32, u32)> {
        match self.ident_probe(source_id) {
            Probe::Found(slot) => Some((
                self.symbol_word(slot, 0).load(Ordering::Acquire),
                self.symbol_word(slot, 1).load(Ordering::Acquire),
            )),
            _ => None,
        }
    }
}
