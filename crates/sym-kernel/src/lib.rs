//! Symbiont Shared-Memory Kernel
//!
//! The fixed-size region two threads live in, and everything that operates
//! on it:
//! - Region handle with word-atomic views and header accessors
//! - Zone A free list (lock-free tagged LIFO) and Zone B bump allocator
//! - Identity and symbol hash tables (linear probe, tombstones)
//! - Node views with seqlock versioned reads
//! - Attribute patcher (immediate, mutex-free)
//! - SPSC command ring and reclaim ring, both living inside the region
//! - Chain mutex with audio-try / editor-spin acquisition
//! - Kernel MMU: the only code allowed to mutate chain structure
//! - Synapse graph with reverse index and compaction
//! - Weighted probabilistic next-node selection over synapse chains
//!
//! ## Thread Safety Design
//!
//! The audio role never blocks, never allocates, and never latches a fatal
//! error for its own failures; it drops work instead. The editor role may
//! spin briefly with millisecond sleeps. Chain structure is only mutated
//! under the chain mutex; attributes go through the seqlock; lookups are
//! lock-free per-slot atomic reads.

pub mod follow;
pub mod freelist;
pub mod ident;
pub mod localalloc;
pub mod mmu;
pub mod mutex;
pub mod node;
pub mod patch;
pub mod region;
pub mod ring;
pub mod synapse;

pub use follow::{ChosenSynapse, choose_next, deterministic_roll};
pub use localalloc::LocalAllocator;
pub use mmu::{MAX_COMMANDS_PER_POLL, MmuContext};
pub use mutex::ChainGuard;
pub use node::{AUDIO_READ_RETRIES, EDITOR_READ_RETRIES, NoteSnapshot};
pub use patch::PatchField;
pub use region::Region;
pub use ring::Command;
pub use synapse::{SynapseRecord, SynapseStats};
