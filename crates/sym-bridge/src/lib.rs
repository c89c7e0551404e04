//! Symbiont Editor Bridge
//!
//! The non-realtime half of the kernel's public surface. The bridge owns
//! the editor's working memory (all of it pre-allocated at construction),
//! generates source ids, debounces bursts of attribute and structural
//! edits, turns editor intent into ring commands, and runs the learning
//! loop over fired synapses.
//!
//! ## Thread Safety Design
//!
//! One bridge per editor thread. Everything shared with the audio thread
//! goes through the region: ring commands publish structure, the seqlock
//! publishes attributes, and the reclaim ring returns Zone B slots. The
//! bridge itself is deliberately not `Sync`.

pub mod bridge;
pub mod debounce;
pub mod error;
pub mod snapshot;
pub mod source_id;

pub use bridge::{Bridge, ClipNote, NoteSpec};
pub use error::{BridgeError, BridgeResult};
pub use snapshot::{BrainSnapshot, SnapshotArrays};
pub use source_id::{IdGenerator, SourceLocation};
