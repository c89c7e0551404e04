//! Symbiont Audio-Side Consumer
//!
//! The realtime half of the kernel: polls the command ring under audio
//! mutex rules, walks the event chain once per quantum, honors BARRIER
//! phase-locking, applies the groove/humanize/transpose transforms, and
//! emits note events into a pre-allocated buffer.
//!
//! Nothing here blocks, allocates after construction, or latches fatal
//! errors on the audio thread's own behalf.

pub mod consumer;
pub mod event;
pub mod transform;

pub use consumer::Consumer;
pub use event::NoteEvent;
