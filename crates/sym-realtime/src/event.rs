//! Emitted note events

/// One note emission for the current quantum.
///
/// `tick` is the transformed trigger tick (groove + humanize applied);
/// `ptr` is the source node's byte offset, handed to upstack layers that
/// want to follow synapses or report provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteEvent {
    pub tick: u32,
    pub pitch: u8,
    pub velocity: u8,
    pub duration: u32,
    pub ptr: u32,
}
