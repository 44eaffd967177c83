//! LDF translation pipeline
//!
//! Three cooperating parts, leaves-first:
//!
//! - [`buffer`] — the fixed-size file buffer framing: DIR/HEAD prefix
//!   buffers and the double-buffered spill reassembler.
//! - [`demux`] — walks reassembled spills, recognizes VSN sub-blocks, and
//!   feeds each event span to the decoder; holds per-slot queues until a
//!   sorted batch is flushed.
//! - [`ldf`] — the file sequencer driving the other two across an ordered
//!   list of input files.

pub mod buffer;
pub mod demux;
pub mod ldf;

pub use ldf::{LdfTranslator, TranslatorState, TranslatorStats};

/// Spill reassembled from its file chunks: the payload words of one
/// acquisition readout across all modules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spill {
    /// Monotonically assigned spill number
    pub id: u64,
    /// False if any chunk of the spill was missing
    pub full: bool,
    /// Reassembled payload as 32-bit words
    pub words: Vec<u32>,
}
