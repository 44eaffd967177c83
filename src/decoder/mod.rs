//! Pixie-16 channel event decoder
//!
//! Decodes one digitizer channel event from a span of 32-bit words into a
//! [`Hit`]. The first two words of the span are synthesized by the spill
//! demultiplexer (self-inclusive size in 16-bit shorts, then the module-info
//! word); the remaining words come straight from the data stream.

pub mod hit;
pub mod masks;
pub mod unpacker;

pub use hit::Hit;
pub use unpacker::HitUnpacker;
