//! pixie-ldf: LDF list-mode data translator for Pixie-16 digitizer readout
//!
//! This crate reads HRIBF-style LDF files produced by a multi-crate Pixie-16
//! readout and turns them into a time-ordered stream of decoded [`Hit`]s.
//! The pipeline is layered leaves-first:
//!
//! - [`decoder`] — unpack a single channel event from a 32-bit word span,
//!   including the MSPS-dependent CFD timing correction.
//! - [`translator`] — reassemble spills from fixed-size file buffers,
//!   demultiplex VSN sub-blocks, and drive the file sequence.
//! - [`config`] — the externally supplied (crate, slot) → module parameter
//!   map the decoder needs, since the LDF stream does not carry module
//!   metadata inline for every event.

pub mod common;
pub mod config;
pub mod decoder;
pub mod translator;

pub use common::{LdfError, LdfResult};
pub use config::{ModuleMap, ModuleParams, TranslatorConfig};
pub use decoder::{Hit, HitUnpacker};
pub use translator::{LdfTranslator, TranslatorState, TranslatorStats};
