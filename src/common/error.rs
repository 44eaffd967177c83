//! Error types for the LDF translator
//!
//! Only conditions that abort a file or a batch become errors. Recoverable
//! stream damage (bad buffer tags, chunk gaps, out-of-order chunks,
//! unexpected VSNs) is counted and logged by the components that see it and
//! parsing continues.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while translating LDF data
#[derive(Error, Debug)]
pub enum LdfError {
    /// I/O error (file operations). Fatal to the current file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error while loading configuration
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input file does not exist
    #[error("input file not found: {0}")]
    FileNotFound(PathBuf),

    /// DIR prefix buffer failed validation (bad magic or size constants)
    #[error("invalid DIR buffer: {0}")]
    BadDirBuffer(String),

    /// HEAD prefix buffer failed validation
    #[error("invalid HEAD buffer: {0}")]
    BadHeadBuffer(String),

    /// Event span is empty
    #[error("unable to parse empty event data")]
    EmptyEvent,

    /// Event span is shorter than the declared event size
    #[error("incomplete event data: need {need} words, have {have}")]
    TruncatedEvent { need: usize, have: usize },

    /// Header, channel, and trace lengths disagree
    #[error(
        "inconsistent event lengths: channel length {channel_length}, \
         header length {header_length}, trace length {trace_length}"
    )]
    LengthMismatch {
        channel_length: u32,
        header_length: u32,
        trace_length: u32,
    },

    /// Channel header length outside {4, 6, 8, 10, 12, 14, 16, 18}
    #[error("invalid channel header length: {0}")]
    BadHeaderLength(u32),

    /// Module sampling rate outside {100, 250, 500}
    #[error("unsupported module MSPS: {0}")]
    UnsupportedMsps(u32),

    /// Decoder consumed a different number of words than the event declared
    #[error("unpacked event length {got} does not match expected length {expected}")]
    EventLengthMismatch { expected: usize, got: usize },

    /// No module parameters configured for a (crate, slot) seen in the data
    #[error("no module parameters for crate {crate_id} slot {slot_id}")]
    ConfigMiss { crate_id: u32, slot_id: u32 },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl LdfError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type alias using LdfError
pub type LdfResult<T> = Result<T, LdfError>;
