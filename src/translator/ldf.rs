//! LDF file sequencer
//!
//! Drives the spill reassembler across an ordered list of input files.
//! Each file opens with a DIR and a HEAD prefix buffer; after validating
//! them the cursor is positioned on the first DATA buffer and spills are
//! pulled until the double-EOF terminator, then the next file is opened.
//!
//! The translator is single-threaded and pull-driven: every call to
//! [`LdfTranslator::parse`] reassembles spills until the concurrency target
//! is reached (or input runs out), then flushes one globally time-sorted
//! batch of hits into the caller's vector.

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::common::{LdfError, LdfResult};
use crate::config::TranslatorConfig;
use crate::decoder::Hit;
use crate::translator::buffer::{
    DirBuffer, HeadBuffer, SpillOutcome, SpillReader, FILE_BUFFER_WORDS,
};
use crate::translator::demux::SpillDemux;

/// What a [`LdfTranslator::parse`] call concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslatorState {
    /// A batch was emitted; more data may follow
    Parsing,
    /// All input files are exhausted and all hits have been emitted
    Complete,
}

/// Lifetime counters kept by the translator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslatorStats {
    /// Chunks reassembled successfully
    pub good_chunks: u64,
    /// Chunks the stream should have had but didn't
    pub missing_chunks: u64,
    /// Spills emitted by the reassembler
    pub spills: u64,
    /// Spills emitted with at least one chunk missing
    pub partial_spills: u64,
    /// Payload words transferred out of reassembled spills
    pub total_words: u64,
    /// Hits handed to the caller
    pub hits: u64,
}

/// Translator for LDF list-mode files
pub struct LdfTranslator {
    config: TranslatorConfig,
    input_files: Vec<PathBuf>,
    file_sizes: Vec<u64>,
    current_file: Option<BufReader<File>>,
    current_index: usize,
    finished_current_file: bool,
    finished_reading: bool,
    dir: Option<DirBuffer>,
    head: Option<HeadBuffer>,
    spill_reader: SpillReader,
    demux: SpillDemux,
    partial_spills: u64,
    total_words: u64,
    hits_emitted: u64,
}

impl LdfTranslator {
    /// Create a translator with the given configuration
    pub fn new(config: TranslatorConfig) -> Self {
        let demux = SpillDemux::new(config.concurrent_spills);
        Self {
            config,
            input_files: Vec::new(),
            file_sizes: Vec::new(),
            current_file: None,
            current_index: 0,
            finished_current_file: true,
            finished_reading: false,
            dir: None,
            head: None,
            spill_reader: SpillReader::new(),
            demux,
            partial_spills: 0,
            total_words: 0,
            hits_emitted: 0,
        }
    }

    /// Append an input file to the translation list
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P) -> LdfResult<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(LdfError::FileNotFound(path.to_path_buf()));
        }
        let size = std::fs::metadata(path)?.len();
        info!(
            "added file {} to the translation list, size {}",
            path.display(),
            size
        );
        self.file_sizes.push(size);
        self.input_files.push(path.to_path_buf());
        Ok(())
    }

    /// Files queued for translation
    pub fn input_files(&self) -> &[PathBuf] {
        &self.input_files
    }

    /// On-disk sizes of the queued files, in bytes
    pub fn file_sizes(&self) -> &[u64] {
        &self.file_sizes
    }

    /// DIR buffer of the file currently being read
    pub fn dir(&self) -> Option<&DirBuffer> {
        self.dir.as_ref()
    }

    /// HEAD buffer of the file currently being read
    pub fn head(&self) -> Option<&HeadBuffer> {
        self.head.as_ref()
    }

    /// Run number from the current file's HEAD buffer
    pub fn run_number(&self) -> Option<u32> {
        self.head.as_ref().map(|h| h.run_num)
    }

    /// Lifetime counters
    pub fn stats(&self) -> TranslatorStats {
        TranslatorStats {
            good_chunks: self.spill_reader.good_chunks,
            missing_chunks: self.spill_reader.missing_chunks,
            spills: self.spill_reader.spills(),
            partial_spills: self.partial_spills,
            total_words: self.total_words,
            hits: self.hits_emitted,
        }
    }

    /// Pull spills until the concurrency target is met or input runs out,
    /// then flush one globally time-sorted batch of hits into `out`.
    ///
    /// Within a batch hits are non-decreasing in `time_ns` (ties broken by
    /// crate, slot, channel, then arrival). Across batches no global order
    /// is guaranteed: a spill straddling a batch boundary can emit a hit
    /// earlier than the previous batch's maximum.
    pub fn parse(&mut self, out: &mut Vec<Hit>) -> LdfResult<TranslatorState> {
        if self.input_files.is_empty() {
            error!("no input files to parse");
            return Ok(TranslatorState::Complete);
        }
        if self.finished_reading && self.demux.queued_hits() == 0 {
            return Ok(TranslatorState::Complete);
        }

        while !self.finished_reading
            && self.demux.spills_with_hits() < self.config.concurrent_spills
        {
            if self.finished_current_file {
                self.open_next_file()?;
                continue;
            }
            let file = match self.current_file.as_mut() {
                Some(file) => file,
                None => break,
            };
            match self.spill_reader.next_spill(file) {
                Ok(SpillOutcome::Spill(spill)) => {
                    self.total_words += spill.words.len() as u64;
                    if !spill.full {
                        self.partial_spills += 1;
                        info!("decoding incomplete spill {}", spill.id);
                    }
                    self.demux.demux(&spill, &self.config.modules)?;
                }
                Ok(SpillOutcome::EndOfFile) => {
                    self.finished_current_file = true;
                }
                Ok(SpillOutcome::Aborted) => {}
                Err(LdfError::Io(err)) => {
                    // A read failure mid-file abandons the rest of that
                    // file; remaining files are still translated.
                    error!("failed to read from input data file: {}", err);
                    self.finished_current_file = true;
                }
                Err(err) => return Err(err),
            }
        }

        let start = out.len();
        self.demux.flush(out);
        let emitted = out.len() - start;
        self.hits_emitted += emitted as u64;
        debug!("emitted a batch of {} hits", emitted);

        if self.finished_reading && emitted == 0 && self.demux.queued_hits() == 0 {
            return Ok(TranslatorState::Complete);
        }
        Ok(TranslatorState::Parsing)
    }

    /// Open the next input file and position the cursor on its first DATA
    /// buffer, validating the DIR and HEAD prefix buffers on the way.
    fn open_next_file(&mut self) -> LdfResult<()> {
        if self.current_index == self.input_files.len() {
            if let Some(path) = self.input_files.last() {
                info!("completed final file {}", path.display());
            }
            self.finished_reading = true;
            self.current_file = None;
            return Ok(());
        }

        let path = &self.input_files[self.current_index];
        if self.current_index == 0 {
            info!("opening first file {}", path.display());
        } else {
            info!(
                "swapping input file to {} ({}/{} files processed)",
                path.display(),
                self.current_index,
                self.input_files.len()
            );
        }

        let mut reader = BufReader::new(File::open(path)?);

        let dir = DirBuffer::read_from(&mut reader)?;
        let mut buffers_read = 1u64;
        reader.seek(SeekFrom::Start(
            FILE_BUFFER_WORDS as u64 * 4 * buffers_read,
        ))?;

        let head = HeadBuffer::read_from(&mut reader)?;
        buffers_read += 1;
        reader.seek(SeekFrom::Start(
            FILE_BUFFER_WORDS as u64 * 4 * buffers_read,
        ))?;

        self.dir = Some(dir);
        self.head = Some(head);
        self.current_file = Some(reader);
        self.current_index += 1;
        self.finished_current_file = false;
        self.spill_reader.reset_for_file();
        Ok(())
    }
}

impl Drop for LdfTranslator {
    fn drop(&mut self) {
        let stats = self.stats();
        info!(
            "good chunks: {}, missing chunks: {}, spills: {}",
            stats.good_chunks, stats.missing_chunks, stats.spills
        );
        for (slot, count) in self.demux.leftovers() {
            warn!("leftover events in slot {}: {}", slot, count);
        }
    }
}
