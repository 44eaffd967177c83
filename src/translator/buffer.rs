//! LDF file buffer framing
//!
//! An LDF file is a sequence of fixed-size 8194-word buffers. The first two
//! words of every buffer are a type tag and a declared size; the payload
//! shape depends on the tag. A file opens with one DIR and one HEAD buffer,
//! then carries DATA buffers until two consecutive ENDFILE buffers.
//!
//! DATA payloads are split into chunks of at most one buffer each; the
//! [`SpillReader`] reassembles them into whole spills using a two-buffer
//! sliding window over the file, which gives the one-buffer lookahead needed
//! to tell a single EOF marker from the double-EOF file terminator.

use std::io::Read;

use tracing::{debug, error, info, warn};

use crate::common::{LdfError, LdfResult};
use crate::translator::Spill;

/// Words per on-disk file buffer
pub const FILE_BUFFER_WORDS: usize = 8194;
/// Declared payload size of DIR and DATA buffers
pub const DIR_BUFFER_SIZE: u32 = 8192;
/// Declared payload size of HEAD buffers
pub const HEAD_BUFFER_SIZE: u32 = 64;

/// Chunk header: size in bytes, total chunks in spill, chunk index
const CHUNK_HEADER_BYTES: u32 = 12;
/// Spill footer chunks are exactly 20 bytes: the chunk header plus the
/// two-word end-of-readout marker
const SPILL_FOOTER_BYTES: u32 = 20;

/// Buffer type tags (ASCII magics read as little-endian u32)
pub mod tags {
    /// "DIR "
    pub const DIR: u32 = 0x2052_4944;
    /// "HEAD"
    pub const HEAD: u32 = 0x4441_4548;
    /// "DATA"
    pub const DATA: u32 = 0x4154_4144;
    /// "EOF "
    pub const ENDFILE: u32 = 0x2046_4F45;
    /// Padding filler
    pub const ENDBUFF: u32 = 0xFFFF_FFFF;
}

fn read_u32<R: Read>(reader: &mut R) -> std::io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

/// Read a fixed-width character field and trim the zero padding
fn read_chars<R: Read>(reader: &mut R, len: usize) -> std::io::Result<String> {
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(String::from_utf8_lossy(&bytes)
        .trim_end_matches('\0')
        .to_string())
}

/// Contents of the DIR buffer that opens every LDF file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirBuffer {
    /// Total fixed-size buffers in the file
    pub total_file_buffers: u32,
    /// Three words of unknown purpose, usually {0, 1, 2}
    pub unknown: [u32; 3],
    /// Run number
    pub run_num: u32,
}

impl DirBuffer {
    /// Read and validate a DIR buffer prefix. The reader is left just past
    /// the directory words; the caller seeks to the next buffer boundary.
    pub fn read_from<R: Read>(reader: &mut R) -> LdfResult<Self> {
        let tag = read_u32(reader)?;
        if tag != tags::DIR {
            warn!("invalid DIR buffer type 0x{:08x}", tag);
            return Err(LdfError::BadDirBuffer(format!(
                "bad tag 0x{:08x}, expected 0x{:08x}",
                tag,
                tags::DIR
            )));
        }
        let size = read_u32(reader)?;
        if size != DIR_BUFFER_SIZE {
            warn!("invalid DIR buffer size {}", size);
            return Err(LdfError::BadDirBuffer(format!(
                "bad size {}, expected {}",
                size, DIR_BUFFER_SIZE
            )));
        }
        let file_buffer_size = read_u32(reader)?;
        if file_buffer_size != FILE_BUFFER_WORDS as u32 {
            warn!("invalid file buffer size {}", file_buffer_size);
            return Err(LdfError::BadDirBuffer(format!(
                "bad file buffer size {}, expected {}",
                file_buffer_size, FILE_BUFFER_WORDS
            )));
        }

        let mut dir = Self {
            total_file_buffers: read_u32(reader)?,
            ..Default::default()
        };
        dir.unknown[0] = read_u32(reader)?;
        dir.unknown[1] = read_u32(reader)?;
        dir.run_num = read_u32(reader)?;
        dir.unknown[2] = read_u32(reader)?;

        info!(
            "parsed DIR buffer: total file buffers {}, run {}",
            dir.total_file_buffers, dir.run_num
        );
        Ok(dir)
    }
}

/// Contents of the HEAD buffer following the DIR buffer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadBuffer {
    /// Facility name (8 characters on disk)
    pub facility: String,
    /// Data format name (8 characters)
    pub format: String,
    /// Data type (16 characters)
    pub data_type: String,
    /// Run date (16 characters)
    pub date: String,
    /// Run title (80 characters)
    pub run_title: String,
    /// Run number
    pub run_num: u32,
}

impl HeadBuffer {
    /// Read and validate a HEAD buffer prefix. The reader is left just past
    /// the header fields; the caller seeks to the next buffer boundary.
    pub fn read_from<R: Read>(reader: &mut R) -> LdfResult<Self> {
        let tag = read_u32(reader)?;
        let size = read_u32(reader)?;
        if tag != tags::HEAD || size != HEAD_BUFFER_SIZE {
            warn!("invalid HEAD buffer: tag 0x{:08x}, size {}", tag, size);
            return Err(LdfError::BadHeadBuffer(format!(
                "tag 0x{:08x}, size {}",
                tag, size
            )));
        }

        let head = Self {
            facility: read_chars(reader, 8)?,
            format: read_chars(reader, 8)?,
            data_type: read_chars(reader, 16)?,
            date: read_chars(reader, 16)?,
            run_title: read_chars(reader, 80)?,
            run_num: read_u32(reader)?,
        };

        info!(
            "parsed HEAD buffer: facility '{}', format '{}', type '{}', date '{}', title '{}', run {}",
            head.facility, head.format, head.data_type, head.date, head.run_title, head.run_num
        );
        Ok(head)
    }
}

/// What one reassembly step produced
#[derive(Debug)]
pub(crate) enum SpillOutcome {
    /// A complete (or gap-tolerated partial) spill
    Spill(Spill),
    /// Two consecutive ENDFILE buffers: the file is done
    EndOfFile,
    /// The current spill was unrecoverable and has been discarded
    Aborted,
}

/// Reassembles spills from DATA buffer chunks
///
/// Owns a double-buffered sliding window over the current file: two
/// buffers alternate as current and next, so the tag of the following
/// buffer is always known one step ahead.
#[derive(Debug)]
pub(crate) struct SpillReader {
    buffers: [Vec<u32>; 2],
    scratch: Vec<u8>,
    /// Which of the two buffers is current
    active: usize,
    /// Buffers consumed from the current file
    bcount: u64,
    /// Word cursor within the current buffer
    pos: usize,
    /// Tag of the current buffer
    head: u32,
    /// Tag of the lookahead buffer
    next_head: u32,
    /// Spill payload accumulated so far
    spill_words: Vec<u32>,
    next_spill_id: u64,
    pub(crate) good_chunks: u64,
    pub(crate) missing_chunks: u64,
}

impl SpillReader {
    pub(crate) fn new() -> Self {
        Self {
            buffers: [
                vec![tags::ENDBUFF; FILE_BUFFER_WORDS],
                vec![tags::ENDBUFF; FILE_BUFFER_WORDS],
            ],
            scratch: vec![0u8; FILE_BUFFER_WORDS * 4],
            active: 0,
            bcount: 0,
            pos: 0,
            head: 0,
            next_head: 0,
            spill_words: Vec::new(),
            next_spill_id: 0,
            good_chunks: 0,
            missing_chunks: 0,
        }
    }

    /// Number of spills emitted so far; also the id the next spill will get
    pub(crate) fn spills(&self) -> u64 {
        self.next_spill_id
    }

    /// Rearm for a freshly opened file. Counters and the spill id keep
    /// running across files.
    pub(crate) fn reset_for_file(&mut self) {
        self.bcount = 0;
        self.pos = 0;
        self.head = 0;
        self.next_head = 0;
        self.spill_words.clear();
    }

    /// Read one whole file buffer into the given slot
    fn fill<R: Read>(&mut self, reader: &mut R, which: usize) -> std::io::Result<()> {
        reader.read_exact(&mut self.scratch)?;
        let buf = &mut self.buffers[which];
        for (word, bytes) in buf.iter_mut().zip(self.scratch.chunks_exact(4)) {
            *word = u32::from_le_bytes(bytes.try_into().unwrap());
        }
        Ok(())
    }

    /// Advance the window. Without `force`, stays inside the current buffer
    /// when it still holds at least a chunk header, skipping padding words;
    /// otherwise rotates, reading the next buffer from the file.
    fn advance<R: Read>(&mut self, reader: &mut R, force: bool) -> std::io::Result<()> {
        if self.bcount == 0 {
            self.fill(reader, 0)?;
        } else if self.pos + 3 < FILE_BUFFER_WORDS && !force {
            while self.pos < FILE_BUFFER_WORDS - 1
                && self.buffers[self.active][self.pos] == tags::ENDBUFF
            {
                self.pos += 1;
            }
            if self.pos + 3 < FILE_BUFFER_WORDS - 1 {
                return Ok(());
            }
        }

        if self.bcount % 2 == 0 {
            self.fill(reader, 1)?;
            self.active = 0;
        } else {
            self.fill(reader, 0)?;
            self.active = 1;
        }
        self.bcount += 1;

        let current = &self.buffers[self.active];
        self.head = current[0];
        self.pos = 2;
        self.next_head = self.buffers[1 - self.active][0];
        Ok(())
    }

    /// Reassemble the next spill from the file.
    ///
    /// Chunks must be contiguous in index; a gap marks the spill as not
    /// full but reassembly keeps going from the chunk that did arrive. A
    /// change in the declared chunk total, a malformed footer, or an
    /// undersized chunk abandons the spill. I/O failures are fatal to the
    /// file and surface as errors.
    pub(crate) fn next_spill<R: Read>(&mut self, reader: &mut R) -> LdfResult<SpillOutcome> {
        self.spill_words.clear();
        let mut first_chunk = true;
        let mut full_spill = true;
        let mut total_chunks: u32 = 0;
        let mut curr_chunk: u32 = 0;

        loop {
            // A force rotation may already have parked the window on an EOF
            // marker; resolve it before reading any further.
            if self.bcount == 0 || self.head != tags::ENDFILE {
                self.advance(reader, false)?;
            }

            if self.head == tags::ENDFILE {
                if self.next_head == tags::ENDFILE {
                    debug!("read double EOF");
                    return Ok(SpillOutcome::EndOfFile);
                }
                debug!("reached single EOF, forcing buffer rotation");
                self.advance(reader, true)?;
                continue;
            }

            if self.head != tags::DATA {
                error!("found non-DATA/non-EOF buffer 0x{:08x}", self.head);
                self.missing_chunks += 1;
                self.advance(reader, true)?;
                continue;
            }

            let current = &self.buffers[self.active];
            let chunk_bytes = current[self.pos];
            let num_chunks = current[self.pos + 1];
            let chunk_num = current[self.pos + 2];
            self.pos += 3;

            let prev_chunk = curr_chunk;
            let prev_num_chunks = total_chunks;
            curr_chunk = chunk_num;
            total_chunks = num_chunks;

            if first_chunk {
                if chunk_num != 0 {
                    warn!(
                        "first chunk {} isn't chunk 0 at spill {}",
                        chunk_num, self.next_spill_id
                    );
                    self.missing_chunks += chunk_num as u64;
                    full_spill = false;
                }
                first_chunk = false;
            } else if num_chunks != prev_num_chunks {
                error!(
                    "chunk total changed from {} to {} at spill {}",
                    prev_num_chunks, num_chunks, self.next_spill_id
                );
                self.missing_chunks +=
                    prev_num_chunks.saturating_sub(1).saturating_sub(prev_chunk) as u64;
                self.advance(reader, true)?;
                return Ok(SpillOutcome::Aborted);
            } else if chunk_num != prev_chunk + 1 {
                full_spill = false;
                if chunk_num == prev_chunk + 2 {
                    warn!(
                        "missing chunk {} at spill {}",
                        prev_chunk + 1,
                        self.next_spill_id
                    );
                } else {
                    warn!(
                        "missing chunks {} to {} at spill {}",
                        prev_chunk + 1,
                        chunk_num.wrapping_sub(1),
                        self.next_spill_id
                    );
                }
                self.missing_chunks += chunk_num.saturating_sub(prev_chunk + 1) as u64;
            }

            if num_chunks == 0 {
                error!(
                    "chunk header claims zero total chunks at spill {}",
                    self.next_spill_id
                );
                self.missing_chunks += 1;
                self.advance(reader, true)?;
                return Ok(SpillOutcome::Aborted);
            }

            if chunk_num == num_chunks - 1 {
                // Spill footer: fixed size, body is the end-of-readout marker.
                if chunk_bytes != SPILL_FOOTER_BYTES {
                    error!(
                        "spill footer (chunk {} of {}) has size {} at spill {}",
                        chunk_num, num_chunks, chunk_bytes, self.next_spill_id
                    );
                    self.advance(reader, true)?;
                    return Ok(SpillOutcome::Aborted);
                }
                let start = self.pos;
                self.pos += 2;
                self.spill_words
                    .extend_from_slice(&self.buffers[self.active][start..start + 2]);

                let spill = Spill {
                    id: self.next_spill_id,
                    full: full_spill,
                    words: std::mem::take(&mut self.spill_words),
                };
                self.next_spill_id += 1;
                return Ok(SpillOutcome::Spill(spill));
            }

            if chunk_bytes < CHUNK_HEADER_BYTES {
                error!(
                    "invalid size {} bytes in chunk {} of {} at spill {}",
                    chunk_bytes,
                    chunk_num + 1,
                    num_chunks,
                    self.next_spill_id
                );
                self.missing_chunks += 1;
                self.advance(reader, true)?;
                return Ok(SpillOutcome::Aborted);
            }

            self.good_chunks += 1;
            let body_words = ((chunk_bytes - CHUNK_HEADER_BYTES) / 4) as usize;
            if self.pos + body_words > FILE_BUFFER_WORDS {
                error!(
                    "chunk body runs past the buffer end at spill {}",
                    self.next_spill_id
                );
                self.missing_chunks += 1;
                self.advance(reader, true)?;
                return Ok(SpillOutcome::Aborted);
            }
            let start = self.pos;
            self.pos += body_words;
            self.spill_words
                .extend_from_slice(&self.buffers[self.active][start..start + body_words]);
        }
    }
}
