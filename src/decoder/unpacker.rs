//! Unpacker for Pixie-16 list-mode channel events
//!
//! The event span starts with two words synthesized upstream: the
//! self-inclusive event size in 16-bit shorts, then the module-info word
//! (MSPS, ADC resolution, hardware revision). Four header words follow, then
//! the optional payloads selected by the channel header length, then the
//! trace. The unpacker walks exactly the words the header declares and
//! returns how many it consumed.

use crate::common::{LdfError, LdfResult};
use crate::decoder::hit::Hit;
use crate::decoder::masks;

/// Decoder for single channel events
#[derive(Debug, Clone, Copy, Default)]
pub struct HitUnpacker;

impl HitUnpacker {
    /// Create a new unpacker
    pub fn new() -> Self {
        Self
    }

    /// Decode one event from `words` into `hit`, resetting it first.
    ///
    /// Returns the number of words consumed. The caller is expected to
    /// compare this against the event length it derived from the stream.
    pub fn unpack(&self, words: &[u32], hit: &mut Hit) -> LdfResult<usize> {
        hit.reset();

        if words.is_empty() {
            return Err(LdfError::EmptyEvent);
        }

        // First word is the self-inclusive event size in 16-bit shorts.
        let declared_words = (words[0] / 2) as usize;
        if declared_words > words.len() {
            return Err(LdfError::TruncatedEvent {
                need: declared_words,
                have: words.len(),
            });
        }
        // Prefix plus the four mandatory header words.
        if words.len() < 6 {
            return Err(LdfError::TruncatedEvent {
                need: 6,
                have: words.len(),
            });
        }

        self.parse_module_info(hit, words[1]);
        self.parse_header_word0(hit, words[2]);
        self.parse_header_words_1_and_2(hit, words[3], words[4])?;
        self.parse_header_word3(hit, words[5]);

        // Header, channel, and trace lengths must be coherent before any
        // variable-length payload is trusted.
        if hit.channel_length != hit.channel_header_length + hit.trace_length / 2 {
            return Err(LdfError::LengthMismatch {
                channel_length: hit.channel_length,
                header_length: hit.channel_header_length,
                trace_length: hit.trace_length,
            });
        }

        let total = 2 + hit.channel_length as usize;
        if total > words.len() {
            return Err(LdfError::TruncatedEvent {
                need: total,
                have: words.len(),
            });
        }

        let mut idx = 6;
        let extra = hit
            .channel_header_length
            .checked_sub(masks::SIZE_OF_RAW_EVENT)
            .ok_or(LdfError::BadHeaderLength(hit.channel_header_length))?;
        match extra {
            0 => {}
            x if x == masks::SIZE_OF_EXT_TS => {
                self.extract_external_timestamp(words, &mut idx, hit);
            }
            x if x == masks::SIZE_OF_ENE_SUMS => {
                self.extract_energy_sums(words, &mut idx, hit);
            }
            x if x == masks::SIZE_OF_ENE_SUMS + masks::SIZE_OF_EXT_TS => {
                self.extract_energy_sums(words, &mut idx, hit);
                self.extract_external_timestamp(words, &mut idx, hit);
            }
            x if x == masks::SIZE_OF_QDC_SUMS => {
                self.extract_qdc_sums(words, &mut idx, hit);
            }
            x if x == masks::SIZE_OF_QDC_SUMS + masks::SIZE_OF_EXT_TS => {
                self.extract_qdc_sums(words, &mut idx, hit);
                self.extract_external_timestamp(words, &mut idx, hit);
            }
            x if x == masks::SIZE_OF_ENE_SUMS + masks::SIZE_OF_QDC_SUMS => {
                self.extract_energy_sums(words, &mut idx, hit);
                self.extract_qdc_sums(words, &mut idx, hit);
            }
            x if x
                == masks::SIZE_OF_ENE_SUMS + masks::SIZE_OF_QDC_SUMS + masks::SIZE_OF_EXT_TS =>
            {
                self.extract_energy_sums(words, &mut idx, hit);
                self.extract_qdc_sums(words, &mut idx, hit);
                self.extract_external_timestamp(words, &mut idx, hit);
            }
            _ => return Err(LdfError::BadHeaderLength(hit.channel_header_length)),
        }

        if hit.trace_length != 0 {
            self.parse_trace(words, &mut idx, hit);
        }

        Ok(idx)
    }

    /// Decode one event from `words` into a fresh hit
    pub fn unpack_one(&self, words: &[u32]) -> LdfResult<(Hit, usize)> {
        let mut hit = Hit::new();
        let consumed = self.unpack(words, &mut hit)?;
        Ok((hit, consumed))
    }

    /// Module-info word: MSPS in bits [15:0], ADC resolution in [23:16],
    /// hardware revision in [31:24].
    fn parse_module_info(&self, hit: &mut Hit, datum: u32) {
        hit.module_msps = datum & masks::LOWER_16_BIT_MASK;
        hit.adc_resolution = (datum & masks::ADC_RESOLUTION_MASK) >> masks::ADC_RESOLUTION_SHIFT;
        hit.hardware_revision = (datum & masks::HW_REVISION_MASK) >> masks::HW_REVISION_SHIFT;
    }

    /// Word 0: crate/slot/channel, header and channel lengths, finish code.
    fn parse_header_word0(&self, hit: &mut Hit, datum: u32) {
        hit.channel_id = datum & masks::CHANNEL_ID_MASK;
        hit.slot_id = (datum & masks::SLOT_ID_MASK) >> masks::SLOT_ID_SHIFT;
        hit.crate_id = (datum & masks::CRATE_ID_MASK) >> masks::CRATE_ID_SHIFT;
        hit.channel_header_length =
            (datum & masks::HEADER_LENGTH_MASK) >> masks::HEADER_LENGTH_SHIFT;
        hit.channel_length = (datum & masks::CHANNEL_LENGTH_MASK) >> masks::CHANNEL_LENGTH_SHIFT;
        hit.finish_code = (datum & masks::FINISH_CODE_MASK) >> masks::FINISH_CODE_SHIFT != 0;
    }

    /// Words 1 and 2: the 48-bit timestamp and the CFD result. The CFD
    /// encoding depends on the module sampling rate, so the module-info word
    /// must have been parsed first.
    fn parse_header_words_1_and_2(&self, hit: &mut Hit, time_low: u32, datum: u32) -> LdfResult<()> {
        hit.time_low = time_low;
        hit.time_high = datum & masks::LOWER_16_BIT_MASK;

        let correction = self.parse_and_compute_cfd(hit, datum)?;
        hit.coarse_time_ns = compute_coarse_time(hit.module_msps, hit.time_low, hit.time_high);
        hit.time_ns = hit.coarse_time_ns as f64 + correction;
        Ok(())
    }

    /// Word 3: out-of-range flag, trace length in samples, energy.
    fn parse_header_word3(&self, hit: &mut Hit, datum: u32) {
        hit.adc_overflow_underflow = (datum >> masks::OUT_OF_RANGE_SHIFT) != 0;
        hit.trace_length = (datum & masks::BIT_30_TO_16_MASK) >> 16;
        hit.energy = (datum & masks::LOWER_16_BIT_MASK) as u16;
    }

    /// Decode the CFD composite in the upper 16 bits of header word 2 and
    /// return the sub-tick correction in nanoseconds.
    ///
    /// - 100 MSPS: fail bit in 31, no trigger source bits, 15-bit CFD time.
    /// - 250 MSPS: fail bit in 31, trigger source in 30, 14-bit CFD time.
    /// - 500 MSPS: trigger source in [31:29], 13-bit CFD time; source 7
    ///   doubles as the fail marker.
    fn parse_and_compute_cfd(&self, hit: &mut Hit, datum: u32) -> LdfResult<f64> {
        let correction = match hit.module_msps {
            100 => {
                hit.cfd_fail_bit = (datum & masks::BIT_31_MASK) != 0;
                hit.cfd_trig_source = 0;
                hit.cfd_raw = (datum & masks::BIT_30_TO_16_MASK) >> 16;
                (hit.cfd_raw as f64 / 32768.0) * 10.0
            }
            250 => {
                hit.cfd_fail_bit = (datum & masks::BIT_31_MASK) != 0;
                hit.cfd_trig_source = (datum & masks::BIT_30_MASK) >> 30;
                hit.cfd_raw = (datum & masks::BIT_29_TO_16_MASK) >> 16;
                (hit.cfd_raw as f64 / 16384.0 - hit.cfd_trig_source as f64) * 4.0
            }
            500 => {
                hit.cfd_trig_source = (datum & masks::BIT_31_TO_29_MASK) >> 29;
                hit.cfd_raw = (datum & masks::BIT_28_TO_16_MASK) >> 16;
                hit.cfd_fail_bit = hit.cfd_trig_source == 7;
                (hit.cfd_raw as f64 / 8192.0 + hit.cfd_trig_source as f64 - 1.0) * 2.0
            }
            other => return Err(LdfError::UnsupportedMsps(other)),
        };
        Ok(correction)
    }

    /// Energy sums: trailing sum, gap sum, leading sum, IEEE-754 baseline.
    fn extract_energy_sums(&self, words: &[u32], idx: &mut usize, hit: &mut Hit) {
        let n = masks::SIZE_OF_ENE_SUMS as usize;
        hit.energy_sums.extend_from_slice(&words[*idx..*idx + n]);
        *idx += n;
    }

    /// QDC sums: eight gate integrals.
    fn extract_qdc_sums(&self, words: &[u32], idx: &mut usize, hit: &mut Hit) {
        let n = masks::SIZE_OF_QDC_SUMS as usize;
        hit.qdc_sums.extend_from_slice(&words[*idx..*idx + n]);
        *idx += n;
    }

    /// 48-bit external timestamp, stored low word first. No clock-tick to
    /// nanosecond conversion is applied; the tick period is not knowable
    /// from the data alone.
    fn extract_external_timestamp(&self, words: &[u32], idx: &mut usize, hit: &mut Hit) {
        let low = words[*idx] as u64;
        let high = words[*idx + 1] as u64;
        *idx += 2;
        hit.external_timestamp = Some((high << 32) | low);
    }

    /// Trace samples are packed two to a word: sample i in the lower 16
    /// bits, sample i + 1 in the upper 16.
    fn parse_trace(&self, words: &[u32], idx: &mut usize, hit: &mut Hit) {
        let n_words = (hit.trace_length / 2) as usize;
        hit.trace.reserve(hit.trace_length as usize);
        for &datum in &words[*idx..*idx + n_words] {
            hit.trace.push((datum & masks::LOWER_16_BIT_MASK) as u16);
            hit.trace
                .push(((datum & masks::UPPER_16_BIT_MASK) >> 16) as u16);
        }
        *idx += n_words;
    }
}

/// Form the 48-bit timestamp from its halves and convert to nanoseconds.
/// The tick period is 10 ns for 100 and 500 MSPS modules and 8 ns for
/// 250 MSPS modules.
fn compute_coarse_time(msps: u32, time_low: u32, time_high: u32) -> u64 {
    let ticks = ((time_high as u64) << 32) | time_low as u64;
    let to_nanoseconds = if msps == 250 { 8 } else { 10 };
    ticks * to_nanoseconds
}
