//! Spill demultiplexer
//!
//! Walks a reassembled spill, recognizes the VSN sub-blocks, and feeds each
//! channel event span to the decoder. Decoded hits collect in per-slot
//! queues tagged with their spill id; [`SpillDemux::flush`] sorts each
//! queue by time, drains them all, and re-sorts the combined batch so the
//! output is globally time-ordered.

use std::cmp::Ordering;

use tracing::{debug, error, info, warn};

use crate::common::{LdfError, LdfResult};
use crate::config::ModuleMap;
use crate::decoder::{masks, Hit, HitUnpacker};
use crate::translator::buffer::tags;
use crate::translator::Spill;

/// VSN marking the end of a spill readout
const VSN_END_OF_READOUT: u32 = 9999;
/// VSN carrying a wall-clock timestamp instead of module data
const VSN_WALL_CLOCK: u32 = 1000;
/// Module VSNs are below this bound
const VSN_MODULE_LIMIT: u32 = 14;
/// Segment length of a module whose FIFO read out empty
const EMPTY_MODULE_WORDS: usize = 2;
/// Segment length of a heartbeat block
const HEARTBEAT_WORDS: usize = 6;

/// Slots addressable by the 4-bit slot field
const NUM_SLOTS: usize = 16;

/// A decoded hit waiting in a per-slot queue
#[derive(Debug, Clone)]
struct QueuedHit {
    hit: Hit,
    spill_id: u64,
}

/// Order hits by time, breaking ties by physical location. Arrival order
/// breaks full ties because the sorts used are stable.
fn hit_order(a: &Hit, b: &Hit) -> Ordering {
    a.time_ns
        .total_cmp(&b.time_ns)
        .then(a.crate_id.cmp(&b.crate_id))
        .then(a.slot_id.cmp(&b.slot_id))
        .then(a.channel_id.cmp(&b.channel_id))
}

/// Demultiplexes spills into per-slot hit queues
#[derive(Debug)]
pub(crate) struct SpillDemux {
    unpacker: HitUnpacker,
    queues: Vec<Vec<QueuedHit>>,
    /// Hits in flight per concurrent spill slot, indexed by spill id modulo
    /// the concurrency target
    spill_counter: Vec<u64>,
    /// Scratch span handed to the decoder: two synthesized prefix words
    /// plus the raw event words
    event_words: Vec<u32>,
}

impl SpillDemux {
    pub(crate) fn new(concurrent_spills: usize) -> Self {
        Self {
            unpacker: HitUnpacker::new(),
            queues: vec![Vec::new(); NUM_SLOTS],
            spill_counter: vec![0; concurrent_spills.max(1)],
            event_words: Vec::new(),
        }
    }

    /// Number of concurrent spills with hits still queued
    pub(crate) fn spills_with_hits(&self) -> usize {
        self.spill_counter.iter().filter(|&&n| n > 0).count()
    }

    /// Total hits currently queued
    pub(crate) fn queued_hits(&self) -> usize {
        self.queues.iter().map(Vec::len).sum()
    }

    /// Hits queued per slot, for the end-of-life leftovers report
    pub(crate) fn leftovers(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.queues
            .iter()
            .enumerate()
            .filter(|(_, q)| !q.is_empty())
            .map(|(slot, q)| (slot, q.len()))
    }

    /// Walk one reassembled spill and queue every decoded hit.
    ///
    /// Stops at the end-of-readout sentinel, or abandons the rest of the
    /// spill on an unexpected VSN. Decode failures and missing module
    /// configuration are fatal and propagate.
    pub(crate) fn demux(&mut self, spill: &Spill, modules: &ModuleMap) -> LdfResult<()> {
        let words = &spill.words;
        let mut read = 0usize;

        debug!(
            "unpacking spill {} ({} words, full: {})",
            spill.id,
            words.len(),
            spill.full
        );

        loop {
            while read < words.len() && words[read] == tags::ENDBUFF {
                read += 1;
            }
            if read + 1 >= words.len() {
                if read < words.len() {
                    warn!("spill {} ended inside a segment header", spill.id);
                }
                break;
            }

            let segment_len = words[read] as usize;
            let vsn = words[read + 1];

            if segment_len < EMPTY_MODULE_WORDS {
                warn!(
                    "segment length {} below header size in spill {}",
                    segment_len, spill.id
                );
                break;
            }

            if segment_len == HEARTBEAT_WORDS {
                read += segment_len;
                continue;
            }

            if vsn < VSN_MODULE_LIMIT {
                if segment_len == EMPTY_MODULE_WORDS {
                    // Module FIFO read out empty.
                    read += segment_len;
                    continue;
                }
                let end = read + segment_len;
                if end > words.len() {
                    warn!(
                        "segment for vsn {} runs past spill {} end",
                        vsn, spill.id
                    );
                    break;
                }
                self.demux_module_segment(&words[read + 2..end], spill.id, modules)?;
                read += segment_len;
            } else if vsn == VSN_WALL_CLOCK {
                if read + 4 <= words.len() {
                    let seconds = words[read + 2] as u64 | ((words[read + 3] as u64) << 32);
                    info!("wall clock marker: {} s since epoch", seconds);
                }
                read += segment_len;
            } else if vsn == VSN_END_OF_READOUT {
                break;
            } else {
                error!("unexpected VSN {} in spill {}", vsn, spill.id);
                break;
            }
        }

        Ok(())
    }

    /// Decode the concatenated channel events of one module readout
    fn demux_module_segment(
        &mut self,
        mut events: &[u32],
        spill_id: u64,
        modules: &ModuleMap,
    ) -> LdfResult<()> {
        while !events.is_empty() {
            let first_word = events[0];
            let channel_words =
                ((first_word & masks::CHANNEL_LENGTH_MASK) >> masks::CHANNEL_LENGTH_SHIFT) as usize;
            let event_words = channel_words + 2;
            let crate_id = (first_word & masks::CRATE_ID_MASK) >> masks::CRATE_ID_SHIFT;
            let slot_id = (first_word & masks::SLOT_ID_MASK) >> masks::SLOT_ID_SHIFT;

            let params = modules
                .get(crate_id, slot_id)
                .ok_or(LdfError::ConfigMiss { crate_id, slot_id })?;

            if channel_words == 0 || channel_words > events.len() {
                return Err(LdfError::TruncatedEvent {
                    need: channel_words,
                    have: events.len(),
                });
            }

            // Prepend the size and module-info words the decoder expects.
            self.event_words.clear();
            self.event_words.push((event_words * 2) as u32);
            self.event_words.push(params.info_word());
            self.event_words.extend_from_slice(&events[..channel_words]);

            let (hit, consumed) = self.unpacker.unpack_one(&self.event_words)?;
            if consumed != event_words {
                error!(
                    "unpacked event length {} does not match expected length {}",
                    consumed, event_words
                );
                return Err(LdfError::EventLengthMismatch {
                    expected: event_words,
                    got: consumed,
                });
            }

            let slot = hit.slot_id as usize % NUM_SLOTS;
            self.queues[slot].push(QueuedHit { hit, spill_id });
            let idx = spill_id as usize % self.spill_counter.len();
            self.spill_counter[idx] += 1;

            events = &events[channel_words..];
        }
        Ok(())
    }

    /// Sort every queue by time, drain them all into `out`, and re-sort the
    /// appended range globally. Spill population counters drop as hits
    /// leave the queues.
    pub(crate) fn flush(&mut self, out: &mut Vec<Hit>) {
        let start = out.len();
        for queue in &mut self.queues {
            queue.sort_by(|a, b| hit_order(&a.hit, &b.hit));
            for queued in queue.drain(..) {
                let idx = queued.spill_id as usize % self.spill_counter.len();
                self.spill_counter[idx] = self.spill_counter[idx].saturating_sub(1);
                out.push(queued.hit);
            }
        }
        out[start..].sort_by(hit_order);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModuleParams;

    fn test_modules() -> ModuleMap {
        let mut map = ModuleMap::new();
        map.insert(
            0,
            2,
            ModuleParams {
                msps: 100,
                adc_resolution: 14,
                hardware_revision: 15,
            },
        );
        map.insert(
            0,
            3,
            ModuleParams {
                msps: 250,
                adc_resolution: 14,
                hardware_revision: 15,
            },
        );
        map
    }

    /// Raw on-wire event: four header words, no payloads.
    fn raw_event(crate_id: u32, slot: u32, channel: u32, time_low: u32, energy: u32) -> Vec<u32> {
        vec![
            channel | (slot << 4) | (crate_id << 8) | (4 << 12) | (4 << 17),
            time_low,
            0,
            energy,
        ]
    }

    /// Raw on-wire event with a 4-sample trace, so a lone event does not
    /// collide with the heartbeat segment length.
    fn traced_event(crate_id: u32, slot: u32, channel: u32, time_low: u32, energy: u32) -> Vec<u32> {
        vec![
            channel | (slot << 4) | (crate_id << 8) | (4 << 12) | (6 << 17),
            time_low,
            0,
            energy | (4 << 16),
            0x0002_0001,
            0x0004_0003,
        ]
    }

    /// Module segment: length, vsn, then the event words.
    fn segment(vsn: u32, events: &[Vec<u32>]) -> Vec<u32> {
        let body: Vec<u32> = events.iter().flatten().copied().collect();
        let mut words = vec![(body.len() + 2) as u32, vsn];
        words.extend(body);
        words
    }

    fn end_marker() -> Vec<u32> {
        vec![2, VSN_END_OF_READOUT]
    }

    fn spill(id: u64, parts: &[Vec<u32>]) -> Spill {
        Spill {
            id,
            full: true,
            words: parts.iter().flatten().copied().collect(),
        }
    }

    #[test]
    fn test_single_module_readout() {
        let mut demux = SpillDemux::new(2);
        let spill = spill(
            0,
            &[
                segment(2, &[raw_event(0, 2, 0, 100, 10), raw_event(0, 2, 1, 50, 20)]),
                end_marker(),
            ],
        );
        demux.demux(&spill, &test_modules()).unwrap();

        assert_eq!(demux.queued_hits(), 2);
        assert_eq!(demux.spills_with_hits(), 1);

        let mut out = Vec::new();
        demux.flush(&mut out);
        assert_eq!(out.len(), 2);
        // Sorted by time: the channel-1 hit at tick 50 comes first.
        assert_eq!(out[0].channel_id, 1);
        assert_eq!(out[0].time_ns, 500.0);
        assert_eq!(out[1].channel_id, 0);
        assert_eq!(out[1].time_ns, 1000.0);
        assert_eq!(demux.queued_hits(), 0);
        assert_eq!(demux.spills_with_hits(), 0);
    }

    #[test]
    fn test_leading_padding_skipped() {
        let mut demux = SpillDemux::new(2);
        let spill = spill(
            0,
            &[
                vec![tags::ENDBUFF; 3],
                segment(2, &[traced_event(0, 2, 0, 1, 1)]),
                end_marker(),
            ],
        );
        demux.demux(&spill, &test_modules()).unwrap();
        assert_eq!(demux.queued_hits(), 1);
    }

    #[test]
    fn test_empty_module_and_heartbeat_skipped() {
        let mut demux = SpillDemux::new(2);
        let spill = spill(
            0,
            &[
                vec![2, 5],          // empty module readout
                vec![6, 3, 0, 0, 0, 0], // heartbeat block
                segment(2, &[traced_event(0, 2, 4, 7, 9)]),
                end_marker(),
            ],
        );
        demux.demux(&spill, &test_modules()).unwrap();
        assert_eq!(demux.queued_hits(), 1);
    }

    #[test]
    fn test_wall_clock_segment_skipped() {
        let mut demux = SpillDemux::new(2);
        let spill = spill(
            0,
            &[
                vec![4, VSN_WALL_CLOCK, 0x1234_5678, 0],
                segment(3, &[traced_event(0, 3, 0, 10, 5)]),
                end_marker(),
            ],
        );
        demux.demux(&spill, &test_modules()).unwrap();
        assert_eq!(demux.queued_hits(), 1);
    }

    #[test]
    fn test_unexpected_vsn_abandons_rest() {
        let mut demux = SpillDemux::new(2);
        let spill = spill(
            0,
            &[
                segment(2, &[raw_event(0, 2, 0, 1, 1), raw_event(0, 2, 3, 4, 4)]),
                segment(77, &[raw_event(0, 2, 1, 2, 2), raw_event(0, 2, 2, 3, 3)]),
                segment(3, &[raw_event(0, 3, 2, 3, 3), raw_event(0, 3, 4, 5, 5)]),
                end_marker(),
            ],
        );
        demux.demux(&spill, &test_modules()).unwrap();
        // Only the segment before the unexpected VSN is decoded.
        assert_eq!(demux.queued_hits(), 2);
    }

    #[test]
    fn test_nothing_after_end_marker_decoded() {
        let mut demux = SpillDemux::new(2);
        let spill = spill(
            0,
            &[
                end_marker(),
                segment(2, &[raw_event(0, 2, 0, 1, 1)]),
            ],
        );
        demux.demux(&spill, &test_modules()).unwrap();
        assert_eq!(demux.queued_hits(), 0);
    }

    #[test]
    fn test_config_miss_is_fatal() {
        let mut demux = SpillDemux::new(2);
        // Slot 9 has no configuration entry.
        let spill = spill(
            0,
            &[
                segment(9, &[raw_event(0, 9, 0, 1, 1), raw_event(0, 9, 1, 2, 2)]),
                end_marker(),
            ],
        );
        let result = demux.demux(&spill, &test_modules());
        assert!(matches!(
            result,
            Err(LdfError::ConfigMiss {
                crate_id: 0,
                slot_id: 9
            })
        ));
    }

    #[test]
    fn test_flush_merges_slots_in_time_order() {
        let mut demux = SpillDemux::new(4);
        let spill = spill(
            0,
            &[
                segment(
                    2,
                    &[raw_event(0, 2, 0, 300, 1), raw_event(0, 2, 0, 100, 2)],
                ),
                segment(
                    3,
                    &[raw_event(0, 3, 0, 250, 3), raw_event(0, 3, 0, 50, 4)],
                ),
                end_marker(),
            ],
        );
        demux.demux(&spill, &test_modules()).unwrap();

        let mut out = Vec::new();
        demux.flush(&mut out);

        // Slot 3 runs at 250 MSPS (8 ns ticks), slot 2 at 100 MSPS (10 ns).
        let times: Vec<f64> = out.iter().map(|h| h.time_ns).collect();
        assert_eq!(times, [400.0, 1000.0, 2000.0, 3000.0]);
    }

    #[test]
    fn test_tie_break_by_crate_slot_channel() {
        let mut demux = SpillDemux::new(2);
        // Same timestamp everywhere; slot 3 would sort after slot 2.
        let spill = spill(
            0,
            &[
                segment(3, &[traced_event(0, 3, 0, 0, 1)]),
                segment(2, &[raw_event(0, 2, 5, 0, 2), raw_event(0, 2, 1, 0, 3)]),
                end_marker(),
            ],
        );
        demux.demux(&spill, &test_modules()).unwrap();

        let mut out = Vec::new();
        demux.flush(&mut out);
        let keys: Vec<(u32, u32)> = out.iter().map(|h| (h.slot_id, h.channel_id)).collect();
        assert_eq!(keys, [(2, 1), (2, 5), (3, 0)]);
    }

    #[test]
    fn test_spill_counters_track_flushes() {
        let mut demux = SpillDemux::new(2);
        let modules = test_modules();
        for id in 0..3u64 {
            let spill = spill(
                id,
                &[segment(2, &[traced_event(0, 2, 0, id as u32, 1)]), end_marker()],
            );
            demux.demux(&spill, &modules).unwrap();
        }
        // Spills 0 and 2 share a counter slot (mod 2).
        assert_eq!(demux.spills_with_hits(), 2);

        let mut out = Vec::new();
        demux.flush(&mut out);
        assert_eq!(out.len(), 3);
        assert_eq!(demux.spills_with_hits(), 0);
    }

    #[test]
    fn test_truncated_module_segment_is_fatal() {
        let mut demux = SpillDemux::new(2);
        // The first event claims far more words than the segment holds.
        let mut event = raw_event(0, 2, 0, 1, 1);
        event[0] = (event[0] & !masks::CHANNEL_LENGTH_MASK) | (100 << masks::CHANNEL_LENGTH_SHIFT);
        let spill = spill(
            0,
            &[segment(2, &[event, raw_event(0, 2, 1, 2, 2)]), end_marker()],
        );
        let result = demux.demux(&spill, &test_modules());
        assert!(matches!(result, Err(LdfError::TruncatedEvent { .. })));
    }
}
