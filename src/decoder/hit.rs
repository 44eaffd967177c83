//! Decoded channel event

use serde::{Deserialize, Serialize};

/// One decoded channel event from a Pixie-16 module
///
/// Scalar fields are always populated by the unpacker. The variable-length
/// payloads (`energy_sums`, `qdc_sums`, `external_timestamp`, `trace`) are
/// present only when the channel header length says they were read out:
/// energy sums are exactly 4 words, QDC sums exactly 8.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Crate the module sits in
    pub crate_id: u32,
    /// Slot the module sits in
    pub slot_id: u32,
    /// Channel on the module
    pub channel_id: u32,

    /// Module sampling rate in MSPS (100, 250, or 500)
    pub module_msps: u32,
    /// ADC bit depth (12, 14, or 16)
    pub adc_resolution: u32,
    /// Module hardware revision byte
    pub hardware_revision: u32,

    /// Lower 32 bits of the 48-bit coarse timestamp
    pub time_low: u32,
    /// Upper 16 bits of the 48-bit coarse timestamp
    pub time_high: u32,
    /// Coarse timestamp converted to nanoseconds
    pub coarse_time_ns: u64,

    /// Raw CFD time field
    pub cfd_raw: u32,
    /// CFD trigger source bits
    pub cfd_trig_source: u32,
    /// True if the CFD algorithm failed to latch
    pub cfd_fail_bit: bool,

    /// Coarse time plus the CFD sub-tick correction, in nanoseconds
    pub time_ns: f64,

    /// Hit energy
    pub energy: u16,
    /// True if the ADC over- or underflowed
    pub adc_overflow_underflow: bool,

    /// Number of 32-bit header words present (4, 6, 8, ..., 18)
    pub channel_header_length: u32,
    /// Total 32-bit words for this channel including the trace
    pub channel_length: u32,
    /// Trace length in 16-bit samples
    pub trace_length: u32,
    /// Pile-up marker
    pub finish_code: bool,

    /// Trailing sum, gap sum, leading sum, IEEE-754 baseline (4 words)
    pub energy_sums: Vec<u32>,
    /// QDC sums (8 words)
    pub qdc_sums: Vec<u32>,
    /// 48-bit external clock tick counter, no unit conversion applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_timestamp: Option<u64>,
    /// Sampled waveform, one entry per 16-bit ADC sample
    pub trace: Vec<u16>,
}

impl Hit {
    /// Create an empty hit
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero all scalar fields and clear the payloads, keeping allocated
    /// capacity so a hit can be reused across events.
    pub fn reset(&mut self) {
        let trace = std::mem::take(&mut self.trace);
        let energy_sums = std::mem::take(&mut self.energy_sums);
        let qdc_sums = std::mem::take(&mut self.qdc_sums);
        *self = Self::default();
        self.trace = trace;
        self.energy_sums = energy_sums;
        self.qdc_sums = qdc_sums;
        self.trace.clear();
        self.energy_sums.clear();
        self.qdc_sums.clear();
    }

    /// Format the hit for display
    pub fn display(&self) -> String {
        format!(
            "Cr:{:2} Sl:{:2} Ch:{:2} T:{:15.3}ns E:{:5}{}{}",
            self.crate_id,
            self.slot_id,
            self.channel_id,
            self.time_ns,
            self.energy,
            if self.finish_code { " [PU]" } else { "" },
            if self.trace.is_empty() { "" } else { " [TR]" },
        )
    }
}

impl std::fmt::Display for Hit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
