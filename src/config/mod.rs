//! Translator configuration
//!
//! The LDF stream does not carry module metadata inline for every event, so
//! the decoder depends on an externally supplied map from physical location
//! (crate, slot) to module parameters (sampling rate, ADC resolution,
//! hardware revision). The map is read-only for the translator's lifetime;
//! a missing entry is a fatal configuration error, not a data error.
//!
//! Supports loading from JSON files. Since JSON objects cannot be keyed by
//! tuples, the on-disk shape is a list of entries:
//!
//! ```json
//! [
//!     { "crate": 0, "slot": 2, "msps": 250, "adc_resolution": 14, "hardware_revision": 15 }
//! ]
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::{LdfError, LdfResult};

/// Sampling rates the decoder knows how to handle
pub const SUPPORTED_MSPS: [u32; 3] = [100, 250, 500];

/// Default number of spills held in flight before a sorted batch is emitted
pub const DEFAULT_CONCURRENT_SPILLS: usize = 10;

/// Per-module parameters needed to decode its events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleParams {
    /// ADC sampling rate in MSPS (100, 250, or 500)
    pub msps: u32,
    /// ADC bit depth (12, 14, or 16)
    pub adc_resolution: u32,
    /// Module hardware revision byte
    pub hardware_revision: u32,
}

impl ModuleParams {
    /// Pack the parameters into the module-info word the event decoder
    /// expects: MSPS in bits [15:0], resolution in [23:16], revision in
    /// [31:24].
    pub(crate) fn info_word(&self) -> u32 {
        (self.msps & 0xFFFF)
            | ((self.adc_resolution << 16) & 0x00FF_0000)
            | ((self.hardware_revision << 24) & 0xFF00_0000)
    }
}

/// One entry of the on-disk module list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleEntry {
    /// Crate number
    #[serde(rename = "crate")]
    pub crate_id: u32,
    /// Slot number within the crate
    pub slot: u32,
    #[serde(flatten)]
    pub params: ModuleParams,
}

/// Lookup map from (crate, slot) to module parameters
#[derive(Debug, Clone, Default)]
pub struct ModuleMap {
    map: HashMap<(u32, u32), ModuleParams>,
}

impl ModuleMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert parameters for a (crate, slot) location
    pub fn insert(&mut self, crate_id: u32, slot: u32, params: ModuleParams) {
        if self.map.insert((crate_id, slot), params).is_some() {
            warn!("duplicate module entry for crate {} slot {}", crate_id, slot);
        }
    }

    /// Look up parameters for a (crate, slot) location
    pub fn get(&self, crate_id: u32, slot: u32) -> Option<&ModuleParams> {
        self.map.get(&(crate_id, slot))
    }

    /// Number of configured modules
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True if no modules are configured
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Build a map from a list of entries, validating sampling rates
    pub fn from_entries(entries: Vec<ModuleEntry>) -> LdfResult<Self> {
        let mut map = Self::new();
        for entry in entries {
            if !SUPPORTED_MSPS.contains(&entry.params.msps) {
                return Err(LdfError::config(format!(
                    "crate {} slot {}: unsupported msps {}",
                    entry.crate_id, entry.slot, entry.params.msps
                )));
            }
            map.insert(entry.crate_id, entry.slot, entry.params);
        }
        Ok(map)
    }

    /// Load a module map from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> LdfResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let entries: Vec<ModuleEntry> = serde_json::from_str(&content)?;
        Self::from_entries(entries)
    }

    /// Serialize the map back to the on-disk entry list
    pub fn to_entries(&self) -> Vec<ModuleEntry> {
        let mut entries: Vec<ModuleEntry> = self
            .map
            .iter()
            .map(|(&(crate_id, slot), &params)| ModuleEntry {
                crate_id,
                slot,
                params,
            })
            .collect();
        entries.sort_by_key(|e| (e.crate_id, e.slot));
        entries
    }
}

/// Top-level translator configuration
#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    /// Module parameter map keyed by (crate, slot)
    pub modules: ModuleMap,
    /// Number of spills reassembled before each sorted flush
    pub concurrent_spills: usize,
}

impl TranslatorConfig {
    /// Create a configuration with the default spill concurrency
    pub fn new(modules: ModuleMap) -> Self {
        Self {
            modules,
            concurrent_spills: DEFAULT_CONCURRENT_SPILLS,
        }
    }
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self::new(ModuleMap::new())
    }
}
