//! Chunked per-ion event records for multi-hit analysis.
//!
//! The host's ion store exposes sequential chunks of parallel per-ion
//! columns. Record order defines pulse adjacency and must be preserved:
//! the analysis is a single ordered pass.

use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::ValidationError;

/// Section names the multi-hit pass needs. The spelling follows the host
/// store's section naming, quirks included.
pub const REQUIRED_FIELDS: &[&str] = &[
    "pulse",
    "pulseDelta",
    "Mass",
    "Voltage",
    "Epos ToF",
    "Position",
    "Detector Coordinates",
];

/// One chunk of parallel per-ion columns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventChunk {
    pub pulse: Vec<u32>,
    pub pulse_delta: Vec<i16>,
    pub mass: Vec<f32>,
    pub voltage: Vec<f32>,
    pub tof: Vec<f32>,
    /// Reconstructed position (nm).
    pub position: Vec<[f32; 3]>,
    /// Detector-plane coordinate (mm).
    pub detector: Vec<[f32; 2]>,
}

impl EventChunk {
    pub fn len(&self) -> usize {
        self.pulse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pulse.is_empty()
    }

    /// All columns must be the same length.
    pub fn is_consistent(&self) -> bool {
        let n = self.pulse.len();
        self.pulse_delta.len() == n
            && self.mass.len() == n
            && self.voltage.len() == n
            && self.tof.len() == n
            && self.position.len() == n
            && self.detector.len() == n
    }

    /// The absolute pulse number, compensating the float-width pulse
    /// counter with the per-ion delta.
    pub fn real_pulse(&self, i: usize) -> f64 {
        self.pulse[i] as f64 + self.pulse_delta[i] as f64
    }
}

/// A source of sequential event chunks.
///
/// `field_names` reports which sections the underlying store carries so
/// the analysis can refuse to run on incomplete data instead of crashing
/// mid-stream.
pub trait EventSource {
    fn field_names(&self) -> Vec<String>;
    fn next_chunk(&mut self) -> Option<EventChunk>;
}

/// Verify every required section is present.
pub fn check_required_fields(source: &dyn EventSource) -> Result<(), ValidationError> {
    let names = source.field_names();
    for &field in REQUIRED_FIELDS {
        if !names.iter().any(|n| n == field) {
            return Err(ValidationError::MissingEventField { field });
        }
    }
    Ok(())
}

/// In-memory event source used by tests and the CLI.
#[derive(Debug, Clone, Default)]
pub struct VecEventSource {
    chunks: std::collections::VecDeque<EventChunk>,
    missing: Vec<&'static str>,
}

impl VecEventSource {
    pub fn new(chunks: Vec<EventChunk>) -> Self {
        Self {
            chunks: chunks.into(),
            missing: Vec::new(),
        }
    }

    /// A source that pretends the given sections are absent.
    pub fn with_missing(chunks: Vec<EventChunk>, missing: Vec<&'static str>) -> Self {
        Self {
            chunks: chunks.into(),
            missing,
        }
    }
}

impl EventSource for VecEventSource {
    fn field_names(&self) -> Vec<String> {
        REQUIRED_FIELDS
            .iter()
            .filter(|&&f| !self.missing.contains(&f))
            .map(|f| f.to_string())
            .collect()
    }

    fn next_chunk(&mut self) -> Option<EventChunk> {
        self.chunks.pop_front()
    }
}

/// Convenience builder: one chunk from (pulse, mass, position) triples.
pub fn chunk_from_records(records: &[(u32, f32, [f32; 3])]) -> EventChunk {
    EventChunk {
        pulse: records.iter().map(|r| r.0).collect(),
        pulse_delta: vec![0; records.len()],
        mass: records.iter().map(|r| r.1).collect(),
        voltage: vec![5000.0; records.len()],
        tof: vec![500.0; records.len()],
        position: records.iter().map(|r| r.2).collect(),
        detector: records.iter().map(|r| [r.2[0], r.2[1]]).collect(),
    }
}
