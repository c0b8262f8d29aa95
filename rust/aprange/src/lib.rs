//! Core numerical engine for automated mass-spectrum ranging.
//!
//! The host supplies a raw time-of-flight mass histogram, a starting set of
//! named ranges and (optionally) an ordered per-ion event stream; this
//! crate coarsens the histogram, discovers peaks, assigns each range a
//! background-subtraction scheme and integration window, estimates
//! exponential peak tails, derives ionic and elemental compositions with
//! propagated uncertainties, and accumulates multi-hit correlation tables.
//! Display, persistence and file formats stay on the host side.

// Declare modules
pub mod composition;
pub mod errors;
pub mod export;
pub mod models;
pub mod multihit;
pub mod pipeline;
pub mod ranging;

// Re-export the main structures
pub use crate::composition::{
    decomposed_table,
    ionic_table,
    CompositionEntry,
    CompositionTable,
};
pub use crate::errors::{
    AnalysisError,
    Result,
    ValidationError,
};
pub use crate::export::{
    export_sheets,
    ExportCell,
    ExportSheet,
};
pub use crate::models::{
    coarsen,
    CoarseHistogram,
    DiscoveredPeak,
    IonFormula,
    MassRange,
    RangingParams,
    RawHistogram,
    Scheme,
    SchemeState,
    SpectrumSummary,
};
pub use crate::multihit::{
    EventChunk,
    EventSource,
    MultiHitModel,
    VecEventSource,
};
pub use crate::pipeline::{
    run_pass,
    update_positions,
    AnalysisInput,
    PassOutput,
    UpdateOutput,
};
