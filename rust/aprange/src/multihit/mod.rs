pub mod accumulator;
pub mod events;

pub use accumulator::{
    analyze,
    CorrelationKind,
    KeyRangeStats,
    MultiHitModel,
    PairAccumulator,
    PairTable,
    RangeLookup,
    SeparationHistograms,
    DIST_RES,
    DP_BINS,
    HREG_MAX,
    N_DIST_BINS,
};
pub use events::{
    check_required_fields,
    EventChunk,
    EventSource,
    VecEventSource,
    REQUIRED_FIELDS,
};
