pub mod histogram;
pub mod params;
pub mod range;

pub use histogram::{
    coarsen,
    CoarseHistogram,
    RawHistogram,
    SpectrumSummary,
    COARSE_TARGET_BINS,
};
pub use params::{
    RangingParams,
    SeparationPlotIons,
};
pub use range::{
    DiscoveredPeak,
    IonFormula,
    MassRange,
    Scheme,
    SchemeState,
    DISCOVERED_NAME,
};
