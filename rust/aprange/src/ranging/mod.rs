pub mod peak_finder;
pub mod range_math;
pub mod scoreboard;
pub mod tail;

pub use peak_finder::find_all_peaks;
pub use range_math::{
    net_max,
    NetSearch,
};
pub use scoreboard::{
    assign_scheme,
    determine_range,
    plan_ranges,
    resolve_overlaps,
    RangeDetermination,
};
pub use tail::{
    estimate_tails,
    TailNote,
    TailRejection,
};
