//! The flat parameter surface for an analysis pass.

use serde::{
    Deserialize,
    Serialize,
};
use tracing::warn;

/// Which ion pairs contribute to the separation-distance plots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeparationPlotIons {
    All,
    #[default]
    Selected,
    SelectedAndOthers,
}

/// Named numeric/boolean parameters controlling ranging, peak discovery,
/// tail estimation and multi-hit analysis. Coarsening targets are derived,
/// not configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RangingParams {
    /// Range widths are this many FW1%M (fixed-width mode also uses it for
    /// the LEFT-scheme window size).
    pub ranging_width_factor: f64,
    /// Minimum range width in FW1%M units, scaled by sqrt(m/z).
    pub min_width_factor: f64,
    /// Use the LEFT scheme when no other peak exists within this many Da to
    /// the left of a given peak.
    pub left_range_criteria: f64,
    /// Background window offset (Da) to the left of a LEFT-scheme range.
    pub left_range_delta: f64,
    /// Take the first width computation instead of the expand-while-
    /// improving iteration.
    pub use_fixed_ranging_width: bool,

    /// Region (Da) past the range maximum considered for the tail fit.
    pub considered_tail_range: f64,
    /// User-estimated relative uncertainty applied to the tail total.
    pub tail_estimate_uncertainty: f64,
    /// Maximum tail length (Da) before the fit is rejected.
    pub tail_range_maximum: f64,

    /// Peak-discovery confidence divisor in (0, 1]; 1 means the plain 99%
    /// CL threshold, smaller values require proportionally more counts.
    pub sensitivity: f64,
    /// Two times this number is the minimum discovery window width in bins.
    pub min_bin_pairs: usize,
    /// Discovered peaks whose max bin holds fewer counts are rejected.
    pub min_peak_max_counts: f64,

    /// Critical spatial separation: pairs at or below it are correlated.
    pub separation_criteria: f64,
    /// Largest pulse separation treated as a pseudo-multi.
    pub pseudo_multi_max_dp: usize,
    /// Use detector-plane coordinates instead of reconstructed positions.
    pub use_detector_separations: bool,
    /// Range whose ToF/voltage statistics are tracked; falls back to the
    /// first tracked range.
    pub key_range: Option<String>,
    pub separation_plot_ions: SeparationPlotIons,
}

impl Default for RangingParams {
    fn default() -> Self {
        Self {
            ranging_width_factor: 1.4,
            min_width_factor: 1.0,
            left_range_criteria: 5.0,
            left_range_delta: 2.0,
            use_fixed_ranging_width: false,
            considered_tail_range: 5.0,
            tail_estimate_uncertainty: 0.1,
            tail_range_maximum: 10.0,
            sensitivity: 0.5,
            min_bin_pairs: 6,
            min_peak_max_counts: 3.0,
            separation_criteria: 8.0,
            pseudo_multi_max_dp: 5,
            use_detector_separations: false,
            key_range: None,
            separation_plot_ions: SeparationPlotIons::Selected,
        }
    }
}

impl RangingParams {
    /// Normalize out-of-range values in place, matching the host-side
    /// behavior (a bad sensitivity resets to the default rather than
    /// erroring).
    pub fn validate(&mut self) {
        if self.sensitivity < 0.01 || self.sensitivity > 1.0 {
            warn!(
                sensitivity = self.sensitivity,
                "sensitivity outside [0.01, 1.0], resetting to 0.5"
            );
            self.sensitivity = 0.5;
        }
        if self.ranging_width_factor <= 0.0 {
            warn!(
                ranging_width_factor = self.ranging_width_factor,
                "non-positive ranging width factor, resetting to 1.4"
            );
            self.ranging_width_factor = 1.4;
        }
        if self.min_width_factor <= 0.0 {
            warn!(
                min_width_factor = self.min_width_factor,
                "non-positive min width factor, resetting to 1.0"
            );
            self.min_width_factor = 1.0;
        }
    }
}
