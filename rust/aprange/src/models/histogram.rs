//! Raw and coarsened mass histograms.
//!
//! The raw histogram comes from the host at instrument resolution. Ranging
//! works on a coarsened copy whose bin width is chosen so the dominant peak
//! spans a bounded number of bins.

use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::{
    AnalysisError,
    Result,
    ValidationError,
};

/// The coarsen factor is chosen so the main peak's FW1%M spans at most this
/// many coarse bins.
pub const COARSE_TARGET_BINS: usize = 30;

/// Fraction of the max-bin intensity at which the reference peak width is
/// measured (FW1%M).
const WIDTH_FRACTION: f64 = 0.01;

/// Mass histogram at instrument resolution, supplied once per pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawHistogram {
    pub start: f64,
    pub bin_width: f64,
    pub counts: Vec<f64>,
}

/// Scalar properties discovered while coarsening.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpectrumSummary {
    /// Position of the most intense bin (Da). All ranging widths scale from
    /// this peak.
    pub max_peak_pos: f64,
    /// Full width of the max peak at 1% of its maximum (Da).
    pub max_peak_fw1pm: f64,
    /// Mass resolving power of the max peak, truncated to one decimal.
    pub max_peak_mrp: f64,
    pub coarsen_factor: usize,
}

/// Coarsened working histogram.
///
/// Bins are contiguous and equally spaced; positions follow the left-edge
/// convention: `pos(i) = start + i * bin_width`, so bin `i` covers
/// `[pos(i), pos(i + 1))` and adjacent ranges snapped to bin boundaries abut
/// exactly. Immutable once built; rebuilt whenever the raw histogram
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoarseHistogram {
    pub start: f64,
    pub bin_width: f64,
    pub counts: Vec<f64>,
    /// Position of the dominant peak, used for sqrt(m/z) width scaling.
    pub max_pos: f64,
}

impl CoarseHistogram {
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn pos(&self, index: i64) -> f64 {
        self.start + index as f64 * self.bin_width
    }

    pub fn index_of(&self, pos: f64) -> i64 {
        ((pos - self.start) / self.bin_width).round() as i64
    }

    /// Position and intensity of the most intense bin in `[min, max]`.
    /// The window is clamped to the histogram; `None` for an empty window.
    pub fn find_local_max(&self, min: f64, max: f64) -> Option<(f64, f64)> {
        let start = self.index_of(min).max(0) as usize;
        let stop = self.index_of(max).min(self.len() as i64 - 1);
        if stop < start as i64 {
            return None;
        }
        let mut best_val = f64::NEG_INFINITY;
        let mut best_pos = self.pos(start as i64);
        for i in start..=(stop as usize) {
            if self.counts[i] > best_val {
                best_val = self.counts[i];
                best_pos = self.pos(i as i64);
            }
        }
        Some((best_pos, best_val))
    }
}

/// Reduce a raw histogram to the working resolution.
///
/// The factor is the smallest positive integer for which the FW1%M of the
/// dominant peak spans at most [`COARSE_TARGET_BINS`] coarse bins. Each
/// coarse bin sums `factor` consecutive raw bins; the last group sums only
/// the remaining bins. Re-running on the same input yields bit-identical
/// bins (pure integer grouping).
///
/// An all-zero histogram degrades to a single degenerate peak at the first
/// bin; only an empty histogram is an error.
pub fn coarsen(raw: &RawHistogram) -> Result<(CoarseHistogram, SpectrumSummary)> {
    if raw.counts.is_empty() {
        return Err(ValidationError::EmptyHistogram.into());
    }
    if raw.bin_width <= 0.0 {
        return Err(AnalysisError::precondition(format!(
            "non-positive raw bin width: {}",
            raw.bin_width
        )));
    }

    let mut max_intensity = 0.0f64;
    let mut max_index = 0usize;
    for (i, &v) in raw.counts.iter().enumerate() {
        if v > max_intensity {
            max_intensity = v;
            max_index = i;
        }
    }

    let threshold = WIDTH_FRACTION * max_intensity;
    let mut left = 0usize;
    for i in (0..=max_index).rev() {
        if raw.counts[i] <= threshold {
            left = i;
            break;
        }
    }
    let mut right = raw.counts.len() - 1;
    for (i, &v) in raw.counts.iter().enumerate().skip(max_index) {
        if v <= threshold {
            right = i;
            break;
        }
    }
    let width_bins = right - left;

    let mut factor = 1usize;
    while width_bins > COARSE_TARGET_BINS * factor {
        factor += 1;
    }

    let coarse_len = (raw.counts.len() - 1) / factor + 1;
    let mut counts = Vec::with_capacity(coarse_len);
    for group in raw.counts.chunks(factor) {
        counts.push(group.iter().sum());
    }
    debug_assert_eq!(counts.len(), coarse_len);

    let max_peak_pos = raw.start + max_index as f64 * raw.bin_width;
    let max_peak_fw1pm = width_bins as f64 * raw.bin_width;
    let max_peak_mrp = if max_peak_fw1pm > 0.0 {
        (max_peak_pos / max_peak_fw1pm * 10.0).trunc() / 10.0
    } else {
        0.0
    };

    let summary = SpectrumSummary {
        max_peak_pos,
        max_peak_fw1pm,
        max_peak_mrp,
        coarsen_factor: factor,
    };
    let coarse = CoarseHistogram {
        start: raw.start,
        bin_width: raw.bin_width * factor as f64,
        counts,
        max_pos: max_peak_pos,
    };
    Ok((coarse, summary))
}
