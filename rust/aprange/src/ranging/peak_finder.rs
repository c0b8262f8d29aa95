//! Discovery of statistically significant peaks in the coarse histogram.

use tracing::debug;

use crate::models::histogram::{
    CoarseHistogram,
    SpectrumSummary,
};
use crate::models::params::RangingParams;
use crate::models::range::{
    DiscoveredPeak,
    Scheme,
};
use crate::ranging::range_math::{
    half_background,
    integrate,
    net_max,
};

/// One-sided 99% confidence multiplier on sqrt(background).
const DETECTION_CL: f64 = 3.289;

/// Scan start position (Da); everything below is ToF turn-on noise.
const SCAN_START_POS: f64 = 0.8;

/// Scan the whole coarse spectrum for significant local maxima.
///
/// The test window at position x spans
/// `max(2*min_bin_pairs, 2*floor(factor*sqrt(x/max_pos)/2) + 2)` bins with
/// `factor = min_width_factor * FW1%M / bin_width`, growing with sqrt(m/z)
/// to follow ToF peak broadening. A window is a hit when
/// `net > 3.289 * sqrt(background) / sensitivity`. The scan stops short of
/// the right edge by three end-of-spectrum window widths so the width
/// growth cannot overrun the array.
///
/// Restartable pure function; an empty result is a valid outcome for a
/// flat or noisy spectrum.
pub fn find_all_peaks(
    h: &CoarseHistogram,
    summary: &SpectrumSummary,
    params: &RangingParams,
) -> Vec<DiscoveredPeak> {
    let mut peaks = Vec::new();
    let len = h.len() as i64;
    if len == 0 || summary.max_peak_fw1pm <= 0.0 || h.max_pos <= 0.0 {
        return peaks;
    }

    let factor = params.min_width_factor * summary.max_peak_fw1pm / h.bin_width;
    let end_pos = h.pos(len - 1);
    let stop_bin_width = 2 * ((factor * (end_pos / h.max_pos).sqrt() * 3.0 / 2.0) as i64) + 2;

    let mut left = h.index_of(SCAN_START_POS).max(0);
    while left < len - stop_bin_width {
        let current_pos = h.pos(left);
        let mut n_bins = 2 * ((factor * (current_pos / h.max_pos).sqrt() / 2.0) as i64) + 2;
        if n_bins < 2 * params.min_bin_pairs as i64 {
            n_bins = 2 * params.min_bin_pairs as i64;
        }
        let right = left + n_bins - 1;
        // The flanking windows reach nBins/2 past each edge.
        if left - n_bins / 2 < 0 || right + n_bins / 2 >= len {
            left += 1;
            continue;
        }

        let raw = integrate(h, left, right, 0);
        let bgd = half_background(h, left, right, 0);
        let net = raw - bgd;
        let criteria = DETECTION_CL * bgd.sqrt() / params.sensitivity;
        if net > criteria {
            // Locate the bin-wise maximum inside the window.
            let mut max = 0.0f64;
            let mut max_point = left;
            for j in left..=right {
                if h.counts[j as usize] > max {
                    max = h.counts[j as usize];
                    max_point = j;
                }
            }
            // A max on the right edge means the peak is wider than the scan
            // window; keep walking right while the intensity still rises.
            if max_point == right {
                let mut j = right + 1;
                while j < len && h.counts[j as usize] > max {
                    max = h.counts[j as usize];
                    max_point = j;
                    j += 1;
                }
            }

            let delta = n_bins / 2;
            let mut shift = 0;
            if max_point - delta - n_bins / 2 >= 0 && max_point + delta - 1 + n_bins / 2 < len {
                let refined = net_max(h, Scheme::Half, max_point - delta, max_point + delta - 1);
                shift = refined.shift;
            }

            if max > params.min_peak_max_counts {
                debug!(
                    pos = h.pos(max_point),
                    intensity = max,
                    "accepted discovered peak"
                );
                peaks.push(DiscoveredPeak {
                    pos: h.pos(max_point),
                    intensity: max,
                });
                // Advance past the accepted peak to avoid re-detection.
                left = max_point + delta - 1;
                if shift > 0 {
                    left += shift;
                }
            }
        }
        left += 1;
    }
    peaks
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a coarse histogram with gaussian peaks at the given
    /// (center position, sigma in Da, amplitude) triples.
    fn spectrum(peaks: &[(f64, f64, f64)], n: usize, bin_width: f64) -> (CoarseHistogram, SpectrumSummary) {
        let mut counts = vec![0.0f64; n];
        for (i, c) in counts.iter_mut().enumerate() {
            let x = i as f64 * bin_width;
            for &(pos, sigma, amp) in peaks {
                *c += amp * (-0.5 * ((x - pos) / sigma).powi(2)).exp();
            }
        }
        let main = peaks
            .iter()
            .cloned()
            .fold((0.0, 0.0, 0.0), |acc, p| if p.2 > acc.2 { p } else { acc });
        let fw1pm = 2.0 * main.1 * (2.0 * (100.0f64).ln()).sqrt();
        let summary = SpectrumSummary {
            max_peak_pos: main.0,
            max_peak_fw1pm: fw1pm,
            max_peak_mrp: if fw1pm > 0.0 { main.0 / fw1pm } else { 0.0 },
            coarsen_factor: 1,
        };
        let h = CoarseHistogram {
            start: 0.0,
            bin_width,
            counts,
            max_pos: main.0,
        };
        (h, summary)
    }

    #[test]
    fn test_flat_spectrum_finds_nothing() {
        let (mut h, summary) = spectrum(&[(10.0, 0.05, 1000.0)], 600, 0.05);
        h.counts.iter_mut().for_each(|c| *c = 2.0);
        let peaks = find_all_peaks(&h, &summary, &RangingParams::default());
        assert!(peaks.is_empty(), "flat spectrum should yield no peaks");
    }

    #[test]
    fn test_single_peak_is_found_once() {
        let (h, summary) = spectrum(&[(10.0, 0.05, 1000.0)], 600, 0.05);
        let peaks = find_all_peaks(&h, &summary, &RangingParams::default());
        assert_eq!(peaks.len(), 1, "got {:?}", peaks);
        assert!((peaks[0].pos - 10.0).abs() < 0.2, "got {:?}", peaks);
        assert!(peaks[0].intensity > 500.0);
    }

    #[test]
    fn test_two_separated_peaks_found_in_order() {
        let (h, summary) = spectrum(&[(8.0, 0.05, 1000.0), (16.0, 0.05, 400.0)], 600, 0.05);
        let peaks = find_all_peaks(&h, &summary, &RangingParams::default());
        assert_eq!(peaks.len(), 2, "got {:?}", peaks);
        assert!(peaks[0].pos < peaks[1].pos);
        assert!((peaks[0].pos - 8.0).abs() < 0.2);
        assert!((peaks[1].pos - 16.0).abs() < 0.2);
    }

    #[test]
    fn test_min_peak_max_counts_filters_small_peaks() {
        let (h, summary) = spectrum(&[(8.0, 0.05, 1000.0), (16.0, 0.05, 40.0)], 600, 0.05);
        let params = RangingParams {
            min_peak_max_counts: 100.0,
            ..Default::default()
        };
        let peaks = find_all_peaks(&h, &summary, &params);
        assert_eq!(peaks.len(), 1, "small peak should be filtered: {:?}", peaks);
    }

    #[test]
    fn test_lower_sensitivity_requires_more_counts() {
        let (mut h, summary) = spectrum(&[(8.0, 0.05, 1000.0), (16.0, 0.08, 40.0)], 600, 0.05);
        // Uniform background so the significance test has something to
        // reject against.
        h.counts.iter_mut().for_each(|c| *c += 30.0);
        let relaxed = RangingParams {
            sensitivity: 1.0,
            min_peak_max_counts: 3.0,
            ..Default::default()
        };
        let strict = RangingParams {
            sensitivity: 0.05,
            min_peak_max_counts: 3.0,
            ..Default::default()
        };
        let found_relaxed = find_all_peaks(&h, &summary, &relaxed).len();
        let found_strict = find_all_peaks(&h, &summary, &strict).len();
        assert!(
            found_strict <= found_relaxed,
            "strict sensitivity found more peaks ({} > {})",
            found_strict,
            found_relaxed
        );
        assert!(found_strict < 2, "tiny peak should fail the strict test");
    }

    #[test]
    fn test_empty_histogram_is_fine() {
        let h = CoarseHistogram {
            start: 0.0,
            bin_width: 0.05,
            counts: vec![],
            max_pos: 0.0,
        };
        let summary = SpectrumSummary {
            max_peak_pos: 0.0,
            max_peak_fw1pm: 0.0,
            max_peak_mrp: 0.0,
            coarsen_factor: 1,
        };
        assert!(find_all_peaks(&h, &summary, &RangingParams::default()).is_empty());
    }
}
