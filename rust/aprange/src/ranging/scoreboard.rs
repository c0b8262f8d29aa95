//! Scheme assignment, range-edge determination and overlap resolution.
//!
//! This is the ranging state machine: every range goes from an unset scheme
//! to one of Left/Half/Quarter based on neighbor spacing (LeftTail only ever
//! arrives as a prior override), gets its window edges from a net-maximizing
//! search, and the resulting set is checked for overlaps. The whole stage
//! computes a fresh next-state range set; the caller swaps it in only on
//! success, so a validation failure leaves the previous set untouched.

use tracing::{
    debug,
    warn,
};

use crate::errors::ValidationError;
use crate::models::histogram::{
    CoarseHistogram,
    SpectrumSummary,
};
use crate::models::params::RangingParams;
use crate::models::range::{
    DiscoveredPeak,
    MassRange,
    Scheme,
    SchemeState,
};
use crate::ranging::range_math::{
    half_background_left,
    half_background_right,
    integrate,
    net_max,
    quarter_background_left,
    quarter_background_right,
};

/// Peaks closer than this (Da) on either side force the Quarter scheme.
const HALF_NEIGHBOR_CRITERIA: f64 = 0.9;

/// Result of the per-range edge determination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeDetermination {
    pub min: f64,
    pub max: f64,
    pub net: f64,
    pub raw: f64,
    pub left_bgd: f64,
    pub right_bgd: f64,
}

impl RangeDetermination {
    fn degenerate(pos: f64) -> Self {
        Self {
            min: pos,
            max: pos,
            net: 0.0,
            raw: 0.0,
            left_bgd: 0.0,
            right_bgd: 0.0,
        }
    }

    pub fn background(&self) -> f64 {
        self.left_bgd + self.right_bgd
    }
}

/// Scheme transition rule.
///
/// A clear left flank takes Left; clear flanks on both sides (but not
/// enough for Left) take Half; anything tighter takes Quarter. Monotone in
/// `left_dist`: growing past `criteria` can only move toward Left.
pub fn assign_scheme(left_dist: f64, right_dist: f64, criteria: f64) -> Scheme {
    if left_dist >= criteria {
        Scheme::Left
    } else if left_dist >= HALF_NEIGHBOR_CRITERIA && right_dist >= HALF_NEIGHBOR_CRITERIA {
        Scheme::Half
    } else {
        Scheme::Quarter
    }
}

/// Distances from the range at `idx` to its nearest neighbors.
///
/// Candidates are the other ranges' peak positions plus discovered peaks
/// not covered by any range; a missing neighbor measures against the
/// histogram start/end. Each range measures from its own position.
pub fn neighbor_distances(
    idx: usize,
    ranges: &[MassRange],
    free_peaks: &[f64],
    hist_start: f64,
    hist_end: f64,
) -> (f64, f64) {
    let pos = ranges[idx].pos;
    let mut left = hist_start;
    let mut right = hist_end;
    let others = ranges
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != idx)
        .map(|(_, r)| r.pos)
        .chain(free_peaks.iter().copied());
    for p in others {
        if p < pos && p > left {
            left = p;
        }
        if p > pos && p < right {
            right = p;
        }
    }
    (pos - left, right - pos)
}

fn min_width_bins(
    scheme: Scheme,
    pos: f64,
    h: &CoarseHistogram,
    summary: &SpectrumSummary,
    params: &RangingParams,
) -> i64 {
    match scheme {
        // Position-independent for the left-offset schemes.
        Scheme::Left | Scheme::LeftTail => {
            let bins =
                (summary.max_peak_fw1pm * params.ranging_width_factor / h.bin_width + 0.5) as i64;
            bins.max(2)
        }
        // Width scales with sqrt(m/z) and must divide evenly for the half
        // and quarter flanking windows.
        Scheme::Half | Scheme::Quarter => {
            let width_factor = if params.use_fixed_ranging_width {
                params.ranging_width_factor
            } else {
                params.min_width_factor
            };
            let scale = (pos / h.max_pos).max(0.0).sqrt();
            let quads =
                (width_factor * summary.max_peak_fw1pm / h.bin_width / 4.0 * scale + 0.5) as i64;
            (quads * 4).max(4)
        }
    }
}

/// Determine the integration window around `pos` for the given scheme.
///
/// Left/LeftTail: one net-maximizing hill-climb, then the background is
/// pulled from an equal-width window `left_range_delta` Da to the left
/// (clamped at the histogram start). Half/Quarter: hill-climb, expand
/// symmetrically (1 bin for Half, 2 for Quarter), re-center on the best
/// shift and repeat while the net keeps improving, then retract the last
/// speculative step; fixed-width mode takes the first computation only.
/// Edges snap to bin boundaries, so adjacent ranges can abut exactly.
pub fn determine_range(
    h: &CoarseHistogram,
    pos: f64,
    scheme: Scheme,
    summary: &SpectrumSummary,
    params: &RangingParams,
) -> RangeDetermination {
    let len = h.len() as i64;
    let start_index = h.index_of(pos);
    if start_index < 0 || start_index >= len {
        return RangeDetermination::degenerate(pos);
    }

    let width = min_width_bins(scheme, pos, h, summary, params);
    let mut left = start_index - width / 2 + 1;
    let mut right = start_index + width / 2;
    // The search and flanking windows need a full width of room on either
    // side; a peak this close to the spectrum edge cannot be ranged.
    if left - width < 0 || right + width >= len {
        warn!(pos, "range window too close to the spectrum edge");
        return RangeDetermination::degenerate(pos);
    }

    if matches!(scheme, Scheme::Left | Scheme::LeftTail) {
        let s = net_max(h, scheme, left, right);
        left += s.shift;
        right += s.shift;

        let mut delta_bins = (params.left_range_delta / h.bin_width + 0.5) as i64;
        if left - delta_bins < 0 {
            delta_bins = left;
        }
        let left_bgd = integrate(h, left, right, -delta_bins);
        return RangeDetermination {
            min: h.pos(left),
            max: h.pos(right + 1),
            net: s.net - left_bgd,
            raw: s.raw,
            left_bgd,
            right_bgd: 0.0,
        };
    }

    let expand = match scheme {
        Scheme::Quarter => 2,
        _ => 1,
    };

    let mut s = net_max(h, scheme, left, right);
    if params.use_fixed_ranging_width {
        // First computation only: commit the shifted window as-is.
        left += s.shift;
        right += s.shift;
    } else {
        left += s.shift - expand;
        right += s.shift + expand;
        let mut last_shift = s.shift;
        let mut t = net_max(h, scheme, left, right);
        while t.net > s.net {
            s = t;
            left += t.shift - expand;
            right += t.shift + expand;
            last_shift = t.shift;
            t = net_max(h, scheme, left, right);
        }
        // Retract the speculative expand+shift that failed to improve.
        left = left - last_shift + expand;
        right = right - last_shift - expand;
    }

    let (left_bgd, right_bgd) = match scheme {
        Scheme::Half => (
            half_background_left(h, left, right, 0),
            half_background_right(h, left, right, 0),
        ),
        Scheme::Quarter => (
            quarter_background_left(h, left, right, 0),
            quarter_background_right(h, left, right, 0),
        ),
        _ => unreachable!(),
    };

    RangeDetermination {
        min: h.pos(left),
        max: h.pos(right + 1),
        net: s.net,
        raw: s.raw,
        left_bgd,
        right_bgd,
    }
}

/// Merge/remove overlapping ranges.
///
/// Same-name overlaps keep the entry with the larger net; overlaps with a
/// discovered placeholder drop the placeholder; any remaining overlap is an
/// unresolvable validation failure. On success no two ranges overlap.
pub fn resolve_overlaps(ranges: &mut Vec<MassRange>) -> Result<(), ValidationError> {
    'restart: loop {
        for a in 0..ranges.len() {
            for b in (a + 1)..ranges.len() {
                if !ranges[a].overlaps(&ranges[b]) {
                    continue;
                }
                let drop = if ranges[a].name == ranges[b].name {
                    if ranges[a].net >= ranges[b].net {
                        b
                    } else {
                        a
                    }
                } else if ranges[a].is_discovered() {
                    a
                } else if ranges[b].is_discovered() {
                    b
                } else {
                    return Err(ValidationError::UnresolvedOverlap {
                        first: ranges[a].name.clone(),
                        second: ranges[b].name.clone(),
                    });
                };
                debug!(
                    name = %ranges[drop].name,
                    min = ranges[drop].min,
                    "dropping overlapped range"
                );
                ranges.remove(drop);
                continue 'restart;
            }
        }
        return Ok(());
    }
}

/// Compute the next-state range set for a Rerange pass.
///
/// Seeds keep their identity; discovered peaks that no seed covers become
/// `Discovered` placeholders. Prior scheme overrides are respected, newly
/// assigned schemes are `Computed`. Returns a fresh Vec sorted by window
/// position; the input slice is never modified.
pub fn plan_ranges(
    seed: &[MassRange],
    peaks: &[DiscoveredPeak],
    h: &CoarseHistogram,
    summary: &SpectrumSummary,
    params: &RangingParams,
) -> Result<Vec<MassRange>, ValidationError> {
    let mut ranges: Vec<MassRange> = seed.to_vec();

    // Refresh peak positions from the current histogram.
    for r in ranges.iter_mut() {
        r.pos = match h.find_local_max(r.min, r.max) {
            Some((pos, _)) => pos,
            None => (r.min + r.max) / 2.0,
        };
    }

    for p in peaks {
        if !ranges.iter().any(|r| r.covers(p.pos)) {
            ranges.push(MassRange::discovered(p.pos, p.intensity));
        }
    }
    ranges.sort_by(|a, b| a.pos.total_cmp(&b.pos));

    // Discovered peaks already represented by a range (placeholder or seed)
    // must not count twice as neighbors.
    let free_peaks: Vec<f64> = peaks
        .iter()
        .filter(|p| !ranges.iter().any(|r| r.covers(p.pos) || r.pos == p.pos))
        .map(|p| p.pos)
        .collect();

    let hist_start = h.start;
    let hist_end = h.pos(h.len().saturating_sub(1) as i64);

    for idx in 0..ranges.len() {
        let (left_dist, right_dist) =
            neighbor_distances(idx, &ranges, &free_peaks, hist_start, hist_end);
        let scheme = match ranges[idx].scheme {
            SchemeState::Override(s) => s,
            _ => {
                let s = assign_scheme(left_dist, right_dist, params.left_range_criteria);
                ranges[idx].scheme = SchemeState::Computed(s);
                s
            }
        };

        let d = determine_range(h, ranges[idx].pos, scheme, summary, params);
        let r = &mut ranges[idx];
        r.min = d.min;
        r.max = d.max;
        r.net = d.net;
        r.counts = d.raw;
        r.background = d.background();
        // The doubled quarter-width sample propagates twice the variance.
        r.background_sigma2 = match scheme {
            Scheme::Quarter => 2.0 * d.background(),
            _ => d.background(),
        };
        r.tail = 0.0;
    }

    resolve_overlaps(&mut ranges)?;
    ranges.sort_by(|a, b| a.min.total_cmp(&b.min));
    Ok(ranges)
}
