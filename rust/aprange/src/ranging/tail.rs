//! Exponential tail estimation for LeftTail ranges.
//!
//! Thermal tails on the right side of a peak decay roughly as
//! `y = exp(a + b*sqrt(x))` with `b < 0`. For every range carrying the
//! LeftTail scheme we fit that model to the bins past the range's right
//! edge and fold the integrated tail back into the range's net counts. A
//! rejected fit is not an error: the scheme reverts to plain Left and the
//! pass continues.

use tracing::info;

use crate::models::histogram::CoarseHistogram;
use crate::models::params::RangingParams;
use crate::models::range::{
    MassRange,
    Scheme,
    SchemeState,
};

/// Why a tail fit was rejected (informational, not an abort).
#[derive(Debug, Clone, PartialEq)]
pub enum TailRejection {
    TooFewPoints { usable: usize },
    NonDecayingSlope { slope: f64 },
    NoBackgroundLevel,
    CrossingOutOfBounds { crossing: f64 },
}

/// Informational note produced while estimating tails.
#[derive(Debug, Clone, PartialEq)]
pub enum TailNote {
    Fitted {
        range: String,
        tail: f64,
        crossing: f64,
    },
    Reverted {
        range: String,
        rejection: TailRejection,
    },
}

struct TailFit {
    a: f64,
    b: f64,
}

/// Ordinary least squares of `ln(y)` against `sqrt(x)`.
fn fit_log_sqrt(points: &[(f64, f64)]) -> Option<TailFit> {
    let n = points.len() as f64;
    if points.len() < 3 {
        return None;
    }
    let mut sum_t = 0.0;
    let mut sum_y = 0.0;
    let mut sum_tt = 0.0;
    let mut sum_ty = 0.0;
    for &(x, y) in points {
        let t = x.sqrt();
        let ly = y.ln();
        sum_t += t;
        sum_y += ly;
        sum_tt += t * t;
        sum_ty += t * ly;
    }
    let denom = n * sum_tt - sum_t * sum_t;
    if denom.abs() < f64::EPSILON {
        return None;
    }
    let b = (n * sum_ty - sum_t * sum_y) / denom;
    let a = (sum_y - b * sum_t) / n;
    Some(TailFit { a, b })
}

/// Estimate tails for all LeftTail ranges, strictly left to right so a
/// later range's window never feeds an earlier range's fit twice.
///
/// `resolution` is the instrument (raw) bin width used as the numeric
/// integration step.
pub fn estimate_tails(
    ranges: &mut [MassRange],
    h: &CoarseHistogram,
    resolution: f64,
    params: &RangingParams,
) -> Vec<TailNote> {
    let mut notes = Vec::new();

    let mut order: Vec<usize> = (0..ranges.len()).collect();
    order.sort_by(|&a, &b| ranges[a].pos.total_cmp(&ranges[b].pos));

    for idx in order {
        if ranges[idx].scheme.scheme() != Some(Scheme::LeftTail) {
            continue;
        }

        let range_max = ranges[idx].max;
        let window_end = range_max + params.considered_tail_range;

        // Collect (position, counts) pairs past the right edge, skipping
        // bins claimed by any other range's window.
        let mut points = Vec::new();
        let first_bin = h.index_of(range_max).max(0);
        let last_bin = h.index_of(window_end).min(h.len() as i64 - 1);
        let mut bin = first_bin;
        while bin <= last_bin {
            let x = h.pos(bin);
            if x >= range_max
                && !ranges
                    .iter()
                    .enumerate()
                    .any(|(j, r)| j != idx && r.min <= x && x < r.max)
            {
                let y = h.counts[bin as usize];
                if y > 0.0 {
                    points.push((x, y));
                }
            }
            bin += 1;
        }

        let outcome = try_fit(&ranges[idx], &points, h.bin_width, params);
        match outcome {
            Ok((fit, bgd_rate, crossing)) => {
                let mut tail = 0.0;
                let mut x = range_max;
                while x < crossing {
                    let y = (fit.a + fit.b * x.sqrt()).exp() - bgd_rate;
                    tail += y * (resolution / h.bin_width);
                    x += resolution;
                }
                let r = &mut ranges[idx];
                r.net += tail;
                r.tail += tail;
                r.background_sigma2 += (params.tail_estimate_uncertainty * tail).powi(2);
                info!(range = %r.name, tail, crossing, "tail fit accepted");
                notes.push(TailNote::Fitted {
                    range: r.name.clone(),
                    tail,
                    crossing,
                });
            }
            Err(rejection) => {
                let r = &mut ranges[idx];
                r.scheme = SchemeState::Computed(Scheme::Left);
                info!(range = %r.name, ?rejection, "tail fit rejected, reverting to Left");
                notes.push(TailNote::Reverted {
                    range: r.name.clone(),
                    rejection,
                });
            }
        }
    }
    notes
}

fn try_fit(
    range: &MassRange,
    points: &[(f64, f64)],
    bin_width: f64,
    params: &RangingParams,
) -> Result<(TailFit, f64, f64), TailRejection> {
    let fit = fit_log_sqrt(points).ok_or(TailRejection::TooFewPoints {
        usable: points.len(),
    })?;
    if fit.b >= 0.0 {
        return Err(TailRejection::NonDecayingSlope { slope: fit.b });
    }

    // Per-bin background rate of the range itself; the tail only counts
    // what rises above it.
    let range_bins = ((range.max - range.min) / bin_width).round();
    if range_bins <= 0.0 || range.background <= 0.0 {
        return Err(TailRejection::NoBackgroundLevel);
    }
    let bgd_rate = range.background / range_bins;

    let crossing = ((bgd_rate.ln() - fit.a) / fit.b).powi(2);
    if crossing <= range.max || crossing > range.max + params.tail_range_maximum {
        return Err(TailRejection::CrossingOutOfBounds { crossing });
    }
    Ok((fit, bgd_rate, crossing))
}
