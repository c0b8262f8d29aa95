//! Full-pass orchestration.
//!
//! One Rerange pass runs coarsen -> discover -> scoreboard -> tail ->
//! composition over immutable inputs and returns a fresh output snapshot.
//! Nothing is mutated in place: on any validation failure the caller's
//! range set is exactly as it was, and swapping the new set in is a single
//! assignment on success. There are no internal cancellation points; a
//! host abandons a pass by dropping the output between stages.

use tracing::info;

use crate::composition::{
    decomposed_table,
    ionic_table,
    CompositionTable,
};
use crate::errors::{
    Result,
    ValidationError,
};
use crate::models::histogram::{
    coarsen,
    CoarseHistogram,
    RawHistogram,
    SpectrumSummary,
};
use crate::models::params::RangingParams;
use crate::models::range::{
    DiscoveredPeak,
    MassRange,
};
use crate::ranging::peak_finder::find_all_peaks;
use crate::ranging::scoreboard::plan_ranges;
use crate::ranging::tail::{
    estimate_tails,
    TailNote,
};

/// Immutable inputs for one pass.
#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub histogram: RawHistogram,
    pub seed_ranges: Vec<MassRange>,
    pub params: RangingParams,
}

/// Everything a pass produces. The `ranges` vector is the full replacement
/// range set to hand back to the host.
#[derive(Debug, Clone)]
pub struct PassOutput {
    pub summary: SpectrumSummary,
    pub coarse: CoarseHistogram,
    pub discovered: Vec<DiscoveredPeak>,
    pub ranges: Vec<MassRange>,
    pub ionic: CompositionTable,
    pub decomposed: CompositionTable,
    pub tail_notes: Vec<TailNote>,
}

/// Run a full Rerange pass.
pub fn run_pass(input: &AnalysisInput) -> Result<PassOutput> {
    if input.histogram.counts.is_empty() {
        return Err(ValidationError::EmptyHistogram.into());
    }
    if input.seed_ranges.is_empty() {
        return Err(ValidationError::EmptyRangeSet.into());
    }
    let mut params = input.params.clone();
    params.validate();

    let (coarse, summary) = coarsen(&input.histogram)?;
    info!(
        coarsen_factor = summary.coarsen_factor,
        max_peak_pos = summary.max_peak_pos,
        fw1pm = summary.max_peak_fw1pm,
        "coarsened histogram"
    );

    let discovered = find_all_peaks(&coarse, &summary, &params);
    info!(peaks = discovered.len(), "peak discovery finished");

    let mut ranges = plan_ranges(&input.seed_ranges, &discovered, &coarse, &summary, &params)?;

    let tail_notes = estimate_tails(&mut ranges, &coarse, input.histogram.bin_width, &params);

    let ionic = ionic_table(&ranges);
    let decomposed = decomposed_table(&ranges);
    info!(
        ranges = ranges.len(),
        ionic_entries = ionic.entries.len(),
        "pass finished"
    );

    Ok(PassOutput {
        summary,
        coarse,
        discovered,
        ranges,
        ionic,
        decomposed,
        tail_notes,
    })
}

/// Lightweight Update: refresh per-range peak positions against the
/// current histogram without touching schemes or edges.
#[derive(Debug, Clone)]
pub struct UpdateOutput {
    pub summary: SpectrumSummary,
    pub coarse: CoarseHistogram,
    pub ranges: Vec<MassRange>,
    /// Name of the range covering the most intense peak, if any.
    pub max_peak_range: Option<String>,
}

pub fn update_positions(input: &AnalysisInput) -> Result<UpdateOutput> {
    if input.histogram.counts.is_empty() {
        return Err(ValidationError::EmptyHistogram.into());
    }
    let (coarse, summary) = coarsen(&input.histogram)?;

    let mut ranges = input.seed_ranges.clone();
    for r in ranges.iter_mut() {
        if let Some((pos, _)) = coarse.find_local_max(r.min, r.max) {
            r.pos = pos;
        }
    }
    let max_peak_range = ranges
        .iter()
        .find(|r| r.min <= summary.max_peak_pos && summary.max_peak_pos <= r.max)
        .map(|r| r.name.clone());

    Ok(UpdateOutput {
        summary,
        coarse,
        ranges,
        max_peak_range,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AnalysisError;
    use crate::models::range::{
        IonFormula,
        SchemeState,
    };

    fn raw_spectrum(peaks: &[(f64, f64, f64)], span: f64, bin_width: f64) -> RawHistogram {
        let n = (span / bin_width) as usize;
        let counts = (0..n)
            .map(|i| {
                let x = i as f64 * bin_width;
                peaks
                    .iter()
                    .map(|&(pos, sigma, amp)| amp * (-0.5 * ((x - pos) / sigma).powi(2)).exp())
                    .sum()
            })
            .collect();
        RawHistogram {
            start: 0.0,
            bin_width,
            counts,
        }
    }

    fn scenario_a_input() -> AnalysisInput {
        let sigma = 0.5 / (2.0 * (2.0 * (100.0f64).ln()).sqrt());
        let amp = 1000.0 / (sigma / 0.05 * (2.0 * std::f64::consts::PI).sqrt());
        AnalysisInput {
            histogram: raw_spectrum(&[(10.0, sigma, amp)], 30.0, 0.05),
            seed_ranges: vec![MassRange::seed(
                "Si",
                IonFormula::parse("Si").unwrap(),
                9.6,
                10.4,
            )],
            params: RangingParams::default(),
        }
    }

    #[test]
    fn test_empty_histogram_fails_validation() {
        let mut input = scenario_a_input();
        input.histogram.counts.clear();
        let err = run_pass(&input).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Validation(ValidationError::EmptyHistogram)
        ));
    }

    #[test]
    fn test_empty_seed_set_fails_validation() {
        let mut input = scenario_a_input();
        input.seed_ranges.clear();
        let err = run_pass(&input).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Validation(ValidationError::EmptyRangeSet)
        ));
    }

    #[test]
    fn test_scenario_a_full_pass() {
        let input = scenario_a_input();
        let out = run_pass(&input).unwrap();

        assert_eq!(out.ranges.len(), 1);
        let r = &out.ranges[0];
        assert!((r.net - 1000.0).abs() < 50.0, "net = {}", r.net);

        assert_eq!(out.ionic.entries.len(), 1);
        let e = &out.ionic.entries[0];
        assert!(e.is_detected());
        assert!((e.composition - 1.0).abs() < 1e-9, "one species is 100%");

        // The seed set is untouched (snapshot semantics).
        assert_eq!(input.seed_ranges[0].scheme, SchemeState::Unset);
        assert_eq!(input.seed_ranges[0].net, 0.0);
    }

    #[test]
    fn test_failed_pass_leaves_input_untouched() {
        let mut input = scenario_a_input();
        // Two different names over the same window: unresolvable overlap.
        input.seed_ranges = vec![
            MassRange::seed("A", IonFormula::empty(), 9.6, 10.4),
            MassRange::seed("B", IonFormula::empty(), 9.7, 10.5),
        ];
        let before = input.seed_ranges.clone();
        let err = run_pass(&input).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::Validation(ValidationError::UnresolvedOverlap { .. })
        ));
        assert_eq!(input.seed_ranges.len(), before.len());
        assert_eq!(input.seed_ranges[0].min, before[0].min);
    }

    #[test]
    fn test_round_trip_reproduces_schemes() {
        let sigma = 0.02;
        let input = AnalysisInput {
            histogram: raw_spectrum(
                &[(8.0, sigma, 800.0), (12.0, sigma, 600.0)],
                40.0,
                0.05,
            ),
            seed_ranges: vec![
                MassRange::seed("A", IonFormula::empty(), 7.8, 8.2),
                MassRange::seed("B", IonFormula::empty(), 11.8, 12.2),
            ],
            params: RangingParams::default(),
        };
        let first = run_pass(&input).unwrap();

        // Re-seed from the first pass output, as an export/reimport would.
        let reseeded: Vec<MassRange> = first
            .ranges
            .iter()
            .map(|r| {
                let mut s = MassRange::seed(&r.name, r.formula.clone(), r.min, r.max);
                s.scheme = r.scheme;
                s
            })
            .collect();
        let second = run_pass(&AnalysisInput {
            histogram: input.histogram.clone(),
            seed_ranges: reseeded,
            params: input.params.clone(),
        })
        .unwrap();

        assert_eq!(first.ranges.len(), second.ranges.len());
        for (a, b) in first.ranges.iter().zip(second.ranges.iter()) {
            assert_eq!(
                a.scheme.scheme(),
                b.scheme.scheme(),
                "scheme changed for {} between passes",
                a.name
            );
        }
    }

    #[test]
    fn test_discovered_peak_shows_up_as_placeholder() {
        let sigma = 0.02;
        let input = AnalysisInput {
            histogram: raw_spectrum(
                &[(8.0, sigma, 800.0), (16.0, sigma, 700.0)],
                40.0,
                0.05,
            ),
            seed_ranges: vec![MassRange::seed("A", IonFormula::empty(), 7.8, 8.2)],
            params: RangingParams::default(),
        };
        let out = run_pass(&input).unwrap();
        assert!(
            out.ranges.iter().any(|r| r.is_discovered()),
            "the unseeded 16 Da peak must appear as a Discovered range: {:?}",
            out.ranges.iter().map(|r| &r.name).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_update_refreshes_positions() {
        let input = scenario_a_input();
        let out = update_positions(&input).unwrap();
        assert_eq!(out.ranges.len(), 1);
        assert!((out.ranges[0].pos - 10.0).abs() < 0.1);
        assert_eq!(out.max_peak_range.as_deref(), Some("Si"));
        // Update never assigns schemes.
        assert_eq!(out.ranges[0].scheme, SchemeState::Unset);
    }
}
