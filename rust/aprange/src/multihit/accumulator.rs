//! Multi-hit correlation accumulation.
//!
//! A "multi" is the set of ion events sharing one absolute pulse number.
//! Consecutive single-ion pulses close enough in pulse count form a
//! "pseudo-multi", modeling detector dead-time artifacts. Every pair within
//! a multi (dp = 0) or pseudo-multi (dp > 0) is classified by spatial
//! separation against a critical threshold and accumulated into pair-count
//! tables and separation-distance histograms.
//!
//! The streaming state (current pulse group, previous single) is an
//! explicit fold accumulator, so the single -> pseudo-pair and
//! multi-close transitions are plain methods on a plain struct.

use std::fmt::Write as _;

use tracing::info;

use crate::errors::ValidationError;
use crate::models::params::{
    RangingParams,
    SeparationPlotIons,
};
use crate::models::range::MassRange;
use crate::multihit::events::{
    check_required_fields,
    EventSource,
};

/// Multiplicity classes tracked (singles, doubles, ... ; the last class
/// absorbs everything larger).
pub const HREG_MAX: usize = 5;
/// Bins in each separation-distance histogram.
pub const N_DIST_BINS: usize = 1000;
/// Bins in the delta-pulse histogram (last bin is overflow).
pub const DP_BINS: usize = 1000;
/// Separation-distance bin width (nm or mm, depending on the coordinate
/// source).
pub const DIST_RES: f64 = 0.2;

/// Correlation-type axis of the separation histograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationKind {
    All,
    NotSameSame,
    SameSame,
}

impl CorrelationKind {
    fn index(self) -> usize {
        match self {
            CorrelationKind::All => 0,
            CorrelationKind::NotSameSame => 1,
            CorrelationKind::SameSame => 2,
        }
    }
}

/// Mass-bin to range-index lookup.
///
/// Indices `0..n` are the tracked (multi-use) ranges, `n` collects all
/// other defined ranges, `n + 1` is unranged, `n + 2` is the totals
/// row/column of the count tables.
#[derive(Debug, Clone)]
pub struct RangeLookup {
    bins: Vec<usize>,
    resolution: f64,
    n: usize,
}

impl RangeLookup {
    pub fn new(ranges: &[MassRange], tracked: &[usize], resolution: f64) -> Self {
        let n = tracked.len();
        let max_mass = ranges.iter().map(|r| r.max).fold(0.0f64, f64::max);
        let len = (max_mass / resolution) as usize + 1;
        let mut bins = vec![n + 1; len];
        let mut paint = |min: f64, max: f64, value: usize, bins: &mut Vec<usize>| {
            let first = (min / resolution) as usize;
            let last = ((max / resolution) as usize).min(len);
            for b in bins[first.min(len)..last].iter_mut() {
                *b = value;
            }
        };
        for r in ranges {
            paint(r.min, r.max, n, &mut bins);
        }
        for (j, &idx) in tracked.iter().enumerate() {
            paint(ranges[idx].min, ranges[idx].max, j, &mut bins);
        }
        Self {
            bins,
            resolution,
            n,
        }
    }

    pub fn range_of(&self, mass: f32) -> usize {
        if mass < 0.0 {
            return self.unranged();
        }
        let bin = (mass as f64 / self.resolution) as usize;
        if bin < self.bins.len() {
            self.bins[bin]
        } else {
            self.unranged()
        }
    }

    pub fn other(&self) -> usize {
        self.n
    }

    pub fn unranged(&self) -> usize {
        self.n + 1
    }
}

/// Pair counts indexed by (first range, second range, delta-pulse).
#[derive(Debug, Clone)]
pub struct PairTable {
    counts: Vec<u64>,
    dim: usize,
    dp_dim: usize,
}

impl PairTable {
    pub fn new(n: usize, dp_max: usize) -> Self {
        let dim = n + 3;
        let dp_dim = dp_max + 1;
        Self {
            counts: vec![0; dim * dim * dp_dim],
            dim,
            dp_dim,
        }
    }

    fn idx(&self, r1: usize, r2: usize, dp: usize) -> usize {
        (r1 * self.dim + r2) * self.dp_dim + dp
    }

    pub fn add(&mut self, r1: usize, r2: usize, dp: usize) {
        let i = self.idx(r1, r2, dp);
        self.counts[i] += 1;
    }

    pub fn get(&self, r1: usize, r2: usize, dp: usize) -> u64 {
        self.counts[self.idx(r1, r2, dp)]
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn dp_dim(&self) -> usize {
        self.dp_dim
    }

    /// Fill the totals row/column/corner from the body cells.
    pub fn finalize_totals(&mut self) {
        let total = self.dim - 1;
        for dp in 0..self.dp_dim {
            for i in 0..total {
                for j in 0..total {
                    let v = self.get(i, j, dp);
                    let idx_row = self.idx(i, total, dp);
                    self.counts[idx_row] += v;
                    let idx_col = self.idx(total, j, dp);
                    self.counts[idx_col] += v;
                }
                let row = self.get(i, total, dp);
                let idx_corner = self.idx(total, total, dp);
                self.counts[idx_corner] += row;
            }
        }
    }

    /// Pairs where both members are tracked ranges, by inclusion-exclusion
    /// over the totals (requires `finalize_totals`).
    pub fn considered_total(&self, dp: usize) -> u64 {
        let n = self.dim - 3;
        let total = self.dim - 1;
        let other = self.get(n, total, dp) + self.get(total, n, dp) - self.get(n, n, dp);
        let unranged =
            self.get(n + 1, total, dp) + self.get(total, n + 1, dp) - self.get(n + 1, n + 1, dp);
        let cross = self.get(n, n + 1, dp) + self.get(n + 1, n, dp);
        self.get(total, total, dp) - other - unranged + cross
    }

    /// Considered pairs whose two members share a range.
    pub fn same_same_total(&self, dp: usize) -> u64 {
        let n = self.dim - 3;
        (0..n).map(|i| self.get(i, i, dp)).sum()
    }

    pub fn not_same_same_total(&self, dp: usize) -> u64 {
        self.considered_total(dp) - self.same_same_total(dp)
    }
}

/// Separation-distance histograms indexed by
/// (range, delta-pulse, correlation kind, distance bin).
#[derive(Debug, Clone)]
pub struct SeparationHistograms {
    counts: Vec<u64>,
    dim: usize,
    dp_dim: usize,
}

impl SeparationHistograms {
    pub fn new(n: usize, dp_max: usize) -> Self {
        let dim = n + 3;
        let dp_dim = dp_max + 1;
        Self {
            counts: vec![0; dim * dp_dim * 3 * N_DIST_BINS],
            dim,
            dp_dim,
        }
    }

    fn idx(&self, range: usize, dp: usize, kind: usize, bin: usize) -> usize {
        ((range * self.dp_dim + dp) * 3 + kind) * N_DIST_BINS + bin
    }

    /// Record one pair. Each member's histogram gets the pair under `All`;
    /// mixed pairs also land in `NotSameSame` for both, same-range pairs
    /// land once in `SameSame` (no double count).
    pub fn record(&mut self, r1: usize, r2: usize, dp: usize, bin: usize, include: bool) {
        if !include {
            return;
        }
        let all = CorrelationKind::All.index();
        let i1 = self.idx(r1, dp, all, bin);
        self.counts[i1] += 1;
        let i2 = self.idx(r2, dp, all, bin);
        self.counts[i2] += 1;
        if r1 != r2 {
            let kind = CorrelationKind::NotSameSame.index();
            let i1 = self.idx(r1, dp, kind, bin);
            self.counts[i1] += 1;
            let i2 = self.idx(r2, dp, kind, bin);
            self.counts[i2] += 1;
        } else {
            let kind = CorrelationKind::SameSame.index();
            let i = self.idx(r1, dp, kind, bin);
            self.counts[i] += 1;
        }
    }

    pub fn get(&self, range: usize, dp: usize, kind: CorrelationKind, bin: usize) -> u64 {
        self.counts[self.idx(range, dp, kind.index(), bin)]
    }

    /// (distance, count) series up to the last populated bin.
    pub fn series(&self, range: usize, dp: usize, kind: CorrelationKind) -> Vec<(f64, u64)> {
        let start = self.idx(range, dp, kind.index(), 0);
        let slice = &self.counts[start..start + N_DIST_BINS];
        let last = slice.iter().rposition(|&c| c > 0).map_or(0, |i| i + 1);
        slice[..last]
            .iter()
            .enumerate()
            .map(|(i, &c)| (i as f64 * DIST_RES, c))
            .collect()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }
}

fn include_in_sep_plot(r1: usize, r2: usize, n: usize, selector: SeparationPlotIons) -> bool {
    match selector {
        SeparationPlotIons::All => true,
        SeparationPlotIons::Selected => r1 < n && r2 < n,
        SeparationPlotIons::SelectedAndOthers => r1 < n + 1 && r2 < n + 1,
    }
}

/// One ion event after the mass -> range lookup.
#[derive(Debug, Clone, Copy)]
pub struct Hit {
    pub range: usize,
    pub pulse: f64,
    pub coord: [f32; 3],
}

/// The streaming fold state and its accumulated tables.
#[derive(Debug)]
pub struct PairAccumulator {
    n: usize,
    dp_max: usize,
    crit_sep: f64,
    selector: SeparationPlotIons,

    group: Vec<Hit>,
    last_single: Option<Hit>,
    last_was_single: bool,

    pub pulse_first: Option<f64>,
    pub pulse_last: f64,
    pub event_pulses: u64,
    pub singles: Vec<u64>,
    pub tot_ion_counts: Vec<u64>,
    pub hreg: [[u64; 2]; HREG_MAX],
    pub dp_histogram: Vec<u64>,
    pub pairs: PairTable,
    pub cor: PairTable,
    pub unc: PairTable,
    pub separations: SeparationHistograms,
}

impl PairAccumulator {
    pub fn new(n: usize, dp_max: usize, crit_sep: f64, selector: SeparationPlotIons) -> Self {
        Self {
            n,
            dp_max,
            crit_sep,
            selector,
            group: Vec::new(),
            last_single: None,
            last_was_single: false,
            pulse_first: None,
            pulse_last: 0.0,
            event_pulses: 0,
            singles: vec![0; n + 3],
            tot_ion_counts: vec![0; n + 3],
            hreg: [[0; 2]; HREG_MAX],
            dp_histogram: vec![0; DP_BINS],
            pairs: PairTable::new(n, dp_max),
            cor: PairTable::new(n, dp_max),
            unc: PairTable::new(n, dp_max),
            separations: SeparationHistograms::new(n, dp_max),
        }
    }

    fn separation(&self, a: &Hit, b: &Hit) -> (usize, bool) {
        let dx = (b.coord[0] - a.coord[0]) as f64;
        let dy = (b.coord[1] - a.coord[1]) as f64;
        let dz = (b.coord[2] - a.coord[2]) as f64;
        let sep = (dx * dx + dy * dy + dz * dz).sqrt();
        let bin = ((sep / DIST_RES) as usize).min(N_DIST_BINS - 1);
        (bin, sep <= self.crit_sep)
    }

    pub fn push(&mut self, hit: Hit) {
        self.tot_ion_counts[hit.range] += 1;
        let last_pulse = self.group.last().map(|h| h.pulse);
        match last_pulse {
            None => {
                // Very first record of the stream.
                self.pulse_first = Some(hit.pulse);
                self.event_pulses += 1;
                self.group.push(hit);
            }
            Some(pulse) if pulse == hit.pulse => {
                // At least the second ion of a multi: pair with every
                // member already in the group.
                for i in 0..self.group.len() {
                    let member = self.group[i];
                    self.pairs.add(member.range, hit.range, 0);
                    let (bin, cor) = self.separation(&member, &hit);
                    if cor {
                        self.cor.add(member.range, hit.range, 0);
                    } else {
                        self.unc.add(member.range, hit.range, 0);
                    }
                    let include =
                        include_in_sep_plot(member.range, hit.range, self.n, self.selector);
                    self.separations.record(member.range, hit.range, 0, bin, include);
                }
                self.group.push(hit);
            }
            Some(_) => {
                self.close_group();
                self.event_pulses += 1;
                self.group.push(hit);
            }
        }
    }

    fn close_group(&mut self) {
        let Some(&last) = self.group.last() else {
            return;
        };
        self.pulse_last = last.pulse;

        if self.group.len() == 1 {
            if self.last_was_single {
                if let Some(prev) = self.last_single {
                    let dpf = last.pulse - prev.pulse;
                    let dp = if dpf < 0.0 { 0 } else { dpf as usize };
                    if dp < DP_BINS {
                        self.dp_histogram[dp] += 1;
                    } else {
                        self.dp_histogram[DP_BINS - 1] += 1;
                    }
                    if dp <= self.dp_max {
                        // A pseudo-multi pair; store with the smaller range
                        // index first.
                        let (lo, hi) = if prev.range < last.range {
                            (prev.range, last.range)
                        } else {
                            (last.range, prev.range)
                        };
                        self.pairs.add(lo, hi, dp);
                        let (bin, cor) = self.separation(&prev, &last);
                        if cor {
                            self.cor.add(lo, hi, dp);
                        } else {
                            self.unc.add(lo, hi, dp);
                        }
                        let include =
                            include_in_sep_plot(prev.range, last.range, self.n, self.selector);
                        self.separations.record(prev.range, last.range, dp, bin, include);
                    }
                }
            }
            self.last_was_single = true;
            self.last_single = Some(last);
            self.singles[last.range] += 1;
            self.hreg[0][1] += 1;
            if last.range < self.n {
                self.hreg[0][0] += 1;
            }
        } else {
            self.dp_histogram[0] += self.group.len() as u64;
            self.last_was_single = false;
            let class = self.group.len().min(HREG_MAX);
            self.hreg[class - 1][1] += 1;
            let ranged = self.group.iter().filter(|h| h.range < self.n).count();
            if ranged > 0 {
                self.hreg[ranged.min(HREG_MAX) - 1][0] += 1;
            }
        }
        self.group.clear();
    }

    /// Close the trailing pulse group and fill the table totals.
    pub fn finish(&mut self) {
        self.close_group();
        self.pairs.finalize_totals();
        self.cor.finalize_totals();
        self.unc.finalize_totals();
        let total = self.n + 2;
        for r in 0..total {
            self.singles[total] += self.singles[r];
            self.tot_ion_counts[total] += self.tot_ion_counts[r];
        }
    }
}

/// ToF/voltage statistics for the key range plus the overall detection
/// rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyRangeStats {
    pub count: u64,
    pub ave_tof: f64,
    pub stdev_tof: f64,
    pub ave_volt: f64,
    pub stdev_volt: f64,
    /// Ions per pulse over the observed pulse span.
    pub detection_rate: f64,
}

/// The finished multi-hit correlation model for one event-stream pass.
/// Read-only after `analyze`.
#[derive(Debug)]
pub struct MultiHitModel {
    pub n: usize,
    pub n_total: usize,
    /// Labels for the `n + 3` table axes (tracked ranges, then Other,
    /// Unranged, Total).
    pub labels: Vec<String>,
    pub range_mins: Vec<f64>,
    pub range_maxs: Vec<f64>,
    pub key_range: usize,
    pub crit_sep: f64,
    pub dp_max: usize,

    pub event_pulses: u64,
    pub singles: Vec<u64>,
    pub tot_ion_counts: Vec<u64>,
    pub hreg: [[u64; 2]; HREG_MAX],
    pub dp_histogram: Vec<u64>,
    pub pairs: PairTable,
    pub cor: PairTable,
    pub unc: PairTable,
    pub separations: SeparationHistograms,
    pub key_stats: KeyRangeStats,
}

/// Stream the event source once and accumulate all correlation tables.
///
/// Record order defines pulse adjacency; this is an inherently ordered
/// single pass and must not be re-partitioned by record.
pub fn analyze(
    source: &mut dyn EventSource,
    ranges: &[MassRange],
    params: &RangingParams,
    resolution: f64,
) -> Result<MultiHitModel, ValidationError> {
    check_required_fields(source)?;

    let tracked: Vec<usize> = ranges
        .iter()
        .enumerate()
        .filter(|(_, r)| r.multi_use)
        .map(|(i, _)| i)
        .collect();
    let n = tracked.len();

    let mut labels: Vec<String> = tracked
        .iter()
        .map(|&i| format!("{:.1}-{}", ranges[i].pos, ranges[i].name))
        .collect();
    labels.push("Other".to_string());
    labels.push("Unranged".to_string());
    labels.push("Total".to_string());
    let range_mins: Vec<f64> = tracked.iter().map(|&i| ranges[i].min).collect();
    let range_maxs: Vec<f64> = tracked.iter().map(|&i| ranges[i].max).collect();

    let key_range = params
        .key_range
        .as_ref()
        .and_then(|want| {
            tracked
                .iter()
                .position(|&i| &ranges[i].name == want)
                .or_else(|| labels.iter().position(|l| l == want))
        })
        .unwrap_or(0);

    let lookup = RangeLookup::new(ranges, &tracked, resolution);
    let mut acc = PairAccumulator::new(
        n,
        params.pseudo_multi_max_dp,
        params.separation_criteria,
        params.separation_plot_ions,
    );

    let mut tot_tof = 0.0f64;
    let mut tot_tof_sq = 0.0f64;
    let mut tot_volt = 0.0f64;
    let mut tot_volt_sq = 0.0f64;
    let mut key_count = 0u64;

    let mut chunk_index = 0usize;
    while let Some(chunk) = source.next_chunk() {
        if !chunk.is_consistent() {
            return Err(ValidationError::InconsistentEventChunk { chunk: chunk_index });
        }
        for i in 0..chunk.len() {
            let coord = if params.use_detector_separations {
                [chunk.detector[i][0], chunk.detector[i][1], 0.0]
            } else {
                chunk.position[i]
            };
            let hit = Hit {
                range: lookup.range_of(chunk.mass[i]),
                pulse: chunk.real_pulse(i),
                coord,
            };
            if n > 0 && hit.range == key_range {
                tot_tof += chunk.tof[i] as f64;
                tot_tof_sq += (chunk.tof[i] as f64).powi(2);
                tot_volt += chunk.voltage[i] as f64;
                tot_volt_sq += (chunk.voltage[i] as f64).powi(2);
                key_count += 1;
            }
            acc.push(hit);
        }
        chunk_index += 1;
    }
    acc.finish();

    let key_stats = {
        let mut s = KeyRangeStats {
            count: key_count,
            ..Default::default()
        };
        if key_count > 0 {
            let k = key_count as f64;
            s.ave_tof = tot_tof / k;
            s.stdev_tof = (tot_tof_sq / k - s.ave_tof * s.ave_tof).max(0.0).sqrt();
            s.ave_volt = tot_volt / k;
            s.stdev_volt = (tot_volt_sq / k - s.ave_volt * s.ave_volt).max(0.0).sqrt();
        }
        let span = acc.pulse_last - acc.pulse_first.unwrap_or(acc.pulse_last);
        if span > 0.0 {
            s.detection_rate = acc.tot_ion_counts[n + 2] as f64 / span;
        }
        s
    };

    info!(
        pulses = acc.event_pulses,
        ions = acc.tot_ion_counts[n + 2],
        multis = acc.dp_histogram[0],
        "multi-hit pass finished"
    );

    Ok(MultiHitModel {
        n,
        n_total: ranges.len(),
        labels,
        range_mins,
        range_maxs,
        key_range,
        crit_sep: params.separation_criteria,
        dp_max: params.pseudo_multi_max_dp,
        event_pulses: acc.event_pulses,
        singles: acc.singles,
        tot_ion_counts: acc.tot_ion_counts,
        hreg: acc.hreg,
        dp_histogram: acc.dp_histogram,
        pairs: acc.pairs,
        cor: acc.cor,
        unc: acc.unc,
        separations: acc.separations,
        key_stats,
    })
}

impl MultiHitModel {
    fn dim(&self) -> usize {
        self.n + 3
    }

    /// Render one dp-slice of a pair table with axis labels.
    fn table_text(&self, table: &PairTable, dp: usize, title: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", title);
        let _ = write!(out, "{:>13}", "");
        for j in 0..self.dim() {
            let _ = write!(out, "{:>13}", self.labels[j]);
        }
        let _ = writeln!(out);
        for i in 0..self.dim() {
            let _ = write!(out, "{:>13}", self.labels[i]);
            for j in 0..self.dim() {
                let _ = write!(out, "{:>13}", table.get(i, j, dp));
            }
            let _ = writeln!(out);
        }
        out
    }

    fn pseudo_sum(&self, table: &PairTable, considered: bool) -> u64 {
        let total = self.dim() - 1;
        (1..=self.dp_max)
            .map(|dp| {
                if considered {
                    table.considered_total(dp)
                } else {
                    table.get(total, total, dp)
                }
            })
            .sum()
    }

    /// Dead-time ratio: same-same over not-same-same at dp = 0, normalized
    /// by the same ratio at dp = 1 (pseudo-multis are unaffected by
    /// dead time).
    fn deadtime_ratio(&self, table: &PairTable) -> f64 {
        let ss0 = table.same_same_total(0) as f64;
        let ssp0 = table.not_same_same_total(0) as f64;
        let ss1 = table.same_same_total(1) as f64;
        let ssp1 = table.not_same_same_total(1) as f64;
        if ssp0 > 0.0 && ss1 > 0.0 && ssp1 > 0.0 {
            ss0 / ssp0 * ssp1 / ss1
        } else {
            f64::NAN
        }
    }

    /// Free-text report of the whole model, suitable for export.
    pub fn summary_text(&self) -> String {
        let mut out = String::new();
        let total = self.dim() - 1;

        out.push_str("Statistics are tracked for various groups of ions:\n");
        out.push_str("  Considered:   ranges included in the summary tables.\n");
        out.push_str("  Key Range:    range tracked for ToF and voltage averages.\n");
        out.push_str("  Other:        all other defined ranges.\n");
        out.push_str("  Unranged:     ions between defined ranges.\n");
        out.push_str("  Correlated:   pairs with separation at or below the critical value.\n");
        out.push_str("  Uncorrelated: pairs with separation above the critical value.\n");
        out.push_str("  Pseudo-multi: consecutive single-ion pulses within the dp ceiling.\n\n");

        let _ = writeln!(out, "Total Defined Ranges:      {:>5}", self.n_total);
        if self.n > 0 {
            let _ = writeln!(
                out,
                "Key Range:                 {}: {:.3} - {:.3}",
                self.labels[self.key_range],
                self.range_mins[self.key_range],
                self.range_maxs[self.key_range]
            );
        }
        let _ = writeln!(out, "Considered Ranges:         {:>5}", self.n);
        for i in 0..self.n {
            let _ = writeln!(
                out,
                "    {} {:>7}: {:>8.3} - {:>8.3}",
                i, self.labels[i], self.range_mins[i], self.range_maxs[i]
            );
        }
        let _ = writeln!(out, "Separation Critical Value: {:.1}", self.crit_sep);
        let _ = writeln!(out, "Pseudo-Multi Max dp:       {}", self.dp_max);
        let _ = writeln!(out);

        let _ = writeln!(out, "Total Event Pulses:    {:>15}", self.event_pulses);
        let _ = writeln!(out, "Total Ions:            {:>15}", self.tot_ion_counts[total]);
        let _ = writeln!(out, "Total Multi Ions:      {:>15}", self.dp_histogram[0]);
        let _ = writeln!(
            out,
            "Total Multis Table:    {:>15}",
            self.pairs.get(total, total, 0)
        );

        const HREG_NAMES: [&str; HREG_MAX] = ["singles", "doubles", "triples", "quads", "quints"];
        out.push_str("\nMultiplicity Distribution:");
        for name in HREG_NAMES {
            let _ = write!(out, "{:>13}", name);
        }
        let _ = writeln!(out, "{:>13}", "total");
        out.push_str("      All Events:        ");
        for i in 0..HREG_MAX {
            let _ = write!(out, "{:>13}", self.hreg[i][1]);
        }
        let _ = writeln!(out, "{:>13}", self.event_pulses);
        out.push_str("      Considered Events: ");
        for i in 0..HREG_MAX {
            let _ = write!(out, "{:>13}", self.hreg[i][0]);
        }
        let _ = writeln!(out);

        let _ = writeln!(out, "\nMultis dp=0:");
        let _ = writeln!(out, "  All:                     {:>13}", self.pairs.get(total, total, 0));
        let _ = writeln!(out, "  Considered:              {:>13}", self.pairs.considered_total(0));
        let _ = writeln!(out, "  Considered & Correlated: {:>13}", self.cor.considered_total(0));
        let _ = writeln!(out, "  Considered & Uncorr:     {:>13}", self.unc.considered_total(0));

        let _ = writeln!(out, "\nPseudo-Doubles dp=1...{}:", self.dp_max);
        let _ = writeln!(out, "  All:                     {:>13}", self.pseudo_sum(&self.pairs, false));
        let _ = writeln!(out, "  Considered:              {:>13}", self.pseudo_sum(&self.pairs, true));
        let _ = writeln!(out, "  Considered & Correlated: {:>13}", self.pseudo_sum(&self.cor, true));
        let _ = writeln!(out, "  Considered & Uncorr:     {:>13}", self.pseudo_sum(&self.unc, true));

        let _ = writeln!(out, "\nDR:      {:.3}% ions/pulse", self.key_stats.detection_rate * 100.0);
        let _ = writeln!(
            out,
            "ToF:     {:.0} \u{00B1} {:.0} ns",
            self.key_stats.ave_tof, self.key_stats.stdev_tof
        );
        let _ = writeln!(
            out,
            "Voltage: {:.0} \u{00B1} {:.0} V",
            self.key_stats.ave_volt, self.key_stats.stdev_volt
        );

        out.push_str("\nS=Same, S'=Not Same; 0: same pulse, 1: adjacent pulses\n");
        for (name, table) in [("Corr", &self.cor), ("Uncorr", &self.unc)] {
            let _ = writeln!(out, "{} SS0:  {:>13}", name, table.same_same_total(0));
            let _ = writeln!(out, "{} SS'0: {:>13}", name, table.not_same_same_total(0));
            let _ = writeln!(out, "{} SS1:  {:>13}", name, table.same_same_total(1));
            let _ = writeln!(out, "{} SS'1: {:>13}", name, table.not_same_same_total(1));
            let ratio = self.deadtime_ratio(table);
            let _ = writeln!(out, "{}: SS0/SS'0 / SS1/SS'1 = {:.2}%", name, ratio * 100.0);
        }
        out.push('\n');

        out.push_str(&self.table_text(
            &self.cor,
            0,
            "Correlated Multis Table [first ion, second ion, dp=0]:",
        ));
        out.push('\n');
        out.push_str(&self.table_text(
            &self.unc,
            0,
            "Uncorrelated Multis Table [first ion, second ion, dp=0]:",
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::range::{
        IonFormula,
        MassRange,
    };
    use crate::multihit::events::{
        chunk_from_records,
        VecEventSource,
    };

    fn tracked_range(name: &str, min: f64, max: f64) -> MassRange {
        let mut r = MassRange::seed(name, IonFormula::empty(), min, max);
        r.pos = (min + max) / 2.0;
        r.multi_use = true;
        r
    }

    fn two_range_setup() -> Vec<MassRange> {
        vec![
            tracked_range("Al", 26.8, 27.2),
            tracked_range("Si", 27.8, 28.2),
        ]
    }

    fn analyze_records(
        records: &[(u32, f32, [f32; 3])],
        ranges: &[MassRange],
        params: &RangingParams,
    ) -> MultiHitModel {
        let mut src = VecEventSource::new(vec![chunk_from_records(records)]);
        analyze(&mut src, ranges, params, 0.05).unwrap()
    }

    #[test]
    fn test_missing_field_aborts() {
        let mut src = VecEventSource::with_missing(vec![], vec!["Position"]);
        let err = analyze(
            &mut src,
            &two_range_setup(),
            &RangingParams::default(),
            0.05,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::MissingEventField { .. }));
    }

    #[test]
    fn test_range_lookup_classes() {
        let mut ranges = two_range_setup();
        ranges.push(MassRange::seed("NotTracked", IonFormula::empty(), 54.0, 56.0));
        let lookup = RangeLookup::new(&ranges, &[0, 1], 0.05);
        assert_eq!(lookup.range_of(27.0), 0);
        assert_eq!(lookup.range_of(28.0), 1);
        assert_eq!(lookup.range_of(55.0), lookup.other());
        assert_eq!(lookup.range_of(40.0), lookup.unranged());
        assert_eq!(lookup.range_of(500.0), lookup.unranged());
        assert_eq!(lookup.range_of(-1.0), lookup.unranged());
    }

    #[test]
    fn test_scenario_d_three_ion_pulse() {
        // Three ions in one pulse: two Al within the critical separation,
        // one Si far away. Same-pulse pairs land in dp=0 only.
        let ranges = two_range_setup();
        let records = [
            (100u32, 27.0f32, [0.0, 0.0, 0.0]),
            (100, 27.0, [1.0, 0.0, 0.0]),
            (100, 28.0, [100.0, 0.0, 0.0]),
        ];
        let m = analyze_records(&records, &ranges, &RangingParams::default());

        assert_eq!(m.cor.get(0, 0, 0), 1, "one correlated same-same pair");
        assert_eq!(m.unc.get(0, 1, 0), 2, "both cross pairs are uncorrelated");
        assert_eq!(m.pairs.get(0, 0, 0) + m.pairs.get(0, 1, 0), 3);
        // Nothing at dp > 0.
        for dp in 1..=m.dp_max {
            let total = m.n + 2;
            assert_eq!(m.pairs.get(total, total, dp), 0, "dp={} must be empty", dp);
        }
        assert_eq!(m.dp_histogram[0], 3);
        assert_eq!(m.hreg[2][1], 1, "one triple");
    }

    #[test]
    fn test_scenario_e_pseudo_multi_dp3() {
        let ranges = two_range_setup();
        let records = [
            (10u32, 27.0f32, [0.0, 0.0, 0.0]),
            (13, 28.0, [1.0, 0.0, 0.0]),
        ];
        let m = analyze_records(&records, &ranges, &RangingParams::default());
        assert_eq!(m.pairs.get(0, 1, 3), 1, "pseudo-multi recorded at dp=3");
        assert_eq!(m.cor.get(0, 1, 3), 1, "1 unit apart is correlated");
        assert_eq!(m.dp_histogram[3], 1);

        let strict = RangingParams {
            pseudo_multi_max_dp: 2,
            ..Default::default()
        };
        let m = analyze_records(&records, &ranges, &strict);
        let total = m.n + 2;
        for dp in 0..=m.dp_max {
            assert_eq!(
                m.pairs.get(total, total, dp),
                0,
                "dp ceiling of 2 must drop the dp=3 pair"
            );
        }
        // The dp histogram still sees the spacing.
        assert_eq!(m.dp_histogram[3], 1);
    }

    #[test]
    fn test_pseudo_pair_orders_by_range_index() {
        let ranges = two_range_setup();
        // Si first, then Al: the table entry must still be (Al, Si).
        let records = [
            (10u32, 28.0f32, [0.0, 0.0, 0.0]),
            (12, 27.0, [1.0, 0.0, 0.0]),
        ];
        let m = analyze_records(&records, &ranges, &RangingParams::default());
        assert_eq!(m.pairs.get(0, 1, 2), 1);
        assert_eq!(m.pairs.get(1, 0, 2), 0);
    }

    #[test]
    fn test_totals_and_considered() {
        let ranges = two_range_setup();
        let records = [
            (100u32, 27.0f32, [0.0, 0.0, 0.0]),
            (100, 27.0, [1.0, 0.0, 0.0]),
            (100, 28.0, [100.0, 0.0, 0.0]),
            (200, 40.0, [0.0, 0.0, 0.0]),
            (200, 27.0, [0.5, 0.0, 0.0]),
        ];
        let m = analyze_records(&records, &ranges, &RangingParams::default());
        let total = m.n + 2;
        // 3 pairs from the triple + 1 pair from the double.
        assert_eq!(m.pairs.get(total, total, 0), 4);
        // The unranged double is excluded from the considered count.
        assert_eq!(m.pairs.considered_total(0), 3);
        assert_eq!(m.pairs.same_same_total(0), 1);
        assert_eq!(m.pairs.not_same_same_total(0), 2);
        assert_eq!(m.tot_ion_counts[total], 5);
        assert_eq!(m.event_pulses, 2);
    }

    #[test]
    fn test_singles_and_multiplicity_classes() {
        let ranges = two_range_setup();
        let records = [
            (10u32, 27.0f32, [0.0; 3]),
            (20, 28.0, [0.0; 3]),
            (30, 27.0, [0.0; 3]),
            (40, 27.0, [0.0; 3]),
            (40, 27.0, [1.0, 0.0, 0.0]),
        ];
        let m = analyze_records(&records, &ranges, &RangingParams::default());
        assert_eq!(m.singles[0], 2, "two Al singles");
        assert_eq!(m.singles[1], 1, "one Si single");
        assert_eq!(m.hreg[0][1], 3);
        assert_eq!(m.hreg[1][1], 1, "one double");
    }

    #[test]
    fn test_trailing_single_closes_cleanly() {
        // A stream that is a lone single: the guarded fold must not need a
        // previous single to exist.
        let ranges = two_range_setup();
        let records = [(10u32, 27.0f32, [0.0; 3])];
        let m = analyze_records(&records, &ranges, &RangingParams::default());
        assert_eq!(m.singles[0], 1);
        assert_eq!(m.event_pulses, 1);
        let total = m.n + 2;
        assert_eq!(m.pairs.get(total, total, 0), 0);
    }

    #[test]
    fn test_separation_overflow_clamps_to_last_bin() {
        let ranges = two_range_setup();
        let records = [
            (10u32, 27.0f32, [0.0, 0.0, 0.0]),
            (10, 27.0, [1e6, 0.0, 0.0]),
        ];
        let m = analyze_records(&records, &ranges, &RangingParams::default());
        assert_eq!(
            m.separations
                .get(0, 0, CorrelationKind::SameSame, N_DIST_BINS - 1),
            1
        );
    }

    #[test]
    fn test_separation_selector_filters_untracked() {
        let ranges = two_range_setup();
        let records = [
            (10u32, 40.0f32, [0.0, 0.0, 0.0]),
            (10, 40.0, [1.0, 0.0, 0.0]),
        ];
        let selected = analyze_records(&records, &ranges, &RangingParams::default());
        let unranged = selected.n + 1;
        assert_eq!(
            selected
                .separations
                .series(unranged, 0, CorrelationKind::All)
                .len(),
            0,
            "Selected mode must not plot unranged pairs"
        );

        let all = RangingParams {
            separation_plot_ions: SeparationPlotIons::All,
            ..Default::default()
        };
        let m = analyze_records(&records, &ranges, &all);
        assert!(
            !m.separations
                .series(unranged, 0, CorrelationKind::All)
                .is_empty()
        );
    }

    #[test]
    fn test_detector_coordinates_toggle() {
        let ranges = two_range_setup();
        let mut chunk = chunk_from_records(&[
            (10u32, 27.0f32, [0.0, 0.0, 0.0]),
            (10, 27.0, [0.0, 0.0, 50.0]),
        ]);
        // Detector coordinates see the pair at distance 0; reconstructed
        // positions see 50.
        chunk.detector = vec![[0.0, 0.0], [0.0, 0.0]];
        let params = RangingParams {
            use_detector_separations: true,
            ..Default::default()
        };
        let mut src = VecEventSource::new(vec![chunk.clone()]);
        let m = analyze(&mut src, &ranges, &params, 0.05).unwrap();
        assert_eq!(m.cor.get(0, 0, 0), 1);

        let mut src = VecEventSource::new(vec![chunk]);
        let m = analyze(&mut src, &ranges, &RangingParams::default(), 0.05).unwrap();
        assert_eq!(m.unc.get(0, 0, 0), 1, "50 units apart is uncorrelated");
    }

    #[test]
    fn test_key_range_stats() {
        let ranges = two_range_setup();
        let mut chunk = chunk_from_records(&[
            (10u32, 27.0f32, [0.0; 3]),
            (20, 27.0, [0.0; 3]),
            (30, 28.0, [0.0; 3]),
        ]);
        chunk.tof = vec![100.0, 300.0, 900.0];
        chunk.voltage = vec![1000.0, 1000.0, 5000.0];
        let params = RangingParams {
            key_range: Some("Al".to_string()),
            ..Default::default()
        };
        let mut src = VecEventSource::new(vec![chunk]);
        let m = analyze(&mut src, &ranges, &params, 0.05).unwrap();
        assert_eq!(m.key_stats.count, 2);
        assert!((m.key_stats.ave_tof - 200.0).abs() < 1e-9);
        assert!((m.key_stats.stdev_tof - 100.0).abs() < 1e-9);
        assert!((m.key_stats.ave_volt - 1000.0).abs() < 1e-9);
        // 3 ions over a span of 20 pulses.
        assert!((m.key_stats.detection_rate - 0.15).abs() < 1e-9);
    }

    #[test]
    fn test_chunk_boundary_does_not_split_a_multi() {
        // The same pulse continues across a chunk boundary.
        let ranges = two_range_setup();
        let a = chunk_from_records(&[(10u32, 27.0f32, [0.0; 3])]);
        let b = chunk_from_records(&[(10u32, 27.0f32, [1.0, 0.0, 0.0])]);
        let mut src = VecEventSource::new(vec![a, b]);
        let m = analyze(&mut src, &ranges, &RangingParams::default(), 0.05).unwrap();
        assert_eq!(m.pairs.get(0, 0, 0), 1, "cross-chunk multi must pair");
        assert_eq!(m.event_pulses, 1);
    }

    #[test]
    fn test_summary_text_mentions_core_numbers() {
        let ranges = two_range_setup();
        let records = [
            (100u32, 27.0f32, [0.0, 0.0, 0.0]),
            (100, 27.0, [1.0, 0.0, 0.0]),
            (105, 28.0, [0.0; 3]),
        ];
        let m = analyze_records(&records, &ranges, &RangingParams::default());
        let text = m.summary_text();
        assert!(text.contains("Total Event Pulses"));
        assert!(text.contains("Correlated Multis Table"));
        assert!(text.contains("Pseudo-Multi Max dp"));
    }
}
