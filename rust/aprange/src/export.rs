//! Tabular export of a finished analysis pass.
//!
//! The exporter owns an explicit serialization schema: every sheet is an
//! ordered list of (label, accessor) pairs, so internal field names never
//! leak into the external tabular format. The sheets themselves are
//! format-agnostic; the host decides how to render them (the bundled CLI
//! writes CSV).

use std::fmt::Display;

use serde::Serialize;

use crate::composition::CompositionTable;
use crate::models::histogram::{
    CoarseHistogram,
    SpectrumSummary,
};
use crate::models::params::RangingParams;
use crate::models::range::MassRange;
use crate::multihit::accumulator::{
    CorrelationKind,
    MultiHitModel,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExportCell {
    Text(String),
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl Display for ExportCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportCell::Text(s) => write!(f, "{}", s),
            ExportCell::Float(v) => write!(f, "{}", v),
            ExportCell::Int(v) => write!(f, "{}", v),
            ExportCell::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for ExportCell {
    fn from(s: &str) -> Self {
        ExportCell::Text(s.to_string())
    }
}

impl From<String> for ExportCell {
    fn from(s: String) -> Self {
        ExportCell::Text(s)
    }
}

impl From<f64> for ExportCell {
    fn from(v: f64) -> Self {
        ExportCell::Float(v)
    }
}

impl From<i64> for ExportCell {
    fn from(v: i64) -> Self {
        ExportCell::Int(v)
    }
}

impl From<bool> for ExportCell {
    fn from(v: bool) -> Self {
        ExportCell::Bool(v)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSheet {
    pub name: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<ExportCell>>,
}

impl ExportSheet {
    fn new(name: &str, header: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            header: header.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    fn push_row(&mut self, row: Vec<ExportCell>) {
        self.rows.push(row);
    }
}

fn parameters_sheet(params: &RangingParams, summary: &SpectrumSummary) -> ExportSheet {
    let mut sheet = ExportSheet::new("Parameters", &["Parameter", "Value"]);
    let entries: Vec<(&str, ExportCell)> = vec![
        ("MaxPeakPosition(Da)", summary.max_peak_pos.into()),
        ("MaxPeakFW1%M(Da)", summary.max_peak_fw1pm.into()),
        ("MaxPeakMRP", summary.max_peak_mrp.into()),
        ("SpectrumCoarsenFactor", (summary.coarsen_factor as i64).into()),
        ("RangingWidthFactor", params.ranging_width_factor.into()),
        ("MinWidthFactor", params.min_width_factor.into()),
        ("LeftRangeCriteria(Da)", params.left_range_criteria.into()),
        ("LeftRangeDelta(Da)", params.left_range_delta.into()),
        ("UseFixedRangingWidth", params.use_fixed_ranging_width.into()),
        ("ConsideredTailRange(Da)", params.considered_tail_range.into()),
        ("TailEstimateUncertainty", params.tail_estimate_uncertainty.into()),
        ("TailRangeMaximum(Da)", params.tail_range_maximum.into()),
        ("Sensitivity", params.sensitivity.into()),
        ("MinBinPairs", (params.min_bin_pairs as i64).into()),
        ("MinPeakMaxCounts", params.min_peak_max_counts.into()),
        ("SeparationCriteria", params.separation_criteria.into()),
        ("PseudoMultiMaxdp", (params.pseudo_multi_max_dp as i64).into()),
        ("UseDetectorSeparations", params.use_detector_separations.into()),
        (
            "KeyRange",
            params.key_range.clone().unwrap_or_default().into(),
        ),
    ];
    for (label, value) in entries {
        sheet.push_row(vec![label.into(), value]);
    }
    sheet
}

fn ranges_sheet(ranges: &[MassRange]) -> ExportSheet {
    let mut sheet = ExportSheet::new(
        "RangesTable",
        &[
            "Multi", "Color", "Ion", "Formula", "Peak(Da)", "Min(Da)", "Max(Da)", "Counts", "Net",
            "Bgd", "BgdSigma2", "Scheme", "TailCounts",
        ],
    );
    for r in ranges {
        sheet.push_row(vec![
            r.multi_use.into(),
            r.color.clone().into(),
            r.name.clone().into(),
            r.formula.to_string().into(),
            r.pos.into(),
            r.min.into(),
            r.max.into(),
            r.counts.into(),
            r.net.into(),
            r.background.into(),
            r.background_sigma2.into(),
            r.scheme
                .scheme()
                .map_or_else(String::new, |s| s.to_string())
                .into(),
            r.tail.into(),
        ]);
    }
    sheet
}

fn histogram_sheet(h: &CoarseHistogram) -> ExportSheet {
    let mut sheet = ExportSheet::new("MassHistogram", &["MassToChargeRatio(Da)", "Counts"]);
    for (i, &c) in h.counts.iter().enumerate() {
        sheet.push_row(vec![h.pos(i as i64).into(), c.into()]);
    }
    sheet
}

fn composition_sheet(name: &str, key_label: &str, table: &CompositionTable) -> ExportSheet {
    let mut sheet = ExportSheet::new(
        name,
        &[
            key_label,
            "Composition",
            "Sigma/DT(95%CL)",
            "Counts",
            "Background",
            "Net",
            "Tail",
        ],
    );
    for e in &table.entries {
        sheet.push_row(vec![
            e.name.clone().into(),
            e.composition_display().into(),
            e.sigma_display().into(),
            e.counts.into(),
            e.background.into(),
            e.net.into(),
            e.tail.into(),
        ]);
    }
    sheet.push_row(vec![
        "Totals:".into(),
        table.totals.composition.into(),
        "NA".into(),
        table.totals.counts.into(),
        table.totals.background.into(),
        table.totals.net.into(),
        table.totals.tail.into(),
    ]);
    sheet
}

fn multihit_sheet(model: &MultiHitModel) -> ExportSheet {
    let mut sheet = ExportSheet::new("MultihitInformation", &["Line"]);
    for line in model.summary_text().lines() {
        sheet.push_row(vec![line.into()]);
    }
    sheet
}

fn separation_sheet(model: &MultiHitModel) -> ExportSheet {
    let mut sheet = ExportSheet::new(
        "SeparationPlots",
        &["Range", "Distance(nm or mm)", "Pairs"],
    );
    for r in 0..model.n {
        for (distance, count) in model.separations.series(r, 0, CorrelationKind::All) {
            sheet.push_row(vec![
                model.labels[r].clone().into(),
                distance.into(),
                (count as i64).into(),
            ]);
        }
    }
    sheet
}

/// Assemble every sheet of one finished pass; the multi-hit sheets are
/// present only when that analysis ran.
#[allow(clippy::too_many_arguments)]
pub fn export_sheets(
    params: &RangingParams,
    summary: &SpectrumSummary,
    histogram: &CoarseHistogram,
    ranges: &[MassRange],
    ionic: &CompositionTable,
    decomposed: &CompositionTable,
    multihit: Option<&MultiHitModel>,
) -> Vec<ExportSheet> {
    let mut sheets = vec![
        parameters_sheet(params, summary),
        ranges_sheet(ranges),
        histogram_sheet(histogram),
        composition_sheet("IonicComposition", "Ion", ionic),
        composition_sheet("DecomposedComposition", "Element", decomposed),
    ];
    if let Some(model) = multihit {
        sheets.push(multihit_sheet(model));
        sheets.push(separation_sheet(model));
    }
    sheets
}
