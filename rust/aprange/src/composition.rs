//! Ionic and decomposed (elemental) composition tables.
//!
//! Both tables aggregate finalized ranges, differing only in the grouping
//! key: the ionic table groups by range name, the decomposed table by
//! element symbol with stoichiometric scaling. Groups below the detection
//! threshold are excluded from the totals and report a 95% CL upper bound
//! instead of a fraction.

use std::collections::BTreeMap;

use serde::{
    Deserialize,
    Serialize,
};

use crate::models::range::{
    IonFormula,
    MassRange,
};

/// One-sided 95% CL multiplier for the not-detected test.
const NOT_DETECTED_CL: f64 = 2.33;
/// 95% CL detection-threshold multiplier reported for not-detected groups.
const DETECTION_THRESHOLD_CL: f64 = 4.65;
/// Sentinel composition for a not-detected group.
pub const NOT_DETECTED: f64 = -1.0;

/// Aggregate over all ranges sharing one grouping key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionEntry {
    pub name: String,
    pub formula: IonFormula,
    /// Fraction of the total net, or [`NOT_DETECTED`].
    pub composition: f64,
    /// Propagated uncertainty on the fraction (0 when not detected).
    pub sigma: f64,
    /// 95% CL upper bound, populated when not detected.
    pub detection_threshold: f64,
    pub counts: f64,
    pub net: f64,
    pub background: f64,
    pub background_sigma2: f64,
    pub tail: f64,
}

impl CompositionEntry {
    fn keyed(name: &str, formula: IonFormula) -> Self {
        Self {
            name: name.to_string(),
            formula,
            composition: 0.0,
            sigma: 0.0,
            detection_threshold: 0.0,
            counts: 0.0,
            net: 0.0,
            background: 0.0,
            background_sigma2: 0.0,
            tail: 0.0,
        }
    }

    fn add_scaled(&mut self, r: &MassRange, coeff: f64) {
        // Counts/net/background/tail scale linearly with the coefficient;
        // the variance of a scaled sum scales with its square.
        self.counts += coeff * r.counts;
        self.net += coeff * r.net;
        self.background += coeff * r.background;
        self.tail += coeff * r.tail;
        self.background_sigma2 += coeff * coeff * r.background_sigma2;
    }

    pub fn is_detected(&self) -> bool {
        self.composition >= 0.0
    }

    /// Percentage string sized so the printed resolution exceeds the
    /// numeric uncertainty (1 to 5 decimals).
    pub fn composition_display(&self) -> String {
        if !self.is_detected() {
            return "ND".to_string();
        }
        let decimals = percent_decimals(self.sigma * 100.0);
        format!("{:.*}%", decimals, self.composition * 100.0)
    }

    /// Uncertainty, or the detection threshold when not detected.
    pub fn sigma_display(&self) -> String {
        if self.is_detected() {
            let decimals = percent_decimals(self.sigma * 100.0);
            format!("{:.*}%", decimals, self.sigma * 100.0)
        } else {
            format!("ND (< {:.4} counts, 95% CL)", self.detection_threshold)
        }
    }
}

/// Smallest decimal count in 1..=5 whose resolution is below the
/// uncertainty expressed in percent.
fn percent_decimals(sigma_pct: f64) -> usize {
    if !(sigma_pct > 0.0) {
        return 5;
    }
    let mut decimals = 1usize;
    while decimals < 5 && 10f64.powi(-(decimals as i32)) >= sigma_pct {
        decimals += 1;
    }
    decimals
}

/// Totals row over the detected entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompositionTotals {
    pub composition: f64,
    pub counts: f64,
    pub net: f64,
    pub background: f64,
    pub tail: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositionTable {
    pub entries: Vec<CompositionEntry>,
    pub totals: CompositionTotals,
}

/// Group by range name (one row per ion species).
pub fn ionic_table(ranges: &[MassRange]) -> CompositionTable {
    let mut order: Vec<String> = Vec::new();
    let mut groups: BTreeMap<String, CompositionEntry> = BTreeMap::new();
    for r in ranges {
        let entry = groups
            .entry(r.name.clone())
            .or_insert_with(|| {
                order.push(r.name.clone());
                CompositionEntry::keyed(&r.name, r.formula.clone())
            });
        entry.add_scaled(r, 1.0);
    }
    let entries = order
        .into_iter()
        .filter_map(|name| groups.remove(&name))
        .collect();
    finalize(entries)
}

/// Group by element symbol, scaling each range's contribution by its
/// stoichiometric coefficient (and the variance by its square).
pub fn decomposed_table(ranges: &[MassRange]) -> CompositionTable {
    let mut groups: BTreeMap<String, CompositionEntry> = BTreeMap::new();
    for r in ranges {
        for (symbol, count) in r.formula.iter() {
            let entry = groups.entry(symbol.to_string()).or_insert_with(|| {
                let formula = IonFormula::parse(symbol).unwrap_or_default();
                CompositionEntry::keyed(symbol, formula)
            });
            entry.add_scaled(r, count as f64);
        }
    }
    finalize(groups.into_values().collect())
}

/// Detection test, fractions, and closed-form error propagation.
fn finalize(mut entries: Vec<CompositionEntry>) -> CompositionTable {
    let mut totals = CompositionTotals::default();

    // First pass: detection test and totals over detected entries.
    let mut total_net = 0.0;
    let mut total_background = 0.0;
    for e in entries.iter_mut() {
        let threshold = NOT_DETECTED_CL * e.background_sigma2.sqrt();
        if e.net < threshold {
            e.composition = NOT_DETECTED;
            e.detection_threshold = DETECTION_THRESHOLD_CL * e.background_sigma2.sqrt();
        } else {
            total_net += e.net;
            total_background += e.background;
            totals.counts += e.counts;
            totals.net += e.net;
            totals.background += e.background;
            totals.tail += e.tail;
        }
    }

    // Second pass: fractions with the complement-correlated uncertainty.
    if total_net > 0.0 {
        for e in entries.iter_mut().filter(|e| e.is_detected()) {
            e.composition = e.net / total_net;
            let nc = total_net - e.net;
            let bc = total_background - e.background;
            let var = e.background_sigma2;
            let inner = (e.net + var) * (nc - bc).powi(2) + (nc + bc) * (e.net - var).powi(2);
            e.sigma = inner.max(0.0).sqrt() / (total_net * total_net);
            totals.composition += e.composition;
        }
    }

    CompositionTable { entries, totals }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::range::IonFormula;

    fn range(name: &str, formula: &str, counts: f64, net: f64, bgd: f64) -> MassRange {
        let mut r = MassRange::seed(name, IonFormula::parse(formula).unwrap(), 0.0, 1.0);
        r.counts = counts;
        r.net = net;
        r.background = bgd;
        r.background_sigma2 = bgd;
        r
    }

    #[test]
    fn test_single_detected_entry_is_everything() {
        let table = ionic_table(&[range("Si", "Si", 1050.0, 1000.0, 50.0)]);
        assert_eq!(table.entries.len(), 1);
        let e = &table.entries[0];
        assert!(e.is_detected());
        assert!((e.composition - 1.0).abs() < 1e-12);
        assert!((table.totals.composition - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_multi_isotope_ranges_group_by_name() {
        let table = ionic_table(&[
            range("Fe", "Fe", 600.0, 550.0, 50.0),
            range("Fe", "Fe", 400.0, 380.0, 20.0),
            range("Cr", "Cr", 100.0, 70.0, 30.0),
        ]);
        assert_eq!(table.entries.len(), 2);
        let fe = table.entries.iter().find(|e| e.name == "Fe").unwrap();
        assert_eq!(fe.counts, 1000.0);
        assert_eq!(fe.net, 930.0);
        assert_eq!(fe.background, 70.0);
    }

    #[test]
    fn test_composition_closure_with_all_detected() {
        let table = ionic_table(&[
            range("Fe", "Fe", 600.0, 550.0, 50.0),
            range("Cr", "Cr", 400.0, 350.0, 50.0),
            range("Ni", "Ni", 200.0, 150.0, 50.0),
        ]);
        let sum: f64 = table
            .entries
            .iter()
            .map(|e| e.composition)
            .sum();
        assert!((sum - 1.0).abs() < 1e-9, "fractions must close: {}", sum);
    }

    #[test]
    fn test_not_detected_sentinel_and_threshold() {
        // net = 5 with sigma2 = 100: 5 < 2.33*10 -> not detected.
        let table = ionic_table(&[
            range("Fe", "Fe", 1000.0, 900.0, 100.0),
            range("Trace", "Cu", 105.0, 5.0, 100.0),
        ]);
        let trace = table.entries.iter().find(|e| e.name == "Trace").unwrap();
        assert_eq!(trace.composition, NOT_DETECTED);
        assert!((trace.detection_threshold - 4.65 * 10.0).abs() < 1e-9);
        assert_eq!(trace.composition_display(), "ND");
        // Excluded from totals: the detected entry carries everything.
        let fe = table.entries.iter().find(|e| e.name == "Fe").unwrap();
        assert!((fe.composition - 1.0).abs() < 1e-12);
        assert_eq!(table.totals.net, 900.0);
    }

    #[test]
    fn test_decomposed_scales_by_stoichiometry() {
        let table = decomposed_table(&[range("Al2O3", "Al2O3", 500.0, 450.0, 50.0)]);
        let al = table.entries.iter().find(|e| e.name == "Al").unwrap();
        let o = table.entries.iter().find(|e| e.name == "O").unwrap();
        assert_eq!(al.net, 2.0 * 450.0);
        assert_eq!(o.net, 3.0 * 450.0);
        assert_eq!(al.counts, 2.0 * 500.0);
        // Variance scales with the square of the coefficient.
        assert_eq!(al.background_sigma2, 4.0 * 50.0);
        assert_eq!(o.background_sigma2, 9.0 * 50.0);
    }

    #[test]
    fn test_decomposed_closure() {
        let table = decomposed_table(&[
            range("Al2O3", "Al2O3", 500.0, 450.0, 50.0),
            range("Si", "Si", 300.0, 280.0, 20.0),
        ]);
        let sum: f64 = table.entries.iter().map(|e| e.composition).sum();
        assert!((sum - 1.0).abs() < 1e-9, "fractions must close: {}", sum);
    }

    #[test]
    fn test_sigma_is_symmetric_for_identical_entries() {
        let table = ionic_table(&[
            range("Fe", "Fe", 1000.0, 600.0, 400.0),
            range("Cr", "Cr", 1000.0, 600.0, 400.0),
        ]);
        let fe = table.entries.iter().find(|e| e.name == "Fe").unwrap();
        let cr = table.entries.iter().find(|e| e.name == "Cr").unwrap();
        assert!(fe.sigma > 0.0);
        assert_eq!(fe.sigma, cr.sigma);
        assert_eq!(fe.composition, 0.5);
    }

    #[test]
    fn test_percent_decimals_tracks_uncertainty() {
        assert_eq!(percent_decimals(0.5), 1);
        assert_eq!(percent_decimals(0.05), 2);
        assert_eq!(percent_decimals(0.0005), 4);
        assert_eq!(percent_decimals(0.0), 5);
        assert_eq!(percent_decimals(3.0), 1);
    }

    #[test]
    fn test_display_strings() {
        let table = ionic_table(&[
            range("Fe", "Fe", 1000.0, 900.0, 100.0),
            range("Cr", "Cr", 500.0, 450.0, 50.0),
        ]);
        let fe = table.entries.iter().find(|e| e.name == "Fe").unwrap();
        let text = fe.composition_display();
        assert!(text.ends_with('%'), "got {:?}", text);
        assert!(!fe.sigma_display().is_empty());
    }
}
