//! Ranges: named integration windows on the mass axis.

use std::collections::BTreeMap;
use std::fmt::Display;

use serde::{
    Deserialize,
    Serialize,
};

/// Name given to synthetic placeholder ranges created for discovered peaks
/// that no named range covers. Placeholders lose overlap contests against
/// named ranges.
pub const DISCOVERED_NAME: &str = "Discovered";

/// Background-subtraction scheme for a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// Background from a fixed-size window offset to the left of the range.
    Left,
    /// Left background plus a fitted exponential tail past the right edge.
    LeftTail,
    /// Symmetric half-width flanking windows.
    Half,
    /// Symmetric quarter-width flanking windows, doubled to full-width
    /// equivalent.
    Quarter,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Scheme::Left => "Left",
            Scheme::LeftTail => "LeftTail",
            Scheme::Half => "Half",
            Scheme::Quarter => "Quarter",
        };
        write!(f, "{}", name)
    }
}

/// Scheme assignment state.
///
/// `Override` comes from a prior saved session or an explicit user choice
/// and is never replaced by the ranging pass; the pass itself writes
/// `Computed`. Modeled as a tagged variant so "never auto-overwrite a user
/// override" is a pattern match rather than null-coalescing at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeState {
    #[default]
    Unset,
    Override(Scheme),
    Computed(Scheme),
}

impl SchemeState {
    pub fn scheme(&self) -> Option<Scheme> {
        match self {
            SchemeState::Unset => None,
            SchemeState::Override(s) | SchemeState::Computed(s) => Some(*s),
        }
    }

    pub fn is_override(&self) -> bool {
        matches!(self, SchemeState::Override(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormulaParseError {
    pub text: String,
}

impl Display for FormulaParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unparseable ion formula: {:?}", self.text)
    }
}

/// Element symbol -> stoichiometric count, ordered by symbol.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IonFormula(pub BTreeMap<String, u32>);

impl IonFormula {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Parse a plain sum formula such as `"Al2O3"` or `"SiO2"`.
    ///
    /// An uppercase letter starts an element symbol, lowercase letters
    /// continue it, and trailing digits give the count (default 1). Repeated
    /// symbols accumulate.
    pub fn parse(formula: &str) -> Result<Self, FormulaParseError> {
        let mut elements: BTreeMap<String, u32> = BTreeMap::new();
        let mut symbol = String::new();
        let mut count = String::new();

        let commit = |elements: &mut BTreeMap<String, u32>, symbol: &str, count: &str| {
            let n = if count.is_empty() {
                1
            } else {
                count.parse::<u32>().unwrap_or(1)
            };
            *elements.entry(symbol.to_string()).or_insert(0) += n;
        };

        for c in formula.chars() {
            if c.is_ascii_uppercase() {
                if !symbol.is_empty() {
                    commit(&mut elements, &symbol, &count);
                }
                symbol = c.to_string();
                count.clear();
            } else if c.is_ascii_lowercase() {
                if symbol.is_empty() || !count.is_empty() {
                    return Err(FormulaParseError {
                        text: formula.to_string(),
                    });
                }
                symbol.push(c);
            } else if c.is_ascii_digit() {
                if symbol.is_empty() {
                    return Err(FormulaParseError {
                        text: formula.to_string(),
                    });
                }
                count.push(c);
            } else {
                return Err(FormulaParseError {
                    text: formula.to_string(),
                });
            }
        }
        if !symbol.is_empty() {
            commit(&mut elements, &symbol, &count);
        }
        Ok(Self(elements))
    }
}

impl Display for IonFormula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (symbol, count) in self.iter() {
            if count == 1 {
                write!(f, "{}", symbol)?;
            } else {
                write!(f, "{}{}", symbol, count)?;
            }
        }
        Ok(())
    }
}

/// One ion-type integration window.
///
/// The seed fields (name, formula, volume, min, max, color, multi_use) come
/// from the host's range manager; the computed fields are written by the
/// ranging pass and handed back as part of the full replacement range set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MassRange {
    pub name: String,
    #[serde(default)]
    pub formula: IonFormula,
    #[serde(default)]
    pub volume: f64,
    pub min: f64,
    pub max: f64,
    /// Display color, carried through untouched.
    #[serde(default)]
    pub color: String,
    /// Whether this range participates in multi-hit analysis.
    #[serde(default)]
    pub multi_use: bool,
    #[serde(default)]
    pub scheme: SchemeState,

    // Computed per pass.
    #[serde(default)]
    pub pos: f64,
    #[serde(default)]
    pub counts: f64,
    #[serde(default)]
    pub net: f64,
    #[serde(default)]
    pub background: f64,
    #[serde(default)]
    pub background_sigma2: f64,
    #[serde(default)]
    pub tail: f64,
}

impl MassRange {
    pub fn seed(name: impl Into<String>, formula: IonFormula, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            formula,
            volume: 0.0,
            min,
            max,
            color: String::new(),
            multi_use: false,
            scheme: SchemeState::Unset,
            pos: 0.0,
            counts: 0.0,
            net: 0.0,
            background: 0.0,
            background_sigma2: 0.0,
            tail: 0.0,
        }
    }

    /// Placeholder for a discovered peak no named range covers.
    pub fn discovered(pos: f64, intensity: f64) -> Self {
        let mut r = Self::seed(DISCOVERED_NAME, IonFormula::empty(), pos, pos);
        r.pos = pos;
        r.counts = intensity;
        r
    }

    pub fn is_discovered(&self) -> bool {
        self.name == DISCOVERED_NAME
    }

    /// Half-open interval overlap on `[min, max)`.
    pub fn overlaps(&self, other: &MassRange) -> bool {
        self.min < other.max && other.min < self.max
    }

    /// Whether `pos` falls inside this range's window.
    pub fn covers(&self, pos: f64) -> bool {
        self.min <= pos && pos < self.max
    }
}

/// A statistically significant local maximum found by peak discovery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredPeak {
    pub pos: f64,
    pub intensity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_formula() {
        let f = IonFormula::parse("H2O").unwrap();
        assert_eq!(f.0.get("H"), Some(&2));
        assert_eq!(f.0.get("O"), Some(&1));
    }

    #[test]
    fn test_parse_two_letter_symbols() {
        let f = IonFormula::parse("Al2O3").unwrap();
        assert_eq!(f.0.get("Al"), Some(&2));
        assert_eq!(f.0.get("O"), Some(&3));

        let f = IonFormula::parse("SiO2").unwrap();
        assert_eq!(f.0.get("Si"), Some(&1));
        assert_eq!(f.0.get("O"), Some(&2));
    }

    #[test]
    fn test_parse_repeated_symbol_accumulates() {
        let f = IonFormula::parse("CHOH").unwrap();
        assert_eq!(f.0.get("H"), Some(&2));
        assert_eq!(f.0.get("C"), Some(&1));
        assert_eq!(f.0.get("O"), Some(&1));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(IonFormula::parse("2H").is_err());
        assert!(IonFormula::parse("h2O").is_err());
        assert!(IonFormula::parse("H-2").is_err());
    }

    #[test]
    fn test_formula_display_roundtrip() {
        let f = IonFormula::parse("Al2O3").unwrap();
        assert_eq!(f.to_string(), "Al2O3");
        let f = IonFormula::parse("H2O").unwrap();
        assert_eq!(f.to_string(), "H2O");
    }

    #[test]
    fn test_scheme_state_override_is_sticky() {
        let s = SchemeState::Override(Scheme::LeftTail);
        assert!(s.is_override());
        assert_eq!(s.scheme(), Some(Scheme::LeftTail));
        assert_eq!(SchemeState::Unset.scheme(), None);
    }

    #[test]
    fn test_range_overlap_is_half_open() {
        let a = MassRange::seed("A", IonFormula::empty(), 1.0, 2.0);
        let b = MassRange::seed("B", IonFormula::empty(), 2.0, 3.0);
        let c = MassRange::seed("C", IonFormula::empty(), 1.5, 2.5);
        assert!(!a.overlaps(&b), "abutting ranges do not overlap");
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn test_range_serde_roundtrip_keeps_seed_fields() {
        let mut r = MassRange::seed("Fe", IonFormula::parse("Fe").unwrap(), 27.8, 28.2);
        r.scheme = SchemeState::Override(Scheme::Half);
        r.multi_use = true;
        let text = serde_json::to_string(&r).unwrap();
        let back: MassRange = serde_json::from_str(&text).unwrap();
        assert_eq!(back.name, "Fe");
        assert_eq!(back.scheme, SchemeState::Override(Scheme::Half));
        assert!(back.multi_use);
        assert_eq!(back.min, 27.8);
    }
}
