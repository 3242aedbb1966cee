// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Parsing of user element lists.

An element list is a comma- or blank-separated string of entries like
`Fe`, `Ca_K`, `Sr_L`, `Na_I`, `Ti_K_F` or `C_M=23.7%`. The first suffix is
a quantification level (K/L/M/N) where it matches one, otherwise a
qualifier; a second suffix is always a qualifier. The special entry `CO3`
switches carbonate stoichiometry on for the whole list.
 */

use thiserror::Error;

use crate::material::{
    default_formula_ratio, LightElementFormula, Stoichiometry,
};
use crate::refdata::{Element, ElementError, Series};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ElementListError {
    #[error("Empty element list")]
    Empty,

    #[error("Bad element list entry '{0}': {1}")]
    BadEntry(String, ElementError),

    #[error("Invalid quantification level or qualifier '{0}' in entry '{1}'")]
    BadQualifier(String, String),
}

/// What the user wants done with an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qualifier {
    #[default]
    None,
    /// Include in the fit but do not quantify.
    Ignore,
    /// Force into the fit even if the fit wants to drop it.
    Force,
    /// Exclude entirely.
    Exclude,
    /// A matrix element: absorbs the normalization deficit.
    Matrix,
    /// Force into evaluate output even with no data.
    Output,
}

/// One entry of a parsed element list; also the row type that standards
/// files and the calibration file fill in around a fit.
#[derive(Debug, Clone)]
pub struct ElementListEntry {
    pub element: Element,
    pub level: Option<Series>,
    pub qualifier: Qualifier,
    pub stoichiometry: Stoichiometry,
    /// Given percent (standards, or matrix percent from `Sym_M=v%`).
    pub percent: Option<f64>,
    /// Relative error of the given percent, as a percent.
    pub uncertainty: f64,
    pub weight: f64,
    pub ecf: Option<f64>,
    pub ecf_sigma: f64,
    pub intensity: f64,
    pub coefficient: Option<f64>,
    pub rel_err_coeff: f64,
    pub total_err: f64,
    pub given: f64,
    pub rel_err_given: f64,
    pub matrix_factor: f64,
}

impl ElementListEntry {
    pub fn new(element: Element) -> ElementListEntry {
        ElementListEntry {
            element,
            level: None,
            qualifier: Qualifier::None,
            stoichiometry: Stoichiometry::default(),
            percent: None,
            uncertainty: 0.0,
            weight: 1.0,
            ecf: None,
            ecf_sigma: 0.0,
            intensity: 0.0,
            coefficient: None,
            rel_err_coeff: 0.0,
            total_err: 0.0,
            given: 0.0,
            rel_err_given: 0.0,
            matrix_factor: 0.0,
        }
    }

    /// The series that will actually be used for quantification:
    /// K unless stated otherwise.
    pub fn quant_series(&self) -> Series {
        self.level.unwrap_or(Series::K)
    }
}

/// The parsed list plus the carbonate flag from a `CO3` entry.
#[derive(Debug, Clone, Default)]
pub struct ParsedElementList {
    pub entries: Vec<ElementListEntry>,
    pub carbonates: bool,
}

/// Parse a user element list. When `oxides` is set, every entry without
/// explicit stoichiometry gets its default oxide formula (the usual case
/// for geological specimens).
pub fn parse_element_list(
    list: &str,
    oxides: bool,
    fe_override: Option<f64>,
) -> Result<ParsedElementList, ElementListError> {
    let mut out = ParsedElementList::default();
    for record in list
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
    {
        if record.eq_ignore_ascii_case("CO3") {
            out.carbonates = true;
            continue;
        }
        let mut entry = parse_element_string(record)?;
        if out.carbonates {
            let formula = LightElementFormula::Carbonate { ratio: 0.0 };
            let ratio = default_formula_ratio(entry.element, formula, fe_override);
            if ratio > 0.0 {
                entry.stoichiometry.formula = LightElementFormula::Carbonate { ratio };
            }
        }
        if matches!(entry.stoichiometry.formula, LightElementFormula::PureElement) && oxides {
            let ratio = default_formula_ratio(
                entry.element,
                LightElementFormula::Oxide { ratio: 0.0 },
                fe_override,
            );
            if ratio > 0.0 {
                entry.stoichiometry.formula = LightElementFormula::Oxide { ratio };
            }
        }
        add_element_list_entry(entry, &mut out.entries);
    }
    if out.entries.is_empty() {
        return Err(ElementListError::Empty);
    }
    Ok(out)
}

/// Parse one `Sym[_Level][_Qualifier]` or `Sym_M=percent%` entry.
pub fn parse_element_string(record: &str) -> Result<ElementListEntry, ElementListError> {
    // A matrix percent may follow an equals sign.
    let (body, percent) = match record.split_once('=') {
        Some((body, value)) => {
            let percent = value.trim_end_matches('%').trim().parse::<f64>().ok();
            (body, percent)
        }
        None => (record, None),
    };

    let mut parts = body.split('_');
    let symbol = parts.next().unwrap_or_default();
    let element: Element = symbol
        .parse()
        .map_err(|e| ElementListError::BadEntry(record.to_string(), e))?;
    let mut entry = ElementListEntry::new(element);
    entry.percent = percent;
    if percent.is_some() {
        entry.qualifier = Qualifier::Matrix;
    }

    let mut saw_level = false;
    for suffix in parts {
        let s = suffix.trim().to_ascii_uppercase();
        let as_level = if saw_level { None } else { parse_level(&s) };
        match as_level {
            Some(level) => {
                entry.level = Some(level);
                saw_level = true;
            }
            None => {
                entry.qualifier = match s.as_str() {
                    "I" => Qualifier::Ignore,
                    "F" => Qualifier::Force,
                    "X" => Qualifier::Exclude,
                    "M" => Qualifier::Matrix,
                    "O" => Qualifier::Output,
                    _ => {
                        return Err(ElementListError::BadQualifier(
                            s,
                            record.to_string(),
                        ))
                    }
                };
            }
        }
    }
    Ok(entry)
}

fn parse_level(s: &str) -> Option<Series> {
    match s {
        "K" => Some(Series::K),
        "L" => Some(Series::L),
        // "M" in the first suffix position is the M series; as a second
        // suffix it is the matrix qualifier.
        "M" => Some(Series::M),
        "N" => Some(Series::N),
        _ => None,
    }
}

/// Append an entry, or merge it with an existing entry for the same
/// element and level, keeping the most specific information.
pub fn add_element_list_entry(entry: ElementListEntry, list: &mut Vec<ElementListEntry>) {
    for existing in list.iter_mut() {
        if existing.element == entry.element
            && (existing.level == entry.level || entry.level.is_none())
        {
            if entry.qualifier != Qualifier::None {
                existing.qualifier = entry.qualifier;
            }
            if entry.level.is_some() {
                existing.level = entry.level;
            }
            if entry.percent.is_some() {
                existing.percent = entry.percent;
            }
            if entry.ecf.is_some() {
                existing.ecf = entry.ecf;
                existing.ecf_sigma = entry.ecf_sigma;
            }
            return;
        }
    }
    list.push(entry);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_symbols() {
        let parsed = parse_element_list("Ca, Zr", false, None).unwrap();
        assert_eq!(parsed.entries.len(), 2);
        assert_eq!(parsed.entries[0].element.symbol(), "Ca");
        assert_eq!(parsed.entries[1].element.symbol(), "Zr");
        assert!(parsed.entries[0].level.is_none());
        assert!(!parsed.carbonates);
    }

    #[test]
    fn level_and_qualifier_suffixes() {
        let parsed = parse_element_list("Sr_L Fe_K_F Na_I", false, None).unwrap();
        assert_eq!(parsed.entries[0].level, Some(Series::L));
        assert_eq!(parsed.entries[1].level, Some(Series::K));
        assert_eq!(parsed.entries[1].qualifier, Qualifier::Force);
        assert_eq!(parsed.entries[2].qualifier, Qualifier::Ignore);
    }

    #[test]
    fn oxides_default_applied() {
        let parsed = parse_element_list("Si,Fe", true, None).unwrap();
        match parsed.entries[0].stoichiometry.formula {
            LightElementFormula::Oxide { ratio } => assert_eq!(ratio, 2.0),
            other => panic!("expected oxide, got {other:?}"),
        }
        // FeO by default.
        match parsed.entries[1].stoichiometry.formula {
            LightElementFormula::Oxide { ratio } => assert_eq!(ratio, 1.0),
            other => panic!("expected oxide, got {other:?}"),
        }
    }

    #[test]
    fn carbonate_flag() {
        let parsed = parse_element_list("CO3,Ca,Si", true, None).unwrap();
        assert!(parsed.carbonates);
        assert!(matches!(
            parsed.entries[0].stoichiometry.formula,
            LightElementFormula::Carbonate { .. }
        ));
        // Si does not form a carbonate and falls back to its oxide.
        assert!(matches!(
            parsed.entries[1].stoichiometry.formula,
            LightElementFormula::Oxide { .. }
        ));
    }

    #[test]
    fn matrix_percent_entry() {
        let parsed = parse_element_list("C_M=23.7%", false, None).unwrap();
        let e = &parsed.entries[0];
        assert_eq!(e.qualifier, Qualifier::Matrix);
        assert_eq!(e.percent, Some(23.7));
    }

    #[test]
    fn duplicate_entries_merge() {
        let parsed = parse_element_list("Fe,Fe_K_F", false, None).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].qualifier, Qualifier::Force);
        assert_eq!(parsed.entries[0].level, Some(Series::K));
    }

    #[test]
    fn bad_symbol_is_an_error() {
        assert!(parse_element_list("Qq", false, None).is_err());
        assert!(parse_element_list("", false, None).is_err());
    }
}
