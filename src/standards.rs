// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Standards input files.

The CSV format interleaves directive rows (`STANDARD`, `COMMENT`,
`SPECTRUM`, `THICKNESS`, `DENSITY`, `FRACTIONS`, `CARBONATES`) with
element rows `symbol,series,qualifier,componentType,%,uncertainty,
formulaRatio,weight,...`. The legacy TXT format is a header element list
followed by per-standard blocks of spectrum file, element count and
symbol/percent pairs.
 */

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{info, warn};
use thiserror::Error;

use crate::elements::{ElementListEntry, Qualifier};
use crate::material::{
    default_carbonate_ratio, default_formula_ratio, LightElementFormula, Material, Stoichiometry,
};
use crate::refdata::{Element, Series};
use crate::spectrum::Spectrum;

#[derive(Error, Debug)]
pub enum StandardsError {
    #[error("Couldn't read standards file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Bad line {line} in standards file {path}: {what}")]
    BadLine {
        path: String,
        line: usize,
        what: String,
    },

    #[error("No standards found in {0}")]
    NoStandards(String),
}

/// One standard: its certificate composition, spectrum file and the
/// element-list rows that go with it.
#[derive(Debug, Clone, Default)]
pub struct Standard {
    pub names: Vec<String>,
    pub material: Material,
    pub spectrum_file: String,
    pub element_list: Vec<ElementListEntry>,
    pub comments: Vec<String>,
    /// Comments seen before the first standard of the file.
    pub preceding_comments: Vec<String>,
    pub spectrum: Option<Spectrum>,
    pub user_weights: bool,
    pub carbonates: bool,
    pub input_fractions_are_formula: bool,
    pub disable: bool,
}

impl Standard {
    /// A display name: the first name given, else the spectrum file.
    pub fn name(&self) -> &str {
        self.names
            .first()
            .map(|s| s.as_str())
            .unwrap_or(&self.spectrum_file)
    }
}

/// Read a CSV standards file.
pub fn read_standards_csv(
    path: &Path,
    fe_override: Option<f64>,
) -> Result<Vec<Standard>, StandardsError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|e| StandardsError::Io {
        path: display.clone(),
        source: e,
    })?;

    let mut standards: Vec<Standard> = vec![];
    let mut current: Option<Standard> = None;
    let mut preceding_comments: Vec<String> = vec![];

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| StandardsError::Io {
            path: display.clone(),
            source: e,
        })?;
        let trimmed = line.trim_end_matches(['\r', '\n']).trim();
        if trimmed.is_empty() {
            continue;
        }
        let fields: Vec<&str> = trimmed.split(',').map(|f| f.trim()).collect();
        let keyword = fields[0].to_ascii_uppercase();

        match keyword.as_str() {
            "STANDARD" => {
                if let Some(done) = current.take() {
                    if !done.element_list.is_empty() {
                        standards.push(done);
                    }
                }
                let mut std = Standard {
                    preceding_comments: std::mem::take(&mut preceding_comments),
                    ..Standard::default()
                };
                std.names = fields[1..]
                    .iter()
                    .filter(|n| !n.trim().is_empty())
                    .map(|n| n.to_string())
                    .collect();
                std.material = Material::with_iron_override(fe_override);
                current = Some(std);
            }
            "COMMENT" => {
                let text = fields[1..].join(",");
                match current.as_mut() {
                    Some(std) => std.comments.push(text),
                    None => preceding_comments.push(text),
                }
            }
            "SPECTRUM" => {
                if let Some(std) = current.as_mut() {
                    if !std.spectrum_file.is_empty() {
                        warn!(
                            "{display}:{}: standard {} already has a spectrum; keeping the first",
                            line_no + 1,
                            std.name()
                        );
                    } else if let Some(f) = fields.get(1) {
                        std.spectrum_file = f.to_string();
                    }
                }
            }
            "THICKNESS" => {
                if let (Some(std), Some(v)) =
                    (current.as_mut(), fields.get(1).and_then(|f| f.parse::<f64>().ok()))
                {
                    std.material.set_thickness(v);
                }
            }
            "DENSITY" => {
                if let (Some(std), Some(v)) =
                    (current.as_mut(), fields.get(1).and_then(|f| f.parse::<f64>().ok()))
                {
                    std.material.set_density(v);
                }
            }
            "FRACTIONS" => {
                if let Some(std) = current.as_mut() {
                    let is_formula = matches!(
                        fields.get(1).map(|f| f.to_ascii_uppercase()),
                        Some(ref s) if s == "FORMULA" || s == "OXIDE"
                    );
                    std.input_fractions_are_formula = is_formula;
                }
            }
            "CARBONATES" => {
                if let Some(std) = current.as_mut() {
                    std.carbonates = true;
                }
            }
            "DISABLE" => {
                if let Some(std) = current.as_mut() {
                    std.disable = true;
                }
            }
            _ => {
                // An element row, or junk.
                let std = match current.as_mut() {
                    Some(std) => std,
                    None => continue,
                };
                let element: Element = match fields[0].parse() {
                    Ok(el) => el,
                    Err(_) => {
                        return Err(StandardsError::BadLine {
                            path: display.clone(),
                            line: line_no + 1,
                            what: format!("unrecognised keyword or element '{}'", fields[0]),
                        })
                    }
                };
                let mut entry = ElementListEntry::new(element);
                if let Some(series) = fields.get(1).and_then(|f| f.parse::<Series>().ok()) {
                    entry.level = Some(series);
                }
                entry.qualifier = match fields.get(2).map(|f| f.to_ascii_uppercase()).as_deref() {
                    Some("I") => Qualifier::Ignore,
                    Some("F") => Qualifier::Force,
                    Some("X") => Qualifier::Exclude,
                    Some("M") => Qualifier::Matrix,
                    Some("O") => Qualifier::Output,
                    _ => Qualifier::None,
                };
                let num = |i: usize| fields.get(i).and_then(|f| f.parse::<f64>().ok());
                entry.percent = num(4);
                entry.uncertainty = num(5).unwrap_or(0.0);
                let formula_ratio = num(6);
                if let Some(w) = num(7) {
                    entry.weight = w;
                    std.user_weights = true;
                }
                entry.ecf = num(8);
                entry.ecf_sigma = num(9).unwrap_or(0.0);

                // Stoichiometry: explicit ratio, else carbonates when the
                // standard says so, else the default oxide.
                let formula = if let Some(r) = formula_ratio {
                    if r > 0.0 {
                        LightElementFormula::Oxide { ratio: r }
                    } else {
                        LightElementFormula::PureElement
                    }
                } else if std.carbonates && default_carbonate_ratio(element) > 0.0 {
                    LightElementFormula::Carbonate {
                        ratio: default_carbonate_ratio(element),
                    }
                } else {
                    let ratio = default_formula_ratio(
                        element,
                        LightElementFormula::Oxide { ratio: 0.0 },
                        fe_override,
                    );
                    if ratio > 0.0 {
                        LightElementFormula::Oxide { ratio }
                    } else {
                        LightElementFormula::PureElement
                    }
                };
                entry.stoichiometry = Stoichiometry {
                    formula,
                    input_is_formula: std.input_fractions_are_formula,
                };

                if let Some(pct) = entry.percent {
                    entry.given = pct;
                    std.material
                        .add_element(element, pct / 100.0, entry.stoichiometry);
                    std.material.set_uncertainty(element, entry.uncertainty);
                }
                std.element_list.push(entry);
            }
        }
    }
    if let Some(done) = current.take() {
        if !done.element_list.is_empty() {
            standards.push(done);
        }
    }
    if standards.is_empty() {
        return Err(StandardsError::NoStandards(display));
    }
    info!("Read {} standards from {display}", standards.len());
    Ok(standards)
}

/// Read a legacy TXT standards file: a header element list (count then
/// symbols), then per standard a spectrum file name, an element count and
/// that many `symbol percent` pairs.
pub fn read_standards_txt(
    path: &Path,
    min_fraction: f64,
    fe_override: Option<f64>,
) -> Result<Vec<Standard>, StandardsError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|e| StandardsError::Io {
        path: display.clone(),
        source: e,
    })?;
    let mut lines = vec![];
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| StandardsError::Io {
            path: display.clone(),
            source: e,
        })?;
        let trimmed = line.trim_end_matches(['\r', '\n']).trim().to_string();
        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }
        lines.push(trimmed);
    }
    let mut it = lines.into_iter().enumerate();

    // Header: count then symbols, possibly spilling onto the same line.
    let (header_line, header) = it.next().ok_or(StandardsError::NoStandards(display.clone()))?;
    let mut header_tokens = header.split_whitespace();
    let n_header: usize = header_tokens
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or(StandardsError::BadLine {
            path: display.clone(),
            line: header_line + 1,
            what: "header must start with the element count".to_string(),
        })?;
    let header_elements: Vec<Element> = header_tokens
        .take(n_header)
        .filter_map(|t| t.parse().ok())
        .collect();

    let mut standards = vec![];
    while let Some((line_no, spectrum_file)) = it.next() {
        let mut std = Standard {
            spectrum_file: spectrum_file.clone(),
            material: Material::with_iron_override(fe_override),
            ..Standard::default()
        };
        std.names.push(
            Path::new(&spectrum_file)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or(spectrum_file.clone()),
        );
        let (count_line, count_str) = it.next().ok_or(StandardsError::BadLine {
            path: display.clone(),
            line: line_no + 1,
            what: "missing element count after spectrum file".to_string(),
        })?;
        let count: usize = count_str
            .split_whitespace()
            .next()
            .and_then(|t| t.parse().ok())
            .ok_or(StandardsError::BadLine {
                path: display.clone(),
                line: count_line + 1,
                what: "bad element count".to_string(),
            })?;
        for _ in 0..count {
            let (el_line, pair) = it.next().ok_or(StandardsError::BadLine {
                path: display.clone(),
                line: count_line + 1,
                what: "fewer element entries than the count".to_string(),
            })?;
            let mut tokens = pair.split_whitespace();
            let element: Element = tokens
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or(StandardsError::BadLine {
                    path: display.clone(),
                    line: el_line + 1,
                    what: "bad element symbol".to_string(),
                })?;
            let percent: f64 = tokens
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or(StandardsError::BadLine {
                    path: display.clone(),
                    line: el_line + 1,
                    what: "bad element percent".to_string(),
                })?;
            if percent / 100.0 < min_fraction {
                continue;
            }
            let ratio = default_formula_ratio(
                element,
                LightElementFormula::Oxide { ratio: 0.0 },
                fe_override,
            );
            let stoich = Stoichiometry {
                formula: if ratio > 0.0 {
                    LightElementFormula::Oxide { ratio }
                } else {
                    LightElementFormula::PureElement
                },
                input_is_formula: false,
            };
            let mut entry = ElementListEntry::new(element);
            entry.percent = Some(percent);
            entry.given = percent;
            entry.stoichiometry = stoich;
            std.material.add_element(element, percent / 100.0, stoich);
            std.element_list.push(entry);
        }
        // Elements from the header that the standard did not list are
        // still of interest, at zero percent.
        for &el in &header_elements {
            if !std.element_list.iter().any(|e| e.element == el) {
                let mut entry = ElementListEntry::new(el);
                entry.percent = Some(0.0);
                std.element_list.push(entry);
            }
        }
        standards.push(std);
    }
    if standards.is_empty() {
        return Err(StandardsError::NoStandards(display));
    }
    Ok(standards)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use approx::assert_relative_eq;
    use indoc::indoc;

    use super::*;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn reads_csv_standards() {
        let f = write_temp(indoc! {"
            COMMENT, geochemical reference materials, June batch
            STANDARD, BHVO-2, basalt
            SPECTRUM, bhvo2_28kv.msa
            Si, K, , , 23.3, 0.8
            Fe, K, , , 8.63, 0.6
            Ca, K, , , 8.17, 0.5
            STANDARD, GSP-2
            SPECTRUM, gsp2_28kv.msa
            FRACTIONS, FORMULA
            Si, K, , , 66.6, 1.0
            K, K, , , 5.51, 0.4
        "});
        let standards = read_standards_csv(f.path(), None).unwrap();
        assert_eq!(standards.len(), 2);
        let bhvo = &standards[0];
        assert_eq!(bhvo.names, vec!["BHVO-2", "basalt"]);
        assert_eq!(bhvo.spectrum_file, "bhvo2_28kv.msa");
        assert_eq!(bhvo.element_list.len(), 3);
        assert_eq!(bhvo.preceding_comments.len(), 1);
        // Fractions entered as element percent with default oxides:
        // derived Si fraction matches the input.
        let si = Element::new(14).unwrap();
        assert_relative_eq!(bhvo.material.fraction(si), 0.233, max_relative = 1e-6);
        assert!(bhvo.material.fraction(Element::new(8).unwrap()) > 0.0);
        assert!(standards[1].input_fractions_are_formula);
    }

    #[test]
    fn csv_with_carbonates() {
        let f = write_temp(indoc! {"
            STANDARD, CALCITE
            CARBONATES
            SPECTRUM, calcite.msa
            Ca, K, , , 40.0, 1.0
        "});
        let standards = read_standards_csv(f.path(), None).unwrap();
        let ca = Element::new(20).unwrap();
        let std = &standards[0];
        assert!(std.carbonates);
        assert!(matches!(
            std.material.stoichiometry(ca).formula,
            LightElementFormula::Carbonate { .. }
        ));
        assert!(std.material.fraction(Element::new(6).unwrap()) > 0.0);
    }

    #[test]
    fn bad_element_row_is_an_error() {
        let f = write_temp(indoc! {"
            STANDARD, X
            Qq, K, , , 10.0
        "});
        assert!(matches!(
            read_standards_csv(f.path(), None),
            Err(StandardsError::BadLine { .. })
        ));
    }

    #[test]
    fn empty_file_is_no_standards() {
        let f = write_temp("COMMENT, nothing here\n");
        assert!(matches!(
            read_standards_csv(f.path(), None),
            Err(StandardsError::NoStandards(_))
        ));
    }

    #[test]
    fn reads_txt_standards() {
        let f = write_temp(indoc! {"
            // legacy input
            3 Si Fe Ca
            bhvo2.msa
            2
            Si 23.3
            Fe 8.63
            gsp2.msa
            1
            Si 66.6
        "});
        let standards = read_standards_txt(f.path(), 0.0, None).unwrap();
        assert_eq!(standards.len(), 2);
        assert_eq!(standards[0].spectrum_file, "bhvo2.msa");
        // Header elements missing from the standard appear at zero.
        let ca_row = standards[0]
            .element_list
            .iter()
            .find(|e| e.element.symbol() == "Ca")
            .unwrap();
        assert_eq!(ca_row.percent, Some(0.0));
        assert_eq!(standards[1].names[0], "gsp2");
    }
}
