// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Element calibration factors.

An ECF converts a fit amplitude into a mass fraction for one (element,
series) pair. The combined value is a weighted mean over the standards
that contained the element; the per-standard terms are kept so a standard
can be excluded from its own evaluation. The whole set round-trips
through a small CSV file.
 */

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use indexmap::IndexMap;
use itertools::Itertools;
use thiserror::Error;

use crate::refdata::{Element, Series};

#[derive(Error, Debug)]
pub enum CalibrationFileError {
    #[error("Couldn't access calibration file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Bad line {line} in calibration file {path}")]
    BadLine { path: String, line: usize },
}

/// One standard's contribution to one (element, series) ECF.
#[derive(Debug, Clone)]
pub struct EcfTerm {
    pub standard_name: String,
    pub element: Element,
    pub series: Series,
    /// Fit coefficient relative to the certificate composition.
    pub coefficient: f64,
    /// Relative 1-sigma of the coefficient from the fit, percent.
    pub rel_err_pct: f64,
    /// Effective weight: user weight times the fraction-derived factor.
    pub weight: f64,
    /// Certificate percent of the element in the standard.
    pub given_pct: f64,
    /// Certificate relative uncertainty, percent.
    pub given_err_pct: f64,
}

/// The combined factor for one (element, series).
#[derive(Debug, Clone, Copy)]
pub struct Ecf {
    pub value: f64,
    /// The larger of the scatter across standards and the mean fit error,
    /// relative percent.
    pub sigma_pct: f64,
    /// Weighted mean certificate uncertainty, relative percent.
    pub cert_pct: f64,
    pub num_standards: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Calibration {
    terms: Vec<EcfTerm>,
}

impl Calibration {
    pub fn new() -> Calibration {
        Calibration::default()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn push(&mut self, term: EcfTerm) {
        self.terms.push(term);
    }

    pub fn terms(&self) -> &[EcfTerm] {
        &self.terms
    }

    /// Combined ECFs, optionally excluding standards by name (so a
    /// standard is never evaluated against itself).
    pub fn combined(&self, exclude: &[String]) -> IndexMap<(Element, Series), Ecf> {
        let mut by_key: IndexMap<(Element, Series), Vec<&EcfTerm>> = IndexMap::new();
        for term in &self.terms {
            if exclude.iter().any(|x| x.eq_ignore_ascii_case(&term.standard_name)) {
                continue;
            }
            by_key
                .entry((term.element, term.series))
                .or_default()
                .push(term);
        }
        let mut out = IndexMap::with_capacity(by_key.len());
        for (key, terms) in by_key {
            let wsum: f64 = terms.iter().map(|t| t.weight).sum();
            if wsum <= 0.0 {
                continue;
            }
            let mean: f64 = terms.iter().map(|t| t.weight * t.coefficient).sum::<f64>() / wsum;
            if mean <= 0.0 {
                continue;
            }
            // Weighted standard deviation across standards.
            let scatter2: f64 = terms
                .iter()
                .map(|t| t.weight * (t.coefficient - mean).powi(2))
                .sum::<f64>()
                / wsum;
            let scatter_pct = 100.0 * scatter2.sqrt() / mean;
            // Weighted mean of the per-fit relative errors.
            let fit_pct: f64 =
                terms.iter().map(|t| t.weight * t.rel_err_pct).sum::<f64>() / wsum;
            let cert_pct: f64 =
                terms.iter().map(|t| t.weight * t.given_err_pct).sum::<f64>() / wsum;
            out.insert(
                key,
                Ecf {
                    value: mean,
                    sigma_pct: scatter_pct.max(fit_pct),
                    cert_pct,
                    num_standards: terms.len(),
                },
            );
        }
        out
    }

    /// Look up the ECF for an element, interpolating against atomic
    /// number within the same series when the element itself was not in
    /// any standard. Outside the covered range the nearest endpoint is
    /// used; there is no extrapolation. An empty calibration answers
    /// unity so uncalibrated instruments still produce relative numbers.
    pub fn lookup(&self, element: Element, series: Series, exclude: &[String]) -> Ecf {
        let combined = self.combined(exclude);
        if let Some(ecf) = combined.get(&(element, series)) {
            return *ecf;
        }
        let same_series: Vec<(u32, &Ecf)> = combined
            .iter()
            .filter(|((_, s), _)| *s == series)
            .map(|((el, _), e)| (el.atomic_number(), e))
            .sorted_by_key(|(z, _)| *z)
            .collect();
        let z = element.atomic_number();
        match same_series.len() {
            0 => Ecf {
                value: 1.0,
                sigma_pct: 0.0,
                cert_pct: 0.0,
                num_standards: 0,
            },
            1 => *same_series[0].1,
            _ => {
                let first = same_series.first().unwrap();
                let last = same_series.last().unwrap();
                if z <= first.0 {
                    *first.1
                } else if z >= last.0 {
                    *last.1
                } else {
                    // Linear interpolation in Z between the bracketing
                    // calibrated elements.
                    let (lo, hi) = same_series
                        .iter()
                        .tuple_windows()
                        .find(|(a, b)| a.0 <= z && z <= b.0)
                        .unwrap();
                    let frac = (z - lo.0) as f64 / (hi.0 - lo.0).max(1) as f64;
                    Ecf {
                        value: lo.1.value + frac * (hi.1.value - lo.1.value),
                        sigma_pct: lo.1.sigma_pct.max(hi.1.sigma_pct),
                        cert_pct: lo.1.cert_pct.max(hi.1.cert_pct),
                        num_standards: lo.1.num_standards.min(hi.1.num_standards),
                    }
                }
            }
        }
    }

    /// Write the calibration file: combined ECFs then per-standard terms.
    pub fn write_file(&self, path: &Path) -> Result<(), CalibrationFileError> {
        let display = path.display().to_string();
        let mut f = File::create(path).map_err(|e| CalibrationFileError::Io {
            path: display.clone(),
            source: e,
        })?;
        let io_err = |e| CalibrationFileError::Io {
            path: display.clone(),
            source: e,
        };
        writeln!(f, "PIQUANT calibration,{}", env!("CARGO_PKG_VERSION")).map_err(io_err)?;
        writeln!(f, "Element,Series,ECF,ECFsigmaPct,CertPct,Standards").map_err(io_err)?;
        for ((el, series), ecf) in self.combined(&[]) {
            writeln!(
                f,
                "ECF,{},{},{:.6},{:.3},{:.3},{}",
                el.symbol(),
                series,
                ecf.value,
                ecf.sigma_pct,
                ecf.cert_pct,
                ecf.num_standards
            )
            .map_err(io_err)?;
        }
        for t in &self.terms {
            writeln!(
                f,
                "STD,{},{},{},{:.6},{:.3},{:.4},{:.4},{:.3}",
                t.standard_name,
                t.element.symbol(),
                t.series,
                t.coefficient,
                t.rel_err_pct,
                t.weight,
                t.given_pct,
                t.given_err_pct
            )
            .map_err(io_err)?;
        }
        Ok(())
    }

    /// Read a calibration file written by [Calibration::write_file]. Only
    /// the per-standard terms are loaded; combined values are always
    /// recomputed so exclusions work.
    pub fn read_file(path: &Path) -> Result<Calibration, CalibrationFileError> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|e| CalibrationFileError::Io {
            path: display.clone(),
            source: e,
        })?;
        let mut cal = Calibration::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| CalibrationFileError::Io {
                path: display.clone(),
                source: e,
            })?;
            let fields: Vec<&str> = line.trim().split(',').collect();
            if fields.first() != Some(&"STD") {
                continue;
            }
            let bad = || CalibrationFileError::BadLine {
                path: display.clone(),
                line: i + 1,
            };
            if fields.len() < 9 {
                return Err(bad());
            }
            let element: Element = fields[2].parse().map_err(|_| bad())?;
            let series: Series = fields[3].parse().map_err(|_| bad())?;
            cal.push(EcfTerm {
                standard_name: fields[1].to_string(),
                element,
                series,
                coefficient: fields[4].parse().map_err(|_| bad())?,
                rel_err_pct: fields[5].parse().map_err(|_| bad())?,
                weight: fields[6].parse().map_err(|_| bad())?,
                given_pct: fields[7].parse().map_err(|_| bad())?,
                given_err_pct: fields[8].parse().map_err(|_| bad())?,
            });
        }
        Ok(cal)
    }
}
