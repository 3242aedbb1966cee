// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Calibration against known standards, and the evaluate pass that
//! quantifies each standard with itself excluded.

use log::{info, warn};
use thiserror::Error;

use crate::conditions::Conditions;
use crate::elements::Qualifier;
use crate::fit::{fit_spectrum, FitError};
use crate::fp::build_components;
use crate::spectrum::Spectrum;
use crate::standards::Standard;

use super::{
    attach_snip_background, quantify_unknown, AnalysisContext, Calibration, EcfTerm, QuantError,
};

#[derive(Error, Debug)]
pub enum CalibrateError {
    #[error("No standards loaded")]
    NoStandardsLoaded,

    #[error("Standard '{0}' not found")]
    UnknownStandard(String),

    #[error("Standard '{name}' has no spectrum loaded")]
    MissingSpectrum { name: String },

    #[error("Fitting standard '{name}' failed: {source}")]
    Fit { name: String, source: FitError },
}

/// Fit one standard's spectrum against its certificate composition and
/// collect an ECF term per quantified element. The spectrum must already
/// be loaded onto the standard.
fn fit_standard(
    standard: &mut Standard,
    conditions: &Conditions,
) -> Result<Vec<EcfTerm>, CalibrateError> {
    let name = standard.name().to_string();
    let spectrum: &mut Spectrum = standard
        .spectrum
        .as_mut()
        .ok_or(CalibrateError::MissingSpectrum { name: name.clone() })?;

    attach_snip_background(spectrum);
    build_components(conditions, &standard.material, &standard.element_list, spectrum);
    fit_spectrum(spectrum, &conditions.detector).map_err(|source| CalibrateError::Fit {
        name: name.clone(),
        source,
    })?;

    let mut terms = vec![];
    for entry in standard.element_list.iter_mut() {
        if matches!(
            entry.qualifier,
            Qualifier::Exclude | Qualifier::Matrix | Qualifier::Output | Qualifier::Ignore
        ) {
            continue;
        }
        let pct = match entry.percent {
            Some(p) if p > 0.0 => p,
            _ => continue,
        };
        let idx = match spectrum.quant_component_index(entry.element) {
            Some(i) => i,
            None => continue,
        };
        let comp = &spectrum.components()[idx];
        if !comp.included || comp.coefficient <= 0.0 {
            warn!(
                "{}: {} was dropped from the fit; no ECF from this standard",
                name,
                comp.label()
            );
            continue;
        }
        entry.coefficient = Some(comp.coefficient);
        entry.intensity = comp.intensity;
        entry.rel_err_coeff = comp.rel_err_percent();
        // Weight: the user weight times the certificate fraction, so
        // trace constituents don't steer the mean.
        let weight = entry.weight * (pct / 100.0);
        terms.push(EcfTerm {
            standard_name: name.clone(),
            element: entry.element,
            series: entry.quant_series(),
            coefficient: comp.coefficient,
            rel_err_pct: comp.rel_err_percent(),
            weight,
            given_pct: pct,
            given_err_pct: entry.uncertainty,
        });
    }
    Ok(terms)
}

/// Calibrate: fit every enabled standard with its known composition and
/// pool the resulting ECF terms.
pub fn calibrate_standards(
    standards: &mut [Standard],
    conditions: &Conditions,
) -> Result<Calibration, CalibrateError> {
    if standards.is_empty() {
        return Err(CalibrateError::NoStandardsLoaded);
    }
    let mut calibration = Calibration::new();
    let mut fitted = 0;
    for standard in standards.iter_mut() {
        if standard.disable {
            continue;
        }
        if standard.spectrum.is_none() {
            warn!("Standard '{}' has no spectrum; skipped", standard.name());
            continue;
        }
        let terms = fit_standard(standard, conditions)?;
        info!(
            "Standard '{}': {} ECF terms from its fit",
            standard.name(),
            terms.len()
        );
        for t in terms {
            calibration.push(t);
        }
        fitted += 1;
    }
    if fitted == 0 {
        return Err(CalibrateError::NoStandardsLoaded);
    }
    Ok(calibration)
}

/// The calibrate path restricted to a single standard, selected by index
/// or name. Used for plotting and debugging a single fit.
pub fn fit_one_standard(
    standards: &mut [Standard],
    selector: &str,
    conditions: &Conditions,
) -> Result<Calibration, CalibrateError> {
    let index = match selector.parse::<usize>() {
        Ok(i) if i < standards.len() => i,
        _ => standards
            .iter()
            .position(|s| s.names.iter().any(|n| n.eq_ignore_ascii_case(selector)))
            .ok_or_else(|| CalibrateError::UnknownStandard(selector.to_string()))?,
    };
    let mut calibration = Calibration::new();
    for t in fit_standard(&mut standards[index], conditions)? {
        calibration.push(t);
    }
    Ok(calibration)
}

/// One evaluate row: a standard quantified as an unknown against the
/// calibration with itself excluded.
#[derive(Debug)]
pub struct EvaluateRow {
    pub standard_name: String,
    pub element_list: Vec<crate::elements::ElementListEntry>,
    pub spectrum_file: String,
    pub chisq: f64,
    pub iterations: usize,
    pub error: Option<QuantError>,
}

/// Evaluate: quantify each standard as an unknown, excluding the standard
/// itself from the ECFs it is judged against. The given percents are
/// carried into the rows so outputs can report recovery.
pub fn evaluate_standards(
    standards: &mut [Standard],
    conditions: &Conditions,
    calibration: &Calibration,
    context: AnalysisContext,
) -> Result<Vec<EvaluateRow>, CalibrateError> {
    if standards.is_empty() {
        return Err(CalibrateError::NoStandardsLoaded);
    }
    let mut rows = vec![];
    for standard in standards.iter_mut() {
        let name = standard.name().to_string();
        let spectrum = match standard.spectrum.as_mut() {
            Some(s) => s,
            None => {
                warn!("Standard '{}' has no spectrum; skipped in evaluate", name);
                continue;
            }
        };
        spectrum.std_names = standard.names.clone();
        let mut element_list = standard.element_list.clone();
        for entry in element_list.iter_mut() {
            entry.given = entry.percent.unwrap_or(0.0);
            entry.rel_err_given = entry.uncertainty;
            entry.percent = None;
        }
        let result = quantify_unknown(
            &mut element_list,
            conditions,
            spectrum,
            calibration,
            context,
        );
        let (chisq, iterations, error) = match result {
            Ok(q) => (q.chisq, q.iterations, None),
            Err(e) => {
                warn!("Evaluate of '{}' failed: {e}", name);
                (0.0, 0, Some(e))
            }
        };
        // Recovery against the certificate.
        for entry in element_list.iter_mut() {
            if entry.given > 0.0 {
                if let Some(pct) = entry.percent {
                    entry.rel_err_given = 100.0 * (pct - entry.given) / entry.given;
                }
            }
        }
        rows.push(EvaluateRow {
            standard_name: name,
            spectrum_file: standard.spectrum_file.clone(),
            element_list,
            chisq,
            iterations,
            error,
        });
    }
    Ok(rows)
}
