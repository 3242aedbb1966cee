// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The quantify-as-unknown outer loop: iterate forward model, linear fit
//! and ECF-weighted composition updates until the mass fractions settle.

use log::{debug, warn};
use thiserror::Error;

use crate::conditions::Conditions;
use crate::constants::{QUANT_FRACTION_TOLERANCE, QUANT_MAX_ITERATIONS};
use crate::elements::{ElementListEntry, Qualifier};
use crate::fit::{fit_spectrum, FitError};
use crate::fp::build_components;
use crate::material::Material;
use crate::refdata::Element;
use crate::spectrum::Spectrum;

use super::{attach_snip_background, AnalysisContext, Calibration};

#[derive(Error, Debug)]
pub enum QuantError {
    #[error("Energy calibration is bad; can't quantify this spectrum")]
    BadCalibration,

    #[error("Live time is {0}; can't quantify this spectrum")]
    BadLiveTime(f64),

    #[error("Element list contains nothing to quantify")]
    EmptyElementList,

    #[error(transparent)]
    Fit(#[from] FitError),
}

#[derive(Debug)]
pub struct QuantResult {
    pub material: Material,
    pub iterations: usize,
    pub converged: bool,
    pub chisq: f64,
}

/// Starting fraction for quantified elements other than the seed, so
/// every component has a nonzero spectrum on the first pass.
const SEED_MINOR_FRACTION: f64 = 0.02;

/// Quantify a spectrum of unknown composition.
///
/// The element-list entries are filled in with the fit results (percent,
/// intensity, coefficient and error terms) for reporting.
pub fn quantify_unknown(
    element_list: &mut [ElementListEntry],
    conditions: &Conditions,
    spectrum: &mut Spectrum,
    calibration: &Calibration,
    context: AnalysisContext,
) -> Result<QuantResult, QuantError> {
    if !spectrum.calibration().good() {
        return Err(QuantError::BadCalibration);
    }
    if spectrum.live_time() <= 0.0 {
        return Err(QuantError::BadLiveTime(spectrum.live_time()));
    }
    let quant_elements: Vec<Element> = element_list
        .iter()
        .filter(|e| !matches!(e.qualifier, Qualifier::Exclude | Qualifier::Matrix | Qualifier::Output))
        .map(|e| e.element)
        .collect();
    if quant_elements.is_empty() {
        return Err(QuantError::EmptyElementList);
    }

    let mut specimen = seed_composition(element_list, context);
    attach_snip_background(spectrum);

    let exclude = spectrum.std_names.clone();
    let mut iterations = 0;
    let mut converged = false;
    let mut chisq = 0.0;

    while iterations < QUANT_MAX_ITERATIONS {
        iterations += 1;
        build_components(conditions, &specimen, element_list, spectrum);
        let fit = fit_spectrum(spectrum, &conditions.detector)?;
        chisq = fit.chisq;

        let mut max_delta = 0.0_f64;
        for entry in element_list.iter_mut() {
            if matches!(
                entry.qualifier,
                Qualifier::Exclude | Qualifier::Matrix | Qualifier::Output
            ) {
                continue;
            }
            let el = entry.element;
            let idx = match spectrum.quant_component_index(el) {
                Some(i) => i,
                None => continue,
            };
            let comp = &spectrum.components()[idx];
            let ecf = calibration.lookup(el, entry.quant_series(), &exclude);
            entry.ecf = Some(ecf.value);
            entry.ecf_sigma = ecf.sigma_pct;

            let f_old = specimen.fraction(el);
            let f_new = if comp.included && comp.coefficient > 0.0 {
                entry.coefficient = Some(comp.coefficient);
                entry.intensity = comp.intensity;
                entry.rel_err_coeff = comp.rel_err_percent();
                (f_old * comp.coefficient / ecf.value).clamp(0.0, 1.0)
            } else {
                // Driven out of the fit: the element is not detectable.
                entry.coefficient = Some(0.0);
                entry.intensity = 0.0;
                0.0
            };
            max_delta = max_delta.max((f_new - f_old).abs());
            set_element_fraction(&mut specimen, el, f_new);

            // Stage the expected residual scale for the next pass.
            spectrum.set_adjusted_coefficient(el, ecf.value);
        }
        absorb_deficit(&mut specimen, element_list);

        debug!(
            "Quantify iteration {iterations}: max fraction change {:.2e}",
            max_delta
        );
        if max_delta < QUANT_FRACTION_TOLERANCE {
            converged = true;
            break;
        }
        // Only seed the next fit when there will be one, so the final
        // spectrum keeps its fitted coefficients.
        spectrum.adjust_coefficients();
    }
    if !converged {
        warn!(
            "Quantification hit the iteration cap ({QUANT_MAX_ITERATIONS}) for {}",
            spectrum.file_name
        );
    }
    spectrum.iterations = iterations;

    // Final bookkeeping: percents, total errors, matrix factors.
    if let Some(target) = context.normalization {
        specimen.normalize(target / 100.0);
    }
    for entry in element_list.iter_mut() {
        let f = specimen.fraction(entry.element);
        entry.percent = Some(100.0 * f);
        entry.matrix_factor = specimen.formula_fraction(entry.element).max(0.0);
        entry.total_err = (entry.rel_err_coeff.powi(2) + entry.ecf_sigma.powi(2)).sqrt();
    }

    Ok(QuantResult {
        material: specimen,
        iterations,
        converged,
        chisq,
    })
}

/// Initial composition: matrix percents where the user gave them, the
/// rest on the lightest quantified element, with a small share on every
/// other quantified element so each gets a first-pass component.
fn seed_composition(element_list: &[ElementListEntry], context: AnalysisContext) -> Material {
    let mut specimen = Material::with_iron_override(context.fe_oxide_ratio);
    let mut remaining = 1.0;
    for entry in element_list {
        if entry.qualifier == Qualifier::Matrix {
            if let Some(pct) = entry.percent {
                specimen.add_element(entry.element, pct / 100.0, entry.stoichiometry);
                remaining -= pct / 100.0;
            }
        }
    }
    let quant: Vec<&ElementListEntry> = element_list
        .iter()
        .filter(|e| {
            !matches!(
                e.qualifier,
                Qualifier::Exclude | Qualifier::Matrix | Qualifier::Output
            )
        })
        .collect();
    let lightest = quant
        .iter()
        .min_by_key(|e| e.element.atomic_number())
        .map(|e| e.element);
    let remaining = remaining.max(0.0);
    for entry in &quant {
        let f = if Some(entry.element) == lightest {
            (remaining - SEED_MINOR_FRACTION * (quant.len() - 1) as f64).max(SEED_MINOR_FRACTION)
        } else {
            SEED_MINOR_FRACTION
        };
        specimen.add_element(entry.element, f, entry.stoichiometry);
    }
    specimen
}

/// Set one element's input fraction without touching its stoichiometry.
fn set_element_fraction(specimen: &mut Material, el: Element, fraction: f64) {
    specimen.set_fraction(el, fraction);
}

/// Make the derived fractions sum to one by adjusting the matrix
/// elements, or the largest seed element when none are designated.
fn absorb_deficit(specimen: &mut Material, element_list: &[ElementListEntry]) {
    let total: f64 = specimen.element_list().map(|e| specimen.fraction(e)).sum();
    let deficit = 1.0 - total;
    if deficit.abs() < 1.0e-9 {
        return;
    }
    let matrix: Vec<Element> = element_list
        .iter()
        .filter(|e| e.qualifier == Qualifier::Matrix)
        .map(|e| e.element)
        .collect();
    if !matrix.is_empty() {
        let share = deficit / matrix.len() as f64;
        for el in matrix {
            let f = (specimen.input_fraction(el) + share).max(0.0);
            specimen.set_fraction(el, f);
        }
        return;
    }
    // No designated matrix: the element with the largest current input
    // fraction absorbs the deficit, but never below zero.
    let largest = specimen.input_elements().max_by(|a, b| {
        specimen
            .input_fraction(*a)
            .total_cmp(&specimen.input_fraction(*b))
    });
    if let Some(el) = largest {
        let f = (specimen.input_fraction(el) + deficit).max(0.0);
        specimen.set_fraction(el, f);
    }
}
