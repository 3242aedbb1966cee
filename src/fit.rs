// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Linear least-squares fitting of component amplitudes.

The design matrix columns are the enabled, fit-flagged component spectra;
the weights are the inverse measurement variances. The solve goes through
an SVD so near-degenerate component shapes (overlapping peaks) stay
stable. Optionally an energy-calibration shift and a Fano-width
correction are co-fit as finite-difference columns. The outer loop
iterates the solve, disabling components driven non-positive, until the
reduced chi-squared settles.
 */

use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::constants::{
    FIT_CHISQ_TOLERANCE, FIT_MAX_ITERATIONS, SIGMA_TO_FWHM,
};
use crate::detector::Detector;
use crate::math::convolve_gaussian;
use crate::spectrum::Spectrum;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("No components eligible for fitting")]
    NoComponents,

    #[error("Design matrix is singular after exclusions")]
    Singular,

    #[error("Energy calibration is unusable for fitting")]
    BadCalibration,
}

/// Outcome of the iterative fit of one spectrum.
#[derive(Debug, Clone, Copy)]
pub struct FitResult {
    pub chisq: f64,
    pub iterations: usize,
    pub converged: bool,
    /// A width adjustment to carry back into the detector for the next
    /// forward-model build, if one was fit.
    pub fano: Option<f64>,
}

struct LinearSolution {
    coefficients: Vec<f64>,
    variances: Vec<f64>,
    chisq: f64,
    /// Channel shift from the energy-adjust column, if present.
    shift: Option<f64>,
    /// Width-probe coefficient, in units of the probe step.
    width: Option<f64>,
}

/// Fractional Fano probe step for the width-adjust column.
const WIDTH_PROBE: f64 = 0.05;

/// One weighted linear solve over the current component selection.
fn linear_fit_once(
    spectrum: &mut Spectrum,
    with_energy_column: bool,
    width_probe_sigma_ch: Option<f64>,
) -> Result<LinearSolution, FitError> {
    let n = spectrum.num_channels();
    let indices = spectrum.fit_vector();
    if indices.is_empty() {
        return Err(FitError::NoComponents);
    }

    // Model at current coefficients, for the finite-difference columns.
    let model: Vec<f64> = {
        let mut model = vec![0.0; n];
        for &i in &indices {
            let c = &spectrum.components()[i];
            for (m, s) in model.iter_mut().zip(&c.spectrum) {
                *m += c.coefficient * s;
            }
        }
        model
    };

    let mut num_cols = indices.len();
    let energy_col = if with_energy_column {
        num_cols += 1;
        // d(model)/d(channel shift), central difference of one channel.
        let mut col = vec![0.0; n];
        for ch in 1..n - 1 {
            col[ch] = (model[ch + 1] - model[ch - 1]) / 2.0;
        }
        Some(col)
    } else {
        None
    };
    let width_col = if let Some(sigma) = width_probe_sigma_ch {
        num_cols += 1;
        let broadened = convolve_gaussian(&model, sigma * SIGMA_TO_FWHM);
        Some(
            broadened
                .iter()
                .zip(&model)
                .map(|(b, m)| b - m)
                .collect::<Vec<f64>>(),
        )
    } else {
        None
    };

    if n <= num_cols {
        return Err(FitError::Singular);
    }

    // Weighted design matrix and data vector.
    let sigma = spectrum.sigma().to_vec();
    let weights: Vec<f64> = sigma.iter().map(|s| 1.0 / s).collect();
    let mut design = DMatrix::<f64>::zeros(n, num_cols);
    for (col, &i) in indices.iter().enumerate() {
        let c = &spectrum.components()[i];
        for ch in 0..n {
            design[(ch, col)] = c.spectrum[ch] * weights[ch];
        }
    }
    let mut extra = indices.len();
    if let Some(col) = &energy_col {
        for ch in 0..n {
            design[(ch, extra)] = col[ch] * weights[ch];
        }
        extra += 1;
    }
    if let Some(col) = &width_col {
        for ch in 0..n {
            design[(ch, extra)] = col[ch] * weights[ch];
        }
    }
    let data = DVector::<f64>::from_fn(n, |ch, _| spectrum.measured()[ch] * weights[ch]);

    let svd = design.clone().svd(true, true);
    let eps = 1.0e-10 * svd.singular_values.max();
    let solution = svd.solve(&data, eps).map_err(|_| FitError::Singular)?;
    let rank = svd
        .singular_values
        .iter()
        .filter(|&&s| s > eps)
        .count();
    if rank == 0 {
        return Err(FitError::Singular);
    }

    // Covariance diagonal from V S^-2 V^T.
    let v_t = svd.v_t.as_ref().ok_or(FitError::Singular)?;
    let mut variances = vec![0.0; num_cols];
    for (i, var) in variances.iter_mut().enumerate() {
        let mut sum = 0.0;
        for (k, &s) in svd.singular_values.iter().enumerate() {
            if s > eps {
                let v_ki = v_t[(k, i)];
                sum += v_ki * v_ki / (s * s);
            }
        }
        *var = sum;
    }

    // Reduced chi-squared of the weighted residual.
    let fitted = design * &solution;
    let mut chisq = 0.0;
    for ch in 0..n {
        let r = data[ch] - fitted[ch];
        chisq += r * r;
    }
    chisq /= (n - num_cols) as f64;

    let ncomp = indices.len();
    let coefficients: Vec<f64> = (0..ncomp).map(|i| solution[i]).collect();
    let comp_variances: Vec<f64> = variances[..ncomp].to_vec();
    let mut k = ncomp;
    let shift = energy_col.as_ref().map(|_| {
        let s = solution[k];
        k += 1;
        s
    });
    let width = width_col.as_ref().map(|_| solution[k]);

    Ok(LinearSolution {
        coefficients,
        variances: comp_variances,
        chisq,
        shift,
        width,
    })
}

/// Shift every component spectrum along the channel axis by a fractional
/// number of channels (linear interpolation), matching a calibration
/// offset change so later passes stay consistent.
fn shift_components(spectrum: &mut Spectrum, shift_ch: f64) {
    if shift_ch == 0.0 {
        return;
    }
    for c in spectrum.components_mut() {
        if c.spectrum.is_empty() {
            continue;
        }
        let n = c.spectrum.len();
        let old = c.spectrum.clone();
        for (ch, v) in c.spectrum.iter_mut().enumerate() {
            let pos = ch as f64 - shift_ch;
            let lo = pos.floor();
            let frac = pos - lo;
            let lo = lo as isize;
            let a = if lo >= 0 && (lo as usize) < n {
                old[lo as usize]
            } else {
                0.0
            };
            let b = if lo + 1 >= 0 && ((lo + 1) as usize) < n {
                old[(lo + 1) as usize]
            } else {
                0.0
            };
            *v = a * (1.0 - frac) + b * frac;
        }
    }
}

/// Iterate the linear fit of one spectrum until the reduced chi-squared
/// settles. One energy-calibration shift and one width adjustment are
/// allowed per pass when the spectrum's flags ask for them.
pub fn fit_spectrum(spectrum: &mut Spectrum, detector: &Detector) -> Result<FitResult, FitError> {
    if !spectrum.calibration().good() {
        return Err(FitError::BadCalibration);
    }
    let n = spectrum.num_channels();
    let mid_energy = spectrum.calibration().energy(n as f64 / 2.0);
    let per_ch = spectrum.calibration().per_channel_at(n / 2).max(1.0e-6);
    let fwhm_ch = detector.resolution(mid_energy) / per_ch;

    let mut fano = detector.fano();
    let mut fano_adjusted = false;
    let mut chisq_old = f64::MAX;
    let mut iterations = 0;
    let mut converged = false;
    let mut total_shift = 0.0_f64;

    while iterations < FIT_MAX_ITERATIONS {
        iterations += 1;
        let adjust_energy = spectrum.adjust_energy;
        // Probe sigma in channels for a WIDTH_PROBE fractional Fano step:
        // the Fano part of FWHM^2 scales linearly with the Fano factor.
        let width_probe = if spectrum.adjust_width {
            let fano_fwhm2 = 8.0 * 2.0_f64.ln() * fano * detector.pair_energy() * mid_energy;
            let probe_sigma_ch = (fano_fwhm2 * WIDTH_PROBE).sqrt() / SIGMA_TO_FWHM / per_ch;
            (probe_sigma_ch > 0.05).then_some(probe_sigma_ch)
        } else {
            None
        };

        let solution = match linear_fit_once(spectrum, adjust_energy, width_probe) {
            Ok(s) => s,
            // Everything got disabled on an earlier pass; keep what we
            // have rather than failing the whole spectrum.
            Err(FitError::NoComponents) if iterations > 1 => {
                converged = true;
                iterations -= 1;
                break;
            }
            Err(e) => return Err(e),
        };
        let disabled = {
            let non_positive =
                spectrum.update_coefficients(&solution.coefficients, &solution.variances);
            if non_positive > 0 {
                let to_disable: Vec<usize> = spectrum
                    .components()
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| c.included && c.coefficient <= 0.0)
                    .map(|(i, _)| i)
                    .collect();
                for i in &to_disable {
                    trace!(
                        "Disabling component {} (coefficient {:.3e})",
                        spectrum.components()[*i].label(),
                        spectrum.components()[*i].coefficient
                    );
                    spectrum.disable(*i);
                }
                to_disable.len()
            } else {
                0
            }
        };

        // One energy-calibration adjustment per pass. Each step stays
        // within the one-channel range where the finite-difference column
        // is valid; the accumulated shift is bounded by a peak width.
        let mut adjusted = false;
        if let Some(shift) = solution.shift {
            let step = shift.clamp(-1.0, 1.0);
            let bounded = (total_shift + step).clamp(-fwhm_ch, fwhm_ch) - total_shift;
            if bounded.abs() > 1.0e-3 {
                total_shift += bounded;
                // The fitted coefficient is minus the channel displacement
                // of the data relative to the model.
                let offset = spectrum.calibration().offset() + bounded * per_ch;
                spectrum.calibration_mut().set_offset(offset);
                shift_components(spectrum, -bounded);
                adjusted = true;
            }
        }

        // One width adjustment per pass; a positive step broadens the
        // in-memory components, a negative one only informs the next
        // forward-model build through the returned Fano.
        if let (Some(width), Some(probe_sigma)) = (solution.width, width_probe) {
            let step = width.clamp(-2.0, 2.0);
            if step.abs() > 1.0e-3 {
                fano = (fano * (1.0 + WIDTH_PROBE * step))
                    .clamp(0.6 * detector.default_fano(), 1.4 * detector.default_fano());
                fano_adjusted = true;
                adjusted = true;
                if step > 0.0 {
                    let sigma = probe_sigma * step.sqrt();
                    for c in spectrum.components_mut() {
                        if !c.spectrum.is_empty() {
                            c.spectrum = convolve_gaussian(&c.spectrum, sigma * SIGMA_TO_FWHM);
                        }
                    }
                }
            }
        }

        spectrum.update_calc();
        spectrum.update_residual_errors();
        spectrum.set_chisq(solution.chisq);

        let delta = if chisq_old.is_finite() && chisq_old > 0.0 {
            (solution.chisq - chisq_old).abs() / chisq_old
        } else {
            f64::MAX
        };
        trace!(
            "Fit pass {iterations}: chisq {:.4} (delta {:.2e}), {disabled} disabled",
            solution.chisq,
            delta
        );
        if delta < FIT_CHISQ_TOLERANCE {
            converged = true;
            break;
        }
        if disabled == 0 && !adjusted && chisq_old != f64::MAX {
            // Nothing changed in the selection or the calibration; a
            // further pass would repeat this one exactly.
            converged = true;
            break;
        }
        chisq_old = solution.chisq;
    }

    debug!(
        "Fit finished after {iterations} passes, chisq {:.4}{}",
        spectrum.chisq(),
        if converged { "" } else { " (not converged)" }
    );
    Ok(FitResult {
        chisq: spectrum.chisq(),
        iterations,
        converged,
        fano: fano_adjusted.then_some(fano),
    })
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    use crate::energy_cal::EnergyCal;
    use crate::refdata::{Element, Series};
    use crate::spectrum::{ComponentKind, SpectrumComponent};

    use super::*;

    fn gaussian(center: f64, sigma: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| (-((i as f64 - center) / sigma).powi(2) / 2.0).exp())
            .collect()
    }

    fn detector() -> Detector {
        Detector::new(crate::detector::DetectorType::SiSdd, 150.0, 25.0, 0.5)
    }

    fn synthetic_spectrum(amp_a: f64, amp_b: f64) -> Spectrum {
        let n = 1024;
        let a = gaussian(300.0, 6.0, n);
        let b = gaussian(600.0, 7.0, n);
        let measured: Vec<f64> = a
            .iter()
            .zip(&b)
            .map(|(x, y)| amp_a * x + amp_b * y + 10.0)
            .collect();
        let mut s = Spectrum::new(measured, EnergyCal::new(0.0, 10.0));
        s.adjust_energy = false;
        s.adjust_width = false;
        s.add_component(SpectrumComponent::with_spectrum(
            ComponentKind::Element {
                element: Element::new(26).unwrap(),
                series: Series::K,
            },
            a,
        ));
        s.add_component(SpectrumComponent::with_spectrum(
            ComponentKind::Element {
                element: Element::new(20).unwrap(),
                series: Series::K,
            },
            b,
        ));
        s.add_component(SpectrumComponent::with_spectrum(
            ComponentKind::Continuum,
            vec![1.0; n],
        ));
        s
    }

    #[test]
    fn recovers_known_amplitudes() {
        let mut s = synthetic_spectrum(5000.0, 2000.0);
        let result = fit_spectrum(&mut s, &detector()).unwrap();
        assert!(result.converged);
        assert_relative_eq!(s.components()[0].coefficient, 5000.0, max_relative = 0.01);
        assert_relative_eq!(s.components()[1].coefficient, 2000.0, max_relative = 0.01);
        assert_relative_eq!(s.components()[2].coefficient, 10.0, max_relative = 0.05);
        // Variances are positive and small relative to the amplitudes.
        assert!(s.components()[0].variance > 0.0);
        assert!(s.components()[0].variance.sqrt() < 500.0);
    }

    #[test]
    fn disables_absent_component() {
        // The measured spectrum has no second peak; its component must be
        // driven non-positive and dropped, and the survivors stay
        // positive.
        let n = 1024;
        let a = gaussian(300.0, 6.0, n);
        let b = gaussian(600.0, 7.0, n);
        let measured: Vec<f64> = a.iter().map(|x| 4000.0 * x + 5.0).collect();
        let mut s = Spectrum::new(measured, EnergyCal::new(0.0, 10.0));
        s.adjust_energy = false;
        s.adjust_width = false;
        s.add_component(SpectrumComponent::with_spectrum(
            ComponentKind::Element {
                element: Element::new(26).unwrap(),
                series: Series::K,
            },
            a,
        ));
        s.add_component(SpectrumComponent::with_spectrum(
            ComponentKind::Element {
                element: Element::new(20).unwrap(),
                series: Series::K,
            },
            b,
        ));
        s.add_component(SpectrumComponent::with_spectrum(
            ComponentKind::Continuum,
            vec![1.0; n],
        ));
        fit_spectrum(&mut s, &detector()).unwrap();
        for c in s.components() {
            if c.included {
                assert!(c.coefficient > 0.0, "{} non-positive", c.label());
            }
        }
        assert!(!s.components()[1].included || s.components()[1].coefficient > 0.0);
    }

    #[test]
    fn energy_shift_recovered() {
        // Components deliberately misplaced by two channels; with energy
        // adjustment on, the calibration offset must absorb most of it.
        let n = 1024;
        let measured: Vec<f64> = gaussian(302.0, 6.0, n)
            .iter()
            .map(|x| 5000.0 * x + 10.0)
            .collect();
        let mut s = Spectrum::new(measured, EnergyCal::new(0.0, 10.0));
        s.adjust_energy = true;
        s.adjust_width = false;
        s.add_component(SpectrumComponent::with_spectrum(
            ComponentKind::Element {
                element: Element::new(26).unwrap(),
                series: Series::K,
            },
            gaussian(300.0, 6.0, n),
        ));
        s.add_component(SpectrumComponent::with_spectrum(
            ComponentKind::Continuum,
            vec![1.0; n],
        ));
        fit_spectrum(&mut s, &detector()).unwrap();
        // 2 channels at 10 eV/ch: offset near -20 eV.
        assert_abs_diff_eq!(s.calibration().offset(), -20.0, epsilon = 8.0);
    }

    #[test]
    fn zero_spectrum_gives_zero_coefficients() {
        let n = 512;
        let mut s = Spectrum::new(vec![0.0; n], EnergyCal::new(0.0, 10.0));
        s.adjust_energy = false;
        s.adjust_width = false;
        s.add_component(SpectrumComponent::with_spectrum(
            ComponentKind::Element {
                element: Element::new(26).unwrap(),
                series: Series::K,
            },
            gaussian(100.0, 5.0, n),
        ));
        let result = fit_spectrum(&mut s, &detector()).unwrap();
        // The component fits to zero and gets dropped; nothing divides by
        // zero along the way.
        assert!(s.components()[0].coefficient.abs() < 1.0e-6);
        assert!(result.chisq.is_finite());
    }

    #[test]
    fn no_components_is_an_error() {
        let mut s = Spectrum::new(vec![1.0; 128], EnergyCal::new(0.0, 10.0));
        assert!(matches!(
            fit_spectrum(&mut s, &detector()),
            Err(FitError::NoComponents)
        ));
    }

    #[test]
    fn bad_calibration_is_an_error() {
        let mut s = Spectrum::new(vec![1.0; 128], EnergyCal::new(0.0, -1.0));
        assert!(matches!(
            fit_spectrum(&mut s, &detector()),
            Err(FitError::BadCalibration)
        ));
    }
}
