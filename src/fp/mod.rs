// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The fundamental-parameters forward model.

Given a candidate composition and the instrument conditions, synthesize
the predicted spectrum as a set of labeled components: one per element and
series (primary fluorescence plus secondary enhancement), coherent and
incoherent scatter peaks for each source line, the scattered source
continuum, and pulse pileup. Each component carries its own per-channel
spectrum; the linear fitter scales them against the measurement.
 */

use log::{debug, warn};

use crate::conditions::Conditions;
use crate::constants::SIGMA_TO_FWHM;
use crate::elements::{ElementListEntry, Qualifier};
use crate::material::Material;
use crate::math::convolve_gaussian;
use crate::refdata::{Element, EmissionLine, LineCatalog, ScatterTable, Series};
use crate::spectrum::{ComponentKind, Spectrum, SpectrumComponent};

/// Number of energy samples for excitation and scatter integrals over the
/// source continuum.
const CONTINUUM_SAMPLES: usize = 200;

/// Enhancer elements below this mass fraction contribute negligible
/// secondary fluorescence and are skipped.
const ENHANCER_FRACTION_FLOOR: f64 = 1.0e-4;

/// Build all calculated components for the given composition onto the
/// spectrum, replacing whatever components of those kinds were there.
/// The spectrum furnishes the channel count, energy calibration and live
/// time; a bad calibration or live time is the caller's problem and is
/// checked up front by the quantify loop.
pub fn build_components(
    conditions: &Conditions,
    specimen: &Material,
    element_list: &[ElementListEntry],
    spectrum: &mut Spectrum,
) {
    let nchan = spectrum.num_channels();
    let cal = *spectrum.calibration();
    let live_time = spectrum.live_time().max(1.0e-6);

    // Keep only externally managed components (SNIP background).
    let kept: Vec<SpectrumComponent> = spectrum
        .components()
        .iter()
        .filter(|c| matches!(c.kind, ComponentKind::SnipBackground))
        .cloned()
        .collect();
    let mut components = kept;

    // Element emission components.
    for entry in element_list {
        if matches!(entry.qualifier, Qualifier::Exclude | Qualifier::Matrix) {
            continue;
        }
        if entry.qualifier == Qualifier::Output {
            continue;
        }
        let series = entry.quant_series();
        let catalog = LineCatalog::new(entry.element, series);
        if catalog.is_empty() {
            debug!(
                "No {series} lines for {}; skipping its component",
                entry.element
            );
            continue;
        }
        let spec =
            element_component_spectrum(conditions, specimen, &catalog, &cal, nchan, live_time);
        let mut comp = SpectrumComponent::with_spectrum(
            ComponentKind::Element {
                element: entry.element,
                series,
            },
            spec,
        );
        if entry.qualifier == Qualifier::Ignore {
            comp.quant = false;
        }
        comp.coefficient = 1.0;
        components.push(comp);
    }

    // Scatter peaks for each discrete source line.
    for line in conditions.source.lines() {
        if line.energy <= conditions.e_min || line.intensity <= 0.0 {
            continue;
        }
        let (rayleigh, compton) =
            scatter_peak_spectra(conditions, specimen, line.energy, line.intensity, &cal, nchan, live_time, spectrum.convolve_compton);
        if rayleigh.iter().sum::<f64>() > 0.0 {
            components.push(SpectrumComponent::with_spectrum(
                ComponentKind::Rayleigh {
                    source_energy: line.energy,
                },
                rayleigh,
            ));
        }
        if compton.iter().sum::<f64>() > 0.0 {
            components.push(SpectrumComponent::with_spectrum(
                ComponentKind::Compton {
                    source_energy: line.energy,
                },
                compton,
            ));
        }
    }

    // Scattered source continuum.
    let continuum = scattered_continuum_spectrum(conditions, specimen, &cal, nchan, live_time);
    if continuum.iter().sum::<f64>() > 0.0 {
        components.push(SpectrumComponent::with_spectrum(
            ComponentKind::Continuum,
            continuum,
        ));
    }

    // Pulse pileup: self-convolution of everything built so far, scaled
    // by the resolving time and the input rate squared over the rate.
    let pileup = pileup_spectrum(&components, spectrum, conditions);
    if pileup.iter().sum::<f64>() > 0.0 {
        components.push(SpectrumComponent::with_spectrum(
            ComponentKind::Pileup,
            pileup,
        ));
    }

    spectrum.reset_components(components);
    spectrum.update_calc();
}

/// Build the primary-beam components alone: the source lines and
/// continuum as they arrive at the specimen (filter, optic and incident
/// path applied), binned onto the spectrum's energy axis. Used by the
/// `primary_spectrum` sub-command for instrument diagnosis.
pub fn build_primary_components(conditions: &Conditions, spectrum: &mut Spectrum) {
    let nchan = spectrum.num_channels();
    let cal = *spectrum.calibration();
    let mut lines = vec![0.0; nchan];
    for line in conditions.source.lines() {
        let intensity = line.intensity
            * conditions.filter.transmission(line.energy, 1.0)
            * conditions.optic.transmission(line.energy)
            * conditions.incident_path.transmission(line.energy, 1.0);
        deposit(&mut lines, &cal, line.energy, intensity, 0.0);
    }
    let mut continuum = vec![0.0; nchan];
    for ch in 0..nchan {
        let e = cal.energy_of(ch);
        let width = cal.per_channel_at(ch);
        let s = conditions.source.continuum(e) * width;
        if s > 0.0 {
            continuum[ch] = s
                * conditions.filter.transmission(e, 1.0)
                * conditions.optic.transmission(e)
                * conditions.incident_path.transmission(e, 1.0);
        }
    }
    let mut line_comp = SpectrumComponent::with_spectrum(ComponentKind::PrimaryLines, lines);
    line_comp.enabled = true;
    let mut cont_comp =
        SpectrumComponent::with_spectrum(ComponentKind::PrimaryContinuum, continuum);
    cont_comp.enabled = true;
    spectrum.reset_components(vec![line_comp, cont_comp]);
    spectrum.update_calc();
}

/// Primary plus secondary intensity for every line of one element's
/// series, synthesized through the detector response.
fn element_component_spectrum(
    conditions: &Conditions,
    specimen: &Material,
    catalog: &LineCatalog,
    cal: &crate::energy_cal::EnergyCal,
    nchan: usize,
    live_time: f64,
) -> Vec<f64> {
    let mut out = vec![0.0; nchan];
    for line in catalog.lines() {
        let counts = line_intensity(conditions, specimen, catalog, line, live_time);
        if counts <= 0.0 || !counts.is_finite() {
            if !counts.is_finite() {
                warn!(
                    "Non-finite intensity for {} {} line; set to zero",
                    catalog.element(),
                    line.tag
                );
            }
            continue;
        }
        let profile = conditions
            .detector
            .line_profile(line.energy, cal, nchan, conditions.e_min);
        for (o, p) in out.iter_mut().zip(&profile) {
            *o += counts * p;
        }
    }
    out
}

/// Detected counts for one emission line of one element (Sherman
/// equation), integrated over the exciting spectrum.
fn line_intensity(
    conditions: &Conditions,
    specimen: &Material,
    catalog: &LineCatalog,
    line: &EmissionLine,
    live_time: f64,
) -> f64 {
    let element = catalog.element();
    let w = specimen.fraction(element);
    if w <= 0.0 {
        return 0.0;
    }
    let edge_energy = element.edge_energy(line.edge);
    if edge_energy <= 0.0 || line.energy <= conditions.e_min {
        return 0.0;
    }
    let table = match specimen.xsect_table(element) {
        Some(t) => t,
        None => return 0.0,
    };
    let fluor = catalog.fluor_yield();
    let rel_norm: f64 = catalog.lines().iter().map(|l| l.relative).sum();
    let line_prob = line.relative / rel_norm.max(1.0e-12);

    let mu_out = specimen.cross_section(line.energy);
    let chi_out = mu_out * conditions.emerg_csc;
    let rho_t = specimen.mass_thickness();

    // Excitation integral over the source: discrete lines plus sampled
    // continuum, all attenuated by filter, optic and incident path.
    let mut excitation = 0.0;
    let mut excite = |exc_energy: f64, source_intensity: f64| {
        if exc_energy <= edge_energy || source_intensity <= 0.0 {
            return;
        }
        let incident = source_intensity
            * conditions.filter.transmission(exc_energy, 1.0)
            * conditions.optic.transmission(exc_energy)
            * conditions.incident_path.transmission(exc_energy, 1.0);
        if incident <= 0.0 {
            return;
        }
        let tau_shell = table.photo_shell(exc_energy, line.edge) * w;
        let chi_in = specimen.cross_section(exc_energy) * conditions.excit_csc;
        let absorb = absorption_layer_term(chi_in, chi_out, rho_t);
        let secondary =
            secondary_enhancement(specimen, element, line, exc_energy, chi_in, chi_out);
        excitation += incident * tau_shell * absorb * (1.0 + secondary);
    };

    for src_line in conditions.source.lines() {
        excite(src_line.energy, src_line.intensity);
    }
    let e_max = conditions.source.max_energy();
    if e_max > edge_energy {
        let de = (e_max - edge_energy) / CONTINUUM_SAMPLES as f64;
        for i in 0..CONTINUUM_SAMPLES {
            let e = edge_energy + (i as f64 + 0.5) * de;
            excite(e, conditions.source.continuum(e) * de);
        }
    }

    excitation
        * fluor
        * line_prob
        * conditions.solid_angle_source
        * conditions.geometry_factor
        * emergent_chain(conditions, line.energy)
        * live_time
}

/// The Sherman thick/thin-layer absorption term.
fn absorption_layer_term(chi_in: f64, chi_out: f64, rho_t: f64) -> f64 {
    let chi = chi_in + chi_out;
    if chi <= 0.0 {
        return 0.0;
    }
    if rho_t <= 0.0 {
        // Semi-infinite specimen.
        1.0 / chi
    } else {
        (1.0 - (-chi * rho_t).exp()) / chi
    }
}

/// Everything between the specimen surface and a detected count.
fn emergent_chain(conditions: &Conditions, energy: f64) -> f64 {
    conditions.window.transmission(energy, 1.0)
        * conditions.emergent_path.transmission(energy, 1.0)
        * conditions.solid_angle_detector
        * conditions.detector.response(energy)
}

/// Secondary-fluorescence enhancement ratio: enhancer lines above the
/// analyte edge re-excite it from within the specimen.
fn secondary_enhancement(
    specimen: &Material,
    analyte: Element,
    analyte_line: &EmissionLine,
    exc_energy: f64,
    chi_in: f64,
    chi_out: f64,
) -> f64 {
    let analyte_edge = analyte.edge_energy(analyte_line.edge);
    let analyte_table = match specimen.xsect_table(analyte) {
        Some(t) => t,
        None => return 0.0,
    };
    let tau_analyte_exc = analyte_table.photo_shell(exc_energy, analyte_line.edge);
    if tau_analyte_exc <= 0.0 {
        return 0.0;
    }
    let mut total = 0.0;
    for enhancer in specimen.element_list() {
        if enhancer == analyte {
            continue;
        }
        let w_j = specimen.fraction(enhancer);
        if w_j < ENHANCER_FRACTION_FLOOR {
            continue;
        }
        let enh_table = match specimen.xsect_table(enhancer) {
            Some(t) => t,
            None => continue,
        };
        for series in [Series::K, Series::L] {
            let cat = LineCatalog::new(enhancer, series);
            for line_j in cat.lines() {
                if line_j.energy <= analyte_edge {
                    continue;
                }
                let edge_j = enhancer.edge_energy(line_j.edge);
                if exc_energy <= edge_j {
                    continue;
                }
                // Production of the enhancer line per incident photon.
                let q_j = enh_table.photo_shell(exc_energy, line_j.edge)
                    * w_j
                    * cat.fluor_yield()
                    * line_j.relative;
                if q_j <= 0.0 {
                    continue;
                }
                // Re-absorption by the analyte shell, relative to direct
                // excitation.
                let tau_analyte_j = analyte_table.photo_shell(line_j.energy, analyte_line.edge);
                let mu_j = specimen.cross_section(line_j.energy);
                if mu_j <= 0.0 {
                    continue;
                }
                let l_term = (1.0 + chi_in / mu_j).ln() / chi_in.max(1.0e-12)
                    + (1.0 + chi_out / mu_j).ln() / chi_out.max(1.0e-12);
                total += 0.5 * q_j * (tau_analyte_j / tau_analyte_exc) * l_term;
            }
        }
    }
    total
}

/// Rayleigh and Compton peaks from one source line scattering off the
/// specimen. The Compton peak carries extra momentum broadening; when
/// requested it is additionally convolved with the detector resolution.
#[allow(clippy::too_many_arguments)]
fn scatter_peak_spectra(
    conditions: &Conditions,
    specimen: &Material,
    source_energy: f64,
    source_intensity: f64,
    cal: &crate::energy_cal::EnergyCal,
    nchan: usize,
    live_time: f64,
    convolve_compton: bool,
) -> (Vec<f64>, Vec<f64>) {
    let theta = conditions.scatter_angle;
    let incident = source_intensity
        * conditions.filter.transmission(source_energy, 1.0)
        * conditions.optic.transmission(source_energy)
        * conditions.incident_path.transmission(source_energy, 1.0)
        * conditions.solid_angle_source
        * conditions.geometry_factor;

    // Rayleigh: elastic, at the source energy.
    let mu_in = specimen.cross_section(source_energy) * conditions.excit_csc;
    let mu_out_r = specimen.cross_section(source_energy) * conditions.emerg_csc;
    let rho_t = specimen.mass_thickness();
    let rayleigh_counts = incident
        * specimen.coherent(source_energy, theta)
        * absorption_layer_term(mu_in, mu_out_r, rho_t)
        * emergent_chain(conditions, source_energy)
        * live_time;
    let rayleigh = if rayleigh_counts > 0.0 {
        let profile =
            conditions
                .detector
                .line_profile(source_energy, cal, nchan, conditions.e_min);
        profile.iter().map(|p| p * rayleigh_counts).collect()
    } else {
        vec![0.0; nchan]
    };

    // Compton: shifted and momentum-broadened.
    let compton_energy = ScatterTable::compton_energy(source_energy, theta);
    let mu_out_c = specimen.cross_section(compton_energy) * conditions.emerg_csc;
    let compton_counts = incident
        * specimen.incoherent(source_energy, theta)
        * absorption_layer_term(mu_in, mu_out_c, rho_t)
        * emergent_chain(conditions, compton_energy)
        * live_time;
    let compton = if compton_counts > 0.0 {
        let mut profile = broadened_peak(
            conditions,
            compton_energy,
            ScatterTable::compton_width(source_energy, theta),
            cal,
            nchan,
        );
        if convolve_compton {
            let per_ch = cal.per_channel_at(cal.channel_of(compton_energy)).max(1.0e-6);
            let det_fwhm_ch = conditions.detector.resolution(compton_energy) / per_ch;
            profile = convolve_gaussian(&profile, det_fwhm_ch);
        }
        profile.iter().map(|p| p * compton_counts).collect()
    } else {
        vec![0.0; nchan]
    };

    (rayleigh, compton)
}

/// A Gaussian peak whose width is the detector resolution with an extra
/// broadening folded in quadrature.
fn broadened_peak(
    conditions: &Conditions,
    energy: f64,
    extra_fwhm_ev: f64,
    cal: &crate::energy_cal::EnergyCal,
    nchan: usize,
) -> Vec<f64> {
    let mut out = vec![0.0; nchan];
    if energy <= 0.0 || !cal.good() {
        return out;
    }
    let det_fwhm = conditions.detector.resolution(energy);
    let fwhm_ev = (det_fwhm * det_fwhm + extra_fwhm_ev * extra_fwhm_ev).sqrt();
    let center = cal.channel(energy);
    let per_ch = cal.per_channel_at(center.max(0.0) as usize).max(1.0e-6);
    let sigma_ch = fwhm_ev / SIGMA_TO_FWHM / per_ch;
    let norm = 1.0 / (sigma_ch * (2.0 * crate::constants::PI).sqrt());
    let reach = (5.0 * sigma_ch).ceil() as isize;
    let c = center.round() as isize;
    for ch in (c - reach).max(0)..=(c + reach).min(nchan as isize - 1) {
        let e_ch = cal.energy(ch as f64);
        if e_ch < conditions.e_min {
            continue;
        }
        let d = ch as f64 - center;
        out[ch as usize] = norm * (-d * d / (2.0 * sigma_ch * sigma_ch)).exp();
    }
    out
}

/// The source continuum scattered off the specimen into the detector,
/// both branches, accumulated per channel.
fn scattered_continuum_spectrum(
    conditions: &Conditions,
    specimen: &Material,
    cal: &crate::energy_cal::EnergyCal,
    nchan: usize,
    live_time: f64,
) -> Vec<f64> {
    let mut out = vec![0.0; nchan];
    if specimen.is_empty() || !cal.good() {
        return out;
    }
    let theta = conditions.scatter_angle;
    let e_max = conditions.source.max_energy();
    let rho_t = specimen.mass_thickness();
    let de = (e_max - conditions.e_min).max(0.0) / CONTINUUM_SAMPLES as f64;
    if de <= 0.0 {
        return out;
    }
    for i in 0..CONTINUUM_SAMPLES {
        let e_src = conditions.e_min + (i as f64 + 0.5) * de;
        let s = conditions.source.continuum(e_src) * de;
        if s <= 0.0 {
            continue;
        }
        let incident = s
            * conditions.filter.transmission(e_src, 1.0)
            * conditions.optic.transmission(e_src)
            * conditions.incident_path.transmission(e_src, 1.0)
            * conditions.solid_angle_source
            * conditions.geometry_factor;
        if incident <= 0.0 {
            continue;
        }
        let mu_in = specimen.cross_section(e_src) * conditions.excit_csc;

        // Coherent branch stays at the source energy.
        let coh_counts = incident
            * specimen.coherent(e_src, theta)
            * absorption_layer_term(mu_in, specimen.cross_section(e_src) * conditions.emerg_csc, rho_t)
            * emergent_chain(conditions, e_src)
            * live_time;
        deposit(&mut out, cal, e_src, coh_counts, conditions.e_min);

        // Incoherent branch arrives Compton shifted.
        let e_compton = ScatterTable::compton_energy(e_src, theta);
        let inc_counts = incident
            * specimen.incoherent(e_src, theta)
            * absorption_layer_term(
                mu_in,
                specimen.cross_section(e_compton) * conditions.emerg_csc,
                rho_t,
            )
            * emergent_chain(conditions, e_compton)
            * live_time;
        deposit(&mut out, cal, e_compton, inc_counts, conditions.e_min);
    }

    // One detector-resolution convolution smooths the sampled continuum.
    let mid = cal.energy(nchan as f64 / 2.0);
    let per_ch = cal.per_channel_at(nchan / 2).max(1.0e-6);
    let fwhm_ch = conditions.detector.resolution(mid) / per_ch;
    convolve_gaussian(&out, fwhm_ch)
}

/// Spread counts into the channel containing the energy.
fn deposit(out: &mut [f64], cal: &crate::energy_cal::EnergyCal, energy: f64, counts: f64, e_min: f64) {
    if counts <= 0.0 || !counts.is_finite() || energy < e_min {
        return;
    }
    let ch = cal.channel(energy);
    if ch < 0.0 {
        return;
    }
    let i = ch as usize;
    if i < out.len() {
        out[i] += counts;
    }
}

/// Pulse pileup as self-convolution of the calculated spectrum, scaled by
/// the pulse resolving time and the input count rate.
fn pileup_spectrum(
    components: &[SpectrumComponent],
    spectrum: &Spectrum,
    conditions: &Conditions,
) -> Vec<f64> {
    let nchan = spectrum.num_channels();
    let live_time = spectrum.live_time();
    let resolving = conditions.detector.pulse_resolving_time();
    if live_time <= 0.0 || resolving <= 0.0 || nchan == 0 {
        return vec![0.0; nchan];
    }
    let mut calc = vec![0.0; nchan];
    for c in components {
        if !c.enabled || c.spectrum.len() != nchan || c.bkg {
            continue;
        }
        for (o, v) in calc.iter_mut().zip(&c.spectrum) {
            *o += c.coefficient * v;
        }
    }
    let total: f64 = calc.iter().sum();
    if total <= 0.0 {
        return vec![0.0; nchan];
    }
    // Probability that a second photon lands within the resolving time.
    let rate = total / live_time;
    let scale = resolving * rate * rate * live_time / (total * total);

    let mut out = vec![0.0; nchan];
    // Self-convolution; bounded cost because nchan is a few thousand and
    // this runs once per forward-model build.
    for i in 0..nchan {
        if calc[i] <= 0.0 {
            continue;
        }
        for j in i..nchan {
            let k = i + j;
            if k >= nchan {
                break;
            }
            let v = calc[i] * calc[j] * if i == j { 1.0 } else { 2.0 };
            out[k] += v;
        }
    }
    for o in out.iter_mut() {
        *o *= scale;
    }
    out
}

#[cfg(test)]
mod tests;
