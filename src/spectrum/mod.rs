// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The spectrum container: measured counts with their sigmas, the background,
calculated and residual arrays, the energy calibration, and the list of
components the fit works on. Components are owned by their spectrum and
never shared.
 */

mod component;

pub use component::{ComponentKind, SpectrumComponent};

use crate::constants::{REGION_COUNTS_END_EV, REGION_COUNTS_START_EV};
use crate::energy_cal::EnergyCal;
use crate::refdata::Element;

/// Spectrum information not related to the analysis, carried through from
/// the input file to the outputs.
#[derive(Debug, Clone, Default)]
pub struct AuxInfo {
    pub date: String,
    pub time: String,
    pub titles: Vec<String>,
    pub comments: Vec<String>,
    pub owner: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub i: f64,
    pub j: f64,
    pub sclk: u32,
    pub rtt: u32,
    pub usn: u32,
    pub dpc: u32,
    pub pmc: u32,
    pub det_id: String,
}

/// Statistics registers from the digital pulse processor.
#[derive(Debug, Clone, Default)]
pub struct HeaderInfo {
    /// Fast-channel live time, not compensated for throughput.
    pub live_time_dspc: f64,
    pub events: i64,
    pub triggers: i64,
    pub overflows: i64,
    pub underflows: i64,
    pub baseline_samples: i64,
    pub preamp_resets: i64,
    pub saturates: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Spectrum {
    measured: Vec<f64>,
    sigma: Vec<f64>,
    background: Vec<f64>,
    net: Vec<f64>,
    calc: Vec<f64>,
    residual: Vec<f64>,
    max_value: Vec<f64>,
    live_time: f64,
    real_time: f64,
    geometry: f64,
    total_counts: f64,
    region_start_ev: f64,
    region_end_ev: f64,
    calibration: EnergyCal,
    components: Vec<SpectrumComponent>,
    chisq: f64,
    /// Indices of the components included in the last fit, in design
    /// matrix column order.
    fit_indices: Vec<usize>,
    pub aux_info: AuxInfo,
    pub header_info: HeaderInfo,
    pub file_name: String,
    pub seq_number: usize,
    pub iterations: usize,
    pub adjust_energy: bool,
    pub adjust_width: bool,
    pub convolve_compton: bool,
    /// SNIP parameter vectors from the `-b`, `-bh` and `-bx` options.
    pub bkg_params: Vec<f64>,
    pub bh_params: Vec<f64>,
    pub bx_params: Vec<f64>,
    pub bkg_split: Vec<f64>,
    /// Standard names this spectrum belongs to, so evaluate can exclude a
    /// standard from its own calibration.
    pub std_names: Vec<String>,
}

impl Spectrum {
    pub fn new(measured: Vec<f64>, calibration: EnergyCal) -> Spectrum {
        let mut s = Spectrum {
            calibration,
            region_start_ev: REGION_COUNTS_START_EV,
            region_end_ev: REGION_COUNTS_END_EV,
            adjust_energy: true,
            adjust_width: true,
            convolve_compton: false,
            ..Spectrum::default()
        };
        s.set_measured(measured);
        s
    }

    pub fn from_counts(measured: Vec<f64>) -> Spectrum {
        Spectrum::new(measured, EnergyCal::default())
    }

    pub fn num_channels(&self) -> usize {
        self.measured.len()
    }

    pub fn measured(&self) -> &[f64] {
        &self.measured
    }

    pub fn sigma(&self) -> &[f64] {
        &self.sigma
    }

    pub fn background(&self) -> &[f64] {
        &self.background
    }

    pub fn net(&self) -> &[f64] {
        &self.net
    }

    pub fn calc(&self) -> &[f64] {
        &self.calc
    }

    pub fn residual(&self) -> &[f64] {
        &self.residual
    }

    pub fn max_value(&self) -> &[f64] {
        &self.max_value
    }

    pub fn set_max_value(&mut self, max_value: Vec<f64>) {
        self.max_value = max_value;
    }

    pub fn live_time(&self) -> f64 {
        self.live_time
    }

    pub fn set_live_time(&mut self, live_time: f64) {
        self.live_time = live_time;
    }

    pub fn real_time(&self) -> f64 {
        self.real_time
    }

    pub fn set_real_time(&mut self, real_time: f64) {
        self.real_time = real_time;
    }

    pub fn geometry(&self) -> f64 {
        self.geometry
    }

    pub fn set_geometry(&mut self, geometry: f64) {
        self.geometry = geometry;
    }

    pub fn total_counts(&self) -> f64 {
        self.total_counts
    }

    pub fn chisq(&self) -> f64 {
        self.chisq
    }

    pub fn set_chisq(&mut self, chisq: f64) {
        self.chisq = chisq;
    }

    pub fn calibration(&self) -> &EnergyCal {
        &self.calibration
    }

    pub fn calibration_mut(&mut self) -> &mut EnergyCal {
        &mut self.calibration
    }

    /// Replace the calibration, but never with a bad one.
    pub fn set_calibration(&mut self, cal: EnergyCal) {
        if cal.good() {
            self.calibration = cal;
        }
    }

    pub fn energy_of(&self, channel: usize) -> f64 {
        self.calibration.energy_of(channel)
    }

    /// Counts in the reporting region (1 to 7.25 keV by default). Uses
    /// the calculation when the measurement is empty of counts, so
    /// calculated-only spectra still report something useful.
    pub fn region_counts(&self) -> f64 {
        let data = if self.total_counts > 0.0 {
            &self.measured
        } else {
            &self.calc
        };
        if !self.calibration.good() {
            return 0.0;
        }
        data.iter()
            .enumerate()
            .filter(|(ch, _)| {
                let e = self.calibration.energy_of(*ch);
                e >= self.region_start_ev && e <= self.region_end_ev
            })
            .map(|(_, v)| v)
            .sum()
    }

    pub fn set_region(&mut self, start_ev: f64, end_ev: f64) {
        self.region_start_ev = start_ev;
        self.region_end_ev = end_ev;
    }

    fn set_measured(&mut self, measured: Vec<f64>) {
        self.total_counts = measured.iter().sum();
        self.sigma = measured
            .iter()
            .map(|&c| (c + 2.0).max(2.0).sqrt())
            .collect();
        let n = measured.len();
        self.measured = measured;
        self.background = vec![0.0; n];
        self.net = self.measured.clone();
        self.calc = vec![0.0; n];
        self.residual = vec![0.0; n];
    }

    /// Replace the background with an externally computed estimate (the
    /// SNIP path when no background component is in the fit).
    pub fn set_background(&mut self, background: Vec<f64>) {
        if background.len() == self.measured.len() {
            self.background = background;
            self.update_net();
        }
    }

    fn update_net(&mut self) {
        for ((n, m), b) in self
            .net
            .iter_mut()
            .zip(&self.measured)
            .zip(&self.background)
        {
            *n = m - b;
        }
    }

    // ---- components ----

    pub fn components(&self) -> &[SpectrumComponent] {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut [SpectrumComponent] {
        &mut self.components
    }

    pub fn add_component(&mut self, component: SpectrumComponent) {
        self.components.push(component);
    }

    /// Replace the whole component list (the forward model rebuilds it on
    /// every composition iteration).
    pub fn reset_components(&mut self, components: Vec<SpectrumComponent>) {
        self.components = components;
        self.fit_indices.clear();
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    /// Index of the component that quantifies this element.
    pub fn quant_component_index(&self, el: Element) -> Option<usize> {
        self.components
            .iter()
            .position(|c| c.quant && c.kind.element() == Some(el))
    }

    pub fn coefficient(&self, el: Element) -> Option<f64> {
        self.quant_component_index(el)
            .map(|i| self.components[i].coefficient)
    }

    /// Stage an adjusted coefficient for this element's quant component.
    pub fn set_adjusted_coefficient(&mut self, el: Element, value: f64) {
        if let Some(i) = self.quant_component_index(el) {
            self.components[i].adjusted_coefficient = value;
        }
    }

    /// Move staged coefficients into the live ones so the next fit starts
    /// from the updated composition.
    pub fn adjust_coefficients(&mut self) {
        for c in &mut self.components {
            if c.fit {
                c.coefficient = c.adjusted_coefficient;
            }
        }
    }

    /// Unity coefficients for everything participating in the fit.
    pub fn reset_coefficients(&mut self) {
        for c in &mut self.components {
            if c.fit {
                c.coefficient = 1.0;
                c.adjusted_coefficient = 1.0;
            }
        }
    }

    /// Remove this element's quant component from the fit. It stays in the
    /// component list, disabled, so plots can still show it.
    pub fn disable_element(&mut self, el: Element) {
        if let Some(i) = self.quant_component_index(el) {
            self.components[i].fit = false;
            self.components[i].enabled = false;
        }
    }

    pub fn disable(&mut self, index: usize) {
        if let Some(c) = self.components.get_mut(index) {
            c.fit = false;
            c.enabled = false;
        }
    }

    pub fn enable(&mut self, index: usize) {
        if let Some(c) = self.components.get_mut(index) {
            c.fit = true;
            c.enabled = true;
        }
    }

    /// Sum enabled components into the calculation, enabled background
    /// components into the background, and refresh net, residual and
    /// per-component intensities. Call after any coefficient change.
    pub fn update_calc(&mut self) {
        let n = self.measured.len();
        self.calc = vec![0.0; n];
        self.background = vec![0.0; n];
        self.update_non_fit_coefficients();
        for c in &mut self.components {
            c.update_intensity();
            if !c.enabled || c.spectrum.len() != n {
                continue;
            }
            for (i, v) in c.spectrum.iter().enumerate() {
                let scaled = c.coefficient * v;
                self.calc[i] += scaled;
                if c.bkg {
                    self.background[i] += scaled;
                }
            }
        }
        self.update_net();
        for ((r, m), c) in self
            .residual
            .iter_mut()
            .zip(&self.measured)
            .zip(&self.calc)
        {
            *r = m - c;
        }
    }

    /// Components that are not free parameters follow the coefficient of
    /// the matching fit component, scaled by their non-fit factor. The
    /// optic-response and escape components ride along with the whole
    /// calculation and just keep their own coefficient.
    fn update_non_fit_coefficients(&mut self) {
        let continuum_coeff = self
            .components
            .iter()
            .find(|c| matches!(c.kind, ComponentKind::Continuum) && c.fit)
            .map(|c| c.coefficient);
        for c in &mut self.components {
            if c.fit || !c.enabled {
                continue;
            }
            if let (ComponentKind::DetectorComptonEscape, Some(cc)) =
                (&c.kind, continuum_coeff)
            {
                c.coefficient = c.non_fit_factor * cc;
            }
        }
    }

    /// Columns for the linear fit: every enabled, fit component whose
    /// spectrum is full length with a positive, non-negligible sum.
    /// Records the selection so the coefficients can be mapped back.
    pub fn fit_vector(&mut self) -> Vec<usize> {
        let n = self.measured.len();
        let largest = self
            .components
            .iter()
            .filter(|c| c.enabled && c.fit && c.spectrum.len() == n)
            .map(|c| c.spectrum_sum())
            .fold(0.0_f64, f64::max);
        let floor = crate::constants::COMPONENT_SUM_RATIO_FLOOR * largest;
        let mut indices = vec![];
        for (i, c) in self.components.iter_mut().enumerate() {
            let sum = c.spectrum_sum();
            let ok = c.enabled
                && c.fit
                && c.spectrum.len() == n
                && sum.is_finite()
                && sum > 0.0
                && sum > floor;
            c.included = ok;
            if ok {
                indices.push(i);
            }
        }
        self.fit_indices = indices.clone();
        indices
    }

    /// Take the fitted coefficients and variances back into the included
    /// components. Returns the number of components driven non-positive
    /// (which the caller disables for the next pass).
    pub fn update_coefficients(&mut self, coefficients: &[f64], variances: &[f64]) -> usize {
        let mut non_positive = 0;
        let indices = self.fit_indices.clone();
        for (k, &i) in indices.iter().enumerate() {
            let c = &mut self.components[i];
            c.coefficient = coefficients.get(k).copied().unwrap_or(0.0);
            c.variance = variances.get(k).copied().unwrap_or(0.0);
            if c.coefficient <= 0.0 {
                non_positive += 1;
            }
        }
        non_positive
    }

    /// Per-component residual error, weighted by the component's own
    /// profile.
    pub fn update_residual_errors(&mut self) {
        let residual = self.residual.clone();
        for c in &mut self.components {
            if !c.included || c.spectrum.is_empty() {
                continue;
            }
            let num: f64 = residual
                .iter()
                .zip(&c.spectrum)
                .map(|(r, s)| r.abs() * s)
                .sum();
            let den: f64 = c.spectrum.iter().map(|s| s * s).sum();
            c.residual_error = if den > 0.0 { num / den } else { 0.0 };
        }
    }

    /// Drop the per-component spectra to reclaim memory once coefficients
    /// have been recorded.
    pub fn clean(&mut self) {
        for c in &mut self.components {
            c.spectrum = vec![];
            c.spectrum.shrink_to_fit();
        }
    }

    /// Keep only the measured data and calibration.
    pub fn reset(&mut self) {
        let measured = std::mem::take(&mut self.measured);
        let calibration = self.calibration;
        let file_name = std::mem::take(&mut self.file_name);
        let live_time = self.live_time;
        let real_time = self.real_time;
        *self = Spectrum::new(measured, calibration);
        self.file_name = file_name;
        self.live_time = live_time;
        self.real_time = real_time;
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::refdata::Series;

    use super::*;

    fn el(z: u32) -> Element {
        Element::new(z).unwrap()
    }

    fn two_component_spectrum() -> Spectrum {
        let mut s = Spectrum::new(vec![10.0; 8], EnergyCal::new(0.0, 10.0));
        let mut a = SpectrumComponent::with_spectrum(
            ComponentKind::Element {
                element: el(26),
                series: Series::K,
            },
            vec![1.0; 8],
        );
        a.coefficient = 2.0;
        s.add_component(a);
        let mut b =
            SpectrumComponent::with_spectrum(ComponentKind::SnipBackground, vec![5.0; 8]);
        b.coefficient = 1.0;
        s.add_component(b);
        s
    }

    #[test]
    fn sigma_floor() {
        let s = Spectrum::from_counts(vec![0.0, 2.0, 100.0]);
        assert_abs_diff_eq!(s.sigma()[0], 2.0_f64.sqrt());
        assert_abs_diff_eq!(s.sigma()[1], 2.0);
        assert_abs_diff_eq!(s.sigma()[2], 102.0_f64.sqrt());
    }

    #[test]
    fn update_calc_background_and_net() {
        let mut s = two_component_spectrum();
        s.update_calc();
        // calc = 2*1 + 1*5 = 7; background = 5; net = 10 - 5 = 5.
        assert_abs_diff_eq!(s.calc()[3], 7.0);
        assert_abs_diff_eq!(s.background()[3], 5.0);
        assert_abs_diff_eq!(s.net()[3], 5.0);
        assert_abs_diff_eq!(s.residual()[3], 3.0);
        // Intensities follow coefficients.
        assert_abs_diff_eq!(s.components()[0].intensity, 16.0);
    }

    #[test]
    fn fit_vector_excludes_empty_and_tiny() {
        let mut s = two_component_spectrum();
        // A zero-sum component and a negligible one.
        s.add_component(SpectrumComponent::with_spectrum(
            ComponentKind::Continuum,
            vec![0.0; 8],
        ));
        s.add_component(SpectrumComponent::with_spectrum(
            ComponentKind::Pileup,
            vec![1.0e-14; 8],
        ));
        let indices = s.fit_vector();
        // Only the element component qualifies: SNIP is not a fit
        // component, the others fail the sum tests.
        assert_eq!(indices, vec![0]);
        assert!(s.components()[0].included);
        assert!(!s.components()[2].included);
        assert!(!s.components()[3].included);
    }

    #[test]
    fn update_coefficients_counts_non_positive() {
        let mut s = two_component_spectrum();
        let mut extra = SpectrumComponent::with_spectrum(
            ComponentKind::Compton {
                source_energy: 20_000.0,
            },
            vec![2.0; 8],
        );
        extra.coefficient = 1.0;
        s.add_component(extra);
        s.fit_vector();
        let n = s.update_coefficients(&[1.5, -0.2], &[0.01, 0.02]);
        assert_eq!(n, 1);
        assert_abs_diff_eq!(s.components()[0].coefficient, 1.5);
        assert_abs_diff_eq!(s.components()[2].coefficient, -0.2);
    }

    #[test]
    fn quant_component_lookup_unique() {
        let s = two_component_spectrum();
        assert_eq!(s.quant_component_index(el(26)), Some(0));
        assert_eq!(s.quant_component_index(el(20)), None);
    }

    #[test]
    fn clean_and_reset() {
        let mut s = two_component_spectrum();
        s.set_live_time(120.0);
        s.update_calc();
        s.clean();
        assert!(s.components().iter().all(|c| c.spectrum.is_empty()));
        // Intensity survives cleaning.
        assert!(s.components()[0].intensity > 0.0);

        let cal_before = *s.calibration();
        s.reset();
        assert_eq!(s.num_components(), 0);
        assert_eq!(s.num_channels(), 8);
        assert_eq!(*s.calibration(), cal_before);
        assert_abs_diff_eq!(s.live_time(), 120.0);
    }

    #[test]
    fn zero_counts_spectrum_uses_calc_for_region() {
        let mut s = Spectrum::new(vec![0.0; 1000], EnergyCal::new(0.0, 10.0));
        assert_eq!(s.total_counts(), 0.0);
        let mut c =
            SpectrumComponent::with_spectrum(ComponentKind::Continuum, vec![1.0; 1000]);
        c.coefficient = 1.0;
        s.add_component(c);
        s.update_calc();
        // Region 1000-7250 eV is channels 100..=725.
        assert_abs_diff_eq!(s.region_counts(), 626.0);
    }
}
