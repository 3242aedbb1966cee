// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Energy-dispersive detector model.

Resolution is electronic noise plus Fano broadening. The full response to
a monoenergetic line is a Gaussian peak plus an exponential incomplete
charge-collection tail, an electron-loss shelf (Scholze-Procop style, with
separate active-volume and front-contact contributions), and discrete
escape peaks. Compton escape can be switched on but is off by default;
the front-contact shelf is on by default with a 150 nm contact.
 */

use strum_macros::{Display, EnumIter, EnumString};

use crate::constants::{MM_TO_CM, NM_TO_CM, RESOLUTION_REFERENCE_ENERGY, SIGMA_TO_FWHM, UM_TO_CM};
use crate::energy_cal::EnergyCal;
use crate::material::{Material, Stoichiometry};
use crate::refdata::{EdgeLevel, Element, LineCatalog, Series};

/// Front contact thickness: 150 nanometers, from Scholze and Procop
/// Table 1.
const CONTACT_THICKNESS_CM: f64 = 150.0 * NM_TO_CM;

/// Default multiplicative factor on the overall shelf size.
const SHELF_FACTOR: f64 = 1.0;
const SHELF_SLOPE: f64 = 0.0;
const SHELF_SLOPE_START: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum DetectorType {
    #[strum(serialize = "SiPIN")]
    SiPin,
    #[strum(serialize = "SiSDD")]
    SiSdd,
    #[strum(serialize = "CdTe")]
    CdTe,
    #[strum(serialize = "HPGe")]
    HpGe,
}

impl DetectorType {
    fn fano(&self) -> f64 {
        match self {
            DetectorType::SiPin | DetectorType::SiSdd => 0.115,
            DetectorType::CdTe => 0.15,
            DetectorType::HpGe => 0.13,
        }
    }

    fn pair_energy(&self) -> f64 {
        match self {
            DetectorType::SiPin | DetectorType::SiSdd => 3.81,
            DetectorType::CdTe => 4.43,
            DetectorType::HpGe => 2.96,
        }
    }

    fn active_element(&self) -> Element {
        let z = match self {
            DetectorType::SiPin | DetectorType::SiSdd => 14,
            // The dataset treats CdTe absorption via its heavier half.
            DetectorType::CdTe => 52,
            DetectorType::HpGe => 32,
        };
        Element::new(z).expect("detector elements are in the dataset")
    }
}

/// One escape peak of a parent line.
#[derive(Debug, Clone, Copy)]
pub struct EscapeLine {
    pub energy: f64,
    pub fraction: f64,
}

#[derive(Debug, Clone)]
pub struct Detector {
    det_type: DetectorType,
    /// Resolution extrapolated to zero energy (eV FWHM), i.e. the
    /// electronic noise contribution.
    electronic_noise: f64,
    fano: f64,
    default_fano: f64,
    pair_energy: f64,
    window: Material,
    dead_layer: Material,
    active_layer: Material,
    front_contact: Material,
    shelf_factor: f64,
    shelf_slope: f64,
    shelf_slope_start: f64,
    /// Integration time of the fast channel used for pileup rejection (s).
    pulse_resolving_time: f64,
    compton_escape_enabled: bool,
    front_contact_shelf_enabled: bool,
    tail_a: f64,
}

impl Detector {
    /// `resolution_ev` is FWHM at the Mn K-alpha reference energy;
    /// thicknesses are Be window in um and active layer in mm.
    pub fn new(
        det_type: DetectorType,
        resolution_ev: f64,
        be_window_um: f64,
        active_thickness_mm: f64,
    ) -> Detector {
        let be = Element::new(4).unwrap();
        let al = Element::new(13).unwrap();
        let mut window = Material::new();
        if be_window_um > 0.0 {
            window.add_element(be, 1.0, Stoichiometry::default());
            window.set_thickness(be_window_um * UM_TO_CM);
        }
        let mut active_layer = Material::new();
        active_layer.add_element(det_type.active_element(), 1.0, Stoichiometry::default());
        if active_thickness_mm > 0.0 {
            active_layer.set_thickness(active_thickness_mm * MM_TO_CM);
        }
        let mut front_contact = Material::new();
        front_contact.add_element(al, 1.0, Stoichiometry::default());
        front_contact.set_thickness(CONTACT_THICKNESS_CM);

        let mut det = Detector {
            det_type,
            electronic_noise: 0.0,
            fano: det_type.fano(),
            default_fano: det_type.fano(),
            pair_energy: det_type.pair_energy(),
            window,
            dead_layer: Material::new(),
            active_layer,
            front_contact,
            shelf_factor: SHELF_FACTOR,
            shelf_slope: SHELF_SLOPE,
            shelf_slope_start: SHELF_SLOPE_START,
            pulse_resolving_time: 0.1e-6,
            compton_escape_enabled: false,
            front_contact_shelf_enabled: true,
            tail_a: 0.4,
        };
        det.set_resolution(resolution_ev, RESOLUTION_REFERENCE_ENERGY);
        det
    }

    pub fn det_type(&self) -> DetectorType {
        self.det_type
    }

    /// FWHM resolution at an energy, eV.
    pub fn resolution(&self, energy_ev: f64) -> f64 {
        let fano_part = 8.0 * 2.0_f64.ln() * self.fano * self.pair_energy * energy_ev.max(0.0);
        (self.electronic_noise * self.electronic_noise + fano_part).sqrt()
    }

    /// Set the resolution given as FWHM at a reference energy; anything
    /// narrower than the Fano limit leaves only the noise floor at zero.
    pub fn set_resolution(&mut self, fwhm_ev: f64, ref_energy_ev: f64) {
        let fano_part = 8.0 * 2.0_f64.ln() * self.fano * self.pair_energy * ref_energy_ev;
        self.electronic_noise = (fwhm_ev * fwhm_ev - fano_part).max(0.0).sqrt();
    }

    pub fn fano(&self) -> f64 {
        self.fano
    }

    pub fn default_fano(&self) -> f64 {
        self.default_fano
    }

    /// Mean energy per electron-hole pair, eV.
    pub fn pair_energy(&self) -> f64 {
        self.pair_energy
    }

    /// The fitter's width adjustment lands here; it is clamped to stay
    /// positive and within 40% of the detector default.
    pub fn set_fano(&mut self, fano: f64) {
        let lo = 0.6 * self.default_fano;
        let hi = 1.4 * self.default_fano;
        self.fano = fano.clamp(lo, hi);
    }

    pub fn pulse_resolving_time(&self) -> f64 {
        self.pulse_resolving_time
    }

    pub fn set_pulse_resolving_time(&mut self, seconds: f64) {
        if seconds >= 0.0 {
            self.pulse_resolving_time = seconds;
        }
    }

    pub fn shelf_factor(&self) -> f64 {
        self.shelf_factor
    }

    pub fn set_shelf(&mut self, factor: f64, slope: f64, slope_start: f64) {
        self.shelf_factor = factor;
        self.shelf_slope = slope;
        self.shelf_slope_start = slope_start;
    }

    pub fn compton_escape_enabled(&self) -> bool {
        self.compton_escape_enabled
    }

    pub fn set_compton_escape(&mut self, enabled: bool) {
        self.compton_escape_enabled = enabled;
    }

    pub fn set_front_contact_shelf(&mut self, enabled: bool) {
        self.front_contact_shelf_enabled = enabled;
    }

    /// Detection efficiency at an energy: window and dead-layer
    /// transmission times absorption in the active layer.
    pub fn response(&self, energy_ev: f64) -> f64 {
        let t_window = self.window.transmission(energy_ev, 1.0);
        let t_dead = if self.dead_layer.is_empty() {
            1.0
        } else {
            self.dead_layer.transmission(energy_ev, 1.0)
        };
        let absorbed = if self.active_layer.mass_thickness() > 0.0 {
            self.active_layer.absorption(energy_ev, 1.0)
        } else {
            1.0
        };
        t_window * t_dead * absorbed
    }

    /// Escape peaks for a parent line energy. Si detectors lose a Si
    /// K-alpha photon at about a tenth of a percent of the parent peak;
    /// CdTe and Ge detectors lose their own K lines.
    pub fn escape_lines(&self, energy_ev: f64) -> Vec<EscapeLine> {
        let el = self.det_type.active_element();
        let k_edge = el.edge_energy(EdgeLevel::K);
        if energy_ev <= k_edge {
            return vec![];
        }
        let catalog = LineCatalog::new(el, Series::K);
        catalog
            .lines()
            .iter()
            .filter(|l| l.tag == "Ka1")
            .map(|l| EscapeLine {
                energy: energy_ev - l.energy,
                // Escape grows as absorption happens closer to the front
                // face, which the edge ratio tracks well enough here.
                fraction: 1.0e-3 * (k_edge / energy_ev).sqrt(),
            })
            .collect()
    }

    /// Synthesize the full per-channel response profile for one line.
    /// The Gaussian part has unit area; tail, shelf and escape fractions
    /// are relative to it. `e_min` suppresses channels the electronics
    /// cannot use.
    pub fn line_profile(
        &self,
        line_energy_ev: f64,
        cal: &EnergyCal,
        nchan: usize,
        e_min: f64,
    ) -> Vec<f64> {
        let mut profile = vec![0.0; nchan];
        if line_energy_ev <= 0.0 || !cal.good() || nchan == 0 {
            return profile;
        }
        let center = cal.channel(line_energy_ev);
        let fwhm_ev = self.resolution(line_energy_ev);
        let per_ch = cal.per_channel_at(center.max(0.0) as usize).max(1.0e-6);
        let sigma_ch = fwhm_ev / SIGMA_TO_FWHM / per_ch;

        // Gaussian peak, unit area in channel space.
        let norm = 1.0 / (sigma_ch * (2.0 * crate::constants::PI).sqrt());
        let reach = (5.0 * sigma_ch).ceil() as isize;
        let c = center.round() as isize;
        for ch in (c - reach).max(0)..=(c + reach).min(nchan as isize - 1) {
            let d = ch as f64 - center;
            let e_ch = cal.energy(ch as f64);
            if e_ch < e_min {
                continue;
            }
            profile[ch as usize] += norm * (-d * d / (2.0 * sigma_ch * sigma_ch)).exp();
        }

        self.add_tail(&mut profile, line_energy_ev, cal, e_min);
        self.add_shelf(&mut profile, line_energy_ev, cal, e_min);

        // Escape peaks, Gaussian at their shifted energies.
        for esc in self.escape_lines(line_energy_ev) {
            if esc.energy <= e_min {
                continue;
            }
            let esc_center = cal.channel(esc.energy);
            let esc_sigma = self.resolution(esc.energy) / SIGMA_TO_FWHM / per_ch;
            let esc_norm = esc.fraction / (esc_sigma * (2.0 * crate::constants::PI).sqrt());
            let ec = esc_center.round() as isize;
            let esc_reach = (5.0 * esc_sigma).ceil() as isize;
            for ch in (ec - esc_reach).max(0)..=(ec + esc_reach).min(nchan as isize - 1) {
                let d = ch as f64 - esc_center;
                profile[ch as usize] +=
                    esc_norm * (-d * d / (2.0 * esc_sigma * esc_sigma)).exp();
            }
        }

        profile
    }

    /// Exponential incomplete-charge-collection tail below the peak. The
    /// tail fraction differs below and above the active element's K edge
    /// because the absorption depth changes abruptly there.
    fn add_tail(&self, profile: &mut [f64], line_energy_ev: f64, cal: &EnergyCal, e_min: f64) {
        let k_edge = self.det_type.active_element().edge_energy(EdgeLevel::K);
        let c0 = if line_energy_ev < k_edge { 0.03 } else { 0.012 };
        let fwhm_ev = self.resolution(line_energy_ev);
        // Tail energy scale, a few peak widths.
        let scale_ev = (self.tail_a * 4.0 * fwhm_ev).max(1.0);
        let total_fraction = c0;
        let nchan = profile.len();
        let mut weights = vec![0.0; nchan];
        let mut norm = 0.0;
        for (ch, w) in weights.iter_mut().enumerate() {
            let e_ch = cal.energy_of(ch);
            if e_ch < e_min || e_ch >= line_energy_ev {
                continue;
            }
            *w = ((e_ch - line_energy_ev) / scale_ev).exp();
            norm += *w;
        }
        if norm <= 0.0 {
            return;
        }
        for (p, w) in profile.iter_mut().zip(&weights) {
            *p += total_fraction * w / norm;
        }
    }

    /// Electron-loss shelf: flat probability from zero up to the peak,
    /// from photoelectrons and Auger electrons escaping the active volume
    /// plus (optionally) losses in the front contact.
    fn add_shelf(&self, profile: &mut [f64], line_energy_ev: f64, cal: &EnergyCal, e_min: f64) {
        let el = self.det_type.active_element();
        let k_edge = el.edge_energy(EdgeLevel::K);
        if line_energy_ev <= k_edge {
            return;
        }
        let rho = self.active_layer.density();
        let mu = self.active_layer.cross_section(line_energy_ev);

        // Photoelectron and Auger energies for the active volume terms.
        let e_photo = line_energy_ev - k_edge;
        let e_auger = (k_edge - 2.0 * el.edge_energy(EdgeLevel::L3)).max(0.0);
        let mut fraction = 0.5 * mu * rho * (electron_range(e_photo, rho) + electron_range(e_auger, rho));

        if self.front_contact_shelf_enabled {
            // Half the charge from photons absorbed in the contact layer
            // drifts into the active volume as a partial signal.
            let mu_fc = self.front_contact.cross_section(line_energy_ev);
            let rho_fc = self.front_contact.density();
            fraction += 0.5 * mu_fc * rho_fc * CONTACT_THICKNESS_CM;
        }
        fraction *= self.shelf_factor;
        if fraction <= 0.0 {
            return;
        }

        let nchan = profile.len();
        let mut weights = vec![0.0; nchan];
        let mut norm = 0.0;
        let slope_start_ev = self.shelf_slope_start * line_energy_ev;
        for (ch, w) in weights.iter_mut().enumerate() {
            let e_ch = cal.energy_of(ch);
            if e_ch < e_min || e_ch >= line_energy_ev {
                continue;
            }
            let mut v = 1.0;
            if self.shelf_slope != 0.0 && e_ch > slope_start_ev {
                // Loss energy is negative, so a positive slope tilts the
                // shelf down toward the peak.
                v *= (1.0 + self.shelf_slope * (e_ch - line_energy_ev) / line_energy_ev).max(0.0);
            }
            *w = v;
            norm += v;
        }
        if norm <= 0.0 {
            return;
        }
        for (p, w) in profile.iter_mut().zip(&weights) {
            *p += fraction * w / norm;
        }
    }
}

/// CSDA-style electron range in cm for an electron energy in eV, from the
/// dataset's power-law fit.
fn electron_range(electron_energy_ev: f64, density: f64) -> f64 {
    if electron_energy_ev <= 0.0 || density <= 0.0 {
        return 0.0;
    }
    let e_kev = electron_energy_ev / 1000.0;
    // Range in g/cm2, then divide by density.
    let range_mass = 9.0e-6 * e_kev.powf(1.7);
    range_mass / density
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    use super::*;

    fn sdd() -> Detector {
        Detector::new(DetectorType::SiSdd, 150.0, 25.0, 0.5)
    }

    #[test]
    fn resolution_at_reference_energy() {
        let d = sdd();
        assert_relative_eq!(
            d.resolution(RESOLUTION_REFERENCE_ENERGY),
            150.0,
            max_relative = 1e-6
        );
        // Wider at higher energy, narrower at lower.
        assert!(d.resolution(10_000.0) > 150.0);
        assert!(d.resolution(2_000.0) < 150.0);
        // Never NaN at zero energy.
        assert!(d.resolution(0.0) > 0.0);
    }

    #[test]
    fn fano_clamped_to_40_percent() {
        let mut d = sdd();
        d.set_fano(1.0);
        assert_abs_diff_eq!(d.fano(), 1.4 * d.default_fano(), epsilon = 1e-12);
        d.set_fano(0.0);
        assert_abs_diff_eq!(d.fano(), 0.6 * d.default_fano(), epsilon = 1e-12);
    }

    #[test]
    fn response_shape() {
        let d = sdd();
        // The Be window kills very soft X-rays; mid energies are detected
        // efficiently; hard X-rays punch through the thin active layer.
        assert!(d.response(500.0) < 0.05);
        assert!(d.response(6_000.0) > 0.8);
        assert!(d.response(60_000.0) < 0.3);
    }

    #[test]
    fn escape_only_above_edge() {
        let d = sdd();
        assert!(d.escape_lines(1_500.0).is_empty());
        let esc = d.escape_lines(7_000.0);
        assert_eq!(esc.len(), 1);
        assert!(esc[0].energy < 7_000.0);
        assert!(esc[0].fraction > 0.0 && esc[0].fraction < 0.01);
    }

    #[test]
    fn line_profile_centered_and_normalized() {
        let d = sdd();
        let cal = EnergyCal::new(0.0, 10.0);
        let profile = d.line_profile(6_400.0, &cal, 2048, 900.0);
        let peak_ch = profile
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .unwrap()
            .0;
        assert_abs_diff_eq!(peak_ch as f64, 640.0, epsilon = 1.0);
        let area: f64 = profile.iter().sum();
        // Unit Gaussian plus small tail/shelf/escape fractions.
        assert!(area > 0.99 && area < 1.15, "area = {area}");
    }

    #[test]
    fn profile_respects_e_min() {
        let d = sdd();
        let cal = EnergyCal::new(0.0, 10.0);
        let profile = d.line_profile(6_400.0, &cal, 2048, 900.0);
        for (ch, v) in profile.iter().enumerate() {
            if cal.energy_of(ch) < 900.0 {
                assert_eq!(*v, 0.0, "channel {ch} below e_min has counts");
            }
        }
    }
}
