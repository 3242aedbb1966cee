// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-element cross-section tables.
//!
//! Photoabsorption follows the dataset's power-law-with-edge-jumps
//! parameterization; coherent and incoherent scatter use Thomson and
//! Klein-Nishina differential forms moderated by Thomas-Fermi style form
//! factors, with total cross-sections pre-integrated onto a log energy grid
//! when a table is built. All values are mass cross-sections in cm2/g;
//! energies are eV, angles radians.

use crate::constants::{AVOGADRO, ELECTRON_REST_ENERGY_EV, HC_EV_ANGSTROM, PI, R_ELECTRON_CM};
use crate::math::interp_loglog;

use super::{EdgeLevel, Element};

/// Normalization of the photoabsorption power law, set so the dataset
/// reproduces its iron reference point at 10 keV.
const PHOTO_COEFF: f64 = 6.64;
const PHOTO_Z_EXPONENT: f64 = 4.35;

/// Photoabsorption and total-attenuation table for one element.
#[derive(Debug, Clone)]
pub struct XsectTable {
    element: Element,
    scatter: ScatterTable,
}

impl XsectTable {
    pub fn new(element: Element) -> XsectTable {
        XsectTable {
            element,
            scatter: ScatterTable::new(element),
        }
    }

    pub fn element(&self) -> Element {
        self.element
    }

    /// Total photoabsorption in cm2/g.
    pub fn photo(&self, energy_ev: f64) -> f64 {
        if energy_ev <= 0.0 {
            return 0.0;
        }
        let el = self.element;
        let e_kev = energy_ev / 1000.0;
        let z = el.atomic_number() as f64;
        let full = PHOTO_COEFF * z.powf(PHOTO_Z_EXPONENT) / (el.atomic_weight() * e_kev.powi(3));
        // Remove each shell's contribution as the energy drops below its
        // edge, using the jump ratios.
        let mut tau = full;
        for level in [EdgeLevel::K, EdgeLevel::L1, EdgeLevel::L2, EdgeLevel::L3] {
            let edge = el.edge_energy(level);
            if edge > 0.0 && energy_ev < edge {
                tau /= el.jump_ratio(level);
            }
        }
        tau
    }

    /// Photoabsorption attributable to one subshell; zero below its edge.
    pub fn photo_shell(&self, energy_ev: f64, level: EdgeLevel) -> f64 {
        let edge = self.element.edge_energy(level);
        if edge <= 0.0 || energy_ev <= edge {
            return 0.0;
        }
        self.photo(energy_ev) * (1.0 - 1.0 / self.element.jump_ratio(level))
    }

    /// Total attenuation (photo + coherent + incoherent) in cm2/g.
    pub fn total(&self, energy_ev: f64) -> f64 {
        self.photo(energy_ev)
            + self.scatter.coherent_total(energy_ev)
            + self.scatter.incoherent_total(energy_ev)
    }

    pub fn scatter(&self) -> &ScatterTable {
        &self.scatter
    }
}

/// Coherent/incoherent scatter table for one element: differential forms
/// plus pre-integrated totals on a log energy grid.
#[derive(Debug, Clone)]
pub struct ScatterTable {
    element: Element,
    grid_ev: Vec<f64>,
    coherent_tot: Vec<f64>,
    incoherent_tot: Vec<f64>,
}

/// Momentum transfer s = sin(theta/2)/lambda in 1/Angstrom.
fn momentum_transfer(energy_ev: f64, theta: f64) -> f64 {
    (theta / 2.0).sin() * energy_ev / HC_EV_ANGSTROM
}

impl ScatterTable {
    pub fn new(element: Element) -> ScatterTable {
        // 0.5 keV to 120 keV, 40 points, log spaced.
        let n = 40;
        let lo: f64 = 500.0;
        let hi: f64 = 120_000.0;
        let mut grid_ev = Vec::with_capacity(n);
        for i in 0..n {
            let f = i as f64 / (n - 1) as f64;
            grid_ev.push((lo.ln() + f * (hi.ln() - lo.ln())).exp());
        }
        let mut table = ScatterTable {
            element,
            grid_ev,
            coherent_tot: vec![],
            incoherent_tot: vec![],
        };
        for i in 0..table.grid_ev.len() {
            let (coh, incoh) = table.integrate_totals(table.grid_ev[i]);
            table.coherent_tot.push(coh);
            table.incoherent_tot.push(incoh);
        }
        table
    }

    pub fn element(&self) -> Element {
        self.element
    }

    /// Atomic form factor (Thomas-Fermi screening fit from the dataset).
    fn form_factor(&self, s: f64) -> f64 {
        let z = self.element.atomic_number() as f64;
        let sf = 0.22 * z.cbrt();
        z / (1.0 + (s / sf).powi(2)).powf(1.5)
    }

    /// Incoherent scattering function; 0 at s = 0, saturates at Z.
    fn incoherent_function(&self, s: f64) -> f64 {
        let z = self.element.atomic_number() as f64;
        let si = 0.15 * z.cbrt();
        z * (1.0 - 1.0 / (1.0 + (s / si).powi(2)).powf(1.5))
    }

    /// Klein-Nishina differential cross-section per electron, cm2/sr.
    fn klein_nishina(energy_ev: f64, theta: f64) -> f64 {
        let k = energy_ev / ELECTRON_REST_ENERGY_EV;
        let ratio = 1.0 / (1.0 + k * (1.0 - theta.cos()));
        let sin2 = theta.sin() * theta.sin();
        0.5 * R_ELECTRON_CM * R_ELECTRON_CM
            * ratio
            * ratio
            * (ratio + 1.0 / ratio - sin2)
    }

    /// Differential coherent (Rayleigh) mass cross-section, cm2/g/sr.
    pub fn coherent_differential(&self, energy_ev: f64, theta: f64) -> f64 {
        let s = momentum_transfer(energy_ev, theta);
        let f = self.form_factor(s);
        let thomson =
            0.5 * R_ELECTRON_CM * R_ELECTRON_CM * (1.0 + theta.cos() * theta.cos());
        thomson * f * f * AVOGADRO / self.element.atomic_weight()
    }

    /// Differential incoherent (Compton) mass cross-section, cm2/g/sr.
    pub fn incoherent_differential(&self, energy_ev: f64, theta: f64) -> f64 {
        let s = momentum_transfer(energy_ev, theta);
        Self::klein_nishina(energy_ev, theta) * self.incoherent_function(s) * AVOGADRO
            / self.element.atomic_weight()
    }

    /// Compton-shifted energy of a photon scattered through `theta`.
    pub fn compton_energy(energy_ev: f64, theta: f64) -> f64 {
        energy_ev / (1.0 + (energy_ev / ELECTRON_REST_ENERGY_EV) * (1.0 - theta.cos()))
    }

    /// Additional FWHM (eV) of the Compton peak from momentum broadening.
    pub fn compton_width(energy_ev: f64, theta: f64) -> f64 {
        0.023 * energy_ev * (theta / 2.0).sin()
    }

    fn integrate_totals(&self, energy_ev: f64) -> (f64, f64) {
        // Trapezoid over cos(theta); 48 intervals is plenty for these
        // smooth integrands.
        let n = 48;
        let mut coh = 0.0;
        let mut incoh = 0.0;
        let dmu = 2.0 / n as f64;
        for i in 0..=n {
            let mu: f64 = -1.0 + i as f64 * dmu;
            let theta = mu.clamp(-1.0, 1.0).acos();
            let w = if i == 0 || i == n { 0.5 } else { 1.0 };
            coh += w * self.coherent_differential(energy_ev, theta);
            incoh += w * self.incoherent_differential(energy_ev, theta);
        }
        // d(solid angle) = 2 pi d(cos theta).
        (coh * 2.0 * PI * dmu, incoh * 2.0 * PI * dmu)
    }

    /// Total coherent mass cross-section, cm2/g.
    pub fn coherent_total(&self, energy_ev: f64) -> f64 {
        interp_loglog(&self.grid_ev, &self.coherent_tot, energy_ev)
    }

    /// Total incoherent mass cross-section, cm2/g.
    pub fn incoherent_total(&self, energy_ev: f64) -> f64 {
        interp_loglog(&self.grid_ev, &self.incoherent_tot, energy_ev)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn photo_has_k_edge_jump() {
        let fe = Element::new(26).unwrap();
        let t = XsectTable::new(fe);
        let below = t.photo(7111.0);
        let above = t.photo(7113.0);
        assert!(above > below);
        assert_relative_eq!(above / below, fe.jump_ratio(EdgeLevel::K), max_relative = 0.01);
    }

    #[test]
    fn photo_iron_reference_point() {
        let fe = Element::new(26).unwrap();
        let t = XsectTable::new(fe);
        assert_relative_eq!(t.photo(10_000.0), 170.0, max_relative = 0.02);
    }

    #[test]
    fn photo_shell_zero_below_edge() {
        let ca = Element::new(20).unwrap();
        let t = XsectTable::new(ca);
        assert_eq!(t.photo_shell(4000.0, EdgeLevel::K), 0.0);
        assert!(t.photo_shell(5000.0, EdgeLevel::K) > 0.0);
    }

    #[test]
    fn compton_shift_direction() {
        let e = 20_000.0;
        let shifted = ScatterTable::compton_energy(e, 2.4);
        assert!(shifted < e);
        assert!(shifted > 18_000.0);
    }

    #[test]
    fn scatter_totals_positive_and_smooth() {
        let si = Element::new(14).unwrap();
        let t = ScatterTable::new(si);
        let c1 = t.coherent_total(8_000.0);
        let c2 = t.coherent_total(8_100.0);
        assert!(c1 > 0.0);
        assert_relative_eq!(c1, c2, max_relative = 0.05);
        assert!(t.incoherent_total(8_000.0) > 0.0);
    }
}
