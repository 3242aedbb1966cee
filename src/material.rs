// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
A specimen material: elements, stoichiometry and derived X-ray properties.

The composition is an ordered set of input entries, each an element with an
input fraction, a light-element formula and an uncertainty. Every mutation
re-derives the element mass fractions (adding oxygen and carbon as the
formulas require), density, mass thickness and per-element cross-section
tables in one step, so readers always see a consistent view.
 */

use indexmap::IndexMap;

use crate::refdata::{Element, ScatterTable, XsectTable};

/// How an input fraction maps onto element plus light-element masses.
/// The ratio is atoms of the coordinating species per atom of analyte:
/// Na2O is 0.5, Fe2O3 is 1.5, CaCO3 is 1 (one CO3 group per Ca).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightElementFormula {
    PureElement,
    Oxide { ratio: f64 },
    Carbonate { ratio: f64 },
}

impl Default for LightElementFormula {
    fn default() -> Self {
        LightElementFormula::PureElement
    }
}

/// A formula plus the flag recording whether input fractions are for the
/// whole formula unit or just the element.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stoichiometry {
    pub formula: LightElementFormula,
    pub input_is_formula: bool,
}

/// Default oxide ratio for an element, from the common-oxidation-state
/// table. Elements with Z <= 10 never get an associated oxide. Iron
/// defaults to FeO but may be overridden for the run.
pub fn default_oxide_ratio(el: Element, fe_override: Option<f64>) -> f64 {
    #[rustfmt::skip]
    const OXIDATION_STATE: [i8; 101] = [
        0,
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0,      //  1-10  always matrix elements
        1, 2, 3, 4, 5, 6, -1, 0, 1, 2,     // 11-20
        3, 4, 5, 3, 2, 2, 2, 2, 2, 2,      // 21-30  FeO
        3, 4, 3, 4, -1, 0, 1, 2, 3, 4,     // 31-40
        5, 6, 7, 4, 3, 2, 1, 2, 3, 4,      // 41-50
        3, 4, -1, 0, 1, 2, 3, 3, 4, 3,     // 51-60
        3, 3, 3, 3, 3, 3, 3, 3, 3, 3,      // 61-70
        3, 4, 5, 6, 7, 4, 4, 4, 3, 2,      // 71-80
        1, 2, 3, 2, 0, 0, 1, 2, 3, 4,      // 81-90
        5, 6, 5, 4, 3, 3, 3, 3, 0, 0,      // 91-100
    ];
    let z = el.atomic_number() as usize;
    if z == 26 {
        if let Some(r) = fe_override {
            return r;
        }
    }
    if z < OXIDATION_STATE.len() && OXIDATION_STATE[z] > 0 {
        OXIDATION_STATE[z] as f64 / 2.0
    } else {
        0.0
    }
}

/// Default carbonate ratio; only Mg, Ca, Mn, Fe and Sr form carbonates.
pub fn default_carbonate_ratio(el: Element) -> f64 {
    matches!(el.atomic_number(), 12 | 20 | 25 | 26 | 38) as u32 as f64
}

/// Default ratio for a formula kind, used when parsing element lists.
pub fn default_formula_ratio(el: Element, formula: LightElementFormula, fe_override: Option<f64>) -> f64 {
    match formula {
        LightElementFormula::PureElement => 0.0,
        LightElementFormula::Oxide { .. } => default_oxide_ratio(el, fe_override),
        LightElementFormula::Carbonate { .. } => default_carbonate_ratio(el),
    }
}

#[derive(Debug, Clone)]
struct InputEntry {
    fraction: f64,
    stoich: Stoichiometry,
    uncertainty: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Material {
    input: IndexMap<Element, InputEntry>,
    fixed_density: Option<f64>,
    thickness_cm: Option<f64>,
    fe_override: Option<f64>,

    // Everything below is derived on each mutation.
    fractions: IndexMap<Element, f64>,
    tables: IndexMap<Element, XsectTable>,
    oxygen_added: f64,
    carbon_added: f64,
    density: f64,
    mass_thickness: f64,
}

impl Material {
    pub fn new() -> Material {
        Material::default()
    }

    /// A material with the run's iron-oxide default threaded in. The
    /// override lives here (not in process globals) so map workers can
    /// carry different analysis contexts safely.
    pub fn with_iron_override(fe_override: Option<f64>) -> Material {
        Material {
            fe_override,
            ..Material::default()
        }
    }

    pub fn add_element(&mut self, el: Element, fraction: f64, stoich: Stoichiometry) {
        self.input.insert(
            el,
            InputEntry {
                fraction: fraction.max(0.0),
                stoich,
                uncertainty: 0.0,
            },
        );
        self.derive();
    }

    pub fn set_fraction(&mut self, el: Element, fraction: f64) {
        self.input
            .entry(el)
            .and_modify(|e| e.fraction = fraction.max(0.0))
            .or_insert(InputEntry {
                fraction: fraction.max(0.0),
                stoich: Stoichiometry::default(),
                uncertainty: 0.0,
            });
        self.derive();
    }

    pub fn set_formula(&mut self, el: Element, stoich: Stoichiometry) {
        if let Some(entry) = self.input.get_mut(&el) {
            entry.stoich = stoich;
            self.derive();
        }
    }

    pub fn set_uncertainty(&mut self, el: Element, uncertainty: f64) {
        if let Some(entry) = self.input.get_mut(&el) {
            entry.uncertainty = uncertainty;
            self.derive();
        }
    }

    pub fn set_density(&mut self, density: f64) {
        if density > 0.0 {
            self.fixed_density = Some(density);
            self.derive();
        }
    }

    pub fn set_thickness(&mut self, thickness_cm: f64) {
        if thickness_cm > 0.0 {
            self.thickness_cm = Some(thickness_cm);
            self.derive();
        }
    }

    /// Scale input fractions so the derived element fractions sum to
    /// `target` (1.0 for fractions, 100.0 for percents).
    pub fn normalize(&mut self, target: f64) {
        let sum: f64 = self.fractions.values().sum();
        if sum <= 0.0 || target <= 0.0 {
            return;
        }
        let scale = target / sum;
        for entry in self.input.values_mut() {
            entry.fraction *= scale;
        }
        self.derive();
    }

    /// Give every input element its default oxide formula. Calling this a
    /// second time changes nothing.
    pub fn convert_to_oxides(&mut self) {
        let fe = self.fe_override;
        for (&el, entry) in self.input.iter_mut() {
            let ratio = default_oxide_ratio(el, fe);
            if ratio > 0.0 {
                entry.stoich.formula = LightElementFormula::Oxide { ratio };
            }
        }
        self.derive();
    }

    // ---- read access ----

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    pub fn input_elements(&self) -> impl Iterator<Item = Element> + '_ {
        self.input.keys().copied()
    }

    /// Derived element list, including any added oxygen and carbon.
    pub fn element_list(&self) -> impl Iterator<Item = Element> + '_ {
        self.fractions.keys().copied()
    }

    /// Derived mass fraction of an element (0 if absent).
    pub fn fraction(&self, el: Element) -> f64 {
        self.fractions.get(&el).copied().unwrap_or(0.0)
    }

    pub fn input_fraction(&self, el: Element) -> f64 {
        self.input.get(&el).map(|e| e.fraction).unwrap_or(0.0)
    }

    pub fn stoichiometry(&self, el: Element) -> Stoichiometry {
        self.input
            .get(&el)
            .map(|e| e.stoich)
            .unwrap_or_default()
    }

    pub fn uncertainty(&self, el: Element) -> f64 {
        self.input.get(&el).map(|e| e.uncertainty).unwrap_or(0.0)
    }

    /// Mass fraction of the whole formula unit for an element.
    pub fn formula_fraction(&self, el: Element) -> f64 {
        let entry = match self.input.get(&el) {
            Some(e) => e,
            None => return 0.0,
        };
        let element_fraction = if entry.stoich.input_is_formula {
            entry.fraction * element_weight_share(el, entry.stoich.formula)
        } else {
            entry.fraction
        };
        element_fraction / element_weight_share(el, entry.stoich.formula)
    }

    pub fn oxygen_added(&self) -> f64 {
        self.oxygen_added
    }

    pub fn carbon_added(&self) -> f64 {
        self.carbon_added
    }

    pub fn density(&self) -> f64 {
        self.density
    }

    pub fn thickness_cm(&self) -> Option<f64> {
        self.thickness_cm
    }

    /// Density times thickness in g/cm2; 0 means semi-infinite.
    pub fn mass_thickness(&self) -> f64 {
        self.mass_thickness
    }

    pub fn avg_z(&self) -> f64 {
        let sum: f64 = self.fractions.values().sum();
        if sum <= 0.0 {
            return 0.0;
        }
        self.fractions
            .iter()
            .map(|(el, f)| f * el.atomic_number() as f64)
            .sum::<f64>()
            / sum
    }

    pub fn avg_a(&self) -> f64 {
        let sum: f64 = self.fractions.values().sum();
        if sum <= 0.0 {
            return 0.0;
        }
        self.fractions
            .iter()
            .map(|(el, f)| f * el.atomic_weight())
            .sum::<f64>()
            / sum
    }

    pub fn avg_z_over_a(&self) -> f64 {
        let a = self.avg_a();
        if a <= 0.0 {
            0.0
        } else {
            self.avg_z() / a
        }
    }

    // ---- X-ray properties ----

    /// Total mass attenuation in cm2/g.
    pub fn cross_section(&self, energy_ev: f64) -> f64 {
        self.fractions
            .iter()
            .map(|(el, f)| f * self.tables[el].total(energy_ev))
            .sum::<f64>()
    }

    /// Photoabsorption mass cross-section in cm2/g.
    pub fn photo(&self, energy_ev: f64) -> f64 {
        self.fractions
            .iter()
            .map(|(el, f)| f * self.tables[el].photo(energy_ev))
            .sum::<f64>()
    }

    pub fn photo_element(&self, el: Element, energy_ev: f64) -> f64 {
        match self.tables.get(&el) {
            Some(t) => self.fraction(el) * t.photo(energy_ev),
            None => 0.0,
        }
    }

    /// The cross-section table for one element of the material.
    pub fn xsect_table(&self, el: Element) -> Option<&XsectTable> {
        self.tables.get(&el)
    }

    /// Differential coherent scatter of the whole material, cm2/g/sr.
    pub fn coherent(&self, energy_ev: f64, theta: f64) -> f64 {
        self.fractions
            .iter()
            .map(|(el, f)| f * self.tables[el].scatter().coherent_differential(energy_ev, theta))
            .sum::<f64>()
    }

    /// Differential incoherent scatter of the whole material, cm2/g/sr.
    pub fn incoherent(&self, energy_ev: f64, theta: f64) -> f64 {
        self.fractions
            .iter()
            .map(|(el, f)| {
                f * self.tables[el]
                    .scatter()
                    .incoherent_differential(energy_ev, theta)
            })
            .sum::<f64>()
    }

    /// Doubly-differential incoherent scatter: the differential
    /// cross-section spread over a momentum-broadened Gaussian profile in
    /// scattered energy, evaluated at `scattered_ev`.
    pub fn incoherent_dd(&self, energy_ev: f64, theta: f64, scattered_ev: f64) -> f64 {
        let center = ScatterTable::compton_energy(energy_ev, theta);
        let fwhm = ScatterTable::compton_width(energy_ev, theta).max(1.0);
        let sigma = fwhm / crate::constants::SIGMA_TO_FWHM;
        let gauss = (-(scattered_ev - center).powi(2) / (2.0 * sigma * sigma)).exp()
            / (sigma * (2.0 * crate::constants::PI).sqrt());
        self.incoherent(energy_ev, theta) * gauss
    }

    /// Transmission through the material's thickness along a slant path
    /// with the given cosecant. A material without a thickness transmits
    /// nothing (it is semi-infinite).
    pub fn transmission(&self, energy_ev: f64, csc: f64) -> f64 {
        if self.input.is_empty() {
            return 1.0;
        }
        if self.mass_thickness <= 0.0 {
            return 0.0;
        }
        (-self.cross_section(energy_ev) * csc * self.mass_thickness).exp()
    }

    pub fn absorption(&self, energy_ev: f64, csc: f64) -> f64 {
        1.0 - self.transmission(energy_ev, csc)
    }

    // ---- derivation ----

    /// Re-derive everything that depends on the inputs. Oxygen appears in
    /// the derived list iff any formula is Oxide or Carbonate; carbon iff
    /// any is Carbonate.
    fn derive(&mut self) {
        let oxygen = Element::new(8).expect("O is in the dataset");
        let carbon = Element::new(6).expect("C is in the dataset");

        let mut fractions: IndexMap<Element, f64> = IndexMap::with_capacity(self.input.len() + 2);
        let mut oxygen_added = 0.0;
        let mut carbon_added = 0.0;

        for (&el, entry) in &self.input {
            let element_fraction = if entry.stoich.input_is_formula {
                entry.fraction * element_weight_share(el, entry.stoich.formula)
            } else {
                entry.fraction
            };
            *fractions.entry(el).or_insert(0.0) += element_fraction;
            match entry.stoich.formula {
                LightElementFormula::PureElement => {}
                LightElementFormula::Oxide { ratio } => {
                    let o = element_fraction * ratio * oxygen.atomic_weight() / el.atomic_weight();
                    oxygen_added += o;
                }
                LightElementFormula::Carbonate { ratio } => {
                    let per_analyte = ratio / el.atomic_weight();
                    oxygen_added += element_fraction * per_analyte * 3.0 * oxygen.atomic_weight();
                    carbon_added += element_fraction * per_analyte * carbon.atomic_weight();
                }
            }
        }
        if oxygen_added > 0.0 {
            *fractions.entry(oxygen).or_insert(0.0) += oxygen_added;
        }
        if carbon_added > 0.0 {
            *fractions.entry(carbon).or_insert(0.0) += carbon_added;
        }

        // Cross-section tables: build only for newly seen elements, the
        // tables themselves depend only on Z.
        for &el in fractions.keys() {
            self.tables.entry(el).or_insert_with(|| XsectTable::new(el));
        }
        self.tables.retain(|el, _| fractions.contains_key(el));

        self.oxygen_added = oxygen_added;
        self.carbon_added = carbon_added;
        self.fractions = fractions;

        self.density = match self.fixed_density {
            Some(d) => d,
            None => self.theoretical_density(),
        };
        self.mass_thickness = match self.thickness_cm {
            Some(t) => self.density * t,
            None => 0.0,
        };
    }

    /// Volume-weighted solid density: mass fractions average the inverse
    /// densities.
    fn theoretical_density(&self) -> f64 {
        let sum: f64 = self.fractions.values().sum();
        if sum <= 0.0 {
            return 0.0;
        }
        let inv: f64 = self
            .fractions
            .iter()
            .map(|(el, f)| (f / sum) / el.density())
            .sum();
        if inv <= 0.0 {
            0.0
        } else {
            1.0 / inv
        }
    }
}

/// Mass share of the analyte element within one formula unit.
fn element_weight_share(el: Element, formula: LightElementFormula) -> f64 {
    let w_el = el.atomic_weight();
    let w_o = 15.999;
    let w_c = 12.011;
    match formula {
        LightElementFormula::PureElement => 1.0,
        LightElementFormula::Oxide { ratio } => w_el / (w_el + ratio * w_o),
        LightElementFormula::Carbonate { ratio } => w_el / (w_el + ratio * (w_c + 3.0 * w_o)),
    }
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    use super::*;

    fn el(z: u32) -> Element {
        Element::new(z).unwrap()
    }

    #[test]
    fn single_element_no_light_elements() {
        let mut m = Material::new();
        m.add_element(el(26), 1.0, Stoichiometry::default());
        assert_eq!(m.element_list().count(), 1);
        assert_abs_diff_eq!(m.fraction(el(26)), 1.0);
        assert_abs_diff_eq!(m.oxygen_added(), 0.0);
        assert_relative_eq!(m.density(), el(26).density());
    }

    #[test]
    fn sio2_fractions() {
        let mut m = Material::new();
        m.add_element(
            el(14),
            1.0,
            Stoichiometry {
                formula: LightElementFormula::Oxide { ratio: 2.0 },
                input_is_formula: true,
            },
        );
        m.normalize(1.0);
        // SiO2: Si = 28.085/60.083 = 0.4674, O = 0.5326.
        assert_relative_eq!(m.fraction(el(14)), 0.4674, max_relative = 1e-3);
        assert_relative_eq!(m.fraction(el(8)), 0.5326, max_relative = 1e-3);
        let total: f64 = m.element_list().map(|e| m.fraction(e)).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn carbonate_adds_carbon_and_oxygen() {
        let mut m = Material::new();
        m.add_element(
            el(20),
            0.4,
            Stoichiometry {
                formula: LightElementFormula::Carbonate { ratio: 1.0 },
                input_is_formula: false,
            },
        );
        assert!(m.fraction(el(6)) > 0.0);
        assert!(m.fraction(el(8)) > 0.0);
        // CaCO3 mass ratios: C/Ca = 12.011/40.078, O/Ca = 47.997/40.078.
        assert_relative_eq!(
            m.fraction(el(6)) / m.fraction(el(20)),
            12.011 / 40.078,
            max_relative = 1e-6
        );
        assert_relative_eq!(
            m.fraction(el(8)) / m.fraction(el(20)),
            3.0 * 15.999 / 40.078,
            max_relative = 1e-6
        );
    }

    #[test]
    fn normalize_sums_to_target() {
        let mut m = Material::new();
        m.add_element(el(14), 30.0, Stoichiometry::default());
        m.add_element(el(26), 20.0, Stoichiometry::default());
        m.normalize(1.0);
        let total: f64 = m.element_list().map(|e| m.fraction(e)).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn convert_to_oxides_is_idempotent() {
        let mut m = Material::new();
        m.add_element(el(14), 0.5, Stoichiometry::default());
        m.add_element(el(26), 0.5, Stoichiometry::default());
        m.convert_to_oxides();
        let first: Vec<f64> = m.element_list().map(|e| m.fraction(e)).collect();
        m.convert_to_oxides();
        let second: Vec<f64> = m.element_list().map(|e| m.fraction(e)).collect();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn iron_override_changes_default_ratio() {
        assert_abs_diff_eq!(default_oxide_ratio(el(26), None), 1.0);
        assert_abs_diff_eq!(default_oxide_ratio(el(26), Some(1.5)), 1.5);
        // Other elements are unaffected by the override.
        assert_abs_diff_eq!(default_oxide_ratio(el(14), Some(1.5)), 2.0);
        // Light elements never get an oxide.
        assert_abs_diff_eq!(default_oxide_ratio(el(8), None), 0.0);
    }

    #[test]
    fn transmission_needs_thickness() {
        let mut m = Material::new();
        m.add_element(el(4), 1.0, Stoichiometry::default());
        assert_abs_diff_eq!(m.transmission(8000.0, 1.0), 0.0);
        m.set_thickness(25.0e-4);
        let t = m.transmission(8000.0, 1.0);
        assert!(t > 0.9 && t < 1.0);
    }
}
