// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Atomic reference data behind typed accessors.

Everything in this module is process-wide, read-only data: element
properties, absorption edges, emission lines and cross-sections. It is
loaded once and shared by reference; nothing here is ever cloned per
spectrum.
 */

mod lines;
mod tables;
mod xsect;

pub use lines::{EmissionLine, LineCatalog, Series};
pub use xsect::{ScatterTable, XsectTable};

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use tables::ELEMENT_TABLE;

/// The highest atomic number in the bundled dataset.
pub const MAX_Z: u8 = 92;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ElementError {
    #[error("Atomic number {0} is outside the supported range 1..={MAX_Z}")]
    BadAtomicNumber(u32),

    #[error("'{0}' is not a recognised element symbol")]
    BadSymbol(String),
}

/// A chemical element, keyed by atomic number. Cheap to copy; all data
/// access goes through the bundled tables.
#[derive(Debug, Clone, Copy)]
pub struct Element {
    z: u8,
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        self.z == other.z
    }
}
impl Eq for Element {}

impl std::hash::Hash for Element {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.z.hash(state);
    }
}

impl PartialOrd for Element {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Element {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.z.cmp(&other.z)
    }
}

impl Element {
    pub fn new(z: u32) -> Result<Element, ElementError> {
        if z == 0 || z > MAX_Z as u32 {
            return Err(ElementError::BadAtomicNumber(z));
        }
        Ok(Element { z: z as u8 })
    }

    fn row(&self) -> &'static tables::ElementRow {
        &ELEMENT_TABLE[self.z as usize - 1]
    }

    pub fn atomic_number(&self) -> u32 {
        self.z as u32
    }

    pub fn symbol(&self) -> &'static str {
        self.row().symbol
    }

    /// Atomic weight in g/mol.
    pub fn atomic_weight(&self) -> f64 {
        self.row().weight
    }

    /// Elemental density in g/cm3 (standard conditions).
    pub fn density(&self) -> f64 {
        self.row().density
    }

    /// Absorption-edge energy in eV, 0 if the subshell is not tabulated.
    pub fn edge_energy(&self, level: EdgeLevel) -> f64 {
        let row = self.row();
        match level {
            EdgeLevel::K => row.k,
            EdgeLevel::L1 => row.l1,
            EdgeLevel::L2 => row.l2,
            EdgeLevel::L3 => row.l3,
            EdgeLevel::M3 => row.m3,
            EdgeLevel::M4 => row.m4,
            EdgeLevel::M5 => row.m5,
        }
    }

    /// K-shell fluorescence yield (Bambynek fit to the bundled dataset).
    pub fn fluor_yield_k(&self) -> f64 {
        let z = self.z as f64;
        let s = 0.0370 + 0.03112 * z + 5.44e-7 * z * z * z;
        let s4 = s.powi(4);
        s4 / (1.0 + s4)
    }

    /// L3-subshell fluorescence yield.
    pub fn fluor_yield_l3(&self) -> f64 {
        let z = self.z as f64;
        let s = (-0.0194 + 0.011 * z).max(0.0);
        let s4 = s.powi(4);
        s4 / (1.0 + s4)
    }

    /// L2-subshell fluorescence yield.
    pub fn fluor_yield_l2(&self) -> f64 {
        0.8 * self.fluor_yield_l3()
    }

    /// M5-subshell fluorescence yield. M-series analysis is rare; the
    /// dataset carries only this coarse value.
    pub fn fluor_yield_m5(&self) -> f64 {
        0.1 * self.fluor_yield_l3()
    }

    /// Absorption-edge jump ratio for a subshell.
    pub fn jump_ratio(&self, level: EdgeLevel) -> f64 {
        match level {
            EdgeLevel::K => 125.0 / self.z as f64 + 3.5,
            EdgeLevel::L1 => 1.16,
            EdgeLevel::L2 => 1.41,
            EdgeLevel::L3 => 2.5,
            EdgeLevel::M3 | EdgeLevel::M4 | EdgeLevel::M5 => 1.05,
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Element {
    type Err = ElementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        for (i, row) in ELEMENT_TABLE.iter().enumerate() {
            if row.symbol.eq_ignore_ascii_case(trimmed) {
                return Ok(Element { z: i as u8 + 1 });
            }
        }
        // Also accept a bare atomic number.
        if let Ok(z) = trimmed.parse::<u32>() {
            return Element::new(z);
        }
        Err(ElementError::BadSymbol(trimmed.to_string()))
    }
}

/// Absorption-edge subshells carried by the dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeLevel {
    K,
    L1,
    L2,
    L3,
    M3,
    M4,
    M5,
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn element_lookup_by_symbol_and_z() {
        let fe: Element = "Fe".parse().unwrap();
        assert_eq!(fe.atomic_number(), 26);
        assert_eq!(fe, Element::new(26).unwrap());
        assert_eq!(fe.symbol(), "Fe");
        let si: Element = "si".parse().unwrap();
        assert_eq!(si.atomic_number(), 14);
        assert!("Xy".parse::<Element>().is_err());
        assert!(Element::new(0).is_err());
        assert!(Element::new(150).is_err());
    }

    #[test]
    fn edge_energies_are_sane() {
        let fe = Element::new(26).unwrap();
        assert_relative_eq!(fe.edge_energy(EdgeLevel::K), 7112.0);
        let zr = Element::new(40).unwrap();
        assert_relative_eq!(zr.edge_energy(EdgeLevel::K), 17998.0);
        // Edges must decrease K > L1 > L2 > L3 > M3.
        for z in 20..=92 {
            let el = Element::new(z).unwrap();
            assert!(el.edge_energy(EdgeLevel::K) > el.edge_energy(EdgeLevel::L1));
            assert!(el.edge_energy(EdgeLevel::L1) > el.edge_energy(EdgeLevel::L2));
            assert!(el.edge_energy(EdgeLevel::L2) > el.edge_energy(EdgeLevel::L3));
            assert!(el.edge_energy(EdgeLevel::L3) > el.edge_energy(EdgeLevel::M3));
        }
    }

    #[test]
    fn fluorescence_yields_match_reference_points() {
        let fe = Element::new(26).unwrap();
        assert_relative_eq!(fe.fluor_yield_k(), 0.347, max_relative = 0.05);
        let si = Element::new(14).unwrap();
        assert_relative_eq!(si.fluor_yield_k(), 0.050, max_relative = 0.15);
        let w = Element::new(74).unwrap();
        assert_relative_eq!(w.fluor_yield_l3(), 0.26, max_relative = 0.25);
    }
}
