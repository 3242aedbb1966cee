// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Components of a calculated spectrum.
//!
//! Each component is one labeled contribution with its own per-channel
//! spectrum and a multiplicative coefficient adjusted by the fit. The kind
//! is a tagged sum; everything dispatches on it, there is no hidden
//! polymorphism.

use crate::refdata::{Element, Series};

/// What a component represents. Scatter components carry the source line
/// energy they scatter; the L-split components exist so the two halves of
/// an L series can be fit separately when they disagree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComponentKind {
    Element { element: Element, series: Series },
    Compton { source_energy: f64 },
    Rayleigh { source_energy: f64 },
    Continuum,
    SnipBackground,
    PrimaryLines,
    PrimaryContinuum,
    LAlpha { element: Element },
    LBeta1 { element: Element },
    DetectorComptonEscape,
    OpticTransmission,
    Pileup,
}

impl ComponentKind {
    pub fn element(&self) -> Option<Element> {
        match self {
            ComponentKind::Element { element, .. }
            | ComponentKind::LAlpha { element }
            | ComponentKind::LBeta1 { element } => Some(*element),
            _ => None,
        }
    }

    pub fn series(&self) -> Option<Series> {
        match self {
            ComponentKind::Element { series, .. } => Some(*series),
            ComponentKind::LAlpha { .. } | ComponentKind::LBeta1 { .. } => Some(Series::L),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            ComponentKind::Element { element, series } => format!("{element}_{series}"),
            ComponentKind::Compton { source_energy } => {
                format!("Compton_{:.0}eV", source_energy)
            }
            ComponentKind::Rayleigh { source_energy } => {
                format!("Rayleigh_{:.0}eV", source_energy)
            }
            ComponentKind::Continuum => "calc bkg".to_string(),
            ComponentKind::SnipBackground => "SNIP bkg".to_string(),
            ComponentKind::PrimaryLines => "primary lines".to_string(),
            ComponentKind::PrimaryContinuum => "primary continuum".to_string(),
            ComponentKind::LAlpha { element } => format!("{element}_La"),
            ComponentKind::LBeta1 { element } => format!("{element}_Lb1"),
            ComponentKind::DetectorComptonEscape => "Compton escape".to_string(),
            ComponentKind::OpticTransmission => "optic response".to_string(),
            ComponentKind::Pileup => "pileup".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SpectrumComponent {
    pub kind: ComponentKind,
    /// Per-channel contribution at unit coefficient. Emptied by `clean`.
    pub spectrum: Vec<f64>,
    pub coefficient: f64,
    /// Staged coefficient for the next quantification iteration.
    pub adjusted_coefficient: f64,
    pub variance: f64,
    pub residual_error: f64,
    /// Total counts: coefficient times the spectrum sum, kept after
    /// `clean` drops the spectrum itself.
    pub intensity: f64,
    /// Participates in the calculation.
    pub enabled: bool,
    /// Free parameter of the linear fit.
    pub fit: bool,
    /// Drives the mass fraction of its element.
    pub quant: bool,
    /// Sums into the background instead of the peak calculation.
    pub bkg: bool,
    pub plot: bool,
    /// Was actually in the last fit's design matrix.
    pub included: bool,
    pub ignore: bool,
    pub matrix: bool,
    /// Coefficient scale relative to the fit component it follows, for
    /// components that are not free parameters themselves.
    pub non_fit_factor: f64,
}

impl SpectrumComponent {
    pub fn new(kind: ComponentKind) -> SpectrumComponent {
        let (fit, quant, bkg, enabled) = match kind {
            ComponentKind::Element { .. } => (true, true, false, true),
            ComponentKind::Compton { .. } | ComponentKind::Rayleigh { .. } => {
                (true, false, false, true)
            }
            ComponentKind::Continuum => (true, false, true, true),
            ComponentKind::SnipBackground => (false, false, true, true),
            ComponentKind::PrimaryLines | ComponentKind::PrimaryContinuum => {
                (false, false, false, false)
            }
            ComponentKind::LAlpha { .. } | ComponentKind::LBeta1 { .. } => (true, false, false, true),
            ComponentKind::DetectorComptonEscape => (false, false, true, false),
            ComponentKind::OpticTransmission => (false, false, false, true),
            ComponentKind::Pileup => (true, false, false, true),
        };
        SpectrumComponent {
            kind,
            spectrum: vec![],
            coefficient: 1.0,
            adjusted_coefficient: 1.0,
            variance: 0.0,
            residual_error: 0.0,
            intensity: 0.0,
            enabled,
            fit,
            quant,
            bkg,
            plot: true,
            included: false,
            ignore: false,
            matrix: false,
            non_fit_factor: 1.0,
        }
    }

    pub fn with_spectrum(kind: ComponentKind, spectrum: Vec<f64>) -> SpectrumComponent {
        let mut c = SpectrumComponent::new(kind);
        c.spectrum = spectrum;
        c
    }

    pub fn label(&self) -> String {
        self.kind.label()
    }

    pub fn spectrum_sum(&self) -> f64 {
        self.spectrum.iter().sum()
    }

    /// Counts in the scaled component.
    pub fn update_intensity(&mut self) {
        self.intensity = self.coefficient * self.spectrum_sum();
    }

    /// Relative 1-sigma error of the coefficient, percent.
    pub fn rel_err_percent(&self) -> f64 {
        if self.coefficient.abs() > 0.0 && self.variance > 0.0 {
            100.0 * self.variance.sqrt() / self.coefficient.abs()
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_flags_by_kind() {
        let el = Element::new(26).unwrap();
        let c = SpectrumComponent::new(ComponentKind::Element {
            element: el,
            series: Series::K,
        });
        assert!(c.enabled && c.fit && c.quant && !c.bkg);

        let snip = SpectrumComponent::new(ComponentKind::SnipBackground);
        assert!(snip.enabled && !snip.fit && snip.bkg);

        let esc = SpectrumComponent::new(ComponentKind::DetectorComptonEscape);
        assert!(!esc.enabled, "Compton escape starts disabled");

        let compton = SpectrumComponent::new(ComponentKind::Compton {
            source_energy: 20_216.0,
        });
        assert!(compton.fit && !compton.quant);
    }

    #[test]
    fn labels_name_what_they_are() {
        let el = Element::new(26).unwrap();
        let c = SpectrumComponent::new(ComponentKind::Element {
            element: el,
            series: Series::K,
        });
        assert_eq!(c.label(), "Fe_K");
        assert_eq!(
            SpectrumComponent::new(ComponentKind::SnipBackground).label(),
            "SNIP bkg"
        );
    }

    #[test]
    fn intensity_tracks_coefficient() {
        let mut c = SpectrumComponent::with_spectrum(
            ComponentKind::Continuum,
            vec![1.0, 2.0, 3.0],
        );
        c.coefficient = 2.0;
        c.update_intensity();
        assert_eq!(c.intensity, 12.0);
    }
}
