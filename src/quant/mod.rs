// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Quantification: converting fit amplitudes to compositions.

`unknown` runs the quantify-as-unknown outer loop; `calibrate` derives
element calibration factors from standards; `evaluate` quantifies each
standard against a calibration that excludes it.
 */

mod calibrate;
mod ecf;
mod unknown;

pub use calibrate::{
    calibrate_standards, evaluate_standards, fit_one_standard, CalibrateError, EvaluateRow,
};
pub use ecf::{Calibration, CalibrationFileError, Ecf, EcfTerm};
pub use unknown::{quantify_unknown, QuantError, QuantResult};

use crate::constants::{SNIP_DEFAULT_FWHM, SNIP_DEFAULT_ITERATIONS};
use crate::snip::{snip_two_zone, SnipZone};
use crate::spectrum::{ComponentKind, Spectrum, SpectrumComponent};

/// Per-run analysis options threaded through quantification. This also
/// carries the iron-oxide default override so nothing touches global
/// state.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisContext {
    pub fe_oxide_ratio: Option<f64>,
    /// Report (and convert compositions) as oxides.
    pub oxides: bool,
    pub carbonates: bool,
    /// Normalization target in percent (from `-n`); None leaves sums
    /// alone.
    pub normalization: Option<f64>,
}

/// Compute the SNIP background from the measured counts using the
/// spectrum's background parameter vectors (`-b`/`-bh`/`-bx`), and attach
/// or refresh the SNIP background component.
pub fn attach_snip_background(spectrum: &mut Spectrum) {
    let n = spectrum.num_channels();
    if n == 0 {
        return;
    }
    // Parameter layout: [fwhm, iterations, start_ch, end_ch]. An explicit
    // zero width disables the strip and leaves the background to the
    // calculated continuum alone.
    if spectrum.bkg_params.first() == Some(&0.0) {
        let keep: Vec<SpectrumComponent> = spectrum
            .components()
            .iter()
            .filter(|c| !matches!(c.kind, ComponentKind::SnipBackground))
            .cloned()
            .collect();
        spectrum.reset_components(keep);
        return;
    }
    let p = spectrum.bkg_params.clone();
    let fwhm = p.first().copied().filter(|&v| v > 0.0).unwrap_or(SNIP_DEFAULT_FWHM as f64)
        as usize;
    let iterations = p
        .get(1)
        .copied()
        .filter(|&v| v > 0.0)
        .unwrap_or(SNIP_DEFAULT_ITERATIONS as f64) as usize;
    let ch1 = p.get(2).copied().unwrap_or(0.0).max(0.0) as usize;
    let ch2 = p
        .get(3)
        .copied()
        .filter(|&v| v > 0.0)
        .unwrap_or((n - 1) as f64) as usize;
    // Second zone from the crossover parameters: [ch1, ch2, fwhm], with
    // the width optionally supplied by the high-zone vector instead.
    let zone = match (spectrum.bx_params.as_slice(), spectrum.bh_params.first()) {
        ([z1, z2, zf, ..], _) if *z2 > *z1 && *zf > 0.0 => Some(SnipZone {
            ch1: *z1 as usize,
            ch2: *z2 as usize,
            fwhm: *zf as usize,
        }),
        ([z1, z2], Some(zf)) if *z2 > *z1 && *zf > 0.0 => Some(SnipZone {
            ch1: *z1 as usize,
            ch2: *z2 as usize,
            fwhm: *zf as usize,
        }),
        _ => None,
    };
    let background = snip_two_zone(spectrum.measured(), ch1, ch2, fwhm, iterations, zone);

    let existing = spectrum
        .components()
        .iter()
        .position(|c| matches!(c.kind, ComponentKind::SnipBackground));
    match existing {
        Some(i) => {
            let c = &mut spectrum.components_mut()[i];
            c.spectrum = background;
            c.coefficient = 1.0;
        }
        None => spectrum.add_component(SpectrumComponent::with_spectrum(
            ComponentKind::SnipBackground,
            background,
        )),
    }
}

#[cfg(test)]
mod tests;
