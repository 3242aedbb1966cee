// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Useful constants.

All constants *must* be double precision. `piquant` should do as many
calculations as possible in double precision; spectra are stored as `f64`
channel arrays throughout.
 */

pub use std::f64::consts::PI;

/// Avogadro's number (1/mol).
pub const AVOGADRO: f64 = 6.02214076e23;

/// Classical electron radius (cm).
pub const R_ELECTRON_CM: f64 = 2.8179403262e-13;

/// Electron rest energy (eV).
pub const ELECTRON_REST_ENERGY_EV: f64 = 510998.95;

/// hc, for converting photon energy (eV) to wavelength (Angstrom).
pub const HC_EV_ANGSTROM: f64 = 12398.42;

/// Reference energy for detector resolution specifications: Mn K-alpha (eV).
pub const RESOLUTION_REFERENCE_ENERGY: f64 = 5898.8;

/// Gaussian FWHM = SIGMA_TO_FWHM * sigma.
pub const SIGMA_TO_FWHM: f64 = 2.3548200450309493; // sqrt(8 ln 2)

/// Default minimum energy for anything to reach the detector (eV). Below
/// this the detector window and electronics make the response unusable.
pub const DEFAULT_MINIMUM_ENERGY_EV: f64 = 900.0;

/// Energy region used for the reported region counts (eV).
pub const REGION_COUNTS_START_EV: f64 = 1000.0;
pub const REGION_COUNTS_END_EV: f64 = 7250.0;

/// Convergence tolerance on the reduced chi-squared of successive linear
/// fits of one spectrum.
pub const FIT_CHISQ_TOLERANCE: f64 = 1.0e-3;

/// Maximum number of linear-fit iterations for one spectrum.
pub const FIT_MAX_ITERATIONS: usize = 40;

/// Convergence tolerance on element mass fractions in the quantify loop.
pub const QUANT_FRACTION_TOLERANCE: f64 = 1.0e-3;

/// Maximum number of composition iterations in the quantify loop.
pub const QUANT_MAX_ITERATIONS: usize = 10;

/// Components whose spectrum sums to less than this times the largest
/// component sum are excluded from the design matrix.
pub const COMPONENT_SUM_RATIO_FLOOR: f64 = 1.0e-10;

/// Default SNIP parameters: smoothing width (channels) and iterations.
pub const SNIP_DEFAULT_FWHM: usize = 14;
pub const SNIP_DEFAULT_ITERATIONS: usize = 24;

/// Micrometers to centimeters.
pub const UM_TO_CM: f64 = 1.0e-4;

/// Nanometers to centimeters.
pub const NM_TO_CM: f64 = 1.0e-7;

/// Millimeters to centimeters.
pub const MM_TO_CM: f64 = 1.0e-1;

/// Steradians in a sphere, for converting solid angles to fractions.
pub const SPHERE_STERADIANS: f64 = 4.0 * PI;
