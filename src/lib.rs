// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Quantitative X-ray fluorescence analysis for the PIXL instrument on
//! Mars: a fundamental-parameters forward model, a linear least-squares
//! fitter, and the composition-iteration loops built on them.

pub mod cli;
pub mod conditions;
pub(crate) mod constants;
pub mod detector;
pub mod elements;
pub mod energy_cal;
mod error;
pub mod fit;
pub mod fp;
pub mod io;
pub mod map;
pub mod material;
pub mod math;
pub mod optic;
pub mod quant;
pub mod refdata;
pub mod snip;
pub mod source;
pub mod spectrum;
pub mod standards;
pub mod utils;

// Re-exports.
pub use cli::{dispatch, Cli, Command};
pub use conditions::{assemble, Conditions, ConditionsInput};
pub use error::PiquantError;
pub use quant::{quantify_unknown, AnalysisContext, Calibration};
pub use refdata::{Element, Series};
pub use spectrum::Spectrum;
