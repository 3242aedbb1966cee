// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all piquant-related errors. This should be the *only*
//! error enum that is publicly visible, and it fixes the process exit
//! code for every failure class.

use thiserror::Error;

use crate::conditions::ConditionsError;
use crate::elements::ElementListError;
use crate::energy_cal::EnergyCalError;
use crate::fit::FitError;
use crate::io::SpectrumFileError;
use crate::map::MapError;
use crate::optic::OpticError;
use crate::quant::{CalibrateError, CalibrationFileError, QuantError};
use crate::source::SourceError;
use crate::standards::StandardsError;
use crate::utils::CombineError;

/// The *only* publicly visible error from piquant.
#[derive(Error, Debug)]
pub enum PiquantError {
    #[error("Bad command line: {0}")]
    Arguments(String),

    #[error(transparent)]
    Conditions(#[from] ConditionsError),

    #[error(transparent)]
    Optic(#[from] OpticError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    SpectrumFile(#[from] SpectrumFileError),

    #[error(transparent)]
    ElementList(#[from] ElementListError),

    #[error(transparent)]
    EnergyCal(#[from] EnergyCalError),

    #[error(transparent)]
    Standards(#[from] StandardsError),

    #[error(transparent)]
    CalibrationFile(#[from] CalibrationFileError),

    #[error(transparent)]
    Calibrate(#[from] CalibrateError),

    #[error(transparent)]
    Quant(#[from] QuantError),

    #[error(transparent)]
    Fit(#[from] FitError),

    #[error(transparent)]
    Combine(#[from] CombineError),

    #[error(transparent)]
    Map(#[from] MapError),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl PiquantError {
    /// Process exit code: 0 is success, -2xxx argument parsing, -5xx
    /// conditions assembly, -999999 file format, -1 anything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            PiquantError::Arguments(_) => -2000,
            PiquantError::Conditions(e) => e.exit_code(),
            PiquantError::Optic(_) => -590,
            PiquantError::Source(_) => -591,
            PiquantError::SpectrumFile(e) => e.exit_code(),
            PiquantError::Standards(_) => -999999,
            PiquantError::CalibrationFile(_) => -999999,
            _ => -1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conditions::ConditionKey;

    #[test]
    fn exit_codes_by_class() {
        let e = PiquantError::Arguments("bad".into());
        assert_eq!(e.exit_code(), -2000);
        let e: PiquantError = ConditionsError::InvalidParameter {
            key: ConditionKey::Kv,
            value: -1.0,
        }
        .into();
        assert_eq!(e.exit_code(), -501);
        let e: PiquantError = SpectrumFileError::UnknownFormat("x".into()).into();
        assert_eq!(e.exit_code(), -999999);
    }
}
