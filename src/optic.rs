// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
X-ray optic transmission.

The optic sits between the tube and the specimen and reshapes the
excitation spectrum. It is either absent, an idealized band-pass used for
tests, the built-in flight-model response (derived from fits to Teflon
calibration spectra), or a table read from a user file of
energy/transmission pairs.
 */

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

use crate::math::CubicSpline;

#[derive(Error, Debug)]
pub enum OpticError {
    #[error("Couldn't read optic transmission file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Bad line {line} in optic transmission file {path}")]
    BadLine { path: String, line: usize },

    #[error("Optic transmission file {0} needs at least two points")]
    TooFewPoints(String),
}

/// Flight-model optic response vs energy (eV), from PIQUANT fits to the
/// post-rework thermal-test Teflon spectra.
const FM_OPTIC_X: [f64; 12] = [
    0.0, 4000.0, 6000.0, 8000.0, 10000.0, 12000.0, 14000.0, 16000.0, 18000.0, 20000.0, 25000.0,
    30000.0,
];
const FM_OPTIC_Y: [f64; 12] = [
    15.7810, 6.8613, 7.8, 6.0398, 4.0440, 2.1134, 1.2380, 0.6, 0.377, 0.3, 0.04, 0.0117,
];

#[derive(Debug)]
enum OpticKind {
    None,
    /// Unit transmission inside the band, zero outside. For testing.
    Boxcar { lo_ev: f64, hi_ev: f64 },
    /// Interpolated table, either the built-in flight model curve or one
    /// read from a file.
    Table { spline: CubicSpline, max_ev: f64 },
}

#[derive(Debug)]
pub struct XrayOptic {
    kind: OpticKind,
    file_title: Option<String>,
}

impl Default for XrayOptic {
    fn default() -> Self {
        XrayOptic {
            kind: OpticKind::None,
            file_title: None,
        }
    }
}

impl XrayOptic {
    pub fn none() -> XrayOptic {
        XrayOptic::default()
    }

    pub fn boxcar(lo_ev: f64, hi_ev: f64) -> XrayOptic {
        XrayOptic {
            kind: OpticKind::Boxcar { lo_ev, hi_ev },
            file_title: None,
        }
    }

    /// The built-in PIXL flight-model response.
    pub fn flight_model() -> XrayOptic {
        let spline = CubicSpline::new(FM_OPTIC_X.to_vec(), FM_OPTIC_Y.to_vec())
            .expect("flight model optic table is well formed");
        XrayOptic {
            kind: OpticKind::Table {
                spline,
                max_ev: FM_OPTIC_X[FM_OPTIC_X.len() - 1],
            },
            file_title: Some("PIXL FM optic (built in)".to_string()),
        }
    }

    /// Read an optic transmission file: comment lines start with `//` or
    /// `#`, data lines are `energy_eV transmission` (comma or blank
    /// separated).
    pub fn from_file(path: &Path) -> Result<XrayOptic, OpticError> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|e| OpticError::Io {
            path: display.clone(),
            source: e,
        })?;
        let mut title = None;
        let mut energies = Vec::new();
        let mut values = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| OpticError::Io {
                path: display.clone(),
                source: e,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with("//") || trimmed.starts_with('#') {
                if title.is_none() && trimmed.len() > 2 {
                    title = Some(trimmed.trim_start_matches(['/', '#']).trim().to_string());
                }
                continue;
            }
            let mut parts = trimmed.split(|c: char| c == ',' || c.is_whitespace());
            let e: f64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or(OpticError::BadLine {
                    path: display.clone(),
                    line: i + 1,
                })?;
            let t: f64 = parts
                .find(|s| !s.is_empty())
                .and_then(|s| s.parse().ok())
                .ok_or(OpticError::BadLine {
                    path: display.clone(),
                    line: i + 1,
                })?;
            energies.push(e);
            values.push(t);
        }
        if energies.len() < 2 {
            return Err(OpticError::TooFewPoints(display));
        }
        let max_ev = energies[energies.len() - 1];
        let spline =
            CubicSpline::new(energies, values).ok_or(OpticError::TooFewPoints(display))?;
        Ok(XrayOptic {
            kind: OpticKind::Table { spline, max_ev },
            file_title: title,
        })
    }

    pub fn is_present(&self) -> bool {
        !matches!(self.kind, OpticKind::None)
    }

    pub fn file_title(&self) -> Option<&str> {
        self.file_title.as_deref()
    }

    /// Transmission (or response factor) at an energy. Table optics clamp
    /// to zero transmission above the tabulated range and never go
    /// negative between points.
    pub fn transmission(&self, energy_ev: f64) -> f64 {
        match &self.kind {
            OpticKind::None => 1.0,
            OpticKind::Boxcar { lo_ev, hi_ev } => {
                if energy_ev >= *lo_ev && energy_ev <= *hi_ev {
                    1.0
                } else {
                    0.0
                }
            }
            OpticKind::Table { spline, max_ev } => {
                if energy_ev > *max_ev {
                    0.0
                } else {
                    spline.eval(energy_ev).max(0.0)
                }
            }
        }
    }
}
