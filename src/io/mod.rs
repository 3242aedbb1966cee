// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Spectrum file input and output.

`read_spectrum_file` sniffs the format (MSA/EMSA with PIXL extensions,
AmpTek MCA, XIA/Ketek MCA) and returns the spectra plus any instrument
conditions carried in the file's headers.
 */

mod amptek;
mod ems;
mod msa;
mod plot;
mod xia;

pub use amptek::read_amptek;
pub use ems::convert_sdd_to_edr;
pub use msa::{read_msa, write_msa, MsaContents};
pub use plot::write_plot_csv;
pub use xia::read_xia;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpectrumFileError {
    #[error("Couldn't access spectrum file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Bad format in {path} line {line}: {what}")]
    Format {
        path: String,
        line: usize,
        what: String,
    },

    #[error("Unrecognised spectrum file format: {0}")]
    UnknownFormat(String),
}

impl SpectrumFileError {
    /// The catch-all file-format process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            SpectrumFileError::Io { .. } => -1,
            _ => -999999,
        }
    }
}

/// Read any supported spectrum file, dispatching on its first line.
pub fn read_spectrum_file(path: &Path) -> Result<MsaContents, SpectrumFileError> {
    let display = path.display().to_string();
    let first_line = {
        let file = File::open(path).map_err(|e| SpectrumFileError::Io {
            path: display.clone(),
            source: e,
        })?;
        BufReader::new(file)
            .lines()
            .next()
            .transpose()
            .map_err(|e| SpectrumFileError::Io {
                path: display.clone(),
                source: e,
            })?
            .unwrap_or_default()
    };
    let first = first_line.trim();

    if first.starts_with('#') {
        return read_msa(path);
    }
    if first == "<<PMCA SPECTRUM>>" {
        let spectrum = read_amptek(path)?;
        return Ok(MsaContents {
            spectra: vec![spectrum],
            conditions: crate::conditions::ConditionsInput::new(),
        });
    }
    if first.to_ascii_uppercase().starts_with("FILE VERSION") {
        let spectrum = read_xia(path)?;
        return Ok(MsaContents {
            spectra: vec![spectrum],
            conditions: crate::conditions::ConditionsInput::new(),
        });
    }
    Err(SpectrumFileError::UnknownFormat(display))
}
