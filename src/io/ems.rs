// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Conversion of SDD test histograms to the EDR ground-format CSV: the
//! input carries one histogram per row, the output packs the two
//! detectors of each acquisition (consecutive histograms) onto one line.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use log::info;

use super::SpectrumFileError;

/// Convert an SDD CSV to an EDR CSV. Returns the number of output lines.
pub fn convert_sdd_to_edr(input: &Path, output: &Path) -> Result<usize, SpectrumFileError> {
    let in_display = input.display().to_string();
    let file = File::open(input).map_err(|e| SpectrumFileError::Io {
        path: in_display.clone(),
        source: e,
    })?;

    let mut histograms: Vec<Vec<i64>> = vec![];
    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| SpectrumFileError::Io {
            path: in_display.clone(),
            source: e,
        })?;
        let trimmed = line.trim_end_matches(['\r', '\n']).trim();
        if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with('#') {
            continue;
        }
        let values: Vec<i64> = trimmed
            .split(',')
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| {
                t.parse::<f64>()
                    .map(|v| v as i64)
                    .map_err(|_| SpectrumFileError::Format {
                        path: in_display.clone(),
                        line: line_no + 1,
                        what: format!("bad histogram value '{t}'"),
                    })
            })
            .collect::<Result<_, _>>()?;
        if !values.is_empty() {
            histograms.push(values);
        }
    }
    if histograms.is_empty() {
        return Err(SpectrumFileError::Format {
            path: in_display,
            line: 0,
            what: "no histograms in input".to_string(),
        });
    }

    let out_display = output.display().to_string();
    let mut out = File::create(output).map_err(|e| SpectrumFileError::Io {
        path: out_display.clone(),
        source: e,
    })?;
    let io_err = |e| SpectrumFileError::Io {
        path: out_display.clone(),
        source: e,
    };

    let mut lines_written = 0;
    for pair in histograms.chunks(2) {
        let mut fields: Vec<String> = vec![];
        for hist in pair {
            fields.extend(hist.iter().map(|v| v.to_string()));
        }
        writeln!(out, "{}", fields.join(",")).map_err(io_err)?;
        lines_written += 1;
    }
    info!(
        "Converted {} histograms into {} EDR lines",
        histograms.len(),
        lines_written
    );
    Ok(lines_written)
}
