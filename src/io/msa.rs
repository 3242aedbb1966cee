// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
EMSA/MAS (ISO 22029) spectrum files with the PIXL `##` extensions.

Keyword lines are `#KEY : value` (case-insensitive keys, CR/LF tolerant);
the data block starts at `#SPECTRUM` with one value per line, or NCOLUMNS
comma-separated values per line for multi-detector files. keV axes are
converted to eV on read. When the `##TRIGGERS` statistics are present,
the live time is corrected by `live_DSPC * (events + over + under) /
triggers`.
 */

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use log::{debug, warn};

use crate::conditions::{read_config_keyword, ConditionsInput};
use crate::energy_cal::EnergyCal;
use crate::spectrum::Spectrum;

use super::SpectrumFileError;

/// Everything read from one MSA file: one spectrum per column plus any
/// instrument-conditions keywords found among the headers.
#[derive(Debug, Default)]
pub struct MsaContents {
    pub spectra: Vec<Spectrum>,
    pub conditions: ConditionsInput,
}

pub fn read_msa(path: &Path) -> Result<MsaContents, SpectrumFileError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|e| SpectrumFileError::Io {
        path: display.clone(),
        source: e,
    })?;

    let mut format_seen = false;
    let mut npoints = 0_usize;
    let mut ncolumns = 1_usize;
    let mut xperchan = 0.0_f64;
    let mut offset = 0.0_f64;
    let mut kev_axis = false;
    let mut live_times: Vec<f64> = vec![];
    let mut real_times: Vec<f64> = vec![];
    let mut aux = crate::spectrum::AuxInfo::default();
    let mut header = crate::spectrum::HeaderInfo::default();
    let mut conditions = ConditionsInput::new();
    let mut columns: Vec<Vec<f64>> = vec![];
    let mut in_data = false;

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| SpectrumFileError::Io {
            path: display.clone(),
            source: e,
        })?;
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            continue;
        }
        let bad = |what: &str| SpectrumFileError::Format {
            path: display.clone(),
            line: line_no + 1,
            what: what.to_string(),
        };

        if in_data {
            if line.trim_start().starts_with('#') {
                // ENDOFDATA or stray keyword ends the block.
                in_data = false;
                continue;
            }
            let values: Vec<f64> = line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .map(|t| t.parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|_| bad("unparseable spectrum data"))?;
            if values.is_empty() {
                continue;
            }
            if columns.is_empty() {
                columns = vec![vec![]; ncolumns.max(values.len())];
            }
            if values.len() == columns.len() {
                for (col, v) in columns.iter_mut().zip(&values) {
                    col.push(*v);
                }
            } else {
                // One value per line spreads over the columns in turn.
                for v in values {
                    let col = columns
                        .iter_mut()
                        .min_by_key(|c| c.len())
                        .expect("columns not empty");
                    col.push(v);
                }
            }
            continue;
        }

        if !line.trim_start().starts_with('#') {
            return Err(bad("expected a keyword line"));
        }
        let body = line.trim_start().trim_start_matches('#');
        let (keyword_raw, value) = match body.split_once(':') {
            Some((k, v)) => (k, v.trim()),
            None => (body, ""),
        };
        // Keywords may carry a units suffix like "-s" after a blank.
        let keyword = keyword_raw
            .trim()
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();

        match keyword.as_str() {
            "FORMAT" => {
                if !value.to_ascii_uppercase().contains("EMSA/MAS") {
                    return Err(bad("not an EMSA/MAS spectral data file"));
                }
                format_seen = true;
            }
            "VERSION" => {}
            "NPOINTS" => {
                npoints = value.parse::<f64>().map_err(|_| bad("bad NPOINTS"))? as usize
            }
            "NCOLUMNS" => {
                ncolumns = value.parse::<f64>().map_err(|_| bad("bad NCOLUMNS"))? as usize
            }
            "XPERCHAN" => xperchan = value.parse().map_err(|_| bad("bad XPERCHAN"))?,
            "OFFSET" => offset = value.parse().map_err(|_| bad("bad OFFSET"))?,
            "XUNITS" => {
                let v = value.to_ascii_uppercase();
                kev_axis = v.contains("KEV");
            }
            "SIGNALTYPE" => {
                if !value.to_ascii_uppercase().contains("XRF") {
                    warn!("{display}: signal type '{value}' is not XRF");
                }
            }
            "LIVETIME" => {
                live_times = value
                    .split(',')
                    .filter_map(|t| t.trim().parse().ok())
                    .collect();
            }
            "REALTIME" => {
                real_times = value
                    .split(',')
                    .filter_map(|t| t.trim().parse().ok())
                    .collect();
            }
            "DATE" => aux.date = value.to_string(),
            "TIME" => aux.time = value.to_string(),
            "TITLE" => aux.titles.push(value.to_string()),
            "COMMENT" => aux.comments.push(value.to_string()),
            "OWNER" => aux.owner = value.to_string(),
            "XPOSITION" => aux.x = value.parse().unwrap_or(0.0),
            "YPOSITION" => aux.y = value.parse().unwrap_or(0.0),
            "ZPOSITION" => aux.z = value.parse().unwrap_or(0.0),
            "SCLK" => aux.sclk = value.parse().unwrap_or(0),
            "RTT" => aux.rtt = value.parse().unwrap_or(0),
            "USN" => aux.usn = value.parse().unwrap_or(0),
            "DPC" => aux.dpc = value.parse().unwrap_or(0),
            "PMC" => aux.pmc = value.parse().unwrap_or(0),
            "DETECTOR_ID" => aux.det_id = value.to_string(),
            "LIVETIME_DSPC" => header.live_time_dspc = value.parse().unwrap_or(0.0),
            "EVENTS" => header.events = value.parse().unwrap_or(0),
            "TRIGGERS" => header.triggers = value.parse().unwrap_or(0),
            "OVERFLOWS" => header.overflows = value.parse().unwrap_or(0),
            "UNDERFLOWS" => header.underflows = value.parse().unwrap_or(0),
            "BASE_EVENTS" => header.baseline_samples = value.parse().unwrap_or(0),
            "RESETS" => header.preamp_resets = value.parse().unwrap_or(0),
            "SATURATES" => header.saturates = value.parse().unwrap_or(0),
            "SPECTRUM" => in_data = true,
            "ENDOFDATA" => in_data = false,
            _ => {
                // Conditions keywords share the config-file vocabulary.
                if let Some(key) = read_config_keyword(&keyword) {
                    if let Ok(v) = value.parse::<f64>() {
                        conditions.set(key, v);
                    }
                } else {
                    debug!("{display}: ignoring keyword #{keyword}");
                }
            }
        }
    }

    if !format_seen {
        return Err(SpectrumFileError::Format {
            path: display.clone(),
            line: 1,
            what: "missing #FORMAT EMSA/MAS line".to_string(),
        });
    }
    if columns.is_empty() || columns.iter().all(|c| c.is_empty()) {
        return Err(SpectrumFileError::Format {
            path: display.clone(),
            line: 0,
            what: "no spectrum data".to_string(),
        });
    }

    let scale = if kev_axis { 1000.0 } else { 1.0 };
    let cal = EnergyCal::new(offset * scale, xperchan * scale);
    let mut spectra = vec![];
    for (i, counts) in columns.into_iter().enumerate() {
        if counts.is_empty() {
            continue;
        }
        if npoints > 0 && counts.len() != npoints {
            warn!(
                "{display}: column {i} has {} points, header says {npoints}",
                counts.len()
            );
        }
        let mut s = Spectrum::new(counts, cal);
        let mut live = live_times.get(i).copied().unwrap_or_else(|| {
            live_times.first().copied().unwrap_or(0.0)
        });
        // DSPC throughput correction.
        if header.triggers > 0 && header.live_time_dspc > 0.0 {
            let events = header.events + header.overflows + header.underflows;
            live = header.live_time_dspc * events as f64 / header.triggers as f64;
        }
        s.set_live_time(live);
        s.set_real_time(
            real_times
                .get(i)
                .copied()
                .unwrap_or_else(|| real_times.first().copied().unwrap_or(0.0)),
        );
        s.aux_info = aux.clone();
        s.header_info = header.clone();
        s.file_name = display.clone();
        spectra.push(s);
    }

    Ok(MsaContents {
        spectra,
        conditions,
    })
}

/// Write a spectrum as a single-column MSA file.
pub fn write_msa(spectrum: &Spectrum, path: &Path) -> Result<(), SpectrumFileError> {
    let display = path.display().to_string();
    let mut f = File::create(path).map_err(|e| SpectrumFileError::Io {
        path: display.clone(),
        source: e,
    })?;
    let io_err = |e| SpectrumFileError::Io {
        path: display.clone(),
        source: e,
    };
    let cal = spectrum.calibration();
    writeln!(f, "#FORMAT      : EMSA/MAS spectral data file").map_err(io_err)?;
    writeln!(f, "#VERSION     : TC202v2.0 PIXL").map_err(io_err)?;
    for title in &spectrum.aux_info.titles {
        writeln!(f, "#TITLE       : {title}").map_err(io_err)?;
    }
    writeln!(f, "#NPOINTS     : {}", spectrum.num_channels()).map_err(io_err)?;
    writeln!(f, "#NCOLUMNS    : 1").map_err(io_err)?;
    writeln!(f, "#XUNITS      : eV").map_err(io_err)?;
    writeln!(f, "#YUNITS      : COUNTS").map_err(io_err)?;
    writeln!(f, "#DATATYPE    : Y").map_err(io_err)?;
    writeln!(f, "#XPERCHAN    : {:.6}", cal.per_channel()).map_err(io_err)?;
    writeln!(f, "#OFFSET      : {:.6}", cal.start()).map_err(io_err)?;
    writeln!(f, "#SIGNALTYPE  : XRF").map_err(io_err)?;
    writeln!(f, "#LIVETIME  -s: {:.6}", spectrum.live_time()).map_err(io_err)?;
    writeln!(f, "#REALTIME  -s: {:.6}", spectrum.real_time()).map_err(io_err)?;
    if spectrum.geometry() > 0.0 {
        writeln!(f, "##GEOMETRY   : {:.6}", spectrum.geometry()).map_err(io_err)?;
    }
    for comment in &spectrum.aux_info.comments {
        writeln!(f, "#COMMENT     : {comment}").map_err(io_err)?;
    }
    writeln!(f, "#SPECTRUM    :").map_err(io_err)?;
    for v in spectrum.measured() {
        writeln!(f, "{v:.1}").map_err(io_err)?;
    }
    writeln!(f, "#ENDOFDATA   :").map_err(io_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use indoc::indoc;

    use super::*;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn reads_single_column_msa() {
        let f = write_temp(indoc! {"
            #FORMAT      : EMSA/MAS spectral data file
            #VERSION     : TC202v2.0 PIXL
            #NPOINTS     : 5
            #XPERCHAN    : 11.85
            #OFFSET      : -3.0
            #XUNITS      : eV
            #SIGNALTYPE  : XRF
            #LIVETIME  -s: 120.5
            #REALTIME  -s: 130.0
            #SPECTRUM    :
            1
            2
            3
            4
            5
            #ENDOFDATA   :
        "});
        let contents = read_msa(f.path()).unwrap();
        assert_eq!(contents.spectra.len(), 1);
        let s = &contents.spectra[0];
        assert_eq!(s.num_channels(), 5);
        assert_abs_diff_eq!(s.measured()[4], 5.0);
        assert_relative_eq!(s.live_time(), 120.5);
        assert_relative_eq!(s.calibration().per_channel(), 11.85);
        assert_relative_eq!(s.calibration().start(), -3.0);
    }

    #[test]
    fn kev_axis_scales_to_ev() {
        let f = write_temp(indoc! {"
            #FORMAT      : EMSA/MAS spectral data file
            #NPOINTS     : 2
            #XPERCHAN    : 0.01185
            #OFFSET      : 0.0
            #XUNITS      : keV
            #LIVETIME    : 10
            #SPECTRUM    :
            7
            9
        "});
        let contents = read_msa(f.path()).unwrap();
        assert_relative_eq!(
            contents.spectra[0].calibration().per_channel(),
            11.85,
            max_relative = 1e-9
        );
    }

    #[test]
    fn two_column_msa_gives_two_spectra() {
        let f = write_temp(indoc! {"
            #FORMAT      : EMSA/MAS spectral data file
            #NPOINTS     : 3
            #NCOLUMNS    : 2
            #XPERCHAN    : 10
            #OFFSET      : 0
            #XUNITS      : eV
            #LIVETIME    : 10.0, 12.0
            #SPECTRUM    :
            1, 10
            2, 20
            3, 30
            #ENDOFDATA   :
        "});
        let contents = read_msa(f.path()).unwrap();
        assert_eq!(contents.spectra.len(), 2);
        assert_abs_diff_eq!(contents.spectra[0].measured()[2], 3.0);
        assert_abs_diff_eq!(contents.spectra[1].measured()[2], 30.0);
        assert_relative_eq!(contents.spectra[1].live_time(), 12.0);
    }

    #[test]
    fn triggers_correct_live_time() {
        let f = write_temp(indoc! {"
            #FORMAT      : EMSA/MAS spectral data file
            #NPOINTS     : 2
            #XPERCHAN    : 10
            #OFFSET      : 0
            #XUNITS      : eV
            #LIVETIME    : 100.0
            ##LIVETIME_DSPC : 100.0
            ##EVENTS     : 900
            ##TRIGGERS   : 1000
            ##OVERFLOWS  : 50
            ##UNDERFLOWS : 50
            #SPECTRUM    :
            1
            2
        "});
        let contents = read_msa(f.path()).unwrap();
        assert_relative_eq!(contents.spectra[0].live_time(), 100.0 * 1000.0 / 1000.0);
    }

    #[test]
    fn missing_format_is_an_error() {
        let f = write_temp("#NPOINTS : 2\n#SPECTRUM :\n1\n2\n");
        assert!(matches!(
            read_msa(f.path()),
            Err(SpectrumFileError::Format { .. })
        ));
    }

    #[test]
    fn conditions_keywords_collected() {
        let f = write_temp(indoc! {"
            #FORMAT      : EMSA/MAS spectral data file
            #NPOINTS     : 2
            #XPERCHAN    : 10
            #OFFSET      : 0
            #XUNITS      : eV
            #LIVETIME    : 5
            ##ANODE      : 45
            ##KV         : 28
            #SPECTRUM    :
            1
            2
        "});
        let contents = read_msa(f.path()).unwrap();
        assert_eq!(
            contents
                .conditions
                .get(crate::conditions::ConditionKey::AnodeZ),
            45.0
        );
    }

    #[test]
    fn msa_round_trip() {
        let mut s = Spectrum::new(
            (0..16).map(|i| i as f64 * 3.0).collect(),
            EnergyCal::new(-5.0, 11.85),
        );
        s.set_live_time(77.25);
        s.set_real_time(80.5);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.msa");
        write_msa(&s, &path).unwrap();
        let back = read_msa(&path).unwrap();
        let r = &back.spectra[0];
        assert_eq!(r.num_channels(), 16);
        for (a, b) in s.measured().iter().zip(r.measured()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
        assert_relative_eq!(r.live_time(), 77.25, max_relative = 1e-6);
        assert_relative_eq!(r.real_time(), 80.5, max_relative = 1e-6);
        assert_relative_eq!(r.calibration().per_channel(), 11.85, max_relative = 1e-6);
        assert_relative_eq!(r.calibration().start(), -5.0, max_relative = 1e-6);
    }
}
