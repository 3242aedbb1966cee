// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! AmpTek MCA files: `<<PMCA SPECTRUM>>` header, `keyword - value` lines,
//! a `<<CALIBRATION>>` section of channel/energy pairs (keV), the
//! `<<DATA>>` counts and `<<END>>`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::warn;

use crate::energy_cal::EnergyCal;
use crate::math::linear_fit;
use crate::spectrum::Spectrum;

use super::SpectrumFileError;

pub fn read_amptek(path: &Path) -> Result<Spectrum, SpectrumFileError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|e| SpectrumFileError::Io {
        path: display.clone(),
        source: e,
    })?;
    let mut lines = BufReader::new(file).lines().enumerate();

    let (_, first) = match lines.next() {
        Some((i, Ok(l))) => (i, l),
        Some((_, Err(e))) => {
            return Err(SpectrumFileError::Io {
                path: display.clone(),
                source: e,
            })
        }
        None => {
            return Err(SpectrumFileError::Format {
                path: display.clone(),
                line: 1,
                what: "empty file".to_string(),
            })
        }
    };
    if first.trim() != "<<PMCA SPECTRUM>>" {
        return Err(SpectrumFileError::Format {
            path: display.clone(),
            line: 1,
            what: format!("not an AmpTek MCA file (first line '{}')", first.trim()),
        });
    }

    #[derive(PartialEq)]
    enum Section {
        Header,
        Calibration,
        Data,
        Done,
    }
    let mut section = Section::Header;
    let mut live_time = 0.0;
    let mut real_time = 0.0;
    let mut description = String::new();
    let mut cal_channels: Vec<f64> = vec![];
    let mut cal_energies: Vec<f64> = vec![];
    let mut counts: Vec<f64> = vec![];

    for (line_no, line) in lines {
        let line = line.map_err(|e| SpectrumFileError::Io {
            path: display.clone(),
            source: e,
        })?;
        let trimmed = line.trim_end_matches(['\r', '\n']).trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        match trimmed.as_str() {
            "<<CALIBRATION>>" => {
                section = Section::Calibration;
                continue;
            }
            "<<DATA>>" => {
                section = Section::Data;
                continue;
            }
            "<<END>>" => {
                section = Section::Done;
                continue;
            }
            _ => {}
        }
        match section {
            Section::Header => {
                let (token, value) = match trimmed.split_once('-') {
                    Some((t, v)) => (t.trim().to_ascii_uppercase(), v.trim().to_string()),
                    None => continue,
                };
                match token.as_str() {
                    "LIVE_TIME" => live_time = value.parse().unwrap_or(0.0),
                    "REAL_TIME" => real_time = value.parse().unwrap_or(0.0),
                    "DESCRIPTION" => description = value,
                    _ => {}
                }
            }
            Section::Calibration => {
                if trimmed.to_ascii_uppercase().starts_with("LABEL") {
                    if !trimmed.to_ascii_uppercase().contains("CHANNEL") {
                        warn!("{display}: unknown calibration label '{trimmed}'");
                    }
                    continue;
                }
                let mut parts = trimmed.split_whitespace();
                let ch: Option<f64> = parts.next().and_then(|t| t.parse().ok());
                let en: Option<f64> = parts.next().and_then(|t| t.parse().ok());
                if let (Some(ch), Some(en)) = (ch, en) {
                    cal_channels.push(ch);
                    cal_energies.push(en);
                } else {
                    return Err(SpectrumFileError::Format {
                        path: display.clone(),
                        line: line_no + 1,
                        what: "bad calibration pair".to_string(),
                    });
                }
            }
            Section::Data => {
                for token in trimmed.split_whitespace() {
                    counts.push(token.parse().map_err(|_| SpectrumFileError::Format {
                        path: display.clone(),
                        line: line_no + 1,
                        what: "bad count value".to_string(),
                    })?);
                }
            }
            Section::Done => break,
        }
    }

    if counts.is_empty() {
        return Err(SpectrumFileError::Format {
            path: display.clone(),
            line: 0,
            what: "no data section".to_string(),
        });
    }

    // Two or more calibration pairs give a linear energy fit; energies
    // are keV on disk.
    let cal = if cal_channels.len() >= 2 {
        let (intercept, slope) = linear_fit(&cal_channels, &cal_energies);
        EnergyCal::new(intercept * 1000.0, slope * 1000.0)
    } else {
        EnergyCal::default()
    };

    let mut s = Spectrum::new(counts, cal);
    s.set_live_time(live_time);
    s.set_real_time(real_time);
    if !description.is_empty() {
        s.aux_info.titles.push(description);
    }
    s.file_name = display;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use approx::assert_relative_eq;
    use indoc::indoc;

    use super::*;

    #[test]
    fn reads_amptek_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(
            indoc! {"
                <<PMCA SPECTRUM>>
                TAG - live_data
                DESCRIPTION - bench test pellet
                LIVE_TIME - 99.5
                REAL_TIME - 101.0
                <<CALIBRATION>>
                LABEL - Channel
                100 1.0
                1000 10.0
                <<DATA>>
                0
                5
                12
                7
                <<END>>
            "}
            .as_bytes(),
        )
        .unwrap();
        let s = read_amptek(f.path()).unwrap();
        assert_eq!(s.num_channels(), 4);
        assert_relative_eq!(s.live_time(), 99.5);
        // 1 keV at ch 100, 10 keV at ch 1000: 10 eV/ch, 0 offset.
        assert_relative_eq!(s.calibration().per_channel(), 10.0, max_relative = 1e-9);
        assert_relative_eq!(s.calibration().start(), 0.0, epsilon = 1e-6);
        assert_eq!(s.aux_info.titles[0], "bench test pellet");
    }

    #[test]
    fn rejects_non_amptek() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"#FORMAT : EMSA/MAS\n").unwrap();
        assert!(matches!(
            read_amptek(f.path()),
            Err(SpectrumFileError::Format { .. })
        ));
    }
}
