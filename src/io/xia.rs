// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! XIA/Ketek MCA files from ProSpect: `keyword = value` headers (`File
//! Version = 2`, `MCA Data = ProSpect`), count rates and times, then a
//! channel-count line followed by the counts. The live time is derived
//! from the real time and the input/output count rates when present.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::energy_cal::EnergyCal;
use crate::spectrum::Spectrum;

use super::SpectrumFileError;

pub fn read_xia(path: &Path) -> Result<Spectrum, SpectrumFileError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|e| SpectrumFileError::Io {
        path: display.clone(),
        source: e,
    })?;

    let mut version_ok = false;
    let mut prospect_seen = false;
    let mut num_bins = 0_usize;
    let mut icr = 0.0_f64;
    let mut ocr = 0.0_f64;
    let mut real_time = 0.0_f64;
    let mut live_time = 0.0_f64;
    let mut title = String::new();
    let mut counts: Vec<f64> = vec![];
    let mut expect_count_header = false;
    let mut in_data = false;

    for (line_no, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| SpectrumFileError::Io {
            path: display.clone(),
            source: e,
        })?;
        let trimmed = line.trim_end_matches(['\r', '\n']).trim().to_string();
        if trimmed.is_empty() {
            continue;
        }
        let bad = |what: String| SpectrumFileError::Format {
            path: display.clone(),
            line: line_no + 1,
            what,
        };

        if in_data {
            for token in trimmed.split(|c: char| c == ',' || c.is_whitespace()) {
                if token.is_empty() {
                    continue;
                }
                counts.push(
                    token
                        .parse()
                        .map_err(|_| bad(format!("bad count value '{token}'")))?,
                );
            }
            continue;
        }
        if expect_count_header {
            // The line before the data repeats the channel count.
            let n: usize = trimmed
                .split_whitespace()
                .next()
                .and_then(|t| t.parse().ok())
                .ok_or_else(|| bad("bad channel-count line".to_string()))?;
            if num_bins > 0 && n != num_bins {
                return Err(bad(format!(
                    "channel count {n} does not match NUMBER MCA BINS {num_bins}"
                )));
            }
            expect_count_header = false;
            in_data = true;
            continue;
        }

        let (keyword, value) = match trimmed.split_once('=') {
            Some((k, v)) => (k.trim().to_ascii_uppercase(), v.trim().to_string()),
            None => continue,
        };
        let rate = |v: &str| -> f64 {
            let num: f64 = v
                .split_whitespace()
                .next()
                .and_then(|t| t.parse().ok())
                .unwrap_or(0.0);
            if v.contains("kcps") {
                num * 1000.0
            } else {
                num
            }
        };
        match keyword.as_str() {
            "FILE VERSION" => version_ok = value == "2",
            "MCA DATA" => prospect_seen = value.contains("ProSpect"),
            "TITLE" | "SAMPLE" => title = value,
            "NUMBER MCA BINS" => {
                num_bins = value
                    .split_whitespace()
                    .next()
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(0);
                expect_count_header = num_bins > 0;
            }
            "INPUT COUNT RATE" => icr = rate(&value),
            "OUTPUT COUNT RATE" => ocr = rate(&value),
            "REALTIME" => real_time = rate(&value),
            "LIVETIME" => live_time = rate(&value),
            _ => {}
        }
    }

    if !version_ok || !prospect_seen {
        return Err(SpectrumFileError::Format {
            path: display.clone(),
            line: 1,
            what: "not a ProSpect version 2 MCA file".to_string(),
        });
    }
    if counts.is_empty() {
        return Err(SpectrumFileError::Format {
            path: display.clone(),
            line: 0,
            what: "no channel data".to_string(),
        });
    }

    // Throughput-corrected live time when the rates are available.
    if real_time > 0.0 && icr > 0.0 && ocr > 0.0 {
        live_time = real_time * ocr / icr;
    }

    let mut s = Spectrum::new(counts, EnergyCal::default());
    s.set_live_time(live_time);
    s.set_real_time(real_time);
    if !title.is_empty() {
        s.aux_info.titles.push(title);
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
    fn reads_xia_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(
            indoc! {"
                File Version = 2
                MCA Data = ProSpect 1.1
                Sample = breadboard test
                Input Count Rate = 10.0 kcps
                Output Count Rate = 8.0 kcps
                Realtime = 100.0
                Livetime = 95.0
                Number MCA Bins = 4
                4
                1 2 3 4
            "}
            .as_bytes(),
        )
        .unwrap();
        let s = read_xia(f.path()).unwrap();
        assert_eq!(s.num_channels(), 4);
        assert_relative_eq!(s.real_time(), 100.0);
        // live = real * ocr / icr.
        assert_relative_eq!(s.live_time(), 80.0);
        // No calibration in the file.
        assert!(!s.calibration().good());
    }

    #[test]
    fn wrong_version_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"File Version = 1\nMCA Data = ProSpect\n").unwrap();
        assert!(matches!(
            read_xia(f.path()),
            Err(SpectrumFileError::Format { .. })
        ));
    }
}
