// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;
use std::path::PathBuf;

use crate::conditions::tests::pixl_like_input;
use crate::elements::parse_element_list;
use crate::quant::{AnalysisContext, Calibration};

use super::*;

/// Write a small MSA file with a peak whose size varies by index, so the
/// four map rows are distinguishable.
fn write_test_msa(dir: &std::path::Path, index: usize) -> PathBuf {
    let path = dir.join(format!("pixel_{index:03}.msa"));
    let mut f = File::create(&path).unwrap();
    writeln!(f, "#FORMAT      : EMSA/MAS spectral data file").unwrap();
    writeln!(f, "#VERSION     : TC202v2.0 PIXL").unwrap();
    writeln!(f, "#NPOINTS     : 512").unwrap();
    writeln!(f, "#XPERCHAN    : 11.85").unwrap();
    writeln!(f, "#OFFSET      : 0").unwrap();
    writeln!(f, "#XUNITS      : eV").unwrap();
    writeln!(f, "#SIGNALTYPE  : XRF").unwrap();
    writeln!(f, "#LIVETIME    : 30.0").unwrap();
    writeln!(f, "#SPECTRUM    :").unwrap();
    for ch in 0..512 {
        // A silicon-ish peak near channel 147 plus flat background.
        let peak = 500.0 * (index + 1) as f64
            * (-((ch as f64 - 147.0) / 6.0).powi(2) / 2.0).exp();
        writeln!(f, "{:.1}", 20.0 + peak).unwrap();
    }
    writeln!(f, "#ENDOFDATA   :").unwrap();
    path
}

#[test]
fn map_preserves_input_order_with_two_workers() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<PathBuf> = (0..4).map(|i| write_test_msa(dir.path(), i)).collect();
    let jobs: Vec<MapJob> = files
        .iter()
        .enumerate()
        .map(|(i, f)| MapJob {
            spectrum_file: f.clone(),
            sequence_number: i,
        })
        .collect();

    let cond_input = pixl_like_input();
    let list = parse_element_list("Si", true, None).unwrap();
    let calibration = Calibration::new();
    let params = MapParams {
        conditions_input: &cond_input,
        element_list: &list.entries,
        calibration: &calibration,
        context: AnalysisContext::default(),
        selector: "PFQ",
        detector_select: None,
        energy_override: None,
        bkg_params: vec![],
        bh_params: vec![],
        bx_params: vec![],
        adjust_energy: false,
        adjust_width: false,
        convolve_compton: false,
        threads: 2,
        max_spectra: None,
    };
    let map_file = dir.path().join("map.csv");
    let summary = run_map(jobs, &params, &map_file).unwrap();
    assert_eq!(summary.rows_written + summary.failures, 4);
    assert_eq!(summary.failures, 0);

    let text = std::fs::read_to_string(&map_file).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 5, "header plus four rows");
    assert!(lines[0].contains("Si_%"));
    // Row order equals input file order regardless of completion order.
    for (i, line) in lines[1..].iter().enumerate() {
        assert!(
            line.contains(&format!("pixel_{i:03}.msa")),
            "row {i} out of order: {line}"
        );
    }
    // The log sidecar exists and mentions every input.
    let log = std::fs::read_to_string(format!("{}_log.txt", map_file.display())).unwrap();
    for f in &files {
        assert!(log.contains(&f.display().to_string()));
    }
}

#[test]
fn map_continues_past_a_bad_file() {
    let dir = tempfile::tempdir().unwrap();
    let good = write_test_msa(dir.path(), 0);
    let bad = dir.path().join("broken.msa");
    std::fs::write(&bad, "this is not a spectrum\n").unwrap();
    let good2 = write_test_msa(dir.path(), 2);

    let jobs = vec![
        MapJob {
            spectrum_file: good,
            sequence_number: 0,
        },
        MapJob {
            spectrum_file: bad,
            sequence_number: 1,
        },
        MapJob {
            spectrum_file: good2,
            sequence_number: 2,
        },
    ];
    let cond_input = pixl_like_input();
    let list = parse_element_list("Si", true, None).unwrap();
    let calibration = Calibration::new();
    let params = MapParams {
        conditions_input: &cond_input,
        element_list: &list.entries,
        calibration: &calibration,
        context: AnalysisContext::default(),
        selector: "P",
        detector_select: None,
        energy_override: None,
        bkg_params: vec![],
        bh_params: vec![],
        bx_params: vec![],
        adjust_energy: false,
        adjust_width: false,
        convolve_compton: false,
        threads: 2,
        max_spectra: None,
    };
    let map_file = dir.path().join("map.csv");
    let summary = run_map(jobs, &params, &map_file).unwrap();
    assert_eq!(summary.rows_written, 2);
    assert_eq!(summary.failures, 1);
    let log = std::fs::read_to_string(format!("{}_log.txt", map_file.display())).unwrap();
    assert!(log.contains("read failed"));
}

#[test]
fn max_spectra_bounds_the_map() {
    let dir = tempfile::tempdir().unwrap();
    let jobs: Vec<MapJob> = (0..4)
        .map(|i| MapJob {
            spectrum_file: write_test_msa(dir.path(), i),
            sequence_number: i,
        })
        .collect();
    let cond_input = pixl_like_input();
    let list = parse_element_list("Si", true, None).unwrap();
    let calibration = Calibration::new();
    let params = MapParams {
        conditions_input: &cond_input,
        element_list: &list.entries,
        calibration: &calibration,
        context: AnalysisContext::default(),
        selector: "P",
        detector_select: None,
        energy_override: None,
        bkg_params: vec![],
        bh_params: vec![],
        bx_params: vec![],
        adjust_energy: false,
        adjust_width: false,
        convolve_compton: false,
        threads: 1,
        max_spectra: Some(2),
    };
    let map_file = dir.path().join("map.csv");
    let summary = run_map(jobs, &params, &map_file).unwrap();
    assert_eq!(summary.rows_written + summary.failures, 2);
}
