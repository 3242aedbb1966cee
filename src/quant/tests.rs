// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::{assert_abs_diff_eq, assert_relative_eq};

use crate::conditions::{assemble, tests::pixl_like_input, Conditions};
use crate::elements::parse_element_list;
use crate::energy_cal::EnergyCal;
use crate::fp::build_components;
use crate::material::{LightElementFormula, Material, Stoichiometry};
use crate::refdata::Element;
use crate::spectrum::Spectrum;
use crate::standards::Standard;

use super::*;

fn conditions() -> Conditions {
    assemble(&pixl_like_input()).unwrap()
}

fn el(z: u32) -> Element {
    Element::new(z).unwrap()
}

fn sio2() -> Material {
    let mut m = Material::new();
    m.add_element(
        el(14),
        1.0,
        Stoichiometry {
            formula: LightElementFormula::Oxide { ratio: 2.0 },
            input_is_formula: true,
        },
    );
    m.normalize(1.0);
    m
}

/// A noise-free simulated measurement of a composition: the forward model
/// evaluated at the true composition.
fn simulate(cond: &Conditions, specimen: &Material, list_str: &str) -> Spectrum {
    let list = parse_element_list(list_str, true, None).unwrap();
    let mut spec = Spectrum::new(vec![0.0; 2048], EnergyCal::new(0.0, 11.85));
    spec.set_live_time(60.0);
    build_components(cond, specimen, &list.entries, &mut spec);
    let mut measured = Spectrum::new(spec.calc().to_vec(), EnergyCal::new(0.0, 11.85));
    measured.set_live_time(60.0);
    measured.adjust_energy = false;
    measured.adjust_width = false;
    // The simulated measurement carries its own continuum; no SNIP strip.
    measured.bkg_params = vec![0.0];
    measured
}

#[test]
fn quantify_pure_sio2_without_standards() {
    let cond = conditions();
    let truth = sio2();
    let mut spectrum = simulate(&cond, &truth, "Si,O");
    let mut list = parse_element_list("Si,O", true, None).unwrap();
    let calibration = Calibration::new();
    let context = AnalysisContext {
        normalization: Some(100.0),
        oxides: true,
        ..AnalysisContext::default()
    };
    let result = quantify_unknown(
        &mut list.entries,
        &cond,
        &mut spectrum,
        &calibration,
        context,
    )
    .unwrap();

    let si_pct = list
        .entries
        .iter()
        .find(|e| e.element == el(14))
        .and_then(|e| e.percent)
        .unwrap();
    let o_pct = list
        .entries
        .iter()
        .find(|e| e.element == el(8))
        .and_then(|e| e.percent)
        .unwrap();
    assert_abs_diff_eq!(si_pct, 46.7, epsilon = 0.5);
    assert_abs_diff_eq!(o_pct, 53.3, epsilon = 0.5);
    assert!(result.iterations <= 10);
}

#[test]
fn quantify_is_deterministic() {
    let cond = conditions();
    let truth = sio2();
    let calibration = Calibration::new();
    let context = AnalysisContext {
        normalization: Some(100.0),
        ..AnalysisContext::default()
    };

    let mut first = simulate(&cond, &truth, "Si,O");
    let mut list1 = parse_element_list("Si,O", true, None).unwrap();
    quantify_unknown(&mut list1.entries, &cond, &mut first, &calibration, context).unwrap();

    let mut second = simulate(&cond, &truth, "Si,O");
    let mut list2 = parse_element_list("Si,O", true, None).unwrap();
    quantify_unknown(&mut list2.entries, &cond, &mut second, &calibration, context).unwrap();

    for (a, b) in list1.entries.iter().zip(&list2.entries) {
        assert_eq!(a.percent, b.percent, "{} percent differs", a.element);
        assert_eq!(a.coefficient, b.coefficient);
    }
}

#[test]
fn quantify_rejects_bad_inputs() {
    let cond = conditions();
    let calibration = Calibration::new();
    let context = AnalysisContext::default();

    // Bad energy calibration.
    let mut bad_cal = Spectrum::new(vec![1.0; 256], EnergyCal::new(0.0, -1.0));
    bad_cal.set_live_time(10.0);
    let mut list = parse_element_list("Si", true, None).unwrap();
    assert!(matches!(
        quantify_unknown(&mut list.entries, &cond, &mut bad_cal, &calibration, context),
        Err(QuantError::BadCalibration)
    ));

    // Bad live time.
    let mut no_time = Spectrum::new(vec![1.0; 256], EnergyCal::new(0.0, 10.0));
    assert!(matches!(
        quantify_unknown(&mut list.entries, &cond, &mut no_time, &calibration, context),
        Err(QuantError::BadLiveTime(_))
    ));

    // Nothing to quantify.
    let mut ok = Spectrum::new(vec![1.0; 256], EnergyCal::new(0.0, 10.0));
    ok.set_live_time(10.0);
    let mut excluded = parse_element_list("Si_X", true, None).unwrap();
    assert!(matches!(
        quantify_unknown(&mut excluded.entries, &cond, &mut ok, &calibration, context),
        Err(QuantError::EmptyElementList)
    ));
}

#[test]
fn calibrate_standard_with_its_own_simulation_gives_unity_ecf() {
    let cond = conditions();
    let truth = sio2();
    let spectrum = simulate(&cond, &truth, "Si,O");

    let mut list = parse_element_list("Si,O", true, None).unwrap();
    for entry in list.entries.iter_mut() {
        entry.percent = Some(100.0 * truth.fraction(entry.element));
    }
    let mut standard = Standard {
        names: vec!["SIO2".to_string()],
        material: truth,
        spectrum_file: "sio2_sim.msa".to_string(),
        element_list: list.entries,
        spectrum: Some(spectrum),
        ..Standard::default()
    };

    let calibration =
        calibrate_standards(std::slice::from_mut(&mut standard), &cond).unwrap();
    let ecf = calibration.lookup(el(14), crate::refdata::Series::K, &[]);
    assert!(ecf.num_standards >= 1);
    assert_relative_eq!(ecf.value, 1.0, max_relative = 0.02);
}

#[test]
fn evaluate_excludes_the_standard_itself() {
    let cond = conditions();
    let truth = sio2();

    let make_standard = |name: &str| {
        let mut list = parse_element_list("Si,O", true, None).unwrap();
        for entry in list.entries.iter_mut() {
            entry.percent = Some(100.0 * truth.fraction(entry.element));
        }
        Standard {
            names: vec![name.to_string()],
            material: truth.clone(),
            spectrum_file: format!("{name}.msa"),
            element_list: list.entries,
            spectrum: Some(simulate(&cond, &truth, "Si,O")),
            ..Standard::default()
        }
    };
    let mut standards = vec![make_standard("A"), make_standard("B")];
    let calibration = calibrate_standards(&mut standards, &cond).unwrap();
    let context = AnalysisContext {
        normalization: Some(100.0),
        ..AnalysisContext::default()
    };
    let rows = evaluate_standards(&mut standards, &cond, &calibration, context).unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert!(row.error.is_none());
        let si = row
            .element_list
            .iter()
            .find(|e| e.element == el(14))
            .unwrap();
        // Recovery of the certificate value within a percent absolute.
        assert_abs_diff_eq!(si.percent.unwrap(), si.given, epsilon = 1.0);
    }
}
