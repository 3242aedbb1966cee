// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Map CSV columns.
//!
//! The output selector is a string of column characters: uppercase for
//! quantitative columns (per element where that makes sense), lowercase
//! to append the auxiliary spectrum information block.

use itertools::Itertools;

use crate::detector::Detector;
use crate::elements::ElementListEntry;
use crate::spectrum::Spectrum;

/// Default selector: percents only.
pub const DEFAULT_SELECTOR: &str = "P";

/// Per-element column characters, in output order.
const ELEMENT_COLUMNS: &[(char, &str)] = &[
    ('P', "%"),
    ('I', "int"),
    ('E', "err"),
    ('L', "coeff"),
    ('K', "ECF"),
    ('G', "given"),
    ('H', "%err-vs-given"),
    ('W', "matrix"),
];

/// Whole-spectrum column characters, in output order.
const GLOBAL_COLUMNS: &[(char, &str)] = &[
    ('T', "total_counts"),
    ('X', "chisq"),
    ('C', "eVstart"),
    ('R', "res"),
    ('N', "iter"),
    ('F', "filename"),
    ('S', "Element_Sum"),
    ('Q', "seq"),
    ('V', "livetime"),
    ('M', "realtime"),
    ('7', "region_counts"),
];

const AUX_COLUMNS: &[&str] = &[
    "x", "y", "z", "i", "j", "SCLK", "RTT", "DPC", "PMC", "events", "triggers", "overflows",
    "underflows", "baselines", "resets", "saturates", "fast_livetime", "USN", "title",
];

fn selected(selector: &str) -> (Vec<char>, Vec<char>, bool) {
    let selector = if selector.is_empty() {
        DEFAULT_SELECTOR
    } else {
        selector
    };
    let per_element: Vec<char> = ELEMENT_COLUMNS
        .iter()
        .map(|(c, _)| *c)
        .filter(|c| selector.contains(*c))
        .collect();
    let global: Vec<char> = GLOBAL_COLUMNS
        .iter()
        .map(|(c, _)| *c)
        .filter(|c| selector.contains(*c))
        .collect();
    let aux = selector.chars().any(|c| c.is_ascii_lowercase());
    (per_element, global, aux)
}

/// The header line for a map file with the given selector and elements.
pub fn map_header(selector: &str, element_list: &[ElementListEntry]) -> String {
    let (per_element, global, aux) = selected(selector);
    let mut columns: Vec<String> = vec![];
    for entry in element_list {
        for c in &per_element {
            let tag = ELEMENT_COLUMNS.iter().find(|(ch, _)| ch == c).unwrap().1;
            columns.push(format!("{}_{}", entry.element.symbol(), tag));
        }
    }
    for c in &global {
        let (_, name) = GLOBAL_COLUMNS.iter().find(|(ch, _)| ch == c).unwrap();
        columns.push(name.to_string());
        if *c == 'C' {
            columns.push("eV/ch".to_string());
        }
    }
    if aux {
        columns.extend(AUX_COLUMNS.iter().map(|s| s.to_string()));
    }
    columns.iter().join(", ")
}

/// One map row for a quantified spectrum.
pub fn map_row(
    selector: &str,
    element_list: &[ElementListEntry],
    spectrum: &Spectrum,
    detector: &Detector,
    element_sum_pct: f64,
) -> String {
    let (per_element, global, aux) = selected(selector);
    let mut fields: Vec<String> = vec![];
    for entry in element_list {
        for c in &per_element {
            let value = match c {
                'P' => format!("{:.4}", entry.percent.unwrap_or(0.0)),
                'I' => format!("{:.2}", entry.intensity),
                'E' => format!("{:.3}", entry.total_err),
                'L' => format!("{:.5}", entry.coefficient.unwrap_or(0.0)),
                'K' => format!("{:.5}", entry.ecf.unwrap_or(1.0)),
                'G' => format!("{:.4}", entry.given),
                'H' => format!("{:.3}", entry.rel_err_given),
                'W' => format!("{:.5}", entry.matrix_factor),
                _ => unreachable!(),
            };
            fields.push(value);
        }
    }
    for c in &global {
        match c {
            'T' => fields.push(format!("{:.0}", spectrum.total_counts())),
            'X' => fields.push(format!("{:.4}", spectrum.chisq())),
            'C' => {
                fields.push(format!("{:.2}", spectrum.calibration().start()));
                fields.push(format!("{:.4}", spectrum.calibration().per_channel()));
            }
            'R' => fields.push(format!(
                "{:.1}",
                detector.resolution(crate::constants::RESOLUTION_REFERENCE_ENERGY)
            )),
            'N' => fields.push(format!("{}", spectrum.iterations)),
            'F' => fields.push(spectrum.file_name.clone()),
            'S' => fields.push(format!("{element_sum_pct:.4}")),
            'Q' => fields.push(format!("{}", spectrum.seq_number)),
            'V' => fields.push(format!("{:.3}", spectrum.live_time())),
            'M' => fields.push(format!("{:.3}", spectrum.real_time())),
            '7' => fields.push(format!("{:.0}", spectrum.region_counts())),
            _ => unreachable!(),
        }
    }
    if aux {
        let a = &spectrum.aux_info;
        let h = &spectrum.header_info;
        fields.push(format!("{:.3}", a.x));
        fields.push(format!("{:.3}", a.y));
        fields.push(format!("{:.3}", a.z));
        fields.push(format!("{:.1}", a.i));
        fields.push(format!("{:.1}", a.j));
        fields.push(format!("{}", a.sclk));
        fields.push(format!("{}", a.rtt));
        fields.push(format!("{}", a.dpc));
        fields.push(format!("{}", a.pmc));
        fields.push(format!("{}", h.events));
        fields.push(format!("{}", h.triggers));
        fields.push(format!("{}", h.overflows));
        fields.push(format!("{}", h.underflows));
        fields.push(format!("{}", h.baseline_samples));
        fields.push(format!("{}", h.preamp_resets));
        fields.push(format!("{}", h.saturates));
        fields.push(format!("{:.3}", h.live_time_dspc));
        fields.push(format!("{}", a.usn));
        fields.push(a.titles.first().cloned().unwrap_or_default());
    }
    fields.iter().join(", ")
}

#[cfg(test)]
mod tests {
    use crate::elements::parse_element_list;
    use crate::energy_cal::EnergyCal;

    use super::*;

    fn detector() -> Detector {
        Detector::new(crate::detector::DetectorType::SiSdd, 150.0, 25.0, 0.5)
    }

    #[test]
    fn default_selector_is_percents() {
        let list = parse_element_list("Si,Fe", false, None).unwrap();
        let header = map_header("", &list.entries);
        assert_eq!(header, "Si_%, Fe_%");
    }

    #[test]
    fn header_and_row_field_counts_match() {
        let mut list = parse_element_list("Si,Fe", false, None).unwrap();
        for e in list.entries.iter_mut() {
            e.percent = Some(10.0);
        }
        let selector = "PIEX CFQ x";
        let header = map_header(selector, &list.entries);
        let mut spectrum = Spectrum::new(vec![1.0; 64], EnergyCal::new(0.0, 10.0));
        spectrum.file_name = "a.msa".to_string();
        let row = map_row(selector, &list.entries, &spectrum, &detector(), 20.0);
        assert_eq!(header.split(", ").count(), row.split(", ").count());
        // Two elements times three element columns, then the globals.
        assert!(header.starts_with("Si_%, Si_int, Si_err, Fe_%"));
        assert!(header.contains("eV/ch"));
        assert!(header.ends_with("title"));
    }
}
