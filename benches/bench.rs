// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use piquant::energy_cal::EnergyCal;
use piquant::fit::fit_spectrum;
use piquant::detector::{Detector, DetectorType};
use piquant::snip::{snip, snip_lsq};
use piquant::spectrum::{ComponentKind, Spectrum, SpectrumComponent};
use piquant::refdata::{Element, Series};

fn test_counts(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let x = i as f64;
            100.0 * (-x / 800.0).exp()
                + 2000.0 * (-((x - 400.0) / 6.0).powi(2) / 2.0).exp()
                + 900.0 * (-((x - 900.0) / 8.0).powi(2) / 2.0).exp()
        })
        .collect()
}

fn snip_benches(c: &mut Criterion) {
    let counts = test_counts(2048);
    c.bench_function("snip 2048ch 24 iter", |b| {
        b.iter(|| snip(black_box(&counts), 0, 2047, 14, 24))
    });
    c.bench_function("snip lsq 2048ch", |b| {
        b.iter(|| snip_lsq(black_box(&counts), 0, 2047, 14, 24))
    });
}

fn fit_benches(c: &mut Criterion) {
    let n = 2048;
    let counts = test_counts(n);
    let gaussian = |center: f64, sigma: f64| -> Vec<f64> {
        (0..n)
            .map(|i| (-((i as f64 - center) / sigma).powi(2) / 2.0).exp())
            .collect()
    };
    let detector = Detector::new(DetectorType::SiSdd, 150.0, 25.0, 0.5);
    c.bench_function("linear fit 3 components", |b| {
        b.iter(|| {
            let mut s = Spectrum::new(counts.clone(), EnergyCal::new(0.0, 10.0));
            s.adjust_energy = false;
            s.adjust_width = false;
            s.add_component(SpectrumComponent::with_spectrum(
                ComponentKind::Element {
                    element: Element::new(26).unwrap(),
                    series: Series::K,
                },
                gaussian(400.0, 6.0),
            ));
            s.add_component(SpectrumComponent::with_spectrum(
                ComponentKind::Element {
                    element: Element::new(38).unwrap(),
                    series: Series::K,
                },
                gaussian(900.0, 8.0),
            ));
            s.add_component(SpectrumComponent::with_spectrum(
                ComponentKind::Continuum,
                (0..n).map(|i| (-(i as f64) / 800.0).exp()).collect(),
            ));
            fit_spectrum(&mut s, &detector).unwrap()
        })
    });
}

criterion_group!(benches, snip_benches, fit_benches);
criterion_main!(benches);
