// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Spectrum combination utilities: merging the two PIXL detectors into one
spectrum, and accumulating bulk sums with per-channel maxima over a whole
scan.
 */

use log::warn;
use thiserror::Error;

use crate::math::rebin;
use crate::spectrum::Spectrum;

#[derive(Error, Debug)]
pub enum CombineError {
    #[error("No spectra to combine")]
    Empty,

    #[error("Detector index {index} out of range ({count} spectra)")]
    BadDetectorIndex { index: usize, count: usize },

    #[error("Spectra can't be aligned onto a common energy axis")]
    Unalignable,
}

/// Combine the spectra read from one file (usually detectors A and B)
/// into a single spectrum. A detector selection picks one; otherwise the
/// counts are summed onto the first spectrum's energy axis and the live
/// and real times add.
pub fn combine_detectors(
    mut spectra: Vec<Spectrum>,
    detector_select: Option<usize>,
) -> Result<Spectrum, CombineError> {
    if spectra.is_empty() {
        return Err(CombineError::Empty);
    }
    if let Some(index) = detector_select {
        let count = spectra.len();
        if index >= count {
            return Err(CombineError::BadDetectorIndex { index, count });
        }
        return Ok(spectra.swap_remove(index));
    }
    if spectra.len() == 1 {
        return Ok(spectra.pop().unwrap());
    }

    let reference = spectra.remove(0);
    if !reference.calibration().good() {
        return Err(CombineError::Unalignable);
    }
    let n = reference.num_channels();
    let axis: Vec<f64> = (0..n).map(|ch| reference.energy_of(ch)).collect();
    let mut counts = reference.measured().to_vec();
    let mut live_time = reference.live_time();
    let mut real_time = reference.real_time();

    for s in &spectra {
        if !s.calibration().good() {
            warn!(
                "Skipping a detector with bad energy calibration in {}",
                s.file_name
            );
            continue;
        }
        let other_axis: Vec<f64> = (0..s.num_channels()).map(|ch| s.energy_of(ch)).collect();
        let aligned =
            rebin(&other_axis, s.measured(), &axis).ok_or(CombineError::Unalignable)?;
        for (c, a) in counts.iter_mut().zip(&aligned) {
            *c += a;
        }
        live_time += s.live_time();
        real_time += s.real_time();
    }

    let mut combined = Spectrum::new(counts, *reference.calibration());
    combined.set_live_time(live_time);
    combined.set_real_time(real_time);
    combined.set_geometry(reference.geometry());
    combined.file_name = reference.file_name.clone();
    combined.aux_info = reference.aux_info.clone();
    combined.header_info = reference.header_info.clone();
    Ok(combined)
}

/// Accumulator for the `sum` sub-command: a running bulk sum plus the
/// per-channel maximum over all accumulated spectra.
#[derive(Debug, Default)]
pub struct BulkSum {
    sum: Option<Spectrum>,
    max_value: Vec<f64>,
    accumulated: usize,
}

impl BulkSum {
    pub fn new() -> BulkSum {
        BulkSum::default()
    }

    pub fn count(&self) -> usize {
        self.accumulated
    }

    /// Add one spectrum, rebinned onto the first spectrum's energy axis.
    /// Live and real times and the geometry factor accumulate.
    pub fn add(&mut self, spectrum: &Spectrum) -> Result<(), CombineError> {
        if self.sum.is_none() {
            self.max_value = spectrum.measured().to_vec();
            let mut first =
                Spectrum::new(spectrum.measured().to_vec(), *spectrum.calibration());
            first.set_live_time(spectrum.live_time());
            first.set_real_time(spectrum.real_time());
            first.set_geometry(spectrum.geometry());
            first.aux_info = spectrum.aux_info.clone();
            first.file_name = spectrum.file_name.clone();
            self.sum = Some(first);
            self.accumulated += 1;
            return Ok(());
        }

        let sum = self.sum.as_ref().expect("sum was just checked");
        let n = sum.num_channels();
        let axis: Vec<f64> = (0..n).map(|ch| sum.energy_of(ch)).collect();
        let other: Vec<f64> = (0..spectrum.num_channels())
            .map(|ch| spectrum.energy_of(ch))
            .collect();
        let aligned =
            rebin(&other, spectrum.measured(), &axis).ok_or(CombineError::Unalignable)?;
        let counts: Vec<f64> = sum
            .measured()
            .iter()
            .zip(&aligned)
            .map(|(a, b)| a + b)
            .collect();
        let mut next = Spectrum::new(counts, *sum.calibration());
        next.set_live_time(sum.live_time() + spectrum.live_time());
        next.set_real_time(sum.real_time() + spectrum.real_time());
        next.set_geometry(sum.geometry() + spectrum.geometry());
        next.aux_info = sum.aux_info.clone();
        next.file_name = sum.file_name.clone();

        for (m, a) in self.max_value.iter_mut().zip(&aligned) {
            if *a > *m {
                *m = *a;
            }
        }
        self.sum = Some(next);
        self.accumulated += 1;
        Ok(())
    }

    /// The accumulated sum with the max-value vector attached.
    pub fn finish(mut self) -> Option<Spectrum> {
        if let Some(sum) = &mut self.sum {
            sum.set_max_value(std::mem::take(&mut self.max_value));
        }
        self.sum
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use crate::energy_cal::EnergyCal;

    use super::*;

    fn spectrum(counts: Vec<f64>, per_ch: f64, live: f64) -> Spectrum {
        let mut s = Spectrum::new(counts, EnergyCal::new(0.0, per_ch));
        s.set_live_time(live);
        s
    }

    #[test]
    fn select_one_detector() {
        let a = spectrum(vec![1.0; 64], 10.0, 10.0);
        let b = spectrum(vec![2.0; 64], 10.0, 20.0);
        let picked = combine_detectors(vec![a, b], Some(1)).unwrap();
        assert_abs_diff_eq!(picked.measured()[0], 2.0);
        assert_abs_diff_eq!(picked.live_time(), 20.0);
        assert!(matches!(
            combine_detectors(vec![spectrum(vec![1.0; 4], 10.0, 1.0)], Some(3)),
            Err(CombineError::BadDetectorIndex { .. })
        ));
    }

    #[test]
    fn sum_detectors_same_axis() {
        let a = spectrum(vec![1.0; 64], 10.0, 10.0);
        let b = spectrum(vec![2.0; 64], 10.0, 20.0);
        let combined = combine_detectors(vec![a, b], None).unwrap();
        assert_abs_diff_eq!(combined.measured()[32], 3.0, epsilon = 1e-9);
        assert_abs_diff_eq!(combined.live_time(), 30.0);
    }

    #[test]
    fn sum_detectors_rebins_other_axis() {
        // Second detector has half the channel width; counts conserve.
        let a = spectrum(vec![1.0; 64], 10.0, 10.0);
        let b = spectrum(vec![1.0; 128], 5.0, 10.0);
        let combined = combine_detectors(vec![a, b], None).unwrap();
        // Away from the ends each 10 eV bin receives two 5 eV bins.
        assert_abs_diff_eq!(combined.measured()[30], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn bulk_sum_accumulates_and_tracks_max() {
        let mut acc = BulkSum::new();
        let mut a = spectrum(vec![1.0; 32], 10.0, 5.0);
        a.set_geometry(1.0);
        let mut b = spectrum(vec![3.0; 32], 10.0, 7.0);
        b.set_geometry(1.0);
        acc.add(&a).unwrap();
        acc.add(&b).unwrap();
        assert_eq!(acc.count(), 2);
        let sum = acc.finish().unwrap();
        assert_abs_diff_eq!(sum.measured()[10], 4.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sum.live_time(), 12.0);
        assert_abs_diff_eq!(sum.geometry(), 2.0);
        assert_abs_diff_eq!(sum.max_value()[10], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn empty_combine_is_an_error() {
        assert!(matches!(
            combine_detectors(vec![], None),
            Err(CombineError::Empty)
        ));
    }
}
