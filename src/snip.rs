// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
SNIP continuum estimation by iterative peak stripping, from the algorithm
in the Handbook of X-Ray Spectrometry (Van Grieken & Markowicz), with the
two-zone variant used under the Compton hump and the least-squares
rescaled variant.
 */

const SQRT2: f64 = std::f64::consts::SQRT_2;

/// Width-reduction applies over the last this-many iterations.
const NREDUC: usize = 8;

/// Boxcar smooth of `y` over `[ch1, ch2]` with a filter of width `iwid`
/// channels. Channels outside the range are left at zero.
pub fn boxcar_smooth(y: &[f64], ch1: usize, ch2: usize, iwid: usize) -> Vec<f64> {
    let nchan = y.len();
    let mut s = vec![0.0; nchan];
    if nchan == 0 {
        return s;
    }
    let iw = iwid.min(nchan);
    let m = (iw / 2) as isize;
    let norm = (2 * m + 1) as f64;
    let jch1 = ch1;
    let jch2 = ch2.min(nchan - 1);
    for i in jch1..=jch2 {
        let mut sum = 0.0;
        for j in -m..=m {
            let j1 = (i as isize + j).clamp(jch1 as isize, jch2 as isize) as usize;
            sum += y[j1];
        }
        s[i] = sum / norm;
    }
    s
}

/// SNIP background over `[ch1, ch2]`. `fwhm` is the stripping width in
/// channels (set to the typical peak FWHM), `niter` the iteration count
/// (24 is typical).
pub fn snip(y: &[f64], ch1: usize, ch2: usize, fwhm: usize, niter: usize) -> Vec<f64> {
    snip_two_zone(y, ch1, ch2, fwhm, niter, None)
}

/// Parameters of the second stripping zone, used to keep the strip from
/// eating the broad continuum hump while still following it under narrow
/// peaks.
#[derive(Debug, Clone, Copy)]
pub struct SnipZone {
    pub ch1: usize,
    pub ch2: usize,
    pub fwhm: usize,
}

/// Two-zone SNIP: within the second zone the stripping width is
/// `zone.fwhm` instead of `fwhm`.
pub fn snip_two_zone(
    y: &[f64],
    ch1: usize,
    ch2: usize,
    fwhm: usize,
    niter: usize,
    zone: Option<SnipZone>,
) -> Vec<f64> {
    let nchan = y.len();
    if nchan == 0 {
        return vec![];
    }
    let i1 = ch1;
    let i2 = ch2.min(nchan - 1);
    if i1 >= nchan || i2 < i1 {
        return vec![0.0; nchan];
    }

    // Smooth, then work in square-root space so counting statistics are
    // uniform across the spectrum.
    let mut back = boxcar_smooth(y, i1, i2, fwhm);
    for b in back.iter_mut().take(i2 + 1).skip(i1) {
        *b = b.max(0.0).sqrt();
    }

    let mut redfac = 1.0;
    for n in 1..=niter {
        if n + NREDUC > niter {
            redfac /= SQRT2;
        }
        let iw = (redfac * fwhm as f64 + 0.5) as usize;
        let iw2 = zone
            .map(|z| (redfac * z.fwhm as f64 + 0.5) as usize)
            .unwrap_or(0);
        for i in i1..=i2 {
            let w = match zone {
                Some(z) if z.ch1 > 0 && z.ch2 > 0 && iw2 > 0 && i >= z.ch1 && i <= z.ch2 => iw2,
                _ => iw,
            };
            let lo = i.saturating_sub(w).max(i1);
            let hi = (i + w).min(i2);
            let strip = 0.5 * (back[lo] + back[hi]);
            if strip < back[i] {
                back[i] = strip;
            }
        }
    }

    for b in back.iter_mut().take(i2 + 1).skip(i1) {
        *b = *b * *b;
    }
    back
}

/// SNIP with a least-squares rescale. The raw strip sits slightly below
/// the spectrum average and causes false positives in peak fits; the
/// rescale factor is fit over channels within 3 sigma of the strip.
pub fn snip_lsq(y: &[f64], ch1: usize, ch2: usize, fwhm: usize, niter: usize) -> Vec<f64> {
    let mut back = snip(y, ch1, ch2, fwhm, niter);
    let nchan = y.len();
    if nchan == 0 {
        return back;
    }
    let i2 = ch2.min(nchan - 1);
    let mut y_sum = 0.0;
    let mut f_sum = 0.0;
    for i in ch1..=i2 {
        if (y[i] - back[i]).abs() > 3.0 * back[i].max(0.0).sqrt() {
            continue;
        }
        y_sum += y[i] * back[i];
        f_sum += back[i] * back[i];
    }
    if f_sum > 0.0 {
        let alpha = y_sum / f_sum;
        for b in back.iter_mut().take(i2 + 1).skip(ch1) {
            *b *= alpha;
        }
    }
    back
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;

    fn gaussian_on_flat(amp: f64, center: f64, sigma: f64, level: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                level + amp * (-((i as f64 - center) / sigma).powi(2) / 2.0).exp()
            })
            .collect()
    }

    #[test]
    fn strips_a_narrow_peak() {
        let y = gaussian_on_flat(1000.0, 500.0, 3.0, 100.0, 1024);
        let back = snip(&y, 0, 1023, 8, 24);
        // Under the peak the background must come back to near the flat
        // level; far away it must track it.
        assert!(back[500] <= 105.0, "background under peak: {}", back[500]);
        assert!(back[100] >= 99.0 && back[100] <= 101.0);
        assert!(back[900] >= 99.0 && back[900] <= 101.0);
    }

    #[test]
    fn never_exceeds_smoothed_input() {
        let y = gaussian_on_flat(500.0, 300.0, 5.0, 50.0, 600);
        let smoothed = boxcar_smooth(&y, 0, 599, 8);
        let back = snip(&y, 0, 599, 8, 24);
        for i in 0..600 {
            assert!(back[i] <= smoothed[i] + 1.0e-9);
        }
    }

    #[test]
    fn two_zone_strips_harder_in_zone() {
        // A broad bump; a wider strip width in the zone eats more of it.
        let y = gaussian_on_flat(300.0, 400.0, 40.0, 20.0, 800);
        let one = snip(&y, 0, 799, 8, 24);
        let two = snip_two_zone(
            &y,
            0,
            799,
            8,
            24,
            Some(SnipZone {
                ch1: 300,
                ch2: 500,
                fwhm: 32,
            }),
        );
        assert!(two[400] < one[400]);
    }

    #[test]
    fn lsq_rescale_restores_average_level() {
        let y = vec![100.0; 512];
        let back = snip_lsq(&y, 0, 511, 8, 24);
        // On a flat spectrum the rescaled strip must match the data.
        assert_abs_diff_eq!(back[256], 100.0, epsilon = 0.5);
    }

    #[test]
    fn empty_and_degenerate_inputs() {
        assert!(snip(&[], 0, 10, 8, 24).is_empty());
        let y = vec![7.0; 4];
        let back = snip(&y, 0, 3, 8, 24);
        assert_eq!(back.len(), 4);
    }
}
