// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Channel-to-energy calibration, with the temporary offset/tilt corrections
the fitter steers and the fixed linear correction from the instrument
characterisation. Also the two-peak energy-calibration routine used by the
`energy_calibrate` sub-command (developed for the PIXL Ca/Zr calibration
bead).
 */

use thiserror::Error;

use crate::elements::ElementListEntry;
use crate::math::linear_fit;
use crate::refdata::{LineCatalog, Series};

/// Default peak energies when no element list is given: the Ca and Zr
/// K-alpha lines of the PIXL calibration bead, in eV.
const BEAD_PEAK1_EV: f64 = 3691.0;
const BEAD_PEAK2_EV: f64 = 15776.0;

/// Channel that splits the default searches for the two bead peaks.
const PEAK12_SPLIT: usize = 900;

/// Peaks below this many counts are too weak to calibrate with.
const MIN_COUNT_THRESHOLD: f64 = 100.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnergyCalError {
    #[error("Spectrum has too few channels to find calibration peaks")]
    TooFewChannels,

    #[error("Calibration peak too weak (maximum {max:.0} counts, need more than {threshold:.0})")]
    PeakTooWeak { max: f64, threshold: f64 },

    #[error("No emission lines available for {0}")]
    NoLines(String),
}

/// Energy calibration of one spectrum: `energy(ch) = start + offset +
/// ch * (per_channel + tilt) + ch^2 * quad - linear_correction`.
///
/// `offset` and `tilt` are temporary corrections steered by the fitter;
/// they can be changed without losing the original calibration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyCal {
    start: f64,
    per_channel: f64,
    quad: f64,
    offset: f64,
    tilt: f64,
    correction_offset: f64,
    correction_slope: f64,
}

impl EnergyCal {
    pub fn new(start_ev: f64, ev_per_channel: f64) -> EnergyCal {
        EnergyCal {
            start: start_ev,
            per_channel: ev_per_channel,
            ..EnergyCal::default()
        }
    }

    pub fn with_quad(start_ev: f64, ev_per_channel: f64, quad: f64) -> EnergyCal {
        EnergyCal {
            start: start_ev,
            per_channel: ev_per_channel,
            quad,
            ..EnergyCal::default()
        }
    }

    /// A calibration is usable when the slope is positive and finite.
    pub fn good(&self) -> bool {
        self.per_channel > 0.0 && self.per_channel.is_finite()
    }

    pub fn start(&self) -> f64 {
        self.start + self.offset
    }

    pub fn per_channel(&self) -> f64 {
        self.per_channel + self.tilt
    }

    /// Local energy per channel, including the quadratic term.
    pub fn per_channel_at(&self, channel: usize) -> f64 {
        2.0 * channel as f64 * self.quad + self.per_channel + self.tilt
    }

    pub fn quad(&self) -> f64 {
        self.quad
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn tilt(&self) -> f64 {
        self.tilt
    }

    pub fn set_offset(&mut self, offset: f64) {
        self.offset = offset;
    }

    pub fn set_tilt(&mut self, tilt: f64) {
        self.tilt = tilt;
    }

    pub fn set_linear_correction(&mut self, offset: f64, slope: f64) {
        self.correction_offset = offset;
        self.correction_slope = slope;
    }

    pub fn linear_correction_offset(&self) -> f64 {
        self.correction_offset
    }

    pub fn linear_correction_slope(&self) -> f64 {
        self.correction_slope
    }

    /// The correction is a small linear function of energy, suppressed at
    /// and above its zero crossing so it never changes sign.
    fn linear_correction(&self, energy_ev: f64) -> f64 {
        if self.correction_slope == 0.0 {
            return 0.0;
        }
        let zero_crossing = -self.correction_offset / self.correction_slope * 1000.0;
        if energy_ev > zero_crossing {
            return 0.0;
        }
        self.correction_slope * (energy_ev / 1000.0) + self.correction_offset
    }

    pub fn energy(&self, channel: f64) -> f64 {
        let raw = self.start()
            + channel * self.per_channel()
            + channel * channel * self.quad * (1.0 + self.tilt);
        raw - self.linear_correction(raw)
    }

    pub fn energy_of(&self, channel: usize) -> f64 {
        self.energy(channel as f64)
    }

    /// Inverse of [EnergyCal::energy]. With a non-negligible quadratic
    /// term this is the positive root of the channel quadratic; a negative
    /// discriminant returns 0.
    pub fn channel(&self, energy_ev: f64) -> f64 {
        let corrected = energy_ev + self.linear_correction(energy_ev);
        let per_ch = self.per_channel();
        let quad = self.quad * (1.0 + self.tilt);
        if quad.abs() < 1.0e-12 {
            if per_ch == 0.0 {
                return 0.0;
            }
            return (corrected - self.start()) / per_ch;
        }
        let disc = per_ch * per_ch - 4.0 * quad * (self.start() - corrected);
        if disc < 0.0 {
            return 0.0;
        }
        (-per_ch + disc.sqrt()) / (2.0 * quad)
    }

    pub fn channel_of(&self, energy_ev: f64) -> usize {
        let ch = self.channel(energy_ev) + 0.5;
        if ch < 0.0 {
            0
        } else {
            ch as usize
        }
    }
}

/// Find the channel with the most counts in `[start, end]`.
fn find_max_channel(counts: &[f64], start: usize, end: usize) -> (usize, f64) {
    let end = end.min(counts.len().saturating_sub(1));
    let mut max_channel = start;
    let mut max_counts = counts[start];
    for (i, &c) in counts.iter().enumerate().take(end + 1).skip(start) {
        if c > max_counts {
            max_counts = c;
            max_channel = i;
        }
    }
    (max_channel, max_counts)
}

/// Five-point intensity-weighted centroid around a maximum channel.
fn five_point_centroid(counts: &[f64], max_channel: usize) -> f64 {
    let lo = max_channel.saturating_sub(2);
    let hi = (max_channel + 2).min(counts.len() - 1);
    let mut avg = 0.0;
    let mut norm = 0.0;
    for k in lo..=hi {
        avg += counts[k] * k as f64;
        norm += counts[k];
    }
    if norm != 0.0 {
        avg / norm
    } else {
        max_channel as f64
    }
}

/// The alpha-line centroid energy for one element-list entry.
fn entry_peak_energy(entry: &ElementListEntry) -> Result<f64, EnergyCalError> {
    let catalog = LineCatalog::new(entry.element, entry.level.unwrap_or(Series::K));
    catalog
        .alpha_energy()
        .ok_or_else(|| EnergyCalError::NoLines(entry.element.symbol().to_string()))
}

/// Determine energy start and eV per channel from the two largest
/// well-separated peaks of a calibration spectrum.
///
/// With an element list, the peak energies come from the alpha lines of
/// the first two entries and the search excludes a zone around the first
/// peak found. With one element, only the slope is determined (zero
/// offset). With none, the PIXL Ca/Zr bead energies are assumed.
pub fn energy_calibrate(
    counts: &[f64],
    element_list: &[ElementListEntry],
) -> Result<EnergyCal, EnergyCalError> {
    let num_channels = counts.len();
    let lowest_channel = num_channels / 100;
    let highest_channel = num_channels.saturating_sub(10);
    if highest_channel <= lowest_channel {
        return Err(EnergyCalError::TooFewChannels);
    }

    let (mut peak1_energy, mut peak2_energy) = (BEAD_PEAK1_EV, BEAD_PEAK2_EV);
    let with_list = !element_list.is_empty();
    if with_list {
        peak1_energy = entry_peak_energy(&element_list[0])?;
        peak2_energy = if element_list.len() > 1 {
            entry_peak_energy(&element_list[1])?
        } else {
            -1.0
        };
        if peak1_energy > peak2_energy && peak2_energy > 0.0 {
            std::mem::swap(&mut peak1_energy, &mut peak2_energy);
        }
    } else if num_channels < 3 * PEAK12_SPLIT / 2 {
        return Err(EnergyCalError::TooFewChannels);
    }

    // First peak: the whole usable range with a list, the lower half
    // without one.
    let end1 = if with_list { highest_channel } else { PEAK12_SPLIT };
    let (max_chan, max_counts) = find_max_channel(counts, lowest_channel, end1);
    if max_counts <= MIN_COUNT_THRESHOLD {
        return Err(EnergyCalError::PeakTooWeak {
            max: max_counts,
            threshold: MIN_COUNT_THRESHOLD,
        });
    }
    let pk1_chan = five_point_centroid(counts, max_chan);

    // Second peak: exclude a zone around the first so satellite lines of
    // the first element are not picked up.
    let (max_chan2, max_counts2) = if !with_list {
        find_max_channel(counts, PEAK12_SPLIT, highest_channel)
    } else {
        let upper_start = ((1.15 * pk1_chan) as usize).min(highest_channel);
        let (up_chan, up_counts) = find_max_channel(counts, upper_start, highest_channel);
        let lower_end = (0.9 * pk1_chan) as usize;
        let (lo_chan, lo_counts) = find_max_channel(counts, lowest_channel, lower_end);
        if up_counts > lo_counts {
            (up_chan, up_counts)
        } else {
            (lo_chan, lo_counts)
        }
    };

    // One element: slope only, zero offset. The single peak energy was
    // swapped into peak2 above.
    if element_list.len() == 1 {
        if pk1_chan <= 0.0 {
            return Err(EnergyCalError::TooFewChannels);
        }
        return Ok(EnergyCal::new(0.0, peak1_energy.max(peak2_energy) / pk1_chan));
    }

    if max_counts2 <= MIN_COUNT_THRESHOLD {
        return Err(EnergyCalError::PeakTooWeak {
            max: max_counts2,
            threshold: MIN_COUNT_THRESHOLD,
        });
    }
    let pk2_chan = five_point_centroid(counts, max_chan2);

    let (mut c1, mut c2) = (pk1_chan, pk2_chan);
    if c1 > c2 {
        std::mem::swap(&mut c1, &mut c2);
    }
    let (start, per_channel) = linear_fit(&[c1, c2], &[peak1_energy, peak2_energy]);
    Ok(EnergyCal::new(start, per_channel))
}
