// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
X-ray source models.

The workhorse is a side-window tube model (Ebel-style): characteristic
anode lines plus bremsstrahlung continuum, with anode self-absorption and
the tube's own Be window folded in. A monochromatic source stands in for
synchrotron measurements, and an externally calculated tube spectrum can
be supplied as a file of energy/intensity pairs.
 */

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use thiserror::Error;

use crate::constants::UM_TO_CM;
use crate::material::{Material, Stoichiometry};
use crate::math::CubicSpline;
use crate::refdata::{EdgeLevel, Element, LineCatalog, Series};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Couldn't read tube spectrum file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Bad line {line} in tube spectrum file {path}")]
    BadLine { path: String, line: usize },

    #[error("Tube spectrum file {0} needs at least two points")]
    TooFewPoints(String),
}

/// Overall intensity scale of the tube model, photons/s/sr/mA at unity
/// everything else. Absolute calibration cancels in the ECFs; this keeps
/// calculated spectra in a sensible count range.
const TUBE_INTENSITY_SCALE: f64 = 1.0e9;

/// One discrete source line.
#[derive(Debug, Clone, Copy)]
pub struct SourceLine {
    pub energy: f64,
    /// Photons/s/sr into the beam.
    pub intensity: f64,
}

#[derive(Debug)]
pub struct TubeModel {
    anode: Element,
    kv: f64,
    takeoff_csc: f64,
    current_ma: f64,
    be_window: Material,
    anode_material: Material,
}

#[derive(Debug)]
enum SourceKind {
    Tube(TubeModel),
    Monochromatic { energy_ev: f64, intensity: f64 },
    Tabulated {
        title: String,
        spline: CubicSpline,
        max_ev: f64,
    },
}

#[derive(Debug)]
pub struct XraySource {
    kind: SourceKind,
}

impl XraySource {
    /// A tube source. Angles in degrees. The electron incidence angle is
    /// accepted for completeness but the emission depth fit already
    /// averages over it; only the X-ray takeoff path enters the
    /// self-absorption factor.
    pub fn tube(
        anode: Element,
        kv: f64,
        _inc_angle_deg: f64,
        takeoff_angle_deg: f64,
        be_window_um: f64,
        current_ma: f64,
    ) -> XraySource {
        let be = Element::new(4).unwrap();
        let mut be_window = Material::new();
        if be_window_um > 0.0 {
            be_window.add_element(be, 1.0, Stoichiometry::default());
            be_window.set_thickness(be_window_um * UM_TO_CM);
        }
        let mut anode_material = Material::new();
        anode_material.add_element(anode, 1.0, Stoichiometry::default());
        let takeoff = takeoff_angle_deg.to_radians().sin().max(1.0e-3);
        XraySource {
            kind: SourceKind::Tube(TubeModel {
                anode,
                kv,
                takeoff_csc: 1.0 / takeoff,
                current_ma,
                be_window,
                anode_material,
            }),
        }
    }

    pub fn monochromatic(energy_ev: f64, intensity: f64) -> XraySource {
        XraySource {
            kind: SourceKind::Monochromatic {
                energy_ev,
                intensity,
            },
        }
    }

    /// Load an externally calculated tube spectrum: comment lines start
    /// with `//` or `#`, data lines are `energy_eV intensity`.
    pub fn from_file(path: &Path) -> Result<XraySource, SourceError> {
        let display = path.display().to_string();
        let file = File::open(path).map_err(|e| SourceError::Io {
            path: display.clone(),
            source: e,
        })?;
        let mut title = String::new();
        let mut energies = Vec::new();
        let mut values = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| SourceError::Io {
                path: display.clone(),
                source: e,
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with("//") || trimmed.starts_with('#') {
                if title.is_empty() && trimmed.len() > 2 {
                    title = trimmed.trim_start_matches(['/', '#']).trim().to_string();
                }
                continue;
            }
            let mut parts = trimmed.split(|c: char| c == ',' || c.is_whitespace());
            let e: f64 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or(SourceError::BadLine {
                    path: display.clone(),
                    line: i + 1,
                })?;
            let v: f64 = parts
                .find(|s| !s.is_empty())
                .and_then(|s| s.parse().ok())
                .ok_or(SourceError::BadLine {
                    path: display.clone(),
                    line: i + 1,
                })?;
            energies.push(e);
            values.push(v);
        }
        if energies.len() < 2 {
            return Err(SourceError::TooFewPoints(display));
        }
        let max_ev = energies[energies.len() - 1];
        let spline =
            CubicSpline::new(energies, values).ok_or(SourceError::TooFewPoints(display))?;
        Ok(XraySource {
            kind: SourceKind::Tabulated {
                title,
                spline,
                max_ev,
            },
        })
    }

    pub fn title(&self) -> Option<&str> {
        match &self.kind {
            SourceKind::Tabulated { title, .. } if !title.is_empty() => Some(title),
            _ => None,
        }
    }

    /// Highest energy the source can emit, eV.
    pub fn max_energy(&self) -> f64 {
        match &self.kind {
            SourceKind::Tube(t) => t.kv * 1000.0,
            SourceKind::Monochromatic { energy_ev, .. } => *energy_ev,
            SourceKind::Tabulated { max_ev, .. } => *max_ev,
        }
    }

    /// Discrete lines emitted by the source.
    pub fn lines(&self) -> Vec<SourceLine> {
        match &self.kind {
            SourceKind::Tube(t) => t.characteristic_lines(),
            SourceKind::Monochromatic {
                energy_ev,
                intensity,
            } => vec![SourceLine {
                energy: *energy_ev,
                intensity: *intensity,
            }],
            SourceKind::Tabulated { .. } => vec![],
        }
    }

    /// Continuum intensity, photons/s/sr/eV at an energy.
    pub fn continuum(&self, energy_ev: f64) -> f64 {
        match &self.kind {
            SourceKind::Tube(t) => t.continuum(energy_ev),
            SourceKind::Monochromatic { .. } => 0.0,
            SourceKind::Tabulated {
                spline, max_ev, ..
            } => {
                if energy_ev <= 0.0 || energy_ev > *max_ev {
                    0.0
                } else {
                    spline.eval(energy_ev).max(0.0)
                }
            }
        }
    }
}

impl TubeModel {
    /// Mean ionization depth of the anode in g/cm2, from the Ebel depth
    /// fit.
    fn mean_depth(&self) -> f64 {
        let z = self.anode.atomic_number() as f64;
        let a = self.anode.atomic_weight();
        let e0 = self.kv; // keV
        let j = 0.0135 * z; // keV
        (a / z) * (0.787e-5 * j.sqrt() * e0.powf(1.5) + 0.735e-6 * e0 * e0)
    }

    /// Self-absorption of anode emission on the way out, at an energy.
    fn anode_absorption_factor(&self, energy_ev: f64) -> f64 {
        let chi = self.anode_material.cross_section(energy_ev) * self.takeoff_csc;
        let rz = 2.0 * self.mean_depth();
        let arg = chi * rz;
        if arg < 1.0e-6 {
            1.0
        } else {
            (1.0 - (-arg).exp()) / arg
        }
    }

    fn window_transmission(&self, energy_ev: f64) -> f64 {
        if self.be_window.is_empty() {
            1.0
        } else {
            self.be_window.transmission(energy_ev, 1.0)
        }
    }

    fn continuum(&self, energy_ev: f64) -> f64 {
        let e0_ev = self.kv * 1000.0;
        if energy_ev <= 0.0 || energy_ev >= e0_ev {
            return 0.0;
        }
        let z = self.anode.atomic_number() as f64;
        // Ebel's modified Kramers exponent.
        let x = 1.109 - 0.00435 * z + 0.00175 * self.kv;
        let spectral = (e0_ev / energy_ev - 1.0).powf(x);
        TUBE_INTENSITY_SCALE * 1.0e-3 * self.current_ma * z * spectral
            * self.anode_absorption_factor(energy_ev)
            * self.window_transmission(energy_ev)
    }

    fn characteristic_lines(&self) -> Vec<SourceLine> {
        let e0_ev = self.kv * 1000.0;
        let mut out = vec![];
        for series in [Series::K, Series::L] {
            let edge_level = match series {
                Series::K => EdgeLevel::K,
                _ => EdgeLevel::L3,
            };
            let edge = self.anode.edge_energy(edge_level);
            if edge <= 0.0 || e0_ev <= edge {
                continue;
            }
            let u0 = e0_ev / edge;
            // Green-Cosslett ionization factor.
            let ionization = u0 * u0.ln() - u0 + 1.0;
            let catalog = LineCatalog::new(self.anode, series);
            let fluor = catalog.fluor_yield();
            let rel_norm: f64 = catalog.lines().iter().map(|l| l.relative).sum();
            if rel_norm <= 0.0 {
                continue;
            }
            for line in catalog.lines() {
                let intensity = TUBE_INTENSITY_SCALE * 60.0 * self.current_ma * ionization
                    * fluor
                    * (line.relative / rel_norm)
                    * self.anode_absorption_factor(line.energy)
                    * self.window_transmission(line.energy);
                if intensity > 0.0 {
                    out.push(SourceLine {
                        energy: line.energy,
                        intensity,
                    });
                }
            }
        }
        out
    }
}
