// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Measurement-conditions assembly.

A configuration arrives as a numeric vector indexed by well-known keys
(the `##`-extension keywords of the configuration file), plus optional
optic-transmission and tube-spectrum files. `assemble` validates every
value, applies unit conversions (um to cm, sr to solid-angle fraction)
and produces the immutable [Conditions] record the forward model reads.
 */

use std::fmt;
use std::path::{Path, PathBuf};

use log::debug;
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::constants::{DEFAULT_MINIMUM_ENERGY_EV, SPHERE_STERADIANS, UM_TO_CM};
use crate::detector::{Detector, DetectorType};
use crate::material::{Material, Stoichiometry};
use crate::optic::XrayOptic;
use crate::refdata::Element;
use crate::source::XraySource;

/// Well-known configuration keys. The discriminant is the index into the
/// conditions vector and also fixes the `-5xx` exit-code offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
#[repr(usize)]
pub enum ConditionKey {
    AnodeZ = 0,
    Kv,
    TubeIncAngle,
    TubeTakeoffAngle,
    TubeBeWindow,
    TubeCurrent,
    FilterZ,
    FilterThickness,
    ExcitAngle,
    EmergAngle,
    AzimuthAngle,
    XTiltAngle,
    YTiltAngle,
    XPosition,
    YPosition,
    ZPosition,
    SourceSolidAngle,
    DetSolidAngle,
    Geometry,
    PathType,
    IncPathLength,
    EmergPathLength,
    WindowType,
    WindowThickness,
    DetectorType,
    DetResolution,
    DetBeWindow,
    DetActiveThickness,
    OpticType,
    MinimumEnergy,
    EnergyCorrectionSlope,
    EnergyCorrectionOffset,
    DetShelfFactor,
    DetShelfSlope,
    DetShelfSlopeStart,
}

pub const NUM_CONDITION_KEYS: usize = ConditionKey::DetShelfSlopeStart as usize + 1;

#[derive(Error, Debug)]
pub enum ConditionsError {
    #[error("Configuration parameter {key} has invalid value {value}")]
    InvalidParameter { key: ConditionKey, value: f64 },

    #[error("Optic transmission file missing or unreadable: {0}")]
    OpticFileMissing(String),

    #[error("Tube spectrum file missing or unreadable: {0}")]
    TubeFileMissing(String),
}

impl ConditionsError {
    /// The `-5xx` process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConditionsError::InvalidParameter { key, .. } => -500 - *key as i32,
            ConditionsError::OpticFileMissing(_) => -590,
            ConditionsError::TubeFileMissing(_) => -591,
        }
    }
}

/// Beam-path atmospheres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum Atmosphere {
    Vacuum,
    Helium,
    Mars,
    HeMars,
    Air,
}

impl Atmosphere {
    fn from_value(v: f64) -> Option<Atmosphere> {
        match v as i64 {
            0 | 1 => Some(Atmosphere::Vacuum),
            2 => Some(Atmosphere::Helium),
            3 => Some(Atmosphere::Mars),
            4 => Some(Atmosphere::HeMars),
            5 => Some(Atmosphere::Air),
            _ => None,
        }
    }

    /// The path gas as a material with its standard density, g/cm3.
    fn material(&self, path_length_cm: f64) -> Material {
        let mut m = Material::new();
        if path_length_cm <= 0.0 {
            return m;
        }
        let el = |z: u32| Element::new(z).unwrap();
        match self {
            Atmosphere::Vacuum => return m,
            Atmosphere::Helium => {
                m.add_element(el(2), 1.0, Stoichiometry::default());
                m.set_density(1.66e-4);
            }
            Atmosphere::Mars | Atmosphere::HeMars => {
                // Mars surface atmosphere: mostly CO2 with N2 and Ar.
                m.add_element(el(6), 0.26, Stoichiometry::default());
                m.add_element(el(8), 0.69, Stoichiometry::default());
                m.add_element(el(7), 0.03, Stoichiometry::default());
                m.add_element(el(18), 0.02, Stoichiometry::default());
                m.set_density(if *self == Atmosphere::HeMars {
                    1.0e-5
                } else {
                    2.0e-5
                });
            }
            Atmosphere::Air => {
                m.add_element(el(7), 0.755, Stoichiometry::default());
                m.add_element(el(8), 0.232, Stoichiometry::default());
                m.add_element(el(18), 0.013, Stoichiometry::default());
                m.set_density(1.2e-3);
            }
        }
        m.set_thickness(path_length_cm);
        m
    }
}

/// Specimen-window materials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter)]
pub enum WindowType {
    None,
    B4C,
    Plastic,
    Cfrp,
    Zr,
    Al,
    Nylon,
    NylonZr,
    Al2O3,
}

impl WindowType {
    fn from_value(v: f64) -> Option<WindowType> {
        match v as i64 {
            0 => Some(WindowType::None),
            1 => Some(WindowType::B4C),
            2 => Some(WindowType::Plastic),
            3 => Some(WindowType::Cfrp),
            4 => Some(WindowType::Zr),
            5 => Some(WindowType::Al),
            6 => Some(WindowType::Nylon),
            7 => Some(WindowType::NylonZr),
            8 => Some(WindowType::Al2O3),
            _ => None,
        }
    }

    fn material(&self, thickness_cm: f64) -> Material {
        let mut m = Material::new();
        if *self == WindowType::None || thickness_cm <= 0.0 {
            return m;
        }
        let el = |z: u32| Element::new(z).unwrap();
        match self {
            WindowType::None => unreachable!(),
            WindowType::B4C => {
                m.add_element(el(5), 0.783, Stoichiometry::default());
                m.add_element(el(6), 0.217, Stoichiometry::default());
                m.set_density(2.52);
            }
            WindowType::Plastic => {
                // Polypropylene.
                m.add_element(el(6), 0.857, Stoichiometry::default());
                m.add_element(el(1), 0.143, Stoichiometry::default());
                m.set_density(0.90);
            }
            WindowType::Cfrp => {
                m.add_element(el(6), 1.0, Stoichiometry::default());
                m.set_density(1.60);
            }
            WindowType::Zr => {
                m.add_element(el(40), 1.0, Stoichiometry::default());
            }
            WindowType::Al => {
                m.add_element(el(13), 1.0, Stoichiometry::default());
            }
            WindowType::Nylon => {
                m.add_element(el(6), 0.636, Stoichiometry::default());
                m.add_element(el(1), 0.098, Stoichiometry::default());
                m.add_element(el(7), 0.124, Stoichiometry::default());
                m.add_element(el(8), 0.142, Stoichiometry::default());
                m.set_density(1.15);
            }
            WindowType::NylonZr => {
                m.add_element(el(6), 0.616, Stoichiometry::default());
                m.add_element(el(1), 0.095, Stoichiometry::default());
                m.add_element(el(7), 0.120, Stoichiometry::default());
                m.add_element(el(8), 0.138, Stoichiometry::default());
                m.add_element(el(40), 0.031, Stoichiometry::default());
                m.set_density(1.20);
            }
            WindowType::Al2O3 => {
                m.add_element(el(13), 0.529, Stoichiometry::default());
                m.add_element(el(8), 0.471, Stoichiometry::default());
                m.set_density(3.95);
            }
        }
        m.set_thickness(thickness_cm);
        m
    }
}

/// The raw configuration: a keyed numeric vector plus auxiliary files.
#[derive(Debug, Clone, Default)]
pub struct ConditionsInput {
    values: Vec<f64>,
    pub optic_file: Option<PathBuf>,
    pub tube_file: Option<PathBuf>,
    /// `-T` shelf overrides are applied only when the option was present.
    pub shelf_override: bool,
}

impl ConditionsInput {
    pub fn new() -> ConditionsInput {
        ConditionsInput {
            values: vec![0.0; NUM_CONDITION_KEYS],
            optic_file: None,
            tube_file: None,
            shelf_override: false,
        }
    }

    pub fn get(&self, key: ConditionKey) -> f64 {
        self.values.get(key as usize).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, key: ConditionKey, value: f64) {
        if self.values.len() < NUM_CONDITION_KEYS {
            self.values.resize(NUM_CONDITION_KEYS, 0.0);
        }
        self.values[key as usize] = value;
    }
}

/// The assembled, immutable instrument description.
#[derive(Debug)]
pub struct Conditions {
    pub source: XraySource,
    pub filter: Material,
    pub optic: XrayOptic,
    pub dust_on_optic: Material,
    pub incident_path: Material,
    /// Source solid angle as a fraction of the sphere.
    pub solid_angle_source: f64,
    pub excit_angle_deg: f64,
    pub excit_csc: f64,
    pub geometry_factor: f64,
    pub dust_on_specimen: Material,
    pub window: Material,
    pub emerg_angle_deg: f64,
    pub emerg_csc: f64,
    pub emergent_path: Material,
    pub dust_on_detector: Material,
    /// Detector solid angle as a fraction of the sphere.
    pub solid_angle_detector: f64,
    pub detector: Detector,
    pub e_min: f64,
    pub tube_file_title: Option<String>,
    /// Scattering angle between beam and detector, radians.
    pub scatter_angle: f64,
}

impl Conditions {
    /// A compact single-line-per-key report, logged at debug level after
    /// assembly.
    pub fn report(&self) -> String {
        let mut s = String::new();
        s.push_str(&format!(
            "source max energy {:.0} eV\n",
            self.source.max_energy()
        ));
        s.push_str(&format!(
            "excitation angle {:.2} deg, emergence angle {:.2} deg\n",
            self.excit_angle_deg, self.emerg_angle_deg
        ));
        s.push_str(&format!(
            "solid angles: source {:.4e}, detector {:.4e} (sphere fractions)\n",
            self.solid_angle_source, self.solid_angle_detector
        ));
        s.push_str(&format!("geometry factor {:.4}\n", self.geometry_factor));
        s.push_str(&format!(
            "detector {} resolution {:.1} eV\n",
            self.detector.det_type(),
            self.detector.resolution(crate::constants::RESOLUTION_REFERENCE_ENERGY)
        ));
        s.push_str(&format!("minimum energy {:.0} eV", self.e_min));
        s
    }
}

impl fmt::Display for Conditions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.report())
    }
}

fn invalid(key: ConditionKey, value: f64) -> ConditionsError {
    ConditionsError::InvalidParameter { key, value }
}

/// Validate a conditions input and assemble the immutable record.
pub fn assemble(input: &ConditionsInput) -> Result<Conditions, ConditionsError> {
    use ConditionKey as K;

    // Source: external file, else tube model.
    let kv = input.get(K::Kv);
    let mut tube_file_title = None;
    let source = if let Some(path) = &input.tube_file {
        let s = XraySource::from_file(path)
            .map_err(|_| ConditionsError::TubeFileMissing(path.display().to_string()))?;
        tube_file_title = s.title().map(|t| t.to_string());
        s
    } else {
        let anode_z = input.get(K::AnodeZ);
        let anode = Element::new(anode_z as u32).map_err(|_| invalid(K::AnodeZ, anode_z))?;
        if kv <= 0.0 {
            return Err(invalid(K::Kv, kv));
        }
        let inc = input.get(K::TubeIncAngle);
        if inc <= 0.0 || inc > 90.0 {
            return Err(invalid(K::TubeIncAngle, inc));
        }
        let takeoff = input.get(K::TubeTakeoffAngle);
        if takeoff == 0.0 || takeoff.abs() > 90.0 {
            return Err(invalid(K::TubeTakeoffAngle, takeoff));
        }
        let be_window = input.get(K::TubeBeWindow);
        if be_window < 0.0 {
            return Err(invalid(K::TubeBeWindow, be_window));
        }
        // Tube current arrives in uA.
        let current = input.get(K::TubeCurrent);
        if current < 0.0 {
            return Err(invalid(K::TubeCurrent, current));
        }
        XraySource::tube(anode, kv, inc, takeoff.abs(), be_window, current / 1000.0)
    };

    // Primary-beam filter.
    let filter_z = input.get(K::FilterZ);
    let filter_thick = input.get(K::FilterThickness);
    let mut filter = Material::new();
    if filter_z > 0.0 {
        let el = Element::new(filter_z as u32).map_err(|_| invalid(K::FilterZ, filter_z))?;
        if filter_thick < 0.0 {
            return Err(invalid(K::FilterThickness, filter_thick));
        }
        if filter_thick > 0.0 {
            filter.add_element(el, 1.0, Stoichiometry::default());
            filter.set_thickness(filter_thick * UM_TO_CM);
        }
    }

    // Optic.
    let optic_type = input.get(K::OpticType);
    let optic = match (&input.optic_file, optic_type as i64) {
        (Some(path), _) => XrayOptic::from_file(path)
            .map_err(|_| ConditionsError::OpticFileMissing(path.display().to_string()))?,
        (None, 0) => XrayOptic::none(),
        (None, 1) => XrayOptic::boxcar(900.0, kv.max(1.0) * 1000.0),
        (None, 4..=7) => XrayOptic::flight_model(),
        (None, _) => return Err(invalid(K::OpticType, optic_type)),
    };

    // Atmosphere paths, lengths in cm.
    let path_type = input.get(K::PathType);
    let atmosphere =
        Atmosphere::from_value(path_type).ok_or_else(|| invalid(K::PathType, path_type))?;
    let inc_path = input.get(K::IncPathLength);
    if inc_path < 0.0 {
        return Err(invalid(K::IncPathLength, inc_path));
    }
    let emerg_path = input.get(K::EmergPathLength);
    if emerg_path < 0.0 {
        return Err(invalid(K::EmergPathLength, emerg_path));
    }
    let incident_path = atmosphere.material(inc_path);
    let emergent_path = match atmosphere {
        // In the He-Mars arrangement the incident path is helium flushed.
        Atmosphere::HeMars => Atmosphere::Mars.material(emerg_path),
        other => other.material(emerg_path),
    };

    // Angles and solid angles.
    let excit = input.get(K::ExcitAngle);
    if excit <= 0.0 || excit > 90.0 {
        return Err(invalid(K::ExcitAngle, excit));
    }
    let emerg = input.get(K::EmergAngle);
    if emerg <= 0.0 || emerg > 90.0 {
        return Err(invalid(K::EmergAngle, emerg));
    }
    let sa_source = input.get(K::SourceSolidAngle);
    if sa_source < 0.0 {
        return Err(invalid(K::SourceSolidAngle, sa_source));
    }
    let sa_det = input.get(K::DetSolidAngle);
    if sa_det < 0.0 {
        return Err(invalid(K::DetSolidAngle, sa_det));
    }
    // Zero means "not measured": the whole sphere, factor one.
    let solid_angle_source = if sa_source == 0.0 {
        1.0
    } else {
        sa_source / SPHERE_STERADIANS
    };
    let solid_angle_detector = if sa_det == 0.0 {
        1.0
    } else {
        sa_det / SPHERE_STERADIANS
    };
    let geometry = input.get(K::Geometry);
    if geometry < 0.0 {
        return Err(invalid(K::Geometry, geometry));
    }
    let geometry_factor = if geometry == 0.0 { 1.0 } else { geometry };

    // Specimen window.
    let window_type_v = input.get(K::WindowType);
    let window_type =
        WindowType::from_value(window_type_v).ok_or_else(|| invalid(K::WindowType, window_type_v))?;
    let window_thick = input.get(K::WindowThickness);
    if window_thick < 0.0 {
        return Err(invalid(K::WindowThickness, window_thick));
    }
    let window = window_type.material(window_thick * UM_TO_CM);

    // Detector.
    let det_type_v = input.get(K::DetectorType);
    let det_type = match det_type_v as i64 {
        1 => DetectorType::SiPin,
        2 => DetectorType::SiSdd,
        3 => DetectorType::CdTe,
        4 => DetectorType::HpGe,
        _ => return Err(invalid(K::DetectorType, det_type_v)),
    };
    let det_res = input.get(K::DetResolution);
    if det_res < 0.0 {
        return Err(invalid(K::DetResolution, det_res));
    }
    let det_window = input.get(K::DetBeWindow);
    if det_window < 0.0 {
        return Err(invalid(K::DetBeWindow, det_window));
    }
    let det_active = input.get(K::DetActiveThickness);
    if det_active < 0.0 {
        return Err(invalid(K::DetActiveThickness, det_active));
    }
    let mut detector = Detector::new(det_type, det_res, det_window, det_active);
    if input.shelf_override {
        detector.set_shelf(
            input.get(K::DetShelfFactor),
            input.get(K::DetShelfSlope),
            input.get(K::DetShelfSlopeStart),
        );
    }

    let e_min = input.get(K::MinimumEnergy);
    if e_min < 0.0 || (kv > 0.0 && e_min > kv * 1000.0) {
        return Err(invalid(K::MinimumEnergy, e_min));
    }
    let e_min = if e_min == 0.0 {
        DEFAULT_MINIMUM_ENERGY_EV
    } else {
        e_min
    };

    // Scattering angle between the incident beam and the detected beam;
    // source and detector sit on the same side of the specimen, so this
    // is backscatter geometry.
    let scatter_angle = (excit + emerg).to_radians().min(std::f64::consts::PI);

    let conditions = Conditions {
        source,
        filter,
        optic,
        dust_on_optic: Material::new(),
        incident_path,
        solid_angle_source,
        excit_angle_deg: excit,
        excit_csc: 1.0 / excit.to_radians().sin(),
        geometry_factor,
        dust_on_specimen: Material::new(),
        window,
        emerg_angle_deg: emerg,
        emerg_csc: 1.0 / emerg.to_radians().sin(),
        emergent_path,
        dust_on_detector: Material::new(),
        solid_angle_detector,
        detector,
        e_min,
        tube_file_title,
        scatter_angle,
    };
    debug!("Assembled conditions:\n{}", conditions.report());
    Ok(conditions)
}

/// The `-e` linear energy-calibration correction lives in the conditions
/// vector; expose it for spectrum setup.
pub fn energy_correction(input: &ConditionsInput) -> (f64, f64) {
    (
        input.get(ConditionKey::EnergyCorrectionOffset),
        input.get(ConditionKey::EnergyCorrectionSlope),
    )
}

/// Read a configuration file of `##KEY : value` lines into a conditions
/// input. Unknown keys are ignored so configurations can carry extra
/// bookkeeping entries.
pub fn read_config_file(path: &Path) -> std::io::Result<ConditionsInput> {
    use std::io::BufRead;
    let file = std::fs::File::open(path)?;
    let mut input = ConditionsInput::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim_end_matches(['\r', '\n']).trim();
        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }
        let body = trimmed.trim_start_matches('#');
        let (keyword, value) = match body.split_once(':') {
            Some((k, v)) => (k.trim().to_ascii_uppercase(), v.trim()),
            None => continue,
        };
        if let Some(key) = read_config_keyword(&keyword) {
            if let Ok(v) = value.parse::<f64>() {
                input.set(key, v);
            }
        } else if keyword == "OPTICFILE" {
            input.optic_file = Some(PathBuf::from(value));
        } else if keyword == "TUBEFILE" {
            input.tube_file = Some(PathBuf::from(value));
        }
    }
    Ok(input)
}

/// Configuration-file keywords for the conditions vector.
pub(crate) fn read_config_keyword(keyword: &str) -> Option<ConditionKey> {
    use ConditionKey as K;
    Some(match keyword {
        "ANODE" | "ANODEZ" => K::AnodeZ,
        "KV" | "BEAMKV" => K::Kv,
        "TUBEINCANGLE" => K::TubeIncAngle,
        "TUBETAKEOFFANGLE" => K::TubeTakeoffAngle,
        "TUBEWINDOW" | "TUBEBEWINDOW" => K::TubeBeWindow,
        "EMISSION" | "TUBECURRENT" => K::TubeCurrent,
        "FILTERZ" => K::FilterZ,
        "FILTERTHICKNESS" => K::FilterThickness,
        "ELEVANGLE" | "EXCITANGLE" => K::ExcitAngle,
        "TAKEOFFANGLE" | "EMERGANGLE" => K::EmergAngle,
        "AZIMANGLE" => K::AzimuthAngle,
        "SOLIDANGLE" | "SOURCESOLIDANGLE" => K::SourceSolidAngle,
        "DETSOLIDANGLE" => K::DetSolidAngle,
        "GEOMETRY" => K::Geometry,
        "ATMOSPHERE" | "PATHTYPE" => K::PathType,
        "INCPATH" | "INCPATHLENGTH" => K::IncPathLength,
        "EMERGPATH" | "EMERGPATHLENGTH" => K::EmergPathLength,
        "WINDOWTYPE" => K::WindowType,
        "WINDOWTHICKNESS" => K::WindowThickness,
        "DETECTORTYPE" => K::DetectorType,
        "RESOLUTION" | "DETRESOLUTION" => K::DetResolution,
        "DETWINDOW" | "DETBEWINDOW" => K::DetBeWindow,
        "ACTIVELAYER" | "DETACTIVETHICKNESS" => K::DetActiveThickness,
        "OPTICTYPE" => K::OpticType,
        "MINENERGY" | "MINIMUMENERGY" => K::MinimumEnergy,
        "ENERGYCORRECTIONSLOPE" => K::EnergyCorrectionSlope,
        "ENERGYCORRECTIONOFFSET" => K::EnergyCorrectionOffset,
        "DETECTOR_SHELF_FACTOR" => K::DetShelfFactor,
        "DETECTOR_SHELF_SLOPE" => K::DetShelfSlope,
        "DETECTOR_SHELF_SLOPE_START" => K::DetShelfSlopeStart,
        _ => return None,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn pixl_like_input() -> ConditionsInput {
        use ConditionKey as K;
        let mut input = ConditionsInput::new();
        input.set(K::AnodeZ, 45.0);
        input.set(K::Kv, 28.0);
        input.set(K::TubeIncAngle, 60.0);
        input.set(K::TubeTakeoffAngle, 60.0);
        input.set(K::TubeBeWindow, 125.0);
        input.set(K::TubeCurrent, 20.0);
        input.set(K::ExcitAngle, 70.0);
        input.set(K::EmergAngle, 70.0);
        input.set(K::SourceSolidAngle, 0.03);
        input.set(K::DetSolidAngle, 0.03);
        input.set(K::PathType, 3.0);
        input.set(K::IncPathLength, 2.5);
        input.set(K::EmergPathLength, 2.5);
        input.set(K::DetectorType, 2.0);
        input.set(K::DetResolution, 155.0);
        input.set(K::DetBeWindow, 25.0);
        input.set(K::DetActiveThickness, 0.5);
        input
    }

    #[test]
    fn assembles_pixl_like_config() {
        let cond = assemble(&pixl_like_input()).unwrap();
        assert_eq!(cond.detector.det_type(), DetectorType::SiSdd);
        assert!(cond.solid_angle_source > 0.0 && cond.solid_angle_source < 1.0);
        assert!(cond.excit_csc > 1.0);
        assert_eq!(cond.e_min, DEFAULT_MINIMUM_ENERGY_EV);
        assert!(cond.scatter_angle > 0.0 && cond.scatter_angle < std::f64::consts::PI);
        // Mars atmosphere path absorbs a little at low energies.
        let t = cond.incident_path.transmission(2_000.0, 1.0);
        assert!(t > 0.5 && t < 1.0, "Mars path transmission {t}");
    }

    #[test]
    fn invalid_angle_reports_key() {
        let mut input = pixl_like_input();
        input.set(ConditionKey::ExcitAngle, 135.0);
        match assemble(&input) {
            Err(ConditionsError::InvalidParameter { key, value }) => {
                assert_eq!(key, ConditionKey::ExcitAngle);
                assert_eq!(value, 135.0);
            }
            other => panic!("expected InvalidParameter, got {other:?}"),
        }
    }

    #[test]
    fn invalid_detector_type_rejected() {
        let mut input = pixl_like_input();
        input.set(ConditionKey::DetectorType, 9.0);
        assert!(matches!(
            assemble(&input),
            Err(ConditionsError::InvalidParameter {
                key: ConditionKey::DetectorType,
                ..
            })
        ));
    }

    #[test]
    fn negative_thickness_rejected() {
        let mut input = pixl_like_input();
        input.set(ConditionKey::WindowThickness, -5.0);
        assert!(assemble(&input).is_err());
    }

    #[test]
    fn exit_codes_are_in_band() {
        let err = invalid(ConditionKey::Kv, -1.0);
        assert_eq!(err.exit_code(), -501);
        let err = ConditionsError::OpticFileMissing("x".into());
        assert_eq!(err.exit_code(), -590);
    }

    #[test]
    fn config_file_round_trip() {
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "//  PIXL breadboard configuration").unwrap();
        writeln!(f, "##ANODE : 45").unwrap();
        writeln!(f, "##KV : 28").unwrap();
        writeln!(f, "##TUBEINCANGLE : 60").unwrap();
        writeln!(f, "##TUBETAKEOFFANGLE : 60").unwrap();
        writeln!(f, "##TUBEBEWINDOW : 125").unwrap();
        writeln!(f, "##EMISSION : 20").unwrap();
        writeln!(f, "##ELEVANGLE : 70").unwrap();
        writeln!(f, "##TAKEOFFANGLE : 70").unwrap();
        writeln!(f, "##ATMOSPHERE : 3").unwrap();
        writeln!(f, "##DETECTORTYPE : 2").unwrap();
        writeln!(f, "##RESOLUTION : 155").unwrap();
        writeln!(f, "##DETWINDOW : 25").unwrap();
        writeln!(f, "##ACTIVELAYER : 0.5").unwrap();
        let input = read_config_file(f.path()).unwrap();
        assert_eq!(input.get(ConditionKey::AnodeZ), 45.0);
        assert_eq!(input.get(ConditionKey::Kv), 28.0);
        let cond = assemble(&input).unwrap();
        assert_eq!(cond.detector.det_type(), DetectorType::SiSdd);
    }
}
