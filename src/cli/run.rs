// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Sub-command execution: glue between the parsed arguments and the
//! library. Each runner validates its inputs, does the work, and logs a
//! short human-readable summary.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::conditions::{assemble, read_config_file, ConditionKey, ConditionsInput};
use crate::elements::{parse_element_list, ElementListEntry, ParsedElementList};
use crate::energy_cal::{energy_calibrate, EnergyCal};
use crate::error::PiquantError;
use crate::fit::fit_spectrum;
use crate::fp::{build_components, build_primary_components};
use crate::io::{
    convert_sdd_to_edr, read_spectrum_file, write_msa, write_plot_csv,
};
use crate::map::{map_header, map_row, run_map, MapJob, MapParams};
use crate::quant::{
    attach_snip_background, calibrate_standards, evaluate_standards, fit_one_standard,
    quantify_unknown, AnalysisContext, Calibration,
};
use crate::spectrum::Spectrum;
use crate::standards::{read_standards_csv, read_standards_txt, Standard};
use crate::utils::{combine_detectors, BulkSum};

use super::{Cli, Command, CommonOpts};

/// Default axis for purely calculated spectra: the PIXL channel count and
/// gain.
const CALC_CHANNELS: usize = 2048;
const CALC_EV_PER_CHANNEL: f64 = 11.85;
const CALC_LIVE_TIME: f64 = 60.0;

impl CommonOpts {
    fn context(&self) -> AnalysisContext {
        AnalysisContext {
            fe_oxide_ratio: self.fe_ratio,
            oxides: !self.carbonates,
            carbonates: self.carbonates,
            normalization: self.normalize,
        }
    }

    fn energy_override(&self) -> Result<Option<EnergyCal>, PiquantError> {
        match self.energy.len() {
            0 => Ok(None),
            2 => Ok(Some(EnergyCal::new(self.energy[0], self.energy[1]))),
            3 => Ok(Some(EnergyCal::with_quad(
                self.energy[0],
                self.energy[1],
                self.energy[2],
            ))),
            n => Err(PiquantError::Arguments(format!(
                "-e takes 2 or 3 comma-separated values, got {n}"
            ))),
        }
    }

    fn parse_elements(&self, list: &str) -> Result<ParsedElementList, PiquantError> {
        let mut parsed = parse_element_list(list, !self.carbonates, self.fe_ratio)?;
        if self.carbonates {
            parsed.carbonates = true;
        }
        Ok(parsed)
    }

    /// Apply the per-spectrum option block.
    fn setup_spectrum(&self, spectrum: &mut Spectrum) -> Result<(), PiquantError> {
        if let Some(cal) = self.energy_override()? {
            spectrum.set_calibration(cal);
            // A GUI can pick this line up and reuse the calibration.
            info!(
                "(-e,{:.2},{:.4})",
                spectrum.calibration().start(),
                spectrum.calibration().per_channel()
            );
        }
        spectrum.bkg_params = self.bkg.clone();
        spectrum.bh_params = self.bkg_high.clone();
        spectrum.bx_params = self.bkg_crossover.clone();
        spectrum.adjust_energy = !self.no_energy_adjust;
        spectrum.adjust_width = !self.no_width_adjust;
        spectrum.convolve_compton = self.convolve_compton;
        Ok(())
    }
}

/// Read a configuration file and fold in the option overrides.
fn load_config(path: &str, opts: &CommonOpts) -> Result<ConditionsInput, PiquantError> {
    let mut input = read_config_file(Path::new(path))?;
    if let Some(tube) = &opts.tube_file {
        input.tube_file = Some(PathBuf::from(tube));
    }
    // Shelf keys land in the conditions only when -T was given.
    if !opts.shelf.is_empty() {
        input.shelf_override = true;
        input.set(ConditionKey::DetShelfFactor, opts.shelf.first().copied().unwrap_or(1.0));
        input.set(ConditionKey::DetShelfSlope, opts.shelf.get(1).copied().unwrap_or(0.0));
        input.set(
            ConditionKey::DetShelfSlopeStart,
            opts.shelf.get(2).copied().unwrap_or(0.0),
        );
    }
    Ok(input)
}

/// Read a spectrum file, merge its conditions over the configuration,
/// combine the detectors and apply the option block.
fn load_spectrum(
    path: &str,
    config: &ConditionsInput,
    opts: &CommonOpts,
) -> Result<(Spectrum, ConditionsInput), PiquantError> {
    let contents = read_spectrum_file(Path::new(path))?;
    let mut merged = config.clone();
    for key in <ConditionKey as strum::IntoEnumIterator>::iter() {
        let v = contents.conditions.get(key);
        if v != 0.0 {
            merged.set(key, v);
        }
    }
    let mut spectrum = combine_detectors(contents.spectra, opts.detector)?;
    spectrum.file_name = path.to_string();
    opts.setup_spectrum(&mut spectrum)?;
    Ok((spectrum, merged))
}

/// Load standards (CSV or legacy TXT by extension) and their spectra.
/// Spectrum paths are taken relative to the standards file.
fn load_standards(path: &str, opts: &CommonOpts) -> Result<Vec<Standard>, PiquantError> {
    let p = Path::new(path);
    let is_txt = p
        .extension()
        .map(|e| e.eq_ignore_ascii_case("txt"))
        .unwrap_or(false);
    let mut standards = if is_txt {
        read_standards_txt(p, opts.min_weight.unwrap_or(0.0), opts.fe_ratio)?
    } else {
        read_standards_csv(p, opts.fe_ratio)?
    };
    let base = p.parent().unwrap_or(Path::new("."));
    for standard in standards.iter_mut() {
        if standard.spectrum_file.is_empty() {
            continue;
        }
        let spec_path = base.join(&standard.spectrum_file);
        match read_spectrum_file(&spec_path) {
            Ok(contents) => {
                let mut spectrum = combine_detectors(contents.spectra, opts.detector)?;
                spectrum.file_name = standard.spectrum_file.clone();
                opts.setup_spectrum(&mut spectrum)?;
                standard.spectrum = Some(spectrum);
            }
            Err(e) => {
                warn!(
                    "Standard '{}': spectrum {} unreadable ({e}); standard disabled",
                    standard.name(),
                    spec_path.display()
                );
                standard.disable = true;
            }
        }
    }
    Ok(standards)
}

fn read_spectrum_list(path: &str) -> Result<Vec<MapJob>, PiquantError> {
    let base = Path::new(path).parent().unwrap_or(Path::new(".")).to_path_buf();
    let file = File::open(path)?;
    let mut jobs = vec![];
    for line in BufReader::new(file).lines() {
        let line = line?;
        let trimmed = line.trim_end_matches(['\r', '\n']).trim();
        if trimmed.is_empty() || trimmed.starts_with("//") || trimmed.starts_with('#') {
            continue;
        }
        // A PMC selector may follow the file name after a comma; binary
        // dataset selection is not carried here.
        let file_part = trimmed.split(',').next().unwrap_or(trimmed).trim();
        jobs.push(MapJob {
            spectrum_file: base.join(file_part),
            sequence_number: jobs.len(),
        });
    }
    Ok(jobs)
}

/// A blank spectrum on the default calculation axis, honoring `-e`.
fn calculation_spectrum(opts: &CommonOpts) -> Result<Spectrum, PiquantError> {
    let cal = opts
        .energy_override()?
        .unwrap_or(EnergyCal::new(0.0, CALC_EV_PER_CHANNEL));
    let mut s = Spectrum::new(vec![0.0; CALC_CHANNELS], cal);
    s.set_live_time(CALC_LIVE_TIME);
    s.adjust_energy = false;
    s.adjust_width = false;
    Ok(s)
}

fn log_element_results(element_list: &[ElementListEntry]) {
    for entry in element_list {
        if let Some(pct) = entry.percent {
            info!(
                "  {:>2} {:>2}: {:8.3} %   intensity {:10.1}   ECF {:.4}   rel err {:.2} %",
                entry.element.symbol(),
                entry.quant_series(),
                pct,
                entry.intensity,
                entry.ecf.unwrap_or(1.0),
                entry.total_err
            );
        }
    }
}

/// Run the parsed command line to completion.
pub fn dispatch(cli: &Cli) -> Result<(), PiquantError> {
    match &cli.command {
        Command::Version => {
            println!("piquant {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }

        Command::Ems { sdd_csv, edr_csv } => {
            let lines = convert_sdd_to_edr(Path::new(sdd_csv), Path::new(edr_csv))?;
            info!("Wrote {lines} EDR lines to {edr_csv}");
            Ok(())
        }

        Command::EnergyCalibrate {
            spectrum,
            element_list,
            opts,
        } => {
            let contents = read_spectrum_file(Path::new(spectrum))?;
            let combined = combine_detectors(contents.spectra, opts.detector)?;
            let parsed = opts.parse_elements(element_list)?;
            let cal = energy_calibrate(combined.measured(), &parsed.entries)?;
            info!(
                "Energy calibration: start {:.2} eV, {:.4} eV/channel",
                cal.start(),
                cal.per_channel()
            );
            // Machine-parseable signal line for the GUI.
            println!("(-e,{:.2},{:.4})", cal.start(), cal.per_channel());
            Ok(())
        }

        Command::Plot {
            spectrum,
            plot_file,
            opts,
        } => {
            let config = ConditionsInput::new();
            let (mut spec, _) = load_spectrum(spectrum, &config, opts)?;
            attach_snip_background(&mut spec);
            spec.update_calc();
            write_plot_csv(&spec, Path::new(plot_file))?;
            info!("Plot written to {plot_file}");
            Ok(())
        }

        Command::PrimarySpectrum {
            config,
            plot_file,
            opts,
        } => {
            let input = load_config(config, opts)?;
            let conditions = assemble(&input)?;
            let mut spec = calculation_spectrum(opts)?;
            build_primary_components(&conditions, &mut spec);
            write_plot_csv(&spec, Path::new(plot_file))?;
            info!("Primary spectrum written to {plot_file}");
            Ok(())
        }

        Command::Calculate {
            config,
            standards,
            plot_file,
            opts,
        } => {
            let input = load_config(config, opts)?;
            let conditions = assemble(&input)?;
            let stds = load_standards(standards, opts)?;
            let standard = select_standard(&stds, opts)?;
            let mut spec = calculation_spectrum(opts)?;
            build_components(
                &conditions,
                &standard.material,
                &standard.element_list,
                &mut spec,
            );
            write_plot_csv(&spec, Path::new(plot_file))?;
            info!(
                "Calculated spectrum of '{}' written to {plot_file}",
                standard.name()
            );
            Ok(())
        }

        Command::Compare {
            config,
            standards,
            spectrum,
            plot_file,
            opts,
        } => {
            let input = load_config(config, opts)?;
            let stds = load_standards(standards, opts)?;
            let standard = select_standard(&stds, opts)?;
            let (mut spec, merged) = load_spectrum(spectrum, &input, opts)?;
            let conditions = assemble(&merged)?;
            attach_snip_background(&mut spec);
            build_components(
                &conditions,
                &standard.material,
                &standard.element_list,
                &mut spec,
            );
            let fit = fit_spectrum(&mut spec, &conditions.detector)?;
            info!(
                "Compared '{}' against {}: reduced chi-sq {:.3}",
                standard.name(),
                spectrum,
                fit.chisq
            );
            write_plot_csv(&spec, Path::new(plot_file))?;
            Ok(())
        }

        Command::Optic {
            config,
            standards,
            spectrum,
            element_list,
            plot_file,
            opts,
        } => {
            let input = load_config(config, opts)?;
            let stds = load_standards(standards, opts)?;
            let standard = select_standard(&stds, opts)?;
            let _ = opts.parse_elements(element_list)?;
            let (mut spec, mut merged) = load_spectrum(spectrum, &input, opts)?;
            // Calculate without any optic; the response is whatever ratio
            // remains between measurement and calculation.
            merged.optic_file = None;
            merged.set(ConditionKey::OpticType, 0.0);
            let conditions = assemble(&merged)?;
            build_components(
                &conditions,
                &standard.material,
                &standard.element_list,
                &mut spec,
            );
            write_optic_response(&spec, Path::new(plot_file))?;
            info!("Derived optic response written to {plot_file}");
            Ok(())
        }

        Command::Calibrate {
            config,
            standards,
            calibration,
            element_list,
            opts,
        } => {
            let input = load_config(config, opts)?;
            let conditions = assemble(&input)?;
            let mut stds = load_standards(standards, opts)?;
            let _ = opts.parse_elements(element_list)?;
            let cal = match &opts.standard {
                Some(sel) => fit_one_standard(&mut stds, sel, &conditions)?,
                None => calibrate_standards(&mut stds, &conditions)?,
            };
            cal.write_file(Path::new(calibration))?;
            info!(
                "Calibration with {} ECF terms written to {calibration}",
                cal.terms().len()
            );
            Ok(())
        }

        Command::Quantify {
            config,
            calibration,
            spectrum,
            element_list,
            plot_file,
            opts,
        } => {
            let input = load_config(config, opts)?;
            let calibration = load_calibration(calibration)?;
            let (mut spec, merged) = load_spectrum(spectrum, &input, opts)?;
            let conditions = assemble(&merged)?;
            let mut parsed = opts.parse_elements(element_list)?;
            let result = quantify_unknown(
                &mut parsed.entries,
                &conditions,
                &mut spec,
                &calibration,
                opts.context(),
            )?;
            info!(
                "Quantified {} in {} iterations (chi-sq {:.3}):",
                spectrum, result.iterations, result.chisq
            );
            log_element_results(&parsed.entries);
            if let Some(plot) = plot_file {
                write_plot_csv(&spec, Path::new(plot))?;
                info!("Plot written to {plot}");
            }
            Ok(())
        }

        Command::Evaluate {
            config,
            standards,
            calibration,
            element_list,
            map_file,
            opts,
        } => {
            let input = load_config(config, opts)?;
            let conditions = assemble(&input)?;
            let mut stds = load_standards(standards, opts)?;
            let _ = opts.parse_elements(element_list)?;
            let calibration = load_calibration(calibration)?;
            let rows = evaluate_standards(&mut stds, &conditions, &calibration, opts.context())?;
            let selector = opts.outputs.as_deref().unwrap_or("PEGH");
            let mut out = File::create(map_file)?;
            use std::io::Write as _;
            if let Some(first) = rows.first() {
                writeln!(out, "{}", map_header(selector, &first.element_list))?;
            }
            for row in &rows {
                let spec = stds
                    .iter()
                    .find(|s| s.name() == row.standard_name)
                    .and_then(|s| s.spectrum.as_ref());
                if let Some(spec) = spec {
                    let element_sum: f64 =
                        row.element_list.iter().filter_map(|e| e.percent).sum();
                    writeln!(
                        out,
                        "{}",
                        map_row(
                            selector,
                            &row.element_list,
                            spec,
                            &conditions.detector,
                            element_sum
                        )
                    )?;
                }
            }
            info!("Evaluate results for {} standards written to {map_file}", rows.len());
            Ok(())
        }

        Command::Map {
            config,
            calibration,
            spectrum_list,
            element_list,
            map_file,
            opts,
        } => {
            let input = load_config(config, opts)?;
            // Configuration problems are fatal before any worker starts.
            assemble(&input)?;
            let calibration = load_calibration(calibration)?;
            let parsed = opts.parse_elements(element_list)?;
            let jobs = read_spectrum_list(spectrum_list)?;
            let params = MapParams {
                conditions_input: &input,
                element_list: &parsed.entries,
                calibration: &calibration,
                context: opts.context(),
                selector: opts.outputs.as_deref().unwrap_or(""),
                detector_select: opts.detector,
                energy_override: opts.energy_override()?,
                bkg_params: opts.bkg.clone(),
                bh_params: opts.bkg_high.clone(),
                bx_params: opts.bkg_crossover.clone(),
                adjust_energy: !opts.no_energy_adjust,
                adjust_width: !opts.no_width_adjust,
                convolve_compton: opts.convolve_compton,
                threads: opts.threads,
                max_spectra: opts.max_spectra,
            };
            let summary = run_map(jobs, &params, Path::new(map_file))?;
            info!(
                "Map finished: {} rows, {} failures",
                summary.rows_written, summary.failures
            );
            Ok(())
        }

        Command::Sum {
            config,
            calibration: _,
            spectrum_list,
            element_list: _,
            plot_file,
            opts,
        } => {
            let _ = load_config(config, opts)?;
            let jobs = read_spectrum_list(spectrum_list)?;
            let mut acc = BulkSum::new();
            for job in &jobs {
                let contents = read_spectrum_file(&job.spectrum_file)?;
                let mut spec = combine_detectors(contents.spectra, opts.detector)?;
                spec.file_name = job.spectrum_file.display().to_string();
                opts.setup_spectrum(&mut spec)?;
                acc.add(&spec).map_err(PiquantError::Combine)?;
            }
            let count = acc.count();
            let sum = acc.finish().ok_or(PiquantError::Arguments(
                "spectrum list was empty".to_string(),
            ))?;
            let out = Path::new(plot_file);
            if out
                .extension()
                .map(|e| e.eq_ignore_ascii_case("msa"))
                .unwrap_or(false)
            {
                write_msa(&sum, out)?;
            } else {
                write_plot_csv(&sum, out)?;
            }
            info!("Bulk sum of {count} spectra written to {plot_file}");
            Ok(())
        }
    }
}

fn select_standard<'a>(
    standards: &'a [Standard],
    opts: &CommonOpts,
) -> Result<&'a Standard, PiquantError> {
    match &opts.standard {
        None => standards.first().ok_or(PiquantError::Arguments(
            "standards file contained no standards".to_string(),
        )),
        Some(sel) => {
            if let Ok(i) = sel.parse::<usize>() {
                return standards.get(i).ok_or(PiquantError::Arguments(format!(
                    "standard index {i} out of range"
                )));
            }
            standards
                .iter()
                .find(|s| s.names.iter().any(|n| n.eq_ignore_ascii_case(sel)))
                .ok_or(PiquantError::Arguments(format!("unknown standard '{sel}'")))
        }
    }
}

/// A missing calibration file is allowed for quantify/map runs without
/// standards; it just means unity ECFs.
fn load_calibration(path: &str) -> Result<Calibration, PiquantError> {
    if path == "-" || path.is_empty() {
        return Ok(Calibration::new());
    }
    match Calibration::read_file(Path::new(path)) {
        Ok(cal) => Ok(cal),
        Err(crate::quant::CalibrationFileError::Io { .. }) => {
            warn!("Calibration file {path} not readable; using unity ECFs");
            Ok(Calibration::new())
        }
        Err(e) => Err(e.into()),
    }
}

/// Write the measured/calculated ratio vs energy, the raw material for
/// an optic transmission table.
fn write_optic_response(spectrum: &Spectrum, path: &Path) -> Result<(), PiquantError> {
    use std::io::Write as _;
    let mut f = File::create(path)?;
    writeln!(f, "// optic response derived by piquant {}", env!("CARGO_PKG_VERSION"))?;
    let n = spectrum.num_channels();
    // Coarse bins smooth out counting noise.
    let step = (n / 64).max(1);
    for start in (0..n).step_by(step) {
        let end = (start + step).min(n);
        let meas: f64 = spectrum.measured()[start..end].iter().sum();
        let calc: f64 = spectrum.calc()[start..end].iter().sum();
        if calc > 0.0 {
            let mid = spectrum.energy_of((start + end) / 2);
            writeln!(f, "{:.1}, {:.6}", mid, meas / calc)?;
        }
    }
    Ok(())
}
