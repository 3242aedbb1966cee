// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
Command-line interface: one args struct per sub-command, a shared option
block, and the dispatch functions that wire the library together.
 */

mod run;

use clap::{AppSettings, Parser, Subcommand};

pub use run::dispatch;

#[derive(Parser, Debug)]
#[clap(
    name = "piquant",
    about = "Quantitative X-ray fluorescence analysis for the PIXL instrument",
    version,
    global_setting(AppSettings::DeriveDisplayOrder)
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Command,

    /// Append terminal output to this file as well as the console.
    #[clap(long, global = true)]
    pub terminal: Option<String>,

    /// More verbose logging (repeat for trace).
    #[clap(long, global = true, parse(from_occurrences))]
    pub verbose: usize,
}

/// Options shared by the analysis sub-commands.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct CommonOpts {
    /// Energy calibration override: eV start, eV per channel [, quad].
    #[clap(short = 'e', long = "energy", use_value_delimiter = true)]
    pub energy: Vec<f64>,

    /// SNIP background parameters: fwhm, iterations [, start, end
    /// channels]. A leading 0 disables the strip.
    #[clap(short = 'b', long = "bkg", use_value_delimiter = true, allow_hyphen_values = true)]
    pub bkg: Vec<f64>,

    /// High-energy-zone SNIP parameters.
    #[clap(long = "bh", use_value_delimiter = true)]
    pub bkg_high: Vec<f64>,

    /// Two-zone crossover: first channel, last channel, zone fwhm.
    #[clap(long = "bx", use_value_delimiter = true)]
    pub bkg_crossover: Vec<f64>,

    /// Detector shelf override: factor, slope, slope start.
    #[clap(short = 'T', long = "shelf", use_value_delimiter = true, allow_hyphen_values = true)]
    pub shelf: Vec<f64>,

    /// Use only this detector (0-based) instead of summing them.
    #[clap(short = 'd', long)]
    pub detector: Option<usize>,

    /// Stop a map after this many spectra.
    #[clap(short = 'm', long)]
    pub max_spectra: Option<usize>,

    /// Map output column selector characters.
    #[clap(short = 'q', long)]
    pub outputs: Option<String>,

    /// Disable the energy-calibration adjustment during fits.
    #[clap(short = 'f', long)]
    pub no_energy_adjust: bool,

    /// Disable the peak-width adjustment during fits.
    #[clap(short = 'g', long)]
    pub no_width_adjust: bool,

    /// Convolve Compton components with the detector resolution (slow).
    #[clap(short = 'v', long)]
    pub convolve_compton: bool,

    /// Treat default stoichiometry as carbonates instead of oxides.
    #[clap(short = 'c', long)]
    pub carbonates: bool,

    /// Worker threads for the map sub-command.
    #[clap(short = 't', long, default_value = "1")]
    pub threads: usize,

    /// Restrict calibrate to one standard, by index or name.
    #[clap(short = 's', long)]
    pub standard: Option<String>,

    /// Smallest standard weight admitted to the ECF means.
    #[clap(short = 'w', long)]
    pub min_weight: Option<f64>,

    /// External tube spectrum file.
    #[clap(short = 'u', long)]
    pub tube_file: Option<String>,

    /// Normalize compositions to this total percent.
    #[clap(short = 'n', long)]
    pub normalize: Option<f64>,

    /// Default iron oxide ratio override (e.g. 1.5 for Fe2O3).
    #[clap(long = "Fe")]
    pub fe_ratio: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Determine the energy calibration from a two-peak spectrum.
    EnergyCalibrate {
        spectrum: String,
        element_list: String,
        #[clap(flatten)]
        opts: CommonOpts,
    },

    /// Write a spectrum (with SNIP background) to a plot file.
    Plot {
        spectrum: String,
        plot_file: String,
        #[clap(flatten)]
        opts: CommonOpts,
    },

    /// Write the primary excitation spectrum for a configuration.
    PrimarySpectrum {
        config: String,
        plot_file: String,
        #[clap(flatten)]
        opts: CommonOpts,
    },

    /// Calculate the spectrum of a standard composition.
    Calculate {
        config: String,
        standards: String,
        plot_file: String,
        #[clap(flatten)]
        opts: CommonOpts,
    },

    /// Compare a measured spectrum against a standard's calculation.
    Compare {
        config: String,
        standards: String,
        spectrum: String,
        plot_file: String,
        #[clap(flatten)]
        opts: CommonOpts,
    },

    /// Derive an optic response from a standard's spectrum.
    Optic {
        config: String,
        standards: String,
        spectrum: String,
        element_list: String,
        plot_file: String,
        #[clap(flatten)]
        opts: CommonOpts,
    },

    /// Fit all standards and write element calibration factors.
    Calibrate {
        config: String,
        standards: String,
        calibration: String,
        element_list: String,
        #[clap(flatten)]
        opts: CommonOpts,
    },

    /// Quantify an unknown spectrum with a calibration.
    Quantify {
        config: String,
        calibration: String,
        spectrum: String,
        element_list: String,
        plot_file: Option<String>,
        #[clap(flatten)]
        opts: CommonOpts,
    },

    /// Quantify every standard against the other standards.
    Evaluate {
        config: String,
        standards: String,
        calibration: String,
        element_list: String,
        map_file: String,
        #[clap(flatten)]
        opts: CommonOpts,
    },

    /// Quantify a list of spectra into a map CSV.
    Map {
        config: String,
        calibration: String,
        spectrum_list: String,
        element_list: String,
        map_file: String,
        #[clap(flatten)]
        opts: CommonOpts,
    },

    /// Bulk-sum a list of spectra into one spectrum file.
    Sum {
        config: String,
        calibration: String,
        spectrum_list: String,
        element_list: String,
        plot_file: String,
        #[clap(flatten)]
        opts: CommonOpts,
    },

    /// Convert SDD test histograms to EDR format.
    Ems { sdd_csv: String, edr_csv: String },

    /// Print the version string.
    Version,
}
