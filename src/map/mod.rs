// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

/*!
The map orchestrator: quantify a stream of per-pixel spectra with a
bounded pool of workers and write one CSV row per input file, in input
order regardless of completion order.

Jobs flow through a bounded channel to the workers; finished rows come
back on a second channel tagged with a dense index, and the writer holds
early arrivals until their turn. Per-spectrum failures go to the
`_log.txt` sidecar and the map carries on; only configuration problems
abort a run.
 */

mod csv;

pub use csv::{map_header, map_row, DEFAULT_SELECTOR};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded};
use crossbeam_utils::atomic::AtomicCell;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info};
use scopeguard::defer_on_unwind;
use thiserror::Error;

use crate::conditions::{assemble, ConditionsInput};
use crate::elements::ElementListEntry;
use crate::energy_cal::EnergyCal;
use crate::io::read_spectrum_file;
use crate::quant::{quantify_unknown, AnalysisContext, Calibration};
use crate::utils::combine_detectors;

#[derive(Error, Debug)]
pub enum MapError {
    #[error("Couldn't write map output {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("No spectrum files to map")]
    NoJobs,
}

/// One input of the map: a spectrum file and its sequence number.
#[derive(Debug, Clone)]
pub struct MapJob {
    pub spectrum_file: PathBuf,
    pub sequence_number: usize,
}

/// Everything a worker needs, shared read-only across the pool.
pub struct MapParams<'a> {
    pub conditions_input: &'a ConditionsInput,
    pub element_list: &'a [ElementListEntry],
    pub calibration: &'a Calibration,
    pub context: AnalysisContext,
    pub selector: &'a str,
    pub detector_select: Option<usize>,
    /// Energy calibration override from `-e`.
    pub energy_override: Option<EnergyCal>,
    /// SNIP parameter vectors from `-b`/`-bh`/`-bx`.
    pub bkg_params: Vec<f64>,
    pub bh_params: Vec<f64>,
    pub bx_params: Vec<f64>,
    pub adjust_energy: bool,
    pub adjust_width: bool,
    pub convolve_compton: bool,
    pub threads: usize,
    pub max_spectra: Option<usize>,
}

#[derive(Debug)]
struct JobOutcome {
    index: usize,
    spectrum_file: String,
    row: Option<String>,
    log: String,
    error: bool,
    elapsed_s: f64,
}

#[derive(Debug)]
pub struct MapSummary {
    pub rows_written: usize,
    pub failures: usize,
}

/// Process one job start to finish: read, combine detectors, set up, and
/// quantify. All failures are reported through the returned outcome.
fn process_job(job: &MapJob, params: &MapParams) -> JobOutcome {
    let started = Instant::now();
    let display = job.spectrum_file.display().to_string();
    let mut log = String::new();
    let mut fail = |log: String| JobOutcome {
        index: job.sequence_number,
        spectrum_file: display.clone(),
        row: None,
        log,
        error: true,
        elapsed_s: started.elapsed().as_secs_f64(),
    };

    let contents = match read_spectrum_file(&job.spectrum_file) {
        Ok(c) => c,
        Err(e) => {
            log.push_str(&format!("read failed: {e}\n"));
            return fail(log);
        }
    };

    // Per-file conditions override the configuration where present.
    let mut cond_input = params.conditions_input.clone();
    for key in <crate::conditions::ConditionKey as strum::IntoEnumIterator>::iter() {
        let v = contents.conditions.get(key);
        if v != 0.0 {
            cond_input.set(key, v);
        }
    }
    let conditions = match assemble(&cond_input) {
        Ok(c) => c,
        Err(e) => {
            log.push_str(&format!("conditions assembly failed: {e}\n"));
            return fail(log);
        }
    };

    let mut spectrum = match combine_detectors(contents.spectra, params.detector_select) {
        Ok(s) => s,
        Err(e) => {
            log.push_str(&format!("detector combination failed: {e}\n"));
            return fail(log);
        }
    };
    spectrum.seq_number = job.sequence_number;
    spectrum.file_name = display.clone();
    if let Some(cal) = params.energy_override {
        spectrum.set_calibration(cal);
    }
    spectrum.bkg_params = params.bkg_params.clone();
    spectrum.bh_params = params.bh_params.clone();
    spectrum.bx_params = params.bx_params.clone();
    spectrum.adjust_energy = params.adjust_energy;
    spectrum.adjust_width = params.adjust_width;
    spectrum.convolve_compton = params.convolve_compton;

    if !spectrum.calibration().good() {
        log.push_str("bad energy calibration, can't quantify spectrum\n");
        return fail(log);
    }
    if spectrum.live_time() <= 0.0 {
        log.push_str("live time is bad, can't quantify spectrum\n");
        return fail(log);
    }

    let mut element_list = params.element_list.to_vec();
    match quantify_unknown(
        &mut element_list,
        &conditions,
        &mut spectrum,
        params.calibration,
        params.context,
    ) {
        Ok(result) => {
            let element_sum: f64 = element_list.iter().filter_map(|e| e.percent).sum();
            if !result.converged {
                log.push_str(&format!(
                    "composition did not converge in {} iterations\n",
                    result.iterations
                ));
            }
            let row = map_row(
                params.selector,
                &element_list,
                &spectrum,
                &conditions.detector,
                element_sum,
            );
            // Coefficients are recorded; the scratch spectra can go.
            spectrum.clean();
            JobOutcome {
                index: job.sequence_number,
                spectrum_file: display,
                row: Some(row),
                log,
                error: false,
                elapsed_s: started.elapsed().as_secs_f64(),
            }
        }
        Err(e) => {
            log.push_str(&format!("quantification failed: {e}\n"));
            fail(log)
        }
    }
}

/// Run the whole map: produce jobs in input order, quantify them on
/// `threads` workers, and write rows strictly in input order.
pub fn run_map(
    jobs: Vec<MapJob>,
    params: &MapParams,
    map_file: &Path,
) -> Result<MapSummary, MapError> {
    if jobs.is_empty() {
        return Err(MapError::NoJobs);
    }
    let total = match params.max_spectra {
        Some(max) => jobs.len().min(max),
        None => jobs.len(),
    };
    let threads = params.threads.max(1);
    info!("Mapping {total} spectra on {threads} worker threads");

    let display = map_file.display().to_string();
    let mut out = File::create(map_file).map_err(|e| MapError::Io {
        path: display.clone(),
        source: e,
    })?;
    let log_path = format!("{display}_log.txt");
    let mut log_out = File::create(&log_path).map_err(|e| MapError::Io {
        path: log_path.clone(),
        source: e,
    })?;
    let io_err = |path: &str, e: std::io::Error| MapError::Io {
        path: path.to_string(),
        source: e,
    };

    writeln!(out, "{}", map_header(params.selector, params.element_list))
        .map_err(|e| io_err(&display, e))?;

    let progress = ProgressBar::with_draw_target(Some(total as u64), ProgressDrawTarget::stderr())
        .with_style(
            ProgressStyle::default_bar()
                .template("{msg:12}: [{wide_bar}] {pos}/{len} spectra ({elapsed_precise}<{eta_precise})")
                .unwrap()
                .progress_chars("=> "),
        )
        .with_message("Mapping");

    let (job_tx, job_rx) = bounded::<(usize, MapJob)>(2 * threads);
    let (result_tx, result_rx) = unbounded::<JobOutcome>();
    let panicked = AtomicCell::new(false);

    let mut rows_written = 0;
    let mut failures = 0;

    thread::scope(|scope| -> Result<(), MapError> {
        // Workers.
        for _ in 0..threads {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            let panicked = &panicked;
            scope.spawn(move || {
                defer_on_unwind! { panicked.store(true); }
                for (index, job) in job_rx.iter() {
                    debug!("Worker picked up {}", job.spectrum_file.display());
                    let mut outcome = process_job(&job, params);
                    outcome.index = index;
                    if result_tx.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        // Producer: feed jobs in input order, then signal no more by
        // closing the channel.
        let producer = scope.spawn(move || {
            for (index, job) in jobs.into_iter().take(total).enumerate() {
                if job_tx.send((index, job)).is_err() {
                    break;
                }
            }
            drop(job_tx);
        });

        // Writer: reorder by dense index so the output matches the input
        // file order no matter which worker finishes first.
        let mut pending: BTreeMap<usize, JobOutcome> = BTreeMap::new();
        let mut next_index = 0;
        for outcome in result_rx.iter() {
            pending.insert(outcome.index, outcome);
            while let Some(ready) = pending.remove(&next_index) {
                writeln!(
                    log_out,
                    "=================================================================\n\
                     = {} error={} runtime: {:.3}s\n\
                     =================================================================\n\
                     {}",
                    ready.spectrum_file, ready.error, ready.elapsed_s, ready.log
                )
                .map_err(|e| io_err(&log_path, e))?;
                if let Some(row) = ready.row {
                    writeln!(out, "{row}").map_err(|e| io_err(&display, e))?;
                    rows_written += 1;
                } else {
                    failures += 1;
                }
                next_index += 1;
                progress.inc(1);
            }
        }
        producer.join().expect("producer thread never panics");
        Ok(())
    })?;

    progress.abandon_with_message("Map finished");
    if panicked.load() {
        info!("A worker thread panicked; map output may be incomplete");
    }
    info!("Map written to {display} ({rows_written} rows, {failures} failures)");
    Ok(MapSummary {
        rows_written,
        failures,
    })
}

#[cfg(test)]
mod tests;
