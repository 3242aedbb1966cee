// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The piquant binary: logging setup, banner, dispatch, exit codes.

use clap::Parser;
use log::{error, info};

use piquant::{dispatch, Cli};

fn setup_logging(verbose: usize, terminal_file: Option<&str>) -> Result<(), fern::InitError> {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} {:<5} {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout());
    if let Some(path) = terminal_file {
        // Append so a GUI can collect several runs in one file.
        dispatch = dispatch.chain(fern::log_file(path)?);
    }
    dispatch.apply()?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = setup_logging(cli.verbose, cli.terminal.as_deref()) {
        eprintln!("couldn't set up logging: {e}");
        std::process::exit(-1);
    }
    info!(
        "piquant {} starting at {}",
        env!("CARGO_PKG_VERSION"),
        chrono::Local::now().to_rfc3339()
    );

    match dispatch(&cli) {
        Ok(()) => {}
        Err(e) => {
            error!("{e}");
            std::process::exit(e.exit_code());
        }
    }
}
