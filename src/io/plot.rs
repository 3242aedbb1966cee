// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Plot-file output: a CSV with energy, measured, net, background,
//! calculated and residual columns, then one column per plottable
//! component.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use itertools::Itertools;

use crate::spectrum::Spectrum;

use super::SpectrumFileError;

pub fn write_plot_csv(spectrum: &Spectrum, path: &Path) -> Result<(), SpectrumFileError> {
    let display = path.display().to_string();
    let mut f = File::create(path).map_err(|e| SpectrumFileError::Io {
        path: display.clone(),
        source: e,
    })?;
    let io_err = |e| SpectrumFileError::Io {
        path: display.clone(),
        source: e,
    };

    writeln!(
        f,
        "PIQUANT {}, spectrum {}",
        env!("CARGO_PKG_VERSION"),
        spectrum.file_name
    )
    .map_err(io_err)?;

    let components: Vec<usize> = spectrum
        .components()
        .iter()
        .enumerate()
        .filter(|(_, c)| c.plot && !c.spectrum.is_empty())
        .map(|(i, _)| i)
        .collect();
    let component_header = components
        .iter()
        .map(|&i| spectrum.components()[i].label())
        .join(", ");
    write!(f, "energy, meas, net, bkg, calc, resid").map_err(io_err)?;
    if !component_header.is_empty() {
        write!(f, ", {component_header}").map_err(io_err)?;
    }
    writeln!(f).map_err(io_err)?;

    for ch in 0..spectrum.num_channels() {
        write!(
            f,
            "{:.2}, {:.2}, {:.2}, {:.2}, {:.2}, {:.2}",
            spectrum.energy_of(ch),
            spectrum.measured()[ch],
            spectrum.net()[ch],
            spectrum.background()[ch],
            spectrum.calc()[ch],
            spectrum.residual()[ch],
        )
        .map_err(io_err)?;
        for &i in &components {
            let c = &spectrum.components()[i];
            write!(f, ", {:.4}", c.coefficient * c.spectrum[ch]).map_err(io_err)?;
        }
        writeln!(f).map_err(io_err)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::energy_cal::EnergyCal;
    use crate::spectrum::{ComponentKind, SpectrumComponent};

    use super::*;

    #[test]
    fn writes_header_and_rows() {
        let mut s = Spectrum::new(vec![5.0; 4], EnergyCal::new(0.0, 10.0));
        s.file_name = "test.msa".to_string();
        s.add_component(SpectrumComponent::with_spectrum(
            ComponentKind::Continuum,
            vec![1.0; 4],
        ));
        s.update_calc();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plot.csv");
        write_plot_csv(&s, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].contains("test.msa"));
        assert!(lines[1].starts_with("energy, meas, net, bkg, calc, resid"));
        assert!(lines[1].contains("calc bkg"));
        // Header + one row per channel.
        assert_eq!(lines.len(), 2 + 4);
    }
}
