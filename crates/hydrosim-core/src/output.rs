//! Per-step CSV outputs and the end-of-run solution dump.
//!
//! Writers are buffered; nothing touches the disk inside the step pipeline
//! until `flush_step` runs at the step boundary.

use crate::errors::HydroResult;
use crate::hru;
use crate::model::Model;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub struct OutputWriter {
    dir: PathBuf,
    hydrographs: BufWriter<File>,
    storages: BufWriter<File>,
    concentrations: Option<BufWriter<File>>,
    pollutographs: Option<BufWriter<File>>,
    /// Indices of gauged subbasins, fixed at creation.
    gauged: Vec<usize>,
}

impl OutputWriter {
    /// Create the output files under `dir` and write their headers.
    pub fn create(dir: &Path, model: &Model) -> HydroResult<Self> {
        std::fs::create_dir_all(dir)?;
        let gauged: Vec<usize> = model
            .subbasins
            .iter()
            .enumerate()
            .filter(|(_, sb)| sb.gauged)
            .map(|(p, _)| p)
            .collect();

        let mut hydrographs = BufWriter::new(File::create(dir.join("hydrographs.csv"))?);
        write!(hydrographs, "time")?;
        for &p in &gauged {
            write!(hydrographs, ",{} [m3/s]", model.subbasins[p].name)?;
        }
        writeln!(hydrographs)?;

        let mut storages = BufWriter::new(File::create(dir.join("storages.csv"))?);
        write!(storages, "time,hru")?;
        for i in 0..hru::NUM_STORAGES {
            write!(storages, ",{} [mm]", hru::storage_name(i))?;
        }
        writeln!(storages)?;

        let n_c = model.transport.num_constituents();
        let (concentrations, pollutographs) = if n_c > 0 {
            let mut conc = BufWriter::new(File::create(dir.join("concentrations.csv"))?);
            write!(conc, "time")?;
            for &p in &gauged {
                for c in &model.transport.constituents {
                    write!(conc, ",{}:{} [mg/l]", model.subbasins[p].name, c.name)?;
                }
            }
            writeln!(conc)?;

            let mut poll = BufWriter::new(File::create(dir.join("pollutographs.csv"))?);
            write!(poll, "time")?;
            for sb in &model.subbasins {
                for c in &model.transport.constituents {
                    write!(poll, ",{}:{} [mg/d]", sb.name, c.name)?;
                }
            }
            writeln!(poll)?;
            (Some(conc), Some(poll))
        } else {
            (None, None)
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            hydrographs,
            storages,
            concentrations,
            pollutographs,
            gauged,
        })
    }

    /// Append one row per file for the just-completed step and flush.
    pub fn flush_step(&mut self, model: &Model) -> HydroResult<()> {
        let t = model.time_index() as f64 * model.options.timestep;

        write!(self.hydrographs, "{t:.6}")?;
        for &p in &self.gauged {
            write!(self.hydrographs, ",{:.6}", model.subbasins[p].outflow_rate())?;
        }
        writeln!(self.hydrographs)?;

        for hru in &model.hrus {
            write!(self.storages, "{t:.6},{}", hru.id)?;
            for v in &hru.storages {
                write!(self.storages, ",{v:.6}")?;
            }
            writeln!(self.storages)?;
        }

        if let Some(conc) = &mut self.concentrations {
            write!(conc, "{t:.6}")?;
            for &p in &self.gauged {
                let q_out = model.subbasins[p].outflow_rate();
                for c in 0..model.transport.num_constituents() {
                    write!(conc, ",{:.9}", model.transport.outflow_concentration(p, c, q_out))?;
                }
            }
            writeln!(conc)?;
        }

        if let Some(poll) = &mut self.pollutographs {
            write!(poll, "{t:.6}")?;
            for p in 0..model.subbasins.len() {
                for c in 0..model.transport.num_constituents() {
                    write!(poll, ",{:.6}", model.transport.outlet_load(p, c))?;
                }
            }
            writeln!(poll)?;
        }

        self.hydrographs.flush()?;
        self.storages.flush()?;
        if let Some(w) = &mut self.concentrations {
            w.flush()?;
        }
        if let Some(w) = &mut self.pollutographs {
            w.flush()?;
        }
        Ok(())
    }

    /// Serialize the end-of-run state, sufficient to resume.
    pub fn write_solution(&self, model: &Model) -> HydroResult<()> {
        let dump = model.solution_dump();
        let file = File::create(self.dir.join("solution.json"))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &dump)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gauge::Gauge;
    use crate::hru::Hru;
    use crate::model::ModelBuilder;
    use crate::options::Clock;
    use crate::subbasin::SubBasin;
    use crate::timeseries::Timeseries;

    fn tiny_model() -> Model {
        let mut g = Gauge::new("G", 500.0, 47.0, 8.0);
        g.series.precip = Some(Timeseries::constant(2.0, 10.0));
        g.series.temp_daily_min = Some(Timeseries::constant(5.0, 10.0));
        g.series.temp_daily_max = Some(Timeseries::constant(15.0, 10.0));
        ModelBuilder::new()
            .with_clock(Clock::new(0.0, 2000, 3.0, 1.0).unwrap())
            .with_gauge(g)
            .with_subbasin(SubBasin::new(1, "B1", -1, None, 1000.0, 1.0, true))
            .with_hru(Hru::new(1, 10.0, 500.0, 47.0, 1))
            .build()
            .unwrap()
    }

    #[test]
    fn writes_headers_rows_and_solution() {
        let dir = std::env::temp_dir().join(format!("hydrosim-out-{}", std::process::id()));
        let mut model = tiny_model();
        let mut writer = OutputWriter::create(&dir, &model).unwrap();
        while !model.finished() {
            model.step().unwrap();
            writer.flush_step(&model).unwrap();
        }
        writer.write_solution(&model).unwrap();

        let hydro = std::fs::read_to_string(dir.join("hydrographs.csv")).unwrap();
        let lines: Vec<&str> = hydro.trim().lines().collect();
        assert_eq!(lines.len(), 4); // header + 3 steps
        assert!(lines[0].starts_with("time,B1"));

        let storages = std::fs::read_to_string(dir.join("storages.csv")).unwrap();
        assert!(storages.contains("PONDED"));

        let solution = std::fs::read_to_string(dir.join("solution.json")).unwrap();
        assert!(solution.contains("hru_storages"));
        std::fs::remove_dir_all(&dir).ok();
    }
}
