//
// Licensed to the Apache Software Foundation (ASF) under one or more
// contributor license agreements.  See the NOTICE file distributed with
// this work for additional information regarding copyright ownership.
// The ASF licenses this file to You under the Apache License, Version 2.0
// (the "License"); you may not use this file except in compliance with
// the License.  You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Event input.
//!
//! An event directory holds `event{:09}-modules.csv` plus either
//! `-measurements.csv` (with optional `-spacepoints.csv`, one row per
//! measurement in the same order) or raw `-cells.csv`, which are clustered.
//! `-particles.csv` and `-truth.csv` are read when both exist.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use trkx_kernels::clusterization::find_clusters;
use trkx_kernels::spacepoint_formation::form_spacepoints;
use trkx_kernels::{Cell, CellModule, DetectorView, Measurement, Parallelism, Spacepoint};

use crate::error::{Result, TrkxError};
use crate::io::truth::{EventTruth, Particle, ParticleRow, TruthLink};
use crate::io::utils::{csv_error, csv_error_at, event_filename, resolve};
use crate::io::write::{CellRow, CsvRecord, MeasurementRow, ModuleRow, SpacepointRow};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    #[default]
    Csv,
}

impl FromStr for DataFormat {
    type Err = TrkxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(DataFormat::Csv),
            other => Err(TrkxError::Config(format!(
                "unsupported input format '{other}' (available: csv)"
            ))),
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("csv")
    }
}

/// Everything the chain consumes for one event.
#[derive(Debug, Clone, Default)]
pub struct EventData {
    pub modules: Vec<CellModule>,
    pub measurements: Vec<Measurement>,
    pub spacepoints: Vec<Spacepoint>,
    pub truth: Option<EventTruth>,
}

impl EventData {
    /// Cluster cells, then place one spacepoint per measurement.
    pub fn from_cells(cells: &[Cell], modules: Vec<CellModule>, detector: &DetectorView) -> Result<Self> {
        let measurements =
            find_clusters(cells, &modules, Parallelism::Sequential).map_err(TrkxError::stage("clusterization"))?;
        let spacepoints =
            form_spacepoints(&measurements, detector).map_err(TrkxError::stage("spacepoint formation"))?;
        Ok(Self {
            modules,
            measurements,
            spacepoints,
            truth: None,
        })
    }
}

/// Source of events for the chain.
pub trait EventSource {
    fn read_event(&self, event: usize, detector: &DetectorView) -> Result<EventData>;

    fn name(&self) -> &'static str;
}

/// Rows of `path` with the line each starts on. The header must equal `header`.
fn read_rows<R: DeserializeOwned>(path: &Path, header: &str) -> Result<Vec<(usize, R)>> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| csv_error(path, None, e))?;
    let headers = reader.headers().map_err(|e| csv_error(path, None, e))?.clone();
    if !headers.iter().eq(header.split(',')) {
        return Err(TrkxError::Parse {
            path: path.to_path_buf(),
            line: 1,
            message: format!(
                "expected header '{header}', found '{}'",
                headers.iter().collect::<Vec<_>>().join(",")
            ),
        });
    }
    let mut rows = Vec::new();
    let mut record = csv::StringRecord::new();
    while reader
        .read_record(&mut record)
        .map_err(|e| csv_error(path, Some(&headers), e))?
    {
        let line = record.position().map_or(0, |p| p.line() as usize);
        let row = record
            .deserialize(Some(&headers))
            .map_err(|e| csv_error_at(path, Some(&headers), Some(line), e))?;
        rows.push((line, row));
    }
    Ok(rows)
}

fn module_of<'m>(modules: &'m [CellModule], path: &Path, line: usize, link: u32) -> Result<&'m CellModule> {
    modules.get(link as usize).ok_or_else(|| TrkxError::Parse {
        path: path.to_path_buf(),
        line,
        message: format!("module link {link} out of range ({} modules)", modules.len()),
    })
}

/// CSV event reader rooted at an input directory.
#[derive(Debug, Clone)]
pub struct CsvEventReader {
    directory: PathBuf,
}

impl CsvEventReader {
    /// `directory` resolves against the data directory when relative.
    pub fn new(directory: impl AsRef<Path>, format: DataFormat) -> Self {
        match format {
            DataFormat::Csv => Self {
                directory: resolve(directory.as_ref()),
            },
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path<T: CsvRecord>(&self, event: usize) -> PathBuf {
        self.directory.join(event_filename(event, T::SUFFIX))
    }

    pub fn read_modules(&self, event: usize) -> Result<Vec<CellModule>> {
        let rows = read_rows::<ModuleRow>(&self.path::<CellModule>(event), CellModule::HEADER)?;
        Ok(rows.into_iter().map(|(_, r)| r.into()).collect())
    }

    pub fn read_cells(&self, event: usize) -> Result<Vec<Cell>> {
        let rows = read_rows::<CellRow>(&self.path::<Cell>(event), Cell::HEADER)?;
        Ok(rows.into_iter().map(|(_, r)| r.into()).collect())
    }

    pub fn read_measurements(&self, event: usize, modules: &[CellModule]) -> Result<Vec<Measurement>> {
        let path = self.path::<Measurement>(event);
        read_rows::<MeasurementRow>(&path, Measurement::HEADER)?
            .into_iter()
            .map(|(line, r)| {
                let module = module_of(modules, &path, line, r.module_link)?;
                Ok(Measurement {
                    surface_link: module.surface_link,
                    module_link: r.module_link,
                    local: [r.local0, r.local1],
                    variance: [r.var0, r.var1],
                })
            })
            .collect()
    }

    pub fn read_spacepoints(&self, event: usize, modules: &[CellModule]) -> Result<Vec<Spacepoint>> {
        let path = self.path::<Spacepoint>(event);
        read_rows::<SpacepointRow>(&path, Spacepoint::HEADER)?
            .into_iter()
            .enumerate()
            .map(|(index, (line, r))| {
                module_of(modules, &path, line, r.module_link)?;
                Ok(Spacepoint {
                    module_link: r.module_link,
                    meas_link: index as u32,
                    global: [r.x, r.y, r.z],
                })
            })
            .collect()
    }

    fn read_truth(&self, event: usize, measurements: &[Measurement]) -> Result<Option<EventTruth>> {
        let particles_path = self.path::<Particle>(event);
        let truth_path = self.path::<TruthLink>(event);
        if !(particles_path.exists() && truth_path.exists()) {
            return Ok(None);
        }
        let particles = read_rows::<ParticleRow>(&particles_path, Particle::HEADER)?
            .into_iter()
            .map(|(_, r)| r.into())
            .collect();
        let links: Vec<TruthLink> = read_rows(&truth_path, TruthLink::HEADER)?
            .into_iter()
            .map(|(_, link)| link)
            .collect();
        Ok(Some(EventTruth::new(particles, measurements, &links)))
    }
}

impl EventSource for CsvEventReader {
    fn read_event(&self, event: usize, detector: &DetectorView) -> Result<EventData> {
        let modules = self.read_modules(event)?;
        for m in &modules {
            detector.surface(m.surface_link)?;
        }
        let mut data = if self.path::<Measurement>(event).exists() {
            let measurements = self.read_measurements(event, &modules)?;
            let spacepoints = if self.path::<Spacepoint>(event).exists() {
                let sps = self.read_spacepoints(event, &modules)?;
                if sps.len() != measurements.len() {
                    return Err(TrkxError::InvalidInput(format!(
                        "event {event}: {} spacepoints for {} measurements",
                        sps.len(),
                        measurements.len()
                    )));
                }
                sps
            } else {
                form_spacepoints(&measurements, detector).map_err(TrkxError::stage("spacepoint formation"))?
            };
            EventData {
                modules,
                measurements,
                spacepoints,
                truth: None,
            }
        } else {
            let cells = self.read_cells(event)?;
            EventData::from_cells(&cells, modules, detector)?
        };
        data.truth = self.read_truth(event, &data.measurements)?;
        log::debug!(
            "event {event}: {} modules, {} measurements, {} spacepoints",
            data.modules.len(),
            data.measurements.len(),
            data.spacepoints.len()
        );
        Ok(data)
    }

    fn name(&self) -> &'static str {
        "csv"
    }
}
