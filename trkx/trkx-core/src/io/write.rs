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

//! Per-event CSV dumps: one file per event, entity and path label, truncated
//! on open, with a fixed header line. Floats are written in their shortest
//! round-trip form.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use trkx_kernels::{
    BoundTrackParameters, Cell, CellModule, FittingResult, Measurement, Seed, Spacepoint,
};

use crate::error::{Result, TrkxError};
use crate::io::utils::{csv_error, event_filename};

/// Entity with a fixed CSV layout.
pub trait CsvRecord {
    const HEADER: &'static str;
    /// File name suffix after `event{:09}`.
    const SUFFIX: &'static str;

    /// Flat row, columns named as in `HEADER`.
    type Row: Serialize + DeserializeOwned;

    fn to_row(&self) -> Self::Row;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellRow {
    pub module_link: u32,
    pub channel0: u32,
    pub channel1: u32,
    pub timestamp: f32,
    pub value: f32,
}

impl CsvRecord for Cell {
    const HEADER: &'static str = "module_link,channel0,channel1,timestamp,value";
    const SUFFIX: &'static str = "-cells.csv";
    type Row = CellRow;

    fn to_row(&self) -> CellRow {
        CellRow {
            module_link: self.module_link,
            channel0: self.channel0,
            channel1: self.channel1,
            timestamp: self.time,
            value: self.activation,
        }
    }
}

impl From<CellRow> for Cell {
    fn from(r: CellRow) -> Self {
        Cell {
            module_link: r.module_link,
            channel0: r.channel0,
            channel1: r.channel1,
            time: r.timestamp,
            activation: r.value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModuleRow {
    pub geometry_id: u64,
    pub threshold: f32,
    pub min_corner_x: f32,
    pub min_corner_y: f32,
    pub pitch_x: f32,
    pub pitch_y: f32,
}

impl CsvRecord for CellModule {
    const HEADER: &'static str = "geometry_id,threshold,min_corner_x,min_corner_y,pitch_x,pitch_y";
    const SUFFIX: &'static str = "-modules.csv";
    type Row = ModuleRow;

    fn to_row(&self) -> ModuleRow {
        let p = &self.pixel;
        ModuleRow {
            geometry_id: self.surface_link,
            threshold: self.threshold,
            min_corner_x: p.min_corner_x,
            min_corner_y: p.min_corner_y,
            pitch_x: p.pitch_x,
            pitch_y: p.pitch_y,
        }
    }
}

impl From<ModuleRow> for CellModule {
    fn from(r: ModuleRow) -> Self {
        CellModule {
            surface_link: r.geometry_id,
            threshold: r.threshold,
            pixel: trkx_kernels::PixelData {
                min_corner_x: r.min_corner_x,
                min_corner_y: r.min_corner_y,
                pitch_x: r.pitch_x,
                pitch_y: r.pitch_y,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRow {
    pub module_link: u32,
    pub local0: f32,
    pub local1: f32,
    pub var0: f32,
    pub var1: f32,
}

impl CsvRecord for Measurement {
    const HEADER: &'static str = "module_link,local0,local1,var0,var1";
    const SUFFIX: &'static str = "-measurements.csv";
    type Row = MeasurementRow;

    fn to_row(&self) -> MeasurementRow {
        MeasurementRow {
            module_link: self.module_link,
            local0: self.local[0],
            local1: self.local[1],
            var0: self.variance[0],
            var1: self.variance[1],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpacepointRow {
    pub module_link: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: f32,
}

impl CsvRecord for Spacepoint {
    const HEADER: &'static str = "module_link,x,y,z,r";
    const SUFFIX: &'static str = "-spacepoints.csv";
    type Row = SpacepointRow;

    fn to_row(&self) -> SpacepointRow {
        SpacepointRow {
            module_link: self.module_link,
            x: self.x(),
            y: self.y(),
            z: self.z(),
            r: self.radius(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeedRow {
    #[serde(rename = "spB_link")]
    pub spb_link: u32,
    #[serde(rename = "spM_link")]
    pub spm_link: u32,
    #[serde(rename = "spT_link")]
    pub spt_link: u32,
    pub weight: f32,
    pub z_vertex: f32,
}

impl CsvRecord for Seed {
    const HEADER: &'static str = "spB_link,spM_link,spT_link,weight,z_vertex";
    const SUFFIX: &'static str = "-seeds.csv";
    type Row = SeedRow;

    fn to_row(&self) -> SeedRow {
        SeedRow {
            spb_link: self.spb_link,
            spm_link: self.spm_link,
            spt_link: self.spt_link,
            weight: self.weight,
            z_vertex: self.z_vertex,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamsRow {
    pub surface_index: u64,
    pub loc0: f32,
    pub loc1: f32,
    pub phi: f32,
    pub theta: f32,
    pub qoverp: f32,
    pub time: f32,
}

impl CsvRecord for BoundTrackParameters {
    const HEADER: &'static str = "surface_index,loc0,loc1,phi,theta,qoverp,time";
    const SUFFIX: &'static str = "-params.csv";
    type Row = ParamsRow;

    fn to_row(&self) -> ParamsRow {
        ParamsRow {
            surface_index: self.surface_link,
            loc0: self.loc[0],
            loc1: self.loc[1],
            phi: self.phi,
            theta: self.theta,
            qoverp: self.qop,
            time: self.time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FittedRow {
    pub surface_index: u64,
    pub loc0: f32,
    pub loc1: f32,
    pub phi: f32,
    pub theta: f32,
    pub qoverp: f32,
    pub time: f32,
    pub ndf: f32,
    pub chi2: f32,
}

impl CsvRecord for FittingResult {
    const HEADER: &'static str = "surface_index,loc0,loc1,phi,theta,qoverp,time,ndf,chi2";
    const SUFFIX: &'static str = "-fitted.csv";
    type Row = FittedRow;

    fn to_row(&self) -> FittedRow {
        let p = &self.fit_params;
        FittedRow {
            surface_index: p.surface_link,
            loc0: p.loc[0],
            loc1: p.loc[1],
            phi: p.phi,
            theta: p.theta,
            qoverp: p.qop,
            time: p.time,
            ndf: self.ndf,
            chi2: self.chi2,
        }
    }
}

/// CSV writer on a freshly truncated `path` with `header` already written,
/// so files without rows still carry their header.
pub fn csv_writer(path: &Path, header: &str) -> Result<csv::Writer<File>> {
    let mut out = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|e| csv_error(path, None, e))?;
    out.write_record(header.split(','))
        .map_err(|e| csv_error(path, None, e))?;
    Ok(out)
}

/// Write `records` with their header to `path`, replacing any previous file.
pub fn write_csv<T: CsvRecord>(path: &Path, records: &[T]) -> Result<()> {
    let mut out = csv_writer(path, T::HEADER)?;
    for r in records {
        out.serialize(r.to_row()).map_err(|e| csv_error(path, None, e))?;
    }
    out.flush().map_err(|e| TrkxError::io(path, e))
}

/// Dump writer rooted at an output directory; each path label gets a subdirectory.
#[derive(Debug, Clone)]
pub struct EventWriter {
    directory: PathBuf,
}

impl EventWriter {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn path_for<T: CsvRecord>(&self, event: usize, label: &str) -> PathBuf {
        self.directory
            .join(label)
            .join(event_filename(event, T::SUFFIX))
    }

    /// Write one entity of one event; returns the file written.
    pub fn write<T: CsvRecord>(&self, event: usize, label: &str, records: &[T]) -> Result<PathBuf> {
        let dir = self.directory.join(label);
        fs::create_dir_all(&dir).map_err(|e| TrkxError::io(&dir, e))?;
        let path = self.path_for::<T>(event, label);
        write_csv(&path, records)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let writer = EventWriter::new(dir.path());
        let seeds = [Seed {
            spb_link: 0,
            spm_link: 1,
            spt_link: 2,
            weight: -0.5,
            z_vertex: 1.25,
        }];
        let path = writer.write(3, "device", &seeds).unwrap();
        assert!(path.ends_with("device/event000000003-seeds.csv"));
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(text, "spB_link,spM_link,spT_link,weight,z_vertex\n0,1,2,-0.5,1.25\n");
    }

    #[test]
    fn empty_collections_keep_the_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = EventWriter::new(dir.path())
            .write::<FittingResult>(0, "cpu", &[])
            .unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), format!("{}\n", FittingResult::HEADER));
    }

    #[test]
    fn fitted_rows_carry_ndf_and_chi2() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fitted.csv");
        let fitted = FittingResult {
            fit_params: BoundTrackParameters {
                surface_link: 4,
                loc: [1.5, -2.0],
                phi: 0.25,
                theta: 1.5,
                qop: -0.125,
                time: 0.0,
            },
            ndf: 2.0,
            chi2: 0.75,
        };
        write_csv(&path, &[fitted]).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert_eq!(
            text.lines().nth(1),
            Some("4,1.5,-2.0,0.25,1.5,-0.125,0.0,2.0,0.75")
        );
    }

    #[test]
    fn unwritable_directory_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "file, not a directory").unwrap();
        let writer = EventWriter::new(&blocker);
        let err = writer.write::<Seed>(0, "cpu", &[]).unwrap_err();
        assert!(matches!(err, TrkxError::Io { .. }));
    }
}
