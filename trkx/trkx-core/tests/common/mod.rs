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

//! Shared fixtures: a three-layer barrel and cell-level events written to disk.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use trkx_core::ChainConfig;
use trkx_core::device::StreamMode;
use trkx_core::io::{CsvRecord, event_filename, write_csv, write_detector};
use trkx_kernels::{Cell, CellModule, Detector, PixelData, Surface};

/// Route `log` output through the test harness; repeated calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const RADII: [f32; 3] = [30.0, 70.0, 110.0];
pub const PITCH: f32 = 0.05;

pub fn barrel() -> Detector {
    Detector::new(
        RADII
            .iter()
            .enumerate()
            .map(|(i, &r)| Surface {
                geometry_id: i as u64 + 1,
                radius: r,
                half_length: 500.0,
                thickness_x0: 0.0,
            })
            .collect(),
    )
    .unwrap()
}

/// One module per layer, placed so that a 5 x 2 block of cells starting at
/// channel (0, 0) has its centroid at local (0.3 R, 0.5 R).
pub fn modules() -> Vec<CellModule> {
    RADII
        .iter()
        .enumerate()
        .map(|(i, &r)| CellModule {
            surface_link: i as u64 + 1,
            threshold: 0.0,
            pixel: PixelData {
                min_corner_x: 0.3 * r - 2.5 * PITCH,
                min_corner_y: 0.5 * r - PITCH,
                pitch_x: PITCH,
                pitch_y: PITCH,
            },
        })
        .collect()
}

/// Ten cells per module, one cluster each.
pub fn cells() -> Vec<Cell> {
    let mut cells = Vec::new();
    for module in 0..RADII.len() as u32 {
        for channel0 in 0..5 {
            for channel1 in 0..2 {
                cells.push(Cell {
                    module_link: module,
                    channel0,
                    channel1,
                    time: 0.0,
                    activation: 1.0,
                });
            }
        }
    }
    cells
}

fn write<T: CsvRecord>(dir: &Path, event: usize, records: &[T]) {
    write_csv(&dir.join(event_filename(event, T::SUFFIX)), records).unwrap();
}

/// Write `detector.json` plus the cell files of `events` into `dir`.
/// Events listed in `empty` get modules but no cells.
pub fn write_cell_events(dir: &Path, events: usize, empty: &[usize]) -> PathBuf {
    let detector_path = dir.join("detector.json");
    write_detector(&detector_path, &barrel()).unwrap();
    for event in 0..events {
        write(dir, event, &modules());
        let cells = if empty.contains(&event) { Vec::new() } else { cells() };
        write(dir, event, &cells);
    }
    detector_path
}

pub fn chain_config(input: &Path, detector: PathBuf, events: usize) -> ChainConfig {
    init_logging();
    let mut config = ChainConfig::default();
    config.input.directory = input.to_path_buf();
    config.input.events = events;
    config.detector.detector = detector;
    config.accelerator.stream_mode = StreamMode::Worker;
    config
}
