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

//! Chain configuration: per-stage configs plus input, detector, output and
//! accelerator settings. Defaults, then an optional JSON file, then env, then
//! command-line flags; `validate` runs once before the event loop.
//!
//! **Env:** `TRKX_NAV_BUFFER_SCALER` (1..=64), `TRKX_DEVICE_MEMORY_MB`,
//! `TRKX_STREAM_MODE` (worker/inline), `TRKX_STREAM_QUEUE_CAPACITY` (1..=1024).
//! Unparsable values are ignored with a warning.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use trkx_kernels::{ConstantField, FindingConfig, FittingConfig, SeedfilterConfig, SeedfinderConfig};

use crate::device::StreamMode;
use crate::error::{Result, TrkxError};
use crate::io::DataFormat;

pub const ENV_NAV_BUFFER_SCALER: &str = "TRKX_NAV_BUFFER_SCALER";
pub const ENV_DEVICE_MEMORY_MB: &str = "TRKX_DEVICE_MEMORY_MB";
pub const ENV_STREAM_MODE: &str = "TRKX_STREAM_MODE";
pub const ENV_STREAM_QUEUE_CAPACITY: &str = "TRKX_STREAM_QUEUE_CAPACITY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Relative paths resolve against the data directory.
    pub directory: PathBuf,
    pub format: DataFormat,
    pub skip: usize,
    pub events: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("tml_pixels"),
            format: DataFormat::Csv,
            skip: 0,
            events: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorFiles {
    pub detector: PathBuf,
    pub material: Option<PathBuf>,
    pub grid: Option<PathBuf>,
}

impl Default for DetectorFiles {
    fn default() -> Self {
        Self {
            detector: PathBuf::from("geometry/detector.json"),
            material: None,
            grid: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Per-event dumps and the run summary go here when set.
    pub directory: Option<PathBuf>,
    /// Per-event candidate match lines are appended here when set.
    pub match_log: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcceleratorConfig {
    /// Mirror every stage on the CPU and compare the outputs.
    pub compare_with_cpu: bool,
    pub stream_mode: StreamMode,
    pub queue_capacity: usize,
    /// Device memory limit; unbounded when unset.
    pub device_memory_mb: Option<usize>,
    /// Synchronise after every device stage so its timer measures execution.
    pub profile_stages: bool,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            compare_with_cpu: true,
            stream_mode: StreamMode::Worker,
            queue_capacity: 16,
            device_memory_mb: None,
            profile_stages: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub seedfinder: SeedfinderConfig,
    pub seedfilter: SeedfilterConfig,
    pub finding: FindingConfig,
    pub fitting: FittingConfig,
    /// Solenoid field along z, T.
    pub bz: f32,
    pub input: InputConfig,
    pub detector: DetectorFiles,
    pub output: OutputConfig,
    pub check_performance: bool,
    pub accelerator: AcceleratorConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        let seedfinder = SeedfinderConfig::default();
        Self {
            bz: seedfinder.b_field_in_z,
            seedfinder,
            seedfilter: SeedfilterConfig::default(),
            finding: FindingConfig::default(),
            fitting: FittingConfig::default(),
            input: InputConfig::default(),
            detector: DetectorFiles::default(),
            output: OutputConfig::default(),
            check_performance: false,
            accelerator: AcceleratorConfig::default(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring {name}={raw}: not a valid value");
            None
        }
    }
}

impl ChainConfig {
    /// Defaults with env overrides applied.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(mut self) -> Self {
        if let Some(scaler) = env_parsed(ENV_NAV_BUFFER_SCALER) {
            self.finding.navigation_buffer_size_scaler = scaler;
        }
        if let Some(mb) = env_parsed(ENV_DEVICE_MEMORY_MB) {
            self.accelerator.device_memory_mb = Some(mb);
        }
        if let Some(mode) = env_parsed::<StreamMode>(ENV_STREAM_MODE) {
            self.accelerator.stream_mode = mode;
        }
        if let Some(capacity) = env_parsed(ENV_STREAM_QUEUE_CAPACITY) {
            self.accelerator.queue_capacity = capacity;
        }
        self
    }

    /// Load a JSON config; missing keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| TrkxError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| TrkxError::Parse {
            path: path.to_path_buf(),
            line: e.line(),
            message: e.to_string(),
        })
    }

    /// Set the field for the chain and the seed finder together.
    pub fn with_field(mut self, bz: f32) -> Self {
        self.bz = bz;
        self.seedfinder.b_field_in_z = bz;
        self
    }

    pub fn field(&self) -> ConstantField {
        ConstantField::along_z(self.bz)
    }

    pub fn device_memory_bytes(&self) -> Option<usize> {
        self.accelerator
            .device_memory_mb
            .map(|mb| mb.saturating_mul(1024 * 1024))
    }

    pub fn validate(&self) -> Result<()> {
        let scaler = self.finding.navigation_buffer_size_scaler;
        if !(1..=64).contains(&scaler) {
            return Err(TrkxError::Config(format!(
                "navigation_buffer_size_scaler must be 1..=64, got {scaler}"
            )));
        }
        let (min_cand, max_cand) = (
            self.finding.min_track_candidates_per_track,
            self.finding.max_track_candidates_per_track,
        );
        if min_cand == 0 || min_cand > max_cand {
            return Err(TrkxError::Config(format!(
                "track candidate length bounds must satisfy 1 <= min <= max, got {min_cand}..{max_cand}"
            )));
        }
        if self.finding.chi2_max <= 0.0 {
            return Err(TrkxError::Config(format!(
                "chi2_max must be positive, got {}",
                self.finding.chi2_max
            )));
        }
        if self.seedfilter.max_seeds_per_middle == 0 {
            return Err(TrkxError::Config("max_seeds_per_middle must be positive".into()));
        }
        let sf = &self.seedfinder;
        // a zero minimum pairs spacepoints at equal radius: cot(theta) = dz / 0
        if !(0.0 < sf.delta_r_min && sf.delta_r_min < sf.delta_r_max) {
            return Err(TrkxError::Config(format!(
                "seed finder radial window must satisfy 0 < min < max, got {}..{}",
                sf.delta_r_min, sf.delta_r_max
            )));
        }
        if sf.collision_region_min >= sf.collision_region_max {
            return Err(TrkxError::Config(format!(
                "collision region {}..{} is empty",
                sf.collision_region_min, sf.collision_region_max
            )));
        }
        if !self.bz.is_finite() || (self.bz - sf.b_field_in_z).abs() > 1e-6 {
            return Err(TrkxError::Config(format!(
                "seed finder field {} T does not match chain field {} T",
                sf.b_field_in_z, self.bz
            )));
        }
        let capacity = self.accelerator.queue_capacity;
        if !(1..=1024).contains(&capacity) {
            return Err(TrkxError::Config(format!(
                "stream queue capacity must be 1..=1024, got {capacity}"
            )));
        }
        if self.accelerator.device_memory_mb == Some(0) {
            return Err(TrkxError::Config("device memory limit must be positive".into()));
        }
        Ok(())
    }
}
