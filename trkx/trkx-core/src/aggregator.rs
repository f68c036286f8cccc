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

//! Run-level statistics, timing and performance reporting.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::comparator::MatchReport;
use crate::error::{Result, TrkxError};
use crate::io::csv_writer;
use crate::io::utils::csv_error;
use crate::profiling::TimingInfo;
use crate::writers::{EventOutputs, PerformanceWriter};

pub const SUMMARY_FILE: &str = "run_summary.json";
pub const TIMING_FILE: &str = "timing.csv";

/// Output counts of one path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PathCounters {
    pub measurements: u64,
    pub seeds: u64,
    pub params: u64,
    pub found_tracks: u64,
    pub fitted_tracks: u64,
}

impl PathCounters {
    pub fn add(&mut self, other: &PathCounters) {
        self.measurements += other.measurements;
        self.seeds += other.seeds;
        self.params += other.params;
        self.found_tracks += other.found_tracks;
        self.fitted_tracks += other.fitted_tracks;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub n_events: u64,
    pub n_modules: u64,
    pub n_spacepoints: u64,
    pub cpu: PathCounters,
    pub device: PathCounters,
    /// Events on which the two paths were compared.
    pub n_comparisons: u64,
}

/// Match tallies of one comparison at one uncertainty, summed over events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MatchTotals {
    pub uncertainty: f32,
    pub matched: u64,
    pub cpu: u64,
    pub device: u64,
}

impl MatchTotals {
    pub fn rate(&self) -> f64 {
        match (self.cpu, self.device) {
            (0, 0) => 1.0,
            (0, _) => 0.0,
            (cpu, _) => self.matched as f64 / cpu as f64,
        }
    }
}

/// Appends `rate cpu_size device_size` per event.
#[derive(Debug, Clone)]
pub struct MatchLog {
    path: PathBuf,
}

impl MatchLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, rate: f32, cpu_size: usize, device_size: usize) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TrkxError::io(&self.path, e))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{rate} {cpu_size} {device_size}")
            .and_then(|_| out.flush())
            .map_err(|e| TrkxError::io(&self.path, e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReporterState {
    Idle,
    Initialized,
    Finalized,
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub statistics: RunStatistics,
    /// Milliseconds per timer label.
    pub timing_ms: Vec<(String, f64)>,
    pub comparisons: BTreeMap<String, Vec<MatchTotals>>,
    pub performance: Vec<String>,
}

/// Collects statistics over a run and writes the summary once at the end.
pub struct Reporter {
    state: ReporterState,
    statistics: RunStatistics,
    timing: TimingInfo,
    comparisons: BTreeMap<String, Vec<MatchTotals>>,
    writers: Vec<Box<dyn PerformanceWriter>>,
    performance: bool,
    match_log: Option<MatchLog>,
    output_dir: Option<PathBuf>,
}

impl Reporter {
    pub fn new(performance: bool) -> Self {
        Self {
            state: ReporterState::Idle,
            statistics: RunStatistics::default(),
            timing: TimingInfo::new(),
            comparisons: BTreeMap::new(),
            writers: Vec::new(),
            performance,
            match_log: None,
            output_dir: None,
        }
    }

    pub fn with_writer(mut self, writer: Box<dyn PerformanceWriter>) -> Self {
        self.writers.push(writer);
        self
    }

    pub fn with_match_log(mut self, log: MatchLog) -> Self {
        self.match_log = Some(log);
        self
    }

    /// Directory receiving `run_summary.json` and `timing.csv` at finalize.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn performance_enabled(&self) -> bool {
        self.performance
    }

    pub fn statistics(&self) -> &RunStatistics {
        &self.statistics
    }

    pub fn timing(&self) -> &TimingInfo {
        &self.timing
    }

    pub fn timing_mut(&mut self) -> &mut TimingInfo {
        &mut self.timing
    }

    pub fn comparisons(&self) -> &BTreeMap<String, Vec<MatchTotals>> {
        &self.comparisons
    }

    fn expect_state(&self, expected: ReporterState, action: &str) -> Result<()> {
        if self.state != expected {
            return Err(TrkxError::State(format!(
                "reporter cannot {action} while {:?}",
                self.state
            )));
        }
        Ok(())
    }

    pub fn initialize(&mut self) -> Result<()> {
        self.expect_state(ReporterState::Idle, "initialize")?;
        if self.performance {
            for w in &mut self.writers {
                w.initialize()?;
            }
        }
        self.state = ReporterState::Initialized;
        Ok(())
    }

    pub fn record_event(&mut self, n_modules: usize, n_spacepoints: usize) -> Result<()> {
        self.expect_state(ReporterState::Initialized, "record an event")?;
        let s = &mut self.statistics;
        s.n_events += 1;
        s.n_modules += n_modules as u64;
        s.n_spacepoints += n_spacepoints as u64;
        Ok(())
    }

    pub fn record_outputs(&mut self, cpu: &PathCounters, device: &PathCounters) -> Result<()> {
        self.expect_state(ReporterState::Initialized, "record outputs")?;
        self.statistics.cpu.add(cpu);
        self.statistics.device.add(device);
        Ok(())
    }

    /// Fold the reports of one collection comparison into the run totals.
    pub fn record_comparison(
        &mut self,
        name: &str,
        reports: &[MatchReport],
        n_cpu: usize,
        n_device: usize,
    ) -> Result<()> {
        self.expect_state(ReporterState::Initialized, "record a comparison")?;
        let totals = self.comparisons.entry(name.to_string()).or_default();
        for (i, r) in reports.iter().enumerate() {
            if totals.len() <= i {
                totals.push(MatchTotals {
                    uncertainty: r.uncertainty,
                    ..Default::default()
                });
            }
            let t = &mut totals[i];
            t.matched += r.matched as u64;
            t.cpu += n_cpu as u64;
            t.device += n_device as u64;
        }
        Ok(())
    }

    /// Count a compared event and append its candidate match line.
    pub fn record_candidate_match(&mut self, report: &MatchReport, n_cpu: usize, n_device: usize) -> Result<()> {
        self.expect_state(ReporterState::Initialized, "record a candidate match")?;
        self.statistics.n_comparisons += 1;
        if let Some(match_log) = &self.match_log
            && let Err(e) = match_log.append(report.rate, n_cpu, n_device)
        {
            log::error!("match log not written: {e}");
        }
        Ok(())
    }

    pub fn write_performance(&mut self, outputs: &EventOutputs<'_>) -> Result<()> {
        self.expect_state(ReporterState::Initialized, "write performance")?;
        if !self.performance {
            return Ok(());
        }
        for w in &mut self.writers {
            w.write(outputs)?;
        }
        Ok(())
    }

    /// Close the writers and write the summary files. Output failures at this
    /// point are logged; the counts of a completed run are still returned.
    pub fn finalize(&mut self) -> Result<RunSummary> {
        self.expect_state(ReporterState::Initialized, "finalize")?;
        if self.performance {
            for w in &mut self.writers {
                if let Err(e) = w.finalize() {
                    log::warn!("{} performance output incomplete: {e}", w.name());
                }
            }
        }
        let summary = self.summary();
        if let Some(dir) = &self.output_dir
            && let Err(e) = write_summary(dir, &summary, &self.timing)
        {
            log::warn!("run summary not written: {e}");
        }
        self.state = ReporterState::Finalized;
        Ok(summary)
    }

    fn summary(&self) -> RunSummary {
        RunSummary {
            statistics: self.statistics.clone(),
            timing_ms: self
                .timing
                .iter()
                .map(|(l, d)| (l.to_string(), d.as_secs_f64() * 1e3))
                .collect(),
            comparisons: self.comparisons.clone(),
            performance: if self.performance {
                self.writers.iter().map(|w| w.report()).collect()
            } else {
                Vec::new()
            },
        }
    }
}

fn write_summary(dir: &Path, summary: &RunSummary, timing: &TimingInfo) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| TrkxError::io(dir, e))?;
    let path = dir.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| TrkxError::InvalidInput(format!("cannot serialise run summary: {e}")))?;
    fs::write(&path, json).map_err(|e| TrkxError::io(&path, e))?;

    let path = dir.join(TIMING_FILE);
    let mut out = csv_writer(&path, "label,milliseconds")?;
    for (label, elapsed) in timing.iter() {
        out.serialize((label, elapsed.as_micros() as f64 / 1e3))
            .map_err(|e| csv_error(&path, None, e))?;
    }
    out.flush().map_err(|e| TrkxError::io(&path, e))
}

impl fmt::Display for Reporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.statistics;
        writeln!(f, "==> Statistics ... ")?;
        writeln!(f, "- read    {} events", s.n_events)?;
        writeln!(f, "- read    {} spacepoints from {} modules", s.n_spacepoints, s.n_modules)?;
        for (label, c) in [("cpu", &s.cpu), ("device", &s.device)] {
            writeln!(
                f,
                "- {label:<7} {} measurements, {} seeds, {} params, {} found tracks, {} fitted tracks",
                c.measurements, c.seeds, c.params, c.found_tracks, c.fitted_tracks
            )?;
        }
        if s.n_comparisons > 0 {
            writeln!(f, "==> Cross-check over {} events", s.n_comparisons)?;
            for (name, totals) in &self.comparisons {
                for t in totals {
                    writeln!(
                        f,
                        "- {name:<24} {:>7.2}% at {:e}",
                        t.rate() * 100.0,
                        t.uncertainty
                    )?;
                }
            }
        }
        if self.performance {
            writeln!(f, "==> Performance")?;
            for w in &self.writers {
                writeln!(f, "- {}", w.report())?;
            }
        }
        if !self.timing.is_empty() {
            writeln!(f, "==> Elapsed times ...")?;
            write!(f, "{}", self.timing)?;
        }
        Ok(())
    }
}
