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

//! Truth-based performance writers.
//!
//! A reconstructed object is matched to the particle owning the majority of
//! its measurements when that majority reaches `min_purity`.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::PathBuf;

use serde::Serialize;
use trkx_kernels::{
    CandidateHeader, FittingResult, Measurement, Seed, Spacepoint, TrackState,
};

use crate::device::HostContainer;
use crate::error::{Result, TrkxError};
use crate::io::{EventTruth, csv_writer};
use crate::io::utils::csv_error;

/// Stage outputs of one event on one path, with the event truth.
pub struct EventOutputs<'a> {
    pub event: usize,
    pub spacepoints: &'a [Spacepoint],
    pub seeds: &'a [Seed],
    pub candidates: &'a HostContainer<CandidateHeader, Measurement>,
    pub tracks: &'a HostContainer<FittingResult, TrackState>,
    pub truth: &'a EventTruth,
}

pub trait PerformanceWriter: Send {
    fn name(&self) -> &'static str;

    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, outputs: &EventOutputs<'_>) -> Result<()>;

    fn finalize(&mut self) -> Result<()> {
        Ok(())
    }

    /// Human-readable summary of everything written so far.
    fn report(&self) -> String;
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn seed_particle(seed: &Seed, spacepoints: &[Spacepoint], truth: &EventTruth) -> Option<u64> {
    let ids: Vec<Option<u64>> = [seed.spb_link, seed.spm_link, seed.spt_link]
        .iter()
        .map(|&l| spacepoints.get(l as usize).and_then(|sp| truth.particle_of_spacepoint(sp)))
        .collect();
    match ids.as_slice() {
        [Some(a), Some(b), Some(c)] if a == b && b == c => Some(*a),
        _ => None,
    }
}

fn track_particle(items: &[Measurement], truth: &EventTruth, min_purity: f64) -> Option<u64> {
    let (id, n) = EventTruth::majority(items.iter().map(|m| truth.particle_of_measurement(m)))?;
    (!items.is_empty() && n as f64 / items.len() as f64 >= min_purity).then_some(id)
}

/// Seeding efficiency and fake rate against particles with at least three measurements.
#[derive(Debug, Default)]
pub struct SeedingPerformanceWriter {
    n_seeds: u64,
    n_matched_seeds: u64,
    n_particles: u64,
    n_found_particles: u64,
}

impl SeedingPerformanceWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PerformanceWriter for SeedingPerformanceWriter {
    fn name(&self) -> &'static str {
        "seeding"
    }

    fn write(&mut self, o: &EventOutputs<'_>) -> Result<()> {
        let mut found = HashSet::new();
        for seed in o.seeds {
            self.n_seeds += 1;
            if let Some(id) = seed_particle(seed, o.spacepoints, o.truth) {
                self.n_matched_seeds += 1;
                found.insert(id);
            }
        }
        let reconstructable = o.truth.reconstructable(3);
        self.n_particles += reconstructable.len() as u64;
        self.n_found_particles += reconstructable.iter().filter(|id| found.contains(id)).count() as u64;
        Ok(())
    }

    fn report(&self) -> String {
        format!(
            "seeding: efficiency {:.3} ({} / {} particles), fake rate {:.3} ({} seeds)",
            ratio(self.n_found_particles, self.n_particles),
            self.n_found_particles,
            self.n_particles,
            ratio(self.n_seeds - self.n_matched_seeds, self.n_seeds),
            self.n_seeds
        )
    }
}

/// Finding efficiency, duplicate and fake rates.
#[derive(Debug)]
pub struct FindingPerformanceWriter {
    min_purity: f64,
    min_hits: usize,
    n_candidates: u64,
    n_fake: u64,
    n_duplicate: u64,
    n_particles: u64,
    n_found_particles: u64,
}

impl FindingPerformanceWriter {
    pub fn new(min_purity: f64, min_hits: usize) -> Self {
        Self {
            min_purity,
            min_hits,
            n_candidates: 0,
            n_fake: 0,
            n_duplicate: 0,
            n_particles: 0,
            n_found_particles: 0,
        }
    }
}

impl Default for FindingPerformanceWriter {
    fn default() -> Self {
        Self::new(0.5, 3)
    }
}

impl PerformanceWriter for FindingPerformanceWriter {
    fn name(&self) -> &'static str {
        "finding"
    }

    fn write(&mut self, o: &EventOutputs<'_>) -> Result<()> {
        let mut per_particle: HashMap<u64, u64> = HashMap::new();
        for (_, items) in o.candidates.iter() {
            self.n_candidates += 1;
            match track_particle(items, o.truth, self.min_purity) {
                Some(id) => *per_particle.entry(id).or_default() += 1,
                None => self.n_fake += 1,
            }
        }
        self.n_duplicate += per_particle.values().map(|n| n - 1).sum::<u64>();
        let reconstructable = o.truth.reconstructable(self.min_hits);
        self.n_particles += reconstructable.len() as u64;
        self.n_found_particles += reconstructable
            .iter()
            .filter(|id| per_particle.contains_key(id))
            .count() as u64;
        Ok(())
    }

    fn report(&self) -> String {
        format!(
            "finding: efficiency {:.3} ({} / {} particles), duplicate rate {:.3}, fake rate {:.3} ({} candidates)",
            ratio(self.n_found_particles, self.n_particles),
            self.n_found_particles,
            self.n_particles,
            ratio(self.n_duplicate, self.n_candidates),
            ratio(self.n_fake, self.n_candidates),
            self.n_candidates
        )
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Moments {
    n: u64,
    sum: f64,
    sum2: f64,
}

impl Moments {
    fn add(&mut self, x: f64) {
        self.n += 1;
        self.sum += x;
        self.sum2 += x * x;
    }

    fn mean(&self) -> f64 {
        if self.n == 0 { 0.0 } else { self.sum / self.n as f64 }
    }

    fn rms(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            (self.sum2 / self.n as f64).sqrt()
        }
    }
}

/// Residuals of fitted theta and q/p against the matched particle, plus chi2/ndf.
#[derive(Debug, Default)]
pub struct FittingPerformanceWriter {
    theta: Moments,
    qop: Moments,
    chi2_ndf: Moments,
    unmatched: u64,
}

impl FittingPerformanceWriter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PerformanceWriter for FittingPerformanceWriter {
    fn name(&self) -> &'static str {
        "fitting"
    }

    fn write(&mut self, o: &EventOutputs<'_>) -> Result<()> {
        for (result, states) in o.tracks.iter() {
            if result.ndf > 0.0 {
                self.chi2_ndf.add((result.chi2 / result.ndf) as f64);
            }
            let items: Vec<Measurement> = states.iter().map(|s| s.measurement).collect();
            let particle = track_particle(&items, o.truth, 0.5).and_then(|id| o.truth.particle(id));
            let Some(p) = particle else {
                self.unmatched += 1;
                continue;
            };
            let [px, py, pz] = p.momentum.map(f64::from);
            let momentum = (px * px + py * py + pz * pz).sqrt();
            if momentum == 0.0 {
                continue;
            }
            let true_theta = px.hypot(py).atan2(pz);
            let true_qop = p.charge as f64 / momentum;
            let fit = &result.fit_params;
            self.theta.add(fit.theta as f64 - true_theta);
            self.qop.add(fit.qop as f64 - true_qop);
        }
        Ok(())
    }

    fn report(&self) -> String {
        format!(
            "fitting: theta residual mean {:.2e} rms {:.2e}, q/p residual mean {:.2e} rms {:.2e}, mean chi2/ndf {:.3}, {} unmatched tracks",
            self.theta.mean(),
            self.theta.rms(),
            self.qop.mean(),
            self.qop.rms(),
            self.chi2_ndf.mean(),
            self.unmatched
        )
    }
}

#[derive(Serialize)]
struct SeedStat {
    event: usize,
    seed: usize,
    particle_id: Option<u64>,
    matched: u8,
}

/// Per-seed truth record written to `<prefix>track_stat.csv`.
pub struct NseedPerformanceWriter {
    path: PathBuf,
    out: Option<csv::Writer<File>>,
    n_seeds: u64,
    n_matched: u64,
    n_events: u64,
}

impl NseedPerformanceWriter {
    pub fn new(directory: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            path: directory.into().join(format!("{prefix}track_stat.csv")),
            out: None,
            n_seeds: 0,
            n_matched: 0,
            n_events: 0,
        }
    }
}

impl PerformanceWriter for NseedPerformanceWriter {
    fn name(&self) -> &'static str {
        "nseed"
    }

    fn initialize(&mut self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| TrkxError::io(dir, e))?;
        }
        self.out = Some(csv_writer(&self.path, "event,seed,particle_id,matched")?);
        log::debug!("nseed: writing {}", self.path.display());
        Ok(())
    }

    fn write(&mut self, o: &EventOutputs<'_>) -> Result<()> {
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| TrkxError::State("nseed writer used before initialize".into()))?;
        self.n_events += 1;
        for (i, seed) in o.seeds.iter().enumerate() {
            let particle = seed_particle(seed, o.spacepoints, o.truth);
            self.n_seeds += 1;
            self.n_matched += u64::from(particle.is_some());
            out.serialize(SeedStat {
                event: o.event,
                seed: i,
                particle_id: particle,
                matched: u8::from(particle.is_some()),
            })
            .map_err(|e| csv_error(&self.path, None, e))?;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush().map_err(|e| TrkxError::io(&self.path, e))?;
            log::info!("nseed: {} seeds written to {}", self.n_seeds, self.path.display());
        }
        Ok(())
    }

    fn report(&self) -> String {
        format!(
            "nseed: {} seeds over {} events ({:.2} per event), {} truth-matched",
            self.n_seeds,
            self.n_events,
            ratio(self.n_seeds, self.n_events),
            self.n_matched
        )
    }
}

/// The writer set enabled by performance checking.
pub fn default_writers(directory: impl Into<PathBuf>) -> Vec<Box<dyn PerformanceWriter>> {
    vec![
        Box::new(SeedingPerformanceWriter::new()),
        Box::new(NseedPerformanceWriter::new(directory, "nseed_performance_")),
        Box::new(FindingPerformanceWriter::default()),
        Box::new(FittingPerformanceWriter::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{Particle, TruthLink};

    struct Fixture {
        measurements: Vec<Measurement>,
        spacepoints: Vec<Spacepoint>,
        truth: EventTruth,
    }

    fn fixture() -> Fixture {
        let measurements: Vec<Measurement> = (0..4)
            .map(|i| Measurement {
                surface_link: i as u64 + 1,
                module_link: i,
                local: [i as f32, 0.0],
                variance: [1e-4, 1e-4],
            })
            .collect();
        let spacepoints: Vec<Spacepoint> = (0..4)
            .map(|i| Spacepoint {
                module_link: i,
                meas_link: i,
                global: [0.0; 3],
            })
            .collect();
        let links: Vec<TruthLink> = [1u64, 1, 1, 2]
            .iter()
            .enumerate()
            .map(|(i, &p)| TruthLink {
                measurement_id: i as u64,
                particle_id: p,
            })
            .collect();
        let particles = vec![
            Particle {
                particle_id: 1,
                momentum: [1.0, 0.0, 0.0],
                charge: -1.0,
                ..Default::default()
            },
            Particle {
                particle_id: 2,
                momentum: [0.0, 2.0, 0.0],
                charge: 1.0,
                ..Default::default()
            },
        ];
        let truth = EventTruth::new(particles, &measurements, &links);
        Fixture {
            measurements,
            spacepoints,
            truth,
        }
    }

    fn seed(b: u32, m: u32, t: u32) -> Seed {
        Seed {
            spb_link: b,
            spm_link: m,
            spt_link: t,
            ..Default::default()
        }
    }

    #[test]
    fn seeding_efficiency_and_fakes() {
        let f = fixture();
        let seeds = [seed(0, 1, 2), seed(1, 2, 3)];
        let empty_c = HostContainer::new();
        let empty_t = HostContainer::new();
        let mut w = SeedingPerformanceWriter::new();
        w.write(&EventOutputs {
            event: 0,
            spacepoints: &f.spacepoints,
            seeds: &seeds,
            candidates: &empty_c,
            tracks: &empty_t,
            truth: &f.truth,
        })
        .unwrap();
        let report = w.report();
        assert!(report.contains("efficiency 1.000 (1 / 1 particles)"), "{report}");
        assert!(report.contains("fake rate 0.500"), "{report}");
    }

    #[test]
    fn finding_counts_duplicates() {
        let f = fixture();
        let candidates: HostContainer<CandidateHeader, Measurement> = vec![
            (CandidateHeader::default(), f.measurements[..3].to_vec()),
            (CandidateHeader::default(), f.measurements[..2].to_vec()),
            (CandidateHeader::default(), vec![f.measurements[3]]),
        ]
        .into_iter()
        .collect();
        let tracks = HostContainer::new();
        let mut w = FindingPerformanceWriter::default();
        w.write(&EventOutputs {
            event: 0,
            spacepoints: &f.spacepoints,
            seeds: &[],
            candidates: &candidates,
            tracks: &tracks,
            truth: &f.truth,
        })
        .unwrap();
        assert_eq!(w.n_found_particles, 1);
        assert_eq!(w.n_duplicate, 1);
        assert_eq!(w.n_fake, 0);
    }

    #[test]
    fn fitting_residuals_against_truth() {
        let f = fixture();
        let states: Vec<TrackState> = f.measurements[..3]
            .iter()
            .map(|m| TrackState {
                measurement: *m,
                ..Default::default()
            })
            .collect();
        let mut result = FittingResult {
            ndf: 2.0,
            chi2: 1.0,
            ..Default::default()
        };
        result.fit_params.theta = std::f32::consts::FRAC_PI_2;
        result.fit_params.qop = -1.0;
        let tracks: HostContainer<FittingResult, TrackState> = vec![(result, states)].into_iter().collect();
        let candidates = HostContainer::new();
        let mut w = FittingPerformanceWriter::new();
        w.write(&EventOutputs {
            event: 0,
            spacepoints: &f.spacepoints,
            seeds: &[],
            candidates: &candidates,
            tracks: &tracks,
            truth: &f.truth,
        })
        .unwrap();
        assert_eq!(w.theta.n, 1);
        assert!(w.theta.mean().abs() < 1e-6);
        assert!(w.qop.mean().abs() < 1e-6);
        assert!((w.chi2_ndf.mean() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn nseed_writes_one_row_per_seed() {
        let dir = tempfile::tempdir().unwrap();
        let f = fixture();
        let seeds = [seed(0, 1, 2), seed(1, 2, 3)];
        let (c, t) = (HostContainer::new(), HostContainer::new());
        let mut w = NseedPerformanceWriter::new(dir.path(), "nseed_performance_");
        let outputs = EventOutputs {
            event: 4,
            spacepoints: &f.spacepoints,
            seeds: &seeds,
            candidates: &c,
            tracks: &t,
            truth: &f.truth,
        };
        assert!(w.write(&outputs).is_err());
        w.initialize().unwrap();
        w.write(&outputs).unwrap();
        w.finalize().unwrap();
        let text = std::fs::read_to_string(dir.path().join("nseed_performance_track_stat.csv")).unwrap();
        assert_eq!(text, "event,seed,particle_id,matched\n4,0,1,1\n4,1,,0\n");
        assert!(w.report().starts_with("nseed: 2 seeds over 1 events"));
    }
}
