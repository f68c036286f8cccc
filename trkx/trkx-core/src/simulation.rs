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

//! Multi-vertex (pile-up) event simulation.
//!
//! Vertices are drawn around the beam spot, tracks are generated uniformly in
//! phi, eta and momentum, transported as helices through the barrel and
//! smeared into measurements. Each event owns an RNG seeded from
//! `(seed, event)`, so any event can be regenerated on its own.

use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

use fastrand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use trkx_kernels::fitting::highland_theta0;
use trkx_kernels::propagation::Helix;
use trkx_kernels::spacepoint_formation::form_spacepoints;
use trkx_kernels::{
    C_GEV_PER_T_MM, CellModule, Detector, Measurement, PixelData, PropagationConfig, Spacepoint,
    Surface,
};

use crate::error::{Result, TrkxError};
use crate::io::utils::event_filename;
use crate::io::{CsvRecord, Particle, TruthLink, write_csv, write_detector};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub events: usize,
    pub seed: u64,
    /// Tracks from the nominal interaction point.
    pub hard_scatter_tracks: usize,
    pub vertices: usize,
    pub tracks_per_vertex: usize,
    /// Vertex spread (x, y, z), mm.
    pub vertex_sigma: [f32; 3],
    pub eta_range: [f32; 2],
    /// GeV.
    pub momentum_range: [f32; 2],
    /// Gaussian smearing of (loc0, loc1), mm.
    pub resolution: [f32; 2],
    pub bz: f32,
    /// Random multiple scattering on surfaces carrying material.
    pub scattering: bool,
    pub propagation: PropagationConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            events: 1,
            seed: 42,
            hard_scatter_tracks: 0,
            vertices: 10,
            tracks_per_vertex: 10,
            vertex_sigma: [0.04, 0.04, 54.0],
            eta_range: [-4.0, 4.0],
            momentum_range: [1.0, 10.0],
            resolution: [0.01, 0.01],
            bz: 2.0,
            scattering: true,
            propagation: PropagationConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        let ordered = |r: [f32; 2]| r[0].is_finite() && r[1].is_finite() && r[0] <= r[1];
        if !ordered(self.eta_range) {
            return Err(TrkxError::Config(format!("invalid eta range {:?}", self.eta_range)));
        }
        if !ordered(self.momentum_range) || self.momentum_range[0] <= 0.0 {
            return Err(TrkxError::Config(format!(
                "invalid momentum range {:?} GeV",
                self.momentum_range
            )));
        }
        if self
            .vertex_sigma
            .iter()
            .chain(&self.resolution)
            .any(|s| !s.is_finite() || *s < 0.0)
        {
            return Err(TrkxError::Config("smearing widths must be finite and non-negative".into()));
        }
        if !self.bz.is_finite() {
            return Err(TrkxError::Config(format!("invalid field {} T", self.bz)));
        }
        Ok(())
    }
}

/// Barrel used when no detector file is given: eight layers with material.
pub fn default_barrel() -> Result<Detector> {
    let layers = [
        (32.0, 500.0),
        (72.0, 500.0),
        (116.0, 500.0),
        (172.0, 500.0),
        (260.0, 1000.0),
        (360.0, 1000.0),
        (500.0, 1000.0),
        (660.0, 1000.0),
    ];
    let surfaces = layers
        .iter()
        .enumerate()
        .map(|(i, &(radius, half_length))| Surface {
            geometry_id: (i as u64 + 1) * 1000,
            radius,
            half_length,
            thickness_x0: 0.02,
        })
        .collect();
    Ok(Detector::new(surfaces)?)
}

/// One generated event, ready to be written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatedEvent {
    pub modules: Vec<CellModule>,
    pub measurements: Vec<Measurement>,
    pub spacepoints: Vec<Spacepoint>,
    pub particles: Vec<Particle>,
    pub links: Vec<TruthLink>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimulationSummary {
    pub events: usize,
    pub particles: usize,
    pub measurements: usize,
}

pub struct PileupSimulator {
    config: SimulationConfig,
    detector: Detector,
    modules: Vec<CellModule>,
    vertex: [Gaussian; 3],
    smear: [Gaussian; 2],
}

/// Zero-mean normal draws (Box-Muller).
#[derive(Debug, Clone, Copy)]
struct Gaussian {
    sigma: f64,
}

impl Gaussian {
    fn new(sigma: f64) -> Result<Self> {
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(TrkxError::Config(format!("invalid width {sigma}")));
        }
        Ok(Self { sigma })
    }

    fn sample(&self, rng: &mut Rng) -> f64 {
        self.sigma * standard_normal(rng)
    }
}

fn standard_normal(rng: &mut Rng) -> f64 {
    // u1 in (0, 1] keeps the log finite
    let u1 = 1.0 - rng.f64();
    let u2 = rng.f64();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

fn uniform(rng: &mut Rng, [lo, hi]: [f64; 2]) -> f64 {
    lo + (hi - lo) * rng.f64()
}

impl PileupSimulator {
    pub fn new(config: SimulationConfig, detector: Detector) -> Result<Self> {
        config.validate()?;
        let modules = detector
            .surfaces()
            .iter()
            .map(|s| CellModule {
                surface_link: s.geometry_id,
                threshold: 0.0,
                pixel: PixelData {
                    min_corner_x: -std::f32::consts::PI * s.radius,
                    min_corner_y: -s.half_length,
                    pitch_x: 0.05,
                    pitch_y: 0.05,
                },
            })
            .collect();
        let [sx, sy, sz] = config.vertex_sigma.map(f64::from);
        let [r0, r1] = config.resolution.map(f64::from);
        Ok(Self {
            vertex: [Gaussian::new(sx)?, Gaussian::new(sy)?, Gaussian::new(sz)?],
            smear: [Gaussian::new(r0)?, Gaussian::new(r1)?],
            config,
            detector,
            modules,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    fn rng_for(&self, event: usize) -> Rng {
        Rng::with_seed(self.config.seed.wrapping_add(event as u64))
    }

    /// Generate event `event`; identical for identical `(config, event)`.
    pub fn generate(&self, event: usize) -> SimulatedEvent {
        let mut rng = self.rng_for(event);
        let mut out = SimulatedEvent {
            modules: self.modules.clone(),
            ..Default::default()
        };

        let mut vertices = vec![([0.0f64; 3], self.config.hard_scatter_tracks)];
        for _ in 0..self.config.vertices {
            let v = [
                self.vertex[0].sample(&mut rng),
                self.vertex[1].sample(&mut rng),
                self.vertex[2].sample(&mut rng),
            ];
            vertices.push((v, self.config.tracks_per_vertex));
        }

        for (vertex, n_tracks) in vertices {
            for _ in 0..n_tracks {
                let particle_id = out.particles.len() as u64;
                let particle = self.generate_particle(&mut rng, particle_id, vertex);
                self.transport(&mut rng, &particle, &mut out);
                out.particles.push(particle);
            }
        }

        match form_spacepoints(&out.measurements, &self.detector.view()) {
            Ok(sps) => out.spacepoints = sps,
            // every measurement sits on a detector surface
            Err(e) => log::error!("event {event}: spacepoint formation failed: {e}"),
        }
        log::debug!(
            "simulated event {event}: {} particles, {} measurements",
            out.particles.len(),
            out.measurements.len()
        );
        out
    }

    fn generate_particle(&self, rng: &mut Rng, particle_id: u64, vertex: [f64; 3]) -> Particle {
        let phi = uniform(rng, [-PI, PI]);
        let eta = uniform(rng, self.config.eta_range.map(f64::from));
        let p = uniform(rng, self.config.momentum_range.map(f64::from));
        let charge = if rng.bool() { 1.0 } else { -1.0 };
        let theta = 2.0 * (-eta).exp().atan();
        let pt = p * theta.sin();
        Particle {
            particle_id,
            vertex: vertex.map(|v| v as f32),
            momentum: [
                (pt * phi.cos()) as f32,
                (pt * phi.sin()) as f32,
                (p * theta.cos()) as f32,
            ],
            charge,
        }
    }

    fn transport(&self, rng: &mut Rng, particle: &Particle, out: &mut SimulatedEvent) {
        let [px, py, pz] = particle.momentum.map(f64::from);
        let p = (px * px + py * py + pz * pz).sqrt();
        let charge = particle.charge as f64;
        let bz = self.config.bz as f64;
        let omega = |theta: f64| -(C_GEV_PER_T_MM as f64) * bz * charge / (p * theta.sin());

        let mut theta = px.hypot(py).atan2(pz);
        let mut helix = Helix::new(
            particle.vertex.map(f64::from),
            py.atan2(px),
            1.0 / theta.tan(),
            omega(theta),
        );
        for (index, surface) in self.detector.surfaces().iter().enumerate() {
            let Some(s) = helix.path_to_radius(surface.radius as f64, &self.config.propagation) else {
                break;
            };
            let position = helix.position(s);
            if !surface.contains_z(position[2] as f32) {
                continue;
            }
            let local = surface.global_to_local(position.map(|x| x as f32));
            let [s0, s1] = self.config.resolution;
            out.links.push(TruthLink {
                measurement_id: out.measurements.len() as u64,
                particle_id: particle.particle_id,
            });
            out.measurements.push(Measurement {
                surface_link: surface.geometry_id,
                module_link: index as u32,
                local: [
                    local[0] + self.smear[0].sample(rng) as f32,
                    local[1] + self.smear[1].sample(rng) as f32,
                ],
                variance: [s0 * s0, s1 * s1],
            });

            let mut phi = helix.direction_phi(s);
            if self.config.scattering && surface.thickness_x0 > 0.0 {
                let theta0 = highland_theta0(p, surface.thickness_x0 as f64 / theta.sin().abs());
                if theta0.is_finite() && theta0 > 0.0 {
                    theta = (theta + theta0 * standard_normal(rng)).clamp(1e-3, PI - 1e-3);
                    phi += theta0 * standard_normal(rng) / theta.sin();
                }
            }
            helix = Helix::new(position, phi, 1.0 / theta.tan(), omega(theta));
        }
    }

    /// Write one event as CSV files under `directory`.
    pub fn write_event(&self, directory: &Path, event: usize, data: &SimulatedEvent) -> Result<()> {
        fn file<T: CsvRecord>(directory: &Path, event: usize) -> PathBuf {
            directory.join(event_filename(event, T::SUFFIX))
        }
        write_csv(&file::<CellModule>(directory, event), &data.modules)?;
        write_csv(&file::<Measurement>(directory, event), &data.measurements)?;
        write_csv(&file::<Spacepoint>(directory, event), &data.spacepoints)?;
        write_csv(&file::<Particle>(directory, event), &data.particles)?;
        write_csv(&file::<TruthLink>(directory, event), &data.links)
    }

    /// Generate and write all configured events, plus `detector.json`.
    pub fn run(&self, directory: &Path) -> Result<SimulationSummary> {
        fs::create_dir_all(directory).map_err(|e| TrkxError::io(directory, e))?;
        write_detector(&directory.join("detector.json"), &self.detector)?;
        let mut summary = SimulationSummary::default();
        let events: Vec<usize> = (0..self.config.events).collect();
        // batches are generated in parallel and written in event order
        for batch in events.chunks(rayon::current_num_threads().max(1)) {
            let generated: Vec<SimulatedEvent> = batch.par_iter().map(|&e| self.generate(e)).collect();
            for (&event, data) in batch.iter().zip(&generated) {
                self.write_event(directory, event, data)?;
                summary.events += 1;
                summary.particles += data.particles.len();
                summary.measurements += data.measurements.len();
                log::info!(
                    "event {event}: {} particles, {} measurements written",
                    data.particles.len(),
                    data.measurements.len()
                );
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{CsvEventReader, DataFormat, EventSource};

    fn small_config() -> SimulationConfig {
        SimulationConfig {
            vertices: 3,
            tracks_per_vertex: 4,
            hard_scatter_tracks: 2,
            eta_range: [-1.0, 1.0],
            ..Default::default()
        }
    }

    #[test]
    fn same_seed_same_event() {
        let sim = PileupSimulator::new(small_config(), default_barrel().unwrap()).unwrap();
        let a = sim.generate(3);
        let b = sim.generate(3);
        assert_eq!(a, b);
        assert_ne!(a, sim.generate(4));
        assert_eq!(a.particles.len(), 14);
    }

    #[test]
    fn hits_lie_on_their_surfaces() {
        let config = SimulationConfig {
            scattering: false,
            resolution: [0.0, 0.0],
            ..small_config()
        };
        let sim = PileupSimulator::new(config, default_barrel().unwrap()).unwrap();
        let event = sim.generate(0);
        assert!(!event.measurements.is_empty());
        assert_eq!(event.measurements.len(), event.links.len());
        assert_eq!(event.measurements.len(), event.spacepoints.len());
        for (m, sp) in event.measurements.iter().zip(&event.spacepoints) {
            let surface = *sim.detector().view().surface(m.surface_link).unwrap();
            assert!((sp.radius() - surface.radius).abs() < 1e-2 * surface.radius.max(1.0));
            assert!(surface.contains_z(sp.z()));
        }
    }

    #[test]
    fn central_tracks_cross_every_layer() {
        let config = SimulationConfig {
            vertices: 0,
            hard_scatter_tracks: 5,
            eta_range: [0.0, 0.0],
            momentum_range: [5.0, 5.0],
            scattering: false,
            ..Default::default()
        };
        let sim = PileupSimulator::new(config, default_barrel().unwrap()).unwrap();
        let event = sim.generate(0);
        assert_eq!(event.measurements.len(), 5 * 8);
    }

    #[test]
    fn rejects_bad_ranges() {
        let config = SimulationConfig {
            momentum_range: [0.0, 1.0],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(TrkxError::Config(_))));
        let config = SimulationConfig {
            eta_range: [1.0, -1.0],
            ..Default::default()
        };
        assert!(PileupSimulator::new(config, default_barrel().unwrap()).is_err());
    }

    #[test]
    fn written_events_read_back_with_truth() {
        let dir = tempfile::tempdir().unwrap();
        let config = SimulationConfig {
            events: 2,
            ..small_config()
        };
        let sim = PileupSimulator::new(config, default_barrel().unwrap()).unwrap();
        let summary = sim.run(dir.path()).unwrap();
        assert_eq!(summary.events, 2);
        assert!(dir.path().join("detector.json").exists());

        let reader = CsvEventReader::new(dir.path(), DataFormat::Csv);
        let data = reader.read_event(1, &sim.detector().view()).unwrap();
        let expected = sim.generate(1);
        assert_eq!(data.measurements, expected.measurements);
        assert_eq!(data.modules, expected.modules);
        let truth = data.truth.unwrap();
        assert_eq!(truth.particles().len(), expected.particles.len());
        for (m, link) in expected.measurements.iter().zip(&expected.links) {
            assert_eq!(truth.particle_of_measurement(m), Some(link.particle_id));
        }
    }
}
