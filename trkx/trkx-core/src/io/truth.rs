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

//! Simulated truth: generated particles and the measurement-to-particle map.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use trkx_kernels::{Measurement, Spacepoint};

use crate::comparator::{MeasurementKey, key};
use crate::io::write::CsvRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Particle {
    pub particle_id: u64,
    /// Production vertex, mm.
    pub vertex: [f32; 3],
    /// GeV.
    pub momentum: [f32; 3],
    pub charge: f32,
}

impl Particle {
    pub fn pt(&self) -> f32 {
        self.momentum[0].hypot(self.momentum[1])
    }

    pub fn eta(&self) -> f32 {
        let pt = self.pt();
        if pt == 0.0 {
            return self.momentum[2].signum() * f32::INFINITY;
        }
        (self.momentum[2] / pt).asinh()
    }

    pub fn phi(&self) -> f32 {
        self.momentum[1].atan2(self.momentum[0])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParticleRow {
    pub particle_id: u64,
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub px: f32,
    pub py: f32,
    pub pz: f32,
    pub q: f32,
}

impl CsvRecord for Particle {
    const HEADER: &'static str = "particle_id,vx,vy,vz,px,py,pz,q";
    const SUFFIX: &'static str = "-particles.csv";
    type Row = ParticleRow;

    fn to_row(&self) -> ParticleRow {
        let [vx, vy, vz] = self.vertex;
        let [px, py, pz] = self.momentum;
        ParticleRow {
            particle_id: self.particle_id,
            vx,
            vy,
            vz,
            px,
            py,
            pz,
            q: self.charge,
        }
    }
}

impl From<ParticleRow> for Particle {
    fn from(r: ParticleRow) -> Self {
        Particle {
            particle_id: r.particle_id,
            vertex: [r.vx, r.vy, r.vz],
            momentum: [r.px, r.py, r.pz],
            charge: r.q,
        }
    }
}

/// Row of the measurement truth file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TruthLink {
    pub measurement_id: u64,
    pub particle_id: u64,
}

impl CsvRecord for TruthLink {
    const HEADER: &'static str = "measurement_id,particle_id";
    const SUFFIX: &'static str = "-truth.csv";
    type Row = TruthLink;

    fn to_row(&self) -> TruthLink {
        *self
    }
}

/// Truth of one event, indexed for lookups from stage outputs.
#[derive(Debug, Clone, Default)]
pub struct EventTruth {
    particles: Vec<Particle>,
    by_index: Vec<Option<u64>>,
    by_value: HashMap<MeasurementKey, u64>,
}

impl EventTruth {
    pub fn new(particles: Vec<Particle>, measurements: &[Measurement], links: &[TruthLink]) -> Self {
        let mut by_index = vec![None; measurements.len()];
        let mut by_value = HashMap::with_capacity(links.len());
        for link in links {
            let i = link.measurement_id as usize;
            if let Some(m) = measurements.get(i) {
                by_index[i] = Some(link.particle_id);
                by_value.insert(key(m), link.particle_id);
            } else {
                log::warn!("truth link to missing measurement {}", link.measurement_id);
            }
        }
        Self {
            particles,
            by_index,
            by_value,
        }
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn particle(&self, id: u64) -> Option<&Particle> {
        self.particles.iter().find(|p| p.particle_id == id)
    }

    pub fn particle_of_measurement(&self, m: &Measurement) -> Option<u64> {
        self.by_value.get(&key(m)).copied()
    }

    pub fn particle_of_spacepoint(&self, sp: &Spacepoint) -> Option<u64> {
        self.by_index.get(sp.meas_link as usize).copied().flatten()
    }

    /// Measurements of each particle, in input order.
    pub fn measurements_by_particle(&self, measurements: &[Measurement]) -> BTreeMap<u64, Vec<Measurement>> {
        let mut tracks: BTreeMap<u64, Vec<Measurement>> = BTreeMap::new();
        for (m, id) in measurements.iter().zip(&self.by_index) {
            if let Some(id) = id {
                tracks.entry(*id).or_default().push(*m);
            }
        }
        tracks
    }

    /// Measurements per particle.
    pub fn hit_counts(&self) -> HashMap<u64, usize> {
        let mut counts = HashMap::new();
        for id in self.by_index.iter().flatten() {
            *counts.entry(*id).or_default() += 1;
        }
        counts
    }

    /// Particles leaving at least `min_hits` measurements.
    pub fn reconstructable(&self, min_hits: usize) -> Vec<u64> {
        let counts = self.hit_counts();
        let mut ids: Vec<u64> = self
            .particles
            .iter()
            .map(|p| p.particle_id)
            .filter(|id| counts.get(id).copied().unwrap_or(0) >= min_hits)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Dominant particle among `ids` and how many of them it owns.
    pub fn majority(ids: impl IntoIterator<Item = Option<u64>>) -> Option<(u64, usize)> {
        let mut counts: HashMap<u64, usize> = HashMap::new();
        for id in ids.into_iter().flatten() {
            *counts.entry(id).or_default() += 1;
        }
        counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meas(surface: u64, l0: f32) -> Measurement {
        Measurement {
            surface_link: surface,
            local: [l0, 0.0],
            ..Default::default()
        }
    }

    #[test]
    fn lookups_by_index_and_value() {
        let measurements = vec![meas(1, 1.0), meas(2, 2.0), meas(3, 3.0)];
        let links = [
            TruthLink { measurement_id: 0, particle_id: 7 },
            TruthLink { measurement_id: 2, particle_id: 9 },
            TruthLink { measurement_id: 5, particle_id: 9 },
        ];
        let particles = vec![
            Particle { particle_id: 7, momentum: [3.0, 4.0, 0.0], ..Default::default() },
            Particle { particle_id: 9, ..Default::default() },
        ];
        let truth = EventTruth::new(particles, &measurements, &links);
        assert_eq!(truth.particle_of_measurement(&measurements[2]), Some(9));
        let tracks = truth.measurements_by_particle(&measurements);
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[&7], vec![measurements[0]]);
        assert_eq!(tracks[&9], vec![measurements[2]]);
        assert_eq!(truth.particle_of_measurement(&measurements[1]), None);
        let sp = Spacepoint { meas_link: 0, ..Default::default() };
        assert_eq!(truth.particle_of_spacepoint(&sp), Some(7));
        assert_eq!(truth.reconstructable(1), vec![7, 9]);
        assert_eq!(truth.reconstructable(2), Vec::<u64>::new());
        assert_eq!(truth.particle(7).unwrap().pt(), 5.0);
    }

    #[test]
    fn majority_prefers_count_then_lower_id() {
        assert_eq!(EventTruth::majority([Some(3), Some(5), Some(5), None]), Some((5, 2)));
        assert_eq!(EventTruth::majority([Some(4), Some(2)]), Some((2, 1)));
        assert_eq!(EventTruth::majority([None, None]), None);
    }
}
