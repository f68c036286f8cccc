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

// CPU stage variants. Sequential by default, matching a single-threaded
// reference path; `with_parallelism` switches a stage to the rayon driver.

use trkx_kernels::finding::find_tracks;
use trkx_kernels::fitting::fit_tracks;
use trkx_kernels::params_estimation::estimate_track_params;
use trkx_kernels::seeding::find_seeds;
use trkx_kernels::{
    BoundTrackParameters, CellModule, ConstantField, DetectorView, FindingConfig, FittingConfig,
    Measurement, NavigationCandidate, Parallelism, Seed, SeedfilterConfig, SeedfinderConfig,
    Spacepoint,
};

use super::{Host, SeedingAlgorithm, TrackCandidates, TrackFinding, TrackFitting, TrackParamsEstimation, TrackStates};
use crate::error::{Result, TrkxError};

pub struct HostSeeding {
    finder: SeedfinderConfig,
    filter: SeedfilterConfig,
    mode: Parallelism,
}

impl HostSeeding {
    pub fn new(finder: SeedfinderConfig, filter: SeedfilterConfig) -> Self {
        Self {
            finder,
            filter,
            mode: Parallelism::Sequential,
        }
    }

    pub fn with_parallelism(mut self, mode: Parallelism) -> Self {
        self.mode = mode;
        self
    }
}

impl SeedingAlgorithm<Host> for HostSeeding {
    fn run(&self, spacepoints: &Vec<Spacepoint>) -> Result<Vec<Seed>> {
        crate::profile_scope!("Host::Seeding");
        Ok(find_seeds(spacepoints, &self.finder, &self.filter, self.mode))
    }

    fn name(&self) -> &'static str {
        "seeding (cpu)"
    }
}

pub struct HostParamsEstimation {
    mode: Parallelism,
}

impl HostParamsEstimation {
    pub fn new() -> Self {
        Self {
            mode: Parallelism::Sequential,
        }
    }

    pub fn with_parallelism(mut self, mode: Parallelism) -> Self {
        self.mode = mode;
        self
    }
}

impl Default for HostParamsEstimation {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackParamsEstimation<Host> for HostParamsEstimation {
    fn run(
        &self,
        spacepoints: &Vec<Spacepoint>,
        modules: &Vec<CellModule>,
        seeds: &Vec<Seed>,
        bfield: [f32; 3],
    ) -> Result<Vec<BoundTrackParameters>> {
        crate::profile_scope!("Host::TrackParams");
        estimate_track_params(spacepoints, modules, seeds, bfield, self.mode)
            .map_err(TrkxError::stage("track params"))
    }

    fn name(&self) -> &'static str {
        "track params (cpu)"
    }
}

pub struct HostFinding {
    cfg: FindingConfig,
    mode: Parallelism,
}

impl HostFinding {
    pub fn new(cfg: FindingConfig) -> Self {
        Self {
            cfg,
            mode: Parallelism::Sequential,
        }
    }

    pub fn with_parallelism(mut self, mode: Parallelism) -> Self {
        self.mode = mode;
        self
    }
}

impl TrackFinding<Host> for HostFinding {
    fn run(
        &self,
        detector: &DetectorView,
        field: &ConstantField,
        navigation: &mut Vec<NavigationCandidate>,
        measurements: &Vec<Measurement>,
        params: &Vec<BoundTrackParameters>,
    ) -> Result<TrackCandidates<Host>> {
        crate::profile_scope!("Host::Finding");
        let found = find_tracks(detector, field, measurements, params, navigation, &self.cfg, self.mode)
            .map_err(TrkxError::stage("finding"))?;
        Ok(found.into_iter().collect())
    }

    fn name(&self) -> &'static str {
        "finding (cpu)"
    }
}

pub struct HostFitting {
    cfg: FittingConfig,
    mode: Parallelism,
}

impl HostFitting {
    pub fn new(cfg: FittingConfig) -> Self {
        Self {
            cfg,
            mode: Parallelism::Sequential,
        }
    }

    pub fn with_parallelism(mut self, mode: Parallelism) -> Self {
        self.mode = mode;
        self
    }
}

impl TrackFitting<Host> for HostFitting {
    fn run(
        &self,
        detector: &DetectorView,
        field: &ConstantField,
        navigation: &mut Vec<NavigationCandidate>,
        candidates: &TrackCandidates<Host>,
    ) -> Result<TrackStates<Host>> {
        crate::profile_scope!("Host::Fitting");
        let fitted = fit_tracks(
            detector,
            field,
            candidates.headers(),
            candidates.items(),
            navigation,
            &self.cfg,
            self.mode,
        )
        .map_err(TrkxError::stage("fitting"))?;
        Ok(fitted.into_iter().collect())
    }

    fn name(&self) -> &'static str {
        "fitting (cpu)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trkx_kernels::{Detector, Surface};

    fn straight_event() -> (Detector, Vec<Spacepoint>, Vec<CellModule>, Vec<Measurement>) {
        let radii = [30.0f32, 70.0, 110.0];
        let detector = Detector::new(
            radii
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
        .unwrap();
        let modules: Vec<CellModule> = (0..3)
            .map(|i| CellModule {
                surface_link: i + 1,
                ..Default::default()
            })
            .collect();
        let measurements: Vec<Measurement> = radii
            .iter()
            .enumerate()
            .map(|(i, &r)| Measurement {
                surface_link: i as u64 + 1,
                module_link: i as u32,
                local: [0.3 * r, 0.5 * r],
                variance: [1e-4, 1e-4],
            })
            .collect();
        let view = detector.view();
        let spacepoints = trkx_kernels::spacepoint_formation::form_spacepoints(&measurements, &view).unwrap();
        (detector, spacepoints, modules, measurements)
    }

    #[test]
    fn chain_on_one_straight_track() {
        let (detector, sps, modules, meas) = straight_event();
        let finding_cfg = FindingConfig::default();
        let seeds = HostSeeding::new(SeedfinderConfig::default(), SeedfilterConfig::default())
            .run(&sps)
            .unwrap();
        assert_eq!(seeds.len(), 1);

        let params = HostParamsEstimation::new()
            .run(&sps, &modules, &seeds, [0.0, 0.0, 2.0])
            .unwrap();
        assert_eq!(params.len(), 1);

        let field = ConstantField::along_z(2.0);
        let mut nav = vec![NavigationCandidate::default(); seeds.len() * finding_cfg.navigation_buffer_size_scaler as usize];
        let candidates = HostFinding::new(finding_cfg)
            .run(&detector.view(), &field, &mut nav, &meas, &params)
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates.items()[0].len(), 3);

        let states = HostFitting::new(FittingConfig::default())
            .run(&detector.view(), &field, &mut nav, &candidates)
            .unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states.items()[0].len(), 3);
        assert_eq!(states.headers()[0].ndf, 2.0);
    }

    #[test]
    fn short_navigation_is_a_stage_error() {
        let (detector, sps, modules, meas) = straight_event();
        let seeds = HostSeeding::new(SeedfinderConfig::default(), SeedfilterConfig::default())
            .run(&sps)
            .unwrap();
        let params = HostParamsEstimation::new()
            .run(&sps, &modules, &seeds, [0.0, 0.0, 2.0])
            .unwrap();
        let mut nav = Vec::new();
        let err = HostFinding::new(FindingConfig::default())
            .run(&detector.view(), &ConstantField::default(), &mut nav, &meas, &params)
            .unwrap_err();
        assert!(matches!(err, TrkxError::Stage { stage: "finding", .. }));
    }
}
