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

//! Accelerator stage variants.
//!
//! Each stage allocates its output from the main resource, enqueues the
//! data-parallel kernel on the stream and returns immediately. Outputs whose
//! size is only known after the kernel ran are resizable with a capacity
//! derived from the inputs:
//!
//! * seeds: `spacepoints × max_seeds_per_middle`
//! * parameters: one per seed slot
//! * candidates: one per navigation slot, rows capped at `max_track_candidates_per_track`
//!
//! Fitting reads the candidate sizes first (a stream synchronisation) and
//! allocates its output exactly.

use trkx_kernels::finding::find_tracks;
use trkx_kernels::fitting::fit_tracks;
use trkx_kernels::params_estimation::estimate_track_params;
use trkx_kernels::seeding::find_seeds;
use trkx_kernels::{
    BoundTrackParameters, CellModule, ConstantField, DetectorView, FindingConfig, FittingConfig,
    KernelError, Measurement, Parallelism, Seed, SeedfilterConfig, SeedfinderConfig, Spacepoint,
};

use super::{
    Accelerator, SeedingAlgorithm, TrackCandidates, TrackFinding, TrackFitting,
    TrackParamsEstimation, TrackStates,
};
use crate::device::{Buffer, ContainerBuffer, DeviceContext, NavigationBuffer};
use crate::error::{Result, TrkxError};

pub struct DeviceSeeding {
    finder: SeedfinderConfig,
    filter: SeedfilterConfig,
    ctx: DeviceContext,
}

impl DeviceSeeding {
    pub fn new(finder: SeedfinderConfig, filter: SeedfilterConfig, ctx: DeviceContext) -> Self {
        Self { finder, filter, ctx }
    }
}

impl SeedingAlgorithm<Accelerator> for DeviceSeeding {
    fn run(&self, spacepoints: &Buffer<Spacepoint>) -> Result<Buffer<Seed>> {
        let n_spacepoints = self.ctx.copy.get_size(spacepoints)?;
        let capacity = n_spacepoints.saturating_mul(self.filter.max_seeds_per_middle as usize);
        let mr = &self.ctx.resources;
        let seeds = Buffer::resizable(capacity, &mr.main, &mr.host)?;

        let (input, output) = (spacepoints.clone(), seeds.clone());
        let (finder, filter) = (self.finder.clone(), self.filter.clone());
        let _ = self.ctx.stream.enqueue("seeding kernel", move || {
            let found = find_seeds(&input.read()?, &finder, &filter, Parallelism::Parallel);
            output.store(found)
        })?;
        log::debug!("{}: {n_spacepoints} spacepoints, room for {capacity} seeds", self.name());
        Ok(seeds)
    }

    fn name(&self) -> &'static str {
        "seeding (device)"
    }
}

pub struct DeviceParamsEstimation {
    ctx: DeviceContext,
}

impl DeviceParamsEstimation {
    pub fn new(ctx: DeviceContext) -> Self {
        Self { ctx }
    }
}

impl TrackParamsEstimation<Accelerator> for DeviceParamsEstimation {
    fn run(
        &self,
        spacepoints: &Buffer<Spacepoint>,
        modules: &Buffer<CellModule>,
        seeds: &Buffer<Seed>,
        bfield: [f32; 3],
    ) -> Result<Buffer<BoundTrackParameters>> {
        let mr = &self.ctx.resources;
        let params = Buffer::resizable(seeds.capacity(), &mr.main, &mr.host)?;

        let (sps, mods, seeds, output) = (spacepoints.clone(), modules.clone(), seeds.clone(), params.clone());
        let _ = self.ctx.stream.enqueue("track params kernel", move || {
            let estimated = estimate_track_params(
                &sps.read()?,
                &mods.read()?,
                &seeds.read()?,
                bfield,
                Parallelism::Parallel,
            )
            .map_err(TrkxError::stage("track params"))?;
            output.store(estimated)
        })?;
        Ok(params)
    }

    fn name(&self) -> &'static str {
        "track params (device)"
    }
}

pub struct DeviceFinding {
    cfg: FindingConfig,
    ctx: DeviceContext,
}

impl DeviceFinding {
    pub fn new(cfg: FindingConfig, ctx: DeviceContext) -> Self {
        Self { cfg, ctx }
    }
}

impl TrackFinding<Accelerator> for DeviceFinding {
    fn run(
        &self,
        detector: &DetectorView,
        field: &ConstantField,
        navigation: &mut NavigationBuffer,
        measurements: &Buffer<Measurement>,
        params: &Buffer<BoundTrackParameters>,
    ) -> Result<TrackCandidates<Accelerator>> {
        let mr = &self.ctx.resources;
        let candidates = ContainerBuffer::resizable(
            navigation.capacity(),
            self.cfg.max_track_candidates_per_track as usize,
            &mr.main,
            &mr.host,
        )?;

        let (detector, field, cfg) = (detector.clone(), *field, self.cfg.clone());
        let (meas, params, nav, output) = (
            measurements.clone(),
            params.clone(),
            navigation.slots().clone(),
            candidates.clone(),
        );
        let _ = self.ctx.stream.enqueue("finding kernel", move || {
            let mut slots = nav.read()?.clone();
            let found = find_tracks(
                &detector,
                &field,
                &meas.read()?,
                &params.read()?,
                &mut slots,
                &cfg,
                Parallelism::Parallel,
            )
            .map_err(TrkxError::stage("finding"))?;
            nav.store(slots)?;
            let (headers, rows): (Vec<_>, Vec<_>) = found.into_iter().unzip();
            output.store(headers, rows)
        })?;
        log::debug!("{}: {} navigation slots", self.name(), navigation.capacity());
        Ok(candidates)
    }

    fn name(&self) -> &'static str {
        "finding (device)"
    }
}

pub struct DeviceFitting {
    cfg: FittingConfig,
    ctx: DeviceContext,
}

impl DeviceFitting {
    pub fn new(cfg: FittingConfig, ctx: DeviceContext) -> Self {
        Self { cfg, ctx }
    }
}

impl TrackFitting<Accelerator> for DeviceFitting {
    fn run(
        &self,
        detector: &DetectorView,
        field: &ConstantField,
        navigation: &mut NavigationBuffer,
        candidates: &TrackCandidates<Accelerator>,
    ) -> Result<TrackStates<Accelerator>> {
        let sizes = self.ctx.copy.get_container_sizes(candidates)?;
        if sizes.headers > navigation.capacity() {
            return Err(TrkxError::stage("fitting")(KernelError::NavigationOverflow {
                needed: sizes.headers,
                available: navigation.capacity(),
            }));
        }
        let mr = &self.ctx.resources;
        let states = ContainerBuffer::new(&sizes, &mr.main, &mr.host)?;

        let (detector, field, cfg) = (detector.clone(), *field, self.cfg.clone());
        let (input, nav, output) = (candidates.clone(), navigation.slots().clone(), states.clone());
        let _ = self.ctx.stream.enqueue("fitting kernel", move || {
            let mut slots = nav.read()?.clone();
            let headers = input.headers.read()?;
            let rows = input.items.read()?;
            let fitted = fit_tracks(
                &detector,
                &field,
                &headers,
                &rows,
                &mut slots,
                &cfg,
                Parallelism::Parallel,
            )
            .map_err(TrkxError::stage("fitting"))?;
            nav.store(slots)?;
            let (results, track_states): (Vec<_>, Vec<_>) = fitted.into_iter().unzip();
            output.store(results, track_states)
        })?;
        log::debug!("{}: {} candidates, {} states", self.name(), sizes.headers, sizes.items.iter().sum::<usize>());
        Ok(states)
    }

    fn name(&self) -> &'static str {
        "fitting (device)"
    }
}
