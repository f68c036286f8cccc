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

// Reconstruction stages (Strategy Pattern)
//
// One trait per stage, generic over the execution space. The host variant
// works on plain vectors; the accelerator variant takes device buffers and
// issues its kernel on the stream, returning before the work ran.

use trkx_kernels::{
    BoundTrackParameters, CandidateHeader, CellModule, ConstantField, DetectorView,
    FittingResult, Measurement, NavigationCandidate, Seed, Spacepoint, TrackState,
};

use crate::config::ChainConfig;
use crate::device::{Buffer, ContainerBuffer, DeviceContext, Element, HostContainer, NavigationBuffer};
use crate::error::Result;

pub mod device;
pub mod host;

pub use device::{DeviceFinding, DeviceFitting, DeviceParamsEstimation, DeviceSeeding};
pub use host::{HostFinding, HostFitting, HostParamsEstimation, HostSeeding};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Runs to completion on the calling thread.
    HostOnly,
    /// Issues work on a device stream.
    DeviceStream,
}

/// Where a stage runs, and the collection types it consumes and produces there.
pub trait ExecutionSpace: Send + Sync + 'static {
    type Collection<T: Element>: Send;
    type Container<H: Element, I: Element>: Send;
    type Navigation: Send;

    const CAPABILITY: Capability;
    /// Directory and timer label of this path.
    const LABEL: &'static str;
}

pub struct Host;

pub struct Accelerator;

impl ExecutionSpace for Host {
    type Collection<T: Element> = Vec<T>;
    type Container<H: Element, I: Element> = HostContainer<H, I>;
    type Navigation = Vec<NavigationCandidate>;

    const CAPABILITY: Capability = Capability::HostOnly;
    const LABEL: &'static str = "cpu";
}

impl ExecutionSpace for Accelerator {
    type Collection<T: Element> = Buffer<T>;
    type Container<H: Element, I: Element> = ContainerBuffer<H, I>;
    type Navigation = NavigationBuffer;

    const CAPABILITY: Capability = Capability::DeviceStream;
    const LABEL: &'static str = "device";
}

pub type TrackCandidates<S> = <S as ExecutionSpace>::Container<CandidateHeader, Measurement>;
pub type TrackStates<S> = <S as ExecutionSpace>::Container<FittingResult, TrackState>;

pub trait SeedingAlgorithm<S: ExecutionSpace>: Send + Sync {
    fn run(&self, spacepoints: &S::Collection<Spacepoint>) -> Result<S::Collection<Seed>>;

    fn name(&self) -> &'static str;
}

pub trait TrackParamsEstimation<S: ExecutionSpace>: Send + Sync {
    /// One parameter set per seed, in seed order.
    fn run(
        &self,
        spacepoints: &S::Collection<Spacepoint>,
        modules: &S::Collection<CellModule>,
        seeds: &S::Collection<Seed>,
        bfield: [f32; 3],
    ) -> Result<S::Collection<BoundTrackParameters>>;

    fn name(&self) -> &'static str;
}

pub trait TrackFinding<S: ExecutionSpace>: Send + Sync {
    /// `navigation` holds `navigation_buffer_size_scaler` slots per parameter set.
    fn run(
        &self,
        detector: &DetectorView,
        field: &ConstantField,
        navigation: &mut S::Navigation,
        measurements: &S::Collection<Measurement>,
        params: &S::Collection<BoundTrackParameters>,
    ) -> Result<TrackCandidates<S>>;

    fn name(&self) -> &'static str;
}

pub trait TrackFitting<S: ExecutionSpace>: Send + Sync {
    /// `navigation` is the buffer used by finding; one slot per candidate is rewritten.
    fn run(
        &self,
        detector: &DetectorView,
        field: &ConstantField,
        navigation: &mut S::Navigation,
        candidates: &TrackCandidates<S>,
    ) -> Result<TrackStates<S>>;

    fn name(&self) -> &'static str;
}

/// The four stages of one path.
pub struct StageSet<S: ExecutionSpace> {
    pub seeding: Box<dyn SeedingAlgorithm<S>>,
    pub params: Box<dyn TrackParamsEstimation<S>>,
    pub finding: Box<dyn TrackFinding<S>>,
    pub fitting: Box<dyn TrackFitting<S>>,
}

impl<S: ExecutionSpace> StageSet<S> {
    pub fn names(&self) -> [&'static str; 4] {
        [
            self.seeding.name(),
            self.params.name(),
            self.finding.name(),
            self.fitting.name(),
        ]
    }
}

impl StageSet<Host> {
    pub fn from_config(config: &ChainConfig) -> Self {
        Self {
            seeding: Box::new(HostSeeding::new(config.seedfinder.clone(), config.seedfilter.clone())),
            params: Box::new(HostParamsEstimation::new()),
            finding: Box::new(HostFinding::new(config.finding.clone())),
            fitting: Box::new(HostFitting::new(config.fitting.clone())),
        }
    }
}

impl StageSet<Accelerator> {
    pub fn from_config(config: &ChainConfig, ctx: DeviceContext) -> Self {
        Self {
            seeding: Box::new(DeviceSeeding::new(
                config.seedfinder.clone(),
                config.seedfilter.clone(),
                ctx.clone(),
            )),
            params: Box::new(DeviceParamsEstimation::new(ctx.clone())),
            finding: Box::new(DeviceFinding::new(config.finding.clone(), ctx.clone())),
            fitting: Box::new(DeviceFitting::new(config.fitting.clone(), ctx)),
        }
    }
}
