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

// Reconstruction kernels and the event data model they operate on.
// Every kernel is a pure function over flat slices with a sequential and a
// data-parallel (rayon) driver; both produce identical output in identical order.

use thiserror::Error;

pub mod clusterization;
pub mod config;
pub mod edm;
pub mod finding;
pub mod fitting;
pub mod geometry;
pub mod params_estimation;
pub mod propagation;
pub mod seeding;
pub mod spacepoint_formation;

pub use config::{
    FindingConfig, FittingConfig, PropagationConfig, SeedfilterConfig, SeedfinderConfig,
};
pub use edm::{
    BoundTrackParameters, CandidateHeader, Cell, CellModule, FittingResult, INVALID_LINK,
    Measurement, NavigationCandidate, PixelData, Seed, Spacepoint, TrackState,
};
pub use geometry::{ConstantField, Detector, DetectorView, GeometryError, Surface};

/// Speed of light in GeV / (T mm): `pT = C * B * R`.
pub const C_GEV_PER_T_MM: f32 = 0.000_299_792_46;

/// How a kernel driver distributes its work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    /// One item after the other on the calling thread.
    Sequential,
    /// Items spread over the rayon pool.
    Parallel,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KernelError {
    #[error("invalid {what} link {link} (collection holds {len})")]
    InvalidLink {
        what: &'static str,
        link: usize,
        len: usize,
    },

    #[error("navigation buffer too small: {needed} slots needed, {available} available")]
    NavigationOverflow { needed: usize, available: usize },

    #[error("track candidate {0} has no measurements")]
    EmptyCandidate(usize),

    #[error("invalid kernel configuration: {0}")]
    InvalidConfiguration(&'static str),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}
