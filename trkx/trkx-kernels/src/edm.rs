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

// Event data model.
// Plain records shared verbatim by host and device collections; no pointers, no heap.

use std::f32::consts::PI;

use crate::C_GEV_PER_T_MM;

/// Marker for an unresolved link into another collection.
pub const INVALID_LINK: u32 = u32::MAX;

/// One activated readout channel.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Cell {
    pub module_link: u32,
    pub channel0: u32,
    pub channel1: u32,
    pub time: f32,
    pub activation: f32,
}

/// Pixel segmentation of a module.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PixelData {
    pub min_corner_x: f32,
    pub min_corner_y: f32,
    pub pitch_x: f32,
    pub pitch_y: f32,
}

impl PixelData {
    /// Local position of the centre of channel `(c0, c1)`.
    #[inline]
    pub fn channel_position(&self, c0: f32, c1: f32) -> [f32; 2] {
        [
            self.min_corner_x + (c0 + 0.5) * self.pitch_x,
            self.min_corner_y + (c1 + 0.5) * self.pitch_y,
        ]
    }
}

/// Readout module: surface identity, activation threshold and segmentation.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CellModule {
    pub surface_link: u64,
    pub threshold: f32,
    pub pixel: PixelData,
}

/// Clustered 2D position on a detector surface.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurement {
    pub surface_link: u64,
    pub module_link: u32,
    pub local: [f32; 2],
    pub variance: [f32; 2],
}

/// Global 3D point derived from one measurement.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Spacepoint {
    pub module_link: u32,
    pub meas_link: u32,
    pub global: [f32; 3],
}

impl Spacepoint {
    #[inline]
    pub fn x(&self) -> f32 {
        self.global[0]
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.global[1]
    }

    #[inline]
    pub fn z(&self) -> f32 {
        self.global[2]
    }

    /// Transverse radius.
    #[inline]
    pub fn radius(&self) -> f32 {
        self.x().hypot(self.y())
    }

    #[inline]
    pub fn phi(&self) -> f32 {
        self.y().atan2(self.x())
    }
}

/// Spacepoint triplet (bottom, middle, top) believed to come from one particle.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Seed {
    pub spb_link: u32,
    pub spm_link: u32,
    pub spt_link: u32,
    pub weight: f32,
    pub z_vertex: f32,
}

impl Seed {
    /// Links are distinct and resolve into a collection of `n_spacepoints`.
    pub fn is_valid(&self, n_spacepoints: usize) -> bool {
        let links = [self.spb_link, self.spm_link, self.spt_link];
        links.iter().all(|&l| (l as usize) < n_spacepoints)
            && self.spb_link != self.spm_link
            && self.spm_link != self.spt_link
            && self.spb_link != self.spt_link
    }
}

/// Track state bound to a surface: local position, direction, charge over momentum, time.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundTrackParameters {
    pub surface_link: u64,
    pub loc: [f32; 2],
    pub phi: f32,
    pub theta: f32,
    pub qop: f32,
    pub time: f32,
}

impl BoundTrackParameters {
    /// Charge sign; neutral-like (qop == 0) states count as positive.
    pub fn charge(&self) -> f32 {
        if self.qop < 0.0 { -1.0 } else { 1.0 }
    }

    /// Momentum in GeV; infinite for straight tracks.
    pub fn p(&self) -> f32 {
        if self.qop == 0.0 {
            f32::INFINITY
        } else {
            (1.0 / self.qop).abs()
        }
    }

    pub fn pt(&self) -> f32 {
        self.p() * self.theta.sin()
    }

    /// Transverse turning rate dphi/ds (1/mm) in a field `bz` (T).
    pub fn omega(&self, bz: f32) -> f32 {
        let sin_theta = self.theta.sin();
        if sin_theta.abs() < f32::EPSILON {
            return 0.0;
        }
        -C_GEV_PER_T_MM * bz * self.qop / sin_theta
    }
}

/// Header of one track candidate: the seed it grew from and its starting parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CandidateHeader {
    pub seed_index: u32,
    pub seed_params: BoundTrackParameters,
}

/// Header of one fitted track.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FittingResult {
    pub fit_params: BoundTrackParameters,
    pub ndf: f32,
    pub chi2: f32,
}

/// Filtered state at one measurement of a fitted track.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrackState {
    pub measurement: Measurement,
    pub filtered: BoundTrackParameters,
    pub chi2: f32,
}

/// Per-track navigation scratch slot written by finding and fitting.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NavigationCandidate {
    pub track: u32,
    pub surface_index: u32,
    pub n_links: u32,
    pub chi2: f32,
}

/// Wrap an angle into (-pi, pi].
#[inline]
pub fn wrap_phi(phi: f32) -> f32 {
    let mut p = phi;
    while p > PI {
        p -= 2.0 * PI;
    }
    while p <= -PI {
        p += 2.0 * PI;
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spacepoint_radius_and_phi() {
        let sp = Spacepoint {
            global: [3.0, 4.0, 10.0],
            ..Default::default()
        };
        assert!((sp.radius() - 5.0).abs() < 1e-6);
        assert!((sp.phi() - 4.0f32.atan2(3.0)).abs() < 1e-6);
    }

    #[test]
    fn seed_validity() {
        let seed = Seed {
            spb_link: 0,
            spm_link: 1,
            spt_link: 2,
            ..Default::default()
        };
        assert!(seed.is_valid(3));
        assert!(!seed.is_valid(2));
        let dup = Seed { spt_link: 1, ..seed };
        assert!(!dup.is_valid(3));
    }

    #[test]
    fn straight_parameters_have_infinite_momentum() {
        let p = BoundTrackParameters {
            theta: 1.0,
            ..Default::default()
        };
        assert!(p.p().is_infinite());
        assert_eq!(p.omega(2.0), 0.0);
        assert_eq!(p.charge(), 1.0);
    }

    #[test]
    fn wrap_phi_range() {
        assert!((wrap_phi(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-5);
        assert!((wrap_phi(-3.0 * PI / 2.0) - PI / 2.0).abs() < 1e-5);
        assert_eq!(wrap_phi(PI), PI);
    }
}
