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

//! Helix transport in a constant solenoid field between cylindrical surfaces.
//!
//! Parametrised by the transverse path length `s`; the azimuth of the direction
//! advances as `phi(s) = phi0 + omega * s`.

use std::f64::consts::PI;

use crate::config::PropagationConfig;
use crate::edm::{BoundTrackParameters, wrap_phi};
use crate::geometry::Surface;

#[derive(Debug, Clone, Copy)]
pub struct Helix {
    origin: [f64; 3],
    phi0: f64,
    cot_theta: f64,
    omega: f64,
}

impl Helix {
    pub fn new(origin: [f64; 3], phi0: f64, cot_theta: f64, omega: f64) -> Self {
        Self {
            origin,
            phi0,
            cot_theta,
            omega,
        }
    }

    /// Helix through the global position of `params` on `surface`.
    pub fn from_bound(params: &BoundTrackParameters, surface: &Surface, bz: f32) -> Self {
        let g = surface.local_to_global(params.loc);
        let theta = params.theta as f64;
        Self {
            origin: [g[0] as f64, g[1] as f64, g[2] as f64],
            phi0: params.phi as f64,
            cot_theta: theta.cos() / theta.sin(),
            omega: params.omega(bz) as f64,
        }
    }

    fn is_straight(&self, s: f64) -> bool {
        (self.omega * s).abs() < 1e-9
    }

    pub fn position(&self, s: f64) -> [f64; 3] {
        let [x0, y0, z0] = self.origin;
        let z = z0 + s * self.cot_theta;
        if self.is_straight(s) {
            return [x0 + s * self.phi0.cos(), y0 + s * self.phi0.sin(), z];
        }
        let phi = self.phi0 + self.omega * s;
        [
            x0 + (phi.sin() - self.phi0.sin()) / self.omega,
            y0 - (phi.cos() - self.phi0.cos()) / self.omega,
            z,
        ]
    }

    pub fn direction_phi(&self, s: f64) -> f64 {
        self.phi0 + self.omega * s
    }

    /// Smallest positive transverse path at which the helix reaches `radius`.
    pub fn path_to_radius(&self, radius: f64, cfg: &PropagationConfig) -> Option<f64> {
        let [x0, y0, _] = self.origin;
        let pd = x0 * self.phi0.cos() + y0 * self.phi0.sin();
        let c = x0 * x0 + y0 * y0 - radius * radius;
        let disc = pd * pd - c;
        if disc < 0.0 {
            return None;
        }
        let mut s = -pd + disc.sqrt();
        if s <= 0.0 {
            return None;
        }
        let tolerance = cfg.path_tolerance as f64;
        for _ in 0..cfg.max_iterations {
            let [x, y, _] = self.position(s);
            let phi = self.direction_phi(s);
            let f = x * x + y * y - radius * radius;
            let df = 2.0 * (x * phi.cos() + y * phi.sin());
            if df.abs() < 1e-12 {
                return None;
            }
            let step = f / df;
            s -= step;
            if s <= 0.0 || s > cfg.max_path_length as f64 || (self.omega * s).abs() > PI {
                return None;
            }
            if step.abs() < tolerance {
                return Some(s);
            }
        }
        None
    }
}

/// Transport `params` from `from` to the (outer) surface `to`.
///
/// Returns the bound state on `to` and the transverse path length, or `None`
/// when the surface is not reached within its z extent.
pub fn propagate_to_surface(
    params: &BoundTrackParameters,
    from: &Surface,
    to: &Surface,
    bz: f32,
    cfg: &PropagationConfig,
) -> Option<(BoundTrackParameters, f32)> {
    let helix = Helix::from_bound(params, from, bz);
    let s = helix.path_to_radius(to.radius as f64, cfg)?;
    let [x, y, z] = helix.position(s);
    if !to.contains_z(z as f32) {
        return None;
    }
    let out = BoundTrackParameters {
        surface_link: to.geometry_id,
        loc: [to.radius * (y.atan2(x) as f32), z as f32],
        phi: wrap_phi(helix.direction_phi(s) as f32),
        ..*params
    };
    Some((out, s as f32))
}
