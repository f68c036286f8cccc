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

//! Initial track parameters from seeds.
//!
//! The transverse direction is the tangent of the seed circle at the bottom
//! spacepoint, the charge follows the turning sense and the field sign, and the
//! polar angle comes from the bottom-top chord. Collinear seeds get `qop = 0`.

use rayon::prelude::*;

use crate::edm::{BoundTrackParameters, CellModule, Seed, Spacepoint};
use crate::seeding::{circle_through, transverse, turning_sense};
use crate::{C_GEV_PER_T_MM, KernelError, Parallelism};

fn link<'a, T>(items: &'a [T], link: u32, what: &'static str) -> Result<&'a T, KernelError> {
    items.get(link as usize).ok_or(KernelError::InvalidLink {
        what,
        link: link as usize,
        len: items.len(),
    })
}

pub fn seed_to_bound(
    spacepoints: &[Spacepoint],
    modules: &[CellModule],
    seed: &Seed,
    bz: f32,
) -> Result<BoundTrackParameters, KernelError> {
    let spb = link(spacepoints, seed.spb_link, "seed bottom spacepoint")?;
    let spm = link(spacepoints, seed.spm_link, "seed middle spacepoint")?;
    let spt = link(spacepoints, seed.spt_link, "seed top spacepoint")?;
    let module = link(modules, spb.module_link, "spacepoint module")?;

    let (b, m, t) = (transverse(spb), transverse(spm), transverse(spt));
    let (phi, pt, charge) = match circle_through(b, m, t) {
        Some(circle) => {
            let mut tangent = [-(b[1] - circle.center[1]), b[0] - circle.center[0]];
            if tangent[0] * (m[0] - b[0]) + tangent[1] * (m[1] - b[1]) < 0.0 {
                tangent = [-tangent[0], -tangent[1]];
            }
            let ccw = turning_sense(b, m, t) > 0.0;
            let charge = if ccw == (bz > 0.0) { -1.0 } else { 1.0 };
            let pt = C_GEV_PER_T_MM as f64 * (bz.abs() as f64) * circle.radius;
            (tangent[1].atan2(tangent[0]), pt, charge)
        }
        None => ((m[1] - b[1]).atan2(m[0] - b[0]), f64::INFINITY, 1.0),
    };

    let chord = (t[0] - b[0]).hypot(t[1] - b[1]);
    let theta = chord.atan2((spt.z() - spb.z()) as f64);
    let qop = if pt.is_finite() && pt > 0.0 {
        charge * theta.sin() / pt
    } else {
        0.0
    };

    Ok(BoundTrackParameters {
        surface_link: module.surface_link,
        loc: [spb.radius() * spb.phi(), spb.z()],
        phi: phi as f32,
        theta: theta as f32,
        qop: qop as f32,
        time: 0.0,
    })
}

/// One parameter set per seed, in seed order.
pub fn estimate_track_params(
    spacepoints: &[Spacepoint],
    modules: &[CellModule],
    seeds: &[Seed],
    bfield: [f32; 3],
    mode: Parallelism,
) -> Result<Vec<BoundTrackParameters>, KernelError> {
    let run = |seed: &Seed| seed_to_bound(spacepoints, modules, seed, bfield[2]);
    match mode {
        Parallelism::Sequential => seeds.iter().map(run).collect(),
        Parallelism::Parallel => seeds.par_iter().map(run).collect(),
    }
}
