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

//! Triplet seeding.
//!
//! One work item per middle spacepoint: compatible bottom and top doublets are
//! looked up in a radius-sorted index, every bottom/top pair is tested for a
//! common circle, and the best `max_seeds_per_middle` triplets are kept.
//! Output is ordered by middle spacepoint, then by descending weight.

use rayon::prelude::*;

use crate::config::{SeedfilterConfig, SeedfinderConfig};
use crate::edm::{Seed, Spacepoint, wrap_phi};
use crate::{C_GEV_PER_T_MM, Parallelism};

/// Circle in the transverse plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: [f64; 2],
    pub radius: f64,
}

impl Circle {
    /// Distance of closest approach to the beam line.
    pub fn impact_parameter(&self) -> f64 {
        (self.center[0].hypot(self.center[1]) - self.radius).abs()
    }
}

/// Circle through three transverse points; `None` when they are collinear.
pub fn circle_through(b: [f64; 2], m: [f64; 2], t: [f64; 2]) -> Option<Circle> {
    let (ax, ay) = (m[0] - b[0], m[1] - b[1]);
    let (cx, cy) = (t[0] - b[0], t[1] - b[1]);
    let a2 = ax * ax + ay * ay;
    let c2 = cx * cx + cy * cy;
    let det = ax * cy - ay * cx;
    if det.abs() <= 1e-9 * (a2 * c2).sqrt() {
        return None;
    }
    let ux = (cy * a2 - ay * c2) / (2.0 * det);
    let uy = (ax * c2 - cx * a2) / (2.0 * det);
    Some(Circle {
        center: [b[0] + ux, b[1] + uy],
        radius: ux.hypot(uy),
    })
}

/// Turning sense of b -> m -> t: positive when counter-clockwise.
pub fn turning_sense(b: [f64; 2], m: [f64; 2], t: [f64; 2]) -> f64 {
    (m[0] - b[0]) * (t[1] - b[1]) - (m[1] - b[1]) * (t[0] - b[0])
}

pub(crate) fn transverse(sp: &Spacepoint) -> [f64; 2] {
    [sp.x() as f64, sp.y() as f64]
}

/// Distance of the straight line through `a` and `b` from the origin.
fn line_impact(a: [f64; 2], b: [f64; 2]) -> f64 {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    let len = dx.hypot(dy);
    if len == 0.0 {
        return a[0].hypot(a[1]);
    }
    (a[0] * dy - a[1] * dx).abs() / len
}

struct RadialIndex {
    order: Vec<usize>,
    radii: Vec<f32>,
}

impl RadialIndex {
    fn build(spacepoints: &[Spacepoint]) -> Self {
        let mut order: Vec<usize> = (0..spacepoints.len()).collect();
        order.sort_by(|&a, &b| {
            spacepoints[a]
                .radius()
                .total_cmp(&spacepoints[b].radius())
                .then(a.cmp(&b))
        });
        let radii = order.iter().map(|&i| spacepoints[i].radius()).collect();
        Self { order, radii }
    }

    /// Spacepoint indices with radius in `[lo, hi]`.
    fn in_range(&self, lo: f32, hi: f32) -> &[usize] {
        let start = self.radii.partition_point(|&r| r < lo);
        let end = self.radii.partition_point(|&r| r <= hi);
        &self.order[start..end.max(start)]
    }
}

struct Doublet {
    link: usize,
    cot_theta: f32,
}

fn seeds_for_middle(
    spacepoints: &[Spacepoint],
    index: &RadialIndex,
    m: usize,
    finder: &SeedfinderConfig,
    filter: &SeedfilterConfig,
) -> Vec<Seed> {
    let spm = &spacepoints[m];
    let rm = spm.radius();
    let compatible_phi = |sp: &Spacepoint| wrap_phi(sp.phi() - spm.phi()).abs() <= finder.delta_phi_max;

    let bottoms: Vec<Doublet> = index
        .in_range(rm - finder.delta_r_max, rm - finder.delta_r_min)
        .iter()
        .filter(|&&b| b != m)
        .filter_map(|&b| {
            let spb = &spacepoints[b];
            if !compatible_phi(spb) {
                return None;
            }
            let cot_theta = (spm.z() - spb.z()) / (rm - spb.radius());
            if cot_theta.abs() > finder.cot_theta_max {
                return None;
            }
            let z_origin = spm.z() - rm * cot_theta;
            if z_origin < finder.collision_region_min || z_origin > finder.collision_region_max {
                return None;
            }
            Some(Doublet { link: b, cot_theta })
        })
        .collect();
    if bottoms.is_empty() {
        return Vec::new();
    }

    let tops: Vec<Doublet> = index
        .in_range(rm + finder.delta_r_min, rm + finder.delta_r_max)
        .iter()
        .filter(|&&t| t != m)
        .filter_map(|&t| {
            let spt = &spacepoints[t];
            if !compatible_phi(spt) {
                return None;
            }
            let cot_theta = (spt.z() - spm.z()) / (spt.radius() - rm);
            (cot_theta.abs() <= finder.cot_theta_max).then_some(Doublet { link: t, cot_theta })
        })
        .collect();

    let bz = finder.b_field_in_z.abs() as f64;
    let pm = transverse(spm);
    let mut seeds = Vec::new();
    for bottom in &bottoms {
        let spb = &spacepoints[bottom.link];
        let pb = transverse(spb);
        for top in &tops {
            if (bottom.cot_theta - top.cot_theta).abs() > finder.max_cot_theta_difference {
                continue;
            }
            let ptop = transverse(&spacepoints[top.link]);
            let (pt, impact) = match circle_through(pb, pm, ptop) {
                Some(circle) => (C_GEV_PER_T_MM as f64 * bz * circle.radius, circle.impact_parameter()),
                None => (f64::INFINITY, line_impact(pb, ptop)),
            };
            if bz > 0.0 && pt < finder.min_pt as f64 {
                continue;
            }
            if impact > finder.impact_max as f64 {
                continue;
            }
            seeds.push(Seed {
                spb_link: bottom.link as u32,
                spm_link: m as u32,
                spt_link: top.link as u32,
                weight: -(impact as f32) * filter.impact_weight_factor,
                z_vertex: spb.z() - spb.radius() * bottom.cot_theta,
            });
        }
    }
    seeds.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then(a.spb_link.cmp(&b.spb_link))
            .then(a.spt_link.cmp(&b.spt_link))
    });
    seeds.truncate(filter.max_seeds_per_middle as usize);
    seeds
}

/// Find seeds in one event.
pub fn find_seeds(
    spacepoints: &[Spacepoint],
    finder: &SeedfinderConfig,
    filter: &SeedfilterConfig,
    mode: Parallelism,
) -> Vec<Seed> {
    if spacepoints.len() < 3 {
        return Vec::new();
    }
    let index = RadialIndex::build(spacepoints);
    let per_middle = |m: usize| seeds_for_middle(spacepoints, &index, m, finder, filter);
    match mode {
        Parallelism::Sequential => (0..spacepoints.len()).flat_map(per_middle).collect(),
        Parallelism::Parallel => (0..spacepoints.len())
            .into_par_iter()
            .flat_map_iter(per_middle)
            .collect(),
    }
}
