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

//! Cross-path comparison of stage outputs.
//!
//! Collections are compared order-independently: each CPU element takes the
//! closest still-unmatched device element that agrees within the relative
//! uncertainty `|a - b| <= u * max(|a|, |b|, 1)`. Identifiers and links must
//! agree exactly. The result is a statistic, never an error.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use trkx_kernels::edm::wrap_phi;
use trkx_kernels::{
    BoundTrackParameters, CandidateHeader, FittingResult, Measurement, Seed, Spacepoint,
};

use crate::device::HostContainer;

/// Relative uncertainties at which collections are compared.
pub const UNCERTAINTY_LADDER: [f32; 4] = [1e-4, 1e-3, 1e-2, 5e-2];

/// Bitwise-agnostic equality: NaN equals NaN, `-0.0` equals `0.0`.
#[inline]
fn same_value(a: f32, b: f32) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// Relative agreement of two scalars.
#[inline]
pub fn within(a: f32, b: f32, uncertainty: f32) -> bool {
    same_value(a, b) || (a - b).abs() <= uncertainty * a.abs().max(b.abs()).max(1.0)
}

/// Agreement of two angles, compared on the circle.
#[inline]
fn angle_within(a: f32, b: f32, uncertainty: f32) -> bool {
    same_value(a, b) || wrap_phi(a - b).abs() <= uncertainty * a.abs().max(b.abs()).max(1.0)
}

fn relative(a: f32, b: f32) -> f32 {
    if same_value(a, b) {
        return 0.0;
    }
    (a - b).abs() / a.abs().max(b.abs()).max(1.0)
}

fn angle_distance(a: f32, b: f32) -> f32 {
    if same_value(a, b) { 0.0 } else { wrap_phi(a - b).abs() }
}

/// Element that can be matched across paths.
pub trait Comparable {
    fn matches(&self, other: &Self, uncertainty: f32) -> bool;

    /// Ordering key among candidates that match; smaller is closer.
    fn distance(&self, other: &Self) -> f32;
}

impl Comparable for Seed {
    fn matches(&self, other: &Self, u: f32) -> bool {
        self.spb_link == other.spb_link
            && self.spm_link == other.spm_link
            && self.spt_link == other.spt_link
            && within(self.weight, other.weight, u)
            && within(self.z_vertex, other.z_vertex, u)
    }

    fn distance(&self, other: &Self) -> f32 {
        relative(self.weight, other.weight) + relative(self.z_vertex, other.z_vertex)
    }
}

impl Comparable for Spacepoint {
    fn matches(&self, other: &Self, u: f32) -> bool {
        self.module_link == other.module_link
            && self.global.iter().zip(&other.global).all(|(a, b)| within(*a, *b, u))
    }

    fn distance(&self, other: &Self) -> f32 {
        self.global
            .iter()
            .zip(&other.global)
            .map(|(a, b)| relative(*a, *b))
            .sum()
    }
}

impl Comparable for Measurement {
    fn matches(&self, other: &Self, u: f32) -> bool {
        self.surface_link == other.surface_link
            && self.module_link == other.module_link
            && within(self.local[0], other.local[0], u)
            && within(self.local[1], other.local[1], u)
            && within(self.variance[0], other.variance[0], u)
            && within(self.variance[1], other.variance[1], u)
    }

    fn distance(&self, other: &Self) -> f32 {
        relative(self.local[0], other.local[0]) + relative(self.local[1], other.local[1])
    }
}

impl Comparable for BoundTrackParameters {
    fn matches(&self, other: &Self, u: f32) -> bool {
        self.surface_link == other.surface_link
            && within(self.loc[0], other.loc[0], u)
            && within(self.loc[1], other.loc[1], u)
            && angle_within(self.phi, other.phi, u)
            && within(self.theta, other.theta, u)
            && within(self.qop, other.qop, u)
            && within(self.time, other.time, u)
    }

    fn distance(&self, other: &Self) -> f32 {
        relative(self.loc[0], other.loc[0])
            + relative(self.loc[1], other.loc[1])
            + angle_distance(self.phi, other.phi)
            + relative(self.theta, other.theta)
            + relative(self.qop, other.qop)
    }
}

impl Comparable for CandidateHeader {
    fn matches(&self, other: &Self, u: f32) -> bool {
        self.seed_index == other.seed_index && self.seed_params.matches(&other.seed_params, u)
    }

    fn distance(&self, other: &Self) -> f32 {
        self.seed_params.distance(&other.seed_params)
    }
}

impl Comparable for FittingResult {
    fn matches(&self, other: &Self, u: f32) -> bool {
        self.ndf == other.ndf
            && self.fit_params.matches(&other.fit_params, u)
            && within(self.chi2, other.chi2, u)
    }

    fn distance(&self, other: &Self) -> f32 {
        self.fit_params.distance(&other.fit_params) + relative(self.chi2, other.chi2)
    }
}

/// Outcome of one comparison at one uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchReport {
    pub uncertainty: f32,
    pub matched: usize,
    pub unmatched_cpu: usize,
    pub unmatched_device: usize,
    /// `matched / cpu`; 1 when both sides are empty, 0 when only the CPU side is.
    pub rate: f32,
}

impl MatchReport {
    fn new(uncertainty: f32, matched: usize, n_cpu: usize, n_device: usize) -> Self {
        let rate = if n_cpu == 0 {
            if n_device == 0 { 1.0 } else { 0.0 }
        } else {
            matched as f32 / n_cpu as f32
        };
        Self {
            uncertainty,
            matched,
            unmatched_cpu: n_cpu - matched,
            unmatched_device: n_device.saturating_sub(matched),
            rate,
        }
    }
}

impl fmt::Display for MatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>7.2}% matched at {:e} ({} cpu-only, {} device-only)",
            self.rate * 100.0,
            self.uncertainty,
            self.unmatched_cpu,
            self.unmatched_device
        )
    }
}

/// Named comparator evaluated at a ladder of uncertainties.
#[derive(Debug, Clone)]
pub struct CollectionComparator {
    name: String,
    ladder: Vec<f32>,
}

impl CollectionComparator {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ladder: UNCERTAINTY_LADDER.to_vec(),
        }
    }

    pub fn with_ladder(mut self, ladder: &[f32]) -> Self {
        self.ladder = ladder.to_vec();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// One report per ladder step; rates never decrease along the ladder.
    pub fn compare<T: Comparable>(&self, cpu: &[T], device: &[T]) -> Vec<MatchReport> {
        let reports: Vec<MatchReport> = self
            .ladder
            .iter()
            .map(|&u| MatchReport::new(u, count_matches(cpu, device, u), cpu.len(), device.len()))
            .collect();
        for report in &reports {
            log::info!("{}: {}", self.name, report);
        }
        reports
    }
}

fn count_matches<T: Comparable>(cpu: &[T], device: &[T], u: f32) -> usize {
    let mut used = vec![false; device.len()];
    let mut matched = 0;
    for (i, c) in cpu.iter().enumerate() {
        // same position first; both paths usually emit the same order
        if let Some(d) = device.get(i)
            && !used[i]
            && c.matches(d, u)
            && c.distance(d) == 0.0
        {
            used[i] = true;
            matched += 1;
            continue;
        }
        let best = device
            .iter()
            .enumerate()
            .filter(|(j, d)| !used[*j] && c.matches(d, u))
            .min_by(|(_, a), (_, b)| c.distance(a).total_cmp(&c.distance(b)))
            .map(|(j, _)| j);
        if let Some(j) = best {
            used[j] = true;
            matched += 1;
        }
    }
    matched
}

/// When two track candidates count as the same object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub enum CandidatePredicate {
    /// Same measurements in the same order.
    ExactSequence,
    /// Same measurements in any order.
    #[default]
    SameMeasurements,
    /// At least `min_fraction` of the longer candidate's measurements shared.
    Overlap { min_fraction: f32 },
}

/// How CPU candidates claim device candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum Pairing {
    /// A device candidate may match any number of CPU candidates.
    #[default]
    FirstMatch,
    /// One-to-one.
    Exclusive,
}

pub(crate) type MeasurementKey = (u64, u32, u32, u32);

/// Bits of `x` with signed zeros and NaN payloads folded together.
fn canonical_bits(x: f32) -> u32 {
    if x == 0.0 {
        0
    } else if x.is_nan() {
        f32::NAN.to_bits()
    } else {
        x.to_bits()
    }
}

/// Exact identity of a measurement, used for hashing and sorting.
pub(crate) fn key(m: &Measurement) -> MeasurementKey {
    (
        m.surface_link,
        m.module_link,
        canonical_bits(m.local[0]),
        canonical_bits(m.local[1]),
    )
}

fn sorted_keys(items: &[Measurement]) -> Vec<MeasurementKey> {
    let mut keys: Vec<_> = items.iter().map(key).collect();
    keys.sort_unstable();
    keys
}

impl CandidatePredicate {
    pub fn holds(&self, a: &[Measurement], b: &[Measurement]) -> bool {
        match *self {
            CandidatePredicate::ExactSequence => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| key(x) == key(y))
            }
            CandidatePredicate::SameMeasurements => sorted_keys(a) == sorted_keys(b),
            CandidatePredicate::Overlap { min_fraction } => {
                let longest = a.len().max(b.len());
                if longest == 0 {
                    return true;
                }
                let mut pool: HashMap<MeasurementKey, usize> = HashMap::new();
                for m in b {
                    *pool.entry(key(m)).or_default() += 1;
                }
                let shared = a
                    .iter()
                    .filter(|m| match pool.get_mut(&key(m)) {
                        Some(n) if *n > 0 => {
                            *n -= 1;
                            true
                        }
                        _ => false,
                    })
                    .count();
                shared as f32 >= min_fraction * longest as f32
            }
        }
    }
}

/// Fraction of CPU candidates with a matching device candidate.
pub fn compare_candidates(
    cpu: &HostContainer<CandidateHeader, Measurement>,
    device: &HostContainer<CandidateHeader, Measurement>,
    predicate: CandidatePredicate,
    pairing: Pairing,
) -> MatchReport {
    let mut claimed = vec![false; device.len()];
    let mut matched = 0;
    for a in cpu.items() {
        let hit = device
            .items()
            .iter()
            .enumerate()
            .find(|(j, b)| (pairing == Pairing::FirstMatch || !claimed[*j]) && predicate.holds(a, b))
            .map(|(j, _)| j);
        if let Some(j) = hit {
            claimed[j] = true;
            matched += 1;
        }
    }
    let mut report = MatchReport::new(0.0, matched, cpu.len(), device.len());
    report.unmatched_device = claimed.iter().filter(|c| !**c).count();
    report
}
