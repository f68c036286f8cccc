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

//! Combinatorial track finding.
//!
//! Each seed's parameters are followed outwards surface by surface. On every
//! surface the prediction is gated against the measurements with a chi2 cut;
//! each compatible measurement (up to `max_num_branches_per_surface`) spawns a
//! branch, no compatible measurement counts as a hole. The live branches of a
//! track are bounded by its slots in the navigation buffer
//! (`navigation_buffer_size_scaler` per seed), best branches first.

use std::f32::consts::PI;

use rayon::prelude::*;

use crate::config::FindingConfig;
use crate::edm::{BoundTrackParameters, CandidateHeader, Measurement, NavigationCandidate, wrap_phi};
use crate::geometry::{ConstantField, DetectorView};
use crate::propagation::propagate_to_surface;
use crate::{KernelError, Parallelism};

/// One found candidate: header plus its measurements in surface order.
pub type FoundTrack = (CandidateHeader, Vec<Measurement>);

/// Measurements grouped by surface (radial order) and azimuthal bin.
#[derive(Debug)]
pub struct MeasurementIndex {
    bins: Vec<Vec<Vec<u32>>>,
    max_variance: Vec<f32>,
    phi_bins: usize,
}

impl MeasurementIndex {
    pub fn build(measurements: &[Measurement], detector: &DetectorView) -> Result<Self, KernelError> {
        let phi_bins = detector.phi_bins().max(1) as usize;
        let mut bins = vec![vec![Vec::new(); phi_bins]; detector.len()];
        let mut max_variance = vec![0.0f32; detector.len()];
        for (i, m) in measurements.iter().enumerate() {
            let s = detector
                .surface_index(m.surface_link)
                .ok_or(crate::geometry::GeometryError::UnknownSurface(m.surface_link))?;
            let radius = detector.surfaces()[s].radius;
            bins[s][Self::bin(phi_bins, m.local[0] / radius)].push(i as u32);
            max_variance[s] = max_variance[s].max(m.variance[0]);
        }
        Ok(Self {
            bins,
            max_variance,
            phi_bins,
        })
    }

    fn bin(phi_bins: usize, phi: f32) -> usize {
        let u = (wrap_phi(phi) + PI) / (2.0 * PI);
        ((u * phi_bins as f32) as usize).min(phi_bins - 1)
    }

    /// Measurements on `surface` within `half_width` (rad) of `phi`.
    fn around(&self, surface: usize, phi: f32, half_width: f32) -> Vec<u32> {
        let bins = &self.bins[surface];
        if self.phi_bins == 1 {
            return bins[0].clone();
        }
        let width = 2.0 * PI / self.phi_bins as f32;
        let lo = ((wrap_phi(phi) + PI - half_width) / width).floor() as i64;
        let hi = ((wrap_phi(phi) + PI + half_width) / width).floor() as i64;
        if hi - lo + 1 >= self.phi_bins as i64 {
            return bins.iter().flatten().copied().collect();
        }
        (lo..=hi)
            .flat_map(|k| bins[k.rem_euclid(self.phi_bins as i64) as usize].iter().copied())
            .collect()
    }
}

/// Gating chi2 of a prediction against a measurement on a cylinder of `radius`.
pub fn residual_chi2(
    predicted: &BoundTrackParameters,
    measurement: &Measurement,
    radius: f32,
    prediction_variance: [f32; 2],
) -> f32 {
    let d0 = radius * wrap_phi((predicted.loc[0] - measurement.local[0]) / radius);
    let d1 = predicted.loc[1] - measurement.local[1];
    d0 * d0 / (measurement.variance[0] + prediction_variance[0])
        + d1 * d1 / (measurement.variance[1] + prediction_variance[1])
}

#[derive(Debug, Clone)]
struct Branch {
    params: BoundTrackParameters,
    surface: usize,
    links: Vec<u32>,
    chi2: f32,
    holes: u32,
    alive: bool,
}

struct Finder<'a> {
    detector: &'a DetectorView,
    bz: f32,
    measurements: &'a [Measurement],
    index: MeasurementIndex,
    cfg: &'a FindingConfig,
}

impl Finder<'_> {
    fn extend(&self, branch: Branch, s_idx: usize, out: &mut Vec<Branch>) {
        if !branch.alive {
            out.push(branch);
            return;
        }
        let surfaces = self.detector.surfaces();
        let target = &surfaces[s_idx];
        let predicted = if s_idx == branch.surface {
            Some(branch.params)
        } else {
            propagate_to_surface(
                &branch.params,
                &surfaces[branch.surface],
                target,
                self.bz,
                &self.cfg.propagation,
            )
            .map(|(p, _)| p)
        };
        let Some(predicted) = predicted else {
            out.push(Branch {
                alive: false,
                ..branch
            });
            return;
        };

        if branch.links.len() >= self.cfg.max_track_candidates_per_track as usize {
            out.push(Branch {
                alive: false,
                ..branch
            });
            return;
        }

        let pv = self.cfg.prediction_variance;
        let half_width = (self.cfg.chi2_max * (self.index.max_variance[s_idx] + pv[0])).sqrt()
            / target.radius;
        let mut compatible: Vec<(f32, u32)> = self
            .index
            .around(s_idx, predicted.loc[0] / target.radius, half_width)
            .into_iter()
            .filter_map(|mi| {
                let chi2 = residual_chi2(&predicted, &self.measurements[mi as usize], target.radius, pv);
                (chi2 <= self.cfg.chi2_max).then_some((chi2, mi))
            })
            .collect();
        compatible.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        compatible.truncate(self.cfg.max_num_branches_per_surface as usize);

        if compatible.is_empty() {
            let holes = branch.holes + 1;
            if holes > self.cfg.max_num_skipping_per_cand {
                out.push(Branch {
                    alive: false,
                    ..branch
                });
            } else {
                out.push(Branch {
                    params: predicted,
                    surface: s_idx,
                    holes,
                    ..branch
                });
            }
            return;
        }

        for (chi2, mi) in compatible {
            let m = &self.measurements[mi as usize];
            let mut links = branch.links.clone();
            links.push(mi);
            out.push(Branch {
                params: BoundTrackParameters {
                    loc: m.local,
                    ..predicted
                },
                surface: s_idx,
                links,
                chi2: branch.chi2 + chi2,
                holes: branch.holes,
                alive: true,
            });
        }
    }

    fn follow(
        &self,
        track: usize,
        params: &BoundTrackParameters,
        slots: &mut [NavigationCandidate],
    ) -> Vec<FoundTrack> {
        let Some(start) = self.detector.surface_index(params.surface_link) else {
            return Vec::new();
        };
        let mut branches = vec![Branch {
            params: *params,
            surface: start,
            links: Vec::new(),
            chi2: 0.0,
            holes: 0,
            alive: true,
        }];
        for s_idx in start..self.detector.len() {
            let mut next = Vec::with_capacity(branches.len());
            for branch in branches {
                self.extend(branch, s_idx, &mut next);
            }
            next.sort_by(|a, b| {
                b.links
                    .len()
                    .cmp(&a.links.len())
                    .then(a.chi2.total_cmp(&b.chi2))
            });
            next.truncate(slots.len());
            for (slot, branch) in slots.iter_mut().zip(&next) {
                *slot = NavigationCandidate {
                    track: track as u32,
                    surface_index: s_idx as u32,
                    n_links: branch.links.len() as u32,
                    chi2: branch.chi2,
                };
            }
            branches = next;
        }

        let header = CandidateHeader {
            seed_index: track as u32,
            seed_params: *params,
        };
        branches
            .into_iter()
            .filter(|b| b.links.len() >= self.cfg.min_track_candidates_per_track as usize)
            .map(|b| {
                let items = b
                    .links
                    .iter()
                    .map(|&mi| self.measurements[mi as usize])
                    .collect();
                (header, items)
            })
            .collect()
    }
}

/// Find track candidates for every parameter set.
///
/// `navigation` must hold at least `navigation_buffer_size_scaler` slots per
/// parameter set. Candidates are ordered by seed, then best first.
pub fn find_tracks(
    detector: &DetectorView,
    field: &ConstantField,
    measurements: &[Measurement],
    params: &[BoundTrackParameters],
    navigation: &mut [NavigationCandidate],
    cfg: &FindingConfig,
    mode: Parallelism,
) -> Result<Vec<FoundTrack>, KernelError> {
    let scaler = cfg.navigation_buffer_size_scaler as usize;
    if scaler == 0 {
        return Err(KernelError::InvalidConfiguration(
            "navigation_buffer_size_scaler must be positive",
        ));
    }
    let needed = params.len() * scaler;
    if navigation.len() < needed {
        return Err(KernelError::NavigationOverflow {
            needed,
            available: navigation.len(),
        });
    }
    let finder = Finder {
        detector,
        bz: field.bz(),
        measurements,
        index: MeasurementIndex::build(measurements, detector)?,
        cfg,
    };
    let slots = &mut navigation[..needed];
    Ok(match mode {
        Parallelism::Sequential => params
            .iter()
            .zip(slots.chunks_mut(scaler))
            .enumerate()
            .flat_map(|(i, (p, s))| finder.follow(i, p, s))
            .collect(),
        Parallelism::Parallel => params
            .par_iter()
            .zip(slots.par_chunks_mut(scaler))
            .enumerate()
            .flat_map_iter(|(i, (p, s))| finder.follow(i, p, s))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Detector, Surface};

    fn barrel() -> Detector {
        let surfaces = [30.0, 70.0, 110.0, 150.0]
            .iter()
            .enumerate()
            .map(|(i, &r)| Surface {
                geometry_id: i as u64 + 1,
                radius: r,
                half_length: 500.0,
                thickness_x0: 0.0,
            })
            .collect();
        Detector::new(surfaces).unwrap()
    }

    fn measurement_on(det: &Detector, surface: usize, phi: f32, z: f32) -> Measurement {
        let s = det.surfaces()[surface];
        Measurement {
            surface_link: s.geometry_id,
            module_link: surface as u32,
            local: [s.radius * phi, z],
            variance: [0.0025, 0.0025],
        }
    }

    fn straight_params(phi: f32) -> BoundTrackParameters {
        BoundTrackParameters {
            surface_link: 1,
            loc: [30.0 * phi, 15.0],
            phi,
            theta: 2.0f32.atan(),
            qop: 0.0,
            time: 0.0,
        }
    }

    fn radial_track(det: &Detector, phi: f32) -> Vec<Measurement> {
        det.surfaces()
            .iter()
            .enumerate()
            .map(|(i, s)| measurement_on(det, i, phi, 0.5 * s.radius))
            .collect()
    }

    #[test]
    fn follows_a_straight_track() {
        let det = barrel();
        let measurements = radial_track(&det, 0.3);
        let mut nav = vec![NavigationCandidate::default(); 5];
        let found = find_tracks(
            &det.view(),
            &ConstantField::along_z(2.0),
            &measurements,
            &[straight_params(0.3)],
            &mut nav,
            &FindingConfig::default(),
            Parallelism::Sequential,
        )
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].1, measurements);
        assert_eq!(found[0].0.seed_index, 0);
        assert_eq!(nav[0].n_links, 4);
        assert_eq!(nav[0].surface_index, 3);
    }

    #[test]
    fn ambiguous_hits_branch_within_slot_limit() {
        let det = barrel();
        let mut measurements = radial_track(&det, 0.3);
        // a second hit close to the track on the outer surface
        measurements.push(measurement_on(&det, 3, 0.3 + 0.05 / 150.0, 75.0));
        let mut nav = vec![NavigationCandidate::default(); 2];
        let cfg = FindingConfig {
            navigation_buffer_size_scaler: 2,
            ..Default::default()
        };
        let found = find_tracks(
            &det.view(),
            &ConstantField::along_z(2.0),
            &measurements,
            &[straight_params(0.3)],
            &mut nav,
            &cfg,
            Parallelism::Parallel,
        )
        .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|(_, items)| items.len() == 4));
        assert_eq!(found[0].1[3], measurements[3]);
    }

    #[test]
    fn navigation_buffer_too_small() {
        let det = barrel();
        let mut nav = vec![NavigationCandidate::default(); 3];
        let err = find_tracks(
            &det.view(),
            &ConstantField::default(),
            &[],
            &[straight_params(0.0)],
            &mut nav,
            &FindingConfig::default(),
            Parallelism::Sequential,
        );
        assert!(matches!(err, Err(KernelError::NavigationOverflow { needed: 5, available: 3 })));
    }

    #[test]
    fn binned_and_unbinned_lookup_agree() {
        let det = barrel();
        let binned = barrel().with_phi_bins(16).unwrap();
        let mut measurements = radial_track(&det, 3.13);
        measurements.extend(radial_track(&det, -1.0));
        let params = [straight_params(3.13), straight_params(-1.0)];
        let run = |d: &Detector| {
            let mut nav = vec![NavigationCandidate::default(); 10];
            find_tracks(
                &d.view(),
                &ConstantField::default(),
                &measurements,
                &params,
                &mut nav,
                &FindingConfig::default(),
                Parallelism::Sequential,
            )
            .unwrap()
        };
        let plain = run(&det);
        assert_eq!(plain.len(), 2);
        assert_eq!(plain, run(&binned));
    }
}
