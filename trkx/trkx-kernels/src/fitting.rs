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

//! Kalman-style track fit.
//!
//! Two decoupled linear filters run along the radius: `z(r)` with state
//! `(z, dz/dr)` and the azimuthal position `phi(r)` with state
//! `(phi, dphi/dr)`. Surface material adds Highland scattering noise to the
//! slopes. The reported fit parameters are the final filtered lines evaluated
//! at the first surface; `ndf = 2 * n - 4`.

use rayon::prelude::*;

use crate::config::FittingConfig;
use crate::edm::{
    BoundTrackParameters, CandidateHeader, FittingResult, Measurement, NavigationCandidate,
    TrackState, wrap_phi,
};
use crate::geometry::{ConstantField, DetectorView};
use crate::{KernelError, Parallelism};

/// One fitted track: header plus one state per measurement.
pub type FittedTrack = (FittingResult, Vec<TrackState>);

#[derive(Debug, Clone, Copy)]
struct LineFilter {
    x: [f64; 2],
    p: [[f64; 2]; 2],
    r: f64,
    periodic: bool,
}

impl LineFilter {
    fn new(r: f64, value: f64, value_var: f64, slope: f64, slope_var: f64, periodic: bool) -> Self {
        Self {
            x: [value, slope],
            p: [[value_var, 0.0], [0.0, slope_var]],
            r,
            periodic,
        }
    }

    fn predict(&mut self, r: f64) {
        let dr = r - self.r;
        let p = self.p;
        self.x[0] += dr * self.x[1];
        self.p[0][0] = p[0][0] + 2.0 * dr * p[0][1] + dr * dr * p[1][1];
        self.p[0][1] = p[0][1] + dr * p[1][1];
        self.p[1][0] = self.p[0][1];
        self.r = r;
    }

    fn add_slope_noise(&mut self, q: f64) {
        self.p[1][1] += q;
    }

    /// Update with a measurement of the value; returns the predicted chi2.
    fn update(&mut self, value: f64, variance: f64) -> f64 {
        let mut residual = value - self.x[0];
        if self.periodic {
            residual = wrap_phi(residual as f32) as f64;
        }
        let s = self.p[0][0] + variance;
        let k0 = self.p[0][0] / s;
        let k1 = self.p[0][1] / s;
        self.x[0] += k0 * residual;
        self.x[1] += k1 * residual;
        let p = self.p;
        self.p[0][0] = (1.0 - k0) * p[0][0];
        self.p[0][1] = (1.0 - k0) * p[0][1];
        self.p[1][0] = self.p[0][1];
        self.p[1][1] = p[1][1] - k1 * p[0][1];
        residual * residual / s
    }

    fn value_at(&self, r: f64) -> f64 {
        self.x[0] + (r - self.r) * self.x[1]
    }
}

/// Highland scattering angle for momentum `p` (GeV) through `x` radiation lengths.
pub fn highland_theta0(p: f64, x: f64) -> f64 {
    if !(p.is_finite() && p > 0.0 && x > 0.0) {
        return 0.0;
    }
    0.0136 / p * x.sqrt() * (1.0 + 0.038 * x.ln())
}

pub fn fit_track(
    detector: &DetectorView,
    field: &ConstantField,
    track: u32,
    header: &CandidateHeader,
    measurements: &[Measurement],
    cfg: &FittingConfig,
    navigation: &mut NavigationCandidate,
) -> Result<FittedTrack, KernelError> {
    let first = measurements
        .first()
        .ok_or(KernelError::EmptyCandidate(track as usize))?;
    let seed = &header.seed_params;
    let start = detector.surface(first.surface_link)?;
    let r0 = start.radius as f64;

    let theta = seed.theta as f64;
    let tz = theta.cos() / theta.sin();
    let mut zf = LineFilter::new(
        r0,
        first.local[1] as f64,
        first.variance[1] as f64,
        tz,
        cfg.initial_slope_variance as f64,
        false,
    );
    let mut pf = LineFilter::new(
        r0,
        (first.local[0] / start.radius) as f64,
        first.variance[0] as f64 / (r0 * r0),
        seed.omega(field.bz()) as f64 / 2.0,
        cfg.initial_slope_variance as f64 / (r0 * r0),
        true,
    );

    let state_at = |zf: &LineFilter, pf: &LineFilter, surface_link: u64, radius: f32| {
        BoundTrackParameters {
            surface_link,
            loc: [radius * wrap_phi(pf.x[0] as f32), zf.x[0] as f32],
            theta: (1.0f64).atan2(zf.x[1]) as f32,
            ..*seed
        }
    };

    let mut states = Vec::with_capacity(measurements.len());
    states.push(TrackState {
        measurement: *first,
        filtered: state_at(&zf, &pf, first.surface_link, start.radius),
        chi2: 0.0,
    });

    let mut chi2 = 0.0f64;
    let mut previous = start;
    let mut last_index = detector.surface_index(first.surface_link).unwrap_or_default();
    for m in &measurements[1..] {
        let surface = detector.surface(m.surface_link)?;
        let r = surface.radius as f64;
        if cfg.use_material {
            let theta0 = highland_theta0(seed.p() as f64, previous.thickness_x0 as f64);
            let pr = previous.radius as f64;
            zf.add_slope_noise(theta0 * theta0 * (1.0 + zf.x[1] * zf.x[1]));
            pf.add_slope_noise(theta0 * theta0 / (pr * pr));
        }
        zf.predict(r);
        pf.predict(r);
        let step = zf.update(m.local[1] as f64, m.variance[1] as f64)
            + pf.update((m.local[0] / surface.radius) as f64, m.variance[0] as f64 / (r * r));
        chi2 += step;
        states.push(TrackState {
            measurement: *m,
            filtered: state_at(&zf, &pf, m.surface_link, surface.radius),
            chi2: step as f32,
        });
        previous = surface;
        last_index = detector.surface_index(m.surface_link).unwrap_or(last_index);
    }

    let n = measurements.len() as f32;
    let fit_params = BoundTrackParameters {
        surface_link: first.surface_link,
        loc: [
            start.radius * wrap_phi(pf.value_at(r0) as f32),
            zf.value_at(r0) as f32,
        ],
        theta: (1.0f64).atan2(zf.x[1]) as f32,
        ..*seed
    };
    *navigation = NavigationCandidate {
        track,
        surface_index: last_index as u32,
        n_links: measurements.len() as u32,
        chi2: chi2 as f32,
    };
    Ok((
        FittingResult {
            fit_params,
            ndf: (2.0 * n - 4.0).max(0.0),
            chi2: chi2 as f32,
        },
        states,
    ))
}

/// Fit every candidate; `navigation` needs one slot per candidate.
pub fn fit_tracks(
    detector: &DetectorView,
    field: &ConstantField,
    headers: &[CandidateHeader],
    candidates: &[Vec<Measurement>],
    navigation: &mut [NavigationCandidate],
    cfg: &FittingConfig,
    mode: Parallelism,
) -> Result<Vec<FittedTrack>, KernelError> {
    if headers.len() != candidates.len() {
        return Err(KernelError::InvalidConfiguration(
            "candidate headers and measurement rows differ in length",
        ));
    }
    if navigation.len() < headers.len() {
        return Err(KernelError::NavigationOverflow {
            needed: headers.len(),
            available: navigation.len(),
        });
    }
    let slots = &mut navigation[..headers.len()];
    let run = |(i, ((h, c), nav)): (usize, ((&CandidateHeader, &Vec<Measurement>), &mut NavigationCandidate))| {
        fit_track(detector, field, i as u32, h, c, cfg, nav)
    };
    match mode {
        Parallelism::Sequential => headers
            .iter()
            .zip(candidates.iter())
            .zip(slots.iter_mut())
            .enumerate()
            .map(run)
            .collect(),
        Parallelism::Parallel => headers
            .par_iter()
            .zip(candidates.par_iter())
            .zip(slots.par_iter_mut())
            .enumerate()
            .map(run)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Detector, Surface};

    fn barrel(thickness: f32) -> Detector {
        let surfaces = [30.0, 70.0, 110.0, 150.0]
            .iter()
            .enumerate()
            .map(|(i, &r)| Surface {
                geometry_id: i as u64 + 1,
                radius: r,
                half_length: 500.0,
                thickness_x0: thickness,
            })
            .collect();
        Detector::new(surfaces).unwrap()
    }

    fn track(det: &Detector, phi: f32, cot: f32, jitter: f32) -> Vec<Measurement> {
        det.surfaces()
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                Measurement {
                    surface_link: s.geometry_id,
                    module_link: i as u32,
                    local: [s.radius * phi + sign * jitter, cot * s.radius + sign * jitter],
                    variance: [0.0025, 0.0025],
                }
            })
            .collect()
    }

    fn header(phi: f32, cot: f32) -> CandidateHeader {
        CandidateHeader {
            seed_index: 0,
            seed_params: BoundTrackParameters {
                surface_link: 1,
                loc: [30.0 * phi, 30.0 * cot],
                phi,
                theta: (1.0f32).atan2(cot),
                qop: 0.1,
                time: 0.0,
            },
        }
    }

    #[test]
    fn exact_line_has_small_chi2() {
        let det = barrel(0.0);
        let ms = track(&det, 0.4, 0.5, 0.0);
        let mut nav = NavigationCandidate::default();
        let (result, states) = fit_track(
            &det.view(),
            &ConstantField::along_z(0.0),
            0,
            &header(0.4, 0.5),
            &ms,
            &FittingConfig::default(),
            &mut nav,
        )
        .unwrap();
        assert_eq!(result.ndf, 4.0);
        assert!(result.chi2 < 1e-3, "chi2 {}", result.chi2);
        assert_eq!(states.len(), 4);
        assert!((result.fit_params.loc[1] - 15.0).abs() < 1e-3);
        assert!((result.fit_params.theta - (1.0f32).atan2(0.5)).abs() < 1e-3);
        assert_eq!(nav.n_links, 4);
        assert_eq!(nav.surface_index, 3);
    }

    #[test]
    fn jitter_increases_chi2() {
        let det = barrel(0.0);
        let field = ConstantField::along_z(0.0);
        let cfg = FittingConfig::default();
        let mut nav = NavigationCandidate::default();
        let clean = fit_track(&det.view(), &field, 0, &header(0.4, 0.5), &track(&det, 0.4, 0.5, 0.0), &cfg, &mut nav)
            .unwrap();
        let noisy = fit_track(&det.view(), &field, 0, &header(0.4, 0.5), &track(&det, 0.4, 0.5, 0.2), &cfg, &mut nav)
            .unwrap();
        assert!(noisy.0.chi2 > clean.0.chi2);
    }

    #[test]
    fn highland_angle() {
        let theta0 = highland_theta0(1.0, 0.01);
        assert!((theta0 - 0.00136 * (1.0 + 0.038 * 0.01f64.ln())).abs() < 1e-9);
        assert_eq!(highland_theta0(f64::INFINITY, 0.01), 0.0);
        assert_eq!(highland_theta0(1.0, 0.0), 0.0);
    }

    #[test]
    fn sequential_and_parallel_agree() {
        let det = barrel(0.01);
        let headers = vec![header(0.4, 0.5), header(-2.0, -0.3)];
        let rows = vec![track(&det, 0.4, 0.5, 0.05), track(&det, -2.0, -0.3, 0.02)];
        let mut nav_a = vec![NavigationCandidate::default(); 2];
        let mut nav_b = vec![NavigationCandidate::default(); 2];
        let cfg = FittingConfig::default();
        let field = ConstantField::default();
        let a = fit_tracks(&det.view(), &field, &headers, &rows, &mut nav_a, &cfg, Parallelism::Sequential).unwrap();
        let b = fit_tracks(&det.view(), &field, &headers, &rows, &mut nav_b, &cfg, Parallelism::Parallel).unwrap();
        assert_eq!(a, b);
        assert_eq!(nav_a, nav_b);
    }

    #[test]
    fn empty_candidate_is_an_error() {
        let det = barrel(0.0);
        let mut nav = vec![NavigationCandidate::default(); 1];
        let err = fit_tracks(
            &det.view(),
            &ConstantField::default(),
            &[header(0.0, 0.0)],
            &[Vec::new()],
            &mut nav,
            &FittingConfig::default(),
            Parallelism::Sequential,
        );
        assert!(matches!(err, Err(KernelError::EmptyCandidate(0))));
    }
}
