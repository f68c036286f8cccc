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

//! Tuning parameters for the reconstruction kernels.
//!
//! Distances in mm, momenta in GeV, field in T.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedfinderConfig {
    pub delta_r_min: f32,
    pub delta_r_max: f32,
    /// |cot(theta)| limit for both doublets; 7.40627 corresponds to |eta| < 2.7.
    pub cot_theta_max: f32,
    /// Allowed cot(theta) difference between bottom and top doublet.
    pub max_cot_theta_difference: f32,
    /// Azimuthal opening between neighbouring spacepoints of a doublet.
    pub delta_phi_max: f32,
    pub impact_max: f32,
    pub collision_region_min: f32,
    pub collision_region_max: f32,
    pub min_pt: f32,
    pub b_field_in_z: f32,
}

impl Default for SeedfinderConfig {
    fn default() -> Self {
        Self {
            delta_r_min: 5.0,
            delta_r_max: 160.0,
            cot_theta_max: 7.40627,
            max_cot_theta_difference: 0.1,
            delta_phi_max: 0.2,
            impact_max: 10.0,
            collision_region_min: -250.0,
            collision_region_max: 250.0,
            min_pt: 0.5,
            b_field_in_z: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeedfilterConfig {
    pub max_seeds_per_middle: u32,
    pub impact_weight_factor: f32,
}

impl Default for SeedfilterConfig {
    fn default() -> Self {
        Self {
            max_seeds_per_middle: 5,
            impact_weight_factor: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Newton convergence on the path length.
    pub path_tolerance: f32,
    pub max_iterations: u32,
    /// Transverse path length beyond which a surface is considered unreachable.
    pub max_path_length: f32,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            path_tolerance: 1e-4,
            max_iterations: 20,
            max_path_length: 2000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FindingConfig {
    pub chi2_max: f32,
    pub max_num_branches_per_surface: u32,
    pub min_track_candidates_per_track: u32,
    pub max_track_candidates_per_track: u32,
    pub max_num_skipping_per_cand: u32,
    /// Navigation slots (live branches) per seed.
    pub navigation_buffer_size_scaler: u32,
    /// Variance added to the measurement variance when gating, mm^2.
    pub prediction_variance: [f32; 2],
    pub propagation: PropagationConfig,
}

impl Default for FindingConfig {
    fn default() -> Self {
        Self {
            chi2_max: 30.0,
            max_num_branches_per_surface: 3,
            min_track_candidates_per_track: 3,
            max_track_candidates_per_track: 20,
            max_num_skipping_per_cand: 3,
            navigation_buffer_size_scaler: 5,
            prediction_variance: [0.25, 0.25],
            propagation: PropagationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FittingConfig {
    /// Prior variance of the slope states (dz/dr and dphi/dr).
    pub initial_slope_variance: f32,
    /// Add Highland multiple-scattering noise from surface material.
    pub use_material: bool,
    pub propagation: PropagationConfig,
}

impl Default for FittingConfig {
    fn default() -> Self {
        Self {
            initial_slope_variance: 1.0,
            use_material: true,
            propagation: PropagationConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: FindingConfig = serde_json::from_str(r#"{"chi2_max": 12.5}"#).unwrap();
        assert_eq!(cfg.chi2_max, 12.5);
        assert_eq!(cfg.navigation_buffer_size_scaler, 5);
        assert_eq!(cfg.propagation, PropagationConfig::default());
    }
}
