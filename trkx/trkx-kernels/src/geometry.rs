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

//! Barrel detector made of concentric cylinders, and the constant magnetic field.
//!
//! Local frame on a cylinder of radius `R`: `loc0 = R * phi`, `loc1 = z`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("detector has no surfaces")]
    Empty,
    #[error("duplicate surface geometry id {0}")]
    DuplicateSurface(u64),
    #[error("surface {id} has invalid dimensions (radius {radius}, half length {half_length})")]
    InvalidSurface { id: u64, radius: f32, half_length: f32 },
    #[error("unknown surface geometry id {0}")]
    UnknownSurface(u64),
    #[error("phi binning must be at least 1, got {0}")]
    InvalidBinning(u32),
}

/// One cylindrical sensitive surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub geometry_id: u64,
    /// mm
    pub radius: f32,
    /// mm
    pub half_length: f32,
    /// Material thickness in radiation lengths.
    #[serde(default)]
    pub thickness_x0: f32,
}

impl Surface {
    pub fn local_to_global(&self, loc: [f32; 2]) -> [f32; 3] {
        let phi = loc[0] / self.radius;
        [self.radius * phi.cos(), self.radius * phi.sin(), loc[1]]
    }

    pub fn global_to_local(&self, global: [f32; 3]) -> [f32; 2] {
        [self.radius * global[1].atan2(global[0]), global[2]]
    }

    pub fn contains_z(&self, z: f32) -> bool {
        z.abs() <= self.half_length
    }
}

/// Owning detector description. Surfaces are kept ordered by radius.
#[derive(Debug, Clone)]
pub struct Detector {
    surfaces: Arc<[Surface]>,
    phi_bins: u32,
}

impl Detector {
    pub fn new(mut surfaces: Vec<Surface>) -> Result<Self, GeometryError> {
        if surfaces.is_empty() {
            return Err(GeometryError::Empty);
        }
        for s in &surfaces {
            if !(s.radius > 0.0 && s.half_length > 0.0) {
                return Err(GeometryError::InvalidSurface {
                    id: s.geometry_id,
                    radius: s.radius,
                    half_length: s.half_length,
                });
            }
        }
        surfaces.sort_by(|a, b| a.radius.total_cmp(&b.radius));
        let mut ids: Vec<u64> = surfaces.iter().map(|s| s.geometry_id).collect();
        ids.sort_unstable();
        if let Some(w) = ids.windows(2).find(|w| w[0] == w[1]) {
            return Err(GeometryError::DuplicateSurface(w[0]));
        }
        Ok(Self {
            surfaces: surfaces.into(),
            phi_bins: 1,
        })
    }

    /// Assign material thickness (x/X0) per surface id.
    pub fn with_material(
        self,
        material: impl IntoIterator<Item = (u64, f32)>,
    ) -> Result<Self, GeometryError> {
        let mut surfaces: Vec<Surface> = self.surfaces.to_vec();
        for (id, thickness) in material {
            let surface = surfaces
                .iter_mut()
                .find(|s| s.geometry_id == id)
                .ok_or(GeometryError::UnknownSurface(id))?;
            surface.thickness_x0 = thickness;
        }
        Ok(Self {
            surfaces: surfaces.into(),
            phi_bins: self.phi_bins,
        })
    }

    /// Azimuthal binning used to group measurements for the finding kernel.
    pub fn with_phi_bins(mut self, phi_bins: u32) -> Result<Self, GeometryError> {
        if phi_bins == 0 {
            return Err(GeometryError::InvalidBinning(phi_bins));
        }
        self.phi_bins = phi_bins;
        Ok(self)
    }

    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    pub fn view(&self) -> DetectorView {
        DetectorView {
            surfaces: Arc::clone(&self.surfaces),
            phi_bins: self.phi_bins,
        }
    }
}

/// Cheap, thread-safe view of the detector handed to kernels on either path.
#[derive(Debug, Clone)]
pub struct DetectorView {
    surfaces: Arc<[Surface]>,
    phi_bins: u32,
}

impl DetectorView {
    pub fn surfaces(&self) -> &[Surface] {
        &self.surfaces
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }

    pub fn phi_bins(&self) -> u32 {
        self.phi_bins
    }

    /// Index (in radial order) of the surface with the given geometry id.
    pub fn surface_index(&self, geometry_id: u64) -> Option<usize> {
        self.surfaces
            .iter()
            .position(|s| s.geometry_id == geometry_id)
    }

    pub fn surface(&self, geometry_id: u64) -> Result<&Surface, GeometryError> {
        self.surface_index(geometry_id)
            .map(|i| &self.surfaces[i])
            .ok_or(GeometryError::UnknownSurface(geometry_id))
    }
}

/// Homogeneous magnetic field (T).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstantField {
    pub b: [f32; 3],
}

impl ConstantField {
    pub fn along_z(bz: f32) -> Self {
        Self { b: [0.0, 0.0, bz] }
    }

    pub fn bz(&self) -> f32 {
        self.b[2]
    }
}

impl Default for ConstantField {
    fn default() -> Self {
        Self::along_z(2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface(id: u64, radius: f32) -> Surface {
        Surface {
            geometry_id: id,
            radius,
            half_length: 500.0,
            thickness_x0: 0.0,
        }
    }

    #[test]
    fn surfaces_sorted_by_radius() {
        let det = Detector::new(vec![surface(3, 110.0), surface(1, 30.0), surface(2, 70.0)]).unwrap();
        let radii: Vec<f32> = det.surfaces().iter().map(|s| s.radius).collect();
        assert_eq!(radii, vec![30.0, 70.0, 110.0]);
        assert_eq!(det.view().surface_index(3), Some(2));
        assert!(det.view().surface(9).is_err());
    }

    #[test]
    fn rejects_duplicates_and_empty() {
        assert_eq!(Detector::new(vec![]).unwrap_err(), GeometryError::Empty);
        assert_eq!(
            Detector::new(vec![surface(1, 30.0), surface(1, 40.0)]).unwrap_err(),
            GeometryError::DuplicateSurface(1)
        );
    }

    #[test]
    fn local_global_roundtrip() {
        let s = surface(1, 50.0);
        let g = s.local_to_global([10.0, -20.0]);
        let l = s.global_to_local(g);
        assert!((l[0] - 10.0).abs() < 1e-4);
        assert!((l[1] + 20.0).abs() < 1e-6);
    }

    #[test]
    fn material_assignment() {
        let det = Detector::new(vec![surface(1, 30.0)])
            .unwrap()
            .with_material([(1, 0.02)])
            .unwrap();
        assert_eq!(det.surfaces()[0].thickness_x0, 0.02);
        assert!(Detector::new(vec![surface(1, 30.0)])
            .unwrap()
            .with_material([(7, 0.02)])
            .is_err());
    }
}
