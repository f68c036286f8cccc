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

//! Detector description files (JSON).
//!
//! ```json
//! {"surfaces": [{"geometry_id": 1, "radius": 30.0, "half_length": 500.0}]}
//! {"surfaces": [{"geometry_id": 1, "thickness_x0": 0.02}]}
//! {"phi_bins": 64}
//! ```

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use trkx_kernels::{Detector, Surface};

use crate::config::DetectorFiles;
use crate::error::{Result, TrkxError};
use crate::io::utils::resolve;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorFile {
    pub surfaces: Vec<Surface>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MaterialEntry {
    pub geometry_id: u64,
    pub thickness_x0: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaterialFile {
    pub surfaces: Vec<MaterialEntry>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GridFile {
    pub phi_bins: u32,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).map_err(|e| TrkxError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| TrkxError::Parse {
        path: path.to_path_buf(),
        line: e.line(),
        message: e.to_string(),
    })
}

/// Build the detector from its geometry file and optional material and grid files.
pub fn read_detector(files: &DetectorFiles) -> Result<Detector> {
    let geometry_path = resolve(&files.detector);
    let geometry: DetectorFile = read_json(&geometry_path)?;
    let mut detector = Detector::new(geometry.surfaces)?;
    if let Some(material) = &files.material {
        let material: MaterialFile = read_json(&resolve(material))?;
        detector = detector.with_material(
            material
                .surfaces
                .iter()
                .map(|m| (m.geometry_id, m.thickness_x0)),
        )?;
    }
    if let Some(grid) = &files.grid {
        let grid: GridFile = read_json(&resolve(grid))?;
        detector = detector.with_phi_bins(grid.phi_bins)?;
    }
    log::info!(
        "detector: {} surfaces from {}",
        detector.surfaces().len(),
        geometry_path.display()
    );
    Ok(detector)
}

/// Write the geometry file for `detector` (material included per surface).
pub fn write_detector(path: &Path, detector: &Detector) -> Result<()> {
    let file = DetectorFile {
        surfaces: detector.surfaces().to_vec(),
    };
    let text = serde_json::to_string_pretty(&file)
        .map_err(|e| TrkxError::InvalidInput(format!("cannot serialise detector: {e}")))?;
    std::fs::write(path, text).map_err(|e| TrkxError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use trkx_kernels::GeometryError;

    #[test]
    fn geometry_material_and_grid() {
        let dir = tempfile::tempdir().unwrap();
        let geo = dir.path().join("detector.json");
        let mat = dir.path().join("material.json");
        let grid = dir.path().join("grid.json");
        std::fs::write(
            &geo,
            r#"{"surfaces": [
                {"geometry_id": 2, "radius": 70.0, "half_length": 500.0},
                {"geometry_id": 1, "radius": 30.0, "half_length": 500.0}
            ]}"#,
        )
        .unwrap();
        std::fs::write(&mat, r#"{"surfaces": [{"geometry_id": 2, "thickness_x0": 0.03}]}"#).unwrap();
        std::fs::write(&grid, r#"{"phi_bins": 16}"#).unwrap();

        let files = DetectorFiles {
            detector: geo,
            material: Some(mat),
            grid: Some(grid),
        };
        let detector = read_detector(&files).unwrap();
        let view = detector.view();
        assert_eq!(view.surfaces()[0].geometry_id, 1);
        assert_eq!(view.surface(2).unwrap().thickness_x0, 0.03);
        assert_eq!(view.phi_bins(), 16);
    }

    #[test]
    fn material_for_unknown_surface() {
        let dir = tempfile::tempdir().unwrap();
        let geo = dir.path().join("detector.json");
        let mat = dir.path().join("material.json");
        std::fs::write(&geo, r#"{"surfaces": [{"geometry_id": 1, "radius": 30.0, "half_length": 5.0}]}"#).unwrap();
        std::fs::write(&mat, r#"{"surfaces": [{"geometry_id": 8, "thickness_x0": 0.03}]}"#).unwrap();
        let files = DetectorFiles {
            detector: geo,
            material: Some(mat),
            grid: None,
        };
        assert!(matches!(
            read_detector(&files),
            Err(TrkxError::Geometry(GeometryError::UnknownSurface(8)))
        ));
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let detector = Detector::new(vec![Surface {
            geometry_id: 4,
            radius: 12.0,
            half_length: 40.0,
            thickness_x0: 0.01,
        }])
        .unwrap();
        write_detector(&path, &detector).unwrap();
        let back = read_detector(&DetectorFiles {
            detector: path,
            material: None,
            grid: None,
        })
        .unwrap();
        assert_eq!(back.surfaces(), detector.surfaces());
    }
}
