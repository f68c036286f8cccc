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

// One spacepoint per measurement, placed on its surface.

use crate::KernelError;
use crate::edm::{Measurement, Spacepoint};
use crate::geometry::DetectorView;

pub fn form_spacepoints(
    measurements: &[Measurement],
    detector: &DetectorView,
) -> Result<Vec<Spacepoint>, KernelError> {
    measurements
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let surface = detector.surface(m.surface_link)?;
            Ok(Spacepoint {
                module_link: m.module_link,
                meas_link: i as u32,
                global: surface.local_to_global(m.local),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Detector, Surface};

    #[test]
    fn spacepoint_on_surface() {
        let det = Detector::new(vec![Surface {
            geometry_id: 5,
            radius: 40.0,
            half_length: 100.0,
            thickness_x0: 0.0,
        }])
        .unwrap();
        let m = Measurement {
            surface_link: 5,
            module_link: 0,
            local: [4.0, 12.0],
            variance: [0.01, 0.01],
        };
        let sps = form_spacepoints(&[m], &det.view()).unwrap();
        assert_eq!(sps[0].meas_link, 0);
        assert!((sps[0].radius() - 40.0).abs() < 1e-4);
        assert!((sps[0].phi() - 0.1).abs() < 1e-5);
        assert_eq!(sps[0].z(), 12.0);

        let orphan = Measurement {
            surface_link: 9,
            ..m
        };
        assert!(form_spacepoints(&[orphan], &det.view()).is_err());
    }
}
