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

// Connected-component clustering of cells into measurements.
// Cells touching in 8-connectivity within one module form a cluster; the
// measurement is the activation-weighted centroid.

use rayon::prelude::*;

use crate::edm::{Cell, CellModule, Measurement};
use crate::{KernelError, Parallelism};

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (ra, rb) = (find(parent, a), find(parent, b));
    if ra != rb {
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[hi] = lo;
    }
}

fn cluster_module(module_link: u32, module: &CellModule, cells: &[Cell]) -> Vec<Measurement> {
    let active: Vec<&Cell> = cells.iter().filter(|c| c.activation > module.threshold).collect();
    let n = active.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            let dc0 = active[i].channel0.abs_diff(active[j].channel0);
            let dc1 = active[i].channel1.abs_diff(active[j].channel1);
            if dc0 <= 1 && dc1 <= 1 {
                union(&mut parent, i, j);
            }
        }
    }

    // roots are the smallest member index, so clusters come out in cell order
    let mut roots: Vec<usize> = Vec::new();
    let mut sums: Vec<[f64; 5]> = Vec::new();
    for i in 0..n {
        let root = find(&mut parent, i);
        let slot = match roots.iter().position(|&r| r == root) {
            Some(slot) => slot,
            None => {
                roots.push(root);
                sums.push([0.0; 5]);
                roots.len() - 1
            }
        };
        let w = active[i].activation as f64;
        let (c0, c1) = (active[i].channel0 as f64, active[i].channel1 as f64);
        let s = &mut sums[slot];
        s[0] += w;
        s[1] += w * c0;
        s[2] += w * c1;
        s[3] += w * c0 * c0;
        s[4] += w * c1 * c1;
    }

    let pixel = &module.pixel;
    sums.iter()
        .map(|s| {
            let (m0, m1) = (s[1] / s[0], s[2] / s[0]);
            let spread0 = (s[3] / s[0] - m0 * m0).max(0.0) as f32;
            let spread1 = (s[4] / s[0] - m1 * m1).max(0.0) as f32;
            let local = pixel.channel_position(m0 as f32, m1 as f32);
            Measurement {
                surface_link: module.surface_link,
                module_link,
                local,
                variance: [
                    pixel.pitch_x * pixel.pitch_x * (1.0 / 12.0 + spread0),
                    pixel.pitch_y * pixel.pitch_y * (1.0 / 12.0 + spread1),
                ],
            }
        })
        .collect()
}

/// Cluster all cells of an event. Measurements are ordered by module, then by
/// the first cell of each cluster.
pub fn find_clusters(
    cells: &[Cell],
    modules: &[CellModule],
    mode: Parallelism,
) -> Result<Vec<Measurement>, KernelError> {
    let mut per_module: Vec<Vec<Cell>> = vec![Vec::new(); modules.len()];
    for cell in cells {
        let slot = per_module
            .get_mut(cell.module_link as usize)
            .ok_or(KernelError::InvalidLink {
                what: "cell module",
                link: cell.module_link as usize,
                len: modules.len(),
            })?;
        slot.push(*cell);
    }
    let run = |(i, cells): (usize, &Vec<Cell>)| cluster_module(i as u32, &modules[i], cells);
    Ok(match mode {
        Parallelism::Sequential => per_module.iter().enumerate().flat_map(run).collect(),
        Parallelism::Parallel => per_module
            .par_iter()
            .enumerate()
            .flat_map_iter(run)
            .collect(),
    })
}
