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

//! Fixed input and fixed seed give identical results.

mod common;

use std::path::Path;

use trkx_core::device::StreamMode;
use trkx_core::io::read_detector;
use trkx_core::simulation::default_barrel;
use trkx_core::{FullChain, PileupSimulator, RunStatistics, SimulationConfig, reporter_for};

fn simulate(dir: &Path, seed: u64) {
    common::init_logging();
    let config = SimulationConfig {
        events: 2,
        seed,
        vertices: 3,
        tracks_per_vertex: 4,
        eta_range: [-1.5, 1.5],
        ..Default::default()
    };
    PileupSimulator::new(config, default_barrel().unwrap())
        .unwrap()
        .run(dir)
        .unwrap();
}

fn reconstruct(dir: &Path, mode: StreamMode) -> RunStatistics {
    let mut config = common::chain_config(dir, dir.join("detector.json"), 2);
    config.accelerator.stream_mode = mode;
    let detector = read_detector(&config.detector).unwrap();
    let mut chain = FullChain::new(config.clone(), &detector).unwrap();
    let mut reporter = reporter_for(&config);
    reporter.initialize().unwrap();
    chain.run(&mut reporter).unwrap();
    reporter.finalize().unwrap();
    reporter.statistics().clone()
}

#[test]
fn simulation_files_are_reproducible() {
    let (a, b) = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    simulate(a.path(), 7);
    simulate(b.path(), 7);
    for suffix in ["-measurements.csv", "-spacepoints.csv", "-particles.csv", "-truth.csv"] {
        let name = format!("event000000001{suffix}");
        assert_eq!(
            std::fs::read(a.path().join(&name)).unwrap(),
            std::fs::read(b.path().join(&name)).unwrap(),
            "{name}"
        );
    }
}

#[test]
fn aggregate_counts_are_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    simulate(dir.path(), 11);
    let first = reconstruct(dir.path(), StreamMode::Worker);
    let second = reconstruct(dir.path(), StreamMode::Worker);
    let inline = reconstruct(dir.path(), StreamMode::Inline);
    assert_eq!(first, second);
    assert_eq!(first, inline);
    assert_eq!(first.n_events, 2);
    assert_eq!(first.cpu, first.device);
}
