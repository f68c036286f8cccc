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

//! Whole-chain runs over events written to disk.

mod common;

use trkx_core::aggregator::{SUMMARY_FILE, TIMING_FILE};
use trkx_core::comparator::compare_candidates;
use trkx_core::io::{CsvEventReader, DataFormat, EventSource, read_detector};
use trkx_core::pipeline::CANDIDATES;
use trkx_core::simulation::default_barrel;
use trkx_core::{
    CandidatePredicate, FullChain, Pairing, PathCounters, PileupSimulator, Reporter,
    SimulationConfig, reporter_for,
};

#[test]
fn synthetic_event_matches_on_both_paths() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    let detector_path = common::write_cell_events(dir.path(), 1, &[]);
    let mut config = common::chain_config(dir.path(), detector_path, 1);
    config.output.directory = Some(out.clone());
    config.output.match_log = Some(dir.path().join("match.txt"));

    let detector = read_detector(&config.detector).unwrap();
    let mut chain = FullChain::new(config.clone(), &detector).unwrap();
    let mut reporter = reporter_for(&config);
    reporter.initialize().unwrap();
    chain.run(&mut reporter).unwrap();
    reporter.finalize().unwrap();

    let stats = reporter.statistics();
    assert_eq!(stats.n_events, 1);
    assert_eq!(stats.n_modules, 3);
    assert_eq!(stats.n_spacepoints, 3);
    for path in [&stats.cpu, &stats.device] {
        assert_eq!(path.measurements, 3);
        assert_eq!(path.seeds, 1);
        assert_eq!(path.params, 1);
        assert_eq!(path.found_tracks, 1);
        assert_eq!(path.fitted_tracks, 1);
    }
    let candidates = &reporter.comparisons()[CANDIDATES][0];
    assert_eq!(candidates.rate(), 1.0);
    let measurements = &reporter.comparisons()["measurements"][0];
    assert_eq!(measurements.matched, 3);

    assert_eq!(
        std::fs::read_to_string(dir.path().join("match.txt")).unwrap(),
        "1 1 1\n"
    );
    assert!(out.join(SUMMARY_FILE).exists());
    assert!(out.join(TIMING_FILE).exists());
    assert!(out.join("device").join("event000000000-fitted.csv").exists());
}

#[test]
fn device_measurements_equal_cpu_measurements() {
    let dir = tempfile::tempdir().unwrap();
    let detector_path = common::write_cell_events(dir.path(), 1, &[]);
    let config = common::chain_config(dir.path(), detector_path, 1);
    let detector = read_detector(&config.detector).unwrap();
    let data = CsvEventReader::new(dir.path(), DataFormat::Csv)
        .read_event(0, &detector.view())
        .unwrap();

    let mut chain = FullChain::new(config, &detector).unwrap();
    let mut reporter = Reporter::new(false);
    reporter.initialize().unwrap();
    let summary = chain.process_event(0, &data, &mut reporter).unwrap();
    let cpu = summary.cpu.unwrap();
    assert_eq!(cpu.measurements, summary.device.measurements);
    assert_eq!(cpu.measurements, data.measurements);
}

#[test]
fn zero_spacepoints_give_empty_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let detector_path = common::write_cell_events(dir.path(), 2, &[0, 1]);
    let config = common::chain_config(dir.path(), detector_path, 2);
    let detector = read_detector(&config.detector).unwrap();
    let mut chain = FullChain::new(config, &detector).unwrap();
    let mut reporter = Reporter::new(false);
    reporter.initialize().unwrap();
    chain.run(&mut reporter).unwrap();

    let stats = reporter.statistics();
    assert_eq!(stats.n_events, 2);
    assert_eq!(stats.n_spacepoints, 0);
    assert_eq!(stats.cpu, stats.device);
    assert_eq!(stats.device.seeds, 0);
    assert_eq!(stats.device.fitted_tracks, 0);
    assert_eq!(reporter.comparisons()[CANDIDATES][0].rate(), 1.0);
}

#[test]
fn cross_check_disabled_skips_the_cpu_path() {
    let dir = tempfile::tempdir().unwrap();
    let detector_path = common::write_cell_events(dir.path(), 1, &[]);
    let mut config = common::chain_config(dir.path(), detector_path, 1);
    config.accelerator.compare_with_cpu = false;
    config.output.match_log = Some(dir.path().join("match.txt"));
    let detector = read_detector(&config.detector).unwrap();

    let mut chain = FullChain::new(config.clone(), &detector).unwrap();
    let mut reporter = reporter_for(&config);
    reporter.initialize().unwrap();
    chain.run(&mut reporter).unwrap();

    let stats = reporter.statistics();
    assert_eq!(stats.cpu, PathCounters::default());
    assert_eq!(stats.device.seeds, 1);
    assert_eq!(stats.n_comparisons, 0);
    assert!(reporter.comparisons().is_empty());
    assert!(!dir.path().join("match.txt").exists());
}

#[test]
fn missing_event_file_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let detector_path = common::write_cell_events(dir.path(), 1, &[]);
    let config = common::chain_config(dir.path(), detector_path, 2);
    let detector = read_detector(&config.detector).unwrap();
    let mut chain = FullChain::new(config, &detector).unwrap();
    let mut reporter = Reporter::new(false);
    reporter.initialize().unwrap();
    assert!(chain.run(&mut reporter).is_err());
    // the first event completed before the failure
    assert_eq!(reporter.statistics().n_events, 1);
}

#[test]
fn candidate_predicates_are_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let sim_config = SimulationConfig {
        vertices: 2,
        tracks_per_vertex: 5,
        eta_range: [-1.0, 1.0],
        ..Default::default()
    };
    let simulator = PileupSimulator::new(sim_config, default_barrel().unwrap()).unwrap();
    simulator.run(dir.path()).unwrap();

    let mut config = common::chain_config(dir.path(), dir.path().join("detector.json"), 1);
    config.check_performance = true;
    config.output.directory = Some(dir.path().join("out"));
    let detector = read_detector(&config.detector).unwrap();
    let data = CsvEventReader::new(dir.path(), DataFormat::Csv)
        .read_event(0, &detector.view())
        .unwrap();
    assert!(data.truth.is_some());

    let mut chain = FullChain::new(config.clone(), &detector).unwrap();
    let mut reporter = reporter_for(&config);
    reporter.initialize().unwrap();
    let summary = chain.process_event(0, &data, &mut reporter).unwrap();
    let summary_report = reporter.finalize().unwrap();
    assert_eq!(summary_report.performance.len(), 4);

    let cpu = summary.cpu.as_ref().unwrap();
    let rate = |predicate: CandidatePredicate| {
        compare_candidates(&cpu.candidates, &summary.device.candidates, predicate, Pairing::FirstMatch).rate
    };
    let exact = rate(CandidatePredicate::ExactSequence);
    let same = rate(CandidatePredicate::SameMeasurements);
    let overlap = rate(CandidatePredicate::Overlap { min_fraction: 0.5 });
    assert!(exact <= same && same <= overlap, "{exact} {same} {overlap}");
    assert!(
        dir.path()
            .join("out")
            .join("nseed_performance_track_stat.csv")
            .exists()
    );
}
