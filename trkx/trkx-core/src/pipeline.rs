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

//! Full reconstruction chain over a range of events.
//!
//! The accelerator path is issued on the stream stage by stage; each CPU
//! mirror stage is run right after its accelerator counterpart was issued so
//! both overlap. One stream synchronisation precedes the downloads.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use trkx_kernels::{
    BoundTrackParameters, CandidateHeader, ConstantField, Detector, DetectorView, FittingResult,
    Measurement, NavigationCandidate, Seed, TrackState,
};

use crate::aggregator::{MatchLog, PathCounters, Reporter};
use crate::algorithms::{Accelerator, Host, StageSet};
use crate::comparator::{CandidatePredicate, CollectionComparator, MatchReport, Pairing, compare_candidates};
use crate::config::ChainConfig;
use crate::device::{ContainerBuffer, DeviceContext, HostContainer, MemoryResources, NavigationBuffer, Stream};
use crate::error::{Result, TrkxError};
use crate::io::{CsvEventReader, EventData, EventSource, EventTruth, EventWriter, Particle};
use crate::profiling::TimingInfo;
use crate::writers::{EventOutputs, default_writers};

/// Host copies of one path's stage outputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PathOutputs {
    pub measurements: Vec<Measurement>,
    pub seeds: Vec<Seed>,
    pub params: Vec<BoundTrackParameters>,
    pub candidates: HostContainer<CandidateHeader, Measurement>,
    pub tracks: HostContainer<FittingResult, TrackState>,
}

impl PathOutputs {
    pub fn counters(&self) -> PathCounters {
        PathCounters {
            measurements: self.measurements.len() as u64,
            seeds: self.seeds.len() as u64,
            params: self.params.len() as u64,
            found_tracks: self.candidates.len() as u64,
            fitted_tracks: self.tracks.len() as u64,
        }
    }
}

/// What one event produced.
#[derive(Debug, Clone, Default)]
pub struct EventSummary {
    pub event: usize,
    pub device: PathOutputs,
    /// Empty unless the CPU mirror is enabled.
    pub cpu: Option<PathOutputs>,
    /// Comparator reports by collection name.
    pub comparisons: BTreeMap<&'static str, Vec<MatchReport>>,
}

impl EventSummary {
    pub fn candidate_match(&self) -> Option<&MatchReport> {
        self.comparisons.get(CANDIDATES).and_then(|r| r.first())
    }
}

pub const CANDIDATES: &str = "track candidates";
pub const FITTED_TRACKS: &str = "fitted tracks";
pub const CANDIDATES_EXCLUSIVE: &str = "track candidates (exclusive)";

/// Reporter wired to the configured outputs: performance writers, match log
/// and run summary directory.
pub fn reporter_for(config: &ChainConfig) -> Reporter {
    let performance_dir = config
        .output
        .directory
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let mut reporter = Reporter::new(config.check_performance);
    for writer in default_writers(performance_dir) {
        reporter = reporter.with_writer(writer);
    }
    if let Some(path) = &config.output.match_log {
        reporter = reporter.with_match_log(MatchLog::new(path));
    }
    if let Some(dir) = &config.output.directory {
        reporter = reporter.with_output_dir(dir);
    }
    reporter
}

/// Dual-path chain bound to one detector and one stream.
pub struct FullChain {
    config: ChainConfig,
    view: DetectorView,
    field: ConstantField,
    stream: Stream,
    ctx: DeviceContext,
    device: StageSet<Accelerator>,
    host: Option<StageSet<Host>>,
    writer: Option<EventWriter>,
    predicate: CandidatePredicate,
}

impl FullChain {
    /// Validate `config` and set up the stream, memory resources and both stage sets.
    pub fn new(config: ChainConfig, detector: &Detector) -> Result<Self> {
        config.validate()?;
        let stream = Stream::new(config.accelerator.stream_mode, config.accelerator.queue_capacity)?;
        let ctx = DeviceContext::new(&stream, MemoryResources::new(config.device_memory_bytes(), None))?;
        let device = StageSet::<Accelerator>::from_config(&config, ctx.clone());
        let host = config
            .accelerator
            .compare_with_cpu
            .then(|| StageSet::<Host>::from_config(&config));
        let writer = config.output.directory.as_ref().map(EventWriter::new);
        log::info!(
            "chain: {} on stream {} ({:?}), cpu mirror {}",
            device.names().join(", "),
            stream.id(),
            config.accelerator.stream_mode,
            if host.is_some() { "on" } else { "off" }
        );
        Ok(Self {
            field: config.field(),
            view: detector.view(),
            config,
            stream,
            ctx,
            device,
            host,
            writer,
            predicate: CandidatePredicate::default(),
        })
    }

    pub fn with_candidate_predicate(mut self, predicate: CandidatePredicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Replace the CPU mirror, e.g. with custom stage implementations.
    pub fn with_host_stages(mut self, stages: Option<StageSet<Host>>) -> Self {
        self.host = stages;
        self
    }

    pub fn with_device_stages(mut self, stages: StageSet<Accelerator>) -> Self {
        self.device = stages;
        self
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn device_context(&self) -> &DeviceContext {
        &self.ctx
    }

    /// Read and process `[skip, skip + events)` from the configured input directory.
    pub fn run(&mut self, reporter: &mut Reporter) -> Result<()> {
        let input = &self.config.input;
        let source = CsvEventReader::new(&input.directory, input.format);
        self.run_source(&source, reporter)
    }

    pub fn run_source(&mut self, source: &dyn EventSource, reporter: &mut Reporter) -> Result<()> {
        self.for_each_event(source, reporter, Self::process_event)
    }

    /// Fit the truth tracks of `[skip, skip + events)` from the configured input directory.
    pub fn run_truth_fitting(&mut self, reporter: &mut Reporter) -> Result<()> {
        let input = &self.config.input;
        let source = CsvEventReader::new(&input.directory, input.format);
        self.run_truth_source(&source, reporter)
    }

    pub fn run_truth_source(&mut self, source: &dyn EventSource, reporter: &mut Reporter) -> Result<()> {
        self.for_each_event(source, reporter, Self::fit_truth_event)
    }

    fn for_each_event(
        &mut self,
        source: &dyn EventSource,
        reporter: &mut Reporter,
        process: fn(&mut Self, usize, &EventData, &mut Reporter) -> Result<EventSummary>,
    ) -> Result<()> {
        let first = self.config.input.skip;
        let last = first + self.config.input.events;
        log::info!("processing events [{first}, {last}) from {} input", source.name());
        for event in first..last {
            let start = Instant::now();
            let data = source.read_event(event, &self.view)?;
            let reading = start.elapsed();
            process(self, event, &data, reporter)?;
            // only completed events count towards the totals
            reporter.timing_mut().add("Hit reading (cpu)", reading);
        }
        Ok(())
    }

    /// Run both paths on one event, compare them and hand everything to `reporter`.
    pub fn process_event(&mut self, event: usize, data: &EventData, reporter: &mut Reporter) -> Result<EventSummary> {
        crate::profile_scope!("FullChain::ProcessEvent");
        let wall = Instant::now();
        let mut timing = TimingInfo::new();
        let profile = self.config.accelerator.profile_stages;
        let scaler = self.config.finding.navigation_buffer_size_scaler as usize;
        let bfield = [0.0, 0.0, self.field.bz()];
        let main = self.ctx.resources.main.clone();
        let copy = self.ctx.copy.clone();

        let (d_spacepoints, _) = copy.upload(&data.spacepoints, &main)?;
        let (d_modules, _) = copy.upload(&data.modules, &main)?;
        let (d_measurements, _) = copy.upload(&data.measurements, &main)?;

        let mut cpu = self.host.as_ref().map(|_| PathOutputs {
            measurements: data.measurements.clone(),
            ..Default::default()
        });

        let d_seeds = {
            let _t = timing.timer("Seeding (device)");
            let seeds = self.device.seeding.run(&d_spacepoints)?;
            if profile {
                self.stream.synchronize()?;
            }
            seeds
        };
        if let (Some(host), Some(out)) = (&self.host, cpu.as_mut()) {
            let _t = timing.timer("Seeding (cpu)");
            out.seeds = host.seeding.run(&data.spacepoints)?;
        }

        let d_params = {
            let _t = timing.timer("Track params (device)");
            let params = self.device.params.run(&d_spacepoints, &d_modules, &d_seeds, bfield)?;
            if profile {
                self.stream.synchronize()?;
            }
            params
        };
        if let (Some(host), Some(out)) = (&self.host, cpu.as_mut()) {
            let _t = timing.timer("Track params (cpu)");
            out.params = host.params.run(&data.spacepoints, &data.modules, &out.seeds, bfield)?;
        }

        let n_seeds = copy.get_size(&d_seeds)?;
        let mut d_navigation = NavigationBuffer::new(scaler * n_seeds, &main)?;
        let mut navigation = cpu
            .as_ref()
            .map(|out| vec![NavigationCandidate::default(); scaler * out.seeds.len()]);

        let d_candidates = {
            let _t = timing.timer("Track finding (device)");
            let candidates = self.device.finding.run(
                &self.view,
                &self.field,
                &mut d_navigation,
                &d_measurements,
                &d_params,
            )?;
            if profile {
                self.stream.synchronize()?;
            }
            candidates
        };
        if let (Some(host), Some(out), Some(nav)) = (&self.host, cpu.as_mut(), navigation.as_mut()) {
            let _t = timing.timer("Track finding (cpu)");
            out.candidates = host
                .finding
                .run(&self.view, &self.field, nav, &data.measurements, &out.params)?;
        }

        let d_tracks = {
            let _t = timing.timer("Track fitting (device)");
            let tracks = self
                .device
                .fitting
                .run(&self.view, &self.field, &mut d_navigation, &d_candidates)?;
            if profile {
                self.stream.synchronize()?;
            }
            tracks
        };
        if let (Some(host), Some(out), Some(nav)) = (&self.host, cpu.as_mut(), navigation.as_mut()) {
            let _t = timing.timer("Track fitting (cpu)");
            out.tracks = host
                .fitting
                .run(&self.view, &self.field, nav, &out.candidates)?;
        }

        self.stream.synchronize()?;
        let device = {
            let _t = timing.timer("Download (device)");
            PathOutputs {
                measurements: copy.to_host(&d_measurements)?,
                seeds: copy.to_host(&d_seeds)?,
                params: copy.to_host(&d_params)?,
                candidates: copy.download_container(&d_candidates)?,
                tracks: copy.download_container(&d_tracks)?,
            }
        };

        let mut summary = EventSummary {
            event,
            device,
            cpu,
            comparisons: BTreeMap::new(),
        };
        if let Some(cpu) = &summary.cpu {
            let _t = timing.timer("Comparison");
            summary.comparisons = self.compare(cpu, &summary.device);
        }

        reporter.record_event(data.modules.len(), data.spacepoints.len())?;
        reporter.record_outputs(
            &summary.cpu.as_ref().map(PathOutputs::counters).unwrap_or_default(),
            &summary.device.counters(),
        )?;
        if let Some(cpu) = &summary.cpu {
            record_comparisons(reporter, &summary.comparisons, cpu, &summary.device)?;
        }
        if let Some(truth) = &data.truth {
            let d = &summary.device;
            reporter.write_performance(&EventOutputs {
                event,
                spacepoints: &data.spacepoints,
                seeds: &d.seeds,
                candidates: &d.candidates,
                tracks: &d.tracks,
                truth,
            })?;
        }
        if let Some(writer) = &self.writer {
            if let Some(cpu) = &summary.cpu {
                dump(writer, event, "cpu", cpu);
            }
            dump(writer, event, "device", &summary.device);
        }

        timing.add("Wall time", wall.elapsed());
        reporter.timing_mut().merge(&timing);
        log::info!(
            "event {event}: {} spacepoints, {} seeds, {} candidates, {} fitted tracks (device)",
            data.spacepoints.len(),
            summary.device.seeds.len(),
            summary.device.candidates.len(),
            summary.device.tracks.len()
        );
        Ok(summary)
    }

    /// Fit the simulated particles of one event on both paths and compare the fitted tracks.
    ///
    /// Candidates are built from the measurement truth and carry seed
    /// parameters taken from the generated particle, so finding is skipped.
    pub fn fit_truth_event(&mut self, event: usize, data: &EventData, reporter: &mut Reporter) -> Result<EventSummary> {
        crate::profile_scope!("FullChain::FitTruthEvent");
        let truth = data
            .truth
            .as_ref()
            .ok_or_else(|| TrkxError::InvalidInput(format!("event {event} has no particle truth to fit")))?;
        let wall = Instant::now();
        let mut timing = TimingInfo::new();
        let min_hits = self.config.finding.min_track_candidates_per_track as usize;
        let candidates = truth_candidates(truth, &data.measurements, min_hits);
        let main = self.ctx.resources.main.clone();
        let copy = self.ctx.copy.clone();

        let d_candidates = {
            let _t = timing.timer("Candidate upload (device)");
            let sizes = copy.container_sizes(&candidates);
            let buffer = ContainerBuffer::new(&sizes, &main, &self.ctx.resources.host)?;
            let _ = copy.copy_container(&candidates, &buffer)?;
            buffer
        };
        let mut d_navigation = NavigationBuffer::new(candidates.len(), &main)?;
        let d_tracks = {
            let _t = timing.timer("Track fitting (device)");
            let tracks = self
                .device
                .fitting
                .run(&self.view, &self.field, &mut d_navigation, &d_candidates)?;
            if self.config.accelerator.profile_stages {
                self.stream.synchronize()?;
            }
            tracks
        };
        let cpu = match &self.host {
            Some(host) => {
                let _t = timing.timer("Track fitting (cpu)");
                let mut navigation = vec![NavigationCandidate::default(); candidates.len()];
                let tracks = host
                    .fitting
                    .run(&self.view, &self.field, &mut navigation, &candidates)?;
                Some(PathOutputs {
                    measurements: data.measurements.clone(),
                    candidates: candidates.clone(),
                    tracks,
                    ..Default::default()
                })
            }
            None => None,
        };

        self.stream.synchronize()?;
        let device = {
            let _t = timing.timer("Download (device)");
            PathOutputs {
                measurements: data.measurements.clone(),
                candidates: copy.download_container(&d_candidates)?,
                tracks: copy.download_container(&d_tracks)?,
                ..Default::default()
            }
        };

        let mut summary = EventSummary {
            event,
            device,
            cpu,
            comparisons: BTreeMap::new(),
        };
        if let Some(cpu) = &summary.cpu {
            let _t = timing.timer("Comparison");
            let report =
                CollectionComparator::new(FITTED_TRACKS).compare(cpu.tracks.headers(), summary.device.tracks.headers());
            summary.comparisons.insert(FITTED_TRACKS, report);
        }

        reporter.record_event(data.modules.len(), data.spacepoints.len())?;
        reporter.record_outputs(
            &summary.cpu.as_ref().map(PathOutputs::counters).unwrap_or_default(),
            &summary.device.counters(),
        )?;
        if let Some(cpu) = &summary.cpu {
            record_comparisons(reporter, &summary.comparisons, cpu, &summary.device)?;
        }
        let d = &summary.device;
        reporter.write_performance(&EventOutputs {
            event,
            spacepoints: &data.spacepoints,
            seeds: &[],
            candidates: &d.candidates,
            tracks: &d.tracks,
            truth,
        })?;
        if let Some(writer) = &self.writer {
            let outputs = summary.cpu.iter().map(|o| ("cpu", o)).chain([("device", &summary.device)]);
            for (label, o) in outputs {
                if let Err(e) = writer.write(event, label, o.tracks.headers()) {
                    log::error!("event {event}: {label} dump skipped: {e}");
                }
            }
        }

        timing.add("Wall time", wall.elapsed());
        reporter.timing_mut().merge(&timing);
        log::info!(
            "event {event}: {} truth candidates, {} fitted tracks (device)",
            candidates.len(),
            summary.device.tracks.len()
        );
        Ok(summary)
    }

    fn compare(&self, cpu: &PathOutputs, device: &PathOutputs) -> BTreeMap<&'static str, Vec<MatchReport>> {
        let mut reports = BTreeMap::new();
        reports.insert(
            "measurements",
            CollectionComparator::new("measurements").compare(&cpu.measurements, &device.measurements),
        );
        reports.insert(
            "seeds",
            CollectionComparator::new("seeds").compare(&cpu.seeds, &device.seeds),
        );
        reports.insert(
            "track params",
            CollectionComparator::new("track params").compare(&cpu.params, &device.params),
        );
        reports.insert(
            FITTED_TRACKS,
            CollectionComparator::new(FITTED_TRACKS).compare(cpu.tracks.headers(), device.tracks.headers()),
        );
        for (name, pairing) in [(CANDIDATES, Pairing::FirstMatch), (CANDIDATES_EXCLUSIVE, Pairing::Exclusive)] {
            let report = compare_candidates(&cpu.candidates, &device.candidates, self.predicate, pairing);
            log::info!("{name}: {report}");
            reports.insert(name, vec![report]);
        }
        reports
    }
}

fn record_comparisons(
    reporter: &mut Reporter,
    reports: &BTreeMap<&'static str, Vec<MatchReport>>,
    cpu: &PathOutputs,
    device: &PathOutputs,
) -> Result<()> {
    for (&name, r) in reports {
        let (n_cpu, n_device) = match name {
            "measurements" => (cpu.measurements.len(), device.measurements.len()),
            "seeds" => (cpu.seeds.len(), device.seeds.len()),
            "track params" => (cpu.params.len(), device.params.len()),
            FITTED_TRACKS => (cpu.tracks.len(), device.tracks.len()),
            _ => (cpu.candidates.len(), device.candidates.len()),
        };
        reporter.record_comparison(name, r, n_cpu, n_device)?;
        if name == CANDIDATES
            && let Some(first) = r.first()
        {
            reporter.record_candidate_match(first, n_cpu, n_device)?;
        }
    }
    Ok(())
}

/// One candidate per particle with at least `min_hits` measurements, seeded
/// from the generated momentum at its first measurement.
pub fn truth_candidates(
    truth: &EventTruth,
    measurements: &[Measurement],
    min_hits: usize,
) -> HostContainer<CandidateHeader, Measurement> {
    let mut candidates = HostContainer::new();
    for (particle_id, track) in truth.measurements_by_particle(measurements) {
        let (Some(particle), Some(first)) = (truth.particle(particle_id), track.first()) else {
            continue;
        };
        if track.len() < min_hits {
            continue;
        }
        let header = CandidateHeader {
            seed_index: candidates.len() as u32,
            seed_params: truth_params(particle, first),
        };
        candidates.push(header, track);
    }
    candidates
}

fn truth_params(particle: &Particle, first: &Measurement) -> BoundTrackParameters {
    let p = particle.pt().hypot(particle.momentum[2]);
    BoundTrackParameters {
        surface_link: first.surface_link,
        loc: first.local,
        phi: particle.phi(),
        theta: particle.pt().atan2(particle.momentum[2]),
        qop: if p > 0.0 { particle.charge / p } else { 0.0 },
        time: 0.0,
    }
}

fn dump(writer: &EventWriter, event: usize, label: &str, outputs: &PathOutputs) {
    let results = [
        writer.write(event, label, &outputs.seeds),
        writer.write(event, label, &outputs.params),
        writer.write(event, label, outputs.tracks.headers()),
    ];
    for result in results {
        if let Err(e) = result {
            log::error!("event {event}: {label} dump skipped: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::StreamMode;
    use crate::io::TruthLink;
    use trkx_kernels::{CellModule, Spacepoint, Surface};

    fn barrel() -> Detector {
        Detector::new(
            [30.0f32, 70.0, 110.0]
                .iter()
                .enumerate()
                .map(|(i, &r)| Surface {
                    geometry_id: i as u64 + 1,
                    radius: r,
                    half_length: 500.0,
                    thickness_x0: 0.0,
                })
                .collect(),
        )
        .unwrap()
    }

    fn straight_event(detector: &Detector) -> EventData {
        let measurements: Vec<Measurement> = [30.0f32, 70.0, 110.0]
            .iter()
            .enumerate()
            .map(|(i, &r)| Measurement {
                surface_link: i as u64 + 1,
                module_link: i as u32,
                local: [0.3 * r, 0.5 * r],
                variance: [1e-4, 1e-4],
            })
            .collect();
        let spacepoints: Vec<Spacepoint> =
            trkx_kernels::spacepoint_formation::form_spacepoints(&measurements, &detector.view()).unwrap();
        let modules = (1..=3)
            .map(|id| CellModule {
                surface_link: id,
                ..Default::default()
            })
            .collect();
        EventData {
            modules,
            measurements,
            spacepoints,
            truth: None,
        }
    }

    fn config(mode: StreamMode) -> ChainConfig {
        let mut config = ChainConfig::default();
        config.accelerator.stream_mode = mode;
        config
    }

    #[test]
    fn both_paths_agree_on_a_single_track() {
        for mode in [StreamMode::Worker, StreamMode::Inline] {
            let detector = barrel();
            let mut chain = FullChain::new(config(mode), &detector).unwrap();
            let mut reporter = Reporter::new(false);
            reporter.initialize().unwrap();
            let summary = chain.process_event(0, &straight_event(&detector), &mut reporter).unwrap();

            let cpu = summary.cpu.as_ref().unwrap();
            assert_eq!(summary.device.seeds.len(), 1);
            assert_eq!(cpu.seeds, summary.device.seeds);
            assert_eq!(cpu.params.len(), 1);
            assert_eq!(summary.candidate_match().unwrap().rate, 1.0);
            let stats = reporter.statistics();
            assert_eq!(stats.device.seeds, 1);
            assert_eq!(stats.cpu.found_tracks, 1);
            assert_eq!(stats.n_comparisons, 1);
            assert!(reporter.timing().get("Seeding (device)").is_some());
        }
    }

    #[test]
    fn mirror_disabled_leaves_cpu_counters_at_zero() {
        let detector = barrel();
        let mut config = config(StreamMode::Worker);
        config.accelerator.compare_with_cpu = false;
        let mut chain = FullChain::new(config, &detector).unwrap();
        let mut reporter = Reporter::new(false);
        reporter.initialize().unwrap();
        let summary = chain.process_event(0, &straight_event(&detector), &mut reporter).unwrap();
        assert!(summary.cpu.is_none());
        assert!(summary.comparisons.is_empty());
        let stats = reporter.statistics();
        assert_eq!(stats.cpu, PathCounters::default());
        assert_eq!(stats.device.fitted_tracks, 1);
        assert_eq!(stats.n_comparisons, 0);
        assert!(reporter.timing().get("Seeding (cpu)").is_none());
    }

    fn with_truth(mut data: EventData) -> EventData {
        let particle = Particle {
            particle_id: 4,
            momentum: [10.0 * 0.3f32.cos(), 10.0 * 0.3f32.sin(), 5.0],
            charge: -1.0,
            ..Default::default()
        };
        let links: Vec<TruthLink> = (0..data.measurements.len() as u64)
            .map(|measurement_id| TruthLink { measurement_id, particle_id: 4 })
            .collect();
        data.truth = Some(EventTruth::new(vec![particle], &data.measurements, &links));
        data
    }

    #[test]
    fn truth_tracks_fit_alike_on_both_paths() {
        for mode in [StreamMode::Worker, StreamMode::Inline] {
            let detector = barrel();
            let data = with_truth(straight_event(&detector));
            let mut chain = FullChain::new(config(mode), &detector).unwrap();
            let mut reporter = Reporter::new(false);
            reporter.initialize().unwrap();
            let summary = chain.fit_truth_event(0, &data, &mut reporter).unwrap();

            let cpu = summary.cpu.as_ref().unwrap();
            assert_eq!(summary.device.candidates, cpu.candidates);
            assert_eq!(summary.device.tracks.len(), 1);
            assert_eq!(summary.device.tracks.headers()[0].ndf, 2.0);
            assert_eq!(summary.comparisons[FITTED_TRACKS][0].rate, 1.0);
            assert!(summary.device.seeds.is_empty());
            let stats = reporter.statistics();
            assert_eq!(stats.device.fitted_tracks, 1);
            assert_eq!(stats.cpu.found_tracks, 1);
            assert!(reporter.timing().get("Seeding (device)").is_none());
            assert!(reporter.timing().get("Track fitting (device)").is_some());
        }
    }

    #[test]
    fn truth_candidates_follow_particles() {
        let detector = barrel();
        let data = with_truth(straight_event(&detector));
        let truth = data.truth.as_ref().unwrap();
        let candidates = truth_candidates(truth, &data.measurements, 3);
        assert_eq!(candidates.len(), 1);
        let (header, items) = candidates.iter().next().unwrap();
        assert_eq!(items, &data.measurements[..]);
        assert_eq!(header.seed_params.surface_link, 1);
        assert_eq!(header.seed_params.charge(), -1.0);
        assert!((header.seed_params.theta - 2.0f32.atan()).abs() < 1e-6);
        assert!(truth_candidates(truth, &data.measurements, 4).is_empty());
    }

    #[test]
    fn truth_fitting_needs_truth() {
        let detector = barrel();
        let mut chain = FullChain::new(config(StreamMode::Inline), &detector).unwrap();
        let mut reporter = Reporter::new(false);
        reporter.initialize().unwrap();
        let err = chain
            .fit_truth_event(0, &straight_event(&detector), &mut reporter)
            .unwrap_err();
        assert!(matches!(err, TrkxError::InvalidInput(_)), "{err}");
        assert_eq!(reporter.statistics().n_events, 0);
    }

    struct Events(Vec<EventData>);

    impl EventSource for Events {
        fn read_event(&self, event: usize, _detector: &DetectorView) -> Result<EventData> {
            Ok(self.0[event].clone())
        }

        fn name(&self) -> &'static str {
            "memory"
        }
    }

    #[test]
    fn failed_event_adds_no_reading_time() {
        let detector = barrel();
        let oversized = EventData {
            spacepoints: vec![Spacepoint::default(); 100_000],
            ..straight_event(&detector)
        };
        let mut limited = config(StreamMode::Inline);
        limited.accelerator.device_memory_mb = Some(1);
        limited.input.events = 1;
        let mut chain = FullChain::new(limited, &detector).unwrap();
        let mut reporter = Reporter::new(false);
        reporter.initialize().unwrap();
        let err = chain.run_source(&Events(vec![oversized]), &mut reporter).unwrap_err();
        assert!(matches!(err, TrkxError::MemoryAllocation(_)), "{err}");
        assert!(reporter.timing().get("Hit reading (cpu)").is_none());
        assert_eq!(reporter.statistics().n_events, 0);

        let mut unlimited = config(StreamMode::Inline);
        unlimited.input.events = 1;
        let mut chain = FullChain::new(unlimited, &detector).unwrap();
        chain.run_source(&Events(vec![straight_event(&detector)]), &mut reporter).unwrap();
        assert!(reporter.timing().get("Hit reading (cpu)").is_some());
    }

    #[test]
    fn invalid_configuration_fails_before_any_event() {
        let mut config = ChainConfig::default();
        config.finding.navigation_buffer_size_scaler = 0;
        assert!(matches!(
            FullChain::new(config, &barrel()),
            Err(TrkxError::Config(_))
        ));
    }

    #[test]
    fn unwritable_dump_directory_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "not a directory").unwrap();
        let detector = barrel();
        let mut config = config(StreamMode::Inline);
        config.output.directory = Some(blocker);
        let mut chain = FullChain::new(config, &detector).unwrap();
        let mut reporter = Reporter::new(false);
        reporter.initialize().unwrap();
        let summary = chain.process_event(0, &straight_event(&detector), &mut reporter).unwrap();
        assert_eq!(summary.device.tracks.len(), 1);
    }

    #[test]
    fn dumps_land_under_path_labels() {
        let dir = tempfile::tempdir().unwrap();
        let detector = barrel();
        let mut config = config(StreamMode::Worker);
        config.output.directory = Some(dir.path().to_path_buf());
        let mut chain = FullChain::new(config, &detector).unwrap();
        let mut reporter = Reporter::new(false);
        reporter.initialize().unwrap();
        chain.process_event(7, &straight_event(&detector), &mut reporter).unwrap();
        for label in ["cpu", "device"] {
            for suffix in ["-seeds.csv", "-params.csv", "-fitted.csv"] {
                let path = dir.path().join(label).join(format!("event000000007{suffix}"));
                assert!(path.exists(), "{}", path.display());
            }
        }
    }
}
