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

//! `trkx` command line: run the dual-path chain, fit truth tracks or simulate input events.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use trkx_core::config::DetectorFiles;
use trkx_core::device::StreamMode;
use trkx_core::io::{DataFormat, read_detector};
use trkx_core::simulation::default_barrel;
use trkx_core::{ChainConfig, FullChain, PileupSimulator, Reporter, SimulationConfig, reporter_for};

#[derive(Parser)]
#[command(name = "trkx")]
#[command(about = "Dual-path (CPU + accelerator) track reconstruction", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run seeding, finding and fitting over a range of events
    Seq(SeqArgs),
    /// Fit simulated particles on both paths, skipping seeding and finding
    Fit(SeqArgs),
    /// Generate pile-up events with truth
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct SeqArgs {
    /// JSON chain configuration; flags below override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "DIR")]
    input_directory: Option<PathBuf>,

    #[arg(long, value_name = "FORMAT")]
    input_data_format: Option<DataFormat>,

    /// Events to skip before processing
    #[arg(long)]
    skip: Option<usize>,

    /// Number of events to process
    #[arg(long)]
    events: Option<usize>,

    #[arg(long, value_name = "FILE")]
    detector_file: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    material_file: Option<PathBuf>,

    #[arg(long, value_name = "FILE")]
    grid_file: Option<PathBuf>,

    /// Solenoid field along z, T
    #[arg(long)]
    bz: Option<f32>,

    #[arg(long)]
    delta_r_max: Option<f32>,

    #[arg(long)]
    min_pt: Option<f32>,

    #[arg(long)]
    max_seeds_per_middle: Option<u32>,

    #[arg(long)]
    chi2_max: Option<f32>,

    #[arg(long)]
    max_num_branches_per_surface: Option<u32>,

    /// Navigation slots per seed
    #[arg(long)]
    nav_buffer_scaler: Option<u32>,

    #[arg(long)]
    min_track_candidates_per_track: Option<u32>,

    #[arg(long)]
    max_track_candidates_per_track: Option<u32>,

    #[arg(long)]
    max_propagation_steps: Option<u32>,

    /// Mirror every stage on the CPU and compare
    #[arg(long)]
    compare_with_cpu: Option<bool>,

    /// Evaluate device outputs against simulated truth
    #[arg(long)]
    check_performance: bool,

    /// Synchronise after every device stage for per-stage timings
    #[arg(long)]
    profile_stages: bool,

    #[arg(long, value_name = "DIR")]
    output_directory: Option<PathBuf>,

    /// Append per-event candidate match rates to this file
    #[arg(long, value_name = "FILE")]
    match_log: Option<PathBuf>,

    #[arg(long, value_name = "MODE")]
    stream_mode: Option<StreamMode>,

    #[arg(long, value_name = "MB")]
    device_memory_mb: Option<usize>,
}

impl SeqArgs {
    fn chain_config(&self) -> Result<ChainConfig> {
        let mut config = match &self.config {
            Some(path) => ChainConfig::from_json_file(path)?,
            None => ChainConfig::default(),
        }
        .with_env_overrides();

        if let Some(bz) = self.bz {
            config = config.with_field(bz);
        }
        let input = &mut config.input;
        if let Some(dir) = &self.input_directory {
            input.directory = dir.clone();
        }
        if let Some(format) = self.input_data_format {
            input.format = format;
        }
        if let Some(skip) = self.skip {
            input.skip = skip;
        }
        if let Some(events) = self.events {
            input.events = events;
        }

        if let Some(path) = &self.detector_file {
            config.detector.detector = path.clone();
        }
        if self.material_file.is_some() {
            config.detector.material = self.material_file.clone();
        }
        if self.grid_file.is_some() {
            config.detector.grid = self.grid_file.clone();
        }

        if let Some(v) = self.delta_r_max {
            config.seedfinder.delta_r_max = v;
        }
        if let Some(v) = self.min_pt {
            config.seedfinder.min_pt = v;
        }
        if let Some(v) = self.max_seeds_per_middle {
            config.seedfilter.max_seeds_per_middle = v;
        }

        let finding = &mut config.finding;
        if let Some(v) = self.chi2_max {
            finding.chi2_max = v;
        }
        if let Some(v) = self.max_num_branches_per_surface {
            finding.max_num_branches_per_surface = v;
        }
        if let Some(v) = self.nav_buffer_scaler {
            finding.navigation_buffer_size_scaler = v;
        }
        if let Some(v) = self.min_track_candidates_per_track {
            finding.min_track_candidates_per_track = v;
        }
        if let Some(v) = self.max_track_candidates_per_track {
            finding.max_track_candidates_per_track = v;
        }
        if let Some(v) = self.max_propagation_steps {
            finding.propagation.max_iterations = v;
            config.fitting.propagation.max_iterations = v;
        }

        if let Some(v) = self.compare_with_cpu {
            config.accelerator.compare_with_cpu = v;
        }
        if let Some(mode) = self.stream_mode {
            config.accelerator.stream_mode = mode;
        }
        if self.device_memory_mb.is_some() {
            config.accelerator.device_memory_mb = self.device_memory_mb;
        }
        config.accelerator.profile_stages |= self.profile_stages;
        config.check_performance |= self.check_performance;
        if self.output_directory.is_some() {
            config.output.directory = self.output_directory.clone();
        }
        if self.match_log.is_some() {
            config.output.match_log = self.match_log.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Args)]
struct SimulateArgs {
    #[arg(long, default_value = "1")]
    events: usize,

    /// Pile-up vertices per event
    #[arg(long, default_value = "10")]
    vertices: usize,

    #[arg(long, default_value = "10")]
    tracks_per_vertex: usize,

    /// Tracks from the nominal interaction point
    #[arg(long, default_value = "0")]
    hard_scatter_tracks: usize,

    #[arg(long, default_value = "42")]
    seed: u64,

    #[arg(long, default_value = "2.0")]
    bz: f32,

    /// Detector geometry; a built-in eight-layer barrel when absent
    #[arg(long, value_name = "FILE")]
    detector_file: Option<PathBuf>,

    #[arg(long)]
    no_scattering: bool,

    #[arg(long, value_name = "DIR")]
    output_directory: PathBuf,
}

fn seq(args: &SeqArgs) -> Result<()> {
    run_chain(args, FullChain::run)
}

fn fit(args: &SeqArgs) -> Result<()> {
    run_chain(args, FullChain::run_truth_fitting)
}

fn run_chain(args: &SeqArgs, run: fn(&mut FullChain, &mut Reporter) -> trkx_core::Result<()>) -> Result<()> {
    let config = args.chain_config()?;
    let detector = read_detector(&config.detector).context("loading detector")?;
    let mut chain = FullChain::new(config.clone(), &detector)?;
    let mut reporter = reporter_for(&config);
    reporter.initialize()?;

    let outcome = run(&mut chain, &mut reporter);
    // completed events are reported even when the loop aborted
    let summary = reporter.finalize();
    println!("{reporter}");
    outcome?;
    summary?;
    Ok(())
}

fn simulate(args: &SimulateArgs) -> Result<()> {
    let detector = match &args.detector_file {
        Some(path) => read_detector(&DetectorFiles {
            detector: path.clone(),
            material: None,
            grid: None,
        })?,
        None => default_barrel()?,
    };
    let config = SimulationConfig {
        events: args.events,
        seed: args.seed,
        hard_scatter_tracks: args.hard_scatter_tracks,
        vertices: args.vertices,
        tracks_per_vertex: args.tracks_per_vertex,
        bz: args.bz,
        scattering: !args.no_scattering,
        ..Default::default()
    };
    let simulator = PileupSimulator::new(config, detector)?;
    let summary = simulator
        .run(&args.output_directory)
        .with_context(|| format!("writing events to {}", args.output_directory.display()))?;
    println!(
        "simulated {} events: {} particles, {} measurements in {}",
        summary.events,
        summary.particles,
        summary.measurements,
        args.output_directory.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = match &cli.command {
        Commands::Seq(args) => seq(args),
        Commands::Fit(args) => fit(args),
        Commands::Simulate(args) => simulate(args),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
