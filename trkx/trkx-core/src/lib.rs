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

// Dual-path track reconstruction chain.
//
// An accelerator path runs every stage through device buffers on an ordered
// stream; an optional CPU path mirrors it on host vectors. Outputs of both
// paths are compared and aggregated per run.

pub mod aggregator;
pub mod algorithms;
pub mod comparator;
pub mod config;
pub mod device;
pub mod error;
pub mod io;
pub mod pipeline;
#[macro_use]
pub mod profiling;
pub mod simulation;
pub mod writers;

pub use aggregator::{MatchLog, PathCounters, Reporter, RunStatistics, RunSummary};
pub use algorithms::{Accelerator, ExecutionSpace, Host, StageSet};
pub use comparator::{CandidatePredicate, CollectionComparator, MatchReport, Pairing};
pub use config::ChainConfig;
pub use error::{Result, TrkxError};
pub use pipeline::{EventSummary, FullChain, PathOutputs, reporter_for};
pub use simulation::{PileupSimulator, SimulationConfig};
