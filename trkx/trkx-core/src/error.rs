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

use std::path::PathBuf;

use thiserror::Error;
use trkx_kernels::{GeometryError, KernelError};

/// Error type for the reconstruction chain.
///
/// `Config`, `Geometry` and `Parse` are raised before the event loop starts;
/// `MemoryAllocation`, `SchemaMismatch`, `Device` and `Stage` abort a running
/// loop. Dump write failures are logged by the caller and never surface here.
#[derive(Error, Debug)]
pub enum TrkxError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {path} line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Memory allocation failed: {0}")]
    MemoryAllocation(String),

    #[error("Buffer schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: KernelError,
    },

    #[error("Detector error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("Invalid state: {0}")]
    State(String),
}

impl TrkxError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn stage(stage: &'static str) -> impl FnOnce(KernelError) -> Self {
        move |source| Self::Stage { stage, source }
    }

    /// Fatal before the loop (configuration class).
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Geometry(_) | Self::Parse { .. } | Self::Io { .. }
        )
    }
}

/// Result type alias for trkx operations
pub type Result<T> = std::result::Result<T, TrkxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_error_names_stage() {
        let err = TrkxError::stage("seeding")(KernelError::EmptyCandidate(3));
        assert_eq!(err.to_string(), "Stage seeding failed: track candidate 3 has no measurements");
        assert!(!err.is_configuration());
    }

    #[test]
    fn geometry_errors_are_configuration() {
        let err: TrkxError = GeometryError::Empty.into();
        assert!(err.is_configuration());
    }
}
