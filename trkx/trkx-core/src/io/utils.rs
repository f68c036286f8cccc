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

use std::path::{Path, PathBuf};

use crate::error::TrkxError;

pub const ENV_DATA_DIRECTORY: &str = "TRKX_DATA_DIRECTORY";

/// `event000000042-seeds.csv` for `(42, "-seeds.csv")`.
pub fn event_filename(event: usize, suffix: &str) -> String {
    format!("event{event:09}{suffix}")
}

/// Root for relative input paths: `TRKX_DATA_DIRECTORY`, or the working directory.
pub fn data_directory() -> PathBuf {
    std::env::var_os(ENV_DATA_DIRECTORY)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Absolute paths pass through; relative ones resolve against the data directory.
pub fn resolve(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_directory().join(path)
    }
}

/// Map a `csv` failure on `path` to `Io` or `Parse`. Field errors name the
/// column through `headers`; `line` is used when the error carries no position.
pub(crate) fn csv_error(path: &Path, headers: Option<&csv::StringRecord>, err: csv::Error) -> TrkxError {
    csv_error_at(path, headers, None, err)
}

pub(crate) fn csv_error_at(
    path: &Path,
    headers: Option<&csv::StringRecord>,
    line: Option<usize>,
    err: csv::Error,
) -> TrkxError {
    let line = err
        .position()
        .map(|p| p.line() as usize)
        .or(line)
        .unwrap_or(0);
    let message = match err.kind() {
        csv::ErrorKind::Deserialize { err: de, .. } => {
            let field = de
                .field()
                .and_then(|i| headers.and_then(|h| h.get(i as usize)))
                .unwrap_or("field");
            format!("invalid {field}: {}", de.kind())
        }
        _ => err.to_string(),
    };
    match err.into_kind() {
        csv::ErrorKind::Io(e) => TrkxError::io(path, e),
        _ => TrkxError::Parse {
            path: path.to_path_buf(),
            line,
            message,
        },
    }
}
