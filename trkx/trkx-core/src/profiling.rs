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

//! Named wall-clock accumulators and scope timers.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Log the duration of the enclosing scope at debug level.
#[macro_export]
macro_rules! profile_scope {
    ($name:expr) => {
        let _profile_guard = $crate::profiling::ScopeTimer::new($name);
    };
}

/// Accumulated time per label, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimingInfo {
    entries: Vec<(String, Duration)>,
}

impl TimingInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, label: &str, elapsed: Duration) {
        match self.entries.iter_mut().find(|(l, _)| l == label) {
            Some((_, total)) => *total += elapsed,
            None => self.entries.push((label.to_string(), elapsed)),
        }
    }

    pub fn get(&self, label: &str) -> Option<Duration> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, d)| *d)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Duration)> {
        self.entries.iter().map(|(l, d)| (l.as_str(), *d))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add every entry of `other`, keeping this accumulator's label order.
    pub fn merge(&mut self, other: &TimingInfo) {
        for (label, elapsed) in other.iter() {
            self.add(label, elapsed);
        }
    }

    /// Start a timer that adds its elapsed time under `label` when dropped.
    pub fn timer<'a>(&'a mut self, label: &'static str) -> Timer<'a> {
        Timer {
            label,
            start: Instant::now(),
            sink: self,
        }
    }
}

impl fmt::Display for TimingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, elapsed) in self.iter() {
            writeln!(f, "{label:<28} {:>10.3} ms", elapsed.as_secs_f64() * 1e3)?;
        }
        Ok(())
    }
}

/// RAII timer bound to a `TimingInfo`.
pub struct Timer<'a> {
    label: &'static str,
    start: Instant,
    sink: &'a mut TimingInfo,
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.sink.add(self.label, self.start.elapsed());
    }
}

/// Guard behind `profile_scope!`.
pub struct ScopeTimer {
    name: &'static str,
    start: Instant,
}

impl ScopeTimer {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
        }
    }
}

impl Drop for ScopeTimer {
    fn drop(&mut self) {
        log::debug!("{} took {:?}", self.name, self.start.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_in_first_seen_order() {
        let mut timing = TimingInfo::new();
        timing.add("Seeding (device)", Duration::from_millis(2));
        timing.add("Seeding (cpu)", Duration::from_millis(5));
        timing.add("Seeding (device)", Duration::from_millis(3));
        let labels: Vec<_> = timing.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, ["Seeding (device)", "Seeding (cpu)"]);
        assert_eq!(timing.get("Seeding (device)"), Some(Duration::from_millis(5)));
        assert_eq!(timing.get("Comparison"), None);
    }

    #[test]
    fn timer_records_on_drop() {
        let mut timing = TimingInfo::new();
        {
            let _t = timing.timer("Wall time");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(timing.get("Wall time").unwrap() >= Duration::from_millis(1));
        assert!(timing.to_string().contains("Wall time"));
    }
}
