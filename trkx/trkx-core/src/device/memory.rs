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

//! Memory resources with capacity accounting.
//!
//! A resource does not own storage; buffers reserve bytes from it for their
//! lifetime and give them back on drop. A reservation beyond the configured
//! capacity fails with an out-of-memory message.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

use crate::error::{Result, TrkxError};

fn bytes_to_mib(bytes: usize) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Memory domain of a resource and of every buffer allocated from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MemoryKind {
    /// Pageable host memory.
    Host,
    /// Page-locked host memory; host-readable, target of downloads.
    PinnedHost,
    /// Device working memory; never host-readable.
    Device,
    /// Shared memory, readable from both sides.
    Managed,
}

impl MemoryKind {
    pub fn is_host_accessible(self) -> bool {
        !matches!(self, MemoryKind::Device)
    }

    pub fn is_device_accessible(self) -> bool {
        matches!(self, MemoryKind::Device | MemoryKind::Managed)
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryKind::Host => "host",
            MemoryKind::PinnedHost => "pinned host",
            MemoryKind::Device => "device",
            MemoryKind::Managed => "managed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct ResourceState {
    label: String,
    kind: MemoryKind,
    capacity: Option<usize>,
    used: AtomicUsize,
    peak: AtomicUsize,
    allocations: AtomicUsize,
}

/// Shared handle to one memory resource.
#[derive(Debug, Clone)]
pub struct MemoryResource {
    state: Arc<ResourceState>,
}

fn build_oom_message(label: &str, context: &str, requested: usize, used: usize, total: usize) -> String {
    format!(
        "{label} out of memory during {context}: requested {:.2} MiB, free {:.2} MiB / total {:.2} MiB. Reduce the event size or raise the memory limit.",
        bytes_to_mib(requested),
        bytes_to_mib(total.saturating_sub(used)),
        bytes_to_mib(total),
    )
}

impl MemoryResource {
    pub fn new(label: impl Into<String>, kind: MemoryKind, capacity: Option<usize>) -> Self {
        Self {
            state: Arc::new(ResourceState {
                label: label.into(),
                kind,
                capacity,
                used: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                allocations: AtomicUsize::new(0),
            }),
        }
    }

    pub fn host() -> Self {
        Self::new("host", MemoryKind::Host, None)
    }

    pub fn pinned_host(capacity: Option<usize>) -> Self {
        Self::new("pinned host", MemoryKind::PinnedHost, capacity)
    }

    pub fn device(capacity: Option<usize>) -> Self {
        Self::new("device", MemoryKind::Device, capacity)
    }

    pub fn kind(&self) -> MemoryKind {
        self.state.kind
    }

    pub fn label(&self) -> &str {
        &self.state.label
    }

    pub fn capacity(&self) -> Option<usize> {
        self.state.capacity
    }

    pub fn used_bytes(&self) -> usize {
        self.state.used.load(Ordering::Acquire)
    }

    pub fn peak_bytes(&self) -> usize {
        self.state.peak.load(Ordering::Acquire)
    }

    pub fn live_allocations(&self) -> usize {
        self.state.allocations.load(Ordering::Acquire)
    }

    /// Guard that checks remaining capacity before a reservation is attempted.
    pub fn ensure_available(&self, requested: usize, context: &str) -> Result<()> {
        if let Some(total) = self.state.capacity {
            let used = self.used_bytes();
            if used.saturating_add(requested) > total {
                return Err(TrkxError::MemoryAllocation(build_oom_message(
                    &self.state.label,
                    context,
                    requested,
                    used,
                    total,
                )));
            }
        }
        Ok(())
    }

    /// Reserve `bytes` for the lifetime of the returned guard.
    pub(crate) fn reserve(&self, bytes: usize, context: &str) -> Result<Reservation> {
        let state = &self.state;
        let mut used = state.used.load(Ordering::Acquire);
        loop {
            let next = used.saturating_add(bytes);
            if let Some(total) = state.capacity
                && next > total
            {
                return Err(TrkxError::MemoryAllocation(build_oom_message(
                    &state.label,
                    context,
                    bytes,
                    used,
                    total,
                )));
            }
            match state
                .used
                .compare_exchange_weak(used, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    state.peak.fetch_max(next, Ordering::AcqRel);
                    state.allocations.fetch_add(1, Ordering::AcqRel);
                    return Ok(Reservation {
                        resource: Arc::clone(state),
                        bytes,
                    });
                }
                Err(current) => used = current,
            }
        }
    }
}

/// Bytes held against a resource; released on drop.
#[derive(Debug)]
pub(crate) struct Reservation {
    resource: Arc<ResourceState>,
    bytes: usize,
}

impl Reservation {
    pub(crate) fn kind(&self) -> MemoryKind {
        self.resource.kind
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.resource.used.fetch_sub(self.bytes, Ordering::AcqRel);
        self.resource.allocations.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The resource pair shared by all accelerator stages.
///
/// `main` backs device working buffers; `host` is host-accessible memory used
/// for size counters, jagged row tables, staging and download targets.
#[derive(Debug, Clone)]
pub struct MemoryResources {
    pub main: MemoryResource,
    pub host: MemoryResource,
}

impl MemoryResources {
    pub fn new(device_capacity: Option<usize>, host_capacity: Option<usize>) -> Self {
        Self {
            main: MemoryResource::device(device_capacity),
            host: MemoryResource::pinned_host(host_capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_is_released_on_drop() {
        let mr = MemoryResource::device(Some(1024));
        {
            let _a = mr.reserve(512, "test").unwrap();
            let _b = mr.reserve(256, "test").unwrap();
            assert_eq!(mr.used_bytes(), 768);
            assert_eq!(mr.live_allocations(), 2);
        }
        assert_eq!(mr.used_bytes(), 0);
        assert_eq!(mr.peak_bytes(), 768);
    }

    #[test]
    fn exhaustion_reports_mib() {
        let mr = MemoryResource::device(Some(1024 * 1024));
        let _held = mr.reserve(1024 * 1024, "first").unwrap();
        let err = mr.reserve(1, "seeding").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("device out of memory during seeding"), "{msg}");
        assert!(msg.contains("total 1.00 MiB"), "{msg}");
        assert!(mr.ensure_available(1, "check").is_err());
    }

    #[test]
    fn unbounded_host_never_fails() {
        let mr = MemoryResource::host();
        assert!(mr.reserve(usize::MAX / 2, "big").is_ok());
        assert!(MemoryKind::PinnedHost.is_host_accessible());
        assert!(!MemoryKind::Device.is_host_accessible());
    }
}
