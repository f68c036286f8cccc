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

//! In-order execution stream: one worker thread + bounded queue of device work.
//!
//! Work items run strictly in issue order. A failing item poisons the stream:
//! later items are skipped and every following wait or synchronize reports
//! the first failure. `StreamMode::Inline` runs items on the issuing thread.
//! Issuing blocks while the queue is full.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{Receiver, Sender, bounded};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrkxError};

static NEXT_STREAM_ID: AtomicUsize = AtomicUsize::new(0);

type Work = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

enum Command {
    Task {
        label: String,
        work: Work,
        done: Sender<()>,
    },
    Shutdown,
}

/// Where device work executes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    /// Dedicated worker thread; issuing returns immediately.
    #[default]
    Worker,
    /// Synchronous execution on the issuing thread.
    Inline,
}

impl FromStr for StreamMode {
    type Err = TrkxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "worker" | "async" => Ok(StreamMode::Worker),
            "inline" | "sync" => Ok(StreamMode::Inline),
            other => Err(TrkxError::Config(format!(
                "unknown stream mode '{other}' (expected worker or inline)"
            ))),
        }
    }
}

impl fmt::Display for StreamMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamMode::Worker => f.write_str("worker"),
            StreamMode::Inline => f.write_str("inline"),
        }
    }
}

#[derive(Debug)]
struct StreamShared {
    id: usize,
    mode: StreamMode,
    failure: Mutex<Option<String>>,
    submitted: AtomicU64,
    completed: AtomicU64,
}

impl StreamShared {
    fn check(&self) -> Result<()> {
        let failure = self
            .failure
            .lock()
            .map_err(|_| TrkxError::Device("stream state lock poisoned".to_string()))?;
        match failure.as_ref() {
            Some(msg) => Err(TrkxError::Device(format!("stream {}: {}", self.id, msg))),
            None => Ok(()),
        }
    }

    fn is_failed(&self) -> bool {
        self.failure.lock().map(|f| f.is_some()).unwrap_or(true)
    }

    fn run(&self, label: &str, work: Work) {
        if self.is_failed() {
            log::debug!("stream {}: skipping '{}' after earlier failure", self.id, label);
        } else if let Err(e) = work() {
            log::error!("stream {}: '{}' failed: {}", self.id, label, e);
            if let Ok(mut failure) = self.failure.lock()
                && failure.is_none()
            {
                *failure = Some(format!("{label}: {e}"));
            }
        }
        self.completed.fetch_add(1, Ordering::AcqRel);
    }
}

fn worker_loop(rx: Receiver<Command>, shared: Arc<StreamShared>) {
    while let Ok(command) = rx.recv() {
        match command {
            Command::Task { label, work, done } => {
                shared.run(&label, work);
                let _ = done.send(());
            }
            Command::Shutdown => break,
        }
    }
}

/// Completion marker of one enqueued work item.
#[derive(Debug)]
#[must_use = "an event does nothing unless waited on"]
pub struct Event {
    done: Option<Receiver<()>>,
    shared: Arc<StreamShared>,
}

impl Event {
    /// Block until the work item (and everything issued before it) finished.
    pub fn wait(self) -> Result<()> {
        if let Some(rx) = self.done {
            rx.recv().map_err(|_| {
                TrkxError::Device(format!("stream {} worker terminated", self.shared.id))
            })?;
        }
        self.shared.check()
    }

    pub fn is_complete(&self) -> bool {
        self.done.as_ref().is_none_or(|rx| !rx.is_empty())
    }
}

/// Cloneable submission handle shared by the copy object and the stages.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<StreamShared>,
    tx: Option<Sender<Command>>,
}

impl StreamHandle {
    pub fn id(&self) -> usize {
        self.shared.id
    }

    pub fn mode(&self) -> StreamMode {
        self.shared.mode
    }

    /// Issue `work` behind everything issued so far.
    pub fn enqueue<F>(&self, label: impl Into<String>, work: F) -> Result<Event>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let label = label.into();
        self.shared.submitted.fetch_add(1, Ordering::AcqRel);
        match &self.tx {
            None => {
                self.shared.run(&label, Box::new(work));
                Ok(Event {
                    done: None,
                    shared: Arc::clone(&self.shared),
                })
            }
            Some(tx) => {
                let (done_tx, done_rx) = bounded(1);
                tx.send(Command::Task {
                    label,
                    work: Box::new(work),
                    done: done_tx,
                })
                .map_err(|_| {
                    TrkxError::Device(format!("stream {}: queue closed", self.shared.id))
                })?;
                Ok(Event {
                    done: Some(done_rx),
                    shared: Arc::clone(&self.shared),
                })
            }
        }
    }

    /// Wait for all issued work; reports the first failure on this stream.
    pub fn synchronize(&self) -> Result<()> {
        self.enqueue("synchronize", || Ok(()))?.wait()
    }

    /// Number of issued items not yet finished.
    pub fn pending(&self) -> u64 {
        self.shared
            .submitted
            .load(Ordering::Acquire)
            .saturating_sub(self.shared.completed.load(Ordering::Acquire))
    }
}

/// Owner of the worker thread.
pub struct Stream {
    handle: StreamHandle,
    join: Option<thread::JoinHandle<()>>,
}

impl Stream {
    pub fn new(mode: StreamMode, queue_capacity: usize) -> Result<Self> {
        let shared = Arc::new(StreamShared {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::AcqRel),
            mode,
            failure: Mutex::new(None),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        });
        if mode == StreamMode::Inline {
            return Ok(Self {
                handle: StreamHandle { shared, tx: None },
                join: None,
            });
        }
        let (tx, rx) = bounded(queue_capacity.max(1));
        let worker_shared = Arc::clone(&shared);
        let join = thread::Builder::new()
            .name(format!("trkx-stream-{}", shared.id))
            .spawn(move || worker_loop(rx, worker_shared))
            .map_err(|e| TrkxError::Device(format!("failed to spawn stream worker: {e}")))?;
        Ok(Self {
            handle: StreamHandle {
                shared,
                tx: Some(tx),
            },
            join: Some(join),
        })
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }

    pub fn id(&self) -> usize {
        self.handle.id()
    }

    pub fn synchronize(&self) -> Result<()> {
        self.handle.synchronize()
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Some(tx) = &self.handle.tx {
            let _ = tx.send(Command::Shutdown);
        }
        if let Some(join) = self.join.take()
            && join.join().is_err()
        {
            log::warn!("stream {} worker panicked", self.handle.id());
        }
    }
}
