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

//! Tagged buffer handles.
//!
//! A `Buffer` knows its memory domain, shape and element schema. Handles are
//! cheap to clone so that work queued on a stream can keep an allocation alive
//! until it ran; the bytes go back to the resource when the last handle drops.
//! Host code reads buffer contents only through `host_view`, which refuses
//! device memory; everything else goes through the copy object.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::device::memory::{MemoryKind, MemoryResource, Reservation};
use crate::error::{Result, TrkxError};

/// Element types storable in buffers: plain, thread-safe records.
pub trait Element: Copy + Default + Send + Sync + fmt::Debug + 'static {}

impl<T: Copy + Default + Send + Sync + fmt::Debug + 'static> Element for T {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferShape {
    Flat,
    Jagged,
}

/// Tag carried by every handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub kind: MemoryKind,
    pub shape: BufferShape,
    pub schema: &'static str,
    pub capacity: usize,
    pub resizable: bool,
}

impl fmt::Display for BufferInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} buffer of {} (capacity {}{})",
            self.shape,
            self.kind,
            self.schema,
            self.capacity,
            if self.resizable { ", resizable" } else { "" }
        )
    }
}

pub(crate) fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

pub(crate) fn lock_poisoned(what: &str) -> TrkxError {
    TrkxError::Device(format!("{what} lock poisoned"))
}

struct Allocation<T> {
    data: RwLock<Vec<T>>,
    capacity: usize,
    resizable: bool,
    kind: MemoryKind,
    _payload: Reservation,
    _size: Option<Reservation>,
}

/// Flat buffer of `T` in one memory domain.
pub struct Buffer<T: Element> {
    alloc: Arc<Allocation<T>>,
}

impl<T: Element> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        Self {
            alloc: Arc::clone(&self.alloc),
        }
    }
}

impl<T: Element> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer({})", self.info())
    }
}

impl<T: Element> Buffer<T> {
    fn bytes(n: usize) -> usize {
        n.saturating_mul(std::mem::size_of::<T>())
    }

    /// Fixed-size buffer of `size` default elements.
    pub fn new(size: usize, mr: &MemoryResource) -> Result<Self> {
        let payload = mr.reserve(Self::bytes(size), &format!("{} buffer", short_type_name::<T>()))?;
        Ok(Self {
            alloc: Arc::new(Allocation {
                data: RwLock::new(vec![T::default(); size]),
                capacity: size,
                resizable: false,
                kind: payload.kind(),
                _payload: payload,
                _size: None,
            }),
        })
    }

    /// Capacity-bounded buffer whose size is set by the work that fills it.
    /// The size counter lives in the host-accessible resource.
    pub fn resizable(capacity: usize, mr: &MemoryResource, host_mr: &MemoryResource) -> Result<Self> {
        let context = format!("resizable {} buffer", short_type_name::<T>());
        let payload = mr.reserve(Self::bytes(capacity), &context)?;
        let size = host_mr.reserve(std::mem::size_of::<u32>(), &context)?;
        Ok(Self {
            alloc: Arc::new(Allocation {
                data: RwLock::new(Vec::with_capacity(capacity.min(1 << 20))),
                capacity,
                resizable: true,
                kind: payload.kind(),
                _payload: payload,
                _size: Some(size),
            }),
        })
    }

    /// Host buffer holding `values`, e.g. staging for an upload.
    pub fn from_vec(values: Vec<T>, mr: &MemoryResource) -> Result<Self> {
        if !mr.kind().is_host_accessible() {
            return Err(TrkxError::InvalidInput(format!(
                "cannot fill a {} buffer from the host directly",
                mr.kind()
            )));
        }
        let payload = mr.reserve(Self::bytes(values.len()), "host staging buffer")?;
        Ok(Self {
            alloc: Arc::new(Allocation {
                capacity: values.len(),
                data: RwLock::new(values),
                resizable: false,
                kind: payload.kind(),
                _payload: payload,
                _size: None,
            }),
        })
    }

    pub fn info(&self) -> BufferInfo {
        BufferInfo {
            kind: self.alloc.kind,
            shape: BufferShape::Flat,
            schema: short_type_name::<T>(),
            capacity: self.alloc.capacity,
            resizable: self.alloc.resizable,
        }
    }

    pub fn kind(&self) -> MemoryKind {
        self.alloc.kind
    }

    pub fn capacity(&self) -> usize {
        self.alloc.capacity
    }

    pub fn is_resizable(&self) -> bool {
        self.alloc.resizable
    }

    /// Read access for host code; refused for device memory.
    pub fn host_view(&self) -> Result<RwLockReadGuard<'_, Vec<T>>> {
        if !self.alloc.kind.is_host_accessible() {
            return Err(TrkxError::InvalidInput(format!(
                "{} is not host-readable; copy it to the host first",
                self.info()
            )));
        }
        self.read()
    }

    /// Give the handle back; the bytes are released once no queued work holds it.
    pub fn release(self) {}

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, Vec<T>>> {
        self.alloc.data.read().map_err(|_| lock_poisoned("buffer"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<T>>> {
        self.alloc.data.write().map_err(|_| lock_poisoned("buffer"))
    }

    /// Current element count; the authoritative size of resizable buffers.
    pub(crate) fn len_now(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    /// Replace the contents. Fixed buffers take exactly `capacity` elements,
    /// resizable buffers at most `capacity`.
    pub(crate) fn store(&self, values: Vec<T>) -> Result<()> {
        let n = values.len();
        if self.alloc.resizable {
            if n > self.alloc.capacity {
                return Err(TrkxError::MemoryAllocation(format!(
                    "{} overflow: {} elements written",
                    self.info(),
                    n
                )));
            }
        } else if n != self.alloc.capacity {
            return Err(TrkxError::SchemaMismatch(format!(
                "{} cannot hold {} elements",
                self.info(),
                n
            )));
        }
        *self.write()? = values;
        Ok(())
    }
}
