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

//! Asynchronous copies between memory domains.
//!
//! Every transfer is one `copy` issued on the bound stream; the direction
//! follows from the source and destination domains. Sizes of resizable
//! buffers are only known once the producing work ran, so reading them
//! synchronises the stream.

use std::fmt;

use crate::device::buffer::{Buffer, Element};
use crate::device::container::{ContainerBuffer, ContainerSizes, HostContainer};
use crate::device::memory::{MemoryKind, MemoryResource};
use crate::device::stream::{Event, StreamHandle};
use crate::error::{Result, TrkxError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
    HostToHost,
}

impl CopyDirection {
    pub fn between(src: MemoryKind, dst: MemoryKind) -> Self {
        match (src.is_host_accessible(), dst.is_host_accessible()) {
            (true, true) => CopyDirection::HostToHost,
            (true, false) => CopyDirection::HostToDevice,
            (false, true) => CopyDirection::DeviceToHost,
            (false, false) => CopyDirection::DeviceToDevice,
        }
    }
}

impl fmt::Display for CopyDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CopyDirection::HostToDevice => "H2D",
            CopyDirection::DeviceToHost => "D2H",
            CopyDirection::DeviceToDevice => "D2D",
            CopyDirection::HostToHost => "H2H",
        })
    }
}

/// Pending download; `wait` yields the host copy.
#[must_use = "a download does nothing unless waited on"]
pub struct Download<T: Element> {
    target: Buffer<T>,
    event: Event,
}

impl<T: Element> Download<T> {
    pub fn wait(self) -> Result<Vec<T>> {
        self.event.wait()?;
        let view = self.target.host_view()?;
        Ok(view.clone())
    }
}

/// Copy object bound to one stream and one host-accessible resource.
#[derive(Clone)]
pub struct AsyncCopy {
    stream: StreamHandle,
    host: MemoryResource,
}

impl AsyncCopy {
    pub fn new(stream: StreamHandle, host: MemoryResource) -> Result<Self> {
        if !host.kind().is_host_accessible() {
            return Err(TrkxError::Config(format!(
                "copy staging resource must be host-accessible, got {}",
                host.kind()
            )));
        }
        Ok(Self { stream, host })
    }

    pub fn stream(&self) -> &StreamHandle {
        &self.stream
    }

    /// Copy all of `src` into `dst`. Fixed destinations take exactly their
    /// capacity, resizable ones adopt the source size.
    pub fn copy<T: Element>(&self, src: &Buffer<T>, dst: &Buffer<T>) -> Result<Event> {
        if !src.is_resizable() && src.capacity() > dst.capacity() {
            return Err(TrkxError::MemoryAllocation(format!(
                "copy of {} elements into {}",
                src.capacity(),
                dst.info()
            )));
        }
        let direction = CopyDirection::between(src.kind(), dst.kind());
        log::debug!("{direction} copy of {} into {}", src.info().schema, dst.info());
        let (src, dst) = (src.clone(), dst.clone());
        self.stream.enqueue(format!("{direction} copy"), move || {
            let values = src.read()?.clone();
            dst.store(values)
        })
    }

    /// Stage `host` and issue its transfer into a new buffer from `mr`.
    pub fn upload<T: Element>(&self, host: &[T], mr: &MemoryResource) -> Result<(Buffer<T>, Event)> {
        let staging = Buffer::from_vec(host.to_vec(), &self.host)?;
        let target = Buffer::new(host.len(), mr)?;
        let event = self.copy(&staging, &target)?;
        Ok((target, event))
    }

    pub fn download<T: Element>(&self, src: &Buffer<T>) -> Result<Download<T>> {
        let target = if src.is_resizable() {
            Buffer::resizable(src.capacity(), &self.host, &self.host)?
        } else {
            Buffer::new(src.capacity(), &self.host)?
        };
        let event = self.copy(src, &target)?;
        Ok(Download { target, event })
    }

    /// Blocking download.
    pub fn to_host<T: Element>(&self, src: &Buffer<T>) -> Result<Vec<T>> {
        self.download(src)?.wait()
    }

    /// Element count; synchronises the stream for resizable buffers.
    pub fn get_size<T: Element>(&self, buffer: &Buffer<T>) -> Result<usize> {
        if !buffer.is_resizable() {
            return Ok(buffer.capacity());
        }
        self.stream.synchronize()?;
        buffer.len_now()
    }

    /// Sizing step of a container transfer.
    pub fn container_sizes<H, I>(&self, host: &HostContainer<H, I>) -> ContainerSizes {
        host.sizes()
    }

    /// Payload step of a container transfer.
    pub fn copy_container<H: Element, I: Element>(
        &self,
        src: &HostContainer<H, I>,
        dst: &ContainerBuffer<H, I>,
    ) -> Result<Event> {
        if !dst.is_resizable() {
            let expected = dst.sizes_now()?;
            let actual = src.sizes();
            if expected != actual {
                return Err(TrkxError::SchemaMismatch(format!(
                    "container sized for {} rows / {} items cannot take {} rows / {} items",
                    expected.headers,
                    expected.total_items(),
                    actual.headers,
                    actual.total_items()
                )));
            }
        }
        let direction = CopyDirection::between(MemoryKind::Host, dst.kind());
        let (headers, rows) = src.clone().into_parts();
        let dst = dst.clone();
        self.stream
            .enqueue(format!("{direction} container copy"), move || dst.store(headers, rows))
    }

    pub fn upload_container<H: Element, I: Element>(
        &self,
        src: &HostContainer<H, I>,
        mr: &MemoryResource,
    ) -> Result<(ContainerBuffer<H, I>, Event)> {
        let sizes = self.container_sizes(src);
        let target = ContainerBuffer::new(&sizes, mr, &self.host)?;
        let event = self.copy_container(src, &target)?;
        Ok((target, event))
    }

    /// Row sizes of a container; synchronises the stream for resizable ones.
    pub fn get_container_sizes<H: Element, I: Element>(
        &self,
        buffer: &ContainerBuffer<H, I>,
    ) -> Result<ContainerSizes> {
        if buffer.is_resizable() {
            self.stream.synchronize()?;
        }
        buffer.sizes_now()
    }

    /// Read the sizes, allocate a matching host container, copy the payload.
    pub fn download_container<H: Element, I: Element>(
        &self,
        src: &ContainerBuffer<H, I>,
    ) -> Result<HostContainer<H, I>> {
        let sizes = self.get_container_sizes(src)?;
        let target = ContainerBuffer::<H, I>::new(&sizes, &self.host, &self.host)?;
        let direction = CopyDirection::between(src.kind(), target.kind());
        let (from, to) = (src.clone(), target.clone());
        self.stream
            .enqueue(format!("{direction} container copy"), move || {
                let snapshot = from.snapshot()?;
                let (headers, rows) = snapshot.into_parts();
                to.store(headers, rows)
            })?
            .wait()?;
        target.snapshot()
    }
}
