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

pub mod buffer;
pub mod container;
pub mod copy;
pub mod memory;
pub mod stream;

pub use buffer::{Buffer, BufferInfo, BufferShape, Element};
pub use container::{ContainerBuffer, ContainerSizes, HostContainer, JaggedBuffer};
pub use copy::{AsyncCopy, CopyDirection, Download};
pub use memory::{MemoryKind, MemoryResource, MemoryResources};
pub use stream::{Event, Stream, StreamHandle, StreamMode};

use trkx_kernels::NavigationCandidate;

use crate::error::Result;

/// Everything an accelerator stage needs: resources, the copy object and the stream.
#[derive(Clone)]
pub struct DeviceContext {
    pub resources: MemoryResources,
    pub copy: AsyncCopy,
    pub stream: StreamHandle,
}

impl DeviceContext {
    pub fn new(stream: &Stream, resources: MemoryResources) -> Result<Self> {
        let handle = stream.handle();
        Ok(Self {
            copy: AsyncCopy::new(handle.clone(), resources.host.clone())?,
            stream: handle,
            resources,
        })
    }
}

/// Per-track navigation scratch shared by finding and fitting.
#[derive(Debug, Clone)]
pub struct NavigationBuffer {
    slots: Buffer<NavigationCandidate>,
}

impl NavigationBuffer {
    pub fn new(slots: usize, mr: &MemoryResource) -> Result<Self> {
        Ok(Self {
            slots: Buffer::new(slots, mr)?,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    pub fn slots(&self) -> &Buffer<NavigationCandidate> {
        &self.slots
    }
}
