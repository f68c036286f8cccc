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

//! Two-level containers: one header per row plus a variable-length item row.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use crate::device::buffer::{Buffer, BufferInfo, BufferShape, Element, lock_poisoned, short_type_name};
use crate::device::memory::{MemoryKind, MemoryResource, Reservation};
use crate::error::{Result, TrkxError};

/// Row count and per-row item counts of a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSizes {
    pub headers: usize,
    pub items: Vec<usize>,
}

impl ContainerSizes {
    pub fn total_items(&self) -> usize {
        self.items.iter().sum()
    }
}

/// Host-side container; headers and rows have the same length by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct HostContainer<H, I> {
    headers: Vec<H>,
    items: Vec<Vec<I>>,
}

impl<H, I> Default for HostContainer<H, I> {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            items: Vec::new(),
        }
    }
}

impl<H, I> HostContainer<H, I> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, header: H, items: Vec<I>) {
        self.headers.push(header);
        self.items.push(items);
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn headers(&self) -> &[H] {
        &self.headers
    }

    pub fn items(&self) -> &[Vec<I>] {
        &self.items
    }

    pub fn iter(&self) -> impl Iterator<Item = (&H, &[I])> {
        self.headers.iter().zip(self.items.iter().map(Vec::as_slice))
    }

    pub fn sizes(&self) -> ContainerSizes {
        ContainerSizes {
            headers: self.headers.len(),
            items: self.items.iter().map(Vec::len).collect(),
        }
    }

    pub fn into_parts(self) -> (Vec<H>, Vec<Vec<I>>) {
        (self.headers, self.items)
    }

    /// Rebuild from parts; fails when the lengths differ.
    pub fn from_parts(headers: Vec<H>, items: Vec<Vec<I>>) -> Result<Self> {
        if headers.len() != items.len() {
            return Err(TrkxError::SchemaMismatch(format!(
                "{} headers but {} item rows",
                headers.len(),
                items.len()
            )));
        }
        Ok(Self { headers, items })
    }
}

impl<H, I> FromIterator<(H, Vec<I>)> for HostContainer<H, I> {
    fn from_iter<T: IntoIterator<Item = (H, Vec<I>)>>(iter: T) -> Self {
        let mut container = Self::new();
        for (h, items) in iter {
            container.push(h, items);
        }
        container
    }
}

enum RowLayout {
    Fixed(Vec<usize>),
    Resizable { rows: usize, row_capacity: usize },
}

struct JaggedAllocation<I> {
    rows: RwLock<Vec<Vec<I>>>,
    layout: RowLayout,
    kind: MemoryKind,
    _payload: Reservation,
    _table: Reservation,
}

/// Item rows of a container. The row table lives in the host-accessible
/// resource, the payload in the main one.
pub struct JaggedBuffer<I: Element> {
    alloc: Arc<JaggedAllocation<I>>,
}

impl<I: Element> Clone for JaggedBuffer<I> {
    fn clone(&self) -> Self {
        Self {
            alloc: Arc::clone(&self.alloc),
        }
    }
}

impl<I: Element> JaggedBuffer<I> {
    fn item_bytes(n: usize) -> usize {
        n.saturating_mul(std::mem::size_of::<I>())
    }

    pub fn new(row_sizes: &[usize], mr: &MemoryResource, host_mr: &MemoryResource) -> Result<Self> {
        let context = format!("jagged {} buffer", short_type_name::<I>());
        let total: usize = row_sizes.iter().sum();
        let payload = mr.reserve(Self::item_bytes(total), &context)?;
        let table = host_mr.reserve(row_sizes.len().saturating_mul(std::mem::size_of::<u32>()), &context)?;
        let rows = row_sizes.iter().map(|&n| vec![I::default(); n]).collect();
        Ok(Self {
            alloc: Arc::new(JaggedAllocation {
                rows: RwLock::new(rows),
                layout: RowLayout::Fixed(row_sizes.to_vec()),
                kind: payload.kind(),
                _payload: payload,
                _table: table,
            }),
        })
    }

    /// Up to `rows` rows of at most `row_capacity` items each.
    pub fn resizable(
        rows: usize,
        row_capacity: usize,
        mr: &MemoryResource,
        host_mr: &MemoryResource,
    ) -> Result<Self> {
        let context = format!("resizable jagged {} buffer", short_type_name::<I>());
        let payload = mr.reserve(Self::item_bytes(rows.saturating_mul(row_capacity)), &context)?;
        let table = host_mr.reserve(
            rows.saturating_add(1).saturating_mul(std::mem::size_of::<u32>()),
            &context,
        )?;
        Ok(Self {
            alloc: Arc::new(JaggedAllocation {
                rows: RwLock::new(Vec::new()),
                layout: RowLayout::Resizable { rows, row_capacity },
                kind: payload.kind(),
                _payload: payload,
                _table: table,
            }),
        })
    }

    pub fn info(&self) -> BufferInfo {
        let (capacity, resizable) = match &self.alloc.layout {
            RowLayout::Fixed(sizes) => (sizes.iter().sum(), false),
            RowLayout::Resizable { rows, row_capacity } => (rows.saturating_mul(*row_capacity), true),
        };
        BufferInfo {
            kind: self.alloc.kind,
            shape: BufferShape::Jagged,
            schema: short_type_name::<I>(),
            capacity,
            resizable,
        }
    }

    pub fn kind(&self) -> MemoryKind {
        self.alloc.kind
    }

    pub fn is_resizable(&self) -> bool {
        matches!(self.alloc.layout, RowLayout::Resizable { .. })
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Vec<I>>>> {
        self.alloc.rows.read().map_err(|_| lock_poisoned("jagged buffer"))
    }

    pub(crate) fn row_sizes(&self) -> Result<Vec<usize>> {
        Ok(self.read()?.iter().map(Vec::len).collect())
    }

    pub(crate) fn store(&self, rows: Vec<Vec<I>>) -> Result<()> {
        match &self.alloc.layout {
            RowLayout::Fixed(sizes) => {
                let incoming: Vec<usize> = rows.iter().map(Vec::len).collect();
                if &incoming != sizes {
                    return Err(TrkxError::SchemaMismatch(format!(
                        "{} sized for {} rows cannot take {} rows with {} items",
                        self.info(),
                        sizes.len(),
                        incoming.len(),
                        incoming.iter().sum::<usize>()
                    )));
                }
            }
            RowLayout::Resizable { rows: max_rows, row_capacity } => {
                if rows.len() > *max_rows {
                    return Err(TrkxError::MemoryAllocation(format!(
                        "{} overflow: {} rows written, {} allowed",
                        self.info(),
                        rows.len(),
                        max_rows
                    )));
                }
                if let Some(long) = rows.iter().find(|r| r.len() > *row_capacity) {
                    return Err(TrkxError::MemoryAllocation(format!(
                        "{} overflow: row of {} items, {} allowed",
                        self.info(),
                        long.len(),
                        row_capacity
                    )));
                }
            }
        }
        *self
            .alloc
            .rows
            .write()
            .map_err(|_| lock_poisoned("jagged buffer"))? = rows;
        Ok(())
    }
}

/// Header buffer paired with a jagged item buffer.
pub struct ContainerBuffer<H: Element, I: Element> {
    pub headers: Buffer<H>,
    pub items: JaggedBuffer<I>,
}

impl<H: Element, I: Element> Clone for ContainerBuffer<H, I> {
    fn clone(&self) -> Self {
        Self {
            headers: self.headers.clone(),
            items: self.items.clone(),
        }
    }
}

impl<H: Element, I: Element> fmt::Debug for ContainerBuffer<H, I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerBuffer({}; {})", self.headers.info(), self.items.info())
    }
}

impl<H: Element, I: Element> ContainerBuffer<H, I> {
    /// Fixed container with exactly the given shape.
    pub fn new(sizes: &ContainerSizes, mr: &MemoryResource, host_mr: &MemoryResource) -> Result<Self> {
        if sizes.headers != sizes.items.len() {
            return Err(TrkxError::SchemaMismatch(format!(
                "container sizing has {} headers but {} rows",
                sizes.headers,
                sizes.items.len()
            )));
        }
        Ok(Self {
            headers: Buffer::new(sizes.headers, mr)?,
            items: JaggedBuffer::new(&sizes.items, mr, host_mr)?,
        })
    }

    /// Container filled by device work, bounded by `rows` and `row_capacity`.
    pub fn resizable(
        rows: usize,
        row_capacity: usize,
        mr: &MemoryResource,
        host_mr: &MemoryResource,
    ) -> Result<Self> {
        Ok(Self {
            headers: Buffer::resizable(rows, mr, host_mr)?,
            items: JaggedBuffer::resizable(rows, row_capacity, mr, host_mr)?,
        })
    }

    pub fn kind(&self) -> MemoryKind {
        self.headers.kind()
    }

    pub fn is_resizable(&self) -> bool {
        self.headers.is_resizable()
    }

    pub(crate) fn sizes_now(&self) -> Result<ContainerSizes> {
        Ok(ContainerSizes {
            headers: self.headers.len_now()?,
            items: self.items.row_sizes()?,
        })
    }

    pub(crate) fn store(&self, headers: Vec<H>, rows: Vec<Vec<I>>) -> Result<()> {
        if headers.len() != rows.len() {
            return Err(TrkxError::SchemaMismatch(format!(
                "{} headers but {} item rows",
                headers.len(),
                rows.len()
            )));
        }
        self.headers.store(headers)?;
        self.items.store(rows)
    }

    pub(crate) fn snapshot(&self) -> Result<HostContainer<H, I>> {
        let headers = self.headers.read()?.clone();
        let items = self.items.read()?.clone();
        HostContainer::from_parts(headers, items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trkx_kernels::{CandidateHeader, Measurement};

    fn host_container() -> HostContainer<CandidateHeader, Measurement> {
        (0..3)
            .map(|i| {
                let header = CandidateHeader {
                    seed_index: i,
                    ..Default::default()
                };
                (header, vec![Measurement::default(); i as usize + 1])
            })
            .collect()
    }

    #[test]
    fn sizes_follow_rows() {
        let c = host_container();
        assert_eq!(
            c.sizes(),
            ContainerSizes {
                headers: 3,
                items: vec![1, 2, 3]
            }
        );
        assert_eq!(c.sizes().total_items(), 6);
        assert!(HostContainer::<u32, u32>::from_parts(vec![1], vec![]).is_err());
    }

    #[test]
    fn fixed_container_rejects_other_shape() {
        let device = MemoryResource::device(None);
        let host = MemoryResource::pinned_host(None);
        let sizes = ContainerSizes {
            headers: 2,
            items: vec![1, 2],
        };
        let buf = ContainerBuffer::<u32, u32>::new(&sizes, &device, &host).unwrap();
        let err = buf.store(vec![1, 2], vec![vec![1], vec![2]]).unwrap_err();
        assert!(matches!(err, TrkxError::SchemaMismatch(_)));
        buf.store(vec![1, 2], vec![vec![1], vec![2, 3]]).unwrap();
        assert_eq!(buf.sizes_now().unwrap(), sizes);
        assert_eq!(device.used_bytes(), 2 * 4 + 3 * 4);
        assert_eq!(host.used_bytes(), 2 * 4);
    }

    #[test]
    fn resizable_container_bounds_rows() {
        let device = MemoryResource::device(None);
        let host = MemoryResource::pinned_host(None);
        let buf = ContainerBuffer::<u32, u32>::resizable(2, 2, &device, &host).unwrap();
        assert_eq!(buf.sizes_now().unwrap(), ContainerSizes::default());
        assert!(buf.store(vec![1], vec![vec![1, 2, 3]]).is_err());
        assert!(buf.store(vec![1, 2, 3], vec![vec![], vec![], vec![]]).is_err());
        buf.store(vec![1], vec![vec![4, 5]]).unwrap();
        assert_eq!(buf.snapshot().unwrap().items(), &[vec![4, 5]]);
    }
}
