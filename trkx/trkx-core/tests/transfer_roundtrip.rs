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

//! Host/device transfers through a worker stream.

use trkx_core::TrkxError;
use trkx_core::device::{
    AsyncCopy, Buffer, ContainerBuffer, HostContainer, MemoryKind, MemoryResources, Stream,
    StreamMode,
};
use trkx_kernels::{FittingResult, Measurement, TrackState};

fn setup(device_bytes: Option<usize>) -> (Stream, AsyncCopy, MemoryResources) {
    let _ = env_logger::builder().is_test(true).try_init();
    let stream = Stream::new(StreamMode::Worker, 4).unwrap();
    let resources = MemoryResources::new(device_bytes, None);
    let copy = AsyncCopy::new(stream.handle(), resources.host.clone()).unwrap();
    (stream, copy, resources)
}

fn track_states() -> HostContainer<FittingResult, TrackState> {
    (0..5u32)
        .map(|i| {
            let header = FittingResult {
                ndf: 2.0 * i as f32,
                chi2: 0.5 * i as f32,
                ..Default::default()
            };
            let states = (0..i)
                .map(|j| TrackState {
                    measurement: Measurement {
                        surface_link: j as u64 + 1,
                        module_link: j,
                        local: [i as f32, j as f32],
                        variance: [1e-4, 1e-4],
                    },
                    chi2: j as f32,
                    ..Default::default()
                })
                .collect();
            (header, states)
        })
        .collect()
}

#[test]
fn container_round_trip_is_exact() {
    let (_stream, copy, resources) = setup(None);
    let host = track_states();
    let sizes = copy.container_sizes(&host);
    assert_eq!(sizes.headers, 5);
    assert_eq!(sizes.items, vec![0, 1, 2, 3, 4]);

    let device = ContainerBuffer::new(&sizes, &resources.main, &resources.host).unwrap();
    copy.copy_container(&host, &device).unwrap().wait().unwrap();
    assert_eq!(copy.get_container_sizes(&device).unwrap(), sizes);
    assert_eq!(copy.download_container(&device).unwrap(), host);
}

#[test]
fn device_to_device_copy_then_download() {
    let (_stream, copy, resources) = setup(None);
    let values: Vec<u32> = (0..64).collect();
    let (src, _) = copy.upload(&values, &resources.main).unwrap();
    let dst = Buffer::<u32>::new(values.len(), &resources.main).unwrap();
    copy.copy(&src, &dst).unwrap().wait().unwrap();
    assert_eq!(dst.kind(), MemoryKind::Device);
    assert!(dst.host_view().is_err());
    assert_eq!(copy.download(&dst).unwrap().wait().unwrap(), values);
}

#[test]
fn sizing_mismatch_is_a_schema_error() {
    let (_stream, copy, resources) = setup(None);
    let host = track_states();
    let mut sizes = copy.container_sizes(&host);
    sizes.items[4] = 1;
    let device = ContainerBuffer::new(&sizes, &resources.main, &resources.host).unwrap();
    assert!(matches!(
        copy.copy_container(&host, &device),
        Err(TrkxError::SchemaMismatch(_))
    ));
}

#[test]
fn exhausted_device_memory_is_fatal() {
    let (_stream, copy, resources) = setup(Some(256));
    let values = vec![0u64; 64];
    let err = copy.upload(&values, &resources.main).unwrap_err();
    assert!(matches!(err, TrkxError::MemoryAllocation(_)));
    assert!(err.to_string().contains("MiB"), "{err}");
}
