// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Hardware index allocation over random stream populations.
use acm::*;
use chrono::{TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

const DMAC: MacAddress = [0x01, 0x80, 0xc2, 0, 0, 0x0e];
const SMAC: MacAddress = [0x02, 0, 0, 0, 0, 0x10];

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn setup() -> (Configuration<MemoryDevice>, ModuleId) {
    init();
    let mut config = Configuration::new(MemoryDevice::new(), Settings::default());
    let module = config
        .create_module(ConnectionMode::Parallel, Speed::Speed1G, 0)
        .unwrap();
    config
        .set_module_schedule(module, 1_000_000, Utc.timestamp(0, 0))
        .unwrap();
    (config, module)
}

/// Adds one random stream to `module`.
fn random_stream(
    config: &mut Configuration<MemoryDevice>,
    module: ModuleId,
    rng: &mut Xoshiro256StarStar,
    n: usize,
) -> StreamId {
    let stream = if rng.gen_bool(0.5) {
        let mut header = [0; 16];
        header[0] = n as u8;
        let id = config
            .create_ingress_triggered_stream(Lookup::new(header, [0xff; 16], None).unwrap())
            .unwrap();
        if rng.gen_bool(0.2) {
            config.add_operation(id, Operation::forward_all()).unwrap();
        } else {
            for k in 0..rng.gen_range(0..4) {
                let name = format!("acm_rx{}_{}", n, k);
                let op = Operation::read(14 + 8 * k, 8, &name).unwrap();
                config.add_operation(id, op).unwrap();
            }
        }
        id
    } else {
        let id = config
            .create_time_triggered_stream(DMAC, SMAC, 10, 0)
            .unwrap();
        for k in 0..rng.gen_range(0..4) {
            let name = format!("acm_tx{}_{}", n, k);
            config
                .add_operation(id, Operation::insert(8, &name).unwrap())
                .unwrap();
        }
        config
            .add_operation(id, Operation::pad(30, 0).unwrap())
            .unwrap();
        id
    };
    config.add_module_stream(module, stream).unwrap();
    stream
}

fn population(seed: u64, count: usize) -> (Configuration<MemoryDevice>, ModuleId, Vec<StreamId>) {
    let (mut config, module) = setup();
    let mut rng = Xoshiro256StarStar::seed_from_u64(seed);
    let streams = (0..count)
        .map(|n| random_stream(&mut config, module, &mut rng, n))
        .collect();
    (config, module, streams)
}

fn indices(config: &Configuration<MemoryDevice>, streams: &[StreamId]) -> Vec<Indices> {
    streams
        .iter()
        .map(|id| config.stream(*id).unwrap().indices())
        .collect()
}

#[test]
fn allocation_is_deterministic() {
    for seed in 0..8 {
        let (a, _, streams_a) = population(seed, 12);
        let (b, _, streams_b) = population(seed, 12);
        assert_eq!(indices(&a, &streams_a), indices(&b, &streams_b));
    }
}

#[test]
fn appending_keeps_earlier_indices() {
    let (mut config, module, streams) = population(3, 10);
    let before = indices(&config, &streams);
    let mut rng = Xoshiro256StarStar::seed_from_u64(99);
    random_stream(&mut config, module, &mut rng, 10);
    assert_eq!(indices(&config, &streams), before);
}

#[test]
fn gather_rows_follow_the_advance_law() {
    let (config, _, streams) = population(5, 12);
    let mut next = 2;
    for id in &streams {
        let stream = config.stream(*id).unwrap();
        let gather = stream.indices().gather;
        let g = stream.count_gather_ops();
        if g == 0 {
            assert_eq!(gather, 0);
        } else if g == 1 && stream.has_operation(OpCode::ForwardAll) {
            assert_eq!(gather, 1);
        } else {
            assert_eq!(gather as usize, next);
            next += g.max(stream.count_prefetch_ops());
        }
    }
}

#[test]
fn scatter_and_lookup_rows_are_dense() {
    let (config, _, streams) = population(11, 12);
    let mut lookup = 0;
    let mut scatter = 1;
    for id in &streams {
        let stream = config.stream(*id).unwrap();
        if !stream.kind().is_ingress() {
            assert_eq!(stream.indices().scatter, 0);
            continue;
        }
        assert_eq!(stream.indices().lookup, lookup);
        lookup += 1;
        let reads = stream.count_scatter_ops();
        if reads > 0 {
            assert_eq!(stream.indices().scatter as usize, scatter);
            scatter += reads;
        } else {
            assert_eq!(stream.indices().scatter, 0);
        }
    }
}
