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

//! Stream relationships through the public API.
use acm::hw::words::Trigger;
use acm::*;
use chrono::{TimeZone, Utc};

const DMAC: MacAddress = [0x01, 0x80, 0xc2, 0, 0, 0x0e];
const SMAC: MacAddress = [0x02, 0, 0, 0, 0, 0x10];

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config() -> Configuration<MemoryDevice> {
    init();
    Configuration::new(MemoryDevice::new(), Settings::default())
}

fn module(config: &mut Configuration<MemoryDevice>, index: usize) -> ModuleId {
    let module = config
        .create_module(ConnectionMode::Parallel, Speed::Speed1G, index)
        .unwrap();
    config
        .set_module_schedule(module, 1_000_000, Utc.timestamp(0, 0))
        .unwrap();
    module
}

fn lookup() -> Lookup {
    Lookup::new([0; 16], [0xff; 16], None).unwrap()
}

fn create(config: &mut Configuration<MemoryDevice>, kind: StreamKind) -> StreamId {
    match kind {
        StreamKind::IngressTriggered => config.create_ingress_triggered_stream(lookup()),
        StreamKind::TimeTriggered => config.create_time_triggered_stream(DMAC, SMAC, 10, 0),
        StreamKind::Event => config.create_event_stream(DMAC, SMAC, 10, 0),
        StreamKind::Recovery => config.create_recovery_stream(DMAC, SMAC, 10, 0),
        _ => unreachable!(),
    }
    .unwrap()
}

#[test]
fn operation_compatibility() {
    use OpCode::*;
    let mut config = config();
    let operations = vec![
        Operation::read(0, 4, "acm_r").unwrap(),
        Operation::insert(4, "acm_i").unwrap(),
        Operation::insert_constant(&[1, 2]).unwrap(),
        Operation::pad(4, 0).unwrap(),
        Operation::forward(16, 4).unwrap(),
        Operation::forward_all(),
    ];
    let table = vec![
        (StreamKind::IngressTriggered, vec![Read, ForwardAll]),
        (StreamKind::TimeTriggered, vec![Insert, InsertConstant, Pad]),
        (StreamKind::Event, vec![Insert, InsertConstant, Pad, Forward]),
        (StreamKind::Recovery, vec![Insert, InsertConstant, Pad]),
    ];
    for (kind, allowed) in table {
        for op in &operations {
            let stream = create(&mut config, kind);
            let result = config.add_operation(stream, op.clone());
            if allowed.contains(&op.code()) {
                assert_eq!(result, Ok(()), "{:?} {:?}", kind, op.code());
            } else {
                assert_eq!(result, Err(Error::InvalidTransition), "{:?} {:?}", kind, op.code());
            }
        }
    }
}

#[test]
fn forwarding_ingress_takes_no_event() {
    let mut config = config();
    let ingress = create(&mut config, StreamKind::IngressTriggered);
    config
        .add_operation(ingress, Operation::forward_all())
        .unwrap();
    let event = create(&mut config, StreamKind::Event);
    assert_eq!(
        config.set_reference(ingress, event),
        Err(Error::InvalidTransition)
    );
    let (a, b) = (config.stream(ingress).unwrap(), config.stream(event).unwrap());
    assert_eq!(a.kind(), StreamKind::IngressTriggered);
    assert_eq!(b.kind(), StreamKind::Event);
    assert_eq!((a.child(), b.parent()), (None, None));
}

#[test]
fn references_follow_the_kind_table() {
    let mut config = config();
    let tt = create(&mut config, StreamKind::TimeTriggered);
    let event = create(&mut config, StreamKind::Event);
    let recovery = create(&mut config, StreamKind::Recovery);
    assert_eq!(config.set_reference(tt, event), Err(Error::InvalidTransition));
    assert_eq!(config.set_reference(recovery, event), Err(Error::InvalidTransition));
    assert!(config.set_reference(tt, tt).is_err());
    config.set_reference(event, recovery).unwrap();
    let other = create(&mut config, StreamKind::Event);
    assert_eq!(config.set_reference(other, recovery), Err(Error::AlreadyLinked));
}

#[test]
fn failed_pairing_restores_both_streams() {
    let mut config = config();
    let m = module(&mut config, 0);
    let a = create(&mut config, StreamKind::TimeTriggered);
    let b = create(&mut config, StreamKind::TimeTriggered);
    config.add_module_stream(m, a).unwrap();
    config.add_module_stream(m, b).unwrap();
    let before = (config.stream(a).unwrap().indices(), config.stream(b).unwrap().indices());
    assert_eq!(
        config.set_reference(a, b),
        Err(Error::ValidationFailed(Violation::RedundantSameModule))
    );
    for id in &[a, b] {
        let stream = config.stream(*id).unwrap();
        assert_eq!(stream.kind(), StreamKind::TimeTriggered);
        assert_eq!(stream.peer(), None);
    }
    assert_eq!(
        (config.stream(a).unwrap().indices(), config.stream(b).unwrap().indices()),
        before
    );
}

#[test]
fn deleting_a_partner_demotes_the_other() {
    let mut config = config();
    let m0 = module(&mut config, 0);
    let m1 = module(&mut config, 1);
    let a = create(&mut config, StreamKind::TimeTriggered);
    let b = create(&mut config, StreamKind::TimeTriggered);
    config.add_module_stream(m0, a).unwrap();
    config.add_module_stream(m1, b).unwrap();
    config.set_reference(a, b).unwrap();
    assert_eq!(config.stream(b).unwrap().indices().redundancy, 1);

    assert!(config.delete_stream(a).is_err());
    config.delete_module(m0).unwrap();
    assert!(config.stream(a).is_err());
    let b = config.stream(b).unwrap();
    assert_eq!(b.kind(), StreamKind::TimeTriggered);
    assert_eq!(b.peer(), None);
    assert_eq!(b.indices().redundancy, 0);
}

#[test]
fn recovery_chain_joins_with_its_ingress_stream() {
    let mut config = config();
    let m = module(&mut config, 0);
    let ingress = create(&mut config, StreamKind::IngressTriggered);
    config
        .add_operation(ingress, Operation::read(14, 8, "acm_rx").unwrap())
        .unwrap();
    let event = create(&mut config, StreamKind::Event);
    let recovery = create(&mut config, StreamKind::Recovery);
    for stream in &[event, recovery] {
        config
            .add_operation(*stream, Operation::pad(48, 0).unwrap())
            .unwrap();
    }
    config.set_reference(ingress, event).unwrap();
    config.set_reference(event, recovery).unwrap();
    config.add_window(ingress, 1_000_000, 1000, 100_000).unwrap();
    assert_eq!(
        config.add_module_stream(m, event),
        Err(Error::InvalidTransition)
    );
    config.add_module_stream(m, ingress).unwrap();

    assert_eq!(config.module(m).unwrap().streams(), &[ingress, event, recovery][..]);
    let gather = |id| config.stream(id).unwrap().indices().gather;
    assert_eq!((gather(ingress), gather(event), gather(recovery)), (0, 2, 6));

    let module = config.module(m).unwrap();
    let close = module
        .fsc_commands()
        .iter()
        .find(|fsc| fsc.cmd.close)
        .unwrap();
    let fixed = config.update_fsc_indexes(close).unwrap();
    assert_eq!(fixed.trigger, Trigger::FirstStage);
    assert_eq!(fixed.dma_index, 6);

    // members cannot be deleted, detached chains go as a whole
    assert!(config.delete_stream(ingress).is_err());
    config.delete_module(m).unwrap();
    for id in &[ingress, event, recovery] {
        assert!(config.stream(*id).is_err());
    }
}

#[test]
fn schedules_only_on_matching_kinds() {
    let mut config = config();
    let ingress = create(&mut config, StreamKind::IngressTriggered);
    let tt = create(&mut config, StreamKind::TimeTriggered);
    assert!(matches!(
        config.add_event(ingress, 1000, 10),
        Err(Error::PermissionDenied(_))
    ));
    assert!(matches!(
        config.add_window(tt, 1000, 10, 20),
        Err(Error::PermissionDenied(_))
    ));
    assert!(config.add_window(ingress, 1000, 10, 2000).is_err());
    assert!(config.add_event(tt, 0, 0).is_err());
    config.add_event(tt, 1000, 10).unwrap();
    assert_eq!(config.stream(tt).unwrap().schedules().len(), 1);
    config.clear_schedule(tt).unwrap();
    assert!(config.stream(tt).unwrap().schedules().is_empty());
}

#[test]
fn tiled_windows_keep_the_rule_open() {
    let mut config = config();
    let m = module(&mut config, 0);
    let ingress = create(&mut config, StreamKind::IngressTriggered);
    config
        .add_operation(ingress, Operation::read(14, 8, "acm_rx").unwrap())
        .unwrap();
    config.add_window(ingress, 250_000, 0, 250_000).unwrap();
    config.add_module_stream(m, ingress).unwrap();
    let commands = config.module(m).unwrap().fsc_commands();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].cmd.open);
    assert!(!commands[0].cmd.close);
}
