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

//! Consistency and capacity rules.
//!
//! A non-final check runs after every structural change and covers what can
//! already be known; it escalates from stream to module to configuration.
//! The final check runs before apply and adds the rules that only hold once
//! the configuration is complete.

use crate::config::Configuration;
use crate::device::{Device, StatusItem};
use crate::error::{Error, Resource, Violation};
use crate::hw::tables::schedule_rows;
use crate::hw::{
    CONST_BUFFER_SIZE, DMA_ROWS, LOOKUP_RULES, REDUNDANCY_ROWS, SCHED_MIN_GAP, SCHED_ROWS,
};
use crate::index::{GATHER_START, SCATTER_START};
use crate::module::ModuleId;
use crate::operation::OpCode;
use crate::stream::{StreamId, StreamKind};
use itertools::Itertools;

const MIN_FRAME: usize = 64;
const MAX_PAYLOAD: usize = 1518;
/// Bytes a `Forward` may skip past what was already consumed.
const MAX_TRUNCATION: usize = 19;
const MAX_INSERTS: usize = 8;

fn violation(rule: Violation) -> Error {
    log::warn!("validation failed: {:?} ({})", rule, rule.code());
    Error::ValidationFailed(rule)
}

fn exhausted(resource: Resource) -> Error {
    log::warn!("out of {:?} ({})", resource, resource.code());
    Error::ResourceExhausted(resource)
}

impl<D: Device> Configuration<D> {
    pub fn validate_stream(&mut self, id: StreamId, complete: bool) -> Result<(), Error> {
        let stream = self.stream(id)?;
        let kind = stream.kind;
        if complete && !kind.is_ingress() {
            let frame: usize = stream
                .operations
                .iter()
                .filter(|op| op.code().is_gather())
                .map(|op| op.length() as usize)
                .sum();
            if frame < MIN_FRAME {
                return Err(violation(Violation::EgressFrameSize));
            }
        }
        if let Some(op) = stream.operations.iter().find(|op| !kind.permits(op.code())) {
            log::error!("{:?} does not permit {:?}", kind, op.code());
            return Err(Error::InvalidTransition);
        }
        if kind.is_redundant() {
            if let Some(peer) = stream.peer {
                let peer_module = self.stream(peer)?.module;
                if stream.module.is_some() && stream.module == peer_module {
                    return Err(violation(Violation::RedundantSameModule));
                }
                let in_config = |module: Option<ModuleId>| match module {
                    Some(module) => self.is_attached(module),
                    None => false,
                };
                if complete && !(in_config(stream.module) && in_config(peer_module)) {
                    return Err(violation(Violation::StreamNotInConfiguration));
                }
            }
        }

        let mut ingress = 0;
        let mut egress = 0;
        for op in &stream.operations {
            let len = op.length() as usize;
            match op.code() {
                OpCode::Insert | OpCode::InsertConstant | OpCode::Pad => {
                    ingress += len;
                    egress += len;
                }
                OpCode::Forward => {
                    let offset = op.offset() as usize;
                    if offset > ingress + MAX_TRUNCATION {
                        return Err(violation(Violation::ForwardOffset));
                    }
                    egress += len;
                    ingress = ingress.max(offset) + len;
                }
                OpCode::Read | OpCode::ForwardAll => {}
            }
        }
        if egress > MAX_PAYLOAD {
            return Err(violation(Violation::Payload));
        }
        if stream.count_operations(OpCode::Insert) > MAX_INSERTS {
            return Err(violation(Violation::InsertCount));
        }

        let module = stream.module;
        match module {
            Some(module) if !complete => self.validate_module(module, false),
            _ => Ok(()),
        }
    }

    pub fn validate_module(&mut self, id: ModuleId, complete: bool) -> Result<(), Error> {
        let members = self.module(id)?.streams.clone();
        if complete {
            for stream in &members {
                self.validate_stream(*stream, true)?;
            }
        }
        let module = self.module(id)?;
        let streams = members
            .iter()
            .map(|stream| self.stream(*stream))
            .collect::<Result<Vec<_>, Error>>()?;

        let constants: usize = streams
            .iter()
            .flat_map(|stream| stream.operations.iter())
            .filter(|op| op.code() == OpCode::InsertConstant)
            .map(|op| op.length() as usize)
            .sum();
        if constants > CONST_BUFFER_SIZE {
            return Err(exhausted(Resource::ConstantBuffer));
        }
        let redundant = streams.iter().filter(|s| s.kind.is_redundant()).count();
        if 1 + redundant > REDUNDANCY_ROWS {
            return Err(exhausted(Resource::RedundantStreams));
        }
        let rows = schedule_rows(module.fsc.iter().map(|fsc| (fsc.abs_cycle, fsc.cmd))).len();
        if rows > SCHED_ROWS {
            return Err(exhausted(Resource::ScheduleEvents));
        }
        if module.cycle_ns == 0 {
            return Err(violation(Violation::ModuleCycle));
        }

        for stream in &streams {
            for entry in &stream.schedules {
                if entry.period == 0 {
                    return Err(Error::InvalidArgument("schedule period is zero"));
                }
                if !num::Integer::is_multiple_of(&module.cycle_ns, &entry.period) {
                    return Err(violation(Violation::IncompatiblePeriod));
                }
            }
            if complete && stream.kind.is_redundant() {
                let peer = match stream.peer {
                    Some(peer) => self.stream(peer)?,
                    None => continue,
                };
                if stream.schedules.len() > 1 || stream.schedules.len() != peer.schedules.len() {
                    log::error!("redundant streams need one matching schedule each");
                    return Err(violation(Violation::RedundantSchedule));
                }
                if let (Some(own), Some(theirs)) = (stream.schedules.first(), peer.schedules.first())
                {
                    if own.period != module.cycle_ns || own.period != theirs.period {
                        return Err(violation(Violation::IncompatiblePeriod));
                    }
                }
            }
        }

        let ticks = std::iter::once(0).chain(module.fsc.iter().map(|fsc| fsc.abs_cycle));
        for (i, (last, at)) in ticks.tuple_windows().enumerate() {
            let gap = at.saturating_sub(last);
            if gap < SCHED_MIN_GAP && !(i == 0 && at == 0) {
                log::error!("commands at {} and {} are too close", last, at);
                return Err(violation(Violation::ScheduleGap));
            }
        }

        let gather: usize = streams
            .iter()
            .map(|s| s.count_gather_ops().max(s.count_prefetch_ops()))
            .sum();
        if GATHER_START + gather > DMA_ROWS {
            return Err(exhausted(Resource::GatherRows));
        }
        let scatter: usize = streams.iter().map(|s| s.count_scatter_ops()).sum();
        if SCATTER_START + scatter > DMA_ROWS {
            return Err(exhausted(Resource::ScatterRows));
        }
        if streams.iter().filter(|s| s.kind.is_ingress()).count() > LOOKUP_RULES {
            return Err(exhausted(Resource::LookupEntries));
        }

        if !complete && self.is_attached(id) {
            self.validate_config(false)?;
        }
        Ok(())
    }

    pub fn validate_config(&mut self, complete: bool) -> Result<(), Error> {
        if complete {
            let attached = self.attached().map(|(id, _)| id).collect::<Vec<_>>();
            for module in &attached {
                self.validate_module(*module, true)?;
            }
            for (_, module) in self.attached() {
                for id in &module.streams {
                    let stream = self.stream(*id)?;
                    let exempt = stream.kind == StreamKind::IngressTriggered && stream.child.is_some();
                    if stream.operations.is_empty() && !exempt {
                        log::error!("{:?} has no operation", id);
                        return Err(violation(Violation::OperationMissing));
                    }
                }
            }
        }
        self.recompute_buffers()?;
        let count = self.device.status(StatusItem::MsgbufCount)?;
        if self.buffers.len() as i64 > count {
            return Err(exhausted(Resource::MessageBufferCount));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::module::{ConnectionMode, Speed};
    use crate::operation::Operation;
    use crate::settings::Settings;
    use crate::stream::Lookup;
    use chrono::{TimeZone, Utc};

    const DMAC: [u8; 6] = [0x01, 0x80, 0xc2, 0, 0, 0x0e];
    const SMAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x10];

    fn config() -> (Configuration<MemoryDevice>, ModuleId) {
        let mut config = Configuration::new(MemoryDevice::new(), Settings::default());
        let module = config
            .create_module(ConnectionMode::Parallel, Speed::Speed1G, 0)
            .unwrap();
        config
            .set_module_schedule(module, 1_000_000, Utc.timestamp(0, 0))
            .unwrap();
        (config, module)
    }

    #[test]
    fn forward_may_not_skip_far() {
        let (mut config, _) = config();
        let event = config.create_event_stream(DMAC, SMAC, 10, 0).unwrap();
        // header is 16 bytes, so offset 35 skips exactly 19
        config.add_operation(event, Operation::forward(35, 40).unwrap()).unwrap();
        config.validate_stream(event, false).unwrap();
        assert_eq!(
            config.add_operation(event, Operation::forward(95, 10).unwrap()),
            Err(Error::ValidationFailed(Violation::ForwardOffset))
        );
        assert_eq!(config.stream(event).unwrap().operations().len(), 4);
    }

    #[test]
    fn frame_size_only_checked_when_complete() {
        let (mut config, _) = config();
        let tt = config.create_time_triggered_stream(DMAC, SMAC, 10, 0).unwrap();
        config.add_operation(tt, Operation::pad(47, 0).unwrap()).unwrap();
        config.validate_stream(tt, false).unwrap();
        assert_eq!(
            config.validate_stream(tt, true),
            Err(Error::ValidationFailed(Violation::EgressFrameSize))
        );
        config.add_operation(tt, Operation::pad(1, 0).unwrap()).unwrap();
        config.validate_stream(tt, true).unwrap();
    }

    #[test]
    fn insert_limit() {
        let (mut config, _) = config();
        let tt = config.create_time_triggered_stream(DMAC, SMAC, 10, 0).unwrap();
        for i in 0..MAX_INSERTS {
            let op = Operation::insert(4, &format!("acm_{}", i)).unwrap();
            config.add_operation(tt, op).unwrap();
        }
        let op = Operation::insert(4, "acm_last").unwrap();
        assert_eq!(
            config.add_operation(tt, op),
            Err(Error::ValidationFailed(Violation::InsertCount))
        );
    }

    #[test]
    fn schedule_gap() {
        let (mut config, module) = config();
        let tt = config.create_time_triggered_stream(DMAC, SMAC, 10, 0).unwrap();
        config.add_operation(tt, Operation::pad(48, 0).unwrap()).unwrap();
        // 319 ns early: tick 0 is exempt
        config.add_event(tt, 1_000_000, 319).unwrap();
        config.add_module_stream(module, tt).unwrap();
        let other = config.create_time_triggered_stream(DMAC, SMAC, 11, 0).unwrap();
        config.add_operation(other, Operation::pad(48, 0).unwrap()).unwrap();
        config.add_event(other, 1_000_000, 319 + 7 * 80).unwrap();
        assert_eq!(
            config.add_module_stream(module, other),
            Err(Error::ValidationFailed(Violation::ScheduleGap))
        );
        assert_eq!(config.module(module).unwrap().fsc_commands().len(), 1);
        assert_eq!(config.stream(other).unwrap().module(), None);
    }

    #[test]
    fn lookup_capacity() {
        let (mut config, module) = config();
        let lookup = Lookup::new([0; 16], [0xff; 16], None).unwrap();
        for _ in 0..LOOKUP_RULES {
            let ingress = config.create_ingress_triggered_stream(lookup.clone()).unwrap();
            config.add_operation(ingress, Operation::forward_all()).unwrap();
            config.add_module_stream(module, ingress).unwrap();
        }
        let ingress = config.create_ingress_triggered_stream(lookup).unwrap();
        assert_eq!(
            config.add_module_stream(module, ingress),
            Err(Error::ResourceExhausted(Resource::LookupEntries))
        );
    }

    #[test]
    fn operations_required_when_complete() {
        let (mut config, module) = config();
        let lookup = Lookup::new([0; 16], [0xff; 16], None).unwrap();
        let ingress = config.create_ingress_triggered_stream(lookup).unwrap();
        config.add_module_stream(module, ingress).unwrap();
        config.add_module(module).unwrap();
        assert_eq!(
            config.validate_config(true),
            Err(Error::ValidationFailed(Violation::OperationMissing))
        );
    }
}
